//! Plan - Deferred resource graph produced by the builders
//!
//! Registering a resource only records it; nothing is created until the
//! Plan is applied by the Interpreter.

use std::collections::HashMap;

use log::debug;

use crate::effect::Effect;
use crate::error::{BuildError, BuildResult};
use crate::graph::{Dependency, DependencyGraph, DependencyKind};
use crate::resource::{Output, Resource, ResourceId, Value};

/// Handle to a registered resource
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceHandle {
    id: ResourceId,
}

impl ResourceHandle {
    pub fn id(&self) -> &ResourceId {
        &self.id
    }

    /// Forward reference to the backend identifier
    pub fn identifier(&self) -> Output {
        self.output("id")
    }

    /// Forward reference to any attribute the resource will produce
    pub fn output(&self, path: &str) -> Output {
        Output::pending(self.id.attr(path))
    }
}

/// Named value exposed to the caller once the Plan is applied
#[derive(Debug, Clone, PartialEq)]
pub struct Export {
    pub name: String,
    pub value: Value,
    /// Secret exports are masked when displayed
    pub secret: bool,
}

/// Plan containing Effects to be executed
#[derive(Debug, Clone, Default)]
pub struct Plan {
    name: String,
    effects: Vec<Effect>,
    index: HashMap<ResourceId, usize>,
    graph: DependencyGraph,
    exports: Vec<Export>,
}

impl Plan {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register a resource to be created
    pub fn register(&mut self, resource: Resource) -> BuildResult<ResourceHandle> {
        self.insert(Effect::Create(resource.with_read_only(false)))
    }

    /// Register a data source to be looked up
    pub fn lookup(&mut self, resource: Resource) -> BuildResult<ResourceHandle> {
        self.insert(Effect::Read(resource.with_read_only(true)))
    }

    fn insert(&mut self, effect: Effect) -> BuildResult<ResourceHandle> {
        let resource = effect.resource();
        let id = resource.id.clone();
        if self.index.contains_key(&id) {
            return Err(BuildError::DuplicateResource(id));
        }

        let mut dependencies = Vec::new();
        for reference in resource.references() {
            dependencies.push(Dependency {
                target: reference.resource.clone(),
                kind: DependencyKind::Data {
                    attribute: reference.path.clone(),
                },
            });
        }
        for target in &resource.depends_on {
            dependencies.push(Dependency {
                target: target.clone(),
                kind: DependencyKind::Explicit,
            });
        }

        for dependency in &dependencies {
            if !self.index.contains_key(&dependency.target) {
                return Err(BuildError::UnknownReference {
                    from: id,
                    to: dependency.target.clone(),
                });
            }
        }
        for dependency in dependencies {
            self.graph.add_edge(id.clone(), dependency);
        }

        debug!(
            "registered {} ({} dependencies)",
            id,
            self.graph.dependencies_of(&id).len()
        );
        self.index.insert(id.clone(), self.effects.len());
        self.effects.push(effect);
        Ok(ResourceHandle { id })
    }

    /// Expose a value under `name`
    pub fn export(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.push_export(name.into(), value.into(), false);
    }

    /// Expose a value that must not be displayed by default
    pub fn export_secret(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.push_export(name.into(), value.into(), true);
    }

    fn push_export(&mut self, name: String, value: Value, secret: bool) {
        self.exports.retain(|e| e.name != name);
        self.exports.push(Export {
            name,
            value,
            secret,
        });
    }

    pub fn exports(&self) -> &[Export] {
        &self.exports
    }

    /// Effects in registration order (always a valid dependency order)
    pub fn effects(&self) -> &[Effect] {
        &self.effects
    }

    pub fn get(&self, id: &ResourceId) -> Option<&Resource> {
        self.index.get(id).map(|&i| self.effects[i].resource())
    }

    pub fn contains(&self, id: &ResourceId) -> bool {
        self.index.contains_key(id)
    }

    /// All registered resources of one type, in registration order
    pub fn resources_of_type<'a>(
        &'a self,
        resource_type: &'a str,
    ) -> impl Iterator<Item = &'a Resource> + 'a {
        self.effects
            .iter()
            .map(Effect::resource)
            .filter(move |r| r.id.resource_type == resource_type)
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn len(&self) -> usize {
        self.effects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }

    /// Number of mutating Effects
    pub fn mutation_count(&self) -> usize {
        self.effects.iter().filter(|e| e.is_mutating()).count()
    }

    /// Generate a summary of the Plan for display
    pub fn summary(&self) -> PlanSummary {
        let mut summary = PlanSummary::default();
        for effect in &self.effects {
            match effect {
                Effect::Read(_) => summary.read += 1,
                Effect::Create(_) => summary.create += 1,
            }
        }
        summary
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct PlanSummary {
    pub read: usize,
    pub create: usize,
}

impl std::fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Plan: {} to create, {} to read",
            self.create, self.read
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_plan() {
        let plan = Plan::new("dev");
        assert!(plan.is_empty());
        assert_eq!(plan.mutation_count(), 0);
        assert_eq!(plan.summary().to_string(), "Plan: 0 to create, 0 to read");
    }

    #[test]
    fn register_records_data_and_explicit_edges() {
        let mut plan = Plan::new("dev");
        let vpc = plan.register(Resource::new("ec2.vpc", "main")).unwrap();
        let igw = plan
            .register(
                Resource::new("ec2.internet_gateway", "main")
                    .with_attribute("vpc_id", vpc.identifier()),
            )
            .unwrap();
        let nat = plan
            .register(Resource::new("ec2.nat_gateway", "0").with_depends_on([igw.id().clone()]))
            .unwrap();

        let deps = plan.graph().dependencies_of(nat.id());
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].kind, DependencyKind::Explicit);
        assert_eq!(
            plan.graph().dependencies_of(igw.id())[0].kind,
            DependencyKind::Data {
                attribute: "id".to_string()
            }
        );
        assert_eq!(plan.graph().dependents_of(vpc.id()), &[igw.id().clone()]);
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut plan = Plan::new("dev");
        plan.register(Resource::new("ec2.vpc", "main")).unwrap();
        let err = plan.register(Resource::new("ec2.vpc", "main")).unwrap_err();
        assert!(matches!(err, BuildError::DuplicateResource(_)));
    }

    #[test]
    fn reference_to_unregistered_resource_is_rejected() {
        let mut plan = Plan::new("dev");
        let dangling = ResourceId::new("ec2.vpc", "missing");
        let err = plan
            .register(Resource::new("ec2.subnet", "a").with_attribute("vpc_id", dangling.attr("id")))
            .unwrap_err();
        match err {
            BuildError::UnknownReference { to, .. } => assert_eq!(to, dangling),
            other => panic!("Expected UnknownReference, got {:?}", other),
        }
        assert!(plan.is_empty());
    }

    #[test]
    fn lookups_are_reads() {
        let mut plan = Plan::new("dev");
        plan.register(Resource::new("eks.cluster", "dev")).unwrap();
        let cert = plan
            .lookup(Resource::new("tls.certificate", "dev"))
            .unwrap();

        assert!(plan.get(cert.id()).unwrap().is_data_source());
        let summary = plan.summary();
        assert_eq!(summary, PlanSummary { read: 1, create: 1 });
        assert_eq!(plan.mutation_count(), 1);
    }

    #[test]
    fn exports_replace_by_name() {
        let mut plan = Plan::new("dev");
        plan.export("vpc_id", "vpc-1");
        plan.export_secret("vpc_id", "vpc-2");
        assert_eq!(plan.exports().len(), 1);
        assert!(plan.exports()[0].secret);
        assert_eq!(plan.exports()[0].value, Value::string("vpc-2"));
    }
}
