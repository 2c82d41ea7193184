//! Graph - Dependency edges between registered resources

use std::collections::{HashMap, HashSet};

use crate::resource::ResourceId;

/// Why one resource must settle before another
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependencyKind {
    /// An attribute of the target flows into this resource
    Data { attribute: String },
    /// Happens-before ordering with no data flow
    Explicit,
}

/// Dependency between resources
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    pub target: ResourceId,
    pub kind: DependencyKind,
}

/// Dependency graph for the resources of a plan
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// Resource -> list of dependencies
    pub edges: HashMap<ResourceId, Vec<Dependency>>,
    /// Reverse edges: target -> list of resources that depend on it
    pub reverse_edges: HashMap<ResourceId, Vec<ResourceId>>,
}

impl DependencyGraph {
    /// Create a new empty dependency graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a dependency edge; repeated edges are ignored
    pub fn add_edge(&mut self, from: ResourceId, dependency: Dependency) {
        let deps = self.edges.entry(from.clone()).or_default();
        if deps.contains(&dependency) {
            return;
        }
        let target = dependency.target.clone();
        deps.push(dependency);

        let dependents = self.reverse_edges.entry(target).or_default();
        if !dependents.contains(&from) {
            dependents.push(from);
        }
    }

    /// Get direct dependencies of a resource
    pub fn dependencies_of(&self, resource: &ResourceId) -> &[Dependency] {
        self.edges.get(resource).map_or(&[], |v| v.as_slice())
    }

    /// Distinct resources that must settle before `resource`
    pub fn prerequisites_of(&self, resource: &ResourceId) -> Vec<&ResourceId> {
        let mut seen = HashSet::new();
        self.dependencies_of(resource)
            .iter()
            .map(|d| &d.target)
            .filter(|target| seen.insert(*target))
            .collect()
    }

    /// Get resources that depend on this resource
    pub fn dependents_of(&self, resource: &ResourceId) -> &[ResourceId] {
        self.reverse_edges
            .get(resource)
            .map_or(&[], |v| v.as_slice())
    }

    /// Check if the graph has any cycles
    pub fn has_cycle(&self) -> bool {
        let mut visited = HashSet::new();
        let mut rec_stack = HashSet::new();

        for node in self.edges.keys() {
            if self.has_cycle_util(node, &mut visited, &mut rec_stack) {
                return true;
            }
        }
        false
    }

    fn has_cycle_util<'a>(
        &'a self,
        node: &'a ResourceId,
        visited: &mut HashSet<&'a ResourceId>,
        rec_stack: &mut HashSet<&'a ResourceId>,
    ) -> bool {
        if rec_stack.contains(node) {
            return true;
        }
        if visited.contains(node) {
            return false;
        }

        visited.insert(node);
        rec_stack.insert(node);

        for dep in self.dependencies_of(node) {
            if self.has_cycle_util(&dep.target, visited, rec_stack) {
                return true;
            }
        }

        rec_stack.remove(node);
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(target: &ResourceId) -> Dependency {
        Dependency {
            target: target.clone(),
            kind: DependencyKind::Data {
                attribute: "id".to_string(),
            },
        }
    }

    #[test]
    fn edges_and_reverse_edges() {
        let vpc = ResourceId::new("ec2.vpc", "main");
        let subnet = ResourceId::new("ec2.subnet", "a");
        let mut graph = DependencyGraph::new();
        graph.add_edge(subnet.clone(), data(&vpc));
        graph.add_edge(subnet.clone(), data(&vpc));

        assert_eq!(graph.dependencies_of(&subnet).len(), 1);
        assert_eq!(graph.dependents_of(&vpc), &[subnet.clone()]);
        assert!(graph.dependencies_of(&vpc).is_empty());
    }

    #[test]
    fn prerequisites_merge_data_and_explicit_edges() {
        let igw = ResourceId::new("ec2.internet_gateway", "main");
        let nat = ResourceId::new("ec2.nat_gateway", "0");
        let mut graph = DependencyGraph::new();
        graph.add_edge(nat.clone(), data(&igw));
        graph.add_edge(
            nat.clone(),
            Dependency {
                target: igw.clone(),
                kind: DependencyKind::Explicit,
            },
        );

        assert_eq!(graph.dependencies_of(&nat).len(), 2);
        assert_eq!(graph.prerequisites_of(&nat), vec![&igw]);
    }

    #[test]
    fn detects_cycles() {
        let a = ResourceId::new("t.a", "a");
        let b = ResourceId::new("t.b", "b");
        let mut graph = DependencyGraph::new();
        graph.add_edge(a.clone(), data(&b));
        assert!(!graph.has_cycle());
        graph.add_edge(b, data(&a));
        assert!(graph.has_cycle());
    }
}
