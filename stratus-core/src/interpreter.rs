//! Interpreter - Evaluate a Plan using a Provider
//!
//! Each resource starts as soon as everything it depends on has settled, so
//! independent branches are in flight at the same time. The first failure
//! stops new work; requests already in flight are allowed to settle.

use std::collections::{HashMap, HashSet};

use futures::stream::{FuturesUnordered, StreamExt};
use log::{debug, info, warn};
use thiserror::Error;

use crate::effect::Effect;
use crate::error::ApplyError;
use crate::kinds;
use crate::plan::Plan;
use crate::provider::{BoxFuture, Certificate, Provider, ProviderError, ProviderResult};
use crate::resource::{AttrRef, Output, Resource, ResourceId, State, Value};

/// Interpreter configuration
#[derive(Debug, Clone, Default)]
pub struct InterpreterConfig {
    /// Upper bound on requests in flight; unbounded when `None`
    pub max_concurrency: Option<usize>,
}

/// Settled states of an applied (or partially applied) Plan
#[derive(Debug, Clone, Default)]
pub struct ApplyResult {
    states: HashMap<ResourceId, State>,
    /// Resource ids in the order they settled
    order: Vec<ResourceId>,
}

/// Exported value after resolution
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedExport {
    pub name: String,
    pub value: Value,
    pub secret: bool,
}

impl ApplyResult {
    fn record(&mut self, state: State) {
        self.order.push(state.id.clone());
        self.states.insert(state.id.clone(), state);
    }

    pub fn state(&self, id: &ResourceId) -> Option<&State> {
        self.states.get(id)
    }

    pub fn settled_order(&self) -> &[ResourceId] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Value of a settled attribute
    pub fn lookup(&self, reference: &AttrRef) -> Option<Value> {
        self.states
            .get(&reference.resource)
            .and_then(|state| state.attribute(&reference.path))
    }

    pub fn resolve_value(&self, value: &Value) -> Result<Value, AttrRef> {
        value.resolve(&|r: &AttrRef| self.lookup(r))
    }

    /// Resolve a forward reference returned by a builder
    pub fn resolve(&self, output: &Output) -> Result<Value, AttrRef> {
        match output {
            Output::Pending(r) => self.lookup(r).ok_or_else(|| r.clone()),
            Output::Resolved(v) => self.resolve_value(v),
        }
    }

    /// Resolve every export of `plan`
    pub fn resolve_exports(&self, plan: &Plan) -> Result<Vec<ResolvedExport>, ApplyError> {
        plan.exports()
            .iter()
            .map(|export| {
                self.resolve_value(&export.value)
                    .map(|value| ResolvedExport {
                        name: export.name.clone(),
                        value,
                        secret: export.secret,
                    })
                    .map_err(|reference| ApplyError::UnresolvedExport {
                        name: export.name.clone(),
                        reference,
                    })
            })
            .collect()
    }
}

/// The first error of an aborted apply, with everything that settled
#[derive(Debug, Error)]
#[error("{error}")]
pub struct ApplyFailure {
    #[source]
    pub error: ApplyError,
    pub settled: ApplyResult,
}

/// Interpreter that executes Effects using a Provider
pub struct Interpreter<P: Provider> {
    provider: P,
    config: InterpreterConfig,
}

impl<P: Provider> Interpreter<P> {
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            config: InterpreterConfig::default(),
        }
    }

    pub fn with_config(mut self, config: InterpreterConfig) -> Self {
        self.config = config;
        self
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Execute a Plan, creating every resource once its dependencies settled
    pub async fn apply(&self, plan: &Plan) -> Result<ApplyResult, ApplyFailure> {
        info!("applying plan '{}' ({})", plan.name(), plan.summary());
        debug_assert!(!plan.graph().has_cycle(), "plan graph must be acyclic");

        let mut result = ApplyResult::default();
        let mut started: HashSet<&ResourceId> = HashSet::new();
        let mut in_flight = FuturesUnordered::new();
        let mut failure: Option<ApplyError> = None;

        loop {
            if failure.is_none() {
                for effect in plan.effects() {
                    let id = &effect.resource().id;
                    if started.contains(id) {
                        continue;
                    }
                    // A zero bound still lets one creation run
                    if let Some(limit) = self.config.max_concurrency
                        && in_flight.len() >= limit.max(1)
                    {
                        break;
                    }
                    let ready = plan
                        .graph()
                        .prerequisites_of(id)
                        .iter()
                        .all(|dep| result.state(dep).is_some());
                    if !ready {
                        continue;
                    }

                    started.insert(id);
                    match prepare(effect.resource(), &result) {
                        Ok(resource) => {
                            debug!("starting {}", id);
                            in_flight.push(self.execute(effect, resource));
                        }
                        Err(error) => {
                            failure = Some(error);
                            break;
                        }
                    }
                }
            }

            let Some((id, outcome)) = in_flight.next().await else {
                break;
            };
            match outcome {
                Ok(state) => {
                    info!(
                        "settled {} ({})",
                        id,
                        state.identifier.as_deref().unwrap_or("-")
                    );
                    result.record(state);
                }
                Err(error) => {
                    warn!("{} failed: {}", id, error);
                    if failure.is_none() {
                        let error = if error.resource_id.is_some() {
                            error
                        } else {
                            error.for_resource(id)
                        };
                        failure = Some(ApplyError::Provider(error));
                    }
                }
            }
        }

        match failure {
            Some(error) => {
                warn!(
                    "apply aborted after {} of {} resources: {}",
                    result.len(),
                    plan.len(),
                    error
                );
                Err(ApplyFailure {
                    error,
                    settled: result,
                })
            }
            None => {
                info!("apply complete: {} resources settled", result.len());
                Ok(result)
            }
        }
    }

    fn execute(
        &self,
        effect: &Effect,
        resource: Resource,
    ) -> BoxFuture<'_, (ResourceId, ProviderResult<State>)> {
        let is_create = effect.is_mutating();
        Box::pin(async move {
            let outcome = if is_create {
                self.provider.create(&resource).await
            } else {
                self.read_data_source(&resource).await
            };
            (resource.id, outcome)
        })
    }

    async fn read_data_source(&self, resource: &Resource) -> ProviderResult<State> {
        if resource.id.resource_type != kinds::TLS_CERTIFICATE {
            return self.provider.read(resource).await;
        }

        let url = resource
            .attribute("url")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                ProviderError::new("certificate lookup requires a url").for_resource(resource.id.clone())
            })?;
        let chain = self.provider.fetch_certificate_chain(url).await?;
        if chain.is_empty() {
            return Err(ProviderError::new(format!("no certificates presented by {}", url))
                .for_resource(resource.id.clone()));
        }

        Ok(
            State::existing(resource.id.clone(), resource.attributes.clone())
                .with_identifier(url)
                .with_attribute(
                    "certificates",
                    Value::List(chain.iter().map(certificate_value).collect()),
                ),
        )
    }
}

/// Replace references with the settled values they point at
fn prepare(resource: &Resource, settled: &ApplyResult) -> Result<Resource, ApplyError> {
    let mut resolved = resource.clone();
    for (key, value) in &resource.attributes {
        let value = settled
            .resolve_value(value)
            .map_err(|reference| ApplyError::Unresolved {
                resource: resource.id.clone(),
                reference,
            })?;
        resolved.attributes.insert(key.clone(), value);
    }
    Ok(resolved)
}

fn certificate_value(certificate: &Certificate) -> Value {
    Value::Map(
        [
            ("subject".to_string(), Value::string(&certificate.subject)),
            ("issuer".to_string(), Value::string(&certificate.issuer)),
            (
                "sha1_fingerprint".to_string(),
                Value::string(&certificate.sha1_fingerprint),
            ),
            ("is_ca".to_string(), Value::Bool(certificate.is_ca)),
        ]
        .into_iter()
        .collect(),
    )
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::provider::CallerIdentity;

    #[derive(Default)]
    struct TestProvider {
        created: Mutex<Vec<Resource>>,
        fail_on: Option<&'static str>,
        delay_ms: u64,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl Provider for TestProvider {
        fn name(&self) -> &'static str {
            "test"
        }

        fn caller_identity(&self) -> BoxFuture<'_, ProviderResult<CallerIdentity>> {
            Box::pin(async { Err(ProviderError::new("not used")) })
        }

        fn create(&self, resource: &Resource) -> BoxFuture<'_, ProviderResult<State>> {
            let resource = resource.clone();
            Box::pin(async move {
                let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                self.max_in_flight.fetch_max(now, Ordering::SeqCst);
                if self.delay_ms > 0 {
                    tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
                }
                self.in_flight.fetch_sub(1, Ordering::SeqCst);

                if self.fail_on == Some(resource.id.name.as_str()) {
                    return Err(ProviderError::new("quota exceeded"));
                }
                self.created.lock().unwrap().push(resource.clone());
                let identifier = format!("{}-id", resource.id.name);
                Ok(State::existing(resource.id.clone(), resource.attributes.clone())
                    .with_identifier(identifier))
            })
        }

        fn read(&self, resource: &Resource) -> BoxFuture<'_, ProviderResult<State>> {
            let id = resource.id.clone();
            Box::pin(async move { Ok(State::not_found(id)) })
        }

        fn fetch_certificate_chain(
            &self,
            url: &str,
        ) -> BoxFuture<'_, ProviderResult<Vec<Certificate>>> {
            let url = url.to_string();
            Box::pin(async move {
                Ok(vec![Certificate {
                    subject: url,
                    issuer: "root".to_string(),
                    sha1_fingerprint: "9e99a48a9960b14926bb7f3b02e22da2b0ab7280".to_string(),
                    is_ca: false,
                }])
            })
        }
    }

    fn network_plan() -> Plan {
        let mut plan = Plan::new("test");
        let vpc = plan.register(Resource::new("ec2.vpc", "main")).unwrap();
        for az in ["a", "b", "c"] {
            plan.register(
                Resource::new("ec2.subnet", az).with_attribute("vpc_id", vpc.identifier()),
            )
            .unwrap();
        }
        plan
    }

    #[tokio::test]
    async fn apply_empty_plan() {
        let interpreter = Interpreter::new(TestProvider::default());
        let result = interpreter.apply(&Plan::new("empty")).await.unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn references_are_resolved_before_create() {
        let interpreter = Interpreter::new(TestProvider::default());
        let result = interpreter.apply(&network_plan()).await.unwrap();

        assert_eq!(result.len(), 4);
        assert_eq!(result.settled_order()[0], ResourceId::new("ec2.vpc", "main"));
        let created = interpreter.provider().created.lock().unwrap();
        for subnet in created.iter().filter(|r| r.id.resource_type == "ec2.subnet") {
            assert_eq!(subnet.attribute("vpc_id"), Some(&Value::string("main-id")));
        }
    }

    #[tokio::test]
    async fn independent_siblings_run_concurrently() {
        let provider = TestProvider {
            delay_ms: 20,
            ..Default::default()
        };
        let interpreter = Interpreter::new(provider);
        interpreter.apply(&network_plan()).await.unwrap();
        assert_eq!(interpreter.provider().max_in_flight.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn max_concurrency_limits_in_flight_requests() {
        let provider = TestProvider {
            delay_ms: 10,
            ..Default::default()
        };
        let interpreter = Interpreter::new(provider).with_config(InterpreterConfig {
            max_concurrency: Some(1),
        });
        interpreter.apply(&network_plan()).await.unwrap();
        assert_eq!(interpreter.provider().max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn zero_max_concurrency_runs_one_at_a_time() {
        let provider = TestProvider {
            delay_ms: 10,
            ..Default::default()
        };
        let interpreter = Interpreter::new(provider).with_config(InterpreterConfig {
            max_concurrency: Some(0),
        });
        let plan = network_plan();
        let result = interpreter.apply(&plan).await.unwrap();
        assert_eq!(result.len(), plan.len());
        assert_eq!(interpreter.provider().max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn first_failure_stops_dependents() {
        let provider = TestProvider {
            fail_on: Some("main"),
            ..Default::default()
        };
        let interpreter = Interpreter::new(provider);
        let failure = interpreter.apply(&network_plan()).await.unwrap_err();

        assert!(failure.settled.is_empty());
        assert!(interpreter.provider().created.lock().unwrap().is_empty());
        assert_eq!(failure.to_string(), "[ec2.vpc.main] quota exceeded");
    }

    #[tokio::test]
    async fn certificate_data_source_uses_fetch() {
        let mut plan = Plan::new("test");
        let cluster = plan
            .register(
                Resource::new("eks.cluster", "dev")
                    .with_attribute("issuer", "https://oidc.eks.example/id/ABC"),
            )
            .unwrap();
        let cert = plan
            .lookup(
                Resource::new(kinds::TLS_CERTIFICATE, "dev")
                    .with_attribute("url", cluster.output("issuer")),
            )
            .unwrap();

        let interpreter = Interpreter::new(TestProvider::default());
        let result = interpreter.apply(&plan).await.unwrap();
        assert_eq!(
            result.resolve(&cert.output("certificates.0.sha1_fingerprint")),
            Ok(Value::string("9e99a48a9960b14926bb7f3b02e22da2b0ab7280"))
        );
    }

    #[tokio::test]
    async fn exports_resolve_against_settled_states() {
        let mut plan = network_plan();
        plan.export("vpc_id", Value::Ref(ResourceId::new("ec2.vpc", "main").attr("id")));
        plan.export("missing", Value::Ref(ResourceId::new("ec2.vpc", "main").attr("arn")));

        let interpreter = Interpreter::new(TestProvider::default());
        let result = interpreter.apply(&plan).await.unwrap();
        let err = result.resolve_exports(&plan).unwrap_err();
        assert!(matches!(err, ApplyError::UnresolvedExport { ref name, .. } if name == "missing"));
    }
}
