//! Provider - Trait abstracting the provisioning backend
//!
//! A Provider accepts resource requests and settles them into identifiers.
//! Builders never call it directly; the Interpreter drives it from a Plan.

use std::future::Future;
use std::pin::Pin;

use crate::resource::{Resource, ResourceId, State};

/// Error type for Provider operations
#[derive(Debug)]
pub struct ProviderError {
    pub message: String,
    pub resource_id: Option<ResourceId>,
    pub cause: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(ref id) = self.resource_id {
            write!(f, "[{}] {}", id, self.message)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl std::error::Error for ProviderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_ref()
            .map(|e| e.as_ref() as &dyn std::error::Error)
    }
}

impl ProviderError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            resource_id: None,
            cause: None,
        }
    }

    pub fn for_resource(mut self, id: ResourceId) -> Self {
        self.resource_id = Some(id);
        self
    }

    pub fn with_cause(mut self, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Return type for async operations
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Identity of the caller the backend acts as
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity {
    pub account_id: String,
    pub arn: String,
    pub user_id: String,
    /// AWS partition (e.g., "aws", "aws-cn", "aws-us-gov")
    pub partition: String,
}

impl CallerIdentity {
    /// ARN of an AWS managed IAM policy in this partition
    pub fn managed_policy_arn(&self, policy_name: &str) -> String {
        format!("arn:{}:iam::aws:policy/{}", self.partition, policy_name)
    }
}

/// One certificate of a remote TLS chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    pub subject: String,
    pub issuer: String,
    pub sha1_fingerprint: String,
    pub is_ca: bool,
}

/// Main Provider trait
///
/// All operations are async and involve side effects.
pub trait Provider: Send + Sync {
    /// Name of this Provider (e.g., "aws", "local")
    fn name(&self) -> &'static str;

    /// Resolve account, caller ARN and partition
    fn caller_identity(&self) -> BoxFuture<'_, ProviderResult<CallerIdentity>>;

    /// Create a resource
    ///
    /// All references in `resource` are resolved before this is called.
    /// Returns State with identifier set to the AWS internal ID (e.g., vpc-xxx)
    fn create(&self, resource: &Resource) -> BoxFuture<'_, ProviderResult<State>>;

    /// Look up a data source
    fn read(&self, resource: &Resource) -> BoxFuture<'_, ProviderResult<State>>;

    /// Fetch the TLS certificate chain presented at `url`, leaf first
    fn fetch_certificate_chain(&self, url: &str) -> BoxFuture<'_, ProviderResult<Vec<Certificate>>>;
}

/// Provider implementation for Box<dyn Provider>
/// This enables dynamic dispatch for Providers
impl Provider for Box<dyn Provider> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn caller_identity(&self) -> BoxFuture<'_, ProviderResult<CallerIdentity>> {
        (**self).caller_identity()
    }

    fn create(&self, resource: &Resource) -> BoxFuture<'_, ProviderResult<State>> {
        (**self).create(resource)
    }

    fn read(&self, resource: &Resource) -> BoxFuture<'_, ProviderResult<State>> {
        (**self).read(resource)
    }

    fn fetch_certificate_chain(&self, url: &str) -> BoxFuture<'_, ProviderResult<Vec<Certificate>>> {
        (**self).fetch_certificate_chain(url)
    }
}

impl<T: Provider + ?Sized> Provider for &T {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn caller_identity(&self) -> BoxFuture<'_, ProviderResult<CallerIdentity>> {
        (**self).caller_identity()
    }

    fn create(&self, resource: &Resource) -> BoxFuture<'_, ProviderResult<State>> {
        (**self).create(resource)
    }

    fn read(&self, resource: &Resource) -> BoxFuture<'_, ProviderResult<State>> {
        (**self).read(resource)
    }

    fn fetch_certificate_chain(&self, url: &str) -> BoxFuture<'_, ProviderResult<Vec<Certificate>>> {
        (**self).fetch_certificate_chain(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Mock Provider for testing
    struct MockProvider;

    impl Provider for MockProvider {
        fn name(&self) -> &'static str {
            "mock"
        }

        fn caller_identity(&self) -> BoxFuture<'_, ProviderResult<CallerIdentity>> {
            Box::pin(async {
                Ok(CallerIdentity {
                    account_id: "123456789012".to_string(),
                    arn: "arn:aws-cn:iam::123456789012:user/ops".to_string(),
                    user_id: "AIDAEXAMPLE".to_string(),
                    partition: "aws-cn".to_string(),
                })
            })
        }

        fn create(&self, resource: &Resource) -> BoxFuture<'_, ProviderResult<State>> {
            let id = resource.id.clone();
            let attrs = resource.attributes.clone();
            Box::pin(async move { Ok(State::existing(id, attrs).with_identifier("mock-id-123")) })
        }

        fn read(&self, resource: &Resource) -> BoxFuture<'_, ProviderResult<State>> {
            let id = resource.id.clone();
            Box::pin(async move { Ok(State::not_found(id)) })
        }

        fn fetch_certificate_chain(
            &self,
            _url: &str,
        ) -> BoxFuture<'_, ProviderResult<Vec<Certificate>>> {
            Box::pin(async { Err(ProviderError::new("connection refused")) })
        }
    }

    #[tokio::test]
    async fn mock_provider_create_returns_existing() {
        let provider: Box<dyn Provider> = Box::new(MockProvider);
        let resource = Resource::new("ec2.vpc", "main");
        let state = provider.create(&resource).await.unwrap();
        assert!(state.exists);
        assert_eq!(state.identifier, Some("mock-id-123".to_string()));
    }

    #[tokio::test]
    async fn managed_policy_arn_uses_partition() {
        let identity = MockProvider.caller_identity().await.unwrap();
        assert_eq!(
            identity.managed_policy_arn("AmazonEKSClusterPolicy"),
            "arn:aws-cn:iam::aws:policy/AmazonEKSClusterPolicy"
        );
    }

    #[test]
    fn error_display_includes_resource() {
        let error = ProviderError::new("quota exceeded")
            .for_resource(ResourceId::new("ec2.eip", "dev0"));
        assert_eq!(error.to_string(), "[ec2.eip.dev0] quota exceeded");
    }
}
