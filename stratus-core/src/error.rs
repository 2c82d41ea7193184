//! Error types for building and applying plans

use thiserror::Error;

use crate::provider::ProviderError;
use crate::resource::{AttrRef, ResourceId};

/// Errors raised while composing a plan, before anything is created
#[derive(Debug, Error)]
pub enum BuildError {
    /// The caller supplied inconsistent configuration
    #[error("Invalid configuration: {0}")]
    Contract(String),

    #[error("Resource {0} is registered twice")]
    DuplicateResource(ResourceId),

    /// A resource points at something that is not part of the plan
    #[error("Resource {from} references unregistered resource {to}")]
    UnknownReference { from: ResourceId, to: ResourceId },

    /// Identity or partition lookup failed
    #[error("Lookup failed: {0}")]
    Lookup(#[source] ProviderError),
}

impl BuildError {
    pub fn contract(message: impl Into<String>) -> Self {
        Self::Contract(message.into())
    }
}

/// Errors raised while the provisioning backend evaluates a plan
#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("{0}")]
    Provider(#[from] ProviderError),

    /// A settled resource did not produce an attribute another resource needs
    #[error("Cannot resolve {reference} for {resource}")]
    Unresolved {
        resource: ResourceId,
        reference: AttrRef,
    },

    #[error("Cannot resolve {reference} for output '{name}'")]
    UnresolvedExport { name: String, reference: AttrRef },
}

pub type BuildResult<T> = Result<T, BuildError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contract_error_display() {
        let error = BuildError::contract("2 public subnet CIDRs for 3 availability zones");
        assert_eq!(
            error.to_string(),
            "Invalid configuration: 2 public subnet CIDRs for 3 availability zones"
        );
    }

    #[test]
    fn unresolved_error_display() {
        let error = ApplyError::Unresolved {
            resource: ResourceId::new("iam.oidc_provider", "dev"),
            reference: ResourceId::new("tls.certificate", "dev").attr("certificates.0.sha1_fingerprint"),
        };
        assert_eq!(
            error.to_string(),
            "Cannot resolve ${tls.certificate.dev.certificates.0.sha1_fingerprint} for iam.oidc_provider.dev"
        );
    }
}
