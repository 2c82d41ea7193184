//! Stratus Core
//!
//! Composes AWS network and EKS resources into a deferred plan and applies it
//! through a pluggable provisioning backend

pub mod effect;
pub mod eks;
pub mod error;
pub mod graph;
pub mod interpreter;
pub mod kinds;
pub mod plan;
pub mod provider;
pub mod resource;
pub mod security_group;
pub mod tags;
pub mod vpc;

pub use eks::{ClusterBuilder, ClusterNetwork, ClusterSpec, ClusterState};
pub use error::{ApplyError, BuildError, BuildResult};
pub use interpreter::{ApplyFailure, ApplyResult, Interpreter, InterpreterConfig};
pub use plan::{Plan, ResourceHandle};
pub use provider::{CallerIdentity, Provider, ProviderError, ProviderResult};
pub use resource::{Output, Resource, ResourceId, State, Value};
pub use vpc::{NatMode, NetworkBuilder, NetworkSpec, NetworkState};
