//! Stratus State Management
//!
//! Persists what an apply created so that re-running it is idempotent, and
//! provides [`StateProvider`], a provisioning backend that settles resources
//! into the state file instead of calling AWS.
//!
//! # Example
//!
//! ```ignore
//! use stratus_core::{Interpreter, Plan};
//! use stratus_state::{LocalBackend, StateBackend, StateProvider};
//!
//! let backend = LocalBackend::with_path("stratus.state.json");
//! let lock = backend.acquire_lock("apply").await?;
//!
//! let provider = StateProvider::open(backend.clone(), "us-east-1").await?;
//! let result = Interpreter::new(&provider).apply(&plan).await?;
//! provider.record_outputs(&result.resolve_exports(&plan)?).await?;
//!
//! backend.release_lock(&lock).await?;
//! ```

pub mod backend;
pub mod backends;
pub mod lock;
pub mod provider;
pub mod state;

pub use backend::{BackendError, BackendResult, StateBackend};
pub use backends::LocalBackend;
pub use lock::LockInfo;
pub use provider::{StateProvider, partition_for_region};
pub use state::{OutputState, ResourceState, StateFile};
