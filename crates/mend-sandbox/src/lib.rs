//! Mend Sandbox - isolated execution of candidate fixes
//!
//! Builds one ephemeral, network-disabled, resource-bounded environment per
//! execution attempt, runs the candidate and a validation battery inside it,
//! and always tears it down:
//! - [`IsolationBackend`]: create/start/poll/kill/remove/logs seam
//! - [`DockerBackend`]: the `docker` CLI implementation
//! - [`EnvironmentContract`]: payload, manifest and tests passed as files
//! - [`PayloadPolicy`]: checks applied before anything is built
//! - [`SandboxExecutor`]: the run loop; never fails, returns [`ExecutionResult`]
//!
//! # Example
//!
//! ```rust,ignore
//! use mend_sandbox::{DockerBackend, ExecutionRequest, SandboxConfig, SandboxExecutor};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SandboxConfig::default();
//! let backend = Arc::new(DockerBackend::connect(&config).await?);
//! let executor = SandboxExecutor::new(backend.clone(), config)?;
//!
//! let result = executor
//!     .run(ExecutionRequest::new(Some("print('ok')".to_string())))
//!     .await;
//! println!("success = {}", result.success);
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod backend;
pub mod config;
pub mod contract;
pub mod docker;
pub mod error;
pub mod executor;
pub mod policy;
pub mod result;

pub use backend::{
    EnvironmentHandle, EnvironmentId, EnvironmentSpec, EnvironmentStatus, IsolationBackend, Mount,
};
pub use config::{PolicyConfig, ResourceLimits, SandboxConfig};
pub use contract::EnvironmentContract;
pub use docker::DockerBackend;
pub use error::{BackendError, PolicyViolation, SandboxConfigError};
pub use executor::{ExecutionRequest, SandboxExecutor};
pub use policy::PayloadPolicy;
pub use result::{
    parse_harness_output, ExecutionError, ExecutionErrorKind, ExecutionResult, TestOutcome,
};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
