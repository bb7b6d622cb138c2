//! Isolation backend abstraction
//!
//! A backend creates, starts, observes and destroys execution environments.
//! It is a process-scoped resource: connect once at startup, share it as
//! `Arc<dyn IsolationBackend>`, call [`IsolationBackend::shutdown`] once at
//! process exit.

use crate::config::ResourceLimits;
use crate::error::BackendError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Backend-assigned environment identity
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EnvironmentId(pub String);

impl EnvironmentId {
    /// Create from backend identifier
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get identifier
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Shortened identifier for logs
    #[inline]
    #[must_use]
    pub fn short(&self) -> &str {
        let end = self.0.char_indices().nth(12).map_or(self.0.len(), |(i, _)| i);
        &self.0[..end]
    }
}

impl fmt::Display for EnvironmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Observed environment state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum EnvironmentStatus {
    /// Created, not yet running
    Created,
    /// Running
    Running,
    /// Exited with an optional exit code
    Exited { code: Option<i64> },
    /// Backend gave up on the environment
    Dead,
}

impl EnvironmentStatus {
    /// Check if no further progress will happen
    #[inline]
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Exited { .. } | Self::Dead)
    }
}

/// Host directory mounted into the environment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mount {
    pub source: PathBuf,
    pub target: String,
    pub read_only: bool,
}

/// Everything a backend needs to build one environment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentSpec {
    /// Image reference
    pub image: String,
    /// Entrypoint argv
    pub command: Vec<String>,
    /// Working directory inside the environment
    pub working_dir: String,
    /// Host mounts
    pub mounts: Vec<Mount>,
    /// Writable scratch mounts (`path:options`)
    pub tmpfs: Vec<String>,
    /// Resource ceilings
    pub limits: ResourceLimits,
    /// Execution identity
    pub user: String,
    /// Environment variables
    pub env: Vec<(String, String)>,
    /// Labels attached to the environment
    pub labels: Vec<(String, String)>,
    /// Disable all network access
    pub network_disabled: bool,
    /// Mount the root filesystem read-only
    pub read_only_root: bool,
    /// Forbid privilege escalation
    pub no_new_privileges: bool,
    /// Drop all kernel capabilities
    pub drop_all_capabilities: bool,
}

/// Environment lifecycle operations
#[async_trait]
pub trait IsolationBackend: Send + Sync {
    /// Backend name for logs and health output
    fn name(&self) -> &str;

    /// Build an environment without starting it
    async fn create(&self, spec: &EnvironmentSpec) -> Result<EnvironmentId, BackendError>;

    /// Start a created environment
    async fn start(&self, id: &EnvironmentId) -> Result<(), BackendError>;

    /// Current status
    async fn poll(&self, id: &EnvironmentId) -> Result<EnvironmentStatus, BackendError>;

    /// Force-terminate
    async fn kill(&self, id: &EnvironmentId) -> Result<(), BackendError>;

    /// Destroy (forced)
    async fn remove(&self, id: &EnvironmentId) -> Result<(), BackendError>;

    /// Captured output
    async fn logs(&self, id: &EnvironmentId) -> Result<String, BackendError>;

    /// Check connectivity
    async fn ping(&self) -> Result<(), BackendError>;

    /// Release process-scoped resources
    async fn shutdown(&self) -> Result<(), BackendError> {
        Ok(())
    }
}

/// Handle bound to one environment of one execution attempt
#[derive(Clone)]
pub struct EnvironmentHandle {
    id: EnvironmentId,
    backend: Arc<dyn IsolationBackend>,
}

impl fmt::Debug for EnvironmentHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvironmentHandle")
            .field("id", &self.id)
            .field("backend", &self.backend.name())
            .finish()
    }
}

impl EnvironmentHandle {
    /// Bind handle to an environment
    #[inline]
    #[must_use]
    pub fn new(id: EnvironmentId, backend: Arc<dyn IsolationBackend>) -> Self {
        Self { id, backend }
    }

    /// Environment identity
    #[inline]
    #[must_use]
    pub fn id(&self) -> &EnvironmentId {
        &self.id
    }

    /// Start the environment
    pub async fn start(&self) -> Result<(), BackendError> {
        self.backend.start(&self.id).await
    }

    /// Current status
    pub async fn poll(&self) -> Result<EnvironmentStatus, BackendError> {
        self.backend.poll(&self.id).await
    }

    /// Force-terminate
    pub async fn kill(&self) -> Result<(), BackendError> {
        self.backend.kill(&self.id).await
    }

    /// Destroy
    pub async fn remove(&self) -> Result<(), BackendError> {
        self.backend.remove(&self.id).await
    }

    /// Captured output
    pub async fn logs(&self) -> Result<String, BackendError> {
        self.backend.logs(&self.id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(!EnvironmentStatus::Created.is_terminal());
        assert!(!EnvironmentStatus::Running.is_terminal());
        assert!(EnvironmentStatus::Exited { code: Some(0) }.is_terminal());
        assert!(EnvironmentStatus::Dead.is_terminal());
    }

    #[test]
    fn short_id() {
        let id = EnvironmentId::new("0123456789abcdef0123");
        assert_eq!(id.short(), "0123456789ab");
        assert_eq!(EnvironmentId::new("abc").short(), "abc");
    }

    #[test]
    fn status_serializes_tagged() {
        let json = serde_json::to_value(EnvironmentStatus::Exited { code: Some(2) }).unwrap();
        assert_eq!(json["state"], "exited");
        assert_eq!(json["code"], 2);
    }
}
