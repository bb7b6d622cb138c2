//! Workspace configuration
//!
//! One TOML file, one section per concern. Every field has a default, so an
//! empty file is a valid configuration.
//!
//! ```toml
//! [server]
//! bind = "0.0.0.0:8000"
//!
//! [planner]
//! max_candidates = 5
//! critique_concurrency = 4
//!
//! [sandbox]
//! image = "mend-sandbox-python:3.11"
//! timeout_secs = 300
//!
//! [sandbox.policy]
//! max_payload_bytes = 65536
//! ```

use crate::error::ConfigError;
use crate::scoring::{ScoringWeights, ValidationWeights};
use mend_capability::GenerationConfig;
use mend_sandbox::SandboxConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// HTTP server settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    /// Allowed CORS origins; `*` allows any
    pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 8000)),
            allowed_origins: vec!["*".to_string()],
        }
    }
}

/// Document retrieval settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// JSON corpus file; empty corpus when unset
    pub corpus_path: Option<PathBuf>,
    /// Documents returned by explain
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            corpus_path: None,
            top_k: 5,
        }
    }
}

/// Planner settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Candidates kept from generation
    pub max_candidates: usize,
    /// Concurrent critique calls
    pub critique_concurrency: usize,
    /// Sandbox timeout override; sandbox default when unset
    pub execution_timeout_secs: Option<u64>,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            max_candidates: 5,
            critique_concurrency: 4,
            execution_timeout_secs: None,
        }
    }
}

impl PlannerConfig {
    /// Execution timeout override
    #[inline]
    #[must_use]
    pub fn execution_timeout(&self) -> Option<Duration> {
        self.execution_timeout_secs.map(Duration::from_secs)
    }
}

/// Root configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MendConfig {
    pub server: ServerConfig,
    pub generation: GenerationConfig,
    pub retrieval: RetrievalConfig,
    pub planner: PlannerConfig,
    pub scoring: ScoringWeights,
    pub validation: ValidationWeights,
    pub sandbox: SandboxConfig,
}

impl MendConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load and validate a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let config = Self::from_toml_str(&text)?;
        tracing::debug!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Parse and validate TOML text
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Check values are usable
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.planner.max_candidates == 0 {
            return Err(ConfigError::Invalid("planner.max_candidates must be positive".into()));
        }
        if self.planner.critique_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "planner.critique_concurrency must be positive".into(),
            ));
        }
        if self.planner.execution_timeout_secs == Some(0) {
            return Err(ConfigError::Invalid(
                "planner.execution_timeout_secs must be positive".into(),
            ));
        }
        if self.retrieval.top_k == 0 {
            return Err(ConfigError::Invalid("retrieval.top_k must be positive".into()));
        }
        self.sandbox.validate()?;
        Ok(())
    }

    /// With bind address
    #[inline]
    #[must_use]
    pub fn with_bind(mut self, bind: SocketAddr) -> Self {
        self.server.bind = bind;
        self
    }

    /// With planner settings
    #[inline]
    #[must_use]
    pub fn with_planner(mut self, planner: PlannerConfig) -> Self {
        self.planner = planner;
        self
    }

    /// With sandbox settings
    #[inline]
    #[must_use]
    pub fn with_sandbox(mut self, sandbox: SandboxConfig) -> Self {
        self.sandbox = sandbox;
        self
    }

    /// With corpus file
    #[inline]
    #[must_use]
    pub fn with_corpus(mut self, path: impl Into<PathBuf>) -> Self {
        self.retrieval.corpus_path = Some(path.into());
        self
    }
}
