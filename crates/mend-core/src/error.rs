//! Error types for the planner
//!
//! Only [`PlanError`] ends a session, and only as `{kind, message}` at the
//! boundary. Critique failures degrade one branch; sandbox failures are data
//! inside the execution result.

use crate::stage::Stage;
use mend_capability::GenerationError;
use mend_sandbox::SandboxConfigError;

/// Terminal session errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum PlanError {
    /// Candidate generation failed or produced unparseable output
    #[error("candidate generation failed: {0}")]
    Generation(#[from] GenerationError),

    /// Ranking left nothing to execute
    #[error("no candidate selected for execution")]
    NoSelection,

    /// Stage sequencing bug
    #[error("illegal stage transition {from:?} -> {to:?}")]
    InvalidTransition { from: Stage, to: Stage },
}

impl PlanError {
    /// Machine-readable kind for the external boundary
    #[inline]
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Generation(_) => "generation_error",
            Self::NoSelection => "no_selection",
            Self::InvalidTransition { .. } => "internal",
        }
    }

    /// Check if error is worth retrying the whole request
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Generation(e) if e.is_retryable())
    }
}

/// Per-branch critique failure, never fatal
#[derive(Debug, Clone, thiserror::Error)]
pub enum CritiqueError {
    /// Capability call failed
    #[error("critique generation failed: {0}")]
    Generation(#[from] GenerationError),

    /// Output was not a critique object
    #[error("critique output malformed: {0}")]
    Malformed(String),
}

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("failed to read config {path}: {message}")]
    Io { path: String, message: String },

    /// File is not valid TOML for the schema
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Values are out of range
    #[error("invalid config value: {0}")]
    Invalid(String),

    /// Sandbox section rejected
    #[error("invalid sandbox config: {0}")]
    Sandbox(#[from] SandboxConfigError),
}
