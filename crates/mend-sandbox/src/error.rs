//! Error types for the sandbox
//!
//! None of these escape [`crate::SandboxExecutor::run`]; the executor folds
//! them into an [`crate::ExecutionResult`] so callers reason about sandbox
//! failures as data.

/// Isolation backend failures
#[derive(Debug, Clone, thiserror::Error)]
pub enum BackendError {
    /// Backend could not be reached
    #[error("isolation backend unavailable: {0}")]
    Unavailable(String),

    /// Backend command exited unsuccessfully
    #[error("`{command}` failed with status {status}: {stderr}")]
    Command {
        command: String,
        status: i32,
        stderr: String,
    },

    /// Environment is unknown to the backend
    #[error("environment not found: {0}")]
    NotFound(String),

    /// Backend answered with something unexpected
    #[error("unexpected backend response: {0}")]
    Protocol(String),

    /// Local I/O failure while preparing or driving the backend
    #[error("i/o error: {0}")]
    Io(String),
}

impl From<std::io::Error> for BackendError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Payload rejected before any environment is built
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyViolation {
    /// Payload larger than allowed
    #[error("{what} is {size} bytes, limit is {limit}")]
    TooLarge {
        what: &'static str,
        size: usize,
        limit: usize,
    },

    /// Payload matched a denied construct
    #[error("{what} matches denied pattern `{pattern}`")]
    DeniedPattern { what: &'static str, pattern: String },

    /// Requirement is not a plain package spec
    #[error("requirement `{0}` is not a plain package specification")]
    InvalidRequirement(String),

    /// Manifest lists too many requirements
    #[error("dependency manifest has {count} entries, limit is {limit}")]
    TooManyRequirements { count: usize, limit: usize },
}

/// Invalid sandbox configuration
#[derive(Debug, Clone, thiserror::Error)]
pub enum SandboxConfigError {
    /// Deny pattern failed to compile
    #[error("invalid policy pattern `{pattern}`: {message}")]
    InvalidPattern { pattern: String, message: String },

    /// Out-of-range value
    #[error("invalid sandbox setting {field}: {message}")]
    InvalidValue { field: &'static str, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_error_display() {
        let err = BackendError::Command {
            command: "docker start abc".to_string(),
            status: 1,
            stderr: "no such container".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("docker start abc"));
        assert!(text.contains("no such container"));
    }

    #[test]
    fn policy_violation_display() {
        let err = PolicyViolation::TooLarge {
            what: "payload",
            size: 10,
            limit: 5,
        };
        assert_eq!(err.to_string(), "payload is 10 bytes, limit is 5");
    }
}
