//! Error types for capability providers

/// Text generation failures
///
/// Surfaced to the planner as-is. During candidate generation any of these is
/// fatal to the session; during critique it only degrades one branch.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GenerationError {
    /// Provider is missing credentials or configuration
    #[error("generation provider not configured: {0}")]
    NotConfigured(String),

    /// Network or protocol failure talking to the provider
    #[error("generation transport failed: {0}")]
    Transport(String),

    /// Provider answered with a non-success status
    #[error("generation provider returned {status}: {message}")]
    Provider { status: u16, message: String },

    /// Rate limited and out of retries
    #[error("generation rate limited after {attempts} attempts")]
    RateLimited { attempts: u32 },

    /// Provider answered but with no content
    #[error("generation returned an empty response")]
    EmptyResponse,

    /// Output could not be parsed into the expected structure
    #[error("generation output malformed: {0}")]
    Malformed(String),
}

impl GenerationError {
    /// Check if error is retryable
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::RateLimited { .. } | Self::EmptyResponse
        ) || matches!(self, Self::Provider { status, .. } if *status >= 500)
    }

    /// Short machine-readable kind, used at the external boundary
    #[inline]
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotConfigured(_) => "not_configured",
            Self::Transport(_) => "transport",
            Self::Provider { .. } => "provider",
            Self::RateLimited { .. } => "rate_limited",
            Self::EmptyResponse => "empty_response",
            Self::Malformed(_) => "malformed",
        }
    }
}

impl From<reqwest::Error> for GenerationError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

/// Document retrieval failures
#[derive(Debug, Clone, thiserror::Error)]
pub enum RetrievalError {
    /// Corpus could not be read
    #[error("corpus unavailable: {0}")]
    Io(String),

    /// Corpus content is invalid
    #[error("invalid corpus: {0}")]
    Corpus(String),

    /// Retrieval backend failure
    #[error("retrieval backend failed: {0}")]
    Backend(String),
}

impl From<std::io::Error> for RetrievalError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generation_error_display() {
        let err = GenerationError::Provider {
            status: 401,
            message: "bad key".to_string(),
        };
        assert!(err.to_string().contains("401"));
        assert_eq!(err.kind(), "provider");
    }

    #[test]
    fn generation_error_is_retryable() {
        assert!(GenerationError::Transport("reset".to_string()).is_retryable());
        assert!(GenerationError::RateLimited { attempts: 3 }.is_retryable());
        assert!(GenerationError::Provider {
            status: 503,
            message: String::new()
        }
        .is_retryable());
        assert!(!GenerationError::Provider {
            status: 400,
            message: String::new()
        }
        .is_retryable());
        assert!(!GenerationError::Malformed("x".to_string()).is_retryable());
    }
}
