//! Sandbox configuration

use crate::error::SandboxConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Resource ceilings for one execution environment
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceLimits {
    /// Memory ceiling in MB (swap is capped to the same value)
    pub memory_mb: u64,
    /// CPU share ceiling in cores
    pub cpu_cores: f64,
    /// Maximum number of processes
    pub pids_limit: u64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            memory_mb: 512,
            cpu_cores: 0.5,
            pids_limit: 128,
        }
    }
}

/// Payload policy configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Maximum payload (and test override) size in bytes
    pub max_payload_bytes: usize,
    /// Maximum number of declared requirements
    pub max_requirements: usize,
    /// Regexes that reject a payload when matched
    pub deny_patterns: Vec<String>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            max_payload_bytes: 64 * 1024,
            max_requirements: 32,
            deny_patterns: default_deny_patterns(),
        }
    }
}

/// Deny-list applied to payloads unless configured otherwise
#[must_use]
pub fn default_deny_patterns() -> Vec<String> {
    [
        r"\bimport\s+socket\b",
        r"\bfrom\s+socket\s+import\b",
        r"\bsubprocess\b",
        r"\bos\.(system|popen|exec\w*|spawn\w*|fork\w*)\b",
        r"(^|[^\w.])(eval|exec)\s*\(",
        r"__import__\s*\(",
        r"\bshutil\.rmtree\b",
        r"\bctypes\b",
    ]
    .iter()
    .map(|p| (*p).to_string())
    .collect()
}

/// Image built from `image/Dockerfile`, with pytest preinstalled
pub const DEFAULT_IMAGE: &str = "mend-sandbox-python:3.11";

/// Sandbox executor configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Image every environment is built from
    pub image: String,
    /// Non-privileged execution identity
    pub user: String,
    /// Resource ceilings
    pub limits: ResourceLimits,
    /// Default wall-clock timeout in seconds
    pub timeout_secs: u64,
    /// Status poll interval in milliseconds
    pub poll_interval_ms: u64,
    /// Budget for background teardown after cancellation, in seconds
    pub grace_period_secs: u64,
    /// Manifest used when a candidate declares no dependencies
    pub default_requirements: Vec<String>,
    /// Container CLI binary
    pub docker_binary: String,
    /// Payload policy
    pub policy: PolicyConfig,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            image: DEFAULT_IMAGE.to_string(),
            user: "nobody".to_string(),
            limits: ResourceLimits::default(),
            timeout_secs: 300,
            poll_interval_ms: 100,
            grace_period_secs: 10,
            default_requirements: vec!["pytest".to_string()],
            docker_binary: "docker".to_string(),
            policy: PolicyConfig::default(),
        }
    }
}

impl SandboxConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With timeout
    #[inline]
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = timeout.as_secs().max(1);
        self
    }

    /// With poll interval
    #[inline]
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = interval.as_millis().max(1) as u64;
        self
    }

    /// With image
    #[inline]
    #[must_use]
    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = image.into();
        self
    }

    /// Default timeout
    #[inline]
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Poll interval
    #[inline]
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Teardown grace period
    #[inline]
    #[must_use]
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }

    /// Check values are usable
    pub fn validate(&self) -> Result<(), SandboxConfigError> {
        if self.image.trim().is_empty() {
            return Err(SandboxConfigError::InvalidValue {
                field: "image",
                message: "must not be empty".to_string(),
            });
        }
        if self.user.trim().is_empty() || self.user == "root" || self.user == "0" {
            return Err(SandboxConfigError::InvalidValue {
                field: "user",
                message: "must be a non-privileged identity".to_string(),
            });
        }
        if self.timeout_secs == 0 {
            return Err(SandboxConfigError::InvalidValue {
                field: "timeout_secs",
                message: "must be positive".to_string(),
            });
        }
        if self.poll_interval_ms == 0 {
            return Err(SandboxConfigError::InvalidValue {
                field: "poll_interval_ms",
                message: "must be positive".to_string(),
            });
        }
        if self.limits.memory_mb == 0 || self.limits.cpu_cores.is_nan() || self.limits.cpu_cores <= 0.0 {
            return Err(SandboxConfigError::InvalidValue {
                field: "limits",
                message: "memory and cpu ceilings must be positive".to_string(),
            });
        }
        Ok(())
    }
}
