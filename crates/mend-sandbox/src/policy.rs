//! Payload policy
//!
//! Candidate payloads are untrusted generated code. Before anything is built
//! the payload, test overrides and dependency manifest are checked here; a
//! violation short-circuits execution.

use crate::config::PolicyConfig;
use crate::error::{PolicyViolation, SandboxConfigError};
use crate::executor::ExecutionRequest;
use regex::{Regex, RegexSet};

const REQUIREMENT_PATTERN: &str = r"^[A-Za-z0-9][A-Za-z0-9._-]*(\[[A-Za-z0-9_,.-]+\])?(\s*(==|>=|<=|~=|!=|<|>)\s*[A-Za-z0-9.*+!_-]+(\s*,\s*(==|>=|<=|~=|!=|<|>)\s*[A-Za-z0-9.*+!_-]+)*)?$";

/// Compiled payload policy
#[derive(Debug, Clone)]
pub struct PayloadPolicy {
    max_payload_bytes: usize,
    max_requirements: usize,
    patterns: Vec<String>,
    deny: RegexSet,
    requirement: Regex,
}

impl PayloadPolicy {
    /// Compile policy from configuration
    pub fn from_config(config: &PolicyConfig) -> Result<Self, SandboxConfigError> {
        let deny = RegexSet::new(&config.deny_patterns).map_err(|e| {
            SandboxConfigError::InvalidPattern {
                pattern: config.deny_patterns.join(" | "),
                message: e.to_string(),
            }
        })?;
        let requirement =
            Regex::new(REQUIREMENT_PATTERN).map_err(|e| SandboxConfigError::InvalidPattern {
                pattern: REQUIREMENT_PATTERN.to_string(),
                message: e.to_string(),
            })?;

        Ok(Self {
            max_payload_bytes: config.max_payload_bytes,
            max_requirements: config.max_requirements,
            patterns: config.deny_patterns.clone(),
            deny,
            requirement,
        })
    }

    /// Check a request against the policy
    pub fn check(&self, request: &ExecutionRequest) -> Result<(), PolicyViolation> {
        if let Some(payload) = &request.payload {
            self.check_source("payload", payload)?;
        }
        if let Some(tests) = &request.test_overrides {
            self.check_source("test override", tests)?;
        }

        if request.requirements.len() > self.max_requirements {
            return Err(PolicyViolation::TooManyRequirements {
                count: request.requirements.len(),
                limit: self.max_requirements,
            });
        }
        for requirement in &request.requirements {
            if !self.requirement.is_match(requirement.trim()) {
                return Err(PolicyViolation::InvalidRequirement(requirement.clone()));
            }
        }
        Ok(())
    }

    fn check_source(&self, what: &'static str, source: &str) -> Result<(), PolicyViolation> {
        if source.len() > self.max_payload_bytes {
            return Err(PolicyViolation::TooLarge {
                what,
                size: source.len(),
                limit: self.max_payload_bytes,
            });
        }
        if let Some(index) = self.deny.matches(source).iter().next() {
            return Err(PolicyViolation::DeniedPattern {
                what,
                pattern: self.patterns[index].clone(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> PayloadPolicy {
        PayloadPolicy::from_config(&PolicyConfig::default()).unwrap()
    }

    fn request(payload: &str) -> ExecutionRequest {
        ExecutionRequest::new(Some(payload.to_string()))
    }

    #[test]
    fn accepts_plain_payload() {
        let policy = policy();
        let req = request("def fix(values):\n    return sorted(set(values))\n")
            .with_requirements(vec!["pytest".into(), "requests==2.31.0".into(), "numpy>=1.20,<2".into()]);
        assert!(policy.check(&req).is_ok());
    }

    #[test]
    fn rejects_process_spawning() {
        let policy = policy();
        for source in [
            "import subprocess\nsubprocess.run(['ls'])",
            "import os\nos.system('rm -rf /')",
            "exec(open('x').read())",
            "m = __import__('socket')",
            "import socket",
            "import shutil\nshutil.rmtree('/workspace')",
        ] {
            let err = policy.check(&request(source)).unwrap_err();
            assert!(
                matches!(err, PolicyViolation::DeniedPattern { what: "payload", .. }),
                "expected denial for {source:?}, got {err:?}"
            );
        }
    }

    #[test]
    fn method_named_exec_is_allowed() {
        let policy = policy();
        assert!(policy.check(&request("cursor.exec(query)")).is_ok());
    }

    #[test]
    fn rejects_oversized_payload() {
        let policy = PayloadPolicy::from_config(&PolicyConfig {
            max_payload_bytes: 8,
            ..PolicyConfig::default()
        })
        .unwrap();
        let err = policy.check(&request("x = 1234567890")).unwrap_err();
        assert!(matches!(err, PolicyViolation::TooLarge { .. }));
    }

    #[test]
    fn rejects_pip_options_and_urls() {
        let policy = policy();
        for requirement in [
            "--index-url http://evil.example/simple",
            "git+https://github.com/x/y",
            "./local-package",
            "pkg; os_name == 'posix'",
        ] {
            let req = request("pass").with_requirements(vec![requirement.to_string()]);
            assert!(
                matches!(policy.check(&req), Err(PolicyViolation::InvalidRequirement(_))),
                "expected rejection for {requirement:?}"
            );
        }
    }

    #[test]
    fn checks_test_overrides() {
        let policy = policy();
        let req = request("pass").with_test_overrides("import subprocess");
        let err = policy.check(&req).unwrap_err();
        assert!(matches!(err, PolicyViolation::DeniedPattern { what: "test override", .. }));
    }

    #[test]
    fn invalid_pattern_is_config_error() {
        let config = PolicyConfig {
            deny_patterns: vec!["(unclosed".to_string()],
            ..PolicyConfig::default()
        };
        assert!(PayloadPolicy::from_config(&config).is_err());
    }
}
