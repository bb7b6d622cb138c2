//! Planner data model

use mend_sandbox::ExecutionRequest;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

/// Request context (`urgency`, `has_tests`, `peer_reviewed`, free-form keys)
pub type PlanContext = Map<String, Value>;

/// Lowest and highest critique score
pub const CRITIQUE_SCALE: (f64, f64) = (1.0, 10.0);

/// Critique block attached to a branch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Critique {
    #[serde(default, deserialize_with = "lenient_number")]
    pub feasibility: f64,
    #[serde(default, alias = "safety", deserialize_with = "lenient_number")]
    pub safety_score: f64,
    #[serde(default, alias = "potential_issues", deserialize_with = "lenient_list")]
    pub issues: Vec<String>,
    #[serde(default, alias = "improvement_suggestions", deserialize_with = "lenient_list")]
    pub suggestions: Vec<String>,
    /// Critique could not be obtained; scores are zero
    #[serde(default)]
    pub failed: bool,
}

impl Critique {
    /// Critique-failed marker
    #[must_use]
    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            feasibility: 0.0,
            safety_score: 0.0,
            issues: vec![reason.into()],
            suggestions: Vec::new(),
            failed: true,
        }
    }

    /// Scores clamped to the critique scale
    #[must_use]
    pub fn clamped(mut self) -> Self {
        let (lo, hi) = CRITIQUE_SCALE;
        self.feasibility = clamp_or(self.feasibility, lo, hi);
        self.safety_score = clamp_or(self.safety_score, lo, hi);
        self
    }
}

fn clamp_or(value: f64, lo: f64, hi: f64) -> f64 {
    if value.is_nan() {
        lo
    } else {
        value.clamp(lo, hi)
    }
}

/// One proposed solution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateBranch {
    #[serde(alias = "solution_strategy", alias = "approach")]
    pub strategy: String,
    #[serde(default, alias = "potential_risks", deserialize_with = "lenient_list")]
    pub risks: Vec<String>,
    #[serde(default, alias = "steps", deserialize_with = "lenient_list")]
    pub implementation_steps: Vec<String>,
    #[serde(default, alias = "outcome", deserialize_with = "lenient_text")]
    pub expected_outcome: String,
    /// Payload executed in the sandbox
    #[serde(default, alias = "code", skip_serializing_if = "Option::is_none")]
    pub implementation_code: Option<String>,
    /// Dependency manifest
    #[serde(default, alias = "dependencies", deserialize_with = "lenient_list")]
    pub requirements: Vec<String>,
    /// Replacement validation battery
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_overrides: Option<String>,
    #[serde(default)]
    pub critique: Option<Critique>,
    #[serde(default)]
    pub composite_score: Option<f64>,
}

impl CandidateBranch {
    /// Create new branch
    #[must_use]
    pub fn new(strategy: impl Into<String>) -> Self {
        Self {
            strategy: strategy.into(),
            risks: Vec::new(),
            implementation_steps: Vec::new(),
            expected_outcome: String::new(),
            implementation_code: None,
            requirements: Vec::new(),
            test_overrides: None,
            critique: None,
            composite_score: None,
        }
    }

    /// With implementation steps
    #[inline]
    #[must_use]
    pub fn with_steps(mut self, steps: Vec<String>) -> Self {
        self.implementation_steps = steps;
        self
    }

    /// With payload
    #[inline]
    #[must_use]
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.implementation_code = Some(code.into());
        self
    }

    /// With critique
    #[inline]
    #[must_use]
    pub fn with_critique(mut self, critique: Critique) -> Self {
        self.critique = Some(critique);
        self
    }

    /// Feasibility, zero without a critique
    #[inline]
    #[must_use]
    pub fn feasibility(&self) -> f64 {
        self.critique.as_ref().map_or(0.0, |c| c.feasibility)
    }

    /// Safety, zero without a critique
    #[inline]
    #[must_use]
    pub fn safety(&self) -> f64 {
        self.critique.as_ref().map_or(0.0, |c| c.safety_score)
    }

    /// Sandbox request for this branch
    #[must_use]
    pub fn execution_request(&self, timeout: Option<Duration>) -> ExecutionRequest {
        let mut request = ExecutionRequest::new(self.implementation_code.clone())
            .with_requirements(self.requirements.clone());
        if let Some(tests) = &self.test_overrides {
            request = request.with_test_overrides(tests.clone());
        }
        request.timeout = timeout;
        request
    }
}

// Generated output is loosely shaped: lists arrive as strings, numbers as
// strings, list items as objects.

fn value_to_text(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn lenient_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => Vec::new(),
        Value::Array(items) => items.into_iter().map(value_to_text).collect(),
        Value::String(s) if s.trim().is_empty() => Vec::new(),
        other => vec![value_to_text(other)],
    })
}

fn lenient_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(value_to_text)
}

fn lenient_number<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    match Value::deserialize(deserializer)? {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| D::Error::custom("score out of range")),
        Value::String(s) => s
            .trim()
            .trim_end_matches("/10")
            .trim()
            .parse()
            .map_err(|_| D::Error::custom(format!("score `{s}` is not a number"))),
        Value::Null => Ok(0.0),
        other => Err(D::Error::custom(format!("score `{other}` is not a number"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn branch_accepts_aliases_and_loose_shapes() {
        let branch: CandidateBranch = serde_json::from_value(json!({
            "solution_strategy": "Add retry with jitter",
            "potential_risks": "thundering herd",
            "steps": ["wrap call", {"detail": "add jitter"}],
            "outcome": "fewer timeouts",
            "code": "print('ok')"
        }))
        .unwrap();

        assert_eq!(branch.strategy, "Add retry with jitter");
        assert_eq!(branch.risks, vec!["thundering herd".to_string()]);
        assert_eq!(branch.implementation_steps.len(), 2);
        assert_eq!(branch.implementation_steps[1], r#"{"detail":"add jitter"}"#);
        assert_eq!(branch.expected_outcome, "fewer timeouts");
        assert_eq!(branch.implementation_code.as_deref(), Some("print('ok')"));
        assert!(branch.critique.is_none());
    }

    #[test]
    fn branch_requires_strategy() {
        let result = serde_json::from_value::<CandidateBranch>(json!({"risks": []}));
        assert!(result.is_err());
    }

    #[test]
    fn critique_accepts_safety_alias_and_string_scores() {
        let critique: Critique = serde_json::from_value(json!({
            "feasibility": "8/10",
            "safety": 9,
            "issues": ["none"]
        }))
        .unwrap();
        assert_eq!(critique.feasibility, 8.0);
        assert_eq!(critique.safety_score, 9.0);
        assert!(!critique.failed);
    }

    #[test]
    fn critique_clamps_to_scale() {
        let critique = Critique {
            feasibility: 14.0,
            safety_score: -2.0,
            issues: vec![],
            suggestions: vec![],
            failed: false,
        }
        .clamped();
        assert_eq!(critique.feasibility, 10.0);
        assert_eq!(critique.safety_score, 1.0);
    }

    #[test]
    fn failed_critique_has_zero_scores() {
        let critique = Critique::failed("timeout");
        assert_eq!(critique.feasibility, 0.0);
        assert_eq!(critique.safety_score, 0.0);
        assert!(critique.failed);
    }

    #[test]
    fn execution_request_carries_contract() {
        let mut branch = CandidateBranch::new("x").with_code("pass");
        branch.requirements = vec!["requests".to_string()];
        branch.test_overrides = Some("def test_a(): pass".to_string());

        let request = branch.execution_request(Some(Duration::from_secs(30)));
        assert_eq!(request.payload.as_deref(), Some("pass"));
        assert_eq!(request.requirements, vec!["requests".to_string()]);
        assert!(request.test_overrides.is_some());
        assert_eq!(request.timeout, Some(Duration::from_secs(30)));
    }
}
