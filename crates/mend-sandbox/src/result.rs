//! Execution results
//!
//! Every sandbox outcome, including setup failures and timeouts, is an
//! [`ExecutionResult`]. The harness inside the environment prints one JSON
//! record; [`parse_harness_output`] turns the captured log into a result.

use crate::error::{BackendError, PolicyViolation};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Test battery outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestOutcome {
    pub return_code: i32,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
}

/// Failure classification carried in a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionErrorKind {
    /// Payload rejected by policy, nothing was built
    PolicyRejected,
    /// Environment could not be constructed or started
    Setup,
    /// Wall-clock timeout; environment was force-killed
    Timeout,
    /// Backend failed while the environment was running
    Backend,
    /// No structured record found in the output
    UnparseableOutput,
    /// Harness reported its own failure
    Harness,
}

impl ExecutionErrorKind {
    /// Label used for metrics
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PolicyRejected => "policy_rejected",
            Self::Setup => "setup",
            Self::Timeout => "timeout",
            Self::Backend => "backend",
            Self::UnparseableOutput => "unparseable_output",
            Self::Harness => "harness",
        }
    }
}

/// Failure detail: kind plus message, nothing more
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionError {
    pub kind: ExecutionErrorKind,
    pub message: String,
}

impl ExecutionError {
    /// Create new error
    #[inline]
    #[must_use]
    pub fn new(kind: ExecutionErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Outcome of one execution attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub test_results: Option<TestOutcome>,
    pub performance_delta: f64,
    /// Seconds reported by the harness
    pub execution_time: f64,
    /// Wall-clock seconds measured by the executor
    pub total_execution_time: f64,
    pub logs: Vec<String>,
    pub error: Option<ExecutionError>,
    pub risk_score: Option<f64>,
    /// Raw captured output when it could not be parsed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_output: Option<String>,
}

impl ExecutionResult {
    fn failed(error: ExecutionError) -> Self {
        Self {
            success: false,
            test_results: None,
            performance_delta: 0.0,
            execution_time: 0.0,
            total_execution_time: 0.0,
            logs: Vec::new(),
            error: Some(error),
            risk_score: None,
            raw_output: None,
        }
    }

    /// Payload rejected before execution
    #[must_use]
    pub fn policy_rejected(violation: &PolicyViolation) -> Self {
        let mut result = Self::failed(ExecutionError::new(
            ExecutionErrorKind::PolicyRejected,
            format!("payload rejected by policy: {violation}"),
        ));
        result.risk_score = Some(1.0);
        result
    }

    /// Environment could not be built
    #[must_use]
    pub fn setup_failed(message: impl Into<String>) -> Self {
        let mut result = Self::failed(ExecutionError::new(ExecutionErrorKind::Setup, message));
        result.risk_score = Some(1.0);
        result
    }

    /// Timeout elapsed; `execution_time` is the timeout itself
    #[must_use]
    pub fn timed_out(timeout: Duration) -> Self {
        let secs = timeout.as_secs_f64();
        let mut result = Self::failed(ExecutionError::new(
            ExecutionErrorKind::Timeout,
            format!("execution timeout after {} seconds", timeout.as_secs()),
        ));
        result.execution_time = secs;
        result.total_execution_time = secs;
        result
    }

    /// Backend failed mid-run
    #[must_use]
    pub fn backend_failed(err: &BackendError, elapsed: Duration) -> Self {
        let mut result = Self::failed(ExecutionError::new(
            ExecutionErrorKind::Backend,
            err.to_string(),
        ));
        result.total_execution_time = elapsed.as_secs_f64();
        result
    }

    /// Output had no structured record; raw log attached
    #[must_use]
    pub fn unparseable(raw: &str, elapsed: Duration) -> Self {
        let mut result = Self::failed(ExecutionError::new(
            ExecutionErrorKind::UnparseableOutput,
            "could not parse execution results",
        ));
        result.logs = raw.lines().map(str::to_string).collect();
        result.raw_output = Some(raw.to_string());
        result.total_execution_time = elapsed.as_secs_f64();
        result
    }

    /// Test battery return code, when tests ran
    #[inline]
    #[must_use]
    pub fn return_code(&self) -> Option<i32> {
        self.test_results.as_ref().map(|t| t.return_code)
    }

    /// Metrics label for the outcome
    #[inline]
    #[must_use]
    pub fn outcome_label(&self) -> &'static str {
        match (&self.error, self.success) {
            (_, true) => "success",
            (Some(e), false) => e.kind.as_str(),
            (None, false) => "failed",
        }
    }
}

/// Record printed by the harness
#[derive(Debug, Deserialize)]
struct HarnessRecord {
    success: bool,
    #[serde(default)]
    test_results: Option<TestOutcome>,
    #[serde(default)]
    performance_delta: f64,
    #[serde(default)]
    execution_time: f64,
    #[serde(default)]
    logs: Vec<String>,
    #[serde(default)]
    error: Option<String>,
    /// `setup` when the environment could not satisfy the manifest
    #[serde(default)]
    error_kind: Option<String>,
}

/// Scan captured output for the first structured record
///
/// Lines that look like JSON but do not match the record shape are skipped.
/// Without a record the result is a diagnostic failure carrying the raw log.
#[must_use]
pub fn parse_harness_output(raw: &str, elapsed: Duration) -> ExecutionResult {
    let record = raw
        .lines()
        .map(str::trim)
        .filter(|line| line.starts_with('{'))
        .find_map(|line| serde_json::from_str::<HarnessRecord>(line).ok());

    let Some(record) = record else {
        return ExecutionResult::unparseable(raw, elapsed);
    };

    let kind = match record.error_kind.as_deref() {
        Some("setup") => ExecutionErrorKind::Setup,
        _ => ExecutionErrorKind::Harness,
    };
    ExecutionResult {
        success: record.success,
        test_results: record.test_results,
        performance_delta: record.performance_delta,
        execution_time: record.execution_time,
        total_execution_time: elapsed.as_secs_f64(),
        logs: record.logs,
        error: record.error.map(|message| ExecutionError::new(kind, message)),
        risk_score: (kind == ExecutionErrorKind::Setup).then_some(1.0),
        raw_output: None,
    }
}
