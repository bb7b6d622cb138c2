//! Planning session and reasoning trace

use crate::error::PlanError;
use crate::scoring::Validation;
use crate::stage::{validate_transition, Stage};
use crate::types::{CandidateBranch, PlanContext};
use mend_sandbox::ExecutionResult;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Instant;
use ulid::Ulid;

static CLOCK_ORIGIN: Lazy<Instant> = Lazy::new(Instant::now);

/// Seconds on the process-wide monotonic clock
#[must_use]
pub fn monotonic_seconds() -> f64 {
    CLOCK_ORIGIN.elapsed().as_secs_f64()
}

/// One recorded stage event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEntry {
    pub stage: String,
    pub payload: Value,
    pub timestamp: f64,
}

/// Append-only, time-ordered stage log
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ReasoningTrace {
    entries: Vec<TraceEntry>,
}

impl ReasoningTrace {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry; timestamps never go backwards
    pub fn append(&mut self, stage: impl Into<String>, payload: Value) -> &TraceEntry {
        let now = monotonic_seconds();
        let timestamp = self.entries.last().map_or(now, |last| now.max(last.timestamp));
        self.entries.push(TraceEntry {
            stage: stage.into(),
            payload,
            timestamp,
        });
        &self.entries[self.entries.len() - 1]
    }

    #[inline]
    #[must_use]
    pub fn entries(&self) -> &[TraceEntry] {
        &self.entries
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Mean per-entry `validation_score`, 0.5 for entries without one
    ///
    /// Zero for an empty trace.
    #[must_use]
    pub fn explainability_score(&self) -> f64 {
        explainability_score(&self.entries)
    }
}

/// Mean per-entry `validation_score` (0.5 when absent), 0 when empty
#[must_use]
pub fn explainability_score(entries: &[TraceEntry]) -> f64 {
    if entries.is_empty() {
        return 0.0;
    }
    let total: f64 = entries
        .iter()
        .map(|e| e.payload.get("validation_score").and_then(Value::as_f64).unwrap_or(0.5))
        .sum();
    total / entries.len() as f64
}

/// State of one pipeline run
#[derive(Debug, Clone, Serialize)]
pub struct PlanningSession {
    pub id: Ulid,
    pub query: String,
    pub context: PlanContext,
    pub stage: Stage,
    pub branches: Vec<CandidateBranch>,
    /// Copy of the top branch, never mutated after selection
    pub selected: Option<CandidateBranch>,
    pub execution_result: Option<ExecutionResult>,
    pub validation: Option<Validation>,
    pub trace: ReasoningTrace,
}

impl PlanningSession {
    /// Create new session
    #[must_use]
    pub fn new(query: impl Into<String>, context: PlanContext) -> Self {
        Self {
            id: Ulid::new(),
            query: query.into(),
            context,
            stage: Stage::Generating,
            branches: Vec::new(),
            selected: None,
            execution_result: None,
            validation: None,
            trace: ReasoningTrace::new(),
        }
    }

    /// Move to the next stage
    pub fn advance(&mut self, to: Stage) -> Result<(), PlanError> {
        validate_transition(self.stage, to)?;
        self.stage = to;
        Ok(())
    }

    /// Move to the failed terminal state
    pub fn fail(&mut self) {
        if !self.stage.is_terminal() {
            self.stage = Stage::Failed;
        }
    }

    /// Snapshot streamed to the caller
    #[must_use]
    pub fn snapshot(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|e| json!({ "id": self.id, "error": e.to_string() }))
    }
}

/// Event type on the plan stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    ReasoningStep,
    Error,
}

/// One streamed plan event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub content: Value,
    pub timestamp: f64,
}

impl ReasoningEvent {
    /// Progress event: the entry just appended plus a session snapshot
    #[must_use]
    pub fn step(session: &PlanningSession, entry: &TraceEntry) -> Self {
        Self {
            kind: EventKind::ReasoningStep,
            content: json!({
                "stage": entry.stage,
                "entry": entry,
                "session": session.snapshot(),
            }),
            timestamp: monotonic_seconds(),
        }
    }

    /// Terminal error event; only kind and message cross the boundary
    #[must_use]
    pub fn error(err: &PlanError) -> Self {
        Self {
            kind: EventKind::Error,
            content: json!({ "kind": err.kind(), "message": err.to_string() }),
            timestamp: monotonic_seconds(),
        }
    }

    #[inline]
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.kind == EventKind::Error
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn trace_is_ordered() {
        let mut trace = ReasoningTrace::new();
        for i in 0..50 {
            trace.append(format!("step_{i}"), json!({ "i": i }));
        }
        assert_eq!(trace.len(), 50);
        for pair in trace.entries().windows(2) {
            assert!(pair[0].timestamp <= pair[1].timestamp);
        }
        assert_eq!(trace.entries()[0].stage, "step_0");
    }

    #[test]
    fn explainability() {
        let mut trace = ReasoningTrace::new();
        assert_eq!(trace.explainability_score(), 0.0);

        trace.append("branch_generation", json!({ "branches_count": 3 }));
        trace.append("result_validation", json!({ "validation_score": 0.9 }));
        assert!((trace.explainability_score() - 0.7).abs() < 1e-9);
    }

    #[test]
    fn session_follows_stage_table() {
        let mut session = PlanningSession::new("fix", PlanContext::new());
        assert!(session.advance(Stage::Critiquing).is_ok());
        assert!(session.advance(Stage::Validating).is_err());
        assert_eq!(session.stage, Stage::Critiquing);

        session.fail();
        assert_eq!(session.stage, Stage::Failed);
        assert!(session.advance(Stage::Ranking).is_err());
    }

    #[test]
    fn error_event_shape() {
        let event = ReasoningEvent::error(&PlanError::NoSelection);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["content"]["kind"], "no_selection");
        assert_eq!(json["content"].as_object().unwrap().len(), 2);
    }

    #[test]
    fn step_event_carries_snapshot() {
        let mut session = PlanningSession::new("fix the leak", PlanContext::new());
        let entry = session.trace.append("branch_generation", json!({ "branches_count": 0 })).clone();
        let event = ReasoningEvent::step(&session, &entry);

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "reasoning_step");
        assert_eq!(json["content"]["stage"], "branch_generation");
        assert_eq!(json["content"]["session"]["query"], "fix the leak");
        assert_eq!(json["content"]["session"]["stage"], "generating");
    }
}
