//! Composite ranking and result validation
//!
//! Both are pure functions over configurable weights. The defaults are
//! placeholders, not calibrated values, and are kept as named settings.

use crate::types::{CandidateBranch, PlanContext};
use mend_sandbox::ExecutionResult;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Highest composite score
pub const MAX_SCORE: f64 = 10.0;

/// Composite score weights
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    pub feasibility_weight: f64,
    pub safety_weight: f64,
    /// Steps allowed before the complexity penalty starts
    pub free_steps: usize,
    /// Penalty per step beyond `free_steps`
    pub step_penalty: f64,
    /// Bonus when `context.urgency == "high"`
    pub urgency_bonus: f64,
    /// Bonus when `context.has_tests` is truthy
    pub tests_bonus: f64,
    /// Bonus when `context.peer_reviewed` is truthy
    pub review_bonus: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            feasibility_weight: 0.4,
            safety_weight: 0.4,
            free_steps: 5,
            step_penalty: 0.05,
            urgency_bonus: 0.5,
            tests_bonus: 0.3,
            review_bonus: 0.2,
        }
    }
}

impl ScoringWeights {
    /// Bonus earned from context flags
    #[must_use]
    pub fn context_bonus(&self, context: &PlanContext) -> f64 {
        let mut bonus = 0.0;
        if context.get("urgency").and_then(Value::as_str) == Some("high") {
            bonus += self.urgency_bonus;
        }
        if context.get("has_tests").is_some_and(truthy) {
            bonus += self.tests_bonus;
        }
        if context.get("peer_reviewed").is_some_and(truthy) {
            bonus += self.review_bonus;
        }
        bonus
    }

    /// Composite score in `[0, MAX_SCORE]`
    #[must_use]
    pub fn composite_score(
        &self,
        feasibility: f64,
        safety: f64,
        step_count: usize,
        context: &PlanContext,
    ) -> f64 {
        let base = self.feasibility_weight * feasibility + self.safety_weight * safety;
        let excess = step_count.saturating_sub(self.free_steps) as f64;
        let penalty = (excess * self.step_penalty).max(0.0);
        let score = base - penalty + self.context_bonus(context);

        if score.is_nan() {
            0.0
        } else {
            score.clamp(0.0, MAX_SCORE)
        }
    }
}

/// JSON truthiness
fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Score every branch and sort descending
///
/// The sort is stable: equal scores keep their original relative order.
/// Returns the top branch, `None` for an empty list.
pub fn rank_branches<'a>(
    weights: &ScoringWeights,
    branches: &'a mut [CandidateBranch],
    context: &PlanContext,
) -> Option<&'a CandidateBranch> {
    for branch in branches.iter_mut() {
        let score = weights.composite_score(
            branch.feasibility(),
            branch.safety(),
            branch.implementation_steps.len(),
            context,
        );
        branch.composite_score = Some(score);
    }

    branches.sort_by(|a, b| {
        let (a, b) = (a.composite_score.unwrap_or(0.0), b.composite_score.unwrap_or(0.0));
        b.total_cmp(&a)
    });
    branches.first()
}

/// Validation weights
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationWeights {
    /// Credit for a passing test battery
    pub test_weight: f64,
    /// Multiplier on the reported performance delta
    pub performance_weight: f64,
    /// Fixed allowance standing in for deeper safety checks
    pub safety_allowance: f64,
    /// Score a result must exceed to be deployment-ready
    pub deployment_threshold: f64,
}

impl Default for ValidationWeights {
    fn default() -> Self {
        Self {
            test_weight: 0.4,
            performance_weight: 0.3,
            safety_allowance: 0.3,
            deployment_threshold: 0.8,
        }
    }
}

/// Validator verdict
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Validation {
    pub validation_score: f64,
    pub ready_for_deployment: bool,
}

impl ValidationWeights {
    /// Confidence in an execution result
    #[must_use]
    pub fn validate(&self, result: &ExecutionResult) -> Validation {
        let validation_score = if result.success {
            let tests = if result.return_code() == Some(0) {
                self.test_weight
            } else {
                0.0
            };
            tests + self.performance_weight * result.performance_delta + self.safety_allowance
        } else {
            0.0
        };

        Validation {
            validation_score,
            ready_for_deployment: validation_score > self.deployment_threshold,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Critique;
    use mend_sandbox::{ExecutionResult, TestOutcome};
    use proptest::prelude::*;
    use serde_json::json;

    fn ctx(value: Value) -> PlanContext {
        value.as_object().cloned().unwrap_or_default()
    }

    fn branch(name: &str, feasibility: f64, safety: f64, steps: usize) -> CandidateBranch {
        CandidateBranch::new(name)
            .with_steps((0..steps).map(|i| format!("step {i}")).collect())
            .with_critique(Critique {
                feasibility,
                safety_score: safety,
                issues: vec![],
                suggestions: vec![],
                failed: false,
            })
    }

    fn executed(success: bool, return_code: i32, performance_delta: f64) -> ExecutionResult {
        let mut result = ExecutionResult::setup_failed("placeholder");
        result.success = success;
        result.error = None;
        result.risk_score = None;
        result.performance_delta = performance_delta;
        result.test_results = Some(TestOutcome {
            return_code,
            stdout: String::new(),
            stderr: String::new(),
        });
        result
    }

    #[test]
    fn plain_context_example() {
        let score = ScoringWeights::default().composite_score(8.0, 9.0, 3, &PlanContext::new());
        assert!((score - 6.8).abs() < 1e-9, "{score}");
    }

    #[test]
    fn penalised_and_boosted_example() {
        let context = ctx(json!({"urgency": "high", "has_tests": true}));
        let score = ScoringWeights::default().composite_score(10.0, 10.0, 10, &context);
        assert!((score - 8.55).abs() < 1e-9, "{score}");
    }

    #[test]
    fn peer_review_and_truthiness() {
        let weights = ScoringWeights::default();
        assert_eq!(weights.context_bonus(&ctx(json!({"peer_reviewed": 1}))), 0.2);
        assert_eq!(weights.context_bonus(&ctx(json!({"has_tests": "yes"}))), 0.3);
        assert_eq!(weights.context_bonus(&ctx(json!({"has_tests": false}))), 0.0);
        assert_eq!(weights.context_bonus(&ctx(json!({"urgency": "low"}))), 0.0);
    }

    #[test]
    fn failed_critique_sinks() {
        let mut branches = vec![
            branch("failed", 0.0, 0.0, 2),
            branch("solid", 7.0, 7.0, 2),
        ];
        let top = rank_branches(&ScoringWeights::default(), &mut branches, &PlanContext::new());
        assert_eq!(top.unwrap().strategy, "solid");
        assert_eq!(branches[1].composite_score, Some(0.0));
    }

    #[test]
    fn ties_keep_insertion_order() {
        let mut branches = vec![
            branch("a", 5.0, 5.0, 1),
            branch("b", 9.0, 9.0, 1),
            branch("c", 5.0, 5.0, 1),
            branch("d", 5.0, 5.0, 1),
        ];
        rank_branches(&ScoringWeights::default(), &mut branches, &PlanContext::new());
        let order: Vec<_> = branches.iter().map(|b| b.strategy.as_str()).collect();
        assert_eq!(order, ["b", "a", "c", "d"]);
    }

    #[test]
    fn empty_ranking_selects_nothing() {
        let mut branches: Vec<CandidateBranch> = vec![];
        assert!(rank_branches(&ScoringWeights::default(), &mut branches, &PlanContext::new()).is_none());
    }

    #[test]
    fn validation_examples() {
        let weights = ValidationWeights::default();

        let passing = weights.validate(&executed(true, 0, 0.95));
        assert!((passing.validation_score - 0.985).abs() < 1e-9);
        assert!(passing.ready_for_deployment);

        let failing_tests = weights.validate(&executed(true, 1, 0.95));
        assert!((failing_tests.validation_score - 0.585).abs() < 1e-9);
        assert!(!failing_tests.ready_for_deployment);
    }

    #[test]
    fn failed_execution_scores_zero() {
        let verdict = ValidationWeights::default().validate(&executed(false, 0, 1.0));
        assert_eq!(verdict.validation_score, 0.0);
        assert!(!verdict.ready_for_deployment);

        let timeout =
            ExecutionResult::timed_out(std::time::Duration::from_secs(300));
        assert_eq!(ValidationWeights::default().validate(&timeout).validation_score, 0.0);
    }

    #[test]
    fn threshold_is_strict() {
        let weights = ValidationWeights {
            test_weight: 0.5,
            performance_weight: 0.0,
            safety_allowance: 0.25,
            deployment_threshold: 0.75,
        };
        let verdict = weights.validate(&executed(true, 0, 0.0));
        assert_eq!(verdict.validation_score, 0.75);
        assert!(!verdict.ready_for_deployment);
    }

    fn context_strategy() -> impl Strategy<Value = PlanContext> {
        (
            prop::option::of(prop_oneof![Just("high"), Just("low"), Just("medium")]),
            prop::option::of(any::<bool>()),
            prop::option::of(any::<bool>()),
        )
            .prop_map(|(urgency, has_tests, peer_reviewed)| {
                let mut context = PlanContext::new();
                if let Some(u) = urgency {
                    context.insert("urgency".into(), json!(u));
                }
                if let Some(t) = has_tests {
                    context.insert("has_tests".into(), json!(t));
                }
                if let Some(p) = peer_reviewed {
                    context.insert("peer_reviewed".into(), json!(p));
                }
                context
            })
    }

    proptest! {
        #[test]
        fn composite_score_is_bounded(
            feasibility in 1.0f64..=10.0,
            safety in 1.0f64..=10.0,
            steps in 0usize..500,
            context in context_strategy(),
        ) {
            let score = ScoringWeights::default().composite_score(feasibility, safety, steps, &context);
            prop_assert!((0.0..=MAX_SCORE).contains(&score));
        }

        #[test]
        fn ranking_is_stable_descending(
            scores in prop::collection::vec((1u8..=4, 1u8..=4), 0..12),
        ) {
            let mut branches: Vec<CandidateBranch> = scores
                .iter()
                .enumerate()
                .map(|(i, (f, s))| branch(&i.to_string(), f64::from(*f), f64::from(*s), 1))
                .collect();
            rank_branches(&ScoringWeights::default(), &mut branches, &PlanContext::new());

            for pair in branches.windows(2) {
                let (a, b) = (pair[0].composite_score.unwrap(), pair[1].composite_score.unwrap());
                prop_assert!(a >= b);
                if a == b {
                    let ia: usize = pair[0].strategy.parse().unwrap();
                    let ib: usize = pair[1].strategy.parse().unwrap();
                    prop_assert!(ia < ib);
                }
            }
        }

        #[test]
        fn failed_results_never_deploy(delta in 0.0f64..=10.0, code in -1i32..3) {
            let verdict = ValidationWeights::default().validate(&executed(false, code, delta));
            prop_assert_eq!(verdict.validation_score, 0.0);
            prop_assert!(!verdict.ready_for_deployment);
        }
    }
}
