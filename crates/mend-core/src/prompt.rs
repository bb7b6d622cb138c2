//! Prompts and output parsing for the generation and critique stages

use crate::error::CritiqueError;
use crate::types::{CandidateBranch, Critique, PlanContext};
use mend_capability::GenerationError;
use serde_json::Value;

/// Prompt asking for candidate branches
#[must_use]
pub fn generation_prompt(query: &str, context: &PlanContext, max_candidates: usize) -> String {
    let context = serde_json::to_string_pretty(context).unwrap_or_else(|_| "{}".to_string());
    format!(
        "Problem: {query}\n\
         Context: {context}\n\n\
         Generate between 3 and {max_candidates} different approaches to solve this problem.\n\
         For each approach provide:\n\
         1. strategy: the solution strategy\n\
         2. risks: potential risks\n\
         3. implementation_steps: ordered implementation steps\n\
         4. expected_outcome: the expected outcome\n\
         5. implementation_code: a self-contained Python implementation\n\
         6. requirements: pip requirement specifiers it needs\n\n\
         Respond with a JSON array of objects and nothing else."
    )
}

/// Prompt asking for one branch critique
#[must_use]
pub fn critique_prompt(branch: &CandidateBranch) -> String {
    let mut view = branch.clone();
    view.critique = None;
    view.composite_score = None;
    let branch = serde_json::to_string_pretty(&view).unwrap_or_default();
    format!(
        "Analyze this solution approach:\n{branch}\n\n\
         Critique it and respond with a JSON object with keys:\n\
         feasibility (1-10), safety_score (1-10), issues (list), suggestions (list)."
    )
}

/// Remove a surrounding Markdown code fence
#[must_use]
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string (```json); a one-line fence keeps it before the body
    let body = match rest.split_once('\n') {
        Some((_, body)) => body,
        None => rest.trim_start_matches(|c: char| c.is_ascii_alphabetic()),
    };
    let body = body.trim_end();
    body.strip_suffix("```").unwrap_or(body).trim()
}

/// Parse generator output into branches
///
/// Accepts a JSON array, or an object wrapping one under `branches` /
/// `approaches`.
pub fn parse_branches(text: &str) -> Result<Vec<CandidateBranch>, GenerationError> {
    let body = strip_code_fence(text);
    let value: Value = serde_json::from_str(body)
        .map_err(|e| GenerationError::Malformed(format!("not JSON: {e}")))?;

    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("branches").or_else(|| map.remove("approaches")) {
            Some(Value::Array(items)) => items,
            _ => {
                return Err(GenerationError::Malformed(
                    "expected a JSON array of approaches".to_string(),
                ))
            }
        },
        _ => {
            return Err(GenerationError::Malformed(
                "expected a JSON array of approaches".to_string(),
            ))
        }
    };

    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| {
            let mut branch: CandidateBranch = serde_json::from_value(item)
                .map_err(|e| GenerationError::Malformed(format!("approach {i}: {e}")))?;
            // Critique and score are ours to assign
            branch.critique = None;
            branch.composite_score = None;
            Ok(branch)
        })
        .collect()
}

/// Parse critique output, clamped to the critique scale
pub fn parse_critique(text: &str) -> Result<Critique, CritiqueError> {
    let body = strip_code_fence(text);
    let value: Value =
        serde_json::from_str(body).map_err(|e| CritiqueError::Malformed(format!("not JSON: {e}")))?;
    if !value.is_object() {
        return Err(CritiqueError::Malformed("expected a JSON object".to_string()));
    }
    if value.get("feasibility").is_none() {
        return Err(CritiqueError::Malformed("missing feasibility".to_string()));
    }

    let mut critique: Critique =
        serde_json::from_value(value).map_err(|e| CritiqueError::Malformed(e.to_string()))?;
    critique.failed = false;
    Ok(critique.clamped())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn strips_fences() {
        assert_eq!(strip_code_fence("```json\n[1]\n```"), "[1]");
        assert_eq!(strip_code_fence("```\n{}\n```\n"), "{}");
        assert_eq!(strip_code_fence("  [2] "), "[2]");
        assert_eq!(strip_code_fence("```json [{\"a\": 1}]```"), "[{\"a\": 1}]");
        assert_eq!(strip_code_fence("```{}```"), "{}");
    }

    #[test]
    fn parses_fenced_array() {
        let text = "```json\n[{\"strategy\": \"a\", \"implementation_steps\": [\"x\"]}, {\"approach\": \"b\"}]\n```";
        let branches = parse_branches(text).unwrap();
        assert_eq!(branches.len(), 2);
        assert_eq!(branches[0].strategy, "a");
        assert_eq!(branches[1].strategy, "b");
    }

    #[test]
    fn parses_single_line_fence() {
        let text = "```json [{\"strategy\": \"a\"}, {\"strategy\": \"b\"}]```";
        let branches = parse_branches(text).unwrap();
        assert_eq!(branches.len(), 2);
        assert_eq!(branches[1].strategy, "b");
    }

    #[test]
    fn parses_wrapped_object() {
        let branches = parse_branches(r#"{"branches": [{"strategy": "a"}]}"#).unwrap();
        assert_eq!(branches.len(), 1);
    }

    #[test]
    fn empty_array_is_valid() {
        assert!(parse_branches("[]").unwrap().is_empty());
    }

    #[test]
    fn prose_is_malformed() {
        let err = parse_branches("Here are three ideas: ...").unwrap_err();
        assert!(matches!(err, GenerationError::Malformed(_)));
        let err = parse_branches(r#"{"answer": 42}"#).unwrap_err();
        assert!(matches!(err, GenerationError::Malformed(_)));
        let err = parse_branches(r#"[{"risks": []}]"#).unwrap_err();
        assert!(err.to_string().contains("approach 0"));
    }

    #[test]
    fn generator_cannot_preset_scores() {
        let branches =
            parse_branches(r#"[{"strategy": "a", "composite_score": 10, "critique": {"feasibility": 10}}]"#)
                .unwrap();
        assert!(branches[0].composite_score.is_none());
        assert!(branches[0].critique.is_none());
    }

    #[test]
    fn parses_and_clamps_critique() {
        let critique = parse_critique(r#"{"feasibility": 12, "safety_score": 0.5, "issues": "slow"}"#).unwrap();
        assert_eq!(critique.feasibility, 10.0);
        assert_eq!(critique.safety_score, 1.0);
        assert_eq!(critique.issues, vec!["slow".to_string()]);
    }

    #[test]
    fn critique_requires_object_with_feasibility() {
        assert!(parse_critique("[1, 2]").is_err());
        assert!(parse_critique(r#"{"safety_score": 5}"#).is_err());
        assert!(parse_critique("looks good to me").is_err());
    }

    #[test]
    fn prompts_embed_inputs() {
        let mut context = PlanContext::new();
        context.insert("urgency".into(), Value::from("high"));
        let prompt = generation_prompt("memory leak in cache", &context, 5);
        assert!(prompt.contains("memory leak in cache"));
        assert!(prompt.contains("\"urgency\": \"high\""));

        let prompt = critique_prompt(&CandidateBranch::new("evict on write"));
        assert!(prompt.contains("evict on write"));
        assert!(prompt.contains("safety_score"));
    }
}
