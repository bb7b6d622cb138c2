//! Explainability view of a query

use crate::session::{ReasoningTrace, TraceEntry};
use mend_capability::Document;
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Number of leading words reported as key concepts
const KEY_CONCEPTS: usize = 5;

/// Coarse query analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryAnalysis {
    pub word_count: usize,
    pub complexity_level: String,
    pub key_concepts: Vec<String>,
}

impl QueryAnalysis {
    #[must_use]
    pub fn of(query: &str) -> Self {
        let words: Vec<&str> = query.split_whitespace().collect();
        let complexity_level = match words.len() {
            0..=7 => "low",
            8..=24 => "medium",
            _ => "high",
        };
        Self {
            word_count: words.len(),
            complexity_level: complexity_level.to_string(),
            key_concepts: words.iter().take(KEY_CONCEPTS).map(|w| (*w).to_string()).collect(),
        }
    }
}

/// Relevance of one retrieved document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRelevance {
    pub id: String,
    pub relevance_score: f64,
}

/// Reasoning tree returned by explain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningTree {
    pub query_analysis: QueryAnalysis,
    pub document_relevance: Vec<DocumentRelevance>,
    pub reasoning_steps: Vec<TraceEntry>,
}

/// Explain response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Explanation {
    pub retrieved_docs: Vec<Document>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_tree: Option<ReasoningTree>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explainability_score: Option<f64>,
}

impl Explanation {
    /// Build the explanation for retrieved documents
    #[must_use]
    pub fn build(query: &str, retrieved_docs: Vec<Document>, include_reasoning: bool) -> Self {
        if !include_reasoning {
            return Self {
                retrieved_docs,
                reasoning_tree: None,
                explainability_score: None,
            };
        }

        let query_analysis = QueryAnalysis::of(query);
        let document_relevance: Vec<DocumentRelevance> = retrieved_docs
            .iter()
            .map(|d| DocumentRelevance {
                id: d.id.clone(),
                relevance_score: d.relevance_score,
            })
            .collect();

        let mut trace = ReasoningTrace::new();
        trace.append("query_analysis", json!(query_analysis));
        trace.append(
            "document_relevance",
            json!({ "documents": document_relevance.len() }),
        );
        let explainability_score = trace.explainability_score();

        Self {
            retrieved_docs,
            reasoning_tree: Some(ReasoningTree {
                query_analysis,
                document_relevance,
                reasoning_steps: trace.entries().to_vec(),
            }),
            explainability_score: Some(explainability_score),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::Value;

    fn doc(id: &str, score: f64) -> Document {
        Document {
            id: id.to_string(),
            content: "text".to_string(),
            metadata: Value::Null,
            relevance_score: score,
        }
    }

    #[test]
    fn query_analysis() {
        let analysis = QueryAnalysis::of("why does the cache leak memory under load");
        assert_eq!(analysis.word_count, 8);
        assert_eq!(analysis.complexity_level, "medium");
        assert_eq!(analysis.key_concepts, ["why", "does", "the", "cache", "leak"]);
        assert_eq!(QueryAnalysis::of("").word_count, 0);
    }

    #[test]
    fn with_reasoning() {
        let explanation =
            Explanation::build("fix flaky test", vec![doc("a", 0.9), doc("b", 0.4)], true);
        let tree = explanation.reasoning_tree.unwrap();
        assert_eq!(tree.document_relevance.len(), 2);
        assert_eq!(tree.document_relevance[0].relevance_score, 0.9);
        assert_eq!(tree.reasoning_steps.len(), 2);
        assert_eq!(explanation.explainability_score, Some(0.5));
    }

    #[test]
    fn without_reasoning() {
        let explanation = Explanation::build("q", vec![doc("a", 1.0)], false);
        assert!(explanation.reasoning_tree.is_none());
        let json = serde_json::to_value(&explanation).unwrap();
        assert!(json.get("explainability_score").is_none());
        assert_eq!(json["retrieved_docs"][0]["id"], "a");
    }
}
