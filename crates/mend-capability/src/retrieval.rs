//! Document retrieval capability
//!
//! [`InMemoryRetriever`] ranks a fixed corpus by query-term overlap. It is
//! enough for explainability and local runs; a vector store can be plugged in
//! by implementing [`DocumentRetrieval`].

use crate::error::RetrievalError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::path::Path;

/// Retrieved document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Document identifier
    pub id: String,
    /// Document text
    pub content: String,
    /// Free-form metadata
    #[serde(default)]
    pub metadata: Value,
    /// Relevance in [0, 1]
    pub relevance_score: f64,
}

/// Ranked-document capability
#[async_trait]
pub trait DocumentRetrieval: Send + Sync {
    /// Retrieve up to `top_k` documents, most relevant first
    async fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<Document>, RetrievalError>;

    /// Report whether the retriever is usable
    async fn health_check(&self) -> bool {
        true
    }
}

/// Corpus entry as stored on disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorpusEntry {
    pub id: String,
    pub content: String,
    #[serde(default)]
    pub metadata: Value,
}

impl CorpusEntry {
    /// Create new entry
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            metadata: Value::Null,
        }
    }
}

/// Term-overlap retriever over an in-memory corpus
#[derive(Debug, Clone, Default)]
pub struct InMemoryRetriever {
    entries: Vec<(CorpusEntry, HashSet<String>)>,
}

impl InMemoryRetriever {
    /// Create retriever over entries
    #[must_use]
    pub fn new(entries: Vec<CorpusEntry>) -> Self {
        let entries = entries
            .into_iter()
            .map(|entry| {
                let terms = terms(&entry.content);
                (entry, terms)
            })
            .collect();
        Self { entries }
    }

    /// Load a JSON array of [`CorpusEntry`] from disk
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, RetrievalError> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path).await?;
        let entries: Vec<CorpusEntry> = serde_json::from_str(&raw)
            .map_err(|e| RetrievalError::Corpus(format!("{}: {e}", path.display())))?;
        tracing::info!(path = %path.display(), documents = entries.len(), "loaded retrieval corpus");
        Ok(Self::new(entries))
    }

    /// Number of documents in the corpus
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if corpus is empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl DocumentRetrieval for InMemoryRetriever {
    async fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<Document>, RetrievalError> {
        let query_terms = terms(query);
        if query_terms.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }

        let mut scored: Vec<Document> = self
            .entries
            .iter()
            .filter_map(|(entry, doc_terms)| {
                let hits = query_terms.intersection(doc_terms).count();
                (hits > 0).then(|| Document {
                    id: entry.id.clone(),
                    content: entry.content.clone(),
                    metadata: entry.metadata.clone(),
                    relevance_score: hits as f64 / query_terms.len() as f64,
                })
            })
            .collect();

        // stable: ties keep corpus order
        scored.sort_by(|a, b| b.relevance_score.total_cmp(&a.relevance_score));
        scored.truncate(top_k);
        Ok(scored)
    }
}

fn terms(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 1)
        .map(str::to_lowercase)
        .collect()
}
