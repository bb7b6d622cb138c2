//! Mend Capabilities
//!
//! The two collaborators the planner calls but does not implement:
//! - [`TextGeneration`]: turns a prompt into text
//! - [`DocumentRetrieval`]: returns ranked documents for a query
//!
//! Both are single-operation traits so concrete providers can be swapped or
//! mocked without touching the planner. Concrete providers shipped here:
//! [`OpenAiGenerator`] (OpenAI-compatible chat completions) and
//! [`InMemoryRetriever`] (term-overlap ranking over a JSON corpus).
//!
//! # Example
//!
//! ```rust,ignore
//! use mend_capability::{GenerationConfig, OpenAiGenerator, TextGeneration};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let generator = OpenAiGenerator::from_env(GenerationConfig::default())?;
//! let text = generator.generate("Propose three fixes for a flaky test").await?;
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod error;
pub mod generation;
pub mod retrieval;

pub use error::{GenerationError, RetrievalError};
pub use generation::{GenerationConfig, OpenAiGenerator, TextGeneration};
pub use retrieval::{CorpusEntry, Document, DocumentRetrieval, InMemoryRetriever};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
