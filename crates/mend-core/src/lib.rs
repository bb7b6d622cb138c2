//! Mend Core - staged candidate-fix planner
//!
//! The planner that:
//! - Generates candidate fixes through a [`mend_capability::TextGeneration`]
//! - Critiques each candidate with bounded concurrency
//! - Ranks them with a deterministic composite score
//! - Runs the winner in the sandbox and validates the result
//! - Streams one [`ReasoningEvent`] per completed stage
//!
//! # Example
//!
//! ```rust,ignore
//! use futures::StreamExt;
//! use mend_core::{MendConfig, Orchestrator, PlanContext};
//!
//! # async fn example(orchestrator: Orchestrator) {
//! let mut events = Box::pin(orchestrator.plan("Fix the cache leak".to_string(), PlanContext::new()));
//! while let Some(event) = events.next().await {
//!     println!("{}", serde_json::to_string(&event).unwrap());
//! }
//! # }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod config;
pub mod error;
pub mod explain;
pub mod orchestrator;
pub mod prompt;
pub mod scoring;
pub mod session;
pub mod stage;
pub mod stats;
pub mod types;

pub use config::{MendConfig, PlannerConfig, RetrievalConfig, ServerConfig};
pub use error::{ConfigError, CritiqueError, PlanError};
pub use explain::{DocumentRelevance, Explanation, QueryAnalysis, ReasoningTree};
pub use orchestrator::{ComponentHealth, HealthReport, HealthStatus, Orchestrator};
pub use scoring::{rank_branches, ScoringWeights, Validation, ValidationWeights};
pub use session::{EventKind, PlanningSession, ReasoningEvent, ReasoningTrace, TraceEntry};
pub use stage::{allowed_transitions, validate_transition, Stage};
pub use stats::{PlannerMetrics, PlannerStats};
pub use types::{CandidateBranch, Critique, PlanContext};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with Mend Core
    pub use crate::{
        CandidateBranch, MendConfig, Orchestrator, PlanContext, PlanError, ReasoningEvent, Stage,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
