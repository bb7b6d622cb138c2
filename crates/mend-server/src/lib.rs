//! Mend Server - HTTP surface for the planner
//!
//! Routes:
//! - `POST /chat-tot` streams one server-sent event per planner stage
//! - `POST /explain` returns retrieved documents and a reasoning tree
//! - `GET /health` aggregates collaborator health
//! - `GET /metrics` returns planner counters
//!
//! # Example
//!
//! ```rust,ignore
//! use mend_server::routes;
//!
//! # async fn example(orchestrator: mend_core::Orchestrator, config: mend_core::MendConfig) {
//! warp::serve(routes(orchestrator, &config.server)).run(config.server.bind).await;
//! # }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod handlers;
pub mod routes;

pub use handlers::{ChatRequest, ErrorBody, ExplainRequest};
pub use routes::routes;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
