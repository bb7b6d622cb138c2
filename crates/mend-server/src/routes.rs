//! Route table

use crate::handlers;
use mend_core::{Orchestrator, ServerConfig};
use std::convert::Infallible;
use warp::{Filter, Reply};

/// Largest accepted JSON body
const MAX_BODY_BYTES: u64 = 1024 * 1024;

/// Build all routes with CORS and JSON rejections
pub fn routes(
    orchestrator: Orchestrator,
    config: &ServerConfig,
) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    let chat = warp::path!("chat-tot")
        .and(warp::post())
        .and(json_body())
        .and(with_orchestrator(orchestrator.clone()))
        .and_then(handlers::chat);

    let explain = warp::path!("explain")
        .and(warp::post())
        .and(json_body())
        .and(with_orchestrator(orchestrator.clone()))
        .and_then(handlers::explain);

    let health = warp::path!("health")
        .and(warp::get())
        .and(with_orchestrator(orchestrator.clone()))
        .and_then(handlers::health);

    let metrics = warp::path!("metrics")
        .and(warp::get())
        .and(with_orchestrator(orchestrator))
        .and_then(handlers::metrics);

    chat.or(explain)
        .or(health)
        .or(metrics)
        .with(cors(config))
        .with(warp::trace::request())
        .recover(handlers::handle_rejection)
}

fn with_orchestrator(
    orchestrator: Orchestrator,
) -> impl Filter<Extract = (Orchestrator,), Error = Infallible> + Clone {
    warp::any().map(move || orchestrator.clone())
}

fn json_body<T>() -> impl Filter<Extract = (T,), Error = warp::Rejection> + Clone
where
    T: serde::de::DeserializeOwned + Send,
{
    warp::body::content_length_limit(MAX_BODY_BYTES).and(warp::body::json())
}

fn cors(config: &ServerConfig) -> warp::cors::Builder {
    let builder = warp::cors()
        .allow_methods(vec!["GET", "POST", "OPTIONS"])
        .allow_headers(vec!["content-type", "authorization"]);
    if config.allowed_origins.iter().any(|o| o == "*") {
        builder.allow_any_origin()
    } else {
        builder.allow_origins(config.allowed_origins.iter().map(String::as_str))
    }
}
