//! Request handlers

use futures::StreamExt;
use mend_core::{Orchestrator, PlanContext};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::time::Duration;
use tracing::{debug, info, warn};
use warp::http::StatusCode;
use warp::sse::Event;
use warp::{Rejection, Reply};

/// Interval between keep-alive comments on an idle plan stream
const KEEP_ALIVE: Duration = Duration::from_secs(15);

/// Body of `POST /chat-tot`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub context: PlanContext,
}

/// Body of `POST /explain`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplainRequest {
    pub query: String,
    #[serde(default = "default_include_reasoning")]
    pub include_reasoning: bool,
}

fn default_include_reasoning() -> bool {
    true
}

/// Error body for non-streaming routes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub detail: String,
}

impl ErrorBody {
    fn reply(status: StatusCode, detail: impl Into<String>) -> warp::reply::Response {
        let body = Self {
            detail: detail.into(),
        };
        warp::reply::with_status(warp::reply::json(&body), status).into_response()
    }
}

/// Stream planner events as server-sent events
///
/// The response closes when the plan ends. A client disconnect drops the
/// stream, which cancels the plan.
pub async fn chat(request: ChatRequest, orchestrator: Orchestrator) -> Result<impl Reply, Infallible> {
    info!(query_len = request.message.len(), "plan requested");
    let events = orchestrator
        .plan(request.message, request.context)
        .map(|event| Event::default().json_data(&event));
    Ok(warp::sse::reply(
        warp::sse::keep_alive().interval(KEEP_ALIVE).stream(events),
    ))
}

/// Retrieve documents and explain them
pub async fn explain(
    request: ExplainRequest,
    orchestrator: Orchestrator,
) -> Result<warp::reply::Response, Infallible> {
    match orchestrator
        .explain(&request.query, request.include_reasoning)
        .await
    {
        Ok(explanation) => Ok(warp::reply::json(&explanation).into_response()),
        Err(e) => {
            warn!(error = %e, "explain failed");
            Ok(ErrorBody::reply(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
        }
    }
}

/// Collaborator health
pub async fn health(orchestrator: Orchestrator) -> Result<impl Reply, Infallible> {
    let report = orchestrator.health().await;
    debug!(status = ?report.status, "health checked");
    Ok(warp::reply::json(&report))
}

/// Planner counters
pub async fn metrics(orchestrator: Orchestrator) -> Result<impl Reply, Infallible> {
    Ok(warp::reply::json(&orchestrator.metrics()))
}

/// Map filter rejections to JSON errors
pub async fn handle_rejection(err: Rejection) -> Result<warp::reply::Response, Infallible> {
    let (status, detail) = if err.is_not_found() {
        (StatusCode::NOT_FOUND, "not found".to_string())
    } else if let Some(e) = err.find::<warp::filters::body::BodyDeserializeError>() {
        (StatusCode::BAD_REQUEST, format!("invalid request body: {e}"))
    } else if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        (StatusCode::PAYLOAD_TOO_LARGE, "request body too large".to_string())
    } else if err.find::<warp::reject::UnsupportedMediaType>().is_some() {
        (
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            "expected application/json".to_string(),
        )
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "method not allowed".to_string())
    } else if let Some(e) = err.find::<warp::cors::CorsForbidden>() {
        (StatusCode::FORBIDDEN, e.to_string())
    } else {
        warn!(rejection = ?err, "unhandled rejection");
        (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
    };
    Ok(ErrorBody::reply(status, detail))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explain_defaults_to_reasoning() {
        let request: ExplainRequest = serde_json::from_str(r#"{"query": "why"}"#).unwrap();
        assert!(request.include_reasoning);
    }

    #[test]
    fn chat_context_is_optional() {
        let request: ChatRequest = serde_json::from_str(r#"{"message": "fix it"}"#).unwrap();
        assert!(request.context.is_empty());
    }
}
