//! Shadow traffic mirroring
//!
//! Replays a random sample of recorded requests against a shadow deployment,
//! tagged with `X-Shadow-Request: true`, and records latency and status for
//! each one.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Header marking mirrored requests
pub const SHADOW_HEADER: &str = "X-Shadow-Request";

/// Characters of the response body kept in a result
const PREVIEW_CHARS: usize = 200;

/// Mirroring errors
#[derive(Debug, Error)]
pub enum ShadowError {
    /// Traffic file could not be read
    #[error("cannot read traffic samples from {path}: {message}")]
    Io { path: String, message: String },

    /// Traffic file is not a JSON list of requests
    #[error("invalid traffic samples: {0}")]
    Parse(#[from] serde_json::Error),

    /// HTTP client could not be built
    #[error("http client error: {0}")]
    Client(#[from] reqwest::Error),
}

/// One recorded request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrafficRequest {
    pub endpoint: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub timestamp: f64,
}

fn default_method() -> String {
    "POST".to_string()
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TrafficFile {
    List(Vec<TrafficRequest>),
    Wrapped { requests: Vec<TrafficRequest> },
}

/// Load recorded requests: a JSON list, or an object with a `requests` list
pub fn load_traffic(path: &Path) -> Result<Vec<TrafficRequest>, ShadowError> {
    let text = std::fs::read_to_string(path).map_err(|e| ShadowError::Io {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    let requests = match serde_json::from_str::<TrafficFile>(&text)? {
        TrafficFile::List(requests) | TrafficFile::Wrapped { requests } => requests,
    };
    debug!(count = requests.len(), "loaded traffic samples");
    Ok(requests)
}

/// Mirroring parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MirrorConfig {
    pub shadow_endpoint: String,
    /// Fraction of requests replayed, `[0, 1]`
    pub mirror_percentage: f64,
    /// Wall-clock budget in seconds
    pub duration: u64,
    #[serde(skip)]
    pub pacing: Duration,
    #[serde(skip)]
    pub request_timeout: Duration,
}

impl MirrorConfig {
    #[must_use]
    pub fn new(shadow_endpoint: impl Into<String>) -> Self {
        Self {
            shadow_endpoint: shadow_endpoint.into(),
            mirror_percentage: 0.1,
            duration: 3600,
            pacing: Duration::from_millis(100),
            request_timeout: Duration::from_secs(30),
        }
    }

    #[inline]
    #[must_use]
    pub fn with_mirror_percentage(mut self, percentage: f64) -> Self {
        self.mirror_percentage = percentage;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_duration(mut self, seconds: u64) -> Self {
        self.duration = seconds;
        self
    }

    /// Delay after each mirrored request
    #[inline]
    #[must_use]
    pub fn with_pacing(mut self, pacing: Duration) -> Self {
        self.pacing = pacing;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestSummary {
    pub endpoint: String,
    pub method: String,
    pub payload_size: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShadowResponse {
    pub status_code: u16,
    /// Seconds
    pub response_time: f64,
    pub response_size: usize,
    pub content_preview: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MirrorMetrics {
    pub success: bool,
    pub latency_ms: f64,
    pub timestamp: DateTime<Utc>,
}

/// Outcome of one mirrored request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MirrorResult {
    pub request_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_request: Option<RequestSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shadow_response: Option<ShadowResponse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub metrics: MirrorMetrics,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MirrorSummary {
    pub total_requests: usize,
    pub successful_requests: usize,
    /// Milliseconds
    pub average_latency: f64,
}

impl MirrorSummary {
    #[must_use]
    pub fn of(results: &[MirrorResult]) -> Self {
        let successful_requests = results.iter().filter(|r| r.metrics.success).count();
        let average_latency = if results.is_empty() {
            0.0
        } else {
            results.iter().map(|r| r.metrics.latency_ms).sum::<f64>() / results.len() as f64
        };
        Self {
            total_requests: results.len(),
            successful_requests,
            average_latency,
        }
    }

    /// Successful share in percent
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.successful_requests as f64 * 100.0 / self.total_requests as f64
        }
    }
}

/// Report written to the output file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MirrorReport {
    pub mirror_config: MirrorConfig,
    pub summary: MirrorSummary,
    pub results: Vec<MirrorResult>,
}

impl MirrorReport {
    #[must_use]
    pub fn new(mirror_config: MirrorConfig, results: Vec<MirrorResult>) -> Self {
        Self {
            summary: MirrorSummary::of(&results),
            mirror_config,
            results,
        }
    }
}

/// Replays requests against the shadow endpoint
#[derive(Debug, Clone)]
pub struct ShadowMirror {
    client: reqwest::Client,
    config: MirrorConfig,
}

impl ShadowMirror {
    pub fn new(config: MirrorConfig) -> Result<Self, ShadowError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self { client, config })
    }

    #[inline]
    #[must_use]
    pub fn config(&self) -> &MirrorConfig {
        &self.config
    }

    /// Mirror a random sample until the list or the time budget runs out
    pub async fn mirror<R: Rng>(&self, requests: &[TrafficRequest], rng: &mut R) -> Vec<MirrorResult> {
        let started = Instant::now();
        let budget = Duration::from_secs(self.config.duration);
        let mut results = Vec::new();

        for request in requests {
            if started.elapsed() > budget {
                info!(mirrored = results.len(), "time budget exhausted");
                break;
            }
            if rng.random::<f64>() >= self.config.mirror_percentage {
                continue;
            }

            results.push(self.mirror_one(request).await);
            if !self.config.pacing.is_zero() {
                tokio::time::sleep(self.config.pacing).await;
            }
        }
        results
    }

    /// Replay one request
    pub async fn mirror_one(&self, request: &TrafficRequest) -> MirrorResult {
        let started = Instant::now();
        let request_id = format!("shadow_{}", ulid::Ulid::new());

        match self.send(request).await {
            Ok((status_code, body)) => {
                let response_time = started.elapsed().as_secs_f64();
                debug!(endpoint = %request.endpoint, status_code, "mirrored request");
                MirrorResult {
                    request_id,
                    original_request: Some(RequestSummary {
                        endpoint: request.endpoint.clone(),
                        method: request.method.clone(),
                        payload_size: request.payload.to_string().len(),
                    }),
                    shadow_response: Some(ShadowResponse {
                        status_code,
                        response_time,
                        response_size: body.len(),
                        content_preview: body.chars().take(PREVIEW_CHARS).collect(),
                    }),
                    error: None,
                    metrics: MirrorMetrics {
                        success: status_code < 400,
                        latency_ms: response_time * 1000.0,
                        timestamp: Utc::now(),
                    },
                }
            }
            Err(e) => {
                warn!(endpoint = %request.endpoint, error = %e, "mirrored request failed");
                MirrorResult {
                    request_id,
                    original_request: None,
                    shadow_response: None,
                    error: Some(e),
                    metrics: MirrorMetrics {
                        success: false,
                        latency_ms: started.elapsed().as_secs_f64() * 1000.0,
                        timestamp: Utc::now(),
                    },
                }
            }
        }
    }

    async fn send(&self, request: &TrafficRequest) -> Result<(u16, String), String> {
        let method = reqwest::Method::from_bytes(request.method.to_uppercase().as_bytes())
            .map_err(|e| format!("invalid method {}: {e}", request.method))?;
        let url = format!(
            "{}{}",
            self.config.shadow_endpoint.trim_end_matches('/'),
            request.endpoint
        );

        let mut builder = self.client.request(method, url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if !request.payload.is_null() {
            builder = builder.json(&request.payload);
        }

        let response = builder
            .header(SHADOW_HEADER, "true")
            .send()
            .await
            .map_err(|e| e.to_string())?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| e.to_string())?;
        Ok((status, body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use serde_json::json;
    use std::io::Write;
    use std::net::SocketAddr;
    use warp::Filter;

    /// Shadow endpoint answering 200 only to tagged requests
    async fn shadow_server() -> SocketAddr {
        let route = warp::path!("chat-tot")
            .and(warp::header::optional::<String>("x-shadow-request"))
            .map(|tag: Option<String>| {
                let status = if tag.as_deref() == Some("true") {
                    warp::http::StatusCode::OK
                } else {
                    warp::http::StatusCode::BAD_REQUEST
                };
                warp::reply::with_status("data: {}\n\n", status)
            });
        let (addr, server) = warp::serve(route).bind_ephemeral(([127, 0, 0, 1], 0));
        tokio::spawn(server);
        addr
    }

    fn request(endpoint: &str) -> TrafficRequest {
        TrafficRequest {
            endpoint: endpoint.to_string(),
            method: "POST".to_string(),
            payload: json!({ "message": "How do I fix this bug?", "context": {} }),
            headers: BTreeMap::from([("Content-Type".to_string(), "application/json".to_string())]),
            timestamp: 0.0,
        }
    }

    #[tokio::test]
    async fn mirrors_with_shadow_header() {
        let addr = shadow_server().await;
        let mirror = ShadowMirror::new(
            MirrorConfig::new(format!("http://{addr}"))
                .with_mirror_percentage(1.0)
                .with_pacing(Duration::ZERO),
        )
        .unwrap();

        let requests = vec![request("/chat-tot"), request("/chat-tot"), request("/missing")];
        let results = mirror.mirror(&requests, &mut StdRng::seed_from_u64(7)).await;

        assert_eq!(results.len(), 3);
        assert!(results[0].metrics.success);
        assert_eq!(results[0].shadow_response.as_ref().unwrap().status_code, 200);
        assert_eq!(results[2].shadow_response.as_ref().unwrap().status_code, 404);
        assert!(!results[2].metrics.success);

        let summary = MirrorSummary::of(&results);
        assert_eq!(summary.total_requests, 3);
        assert_eq!(summary.successful_requests, 2);
    }

    #[tokio::test]
    async fn zero_percentage_mirrors_nothing() {
        let mirror = ShadowMirror::new(
            MirrorConfig::new("http://127.0.0.1:9").with_mirror_percentage(0.0),
        )
        .unwrap();
        let results = mirror
            .mirror(&[request("/chat-tot")], &mut StdRng::seed_from_u64(1))
            .await;
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_recorded() {
        let mirror = ShadowMirror::new(MirrorConfig::new("http://127.0.0.1:9")).unwrap();
        let result = mirror.mirror_one(&request("/chat-tot")).await;
        assert!(!result.metrics.success);
        assert!(result.error.is_some());
        assert!(result.shadow_response.is_none());
    }

    #[test]
    fn loads_list_or_wrapped_samples() {
        let mut list = tempfile::NamedTempFile::new().unwrap();
        write!(list, r#"[{{"endpoint": "/explain", "payload": {{"query": "q"}}}}]"#).unwrap();
        let requests = load_traffic(list.path()).unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].method, "POST");

        let mut wrapped = tempfile::NamedTempFile::new().unwrap();
        write!(wrapped, r#"{{"requests": [{{"endpoint": "/health", "method": "GET"}}]}}"#).unwrap();
        assert_eq!(load_traffic(wrapped.path()).unwrap()[0].method, "GET");

        assert!(matches!(
            load_traffic(Path::new("/nonexistent/traffic.json")),
            Err(ShadowError::Io { .. })
        ));
    }

    #[test]
    fn empty_summary() {
        let summary = MirrorSummary::of(&[]);
        assert_eq!(summary.average_latency, 0.0);
        assert_eq!(summary.success_rate(), 0.0);
    }
}
