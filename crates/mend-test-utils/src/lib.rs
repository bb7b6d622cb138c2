//! Testing utilities for the Mend workspace
//!
//! Shared doubles for the capability and isolation seams, plus fixtures for
//! generator output and harness records.

#![allow(missing_docs)]

use async_trait::async_trait;
use mend_capability::{Document, DocumentRetrieval, GenerationError, RetrievalError, TextGeneration};
use mend_sandbox::{
    BackendError, EnvironmentId, EnvironmentSpec, EnvironmentStatus, IsolationBackend,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

// ---------------------------------------------------------------------------
// Text generation
// ---------------------------------------------------------------------------

/// Generator answering from a script
///
/// Rules keyed by prompt substring are checked first, in insertion order;
/// then the queue; then the fallback.
pub struct ScriptedGenerator {
    rules: Vec<(String, Result<String, GenerationError>)>,
    queue: Mutex<VecDeque<Result<String, GenerationError>>>,
    fallback: Result<String, GenerationError>,
    delay: Option<Duration>,
    healthy: bool,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl Default for ScriptedGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            queue: Mutex::new(VecDeque::new()),
            fallback: Err(GenerationError::EmptyResponse),
            delay: None,
            healthy: true,
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Answer prompts containing `needle`
    pub fn on(mut self, needle: impl Into<String>, response: impl Into<String>) -> Self {
        self.rules.push((needle.into(), Ok(response.into())));
        self
    }

    /// Fail prompts containing `needle`
    pub fn fail_on(mut self, needle: impl Into<String>, error: GenerationError) -> Self {
        self.rules.push((needle.into(), Err(error)));
        self
    }

    /// Queue a response for the next unmatched prompt
    pub fn then(self, response: impl Into<String>) -> Self {
        self.queue.lock().push_back(Ok(response.into()));
        self
    }

    /// Queue a failure for the next unmatched prompt
    pub fn then_fail(self, error: GenerationError) -> Self {
        self.queue.lock().push_back(Err(error));
        self
    }

    /// Answer for everything else
    pub fn with_fallback(mut self, response: impl Into<String>) -> Self {
        self.fallback = Ok(response.into());
        self
    }

    /// Sleep before every answer
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Report unhealthy
    pub fn unhealthy(mut self) -> Self {
        self.healthy = false;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }
}

#[async_trait]
impl TextGeneration for ScriptedGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().push(prompt.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if let Some((_, response)) = self.rules.iter().find(|(needle, _)| prompt.contains(needle)) {
            return response.clone();
        }
        if let Some(response) = self.queue.lock().pop_front() {
            return response;
        }
        self.fallback.clone()
    }

    async fn health_check(&self) -> bool {
        self.healthy
    }
}

// ---------------------------------------------------------------------------
// Retrieval
// ---------------------------------------------------------------------------

/// Retriever returning a fixed document list
pub struct StaticRetriever {
    documents: Vec<Document>,
    error: Option<RetrievalError>,
}

impl StaticRetriever {
    pub fn new(documents: Vec<Document>) -> Self {
        Self {
            documents,
            error: None,
        }
    }

    pub fn failing(error: RetrievalError) -> Self {
        Self {
            documents: Vec::new(),
            error: Some(error),
        }
    }
}

#[async_trait]
impl DocumentRetrieval for StaticRetriever {
    async fn retrieve(&self, _query: &str, top_k: usize) -> Result<Vec<Document>, RetrievalError> {
        if let Some(error) = &self.error {
            return Err(error.clone());
        }
        Ok(self.documents.iter().take(top_k).cloned().collect())
    }

    async fn health_check(&self) -> bool {
        self.error.is_none()
    }
}

pub fn document(id: &str, content: &str, relevance_score: f64) -> Document {
    Document {
        id: id.to_string(),
        content: content.to_string(),
        metadata: json!({ "source": "fixture" }),
        relevance_score,
    }
}

// ---------------------------------------------------------------------------
// Isolation backend
// ---------------------------------------------------------------------------

/// In-memory isolation backend with call counters
///
/// Status polls walk the scripted list and then repeat its last entry. A
/// killed environment reports `Exited { code: Some(137) }`.
pub struct FakeBackend {
    logs: String,
    statuses: Mutex<VecDeque<EnvironmentStatus>>,
    fail_create: bool,
    fail_start: bool,
    fail_poll: bool,
    fail_remove: bool,
    create_delay: Option<Duration>,
    log_delay: Option<Duration>,
    healthy: AtomicBool,
    next_id: AtomicUsize,
    live: Mutex<HashSet<String>>,
    killed: Mutex<HashSet<String>>,
    specs: Mutex<Vec<EnvironmentSpec>>,
    pub creates: AtomicUsize,
    pub starts: AtomicUsize,
    pub polls: AtomicUsize,
    pub kills: AtomicUsize,
    pub removes: AtomicUsize,
    pub log_reads: AtomicUsize,
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeBackend {
    /// Backend whose environments run briefly, exit 0 and print a passing record
    pub fn new() -> Self {
        Self {
            logs: harness_record(true, 0),
            statuses: Mutex::new(VecDeque::from([
                EnvironmentStatus::Running,
                EnvironmentStatus::Exited { code: Some(0) },
            ])),
            fail_create: false,
            fail_start: false,
            fail_poll: false,
            fail_remove: false,
            create_delay: None,
            log_delay: None,
            healthy: AtomicBool::new(true),
            next_id: AtomicUsize::new(0),
            live: Mutex::new(HashSet::new()),
            killed: Mutex::new(HashSet::new()),
            specs: Mutex::new(Vec::new()),
            creates: AtomicUsize::new(0),
            starts: AtomicUsize::new(0),
            polls: AtomicUsize::new(0),
            kills: AtomicUsize::new(0),
            removes: AtomicUsize::new(0),
            log_reads: AtomicUsize::new(0),
        }
    }

    pub fn with_logs(mut self, logs: impl Into<String>) -> Self {
        self.logs = logs.into();
        self
    }

    pub fn with_statuses(self, statuses: Vec<EnvironmentStatus>) -> Self {
        *self.statuses.lock() = statuses.into();
        self
    }

    /// Environments run until killed
    pub fn never_exits(self) -> Self {
        self.with_statuses(vec![EnvironmentStatus::Running])
    }

    pub fn failing_create(mut self) -> Self {
        self.fail_create = true;
        self
    }

    pub fn failing_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    pub fn failing_poll(mut self) -> Self {
        self.fail_poll = true;
        self
    }

    pub fn failing_remove(mut self) -> Self {
        self.fail_remove = true;
        self
    }

    /// Environments exist on the backend before `create` returns
    pub fn with_create_delay(mut self, delay: Duration) -> Self {
        self.create_delay = Some(delay);
        self
    }

    /// Log reads stall before answering
    pub fn with_log_delay(mut self, delay: Duration) -> Self {
        self.log_delay = Some(delay);
        self
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }

    pub fn kills(&self) -> usize {
        self.kills.load(Ordering::SeqCst)
    }

    pub fn removes(&self) -> usize {
        self.removes.load(Ordering::SeqCst)
    }

    /// Environments created and not yet removed
    pub fn live(&self) -> usize {
        self.live.lock().len()
    }

    /// Specs passed to `create`, in order
    pub fn specs(&self) -> Vec<EnvironmentSpec> {
        self.specs.lock().clone()
    }

    fn next_status(&self) -> EnvironmentStatus {
        let mut statuses = self.statuses.lock();
        if statuses.len() > 1 {
            statuses.pop_front().unwrap_or(EnvironmentStatus::Dead)
        } else {
            statuses.front().cloned().unwrap_or(EnvironmentStatus::Dead)
        }
    }
}

#[async_trait]
impl IsolationBackend for FakeBackend {
    fn name(&self) -> &str {
        "fake"
    }

    async fn create(&self, spec: &EnvironmentSpec) -> Result<EnvironmentId, BackendError> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        if self.fail_create {
            return Err(BackendError::Command {
                command: "fake create".to_string(),
                status: 125,
                stderr: "image not found".to_string(),
            });
        }
        self.specs.lock().push(spec.clone());
        let id = format!("fake-{:04}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.live.lock().insert(id.clone());
        if let Some(delay) = self.create_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(EnvironmentId::new(id))
    }

    async fn start(&self, _id: &EnvironmentId) -> Result<(), BackendError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if self.fail_start {
            return Err(BackendError::Command {
                command: "fake start".to_string(),
                status: 1,
                stderr: "cannot start".to_string(),
            });
        }
        Ok(())
    }

    async fn poll(&self, id: &EnvironmentId) -> Result<EnvironmentStatus, BackendError> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        if self.fail_poll {
            return Err(BackendError::Protocol("status unavailable".to_string()));
        }
        if self.killed.lock().contains(id.as_str()) {
            return Ok(EnvironmentStatus::Exited { code: Some(137) });
        }
        Ok(self.next_status())
    }

    async fn kill(&self, id: &EnvironmentId) -> Result<(), BackendError> {
        self.kills.fetch_add(1, Ordering::SeqCst);
        self.killed.lock().insert(id.to_string());
        Ok(())
    }

    async fn remove(&self, id: &EnvironmentId) -> Result<(), BackendError> {
        self.removes.fetch_add(1, Ordering::SeqCst);
        if self.fail_remove {
            return Err(BackendError::Unavailable("daemon went away".to_string()));
        }
        self.live.lock().remove(id.as_str());
        Ok(())
    }

    async fn logs(&self, _id: &EnvironmentId) -> Result<String, BackendError> {
        self.log_reads.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.log_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.logs.clone())
    }

    async fn ping(&self) -> Result<(), BackendError> {
        if self.healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BackendError::Unavailable("fake backend down".to_string()))
        }
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// One harness output line
pub fn harness_record(success: bool, return_code: i32) -> String {
    json!({
        "success": success,
        "test_results": {
            "return_code": return_code,
            "stdout": if return_code == 0 { "4 passed" } else { "1 failed, 3 passed" },
            "stderr": "",
        },
        "performance_delta": 0.95,
        "execution_time": 1.25,
        "logs": ["candidate exited with 0"],
    })
    .to_string()
}

/// Generator output describing one candidate
pub fn branch_json(strategy: &str, steps: usize) -> Value {
    json!({
        "strategy": strategy,
        "risks": ["regression in callers"],
        "implementation_steps": (1..=steps).map(|i| format!("step {i}")).collect::<Vec<_>>(),
        "expected_outcome": format!("{strategy} resolves the problem"),
        "implementation_code": "def fix(values):\n    return sorted(set(values))\n",
        "requirements": ["pytest"],
    })
}

/// Generator output for a set of candidates
pub fn branches_response(branches: &[Value]) -> String {
    Value::Array(branches.to_vec()).to_string()
}

/// Critique output
pub fn critique_json(feasibility: f64, safety: f64) -> String {
    json!({
        "feasibility": feasibility,
        "safety_score": safety,
        "issues": [],
        "suggestions": ["add a regression test"],
    })
    .to_string()
}
