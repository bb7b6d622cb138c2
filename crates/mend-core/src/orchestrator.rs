//! Planner orchestrator
//!
//! Sequences Generate → Critique → Rank → Execute → Validate for one
//! session per request and streams an event after every completed stage.
//!
//! The plan stream is lazy: each poll drives exactly one stage. Dropping the
//! stream drops the stage in flight; during execution that fires the sandbox
//! teardown guard, so an abandoned request never leaves an environment alive.

use crate::config::{MendConfig, PlannerConfig};
use crate::error::{CritiqueError, PlanError};
use crate::explain::Explanation;
use crate::prompt::{critique_prompt, generation_prompt, parse_branches, parse_critique};
use crate::scoring::{rank_branches, ScoringWeights, Validation, ValidationWeights};
use crate::session::{PlanningSession, ReasoningEvent, TraceEntry};
use crate::stage::Stage;
use crate::stats::{PlannerMetrics, PlannerStats};
use crate::types::{CandidateBranch, Critique, PlanContext};
use futures::stream::{self, Stream, StreamExt};
use mend_capability::{DocumentRetrieval, RetrievalError, TextGeneration};
use mend_sandbox::SandboxExecutor;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
struct Settings {
    planner: PlannerConfig,
    scoring: ScoringWeights,
    validation: ValidationWeights,
    top_k: usize,
}

/// Planner entry point; cheap to clone, shared across requests
#[derive(Clone)]
pub struct Orchestrator {
    generator: Arc<dyn TextGeneration>,
    retriever: Arc<dyn DocumentRetrieval>,
    executor: SandboxExecutor,
    settings: Arc<Settings>,
    stats: Arc<PlannerStats>,
    ready: Arc<AtomicBool>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("executor", &self.executor)
            .field("settings", &self.settings)
            .finish()
    }
}

impl Orchestrator {
    /// Create orchestrator with default planner settings
    #[must_use]
    pub fn new(
        generator: Arc<dyn TextGeneration>,
        retriever: Arc<dyn DocumentRetrieval>,
        executor: SandboxExecutor,
    ) -> Self {
        Self {
            generator,
            retriever,
            executor,
            settings: Arc::new(Settings {
                planner: PlannerConfig::default(),
                scoring: ScoringWeights::default(),
                validation: ValidationWeights::default(),
                top_k: 5,
            }),
            stats: Arc::new(PlannerStats::new()),
            ready: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Create orchestrator from workspace configuration
    #[must_use]
    pub fn from_config(
        generator: Arc<dyn TextGeneration>,
        retriever: Arc<dyn DocumentRetrieval>,
        executor: SandboxExecutor,
        config: &MendConfig,
    ) -> Self {
        Self::new(generator, retriever, executor)
            .with_planner(config.planner.clone())
            .with_scoring(config.scoring.clone())
            .with_validation(config.validation.clone())
            .with_top_k(config.retrieval.top_k)
    }

    /// With planner settings
    #[must_use]
    pub fn with_planner(mut self, planner: PlannerConfig) -> Self {
        Arc::make_mut(&mut self.settings).planner = planner;
        self
    }

    /// With scoring weights
    #[must_use]
    pub fn with_scoring(mut self, scoring: ScoringWeights) -> Self {
        Arc::make_mut(&mut self.settings).scoring = scoring;
        self
    }

    /// With validation weights
    #[must_use]
    pub fn with_validation(mut self, validation: ValidationWeights) -> Self {
        Arc::make_mut(&mut self.settings).validation = validation;
        self
    }

    /// With number of documents returned by explain
    #[must_use]
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        Arc::make_mut(&mut self.settings).top_k = top_k.max(1);
        self
    }

    /// Plan and validate a fix, streaming one event per stage
    ///
    /// The stream is finite and not restartable. It ends after the
    /// validation event or after the first error event.
    pub fn plan(
        &self,
        query: String,
        context: PlanContext,
    ) -> impl Stream<Item = ReasoningEvent> + Send + 'static {
        let run = PlanRun {
            orchestrator: self.clone(),
            session: PlanningSession::new(query, context),
            started: Instant::now(),
        };
        info!(session_id = %run.session.id, "plan started");

        stream::unfold(Some(run), |state| async move {
            let Some(mut run) = state else {
                return None;
            };
            let event = run.step().await;
            let next = if run.session.stage.is_terminal() {
                None
            } else {
                Some(run)
            };
            Some((event, next))
        })
    }

    /// Retrieve documents and build the explainability view
    pub async fn explain(
        &self,
        query: &str,
        include_reasoning: bool,
    ) -> Result<Explanation, RetrievalError> {
        let documents = self.retriever.retrieve(query, self.settings.top_k).await?;
        debug!(documents = documents.len(), "retrieved documents for explain");
        Ok(Explanation::build(query, documents, include_reasoning))
    }

    /// Aggregate collaborator health
    pub async fn health(&self) -> HealthReport {
        let (llm_provider, rag_retriever, sandbox_backend) = tokio::join!(
            self.generator.health_check(),
            self.retriever.health_check(),
            self.executor.health_check(),
        );
        let components = ComponentHealth {
            llm_provider,
            rag_retriever,
            sandbox_backend,
            tot_planner: self.is_ready(),
        };
        let status = if components.all_healthy() {
            HealthStatus::Healthy
        } else {
            HealthStatus::Degraded
        };
        HealthReport { status, components }
    }

    /// Planner counters
    #[must_use]
    pub fn metrics(&self) -> PlannerMetrics {
        self.stats.snapshot()
    }

    /// Readiness flag
    #[inline]
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// Set readiness (cleared during shutdown)
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }
}

/// Overall status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
}

/// Per-collaborator health
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub llm_provider: bool,
    pub rag_retriever: bool,
    pub sandbox_backend: bool,
    pub tot_planner: bool,
}

impl ComponentHealth {
    #[inline]
    #[must_use]
    pub fn all_healthy(&self) -> bool {
        self.llm_provider && self.rag_retriever && self.sandbox_backend && self.tot_planner
    }
}

/// Health response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub components: ComponentHealth,
}

/// One in-flight pipeline run
struct PlanRun {
    orchestrator: Orchestrator,
    session: PlanningSession,
    started: Instant,
}

impl Drop for PlanRun {
    fn drop(&mut self) {
        if self.session.stage.is_terminal() {
            return;
        }
        self.orchestrator.stats.record_cancelled(self.started.elapsed());
        warn!(
            session_id = %self.session.id,
            stage = ?self.session.stage,
            "plan stream dropped before completion"
        );
    }
}

impl PlanRun {
    /// Drive the current stage and produce its event
    async fn step(&mut self) -> ReasoningEvent {
        let stage = self.session.stage;
        let outcome = match stage {
            Stage::Generating => self.generate().await,
            Stage::Critiquing => self.critique().await,
            Stage::Ranking => self.rank(),
            Stage::Executing => self.execute().await,
            Stage::Validating => self.validate(),
            Stage::Completed | Stage::Failed => Err(PlanError::InvalidTransition {
                from: stage,
                to: stage,
            }),
        };

        match outcome {
            Ok(entry) => {
                info!(
                    session_id = %self.session.id,
                    stage = %entry.stage,
                    "stage completed"
                );
                if self.session.stage == Stage::Completed {
                    let ready = self
                        .session
                        .validation
                        .is_some_and(|v| v.ready_for_deployment);
                    self.orchestrator
                        .stats
                        .record_completed(self.started.elapsed(), ready);
                    info!(
                        session_id = %self.session.id,
                        ready_for_deployment = ready,
                        elapsed_ms = self.started.elapsed().as_millis() as u64,
                        "plan completed"
                    );
                }
                ReasoningEvent::step(&self.session, &entry)
            }
            Err(err) => {
                self.session.fail();
                self.orchestrator
                    .stats
                    .record_failed(self.started.elapsed(), err.kind());
                error!(
                    session_id = %self.session.id,
                    stage = ?stage,
                    kind = err.kind(),
                    error = %err,
                    "plan failed"
                );
                ReasoningEvent::error(&err)
            }
        }
    }

    fn record(&mut self, stage: Stage, payload: Value) -> TraceEntry {
        let name = stage.trace_name().unwrap_or("terminal");
        self.session.trace.append(name, payload).clone()
    }

    async fn generate(&mut self) -> Result<TraceEntry, PlanError> {
        let max_candidates = self.orchestrator.settings.planner.max_candidates;
        let prompt = generation_prompt(&self.session.query, &self.session.context, max_candidates);

        let parsed = self
            .orchestrator
            .generator
            .generate(&prompt)
            .await
            .and_then(|text| parse_branches(&text));

        let mut branches = match parsed {
            Ok(branches) => branches,
            Err(e) => {
                self.record(
                    Stage::Generating,
                    json!({ "branches_count": 0, "error": e.kind() }),
                );
                return Err(e.into());
            }
        };

        if branches.len() > max_candidates {
            warn!(
                session_id = %self.session.id,
                generated = branches.len(),
                kept = max_candidates,
                "generator returned too many candidates, truncating"
            );
            branches.truncate(max_candidates);
        }
        debug!(session_id = %self.session.id, count = branches.len(), "branches generated");

        let count = branches.len();
        self.session.branches = branches;
        let entry = self.record(Stage::Generating, json!({ "branches_count": count }));
        self.session.advance(Stage::Critiquing)?;
        Ok(entry)
    }

    async fn critique(&mut self) -> Result<TraceEntry, PlanError> {
        let concurrency = self.orchestrator.settings.planner.critique_concurrency.max(1);
        let generator = self.orchestrator.generator.as_ref();

        let pending: Vec<_> = self
            .session
            .branches
            .iter()
            .enumerate()
            .map(|(index, branch)| critique_branch(generator, index, branch))
            .collect();
        let critiques: Vec<Critique> = stream::iter(pending)
            .buffered(concurrency)
            .collect()
            .await;

        let failed = critiques.iter().filter(|c| c.failed).count();
        for (branch, critique) in self.session.branches.iter_mut().zip(critiques) {
            branch.critique = Some(critique);
        }
        if failed > 0 {
            warn!(session_id = %self.session.id, failed, "some critiques failed");
        }

        let entry = self.record(
            Stage::Critiquing,
            json!({
                "critiques_generated": self.session.branches.len() - failed,
                "critiques_failed": failed,
            }),
        );
        self.session.advance(Stage::Ranking)?;
        Ok(entry)
    }

    fn rank(&mut self) -> Result<TraceEntry, PlanError> {
        let settings = Arc::clone(&self.orchestrator.settings);
        let selected = rank_branches(
            &settings.scoring,
            &mut self.session.branches,
            &self.session.context,
        )
        .cloned();

        let top_score = selected
            .as_ref()
            .and_then(|b| b.composite_score)
            .unwrap_or(0.0);
        let ranking: Vec<Value> = self
            .session
            .branches
            .iter()
            .map(|b| json!({ "strategy": b.strategy, "composite_score": b.composite_score }))
            .collect();
        self.session.selected = selected;

        let entry = self.record(
            Stage::Ranking,
            json!({
                "top_score": top_score,
                "selected_branch": self.session.selected,
                "ranking": ranking,
            }),
        );
        self.session.advance(Stage::Executing)?;
        Ok(entry)
    }

    async fn execute(&mut self) -> Result<TraceEntry, PlanError> {
        let Some(selected) = self.session.selected.as_ref() else {
            return Err(PlanError::NoSelection);
        };
        let request = selected.execution_request(self.orchestrator.settings.planner.execution_timeout());
        info!(
            session_id = %self.session.id,
            strategy = %selected.strategy,
            "executing selected candidate"
        );

        let result = self.orchestrator.executor.run(request).await;
        let payload = json!({
            "success": result.success,
            "test_results": result.test_results,
            "performance_delta": result.performance_delta,
            "execution_time": result.execution_time,
            "error": result.error,
        });
        self.session.execution_result = Some(result);

        let entry = self.record(Stage::Executing, payload);
        self.session.advance(Stage::Validating)?;
        Ok(entry)
    }

    fn validate(&mut self) -> Result<TraceEntry, PlanError> {
        let verdict = match &self.session.execution_result {
            Some(result) => self.orchestrator.settings.validation.validate(result),
            None => Validation {
                validation_score: 0.0,
                ready_for_deployment: false,
            },
        };
        self.session.validation = Some(verdict);

        let entry = self.record(Stage::Validating, json!(verdict));
        self.session.advance(Stage::Completed)?;
        Ok(entry)
    }
}

async fn critique_branch(
    generator: &dyn TextGeneration,
    index: usize,
    branch: &CandidateBranch,
) -> Critique {
    match request_critique(generator, branch).await {
        Ok(critique) => critique,
        Err(e) => {
            warn!(branch = index, error = %e, "critique failed, branch degraded");
            Critique::failed(e.to_string())
        }
    }
}

async fn request_critique(
    generator: &dyn TextGeneration,
    branch: &CandidateBranch,
) -> Result<Critique, CritiqueError> {
    let text = generator.generate(&critique_prompt(branch)).await?;
    parse_critique(&text)
}
