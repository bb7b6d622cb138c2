//! Sandbox executor
//!
//! Runs one candidate in one freshly built environment:
//!
//! 1. policy check (nothing is built for a rejected payload)
//! 2. workspace materialization and environment creation
//! 3. start, poll until terminal and capture logs, all under one deadline
//! 4. result parsing
//! 5. release, exactly once, on every path that acquired a handle
//!
//! [`SandboxExecutor::run`] never fails; every outcome is an
//! [`ExecutionResult`]. Dropping the future mid-run (caller went away) hands
//! the environment to a background teardown bounded by the grace period.
//! Creation runs in its own task, so an environment the backend finishes
//! building after the caller left is torn down the same way.

use crate::backend::{EnvironmentHandle, EnvironmentSpec, EnvironmentStatus, IsolationBackend};
use crate::config::SandboxConfig;
use crate::contract::EnvironmentContract;
use crate::error::{BackendError, SandboxConfigError};
use crate::policy::PayloadPolicy;
use crate::result::{parse_harness_output, ExecutionResult};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// What to run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionRequest {
    /// Implementation payload, stored verbatim
    pub payload: Option<String>,
    /// Dependency manifest; empty means the configured default
    pub requirements: Vec<String>,
    /// Replacement test battery source
    pub test_overrides: Option<String>,
    /// Wall-clock timeout; `None` means the configured default
    pub timeout: Option<Duration>,
}

impl ExecutionRequest {
    /// Create request for a payload
    #[inline]
    #[must_use]
    pub fn new(payload: Option<String>) -> Self {
        Self {
            payload,
            ..Self::default()
        }
    }

    /// With dependency manifest
    #[inline]
    #[must_use]
    pub fn with_requirements(mut self, requirements: Vec<String>) -> Self {
        self.requirements = requirements;
        self
    }

    /// With replacement test battery
    #[inline]
    #[must_use]
    pub fn with_test_overrides(mut self, tests: impl Into<String>) -> Self {
        self.test_overrides = Some(tests.into());
        self
    }

    /// With timeout
    #[inline]
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Owns an acquired environment until it is released
///
/// Explicit release consumes the guard. A guard dropped while still holding
/// the handle spawns kill + remove on the current runtime.
struct EnvironmentGuard {
    handle: Option<EnvironmentHandle>,
    killed: bool,
    grace: Duration,
}

impl EnvironmentGuard {
    fn new(handle: EnvironmentHandle, grace: Duration) -> Self {
        Self {
            handle: Some(handle),
            killed: false,
            grace,
        }
    }

    /// Force-terminate; only the first call reaches the backend
    async fn kill(&mut self) {
        if self.killed {
            return;
        }
        self.killed = true;
        if let Some(handle) = &self.handle {
            if let Err(e) = handle.kill().await {
                warn!(environment = %handle.id().short(), error = %e, "kill failed");
            }
        }
    }

    /// Remove the environment; errors are logged and swallowed
    async fn release(mut self) {
        if let Some(handle) = self.handle.take() {
            match handle.remove().await {
                Ok(()) => debug!(environment = %handle.id().short(), "environment released"),
                Err(e) => {
                    warn!(environment = %handle.id().short(), error = %e, "environment release failed")
                }
            }
        }
    }
}

impl Drop for EnvironmentGuard {
    fn drop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        let killed = self.killed;
        let grace = self.grace;

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                warn!(environment = %handle.id().short(), "execution abandoned, tearing down environment");
                runtime.spawn(async move {
                    let teardown = async {
                        if !killed {
                            if let Err(e) = handle.kill().await {
                                debug!(environment = %handle.id().short(), error = %e, "kill during teardown failed");
                            }
                        }
                        if let Err(e) = handle.remove().await {
                            warn!(environment = %handle.id().short(), error = %e, "remove during teardown failed");
                        }
                    };
                    if tokio::time::timeout(grace, teardown).await.is_err() {
                        warn!(
                            environment = %handle.id().short(),
                            grace_secs = grace.as_secs(),
                            "teardown exceeded grace period"
                        );
                    }
                });
            }
            Err(_) => {
                warn!(environment = %handle.id(), "no runtime available, environment left for shutdown sweep");
            }
        }
    }
}

/// Runs candidates in isolated environments
#[derive(Clone)]
pub struct SandboxExecutor {
    backend: Arc<dyn IsolationBackend>,
    config: SandboxConfig,
    policy: Arc<PayloadPolicy>,
}

impl std::fmt::Debug for SandboxExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxExecutor")
            .field("backend", &self.backend.name())
            .field("image", &self.config.image)
            .finish()
    }
}

impl SandboxExecutor {
    /// Create executor over a shared backend connection
    pub fn new(
        backend: Arc<dyn IsolationBackend>,
        config: SandboxConfig,
    ) -> Result<Self, SandboxConfigError> {
        config.validate()?;
        let policy = PayloadPolicy::from_config(&config.policy)?;
        Ok(Self {
            backend,
            config,
            policy: Arc::new(policy),
        })
    }

    /// Configuration in use
    #[inline]
    #[must_use]
    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Shared backend
    #[inline]
    #[must_use]
    pub fn backend(&self) -> &Arc<dyn IsolationBackend> {
        &self.backend
    }

    /// Check the backend answers
    pub async fn health_check(&self) -> bool {
        match self.backend.ping().await {
            Ok(()) => true,
            Err(e) => {
                warn!(backend = self.backend.name(), error = %e, "isolation backend health check failed");
                false
            }
        }
    }

    /// Run one execution attempt
    pub async fn run(&self, request: ExecutionRequest) -> ExecutionResult {
        let started = Instant::now();
        let result = self.execute(&request, started).await;

        metrics::counter!("mend_sandbox_runs_total", "outcome" => result.outcome_label())
            .increment(1);
        metrics::histogram!("mend_sandbox_duration_seconds").record(started.elapsed().as_secs_f64());

        info!(
            outcome = result.outcome_label(),
            success = result.success,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "sandbox execution finished"
        );
        result
    }

    async fn execute(&self, request: &ExecutionRequest, started: Instant) -> ExecutionResult {
        if let Err(violation) = self.policy.check(request) {
            warn!(%violation, "payload rejected by policy");
            return ExecutionResult::policy_rejected(&violation);
        }

        let contract =
            match EnvironmentContract::materialize(request, &self.config.default_requirements)
                .await
            {
                Ok(contract) => contract,
                Err(e) => return ExecutionResult::setup_failed(format!("workspace setup failed: {e}")),
            };

        let spec = contract.environment_spec(&self.config);
        let image = spec.image.clone();
        let (handle, mut guard) = match self.acquire(spec).await {
            Ok(acquired) => acquired,
            Err(e) => {
                warn!(error = %e, image = %image, "environment creation failed");
                return ExecutionResult::setup_failed(format!("environment creation failed: {e}"));
            }
        };

        let timeout = request.timeout.unwrap_or_else(|| self.config.timeout());
        let attempt = async {
            handle.start().await.map_err(AttemptFailure::Start)?;
            debug!(environment = %handle.id().short(), "environment started");
            let status = wait_for_exit(&handle, self.config.poll_interval())
                .await
                .map_err(AttemptFailure::Poll)?;
            debug!(environment = %handle.id().short(), ?status, "environment finished");
            handle.logs().await.map_err(AttemptFailure::Logs)
        };

        let result = match tokio::time::timeout(timeout, attempt).await {
            Ok(Ok(raw)) => parse_harness_output(&raw, started.elapsed()),
            Ok(Err(AttemptFailure::Start(e))) => {
                warn!(environment = %handle.id().short(), error = %e, "environment start failed");
                ExecutionResult::setup_failed(format!("environment start failed: {e}"))
            }
            Ok(Err(AttemptFailure::Poll(e) | AttemptFailure::Logs(e))) => {
                warn!(environment = %handle.id().short(), error = %e, "backend failed during execution");
                ExecutionResult::backend_failed(&e, started.elapsed())
            }
            Err(_) => {
                warn!(
                    environment = %handle.id().short(),
                    timeout_secs = timeout.as_secs_f64(),
                    "execution timed out, killing environment"
                );
                guard.kill().await;
                ExecutionResult::timed_out(timeout)
            }
        };

        guard.release().await;
        drop(contract);
        result
    }

    /// Create an environment and put it under a guard
    ///
    /// The backend call runs in a spawned task. If this future is dropped
    /// before creation finishes, the task drops the guard it built and the
    /// environment is torn down in the background.
    async fn acquire(
        &self,
        spec: EnvironmentSpec,
    ) -> Result<(EnvironmentHandle, EnvironmentGuard), BackendError> {
        let backend = Arc::clone(&self.backend);
        let grace = self.config.grace_period();
        let (tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            let created = backend.create(&spec).await.map(|id| {
                let handle = EnvironmentHandle::new(id, Arc::clone(&backend));
                (handle.clone(), EnvironmentGuard::new(handle, grace))
            });
            if let Err(Ok((handle, _guard))) = tx.send(created) {
                debug!(environment = %handle.id().short(), "caller left during environment creation");
            }
        });

        rx.await
            .map_err(|_| BackendError::Protocol("environment creation task aborted".to_string()))?
    }
}

/// Where an attempt stopped before producing logs
enum AttemptFailure {
    Start(BackendError),
    Poll(BackendError),
    Logs(BackendError),
}

async fn wait_for_exit(
    handle: &EnvironmentHandle,
    interval: Duration,
) -> Result<EnvironmentStatus, BackendError> {
    loop {
        let status = handle.poll().await?;
        if status.is_terminal() {
            return Ok(status);
        }
        tokio::time::sleep(interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_builders() {
        let request = ExecutionRequest::new(Some("pass".to_string()))
            .with_requirements(vec!["pytest".to_string()])
            .with_test_overrides("def test_x(): pass")
            .with_timeout(Duration::from_secs(5));

        assert_eq!(request.payload.as_deref(), Some("pass"));
        assert_eq!(request.requirements, vec!["pytest".to_string()]);
        assert!(request.test_overrides.is_some());
        assert_eq!(request.timeout, Some(Duration::from_secs(5)));
    }

    #[test]
    fn default_request_is_empty() {
        let request = ExecutionRequest::default();
        assert!(request.payload.is_none());
        assert!(request.requirements.is_empty());
        assert!(request.timeout.is_none());
    }
}
