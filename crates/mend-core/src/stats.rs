//! In-process planner counters behind `/metrics`
//!
//! Exported counters go through the `metrics` facade as well; these are the
//! values the API reports directly.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Snapshot of planner activity
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlannerMetrics {
    pub total_plans_executed: u64,
    pub completed: u64,
    pub failed: u64,
    /// Streams dropped before a terminal stage
    pub cancelled: u64,
    pub deployment_ready: u64,
    /// Mean seconds per finished plan
    pub average_execution_time: f64,
    /// Completed / total
    pub success_rate: f64,
}

/// Counters updated when a plan reaches a terminal stage
#[derive(Debug, Default)]
pub struct PlannerStats {
    total: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
    deployment_ready: AtomicU64,
    total_micros: AtomicU64,
}

impl PlannerStats {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a plan that ran to completion
    pub fn record_completed(&self, elapsed: Duration, deployment_ready: bool) {
        self.total.fetch_add(1, Ordering::Relaxed);
        self.completed.fetch_add(1, Ordering::Relaxed);
        if deployment_ready {
            self.deployment_ready.fetch_add(1, Ordering::Relaxed);
        }
        self.add_time(elapsed);

        metrics::counter!("mend_plans_total", "outcome" => "completed").increment(1);
        if deployment_ready {
            metrics::counter!("mend_plans_deployment_ready_total").increment(1);
        }
    }

    /// Record a plan that ended in an error
    pub fn record_failed(&self, elapsed: Duration, kind: &'static str) {
        self.total.fetch_add(1, Ordering::Relaxed);
        self.failed.fetch_add(1, Ordering::Relaxed);
        self.add_time(elapsed);

        metrics::counter!("mend_plans_total", "outcome" => "failed").increment(1);
        metrics::counter!("mend_plans_failed_total", "kind" => kind).increment(1);
    }

    /// Record a plan abandoned by its consumer
    pub fn record_cancelled(&self, elapsed: Duration) {
        self.total.fetch_add(1, Ordering::Relaxed);
        self.cancelled.fetch_add(1, Ordering::Relaxed);
        self.add_time(elapsed);

        metrics::counter!("mend_plans_total", "outcome" => "cancelled").increment(1);
    }

    fn add_time(&self, elapsed: Duration) {
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.total_micros.fetch_add(micros, Ordering::Relaxed);
    }

    /// Current values
    #[must_use]
    pub fn snapshot(&self) -> PlannerMetrics {
        let total = self.total.load(Ordering::Relaxed);
        let completed = self.completed.load(Ordering::Relaxed);
        let micros = self.total_micros.load(Ordering::Relaxed);
        let (average_execution_time, success_rate) = if total == 0 {
            (0.0, 0.0)
        } else {
            (
                micros as f64 / 1e6 / total as f64,
                completed as f64 / total as f64,
            )
        };

        PlannerMetrics {
            total_plans_executed: total,
            completed,
            failed: self.failed.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            deployment_ready: self.deployment_ready.load(Ordering::Relaxed),
            average_execution_time,
            success_rate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_snapshot() {
        assert_eq!(PlannerStats::new().snapshot(), PlannerMetrics::default());
    }

    #[test]
    fn rates_and_averages() {
        let stats = PlannerStats::new();
        stats.record_completed(Duration::from_secs(2), true);
        stats.record_completed(Duration::from_secs(4), false);
        stats.record_failed(Duration::from_secs(3), "no_selection");
        stats.record_failed(Duration::from_secs(3), "generation_error");
        stats.record_cancelled(Duration::from_secs(3));

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.total_plans_executed, 5);
        assert_eq!(snapshot.completed, 2);
        assert_eq!(snapshot.failed, 2);
        assert_eq!(snapshot.cancelled, 1);
        assert_eq!(snapshot.deployment_ready, 1);
        assert!((snapshot.average_execution_time - 3.0).abs() < 1e-9);
        assert!((snapshot.success_rate - 0.4).abs() < 1e-9);
    }
}
