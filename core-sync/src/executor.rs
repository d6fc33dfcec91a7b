//! # Worker Pool
//!
//! Runs a [`SyncPlan`] tier by tier. Within a tier at most
//! `max_parallelism` actions are in flight. Every action ends with exactly
//! one [`ActionOutcome`]:
//!
//! - dependents of a blocking outcome become `DependencyFailed` without running;
//! - after cancellation, undispatched actions become `Cancelled` while
//!   in-flight ones finish; one waiting out a retry backoff keeps its last error;
//! - timeouts and transient IO errors retry with exponential backoff.

use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::planner::{PlanStep, PlannedAction, SyncPlan};
use crate::report::{ActionOutcome, ActionReport};
use async_trait::async_trait;
use core_async::future::join_all;
use core_async::sync::{CancellationToken, Semaphore};
use core_async::time::{backoff_delay, timeout, Duration};
use core_pipeline::{Fingerprint, IdentityKey, RepresentationId};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Applies one planned action.
#[async_trait]
pub trait ActionRunner: Send + Sync {
    async fn run(&self, action: &PlannedAction) -> Result<ActionOutcome>;
}

/// Callbacks as actions and tiers finish.
pub trait ExecutionObserver: Send + Sync {
    fn action_finished(&self, action: &PlannedAction, report: &ActionReport);

    fn tier_finished(&self, _completed_actions: usize, _total_actions: usize) {}
}

pub struct WorkerPool {
    max_parallelism: usize,
    action_timeout: Duration,
    retry_attempts: u32,
    retry_base_delay: Duration,
    retry_max_delay: Duration,
}

impl WorkerPool {
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            max_parallelism: config.max_parallelism.max(1),
            action_timeout: config.action_timeout,
            retry_attempts: config.retry_attempts.max(1),
            retry_base_delay: config.retry_base_delay,
            retry_max_delay: config.retry_max_delay,
        }
    }

    /// Execute `plan`, returning one report per action in plan order.
    pub async fn execute(
        &self,
        plan: &SyncPlan,
        runner: &dyn ActionRunner,
        observer: &dyn ExecutionObserver,
        token: &CancellationToken,
    ) -> Vec<ActionReport> {
        let total = plan.action_count();
        let mut settled: HashMap<RepresentationId, (IdentityKey, bool)> = HashMap::new();
        let mut reports = Vec::with_capacity(total);
        let semaphore = Semaphore::new(self.max_parallelism);

        for (tier_index, tier) in plan.tiers.iter().enumerate() {
            let dispatches = tier.iter().map(|action| {
                let blocked_by = action
                    .dependencies
                    .iter()
                    .filter_map(|dep| settled.get(dep))
                    .find(|(_, blocks)| *blocks)
                    .map(|(identity, _)| identity.clone());
                let semaphore = &semaphore;
                async move {
                    let (outcome, attempts) =
                        self.settle(action, blocked_by, runner, semaphore, token).await;
                    let report = ActionReport {
                        identity: action.identity.clone(),
                        representation_id: action.representation.id.clone(),
                        outcome,
                        attempts,
                    };
                    observer.action_finished(action, &report);
                    report
                }
            });

            let tier_reports = join_all(dispatches).await;
            for report in &tier_reports {
                settled.insert(
                    report.representation_id.clone(),
                    (report.identity.clone(), report.outcome.blocks_dependents()),
                );
            }
            reports.extend(tier_reports);

            debug!(tier = tier_index, completed = reports.len(), total, "Tier finished");
            observer.tier_finished(reports.len(), total);
        }

        reports
    }

    async fn settle(
        &self,
        action: &PlannedAction,
        blocked_by: Option<IdentityKey>,
        runner: &dyn ActionRunner,
        semaphore: &Semaphore,
        token: &CancellationToken,
    ) -> (ActionOutcome, u32) {
        if let PlanStep::Fail { reason } = &action.step {
            return (ActionOutcome::failed(reason.clone()), 0);
        }
        if token.is_cancelled() {
            return (ActionOutcome::Cancelled, 0);
        }
        if let Some(dependency) = blocked_by {
            return (ActionOutcome::DependencyFailed { dependency }, 0);
        }

        let Ok(_permit) = semaphore.acquire().await else {
            return (ActionOutcome::Cancelled, 0);
        };
        // Cancellation may have arrived while queued for a permit.
        if token.is_cancelled() {
            return (ActionOutcome::Cancelled, 0);
        }

        self.run_with_retry(action, runner, token).await
    }

    async fn run_with_retry(
        &self,
        action: &PlannedAction,
        runner: &dyn ActionRunner,
        token: &CancellationToken,
    ) -> (ActionOutcome, u32) {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = match timeout(self.action_timeout, runner.run(action)).await {
                Ok(result) => result,
                Err(_) => Err(SyncError::Timeout(self.action_timeout.as_millis() as u64)),
            };

            match result {
                Ok(outcome) => return (outcome, attempt),
                Err(e) if e.is_retryable() && attempt < self.retry_attempts => {
                    let delay =
                        backoff_delay(self.retry_base_delay, self.retry_max_delay, attempt - 1);
                    warn!(
                        identity = %action.identity,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Action failed transiently, retrying"
                    );
                    // A dispatched action is never reported as cancelled.
                    if timeout(delay, token.cancelled()).await.is_ok() {
                        return (outcome_of_error(e), attempt);
                    }
                }
                Err(e) => {
                    warn!(identity = %action.identity, attempt, error = %e, "Action failed");
                    return (outcome_of_error(e), attempt);
                }
            }
        }
    }
}

fn outcome_of_error(err: SyncError) -> ActionOutcome {
    match err {
        SyncError::DivergedAsset {
            local_fingerprint,
            remote_fingerprint,
            ..
        } => ActionOutcome::Conflicted {
            local_fingerprint: Fingerprint::new(local_fingerprint),
            remote_fingerprint: Fingerprint::new(remote_fingerprint),
        },
        SyncError::Cancelled => ActionOutcome::Cancelled,
        other => ActionOutcome::failed(other.to_string()),
    }
}
