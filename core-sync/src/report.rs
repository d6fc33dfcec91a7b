//! Per-action outcomes and the partial-result report of a pass

use crate::job::{PassId, PassStats, SyncKind};
use chrono::{DateTime, Utc};
use core_pipeline::{Fingerprint, IdentityKey, ProjectId, RepresentationId};
use serde::{Deserialize, Serialize};

/// Terminal outcome of one planned action. Every action ends in exactly one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ActionOutcome {
    Imported {
        local_path: String,
        representation_id: RepresentationId,
        fingerprint: Fingerprint,
    },
    Published {
        representation_id: RepresentationId,
        version: u32,
    },
    Skipped {
        reason: String,
    },
    /// Both sides changed; the local asset was left untouched.
    Conflicted {
        local_fingerprint: Fingerprint,
        remote_fingerprint: Fingerprint,
    },
    Failed {
        reason: String,
    },
    /// Never dispatched because the pass was cancelled.
    Cancelled,
    DependencyFailed {
        dependency: IdentityKey,
    },
}

impl ActionOutcome {
    pub fn skipped(reason: impl Into<String>) -> Self {
        ActionOutcome::Skipped {
            reason: reason.into(),
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        ActionOutcome::Failed {
            reason: reason.into(),
        }
    }

    /// Dependents of an action ending this way are not attempted.
    pub fn blocks_dependents(&self) -> bool {
        matches!(
            self,
            ActionOutcome::Failed { .. }
                | ActionOutcome::Conflicted { .. }
                | ActionOutcome::Cancelled
                | ActionOutcome::DependencyFailed { .. }
        )
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, ActionOutcome::Skipped { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            ActionOutcome::Imported { .. } => "imported",
            ActionOutcome::Published { .. } => "published",
            ActionOutcome::Skipped { .. } => "skipped",
            ActionOutcome::Conflicted { .. } => "conflicted",
            ActionOutcome::Failed { .. } => "failed",
            ActionOutcome::Cancelled => "cancelled",
            ActionOutcome::DependencyFailed { .. } => "dependency_failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionReport {
    pub identity: IdentityKey,
    pub representation_id: RepresentationId,
    pub outcome: ActionOutcome,
    /// Attempts made; zero when the action was never dispatched
    pub attempts: u32,
}

/// Everything a pass did, including actions that never ran.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub pass_id: PassId,
    pub project_id: ProjectId,
    pub kind: SyncKind,
    pub actions: Vec<ActionReport>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub cancelled: bool,
}

impl SyncReport {
    pub fn stats(&self) -> PassStats {
        let mut stats = PassStats::default();
        for action in &self.actions {
            match action.outcome {
                ActionOutcome::Imported { .. } => stats.imported += 1,
                ActionOutcome::Published { .. } => stats.published += 1,
                ActionOutcome::Skipped { .. } => stats.skipped += 1,
                ActionOutcome::Conflicted { .. } => stats.conflicted += 1,
                ActionOutcome::Failed { .. } => stats.failed += 1,
                ActionOutcome::Cancelled => stats.cancelled += 1,
                ActionOutcome::DependencyFailed { .. } => stats.dependency_failed += 1,
            }
        }
        stats
    }

    /// Actions that did something or reported a problem.
    pub fn non_skipped(&self) -> impl Iterator<Item = &ActionReport> {
        self.actions.iter().filter(|a| !a.outcome.is_skipped())
    }

    pub fn outcome_for(&self, identity: &IdentityKey) -> Option<&ActionOutcome> {
        self.actions
            .iter()
            .find(|a| &a.identity == identity)
            .map(|a| &a.outcome)
    }

    pub fn duration_ms(&self) -> u64 {
        (self.finished_at - self.started_at)
            .num_milliseconds()
            .max(0) as u64
    }
}
