//! Change notifier: translates pass progress into `CoreEvent`s
//!
//! Emission never fails a pass; with no subscriber the event is dropped.

use crate::executor::ExecutionObserver;
use crate::job::{percent_of, PassId, SyncKind};
use crate::planner::PlannedAction;
use crate::report::{ActionOutcome, ActionReport, SyncReport};
use core_pipeline::{IdentityKey, ProjectId};
use core_runtime::events::{AssetEvent, CoreEvent, EventBus, IndexEvent, SyncEvent};

#[derive(Clone)]
pub struct ChangeNotifier {
    bus: EventBus,
    pass_id: String,
}

impl ChangeNotifier {
    pub fn new(bus: EventBus, pass_id: PassId) -> Self {
        Self {
            bus,
            pass_id: pass_id.to_string(),
        }
    }

    fn emit(&self, event: CoreEvent) {
        self.bus.emit(event).ok();
    }

    pub fn started(&self, project_id: &ProjectId, kind: SyncKind, planned_actions: usize) {
        self.emit(CoreEvent::Sync(SyncEvent::Started {
            pass_id: self.pass_id.clone(),
            project_id: project_id.to_string(),
            kind: kind.to_string(),
            planned_actions: planned_actions as u64,
        }));
    }

    pub fn progress(&self, completed_actions: usize, total_actions: usize) {
        let (done, total) = (completed_actions as u64, total_actions as u64);
        self.emit(CoreEvent::Sync(SyncEvent::Progress {
            pass_id: self.pass_id.clone(),
            completed_actions: done,
            total_actions: total,
            percent: percent_of(done, total),
        }));
    }

    /// `Completed`, or `Cancelled` when the pass was cut short.
    pub fn finished(&self, report: &SyncReport) {
        let stats = report.stats();
        let event = if report.cancelled {
            SyncEvent::Cancelled {
                pass_id: self.pass_id.clone(),
                completed_actions: stats.total() - stats.cancelled,
                cancelled_actions: stats.cancelled,
            }
        } else {
            SyncEvent::Completed {
                pass_id: self.pass_id.clone(),
                imported: stats.imported,
                published: stats.published,
                skipped: stats.skipped,
                conflicted: stats.conflicted,
                failed: stats.failed,
                dependency_failed: stats.dependency_failed,
                duration_ms: report.duration_ms(),
            }
        };
        self.emit(CoreEvent::Sync(event));
    }

    pub fn failed(&self, message: impl Into<String>, recoverable: bool) {
        self.emit(CoreEvent::Sync(SyncEvent::Failed {
            pass_id: self.pass_id.clone(),
            message: message.into(),
            recoverable,
        }));
    }

    /// One asset event for a terminal outcome.
    pub fn outcome(&self, identity: &IdentityKey, local_path: Option<&str>, outcome: &ActionOutcome) {
        let pass_id = self.pass_id.clone();
        let identity = identity.to_string();
        let local_path = local_path.unwrap_or_default().to_string();
        let event = match outcome {
            ActionOutcome::Imported {
                local_path,
                representation_id,
                fingerprint,
            } => AssetEvent::Imported {
                pass_id,
                identity,
                representation_id: representation_id.to_string(),
                local_path: local_path.clone(),
                fingerprint: fingerprint.to_string(),
            },
            ActionOutcome::Published {
                representation_id,
                version,
            } => AssetEvent::Published {
                pass_id,
                identity,
                representation_id: representation_id.to_string(),
                local_path,
                version: *version,
            },
            ActionOutcome::Skipped { reason } => AssetEvent::Skipped {
                pass_id,
                identity,
                reason: reason.clone(),
            },
            ActionOutcome::Conflicted {
                local_fingerprint,
                remote_fingerprint,
            } => AssetEvent::Conflicted {
                pass_id,
                identity,
                local_path,
                local_fingerprint: local_fingerprint.to_string(),
                remote_fingerprint: remote_fingerprint.to_string(),
            },
            ActionOutcome::Failed { reason } => AssetEvent::Failed {
                pass_id,
                identity,
                reason: reason.clone(),
            },
            ActionOutcome::Cancelled => AssetEvent::Cancelled { pass_id, identity },
            ActionOutcome::DependencyFailed { dependency } => AssetEvent::DependencyFailed {
                pass_id,
                identity,
                dependency: dependency.to_string(),
            },
        };
        self.emit(CoreEvent::Asset(event));
    }

    pub fn index_loaded(bus: &EventBus, records: usize, degraded: bool) {
        bus.emit(CoreEvent::Index(IndexEvent::Loaded {
            records: records as u64,
            degraded,
        }))
        .ok();
    }

    pub fn invalidated(bus: &EventBus, project_id: &ProjectId) {
        bus.emit(CoreEvent::Index(IndexEvent::Invalidated {
            project_id: project_id.to_string(),
        }))
        .ok();
    }
}

impl ExecutionObserver for ChangeNotifier {
    fn action_finished(&self, action: &PlannedAction, report: &ActionReport) {
        self.outcome(&action.identity, action.step.local_path(), &report.outcome);
    }

    fn tier_finished(&self, completed_actions: usize, total_actions: usize) {
        self.progress(completed_actions, total_actions);
    }
}
