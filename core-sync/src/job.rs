//! # Sync Pass State Machine
//!
//! Lifecycle of one pull or push pass, persisted as pass history.
//!
//! ```text
//! Pending → Running → Completed
//!     ↓         ↓
//!     └──────→ Failed
//!     └──────→ Cancelled
//! ```
//!
//! ```rust
//! use core_sync::{PassStats, SyncKind, SyncPass, SyncStatus};
//!
//! let pass = SyncPass::new("P", SyncKind::Pull);
//! let mut pass = pass.start().unwrap();
//! pass.update_progress(3, 6, "Tier 1").unwrap();
//! let pass = pass.complete(PassStats::default()).unwrap();
//! assert_eq!(pass.status, SyncStatus::Completed);
//! ```

use crate::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// ID Types
// ============================================================================

/// Unique identifier for a sync pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PassId(Uuid);

impl PassId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// # Errors
    ///
    /// Returns an error if the string is not a valid UUID
    pub fn from_string(s: &str) -> Result<Self> {
        Ok(Self(
            Uuid::parse_str(s).map_err(|e| SyncError::InvalidPassId(e.to_string()))?,
        ))
    }

    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for PassId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for PassId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for PassId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

// ============================================================================
// Status Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Pending,
    Running,
    Completed,
    /// The pass itself failed before or while dispatching
    Failed,
    Cancelled,
}

impl SyncStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SyncStatus::Completed | SyncStatus::Failed | SyncStatus::Cancelled
        )
    }

    pub fn is_active(&self) -> bool {
        matches!(self, SyncStatus::Pending | SyncStatus::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Running => "running",
            SyncStatus::Completed => "completed",
            SyncStatus::Failed => "failed",
            SyncStatus::Cancelled => "cancelled",
        }
    }
}

impl FromStr for SyncStatus {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(SyncStatus::Pending),
            "running" => Ok(SyncStatus::Running),
            "completed" => Ok(SyncStatus::Completed),
            "failed" => Ok(SyncStatus::Failed),
            "cancelled" => Ok(SyncStatus::Cancelled),
            _ => Err(SyncError::InvalidStatus(s.to_string())),
        }
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Direction of a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncKind {
    /// Pipeline → editor
    Pull,
    /// Editor → pipeline
    Push,
}

impl SyncKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncKind::Pull => "pull",
            SyncKind::Push => "push",
        }
    }
}

impl FromStr for SyncKind {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "pull" => Ok(SyncKind::Pull),
            "push" => Ok(SyncKind::Push),
            _ => Err(SyncError::InvalidSyncKind(s.to_string())),
        }
    }
}

impl std::fmt::Display for SyncKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Progress Types
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassProgress {
    pub completed_actions: u64,
    pub total_actions: u64,
    /// Progress percentage (0-100)
    pub percent: u8,
    pub phase: String,
}

impl PassProgress {
    pub fn new() -> Self {
        Self {
            completed_actions: 0,
            total_actions: 0,
            percent: 0,
            phase: "Planning".to_string(),
        }
    }

    pub fn update(&mut self, completed_actions: u64, total_actions: u64, phase: &str) {
        self.completed_actions = completed_actions;
        self.total_actions = total_actions;
        self.phase = phase.to_string();
        self.percent = percent_of(completed_actions, total_actions);
    }
}

impl Default for PassProgress {
    fn default() -> Self {
        Self::new()
    }
}

/// Percentage capped at 100; zero when there is nothing to do.
pub fn percent_of(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    ((done as f64 / total as f64) * 100.0).min(100.0) as u8
}

/// Outcome counts of a finished pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassStats {
    pub imported: u64,
    pub published: u64,
    pub skipped: u64,
    pub conflicted: u64,
    pub failed: u64,
    pub dependency_failed: u64,
    pub cancelled: u64,
}

impl PassStats {
    pub fn total(&self) -> u64 {
        self.imported
            + self.published
            + self.skipped
            + self.conflicted
            + self.failed
            + self.dependency_failed
            + self.cancelled
    }

    /// Actions that changed something on either side.
    pub fn applied(&self) -> u64 {
        self.imported + self.published
    }
}

// ============================================================================
// Sync Pass Entity
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncPass {
    pub id: PassId,
    pub project_id: String,
    pub kind: SyncKind,
    pub status: SyncStatus,
    pub progress: PassProgress,
    /// Present once the pass completed or was cancelled
    pub stats: Option<PassStats>,
    pub error_message: Option<String>,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
}

impl SyncPass {
    pub fn new(project_id: impl Into<String>, kind: SyncKind) -> Self {
        Self::with_id(PassId::new(), project_id, kind)
    }

    pub fn with_id(id: PassId, project_id: impl Into<String>, kind: SyncKind) -> Self {
        Self {
            id,
            project_id: project_id.into(),
            kind,
            status: SyncStatus::Pending,
            progress: PassProgress::new(),
            stats: None,
            error_message: None,
            created_at: current_timestamp(),
            started_at: None,
            completed_at: None,
        }
    }

    /// # Errors
    ///
    /// Returns an error if the pass is not `Pending`
    pub fn start(mut self) -> Result<Self> {
        self.validate_transition(SyncStatus::Running)?;
        self.status = SyncStatus::Running;
        self.started_at = Some(current_timestamp());
        self.progress.phase = "Dispatching".to_string();
        Ok(self)
    }

    /// # Errors
    ///
    /// Returns an error if the pass is not `Running`
    pub fn update_progress(
        &mut self,
        completed_actions: u64,
        total_actions: u64,
        phase: &str,
    ) -> Result<()> {
        if self.status != SyncStatus::Running {
            return Err(SyncError::InvalidStateTransition {
                from: self.status.as_str().to_string(),
                to: "update_progress".to_string(),
                reason: "Pass must be running to update progress".to_string(),
            });
        }

        self.progress
            .update(completed_actions, total_actions, phase);
        Ok(())
    }

    pub fn complete(mut self, stats: PassStats) -> Result<Self> {
        self.validate_transition(SyncStatus::Completed)?;
        self.status = SyncStatus::Completed;
        self.completed_at = Some(current_timestamp());
        self.stats = Some(stats);
        self.progress.percent = 100;
        self.progress.phase = "Completed".to_string();
        Ok(self)
    }

    pub fn fail(mut self, error_message: impl Into<String>) -> Result<Self> {
        self.validate_transition(SyncStatus::Failed)?;
        self.status = SyncStatus::Failed;
        self.completed_at = Some(current_timestamp());
        self.error_message = Some(error_message.into());
        self.progress.phase = "Failed".to_string();
        Ok(self)
    }

    /// Cancelled passes keep the stats of whatever ran before cancellation.
    pub fn cancel(mut self, stats: Option<PassStats>) -> Result<Self> {
        self.validate_transition(SyncStatus::Cancelled)?;
        self.status = SyncStatus::Cancelled;
        self.completed_at = Some(current_timestamp());
        self.stats = stats;
        self.progress.phase = "Cancelled".to_string();
        Ok(self)
    }

    pub fn duration_secs(&self) -> Option<u64> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some((end - start).max(0) as u64),
            _ => None,
        }
    }

    fn validate_transition(&self, to: SyncStatus) -> Result<()> {
        let valid = matches!(
            (self.status, to),
            (SyncStatus::Pending, SyncStatus::Running)
                | (SyncStatus::Pending, SyncStatus::Cancelled)
                | (SyncStatus::Pending, SyncStatus::Failed)
                | (SyncStatus::Running, SyncStatus::Completed)
                | (SyncStatus::Running, SyncStatus::Failed)
                | (SyncStatus::Running, SyncStatus::Cancelled)
        );

        if !valid {
            return Err(SyncError::InvalidStateTransition {
                from: self.status.as_str().to_string(),
                to: to.as_str().to_string(),
                reason: format!(
                    "Cannot transition from {} to {}",
                    self.status.as_str(),
                    to.as_str()
                ),
            });
        }

        Ok(())
    }
}

fn current_timestamp() -> i64 {
    chrono::Utc::now().timestamp()
}

// ============================================================================
// Tests
// ============================================================================
