//! Serializable commands for callback-driven hosts.
//!
//! Editor menus and toolbar buttons live in the host. They hand the service a
//! [`HostCommand`] (usually decoded from JSON) and render the [`HostReply`];
//! progress arrives separately on the event stream.

use core_pipeline::{LineageKey, ProjectId, SyncRecord, SyncScope};
use core_sync::{
    ConflictResolution, InventoryItem, PassId, PushRequest, Resolutions, SyncPass, SyncReport,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_HISTORY_LIMIT: u32 = 20;

fn default_history_limit() -> u32 {
    DEFAULT_HISTORY_LIMIT
}

/// Manual decision for one diverged lineage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineageResolution {
    pub lineage: LineageKey,
    pub resolution: ConflictResolution,
}

pub(crate) fn into_resolutions(entries: Vec<LineageResolution>) -> Resolutions {
    entries
        .into_iter()
        .map(|entry| (entry.lineage, entry.resolution))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum HostCommand {
    StartSync {
        scope: SyncScope,
        #[serde(default)]
        resolutions: Vec<LineageResolution>,
    },
    Cancel {
        pass_id: PassId,
    },
    Push {
        request: PushRequest,
    },
    Inventory {
        scope: SyncScope,
    },
    Invalidate {
        scope: SyncScope,
    },
    RemoveLocalAsset {
        path: String,
    },
    PassStatus {
        pass_id: PassId,
    },
    History {
        project_id: ProjectId,
        #[serde(default = "default_history_limit")]
        limit: u32,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reply", rename_all = "snake_case")]
pub enum HostReply {
    /// A background pull was started; follow it on the event stream.
    Started { pass_id: PassId },
    Accepted,
    Report { report: SyncReport },
    Inventory { items: Vec<InventoryItem> },
    Removed { records: Vec<SyncRecord> },
    Pass { pass: SyncPass },
    History { passes: Vec<SyncPass> },
}

impl HostCommand {
    pub fn name(&self) -> &'static str {
        match self {
            HostCommand::StartSync { .. } => "start_sync",
            HostCommand::Cancel { .. } => "cancel",
            HostCommand::Push { .. } => "push",
            HostCommand::Inventory { .. } => "inventory",
            HostCommand::Invalidate { .. } => "invalidate",
            HostCommand::RemoveLocalAsset { .. } => "remove_local_asset",
            HostCommand::PassStatus { .. } => "pass_status",
            HostCommand::History { .. } => "history",
        }
    }
}
