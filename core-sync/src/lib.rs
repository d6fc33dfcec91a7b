//! # Asset Sync Engine
//!
//! Keeps the editor's local assets and the production pipeline's published
//! representations in step.
//!
//! ## Overview
//!
//! - A **pull** brings the latest approved (or wip) representations of a
//!   scope into the editor, in dependency order.
//! - A **push** exports one local asset and commits it as the next version of
//!   its product.
//! - Every action ends in exactly one [`ActionOutcome`], reported both as an
//!   event and in the pass's [`SyncReport`].
//!
//! ## Components
//!
//! - **Index** (`index`): per-lineage sync records, persisted as JSON
//! - **Metadata cache** (`metadata`): TTL-bounded entity snapshots per project
//! - **Resolver** (`resolver`): matches representations to local assets
//! - **Planner** (`planner`): the per-representation decision table and tiers
//! - **Worker pool** (`executor`): bounded, retrying, cancellable dispatch
//! - **Engine** (`engine`): pull, push, inventory and removal
//! - **Coordinator** (`coordinator`): background passes and pass history
//! - **Notifier** (`notifier`): outcome events on the core event bus

pub mod config;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod executor;
pub mod index;
pub mod job;
pub mod metadata;
pub mod notifier;
pub mod planner;
pub mod report;
pub mod repository;
pub mod resolver;

pub use config::SyncConfig;
pub use coordinator::{SyncCoordinator, SyncHandle, SyncRequest};
pub use engine::{AssetStatus, InventoryItem, PushRequest, SyncEngine};
pub use error::{Result, SyncError};
pub use executor::{ActionRunner, ExecutionObserver, WorkerPool};
pub use index::{IndexLoadStatus, IndexSnapshot, SyncIndex, INDEX_SCHEMA_VERSION};
pub use job::{PassId, PassProgress, PassStats, SyncKind, SyncPass, SyncStatus};
pub use metadata::MetadataCache;
pub use notifier::ChangeNotifier;
pub use planner::{
    ConflictResolution, Orphan, PlanStep, PlannedAction, Resolutions, SyncPlan,
};
pub use report::{ActionOutcome, ActionReport, SyncReport};
pub use repository::{SqliteSyncPassRepository, SyncPassRepository};
pub use resolver::{Candidate, Resolution, ResolvedEntry};
