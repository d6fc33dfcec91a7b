//! # Event Bus System
//!
//! Change notifications for the UI shell, carried over a broadcast channel.
//!
//! ## Overview
//!
//! The event bus system consists of:
//! - **Event Types**: `SyncEvent` for pass lifecycle, `AssetEvent` for the
//!   terminal outcome of every plan action, `IndexEvent` for cache resets
//! - **EventBus**: Central broadcast channel for publishing events
//! - **EventStream**: Wrapper for consuming events with filtering
//! - **EventDeduplicator**: Helper that lets consumers ignore redeliveries
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     emit      ┌───────────┐     subscribe    ┌──────────┐
//! │ Sync Engine ├──────────────>│ EventBus  ├─────────────────>│ UI shell │
//! └─────────────┘               │ (broadcast│                  └──────────┘
//! ┌─────────────┐     emit      │  channel) │     subscribe    ┌──────────┐
//! │ Sync Index  ├──────────────>│           ├─────────────────>│ Logger   │
//! └─────────────┘               └───────────┘                  └──────────┘
//! ```
//!
//! ## Delivery
//!
//! Delivery is at-least-once from the point of view of a consumer: a pass may
//! re-emit an outcome (for example after a retry resolves), and a consumer
//! that lags receives `RecvError::Lagged` and should reconcile from the
//! pass's final report. Every asset event carries the pass id and the
//! identity key so consumers can stay idempotent.
//!
//! ```rust
//! use core_runtime::events::{AssetEvent, CoreEvent, EventBus};
//!
//! # core_async::runtime::block_on(async {
//! let bus = EventBus::new(100);
//! let mut sub = bus.subscribe();
//!
//! bus.emit(CoreEvent::Asset(AssetEvent::Skipped {
//!     pass_id: "pass-1".to_string(),
//!     identity: "proj/chars/hero/heroModel/v001/fbx".to_string(),
//!     reason: "up to date".to_string(),
//! }))
//! .ok();
//!
//! let event = sub.recv().await.unwrap();
//! assert_eq!(event.description(), "Asset skipped");
//! # });
//! ```

use core_async::sync::broadcast;
use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroUsize;

pub use core_async::sync::broadcast::error::{RecvError, SendError};
pub use core_async::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
///
/// A pull over a large scope emits one event per action; subscribers that
/// fall further behind than this receive `RecvError::Lagged`.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 256;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event enum published through the event bus.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Sync pass lifecycle
    Sync(SyncEvent),
    /// Per-action outcomes
    Asset(AssetEvent),
    /// Cache/index state changes
    Index(IndexEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Sync(e) => e.description(),
            CoreEvent::Asset(e) => e.description(),
            CoreEvent::Index(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Sync(SyncEvent::Failed { .. }) => EventSeverity::Error,
            CoreEvent::Asset(AssetEvent::Failed { .. }) => EventSeverity::Error,
            CoreEvent::Asset(AssetEvent::Conflicted { .. }) => EventSeverity::Warning,
            CoreEvent::Asset(AssetEvent::DependencyFailed { .. }) => EventSeverity::Warning,
            CoreEvent::Index(IndexEvent::Loaded { degraded: true, .. }) => EventSeverity::Warning,
            CoreEvent::Sync(SyncEvent::Completed { .. }) => EventSeverity::Info,
            CoreEvent::Asset(AssetEvent::Imported { .. })
            | CoreEvent::Asset(AssetEvent::Published { .. }) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }

    /// Pass that produced the event, when it belongs to one.
    pub fn pass_id(&self) -> Option<&str> {
        match self {
            CoreEvent::Sync(e) => Some(e.pass_id()),
            CoreEvent::Asset(e) => Some(e.pass_id()),
            CoreEvent::Index(_) => None,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Sync Events
// ============================================================================

/// Lifecycle of a sync pass.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum SyncEvent {
    /// Pass planned and about to dispatch.
    Started {
        pass_id: String,
        project_id: String,
        /// `pull` or `push`
        kind: String,
        planned_actions: u64,
    },
    /// A dependency tier finished.
    Progress {
        pass_id: String,
        completed_actions: u64,
        total_actions: u64,
        /// Progress percentage (0-100).
        percent: u8,
    },
    /// Every action reached a terminal outcome.
    Completed {
        pass_id: String,
        imported: u64,
        published: u64,
        skipped: u64,
        conflicted: u64,
        failed: u64,
        dependency_failed: u64,
        duration_ms: u64,
    },
    /// The pass itself failed (identity ambiguity, unreachable server).
    Failed {
        pass_id: String,
        message: String,
        recoverable: bool,
    },
    /// Cancellation was requested; undispatched actions were not run.
    Cancelled {
        pass_id: String,
        completed_actions: u64,
        cancelled_actions: u64,
    },
}

impl SyncEvent {
    fn description(&self) -> &str {
        match self {
            SyncEvent::Started { .. } => "Sync started",
            SyncEvent::Progress { .. } => "Sync in progress",
            SyncEvent::Completed { .. } => "Sync completed",
            SyncEvent::Failed { .. } => "Sync failed",
            SyncEvent::Cancelled { .. } => "Sync cancelled",
        }
    }

    pub fn pass_id(&self) -> &str {
        match self {
            SyncEvent::Started { pass_id, .. }
            | SyncEvent::Progress { pass_id, .. }
            | SyncEvent::Completed { pass_id, .. }
            | SyncEvent::Failed { pass_id, .. }
            | SyncEvent::Cancelled { pass_id, .. } => pass_id,
        }
    }
}

// ============================================================================
// Asset Events
// ============================================================================

/// Terminal outcome of one plan action. `identity` is the display form of the
/// identity key (`project/path/product/vNNN/format`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum AssetEvent {
    Imported {
        pass_id: String,
        identity: String,
        representation_id: String,
        local_path: String,
        fingerprint: String,
    },
    Published {
        pass_id: String,
        identity: String,
        representation_id: String,
        local_path: String,
        version: u32,
    },
    Skipped {
        pass_id: String,
        identity: String,
        reason: String,
    },
    /// Both sides changed since the last sync; needs a manual decision.
    Conflicted {
        pass_id: String,
        identity: String,
        local_path: String,
        local_fingerprint: String,
        remote_fingerprint: String,
    },
    Failed {
        pass_id: String,
        identity: String,
        reason: String,
    },
    Cancelled {
        pass_id: String,
        identity: String,
    },
    DependencyFailed {
        pass_id: String,
        identity: String,
        dependency: String,
    },
}

impl AssetEvent {
    fn description(&self) -> &str {
        match self {
            AssetEvent::Imported { .. } => "Asset imported",
            AssetEvent::Published { .. } => "Asset published",
            AssetEvent::Skipped { .. } => "Asset skipped",
            AssetEvent::Conflicted { .. } => "Asset diverged",
            AssetEvent::Failed { .. } => "Asset action failed",
            AssetEvent::Cancelled { .. } => "Asset action cancelled",
            AssetEvent::DependencyFailed { .. } => "Asset dependency failed",
        }
    }

    pub fn pass_id(&self) -> &str {
        match self {
            AssetEvent::Imported { pass_id, .. }
            | AssetEvent::Published { pass_id, .. }
            | AssetEvent::Skipped { pass_id, .. }
            | AssetEvent::Conflicted { pass_id, .. }
            | AssetEvent::Failed { pass_id, .. }
            | AssetEvent::Cancelled { pass_id, .. }
            | AssetEvent::DependencyFailed { pass_id, .. } => pass_id,
        }
    }

    pub fn identity(&self) -> &str {
        match self {
            AssetEvent::Imported { identity, .. }
            | AssetEvent::Published { identity, .. }
            | AssetEvent::Skipped { identity, .. }
            | AssetEvent::Conflicted { identity, .. }
            | AssetEvent::Failed { identity, .. }
            | AssetEvent::Cancelled { identity, .. }
            | AssetEvent::DependencyFailed { identity, .. } => identity,
        }
    }
}

// ============================================================================
// Index Events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum IndexEvent {
    /// Index loaded from disk. `degraded` means the file was unreadable and
    /// the index started empty.
    Loaded { records: u64, degraded: bool },
    /// Cached project metadata dropped; the next pull re-fetches it.
    Invalidated { project_id: String },
}

impl IndexEvent {
    fn description(&self) -> &str {
        match self {
            IndexEvent::Loaded { .. } => "Sync index loaded",
            IndexEvent::Invalidated { .. } => "Project metadata invalidated",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central event bus for publishing and subscribing to events.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all current subscribers.
    ///
    /// Returns the number of subscribers that received it. Errors when
    /// nobody is subscribed; callers usually discard that with `.ok()`.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Creates a new subscriber that receives events emitted from now on.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream
// ============================================================================

type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// A filtered view over a subscription.
///
/// ```rust
/// use core_runtime::events::{CoreEvent, EventBus, EventStream};
///
/// let bus = EventBus::new(16);
/// let outcomes = EventStream::new(bus.subscribe())
///     .filter(|event| matches!(event, CoreEvent::Asset(_)));
/// ```
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Only events matching `predicate` are returned by `recv()`.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    /// Restricts the stream to events of one pass.
    pub fn for_pass(self, pass_id: impl Into<String>) -> Self {
        let pass_id = pass_id.into();
        self.filter(move |event| event.pass_id() == Some(pass_id.as_str()))
    }

    /// Receives the next event that passes the filter.
    ///
    /// # Errors
    ///
    /// `RecvError::Lagged(n)` if the subscriber fell behind by `n` events,
    /// `RecvError::Closed` once the bus is dropped.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            match &self.filter {
                Some(filter) if !filter(&event) => continue,
                _ => return Ok(event),
            }
        }
    }

    /// Attempts to receive an event without waiting.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => match &self.filter {
                    Some(filter) if !filter(&event) => continue,
                    _ => return Some(Ok(event)),
                },
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

// ============================================================================
// Deduplication
// ============================================================================

/// Remembers recently seen `(pass, identity, outcome)` triples so a consumer
/// can drop redelivered asset events.
pub struct EventDeduplicator {
    seen: LruCache<(String, String, String), ()>,
}

impl EventDeduplicator {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            seen: LruCache::new(capacity),
        }
    }

    /// True the first time an asset event is observed. Non-asset events
    /// always pass.
    pub fn first_delivery(&mut self, event: &CoreEvent) -> bool {
        let CoreEvent::Asset(asset) = event else {
            return true;
        };
        let key = (
            asset.pass_id().to_string(),
            asset.identity().to_string(),
            asset.description().to_string(),
        );
        self.seen.put(key, ()).is_none()
    }
}

impl Default for EventDeduplicator {
    fn default() -> Self {
        Self::new(4096)
    }
}

// ============================================================================
// Tests
// ============================================================================
