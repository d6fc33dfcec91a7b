//! # Host Bridge Traits
//!
//! Capabilities the pipeline bridge needs from its environment.
//!
//! ## Overview
//!
//! The sync engine never talks to the pipeline server, the editor or the disk
//! directly. Each of those is a trait defined here and implemented per host:
//! `bridge-desktop` ships file-system and HTTP adapters plus a file-backed
//! editor, `provider-rpc` implements the pipeline API over JSON-RPC, and an
//! editor plugin supplies its own [`EditorBridge`](editor::EditorBridge).
//!
//! ## Traits
//!
//! ### Pipeline & Editor
//! - [`PipelineApi`](pipeline::PipelineApi) - Entity listings, version and representation commits
//! - [`EditorBridge`](editor::EditorBridge) - Import, export, listing and removal of local assets
//!
//! ### Networking & I/O
//! - [`HttpClient`](http::HttpClient) - Async HTTP with retry policy
//! - [`FileSystemAccess`](storage::FileSystemAccess) - Index persistence and local files
//!
//! ### Utilities
//! - [`Clock`](time::Clock) - Time source for deterministic staleness windows
//! - [`LoggerSink`](time::LoggerSink) - Forward structured logs to the host log
//!
//! ## Error Handling
//!
//! All bridge traits use [`BridgeError`](error::BridgeError). Implementations
//! classify failures so the worker pool can tell retryable ones
//! (`Transient`, `Timeout`) from hard rejections (`Conflict`, `OperationFailed`).
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync`; plan actions call them from
//! concurrent tasks.

pub mod editor;
pub mod error;
pub mod http;
pub mod pipeline;
pub mod storage;
pub mod time;

pub use error::BridgeError;

pub use editor::{EditorAsset, EditorBridge, ImportManifest, ImportOptions, ImportRequest};
pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, RetryPolicy};
pub use pipeline::{
    EntityFilter, EntityKind, EntityRecord, NewRepresentation, NewVersion, NodeRecord,
    PipelineApi, ProductRecord, ProjectRecord, RepresentationRecord, VersionRecord,
};
pub use storage::{FileMetadata, FileSystemAccess};
pub use time::{Clock, ConsoleLogger, LogEntry, LogLevel, LoggerSink, SystemClock};
