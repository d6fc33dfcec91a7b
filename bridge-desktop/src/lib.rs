//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for desktop hosts
//! (macOS, Windows, Linux).
//!
//! ## Overview
//!
//! - `HttpClient` using `reqwest`
//! - `FileSystemAccess` using `tokio::fs` through `core-async`
//! - `EditorBridge` backed by a plain content directory with sidecar import
//!   manifests, used for headless runs and by hosts without a native importer
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{FileSystemEditor, ReqwestHttpClient, TokioFileSystem};
//!
//! let http_client = ReqwestHttpClient::new()?;
//! let fs = TokioFileSystem::new();
//! let editor = FileSystemEditor::new("/projects/hero/Content");
//! ```

mod editor;
mod filesystem;
mod http;

pub use editor::FileSystemEditor;
pub use filesystem::TokioFileSystem;
pub use http::ReqwestHttpClient;
