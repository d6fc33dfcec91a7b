//! Editor Import/Export Surface
//!
//! The host editor owns its asset import machinery. The bridge only asks it to
//! import a published file, export an asset's bytes, enumerate the assets the
//! bridge previously loaded, and remove one.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Options forwarded to the editor's import task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportOptions {
    /// Overwrite an existing asset at the destination.
    pub replace_existing: bool,
    /// Suppress interactive import dialogs.
    pub automated: bool,
    /// Save the asset after import.
    pub save: bool,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            replace_existing: false,
            automated: true,
            save: true,
        }
    }
}

/// Metadata stored with an imported asset so it can be traced back to the
/// pipeline representation it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportManifest {
    pub representation_id: String,
    /// Display form of the identity key at import time.
    pub identity: String,
    /// Fingerprint of the representation that was imported.
    pub fingerprint: String,
    pub imported_at: DateTime<Utc>,
}

/// A request to import a published file into the editor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportRequest {
    /// Published file to read.
    pub source_path: String,
    pub format: String,
    /// Local asset path to create or replace.
    pub destination: String,
    pub manifest: ImportManifest,
    pub options: ImportOptions,
}

/// An editor-side asset as reported by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditorAsset {
    pub path: String,
    /// Fingerprint of the asset's current content.
    pub fingerprint: String,
    /// Present when the asset was imported by the bridge.
    pub manifest: Option<ImportManifest>,
}

/// Host editor import/export surface.
///
/// Import and export failures are reported as `BridgeError::OperationFailed`
/// (never retried) unless they are transient.
#[async_trait]
pub trait EditorBridge: Send + Sync {
    /// Import (or re-import in place) a published file.
    async fn import_file(&self, request: ImportRequest) -> Result<EditorAsset>;

    /// Export the current content of a local asset.
    async fn export_asset(&self, path: &str) -> Result<Bytes>;

    /// List assets under `root`, including ones the bridge did not import.
    async fn list_assets(&self, root: &str) -> Result<Vec<EditorAsset>>;

    /// Remove a local asset along with its import manifest.
    async fn remove_asset(&self, path: &str) -> Result<()>;
}
