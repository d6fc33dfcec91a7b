//! # Core Configuration Module
//!
//! Builder-based configuration for the pipeline bridge.
//!
//! ## Overview
//!
//! `CoreConfig` holds every path, endpoint and bridge the bridge needs. The
//! builder fails fast when a required capability is missing so that a host
//! learns about a wiring mistake at startup instead of during a sync pass.
//!
//! ## Required Dependencies
//!
//! - `EditorBridge` - the host editor's import/export surface
//! - a pipeline connection: either an injected `PipelineApi` or an endpoint
//!   URL that the service layer turns into a JSON-RPC client
//!
//! ## Optional Dependencies (with platform defaults)
//!
//! - `HttpClient` - HTTP operations (desktop default: reqwest)
//! - `FileSystemAccess` - index persistence (desktop default: tokio fs)
//! - `Clock` - staleness windows and timestamps (default: system clock)
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::CoreConfig;
//! use std::sync::Arc;
//!
//! let config = CoreConfig::builder()
//!     .data_dir("/studio/.pipeline-bridge")
//!     .content_root("Pipeline")
//!     .pipeline_endpoint("https://pipeline.studio.internal/rpc")
//!     .api_key(std::env::var("PIPELINE_API_KEY")?)
//!     .editor(Arc::new(MyEditorBridge::new()))
//!     .build()?;
//! ```
//!
//! ## Error Handling
//!
//! ```should_panic
//! use core_runtime::config::CoreConfig;
//!
//! // No editor bridge was injected.
//! let config = CoreConfig::builder()
//!     .data_dir("/tmp/bridge")
//!     .pipeline_endpoint("https://pipeline.example.com/rpc")
//!     .build()
//!     .expect("Should fail - missing editor bridge");
//! ```

use crate::error::{Error, Result};
use bridge_traits::{Clock, EditorBridge, FileSystemAccess, HttpClient, PipelineApi, SystemClock};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// File name of the persisted sync index inside the data directory.
pub const INDEX_FILE_NAME: &str = "sync-index.json";

/// File name of the sync pass history database inside the data directory.
pub const HISTORY_DB_NAME: &str = "sync-history.db";

/// Core configuration for the pipeline bridge.
///
/// Use [`CoreConfigBuilder`] to construct instances.
#[derive(Clone)]
pub struct CoreConfig {
    /// Directory holding the sync index and pass history
    pub data_dir: PathBuf,

    /// Persisted sync index
    pub index_path: PathBuf,

    /// SQLite database for sync pass history
    pub database_path: PathBuf,

    /// Editor-side folder that pulled assets are imported under
    pub content_root: String,

    /// Name recorded as the author of pushed versions
    pub author: String,

    /// Pipeline server connection settings
    pub pipeline: PipelineEndpoint,

    /// Host editor import/export surface (required)
    pub editor: Arc<dyn EditorBridge>,

    /// Pipeline API client (optional when an endpoint URL is configured)
    pub pipeline_api: Option<Arc<dyn PipelineApi>>,

    /// HTTP client for the pipeline endpoint (optional with desktop default)
    pub http_client: Option<Arc<dyn HttpClient>>,

    /// File system access abstraction (optional with desktop default)
    pub file_system: Option<Arc<dyn FileSystemAccess>>,

    /// Time source
    pub clock: Arc<dyn Clock>,

    /// Feature flags
    pub features: FeatureFlags,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreConfig")
            .field("data_dir", &self.data_dir)
            .field("index_path", &self.index_path)
            .field("database_path", &self.database_path)
            .field("content_root", &self.content_root)
            .field("author", &self.author)
            .field("pipeline", &self.pipeline)
            .field("editor", &"EditorBridge { ... }")
            .field(
                "pipeline_api",
                &self.pipeline_api.as_ref().map(|_| "PipelineApi { ... }"),
            )
            .field(
                "http_client",
                &self.http_client.as_ref().map(|_| "HttpClient { ... }"),
            )
            .field(
                "file_system",
                &self
                    .file_system
                    .as_ref()
                    .map(|_| "FileSystemAccess { ... }"),
            )
            .field("features", &self.features)
            .finish()
    }
}

/// Connection settings for the pipeline server.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct PipelineEndpoint {
    /// JSON-RPC endpoint URL
    pub url: Option<String>,
    /// Server API key, sent as a bearer token
    pub api_key: Option<String>,
    /// Per-request timeout
    pub request_timeout: Option<Duration>,
}

impl std::fmt::Debug for PipelineEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineEndpoint")
            .field("url", &self.url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

/// Feature flags control optional functionality.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureFlags {
    /// Persist the sync index between sessions
    pub persist_index: bool,

    /// Record sync passes in the history database
    pub enable_pass_history: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            persist_index: true,
            enable_pass_history: true,
        }
    }
}

impl CoreConfig {
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Validates paths, endpoint and feature/bridge combinations.
    pub fn validate(&self) -> Result<()> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(Error::Config("Data directory cannot be empty".to_string()));
        }

        if self.content_root.contains("..") {
            return Err(Error::Config(format!(
                "Content root must not contain '..': {}",
                self.content_root
            )));
        }

        if self.author.trim().is_empty() {
            return Err(Error::Config("Author cannot be empty".to_string()));
        }

        if let Some(url) = &self.pipeline.url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(Error::Config(format!(
                    "Pipeline endpoint must be an http(s) URL: {}",
                    url
                )));
            }
        }

        if self.pipeline_api.is_none() && self.pipeline.url.is_none() {
            return Err(Error::CapabilityMissing {
                capability: "PipelineApi".to_string(),
                message: "Inject a PipelineApi implementation or configure a pipeline endpoint URL."
                    .to_string(),
            });
        }

        if self.pipeline_api.is_none() && self.http_client.is_none() {
            return Err(Error::CapabilityMissing {
                capability: "HttpClient".to_string(),
                message: "A pipeline endpoint URL needs an HttpClient. \
                          Desktop: enable the 'desktop-shims' feature. \
                          Otherwise inject an HttpClient implementation."
                    .to_string(),
            });
        }

        if self.features.persist_index && self.file_system.is_none() {
            return Err(Error::CapabilityMissing {
                capability: "FileSystemAccess".to_string(),
                message: "Index persistence is enabled but no FileSystemAccess was provided. \
                          Disable `persist_index` or inject a FileSystemAccess implementation."
                    .to_string(),
            });
        }

        Ok(())
    }
}

#[cfg(feature = "desktop-shims")]
fn provide_default_http_client() -> Result<Option<Arc<dyn HttpClient>>> {
    let client = bridge_desktop::ReqwestHttpClient::new()
        .map_err(|e| Error::Internal(format!("Failed to create default HttpClient: {}", e)))?;
    Ok(Some(Arc::new(client)))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_http_client() -> Result<Option<Arc<dyn HttpClient>>> {
    Ok(None)
}

#[cfg(feature = "desktop-shims")]
fn provide_default_file_system(data_dir: &std::path::Path) -> Option<Arc<dyn FileSystemAccess>> {
    Some(Arc::new(bridge_desktop::TokioFileSystem::with_data_directory(
        data_dir.to_path_buf(),
    )))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_file_system(_data_dir: &std::path::Path) -> Option<Arc<dyn FileSystemAccess>> {
    None
}

/// Builder for [`CoreConfig`].
#[derive(Default)]
pub struct CoreConfigBuilder {
    data_dir: Option<PathBuf>,
    index_path: Option<PathBuf>,
    database_path: Option<PathBuf>,
    content_root: Option<String>,
    author: Option<String>,
    pipeline: PipelineEndpoint,
    editor: Option<Arc<dyn EditorBridge>>,
    pipeline_api: Option<Arc<dyn PipelineApi>>,
    http_client: Option<Arc<dyn HttpClient>>,
    file_system: Option<Arc<dyn FileSystemAccess>>,
    clock: Option<Arc<dyn Clock>>,
    features: FeatureFlags,
}

impl CoreConfigBuilder {
    pub fn data_dir<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.data_dir = Some(path.into());
        self
    }

    /// Overrides `<data_dir>/sync-index.json`.
    pub fn index_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.index_path = Some(path.into());
        self
    }

    /// Overrides `<data_dir>/sync-history.db`.
    pub fn database_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.database_path = Some(path.into());
        self
    }

    pub fn content_root(mut self, root: impl Into<String>) -> Self {
        self.content_root = Some(root.into());
        self
    }

    pub fn author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    pub fn pipeline_endpoint(mut self, url: impl Into<String>) -> Self {
        self.pipeline.url = Some(url.into());
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.pipeline.api_key = Some(key.into());
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.pipeline.request_timeout = Some(timeout);
        self
    }

    pub fn editor(mut self, editor: Arc<dyn EditorBridge>) -> Self {
        self.editor = Some(editor);
        self
    }

    pub fn pipeline_api(mut self, api: Arc<dyn PipelineApi>) -> Self {
        self.pipeline_api = Some(api);
        self
    }

    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    pub fn file_system(mut self, fs: Arc<dyn FileSystemAccess>) -> Self {
        self.file_system = Some(fs);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn persist_index(mut self, enabled: bool) -> Self {
        self.features.persist_index = enabled;
        self
    }

    pub fn enable_pass_history(mut self, enabled: bool) -> Self {
        self.features.enable_pass_history = enabled;
        self
    }

    /// Builds and validates the configuration.
    ///
    /// # Errors
    ///
    /// - `Error::Config` when the data directory is missing or a value is invalid
    /// - `Error::CapabilityMissing` when a required bridge was not provided
    pub fn build(self) -> Result<CoreConfig> {
        let data_dir = self
            .data_dir
            .ok_or_else(|| Error::Config("Data directory is required".to_string()))?;

        let editor = self.editor.ok_or_else(|| Error::CapabilityMissing {
            capability: "EditorBridge".to_string(),
            message: "The host editor must provide its import/export surface. \
                      Headless runs can use bridge_desktop::FileSystemEditor."
                .to_string(),
        })?;

        let http_client = match self.http_client {
            Some(client) => Some(client),
            None if self.pipeline_api.is_none() => provide_default_http_client()?,
            None => None,
        };

        let file_system = self
            .file_system
            .or_else(|| provide_default_file_system(&data_dir));

        let config = CoreConfig {
            index_path: self
                .index_path
                .unwrap_or_else(|| data_dir.join(INDEX_FILE_NAME)),
            database_path: self
                .database_path
                .unwrap_or_else(|| data_dir.join(HISTORY_DB_NAME)),
            data_dir,
            content_root: self.content_root.unwrap_or_else(|| "Pipeline".to_string()),
            author: self.author.unwrap_or_else(default_author),
            pipeline: self.pipeline,
            editor,
            pipeline_api: self.pipeline_api,
            http_client,
            file_system,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            features: self.features,
        };

        config.validate()?;
        Ok(config)
    }
}

fn default_author() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "pipeline-bridge".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::editor::{EditorAsset, ImportRequest};
    use bridge_traits::error::{BridgeError, Result as BridgeResult};
    use bridge_traits::pipeline::{
        EntityFilter, EntityRecord, NewRepresentation, NewVersion, RepresentationRecord,
        VersionRecord,
    };
    use bytes::Bytes;

    struct NullEditor;

    #[async_trait]
    impl EditorBridge for NullEditor {
        async fn import_file(&self, _request: ImportRequest) -> BridgeResult<EditorAsset> {
            Err(BridgeError::NotAvailable("import".into()))
        }
        async fn export_asset(&self, _path: &str) -> BridgeResult<Bytes> {
            Err(BridgeError::NotAvailable("export".into()))
        }
        async fn list_assets(&self, _root: &str) -> BridgeResult<Vec<EditorAsset>> {
            Ok(Vec::new())
        }
        async fn remove_asset(&self, _path: &str) -> BridgeResult<()> {
            Ok(())
        }
    }

    struct NullPipeline;

    #[async_trait]
    impl PipelineApi for NullPipeline {
        async fn list_entities(
            &self,
            _project: &str,
            _filter: &EntityFilter,
        ) -> BridgeResult<Vec<EntityRecord>> {
            Ok(Vec::new())
        }
        async fn get_latest_version(
            &self,
            _project: &str,
            _product_id: &str,
        ) -> BridgeResult<Option<VersionRecord>> {
            Ok(None)
        }
        async fn create_version(
            &self,
            _project: &str,
            _request: NewVersion,
        ) -> BridgeResult<VersionRecord> {
            Err(BridgeError::NotAvailable("create_version".into()))
        }
        async fn create_representation(
            &self,
            _project: &str,
            _request: NewRepresentation,
        ) -> BridgeResult<RepresentationRecord> {
            Err(BridgeError::NotAvailable("create_representation".into()))
        }
    }

    fn base() -> CoreConfigBuilder {
        CoreConfig::builder()
            .data_dir("/tmp/pipeline-bridge")
            .editor(Arc::new(NullEditor))
            .pipeline_api(Arc::new(NullPipeline))
            .persist_index(false)
            .author("artist")
    }

    #[test]
    fn test_builder_defaults_paths_from_data_dir() {
        let config = base().build().unwrap();

        assert_eq!(
            config.index_path,
            PathBuf::from("/tmp/pipeline-bridge/sync-index.json")
        );
        assert_eq!(
            config.database_path,
            PathBuf::from("/tmp/pipeline-bridge/sync-history.db")
        );
        assert_eq!(config.content_root, "Pipeline");
    }

    #[test]
    fn test_missing_editor_is_capability_error() {
        let result = CoreConfig::builder()
            .data_dir("/tmp/pipeline-bridge")
            .pipeline_api(Arc::new(NullPipeline))
            .build();

        match result {
            Err(Error::CapabilityMissing { capability, .. }) => {
                assert_eq!(capability, "EditorBridge")
            }
            other => panic!("expected CapabilityMissing, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_missing_data_dir() {
        let result = CoreConfig::builder()
            .editor(Arc::new(NullEditor))
            .pipeline_api(Arc::new(NullPipeline))
            .build();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_invalid_endpoint_rejected() {
        let result = base().pipeline_endpoint("ftp://pipeline").build();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_persist_index_requires_file_system() {
        let mut config = base().build().unwrap();
        config.features.persist_index = true;
        config.file_system = None;

        assert!(matches!(
            config.validate(),
            Err(Error::CapabilityMissing { .. })
        ));
    }

    #[test]
    fn test_debug_redacts_api_key() {
        let config = base().api_key("super-secret").build().unwrap();
        let debug = format!("{:?}", config);

        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("[REDACTED]"));
    }
}
