//! Core service façade and bootstrap helpers.
//!
//! This crate wires a validated [`CoreConfig`] into a running bridge: it
//! loads the sync index, connects the pipeline client, opens the pass
//! history database and exposes the operations a host editor calls from its
//! menus. Desktop builds enable the `desktop-shims` feature so that the HTTP
//! client and file system default to the `bridge-desktop` adapters.
//!
//! ```ignore
//! let service = BridgeService::new(config).await?;
//! let mut events = service.subscribe_events();
//! let handle = service.start_sync(SyncScope::project("P")).await?;
//! let report = handle.wait().await?;
//! ```

pub mod command;
pub mod error;

pub use command::{HostCommand, HostReply, LineageResolution, DEFAULT_HISTORY_LIMIT};
pub use error::{CoreError, Result};

use std::sync::Arc;

use bridge_traits::pipeline::PipelineApi;
use core_pipeline::{ProjectId, SyncRecord, SyncScope};
use core_runtime::config::CoreConfig;
use core_runtime::events::{CoreEvent, EventBus, IndexEvent, Receiver};
use core_sync::{
    InventoryItem, PassId, PushRequest, SqliteSyncPassRepository, SyncConfig, SyncCoordinator,
    SyncEngine, SyncHandle, SyncIndex, SyncPass, SyncReport, SyncRequest,
};
use provider_rpc::RpcPipelineClient;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::{debug, info, instrument};

/// Events buffered per subscriber before slow subscribers start lagging.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Primary façade exposed to host applications.
#[derive(Clone)]
pub struct BridgeService {
    config: Arc<CoreConfig>,
    event_bus: EventBus,
    index: Arc<SyncIndex>,
    coordinator: SyncCoordinator,
}

impl BridgeService {
    /// Bootstrap the bridge from a validated configuration.
    ///
    /// # Errors
    ///
    /// - `Runtime` if no pipeline connection can be built
    /// - `Sync` if the derived sync configuration is invalid
    /// - `InitializationFailed` if the pass history database cannot be opened
    pub async fn new(config: CoreConfig) -> Result<Self> {
        Self::with_event_bus(config, EventBus::new(DEFAULT_EVENT_CAPACITY)).await
    }

    /// Like [`BridgeService::new`], publishing on a bus the host already
    /// subscribed to, so startup events such as the index load are not lost.
    pub async fn with_event_bus(config: CoreConfig, event_bus: EventBus) -> Result<Self> {
        let index = Arc::new(load_index(&config).await);
        let status = index.load_status();
        event_bus
            .emit(CoreEvent::Index(IndexEvent::Loaded {
                records: status.records as u64,
                degraded: status.degraded,
            }))
            .ok();

        let api = pipeline_api(&config)?;
        let sync_config = SyncConfig::default().with_content_root(config.content_root.clone());
        let engine = SyncEngine::new(
            sync_config,
            api,
            config.editor.clone(),
            index.clone(),
            event_bus.clone(),
            config.clock.clone(),
        )?
        .with_author(config.author.clone());

        let repository = SqliteSyncPassRepository::new(open_history(&config).await?);
        repository.initialize().await?;
        let coordinator = SyncCoordinator::new(Arc::new(engine), Arc::new(repository));

        info!(
            index_records = status.records,
            degraded = status.degraded,
            content_root = %config.content_root,
            "Pipeline bridge ready"
        );

        Ok(Self {
            config: Arc::new(config),
            event_bus,
            index,
            coordinator,
        })
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn engine(&self) -> &Arc<SyncEngine> {
        self.coordinator.engine()
    }

    pub fn index(&self) -> &Arc<SyncIndex> {
        &self.index
    }

    pub fn subscribe_events(&self) -> Receiver<CoreEvent> {
        self.event_bus.subscribe()
    }

    /// Start a background pull of `scope`.
    pub async fn start_sync(&self, scope: SyncScope) -> Result<SyncHandle> {
        self.start_sync_with(SyncRequest::new(scope)).await
    }

    /// Start a background pull carrying manual conflict decisions.
    pub async fn start_sync_with(&self, request: SyncRequest) -> Result<SyncHandle> {
        Ok(self.coordinator.start_sync(request).await?)
    }

    /// Stop dispatching new actions of the pass behind `handle`.
    pub fn cancel(&self, handle: &SyncHandle) {
        handle.cancel();
    }

    /// Cancel a running pull by id, for hosts that did not keep the handle.
    pub async fn cancel_pass(&self, pass_id: PassId) -> Result<()> {
        Ok(self.coordinator.cancel(pass_id).await?)
    }

    pub async fn push(&self, request: &PushRequest) -> Result<SyncReport> {
        Ok(self.coordinator.push(request).await?)
    }

    pub async fn inventory(&self, scope: &SyncScope) -> Result<Vec<InventoryItem>> {
        Ok(self.engine().inventory(scope).await?)
    }

    pub async fn invalidate(&self, scope: &SyncScope) {
        self.engine().invalidate(scope).await;
    }

    pub async fn remove_local_asset(&self, path: &str) -> Result<Vec<SyncRecord>> {
        Ok(self.engine().remove_local_asset(path).await?)
    }

    pub async fn pass_status(&self, pass_id: PassId) -> Result<SyncPass> {
        Ok(self.coordinator.get_status(pass_id).await?)
    }

    pub async fn history(&self, project_id: &ProjectId, limit: u32) -> Result<Vec<SyncPass>> {
        Ok(self.coordinator.list_history(project_id, limit).await?)
    }

    /// Write the sync index to disk now.
    pub async fn flush_index(&self) -> Result<()> {
        Ok(self.index.flush().await?)
    }

    /// Run one host command.
    ///
    /// `StartSync` returns as soon as the pass is running; the handle is
    /// released and the pass is followed by id.
    #[instrument(skip(self, command), fields(command = command.name()))]
    pub async fn dispatch(&self, command: HostCommand) -> Result<HostReply> {
        let reply = match command {
            HostCommand::StartSync { scope, resolutions } => {
                let request =
                    SyncRequest::new(scope).with_resolutions(command::into_resolutions(resolutions));
                let handle = self.start_sync_with(request).await?;
                HostReply::Started {
                    pass_id: handle.pass_id,
                }
            }
            HostCommand::Cancel { pass_id } => {
                self.cancel_pass(pass_id).await?;
                HostReply::Accepted
            }
            HostCommand::Push { request } => HostReply::Report {
                report: self.push(&request).await?,
            },
            HostCommand::Inventory { scope } => HostReply::Inventory {
                items: self.inventory(&scope).await?,
            },
            HostCommand::Invalidate { scope } => {
                self.invalidate(&scope).await;
                HostReply::Accepted
            }
            HostCommand::RemoveLocalAsset { path } => HostReply::Removed {
                records: self.remove_local_asset(&path).await?,
            },
            HostCommand::PassStatus { pass_id } => HostReply::Pass {
                pass: self.pass_status(pass_id).await?,
            },
            HostCommand::History { project_id, limit } => HostReply::History {
                passes: self.history(&project_id, limit).await?,
            },
        };
        debug!("Host command handled");
        Ok(reply)
    }
}

async fn load_index(config: &CoreConfig) -> SyncIndex {
    match (&config.file_system, config.features.persist_index) {
        (Some(fs), true) => SyncIndex::load(fs.clone(), config.index_path.clone()).await,
        _ => SyncIndex::in_memory(),
    }
}

fn pipeline_api(config: &CoreConfig) -> Result<Arc<dyn PipelineApi>> {
    if let Some(api) = &config.pipeline_api {
        return Ok(api.clone());
    }

    let missing = |capability: &str, message: &str| {
        CoreError::Runtime(core_runtime::Error::CapabilityMissing {
            capability: capability.to_string(),
            message: message.to_string(),
        })
    };
    let url = config
        .pipeline
        .url
        .as_ref()
        .ok_or_else(|| missing("PipelineApi", "No pipeline endpoint URL configured."))?;
    let http_client = config
        .http_client
        .clone()
        .ok_or_else(|| missing("HttpClient", "The pipeline endpoint needs an HttpClient."))?;

    let mut client = RpcPipelineClient::new(http_client, url.clone());
    if let Some(api_key) = &config.pipeline.api_key {
        client = client.with_api_key(api_key.clone());
    }
    if let Some(timeout) = config.pipeline.request_timeout {
        client = client.with_request_timeout(timeout);
    }
    Ok(Arc::new(client))
}

async fn open_history(config: &CoreConfig) -> Result<SqlitePool> {
    let init_failed = |e: sqlx::Error| {
        CoreError::InitializationFailed(format!("Pass history database: {}", e))
    };

    if !config.features.enable_pass_history {
        // One connection, otherwise every connection gets its own in-memory database.
        return SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(init_failed);
    }

    if let Some(parent) = config.database_path.parent() {
        if !parent.as_os_str().is_empty() {
            core_async::fs::create_dir_all(parent).await.map_err(|e| {
                CoreError::InitializationFailed(format!(
                    "Cannot create {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }
    }

    let options = SqliteConnectOptions::new()
        .filename(&config.database_path)
        .create_if_missing(true);
    SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(options)
        .await
        .map_err(init_failed)
}
