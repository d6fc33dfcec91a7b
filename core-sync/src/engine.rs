//! # Sync Engine
//!
//! Entry points for pull, push and the supporting operations. A pull plans
//! against the cached entity snapshot, the index and the editor listing, then
//! hands the plan to the [`WorkerPool`]. A push exports one local asset and
//! commits it as the next version of a product.
//!
//! Index records are written last, after the editor or server call that
//! justified them succeeded.

use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::executor::{ActionRunner, WorkerPool};
use crate::index::SyncIndex;
use crate::job::{PassId, SyncKind};
use crate::metadata::MetadataCache;
use crate::notifier::ChangeNotifier;
use crate::planner::{self, PlanStep, PlannedAction, Resolutions, SyncPlan};
use crate::report::{ActionOutcome, ActionReport, SyncReport};
use async_trait::async_trait;
use bridge_traits::editor::{EditorBridge, ImportManifest, ImportOptions, ImportRequest};
use bridge_traits::error::BridgeError;
use bridge_traits::pipeline::{NewRepresentation, NewVersion, PipelineApi};
use bridge_traits::time::Clock;
use core_async::sync::{CancellationToken, Mutex};
use core_pipeline::{
    EntityStore, Fingerprint, IdentityKey, LineageKey, LocalAsset, ProjectId, RepresentationId,
    SyncRecord, SyncScope, VersionStatus,
};
use core_runtime::events::EventBus;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

// ============================================================================
// Requests and Inventory
// ============================================================================

/// Publish one local asset as the next version of an existing product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushRequest {
    pub project_id: ProjectId,
    pub local_path: String,
    /// Folder/task path of the target product
    pub product_path: String,
    pub product: String,
    /// Defaults to the local file extension
    pub format: Option<String>,
    pub dependencies: Vec<RepresentationId>,
    pub status: VersionStatus,
}

impl PushRequest {
    pub fn new(
        project_id: impl Into<ProjectId>,
        local_path: impl Into<String>,
        product_path: impl Into<String>,
        product: impl Into<String>,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            local_path: local_path.into(),
            product_path: product_path.into().trim_matches('/').to_string(),
            product: product.into(),
            format: None,
            dependencies: Vec::new(),
            status: VersionStatus::WorkInProgress,
        }
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    pub fn with_dependencies(mut self, deps: impl IntoIterator<Item = RepresentationId>) -> Self {
        self.dependencies.extend(deps);
        self
    }

    pub fn with_status(mut self, status: VersionStatus) -> Self {
        self.status = status;
        self
    }

    fn resolved_format(&self) -> Result<String> {
        if let Some(format) = &self.format {
            return Ok(format.clone());
        }
        let file = self.local_path.rsplit('/').next().unwrap_or_default();
        match file.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => Ok(ext.to_lowercase()),
            _ => Err(SyncError::invalid_input(
                "format",
                format!("cannot infer a format from {}", self.local_path),
            )),
        }
    }
}

/// Scene inventory status of a local asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetStatus {
    UpToDate,
    /// A newer representation exists for the same lineage
    Outdated,
    /// Local content differs from what was last synced
    Modified,
    /// Not imported by the bridge
    Untracked,
    /// Its product or format no longer exists in the pipeline
    Orphaned,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryItem {
    pub local: LocalAsset,
    pub identity: Option<IdentityKey>,
    pub status: AssetStatus,
    /// Latest version number available for the lineage
    pub latest_version: Option<u32>,
}

// ============================================================================
// Engine
// ============================================================================

pub struct SyncEngine {
    config: SyncConfig,
    api: Arc<dyn PipelineApi>,
    editor: Arc<dyn EditorBridge>,
    index: Arc<SyncIndex>,
    metadata: Arc<MetadataCache>,
    event_bus: EventBus,
    clock: Arc<dyn Clock>,
    pool: WorkerPool,
    author: String,
}

impl SyncEngine {
    pub fn new(
        config: SyncConfig,
        api: Arc<dyn PipelineApi>,
        editor: Arc<dyn EditorBridge>,
        index: Arc<SyncIndex>,
        event_bus: EventBus,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        let metadata = Arc::new(MetadataCache::new(api.clone(), clock.clone(), &config));
        let pool = WorkerPool::new(&config);
        Ok(Self {
            config,
            api,
            editor,
            index,
            metadata,
            event_bus,
            clock,
            pool,
            author: String::new(),
        })
    }

    /// Author recorded on pushed versions.
    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = author.into();
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn index(&self) -> &Arc<SyncIndex> {
        &self.index
    }

    pub fn metadata(&self) -> &Arc<MetadataCache> {
        &self.metadata
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    async fn local_assets(&self) -> Result<Vec<LocalAsset>> {
        let assets = self.editor.list_assets("").await?;
        Ok(assets.into_iter().map(LocalAsset::from).collect())
    }

    /// Compute the pull plan for `scope` without applying it.
    #[instrument(skip(self, resolutions), fields(project = %scope.project_id))]
    pub async fn plan_pull(&self, scope: &SyncScope, resolutions: &Resolutions) -> Result<SyncPlan> {
        let store = self.metadata.store(&scope.project_id).await?;
        let snapshot = self.index.snapshot().await;
        let locals = self.local_assets().await?;
        planner::plan_pull(&store, scope, &snapshot, &locals, resolutions, &self.config)
    }

    /// Bring the editor up to date with the pipeline for `scope`.
    ///
    /// Per-action failures are reported in the returned [`SyncReport`].
    ///
    /// # Errors
    ///
    /// Pass-level failures only: `IdentityAmbiguity` (nothing applied),
    /// a malformed listing, or an unreachable server.
    #[instrument(skip(self, resolutions, token), fields(pass_id = %pass_id, project = %scope.project_id))]
    pub async fn pull(
        &self,
        pass_id: PassId,
        scope: &SyncScope,
        resolutions: &Resolutions,
        token: &CancellationToken,
    ) -> Result<SyncReport> {
        let notifier = ChangeNotifier::new(self.event_bus.clone(), pass_id);
        let started_at = self.clock.now();

        let plan = match self.plan_pull(scope, resolutions).await {
            Ok(plan) => plan,
            Err(e) => {
                error!(error = %e, "Pull aborted before applying any action");
                notifier.failed(e.to_string(), e.is_retryable());
                return Err(e);
            }
        };

        self.drop_vanished(&plan).await;

        notifier.started(&plan.project_id, SyncKind::Pull, plan.action_count());
        info!(
            actions = plan.action_count(),
            pending = plan.pending_count(),
            tiers = plan.tiers.len(),
            "Dispatching pull"
        );

        let runner = PullRunner::new(self);
        let actions = self.pool.execute(&plan, &runner, &notifier, token).await;

        let report = SyncReport {
            pass_id,
            project_id: plan.project_id.clone(),
            kind: SyncKind::Pull,
            actions,
            started_at,
            finished_at: self.clock.now(),
            cancelled: token.is_cancelled(),
        };
        notifier.finished(&report);

        let stats = report.stats();
        info!(
            imported = stats.imported,
            skipped = stats.skipped,
            conflicted = stats.conflicted,
            failed = stats.failed,
            dependency_failed = stats.dependency_failed,
            cancelled = stats.cancelled,
            "Pull finished"
        );
        Ok(report)
    }

    /// Drop records of local assets that no longer exist, unless another
    /// writer replaced them since the snapshot.
    async fn drop_vanished(&self, plan: &SyncPlan) {
        if plan.vanished.is_empty() {
            return;
        }
        let mut guards = Vec::with_capacity(plan.vanished.len());
        let mut stale = Vec::with_capacity(plan.vanished.len());
        for record in &plan.vanished {
            let lineage = record.lineage();
            guards.push(self.index.lock(&lineage).await);
            if self.index.get(&lineage).await.as_ref() == Some(record) {
                stale.push(lineage);
            }
        }
        let removed = self.index.remove_all(&stale).await;
        debug!(removed = removed.len(), "Dropped records of vanished local assets");
    }

    /// Publish a local asset as the next version of its product.
    ///
    /// # Errors
    ///
    /// `VersionConflict` when another publisher claimed the number first.
    /// Nothing is retried; the cached metadata is dropped so the next
    /// attempt starts from the server's numbering.
    #[instrument(skip(self, request), fields(pass_id = %pass_id, local_path = %request.local_path))]
    pub async fn push(&self, pass_id: PassId, request: &PushRequest) -> Result<SyncReport> {
        let notifier = ChangeNotifier::new(self.event_bus.clone(), pass_id);
        let started_at = self.clock.now();
        notifier.started(&request.project_id, SyncKind::Push, 1);

        let (identity, representation_id) = match self.publish(request).await {
            Ok(published) => published,
            Err(e) => {
                if matches!(e, SyncError::VersionConflict { .. }) {
                    self.metadata.invalidate(&request.project_id).await;
                }
                warn!(error = %e, "Push failed");
                notifier.failed(e.to_string(), e.is_retryable());
                return Err(e);
            }
        };

        let outcome = ActionOutcome::Published {
            representation_id: representation_id.clone(),
            version: identity.version,
        };
        notifier.outcome(&identity, Some(&request.local_path), &outcome);

        let report = SyncReport {
            pass_id,
            project_id: request.project_id.clone(),
            kind: SyncKind::Push,
            actions: vec![ActionReport {
                identity,
                representation_id,
                outcome,
                attempts: 1,
            }],
            started_at,
            finished_at: self.clock.now(),
            cancelled: false,
        };
        notifier.finished(&report);
        Ok(report)
    }

    async fn publish(&self, request: &PushRequest) -> Result<(IdentityKey, RepresentationId)> {
        let format = request.resolved_format()?;
        let project = &request.project_id;
        let store = self.metadata.store(project).await?;
        let product = store
            .find_product(&request.product_path, &request.product)
            .ok_or_else(|| {
                SyncError::not_found(
                    "product",
                    format!("{}/{}", request.product_path, request.product),
                )
            })?
            .clone();

        let lineage = LineageKey {
            project_id: project.clone(),
            path: request.product_path.clone(),
            product: product.name.clone(),
            format: format.clone(),
        };
        let _guard = self.index.lock(&lineage).await;

        let content = self
            .editor
            .export_asset(&request.local_path)
            .await
            .map_err(SyncError::export_error)?;
        let fingerprint = Fingerprint::of_bytes(&content);

        let attempted = store.last_version_number(&product.id) + 1;
        let latest = self
            .api
            .get_latest_version(project.as_str(), product.id.as_str())
            .await?
            .map(EntityStore::version_from_record)
            .transpose()?
            .map(|v| v.number);
        let conflict = |latest: Option<u32>| SyncError::VersionConflict {
            product_id: product.id.to_string(),
            attempted,
            latest,
        };
        if latest.map(|n| n >= attempted).unwrap_or(false) {
            return Err(conflict(latest));
        }

        let created = self
            .api
            .create_version(
                project.as_str(),
                NewVersion {
                    product_id: product.id.to_string(),
                    version: attempted,
                    author: self.author.clone(),
                    status: request.status.as_str().to_string(),
                },
            )
            .await
            .map_err(|e| match e {
                BridgeError::Conflict(_) => conflict(latest),
                other => other.into(),
            })?;
        let version = EntityStore::version_from_record(created)?;
        if version.number != attempted {
            return Err(conflict(Some(version.number)));
        }

        let representation = self
            .api
            .create_representation(
                project.as_str(),
                NewRepresentation {
                    version_id: version.id.to_string(),
                    format: format.clone(),
                    fingerprint: fingerprint.to_string(),
                    dependencies: request.dependencies.iter().map(|d| d.to_string()).collect(),
                    content,
                },
            )
            .await
            .map_err(|e| {
                error!(version = %version.id, error = %e, "Version committed without a representation");
                SyncError::from(e)
            })?;
        let representation = EntityStore::representation_from_record(representation)?;

        let identity = IdentityKey {
            project_id: project.clone(),
            path: request.product_path.clone(),
            product: product.name.clone(),
            version: attempted,
            format,
        };
        self.index
            .upsert(SyncRecord {
                identity: identity.clone(),
                representation_id: representation.id.clone(),
                local_path: request.local_path.clone(),
                fingerprint: representation.fingerprint.clone(),
                local_fingerprint: fingerprint,
                synced_at: self.clock.now(),
            })
            .await;
        self.metadata.invalidate(project).await;

        info!(identity = %identity, representation = %representation.id, "Published version");
        Ok((identity, representation.id))
    }

    /// Forget cached metadata for the scope's project.
    pub async fn invalidate(&self, scope: &SyncScope) {
        self.metadata.invalidate(&scope.project_id).await;
        ChangeNotifier::invalidated(&self.event_bus, &scope.project_id);
    }

    /// Delete a local asset (and its empty parent folder) and its records.
    #[instrument(skip(self))]
    pub async fn remove_local_asset(&self, path: &str) -> Result<Vec<SyncRecord>> {
        let lineages: Vec<LineageKey> = self
            .index
            .snapshot()
            .await
            .records()
            .filter(|r| r.local_path == path)
            .map(SyncRecord::lineage)
            .collect();
        let mut guards = Vec::with_capacity(lineages.len());
        for lineage in &lineages {
            guards.push(self.index.lock(lineage).await);
        }

        match self.editor.remove_asset(path).await {
            Ok(()) => {}
            Err(BridgeError::NotFound(_)) => debug!("Local asset already gone"),
            Err(e) => return Err(e.into()),
        }
        let removed = self.index.remove_by_path(path).await;
        info!(records = removed.len(), "Removed local asset");
        Ok(removed)
    }

    /// Every local asset relevant to `scope` with its sync status.
    #[instrument(skip(self), fields(project = %scope.project_id))]
    pub async fn inventory(&self, scope: &SyncScope) -> Result<Vec<InventoryItem>> {
        let store = self.metadata.store(&scope.project_id).await?;
        let snapshot = self.index.snapshot().await;
        let include_untracked = scope.path_prefix.is_none() && scope.products.is_empty();

        let mut items = Vec::new();
        for local in self.local_assets().await? {
            let tracked = match snapshot.by_local_path(&local.path) {
                Some(record) => Some((
                    record.identity.clone(),
                    record.fingerprint.clone(),
                    record.local_fingerprint.clone(),
                )),
                None => local.source_identity.clone().map(|identity| {
                    let source = local
                        .source_fingerprint
                        .clone()
                        .unwrap_or_else(|| local.fingerprint.clone());
                    (identity, source.clone(), source)
                }),
            };

            let Some((identity, remote_baseline, local_baseline)) = tracked else {
                if include_untracked {
                    items.push(InventoryItem {
                        local,
                        identity: None,
                        status: AssetStatus::Untracked,
                        latest_version: None,
                    });
                }
                continue;
            };
            if !scope.contains(&identity.lineage()) {
                continue;
            }

            let latest = store
                .find_product(&identity.path, &identity.product)
                .and_then(|p| store.latest_version(&p.id, self.config.include_rejected))
                .and_then(|v| {
                    store
                        .representations_of(&v.id)
                        .into_iter()
                        .find(|r| r.format == identity.format)
                        .map(|r| (v.number, r.fingerprint.clone()))
                });

            let (status, latest_version) = match latest {
                None => (AssetStatus::Orphaned, None),
                Some((number, _)) if local.fingerprint != local_baseline => {
                    (AssetStatus::Modified, Some(number))
                }
                Some((number, fingerprint)) if fingerprint != remote_baseline => {
                    (AssetStatus::Outdated, Some(number))
                }
                Some((number, _)) => (AssetStatus::UpToDate, Some(number)),
            };
            items.push(InventoryItem {
                local,
                identity: Some(identity),
                status,
                latest_version,
            });
        }
        Ok(items)
    }
}

// ============================================================================
// Pull Actions
// ============================================================================

struct PullRunner<'a> {
    engine: &'a SyncEngine,
    /// Representations whose import has been dispatched at least once.
    dispatched: Mutex<HashSet<RepresentationId>>,
}

impl<'a> PullRunner<'a> {
    fn new(engine: &'a SyncEngine) -> Self {
        Self {
            engine,
            dispatched: Mutex::new(HashSet::new()),
        }
    }

    /// Whether `destination` already holds this representation, left there
    /// by an earlier attempt that the editor finished after we gave up on it.
    async fn landed_earlier(&self, action: &PlannedAction, destination: &str) -> bool {
        let rep = &action.representation;
        let folder = destination.rsplit_once('/').map_or("", |(folder, _)| folder);
        match self.engine.editor.list_assets(folder).await {
            Ok(assets) => assets.iter().any(|asset| {
                asset.path == destination
                    && asset.manifest.as_ref().is_some_and(|m| {
                        m.representation_id == rep.id.as_str()
                            && m.fingerprint == rep.fingerprint.as_str()
                    })
            }),
            Err(e) => {
                debug!(destination, error = %e, "Cannot inspect import destination");
                false
            }
        }
    }

    async fn import(
        &self,
        action: &PlannedAction,
        destination: &str,
        replace_existing: bool,
    ) -> Result<ActionOutcome> {
        let engine = self.engine;
        let rep = &action.representation;
        let _guard = engine.index.lock(&action.identity.lineage()).await;

        let retry = !self.dispatched.lock().await.insert(rep.id.clone());
        let replace_existing =
            replace_existing || (retry && self.landed_earlier(action, destination).await);
        if retry {
            debug!(identity = %action.identity, replace_existing, "Retrying import");
        }

        let source_path = rep.source_path.clone().ok_or_else(|| {
            SyncError::Import(format!("representation {} has no published file", rep.id))
        })?;
        let request = ImportRequest {
            source_path,
            format: rep.format.clone(),
            destination: destination.to_string(),
            manifest: ImportManifest {
                representation_id: rep.id.to_string(),
                identity: action.identity.to_string(),
                fingerprint: rep.fingerprint.to_string(),
                imported_at: engine.clock.now(),
            },
            options: ImportOptions {
                replace_existing,
                ..ImportOptions::default()
            },
        };
        let asset = engine
            .editor
            .import_file(request)
            .await
            .map_err(SyncError::import_error)?;

        engine
            .index
            .upsert(SyncRecord {
                identity: action.identity.clone(),
                representation_id: rep.id.clone(),
                local_path: asset.path.clone(),
                fingerprint: rep.fingerprint.clone(),
                local_fingerprint: Fingerprint::new(asset.fingerprint),
                synced_at: engine.clock.now(),
            })
            .await;

        Ok(ActionOutcome::Imported {
            local_path: asset.path,
            representation_id: rep.id.clone(),
            fingerprint: rep.fingerprint.clone(),
        })
    }

    async fn relink(
        &self,
        action: &PlannedAction,
        local_path: &str,
        local_fingerprint: &Fingerprint,
    ) {
        let engine = self.engine;
        let _guard = engine.index.lock(&action.identity.lineage()).await;
        engine
            .index
            .upsert(SyncRecord {
                identity: action.identity.clone(),
                representation_id: action.representation.id.clone(),
                local_path: local_path.to_string(),
                fingerprint: action.representation.fingerprint.clone(),
                local_fingerprint: local_fingerprint.clone(),
                synced_at: engine.clock.now(),
            })
            .await;
    }
}

#[async_trait]
impl ActionRunner for PullRunner<'_> {
    async fn run(&self, action: &PlannedAction) -> Result<ActionOutcome> {
        match &action.step {
            PlanStep::Import { destination } => self.import(action, destination, false).await,
            PlanStep::Reimport { local_path } => self.import(action, local_path, true).await,
            PlanStep::Relink {
                local_path,
                local_fingerprint,
                reason,
            } => {
                self.relink(action, local_path, local_fingerprint).await;
                Ok(ActionOutcome::skipped(reason.clone()))
            }
            PlanStep::Skip { reason, .. } => Ok(ActionOutcome::skipped(reason.clone())),
            PlanStep::Conflict {
                local_fingerprint,
                remote_fingerprint,
                ..
            } => Err(SyncError::DivergedAsset {
                identity: action.identity.to_string(),
                local_fingerprint: local_fingerprint.to_string(),
                remote_fingerprint: remote_fingerprint.to_string(),
            }),
            PlanStep::Fail { reason } => Ok(ActionOutcome::failed(reason.clone())),
        }
    }
}
