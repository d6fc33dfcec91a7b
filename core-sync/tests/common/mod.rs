//! Shared in-memory doubles for the sync integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use bridge_traits::editor::{EditorAsset, EditorBridge, ImportManifest, ImportRequest};
use bridge_traits::error::{BridgeError, Result};
use bridge_traits::pipeline::{
    EntityFilter, EntityRecord, NewRepresentation, NewVersion, NodeRecord, PipelineApi,
    ProductRecord, ProjectRecord, RepresentationRecord, VersionRecord,
};
use bridge_traits::time::Clock;
use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use core_async::sync::CancellationToken;
use core_pipeline::{Fingerprint, IdentityKey, LineageKey, ProjectId, SyncScope};
use core_runtime::events::{CoreEvent, EventBus, Receiver};
use core_sync::{SyncConfig, SyncEngine, SyncIndex};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const PROJECT: &str = "P";

// ============================================================================
// Pipeline server
// ============================================================================

#[derive(Default)]
struct PipelineState {
    records: Vec<EntityRecord>,
    list_calls: usize,
    list_failures: VecDeque<BridgeError>,
    race_next_version: bool,
    created: u64,
}

/// Pipeline server over a vector of entity records.
pub struct InMemoryPipeline {
    state: Mutex<PipelineState>,
}

impl InMemoryPipeline {
    /// Project `P` with folders `chars` and `chars/hero`.
    pub fn new() -> Self {
        let pipeline = Self {
            state: Mutex::new(PipelineState::default()),
        };
        pipeline.push(EntityRecord::Project(ProjectRecord {
            id: Some(PROJECT.into()),
            name: Some("Pilot".into()),
            entity_types: vec![],
        }));
        pipeline.folder("f-chars", None, "chars");
        pipeline.folder("f-hero", Some("f-chars"), "hero");
        pipeline
    }

    pub fn push(&self, record: EntityRecord) {
        self.state.lock().unwrap().records.push(record);
    }

    /// Drop every record with `id`.
    pub fn remove(&self, id: &str) {
        self.state
            .lock()
            .unwrap()
            .records
            .retain(|r| r.id() != Some(id));
    }

    pub fn folder(&self, id: &str, parent: Option<&str>, name: &str) {
        self.push(EntityRecord::Folder(NodeRecord {
            id: Some(id.into()),
            parent_id: parent.map(Into::into),
            name: Some(name.into()),
            type_tag: None,
        }));
    }

    pub fn product(&self, id: &str, parent: &str, name: &str) {
        self.push(EntityRecord::Product(ProductRecord {
            id: Some(id.into()),
            parent_id: Some(parent.into()),
            name: Some(name.into()),
            product_type: Some("model".into()),
        }));
    }

    pub fn version(&self, id: &str, product: &str, number: i64, status: &str) {
        self.push(EntityRecord::Version(VersionRecord {
            id: Some(id.into()),
            product_id: Some(product.into()),
            version: Some(number),
            author: Some("artist".into()),
            created_at: Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()),
            status: Some(status.into()),
        }));
    }

    pub fn representation(&self, id: &str, version: &str, fingerprint: &str, deps: &[&str]) {
        self.push(EntityRecord::Representation(RepresentationRecord {
            id: Some(id.into()),
            version_id: Some(version.into()),
            format: Some("fbx".into()),
            fingerprint: Some(fingerprint.into()),
            dependencies: deps.iter().map(|d| d.to_string()).collect(),
            path: Some(format!("/publish/{}.fbx", id)),
        }));
    }

    /// Product under `chars/hero` with one approved version and one representation.
    pub fn publish(&self, product: &str, rep: &str, fingerprint: &str, deps: &[&str]) {
        let product_id = format!("prod-{}", product);
        self.product(&product_id, "f-hero", product);
        self.publish_version(product, 1, rep, fingerprint, deps);
    }

    /// Next version of an existing product.
    pub fn publish_version(
        &self,
        product: &str,
        number: i64,
        rep: &str,
        fingerprint: &str,
        deps: &[&str],
    ) {
        let product_id = format!("prod-{}", product);
        let version_id = format!("ver-{}-{}", product, number);
        self.version(&version_id, &product_id, number, "approved");
        self.representation(rep, &version_id, fingerprint, deps);
    }

    pub fn list_calls(&self) -> usize {
        self.state.lock().unwrap().list_calls
    }

    pub fn fail_next_list(&self, err: BridgeError) {
        self.state.lock().unwrap().list_failures.push_back(err);
    }

    /// Another publisher claims the next version number between our check
    /// and our commit.
    pub fn race_next_version(&self) {
        self.state.lock().unwrap().race_next_version = true;
    }

    pub fn version_numbers(&self, product_id: &str) -> Vec<u32> {
        let state = self.state.lock().unwrap();
        let mut numbers: Vec<u32> = state
            .records
            .iter()
            .filter_map(|r| match r {
                EntityRecord::Version(v) if v.product_id.as_deref() == Some(product_id) => {
                    v.version.map(|n| n as u32)
                }
                _ => None,
            })
            .collect();
        numbers.sort_unstable();
        numbers
    }

    fn latest(state: &PipelineState, product_id: &str) -> Option<VersionRecord> {
        state
            .records
            .iter()
            .filter_map(|r| match r {
                EntityRecord::Version(v) if v.product_id.as_deref() == Some(product_id) => {
                    Some(v.clone())
                }
                _ => None,
            })
            .max_by_key(|v| v.version)
    }
}

#[async_trait]
impl PipelineApi for InMemoryPipeline {
    async fn list_entities(
        &self,
        project: &str,
        filter: &EntityFilter,
    ) -> Result<Vec<EntityRecord>> {
        let mut state = self.state.lock().unwrap();
        state.list_calls += 1;
        if let Some(err) = state.list_failures.pop_front() {
            return Err(err);
        }
        if project != PROJECT {
            return Err(BridgeError::NotFound(format!("project {}", project)));
        }
        Ok(state
            .records
            .iter()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect())
    }

    async fn get_latest_version(
        &self,
        _project: &str,
        product_id: &str,
    ) -> Result<Option<VersionRecord>> {
        let state = self.state.lock().unwrap();
        Ok(Self::latest(&state, product_id))
    }

    async fn create_version(&self, _project: &str, request: NewVersion) -> Result<VersionRecord> {
        let mut state = self.state.lock().unwrap();
        if std::mem::take(&mut state.race_next_version) {
            state.records.push(EntityRecord::Version(VersionRecord {
                id: Some(format!("ver-rival-{}", request.version)),
                product_id: Some(request.product_id.clone()),
                version: Some(i64::from(request.version)),
                author: Some("rival".into()),
                created_at: Some(Utc::now()),
                status: Some("wip".into()),
            }));
        }

        let taken = Self::latest(&state, &request.product_id)
            .and_then(|v| v.version)
            .map(|n| n >= i64::from(request.version))
            .unwrap_or(false);
        if taken {
            return Err(BridgeError::Conflict(format!(
                "version {} of {} already exists",
                request.version, request.product_id
            )));
        }

        state.created += 1;
        let record = VersionRecord {
            id: Some(format!("ver-new-{}", state.created)),
            product_id: Some(request.product_id),
            version: Some(i64::from(request.version)),
            author: Some(request.author),
            created_at: Some(Utc::now()),
            status: Some(request.status),
        };
        state.records.push(EntityRecord::Version(record.clone()));
        Ok(record)
    }

    async fn create_representation(
        &self,
        _project: &str,
        request: NewRepresentation,
    ) -> Result<RepresentationRecord> {
        let mut state = self.state.lock().unwrap();
        state.created += 1;
        let id = format!("rep-new-{}", state.created);
        let record = RepresentationRecord {
            path: Some(format!("/publish/{}.{}", id, request.format)),
            id: Some(id),
            version_id: Some(request.version_id),
            format: Some(request.format),
            fingerprint: Some(request.fingerprint),
            dependencies: request.dependencies,
        };
        state
            .records
            .push(EntityRecord::Representation(record.clone()));
        Ok(record)
    }
}

// ============================================================================
// Editor
// ============================================================================

#[derive(Clone)]
struct StoredAsset {
    content: Bytes,
    fingerprint: String,
    manifest: Option<ImportManifest>,
}

#[derive(Default)]
struct EditorState {
    assets: BTreeMap<String, StoredAsset>,
    /// Representation ids in the order they were imported successfully
    imports: Vec<String>,
    attempts: HashMap<String, u32>,
    failures: HashMap<String, VecDeque<BridgeError>>,
    cancel_on_import: Option<(String, CancellationToken)>,
}

/// Editor content browser held in memory.
///
/// An imported asset takes the fingerprint its manifest records, as if the
/// published file hashed to exactly what the server reported.
pub struct InMemoryEditor {
    state: Mutex<EditorState>,
    import_delay: Mutex<Option<Duration>>,
}

impl InMemoryEditor {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(EditorState::default()),
            import_delay: Mutex::new(None),
        }
    }

    /// Create or overwrite an asset the bridge did not import.
    pub fn put(&self, path: &str, content: &[u8]) {
        self.state.lock().unwrap().assets.insert(
            path.to_string(),
            StoredAsset {
                content: Bytes::copy_from_slice(content),
                fingerprint: Fingerprint::of_bytes(content).to_string(),
                manifest: None,
            },
        );
    }

    /// Simulate a local edit that leaves the content with `fingerprint`.
    pub fn edit(&self, path: &str, fingerprint: &str) {
        let mut state = self.state.lock().unwrap();
        let asset = state.assets.get_mut(path).expect("asset exists");
        asset.fingerprint = fingerprint.to_string();
        asset.content = Bytes::from(format!("edited:{}", fingerprint));
    }

    pub fn delete(&self, path: &str) {
        self.state.lock().unwrap().assets.remove(path);
    }

    pub fn fingerprint(&self, path: &str) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .assets
            .get(path)
            .map(|a| a.fingerprint.clone())
    }

    pub fn paths(&self) -> Vec<String> {
        self.state.lock().unwrap().assets.keys().cloned().collect()
    }

    pub fn imports(&self) -> Vec<String> {
        self.state.lock().unwrap().imports.clone()
    }

    pub fn attempts(&self, representation_id: &str) -> u32 {
        self.state
            .lock()
            .unwrap()
            .attempts
            .get(representation_id)
            .copied()
            .unwrap_or(0)
    }

    /// Queue a failure for the next import of `representation_id`.
    pub fn fail_import(&self, representation_id: &str, err: BridgeError) {
        self.state
            .lock()
            .unwrap()
            .failures
            .entry(representation_id.to_string())
            .or_default()
            .push_back(err);
    }

    /// Cancel `token` as soon as `representation_id` has been imported.
    pub fn cancel_after_import(&self, representation_id: &str, token: CancellationToken) {
        self.state.lock().unwrap().cancel_on_import = Some((representation_id.to_string(), token));
    }

    pub fn set_import_delay(&self, delay: Duration) {
        *self.import_delay.lock().unwrap() = Some(delay);
    }
}

#[async_trait]
impl EditorBridge for InMemoryEditor {
    async fn import_file(&self, request: ImportRequest) -> Result<EditorAsset> {
        let delay = *self.import_delay.lock().unwrap();
        if let Some(delay) = delay {
            core_async::time::sleep(delay).await;
        }

        let rep_id = request.manifest.representation_id.clone();
        let mut state = self.state.lock().unwrap();
        *state.attempts.entry(rep_id.clone()).or_default() += 1;
        if let Some(err) = state.failures.get_mut(&rep_id).and_then(VecDeque::pop_front) {
            return Err(err);
        }
        if !request.options.replace_existing && state.assets.contains_key(&request.destination) {
            return Err(BridgeError::OperationFailed(format!(
                "Asset already exists: {}",
                request.destination
            )));
        }

        let asset = StoredAsset {
            content: Bytes::from(request.source_path.clone()),
            fingerprint: request.manifest.fingerprint.clone(),
            manifest: Some(request.manifest.clone()),
        };
        state.assets.insert(request.destination.clone(), asset);
        state.imports.push(rep_id.clone());

        if let Some((trigger, token)) = &state.cancel_on_import {
            if trigger == &rep_id {
                token.cancel();
            }
        }

        Ok(EditorAsset {
            path: request.destination,
            fingerprint: request.manifest.fingerprint.clone(),
            manifest: Some(request.manifest),
        })
    }

    async fn export_asset(&self, path: &str) -> Result<Bytes> {
        self.state
            .lock()
            .unwrap()
            .assets
            .get(path)
            .map(|a| a.content.clone())
            .ok_or_else(|| BridgeError::NotFound(path.to_string()))
    }

    async fn list_assets(&self, root: &str) -> Result<Vec<EditorAsset>> {
        let root = root.trim_matches('/');
        Ok(self
            .state
            .lock()
            .unwrap()
            .assets
            .iter()
            .filter(|(path, _)| root.is_empty() || path.starts_with(root))
            .map(|(path, asset)| EditorAsset {
                path: path.clone(),
                fingerprint: asset.fingerprint.clone(),
                manifest: asset.manifest.clone(),
            })
            .collect())
    }

    async fn remove_asset(&self, path: &str) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .assets
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| BridgeError::NotFound(path.to_string()))
    }
}

/// Completes the first import, then keeps the caller waiting for `delay`
/// before answering.
pub struct LateAnsweringEditor {
    inner: Arc<InMemoryEditor>,
    delay: Duration,
    answered_late: AtomicBool,
}

impl LateAnsweringEditor {
    pub fn new(inner: Arc<InMemoryEditor>, delay: Duration) -> Self {
        Self {
            inner,
            delay,
            answered_late: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl EditorBridge for LateAnsweringEditor {
    async fn import_file(&self, request: ImportRequest) -> Result<EditorAsset> {
        let asset = self.inner.import_file(request).await?;
        if !self.answered_late.swap(true, Ordering::SeqCst) {
            core_async::time::sleep(self.delay).await;
        }
        Ok(asset)
    }

    async fn export_asset(&self, path: &str) -> Result<Bytes> {
        self.inner.export_asset(path).await
    }

    async fn list_assets(&self, root: &str) -> Result<Vec<EditorAsset>> {
        self.inner.list_assets(root).await
    }

    async fn remove_asset(&self, path: &str) -> Result<()> {
        self.inner.remove_asset(path).await
    }
}

/// Records the highest number of imports running at once.
pub struct ConcurrencyCountingEditor {
    inner: Arc<InMemoryEditor>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl ConcurrencyCountingEditor {
    pub fn new(inner: Arc<InMemoryEditor>) -> Self {
        Self {
            inner,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EditorBridge for ConcurrencyCountingEditor {
    async fn import_file(&self, request: ImportRequest) -> Result<EditorAsset> {
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(running, Ordering::SeqCst);
        let result = self.inner.import_file(request).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn export_asset(&self, path: &str) -> Result<Bytes> {
        self.inner.export_asset(path).await
    }

    async fn list_assets(&self, root: &str) -> Result<Vec<EditorAsset>> {
        self.inner.list_assets(root).await
    }

    async fn remove_asset(&self, path: &str) -> Result<()> {
        self.inner.remove_asset(path).await
    }
}

// ============================================================================
// Clock
// ============================================================================

pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += chrono::Duration::from_std(by).unwrap();
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

// ============================================================================
// Fixture
// ============================================================================

pub struct Fixture {
    pub pipeline: Arc<InMemoryPipeline>,
    pub editor: Arc<InMemoryEditor>,
    pub clock: Arc<ManualClock>,
    pub index: Arc<SyncIndex>,
    pub bus: EventBus,
    pub engine: Arc<SyncEngine>,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: SyncConfig) -> Self {
        Self::with_editor(config, |editor| editor as Arc<dyn EditorBridge>)
    }

    /// Like [`Fixture::with_config`], with the engine talking to the editor
    /// through `wrap`. `self.editor` stays the inner in-memory editor.
    pub fn with_editor(
        config: SyncConfig,
        wrap: impl FnOnce(Arc<InMemoryEditor>) -> Arc<dyn EditorBridge>,
    ) -> Self {
        let pipeline = Arc::new(InMemoryPipeline::new());
        let editor = Arc::new(InMemoryEditor::new());
        let clock = Arc::new(ManualClock::new());
        let index = Arc::new(SyncIndex::in_memory());
        let bus = EventBus::new(1024);
        let engine = SyncEngine::new(
            config,
            pipeline.clone(),
            wrap(editor.clone()),
            index.clone(),
            bus.clone(),
            clock.clone(),
        )
        .unwrap()
        .with_author("tester");

        Self {
            pipeline,
            editor,
            clock,
            index,
            bus,
            engine: Arc::new(engine),
        }
    }

    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.bus.subscribe()
    }
}

/// Defaults with retry delays short enough for tests.
pub fn test_config() -> SyncConfig {
    SyncConfig::default().with_retry_delays(Duration::from_millis(1), Duration::from_millis(5))
}

pub fn scope() -> SyncScope {
    SyncScope::project(PROJECT)
}

pub fn identity(product: &str, version: u32) -> IdentityKey {
    IdentityKey {
        project_id: ProjectId::new(PROJECT),
        path: "chars/hero".into(),
        product: product.into(),
        version,
        format: "fbx".into(),
    }
}

pub fn lineage(product: &str) -> LineageKey {
    identity(product, 1).lineage()
}

/// Where a first pull places version `version` of `product`.
pub fn destination(product: &str, version: u32) -> String {
    format!(
        "Pipeline/chars/hero/{}/{}_v{:03}.fbx",
        product, product, version
    )
}

/// Everything currently buffered on `rx`.
pub fn drain(rx: &mut Receiver<CoreEvent>) -> Vec<CoreEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
