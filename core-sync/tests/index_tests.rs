//! Sync index persistence against the real file system.

use bridge_desktop::TokioFileSystem;
use bridge_traits::storage::FileSystemAccess;
use chrono::{TimeZone, Utc};
use core_pipeline::{Fingerprint, IdentityKey, ProjectId, RepresentationId, SyncRecord};
use core_sync::{SyncIndex, INDEX_SCHEMA_VERSION};
use std::path::PathBuf;
use std::sync::Arc;

struct ScratchDir {
    root: PathBuf,
}

impl ScratchDir {
    fn new() -> Self {
        let root = std::env::temp_dir().join(format!("core-sync-index-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&root).unwrap();
        Self { root }
    }

    fn index_path(&self) -> PathBuf {
        self.root.join("state").join("sync-index.json")
    }

    fn fs(&self) -> Arc<dyn FileSystemAccess> {
        Arc::new(TokioFileSystem::with_data_directory(self.root.clone()))
    }

    fn write_raw(&self, content: &str) {
        let path = self.index_path();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.root);
    }
}

fn record(product: &str, fingerprint: &str, local_fingerprint: &str) -> SyncRecord {
    SyncRecord {
        identity: IdentityKey {
            project_id: ProjectId::new("P"),
            path: "chars/hero".into(),
            product: product.into(),
            version: 3,
            format: "fbx".into(),
        },
        representation_id: RepresentationId::new(format!("rep-{}", product)),
        local_path: format!("Pipeline/chars/hero/{}/{}_v003.fbx", product, product),
        fingerprint: Fingerprint::new(fingerprint),
        local_fingerprint: Fingerprint::new(local_fingerprint),
        synced_at: Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap(),
    }
}

#[core_async::test]
async fn test_records_survive_a_reload() {
    let scratch = ScratchDir::new();
    let model = record("heroModel", "abc", "abc");
    let rig = record("heroRig", "def", "local-edit");

    let index = SyncIndex::load(scratch.fs(), scratch.index_path()).await;
    index.upsert(model.clone()).await;
    index.upsert(rig.clone()).await;
    assert!(scratch.index_path().exists());

    let reloaded = SyncIndex::load(scratch.fs(), scratch.index_path()).await;
    assert_eq!(reloaded.load_status().records, 2);
    assert!(!reloaded.load_status().degraded);
    assert_eq!(reloaded.get(&model.lineage()).await, Some(model));
    assert_eq!(reloaded.get(&rig.lineage()).await, Some(rig));
}

#[core_async::test]
async fn test_removal_is_persisted() {
    let scratch = ScratchDir::new();
    let model = record("heroModel", "abc", "abc");

    let index = SyncIndex::load(scratch.fs(), scratch.index_path()).await;
    index.upsert(model.clone()).await;
    index.remove_by_path(&model.local_path).await;

    let reloaded = SyncIndex::load(scratch.fs(), scratch.index_path()).await;
    assert!(reloaded.is_empty().await);
}

#[core_async::test]
async fn test_document_carries_current_schema_version() -> anyhow::Result<()> {
    let scratch = ScratchDir::new();
    let index = SyncIndex::load(scratch.fs(), scratch.index_path()).await;
    index.upsert(record("heroModel", "abc", "abc")).await;
    index.flush().await?;

    let raw = std::fs::read(scratch.index_path())?;
    let document: serde_json::Value = serde_json::from_slice(&raw)?;
    assert_eq!(
        document["schema_version"].as_u64(),
        Some(u64::from(INDEX_SCHEMA_VERSION))
    );
    assert_eq!(document["records"].as_array().map(Vec::len), Some(1));
    Ok(())
}

#[core_async::test]
async fn test_missing_file_loads_empty() {
    let scratch = ScratchDir::new();

    let index = SyncIndex::load(scratch.fs(), scratch.index_path()).await;

    assert!(index.is_empty().await);
    assert!(!index.load_status().degraded);
    assert!(!scratch.index_path().exists());
}

#[core_async::test]
async fn test_corrupt_file_loads_degraded() {
    let scratch = ScratchDir::new();
    scratch.write_raw("{\"schema_version\": 2, \"records\": [trunc");

    let index = SyncIndex::load(scratch.fs(), scratch.index_path()).await;

    assert!(index.is_empty().await);
    assert!(index.load_status().degraded);

    // The next write replaces the corrupt document.
    index.upsert(record("heroModel", "abc", "abc")).await;
    let reloaded = SyncIndex::load(scratch.fs(), scratch.index_path()).await;
    assert!(!reloaded.load_status().degraded);
    assert_eq!(reloaded.len().await, 1);
}

#[core_async::test]
async fn test_schema_one_document_is_migrated() {
    let scratch = ScratchDir::new();
    scratch.write_raw(
        r#"{
            "schema_version": 1,
            "records": [{
                "identity": {"project_id": "P", "path": "chars/hero", "product": "heroModel", "version": 3, "format": "fbx"},
                "representation_id": "rep-heroModel",
                "local_path": "Pipeline/chars/hero/heroModel/heroModel_v003.fbx",
                "fingerprint": "abc",
                "synced_at": "2024-03-01T09:30:00Z"
            }]
        }"#,
    );

    let index = SyncIndex::load(scratch.fs(), scratch.index_path()).await;

    assert!(!index.load_status().degraded);
    let expected = record("heroModel", "abc", "abc");
    assert_eq!(index.get(&expected.lineage()).await, Some(expected));
}

#[core_async::test]
async fn test_future_schema_loads_degraded() {
    let scratch = ScratchDir::new();
    scratch.write_raw(
        r#"{"schema_version": 99, "saved_at": "2030-01-01T00:00:00Z", "records": []}"#,
    );

    let index = SyncIndex::load(scratch.fs(), scratch.index_path()).await;

    assert!(index.is_empty().await);
    assert!(index.load_status().degraded);
}
