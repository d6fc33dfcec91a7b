//! # Sync Index
//!
//! Local record of which representation each editor asset was last synced
//! from, keyed by lineage. Reads are in-memory snapshots; writes go through
//! per-key locks and are persisted as one JSON document.
//!
//! The on-disk document is
//! `{ "schema_version": 2, "saved_at": ..., "records": [...] }`. Schema 1
//! documents lack `local_fingerprint` and are migrated on load. Anything
//! unreadable loads as an empty index.

use crate::error::{Result, SyncError};
use bridge_traits::storage::FileSystemAccess;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use core_async::sync::{Mutex, OwnedMutexGuard, RwLock};
use core_pipeline::{Fingerprint, IdentityKey, LineageKey, RepresentationId, SyncRecord};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const INDEX_SCHEMA_VERSION: u32 = 2;

// ============================================================================
// Snapshot
// ============================================================================

/// Point-in-time copy of the index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexSnapshot {
    records: BTreeMap<LineageKey, SyncRecord>,
}

impl IndexSnapshot {
    pub fn from_records(records: impl IntoIterator<Item = SyncRecord>) -> Self {
        Self {
            records: records.into_iter().map(|r| (r.lineage(), r)).collect(),
        }
    }

    pub fn get(&self, lineage: &LineageKey) -> Option<&SyncRecord> {
        self.records.get(lineage)
    }

    pub fn by_local_path(&self, path: &str) -> Option<&SyncRecord> {
        self.records.values().find(|r| r.local_path == path)
    }

    pub fn records(&self) -> impl Iterator<Item = &SyncRecord> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

// ============================================================================
// Key Locks
// ============================================================================

/// One async mutex per lineage key.
///
/// Entries nobody holds or waits on are dropped on the next `lock`.
#[derive(Default)]
pub struct KeyLocks {
    locks: Mutex<HashMap<LineageKey, Arc<Mutex<()>>>>,
}

impl KeyLocks {
    pub async fn lock(&self, key: &LineageKey) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            // Guards and waiters each own a clone of the entry.
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks.entry(key.clone()).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Keys with a live entry.
    pub async fn len(&self) -> usize {
        self.locks.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.locks.lock().await.is_empty()
    }
}

// ============================================================================
// Document
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
struct IndexDocument {
    schema_version: u32,
    saved_at: DateTime<Utc>,
    records: Vec<SyncRecord>,
}

#[derive(Debug, Deserialize)]
struct IndexHeader {
    #[serde(default = "schema_v1")]
    schema_version: u32,
}

fn schema_v1() -> u32 {
    1
}

/// Record layout before local drift detection existed.
#[derive(Debug, Deserialize)]
struct RecordV1 {
    identity: IdentityKey,
    representation_id: RepresentationId,
    local_path: String,
    fingerprint: Fingerprint,
    synced_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct DocumentV1 {
    records: Vec<RecordV1>,
}

impl From<RecordV1> for SyncRecord {
    fn from(v1: RecordV1) -> Self {
        SyncRecord {
            identity: v1.identity,
            representation_id: v1.representation_id,
            local_path: v1.local_path,
            local_fingerprint: v1.fingerprint.clone(),
            fingerprint: v1.fingerprint,
            synced_at: v1.synced_at,
        }
    }
}

fn decode_document(raw: &[u8]) -> Result<Vec<SyncRecord>> {
    let header: IndexHeader = serde_json::from_slice(raw)?;
    match header.schema_version {
        1 => {
            let doc: DocumentV1 = serde_json::from_slice(raw)?;
            info!(records = doc.records.len(), "Migrating sync index from schema 1");
            Ok(doc.records.into_iter().map(SyncRecord::from).collect())
        }
        INDEX_SCHEMA_VERSION => {
            let doc: IndexDocument = serde_json::from_slice(raw)?;
            Ok(doc.records)
        }
        other => Err(SyncError::Serialization(format!(
            "unsupported index schema version {}",
            other
        ))),
    }
}

// ============================================================================
// Index
// ============================================================================

struct Persistence {
    fs: Arc<dyn FileSystemAccess>,
    path: PathBuf,
}

/// How the index came up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexLoadStatus {
    pub records: usize,
    /// The file existed but could not be used
    pub degraded: bool,
}

pub struct SyncIndex {
    records: RwLock<BTreeMap<LineageKey, SyncRecord>>,
    locks: KeyLocks,
    persistence: Option<Persistence>,
    persist_lock: Mutex<()>,
    load_status: IndexLoadStatus,
}

impl SyncIndex {
    /// Index that is never written to disk.
    pub fn in_memory() -> Self {
        Self::from_parts(BTreeMap::new(), None, false)
    }

    fn from_parts(
        records: BTreeMap<LineageKey, SyncRecord>,
        persistence: Option<Persistence>,
        degraded: bool,
    ) -> Self {
        let load_status = IndexLoadStatus {
            records: records.len(),
            degraded,
        };
        Self {
            records: RwLock::new(records),
            locks: KeyLocks::default(),
            persistence,
            persist_lock: Mutex::new(()),
            load_status,
        }
    }

    /// Load the index stored at `path`.
    ///
    /// Never fails: a missing file is an empty index, and a corrupt or
    /// future-schema file is an empty, degraded index.
    pub async fn load(fs: Arc<dyn FileSystemAccess>, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let (records, degraded) = match Self::read_records(fs.as_ref(), &path).await {
            Ok(Some(records)) => (records, false),
            Ok(None) => {
                debug!(path = ?path, "No sync index on disk, starting empty");
                (Vec::new(), false)
            }
            Err(e) => {
                warn!(path = ?path, error = %e, "Sync index unreadable, starting empty");
                (Vec::new(), true)
            }
        };

        let records: BTreeMap<_, _> = records.into_iter().map(|r| (r.lineage(), r)).collect();
        info!(records = records.len(), degraded, "Loaded sync index");
        Self::from_parts(records, Some(Persistence { fs, path }), degraded)
    }

    async fn read_records(
        fs: &dyn FileSystemAccess,
        path: &Path,
    ) -> Result<Option<Vec<SyncRecord>>> {
        if !fs.exists(path).await? {
            return Ok(None);
        }
        let raw = fs.read_file(path).await?;
        decode_document(&raw).map(Some)
    }

    pub fn load_status(&self) -> IndexLoadStatus {
        self.load_status
    }

    pub async fn snapshot(&self) -> IndexSnapshot {
        IndexSnapshot {
            records: self.records.read().await.clone(),
        }
    }

    pub async fn get(&self, lineage: &LineageKey) -> Option<SyncRecord> {
        self.records.read().await.get(lineage).cloned()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    /// Exclusive writer access for one lineage key. Hold the guard across
    /// the whole action, index write included.
    pub async fn lock(&self, lineage: &LineageKey) -> OwnedMutexGuard<()> {
        self.locks.lock(lineage).await
    }

    /// Store `record`, replacing any other record that points at the same
    /// local path.
    pub async fn upsert(&self, record: SyncRecord) {
        {
            let mut records = self.records.write().await;
            let lineage = record.lineage();
            records.retain(|key, existing| {
                key == &lineage || existing.local_path != record.local_path
            });
            records.insert(lineage, record);
        }
        self.persist_logged().await;
    }

    pub async fn remove(&self, lineage: &LineageKey) -> Option<SyncRecord> {
        let removed = self.records.write().await.remove(lineage);
        if removed.is_some() {
            self.persist_logged().await;
        }
        removed
    }

    pub async fn remove_by_path(&self, local_path: &str) -> Vec<SyncRecord> {
        let removed = self.remove_where(|r| r.local_path == local_path).await;
        if !removed.is_empty() {
            self.persist_logged().await;
        }
        removed
    }

    /// Drop records for several lineage keys with a single write.
    pub async fn remove_all(&self, lineages: &[LineageKey]) -> Vec<SyncRecord> {
        let removed = self.remove_where(|r| lineages.contains(&r.lineage())).await;
        if !removed.is_empty() {
            self.persist_logged().await;
        }
        removed
    }

    async fn remove_where(&self, predicate: impl Fn(&SyncRecord) -> bool) -> Vec<SyncRecord> {
        let mut records = self.records.write().await;
        let doomed: Vec<LineageKey> = records
            .iter()
            .filter(|(_, r)| predicate(r))
            .map(|(k, _)| k.clone())
            .collect();
        doomed
            .iter()
            .filter_map(|key| records.remove(key))
            .collect()
    }

    /// Write the current records to disk. No-op for in-memory indexes.
    pub async fn flush(&self) -> Result<()> {
        let Some(persistence) = &self.persistence else {
            return Ok(());
        };
        let _guard = self.persist_lock.lock().await;

        let document = IndexDocument {
            schema_version: INDEX_SCHEMA_VERSION,
            saved_at: Utc::now(),
            records: self.records.read().await.values().cloned().collect(),
        };
        let data = serde_json::to_vec_pretty(&document)?;

        if let Some(parent) = persistence.path.parent() {
            if !parent.as_os_str().is_empty() {
                persistence.fs.create_dir_all(parent).await?;
            }
        }
        persistence
            .fs
            .write_file_atomic(&persistence.path, Bytes::from(data))
            .await?;
        debug!(
            records = document.records.len(),
            path = ?persistence.path,
            "Persisted sync index"
        );
        Ok(())
    }

    async fn persist_logged(&self) {
        if let Err(e) = self.flush().await {
            warn!(error = %e, "Failed to persist sync index");
        }
    }
}
