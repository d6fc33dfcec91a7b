//! Per-project entity snapshots with a TTL staleness window

use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use bridge_traits::error::BridgeError;
use bridge_traits::pipeline::{EntityFilter, EntityRecord, PipelineApi};
use bridge_traits::time::Clock;
use chrono::{DateTime, Utc};
use core_async::sync::RwLock;
use core_async::time::{backoff_delay, sleep, timeout, Duration};
use core_pipeline::{EntityStore, ProjectId};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

struct CachedProject {
    store: Arc<EntityStore>,
    fetched_at: DateTime<Utc>,
}

pub struct MetadataCache {
    api: Arc<dyn PipelineApi>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    request_timeout: Duration,
    retry_attempts: u32,
    retry_base_delay: Duration,
    retry_max_delay: Duration,
    entries: RwLock<HashMap<ProjectId, CachedProject>>,
}

impl MetadataCache {
    pub fn new(api: Arc<dyn PipelineApi>, clock: Arc<dyn Clock>, config: &SyncConfig) -> Self {
        Self {
            api,
            clock,
            ttl: config.metadata_ttl,
            request_timeout: config.action_timeout,
            retry_attempts: config.retry_attempts.max(1),
            retry_base_delay: config.retry_base_delay,
            retry_max_delay: config.retry_max_delay,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Snapshot for `project`, fetched when missing or older than the TTL.
    ///
    /// # Errors
    ///
    /// `MalformedEntity` when the listing does not validate, `TransientIo`
    /// once retries are exhausted.
    pub async fn store(&self, project: &ProjectId) -> Result<Arc<EntityStore>> {
        if let Some(store) = self.cached(project).await {
            return Ok(store);
        }
        self.refresh(project).await
    }

    /// Fresh cached snapshot, if any. Never fetches.
    pub async fn cached(&self, project: &ProjectId) -> Option<Arc<EntityStore>> {
        let entries = self.entries.read().await;
        let entry = entries.get(project)?;
        if self.is_stale(entry.fetched_at) {
            debug!(project = %project, "Cached metadata expired");
            return None;
        }
        Some(entry.store.clone())
    }

    /// Fetch and cache regardless of age.
    #[instrument(skip(self), fields(project = %project))]
    pub async fn refresh(&self, project: &ProjectId) -> Result<Arc<EntityStore>> {
        let records = self.fetch(project).await?;
        let store = EntityStore::from_records(records)?;
        if &store.project().id != project {
            return Err(SyncError::MalformedEntity {
                kind: "project".to_string(),
                id: store.project().id.to_string(),
                reason: format!("listing for {} returned another project", project),
            });
        }

        let store = Arc::new(store);
        self.entries.write().await.insert(
            project.clone(),
            CachedProject {
                store: store.clone(),
                fetched_at: self.clock.now(),
            },
        );
        info!(
            representations = store.representation_count(),
            "Fetched project metadata"
        );
        Ok(store)
    }

    /// Drop the cached snapshot; returns whether one was present.
    pub async fn invalidate(&self, project: &ProjectId) -> bool {
        let removed = self.entries.write().await.remove(project).is_some();
        if removed {
            debug!(project = %project, "Invalidated cached metadata");
        }
        removed
    }

    fn is_stale(&self, fetched_at: DateTime<Utc>) -> bool {
        let age = (self.clock.now() - fetched_at)
            .to_std()
            .unwrap_or(Duration::ZERO);
        age >= self.ttl
    }

    async fn fetch(&self, project: &ProjectId) -> Result<Vec<EntityRecord>> {
        let filter = EntityFilter::all();
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = match timeout(
                self.request_timeout,
                self.api.list_entities(project.as_str(), &filter),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(BridgeError::Timeout(format!(
                    "list_entities after {:?}",
                    self.request_timeout
                ))),
            };

            match result {
                Ok(records) => return Ok(records),
                Err(e) if e.is_transient() && attempt < self.retry_attempts => {
                    let delay =
                        backoff_delay(self.retry_base_delay, self.retry_max_delay, attempt - 1);
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Listing entities failed, retrying"
                    );
                    sleep(delay).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}
