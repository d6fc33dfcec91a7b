//! # Sync Pass Repository
//!
//! Persists pass history so hosts can show what the last pulls and pushes
//! did after a restart.

use crate::{PassId, PassProgress, PassStats, Result, SyncError, SyncKind, SyncPass, SyncStatus};
use async_trait::async_trait;
use sqlx::{FromRow, SqlitePool};

// ============================================================================
// Repository Trait
// ============================================================================

/// Repository trait for sync pass persistence
#[async_trait]
pub trait SyncPassRepository: Send + Sync {
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    async fn insert(&self, pass: &SyncPass) -> Result<()>;

    /// # Errors
    ///
    /// Returns `PassNotFound` if the pass was never inserted
    async fn update(&self, pass: &SyncPass) -> Result<()>;

    async fn find_by_id(&self, id: &PassId) -> Result<Option<SyncPass>>;

    /// All passes of a project, most recent first
    async fn find_by_project(&self, project_id: &str) -> Result<Vec<SyncPass>>;

    async fn find_by_status(&self, status: SyncStatus) -> Result<Vec<SyncPass>>;

    /// Pass history for a project (most recent first)
    ///
    /// # Arguments
    ///
    /// * `project_id` - The project to get history for
    /// * `limit` - Maximum number of passes to return
    async fn get_history(&self, project_id: &str, limit: u32) -> Result<Vec<SyncPass>>;

    async fn delete(&self, id: &PassId) -> Result<()>;

    /// Check if there's a pending or running pass for a project
    async fn has_active_pass(&self, project_id: &str) -> Result<bool>;
}

// ============================================================================
// SQLite Implementation
// ============================================================================

/// SQLite implementation of [`SyncPassRepository`]
pub struct SqliteSyncPassRepository {
    pool: SqlitePool,
}

impl SqliteSyncPassRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the `sync_passes` table if it does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    pub async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sync_passes (
                id TEXT PRIMARY KEY NOT NULL,
                project_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                completed_actions INTEGER NOT NULL DEFAULT 0,
                total_actions INTEGER NOT NULL DEFAULT 0,
                phase TEXT NOT NULL DEFAULT '',
                stats TEXT,
                error_message TEXT,
                created_at INTEGER NOT NULL,
                started_at INTEGER,
                completed_at INTEGER,
                CONSTRAINT sync_passes_status_check CHECK (
                    status IN ('pending', 'running', 'completed', 'failed', 'cancelled')
                ),
                CONSTRAINT sync_passes_kind_check CHECK (kind IN ('pull', 'push'))
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_sync_passes_project ON sync_passes (project_id, created_at)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        Ok(())
    }
}

const SELECT_COLUMNS: &str = r#"
    SELECT id, project_id, kind, status,
           completed_actions, total_actions, phase,
           stats, error_message,
           created_at, started_at, completed_at
    FROM sync_passes
"#;

/// Database row representation of a sync pass
#[derive(Debug, FromRow)]
struct SyncPassRow {
    id: String,
    project_id: String,
    kind: String,
    status: String,
    completed_actions: i64,
    total_actions: i64,
    phase: String,
    stats: Option<String>,
    error_message: Option<String>,
    created_at: i64,
    started_at: Option<i64>,
    completed_at: Option<i64>,
}

impl TryFrom<SyncPassRow> for SyncPass {
    type Error = SyncError;

    fn try_from(row: SyncPassRow) -> Result<Self> {
        let status: SyncStatus = row.status.parse()?;
        let kind: SyncKind = row.kind.parse()?;

        let mut progress = PassProgress::new();
        progress.update(
            row.completed_actions.max(0) as u64,
            row.total_actions.max(0) as u64,
            &row.phase,
        );
        if status == SyncStatus::Completed {
            progress.percent = 100;
        }

        let stats = row
            .stats
            .as_deref()
            .map(serde_json::from_str::<PassStats>)
            .transpose()?;

        Ok(SyncPass {
            id: PassId::from_string(&row.id)?,
            project_id: row.project_id,
            kind,
            status,
            progress,
            stats,
            error_message: row.error_message,
            created_at: row.created_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
        })
    }
}

fn encode_stats(pass: &SyncPass) -> Result<Option<String>> {
    pass.stats
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(SyncError::from)
}

#[async_trait]
impl SyncPassRepository for SqliteSyncPassRepository {
    async fn insert(&self, pass: &SyncPass) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_passes (
                id, project_id, kind, status,
                completed_actions, total_actions, phase,
                stats, error_message,
                created_at, started_at, completed_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(pass.id.as_str())
        .bind(&pass.project_id)
        .bind(pass.kind.as_str())
        .bind(pass.status.as_str())
        .bind(pass.progress.completed_actions as i64)
        .bind(pass.progress.total_actions as i64)
        .bind(&pass.progress.phase)
        .bind(encode_stats(pass)?)
        .bind(&pass.error_message)
        .bind(pass.created_at)
        .bind(pass.started_at)
        .bind(pass.completed_at)
        .execute(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        Ok(())
    }

    async fn update(&self, pass: &SyncPass) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE sync_passes SET
                status = ?,
                completed_actions = ?,
                total_actions = ?,
                phase = ?,
                stats = ?,
                error_message = ?,
                started_at = ?,
                completed_at = ?
            WHERE id = ?
            "#,
        )
        .bind(pass.status.as_str())
        .bind(pass.progress.completed_actions as i64)
        .bind(pass.progress.total_actions as i64)
        .bind(&pass.progress.phase)
        .bind(encode_stats(pass)?)
        .bind(&pass.error_message)
        .bind(pass.started_at)
        .bind(pass.completed_at)
        .bind(pass.id.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(SyncError::PassNotFound {
                pass_id: pass.id.to_string(),
            });
        }

        Ok(())
    }

    async fn find_by_id(&self, id: &PassId) -> Result<Option<SyncPass>> {
        let row = sqlx::query_as::<_, SyncPassRow>(&format!("{SELECT_COLUMNS} WHERE id = ?"))
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| SyncError::Database(e.to_string()))?;

        row.map(SyncPass::try_from).transpose()
    }

    async fn find_by_project(&self, project_id: &str) -> Result<Vec<SyncPass>> {
        let rows = sqlx::query_as::<_, SyncPassRow>(&format!(
            "{SELECT_COLUMNS} WHERE project_id = ? ORDER BY created_at DESC, rowid DESC"
        ))
        .bind(project_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        rows.into_iter()
            .map(SyncPass::try_from)
            .collect::<Result<Vec<_>>>()
    }

    async fn find_by_status(&self, status: SyncStatus) -> Result<Vec<SyncPass>> {
        let rows = sqlx::query_as::<_, SyncPassRow>(&format!(
            "{SELECT_COLUMNS} WHERE status = ? ORDER BY created_at DESC, rowid DESC"
        ))
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        rows.into_iter()
            .map(SyncPass::try_from)
            .collect::<Result<Vec<_>>>()
    }

    async fn get_history(&self, project_id: &str, limit: u32) -> Result<Vec<SyncPass>> {
        let rows = sqlx::query_as::<_, SyncPassRow>(&format!(
            "{SELECT_COLUMNS} WHERE project_id = ? ORDER BY created_at DESC, rowid DESC LIMIT ?"
        ))
        .bind(project_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        rows.into_iter()
            .map(SyncPass::try_from)
            .collect::<Result<Vec<_>>>()
    }

    async fn delete(&self, id: &PassId) -> Result<()> {
        let result = sqlx::query("DELETE FROM sync_passes WHERE id = ?")
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| SyncError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(SyncError::PassNotFound {
                pass_id: id.to_string(),
            });
        }

        Ok(())
    }

    async fn has_active_pass(&self, project_id: &str) -> Result<bool> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*)
            FROM sync_passes
            WHERE project_id = ? AND status IN ('pending', 'running')
            "#,
        )
        .bind(project_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        Ok(count > 0)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn create_test_repo() -> SqliteSyncPassRepository {
        // One connection, otherwise every connection gets its own in-memory database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let repo = SqliteSyncPassRepository::new(pool);
        repo.initialize().await.unwrap();
        repo
    }

    #[core_async::test]
    async fn test_insert_and_find_by_id() {
        let repo = create_test_repo().await;

        let pass = SyncPass::new("P", SyncKind::Pull);
        let pass_id = pass.id;
        repo.insert(&pass).await.unwrap();

        let found = repo.find_by_id(&pass_id).await.unwrap().unwrap();
        assert_eq!(found.id, pass_id);
        assert_eq!(found.project_id, "P");
        assert_eq!(found.kind, SyncKind::Pull);
        assert_eq!(found.status, SyncStatus::Pending);
        assert!(found.stats.is_none());
    }

    #[core_async::test]
    async fn test_initialize_is_idempotent() {
        let repo = create_test_repo().await;
        repo.initialize().await.unwrap();
    }

    #[core_async::test]
    async fn test_update_progress() {
        let repo = create_test_repo().await;

        let pass = SyncPass::new("P", SyncKind::Pull);
        let pass_id = pass.id;
        repo.insert(&pass).await.unwrap();

        let mut pass = pass.start().unwrap();
        pass.update_progress(2, 8, "Tier 1").unwrap();
        repo.update(&pass).await.unwrap();

        let found = repo.find_by_id(&pass_id).await.unwrap().unwrap();
        assert_eq!(found.status, SyncStatus::Running);
        assert_eq!(found.progress.completed_actions, 2);
        assert_eq!(found.progress.total_actions, 8);
        assert_eq!(found.progress.percent, 25);
        assert_eq!(found.progress.phase, "Tier 1");
    }

    #[core_async::test]
    async fn test_update_unknown_pass() {
        let repo = create_test_repo().await;
        let pass = SyncPass::new("P", SyncKind::Push);
        assert!(matches!(
            repo.update(&pass).await,
            Err(SyncError::PassNotFound { .. })
        ));
    }

    #[core_async::test]
    async fn test_completed_pass_keeps_stats() {
        let repo = create_test_repo().await;

        let pass = SyncPass::new("P", SyncKind::Pull).start().unwrap();
        let pass_id = pass.id;
        let stats = PassStats {
            imported: 4,
            skipped: 10,
            conflicted: 1,
            ..PassStats::default()
        };
        let pass = pass.complete(stats).unwrap();
        repo.insert(&pass).await.unwrap();

        let found = repo.find_by_id(&pass_id).await.unwrap().unwrap();
        assert_eq!(found.status, SyncStatus::Completed);
        assert_eq!(found.stats, Some(stats));
        assert_eq!(found.progress.percent, 100);
    }

    #[core_async::test]
    async fn test_find_by_project_and_status() {
        let repo = create_test_repo().await;

        let first = SyncPass::new("P", SyncKind::Pull);
        let second = SyncPass::new("P", SyncKind::Push).start().unwrap();
        let other = SyncPass::new("Q", SyncKind::Pull);
        repo.insert(&first).await.unwrap();
        repo.insert(&second).await.unwrap();
        repo.insert(&other).await.unwrap();

        assert_eq!(repo.find_by_project("P").await.unwrap().len(), 2);
        assert_eq!(repo.find_by_project("Q").await.unwrap().len(), 1);
        assert_eq!(
            repo.find_by_status(SyncStatus::Pending).await.unwrap().len(),
            2
        );
        assert_eq!(
            repo.find_by_status(SyncStatus::Running).await.unwrap().len(),
            1
        );
    }

    #[core_async::test]
    async fn test_has_active_pass() {
        let repo = create_test_repo().await;
        assert!(!repo.has_active_pass("P").await.unwrap());

        let pass = SyncPass::new("P", SyncKind::Pull);
        repo.insert(&pass).await.unwrap();
        assert!(repo.has_active_pass("P").await.unwrap());

        let pass = pass.start().unwrap().fail("server unreachable").unwrap();
        repo.update(&pass).await.unwrap();
        assert!(!repo.has_active_pass("P").await.unwrap());

        let found = repo.find_by_id(&pass.id).await.unwrap().unwrap();
        assert_eq!(found.error_message.as_deref(), Some("server unreachable"));
    }

    #[core_async::test]
    async fn test_get_history_is_most_recent_first() {
        let repo = create_test_repo().await;

        let mut ids = Vec::new();
        for _ in 0..5 {
            let pass = SyncPass::new("P", SyncKind::Pull);
            ids.push(pass.id);
            repo.insert(&pass).await.unwrap();
        }

        let history = repo.get_history("P", 3).await.unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].id, ids[4]);
        assert_eq!(history[2].id, ids[2]);
    }

    #[core_async::test]
    async fn test_delete_pass() {
        let repo = create_test_repo().await;

        let pass = SyncPass::new("P", SyncKind::Pull);
        let pass_id = pass.id;
        repo.insert(&pass).await.unwrap();
        repo.delete(&pass_id).await.unwrap();

        assert!(repo.find_by_id(&pass_id).await.unwrap().is_none());
        assert!(matches!(
            repo.delete(&pass_id).await,
            Err(SyncError::PassNotFound { .. })
        ));
    }
}
