//! # Sync Coordinator
//!
//! Runs pull passes in the background, one per project at a time, and keeps
//! pass history in a [`SyncPassRepository`].
//!
//! ## Workflow
//!
//! 1. `start_sync` refuses a second pull for a project that already has one
//! 2. A `Running` [`SyncPass`] is recorded and a task is spawned
//! 3. The task runs [`SyncEngine::pull`] under the pass's cancellation token
//! 4. The final status (completed, cancelled or failed) is recorded and the
//!    project is released, also when the pull panicked
//!
//! Pushes run inline. They do not block pulls: both sides take the index
//! lock of the lineage they touch.
//!
//! ## Usage
//!
//! ```ignore
//! let handle = coordinator.start_sync(SyncRequest::new(SyncScope::project("P"))).await?;
//! let report = handle.wait().await?;
//! println!("{} imported", report.stats().imported);
//! ```

use crate::engine::{PushRequest, SyncEngine};
use crate::error::{Result, SyncError};
use crate::job::{PassId, SyncKind, SyncPass};
use crate::planner::Resolutions;
use crate::report::SyncReport;
use crate::repository::SyncPassRepository;
use core_async::sync::{CancellationToken, Mutex};
use core_async::task::JoinHandle;
use core_pipeline::{ProjectId, SyncScope};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// What to pull and how to settle known conflicts.
#[derive(Debug, Clone)]
pub struct SyncRequest {
    pub scope: SyncScope,
    pub resolutions: Resolutions,
}

impl SyncRequest {
    pub fn new(scope: SyncScope) -> Self {
        Self {
            scope,
            resolutions: Resolutions::new(),
        }
    }

    pub fn with_resolutions(mut self, resolutions: Resolutions) -> Self {
        self.resolutions = resolutions;
        self
    }
}

/// A running pull pass.
#[derive(Debug)]
pub struct SyncHandle {
    pub pass_id: PassId,
    pub project_id: ProjectId,
    token: CancellationToken,
    task: JoinHandle<Result<SyncReport>>,
}

impl SyncHandle {
    /// Stop dispatching. In-flight actions still finish.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the pass to finish.
    ///
    /// # Errors
    ///
    /// Pass-level failures of the pull, or `Task` if the pull panicked.
    pub async fn wait(self) -> Result<SyncReport> {
        self.task
            .await
            .map_err(|e| SyncError::Task(e.to_string()))?
    }
}

struct ActivePass {
    pass_id: PassId,
    token: CancellationToken,
}

/// Background pass runner with history.
#[derive(Clone)]
pub struct SyncCoordinator {
    engine: Arc<SyncEngine>,
    repository: Arc<dyn SyncPassRepository>,
    active: Arc<Mutex<HashMap<ProjectId, ActivePass>>>,
}

impl SyncCoordinator {
    pub fn new(engine: Arc<SyncEngine>, repository: Arc<dyn SyncPassRepository>) -> Self {
        Self {
            engine,
            repository,
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    /// Start a pull pass in the background.
    ///
    /// # Errors
    ///
    /// `SyncInProgress` if the project already has a running pull, or a
    /// `Database` error if the pass could not be recorded.
    #[instrument(skip(self, request), fields(project = %request.scope.project_id))]
    pub async fn start_sync(&self, request: SyncRequest) -> Result<SyncHandle> {
        let project_id = request.scope.project_id.clone();
        let mut active = self.active.lock().await;
        if active.contains_key(&project_id) {
            return Err(SyncError::SyncInProgress {
                project_id: project_id.to_string(),
            });
        }

        let pass = SyncPass::new(project_id.as_str(), SyncKind::Pull).start()?;
        let pass_id = pass.id;
        self.repository.insert(&pass).await?;

        let token = CancellationToken::new();
        active.insert(
            project_id.clone(),
            ActivePass {
                pass_id,
                token: token.clone(),
            },
        );
        drop(active);

        info!(pass_id = %pass_id, "Started pull pass");

        let coordinator = self.clone();
        let engine = self.engine.clone();
        let task_token = token.clone();
        let released = project_id.clone();
        let task = core_async::task::spawn(async move {
            // The pull runs in its own task so a panic still releases the project.
            let pull = core_async::task::spawn(async move {
                engine
                    .pull(pass_id, &request.scope, &request.resolutions, &task_token)
                    .await
            });
            let result = match pull.await {
                Ok(result) => result,
                Err(e) => {
                    warn!(pass_id = %pass_id, error = %e, "Pull task aborted");
                    Err(SyncError::Task(e.to_string()))
                }
            };
            coordinator.record_outcome(pass, &result).await;
            coordinator.active.lock().await.remove(&released);
            result
        });

        Ok(SyncHandle {
            pass_id,
            project_id,
            token,
            task,
        })
    }

    /// Cancel a running pull pass by id.
    ///
    /// # Errors
    ///
    /// `PassNotFound` if no running pull has that id.
    pub async fn cancel(&self, pass_id: PassId) -> Result<()> {
        let active = self.active.lock().await;
        let entry = active
            .values()
            .find(|entry| entry.pass_id == pass_id)
            .ok_or_else(|| SyncError::PassNotFound {
                pass_id: pass_id.to_string(),
            })?;
        entry.token.cancel();
        info!(pass_id = %pass_id, "Cancellation requested");
        Ok(())
    }

    /// Publish one local asset, recorded as a push pass.
    ///
    /// # Errors
    ///
    /// Whatever [`SyncEngine::push`] reports, `VersionConflict` included.
    pub async fn push(&self, request: &PushRequest) -> Result<SyncReport> {
        let pass = SyncPass::new(request.project_id.as_str(), SyncKind::Push).start()?;
        self.repository.insert(&pass).await?;

        let result = self.engine.push(pass.id, request).await;
        self.record_outcome(pass, &result).await;
        result
    }

    async fn record_outcome(&self, pass: SyncPass, result: &Result<SyncReport>) {
        let pass_id = pass.id;
        let finished = match result {
            Ok(report) => {
                let stats = report.stats();
                let total = report.actions.len() as u64;
                let mut pass = pass;
                let _ = pass.update_progress(total - stats.cancelled, total, "Finished");
                if report.cancelled {
                    pass.cancel(Some(stats))
                } else {
                    pass.complete(stats)
                }
            }
            Err(e) => pass.fail(e.to_string()),
        };

        let persisted = match finished {
            Ok(pass) => self.repository.update(&pass).await,
            Err(e) => Err(e),
        };
        if let Err(e) = persisted {
            warn!(pass_id = %pass_id, error = %e, "Failed to record pass outcome");
        }
    }

    pub async fn is_pass_active(&self, project_id: &ProjectId) -> bool {
        self.active.lock().await.contains_key(project_id)
    }

    /// # Errors
    ///
    /// `PassNotFound` if the pass was never recorded.
    pub async fn get_status(&self, pass_id: PassId) -> Result<SyncPass> {
        self.repository
            .find_by_id(&pass_id)
            .await?
            .ok_or_else(|| SyncError::PassNotFound {
                pass_id: pass_id.to_string(),
            })
    }

    /// Most recent passes of a project first.
    pub async fn list_history(&self, project_id: &ProjectId, limit: u32) -> Result<Vec<SyncPass>> {
        self.repository.get_history(project_id.as_str(), limit).await
    }
}
