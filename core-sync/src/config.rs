//! Sync engine tuning knobs

use crate::error::{Result, SyncError};
use core_async::time::Duration;

/// Limits and defaults for pull and push passes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Actions of one tier that may run at the same time
    pub max_parallelism: usize,
    /// Upper bound on a single attempt of an action
    pub action_timeout: Duration,
    /// Total attempts for actions that fail transiently
    pub retry_attempts: u32,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
    /// How long a project's entity snapshot is trusted
    pub metadata_ttl: Duration,
    /// Editor folder new imports are placed under
    pub content_root: String,
    /// Let rejected versions count as "latest" when planning
    pub include_rejected: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_parallelism: 4,
            action_timeout: Duration::from_secs(60),
            retry_attempts: 3,
            retry_base_delay: Duration::from_millis(100),
            retry_max_delay: Duration::from_secs(5),
            metadata_ttl: Duration::from_secs(300),
            content_root: "Pipeline".to_string(),
            include_rejected: false,
        }
    }
}

impl SyncConfig {
    pub fn with_max_parallelism(mut self, max_parallelism: usize) -> Self {
        self.max_parallelism = max_parallelism;
        self
    }

    pub fn with_action_timeout(mut self, timeout: Duration) -> Self {
        self.action_timeout = timeout;
        self
    }

    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts;
        self
    }

    pub fn with_retry_delays(mut self, base: Duration, max: Duration) -> Self {
        self.retry_base_delay = base;
        self.retry_max_delay = max;
        self
    }

    pub fn with_metadata_ttl(mut self, ttl: Duration) -> Self {
        self.metadata_ttl = ttl;
        self
    }

    pub fn with_content_root(mut self, root: impl Into<String>) -> Self {
        self.content_root = root.into();
        self
    }

    pub fn with_include_rejected(mut self, include: bool) -> Self {
        self.include_rejected = include;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_parallelism == 0 {
            return Err(SyncError::Config(
                "max_parallelism must be at least 1".to_string(),
            ));
        }
        if self.retry_attempts == 0 {
            return Err(SyncError::Config(
                "retry_attempts must be at least 1".to_string(),
            ));
        }
        if self.action_timeout.is_zero() {
            return Err(SyncError::Config(
                "action_timeout must be positive".to_string(),
            ));
        }
        if self.retry_base_delay > self.retry_max_delay {
            return Err(SyncError::Config(format!(
                "retry_base_delay ({:?}) exceeds retry_max_delay ({:?})",
                self.retry_base_delay, self.retry_max_delay
            )));
        }
        if self.content_root.contains("..") {
            return Err(SyncError::Config(format!(
                "content_root may not leave the content directory: {}",
                self.content_root
            )));
        }
        Ok(())
    }

    /// Editor path for a freshly imported representation.
    pub(crate) fn import_destination(
        &self,
        path: &str,
        product: &str,
        version: u32,
        format: &str,
    ) -> String {
        let root = self.content_root.trim_matches('/');
        let file = format!("{}/{}/{}_v{:03}.{}", path, product, product, version, format);
        if root.is_empty() {
            file
        } else {
            format!("{}/{}", root, file)
        }
    }
}
