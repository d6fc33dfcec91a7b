use bridge_traits::error::BridgeError;
use core_pipeline::PipelineError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Malformed {kind} entity {id}: {reason}")]
    MalformedEntity {
        kind: String,
        id: String,
        reason: String,
    },

    #[error("Representation {representation_id} has a cyclic dependency: {}", cycle.join(" -> "))]
    CyclicDependency {
        representation_id: String,
        cycle: Vec<String>,
    },

    #[error("Version {attempted} of product {product_id} was already claimed (latest: {latest:?})")]
    VersionConflict {
        product_id: String,
        attempted: u32,
        latest: Option<u32>,
    },

    #[error("{identity} diverged: local {local_fingerprint}, remote {remote_fingerprint}")]
    DivergedAsset {
        identity: String,
        local_fingerprint: String,
        remote_fingerprint: String,
    },

    #[error("Local asset {local_path} is claimed by several representations: {}", candidates.join(", "))]
    IdentityAmbiguity {
        local_path: String,
        candidates: Vec<String>,
    },

    #[error("{identity} depends on {dependency}, which did not sync")]
    DependencyFailed { identity: String, dependency: String },

    #[error("Transient IO failure: {0}")]
    TransientIo(String),

    #[error("Import failed: {0}")]
    Import(String),

    #[error("Export failed: {0}")]
    Export(String),

    #[error("Action timed out after {0} ms")]
    Timeout(u64),

    #[error("Sync cancelled")]
    Cancelled,

    #[error("Sync already in progress for project {project_id}")]
    SyncInProgress { project_id: String },

    #[error("Sync task ended abnormally: {0}")]
    Task(String),

    #[error("Sync pass {pass_id} not found")]
    PassNotFound { pass_id: String },

    #[error("Invalid pass ID: {0}")]
    InvalidPassId(String),

    #[error("Invalid sync status: {0}")]
    InvalidStatus(String),

    #[error("Invalid sync kind: {0}")]
    InvalidSyncKind(String),

    #[error("Invalid state transition from {from} to {to}: {reason}")]
    InvalidStateTransition {
        from: String,
        to: String,
        reason: String,
    },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Bridge error: {0}")]
    Bridge(BridgeError),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Not found: {kind} {id}")]
    NotFound { kind: String, id: String },

    #[error("Invalid {field}: {message}")]
    InvalidInput { field: String, message: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl SyncError {
    /// Timeouts and transient IO are worth another attempt; everything else is final.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::TransientIo(_) | SyncError::Timeout(_))
    }

    /// Editor import failure. Transient bridge errors stay retryable.
    pub fn import_error(err: BridgeError) -> Self {
        if err.is_transient() {
            SyncError::TransientIo(err.to_string())
        } else {
            SyncError::Import(err.to_string())
        }
    }

    /// Editor export failure. Transient bridge errors stay retryable.
    pub fn export_error(err: BridgeError) -> Self {
        if err.is_transient() {
            SyncError::TransientIo(err.to_string())
        } else {
            SyncError::Export(err.to_string())
        }
    }

    pub(crate) fn invalid_input(field: impl Into<String>, message: impl Into<String>) -> Self {
        SyncError::InvalidInput {
            field: field.into(),
            message: message.into(),
        }
    }

    pub(crate) fn not_found(kind: impl Into<String>, id: impl Into<String>) -> Self {
        SyncError::NotFound {
            kind: kind.into(),
            id: id.into(),
        }
    }
}

impl From<BridgeError> for SyncError {
    fn from(err: BridgeError) -> Self {
        if err.is_transient() {
            SyncError::TransientIo(err.to_string())
        } else {
            SyncError::Bridge(err)
        }
    }
}

impl From<PipelineError> for SyncError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::MalformedEntity { kind, id, reason } => {
                SyncError::MalformedEntity { kind, id, reason }
            }
            PipelineError::CyclicDependency {
                representation_id,
                cycle,
            } => SyncError::CyclicDependency {
                representation_id,
                cycle,
            },
            PipelineError::NotFound { kind, id } => SyncError::NotFound { kind, id },
            PipelineError::InvalidIdentity(value) => SyncError::invalid_input("identity", value),
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        assert!(SyncError::TransientIo("reset".into()).is_retryable());
        assert!(SyncError::Timeout(60_000).is_retryable());
        assert!(!SyncError::Import("unsupported format".into()).is_retryable());
        assert!(!SyncError::VersionConflict {
            product_id: "p".into(),
            attempted: 3,
            latest: Some(3),
        }
        .is_retryable());
        assert!(!SyncError::MalformedEntity {
            kind: "version".into(),
            id: "v".into(),
            reason: "missing id".into(),
        }
        .is_retryable());
    }

    #[test]
    fn test_bridge_errors_split_on_transience() {
        let transient: SyncError = BridgeError::Transient("503".into()).into();
        assert!(matches!(transient, SyncError::TransientIo(_)));

        let hard: SyncError = BridgeError::NotFound("rep".into()).into();
        assert!(matches!(hard, SyncError::Bridge(BridgeError::NotFound(_))));

        let import = SyncError::import_error(BridgeError::OperationFailed("bad mesh".into()));
        assert!(matches!(import, SyncError::Import(_)));
        let import = SyncError::import_error(BridgeError::Timeout("import".into()));
        assert!(import.is_retryable());
    }

    #[test]
    fn test_pipeline_errors_keep_their_kind() {
        let err: SyncError = PipelineError::CyclicDependency {
            representation_id: "a".into(),
            cycle: vec!["a".into(), "b".into()],
        }
        .into();
        assert_eq!(
            err.to_string(),
            "Representation a has a cyclic dependency: a -> b"
        );
    }
}
