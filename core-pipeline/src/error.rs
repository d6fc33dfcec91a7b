use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
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

    #[error("Entity not found: {kind} with id {id}")]
    NotFound { kind: String, id: String },

    #[error("Invalid identity key: {0}")]
    InvalidIdentity(String),
}

impl PipelineError {
    pub(crate) fn malformed(
        kind: impl Into<String>,
        id: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        PipelineError::MalformedEntity {
            kind: kind.into(),
            id: id.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn not_found(kind: impl Into<String>, id: impl Into<String>) -> Self {
        PipelineError::NotFound {
            kind: kind.into(),
            id: id.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
