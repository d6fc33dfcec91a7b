//! Pipeline Server API
//!
//! Wire-level records returned by the production-pipeline server and the
//! request/response contract the sync engine consumes. Records keep every
//! field optional so that validation in `core-pipeline` can reject malformed
//! documents instead of failing deserialization halfway through a listing.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

// =============================================================================
// Records
// =============================================================================

/// Entity kinds understood by `list_entities` filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Project,
    Folder,
    Task,
    Product,
    Version,
    Representation,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectRecord {
    pub id: Option<String>,
    pub name: Option<String>,
    /// Folder and task type tags the project allows.
    pub entity_types: Vec<String>,
}

/// A folder or a task; both are nodes of the project hierarchy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeRecord {
    pub id: Option<String>,
    pub parent_id: Option<String>,
    pub name: Option<String>,
    pub type_tag: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProductRecord {
    pub id: Option<String>,
    /// Owning folder or task node.
    pub parent_id: Option<String>,
    pub name: Option<String>,
    pub product_type: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VersionRecord {
    pub id: Option<String>,
    pub product_id: Option<String>,
    pub version: Option<i64>,
    pub author: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    /// `wip`, `approved` or `rejected`
    pub status: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepresentationRecord {
    pub id: Option<String>,
    pub version_id: Option<String>,
    pub format: Option<String>,
    pub fingerprint: Option<String>,
    pub dependencies: Vec<String>,
    /// Location of the published file, resolved by the server for this site.
    pub path: Option<String>,
}

/// A structured entity document keyed by a stable id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "entity_type", rename_all = "snake_case")]
pub enum EntityRecord {
    Project(ProjectRecord),
    Folder(NodeRecord),
    Task(NodeRecord),
    Product(ProductRecord),
    Version(VersionRecord),
    Representation(RepresentationRecord),
}

impl EntityRecord {
    pub fn kind(&self) -> EntityKind {
        match self {
            EntityRecord::Project(_) => EntityKind::Project,
            EntityRecord::Folder(_) => EntityKind::Folder,
            EntityRecord::Task(_) => EntityKind::Task,
            EntityRecord::Product(_) => EntityKind::Product,
            EntityRecord::Version(_) => EntityKind::Version,
            EntityRecord::Representation(_) => EntityKind::Representation,
        }
    }

    pub fn id(&self) -> Option<&str> {
        match self {
            EntityRecord::Project(r) => r.id.as_deref(),
            EntityRecord::Folder(r) | EntityRecord::Task(r) => r.id.as_deref(),
            EntityRecord::Product(r) => r.id.as_deref(),
            EntityRecord::Version(r) => r.id.as_deref(),
            EntityRecord::Representation(r) => r.id.as_deref(),
        }
    }
}

/// Narrows a `list_entities` call. Empty vectors mean "no restriction".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntityFilter {
    pub kinds: Vec<EntityKind>,
    pub ids: Vec<String>,
    pub updated_since: Option<DateTime<Utc>>,
}

impl EntityFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn with_kinds(mut self, kinds: impl IntoIterator<Item = EntityKind>) -> Self {
        self.kinds.extend(kinds);
        self
    }

    pub fn with_ids(mut self, ids: impl IntoIterator<Item = String>) -> Self {
        self.ids.extend(ids);
        self
    }

    pub fn matches(&self, record: &EntityRecord) -> bool {
        let kind_ok = self.kinds.is_empty() || self.kinds.contains(&record.kind());
        let id_ok = self.ids.is_empty()
            || record
                .id()
                .map(|id| self.ids.iter().any(|wanted| wanted == id))
                .unwrap_or(false);
        kind_ok && id_ok
    }
}

/// Request to commit a new version number for a product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewVersion {
    pub product_id: String,
    pub version: u32,
    pub author: String,
    pub status: String,
}

/// Payload uploaded for a new representation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRepresentation {
    pub version_id: String,
    pub format: String,
    pub fingerprint: String,
    pub dependencies: Vec<String>,
    #[serde(skip)]
    pub content: Bytes,
}

// =============================================================================
// API
// =============================================================================

/// Request/response surface of the production-pipeline server.
///
/// Every call is a snapshot; two calls are never assumed to observe the same
/// server state.
#[async_trait]
pub trait PipelineApi: Send + Sync {
    /// List entity records of a project, narrowed by `filter`.
    async fn list_entities(&self, project: &str, filter: &EntityFilter)
        -> Result<Vec<EntityRecord>>;

    /// Latest committed version of a product, if any.
    async fn get_latest_version(
        &self,
        project: &str,
        product_id: &str,
    ) -> Result<Option<VersionRecord>>;

    /// Commit a version. Fails with `BridgeError::Conflict` when the number is taken.
    async fn create_version(&self, project: &str, request: NewVersion) -> Result<VersionRecord>;

    /// Upload a representation for an existing version.
    async fn create_representation(
        &self,
        project: &str,
        request: NewRepresentation,
    ) -> Result<RepresentationRecord>;
}
