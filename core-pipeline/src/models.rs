//! Domain models for pipeline entities and local assets
//!
//! Pipeline entities are snapshots of server records. They reference each
//! other by id only; `EntityStore` owns them in flat tables.

use crate::error::{PipelineError, Result};
use bridge_traits::editor::EditorAsset;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

// =============================================================================
// ID Types
// =============================================================================

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

string_id!(
    /// Server id of a project
    ProjectId
);
string_id!(
    /// Server id of a folder or task
    NodeId
);
string_id!(ProductId);
string_id!(VersionId);
string_id!(
    /// Server id of a representation; the unit of import
    RepresentationId
);

/// Opaque content fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(pub String);

impl Fingerprint {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Lowercase hex SHA-256 of `data`.
    pub fn of_bytes(data: &[u8]) -> Self {
        let digest = Sha256::digest(data);
        Self(digest.iter().map(|b| format!("{:02x}", b)).collect())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Fingerprint {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

// =============================================================================
// Pipeline Entities
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    /// Allowed folder/task type tags. Empty means unrestricted.
    pub entity_types: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Folder,
    Task,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKind::Folder => f.write_str("folder"),
            NodeKind::Task => f.write_str("task"),
        }
    }
}

/// A folder or task in the project tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HierarchyNode {
    pub id: NodeId,
    pub kind: NodeKind,
    /// `None` for nodes directly under the project
    pub parent_id: Option<NodeId>,
    /// Path segment
    pub name: String,
    pub type_tag: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub parent_id: NodeId,
    pub name: String,
    pub product_type: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionStatus {
    WorkInProgress,
    Approved,
    Rejected,
}

impl VersionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VersionStatus::WorkInProgress => "wip",
            VersionStatus::Approved => "approved",
            VersionStatus::Rejected => "rejected",
        }
    }
}

impl FromStr for VersionStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "wip" | "work_in_progress" | "in_progress" => Ok(VersionStatus::WorkInProgress),
            "approved" => Ok(VersionStatus::Approved),
            "rejected" => Ok(VersionStatus::Rejected),
            other => Err(format!("unknown version status '{}'", other)),
        }
    }
}

impl fmt::Display for VersionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    pub id: VersionId,
    pub product_id: ProductId,
    /// Starts at 1, increases by one per publish
    pub number: u32,
    pub author: String,
    pub created_at: DateTime<Utc>,
    pub status: VersionStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Representation {
    pub id: RepresentationId,
    pub version_id: VersionId,
    pub format: String,
    pub fingerprint: Fingerprint,
    pub dependencies: Vec<RepresentationId>,
    /// Published file location, when the server resolved one
    pub source_path: Option<String>,
}

// =============================================================================
// Identity
// =============================================================================

/// Stable identity of a published representation.
///
/// Display form is `project/path/product/v003/format`, which is also what
/// import manifests record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IdentityKey {
    pub project_id: ProjectId,
    /// Folder/task path, segments joined by `/`
    pub path: String,
    pub product: String,
    pub version: u32,
    pub format: String,
}

impl IdentityKey {
    /// The version-free slot this identity occupies locally.
    pub fn lineage(&self) -> LineageKey {
        LineageKey {
            project_id: self.project_id.clone(),
            path: self.path.clone(),
            product: self.product.clone(),
            format: self.format.clone(),
        }
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/v{:03}/{}",
            self.project_id, self.path, self.product, self.version, self.format
        )
    }
}

impl FromStr for IdentityKey {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || PipelineError::InvalidIdentity(s.to_string());
        let parts: Vec<&str> = s.split('/').collect();
        if parts.len() < 5 || parts.iter().any(|p| p.is_empty()) {
            return Err(invalid());
        }

        let n = parts.len();
        let version = parts[n - 2]
            .strip_prefix('v')
            .and_then(|v| v.parse::<u32>().ok())
            .ok_or_else(invalid)?;

        Ok(IdentityKey {
            project_id: ProjectId::new(parts[0]),
            path: parts[1..n - 3].join("/"),
            product: parts[n - 3].to_string(),
            version,
            format: parts[n - 1].to_string(),
        })
    }
}

/// Identity minus the version number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LineageKey {
    pub project_id: ProjectId,
    pub path: String,
    pub product: String,
    pub format: String,
}

impl fmt::Display for LineageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.project_id, self.path, self.product, self.format
        )
    }
}

/// What a sync pass covers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncScope {
    pub project_id: ProjectId,
    /// Only folders/tasks at or below this path
    pub path_prefix: Option<String>,
    /// Product names; empty means every product
    pub products: Vec<String>,
    /// Format tags; empty means every format
    pub formats: Vec<String>,
}

impl SyncScope {
    pub fn project(project_id: impl Into<ProjectId>) -> Self {
        Self {
            project_id: project_id.into(),
            path_prefix: None,
            products: Vec::new(),
            formats: Vec::new(),
        }
    }

    pub fn with_path_prefix(mut self, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        let trimmed = prefix.trim_matches('/');
        self.path_prefix = (!trimmed.is_empty()).then(|| trimmed.to_string());
        self
    }

    pub fn with_products(mut self, products: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.products.extend(products.into_iter().map(Into::into));
        self
    }

    pub fn with_formats(mut self, formats: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.formats.extend(formats.into_iter().map(Into::into));
        self
    }

    /// Whether `path` is the prefix itself or lies below it.
    pub fn contains_path(&self, path: &str) -> bool {
        match &self.path_prefix {
            None => true,
            Some(prefix) => {
                path == prefix
                    || path
                        .strip_prefix(prefix.as_str())
                        .map(|rest| rest.starts_with('/'))
                        .unwrap_or(false)
            }
        }
    }

    pub fn accepts_product(&self, name: &str) -> bool {
        self.products.is_empty() || self.products.iter().any(|p| p == name)
    }

    pub fn accepts_format(&self, format: &str) -> bool {
        self.formats.is_empty() || self.formats.iter().any(|f| f == format)
    }

    pub fn contains(&self, lineage: &LineageKey) -> bool {
        lineage.project_id == self.project_id
            && self.contains_path(&lineage.path)
            && self.accepts_product(&lineage.product)
            && self.accepts_format(&lineage.format)
    }
}

// =============================================================================
// Local State
// =============================================================================

/// Editor-side asset as seen by the bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalAsset {
    pub path: String,
    /// Fingerprint of the current local content
    pub fingerprint: Fingerprint,
    /// Representation named by the import manifest
    pub representation_id: Option<RepresentationId>,
    /// Identity named by the import manifest
    pub source_identity: Option<IdentityKey>,
    /// Representation fingerprint at import time
    pub source_fingerprint: Option<Fingerprint>,
    pub synced_at: Option<DateTime<Utc>>,
}

impl LocalAsset {
    pub fn untracked(path: impl Into<String>, fingerprint: Fingerprint) -> Self {
        Self {
            path: path.into(),
            fingerprint,
            representation_id: None,
            source_identity: None,
            source_fingerprint: None,
            synced_at: None,
        }
    }
}

impl From<EditorAsset> for LocalAsset {
    fn from(asset: EditorAsset) -> Self {
        let mut local = LocalAsset::untracked(asset.path, Fingerprint(asset.fingerprint));
        if let Some(manifest) = asset.manifest {
            local.representation_id = Some(RepresentationId(manifest.representation_id));
            local.source_identity = manifest.identity.parse().ok();
            local.source_fingerprint = Some(Fingerprint(manifest.fingerprint));
            local.synced_at = Some(manifest.imported_at);
        }
        local
    }
}

/// Last confirmed pairing of a representation with a local asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRecord {
    pub identity: IdentityKey,
    pub representation_id: RepresentationId,
    pub local_path: String,
    /// Remote fingerprint at sync time
    pub fingerprint: Fingerprint,
    /// Local fingerprint at sync time
    pub local_fingerprint: Fingerprint,
    pub synced_at: DateTime<Utc>,
}

impl SyncRecord {
    pub fn lineage(&self) -> LineageKey {
        self.identity.lineage()
    }

    pub fn remote_changed(&self, current: &Fingerprint) -> bool {
        &self.fingerprint != current
    }

    pub fn local_changed(&self, current: &Fingerprint) -> bool {
        &self.local_fingerprint != current
    }
}
