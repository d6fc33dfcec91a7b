//! # Pipeline Entity Model
//!
//! Typed, validated view of a production-pipeline project: the
//! folder/task tree, products, versions and representations, plus the
//! identity keys and local records the sync engine works with.
//!
//! ## Overview
//!
//! - [`EntityStore`] builds an arena of flat tables from raw
//!   [`EntityRecord`](bridge_traits::pipeline::EntityRecord)s and refuses
//!   malformed listings with [`PipelineError::MalformedEntity`].
//! - [`DependencyGraph`] wraps `petgraph` for cycle detection and
//!   topological tiers over representation dependencies.
//! - [`IdentityKey`] / [`LineageKey`] name a representation locally, with
//!   and without its version number.

pub mod error;
pub mod graph;
pub mod models;
pub mod store;

pub use error::{PipelineError, Result};
pub use graph::DependencyGraph;
pub use models::{
    Fingerprint, HierarchyNode, IdentityKey, LineageKey, LocalAsset, NodeId, NodeKind, Product,
    ProductId, Project, ProjectId, Representation, RepresentationId, SyncRecord, SyncScope,
    Version, VersionId, VersionStatus,
};
pub use store::{DependencyClosure, EntityStore};
