//! Arena storage for one project's entity snapshot
//!
//! Validation happens once, in [`EntityStore::from_records`]. Anything that
//! would leave a dangling id or a cyclic hierarchy fails the whole listing;
//! representations on a dependency cycle are kept but marked rejected.

use crate::error::{PipelineError, Result};
use crate::graph::DependencyGraph;
use crate::models::{
    Fingerprint, HierarchyNode, IdentityKey, NodeId, NodeKind, Product, ProductId, Project,
    ProjectId, Representation, RepresentationId, SyncScope, Version, VersionId, VersionStatus,
};
use bridge_traits::pipeline::{
    EntityRecord, NodeRecord, ProductRecord, ProjectRecord, RepresentationRecord, VersionRecord,
};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use tracing::{debug, warn};

/// Result of walking dependency lists from a set of roots.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyClosure {
    /// Roots plus every known transitive dependency
    pub members: Vec<RepresentationId>,
    /// `(dependent, dependency)` pairs whose dependency is not in the store
    pub missing: Vec<(RepresentationId, RepresentationId)>,
}

#[derive(Debug, Clone)]
pub struct EntityStore {
    project: Project,
    nodes: HashMap<NodeId, HierarchyNode>,
    products: HashMap<ProductId, Product>,
    versions: HashMap<VersionId, Version>,
    representations: HashMap<RepresentationId, Representation>,
    versions_by_product: HashMap<ProductId, Vec<VersionId>>,
    representations_by_version: HashMap<VersionId, Vec<RepresentationId>>,
    rejected: HashMap<RepresentationId, PipelineError>,
}

fn required(value: Option<String>, kind: &str, id: &str, field: &str) -> Result<String> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(PipelineError::malformed(kind, id, format!("missing {}", field))),
    }
}

fn required_id(value: Option<String>, kind: &str) -> Result<String> {
    required(value, kind, "<unknown>", "id")
}

impl EntityStore {
    /// Build a validated store from one `list_entities` response.
    pub fn from_records(records: Vec<EntityRecord>) -> Result<Self> {
        let mut projects = Vec::new();
        let mut node_records = Vec::new();
        let mut product_records = Vec::new();
        let mut version_records = Vec::new();
        let mut rep_records = Vec::new();

        for record in records {
            match record {
                EntityRecord::Project(r) => projects.push(r),
                EntityRecord::Folder(r) => node_records.push((NodeKind::Folder, r)),
                EntityRecord::Task(r) => node_records.push((NodeKind::Task, r)),
                EntityRecord::Product(r) => product_records.push(r),
                EntityRecord::Version(r) => version_records.push(r),
                EntityRecord::Representation(r) => rep_records.push(r),
            }
        }

        let project = Self::build_project(projects)?;
        let mut store = EntityStore {
            project,
            nodes: HashMap::new(),
            products: HashMap::new(),
            versions: HashMap::new(),
            representations: HashMap::new(),
            versions_by_product: HashMap::new(),
            representations_by_version: HashMap::new(),
            rejected: HashMap::new(),
        };

        for (kind, record) in node_records {
            store.insert_node(kind, record)?;
        }
        store.check_hierarchy()?;

        for record in product_records {
            store.insert_product(record)?;
        }
        for record in version_records {
            store.insert_version(record)?;
        }
        for ids in store.versions_by_product.values_mut() {
            let versions = &store.versions;
            ids.sort_by_key(|id| versions.get(id).map(|v| v.number).unwrap_or(0));
        }
        for record in rep_records {
            store.insert_representation(record)?;
        }
        for ids in store.representations_by_version.values_mut() {
            ids.sort();
        }
        store.reject_cycles();

        debug!(
            project = %store.project.id,
            nodes = store.nodes.len(),
            products = store.products.len(),
            versions = store.versions.len(),
            representations = store.representations.len(),
            rejected = store.rejected.len(),
            "Built entity store"
        );

        Ok(store)
    }

    fn build_project(mut projects: Vec<ProjectRecord>) -> Result<Project> {
        if projects.len() != 1 {
            return Err(PipelineError::malformed(
                "project",
                "<unknown>",
                format!("expected one project record, found {}", projects.len()),
            ));
        }
        let record = projects.remove(0);
        let id = required_id(record.id, "project")?;
        let name = record.name.unwrap_or_else(|| id.clone());
        Ok(Project {
            id: ProjectId(id),
            name,
            entity_types: record.entity_types,
        })
    }

    fn insert_node(&mut self, kind: NodeKind, record: NodeRecord) -> Result<()> {
        let kind_name = kind.to_string();
        let id = required_id(record.id, &kind_name)?;
        let name = required(record.name, &kind_name, &id, "name")?;
        if name.contains('/') {
            return Err(PipelineError::malformed(&kind_name, &id, "name contains '/'"));
        }

        if let Some(tag) = &record.type_tag {
            let allowed = &self.project.entity_types;
            if !allowed.is_empty() && !allowed.contains(tag) {
                return Err(PipelineError::malformed(
                    &kind_name,
                    &id,
                    format!("type '{}' is not allowed by the project", tag),
                ));
            }
        }

        let node = HierarchyNode {
            id: NodeId(id.clone()),
            kind,
            parent_id: record.parent_id.map(NodeId),
            name,
            type_tag: record.type_tag,
        };
        if self.nodes.insert(node.id.clone(), node).is_some() {
            return Err(PipelineError::malformed(&kind_name, id, "duplicate id"));
        }
        Ok(())
    }

    fn check_hierarchy(&self) -> Result<()> {
        for node in self.nodes.values() {
            let mut seen = HashSet::new();
            let mut current = node;
            while let Some(parent_id) = &current.parent_id {
                if !seen.insert(current.id.clone()) {
                    return Err(PipelineError::malformed(
                        node.kind.to_string(),
                        node.id.as_str(),
                        "hierarchy cycle",
                    ));
                }
                current = self.nodes.get(parent_id).ok_or_else(|| {
                    PipelineError::malformed(
                        current.kind.to_string(),
                        current.id.as_str(),
                        format!("parent {} does not exist", parent_id),
                    )
                })?;
            }
        }
        Ok(())
    }

    fn insert_product(&mut self, record: ProductRecord) -> Result<()> {
        let id = required_id(record.id, "product")?;
        let name = required(record.name, "product", &id, "name")?;
        let parent = required(record.parent_id, "product", &id, "parent_id")?;
        let parent_id = NodeId(parent);
        if !self.nodes.contains_key(&parent_id) {
            return Err(PipelineError::malformed(
                "product",
                &id,
                format!("parent {} does not exist", parent_id),
            ));
        }

        let product = Product {
            id: ProductId(id.clone()),
            parent_id,
            name,
            product_type: record.product_type.unwrap_or_default(),
        };
        if self.products.insert(product.id.clone(), product).is_some() {
            return Err(PipelineError::malformed("product", id, "duplicate id"));
        }
        Ok(())
    }

    fn insert_version(&mut self, record: VersionRecord) -> Result<()> {
        let version = Self::version_from_record(record)?;
        if !self.products.contains_key(&version.product_id) {
            return Err(PipelineError::malformed(
                "version",
                version.id.as_str(),
                format!("product {} does not exist", version.product_id),
            ));
        }

        let siblings = self
            .versions_by_product
            .entry(version.product_id.clone())
            .or_default();
        if siblings
            .iter()
            .filter_map(|id| self.versions.get(id))
            .any(|v| v.number == version.number)
        {
            return Err(PipelineError::malformed(
                "version",
                version.id.as_str(),
                format!(
                    "duplicate version number {} for product {}",
                    version.number, version.product_id
                ),
            ));
        }
        siblings.push(version.id.clone());

        let id = version.id.clone();
        if self.versions.insert(id.clone(), version).is_some() {
            return Err(PipelineError::malformed("version", id.as_str(), "duplicate id"));
        }
        Ok(())
    }

    /// Validate a single version record outside of a full listing.
    pub fn version_from_record(record: VersionRecord) -> Result<Version> {
        let id = required_id(record.id, "version")?;
        let product = required(record.product_id, "version", &id, "product_id")?;
        let number = match record.version {
            Some(n) if n >= 1 && n <= i64::from(u32::MAX) => n as u32,
            Some(n) => {
                return Err(PipelineError::malformed(
                    "version",
                    &id,
                    format!("version number {} is out of range", n),
                ))
            }
            None => return Err(PipelineError::malformed("version", &id, "missing version number")),
        };
        let created_at = record
            .created_at
            .ok_or_else(|| PipelineError::malformed("version", &id, "missing created_at"))?;
        let status = match record.status {
            Some(s) => s
                .parse::<VersionStatus>()
                .map_err(|reason| PipelineError::malformed("version", &id, reason))?,
            None => VersionStatus::WorkInProgress,
        };

        Ok(Version {
            id: VersionId(id),
            product_id: ProductId(product),
            number,
            author: record.author.unwrap_or_default(),
            created_at,
            status,
        })
    }

    fn insert_representation(&mut self, record: RepresentationRecord) -> Result<()> {
        let rep = Self::representation_from_record(record)?;
        if !self.versions.contains_key(&rep.version_id) {
            return Err(PipelineError::malformed(
                "representation",
                rep.id.as_str(),
                format!("version {} does not exist", rep.version_id),
            ));
        }

        self.representations_by_version
            .entry(rep.version_id.clone())
            .or_default()
            .push(rep.id.clone());
        let id = rep.id.clone();
        if self.representations.insert(id.clone(), rep).is_some() {
            return Err(PipelineError::malformed(
                "representation",
                id.as_str(),
                "duplicate id",
            ));
        }
        Ok(())
    }

    /// Validate a single representation record outside of a full listing.
    pub fn representation_from_record(record: RepresentationRecord) -> Result<Representation> {
        let id = required_id(record.id, "representation")?;
        let version = required(record.version_id, "representation", &id, "version_id")?;
        let format = required(record.format, "representation", &id, "format")?;
        let fingerprint = required(record.fingerprint, "representation", &id, "fingerprint")?;

        Ok(Representation {
            id: RepresentationId(id),
            version_id: VersionId(version),
            format,
            fingerprint: Fingerprint(fingerprint),
            dependencies: record
                .dependencies
                .into_iter()
                .map(RepresentationId)
                .collect(),
            source_path: record.path,
        })
    }

    fn reject_cycles(&mut self) {
        let mut graph = DependencyGraph::new();
        for rep in self.representations.values() {
            graph.add_node(&rep.id);
            for dep in &rep.dependencies {
                if self.representations.contains_key(dep) {
                    graph.add_dependency(&rep.id, dep);
                }
            }
        }

        for cycle in graph.cycles() {
            let members: Vec<String> = cycle.iter().map(|id| id.to_string()).collect();
            warn!(cycle = ?members, "Rejecting representations on a dependency cycle");
            for id in cycle {
                self.rejected.insert(
                    id.clone(),
                    PipelineError::CyclicDependency {
                        representation_id: id.to_string(),
                        cycle: members.clone(),
                    },
                );
            }
        }
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub fn project(&self) -> &Project {
        &self.project
    }

    pub fn node(&self, id: &NodeId) -> Option<&HierarchyNode> {
        self.nodes.get(id)
    }

    pub fn product(&self, id: &ProductId) -> Option<&Product> {
        self.products.get(id)
    }

    pub fn version(&self, id: &VersionId) -> Option<&Version> {
        self.versions.get(id)
    }

    pub fn representation(&self, id: &RepresentationId) -> Option<&Representation> {
        self.representations.get(id)
    }

    pub fn representation_count(&self) -> usize {
        self.representations.len()
    }

    /// Path of a folder/task from the project root.
    pub fn path_of(&self, id: &NodeId) -> Result<String> {
        let mut segments = Vec::new();
        let mut current = self
            .nodes
            .get(id)
            .ok_or_else(|| PipelineError::not_found("node", id.as_str()))?;
        loop {
            segments.push(current.name.as_str());
            match &current.parent_id {
                Some(parent) => {
                    current = self
                        .nodes
                        .get(parent)
                        .ok_or_else(|| PipelineError::not_found("node", parent.as_str()))?;
                }
                None => break,
            }
        }
        segments.reverse();
        Ok(segments.join("/"))
    }

    /// Versions of a product in ascending number order.
    pub fn versions_of(&self, product: &ProductId) -> Vec<&Version> {
        self.versions_by_product
            .get(product)
            .map(|ids| ids.iter().filter_map(|id| self.versions.get(id)).collect())
            .unwrap_or_default()
    }

    pub fn latest_version(&self, product: &ProductId, include_rejected: bool) -> Option<&Version> {
        self.versions_of(product)
            .into_iter()
            .rev()
            .find(|v| include_rejected || v.status != VersionStatus::Rejected)
    }

    /// Highest committed number, regardless of status.
    pub fn last_version_number(&self, product: &ProductId) -> u32 {
        self.versions_of(product)
            .last()
            .map(|v| v.number)
            .unwrap_or(0)
    }

    pub fn representations_of(&self, version: &VersionId) -> Vec<&Representation> {
        self.representations_by_version
            .get(version)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.representations.get(id))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn identity_key(&self, id: &RepresentationId) -> Result<IdentityKey> {
        let rep = self
            .representations
            .get(id)
            .ok_or_else(|| PipelineError::not_found("representation", id.as_str()))?;
        let version = self
            .versions
            .get(&rep.version_id)
            .ok_or_else(|| PipelineError::not_found("version", rep.version_id.as_str()))?;
        let product = self
            .products
            .get(&version.product_id)
            .ok_or_else(|| PipelineError::not_found("product", version.product_id.as_str()))?;

        Ok(IdentityKey {
            project_id: self.project.id.clone(),
            path: self.path_of(&product.parent_id)?,
            product: product.name.clone(),
            version: version.number,
            format: rep.format.clone(),
        })
    }

    /// Why a representation may not be planned, if it is rejected.
    pub fn rejection(&self, id: &RepresentationId) -> Option<&PipelineError> {
        self.rejected.get(id)
    }

    /// Products whose folder path and name fall inside `scope`, ordered by path.
    pub fn products_in_scope(&self, scope: &SyncScope) -> Vec<&Product> {
        let mut matched: Vec<(String, &Product)> = self
            .products
            .values()
            .filter(|p| scope.accepts_product(&p.name))
            .filter_map(|p| {
                let path = self.path_of(&p.parent_id).ok()?;
                scope.contains_path(&path).then_some((path, p))
            })
            .collect();
        matched.sort_by(|a, b| (&a.0, &a.1.name).cmp(&(&b.0, &b.1.name)));
        matched.into_iter().map(|(_, p)| p).collect()
    }

    /// Product with `name` under the node at `path`.
    pub fn find_product(&self, path: &str, name: &str) -> Option<&Product> {
        self.products.values().find(|p| {
            p.name == name
                && self
                    .path_of(&p.parent_id)
                    .map(|candidate| candidate == path)
                    .unwrap_or(false)
        })
    }

    /// Roots plus their transitive dependencies, breadth first.
    pub fn dependency_closure(&self, roots: &[RepresentationId]) -> DependencyClosure {
        let mut closure = DependencyClosure::default();
        let mut seen: BTreeSet<RepresentationId> = BTreeSet::new();
        let mut queue: VecDeque<RepresentationId> = roots.iter().cloned().collect();

        while let Some(id) = queue.pop_front() {
            if !seen.insert(id.clone()) {
                continue;
            }
            let Some(rep) = self.representations.get(&id) else {
                continue;
            };
            closure.members.push(id.clone());
            for dep in &rep.dependencies {
                if self.representations.contains_key(dep) {
                    queue.push_back(dep.clone());
                } else {
                    closure.missing.push((id.clone(), dep.clone()));
                }
            }
        }
        closure
    }
}
