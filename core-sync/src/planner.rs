//! # Pull Planner
//!
//! Turns an entity snapshot, the index and the editor listing into a tiered
//! plan. Planning has no side effects; `SyncEngine::plan_pull` exposes it as
//! a dry run.
//!
//! Decision table for a matched asset, against the last synced baseline:
//!
//! | local changed | remote changed | step |
//! |---------------|----------------|------|
//! | no            | no             | skip (or relink when only the manifest matched) |
//! | no            | yes            | re-import in place |
//! | yes           | no             | skip, local changes pending publish |
//! | yes           | yes            | conflict, unless a resolution was supplied |

use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::index::IndexSnapshot;
use crate::resolver::{self, Candidate, ResolvedEntry};
use core_pipeline::{
    DependencyGraph, EntityStore, Fingerprint, IdentityKey, LineageKey, LocalAsset, ProjectId,
    Representation, RepresentationId, SyncRecord, SyncScope,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::{debug, warn};

pub const REASON_UP_TO_DATE: &str = "up to date";
pub const REASON_LOCAL_PENDING: &str = "local changes pending publish";
pub const REASON_RELINKED: &str = "relinked to existing local asset";
pub const REASON_KEPT_LOCAL: &str = "kept local changes";

/// Manual decision for a diverged lineage, supplied on a later pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictResolution {
    /// Keep the local edits; the record moves to the new remote baseline.
    KeepLocal,
    /// Discard local edits and re-import.
    TakeRemote,
}

pub type Resolutions = HashMap<LineageKey, ConflictResolution>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanStep {
    /// New local asset at `destination`
    Import { destination: String },
    /// Replace an existing local asset in place
    Reimport { local_path: String },
    /// Rewrite the index record without touching the asset
    Relink {
        local_path: String,
        local_fingerprint: Fingerprint,
        reason: String,
    },
    Skip {
        local_path: Option<String>,
        reason: String,
    },
    Conflict {
        local_path: String,
        local_fingerprint: Fingerprint,
        remote_fingerprint: Fingerprint,
    },
    /// Known to be un-schedulable at planning time
    Fail { reason: String },
}

impl PlanStep {
    pub fn local_path(&self) -> Option<&str> {
        match self {
            PlanStep::Import { destination } => Some(destination),
            PlanStep::Reimport { local_path }
            | PlanStep::Relink { local_path, .. }
            | PlanStep::Conflict { local_path, .. } => Some(local_path),
            PlanStep::Skip { local_path, .. } => local_path.as_deref(),
            PlanStep::Fail { .. } => None,
        }
    }

    /// Whether executing the step changes editor content.
    pub fn touches_editor(&self) -> bool {
        matches!(self, PlanStep::Import { .. } | PlanStep::Reimport { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedAction {
    pub identity: IdentityKey,
    pub representation: Representation,
    pub step: PlanStep,
    /// Planned representations this one waits for
    pub dependencies: Vec<RepresentationId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Orphan {
    pub local: LocalAsset,
    pub record: SyncRecord,
}

/// Actions grouped in dependency tiers; tier `n` depends only on earlier tiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncPlan {
    pub project_id: ProjectId,
    pub tiers: Vec<Vec<PlannedAction>>,
    /// Tracked local assets whose identity is no longer a candidate
    pub orphans: Vec<Orphan>,
    /// Records of local assets that no longer exist
    pub vanished: Vec<SyncRecord>,
}

impl SyncPlan {
    pub fn actions(&self) -> impl Iterator<Item = &PlannedAction> {
        self.tiers.iter().flatten()
    }

    pub fn action_count(&self) -> usize {
        self.tiers.iter().map(Vec::len).sum()
    }

    /// Actions that are not plain skips.
    pub fn pending_count(&self) -> usize {
        self.actions()
            .filter(|a| !matches!(a.step, PlanStep::Skip { .. }))
            .count()
    }

    pub fn find(&self, identity: &IdentityKey) -> Option<&PlannedAction> {
        self.actions().find(|a| &a.identity == identity)
    }
}

/// Build the pull plan for `scope`.
///
/// # Errors
///
/// `IdentityAmbiguity` aborts planning; nothing is scheduled.
pub fn plan_pull(
    store: &EntityStore,
    scope: &SyncScope,
    snapshot: &IndexSnapshot,
    locals: &[LocalAsset],
    resolutions: &Resolutions,
    config: &SyncConfig,
) -> Result<SyncPlan> {
    let roots: Vec<RepresentationId> = store
        .products_in_scope(scope)
        .into_iter()
        .filter_map(|product| store.latest_version(&product.id, config.include_rejected))
        .flat_map(|version| store.representations_of(&version.id))
        .filter(|rep| scope.accepts_format(&rep.format))
        .map(|rep| rep.id.clone())
        .collect();

    let closure = store.dependency_closure(&roots);
    let members: HashSet<&RepresentationId> = closure.members.iter().collect();

    let mut graph = DependencyGraph::new();
    for id in &closure.members {
        graph.add_node(id);
        if let Some(rep) = store.representation(id) {
            for dep in rep.dependencies.iter().filter(|d| members.contains(d)) {
                graph.add_dependency(id, dep);
            }
        }
    }

    // Reasons a member can never be scheduled.
    let mut failures: HashMap<RepresentationId, String> = HashMap::new();
    for (dependent, dependency) in &closure.missing {
        failures.entry(dependent.clone()).or_insert_with(|| {
            format!("unknown dependency {}", dependency)
        });
    }
    let mut cyclic: HashSet<RepresentationId> = HashSet::new();
    for component in graph.components() {
        let Some(rejection) = component.iter().find_map(|id| store.rejection(id)) else {
            continue;
        };
        let reason = SyncError::from(rejection.clone()).to_string();
        warn!(members = component.len(), %reason, "Dependency group is un-schedulable");
        for id in component {
            failures.insert(id.clone(), reason.clone());
            cyclic.insert(id);
        }
    }

    let mut candidates = Vec::with_capacity(closure.members.len());
    for id in &closure.members {
        let Some(representation) = store.representation(id) else {
            continue;
        };
        candidates.push(Candidate {
            representation: representation.clone(),
            identity: store.identity_key(id)?,
        });
    }

    let resolution = resolver::resolve(&candidates, snapshot, locals)?;

    let mut steps: HashMap<RepresentationId, (Candidate, PlanStep)> = HashMap::new();
    let mut orphans = Vec::new();
    for entry in resolution.entries {
        match entry {
            ResolvedEntry::Matched {
                candidate,
                local,
                record,
            } => {
                let step = decide_matched(&candidate, &local, record.as_ref(), resolutions);
                steps.insert(candidate.representation.id.clone(), (candidate, step));
            }
            ResolvedEntry::PipelineOnly(candidate) => {
                let identity = &candidate.identity;
                let destination = config.import_destination(
                    &identity.path,
                    &identity.product,
                    identity.version,
                    &identity.format,
                );
                steps.insert(
                    candidate.representation.id.clone(),
                    (candidate, PlanStep::Import { destination }),
                );
            }
            ResolvedEntry::LocalOnly {
                local,
                record: Some(record),
            } if scope.contains(&record.lineage()) => {
                orphans.push(Orphan { local, record });
            }
            ResolvedEntry::LocalOnly { .. } => {}
        }
    }

    let mut acyclic = DependencyGraph::new();
    for id in closure.members.iter().filter(|id| !cyclic.contains(*id)) {
        acyclic.add_node(id);
        for dep in graph.dependencies_of(id) {
            acyclic.add_dependency(id, &dep);
        }
    }
    let mut tier_ids = acyclic.tiers().map_err(|id| {
        let cycle = store
            .rejection(&id)
            .map(|e| e.to_string())
            .unwrap_or_else(|| id.to_string());
        SyncError::CyclicDependency {
            representation_id: id.to_string(),
            cycle: vec![cycle],
        }
    })?;
    if !cyclic.is_empty() {
        if tier_ids.is_empty() {
            tier_ids.push(Vec::new());
        }
        let doomed: BTreeSet<RepresentationId> = cyclic.into_iter().collect();
        tier_ids[0].extend(doomed);
    }

    let mut tiers = Vec::with_capacity(tier_ids.len());
    for ids in tier_ids {
        let mut tier = Vec::with_capacity(ids.len());
        for id in ids {
            let Some((candidate, step)) = steps.remove(&id) else {
                continue;
            };
            let step = match failures.remove(&id) {
                Some(reason) => PlanStep::Fail { reason },
                None => step,
            };
            tier.push(PlannedAction {
                identity: candidate.identity,
                representation: candidate.representation,
                step,
                dependencies: graph.dependencies_of(&id),
            });
        }
        if !tier.is_empty() {
            tiers.push(tier);
        }
    }

    let vanished: Vec<SyncRecord> = resolution
        .vanished
        .into_iter()
        .filter(|r| scope.contains(&r.lineage()))
        .collect();

    let plan = SyncPlan {
        project_id: scope.project_id.clone(),
        tiers,
        orphans,
        vanished,
    };
    debug!(
        actions = plan.action_count(),
        pending = plan.pending_count(),
        tiers = plan.tiers.len(),
        orphans = plan.orphans.len(),
        "Planned pull"
    );
    Ok(plan)
}

fn decide_matched(
    candidate: &Candidate,
    local: &LocalAsset,
    record: Option<&SyncRecord>,
    resolutions: &Resolutions,
) -> PlanStep {
    let remote = &candidate.representation.fingerprint;
    let (remote_baseline, local_baseline) = match record {
        Some(record) => (&record.fingerprint, &record.local_fingerprint),
        None => {
            let source = local.source_fingerprint.as_ref().unwrap_or(&local.fingerprint);
            (source, source)
        }
    };
    let local_changed = &local.fingerprint != local_baseline;
    let remote_changed = remote != remote_baseline;
    let local_path = local.path.clone();

    match (local_changed, remote_changed) {
        (false, false) => {
            let current = record
                .map(|r| {
                    r.representation_id == candidate.representation.id
                        && r.identity == candidate.identity
                })
                .unwrap_or(false);
            if current {
                PlanStep::Skip {
                    local_path: Some(local_path),
                    reason: REASON_UP_TO_DATE.to_string(),
                }
            } else {
                PlanStep::Relink {
                    local_path,
                    local_fingerprint: local.fingerprint.clone(),
                    reason: REASON_RELINKED.to_string(),
                }
            }
        }
        (false, true) => PlanStep::Reimport { local_path },
        (true, false) => PlanStep::Skip {
            local_path: Some(local_path),
            reason: REASON_LOCAL_PENDING.to_string(),
        },
        (true, true) => match resolutions.get(&candidate.identity.lineage()) {
            Some(ConflictResolution::TakeRemote) => PlanStep::Reimport { local_path },
            // The old local baseline is kept so the edits stay pending publish.
            Some(ConflictResolution::KeepLocal) => PlanStep::Relink {
                local_path,
                local_fingerprint: local_baseline.clone(),
                reason: REASON_KEPT_LOCAL.to_string(),
            },
            None => PlanStep::Conflict {
                local_path,
                local_fingerprint: local.fingerprint.clone(),
                remote_fingerprint: remote.clone(),
            },
        },
    }
}
