//! # Identity Resolver
//!
//! Pairs candidate representations with editor assets. Pure: it reads an
//! index snapshot and an editor listing and never touches the network.
//!
//! A candidate claims a local asset through the index record for its
//! lineage when that record's local path is still listed. Without one, an
//! untracked local asset whose import manifest names the same lineage is
//! claimed instead, which is how a lost index re-resolves.

use crate::error::{Result, SyncError};
use crate::index::IndexSnapshot;
use core_pipeline::{IdentityKey, LocalAsset, Representation, SyncRecord};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::debug;

/// A representation the pass may act on, with its resolved identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub representation: Representation,
    pub identity: IdentityKey,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedEntry {
    Matched {
        candidate: Candidate,
        local: LocalAsset,
        record: Option<SyncRecord>,
    },
    PipelineOnly(Candidate),
    /// Unclaimed local asset. With a record it is an orphan of an identity
    /// that is no longer a candidate.
    LocalOnly {
        local: LocalAsset,
        record: Option<SyncRecord>,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    pub entries: Vec<ResolvedEntry>,
    /// Records whose local asset is gone
    pub vanished: Vec<SyncRecord>,
}

impl Resolution {
    pub fn matched(&self) -> impl Iterator<Item = (&Candidate, &LocalAsset)> {
        self.entries.iter().filter_map(|e| match e {
            ResolvedEntry::Matched {
                candidate, local, ..
            } => Some((candidate, local)),
            _ => None,
        })
    }

    pub fn local_only(&self) -> impl Iterator<Item = &LocalAsset> {
        self.entries.iter().filter_map(|e| match e {
            ResolvedEntry::LocalOnly { local, .. } => Some(local),
            _ => None,
        })
    }
}

/// Resolve `candidates` against the index and the editor listing.
///
/// # Errors
///
/// `IdentityAmbiguity` when two candidates claim the same local asset.
pub fn resolve(
    candidates: &[Candidate],
    snapshot: &IndexSnapshot,
    locals: &[LocalAsset],
) -> Result<Resolution> {
    let by_path: HashMap<&str, &LocalAsset> =
        locals.iter().map(|l| (l.path.as_str(), l)).collect();

    let mut claims: Vec<Option<(&LocalAsset, Option<&SyncRecord>)>> =
        Vec::with_capacity(candidates.len());
    for candidate in candidates {
        claims.push(claim(candidate, snapshot, locals, &by_path));
    }

    let mut claimants: BTreeMap<&str, Vec<&IdentityKey>> = BTreeMap::new();
    for (candidate, claim) in candidates.iter().zip(&claims) {
        if let Some((local, _)) = claim {
            claimants
                .entry(local.path.as_str())
                .or_default()
                .push(&candidate.identity);
        }
    }
    if let Some((path, identities)) = claimants.iter().find(|(_, ids)| ids.len() > 1) {
        return Err(SyncError::IdentityAmbiguity {
            local_path: path.to_string(),
            candidates: identities.iter().map(|id| id.to_string()).collect(),
        });
    }

    let mut entries = Vec::with_capacity(candidates.len() + locals.len());
    for (candidate, claim) in candidates.iter().zip(claims) {
        entries.push(match claim {
            Some((local, record)) => ResolvedEntry::Matched {
                candidate: candidate.clone(),
                local: local.clone(),
                record: record.cloned(),
            },
            None => ResolvedEntry::PipelineOnly(candidate.clone()),
        });
    }

    let claimed: HashSet<&str> = claimants.keys().copied().collect();
    let mut unclaimed: Vec<&LocalAsset> = locals
        .iter()
        .filter(|l| !claimed.contains(l.path.as_str()))
        .collect();
    unclaimed.sort_by(|a, b| a.path.cmp(&b.path));
    for local in unclaimed {
        entries.push(ResolvedEntry::LocalOnly {
            local: local.clone(),
            record: snapshot.by_local_path(&local.path).cloned(),
        });
    }

    let vanished: Vec<SyncRecord> = snapshot
        .records()
        .filter(|r| !by_path.contains_key(r.local_path.as_str()))
        .cloned()
        .collect();

    debug!(
        candidates = candidates.len(),
        locals = locals.len(),
        vanished = vanished.len(),
        "Resolved identities"
    );
    Ok(Resolution { entries, vanished })
}

fn claim<'a>(
    candidate: &Candidate,
    snapshot: &'a IndexSnapshot,
    locals: &'a [LocalAsset],
    by_path: &HashMap<&str, &'a LocalAsset>,
) -> Option<(&'a LocalAsset, Option<&'a SyncRecord>)> {
    let lineage = candidate.identity.lineage();

    if let Some(record) = snapshot.get(&lineage) {
        if let Some(local) = by_path.get(record.local_path.as_str()) {
            return Some((*local, Some(record)));
        }
    }

    // Manifest fallback, only for assets no other lineage is tracking.
    locals
        .iter()
        .filter(|local| {
            local
                .source_identity
                .as_ref()
                .map(|source| source.lineage() == lineage)
                .unwrap_or(false)
        })
        .filter(|local| match snapshot.by_local_path(&local.path) {
            None => true,
            Some(record) => record.lineage() == lineage,
        })
        .min_by(|a, b| {
            let inexact = |l: &LocalAsset| {
                l.representation_id.as_ref() != Some(&candidate.representation.id)
            };
            (inexact(a), &a.path).cmp(&(inexact(b), &b.path))
        })
        .map(|local| (local, None))
}
