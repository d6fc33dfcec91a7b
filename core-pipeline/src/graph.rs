//! Representation dependency graph
//!
//! Edges point from a dependency to its dependent, so a topological order
//! imports dependencies first.

use crate::models::RepresentationId;
use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::unionfind::UnionFind;
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Default, Clone)]
pub struct DependencyGraph {
    graph: DiGraph<RepresentationId, ()>,
    index: HashMap<RepresentationId, NodeIndex>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, id: &RepresentationId) -> NodeIndex {
        if let Some(ix) = self.index.get(id) {
            return *ix;
        }
        let ix = self.graph.add_node(id.clone());
        self.index.insert(id.clone(), ix);
        ix
    }

    /// Record that `dependent` needs `dependency` first.
    pub fn add_dependency(&mut self, dependent: &RepresentationId, dependency: &RepresentationId) {
        let from = self.add_node(dependency);
        let to = self.add_node(dependent);
        if self.graph.find_edge(from, to).is_none() {
            self.graph.add_edge(from, to, ());
        }
    }

    pub fn contains(&self, id: &RepresentationId) -> bool {
        self.index.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Strongly connected components that form a cycle, including self-loops.
    pub fn cycles(&self) -> Vec<Vec<RepresentationId>> {
        tarjan_scc(&self.graph)
            .into_iter()
            .filter(|scc| {
                scc.len() > 1
                    || scc
                        .first()
                        .map(|ix| self.graph.find_edge(*ix, *ix).is_some())
                        .unwrap_or(false)
            })
            .map(|scc| {
                let mut ids: Vec<_> = scc.into_iter().map(|ix| self.graph[ix].clone()).collect();
                ids.sort();
                ids
            })
            .collect()
    }

    /// Weakly connected groups, each sorted.
    pub fn components(&self) -> Vec<Vec<RepresentationId>> {
        let mut sets = UnionFind::new(self.graph.node_count());
        for edge in self.graph.edge_references() {
            sets.union(edge.source().index(), edge.target().index());
        }

        let mut groups: BTreeMap<usize, Vec<RepresentationId>> = BTreeMap::new();
        for ix in self.graph.node_indices() {
            groups
                .entry(sets.find(ix.index()))
                .or_default()
                .push(self.graph[ix].clone());
        }

        let mut components: Vec<_> = groups
            .into_values()
            .map(|mut ids| {
                ids.sort();
                ids
            })
            .collect();
        components.sort();
        components
    }

    /// Topological layers: tier 0 has no dependencies, tier n depends only on
    /// earlier tiers. Fails with a node on a cycle.
    pub fn tiers(&self) -> Result<Vec<Vec<RepresentationId>>, RepresentationId> {
        let order = toposort(&self.graph, None).map_err(|cycle| self.graph[cycle.node_id()].clone())?;

        let mut depth: HashMap<NodeIndex, usize> = HashMap::new();
        for ix in &order {
            let tier = self
                .graph
                .neighbors_directed(*ix, Direction::Incoming)
                .filter_map(|dep| depth.get(&dep))
                .map(|d| d + 1)
                .max()
                .unwrap_or(0);
            depth.insert(*ix, tier);
        }

        let mut tiers: Vec<Vec<RepresentationId>> = Vec::new();
        for (ix, tier) in depth {
            if tiers.len() <= tier {
                tiers.resize_with(tier + 1, Vec::new);
            }
            tiers[tier].push(self.graph[ix].clone());
        }
        for tier in &mut tiers {
            tier.sort();
        }
        Ok(tiers)
    }

    /// Direct dependencies recorded for `id`.
    pub fn dependencies_of(&self, id: &RepresentationId) -> Vec<RepresentationId> {
        self.neighbors(id, Direction::Incoming)
    }

    /// Representations that directly depend on `id`.
    pub fn dependents_of(&self, id: &RepresentationId) -> Vec<RepresentationId> {
        self.neighbors(id, Direction::Outgoing)
    }

    fn neighbors(&self, id: &RepresentationId, direction: Direction) -> Vec<RepresentationId> {
        let Some(ix) = self.index.get(id) else {
            return Vec::new();
        };
        let mut ids: Vec<_> = self
            .graph
            .neighbors_directed(*ix, direction)
            .map(|n| self.graph[n].clone())
            .collect();
        ids.sort();
        ids
    }
}
