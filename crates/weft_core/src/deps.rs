//! The dependency structure derived from a network's connection set.
//!
//! Rebuilt from scratch after every structural edit rather than patched in
//! place, so there is never a partially updated order to reason about.

use crate::node::Id;
use petgraph::Direction;
use petgraph::algo;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::HashMap;
use thiserror::Error;

/// The connection set contains a dependency cycle.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("dependency cycle through node {node}")]
pub struct CycleError {
    /// A node on the cycle.
    pub node: Id,
}

/// Upstream/downstream adjacency plus a total execution order in which
/// every node appears after everything it transitively depends on.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    graph: DiGraph<Id, ()>,
    index: HashMap<Id, NodeIndex>,
    order: Vec<Id>,
}

impl DependencyGraph {
    /// Build the dependency structure for the given nodes and edges. Nodes
    /// with no edges still appear in the order, once. Edges whose endpoints
    /// are unknown ids are ignored; the caller validates connections.
    pub fn build<N, E>(node_ids: N, edges: E) -> Result<Self, CycleError>
    where
        N: IntoIterator<Item = Id>,
        E: IntoIterator<Item = (Id, Id)>,
    {
        let mut graph = DiGraph::new();
        let mut index = HashMap::new();
        for id in node_ids {
            index.entry(id).or_insert_with(|| graph.add_node(id));
        }
        for (out_node, in_node) in edges {
            if let (Some(&a), Some(&b)) = (index.get(&out_node), index.get(&in_node)) {
                // One dependency edge per node pair, however many port
                // connections exist between them.
                graph.update_edge(a, b, ());
            }
        }
        let order = algo::toposort(&graph, None)
            .map_err(|cycle| CycleError {
                node: graph[cycle.node_id()],
            })?
            .into_iter()
            .map(|ix| graph[ix])
            .collect();
        Ok(Self {
            graph,
            index,
            order,
        })
    }

    /// Producers before consumers; every known node exactly once.
    pub fn order(&self) -> &[Id] {
        &self.order
    }

    pub fn contains(&self, id: Id) -> bool {
        self.index.contains_key(&id)
    }

    /// The nodes feeding directly into `id`.
    pub fn upstream(&self, id: Id) -> Vec<Id> {
        self.neighbors(id, Direction::Incoming)
    }

    /// The nodes fed directly by `id`.
    pub fn downstream(&self, id: Id) -> Vec<Id> {
        self.neighbors(id, Direction::Outgoing)
    }

    fn neighbors(&self, id: Id, direction: Direction) -> Vec<Id> {
        match self.index.get(&id) {
            Some(&ix) => self
                .graph
                .neighbors_directed(ix, direction)
                .map(|n| self.graph[n])
                .collect(),
            None => Vec::new(),
        }
    }

    /// Whether adding an edge `out_node -> in_node` would close a cycle,
    /// i.e. whether `out_node` is already reachable from `in_node`.
    pub fn would_cycle(&self, out_node: Id, in_node: Id) -> bool {
        if out_node == in_node {
            return true;
        }
        match (self.index.get(&in_node), self.index.get(&out_node)) {
            (Some(&from), Some(&to)) => algo::has_path_connecting(&self.graph, from, to, None),
            _ => false,
        }
    }
}
