//! Node arena and edge bookkeeping.

use slotmap::SlotMap;

use super::edge::{EdgePool, Side, UNVISITED};
use super::node::{Flags, Node, NodeKey, NodeKind};
use super::EdgeId;
use crate::config::RuntimeStats;
use crate::error::{ReactiveError, Result};

/// All nodes of one runtime plus the shared edge pool.
#[derive(Debug, Default)]
pub(crate) struct Graph {
    nodes: SlotMap<NodeKey, Node>,
    pub(crate) edges: EdgePool,
}

impl Graph {
    pub(crate) fn with_edge_capacity(capacity: usize) -> Self {
        Self {
            nodes: SlotMap::with_key(),
            edges: EdgePool::with_capacity(capacity),
        }
    }

    pub(crate) fn insert(&mut self, node: Node) -> NodeKey {
        self.nodes.insert(node)
    }

    pub(crate) fn get(&self, key: NodeKey) -> Option<&Node> {
        self.nodes.get(key)
    }

    pub(crate) fn get_mut(&mut self, key: NodeKey) -> Option<&mut Node> {
        self.nodes.get_mut(key)
    }

    /// Look up a live node, treating disposed ones as gone.
    pub(crate) fn node(&self, key: NodeKey) -> Result<&Node> {
        match self.nodes.get(key) {
            Some(node) if !node.is_disposed() => Ok(node),
            _ => Err(ReactiveError::Disposed {
                node: describe(key, None),
            }),
        }
    }

    pub(crate) fn node_mut(&mut self, key: NodeKey) -> Result<&mut Node> {
        match self.nodes.get_mut(key) {
            Some(node) if !node.is_disposed() => Ok(node),
            _ => Err(ReactiveError::Disposed {
                node: describe(key, None),
            }),
        }
    }

    pub(crate) fn kind(&self, key: NodeKey) -> Option<NodeKind> {
        self.nodes.get(key).map(Node::kind)
    }

    pub(crate) fn describe(&self, key: NodeKey) -> String {
        describe(key, self.kind(key))
    }

    pub(crate) fn flags_mut(&mut self, key: NodeKey) -> Option<&mut Flags> {
        self.nodes.get_mut(key).map(|node| &mut node.flags)
    }

    /// Create an edge `producer -> dependent` at the head of both lists.
    pub(crate) fn link(&mut self, producer: NodeKey, dependent: NodeKey, version: u64) -> EdgeId {
        let id = self.edges.acquire(producer, dependent, version);

        if let Some(node) = self.nodes.get_mut(producer) {
            self.edges.push_front(&mut node.targets, id, Side::Targets);
        }
        if let Some(node) = self.nodes.get_mut(dependent) {
            self.edges.push_front(&mut node.sources, id, Side::Sources);
        }
        id
    }

    /// Remove an edge from both lists and return it to the pool.
    pub(crate) fn unlink(&mut self, id: EdgeId) {
        let (producer, dependent) = {
            let edge = self.edges.get(id);
            (edge.producer, edge.dependent)
        };

        if let Some(node) = self.nodes.get_mut(producer) {
            self.edges.remove(&mut node.targets, id, Side::Targets);
            if node.scratch == Some(id) {
                node.scratch = None;
            }
        }
        if let Some(node) = self.nodes.get_mut(dependent) {
            self.edges.remove(&mut node.sources, id, Side::Sources);
        }
        self.edges.release(id);
    }

    pub(crate) fn first_source(&self, key: NodeKey) -> Option<EdgeId> {
        self.nodes.get(key).and_then(|node| node.sources.head)
    }

    pub(crate) fn source_ids(&self, key: NodeKey) -> Vec<EdgeId> {
        match self.nodes.get(key) {
            Some(node) => self.edges.collect(&node.sources, Side::Sources),
            None => Vec::new(),
        }
    }

    pub(crate) fn target_ids(&self, key: NodeKey) -> Vec<EdgeId> {
        match self.nodes.get(key) {
            Some(node) => self.edges.collect(&node.targets, Side::Targets),
            None => Vec::new(),
        }
    }

    /// Producers `key` currently depends on, most recently linked first.
    #[cfg(test)]
    pub(crate) fn producers(&self, key: NodeKey) -> Vec<NodeKey> {
        self.source_ids(key)
            .into_iter()
            .map(|id| self.edges.get(id).producer)
            .collect()
    }

    /// Whether any producer moved past the version recorded on its edge.
    ///
    /// Only meaningful once every producer has been brought up to date.
    pub(crate) fn sources_changed(&self, key: NodeKey) -> bool {
        let mut cursor = self.first_source(key);
        while let Some(id) = cursor {
            let edge = self.edges.get(id);
            match self.nodes.get(edge.producer) {
                Some(producer) if producer.version == edge.version => {}
                _ => return true,
            }
            cursor = edge.next_source;
        }
        false
    }

    /// Unlink every source edge still tagged [`UNVISITED`]. Returns how many
    /// were pruned.
    pub(crate) fn prune_unvisited(&mut self, key: NodeKey) -> usize {
        let stale: Vec<EdgeId> = self
            .source_ids(key)
            .into_iter()
            .filter(|&id| self.edges.get(id).version == UNVISITED)
            .collect();
        for &id in &stale {
            self.unlink(id);
        }
        stale.len()
    }

    /// Unlink every edge touching `key`, in both directions.
    pub(crate) fn detach(&mut self, key: NodeKey) {
        for id in self.source_ids(key) {
            self.unlink(id);
        }
        for id in self.target_ids(key) {
            self.unlink(id);
        }
    }

    /// Detach and drop a node from the arena.
    ///
    /// The node is returned so that its payload (which may own user
    /// closures) can be dropped after the graph borrow is released.
    pub(crate) fn remove(&mut self, key: NodeKey) -> Option<Node> {
        self.detach(key);
        self.nodes.remove(key)
    }

    pub(crate) fn stats(&self) -> RuntimeStats {
        RuntimeStats {
            nodes: self.nodes.len(),
            live_edges: self.edges.live(),
            pooled_edges: self.edges.pooled(),
            edges_allocated: self.edges.allocated(),
            edges_reused: self.edges.reused(),
        }
    }
}

fn describe(key: NodeKey, kind: Option<NodeKind>) -> String {
    match kind {
        Some(kind) => format!("{kind:?}{key:?}"),
        None => format!("{key:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    fn graph_with_sources(n: usize) -> (Graph, Vec<NodeKey>) {
        let mut graph = Graph::default();
        let keys = (0..n).map(|i| graph.insert(Node::source(Rc::new(i)))).collect();
        (graph, keys)
    }

    #[test]
    fn link_and_unlink_edges() {
        let (mut graph, k) = graph_with_sources(2);

        let id = graph.link(k[0], k[1], 0);
        assert_eq!(graph.producers(k[1]), vec![k[0]]);
        assert_eq!(graph.target_ids(k[0]), vec![id]);

        graph.unlink(id);
        assert!(graph.producers(k[1]).is_empty());
        assert!(graph.target_ids(k[0]).is_empty());
        assert_eq!(graph.stats().pooled_edges, 1);
    }

    #[test]
    fn sources_changed_compares_versions() {
        let (mut graph, k) = graph_with_sources(3);
        graph.link(k[0], k[2], 0);
        graph.link(k[1], k[2], 0);
        assert!(!graph.sources_changed(k[2]));

        graph.get_mut(k[1]).unwrap().version = 1;
        assert!(graph.sources_changed(k[2]));
    }

    #[test]
    fn prune_drops_only_unvisited_edges() {
        let (mut graph, k) = graph_with_sources(3);
        graph.link(k[0], k[2], 4);
        graph.link(k[1], k[2], UNVISITED);

        assert_eq!(graph.prune_unvisited(k[2]), 1);
        assert_eq!(graph.producers(k[2]), vec![k[0]]);
        assert!(graph.target_ids(k[1]).is_empty());
    }

    #[test]
    fn remove_detaches_both_directions() {
        let (mut graph, k) = graph_with_sources(3);
        graph.link(k[0], k[1], 0);
        graph.link(k[1], k[2], 0);

        assert!(graph.remove(k[1]).is_some());
        assert!(graph.target_ids(k[0]).is_empty());
        assert!(graph.producers(k[2]).is_empty());
        assert_eq!(graph.stats().nodes, 2);
        assert_eq!(graph.stats().live_edges, 0);

        assert!(matches!(graph.node(k[1]), Err(ReactiveError::Disposed { .. })));
    }
}
