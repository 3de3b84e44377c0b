//! Edges and the edge pool.
//!
//! Every edge sits in two intrusive doubly linked lists at once: the
//! producer's *targets* list and the dependent's *sources* list. Edges are
//! addressed by [`EdgeId`] into a slab owned by [`EdgePool`]; unlinked edges
//! go onto the pool's free list and are handed out again before the slab
//! grows.

use super::NodeKey;

/// Version tag meaning "not read during the current run yet".
pub(crate) const UNVISITED: u64 = u64::MAX;

/// Index of an edge in the pool's slab.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EdgeId(u32);

impl EdgeId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// A versioned dependency link from `producer` to `dependent`.
#[derive(Debug, Clone)]
pub(crate) struct Edge {
    pub(crate) producer: NodeKey,
    pub(crate) dependent: NodeKey,

    /// Producer version observed when the dependent last read it.
    pub(crate) version: u64,

    // Links within the dependent's sources list.
    pub(crate) prev_source: Option<EdgeId>,
    pub(crate) next_source: Option<EdgeId>,

    // Links within the producer's targets list.
    pub(crate) prev_target: Option<EdgeId>,
    pub(crate) next_target: Option<EdgeId>,
}

/// Head of an intrusive edge list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct EdgeList {
    pub(crate) head: Option<EdgeId>,
    len: usize,
}

impl EdgeList {
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Slab of edges plus the free list of recycled slots.
#[derive(Debug, Default)]
pub(crate) struct EdgePool {
    slots: Vec<Edge>,
    free: Vec<EdgeId>,
    allocated: u64,
    reused: u64,
}

impl EdgePool {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            ..Self::default()
        }
    }

    /// Take an edge from the free list, or grow the slab.
    pub(crate) fn acquire(&mut self, producer: NodeKey, dependent: NodeKey, version: u64) -> EdgeId {
        let edge = Edge {
            producer,
            dependent,
            version,
            prev_source: None,
            next_source: None,
            prev_target: None,
            next_target: None,
        };

        if let Some(id) = self.free.pop() {
            self.slots[id.index()] = edge;
            self.reused += 1;
            return id;
        }

        let id = EdgeId(u32::try_from(self.slots.len()).expect("edge slab exceeded u32 indices"));
        self.slots.push(edge);
        self.allocated += 1;
        id
    }

    /// Return an unlinked edge to the free list.
    pub(crate) fn release(&mut self, id: EdgeId) {
        debug_assert!(!self.free.contains(&id), "edge {id:?} released twice");
        self.free.push(id);
    }

    pub(crate) fn get(&self, id: EdgeId) -> &Edge {
        &self.slots[id.index()]
    }

    pub(crate) fn get_mut(&mut self, id: EdgeId) -> &mut Edge {
        &mut self.slots[id.index()]
    }

    pub(crate) fn live(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub(crate) fn pooled(&self) -> usize {
        self.free.len()
    }

    pub(crate) fn allocated(&self) -> u64 {
        self.allocated
    }

    pub(crate) fn reused(&self) -> u64 {
        self.reused
    }
}

/// Which of the two lists an edge operation applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Side {
    /// The dependent's list of producers.
    Sources,
    /// The producer's list of dependents.
    Targets,
}

impl EdgePool {
    fn links(&self, id: EdgeId, side: Side) -> (Option<EdgeId>, Option<EdgeId>) {
        let edge = self.get(id);
        match side {
            Side::Sources => (edge.prev_source, edge.next_source),
            Side::Targets => (edge.prev_target, edge.next_target),
        }
    }

    fn set_prev(&mut self, id: EdgeId, side: Side, prev: Option<EdgeId>) {
        let edge = self.get_mut(id);
        match side {
            Side::Sources => edge.prev_source = prev,
            Side::Targets => edge.prev_target = prev,
        }
    }

    fn set_next(&mut self, id: EdgeId, side: Side, next: Option<EdgeId>) {
        let edge = self.get_mut(id);
        match side {
            Side::Sources => edge.next_source = next,
            Side::Targets => edge.next_target = next,
        }
    }

    /// Insert `id` at the head of `list`.
    pub(crate) fn push_front(&mut self, list: &mut EdgeList, id: EdgeId, side: Side) {
        let old_head = list.head;
        self.set_prev(id, side, None);
        self.set_next(id, side, old_head);
        if let Some(head) = old_head {
            self.set_prev(head, side, Some(id));
        }
        list.head = Some(id);
        list.len += 1;
    }

    /// Remove `id` from `list` in O(1).
    pub(crate) fn remove(&mut self, list: &mut EdgeList, id: EdgeId, side: Side) {
        let (prev, next) = self.links(id, side);
        match prev {
            Some(prev) => self.set_next(prev, side, next),
            None => list.head = next,
        }
        if let Some(next) = next {
            self.set_prev(next, side, prev);
        }
        self.set_prev(id, side, None);
        self.set_next(id, side, None);
        list.len -= 1;
    }

    /// Collect the ids in `list`, head first.
    pub(crate) fn collect(&self, list: &EdgeList, side: Side) -> Vec<EdgeId> {
        let mut ids = Vec::with_capacity(list.len());
        let mut cursor = list.head;
        while let Some(id) = cursor {
            ids.push(id);
            cursor = self.links(id, side).1;
        }
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    fn keys(n: usize) -> Vec<NodeKey> {
        let mut map: SlotMap<NodeKey, ()> = SlotMap::with_key();
        (0..n).map(|_| map.insert(())).collect()
    }

    #[test]
    fn released_edges_are_reused_first() {
        let k = keys(2);
        let mut pool = EdgePool::default();

        let a = pool.acquire(k[0], k[1], 1);
        let b = pool.acquire(k[0], k[1], 2);
        assert_eq!(pool.allocated(), 2);
        assert_eq!(pool.live(), 2);

        pool.release(a);
        assert_eq!(pool.pooled(), 1);

        let c = pool.acquire(k[1], k[0], 3);
        assert_eq!(c, a);
        assert_ne!(c, b);
        assert_eq!(pool.allocated(), 2);
        assert_eq!(pool.reused(), 1);
        assert_eq!(pool.get(c).producer, k[1]);
        assert_eq!(pool.get(c).version, 3);
    }

    #[test]
    fn list_insert_at_head_and_unlink_middle() {
        let k = keys(2);
        let mut pool = EdgePool::default();
        let mut list = EdgeList::default();

        let ids: Vec<_> = (0..3).map(|v| pool.acquire(k[0], k[1], v)).collect();
        for &id in &ids {
            pool.push_front(&mut list, id, Side::Targets);
        }
        assert_eq!(pool.collect(&list, Side::Targets), vec![ids[2], ids[1], ids[0]]);

        pool.remove(&mut list, ids[1], Side::Targets);
        assert_eq!(pool.collect(&list, Side::Targets), vec![ids[2], ids[0]]);
        assert_eq!(list.len(), 2);

        pool.remove(&mut list, ids[2], Side::Targets);
        pool.remove(&mut list, ids[0], Side::Targets);
        assert!(list.is_empty());
        assert_eq!(list.head, None);
    }

    #[test]
    fn the_two_lists_are_independent() {
        let k = keys(2);
        let mut pool = EdgePool::default();
        let mut sources = EdgeList::default();
        let mut targets = EdgeList::default();

        let a = pool.acquire(k[0], k[1], 0);
        let b = pool.acquire(k[0], k[1], 0);
        pool.push_front(&mut sources, a, Side::Sources);
        pool.push_front(&mut sources, b, Side::Sources);
        pool.push_front(&mut targets, a, Side::Targets);

        pool.remove(&mut targets, a, Side::Targets);
        assert_eq!(pool.collect(&sources, Side::Sources), vec![b, a]);
        assert!(targets.is_empty());
    }
}
