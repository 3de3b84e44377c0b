//! Push traversal.
//!
//! When a source changes we walk outward over target edges:
//!
//! 1. A derived node reached for the first time in this pass is marked
//!    `OUTDATED | NOTIFIED` and its own targets are queued.
//! 2. A derived node that is already `NOTIFIED` is skipped; everything
//!    downstream of it was marked when it was first reached.
//! 3. A consumer reached for the first time is marked `NOTIFIED` and
//!    reported to the caller, which hands it to the scheduler.
//!
//! Work is bounded by the number of edges traversed, diamonds included.
//! Derived nodes are never recomputed here; that is the pull side's job.

use smallvec::SmallVec;

use super::node::{Flags, NodeKey, NodeKind};
use super::store::Graph;
use super::EdgeId;

impl Graph {
    /// Mark everything reachable from `source` and report the consumers
    /// that must be scheduled.
    pub(crate) fn invalidate(&mut self, source: NodeKey, notify: &mut impl FnMut(NodeKey)) {
        let mut stack: SmallVec<[EdgeId; 16]> = SmallVec::new();
        stack.extend(self.target_ids(source));

        while let Some(id) = stack.pop() {
            let dependent = self.edges.get(id).dependent;
            let Some(kind) = self.kind(dependent) else {
                continue;
            };
            let Some(flags) = self.flags_mut(dependent) else {
                continue;
            };
            if flags.intersects(Flags::NOTIFIED | Flags::DISPOSED) {
                continue;
            }

            match kind {
                NodeKind::Derived => {
                    flags.insert(Flags::OUTDATED | Flags::NOTIFIED);
                    tracing::trace!(node = ?dependent, "derived marked outdated");
                    stack.extend(self.target_ids(dependent));
                }
                NodeKind::Consumer => {
                    flags.insert(Flags::NOTIFIED);
                    tracing::trace!(node = ?dependent, "consumer notified");
                    notify(dependent);
                }
                // Sources never depend on anything.
                NodeKind::Source => {}
            }
        }
    }

    /// Clear `NOTIFIED` on the derived ancestors of `key` that a previous
    /// pass marked, leaving `OUTDATED` set so the next pull still rechecks
    /// them. Later writes then walk through to `key` again.
    pub(crate) fn release_notified(&mut self, key: NodeKey) {
        let mut stack: SmallVec<[EdgeId; 16]> = SmallVec::new();
        stack.extend(self.source_ids(key));

        while let Some(id) = stack.pop() {
            let producer = self.edges.get(id).producer;
            if self.kind(producer) != Some(NodeKind::Derived) {
                continue;
            }
            let Some(flags) = self.flags_mut(producer) else {
                continue;
            };
            if !flags.contains(Flags::NOTIFIED) {
                continue;
            }
            flags.remove(Flags::NOTIFIED);
            stack.extend(self.source_ids(producer));
        }
    }
}
