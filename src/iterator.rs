//! The safe iteration protocol (SPEC_FULL.md §4.2).
//!
//! A single process-wide cursor tracks the in-progress scan of one list at a time (the timer
//! engine never has two scans live simultaneously, per §5). `will_remove`/`will_prepend` are
//! invoked by [`crate::store`] immediately before any mutation of the list being scanned, so
//! the cursor is always repaired before the dangling id it points at could ever be
//! dereferenced.

use crate::pcb::{ListKind, PcbId};
use crate::store::PcbSlab;

#[derive(Debug, Default)]
pub struct SafeIterator {
    scanning: Option<ListKind>,
    current: Option<PcbId>,
    prev: Option<PcbId>,
    next_is_current: bool,
}

impl SafeIterator {
    pub fn new() -> Self {
        SafeIterator::default()
    }

    /// Begin a scan of `list`, whose current head is `head`.
    pub fn start(&mut self, list: ListKind, head: Option<PcbId>) {
        self.scanning = Some(list);
        self.current = head;
        self.prev = None;
        self.next_is_current = true;
    }

    pub fn current(&self) -> Option<PcbId> {
        self.current
    }

    pub fn prev(&self) -> Option<PcbId> {
        self.prev
    }

    /// Advance the cursor, returning the next PCB in the scan or `None` when it ends.
    pub fn next(&mut self, slab: &PcbSlab) -> Option<PcbId> {
        if self.next_is_current {
            self.next_is_current = false;
            return self.current;
        }
        self.prev = self.current;
        self.current = self.current.and_then(|id| slab.get(id)).and_then(|p| p.next);
        log::trace!("iterator advanced to {:?} on {:?}", self.current, self.scanning);
        self.current
    }

    /// End the scan (so later list mutations on `list` are no longer tracked by this cursor).
    pub fn finish(&mut self) {
        self.scanning = None;
        self.current = None;
        self.prev = None;
        self.next_is_current = false;
    }

    /// Must be called before `pcb` is unlinked from `list`.
    pub fn will_remove(&mut self, slab: &PcbSlab, list: ListKind, head: Option<PcbId>, pcb: PcbId) {
        if self.scanning != Some(list) {
            return;
        }
        if self.current == Some(pcb) {
            self.current = slab.get(pcb).and_then(|p| p.next);
            self.next_is_current = true;
        } else if self.prev == Some(pcb) {
            self.prev = Self::predecessor_of(slab, head, pcb);
        }
    }

    /// Must be called before `pcb` is prepended to `list` (i.e. before the head pointer moves).
    pub fn will_prepend(&mut self, list: ListKind, old_head: Option<PcbId>, pcb: PcbId) {
        if self.scanning != Some(list) {
            return;
        }
        if self.current == old_head {
            self.prev = Some(pcb);
        }
    }

    fn predecessor_of(slab: &PcbSlab, head: Option<PcbId>, target: PcbId) -> Option<PcbId> {
        let mut cursor = head?;
        if cursor == target {
            return None;
        }
        loop {
            let next = slab.get(cursor)?.next;
            match next {
                Some(n) if n == target => return Some(cursor),
                Some(n) => cursor = n,
                None => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pcb::Pcb;

    fn slab_with_chain(n: usize) -> (PcbSlab, Vec<PcbId>, Option<PcbId>) {
        let mut slab = PcbSlab::new();
        let mut ids = Vec::new();
        let mut head: Option<PcbId> = None;
        for i in 0..n {
            let id = slab.insert(Pcb::new_default(i as u32, 536, 1024, 0, 0));
            ids.push(id);
        }
        // Link tail-to-head so ids[0] is the list head, matching prepend-at-head semantics.
        for i in (0..n).rev() {
            let id = ids[i];
            slab.get_mut(id).unwrap().next = head;
            head = Some(id);
        }
        (slab, ids, head)
    }

    #[test]
    fn remove_current_redelivers_successor() {
        let (slab, ids, head) = slab_with_chain(3);
        let mut it = SafeIterator::new();
        it.start(ListKind::Active, head);
        assert_eq!(it.next(&slab), Some(ids[0]));
        it.will_remove(&slab, ListKind::Active, head, ids[0]);
        // current now repoints at ids[1], redelivered on next `next()`.
        assert_eq!(it.next(&slab), Some(ids[1]));
        assert_eq!(it.next(&slab), Some(ids[2]));
        assert_eq!(it.next(&slab), None);
    }

    #[test]
    fn remove_prev_repairs_predecessor() {
        let (slab, ids, head) = slab_with_chain(3);
        let mut it = SafeIterator::new();
        it.start(ListKind::Active, head);
        assert_eq!(it.next(&slab), Some(ids[0]));
        assert_eq!(it.next(&slab), Some(ids[1]));
        // ids[0] is `prev`; removing it should repair `prev` to ids[0]'s predecessor (none, head).
        it.will_remove(&slab, ListKind::Active, head, ids[0]);
        assert_eq!(it.prev(), None);
    }

    #[test]
    fn prepend_at_head_sets_prev() {
        let (mut slab, ids, head) = slab_with_chain(2);
        let mut it = SafeIterator::new();
        it.start(ListKind::Active, head);
        // A PCB not yet linked into the list being scanned, standing in for the one about to be
        // prepended ahead of the cursor.
        let new_id = slab.insert(Pcb::new_default(99, 536, 1024, 0, 0));
        it.will_prepend(ListKind::Active, head, new_id);
        assert_eq!(it.prev(), Some(new_id));
        let _ = ids;
    }
}
