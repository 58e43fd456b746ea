//! PCB storage: the arena and the four intrusive lists that partition every non-CLOSED PCB
//! (SPEC_FULL.md §3/§4.1).

use crate::iterator::SafeIterator;
use crate::pcb::{ListKind, Pcb, PcbId};

use slotmap::DenseSlotMap;

/// Arena of PCBs addressed by stable [`PcbId`]s. Backed by `slotmap::DenseSlotMap`, which is
/// the corpus's own answer to "store entries by stable key, reclaim freed slots" (see
/// `shadow-shadow`'s `children: DenseSlotMap<ChildTcpKey, ChildEntry<X>>`) rather than a
/// hand-rolled `Vec` + free list — this is the Rust substitute for the spec's
/// `memp_malloc`/`memp_free` pool (§6), internal to this crate since nothing outside it needs
/// to know a PCB's storage strategy.
#[derive(Debug, Default)]
pub struct PcbSlab {
    slots: DenseSlotMap<PcbId, Pcb>,
}

impl PcbSlab {
    pub fn new() -> Self {
        PcbSlab::default()
    }

    pub fn insert(&mut self, pcb: Pcb) -> PcbId {
        self.slots.insert(pcb)
    }

    pub fn get(&self, id: PcbId) -> Option<&Pcb> {
        self.slots.get(id)
    }

    pub fn get_mut(&mut self, id: PcbId) -> Option<&mut Pcb> {
        self.slots.get_mut(id)
    }

    /// Returns the PCB to the free list, handing back ownership so the caller (`pcb_free`)
    /// can run any last teardown before it is dropped.
    pub fn remove(&mut self, id: PcbId) -> Option<Pcb> {
        self.slots.remove(id)
    }

    pub fn contains(&self, id: PcbId) -> bool {
        self.slots.contains_key(id)
    }

    pub fn live_count(&self) -> usize {
        self.slots.len()
    }
}

/// Head pointers of the four lists (§3). Addressed by a `ListKind` rather than four separate
/// fields at call sites so `reg`/`rmv` can be written once and reused for every list.
#[derive(Debug, Default)]
pub struct PcbLists {
    pub listen: Option<PcbId>,
    pub bound: Option<PcbId>,
    pub active: Option<PcbId>,
    pub tw: Option<PcbId>,
}

impl PcbLists {
    pub fn head(&self, kind: ListKind) -> Option<PcbId> {
        match kind {
            ListKind::Listen => self.listen,
            ListKind::Bound => self.bound,
            ListKind::Active => self.active,
            ListKind::Tw => self.tw,
        }
    }

    fn head_mut(&mut self, kind: ListKind) -> &mut Option<PcbId> {
        match kind {
            ListKind::Listen => &mut self.listen,
            ListKind::Bound => &mut self.bound,
            ListKind::Active => &mut self.active,
            ListKind::Tw => &mut self.tw,
        }
    }

    /// All four list kinds, for scans that must cover "every list" (port-collision checks,
    /// `pcbs_sane`).
    pub const ALL: [ListKind; 4] = [
        ListKind::Listen,
        ListKind::Bound,
        ListKind::Active,
        ListKind::Tw,
    ];

    /// Collects the ids currently on `kind`, head to tail. O(n); used by scans that need a
    /// snapshot rather than a live cursor (port-collision checks, oldest-PCB search, tests).
    pub fn ids(&self, slab: &PcbSlab, kind: ListKind) -> Vec<PcbId> {
        let mut out = Vec::new();
        let mut cur = self.head(kind);
        while let Some(id) = cur {
            out.push(id);
            cur = slab.get(id).and_then(|p| p.next);
        }
        out
    }
}

/// Prepend `pcb` to `kind` (§4.1). `pcb` must not already be on any list — this is a
/// programmer error, not a caller error (§7), so it is asserted rather than returned as a
/// `TcpError`.
pub fn reg(slab: &mut PcbSlab, lists: &mut PcbLists, iter: &mut SafeIterator, kind: ListKind, id: PcbId) {
    let old_head = lists.head(kind);
    iter.will_prepend(kind, old_head, id);
    {
        let pcb = slab.get_mut(id).expect("reg: dangling PcbId");
        assert!(pcb.membership.is_none(), "reg: PCB already on a list");
        pcb.next = old_head;
        pcb.membership = Some(kind);
    }
    *lists.head_mut(kind) = Some(id);
    log::trace!("{:?} registered on {:?}", id, kind);
}

/// Unlink `pcb` from `kind` (§4.1). Scans from the head, as the spec's O(n)-removal design
/// requires. Succeeds or panics: removing a PCB not actually on `kind` is a bookkeeping bug.
pub fn rmv(slab: &mut PcbSlab, lists: &mut PcbLists, iter: &mut SafeIterator, kind: ListKind, id: PcbId) {
    let head = lists.head(kind);
    iter.will_remove(slab, kind, head, id);

    if head == Some(id) {
        let next = slab.get(id).expect("rmv: dangling PcbId").next;
        *lists.head_mut(kind) = next;
    } else {
        let mut cursor = head.expect("rmv: PCB not found on list");
        loop {
            let next = slab.get(cursor).expect("rmv: dangling PcbId").next;
            match next {
                Some(n) if n == id => {
                    let after = slab.get(id).unwrap().next;
                    slab.get_mut(cursor).unwrap().next = after;
                    break;
                }
                Some(n) => cursor = n,
                None => panic!("rmv: PCB not found on list"),
            }
        }
    }

    let pcb = slab.get_mut(id).expect("rmv: dangling PcbId");
    pcb.next = None;
    pcb.membership = None;
    log::trace!("{:?} removed from {:?}", id, kind);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pcb::Pcb;

    #[test]
    fn reg_prepends_and_rmv_unlinks() {
        let mut slab = PcbSlab::new();
        let mut lists = PcbLists::default();
        let mut iter = SafeIterator::new();

        let a = slab.insert(Pcb::new_default(1, 536, 1024, 0, 0));
        let b = slab.insert(Pcb::new_default(2, 536, 1024, 0, 0));

        reg(&mut slab, &mut lists, &mut iter, ListKind::Bound, a);
        reg(&mut slab, &mut lists, &mut iter, ListKind::Bound, b);
        assert_eq!(lists.ids(&slab, ListKind::Bound), vec![b, a]);

        rmv(&mut slab, &mut lists, &mut iter, ListKind::Bound, b);
        assert_eq!(lists.ids(&slab, ListKind::Bound), vec![a]);
        assert!(slab.get(b).unwrap().membership.is_none());

        rmv(&mut slab, &mut lists, &mut iter, ListKind::Bound, a);
        assert!(lists.ids(&slab, ListKind::Bound).is_empty());
    }

    #[test]
    #[should_panic(expected = "already on a list")]
    fn double_register_panics() {
        let mut slab = PcbSlab::new();
        let mut lists = PcbLists::default();
        let mut iter = SafeIterator::new();
        let a = slab.insert(Pcb::new_default(1, 536, 1024, 0, 0));
        reg(&mut slab, &mut lists, &mut iter, ListKind::Bound, a);
        reg(&mut slab, &mut lists, &mut iter, ListKind::Active, a);
    }
}
