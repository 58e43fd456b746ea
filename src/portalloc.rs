//! Ephemeral port allocator (SPEC_FULL.md §4.3).

use rand::Rng;

use crate::config::{EPHEMERAL_PORT_HI, EPHEMERAL_PORT_LO};
use crate::pcb::PcbId;
use crate::store::{PcbLists, PcbSlab};

#[derive(Debug)]
pub struct PortAllocator {
    cursor: u16,
}

impl PortAllocator {
    /// Seeds the rolling cursor from `rand`, as the spec allows ("may be seeded from an
    /// external randomness source").
    pub fn new() -> Self {
        let cursor = rand::thread_rng().gen_range(EPHEMERAL_PORT_LO..=EPHEMERAL_PORT_HI);
        PortAllocator { cursor }
    }

    fn advance(&mut self) {
        self.cursor = if self.cursor >= EPHEMERAL_PORT_HI {
            EPHEMERAL_PORT_LO
        } else {
            self.cursor + 1
        };
    }

    /// Advance-and-scan until a port with no collision on any of the four lists is found, or
    /// a full cycle has been attempted (§4.3).
    pub fn new_port(&mut self, slab: &PcbSlab, lists: &PcbLists) -> Option<u16> {
        let span = (EPHEMERAL_PORT_HI - EPHEMERAL_PORT_LO) as u32 + 1;
        for _ in 0..span {
            self.advance();
            if !Self::collides(slab, lists, self.cursor) {
                return Some(self.cursor);
            }
        }
        None
    }

    fn collides(slab: &PcbSlab, lists: &PcbLists, port: u16) -> bool {
        PcbLists::ALL.iter().any(|&kind| {
            lists
                .ids(slab, kind)
                .into_iter()
                .filter_map(|id: PcbId| slab.get(id))
                .any(|pcb| pcb.local_port == port)
        })
    }
}

impl Default for PortAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pcb::{ListKind, Pcb};
    use crate::store::reg;
    use crate::iterator::SafeIterator;

    #[test]
    fn skips_occupied_ports() {
        let mut slab = PcbSlab::new();
        let mut lists = PcbLists::default();
        let mut iter = SafeIterator::new();
        let mut alloc = PortAllocator { cursor: EPHEMERAL_PORT_LO };

        let occupied = EPHEMERAL_PORT_LO + 1;
        let pcb_id = slab.insert(Pcb::new_default(0, 536, 1024, 0, 0));
        slab.get_mut(pcb_id).unwrap().local_port = occupied;
        reg(&mut slab, &mut lists, &mut iter, ListKind::Bound, pcb_id);

        let port = alloc.new_port(&slab, &lists).unwrap();
        assert_ne!(port, occupied);
    }
}
