//! PCB allocator with priority-based reclamation (SPEC_FULL.md §4.4).
//!
//! No teacher analog — the teacher's `Manager` inserts into a `HashMap` unconditionally and
//! never runs out of room. This is built directly from the Design Notes' explicit policy list:
//! `[kill_tw, kill_state(LAST_ACK), kill_state(CLOSING), kill_prio(new)]`, tried in order, each
//! followed by a retry of the plain allocation.

use crate::collab::Collaborators;
use crate::config::TCP_PRIO_MAX;
use crate::context::TcpContext;
use crate::error::TcpError;
use crate::pcb::{ListKind, Pcb, PcbId, TcpState};

impl<C: Collaborators> TcpContext<C> {
    /// `alloc(prio)` (§4.4): up to five attempts, the last four interleaved with a single
    /// reclamation kill each.
    pub(crate) fn alloc(&mut self, prio: u8) -> Option<PcbId> {
        if self.slab.live_count() < self.config.max_pcbs {
            return Some(self.fresh_pcb());
        }

        log::warn!("PCB pool exhausted ({} live), attempting reclamation", self.slab.live_count());
        let steps: [fn(&mut Self, u8) -> bool; 4] = [
            |s, _| s.kill_oldest_tw(),
            |s, _| s.kill_oldest_state(TcpState::LastAck),
            |s, _| s.kill_oldest_state(TcpState::Closing),
            |s, p| s.kill_prio(p),
        ];
        for step in steps {
            step(self, prio);
            if self.slab.live_count() < self.config.max_pcbs {
                return Some(self.fresh_pcb());
            }
        }
        log::warn!("PCB pool exhausted and reclamation cascade failed");
        None
    }

    fn fresh_pcb(&mut self) -> PcbId {
        let ticks = self.tcp_ticks;
        let iss = self.iss.next_iss(ticks);
        let mss = self.config.mss.min(536);
        let wnd = self.config.wnd_max();
        let pcb = Pcb::new_default(iss, mss, wnd, ticks, self.timer_ctr);
        self.slab.insert(pcb)
    }

    fn oldest(&self, ids: &[PcbId]) -> Option<PcbId> {
        ids.iter()
            .copied()
            .max_by_key(|&id| self.slab.get(id).map(|p| self.tcp_ticks.wrapping_sub(p.tmr)).unwrap_or(0))
    }

    fn kill_oldest_tw(&mut self) -> bool {
        let ids = self.lists.ids(&self.slab, ListKind::Tw);
        match self.oldest(&ids) {
            Some(id) => {
                self.report_err(id, TcpError::Abrt);
                self.pcb_free(id, false);
                true
            }
            None => false,
        }
    }

    fn kill_oldest_state(&mut self, state: TcpState) -> bool {
        let ids: Vec<PcbId> = self
            .lists
            .ids(&self.slab, ListKind::Active)
            .into_iter()
            .filter(|&id| self.slab.get(id).map_or(false, |p| p.state == state))
            .collect();
        match self.oldest(&ids) {
            Some(id) => {
                self.report_err(id, TcpError::Abrt);
                self.pcb_free(id, false);
                true
            }
            None => false,
        }
    }

    /// Kill the lowest-priority PCB on the active list whose priority is at or below
    /// `min(new_prio, TCP_PRIO_MAX)`, oldest first among ties. Equivalent to the spec's
    /// ceiling-narrowing scan (a single pass that lowers its ceiling as it finds better
    /// candidates converges on the same victim as computing the minimum directly).
    fn kill_prio(&mut self, new_prio: u8) -> bool {
        let ceiling = new_prio.min(TCP_PRIO_MAX);
        let candidates: Vec<PcbId> = self
            .lists
            .ids(&self.slab, ListKind::Active)
            .into_iter()
            .filter(|&id| self.slab.get(id).map_or(false, |p| p.prio <= ceiling))
            .collect();
        let min_prio = match candidates.iter().filter_map(|&id| self.slab.get(id).map(|p| p.prio)).min() {
            Some(p) => p,
            None => return false,
        };
        let lowest: Vec<PcbId> = candidates
            .into_iter()
            .filter(|&id| self.slab.get(id).map_or(false, |p| p.prio == min_prio))
            .collect();
        match self.oldest(&lowest) {
            Some(id) => {
                self.report_err(id, TcpError::Abrt);
                self.pcb_free(id, false);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::{RouteLookup, SegmentOutput, TimerCollaborator};
    use crate::config::TcpConfig;
    use crate::error::TcpResult;
    use crate::pcb::SegFlags;
    use std::net::IpAddr;

    #[derive(Default)]
    struct Fake;
    impl SegmentOutput for Fake {
        fn output(&mut self, _pcb: &Pcb) -> TcpResult<()> {
            Ok(())
        }
        fn rst(&mut self, _snd: u32, _rcv: u32, _local: (IpAddr, u16), _remote: (IpAddr, u16)) {}
        fn send_fin(&mut self, _pcb: &Pcb) -> TcpResult<()> {
            Ok(())
        }
        fn enqueue_flags(&mut self, _pcb: &Pcb, _flags: SegFlags) -> TcpResult<()> {
            Ok(())
        }
        fn zero_window_probe(&mut self, _pcb: &Pcb) -> TcpResult<()> {
            Ok(())
        }
        fn rexmit_rto(&mut self, _pcb: &Pcb) {}
        fn keepalive(&mut self, _pcb: &Pcb) -> TcpResult<()> {
            Ok(())
        }
    }
    impl RouteLookup for Fake {
        fn local_ip_for(&self, _remote: IpAddr) -> Option<IpAddr> {
            None
        }
        fn route_mtu(&self, _remote: IpAddr) -> Option<u16> {
            None
        }
    }
    impl TimerCollaborator for Fake {
        fn timer_needed(&mut self) {}
    }

    #[test]
    fn exhausted_pool_reclaims_oldest_time_wait() {
        let mut config = TcpConfig::default();
        config.max_pcbs = 1;
        let mut ctx = TcpContext::new(config, Fake);

        let first = ctx.new_pcb().unwrap();
        ctx.slab.get_mut(first).unwrap().state = TcpState::SynSent;
        crate::store::reg(&mut ctx.slab, &mut ctx.lists, &mut ctx.iter, ListKind::Active, first);
        ctx.move_to_time_wait(first);

        let second = ctx.new_pcb();
        assert!(second.is_some());
        assert!(!ctx.slab.contains(first));
        assert!(ctx.slab.contains(second.unwrap()));
    }
}
