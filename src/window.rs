//! Receive-window advertisement (SPEC_FULL.md §4.7).
//!
//! No direct teacher analog (the teacher's `TCB` always advertises its full buffer), so this
//! follows the spec's silly-window-avoidance text directly, in the same state-update style as
//! `lifecycle.rs`'s other PCB mutators.

use crate::collab::Collaborators;
use crate::context::TcpContext;
use crate::pcb::{PcbFlags, PcbId};

impl<C: Collaborators> TcpContext<C> {
    /// `update_rcv_ann_wnd(pcb)`: refreshes the advertised window, returning how much the
    /// right edge actually moved (the "inflation" `recved` checks against the SWS threshold).
    pub(crate) fn update_rcv_ann_wnd(&mut self, id: PcbId) -> u32 {
        let pcb = match self.slab.get(id) {
            Some(p) => p,
            None => return 0,
        };
        let new_right_edge = pcb.rcv_nxt.wrapping_add(pcb.rcv_wnd);
        let gain = new_right_edge.wrapping_sub(pcb.rcv_ann_right_edge) as i32;
        let threshold = (self.config.wnd_max() / 2).min(pcb.mss as u32);

        if gain >= 0 && gain as u32 >= threshold {
            let p = self.slab.get_mut(id).unwrap();
            p.rcv_ann_wnd = p.rcv_wnd;
            p.rcv_ann_right_edge = new_right_edge;
            gain as u32
        } else if pcb.rcv_nxt.wrapping_sub(pcb.rcv_ann_right_edge) as i32 > 0 {
            self.slab.get_mut(id).unwrap().rcv_ann_wnd = 0;
            0
        } else {
            let p = self.slab.get_mut(id).unwrap();
            p.rcv_ann_wnd = p.rcv_ann_right_edge.wrapping_sub(p.rcv_nxt);
            0
        }
    }

    /// `recved(pcb, len)`: opens the receive window by `len` bytes and forces an immediate ACK
    /// if the resulting advertisement grew enough to matter to the peer.
    pub fn recved(&mut self, id: PcbId, len: u32) {
        let wnd_max = self.config.wnd_max();
        if let Some(pcb) = self.slab.get_mut(id) {
            pcb.rcv_wnd = (pcb.rcv_wnd + len).min(wnd_max);
        } else {
            return;
        }

        let inflation = self.update_rcv_ann_wnd(id);
        if inflation >= self.config.wnd_update_threshold {
            if let Some(pcb) = self.slab.get_mut(id) {
                pcb.flags.insert(PcbFlags::ACK_NOW);
            }
            let _ = {
                let (slab, collab) = (&self.slab, &mut self.collab);
                collab.output(slab.get(id).unwrap())
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::{RouteLookup, SegmentOutput, TimerCollaborator};
    use crate::config::TcpConfig;
    use crate::error::TcpResult;
    use crate::pcb::{Pcb, SegFlags, TcpState};
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
    fn small_reads_shrink_advertised_window_without_moving_right_edge() {
        let mut ctx = TcpContext::new(TcpConfig::default(), Fake);
        let id = ctx.new_pcb().unwrap();
        {
            let pcb = ctx.slab.get_mut(id).unwrap();
            pcb.state = TcpState::Established;
            pcb.rcv_nxt = 900;
            pcb.rcv_wnd = 100;
            pcb.rcv_ann_right_edge = 1000;
        }

        // Gain (50) is well under the SWS threshold, so the right edge should hold and the
        // advertised window should shrink to keep it there.
        ctx.recved(id, 50);

        let pcb = ctx.slab.get(id).unwrap();
        assert_eq!(pcb.rcv_ann_right_edge, 1000);
        assert_eq!(pcb.rcv_ann_wnd, 100);
        assert!(pcb.rcv_ann_wnd < pcb.rcv_wnd);
    }

    #[test]
    fn large_read_past_threshold_refreshes_right_edge() {
        let mut ctx = TcpContext::new(TcpConfig::default(), Fake);
        let id = ctx.new_pcb().unwrap();
        ctx.slab.get_mut(id).unwrap().state = TcpState::Established;
        let big = ctx.config.wnd_max();

        ctx.recved(id, big);

        let pcb = ctx.slab.get(id).unwrap();
        assert_eq!(pcb.rcv_ann_wnd, pcb.rcv_wnd);
        assert_eq!(pcb.rcv_ann_right_edge, pcb.rcv_nxt.wrapping_add(pcb.rcv_wnd));
    }
}
