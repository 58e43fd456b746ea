//! Address-change notifier (SPEC_FULL.md §4.8).
//!
//! No teacher analog (the teacher never models interface reconfiguration); grounded on lwIP's
//! `tcp_netif_ip_addr_changed`, which this spec's wording distills: bound/active connections
//! pinned to the revoked address are torn down, while listeners bound to it are rebound rather
//! than aborted, since a listener has no in-flight peer to notify.

use std::net::IpAddr;

use crate::collab::Collaborators;
use crate::context::TcpContext;
use crate::error::TcpError;
use crate::pcb::ListKind;

impl<C: Collaborators> TcpContext<C> {
    /// Called when a local interface's address changes from `old_addr` to `new_addr`.
    pub fn netif_ip_addr_changed(&mut self, old_addr: IpAddr, new_addr: IpAddr) {
        for kind in [ListKind::Bound, ListKind::Active] {
            for id in self.lists.ids(&self.slab, kind) {
                let pinned = self.slab.get(id).map_or(false, |p| p.local_addr == Some(old_addr));
                if pinned {
                    self.report_err(id, TcpError::Abrt);
                    self.pcb_free(id, true);
                }
            }
        }

        for id in self.lists.ids(&self.slab, ListKind::Listen) {
            let pinned = self.slab.get(id).map_or(false, |p| p.local_addr == Some(old_addr));
            if pinned {
                self.slab.get_mut(id).unwrap().local_addr = Some(new_addr);
            }
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
    fn listener_on_revoked_address_is_rebound_not_aborted() {
        let mut ctx = TcpContext::new(TcpConfig::default(), Fake);
        let id = ctx.new_listen_pcb().unwrap();
        let old: IpAddr = "192.168.1.5".parse().unwrap();
        let new: IpAddr = "192.168.1.9".parse().unwrap();
        ctx.bind(id, Some(old), 8080).unwrap();
        ctx.listen_with_backlog(id, 4).unwrap();

        ctx.netif_ip_addr_changed(old, new);

        assert!(ctx.slab.contains(id));
        assert_eq!(ctx.slab.get(id).unwrap().local_addr, Some(new));
    }

    #[test]
    fn connection_on_revoked_address_is_aborted() {
        let mut ctx = TcpContext::new(TcpConfig::default(), Fake);
        let id = ctx.new_pcb().unwrap();
        let old: IpAddr = "192.168.1.5".parse().unwrap();
        ctx.bind(id, Some(old), 9090).unwrap();
        ctx.slab.get_mut(id).unwrap().state = TcpState::Established;
        crate::store::rmv(&mut ctx.slab, &mut ctx.lists, &mut ctx.iter, ListKind::Bound, id);
        crate::store::reg(&mut ctx.slab, &mut ctx.lists, &mut ctx.iter, ListKind::Active, id);

        ctx.netif_ip_addr_changed(old, "192.168.1.9".parse().unwrap());

        assert!(!ctx.slab.contains(id));
    }
}
