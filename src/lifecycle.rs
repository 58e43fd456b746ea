//! Lifecycle operations (SPEC_FULL.md §4.5): `bind`, `listen_with_backlog`, `connect`,
//! `close`, `shut_tx`, `close_shutdown`, `abort`, `close_listen`, `pcb_free`, `pcb_purge`,
//! `move_to_time_wait`, `report_err`, `backlog_delayed`/`backlog_accepted`, plus the `new`/
//! `new_listen` constructors.
//!
//! State-dispatch style (match on `TcpState`, one arm per transition) is grounded on the
//! teacher's `TCB::on_segment`/`TCB::close` (`src/tcp/tcb.rs`), which dispatches the same way.

use std::net::IpAddr;

use crate::collab::Collaborators;
use crate::context::TcpContext;
use crate::error::{TcpError, TcpResult};
use crate::pcb::{ConnectedCallback, ListKind, Pcb, PcbFlags, PcbId, SegFlags, TcpState};
use crate::store::{reg, rmv};

impl<C: Collaborators> TcpContext<C> {
    /// `new()`: allocate a fresh connection PCB, off all lists, in `Closed` state (§4.4).
    pub fn new_pcb(&mut self) -> Option<PcbId> {
        self.alloc(1)
    }

    /// `new_listen()`: allocate a fresh listener PCB in the pre-listen `ListenClosed` state.
    pub fn new_listen_pcb(&mut self) -> Option<PcbId> {
        let id = self.alloc(1)?;
        self.slab.get_mut(id).unwrap().state = TcpState::ListenClosed;
        Some(id)
    }

    fn bind_collision(&self, skip_tw: bool, reuseaddr: bool, port: u16, addr: Option<IpAddr>) -> bool {
        let kinds: &[ListKind] = if skip_tw {
            &[ListKind::Listen, ListKind::Bound, ListKind::Active]
        } else {
            &[ListKind::Listen, ListKind::Bound, ListKind::Active, ListKind::Tw]
        };
        kinds.iter().any(|&kind| {
            self.lists.ids(&self.slab, kind).into_iter().any(|other| {
                let pcb = match self.slab.get(other) {
                    Some(p) => p,
                    None => return false,
                };
                if pcb.local_port != port {
                    return false;
                }
                let both_reuse = reuseaddr && pcb.flags.contains(PcbFlags::REUSEADDR);
                if both_reuse {
                    return false;
                }
                let wildcard_either = addr.is_none() || pcb.local_addr.is_none();
                wildcard_either || pcb.local_addr == addr
            })
        })
    }

    /// `bind(pcb, ipaddr, port)` (§4.5).
    pub fn bind(&mut self, id: PcbId, addr: Option<IpAddr>, mut port: u16) -> TcpResult<()> {
        let (state, reuseaddr) = {
            let pcb = self.slab.get(id).ok_or(TcpError::Val)?;
            (pcb.state, pcb.flags.contains(PcbFlags::REUSEADDR))
        };
        if !matches!(state, TcpState::Closed | TcpState::ListenClosed) {
            return Err(TcpError::Conn);
        }

        if port == 0 {
            port = self.ports.new_port(&self.slab, &self.lists).ok_or(TcpError::Buf)?;
        }

        if self.bind_collision(reuseaddr, reuseaddr, port, addr) {
            log::warn!("{:?}: bind collision on port {}", id, port);
            return Err(TcpError::Use);
        }

        {
            let pcb = self.slab.get_mut(id).unwrap();
            if addr.is_some() {
                pcb.local_addr = addr;
            }
            pcb.local_port = port;
        }
        reg(&mut self.slab, &mut self.lists, &mut self.iter, ListKind::Bound, id);
        self.collab.timer_needed();
        Ok(())
    }

    /// `listen_with_backlog(lpcb, backlog)` (§4.5).
    pub fn listen_with_backlog(&mut self, id: PcbId, backlog: u8) -> TcpResult<()> {
        self.listen_with_backlog_inner(id, backlog, false)
    }

    /// Dual-stack variant (§4.5/§9): additionally marks the listener as accepting either
    /// address family once it is confirmed wildcard-bound. Resolves the spec's first Open
    /// Question by returning `TcpError::Use` (never a sentinel) on the port-in-use path,
    /// exactly like the single-stack variant — see DESIGN.md.
    pub fn listen_with_backlog_dual(&mut self, id: PcbId, backlog: u8) -> TcpResult<()> {
        self.listen_with_backlog_inner(id, backlog, true)
    }

    fn listen_with_backlog_inner(&mut self, id: PcbId, backlog: u8, dual: bool) -> TcpResult<()> {
        let (state, reuseaddr, port, addr) = {
            let pcb = self.slab.get(id).ok_or(TcpError::Val)?;
            (pcb.state, pcb.flags.contains(PcbFlags::REUSEADDR), pcb.local_port, pcb.local_addr)
        };
        if state != TcpState::ListenClosed {
            return Err(TcpError::Conn);
        }

        if reuseaddr {
            let collides = self.lists.ids(&self.slab, ListKind::Listen).into_iter().any(|other| {
                self.slab.get(other).map_or(false, |p| p.local_port == port && p.local_addr == addr)
            });
            if collides {
                log::warn!("{:?}: listen bind collision on port {}", id, port);
                return Err(TcpError::Use);
            }
        }

        if port != 0 && matches!(self.slab.get(id).unwrap().membership, Some(ListKind::Bound)) {
            rmv(&mut self.slab, &mut self.lists, &mut self.iter, ListKind::Bound, id);
        }

        let wnd_max = self.config.wnd_max();
        {
            let pcb = self.slab.get_mut(id).unwrap();
            pcb.state = TcpState::Listen;
            pcb.accepts_pending = 0;
            pcb.rcv_wnd = pcb.rcv_wnd.min(wnd_max);
            pcb.backlog = backlog.max(1);
            if dual && pcb.local_addr.is_none() {
                pcb.flags.insert(PcbFlags::DUAL_STACK);
            }
        }
        reg(&mut self.slab, &mut self.lists, &mut self.iter, ListKind::Listen, id);
        self.collab.timer_needed();
        log::debug!("{:?}: {:?} -> Listen", id, state);
        Ok(())
    }

    /// `connect(pcb, ipaddr, port, cb)` (§4.5).
    pub fn connect(
        &mut self,
        id: PcbId,
        remote_addr: IpAddr,
        remote_port: u16,
        connected_cb: Option<ConnectedCallback>,
    ) -> TcpResult<()> {
        {
            let pcb = self.slab.get(id).ok_or(TcpError::Val)?;
            if pcb.state != TcpState::Closed {
                return Err(TcpError::Conn);
            }
        }

        let local_addr = {
            let pcb = self.slab.get_mut(id).unwrap();
            pcb.remote_addr = Some(remote_addr);
            pcb.remote_port = remote_port;
            pcb.local_addr
        };
        let local_addr = match local_addr {
            Some(a) => a,
            None => {
                let a = self.collab.local_ip_for(remote_addr).ok_or(TcpError::Rte)?;
                self.slab.get_mut(id).unwrap().local_addr = Some(a);
                a
            }
        };
        let _ = local_addr;

        let (was_bound, reuseaddr) = {
            let pcb = self.slab.get(id).unwrap();
            (pcb.membership == Some(ListKind::Bound), pcb.flags.contains(PcbFlags::REUSEADDR))
        };

        if self.slab.get(id).unwrap().local_port == 0 {
            let port = self.ports.new_port(&self.slab, &self.lists).ok_or(TcpError::Buf)?;
            self.slab.get_mut(id).unwrap().local_port = port;
        } else if reuseaddr {
            let dup = [ListKind::Active, ListKind::Tw].iter().any(|&kind| {
                self.lists.ids(&self.slab, kind).into_iter().any(|other| {
                    other != id
                        && self.slab.get(other).map_or(false, |p| {
                            p.local_port == self.slab.get(id).unwrap().local_port
                                && p.local_addr == self.slab.get(id).unwrap().local_addr
                                && p.remote_addr == Some(remote_addr)
                                && p.remote_port == remote_port
                        })
                })
            });
            if dup {
                return Err(TcpError::Use);
            }
        }

        let ticks = self.tcp_ticks;
        let iss = self.iss.next_iss(ticks);
        let mss = self.collab.route_mtu(remote_addr).unwrap_or(self.config.mss);
        {
            let pcb = self.slab.get_mut(id).unwrap();
            pcb.snd_nxt = iss;
            pcb.snd_wl2 = iss;
            pcb.lastack = iss;
            pcb.snd_lbb = iss;
            pcb.cwnd = 1;
            pcb.ssthresh = self.config.wnd;
            pcb.snd_wnd = self.config.wnd;
            pcb.mss = mss;
            pcb.connected_cb = connected_cb;
        }

        let result = {
            let (slab, collab) = (&self.slab, &mut self.collab);
            collab.enqueue_flags(slab.get(id).unwrap(), SegFlags::SYN)
        };
        result?;

        // Zero-length placeholder so the retransmission timer has something to act on; no
        // actual payload bytes are queued for a bare SYN.
        {
            let pcb = self.slab.get_mut(id).unwrap();
            pcb.sndq.push_back(crate::pcb::Segment { seq: iss, len: 0, flags: SegFlags::SYN });
            if pcb.rtime < 0 {
                pcb.rtime = 0;
            }
        }

        if was_bound {
            rmv(&mut self.slab, &mut self.lists, &mut self.iter, ListKind::Bound, id);
        }
        self.slab.get_mut(id).unwrap().state = TcpState::SynSent;
        reg(&mut self.slab, &mut self.lists, &mut self.iter, ListKind::Active, id);
        self.collab.timer_needed();
        log::debug!("{:?}: Closed -> SynSent", id);
        let _ = {
            let (slab, collab) = (&self.slab, &mut self.collab);
            collab.output(slab.get(id).unwrap())
        };
        Ok(())
    }

    /// `close(pcb)` (§4.5). Always reclaims the PCB's user reference one way or another; the
    /// spec's "fall back to `pcb_free`" path means `close` itself cannot fail from the
    /// caller's perspective.
    pub fn close(&mut self, id: PcbId) {
        if let Some(pcb) = self.slab.get_mut(id) {
            pcb.flags.insert(PcbFlags::NOUSER);
        } else {
            return;
        }
        if self.close_shutdown(id, true).is_err() {
            self.pcb_free(id, true);
        }
    }

    /// `shut_tx(pcb)` (§4.5).
    pub fn shut_tx(&mut self, id: PcbId) -> TcpResult<()> {
        let state = self.slab.get(id).ok_or(TcpError::Val)?.state;
        if !matches!(state, TcpState::SynRcvd | TcpState::Established | TcpState::CloseWait) {
            return Err(TcpError::Conn);
        }
        self.close_shutdown(id, false)
    }

    /// `close_shutdown(pcb, rst_on_unacked)` (§4.5).
    pub fn close_shutdown(&mut self, id: PcbId, rst_on_unacked: bool) -> TcpResult<()> {
        let state = match self.slab.get(id) {
            Some(p) => p.state,
            None => return Ok(()),
        };

        if rst_on_unacked && matches!(state, TcpState::Established | TcpState::CloseWait) {
            let (rcv_wnd, wnd_max) = {
                let pcb = self.slab.get(id).unwrap();
                (pcb.rcv_wnd, self.config.wnd_max())
            };
            if rcv_wnd < wnd_max {
                self.send_rst_for(id);
                if state == TcpState::Established {
                    self.move_to_time_wait(id);
                } else {
                    self.pcb_free(id, false);
                }
                return Ok(());
            }
        }

        let outcome: TcpResult<()> = match state {
            TcpState::Closed | TcpState::SynSent => {
                self.pcb_free(id, false);
                Ok(())
            }
            TcpState::SynRcvd | TcpState::Established => {
                let r = {
                    let (slab, collab) = (&self.slab, &mut self.collab);
                    collab.send_fin(slab.get(id).unwrap())
                };
                match r {
                    Ok(()) => {
                        if state == TcpState::SynRcvd {
                            self.backlog_accepted(id);
                        }
                        let snd_nxt = self.slab.get(id).unwrap().snd_nxt;
                        let pcb = self.slab.get_mut(id).unwrap();
                        pcb.state = TcpState::FinWait1;
                        pcb.sndq.push_back(crate::pcb::Segment { seq: snd_nxt, len: 0, flags: SegFlags::FIN });
                        if pcb.rtime < 0 {
                            pcb.rtime = 0;
                        }
                        log::debug!("{:?}: {:?} -> FinWait1", id, state);
                        Ok(())
                    }
                    Err(e) => Err(e),
                }
            }
            TcpState::CloseWait => {
                let r = {
                    let (slab, collab) = (&self.slab, &mut self.collab);
                    collab.send_fin(slab.get(id).unwrap())
                };
                match r {
                    Ok(()) => {
                        let snd_nxt = self.slab.get(id).unwrap().snd_nxt;
                        let pcb = self.slab.get_mut(id).unwrap();
                        pcb.state = TcpState::LastAck;
                        pcb.sndq.push_back(crate::pcb::Segment { seq: snd_nxt, len: 0, flags: SegFlags::FIN });
                        if pcb.rtime < 0 {
                            pcb.rtime = 0;
                        }
                        log::debug!("{:?}: CloseWait -> LastAck", id);
                        Ok(())
                    }
                    Err(e) => Err(e),
                }
            }
            _ => Ok(()),
        };

        if outcome.is_ok() && self.slab.contains(id) {
            let _ = {
                let (slab, collab) = (&self.slab, &mut self.collab);
                collab.output(slab.get(id).unwrap())
            };
        }
        outcome
    }

    /// `abort(pcb)` (§4.5).
    pub fn abort(&mut self, id: PcbId) {
        self.pcb_free(id, true);
    }

    /// `close_listen(lpcb)` (§4.5).
    pub fn close_listen(&mut self, id: PcbId) {
        let state = match self.slab.get(id) {
            Some(p) => p.state,
            None => return,
        };
        if state == TcpState::Listen {
            for kind in [ListKind::Active, ListKind::Tw] {
                for other in self.lists.ids(&self.slab, kind) {
                    if self.slab.get(other).and_then(|p| p.listener) == Some(id) {
                        self.slab.get_mut(other).unwrap().listener = None;
                    }
                }
            }
            rmv(&mut self.slab, &mut self.lists, &mut self.iter, ListKind::Listen, id);
        } else if self.slab.get(id).unwrap().local_port != 0
            && self.slab.get(id).unwrap().membership == Some(ListKind::Bound)
        {
            rmv(&mut self.slab, &mut self.lists, &mut self.iter, ListKind::Bound, id);
        }
        self.slab.remove(id);
    }

    fn send_rst_for(&mut self, id: PcbId) {
        let pcb = match self.slab.get(id) {
            Some(p) => p,
            None => return,
        };
        let local = (pcb.local_addr.unwrap_or_else(|| "0.0.0.0".parse().unwrap()), pcb.local_port);
        let remote = (pcb.remote_addr.unwrap_or_else(|| "0.0.0.0".parse().unwrap()), pcb.remote_port);
        let (snd, rcv) = (pcb.snd_nxt, pcb.rcv_nxt);
        self.collab.rst(snd, rcv, local, remote);
    }

    fn flush_delayed_ack(&mut self, id: PcbId) {
        let delayed = self.slab.get(id).map_or(false, |p| p.flags.contains(PcbFlags::ACK_DELAY));
        if delayed {
            let _ = {
                let (slab, collab) = (&self.slab, &mut self.collab);
                collab.output(slab.get(id).unwrap())
            };
            if let Some(p) = self.slab.get_mut(id) {
                p.flags.remove(PcbFlags::ACK_DELAY | PcbFlags::ACK_NOW);
            }
        }
    }

    /// `pcb_free(pcb, send_rst, prev_opt)` (§4.5). `prev_opt` is implicit here: `rmv` always
    /// scans from the list head, since the safe iterator (not a caller-supplied hint) is what
    /// keeps that scan cheap across a timer pass — see `store::rmv`.
    pub fn pcb_free(&mut self, id: PcbId, send_rst: bool) {
        if self.last_input_pcb == Some(id) {
            self.last_input_pcb = None;
        }
        let state = match self.slab.get(id) {
            Some(p) => p.state,
            None => return,
        };
        match state {
            TcpState::Closed => {
                if self.slab.get(id).unwrap().local_port != 0
                    && self.slab.get(id).unwrap().membership == Some(ListKind::Bound)
                {
                    rmv(&mut self.slab, &mut self.lists, &mut self.iter, ListKind::Bound, id);
                }
            }
            s if s.is_active() => {
                self.flush_delayed_ack(id);
                if send_rst {
                    self.send_rst_for(id);
                }
                rmv(&mut self.slab, &mut self.lists, &mut self.iter, ListKind::Active, id);
                self.pcb_purge(id);
            }
            TcpState::TimeWait => {
                rmv(&mut self.slab, &mut self.lists, &mut self.iter, ListKind::Tw, id);
            }
            _ => {}
        }
        self.slab.remove(id);
    }

    /// `pcb_purge(pcb)` (§4.5).
    pub fn pcb_purge(&mut self, id: PcbId) {
        self.backlog_accepted(id);
        if let Some(pcb) = self.slab.get_mut(id) {
            pcb.sndq.clear();
            pcb.snd_queuelen = 0;
            pcb.rtime = -1;
        }
    }

    /// `move_to_time_wait(pcb)` (§4.5).
    pub fn move_to_time_wait(&mut self, id: PcbId) {
        rmv(&mut self.slab, &mut self.lists, &mut self.iter, ListKind::Active, id);
        self.pcb_purge(id);
        let ticks = self.tcp_ticks;
        {
            let pcb = self.slab.get_mut(id).unwrap();
            pcb.state = TcpState::TimeWait;
            pcb.tmr = ticks;
        }
        reg(&mut self.slab, &mut self.lists, &mut self.iter, ListKind::Tw, id);
        log::debug!("{:?}: -> TimeWait", id);
    }

    /// `report_err(pcb, err)` (§4.5). At most one error is ever reported: the callback is
    /// taken out of the PCB, so a second call finds nothing to invoke.
    pub fn report_err(&mut self, id: PcbId, err: TcpError) {
        let cb = match self.slab.get_mut(id) {
            Some(pcb) if pcb.has_user_ref() => {
                pcb.flags.insert(PcbFlags::NOUSER);
                pcb.err_cb.take()
            }
            _ => return,
        };
        if let Some(mut cb) = cb {
            cb(id, err);
        }
    }

    /// `backlog_delayed(pcb)` (§4.5).
    pub fn backlog_delayed(&mut self, id: PcbId) {
        let listener = match self.slab.get(id).and_then(|p| p.listener) {
            Some(l) => l,
            None => return,
        };
        let already = self.slab.get(id).map_or(true, |p| p.flags.contains(PcbFlags::BACKLOGPEND));
        if already {
            return;
        }
        self.slab.get_mut(id).unwrap().flags.insert(PcbFlags::BACKLOGPEND);
        if let Some(l) = self.slab.get_mut(listener) {
            l.accepts_pending = l.accepts_pending.saturating_add(1);
        }
    }

    /// `backlog_accepted(pcb)` (§4.5).
    pub fn backlog_accepted(&mut self, id: PcbId) {
        let listener = match self.slab.get(id).and_then(|p| p.listener) {
            Some(l) => l,
            None => return,
        };
        let pending = self.slab.get(id).map_or(false, |p| p.flags.contains(PcbFlags::BACKLOGPEND));
        if !pending {
            return;
        }
        self.slab.get_mut(id).unwrap().flags.remove(PcbFlags::BACKLOGPEND);
        if let Some(l) = self.slab.get_mut(listener) {
            l.accepts_pending = l.accepts_pending.saturating_sub(1);
        }
    }

    /// Passive-open helper: insert a freshly accepted PCB directly on the active list in
    /// `SynRcvd`, per §3's "Passive accept ... inserts a new PCB directly on active in
    /// SYN_RCVD." Not named as a standalone entry point in §6 because the segment-input path
    /// that drives it is out of scope (§1); exposed here so a collaborator-side input handler
    /// can call it.
    pub fn accept_passive(&mut self, mut pcb: Pcb, listener: PcbId) -> PcbId {
        pcb.state = TcpState::SynRcvd;
        pcb.listener = Some(listener);
        let id = self.slab.insert(pcb);
        reg(&mut self.slab, &mut self.lists, &mut self.iter, ListKind::Active, id);
        self.backlog_delayed(id);
        self.collab.timer_needed();
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::{RouteLookup, SegmentOutput, TimerCollaborator};

    #[derive(Default)]
    struct Fake {
        routes: Option<IpAddr>,
    }
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
            self.routes
        }
        fn route_mtu(&self, _remote: IpAddr) -> Option<u16> {
            None
        }
    }
    impl TimerCollaborator for Fake {
        fn timer_needed(&mut self) {}
    }

    fn ctx() -> TcpContext<Fake> {
        TcpContext::new(crate::config::TcpConfig::default(), Fake { routes: Some("10.0.0.1".parse().unwrap()) })
    }

    #[test]
    fn bind_listen_close_leaves_no_pcb() {
        let mut ctx = ctx();
        let id = ctx.new_listen_pcb().unwrap();
        assert_eq!(ctx.bind(id, None, 8080), Ok(()));
        assert_eq!(ctx.listen_with_backlog(id, 4), Ok(()));
        ctx.close_listen(id);
        assert!(!ctx.slab.contains(id));
        assert!(ctx.pcbs_sane());
    }

    #[test]
    fn second_bind_without_reuseaddr_is_refused() {
        let mut ctx = ctx();
        let a = ctx.new_pcb().unwrap();
        let b = ctx.new_pcb().unwrap();
        assert_eq!(ctx.bind(a, None, 9000), Ok(()));
        assert_eq!(ctx.bind(b, None, 9000), Err(TcpError::Use));
    }

    #[test]
    fn connect_without_route_fails_rte_and_pcb_stays_closed() {
        let mut ctx = ctx();
        ctx.collab.routes = None;
        let id = ctx.new_pcb().unwrap();
        let remote: IpAddr = "10.0.0.1".parse().unwrap();
        let res = ctx.connect(id, remote, 80, None);
        assert_eq!(res, Err(TcpError::Rte));
        assert_eq!(ctx.slab.get(id).unwrap().state, TcpState::Closed);
        assert_eq!(ctx.slab.get(id).unwrap().membership, None);
    }
}
