//! Collaborator contracts: the out-of-scope concerns of SPEC_FULL.md §1/§4.10/§6, modeled as
//! traits the embedding stack implements. The core never constructs, parses, checksums, or
//! transmits a segment itself — it only calls through these.

use std::net::IpAddr;

use crate::error::TcpResult;
use crate::pcb::{Pcb, SegFlags};

/// Segment transmission, mirroring `tcp_output`/`tcp_rst`/`tcp_send_fin`/`tcp_enqueue_flags`/
/// `tcp_zero_window_probe`/`tcp_rexmit_rto`/`tcp_keepalive`.
pub trait SegmentOutput {
    fn output(&mut self, pcb: &Pcb) -> TcpResult<()>;
    fn rst(&mut self, snd: u32, rcv: u32, local: (IpAddr, u16), remote: (IpAddr, u16));
    fn send_fin(&mut self, pcb: &Pcb) -> TcpResult<()>;
    fn enqueue_flags(&mut self, pcb: &Pcb, flags: SegFlags) -> TcpResult<()>;
    fn zero_window_probe(&mut self, pcb: &Pcb) -> TcpResult<()>;
    fn rexmit_rto(&mut self, pcb: &Pcb);
    fn keepalive(&mut self, pcb: &Pcb) -> TcpResult<()>;
}

/// IP routing, mirroring `ip_route_get_local_ip`/`ip_route`/`nd6_get_destination_mtu`.
pub trait RouteLookup {
    fn local_ip_for(&self, remote: IpAddr) -> Option<IpAddr>;
    fn route_mtu(&self, remote: IpAddr) -> Option<u16>;
}

/// Mirrors `tcp_timer_needed()`: called on every list insertion so a suspended periodic tick
/// knows to resume (§4.1).
pub trait TimerCollaborator {
    fn timer_needed(&mut self);
}

/// Bundles the three collaborator roles the core depends on. Implemented once by the
/// embedding stack (often on a single type that owns a socket and a routing table), mirroring
/// how `shadow`'s sans-I/O `tcp` crate threads a single `Dependencies`-like parameter through
/// its state machine instead of three separate generic bounds.
pub trait Collaborators: SegmentOutput + RouteLookup + TimerCollaborator {}
impl<T: SegmentOutput + RouteLookup + TimerCollaborator> Collaborators for T {}
