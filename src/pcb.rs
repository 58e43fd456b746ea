//! The Protocol Control Block and the state enum that drives it (SPEC_FULL.md §3).

use std::collections::VecDeque;
use std::net::IpAddr;

use bitflags::bitflags;

use crate::error::TcpError;

slotmap::new_key_type! {
    /// Stable identifier of a PCB inside a [`crate::store::PcbSlab`]. PCBs are addressed by this
    /// id everywhere — intrusive `next` links, listener back-references, the iterator cursor —
    /// rather than by pointer, so that clearing a stale reference is a checked `Option` lookup
    /// instead of unsafe pointer arithmetic (Design Notes, "store by identifier"). Backed by
    /// `slotmap`'s generational key (the same "store entries by stable key" concern the corpus
    /// already solves, e.g. `shadow-shadow`'s `ChildTcpKey`), so a stale `PcbId` from a freed
    /// slot can never alias a later PCB that reuses the slot.
    pub struct PcbId;
}

/// Which of the four intrusive lists currently owns a PCB, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListKind {
    Listen,
    Bound,
    Active,
    Tw,
}

/// RFC 793/1122 connection state. Initial state is `Closed`; the only terminal state a live
/// PCB transitions through on the way out is also `Closed` (by way of `pcb_free`, which drops
/// the slot rather than leaving a PCB sitting in `Closed`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TcpState {
    Closed,
    ListenClosed,
    Listen,
    SynSent,
    SynRcvd,
    Established,
    FinWait1,
    FinWait2,
    CloseWait,
    Closing,
    LastAck,
    TimeWait,
}

impl TcpState {
    /// §3 axiom (iv): a PCB's state is "active" iff it belongs on the active list.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            TcpState::SynSent
                | TcpState::SynRcvd
                | TcpState::Established
                | TcpState::FinWait1
                | TcpState::FinWait2
                | TcpState::CloseWait
                | TcpState::Closing
                | TcpState::LastAck
        )
    }
}

bitflags! {
    /// `TF_*`/`SOF_*` control flags (SPEC_FULL.md §3).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PcbFlags: u16 {
        const ACK_DELAY   = 0b0000_0001;
        const ACK_NOW     = 0b0000_0010;
        const NAGLEMEMERR = 0b0000_0100;
        const NOUSER      = 0b0000_1000;
        const BACKLOGPEND = 0b0001_0000;
        const REUSEADDR   = 0b0010_0000;
        const KEEPALIVE   = 0b0100_0000;
        /// Dual-stack listener accepts either address family (Design Notes).
        const DUAL_STACK  = 0b1000_0000;
    }
}

/// One queued outgoing segment. Byte length only — the spec places pbuf chaining and segment
/// (de)serialization out of scope (§4.10); `snd_queuelen` is a running byte counter maintained
/// alongside this queue, not derived by walking a pbuf chain.
#[derive(Debug, Clone)]
pub struct Segment {
    pub seq: u32,
    pub len: u32,
    pub flags: SegFlags,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SegFlags: u8 {
        const SYN = 0b001;
        const FIN = 0b010;
        const ACK = 0b100;
    }
}

pub type RecvCallback = Box<dyn FnMut(PcbId, &[u8]) -> Result<(), TcpError>>;
pub type SentCallback = Box<dyn FnMut(PcbId, u16)>;
pub type ErrCallback = Box<dyn FnMut(PcbId, TcpError)>;
pub type ConnectedCallback = Box<dyn FnMut(PcbId, Result<(), TcpError>)>;

/// The connection control block. Listener PCBs (state `ListenClosed`/`Listen`) use the same
/// struct with the connection-only fields left at their zeroed defaults and the
/// listener-only fields (`backlog`, `accepts_pending`, `dual_stack`) populated instead —
/// mirroring how lwIP's `tcp_pcb_listen` extends the common `tcp_pcb` header rather than
/// introducing a wholly disjoint type.
pub struct Pcb {
    pub state: TcpState,

    pub local_addr: Option<IpAddr>,
    pub local_port: u16,
    pub remote_addr: Option<IpAddr>,
    pub remote_port: u16,

    // Sequence variables.
    pub snd_nxt: u32,
    pub snd_wl2: u32,
    pub lastack: u32,
    pub snd_lbb: u32,
    pub rcv_nxt: u32,
    pub rcv_ann_right_edge: u32,

    // Window variables.
    pub snd_wnd: u32,
    pub rcv_wnd: u32,
    pub rcv_ann_wnd: u32,
    pub cwnd: u32,
    pub ssthresh: u32,
    pub snd_buf: u32,
    pub snd_queuelen: usize,

    // RTT/RTO state, in units of slow-timer ticks (matching the spec's `rto`/`rtime`).
    pub sa: i32,
    pub sv: i32,
    pub rto: i32,
    pub rtime: i32,
    pub nrtx: u8,

    // Persist (zero-window-probe) state.
    pub persist_backoff: u8,
    pub persist_cnt: u8,

    // Keepalive state.
    pub keep_idle_ticks: u32,
    pub keep_intvl_ticks: u32,
    pub keep_cnt: u8,
    pub keep_cnt_sent: u8,

    pub tmr: u32,
    pub last_timer: u8,

    pub sndq: VecDeque<Segment>,

    pub flags: PcbFlags,
    pub mss: u16,
    pub prio: u8,
    pub ttl: u8,

    pub listener: Option<PcbId>,

    // Listener-only fields.
    pub backlog: u8,
    pub accepts_pending: u8,

    pub recv_cb: Option<RecvCallback>,
    pub sent_cb: Option<SentCallback>,
    pub err_cb: Option<ErrCallback>,
    pub connected_cb: Option<ConnectedCallback>,

    // Intrusive-list linkage.
    pub(crate) next: Option<PcbId>,
    pub(crate) membership: Option<ListKind>,
}

impl Pcb {
    /// A zero-initialized PCB with the allocator's defaults applied (§4.4): state `Closed`,
    /// retransmission timer off (`rtime = -1`), `cwnd = 1`, MSS clamped to 536 absent route
    /// information, and the window opened to the configured `TCP_WND`.
    pub fn new_default(iss: u32, mss: u16, wnd: u32, now_ticks: u32, timer_ctr: u8) -> Self {
        Pcb {
            state: TcpState::Closed,
            local_addr: None,
            local_port: 0,
            remote_addr: None,
            remote_port: 0,
            snd_nxt: iss,
            snd_wl2: iss,
            lastack: iss,
            snd_lbb: iss,
            rcv_nxt: 0,
            rcv_ann_right_edge: 0,
            snd_wnd: 0,
            rcv_wnd: wnd,
            rcv_ann_wnd: wnd,
            cwnd: 1,
            ssthresh: wnd,
            snd_buf: 0,
            snd_queuelen: 0,
            sa: 0,
            sv: 3_000,
            rto: 3_000 / 500,
            rtime: -1,
            nrtx: 0,
            persist_backoff: 0,
            persist_cnt: 0,
            keep_idle_ticks: 0,
            keep_intvl_ticks: 0,
            keep_cnt: 0,
            keep_cnt_sent: 0,
            tmr: now_ticks,
            last_timer: timer_ctr,
            sndq: VecDeque::new(),
            flags: PcbFlags::empty(),
            mss,
            prio: 1,
            ttl: 64,
            listener: None,
            backlog: 0,
            accepts_pending: 0,
            recv_cb: None,
            sent_cb: None,
            err_cb: None,
            connected_cb: None,
            next: None,
            membership: None,
        }
    }

    pub fn has_user_ref(&self) -> bool {
        !self.flags.contains(PcbFlags::NOUSER)
    }
}

impl std::fmt::Debug for Pcb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pcb")
            .field("state", &self.state)
            .field("local", &(self.local_addr, self.local_port))
            .field("remote", &(self.remote_addr, self.remote_port))
            .field("flags", &self.flags)
            .field("membership", &self.membership)
            .finish()
    }
}
