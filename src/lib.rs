//! A sans-I/O TCP connection lifecycle and timer engine, modeled on RFC 793/1122's protocol
//! control block and its associated state machine.
//!
//! The core owns every PCB and the four lists that partition them (listen, bound, active,
//! time-wait), the allocator that recycles PCBs under pressure, and the periodic timer engine
//! that drives retransmission, persist probing, and the various teardown timeouts. It never
//! constructs, parses, or transmits a segment itself: those concerns are modeled as the
//! [`collab`] traits the embedding stack implements, grounded on how the teacher's `Tun`
//! parameter threads through `on_tick`/`on_segment` (`src/tcp/tcb.rs`) without this crate
//! pulling in any actual device-I/O or checksum dependency.

mod alloc;
mod collab;
mod config;
mod context;
mod error;
mod iss;
mod iterator;
mod lifecycle;
mod netif;
mod pcb;
mod portalloc;
mod store;
mod timer;
mod window;

pub use collab::{Collaborators, RouteLookup, SegmentOutput, TimerCollaborator};
pub use config::{TcpConfig, TCP_BACKOFF, TCP_PERSIST_BACKOFF, TCP_PRIO_MAX};
pub use context::TcpContext;
pub use error::{TcpError, TcpResult};
pub use pcb::{
    ConnectedCallback, ErrCallback, ListKind, Pcb, PcbFlags, PcbId, RecvCallback, SegFlags,
    Segment, SentCallback, TcpState,
};
