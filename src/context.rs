//! The single "TCP context" object the Design Notes call for: every list head, timer counter,
//! iterator cursor, and port/ISS generator lives here, and every operation in §4 is a method
//! on it. Grounded on the teacher's `Manager` (`src/lib.rs`), which plays the same "one struct
//! holding all shared mutable state" role for its HashMap-partitioned connection tables.
//!
//! Methods are split across `alloc.rs`, `lifecycle.rs`, `timer.rs`, `window.rs`, and
//! `netif.rs` by concern, each contributing an `impl<C: Collaborators> TcpContext<C>` block —
//! the same "one type, many files" split the corpus uses for large stateful types (e.g.
//! `shadow`'s `Connection` methods spread across `lib.rs`/`connection.rs`).

use crate::collab::Collaborators;
use crate::config::TcpConfig;
use crate::iss::IssGenerator;
use crate::iterator::SafeIterator;
use crate::pcb::{Pcb, PcbFlags, PcbId, TcpState};
use crate::portalloc::PortAllocator;
use crate::store::{PcbLists, PcbSlab};

pub struct TcpContext<C: Collaborators> {
    pub(crate) slab: PcbSlab,
    pub(crate) lists: PcbLists,
    pub(crate) iter: SafeIterator,
    pub(crate) config: TcpConfig,
    pub(crate) iss: IssGenerator,
    pub(crate) ports: PortAllocator,

    /// `tcp_ticks`: incremented once per slow tick (§4.6).
    pub(crate) tcp_ticks: u32,
    /// `tcp_timer_ctr`: incremented at the start of every fast-or-slow run (§4.6).
    pub(crate) timer_ctr: u8,
    /// Toggles every `tmr()` call; `slowtmr` runs on every second toggle (§4.6).
    pub(crate) slow_due: bool,
    /// Mirrors the "last input PCB" pointer cleared by `pcb_free` (§4.5).
    pub(crate) last_input_pcb: Option<PcbId>,

    pub collab: C,
}

impl<C: Collaborators> TcpContext<C> {
    pub fn new(config: TcpConfig, collab: C) -> Self {
        TcpContext {
            slab: PcbSlab::new(),
            lists: PcbLists::default(),
            iter: SafeIterator::new(),
            config,
            iss: IssGenerator::new(),
            ports: PortAllocator::new(),
            tcp_ticks: 0,
            timer_ctr: 0,
            slow_due: false,
            last_input_pcb: None,
            collab,
        }
    }

    pub fn config(&self) -> &TcpConfig {
        &self.config
    }

    pub fn tcp_ticks(&self) -> u32 {
        self.tcp_ticks
    }

    /// Whether `id` still names a live PCB (any list, or off-list but allocated).
    pub fn is_live(&self, id: PcbId) -> bool {
        self.slab.contains(id)
    }

    pub fn state_of(&self, id: PcbId) -> Option<TcpState> {
        self.slab.get(id).map(|p| p.state)
    }

    pub fn flags_of(&self, id: PcbId) -> Option<PcbFlags> {
        self.slab.get(id).map(|p| p.flags)
    }

    pub fn local_port_of(&self, id: PcbId) -> Option<u16> {
        self.slab.get(id).map(|p| p.local_port)
    }

    pub fn nrtx_of(&self, id: PcbId) -> Option<u8> {
        self.slab.get(id).map(|p| p.nrtx)
    }

    pub fn pcb(&self, id: PcbId) -> Option<&Pcb> {
        self.slab.get(id)
    }

    /// The handle `arg`/`recv`/`sent`/`err`/`accept`/`setprio` are expressed through: those six
    /// operations are all plain writes to a field already carried on [`Pcb`] (the callback slots
    /// and `prio`), per the Rust representation note on callback storage, so there is no
    /// dedicated setter per field — just `ctx.pcb_mut(id).unwrap().recv_cb = Some(...)` and so
    /// on. List linkage (`next`/`membership`) stays `pub(crate)` and is unreachable through this
    /// handle, so callers cannot violate the §3 axioms by hand.
    pub fn pcb_mut(&mut self, id: PcbId) -> Option<&mut Pcb> {
        self.slab.get_mut(id)
    }

    /// `pcbs_sane()` (§8): every axiom of §3 checked against the live store. Intended for
    /// tests, not hot-path use.
    pub fn pcbs_sane(&self) -> bool {
        use crate::pcb::{ListKind, TcpState};

        let listen_ok = self
            .lists
            .ids(&self.slab, ListKind::Listen)
            .iter()
            .all(|&id| self.slab.get(id).map(|p| p.state == TcpState::Listen).unwrap_or(false));

        let tw_ok = self
            .lists
            .ids(&self.slab, ListKind::Tw)
            .iter()
            .all(|&id| self.slab.get(id).map(|p| p.state == TcpState::TimeWait).unwrap_or(false));

        let active_ok = self
            .lists
            .ids(&self.slab, ListKind::Active)
            .iter()
            .all(|&id| self.slab.get(id).map(|p| p.state.is_active()).unwrap_or(false));

        let mut seen = std::collections::HashSet::new();
        let no_dupes = PcbLists::ALL.iter().all(|&kind| {
            self.lists.ids(&self.slab, kind).into_iter().all(|id| seen.insert(id))
        });

        let backlog_ok = self.lists.ids(&self.slab, ListKind::Listen).iter().all(|&listener| {
            let expected = self
                .lists
                .ids(&self.slab, ListKind::Active)
                .into_iter()
                .filter(|&id| {
                    self.slab.get(id).map_or(false, |p| {
                        p.listener == Some(listener)
                            && p.flags.contains(crate::pcb::PcbFlags::BACKLOGPEND)
                    })
                })
                .count() as u8;
            self.slab.get(listener).map_or(true, |l| l.accepts_pending == expected)
        });

        listen_ok && tw_ok && active_ok && no_dupes && backlog_ok
    }
}
