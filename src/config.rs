//! Tunable constants (SPEC_FULL.md §6/§10).
//!
//! Plain struct with a literal `Default`, the way the teacher threads `r1`/`r2`/`r1_syn`/
//! `r2_syn` as individually-defaulted fields rather than pulling in a config-file crate —
//! consolidated here into one struct per the Design Notes' "single TCP context" guidance.
//! Every field is `pub` so an embedder's own config layer can populate it directly.

use std::time::Duration;

/// Backoff table indexed by `nrtx`, in units of `TCP_SLOW_INTERVAL` ticks.
pub const TCP_BACKOFF: [u8; 13] = [1, 2, 3, 4, 5, 6, 7, 7, 7, 7, 7, 7, 7];

/// Persist-probe backoff table indexed by `persist_backoff - 1`, same tick units.
pub const TCP_PERSIST_BACKOFF: [u8; 7] = [3, 6, 12, 24, 48, 96, 120];

pub const EPHEMERAL_PORT_LO: u16 = 0xC000;
pub const EPHEMERAL_PORT_HI: u16 = 0xFFFF;

/// Ceiling a priority-kill reclamation may not exceed (§4.4).
pub const TCP_PRIO_MAX: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpConfig {
    pub wnd: u32,
    pub mss: u16,
    pub snd_buf: u32,
    pub synmaxrtx: u8,
    pub maxrtx: u8,
    pub msl: Duration,
    pub fin_wait_timeout: Duration,
    pub syn_rcvd_timeout: Duration,
    pub slow_interval: Duration,
    pub fast_interval: Duration,
    pub wnd_update_threshold: u32,
    pub keepidle_default: Duration,
    pub keepintvl_default: Duration,
    pub keepcnt_default: u8,
    pub initial_rto: Duration,

    /// Capacity of the PCB pool. Not named in SPEC_FULL.md's tunable list (the original `memp`
    /// pool's fixed size is an external allocator concern), but a boundless `Vec`-backed slab
    /// would make §4.4's reclamation cascade unreachable and untestable, so this port adds an
    /// explicit ceiling that stands in for the pool's fixed slot count (see DESIGN.md).
    pub max_pcbs: usize,
}

impl Default for TcpConfig {
    fn default() -> Self {
        TcpConfig {
            wnd: 16 * 1024,
            mss: 536,
            snd_buf: 16 * 1024,
            synmaxrtx: 6,
            maxrtx: 12,
            msl: Duration::from_secs(60),
            fin_wait_timeout: Duration::from_secs(20 * 60),
            syn_rcvd_timeout: Duration::from_secs(20),
            slow_interval: Duration::from_millis(500),
            fast_interval: Duration::from_millis(250),
            wnd_update_threshold: 4 * 1024,
            keepidle_default: Duration::from_secs(2 * 60 * 60),
            keepintvl_default: Duration::from_secs(75),
            keepcnt_default: 9,
            initial_rto: Duration::from_millis(3000),
            max_pcbs: 4096,
        }
    }
}

impl TcpConfig {
    /// `TCP_WND_MAX`: the largest value `rcv_wnd`/`rcv_ann_wnd` may take without a window
    /// scale option, mirroring the 16-bit ceiling the spec's `min(..., 0xFFFF)` calls rely on.
    pub fn wnd_max(&self) -> u32 {
        self.wnd.min(u16::MAX as u32)
    }

    /// Number of slow ticks equivalent to `2 * msl`, used by the TIME_WAIT and LAST_ACK reapers.
    pub fn two_msl_ticks(&self) -> u32 {
        let total = self.msl.as_millis() as u64 * 2;
        let interval = self.slow_interval.as_millis() as u64;
        ((total + interval - 1) / interval) as u32
    }
}
