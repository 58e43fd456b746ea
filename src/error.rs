//! Error taxonomy returned by the public lifecycle operations (SPEC_FULL.md §6/§7/§12).
//!
//! `Ok` stands in for the spec's `ERR_OK`; everything else is a variant here. Invariant
//! violations in the PCB store (duplicate registration, removing a PCB that isn't on the
//! list it claims to be on) are programmer errors, not caller errors, and are asserted/
//! panicked on rather than folded into this enum.

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TcpError {
    #[error("invalid argument or address family mismatch")]
    Val,

    #[error("local address/port already in use")]
    Use,

    #[error("no free ephemeral port available")]
    Buf,

    #[error("no route to remote host")]
    Rte,

    #[error("operation not valid in the current connection state")]
    Conn,

    #[error("connection aborted by the stack")]
    Abrt,
}

pub type TcpResult<T> = Result<T, TcpError>;
