//! Transport-level error kinds, per spec §4.1 and §7.

use thiserror::Error;

/// Outcome of a `connect` attempt.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("connect cancelled")]
    ConnectCancelled,
    /// HTTP 401. The caller owns the OAuth retry loop (§4.1).
    #[error("unauthorized")]
    Unauthorized,
    /// HTTP 4xx other than 401; streamable-HTTP callers fall back to SSE.
    #[error("transient 4xx status {status}")]
    Transient4xx { status: u16 },
    #[error("fatal transport error: {0}")]
    Fatal(#[from] anyhow::Error),
}

/// Outcome of a `send` call on an already-connected transport.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("transport closed")]
    Closed,
    #[error("send cancelled")]
    Cancelled,
}
