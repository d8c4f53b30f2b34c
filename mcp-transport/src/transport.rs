//! The `Transport` trait: a uniform message-in/message-out pipe over
//! subprocess-stdio, streamable-HTTP, or SSE. Spec §4.1.

use async_trait::async_trait;
use mcp_types::JSONRPCMessage;
use tokio_util::sync::CancellationToken;

use crate::error::ConnectError;
use crate::error::SendError;

/// A transport object is built (cheap, no I/O) per connection attempt and
/// then driven through `connect`; a failed `connect` may be retried on the
/// same instance (this is what lets `finish_auth` + a second `connect`
/// share state such as the OAuth provider and PKCE verifier, per spec
/// §4.1's OAuth loop).
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self, cancel: CancellationToken) -> Result<(), ConnectError>;

    async fn send(&self, message: JSONRPCMessage) -> Result<(), SendError>;

    /// Returns the next inbound frame, or `None` once the peer or the local
    /// side has closed the connection. The sequence is finite.
    async fn recv(&self) -> Option<JSONRPCMessage>;

    /// Guaranteed, idempotent.
    async fn close(&self);

    /// Completes a pending OAuth authorization-code exchange that was
    /// triggered by a prior `Unauthorized` connect failure. Transports that
    /// cannot authenticate (stdio) reject this.
    async fn finish_auth(&self, _code: String) -> anyhow::Result<()> {
        anyhow::bail!("this transport does not support OAuth")
    }
}
