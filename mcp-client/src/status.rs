//! The hierarchical `ClientStatus` value and the `DesiredState` it is
//! reconciled against. Spec §3, §4.3.

/// Observable state of one [`crate::client::McpClient`]. Transitions are
/// driven exclusively by the engine in `client.rs`; see its module doc for
/// the full transition table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientStatus {
    Disconnected,
    ConnectingInitializing,
    ConnectingAwaitingOAuth,
    ConnectedInitial,
    ConnectedToolDiscovered,
    Disconnecting,
    DisconnectingDueToError,
    Error,
    Aborting,
    Disposed,
}

impl ClientStatus {
    pub fn is_connected(&self) -> bool {
        matches!(
            self,
            ClientStatus::ConnectedInitial | ClientStatus::ConnectedToolDiscovered
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ClientStatus::Disposed)
    }
}

/// Externally settable target the engine drives `ClientStatus` towards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DesiredState {
    Connected,
    Disconnected,
    Disposed,
}
