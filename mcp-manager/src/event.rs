//! The manager's single multiplexed event stream. Spec §4.4: `serverAdded`
//! strictly precedes any `clientStatusChanged` for that server, since both
//! are emitted from the same synchronous section of `register_server`.

use mcp_client::ClientStatus;
use mcp_transport::ServerId;

#[derive(Debug, Clone)]
pub enum ManagerEvent {
    ServerAdded { id: ServerId },
    ServerUpdated { id: ServerId },
    ServerRemoved { id: ServerId },
    ClientStatusChanged { id: ServerId, status: ClientStatus },
}
