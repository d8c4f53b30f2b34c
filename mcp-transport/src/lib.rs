//! Transport abstraction over subprocess-stdio, streamable-HTTP, and SSE,
//! with automatic 4xx (except 401) fallback and an OAuth 401 handoff. §4.1.

pub mod endpoint;
pub mod error;
pub mod factory;
pub mod http;
pub mod stdio;
pub mod transport;

pub use endpoint::ServerEndpoint;
pub use endpoint::ServerId;
pub use endpoint::ServerSource;
pub use error::ConnectError;
pub use error::SendError;
pub use factory::build_transport;
pub use http::RemoteTransport;
pub use stdio::StdioTransport;
pub use transport::Transport;
