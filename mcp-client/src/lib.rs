//! The per-server MCP connection engine: a hierarchical status machine
//! reconciling a settable desired state, tool discovery, tool execution,
//! and the resource listing/read/subscribe surface with its TTL cache.

mod client;
mod error;
mod resource;
mod status;
mod tool;

pub use client::McpClient;
pub use client::TransportFactory;
pub use error::McpClientError;
pub use resource::DEFAULT_CACHE_TTL;
pub use resource::ListResourceTemplatesPage;
pub use resource::ListResourcesOptions;
pub use resource::ListResourcesPage;
pub use resource::ReadResourceOptions;
pub use resource::ResourceCache;
pub use resource::ResourceFilter;
pub use status::ClientStatus;
pub use status::DesiredState;
pub use tool::ExecuteToolResult;
pub use tool::Tool;
