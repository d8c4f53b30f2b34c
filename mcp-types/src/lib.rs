//! Wire types shared by every crate in this workspace: the JSON-RPC
//! envelope, the concrete MCP request/notification shapes this client
//! speaks, and the resource/tool-result types they carry.

pub mod content;
pub mod error;
pub mod jsonrpc;
pub mod requests;
pub mod resources;

pub use content::ContentBlock;
pub use content::ToolResult;
pub use error::McpError;
pub use error::McpErrorCode;
pub use jsonrpc::JSONRPCError;
pub use jsonrpc::JSONRPCErrorError;
pub use jsonrpc::JSONRPCMessage;
pub use jsonrpc::JSONRPCNotification;
pub use jsonrpc::JSONRPCRequest;
pub use jsonrpc::JSONRPCResponse;
pub use jsonrpc::JSONRPC_VERSION;
pub use jsonrpc::ModelContextProtocolNotification;
pub use jsonrpc::ModelContextProtocolRequest;
pub use jsonrpc::RequestId;
pub use requests::CallToolRequest;
pub use requests::CallToolRequestParams;
pub use requests::ClientCapabilities;
pub use requests::Implementation;
pub use requests::InitializeRequest;
pub use requests::InitializeRequestParams;
pub use requests::InitializeResult;
pub use requests::InitializedNotification;
pub use requests::ListResourceTemplatesRequest;
pub use requests::ListResourceTemplatesResult;
pub use requests::ListResourcesRequest;
pub use requests::ListResourcesResult;
pub use requests::ListToolsRequest;
pub use requests::ListToolsRequestParams;
pub use requests::ListToolsResult;
pub use requests::PaginatedRequestParams;
pub use requests::ReadResourceRequest;
pub use requests::ReadResourceRequestParams;
pub use requests::ReadResourceResult;
pub use requests::ResourceListChangedNotification;
pub use requests::ResourceUpdatedNotification;
pub use requests::ResourceUpdatedNotificationParams;
pub use requests::SubscribeRequest;
pub use requests::SubscribeRequestParams;
pub use requests::Tool;
pub use requests::UnsubscribeRequest;
pub use requests::UnsubscribeRequestParams;
pub use requests::PROTOCOL_VERSION;
pub use resources::Resource;
pub use resources::ResourceContents;
pub use resources::ResourceTemplate;
