//! In-process fake `Transport`, mirroring `mcp-client`'s own fake-transport
//! test harness so manager-level tests don't need a real subprocess or
//! network peer to exercise registration, tool merging, and the
//! cross-server resource race.

use std::sync::Arc;

use async_trait::async_trait;
use mcp_client::McpClient;
use mcp_transport::ConnectError;
use mcp_transport::SendError;
use mcp_transport::ServerEndpoint;
use mcp_transport::ServerId;
use mcp_transport::Transport;
use mcp_types::Implementation;
use mcp_types::JSONRPC_VERSION;
use mcp_types::JSONRPCMessage;
use mcp_types::JSONRPCResponse;
use mcp_types::ListToolsResult;
use mcp_types::PROTOCOL_VERSION;
use mcp_types::Resource;
use mcp_types::Tool;
use tokio::sync::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub struct FakeTransport {
    outbound_tx: mpsc::UnboundedSender<JSONRPCMessage>,
    inbound_rx: Mutex<mpsc::UnboundedReceiver<JSONRPCMessage>>,
}

impl FakeTransport {
    pub fn spawn(tools: Vec<Tool>, resources: Vec<Resource>, resource_text: String) -> Arc<Self> {
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<JSONRPCMessage>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<JSONRPCMessage>();

        tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                let JSONRPCMessage::Request(request) = message else {
                    continue;
                };

                let result = match request.method.as_str() {
                    "initialize" => serde_json::to_value(mcp_types::InitializeResult {
                        protocol_version: PROTOCOL_VERSION.to_string(),
                        capabilities: serde_json::json!({}),
                        server_info: Implementation {
                            name: "fake-server".to_string(),
                            version: "0.0.0".to_string(),
                        },
                    })
                    .expect("serializable"),
                    "tools/list" => serde_json::to_value(ListToolsResult {
                        tools: tools.clone(),
                        next_cursor: None,
                    })
                    .expect("serializable"),
                    "resources/list" => serde_json::json!({
                        "resources": resources,
                        "nextCursor": null,
                    }),
                    "resources/read" => serde_json::json!({
                        "contents": [{"uri": resources.first().map(|r| r.uri.clone()).unwrap_or_default(), "text": resource_text}],
                    }),
                    "tools/call" => serde_json::json!({
                        "content": [{"type": "text", "text": request.params.unwrap_or_default().to_string()}],
                    }),
                    _ => serde_json::json!({}),
                };

                let _ = inbound_tx.send(JSONRPCMessage::Response(JSONRPCResponse {
                    jsonrpc: JSONRPC_VERSION.to_string(),
                    id: request.id,
                    result,
                }));
            }
        });

        Arc::new(Self { outbound_tx, inbound_rx: Mutex::new(inbound_rx) })
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn connect(&self, _cancel: CancellationToken) -> Result<(), ConnectError> {
        Ok(())
    }

    async fn send(&self, message: JSONRPCMessage) -> Result<(), SendError> {
        self.outbound_tx.send(message).map_err(|_| SendError::Closed)
    }

    async fn recv(&self) -> Option<JSONRPCMessage> {
        self.inbound_rx.lock().await.recv().await
    }

    async fn close(&self) {}
}

pub fn fake_client(id: &str, tools: Vec<Tool>, resources: Vec<Resource>, resource_text: &str) -> McpClient {
    let server_id = ServerId::parse(id).expect("valid id");
    let transport = FakeTransport::spawn(tools, resources, resource_text.to_string());
    McpClient::with_transport_factory(
        ServerEndpoint::Command {
            id: server_id,
            display_name: None,
            command: "unused-with-fake-transport".to_string(),
            args: vec![],
            env: None,
        },
        None,
        None,
        Arc::new(move |_endpoint, _oauth| Ok(transport.clone() as Arc<dyn mcp_transport::Transport>)),
    )
}
