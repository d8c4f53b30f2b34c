//! In-process fake `Transport`: answers `initialize`/`tools/list`/`tools/call`
//! from an in-memory channel pair instead of spawning a real subprocess or
//! socket, mirroring the teacher's `test_stdio_server.rs` role in
//! `rmcp-client/tests` (a stand-in MCP peer driven entirely in-process).

use std::sync::Arc;

use async_trait::async_trait;
use mcp_transport::ConnectError;
use mcp_transport::SendError;
use mcp_transport::Transport;
use mcp_types::Implementation;
use mcp_types::JSONRPC_VERSION;
use mcp_types::JSONRPCMessage;
use mcp_types::JSONRPCResponse;
use mcp_types::ListToolsResult;
use mcp_types::PROTOCOL_VERSION;
use mcp_types::Tool;
use tokio::sync::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub struct FakeTransport {
    outbound_tx: mpsc::UnboundedSender<JSONRPCMessage>,
    inbound_rx: Mutex<mpsc::UnboundedReceiver<JSONRPCMessage>>,
}

impl FakeTransport {
    /// Spawns the in-process peer task and returns a transport wired to it.
    /// `tools` is what `tools/list` answers; every `tools/call` echoes its
    /// arguments back as a single text content block.
    pub fn spawn(tools: Vec<Tool>) -> Arc<Self> {
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
