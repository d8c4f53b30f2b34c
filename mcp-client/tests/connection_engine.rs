//! End-to-end coverage of the connection engine against the in-process fake
//! transport: connect through to tool discovery, execute a tool call,
//! disable the server and watch it tear down, then dispose.

mod support;

use std::sync::Arc;
use std::time::Duration;

use mcp_client::ClientStatus;
use mcp_client::McpClient;
use mcp_transport::ServerEndpoint;
use mcp_transport::ServerId;
use mcp_types::Tool;
use support::FakeTransport;

fn make_endpoint(id: &str) -> ServerEndpoint {
    ServerEndpoint::Command {
        id: ServerId::parse(id).expect("valid id"),
        display_name: None,
        command: "unused-with-fake-transport".to_string(),
        args: vec![],
        env: None,
    }
}

fn sample_tool() -> Tool {
    Tool {
        name: "echo".to_string(),
        description: Some("echoes its input".to_string()),
        input_schema: serde_json::json!({"type": "object"}),
        output_schema: None,
    }
}

fn client_with_fake_transport(id: &str, tools: Vec<Tool>) -> McpClient {
    let transport = FakeTransport::spawn(tools);
    McpClient::with_transport_factory(
        make_endpoint(id),
        None,
        None,
        Arc::new(move |_endpoint, _oauth| Ok(transport.clone() as Arc<dyn mcp_transport::Transport>)),
    )
}

#[tokio::test]
async fn connects_and_discovers_tools() {
    let client = client_with_fake_transport("fake-1", vec![sample_tool()]);
    client.set_desired_enabled(true);

    client
        .wait_for_connection(Duration::from_secs(5))
        .await
        .expect("reaches connected.toolDiscovered");

    assert_eq!(client.status(), ClientStatus::ConnectedToolDiscovered);
    let tools = client.tools();
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].name, "fake-1_echo");
    assert_eq!(tools[0].original_name, "echo");
}

#[tokio::test]
async fn execute_tool_call_round_trips_through_fake_server() {
    let client = client_with_fake_transport("fake-2", vec![sample_tool()]);
    client.set_desired_enabled(true);
    client
        .wait_for_connection(Duration::from_secs(5))
        .await
        .expect("connected");

    let result = client
        .execute_tool_call("echo", Some(serde_json::json!({"message": "hi"})))
        .await
        .expect("tool call succeeds");

    assert_eq!(result.content.len(), 1);
}

#[tokio::test]
async fn disabling_a_connected_client_tears_down_to_disconnected() {
    let client = client_with_fake_transport("fake-3", vec![sample_tool()]);
    client.set_desired_enabled(true);
    client
        .wait_for_connection(Duration::from_secs(5))
        .await
        .expect("connected");

    client.set_desired_enabled(false);

    let mut stream = client.status_stream();
    loop {
        let status = stream.recv().await.expect("engine still running");
        if status == ClientStatus::Disconnected {
            break;
        }
    }
    assert_eq!(client.status(), ClientStatus::Disconnected);
    assert!(client.tools().is_empty());
}

#[tokio::test]
async fn dispose_from_connected_reaches_disposed() {
    let client = client_with_fake_transport("fake-4", vec![sample_tool()]);
    client.set_desired_enabled(true);
    client
        .wait_for_connection(Duration::from_secs(5))
        .await
        .expect("connected");

    client.dispose().await.expect("dispose completes");
    assert_eq!(client.status(), ClientStatus::Disposed);
}
