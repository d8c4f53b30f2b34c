//! End-to-end coverage of `McpServerManager` against in-process fake
//! transports: registering two servers, merging their tools, racing a
//! resource read across both, and tearing everything down on dispose.

mod support;

use std::time::Duration;

use mcp_manager::ManagedTool;
use mcp_manager::ManagerEvent;
use mcp_manager::McpServerManager;
use mcp_transport::ServerEndpoint;
use mcp_transport::ServerId;
use mcp_transport::ServerSource;
use mcp_types::Resource;
use mcp_types::Tool;
use support::fake_client;

fn sample_tool(name: &str) -> Tool {
    Tool {
        name: name.to_string(),
        description: None,
        input_schema: serde_json::json!({"type": "object"}),
        output_schema: None,
    }
}

fn sample_resource(uri: &str) -> Resource {
    Resource {
        uri: uri.to_string(),
        name: uri.to_string(),
        description: None,
        mime_type: None,
    }
}

async fn register(
    manager: &McpServerManager,
    id: &str,
    tools: Vec<Tool>,
    resources: Vec<Resource>,
    resource_text: &str,
) -> ServerId {
    let server_id = ServerId::parse(id).expect("valid id");
    let client = fake_client(id, tools, resources, resource_text);
    manager
        .register_server_with_client(
            client,
            ServerEndpoint::Command {
                id: server_id.clone(),
                display_name: None,
                command: "unused-with-fake-transport".to_string(),
                args: vec![],
                env: None,
            },
            ServerSource::Direct,
            true,
        )
        .await
        .expect("registration succeeds");
    server_id
}

#[tokio::test]
async fn tools_from_two_registered_servers_are_merged_by_qualified_name() {
    let manager = McpServerManager::new();
    register(&manager, "alpha", vec![sample_tool("search")], vec![], "").await;
    register(&manager, "beta", vec![sample_tool("search")], vec![], "").await;

    let tools = manager.tools().await;
    assert!(tools.contains_key("alpha_search"));
    assert!(tools.contains_key("beta_search"));
    assert!(matches!(tools.get("alpha_search"), Some(ManagedTool::Mcp(_))));
}

#[tokio::test]
async fn read_resource_any_returns_first_successful_server() {
    let manager = McpServerManager::new();
    register(&manager, "alpha", vec![], vec![sample_resource("file:///a.txt")], "hello from alpha").await;

    let (winner, contents) = manager
        .read_resource_any("file:///a.txt")
        .await
        .expect("some server resolves it");
    assert_eq!(winner.as_str(), "alpha");
    assert_eq!(contents.len(), 1);
}

#[tokio::test]
async fn read_resource_any_fails_when_no_servers_are_registered() {
    let manager = McpServerManager::new();
    let result = manager.read_resource_any("file:///missing.txt").await;
    assert!(matches!(result, Err(mcp_manager::ManagerError::Validation(_))));
}

#[tokio::test]
async fn deregistering_a_server_drops_its_tools_from_the_merged_map() {
    let manager = McpServerManager::new();
    let id = register(&manager, "alpha", vec![sample_tool("search")], vec![], "").await;
    assert!(manager.tools().await.contains_key("alpha_search"));

    manager.deregister_server(&id).await.expect("deregister");
    assert!(!manager.tools().await.contains_key("alpha_search"));
}

#[tokio::test]
async fn dispose_tears_down_all_registered_servers() {
    let manager = McpServerManager::new();
    let alpha = register(&manager, "alpha", vec![sample_tool("search")], vec![], "").await;
    let beta = register(&manager, "beta", vec![sample_tool("search")], vec![], "").await;

    let mut events = manager.events();

    tokio::time::timeout(Duration::from_secs(5), manager.dispose())
        .await
        .expect("dispose completes promptly")
        .expect("dispose succeeds");

    assert!(manager.servers().await.is_empty());

    let mut removed = std::collections::HashSet::new();
    for _ in 0..2 {
        match events.recv().await {
            Ok(ManagerEvent::ServerRemoved { id }) => {
                removed.insert(id);
            }
            other => panic!("expected ServerRemoved, got {other:?}"),
        }
    }
    assert!(removed.contains(&alpha));
    assert!(removed.contains(&beta));

    assert!(matches!(
        events.recv().await,
        Err(tokio::sync::broadcast::error::RecvError::Closed)
    ));
}
