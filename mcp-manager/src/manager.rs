//! `McpServerManager`: owns a collection of [`McpClient`]s keyed by server
//! id, offers the merged tool map, and multiplexes every client's status
//! stream into a single event bus. Spec §4.4.
//!
//! Grounded on `mcp_connection_manager.rs`'s `McpConnectionManager`: a
//! `HashMap<String, _>` of per-server handles, a qualified tool-name scheme,
//! and `JoinSet`-based concurrent fan-out (`dispose`, cross-server resource
//! reads).

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;

use mcp_client::McpClient;
use mcp_oauth::CallbackServer;
use mcp_oauth::OAuthClientProvider;
use mcp_transport::ServerEndpoint;
use mcp_transport::ServerId;
use mcp_transport::ServerSource;
use mcp_types::ResourceContents;
use tokio::sync::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::warn;

use crate::error::ManagerError;
use crate::event::ManagerEvent;
use crate::registry;
use crate::tool::BuiltinTool;
use crate::tool::ManagedTool;

const WAIT_FOR_CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);
const DISPOSE_TIMEOUT: Duration = Duration::from_secs(30);
const CROSS_SERVER_READ_TIMEOUT: Duration = Duration::from_secs(5);
const CROSS_SERVER_READ_BINARY_TIMEOUT: Duration = Duration::from_secs(10);

struct RegisteredServer {
    client: McpClient,
    endpoint: ServerEndpoint,
    source: ServerSource,
    enabled: bool,
    forward_task: tokio::task::JoinHandle<()>,
}

pub struct ServerInfo {
    pub id: ServerId,
    pub endpoint: ServerEndpoint,
    pub source: ServerSource,
    pub client: McpClient,
}

struct Inner {
    servers: Mutex<HashMap<ServerId, RegisteredServer>>,
    toolbox: std::sync::Mutex<HashMap<String, BuiltinTool>>,
    events_tx: std::sync::Mutex<Option<broadcast::Sender<ManagerEvent>>>,
    disposed: AtomicBool,
    http: reqwest::Client,
}

fn lock<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poison| poison.into_inner())
}

/// Sends on the bus if it hasn't been closed by [`McpServerManager::dispose`] yet.
fn emit(inner: &Inner, event: ManagerEvent) {
    if let Some(tx) = lock(&inner.events_tx).as_ref() {
        let _ = tx.send(event);
    }
}

#[derive(Clone)]
pub struct McpServerManager {
    inner: Arc<Inner>,
}

impl Default for McpServerManager {
    fn default() -> Self {
        Self::new()
    }
}

impl McpServerManager {
    pub fn new() -> Self {
        let (events_tx, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(Inner {
                servers: Mutex::new(HashMap::new()),
                toolbox: std::sync::Mutex::new(HashMap::new()),
                events_tx: std::sync::Mutex::new(Some(events_tx)),
                disposed: AtomicBool::new(false),
                http: reqwest::Client::new(),
            }),
        }
    }

    fn ensure_not_disposed(&self) -> Result<(), ManagerError> {
        if self.inner.disposed.load(Ordering::SeqCst) {
            return Err(ManagerError::Disposed);
        }
        Ok(())
    }

    pub async fn register_server(
        &self,
        endpoint: ServerEndpoint,
        enabled: bool,
        source: ServerSource,
        oauth: Option<Arc<dyn OAuthClientProvider>>,
        callback_server: Option<Arc<CallbackServer>>,
    ) -> Result<(), ManagerError> {
        let client = McpClient::new(endpoint.clone(), oauth, callback_server);
        self.register_server_with_client(client, endpoint, source, enabled).await
    }

    /// Registers a server whose [`McpClient`] has already been built,
    /// bypassing [`McpClient::new`]'s default transport construction.
    /// `register_server` is a thin wrapper over this; tests that need a
    /// fake transport build the client with
    /// [`mcp_client::McpClient::with_transport_factory`] and hand it here
    /// directly.
    pub async fn register_server_with_client(
        &self,
        client: McpClient,
        endpoint: ServerEndpoint,
        source: ServerSource,
        enabled: bool,
    ) -> Result<(), ManagerError> {
        self.ensure_not_disposed()?;
        let id = endpoint.id().clone();

        let mut servers = self.inner.servers.lock().await;
        if servers.contains_key(&id) {
            return Err(ManagerError::Validation(format!("server `{id}` already exists")));
        }

        let forward_task = spawn_status_forwarder(&self.inner, id.clone(), &client);
        client.set_desired_enabled(enabled);

        servers.insert(
            id.clone(),
            RegisteredServer {
                client: client.clone(),
                endpoint,
                source,
                enabled,
                forward_task,
            },
        );
        drop(servers);

        emit(&self.inner, ManagerEvent::ServerAdded { id: id.clone() });

        if enabled {
            client.wait_for_connection(WAIT_FOR_CONNECTION_TIMEOUT).await?;
        }

        Ok(())
    }

    pub async fn register_server_from_registry(
        &self,
        package_identifier: &str,
        enabled: bool,
        oauth: Option<Arc<dyn OAuthClientProvider>>,
        callback_server: Option<Arc<CallbackServer>>,
    ) -> Result<(), ManagerError> {
        self.ensure_not_disposed()?;

        if !package_identifier.starts_with('@') || !package_identifier.contains('/') {
            return Err(ManagerError::Validation(format!(
                "invalid package identifier `{package_identifier}`, expected `@scope/name`"
            )));
        }

        let id = registry::derive_id(package_identifier)?;

        let detail = registry::fetch_server_detail(&self.inner.http, package_identifier)
            .await
            .map_err(|err| ManagerError::Validation(err.to_string()))?;
        let endpoint = registry::convert_server_detail(&detail, id, None)?;

        self.register_server(
            endpoint,
            enabled,
            ServerSource::Registry {
                package_identifier: package_identifier.to_string(),
            },
            oauth,
            callback_server,
        )
        .await
    }

    pub async fn deregister_server(&self, id: &ServerId) -> Result<(), ManagerError> {
        self.ensure_not_disposed()?;

        let removed = {
            let mut servers = self.inner.servers.lock().await;
            servers.remove(id)
        };
        let Some(removed) = removed else {
            return Err(ManagerError::UnknownServer(id.to_string()));
        };

        removed.client.dispose().await?;
        removed.forward_task.abort();

        emit(&self.inner, ManagerEvent::ServerRemoved { id: id.clone() });
        Ok(())
    }

    pub async fn update_server(
        &self,
        id: &ServerId,
        new_endpoint: Option<ServerEndpoint>,
        enabled: Option<bool>,
    ) -> Result<(), ManagerError> {
        self.ensure_not_disposed()?;

        let current = {
            let servers = self.inner.servers.lock().await;
            let current = servers.get(id).ok_or_else(|| ManagerError::UnknownServer(id.to_string()))?;
            (current.endpoint.clone(), current.source.clone(), current.enabled)
        };
        let (current_endpoint, source, current_enabled) = current;

        if let Some(endpoint) = new_endpoint {
            if !endpoint_eq(&endpoint, &current_endpoint) {
                let resolved_enabled = enabled.unwrap_or(current_enabled);
                self.deregister_server(id).await?;
                return self.register_server(endpoint, resolved_enabled, source, None, None).await;
            }
        }

        if let Some(enabled) = enabled {
            let mut servers = self.inner.servers.lock().await;
            let registered = servers
                .get_mut(id)
                .ok_or_else(|| ManagerError::UnknownServer(id.to_string()))?;
            registered.enabled = enabled;
            registered.client.set_desired_enabled(enabled);
        }

        emit(&self.inner, ManagerEvent::ServerUpdated { id: id.clone() });
        Ok(())
    }

    pub fn register_tool(&self, tool: BuiltinTool) -> Result<(), ManagerError> {
        self.ensure_not_disposed()?;
        let mut toolbox = lock(&self.inner.toolbox);
        if toolbox.contains_key(&tool.name) {
            return Err(ManagerError::Validation(format!("tool `{}` already exists", tool.name)));
        }
        toolbox.insert(tool.name.clone(), tool);
        Ok(())
    }

    /// Merged tool map: built-ins shadow MCP tools of the same name; only
    /// tools from clients whose `desiredEnabled` is currently true are
    /// included.
    pub async fn tools(&self) -> HashMap<String, ManagedTool> {
        let mut merged = HashMap::new();

        let servers = self.inner.servers.lock().await;
        for registered in servers.values() {
            if !registered.enabled {
                continue;
            }
            for tool in registered.client.tools() {
                merged.insert(tool.name.clone(), ManagedTool::Mcp(tool));
            }
        }
        drop(servers);

        for tool in lock(&self.inner.toolbox).values() {
            merged.insert(tool.name.clone(), ManagedTool::Builtin(tool.clone()));
        }

        merged
    }

    pub async fn get_tool(&self, name: &str) -> Option<ManagedTool> {
        if let Some(tool) = lock(&self.inner.toolbox).get(name) {
            return Some(ManagedTool::Builtin(tool.clone()));
        }
        let servers = self.inner.servers.lock().await;
        for registered in servers.values() {
            if !registered.enabled {
                continue;
            }
            if let Some(tool) = registered.client.get_tool(name) {
                return Some(ManagedTool::Mcp(tool));
            }
        }
        None
    }

    pub async fn servers(&self) -> Vec<ServerInfo> {
        self.inner
            .servers
            .lock()
            .await
            .iter()
            .map(|(id, registered)| ServerInfo {
                id: id.clone(),
                endpoint: registered.endpoint.clone(),
                source: registered.source.clone(),
                client: registered.client.clone(),
            })
            .collect()
    }

    /// The returned receiver errs with `RecvError::Closed` once [`dispose`]
    /// has torn every server down; a receiver obtained after disposal is
    /// already closed.
    ///
    /// [`dispose`]: Self::dispose
    pub fn events(&self) -> broadcast::Receiver<ManagerEvent> {
        match lock(&self.inner.events_tx).as_ref() {
            Some(tx) => tx.subscribe(),
            None => {
                let (_, rx) = broadcast::channel(1);
                rx
            }
        }
    }

    /// Races `readResource` against every currently enabled server; the
    /// first success wins and sibling attempts are abandoned. Spec §5.
    pub async fn read_resource_any(&self, uri: &str) -> Result<(ServerId, Vec<ResourceContents>), ManagerError> {
        self.read_resource_any_with_timeout(uri, CROSS_SERVER_READ_TIMEOUT).await
    }

    pub async fn read_binary_resource_any(&self, uri: &str) -> Result<(ServerId, Vec<ResourceContents>), ManagerError> {
        self.read_resource_any_with_timeout(uri, CROSS_SERVER_READ_BINARY_TIMEOUT).await
    }

    async fn read_resource_any_with_timeout(
        &self,
        uri: &str,
        per_attempt_timeout: Duration,
    ) -> Result<(ServerId, Vec<ResourceContents>), ManagerError> {
        let mut join_set = JoinSet::new();
        let servers = self.servers().await;

        for info in servers {
            let uri = uri.to_string();
            join_set.spawn(async move {
                let id = info.id;
                let result = tokio::time::timeout(
                    per_attempt_timeout,
                    info.client.read_resource(&uri, mcp_client::ReadResourceOptions::default()),
                )
                .await;
                match result {
                    Ok(Ok(contents)) => Some((id, contents)),
                    _ => None,
                }
            });
        }

        while let Some(joined) = join_set.join_next().await {
            if let Ok(Some(outcome)) = joined {
                join_set.abort_all();
                return Ok(outcome);
            }
        }

        Err(ManagerError::Validation(format!("no server could resolve resource `{uri}`")))
    }

    /// Idempotent; a second call after disposal completes immediately.
    ///
    /// Emits `ServerRemoved` for every server torn down, then closes the
    /// event bus so `events()` subscribers observe completion.
    pub async fn dispose(&self) -> Result<(), ManagerError> {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let removed: Vec<(ServerId, RegisteredServer)> = self.inner.servers.lock().await.drain().collect();

        let mut join_set = JoinSet::new();
        for (id, registered) in removed {
            let inner = self.inner.clone();
            join_set.spawn(async move {
                let _ = tokio::time::timeout(DISPOSE_TIMEOUT, registered.client.dispose()).await;
                registered.forward_task.abort();
                emit(&inner, ManagerEvent::ServerRemoved { id });
            });
        }
        while join_set.join_next().await.is_some() {}

        lock(&self.inner.toolbox).clear();
        lock(&self.inner.events_tx).take();
        Ok(())
    }
}

/// Compares the connection-relevant fields only; `id` is the hashmap key and
/// can't change here, and `displayName` is cosmetic, so neither forces a
/// deregister-then-register cycle on its own.
fn endpoint_eq(a: &ServerEndpoint, b: &ServerEndpoint) -> bool {
    match (a, b) {
        (
            ServerEndpoint::Command { command: c1, args: a1, env: e1, .. },
            ServerEndpoint::Command { command: c2, args: a2, env: e2, .. },
        ) => c1 == c2 && a1 == a2 && e1 == e2,
        (
            ServerEndpoint::Remote { url: u1, headers: h1, .. },
            ServerEndpoint::Remote { url: u2, headers: h2, .. },
        ) => u1 == u2 && h1 == h2,
        _ => false,
    }
}

fn spawn_status_forwarder(inner: &Arc<Inner>, id: ServerId, client: &McpClient) -> tokio::task::JoinHandle<()> {
    let mut status_rx = client.status_stream();
    let inner = inner.clone();
    tokio::spawn(async move {
        loop {
            match status_rx.recv().await {
                Ok(status) => {
                    emit(&inner, ManagerEvent::ClientStatusChanged { id: id.clone(), status });
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(server = %id, skipped, "status forwarder lagged, dropping skipped transitions");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command_endpoint(id: &str) -> ServerEndpoint {
        ServerEndpoint::Command {
            id: ServerId::parse(id).expect("valid id"),
            display_name: None,
            command: "false".to_string(),
            args: vec![],
            env: None,
        }
    }

    #[tokio::test]
    async fn register_emits_server_added_even_when_connect_fails() {
        let manager = McpServerManager::new();
        let mut events = manager.events();
        let id = ServerId::parse("srv-1").expect("valid id");

        let result = manager
            .register_server(command_endpoint("srv-1"), true, ServerSource::Direct, None, None)
            .await;
        assert!(result.is_err());

        match events.recv().await {
            Ok(ManagerEvent::ServerAdded { id: added }) => assert_eq!(added, id),
            other => panic!("expected ServerAdded, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn duplicate_registration_is_rejected() {
        let manager = McpServerManager::new();
        let _ = manager
            .register_server(command_endpoint("srv-1"), false, ServerSource::Direct, None, None)
            .await;
        let second = manager
            .register_server(command_endpoint("srv-1"), false, ServerSource::Direct, None, None)
            .await;
        assert!(matches!(second, Err(ManagerError::Validation(_))));
    }

    #[tokio::test]
    async fn deregister_unknown_server_fails() {
        let manager = McpServerManager::new();
        let id = ServerId::parse("ghost").expect("valid id");
        assert!(matches!(
            manager.deregister_server(&id).await,
            Err(ManagerError::UnknownServer(_))
        ));
    }

    #[tokio::test]
    async fn dispose_emits_server_removed_and_completes_events() {
        let manager = McpServerManager::new();
        let id = ServerId::parse("srv-1").expect("valid id");
        let _ = manager
            .register_server(command_endpoint("srv-1"), false, ServerSource::Direct, None, None)
            .await;

        let mut events = manager.events();
        match events.recv().await {
            Ok(ManagerEvent::ServerAdded { id: added }) => assert_eq!(added, id),
            other => panic!("expected ServerAdded, got {other:?}"),
        }

        manager.dispose().await.expect("dispose succeeds");

        match events.recv().await {
            Ok(ManagerEvent::ServerRemoved { id: removed }) => assert_eq!(removed, id),
            other => panic!("expected ServerRemoved, got {other:?}"),
        }
        assert!(matches!(events.recv().await, Err(broadcast::error::RecvError::Closed)));
    }

    #[tokio::test]
    async fn dispose_is_idempotent_and_blocks_further_mutation() {
        let manager = McpServerManager::new();
        manager.dispose().await.expect("first dispose");
        manager.dispose().await.expect("second dispose is a no-op");

        let result = manager
            .register_server(command_endpoint("srv-1"), false, ServerSource::Direct, None, None)
            .await;
        assert!(matches!(result, Err(ManagerError::Disposed)));
    }

    #[tokio::test]
    async fn register_tool_rejects_duplicates() {
        let manager = McpServerManager::new();
        let tool = BuiltinTool {
            name: "echo".to_string(),
            description: None,
            input_schema: serde_json::json!({}),
        };
        manager.register_tool(tool.clone()).expect("first registration");
        assert!(manager.register_tool(tool).is_err());
    }

    #[tokio::test]
    async fn builtin_tool_shadows_same_named_tool() {
        let manager = McpServerManager::new();
        manager
            .register_tool(BuiltinTool {
                name: "shared".to_string(),
                description: Some("builtin".to_string()),
                input_schema: serde_json::json!({}),
            })
            .expect("registered");

        let tools = manager.tools().await;
        match tools.get("shared") {
            Some(ManagedTool::Builtin(tool)) => assert_eq!(tool.description.as_deref(), Some("builtin")),
            other => panic!("expected builtin tool, got {other:?}"),
        }
    }
}
