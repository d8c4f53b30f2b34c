//! The per-server connection engine. Spec §4.3: reconcile a settable
//! `desiredState` with the hierarchical `ClientStatus`, run the MCP
//! handshake + tool discovery, execute tool calls, and expose the
//! secondary resource contract.
//!
//! Grounded on `rmcp_client.rs`'s `ClientState` enum and oauth-wrapping
//! idiom, generalized into the full state machine: a single background
//! task (`run_engine`) owns every mutation, driven by an `Event` channel,
//! while `McpClient`'s public methods either read lock-guarded snapshots
//! directly or round-trip through that channel for anything that changes
//! state.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::AtomicI64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use async_trait::async_trait;
use mcp_oauth::CallbackServer;
use mcp_oauth::ClientInformation;
use mcp_oauth::ClientMetadata;
use mcp_oauth::OAuthClientProvider;
use mcp_oauth::RawTokenResponse;
use mcp_oauth::Tokens;
use mcp_transport::ConnectError;
use mcp_transport::ServerEndpoint;
use mcp_transport::ServerId;
use mcp_transport::Transport;
use mcp_types::CallToolRequest;
use mcp_types::CallToolRequestParams;
use mcp_types::ClientCapabilities;
use mcp_types::Implementation;
use mcp_types::InitializeRequest;
use mcp_types::InitializeRequestParams;
use mcp_types::InitializeResult;
use mcp_types::InitializedNotification;
use mcp_types::JSONRPCMessage;
use mcp_types::JSONRPCNotification;
use mcp_types::JSONRPCRequest;
use mcp_types::ListResourceTemplatesRequest;
use mcp_types::ListResourceTemplatesResult;
use mcp_types::ListResourcesRequest;
use mcp_types::ListResourcesResult;
use mcp_types::ListToolsRequest;
use mcp_types::ListToolsRequestParams;
use mcp_types::ListToolsResult;
use mcp_types::McpError;
use mcp_types::ModelContextProtocolNotification;
use mcp_types::ModelContextProtocolRequest;
use mcp_types::PaginatedRequestParams;
use mcp_types::ReadResourceRequest;
use mcp_types::ReadResourceRequestParams;
use mcp_types::ReadResourceResult;
use mcp_types::RequestId;
use mcp_types::Resource;
use mcp_types::ResourceContents;
use mcp_types::ResourceUpdatedNotificationParams;
use mcp_types::SubscribeRequest;
use mcp_types::SubscribeRequestParams;
use mcp_types::ToolResult;
use mcp_types::UnsubscribeRequest;
use mcp_types::UnsubscribeRequestParams;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::warn;
use url::Url;

use crate::error::McpClientError;
use crate::resource::DEFAULT_CACHE_TTL;
use crate::resource::ListResourceTemplatesPage;
use crate::resource::ListResourcesOptions;
use crate::resource::ListResourcesPage;
use crate::resource::ReadResourceOptions;
use crate::resource::ResourceCache;
use crate::status::ClientStatus;
use crate::status::DesiredState;
use crate::tool::Tool;

const OAUTH_CALLBACK_TIMEOUT: Duration = Duration::from_secs(5 * 60);
const DISPOSE_DEADLINE: Duration = Duration::from_secs(30);

fn lock<T>(mutex: &StdMutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poison| poison.into_inner())
}

/// Internal state-machine input. Every variant corresponds to an event
/// named in spec §4.3's transition table, plus the two request/response
/// operations (`Retry`, `Dispose`) that need to hand a result back to a
/// caller.
enum Event {
    SetDesired(DesiredState),
    OAuthRequired(Url),
    ConnectionSuccess,
    ConnectionFailed(McpClientError),
    ToolDiscovered(Vec<Tool>),
    RuntimeError(McpClientError),
    Aborted,
    TeardownComplete,
    Retry(oneshot::Sender<Result<(), McpClientError>>),
    Dispose(oneshot::Sender<()>),
}

/// Decorates an [`OAuthClientProvider`] so its redirect hook also emits an
/// `oauthRequired` event on the engine's channel, carrying the
/// authorization URL — spec §4.3's "on entry to connecting" action.
struct EventEmittingOAuthProvider {
    inner: Arc<dyn OAuthClientProvider>,
    events_tx: mpsc::UnboundedSender<Event>,
}

#[async_trait]
impl OAuthClientProvider for EventEmittingOAuthProvider {
    fn redirect_url(&self) -> &Url {
        self.inner.redirect_url()
    }

    fn client_metadata(&self) -> ClientMetadata {
        self.inner.client_metadata()
    }

    async fn client_information(&self) -> anyhow::Result<Option<ClientInformation>> {
        self.inner.client_information().await
    }

    async fn save_client_information(&self, info: ClientInformation) -> anyhow::Result<()> {
        self.inner.save_client_information(info).await
    }

    async fn tokens(&self) -> anyhow::Result<Option<Tokens>> {
        self.inner.tokens().await
    }

    async fn save_tokens(&self, tokens: RawTokenResponse) -> anyhow::Result<()> {
        self.inner.save_tokens(tokens).await
    }

    async fn code_verifier(&self) -> anyhow::Result<Option<String>> {
        self.inner.code_verifier().await
    }

    async fn save_code_verifier(&self, verifier: &str) -> anyhow::Result<()> {
        self.inner.save_code_verifier(verifier).await
    }

    async fn redirect_to_authorization(&self, authorization_url: Url) -> anyhow::Result<()> {
        let _ = self.events_tx.send(Event::OAuthRequired(authorization_url.clone()));
        self.inner.redirect_to_authorization(authorization_url).await
    }

    async fn validate_state(&self, state: &str) -> anyhow::Result<bool> {
        self.inner.validate_state(state).await
    }

    async fn clear_auth_data(&self) -> anyhow::Result<()> {
        self.inner.clear_auth_data().await
    }
}

type ResourceCallback = Arc<dyn Fn() + Send + Sync>;
type PendingResponder = oneshot::Sender<Result<Value, McpError>>;
/// Builds the `Transport` for a connection attempt. Defaults to
/// [`mcp_transport::build_transport`]; overridable via
/// [`McpClient::with_transport_factory`] so tests can inject an in-process
/// fake transport instead of spawning a real subprocess or socket.
pub type TransportFactory =
    Arc<dyn Fn(&ServerEndpoint, Option<Arc<dyn OAuthClientProvider>>) -> anyhow::Result<Arc<dyn Transport>> + Send + Sync>;

struct Shared {
    id: ServerId,
    endpoint: ServerEndpoint,
    oauth: Option<Arc<dyn OAuthClientProvider>>,
    callback_server: Option<Arc<CallbackServer>>,
    transport_factory: TransportFactory,
    events_tx: mpsc::UnboundedSender<Event>,
    status_tx: watch::Sender<ClientStatus>,
    desired_tx: watch::Sender<DesiredState>,
    transitions_tx: broadcast::Sender<ClientStatus>,
    last_error: StdMutex<Option<McpClientError>>,
    pending_oauth_url: StdMutex<Option<Url>>,
    tools: StdMutex<Vec<Tool>>,
    transport: StdMutex<Option<Arc<dyn Transport>>>,
    abort_token: StdMutex<CancellationToken>,
    next_request_id: AtomicI64,
    pending_requests: StdMutex<HashMap<RequestId, PendingResponder>>,
    resource_cache: ResourceCache,
    resource_subscriptions: StdMutex<HashMap<String, Vec<ResourceCallback>>>,
    list_changed_listeners: StdMutex<Vec<ResourceCallback>>,
    dispose_waiters: StdMutex<Vec<oneshot::Sender<()>>>,
}

impl Shared {
    fn status(&self) -> ClientStatus {
        self.status_tx.borrow().clone()
    }

    fn desired(&self) -> DesiredState {
        *self.desired_tx.borrow()
    }

    fn transition(&self, status: ClientStatus) {
        debug!(server = %self.id, ?status, "client status transition");
        let _ = self.status_tx.send(status.clone());
        let _ = self.transitions_tx.send(status);
    }

    fn set_desired(&self, desired: DesiredState) {
        let _ = self.desired_tx.send(desired);
    }

    fn set_last_error(&self, error: McpClientError) {
        *lock(&self.last_error) = Some(error);
    }

    fn set_tools(&self, tools: Vec<Tool>) {
        *lock(&self.tools) = tools;
    }

    fn take_transport(&self) -> Option<Arc<dyn Transport>> {
        lock(&self.transport).clone()
    }

    async fn next_request_id(&self) -> RequestId {
        RequestId::Integer(self.next_request_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Sends a JSON-RPC request on the current transport and awaits its
    /// correlated response via the reader task's demultiplexing.
    async fn send_request(&self, method: &str, params: Option<Value>) -> Result<Value, McpClientError> {
        let transport = self
            .take_transport()
            .ok_or_else(|| McpClientError::Fatal("not connected".to_string()))?;
        let id = self.next_request_id().await;
        let (tx, rx) = oneshot::channel();
        lock(&self.pending_requests).insert(id.clone(), tx);
        let request = JSONRPCRequest::new(id.clone(), method, params);
        if transport.send(JSONRPCMessage::Request(request)).await.is_err() {
            lock(&self.pending_requests).remove(&id);
            return Err(McpClientError::TransientTransport("send failed".to_string()));
        }
        match rx.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(error)) => Err(McpClientError::Resource(error)),
            Err(_) => Err(McpClientError::Fatal("transport closed before response".to_string())),
        }
    }

    async fn send_notification(&self, method: &str, params: Option<Value>) -> Result<(), McpClientError> {
        let transport = self
            .take_transport()
            .ok_or_else(|| McpClientError::Fatal("not connected".to_string()))?;
        transport
            .send(JSONRPCMessage::Notification(JSONRPCNotification::new(method, params)))
            .await
            .map_err(|_| McpClientError::TransientTransport("send failed".to_string()))
    }

    fn complete_pending(&self, id: &RequestId, result: Result<Value, McpError>) {
        if let Some(tx) = lock(&self.pending_requests).remove(id) {
            let _ = tx.send(result);
        }
    }

    async fn handle_notification(&self, notification: JSONRPCNotification) {
        match notification.method.as_str() {
            "notifications/resources/updated" => {
                let Some(params) = notification.params else {
                    return;
                };
                let Ok(params) = serde_json::from_value::<ResourceUpdatedNotificationParams>(params) else {
                    return;
                };
                self.resource_cache.invalidate(&params.uri).await;
                let callbacks = lock(&self.resource_subscriptions)
                    .get(&params.uri)
                    .cloned()
                    .unwrap_or_default();
                for callback in callbacks {
                    callback();
                }
            }
            "notifications/resources/list_changed" => {
                self.resource_cache.invalidate_listings().await;
                let callbacks = lock(&self.list_changed_listeners).clone();
                for callback in callbacks {
                    callback();
                }
            }
            other => debug!(method = other, "ignoring unrecognized notification"),
        }
    }

    fn notify_dispose_waiters(&self) {
        for waiter in lock(&self.dispose_waiters).drain(..) {
            let _ = waiter.send(());
        }
    }
}

/// A handle to one server's connection engine. Cheap to clone (an `Arc`
/// internally); every clone observes the same underlying state machine.
#[derive(Clone)]
pub struct McpClient {
    shared: Arc<Shared>,
}

impl McpClient {
    pub fn new(
        endpoint: ServerEndpoint,
        oauth: Option<Arc<dyn OAuthClientProvider>>,
        callback_server: Option<Arc<CallbackServer>>,
    ) -> Self {
        Self::with_transport_factory(
            endpoint,
            oauth,
            callback_server,
            Arc::new(|endpoint, oauth| mcp_transport::build_transport(endpoint, oauth)),
        )
    }

    /// Like [`Self::new`] but with the transport construction step
    /// overridden — the seam integration tests use to substitute an
    /// in-process fake transport for a real subprocess or socket.
    pub fn with_transport_factory(
        endpoint: ServerEndpoint,
        oauth: Option<Arc<dyn OAuthClientProvider>>,
        callback_server: Option<Arc<CallbackServer>>,
        transport_factory: TransportFactory,
    ) -> Self {
        let id = endpoint.id().clone();
        let (status_tx, _) = watch::channel(ClientStatus::Disconnected);
        let (desired_tx, _) = watch::channel(DesiredState::Disconnected);
        let (transitions_tx, _) = broadcast::channel(64);
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let shared = Arc::new(Shared {
            id,
            endpoint,
            oauth,
            callback_server,
            transport_factory,
            events_tx,
            status_tx,
            desired_tx,
            transitions_tx,
            last_error: StdMutex::new(None),
            pending_oauth_url: StdMutex::new(None),
            tools: StdMutex::new(Vec::new()),
            transport: StdMutex::new(None),
            abort_token: StdMutex::new(CancellationToken::new()),
            next_request_id: AtomicI64::new(1),
            pending_requests: StdMutex::new(HashMap::new()),
            resource_cache: ResourceCache::new(DEFAULT_CACHE_TTL),
            resource_subscriptions: StdMutex::new(HashMap::new()),
            list_changed_listeners: StdMutex::new(Vec::new()),
            dispose_waiters: StdMutex::new(Vec::new()),
        });

        tokio::spawn(run_engine(shared.clone(), events_rx));
        Self { shared }
    }

    pub fn id(&self) -> &ServerId {
        &self.shared.id
    }

    pub fn status(&self) -> ClientStatus {
        self.shared.status()
    }

    /// A hot broadcast of every status transition; late subscribers do not
    /// see history, per spec §5.
    pub fn status_stream(&self) -> broadcast::Receiver<ClientStatus> {
        self.shared.transitions_tx.subscribe()
    }

    pub fn pending_oauth_url(&self) -> Option<Url> {
        lock(&self.shared.pending_oauth_url).clone()
    }

    pub fn tools(&self) -> Vec<Tool> {
        lock(&self.shared.tools).clone()
    }

    pub fn get_tool(&self, name: &str) -> Option<Tool> {
        lock(&self.shared.tools).iter().find(|tool| tool.name == name).cloned()
    }

    pub fn set_desired_enabled(&self, enabled: bool) {
        let desired = if enabled {
            DesiredState::Connected
        } else {
            DesiredState::Disconnected
        };
        let _ = self.shared.events_tx.send(Event::SetDesired(desired));
    }

    /// Idempotent; a second call after disposal completes immediately.
    pub async fn dispose(&self) -> Result<(), McpClientError> {
        if self.shared.status() == ClientStatus::Disposed {
            return Ok(());
        }
        let (tx, rx) = oneshot::channel();
        let _ = self.shared.events_tx.send(Event::Dispose(tx));
        tokio::time::timeout(DISPOSE_DEADLINE, rx)
            .await
            .map_err(|_| McpClientError::Fatal("dispose exceeded its 30s deadline".to_string()))?
            .map_err(|_| McpClientError::Fatal("engine task gone".to_string()))
    }

    /// Valid only in `error`; fails otherwise without touching state.
    pub async fn retry(&self) -> Result<(), McpClientError> {
        let (tx, rx) = oneshot::channel();
        let _ = self.shared.events_tx.send(Event::Retry(tx));
        rx.await
            .unwrap_or_else(|_| Err(McpClientError::Fatal("engine task gone".to_string())))
    }

    pub async fn wait_for_connection(&self, timeout: Duration) -> Result<(), McpClientError> {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut status_rx = self.shared.status_tx.subscribe();
        let mut desired_rx = self.shared.desired_tx.subscribe();

        loop {
            match status_rx.borrow().clone() {
                ClientStatus::ConnectedToolDiscovered => return Ok(()),
                ClientStatus::Error => {
                    return Err(lock(&self.shared.last_error)
                        .clone()
                        .unwrap_or_else(|| McpClientError::Fatal("unknown error".to_string())));
                }
                _ => {}
            }
            if *desired_rx.borrow() != DesiredState::Connected {
                return Err(McpClientError::Cancelled("desired state changed".to_string()));
            }

            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Err(McpClientError::Fatal("timeout".to_string()));
            }

            tokio::select! {
                _ = tokio::time::sleep(remaining) => return Err(McpClientError::Fatal("timeout".to_string())),
                changed = status_rx.changed() => {
                    if changed.is_err() {
                        return Err(McpClientError::Fatal("engine task gone".to_string()));
                    }
                }
                changed = desired_rx.changed() => {
                    if changed.is_err() {
                        return Err(McpClientError::Fatal("engine task gone".to_string()));
                    }
                }
            }
        }
    }

    /// `name` is the server's own tool name, not the manager's
    /// `"<serverId>_<name>"` qualified form — callers that hold a qualified
    /// name are expected to strip the prefix before calling in here.
    pub async fn execute_tool_call(&self, name: &str, input: Option<Value>) -> Result<ToolResult, McpClientError> {
        let params = CallToolRequestParams {
            name: name.to_string(),
            arguments: input,
        };
        let params = serde_json::to_value(params).map_err(|err| McpClientError::Protocol(err.to_string()))?;
        let value = self.shared.send_request(CallToolRequest::METHOD, Some(params)).await?;
        Ok(ToolResult::from_wire_value(value))
    }

    pub async fn list_resources(&self, opts: ListResourcesOptions) -> Result<ListResourcesPage, McpClientError> {
        if opts.use_cache {
            if let Some((resources, next_cursor)) = self.shared.resource_cache.get_list(opts.cursor.as_deref()).await {
                return Ok(ListResourcesPage {
                    resources: filter_resources(resources, opts.filter.as_ref()),
                    next_cursor,
                });
            }
        }

        let params = PaginatedRequestParams {
            cursor: opts.cursor.clone(),
        };
        let params = serde_json::to_value(params).map_err(|err| McpClientError::Protocol(err.to_string()))?;
        let value = self.shared.send_request(ListResourcesRequest::METHOD, Some(params)).await?;
        let result: ListResourcesResult =
            serde_json::from_value(value).map_err(|err| McpClientError::Protocol(err.to_string()))?;

        self.shared
            .resource_cache
            .put_list(opts.cursor.as_deref(), result.resources.clone(), result.next_cursor.clone())
            .await;

        Ok(ListResourcesPage {
            resources: filter_resources(result.resources, opts.filter.as_ref()),
            next_cursor: result.next_cursor,
        })
    }

    pub async fn list_resource_templates(
        &self,
        cursor: Option<String>,
    ) -> Result<ListResourceTemplatesPage, McpClientError> {
        if let Some((templates, next_cursor)) = self.shared.resource_cache.get_templates(cursor.as_deref()).await {
            return Ok(ListResourceTemplatesPage { templates, next_cursor });
        }

        let params = PaginatedRequestParams { cursor: cursor.clone() };
        let params = serde_json::to_value(params).map_err(|err| McpClientError::Protocol(err.to_string()))?;
        let value = self
            .shared
            .send_request(ListResourceTemplatesRequest::METHOD, Some(params))
            .await?;
        let result: ListResourceTemplatesResult =
            serde_json::from_value(value).map_err(|err| McpClientError::Protocol(err.to_string()))?;

        self.shared
            .resource_cache
            .put_templates(cursor.as_deref(), result.resource_templates.clone(), result.next_cursor.clone())
            .await;

        Ok(ListResourceTemplatesPage {
            templates: result.resource_templates,
            next_cursor: result.next_cursor,
        })
    }

    pub async fn read_resource(&self, uri: &str, opts: ReadResourceOptions) -> Result<Vec<ResourceContents>, McpClientError> {
        if let Some(cached) = self.shared.resource_cache.get_read(uri).await {
            return enforce_size(cached, opts.max_size);
        }

        let params = ReadResourceRequestParams { uri: uri.to_string() };
        let params = serde_json::to_value(params).map_err(|err| McpClientError::Protocol(err.to_string()))?;
        let value = self.shared.send_request(ReadResourceRequest::METHOD, Some(params)).await?;
        let result: ReadResourceResult =
            serde_json::from_value(value).map_err(|err| McpClientError::Protocol(err.to_string()))?;

        self.shared.resource_cache.put_read(uri, result.contents.clone()).await;
        enforce_size(result.contents, opts.max_size)
    }

    /// Identical wire call to [`Self::read_resource`] — the text/binary
    /// split lives in whether a given [`ResourceContents`] carries `text`
    /// or `blob`, not in a separate RPC.
    pub async fn read_binary_resource(
        &self,
        uri: &str,
        opts: ReadResourceOptions,
    ) -> Result<Vec<ResourceContents>, McpClientError> {
        self.read_resource(uri, opts).await
    }

    pub async fn subscribe_to_resource(
        &self,
        uri: &str,
        on_updated: impl Fn() + Send + Sync + 'static,
    ) -> Result<(), McpClientError> {
        let params = SubscribeRequestParams { uri: uri.to_string() };
        let params = serde_json::to_value(params).map_err(|err| McpClientError::Protocol(err.to_string()))?;
        self.shared.send_request(SubscribeRequest::METHOD, Some(params)).await?;
        lock(&self.shared.resource_subscriptions)
            .entry(uri.to_string())
            .or_default()
            .push(Arc::new(on_updated));
        Ok(())
    }

    pub async fn unsubscribe_from_resource(&self, uri: &str) -> Result<(), McpClientError> {
        lock(&self.shared.resource_subscriptions).remove(uri);
        let params = UnsubscribeRequestParams { uri: uri.to_string() };
        let params = serde_json::to_value(params).map_err(|err| McpClientError::Protocol(err.to_string()))?;
        self.shared.send_request(UnsubscribeRequest::METHOD, Some(params)).await?;
        Ok(())
    }

    pub fn on_resources_list_changed(&self, callback: impl Fn() + Send + Sync + 'static) {
        lock(&self.shared.list_changed_listeners).push(Arc::new(callback));
    }
}

fn filter_resources(resources: Vec<Resource>, filter: Option<&crate::resource::ResourceFilter>) -> Vec<Resource> {
    match filter {
        Some(filter) => resources.into_iter().filter(|resource| filter.matches(resource)).collect(),
        None => resources,
    }
}

fn enforce_size(contents: Vec<ResourceContents>, max_size: Option<usize>) -> Result<Vec<ResourceContents>, McpClientError> {
    if let Some(max_size) = max_size {
        let total: usize = contents.iter().map(ResourceContents::approximate_size_bytes).sum();
        if total > max_size {
            // Synthesized client-side: never touches the wire, so it must not
            // collide with any of the server-originated resource codes.
            return Err(McpClientError::Resource(McpError {
                code: -32000,
                message: "content too large".to_string(),
            }));
        }
    }
    Ok(contents)
}

async fn run_engine(shared: Arc<Shared>, mut events_rx: mpsc::UnboundedReceiver<Event>) {
    while let Some(event) = events_rx.recv().await {
        let status = shared.status();
        match (status, event) {
            (ClientStatus::Disconnected, Event::SetDesired(desired)) => {
                shared.set_desired(desired);
                reconcile(&shared).await;
            }
            (ClientStatus::Disconnected, Event::Dispose(waiter)) => {
                shared.set_desired(DesiredState::Disposed);
                lock(&shared.dispose_waiters).push(waiter);
                reconcile(&shared).await;
            }

            (ClientStatus::ConnectingInitializing, Event::OAuthRequired(url)) => {
                *lock(&shared.pending_oauth_url) = Some(url);
                shared.transition(ClientStatus::ConnectingAwaitingOAuth);
            }
            (ClientStatus::ConnectingInitializing | ClientStatus::ConnectingAwaitingOAuth, Event::ConnectionSuccess) => {
                *lock(&shared.pending_oauth_url) = None;
                shared.transition(ClientStatus::ConnectedInitial);
                spawn_handshake_and_discovery(shared.clone());
            }
            (ClientStatus::ConnectingInitializing | ClientStatus::ConnectingAwaitingOAuth, Event::ConnectionFailed(err)) => {
                *lock(&shared.pending_oauth_url) = None;
                shared.set_last_error(err);
                shared.transition(ClientStatus::Error);
            }
            (ClientStatus::ConnectingInitializing | ClientStatus::ConnectingAwaitingOAuth, Event::SetDesired(desired))
                if desired != DesiredState::Connected =>
            {
                shared.set_desired(desired);
                shared.transition(ClientStatus::Aborting);
                enter_aborting(&shared);
            }
            (ClientStatus::ConnectingInitializing | ClientStatus::ConnectingAwaitingOAuth, Event::Dispose(waiter)) => {
                shared.set_desired(DesiredState::Disposed);
                lock(&shared.dispose_waiters).push(waiter);
                shared.transition(ClientStatus::Aborting);
                enter_aborting(&shared);
            }

            (ClientStatus::ConnectedInitial, Event::ToolDiscovered(tools)) => {
                shared.set_tools(tools);
                shared.transition(ClientStatus::ConnectedToolDiscovered);
            }
            (ClientStatus::ConnectedInitial | ClientStatus::ConnectedToolDiscovered, Event::RuntimeError(err)) => {
                shared.set_last_error(err);
                shared.transition(ClientStatus::DisconnectingDueToError);
                spawn_teardown(shared.clone());
            }
            (ClientStatus::ConnectedInitial | ClientStatus::ConnectedToolDiscovered, Event::SetDesired(desired))
                if desired != DesiredState::Connected =>
            {
                shared.set_desired(desired);
                shared.transition(ClientStatus::Disconnecting);
                spawn_teardown(shared.clone());
            }
            (ClientStatus::ConnectedInitial | ClientStatus::ConnectedToolDiscovered, Event::Dispose(waiter)) => {
                shared.set_desired(DesiredState::Disposed);
                lock(&shared.dispose_waiters).push(waiter);
                shared.transition(ClientStatus::Disconnecting);
                spawn_teardown(shared.clone());
            }

            (ClientStatus::Error, Event::Retry(responder)) => {
                shared.transition(ClientStatus::ConnectingInitializing);
                enter_connecting(&shared);
                let _ = responder.send(Ok(()));
            }
            (other, Event::Retry(responder)) => {
                let _ = responder.send(Err(McpClientError::Validation(format!(
                    "retry is only valid in error, current status is {other:?}"
                ))));
            }
            (ClientStatus::Error, Event::SetDesired(desired)) => {
                shared.set_desired(desired);
                reconcile(&shared).await;
            }
            (ClientStatus::Error, Event::Dispose(waiter)) => {
                shared.set_desired(DesiredState::Disposed);
                lock(&shared.dispose_waiters).push(waiter);
                reconcile(&shared).await;
            }

            (ClientStatus::Aborting, Event::Aborted) => {
                shared.transition(ClientStatus::Disconnected);
                reconcile(&shared).await;
            }
            (ClientStatus::Aborting, Event::Dispose(waiter)) => {
                shared.set_desired(DesiredState::Disposed);
                lock(&shared.dispose_waiters).push(waiter);
            }

            (ClientStatus::Disconnecting, Event::TeardownComplete) => {
                shared.transition(ClientStatus::Disconnected);
                reconcile(&shared).await;
            }
            (ClientStatus::DisconnectingDueToError, Event::TeardownComplete) => {
                shared.transition(ClientStatus::Error);
                reconcile(&shared).await;
            }
            (ClientStatus::Disconnecting | ClientStatus::DisconnectingDueToError, Event::Dispose(waiter)) => {
                shared.set_desired(DesiredState::Disposed);
                lock(&shared.dispose_waiters).push(waiter);
            }

            (ClientStatus::Disposed, Event::Dispose(waiter)) => {
                let _ = waiter.send(());
            }
            (ClientStatus::Disposed, _) => {
                // Terminal: every other event is a stale no-op.
            }

            (status, Event::SetDesired(_)) => {
                debug!(?status, "ignoring desired-state change mid-transition");
            }
            (status, other_event) => {
                warn!(?status, "unexpected event for current status");
                drop(other_event);
            }
        }
    }
}

/// Applies the desired-driven rules for `disconnected`/`error`, looping
/// because `error --desired=disposed--> disconnected` itself then needs the
/// `disconnected --desired=disposed--> disposed` rule applied.
async fn reconcile(shared: &Arc<Shared>) {
    loop {
        let status = shared.status();
        let desired = shared.desired();
        match (status, desired) {
            (ClientStatus::Disconnected, DesiredState::Connected) => {
                shared.transition(ClientStatus::ConnectingInitializing);
                enter_connecting(shared);
                return;
            }
            (ClientStatus::Disconnected, DesiredState::Disposed) => {
                shared.transition(ClientStatus::Disposed);
                shared.notify_dispose_waiters();
                return;
            }
            (ClientStatus::Error, DesiredState::Disposed | DesiredState::Disconnected) => {
                shared.transition(ClientStatus::Disconnected);
                continue;
            }
            _ => return,
        }
    }
}

fn enter_aborting(shared: &Arc<Shared>) {
    let previous = std::mem::replace(&mut *lock(&shared.abort_token), CancellationToken::new());
    previous.cancel();
}

fn enter_connecting(shared: &Arc<Shared>) {
    let cancel = {
        let fresh = CancellationToken::new();
        *lock(&shared.abort_token) = fresh.clone();
        fresh
    };

    let wrapped_oauth = shared.oauth.clone().map(|inner| {
        Arc::new(EventEmittingOAuthProvider {
            inner,
            events_tx: shared.events_tx.clone(),
        }) as Arc<dyn OAuthClientProvider>
    });

    let transport = match (shared.transport_factory)(&shared.endpoint, wrapped_oauth) {
        Ok(transport) => transport,
        Err(err) => {
            let _ = shared.events_tx.send(Event::ConnectionFailed(McpClientError::Fatal(err.to_string())));
            return;
        }
    };

    tokio::spawn(run_connect_attempt(shared.clone(), transport, cancel));
}

async fn run_connect_attempt(shared: Arc<Shared>, transport: Arc<dyn Transport>, cancel: CancellationToken) {
    let mut oauth_attempts = 0u32;
    loop {
        match transport.connect(cancel.clone()).await {
            Ok(()) => {
                *lock(&shared.transport) = Some(transport.clone());
                spawn_reader_task(shared.clone(), transport, cancel);
                let _ = shared.events_tx.send(Event::ConnectionSuccess);
                return;
            }
            Err(ConnectError::ConnectCancelled) => {
                let _ = shared.events_tx.send(Event::Aborted);
                return;
            }
            Err(ConnectError::Unauthorized) => {
                oauth_attempts += 1;
                if oauth_attempts > 1 {
                    let _ = shared.events_tx.send(Event::ConnectionFailed(McpClientError::Unauthorized));
                    return;
                }
                match complete_oauth_round_trip(&shared, transport.as_ref()).await {
                    Ok(()) => continue,
                    Err(err) => {
                        let _ = shared.events_tx.send(Event::ConnectionFailed(err));
                        return;
                    }
                }
            }
            Err(err @ (ConnectError::Transient4xx { .. } | ConnectError::Fatal(_))) => {
                let _ = shared
                    .events_tx
                    .send(Event::ConnectionFailed(McpClientError::from_connect_error(&err)));
                return;
            }
        }
    }
}

/// Waits for the local OAuth callback, validates CSRF state, and exchanges
/// the code for tokens on the in-flight transport — the caller retries
/// `connect()` on success. Spec §4.1/§4.2's split: the provider only
/// prepares/persists; the engine owns the callback listener.
async fn complete_oauth_round_trip(shared: &Arc<Shared>, transport: &dyn Transport) -> Result<(), McpClientError> {
    let oauth = shared
        .oauth
        .clone()
        .ok_or_else(|| McpClientError::OAuth("unauthorized but no oauth provider attached".to_string()))?;
    let callback_server = shared
        .callback_server
        .clone()
        .ok_or_else(|| McpClientError::OAuth("missing callback handler".to_string()))?;

    let (guard, rx) = callback_server.wait_for_callback();
    let outcome = match tokio::time::timeout(OAUTH_CALLBACK_TIMEOUT, rx).await {
        Ok(Ok(outcome)) => outcome,
        _ => {
            drop(guard);
            return Err(McpClientError::OAuth("authorization callback was not received in time".to_string()));
        }
    };
    drop(guard);

    match oauth.validate_state(&outcome.state).await {
        Ok(true) => {}
        _ => {
            let _ = oauth.clear_auth_data().await;
            return Err(McpClientError::OAuth("csrf state mismatch".to_string()));
        }
    }

    transport
        .finish_auth(outcome.code)
        .await
        .map_err(|err| McpClientError::OAuth(err.to_string()))
}

fn spawn_reader_task(shared: Arc<Shared>, transport: Arc<dyn Transport>, cancel: CancellationToken) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                message = transport.recv() => {
                    match message {
                        Some(JSONRPCMessage::Response(response)) => {
                            shared.complete_pending(&response.id, Ok(response.result));
                        }
                        Some(JSONRPCMessage::Error(error)) => {
                            shared.complete_pending(
                                &error.id,
                                Err(McpError { code: error.error.code, message: error.error.message }),
                            );
                        }
                        Some(JSONRPCMessage::Notification(notification)) => {
                            shared.handle_notification(notification).await;
                        }
                        Some(JSONRPCMessage::Request(request)) => {
                            warn!(method = %request.method, "ignoring server-initiated request");
                        }
                        None => {
                            let _ = shared
                                .events_tx
                                .send(Event::RuntimeError(McpClientError::TransientTransport("transport closed".to_string())));
                            break;
                        }
                    }
                }
            }
        }
    });
}

/// Tool-discovery task: runs the MCP handshake (`initialize` +
/// `notifications/initialized`), then paginates `tools/list` to
/// completion. Spec §4.3 and §6.
fn spawn_handshake_and_discovery(shared: Arc<Shared>) {
    tokio::spawn(async move {
        if let Err(err) = run_handshake(&shared).await {
            let _ = shared.events_tx.send(Event::RuntimeError(err));
            return;
        }
        match discover_tools(&shared).await {
            Ok(tools) => {
                let _ = shared.events_tx.send(Event::ToolDiscovered(tools));
            }
            Err(err) => {
                let _ = shared.events_tx.send(Event::RuntimeError(err));
            }
        }
    });
}

async fn run_handshake(shared: &Arc<Shared>) -> Result<(), McpClientError> {
    let params = InitializeRequestParams {
        protocol_version: mcp_types::PROTOCOL_VERSION.to_string(),
        capabilities: ClientCapabilities::default(),
        client_info: Implementation {
            name: "mcp-client".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        },
    };
    let params = serde_json::to_value(params).map_err(|err| McpClientError::Protocol(err.to_string()))?;
    let value = shared.send_request(InitializeRequest::METHOD, Some(params)).await?;
    let _result: InitializeResult = serde_json::from_value(value).map_err(|err| McpClientError::Protocol(err.to_string()))?;
    shared
        .send_notification(InitializedNotification::METHOD, None)
        .await
}

async fn discover_tools(shared: &Arc<Shared>) -> Result<Vec<Tool>, McpClientError> {
    let mut tools = Vec::new();
    let mut cursor = None;
    let mut seen_cursors = std::collections::HashSet::new();

    loop {
        let params = ListToolsRequestParams { cursor: cursor.clone() };
        let params = serde_json::to_value(params).map_err(|err| McpClientError::Protocol(err.to_string()))?;
        let value = shared.send_request(ListToolsRequest::METHOD, Some(params)).await?;
        let result: ListToolsResult =
            serde_json::from_value(value).map_err(|err| McpClientError::Protocol(err.to_string()))?;

        for wire_tool in result.tools {
            tools.push(Tool::from_wire(shared.id.as_str(), wire_tool));
        }

        match result.next_cursor {
            Some(next) if seen_cursors.insert(next.clone()) => cursor = Some(next),
            _ => break,
        }
    }

    Ok(tools)
}

fn spawn_teardown(shared: Arc<Shared>) {
    tokio::spawn(async move {
        lock(&shared.abort_token).cancel();

        let uris: Vec<String> = lock(&shared.resource_subscriptions).keys().cloned().collect();
        if let Some(transport) = shared.take_transport() {
            for uri in uris {
                let params = UnsubscribeRequestParams { uri };
                if let Ok(params) = serde_json::to_value(params) {
                    let _ = shared.send_request(UnsubscribeRequest::METHOD, Some(params)).await;
                }
            }
            transport.close().await;
        }

        lock(&shared.resource_subscriptions).clear();
        shared.resource_cache.clear().await;
        shared.set_tools(Vec::new());
        *lock(&shared.transport) = None;

        let _ = shared.events_tx.send(Event::TeardownComplete);
    });
}
