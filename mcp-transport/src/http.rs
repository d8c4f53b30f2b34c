//! Remote transport: streamable-HTTP with automatic SSE fallback, and the
//! OAuth 401 handoff. Grounded on the teacher's `mcp_client.rs`
//! `new_http_client`/`new_sse_client` plumbing (NDJSON/SSE stream readers,
//! header construction), restructured as a build-once/`connect`-many-times
//! object so a failed connect can share state with `finish_auth` (spec
//! §4.1's OAuth retry loop).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use mcp_oauth::OAuthClientProvider;
use mcp_types::JSONRPCMessage;
use reqwest::Url;
use reqwest::header::ACCEPT;
use reqwest::header::AUTHORIZATION;
use reqwest::header::CONTENT_TYPE;
use reqwest::header::HeaderMap;
use reqwest::header::HeaderName;
use reqwest::header::HeaderValue;
use tokio::sync::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::warn;

use crate::error::ConnectError;
use crate::error::SendError;
use crate::transport::Transport;

const CHANNEL_CAPACITY: usize = 128;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RemoteKind {
    Streamable,
    Sse,
}

struct Inner {
    kind: RemoteKind,
    outgoing_tx: mpsc::Sender<JSONRPCMessage>,
    incoming_rx: mpsc::Receiver<JSONRPCMessage>,
}

pub struct RemoteTransport {
    client: reqwest::Client,
    server_url: Url,
    static_headers: Option<HashMap<String, String>>,
    oauth: Option<Arc<dyn OAuthClientProvider>>,
    inner: Mutex<Option<Inner>>,
}

impl RemoteTransport {
    pub fn new(
        url: &str,
        headers: Option<HashMap<String, String>>,
        oauth: Option<Arc<dyn OAuthClientProvider>>,
    ) -> anyhow::Result<Self> {
        let server_url = Url::parse(url)?;
        Ok(Self {
            client: reqwest::Client::new(),
            server_url,
            static_headers: headers,
            oauth,
            inner: Mutex::new(None),
        })
    }

    async fn build_headers(&self) -> anyhow::Result<HeaderMap> {
        let mut map = HeaderMap::new();
        if let Some(headers) = &self.static_headers {
            for (key, value) in headers {
                let name = HeaderName::from_bytes(key.as_bytes())?;
                let value = HeaderValue::from_str(value)?;
                map.insert(name, value);
            }
        }
        if let Some(oauth) = &self.oauth
            && let Some(tokens) = oauth.tokens().await?
        {
            let value = HeaderValue::from_str(&format!("Bearer {}", tokens.access_token))?;
            map.insert(AUTHORIZATION, value);
        }
        Ok(map)
    }

    /// Probes one transport variant by opening its streaming GET. A
    /// successful response becomes the long-lived reader; any status is
    /// reported back uninterpreted so the caller can decide fallback vs.
    /// `Unauthorized` vs. fatal.
    async fn probe(&self, accept: &'static str, headers: &HeaderMap) -> anyhow::Result<reqwest::Response> {
        let mut request = self.client.get(self.server_url.clone());
        if !headers.is_empty() {
            request = request.headers(headers.clone());
        }
        request = request.header(ACCEPT, accept);
        Ok(request.send().await?)
    }

    async fn handle_unauthorized(&self) -> ConnectError {
        let Some(oauth) = &self.oauth else {
            return ConnectError::Unauthorized;
        };
        if let Err(err) =
            mcp_oauth::prepare_authorization(&self.client, oauth.as_ref(), &self.server_url).await
        {
            return ConnectError::Fatal(err);
        }
        ConnectError::Unauthorized
    }
}

#[async_trait]
impl Transport for RemoteTransport {
    async fn connect(&self, cancel: CancellationToken) -> Result<(), ConnectError> {
        if cancel.is_cancelled() {
            return Err(ConnectError::ConnectCancelled);
        }

        let headers = self
            .build_headers()
            .await
            .map_err(ConnectError::Fatal)?;

        let streamable = tokio::select! {
            _ = cancel.cancelled() => return Err(ConnectError::ConnectCancelled),
            result = self.probe("application/x-ndjson", &headers) => result,
        };

        let response = match streamable {
            Ok(response) if response.status().is_success() => response,
            Ok(response) if response.status().as_u16() == 401 => {
                return Err(self.handle_unauthorized().await);
            }
            Ok(response) if (400..500).contains(&response.status().as_u16()) => {
                return self.connect_sse(cancel, &headers).await;
            }
            Ok(response) => {
                return Err(ConnectError::Fatal(anyhow::anyhow!(
                    "streamable-HTTP probe returned {}",
                    response.status()
                )));
            }
            Err(err) => return Err(ConnectError::Fatal(err)),
        };

        let (outgoing_tx, incoming_rx) =
            self.spawn_streaming_pair(RemoteKind::Streamable, response, headers, cancel);
        *self.inner.lock().await = Some(Inner {
            kind: RemoteKind::Streamable,
            outgoing_tx,
            incoming_rx,
        });
        Ok(())
    }

    async fn send(&self, message: JSONRPCMessage) -> Result<(), SendError> {
        let guard = self.inner.lock().await;
        let Some(inner) = guard.as_ref() else {
            return Err(SendError::Closed);
        };
        inner
            .outgoing_tx
            .send(message)
            .await
            .map_err(|_| SendError::Closed)
    }

    async fn recv(&self) -> Option<JSONRPCMessage> {
        let mut guard = self.inner.lock().await;
        guard.as_mut()?.incoming_rx.recv().await
    }

    async fn close(&self) {
        *self.inner.lock().await = None;
    }

    async fn finish_auth(&self, code: String) -> anyhow::Result<()> {
        let oauth = self
            .oauth
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("remote transport has no OAuth provider attached"))?;
        mcp_oauth::complete_authorization(&self.client, oauth.as_ref(), &self.server_url, &code).await
    }
}

impl RemoteTransport {
    async fn connect_sse(
        &self,
        cancel: CancellationToken,
        headers: &HeaderMap,
    ) -> Result<(), ConnectError> {
        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(ConnectError::ConnectCancelled),
            result = self.probe("text/event-stream", headers) => result,
        };

        let response = match response {
            Ok(response) if response.status().is_success() => response,
            Ok(response) if response.status().as_u16() == 401 => {
                return Err(self.handle_unauthorized().await);
            }
            Ok(response) => {
                return Err(ConnectError::Fatal(anyhow::anyhow!(
                    "SSE probe returned {}",
                    response.status()
                )));
            }
            Err(err) => return Err(ConnectError::Fatal(err)),
        };

        let (outgoing_tx, incoming_rx) =
            self.spawn_streaming_pair(RemoteKind::Sse, response, headers.clone(), cancel);
        *self.inner.lock().await = Some(Inner {
            kind: RemoteKind::Sse,
            outgoing_tx,
            incoming_rx,
        });
        Ok(())
    }

    fn spawn_streaming_pair(
        &self,
        kind: RemoteKind,
        initial_response: reqwest::Response,
        headers: HeaderMap,
        cancel: CancellationToken,
    ) -> (mpsc::Sender<JSONRPCMessage>, mpsc::Receiver<JSONRPCMessage>) {
        let (outgoing_tx, mut outgoing_rx) = mpsc::channel::<JSONRPCMessage>(CHANNEL_CAPACITY);
        let (incoming_tx, incoming_rx) = mpsc::channel::<JSONRPCMessage>(CHANNEL_CAPACITY);

        let client = self.client.clone();
        let post_url = self.server_url.clone();
        let writer_cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = writer_cancel.cancelled() => break,
                    message = outgoing_rx.recv() => {
                        let Some(message) = message else { break };
                        if let Err(err) = post_message(&client, &post_url, &headers, &message).await {
                            warn!("remote transport: failed to send message: {err:#}");
                        }
                    }
                }
            }
        });

        let reader_incoming_tx = incoming_tx.clone();
        tokio::spawn(async move {
            let result = match kind {
                RemoteKind::Streamable => {
                    consume_ndjson(initial_response, reader_incoming_tx, cancel).await
                }
                RemoteKind::Sse => consume_sse(initial_response, reader_incoming_tx, cancel).await,
            };
            if let Err(err) = result {
                warn!("remote transport: stream ended with error: {err:#}");
            }
        });

        (outgoing_tx, incoming_rx)
    }
}

async fn post_message(
    client: &reqwest::Client,
    url: &Url,
    headers: &HeaderMap,
    message: &JSONRPCMessage,
) -> anyhow::Result<()> {
    let mut request = client.post(url.clone());
    if !headers.is_empty() {
        request = request.headers(headers.clone());
    }
    let body = serde_json::to_vec(message)?;
    debug!("-> {}", String::from_utf8_lossy(&body));
    request
        .header(CONTENT_TYPE, "application/json")
        .body(body)
        .send()
        .await?
        .error_for_status()?;
    Ok(())
}

async fn consume_ndjson(
    response: reqwest::Response,
    incoming_tx: mpsc::Sender<JSONRPCMessage>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let mut buffer = Vec::new();
    let mut stream = response.bytes_stream();
    loop {
        let chunk = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            chunk = stream.next() => match chunk {
                Some(chunk) => chunk?,
                None => break,
            },
        };
        buffer.extend_from_slice(&chunk);
        while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = buffer.drain(..=pos).collect();
            dispatch_line(&line, &incoming_tx).await;
        }
    }
    if !buffer.is_empty() {
        dispatch_line(&buffer, &incoming_tx).await;
    }
    Ok(())
}

async fn dispatch_line(line: &[u8], incoming_tx: &mpsc::Sender<JSONRPCMessage>) {
    let text = String::from_utf8_lossy(line);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return;
    }
    match serde_json::from_str::<JSONRPCMessage>(trimmed) {
        Ok(message) => {
            let _ = incoming_tx.send(message).await;
        }
        Err(err) => warn!("remote transport: bad NDJSON frame: {err}; payload={trimmed}"),
    }
}

async fn consume_sse(
    response: reqwest::Response,
    incoming_tx: mpsc::Sender<JSONRPCMessage>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let mut events = response.bytes_stream().eventsource();
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            event = events.next() => match event {
                Some(event) => event?,
                None => return Ok(()),
            },
        };
        let data = event.data.trim();
        if data.is_empty() {
            continue;
        }
        match serde_json::from_str::<JSONRPCMessage>(data) {
            Ok(message) => {
                let _ = incoming_tx.send(message).await;
            }
            Err(err) => warn!("remote transport: bad SSE frame: {err}; payload={data}"),
        }
    }
}
