//! Subprocess-stdio transport. Grounded on the teacher's
//! `mcp_client.rs::new_stdio_client` writer/reader task pair, generalized
//! behind the `Transport` trait and split from request/response
//! correlation (which lives one layer up, in the connection engine).

use std::collections::HashMap;
use std::process::Stdio;

use async_trait::async_trait;
use mcp_types::JSONRPCMessage;
use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncWriteExt;
use tokio::io::BufReader;
use tokio::process::Child;
use tokio::process::Command;
use tokio::sync::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::warn;

use crate::error::ConnectError;
use crate::error::SendError;
use crate::transport::Transport;

const CHANNEL_CAPACITY: usize = 128;

#[rustfmt::skip]
#[cfg(unix)]
const DEFAULT_ENV_VARS: &[&str] = &[
    "HOME", "LOGNAME", "PATH", "SHELL", "USER", "__CF_USER_TEXT_ENCODING",
    "LANG", "LC_ALL", "TERM", "TMPDIR", "TZ",
];

#[cfg(windows)]
const DEFAULT_ENV_VARS: &[&str] = &[
    "PATH", "PATHEXT", "USERNAME", "USERDOMAIN", "USERPROFILE", "TEMP", "TMP",
];

fn build_child_env(extra_env: Option<&HashMap<String, String>>) -> HashMap<String, String> {
    DEFAULT_ENV_VARS
        .iter()
        .filter_map(|var| std::env::var(var).ok().map(|value| (var.to_string(), value)))
        .chain(extra_env.cloned().unwrap_or_default())
        .collect()
}

struct Inner {
    child: Child,
    outgoing_tx: mpsc::Sender<JSONRPCMessage>,
    incoming_rx: mpsc::Receiver<JSONRPCMessage>,
}

pub struct StdioTransport {
    command: String,
    args: Vec<String>,
    env: Option<HashMap<String, String>>,
    inner: Mutex<Option<Inner>>,
}

impl StdioTransport {
    pub fn new(command: impl Into<String>, args: Vec<String>, env: Option<HashMap<String, String>>) -> Self {
        Self {
            command: command.into(),
            args,
            env,
            inner: Mutex::new(None),
        }
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn connect(&self, cancel: CancellationToken) -> Result<(), ConnectError> {
        if cancel.is_cancelled() {
            return Err(ConnectError::ConnectCancelled);
        }

        let mut child = Command::new(&self.command)
            .args(&self.args)
            .env_clear()
            .envs(build_child_env(self.env.as_ref()))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| ConnectError::Fatal(err.into()))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ConnectError::Fatal(anyhow::anyhow!("failed to capture child stdin")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ConnectError::Fatal(anyhow::anyhow!("failed to capture child stdout")))?;

        let (outgoing_tx, mut outgoing_rx) = mpsc::channel::<JSONRPCMessage>(CHANNEL_CAPACITY);
        let (incoming_tx, incoming_rx) = mpsc::channel::<JSONRPCMessage>(CHANNEL_CAPACITY);

        let writer_cancel = cancel.clone();
        tokio::spawn(async move {
            let mut stdin = stdin;
            loop {
                tokio::select! {
                    _ = writer_cancel.cancelled() => break,
                    message = outgoing_rx.recv() => {
                        let Some(message) = message else { break };
                        match serde_json::to_string(&message) {
                            Ok(json) => {
                                debug!("-> {json}");
                                if stdin.write_all(json.as_bytes()).await.is_err()
                                    || stdin.write_all(b"\n").await.is_err()
                                {
                                    error!("stdio transport: failed to write to child stdin");
                                    break;
                                }
                            }
                            Err(err) => error!("stdio transport: failed to serialize message: {err}"),
                        }
                    }
                }
            }
        });

        let reader_cancel = cancel.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                tokio::select! {
                    _ = reader_cancel.cancelled() => break,
                    line = lines.next_line() => {
                        match line {
                            Ok(Some(line)) => {
                                debug!("<- {line}");
                                match serde_json::from_str::<JSONRPCMessage>(&line) {
                                    Ok(message) => {
                                        if incoming_tx.send(message).await.is_err() {
                                            break;
                                        }
                                    }
                                    Err(err) => warn!("stdio transport: bad frame `{line}`: {err}"),
                                }
                            }
                            Ok(None) => break,
                            Err(err) => {
                                error!("stdio transport: read error: {err}");
                                break;
                            }
                        }
                    }
                }
            }
        });

        *self.inner.lock().await = Some(Inner {
            child,
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
        if let Some(mut inner) = self.inner.lock().await.take() {
            let _ = inner.child.start_kill();
            let _ = inner.child.wait().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_env_includes_custom_overrides() {
        let extra = HashMap::from([("CUSTOM_VAR".to_string(), "1".to_string())]);
        let child_env = build_child_env(Some(&extra));
        assert_eq!(child_env.get("CUSTOM_VAR"), Some(&"1".to_string()));
    }

    #[tokio::test]
    async fn connect_respects_already_cancelled_token() {
        let transport = StdioTransport::new("true", vec![], None);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = transport.connect(cancel).await;
        assert!(matches!(result, Err(ConnectError::ConnectCancelled)));
    }
}
