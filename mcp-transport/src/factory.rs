//! Builds the right `Transport` object for a `ServerEndpoint`. Spec §4.1,
//! dispatch rule 1/2: command endpoints get stdio, remote endpoints get the
//! streamable-HTTP/SSE transport (which negotiates its own variant inside
//! `connect`).

use std::sync::Arc;

use mcp_oauth::OAuthClientProvider;

use crate::endpoint::ServerEndpoint;
use crate::http::RemoteTransport;
use crate::stdio::StdioTransport;
use crate::transport::Transport;

pub fn build_transport(
    endpoint: &ServerEndpoint,
    oauth: Option<Arc<dyn OAuthClientProvider>>,
) -> anyhow::Result<Arc<dyn Transport>> {
    match endpoint {
        ServerEndpoint::Command { command, args, env, .. } => Ok(Arc::new(StdioTransport::new(
            command.clone(),
            args.clone(),
            env.clone(),
        ))),
        ServerEndpoint::Remote { url, headers, .. } => {
            Ok(Arc::new(RemoteTransport::new(url, headers.clone(), oauth)?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_stdio_transport_for_command_endpoint() {
        let endpoint = ServerEndpoint::Command {
            id: crate::endpoint::ServerId::parse("srv-1").expect("valid id"),
            display_name: None,
            command: "true".to_string(),
            args: vec![],
            env: None,
        };
        assert!(build_transport(&endpoint, None).is_ok());
    }

    #[test]
    fn builds_remote_transport_for_remote_endpoint() {
        let endpoint = ServerEndpoint::Remote {
            id: crate::endpoint::ServerId::parse("srv-1").expect("valid id"),
            display_name: None,
            url: "https://example.com/mcp".to_string(),
            headers: None,
        };
        assert!(build_transport(&endpoint, None).is_ok());
    }

    #[test]
    fn rejects_invalid_remote_url() {
        let endpoint = ServerEndpoint::Remote {
            id: crate::endpoint::ServerId::parse("srv-1").expect("valid id"),
            display_name: None,
            url: "not a url".to_string(),
            headers: None,
        };
        assert!(build_transport(&endpoint, None).is_err());
    }
}
