//! Local HTTP callback server that receives the authorization redirect.
//! Grounded on the teacher's `perform_oauth_login.rs` callback handling:
//! a `tiny_http` server on a background thread, parsed into a `(code,
//! state)` pair and delivered via a oneshot channel.

use std::sync::Arc;

use tiny_http::Response;
use tiny_http::Server;
use tokio::sync::oneshot;
use urlencoding::decode;

pub struct CallbackServer {
    server: Arc<Server>,
    redirect_uri: String,
}

pub struct CallbackOutcome {
    pub code: String,
    pub state: String,
}

enum ParsedCallback {
    Success(CallbackOutcome),
    Error(String),
    Invalid,
}

impl CallbackServer {
    /// Binds an ephemeral local port (or `port` if given) and returns both
    /// the server and the redirect URI the authorization request should use.
    pub fn bind(port: Option<u16>) -> anyhow::Result<Self> {
        let bind_addr = format!("127.0.0.1:{}", port.unwrap_or(0));
        let server = Server::http(&bind_addr).map_err(|err| anyhow::anyhow!(err))?;
        let addr = match server.server_addr() {
            tiny_http::ListenAddr::IP(addr) => addr,
            #[allow(unreachable_patterns)]
            _ => anyhow::bail!("unable to determine callback address"),
        };
        let redirect_uri = format!("http://{}:{}/callback", addr.ip(), addr.port());
        Ok(Self {
            server: Arc::new(server),
            redirect_uri,
        })
    }

    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    /// Spawns a blocking task that serves exactly one successful callback,
    /// then stops. Dropping the returned guard unblocks the listener.
    pub fn wait_for_callback(&self) -> (CallbackServerGuard, oneshot::Receiver<CallbackOutcome>) {
        let (tx, rx) = oneshot::channel();
        let server = Arc::clone(&self.server);
        let guard = CallbackServerGuard {
            server: Arc::clone(&server),
        };

        tokio::task::spawn_blocking(move || {
            while let Ok(request) = server.recv() {
                match parse_callback(request.url()) {
                    ParsedCallback::Success(outcome) => {
                        let response =
                            Response::from_string("Authentication complete. You may close this window.");
                        let _ = request.respond(response);
                        let _ = tx.send(outcome);
                        break;
                    }
                    ParsedCallback::Error(description) => {
                        let response = Response::from_string(format!("OAuth error: {description}"))
                            .with_status_code(400);
                        let _ = request.respond(response);
                    }
                    ParsedCallback::Invalid => {
                        let response =
                            Response::from_string("Invalid OAuth callback").with_status_code(400);
                        let _ = request.respond(response);
                    }
                }
            }
        });

        (guard, rx)
    }
}

pub struct CallbackServerGuard {
    server: Arc<Server>,
}

impl Drop for CallbackServerGuard {
    fn drop(&mut self) {
        self.server.unblock();
    }
}

fn parse_callback(path: &str) -> ParsedCallback {
    let Some((route, query)) = path.split_once('?') else {
        return ParsedCallback::Invalid;
    };
    if route != "/callback" {
        return ParsedCallback::Invalid;
    }

    let mut code = None;
    let mut state = None;
    let mut error_description = None;

    for pair in query.split('&') {
        let Some((key, value)) = pair.split_once('=') else {
            continue;
        };
        let Ok(decoded) = decode(value) else {
            continue;
        };
        let decoded = decoded.into_owned();
        match key {
            "code" => code = Some(decoded),
            "state" => state = Some(decoded),
            "error_description" => error_description = Some(decoded),
            _ => {}
        }
    }

    if let (Some(code), Some(state)) = (code, state) {
        return ParsedCallback::Success(CallbackOutcome { code, state });
    }
    if let Some(description) = error_description {
        return ParsedCallback::Error(description);
    }
    ParsedCallback::Invalid
}
