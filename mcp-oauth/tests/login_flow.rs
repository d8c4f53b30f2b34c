//! Drives `prepare_authorization` and `complete_authorization` end to end
//! against a local `tiny_http` stand-in for the authorization server and a
//! real `CallbackServer`, exercising the full authorization-code+PKCE round
//! trip without any production MCP server or OAuth provider involved.

use std::sync::Arc;
use std::sync::Mutex;

use mcp_oauth::AuthorizationRedirectHandler;
use mcp_oauth::CallbackServer;
use mcp_oauth::FileOAuthClientProvider;
use mcp_oauth::OAuthClientProvider;
use mcp_oauth::complete_authorization;
use mcp_oauth::prepare_authorization;
use tiny_http::Response;
use tiny_http::Server;
use url::Url;

/// A minimal stand-in authorization server: serves AS metadata, dynamic
/// client registration, and the token endpoint, all on one `tiny_http`
/// listener routed by path.
struct FakeAuthServer {
    server: Arc<Server>,
    base_url: String,
}

impl FakeAuthServer {
    fn start() -> Self {
        let server = Arc::new(Server::http("127.0.0.1:0").expect("bind fake AS"));
        let addr = match server.server_addr() {
            tiny_http::ListenAddr::IP(addr) => addr,
            #[allow(unreachable_patterns)]
            _ => panic!("unexpected listen address"),
        };
        let base_url = format!("http://{}:{}", addr.ip(), addr.port());

        let worker = Arc::clone(&server);
        let metadata_base = base_url.clone();
        std::thread::spawn(move || {
            while let Ok(mut request) = worker.recv() {
                let url = request.url().to_string();
                let method = request.method().clone();
                let response = match (method, url.as_str()) {
                    (tiny_http::Method::Get, "/.well-known/oauth-authorization-server") => {
                        Response::from_string(format!(
                            r#"{{"token_endpoint":"{base}/token","authorization_endpoint":"{base}/authorize","registration_endpoint":"{base}/register"}}"#,
                            base = metadata_base
                        ))
                    }
                    (tiny_http::Method::Post, "/register") => {
                        Response::from_string(r#"{"client_id":"fake-client-id"}"#)
                    }
                    (tiny_http::Method::Post, "/token") => {
                        let mut body = String::new();
                        let _ = std::io::Read::read_to_string(request.as_reader(), &mut body);
                        if body.contains("code=") {
                            Response::from_string(
                                r#"{"access_token":"at-123","refresh_token":"rt-123","expires_in":3600,"token_type":"Bearer"}"#,
                            )
                        } else {
                            Response::from_string("missing code").with_status_code(400)
                        }
                    }
                    _ => Response::from_string("not found").with_status_code(404),
                };
                let _ = request.respond(response);
            }
        });

        Self { server, base_url }
    }
}

impl Drop for FakeAuthServer {
    fn drop(&mut self) {
        self.server.unblock();
    }
}

struct RecordingRedirectHandler {
    urls: Mutex<Vec<Url>>,
}

impl AuthorizationRedirectHandler for RecordingRedirectHandler {
    fn redirect(&self, authorization_url: &Url) {
        self.urls.lock().expect("lock").push(authorization_url.clone());
    }
}

#[tokio::test]
async fn full_authorization_code_round_trip_against_fake_server() {
    let auth_server = FakeAuthServer::start();
    let callback_server = CallbackServer::bind(None).expect("bind callback listener");
    let redirect_url = Url::parse(callback_server.redirect_uri()).expect("valid redirect uri");

    let dir = tempfile::tempdir().expect("tempdir");
    let handler = Arc::new(RecordingRedirectHandler {
        urls: Mutex::new(Vec::new()),
    });
    let provider = FileOAuthClientProvider::new(
        dir.path(),
        &format!("{}/mcp", auth_server.base_url),
        redirect_url,
        Some("integration-test-client".to_string()),
        handler.clone() as Arc<dyn AuthorizationRedirectHandler>,
    );

    let http = reqwest::Client::new();
    let server_url = Url::parse(&format!("{}/mcp", auth_server.base_url)).expect("valid url");

    prepare_authorization(&http, &provider, &server_url)
        .await
        .expect("prepare_authorization");

    let recorded = handler.urls.lock().expect("lock");
    assert_eq!(recorded.len(), 1);
    let authorization_url = recorded[0].clone();
    drop(recorded);

    let state = authorization_url
        .query_pairs()
        .find(|(key, _)| key == "state")
        .map(|(_, value)| value.into_owned())
        .expect("state query param present");
    assert!(provider.validate_state(&state).await.expect("validate"));

    let (guard, callback_rx) = callback_server.wait_for_callback();
    let callback_url = format!(
        "{}?code=auth-code-xyz&state={}",
        callback_server.redirect_uri(),
        state
    );
    http.get(&callback_url).send().await.expect("deliver callback");
    let outcome = callback_rx.await.expect("callback delivered");
    drop(guard);

    assert_eq!(outcome.code, "auth-code-xyz");
    assert_eq!(outcome.state, state);
    assert!(provider.validate_state(&outcome.state).await.expect("validate"));

    complete_authorization(&http, &provider, &server_url, &outcome.code)
        .await
        .expect("complete_authorization");

    let tokens = provider.tokens().await.expect("read tokens").expect("tokens present");
    assert_eq!(tokens.access_token, "at-123");
    assert_eq!(tokens.refresh_token.as_deref(), Some("rt-123"));
}

#[tokio::test]
async fn validate_state_rejects_mismatched_csrf_token() {
    let dir = tempfile::tempdir().expect("tempdir");
    let handler = Arc::new(RecordingRedirectHandler {
        urls: Mutex::new(Vec::new()),
    });
    let provider = FileOAuthClientProvider::new(
        dir.path(),
        "https://example.com/mcp",
        Url::parse("http://127.0.0.1:0/callback").expect("valid url"),
        None,
        handler,
    );

    provider
        .redirect_to_authorization(Url::parse("https://auth.example.com/authorize").expect("valid url"))
        .await
        .expect("redirect");

    assert!(!provider.validate_state("attacker-supplied-state").await.expect("validate"));
}
