//! Authorization-code+PKCE OAuth client-provider for remote MCP servers.
//!
//! Persists client registration, tokens, the PKCE verifier, and CSRF state
//! as files under a configuration directory, one set per server-URL-hash.

pub mod callback;
pub mod discovery;
pub mod exchange;
pub mod file_provider;
pub mod login_flow;
pub mod pkce;
pub mod provider;
pub mod storage;

pub use callback::CallbackOutcome;
pub use callback::CallbackServer;
pub use file_provider::FileOAuthClientProvider;
pub use login_flow::complete_authorization;
pub use login_flow::ensure_client_registered;
pub use login_flow::prepare_authorization;
pub use provider::AuthorizationRedirectHandler;
pub use provider::ClientInformation;
pub use provider::ClientMetadata;
pub use provider::OAuthClientProvider;
pub use provider::RawTokenResponse;
pub use provider::Tokens;
pub use storage::FileOAuthStore;
pub use storage::hash_server_url;
