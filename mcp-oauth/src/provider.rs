//! The `OAuthClientProvider` contract, per spec §4.2: persistent storage of
//! client registration, tokens, code verifier, and CSRF state, plus the
//! side-effecting "redirect to authorization" hook.

use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;
use url::Url;

/// Registration returned by dynamic client registration (RFC 7591) or
/// supplied directly by config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInformation {
    pub client_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
}

/// Tokens as persisted on disk: the raw response fields plus the computed
/// absolute expiry used for the 30s safety-buffered freshness check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tokens {
    pub access_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
    pub token_type: String,
    /// Millis since epoch; `None` means the token never expires.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
}

impl Tokens {
    /// `true` once `now` is within the 30s safety buffer of `expires_at`.
    pub fn is_expired(&self, now_millis: i64) -> bool {
        match self.expires_at {
            Some(expires_at) => now_millis >= expires_at,
            None => false,
        }
    }
}

/// The client-registration metadata sent during dynamic registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientMetadata {
    pub redirect_uris: Vec<String>,
    pub grant_types: Vec<String>,
    pub response_types: Vec<String>,
    pub token_endpoint_auth_method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl ClientMetadata {
    pub fn new(redirect_url: impl Into<String>, client_name: Option<String>) -> Self {
        Self {
            redirect_uris: vec![redirect_url.into()],
            grant_types: vec!["authorization_code".to_string(), "refresh_token".to_string()],
            response_types: vec!["code".to_string()],
            token_endpoint_auth_method: "client_secret_post".to_string(),
            client_name,
            scope: None,
        }
    }
}

/// Invoked when the authorization-code flow needs the user to visit a URL.
/// Implementations typically launch a browser (interactive CLI) or forward
/// the URL to a UI layer outside this crate's scope.
pub trait AuthorizationRedirectHandler: Send + Sync {
    fn redirect(&self, authorization_url: &Url);
}

/// Persists OAuth artifacts for one MCP server and drives the
/// authorization-code+PKCE flow's side effects. One instance per
/// server-URL-hash; see [`crate::storage::FileOAuthStore`] for the on-disk
/// layout.
#[async_trait]
pub trait OAuthClientProvider: Send + Sync {
    /// Stable for the life of the provider.
    fn redirect_url(&self) -> &Url;

    fn client_metadata(&self) -> ClientMetadata;

    async fn client_information(&self) -> anyhow::Result<Option<ClientInformation>>;

    async fn save_client_information(&self, info: ClientInformation) -> anyhow::Result<()>;

    /// `None` if no tokens are persisted, or if they are expired (past the
    /// 30s safety buffer) and expiry checking is enabled.
    async fn tokens(&self) -> anyhow::Result<Option<Tokens>>;

    async fn save_tokens(&self, tokens: RawTokenResponse) -> anyhow::Result<()>;

    async fn code_verifier(&self) -> anyhow::Result<Option<String>>;

    async fn save_code_verifier(&self, verifier: &str) -> anyhow::Result<()>;

    /// Generates a fresh CSRF state, appends it to `authorization_url`,
    /// persists it, and invokes the redirect handler.
    async fn redirect_to_authorization(&self, authorization_url: Url) -> anyhow::Result<()>;

    /// Validates `state` against the persisted CSRF token. The caller must
    /// treat a mismatch as fatal and clear auth data.
    async fn validate_state(&self, state: &str) -> anyhow::Result<bool>;

    async fn clear_auth_data(&self) -> anyhow::Result<()>;
}

/// The raw shape of a token endpoint's JSON response, before we compute
/// `expires_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawTokenResponse {
    pub access_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
    #[serde(default = "default_token_type")]
    pub token_type: String,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_without_expiry_never_expire() {
        let tokens = Tokens {
            access_token: "a".to_string(),
            refresh_token: None,
            expires_in: None,
            token_type: "Bearer".to_string(),
            expires_at: None,
        };
        assert!(!tokens.is_expired(i64::MAX));
    }

    #[test]
    fn tokens_past_expires_at_are_expired() {
        let tokens = Tokens {
            access_token: "a".to_string(),
            refresh_token: None,
            expires_in: Some(3600),
            token_type: "Bearer".to_string(),
            expires_at: Some(1_000),
        };
        assert!(tokens.is_expired(1_000));
        assert!(!tokens.is_expired(999));
    }
}
