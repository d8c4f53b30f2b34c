//! File-backed [`OAuthClientProvider`] implementation.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use url::Url;

use crate::provider::AuthorizationRedirectHandler;
use crate::provider::ClientInformation;
use crate::provider::ClientMetadata;
use crate::provider::OAuthClientProvider;
use crate::provider::RawTokenResponse;
use crate::provider::Tokens;
use crate::storage::FileOAuthStore;

const EXPIRY_SAFETY_BUFFER_SECS: i64 = 30;

pub struct FileOAuthClientProvider {
    store: FileOAuthStore,
    redirect_url: Url,
    client_name: Option<String>,
    redirect_handler: Arc<dyn AuthorizationRedirectHandler>,
}

impl FileOAuthClientProvider {
    pub fn new(
        config_dir: impl Into<PathBuf>,
        server_url: &str,
        redirect_url: Url,
        client_name: Option<String>,
        redirect_handler: Arc<dyn AuthorizationRedirectHandler>,
    ) -> Self {
        Self {
            store: FileOAuthStore::new(config_dir, server_url),
            redirect_url,
            client_name,
            redirect_handler,
        }
    }
}

#[async_trait]
impl OAuthClientProvider for FileOAuthClientProvider {
    fn redirect_url(&self) -> &Url {
        &self.redirect_url
    }

    fn client_metadata(&self) -> ClientMetadata {
        ClientMetadata::new(self.redirect_url.as_str(), self.client_name.clone())
    }

    async fn client_information(&self) -> anyhow::Result<Option<ClientInformation>> {
        self.store.client_information().await
    }

    async fn save_client_information(&self, info: ClientInformation) -> anyhow::Result<()> {
        self.store.save_client_information(&info).await
    }

    async fn tokens(&self) -> anyhow::Result<Option<Tokens>> {
        let Some(tokens) = self.store.tokens().await? else {
            return Ok(None);
        };
        if tokens.is_expired(now_millis()) {
            return Ok(None);
        }
        Ok(Some(tokens))
    }

    async fn save_tokens(&self, raw: RawTokenResponse) -> anyhow::Result<()> {
        let expires_at = raw
            .expires_in
            .map(|secs| now_millis() + (secs as i64 - EXPIRY_SAFETY_BUFFER_SECS) * 1_000);
        let tokens = Tokens {
            access_token: raw.access_token,
            refresh_token: raw.refresh_token,
            expires_in: raw.expires_in,
            token_type: raw.token_type,
            expires_at,
        };
        self.store.save_tokens(&tokens).await
    }

    async fn code_verifier(&self) -> anyhow::Result<Option<String>> {
        self.store.code_verifier().await
    }

    async fn save_code_verifier(&self, verifier: &str) -> anyhow::Result<()> {
        self.store.save_code_verifier(verifier).await
    }

    async fn redirect_to_authorization(&self, mut authorization_url: Url) -> anyhow::Result<()> {
        let state = crate::pkce::generate_csrf_state();
        authorization_url
            .query_pairs_mut()
            .append_pair("state", &state);
        self.store.save_oauth_state(&state).await?;
        self.redirect_handler.redirect(&authorization_url);
        Ok(())
    }

    async fn validate_state(&self, state: &str) -> anyhow::Result<bool> {
        let persisted = self.store.oauth_state().await?;
        Ok(persisted.as_deref() == Some(state))
    }

    async fn clear_auth_data(&self) -> anyhow::Result<()> {
        self.store.clear_all().await
    }
}

fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct RecordingRedirectHandler {
        urls: Mutex<Vec<String>>,
    }

    impl AuthorizationRedirectHandler for RecordingRedirectHandler {
        fn redirect(&self, authorization_url: &Url) {
            self.urls.lock().expect("lock").push(authorization_url.to_string());
        }
    }

    fn provider(dir: &std::path::Path) -> FileOAuthClientProvider {
        FileOAuthClientProvider::new(
            dir.to_path_buf(),
            "https://example.com/mcp",
            Url::parse("http://127.0.0.1:0/callback").expect("valid url"),
            Some("test-client".to_string()),
            Arc::new(RecordingRedirectHandler {
                urls: Mutex::new(Vec::new()),
            }),
        )
    }

    #[tokio::test]
    async fn save_tokens_computes_expiry_with_safety_buffer() {
        let dir = tempfile::tempdir().expect("tempdir");
        let provider = provider(dir.path());
        let before = now_millis();
        provider
            .save_tokens(RawTokenResponse {
                access_token: "at".to_string(),
                refresh_token: None,
                expires_in: Some(3600),
                token_type: "Bearer".to_string(),
            })
            .await
            .expect("save");
        let tokens = provider
            .tokens()
            .await
            .expect("read")
            .expect("not expired yet");
        let expected_min = before + (3600 - EXPIRY_SAFETY_BUFFER_SECS) * 1_000;
        assert!(tokens.expires_at.expect("expiry set") >= expected_min);
    }

    #[tokio::test]
    async fn expired_tokens_are_hidden_from_callers() {
        let dir = tempfile::tempdir().expect("tempdir");
        let provider = provider(dir.path());
        provider
            .save_tokens(RawTokenResponse {
                access_token: "at".to_string(),
                refresh_token: None,
                expires_in: Some(0),
                token_type: "Bearer".to_string(),
            })
            .await
            .expect("save");
        assert!(provider.tokens().await.expect("read").is_none());
    }

    #[tokio::test]
    async fn redirect_to_authorization_persists_state_and_appends_it() {
        let dir = tempfile::tempdir().expect("tempdir");
        let provider = provider(dir.path());
        let authorization_url = Url::parse("https://auth.example.com/authorize").expect("valid url");
        provider
            .redirect_to_authorization(authorization_url)
            .await
            .expect("redirect");
        let persisted = provider
            .validate_state("wrong-state")
            .await
            .expect("validate");
        assert!(!persisted);
    }

    #[tokio::test]
    async fn clear_auth_data_removes_tokens() {
        let dir = tempfile::tempdir().expect("tempdir");
        let provider = provider(dir.path());
        provider
            .save_tokens(RawTokenResponse {
                access_token: "at".to_string(),
                refresh_token: None,
                expires_in: Some(3600),
                token_type: "Bearer".to_string(),
            })
            .await
            .expect("save");
        provider.clear_auth_data().await.expect("clear");
        assert!(provider.tokens().await.expect("read").is_none());
    }
}
