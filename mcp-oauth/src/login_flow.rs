//! Orchestrates the two halves of one authorization-code+PKCE round trip.
//!
//! `prepare_authorization` is invoked by a transport the moment it sees a
//! `401`: it registers a client if needed, generates and persists PKCE
//! material, and calls the provider's redirect hook with the authorization
//! URL (spec §4.1 dispatch rule 3 — the connection engine observes this as
//! an `oauthRequired` event). `complete_authorization` is what
//! `Transport::finish_auth(code)` calls once the connection engine's own
//! callback handler has validated CSRF state and handed back the code.

use url::Url;

use crate::discovery::discover_metadata;
use crate::discovery::resolve_authorization_endpoint;
use crate::exchange::exchange_code_for_tokens;
use crate::pkce::code_challenge_s256;
use crate::pkce::generate_code_verifier;
use crate::provider::ClientInformation;
use crate::provider::OAuthClientProvider;

/// Runs dynamic client registration (RFC 7591) against `registration_endpoint`
/// if the provider has no saved client information yet.
pub async fn ensure_client_registered(
    client: &reqwest::Client,
    provider: &dyn OAuthClientProvider,
    server_url: &Url,
) -> anyhow::Result<ClientInformation> {
    if let Some(info) = provider.client_information().await? {
        return Ok(info);
    }

    let metadata = discover_metadata(client, server_url).await;
    let registration_endpoint = metadata.and_then(|m| m.registration_endpoint);

    let info = match registration_endpoint {
        Some(endpoint) => {
            let response = client
                .post(&endpoint)
                .json(&provider.client_metadata())
                .send()
                .await?;
            if !response.status().is_success() {
                anyhow::bail!("dynamic client registration failed: {}", response.status());
            }
            response.json::<ClientInformation>().await?
        }
        None => anyhow::bail!(
            "no client information persisted and server does not advertise a registration endpoint"
        ),
    };

    provider.save_client_information(info.clone()).await?;
    Ok(info)
}

/// Builds the authorization URL (PKCE challenge, client id, the provider's
/// stable redirect URL) and routes it through `redirect_to_authorization`,
/// which appends CSRF state, persists it, and invokes the user-facing hook.
/// Also persists the PKCE verifier for the matching `complete_authorization`
/// call.
pub async fn prepare_authorization(
    client: &reqwest::Client,
    provider: &dyn OAuthClientProvider,
    server_url: &Url,
) -> anyhow::Result<()> {
    let client_info = ensure_client_registered(client, provider, server_url).await?;
    let authorization_endpoint = resolve_authorization_endpoint(client, server_url).await?;

    let verifier = generate_code_verifier();
    provider.save_code_verifier(&verifier).await?;
    let challenge = code_challenge_s256(&verifier);

    let mut authorization_url = authorization_endpoint;
    authorization_url
        .query_pairs_mut()
        .append_pair("response_type", "code")
        .append_pair("client_id", &client_info.client_id)
        .append_pair("redirect_uri", provider.redirect_url().as_str())
        .append_pair("code_challenge", &challenge)
        .append_pair("code_challenge_method", "S256");

    provider.redirect_to_authorization(authorization_url).await
}

/// Exchanges `code` for tokens using the verifier persisted by
/// `prepare_authorization`, and saves the result. The caller is responsible
/// for having already validated CSRF `state` against
/// [`OAuthClientProvider::validate_state`] before calling this.
pub async fn complete_authorization(
    client: &reqwest::Client,
    provider: &dyn OAuthClientProvider,
    server_url: &Url,
    code: &str,
) -> anyhow::Result<()> {
    let client_info = provider
        .client_information()
        .await?
        .ok_or_else(|| anyhow::anyhow!("no client information persisted before token exchange"))?;
    let verifier = provider
        .code_verifier()
        .await?
        .ok_or_else(|| anyhow::anyhow!("code verifier missing before token exchange"))?;

    let exchange = exchange_code_for_tokens(
        client,
        server_url,
        &client_info,
        code,
        provider.redirect_url().as_str(),
        &verifier,
    )
    .await?;

    provider.save_tokens(exchange.tokens).await
}
