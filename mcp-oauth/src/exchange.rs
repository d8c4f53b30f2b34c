//! Authorization-code token exchange with the Basic → form-encoded →
//! public-client auth-method fallback chain from spec §4.2.

use url::Url;

use crate::discovery::discover_metadata;
use crate::discovery::fallback_token_endpoints;
use crate::provider::ClientInformation;
use crate::provider::RawTokenResponse;

#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
    #[error("no token endpoint accepted the authorization code: {0}")]
    AllEndpointsFailed(String),
}

/// Remembers the endpoint that worked so future refreshes skip discovery.
pub struct ExchangeOutcome {
    pub tokens: RawTokenResponse,
    pub token_endpoint: String,
}

/// Runs the full exchange: discover (or fall back to guessed endpoints),
/// then for each candidate try Basic auth, then form-encoded secret, then a
/// public client (no secret) — stopping at the first 2xx.
pub async fn exchange_code_for_tokens(
    client: &reqwest::Client,
    server_url: &Url,
    client_info: &ClientInformation,
    code: &str,
    redirect_uri: &str,
    code_verifier: &str,
) -> anyhow::Result<ExchangeOutcome> {
    let mut candidates = Vec::new();
    if let Some(metadata) = discover_metadata(client, server_url).await {
        candidates.push(metadata.token_endpoint);
    }
    candidates.extend(fallback_token_endpoints(server_url));

    let mut last_error = String::new();
    for endpoint in &candidates {
        match try_all_auth_methods(client, endpoint, client_info, code, redirect_uri, code_verifier)
            .await
        {
            Ok(tokens) => {
                return Ok(ExchangeOutcome {
                    tokens,
                    token_endpoint: endpoint.clone(),
                });
            }
            Err(err) => last_error = format!("{endpoint}: {err:#}"),
        }
    }

    Err(ExchangeError::AllEndpointsFailed(last_error).into())
}

async fn try_all_auth_methods(
    client: &reqwest::Client,
    endpoint: &str,
    client_info: &ClientInformation,
    code: &str,
    redirect_uri: &str,
    code_verifier: &str,
) -> anyhow::Result<RawTokenResponse> {
    let base_form = [
        ("grant_type", "authorization_code"),
        ("code", code),
        ("redirect_uri", redirect_uri),
        ("code_verifier", code_verifier),
    ];

    if let Some(secret) = &client_info.client_secret {
        let response = client
            .post(endpoint)
            .basic_auth(&client_info.client_id, Some(secret))
            .form(&base_form)
            .send()
            .await;
        if let Ok(tokens) = parse_token_response(response).await {
            return Ok(tokens);
        }

        let mut form = base_form.to_vec();
        form.push(("client_id", &client_info.client_id));
        form.push(("client_secret", secret));
        let response = client.post(endpoint).form(&form).send().await;
        if let Ok(tokens) = parse_token_response(response).await {
            return Ok(tokens);
        }
    }

    let mut form = base_form.to_vec();
    form.push(("client_id", &client_info.client_id));
    let response = client.post(endpoint).form(&form).send().await;
    parse_token_response(response).await
}

async fn parse_token_response(
    response: Result<reqwest::Response, reqwest::Error>,
) -> anyhow::Result<RawTokenResponse> {
    let response = response?;
    if !response.status().is_success() {
        anyhow::bail!("token endpoint returned {}", response.status());
    }
    Ok(response.json::<RawTokenResponse>().await?)
}
