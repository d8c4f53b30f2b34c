//! OAuth-AS metadata discovery and the ordered token-endpoint fallback list.
//! Spec §4.2, "Token exchange logic", step 1.

use url::Url;

#[derive(Debug, Clone, serde::Deserialize)]
pub struct AuthorizationServerMetadata {
    pub token_endpoint: String,
    #[serde(default)]
    pub authorization_endpoint: Option<String>,
    #[serde(default)]
    pub registration_endpoint: Option<String>,
}

/// `GET <origin>/.well-known/oauth-authorization-server`. Any non-2xx or
/// malformed body is treated as "not found", not as a hard error: callers
/// fall back to the ordered guess list.
pub async fn discover_metadata(
    client: &reqwest::Client,
    server_url: &Url,
) -> Option<AuthorizationServerMetadata> {
    let origin = origin_of(server_url)?;
    let discovery_url = format!("{origin}/.well-known/oauth-authorization-server");
    let response = client.get(&discovery_url).send().await.ok()?;
    if !response.status().is_success() {
        return None;
    }
    response.json::<AuthorizationServerMetadata>().await.ok()
}

fn origin_of(url: &Url) -> Option<String> {
    let scheme = url.scheme();
    let host = url.host_str()?;
    match url.port() {
        Some(port) => Some(format!("{scheme}://{host}:{port}")),
        None => Some(format!("{scheme}://{host}")),
    }
}

/// The authorization endpoint from AS metadata, or `<origin>/authorize` as a
/// last resort when the server doesn't publish metadata.
pub async fn resolve_authorization_endpoint(
    client: &reqwest::Client,
    server_url: &Url,
) -> anyhow::Result<Url> {
    if let Some(metadata) = discover_metadata(client, server_url).await {
        if let Some(endpoint) = metadata.authorization_endpoint {
            return Url::parse(&endpoint)
                .map_err(|err| anyhow::anyhow!("invalid authorization_endpoint: {err}"));
        }
    }
    let origin =
        origin_of(server_url).ok_or_else(|| anyhow::anyhow!("server URL has no origin"))?;
    Url::parse(&format!("{origin}/authorize"))
        .map_err(|err| anyhow::anyhow!("invalid fallback authorization endpoint: {err}"))
}

/// Candidate token endpoints to try, in order, when discovery fails.
pub fn fallback_token_endpoints(server_url: &Url) -> Vec<String> {
    let server_url_str = server_url.as_str().trim_end_matches('/').to_string();
    let mut candidates = vec![
        format!("{server_url_str}/oauth/token"),
        format!("{server_url_str}/token"),
    ];
    if let Some(origin) = origin_of(server_url) {
        candidates.push(format!("{origin}/oauth/token"));
        candidates.push(format!("{origin}/token"));
    }
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_list_includes_server_relative_and_origin_endpoints() {
        let url = Url::parse("https://mcp.example.com/server/path").expect("valid url");
        let candidates = fallback_token_endpoints(&url);
        assert_eq!(
            candidates,
            vec![
                "https://mcp.example.com/server/path/oauth/token",
                "https://mcp.example.com/server/path/token",
                "https://mcp.example.com/oauth/token",
                "https://mcp.example.com/token",
            ]
        );
    }

    #[test]
    fn origin_includes_non_default_port() {
        let url = Url::parse("http://localhost:8080/mcp").expect("valid url");
        assert_eq!(origin_of(&url), Some("http://localhost:8080".to_string()));
    }
}
