//! Registry adapter: fetches a `ServerDetail` for a `@scope/name` package
//! identifier and converts it to a `ServerEndpoint`. Spec §4.4's conversion
//! rules, §6's `MCP_STORE_BASE_URL` override.
//!
//! Grounded on the teacher's plain-`reqwest` GET/POST calls in
//! `codex-login` and `codex-rmcp-client` for HTTP requests against a
//! first-party service; the conversion rules themselves have no teacher
//! counterpart (the teacher has no package registry) and are implemented
//! fresh from spec.md §4.4's rule list.

use std::collections::HashMap;

use mcp_transport::ServerEndpoint;
use mcp_transport::ServerId;
use serde::Deserialize;

use crate::error::ManagerError;

const DEFAULT_STORE_BASE_URL: &str = "https://api1.mcp.corespeed.io";

pub fn store_base_url() -> String {
    std::env::var("MCP_STORE_BASE_URL").unwrap_or_else(|_| DEFAULT_STORE_BASE_URL.to_string())
}

#[derive(Debug, Clone, Deserialize)]
pub struct HeaderPair {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteDetail {
    pub url: String,
    #[serde(default)]
    pub headers: Vec<HeaderPair>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ArgDetail {
    pub value: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EnvPair {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PackageDetail {
    pub registry_name: String,
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub runtime_arguments: Vec<ArgDetail>,
    #[serde(default)]
    pub package_arguments: Vec<ArgDetail>,
    #[serde(default)]
    pub environment_variables: Vec<EnvPair>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerDetail {
    #[serde(default)]
    pub remotes: Vec<RemoteDetail>,
    #[serde(default)]
    pub packages: Vec<PackageDetail>,
}

/// Fetches the package's `ServerDetail` document from the registry store.
/// `pkg` is the raw `@scope/name` identifier; it is percent-encoded as a
/// single path segment.
pub async fn fetch_server_detail(http: &reqwest::Client, pkg: &str) -> anyhow::Result<ServerDetail> {
    let url = format!(
        "{}/v0/servers/{}",
        store_base_url().trim_end_matches('/'),
        urlencoding::encode(pkg)
    );
    let response = http.get(&url).send().await?.error_for_status()?;
    Ok(response.json::<ServerDetail>().await?)
}

/// `registerServerFromRegistry` takes no explicit id (spec §4.4), so one is
/// derived from the package identifier itself: `@scope/name` becomes
/// `scope-name`, satisfying `ServerId`'s character set.
pub fn derive_id(package_identifier: &str) -> Result<ServerId, ManagerError> {
    let slug = package_identifier.trim_start_matches('@').replace('/', "-");
    ServerId::parse(slug).map_err(|err| ManagerError::Validation(err.to_string()))
}

/// Spec §4.4's three-way dispatch: prefer a remote endpoint, fall back to
/// the first package's command construction, else fail. `id` and
/// `display_name` are caller-supplied, since the store's response carries
/// neither.
pub fn convert_server_detail(
    detail: &ServerDetail,
    id: ServerId,
    display_name: Option<String>,
) -> Result<ServerEndpoint, ManagerError> {
    if let Some(remote) = detail.remotes.first() {
        let headers = flatten_headers(&remote.headers);
        return Ok(ServerEndpoint::Remote {
            id,
            display_name,
            url: remote.url.clone(),
            headers: if headers.is_empty() { None } else { Some(headers) },
        });
    }

    if let Some(package) = detail.packages.first() {
        let (command, mut args) = command_for_package(package)?;
        args.extend(package.runtime_arguments.iter().map(|arg| arg.value.clone()));
        args.extend(package.package_arguments.iter().map(|arg| arg.value.clone()));
        let env = flatten_env(&package.environment_variables);
        return Ok(ServerEndpoint::Command {
            id,
            display_name,
            command,
            args,
            env: if env.is_empty() { None } else { Some(env) },
        });
    }

    Err(ManagerError::Validation(
        "no valid remote or package configuration".to_string(),
    ))
}

fn command_for_package(package: &PackageDetail) -> Result<(String, Vec<String>), ManagerError> {
    let versioned = |sep: &str| match &package.version {
        Some(version) => format!("{}{sep}{version}", package.name),
        None => package.name.clone(),
    };

    match package.registry_name.as_str() {
        "npm" => Ok(("npx".to_string(), vec!["-y".to_string(), versioned("@")])),
        "pypi" => Ok(("python".to_string(), vec!["-m".to_string(), package.name.clone()])),
        "uv" => Ok(("uvx".to_string(), vec![versioned("@")])),
        "docker" => Ok(("docker".to_string(), vec!["run".to_string(), versioned(":")])),
        other => Err(ManagerError::Validation(format!(
            "unsupported package registry `{other}`"
        ))),
    }
}

fn flatten_headers(headers: &[HeaderPair]) -> HashMap<String, String> {
    headers.iter().map(|h| (h.name.clone(), h.value.clone())).collect()
}

fn flatten_env(vars: &[EnvPair]) -> HashMap<String, String> {
    vars.iter().map(|v| (v.name.clone(), v.value.clone())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_id_from_scoped_package_identifier() {
        let id = derive_id("@acme/server").expect("valid id");
        assert_eq!(id.as_str(), "acme-server");
    }

    #[test]
    fn prefers_remote_over_package() {
        let detail = ServerDetail {
            remotes: vec![RemoteDetail {
                url: "https://example.com/mcp".to_string(),
                headers: vec![HeaderPair {
                    name: "Authorization".to_string(),
                    value: "Bearer x".to_string(),
                }],
            }],
            packages: vec![],
        };
        let endpoint =
            convert_server_detail(&detail, ServerId::parse("srv-1").expect("valid id"), None).expect("remote endpoint");
        match endpoint {
            ServerEndpoint::Remote { url, headers, .. } => {
                assert_eq!(url, "https://example.com/mcp");
                assert_eq!(headers.expect("headers")["Authorization"], "Bearer x");
            }
            other => panic!("expected remote endpoint, got {other:?}"),
        }
    }

    #[test]
    fn npm_package_becomes_npx_invocation() {
        let detail = ServerDetail {
            remotes: vec![],
            packages: vec![PackageDetail {
                registry_name: "npm".to_string(),
                name: "@acme/server".to_string(),
                version: Some("1.2.3".to_string()),
                runtime_arguments: vec![],
                package_arguments: vec![ArgDetail {
                    value: "--verbose".to_string(),
                }],
                environment_variables: vec![EnvPair {
                    name: "TOKEN".to_string(),
                    value: "secret".to_string(),
                }],
            }],
        };
        let endpoint =
            convert_server_detail(&detail, ServerId::parse("srv-1").expect("valid id"), None).expect("command endpoint");
        match endpoint {
            ServerEndpoint::Command { command, args, env, .. } => {
                assert_eq!(command, "npx");
                assert_eq!(args, vec!["-y", "@acme/server@1.2.3", "--verbose"]);
                assert_eq!(env.expect("env")["TOKEN"], "secret");
            }
            other => panic!("expected command endpoint, got {other:?}"),
        }
    }

    #[test]
    fn fails_without_remote_or_package() {
        let detail = ServerDetail {
            remotes: vec![],
            packages: vec![],
        };
        assert!(convert_server_detail(&detail, ServerId::parse("srv-1").expect("valid id"), None).is_err());
    }

    #[test]
    fn docker_package_uses_colon_version_separator() {
        let detail = ServerDetail {
            remotes: vec![],
            packages: vec![PackageDetail {
                registry_name: "docker".to_string(),
                name: "acme/server".to_string(),
                version: Some("latest".to_string()),
                runtime_arguments: vec![],
                package_arguments: vec![],
                environment_variables: vec![],
            }],
        };
        let endpoint =
            convert_server_detail(&detail, ServerId::parse("srv-1").expect("valid id"), None).expect("command endpoint");
        match endpoint {
            ServerEndpoint::Command { command, args, .. } => {
                assert_eq!(command, "docker");
                assert_eq!(args, vec!["run", "acme/server:latest"]);
            }
            other => panic!("expected command endpoint, got {other:?}"),
        }
    }
}
