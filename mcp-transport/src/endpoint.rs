//! `ServerEndpoint`, the sum type a transport connects to. Spec §3.

use std::collections::HashMap;

use serde::Deserialize;
use serde::Serialize;

/// Matches `^[A-Za-z0-9_-]{1,128}$`; validated at construction so later
/// consumers can treat `id` as already-checked.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServerId(String);

impl ServerId {
    pub fn parse(id: impl Into<String>) -> anyhow::Result<Self> {
        let id = id.into();
        let valid = !id.is_empty()
            && id.len() <= 128
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            anyhow::bail!("invalid server id `{id}`: must match ^[A-Za-z0-9_-]{{1,128}}$");
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ServerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ServerEndpoint {
    Command {
        id: ServerId,
        #[serde(default)]
        display_name: Option<String>,
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: Option<HashMap<String, String>>,
    },
    Remote {
        id: ServerId,
        #[serde(default)]
        display_name: Option<String>,
        url: String,
        #[serde(default)]
        headers: Option<HashMap<String, String>>,
    },
}

impl ServerEndpoint {
    pub fn id(&self) -> &ServerId {
        match self {
            ServerEndpoint::Command { id, .. } => id,
            ServerEndpoint::Remote { id, .. } => id,
        }
    }

    pub fn display_name(&self) -> Option<&str> {
        match self {
            ServerEndpoint::Command { display_name, .. } => display_name.as_deref(),
            ServerEndpoint::Remote { display_name, .. } => display_name.as_deref(),
        }
    }
}

/// Purely informational provenance metadata. Spec §3.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ServerSource {
    Direct,
    Registry { package_identifier: String },
}
