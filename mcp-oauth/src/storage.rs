//! File-backed persistence for OAuth artifacts.
//!
//! Spec §4.2: one file per kind per server-URL-hash, under a configuration
//! directory, named `<hash>_<artifact>.(json|txt)`. Writes are full-file
//! replacements (write-to-temp, then rename, so a crash mid-write never
//! leaves a half-written file behind).

use std::path::Path;
use std::path::PathBuf;

use sha2::Digest;
use sha2::Sha256;
use tokio::fs;

use crate::provider::ClientInformation;
use crate::provider::Tokens;

/// Directory name template; `<version>` tracks the on-disk schema so a
/// future incompatible change can land side-by-side with the old one.
pub const STORE_DIR_PREFIX: &str = "ZYPHER_AUTH_";
pub const STORE_VERSION: &str = "v1";

/// 128-bit-or-stronger, deterministic hash of the server URL's UTF-8 bytes.
/// Spec §4.2 allows "MD5 or stronger"; this uses SHA-256 truncated to 16
/// bytes (32 hex chars) since `sha2` is already a workspace dependency and
/// truncated SHA-256 is at least as collision-resistant as MD5.
pub fn hash_server_url(server_url: &str) -> String {
    let digest = Sha256::digest(server_url.as_bytes());
    hex::encode(&digest[..16])
}

#[derive(Debug, Clone)]
pub struct FileOAuthStore {
    dir: PathBuf,
    hash: String,
}

impl FileOAuthStore {
    pub fn new(config_dir: impl Into<PathBuf>, server_url: &str) -> Self {
        let dir = config_dir
            .into()
            .join(format!("{STORE_DIR_PREFIX}{STORE_VERSION}"));
        Self {
            dir,
            hash: hash_server_url(server_url),
        }
    }

    fn path_for(&self, artifact: &str, ext: &str) -> PathBuf {
        self.dir.join(format!("{}_{artifact}.{ext}", self.hash))
    }

    async fn write_atomic(&self, path: &Path, contents: &[u8]) -> anyhow::Result<()> {
        fs::create_dir_all(&self.dir).await?;
        let tmp_path = path.with_extension("tmp");
        fs::write(&tmp_path, contents).await?;
        fs::rename(&tmp_path, path).await?;
        Ok(())
    }

    async fn read_optional(&self, path: &Path) -> anyhow::Result<Option<Vec<u8>>> {
        match fs::read(path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn client_information(&self) -> anyhow::Result<Option<ClientInformation>> {
        let path = self.path_for("client_info", "json");
        match self.read_optional(&path).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub async fn save_client_information(&self, info: &ClientInformation) -> anyhow::Result<()> {
        let path = self.path_for("client_info", "json");
        self.write_atomic(&path, &serde_json::to_vec_pretty(info)?)
            .await
    }

    pub async fn tokens(&self) -> anyhow::Result<Option<Tokens>> {
        let path = self.path_for("tokens", "json");
        match self.read_optional(&path).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub async fn save_tokens(&self, tokens: &Tokens) -> anyhow::Result<()> {
        let path = self.path_for("tokens", "json");
        self.write_atomic(&path, &serde_json::to_vec_pretty(tokens)?)
            .await
    }

    pub async fn code_verifier(&self) -> anyhow::Result<Option<String>> {
        let path = self.path_for("code_verifier", "txt");
        match self.read_optional(&path).await? {
            Some(bytes) => Ok(Some(String::from_utf8(bytes)?)),
            None => Ok(None),
        }
    }

    pub async fn save_code_verifier(&self, verifier: &str) -> anyhow::Result<()> {
        let path = self.path_for("code_verifier", "txt");
        self.write_atomic(&path, verifier.as_bytes()).await
    }

    pub async fn oauth_state(&self) -> anyhow::Result<Option<String>> {
        let path = self.path_for("oauth_state", "txt");
        match self.read_optional(&path).await? {
            Some(bytes) => Ok(Some(String::from_utf8(bytes)?)),
            None => Ok(None),
        }
    }

    pub async fn save_oauth_state(&self, state: &str) -> anyhow::Result<()> {
        let path = self.path_for("oauth_state", "txt");
        self.write_atomic(&path, state.as_bytes()).await
    }

    pub async fn clear_all(&self) -> anyhow::Result<()> {
        for (artifact, ext) in [
            ("client_info", "json"),
            ("tokens", "json"),
            ("code_verifier", "txt"),
            ("oauth_state", "txt"),
        ] {
            let path = self.path_for(artifact, ext);
            match fs::remove_file(&path).await {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }
}
