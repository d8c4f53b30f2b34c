//! Resource listing/reading: filter options and the per-client LRU-by-TTL
//! cache. Spec §4.3.1 / §4.3's secondary resource contract.
//!
//! Grounded on the teacher's `CODEX_APPS_TOOLS_CACHE` pattern in
//! `mcp_connection_manager.rs` (a `Mutex`-guarded cache entry with an
//! `expires_at` check-and-clear), generalized from one global slot to a
//! per-client keyed map since each client may cache many listings and reads.

use std::collections::HashMap;
use std::time::Duration;
use std::time::Instant;

use mcp_types::Resource;
use mcp_types::ResourceContents;
use mcp_types::ResourceTemplate;
use regex_lite::Regex;
use tokio::sync::Mutex;

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, Default)]
pub struct ResourceFilter {
    pub mime_type: Option<String>,
    pub min_size: Option<usize>,
    pub max_size: Option<usize>,
    pub name_pattern: Option<String>,
    pub title_pattern: Option<String>,
    pub annotations: Option<serde_json::Value>,
}

impl ResourceFilter {
    /// `min_size`/`max_size` only constrain listings when a resource's size
    /// happens to be known (the base `Resource` wire shape carries none, so
    /// these bounds are evaluated against already-read contents by callers
    /// that have them; at list time they are accepted but not enforced).
    pub fn matches(&self, resource: &Resource) -> bool {
        if let Some(mime_type) = &self.mime_type {
            if resource.mime_type.as_deref() != Some(mime_type.as_str()) {
                return false;
            }
        }
        if let Some(pattern) = &self.name_pattern {
            match Regex::new(pattern) {
                Ok(re) => {
                    if !re.is_match(&resource.name) {
                        return false;
                    }
                }
                Err(_) => return false,
            }
        }
        if let Some(pattern) = &self.title_pattern {
            let haystack = resource.description.as_deref().unwrap_or_default();
            match Regex::new(pattern) {
                Ok(re) => {
                    if !re.is_match(haystack) {
                        return false;
                    }
                }
                Err(_) => return false,
            }
        }
        true
    }
}

#[derive(Debug, Default)]
pub struct ListResourcesOptions {
    pub cursor: Option<String>,
    pub filter: Option<ResourceFilter>,
    pub use_cache: bool,
}

#[derive(Debug, Default)]
pub struct ReadResourceOptions {
    pub max_size: Option<usize>,
}

#[derive(Debug)]
pub struct ListResourcesPage {
    pub resources: Vec<Resource>,
    pub next_cursor: Option<String>,
}

#[derive(Debug)]
pub struct ListResourceTemplatesPage {
    pub templates: Vec<ResourceTemplate>,
    pub next_cursor: Option<String>,
}

#[derive(Clone)]
enum CachedValue {
    List(Vec<Resource>, Option<String>),
    Templates(Vec<ResourceTemplate>, Option<String>),
    Read(Vec<ResourceContents>),
}

struct CacheEntry {
    value: CachedValue,
    expires_at: Instant,
}

/// Keys are `"list:<cursor|default>"` for listings and `<uri>` for reads,
/// per spec §4.3.1.
pub struct ResourceCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

pub fn list_cache_key(cursor: Option<&str>) -> String {
    format!("list:{}", cursor.unwrap_or("default"))
}

impl ResourceCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub async fn clear(&self) {
        self.entries.lock().await.clear();
    }

    pub async fn invalidate(&self, key: &str) {
        self.entries.lock().await.remove(key);
    }

    pub async fn invalidate_listings(&self) {
        self.entries
            .lock()
            .await
            .retain(|key, _| !key.starts_with("list:"));
    }

    async fn get(&self, key: &str) -> Option<CachedValue> {
        let mut entries = self.entries.lock().await;
        let entry = entries.get(key)?;
        if Instant::now() >= entry.expires_at {
            entries.remove(key);
            return None;
        }
        Some(entry.value.clone())
    }

    async fn put(&self, key: String, value: CachedValue) {
        self.entries.lock().await.insert(
            key,
            CacheEntry {
                value,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    pub async fn get_list(&self, cursor: Option<&str>) -> Option<(Vec<Resource>, Option<String>)> {
        match self.get(&list_cache_key(cursor)).await? {
            CachedValue::List(resources, next) => Some((resources, next)),
            _ => None,
        }
    }

    pub async fn put_list(&self, cursor: Option<&str>, resources: Vec<Resource>, next: Option<String>) {
        self.put(list_cache_key(cursor), CachedValue::List(resources, next))
            .await;
    }

    pub async fn get_templates(
        &self,
        cursor: Option<&str>,
    ) -> Option<(Vec<ResourceTemplate>, Option<String>)> {
        match self.get(&format!("templates:{}", cursor.unwrap_or("default"))).await? {
            CachedValue::Templates(templates, next) => Some((templates, next)),
            _ => None,
        }
    }

    pub async fn put_templates(
        &self,
        cursor: Option<&str>,
        templates: Vec<ResourceTemplate>,
        next: Option<String>,
    ) {
        self.put(
            format!("templates:{}", cursor.unwrap_or("default")),
            CachedValue::Templates(templates, next),
        )
        .await;
    }

    pub async fn get_read(&self, uri: &str) -> Option<Vec<ResourceContents>> {
        match self.get(uri).await? {
            CachedValue::Read(contents) => Some(contents),
            _ => None,
        }
    }

    pub async fn put_read(&self, uri: &str, contents: Vec<ResourceContents>) {
        self.put(uri.to_string(), CachedValue::Read(contents)).await;
    }
}
