//! Resource-related wire types: `Resource`, `ResourceTemplate`,
//! and the contents returned by `resources/read`.

use serde::Deserialize;
use serde::Serialize;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resource {
    pub uri: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(rename = "mimeType")]
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceTemplate {
    #[serde(rename = "uriTemplate")]
    pub uri_template: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(rename = "mimeType")]
    pub mime_type: Option<String>,
}

/// One entry of a `resources/read` result. Exactly one of `text`/`blob` is
/// present; spec §4.3 computes content size as
/// `utf8Bytes(text) + 0.75 * len(blob)` without assuming which is set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceContents {
    pub uri: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(rename = "mimeType")]
    pub mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blob: Option<String>,
}

impl ResourceContents {
    /// Approximate decoded byte size, per spec §4.3's `maxSize` rule:
    /// UTF-8 bytes of `text` plus the decoded size of a base64 `blob`
    /// (`0.75 * len(blob)`, the same estimate the spec uses so we don't
    /// have to base64-decode just to enforce a size cap).
    pub fn approximate_size_bytes(&self) -> usize {
        let text_len = self.text.as_deref().map_or(0, |t| t.len());
        let blob_len = self
            .blob
            .as_deref()
            .map_or(0.0, |b| b.len() as f64 * 0.75) as usize;
        text_len + blob_len
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn approximate_size_sums_text_and_blob_estimate() {
        let contents = ResourceContents {
            uri: "file:///a".to_string(),
            mime_type: None,
            text: Some("hello".to_string()),
            blob: Some("AAAA".to_string()),
        };
        assert_eq!(contents.approximate_size_bytes(), 5 + 3);
    }

    #[test]
    fn resource_round_trips_optional_fields() {
        let json = serde_json::json!({"uri": "file:///a", "name": "a"});
        let resource: Resource = serde_json::from_value(json).expect("valid resource");
        assert_eq!(resource.description, None);
        assert_eq!(resource.mime_type, None);
    }
}
