//! Upstream Media Extraction
//!
//! The upstream host is reached through an extractor that turns a URL or a
//! prefixed search term into raw metadata. The engine varies the client
//! identity and extraction depth between calls; everything else about the
//! upstream stays opaque.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How much the extractor should resolve per entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionDepth {
    /// Resolve every entry down to a stream locator.
    Full,
    /// List entries only. Faster and lighter on the upstream, but entries
    /// carry no stream locator.
    Flat,
}

/// Client identity presented to the upstream host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientIdentity {
    /// Short name used in logs
    pub label: String,
    pub user_agent: String,
    /// Extra request headers, sent in order
    pub headers: Vec<(String, String)>,
}

impl ClientIdentity {
    pub fn new(label: impl Into<String>, user_agent: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            user_agent: user_agent.into(),
            headers: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// One extraction call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionRequest {
    /// A direct URL or a search expression such as `ytsearch1:lofi beats`
    pub target: String,
    pub identity: ClientIdentity,
    pub depth: ExtractionDepth,
    /// Format selector, e.g. `bestaudio/best`
    pub format: String,
    /// Maximum number of collection entries to return
    pub playlist_limit: u32,
}

/// A single entry as reported by the upstream.
///
/// Every field is optional because the upstream routinely omits fields
/// under flat extraction or when it is throttling.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedEntry {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    /// Seconds; fractional for some sources
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub uploader: Option<String>,
    #[serde(default)]
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub webpage_url: Option<String>,
    /// Direct stream URL, present only under full extraction
    #[serde(default)]
    pub url: Option<String>,
}

/// Result of one extraction call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractionResponse {
    /// Entries in upstream order. `None` marks an entry the upstream
    /// refused to describe.
    pub entries: Vec<Option<ExtractedEntry>>,
    /// `true` when the upstream answered with a collection (search results
    /// or playlist) rather than a single item.
    pub is_collection: bool,
}

impl ExtractionResponse {
    pub fn single(entry: ExtractedEntry) -> Self {
        Self {
            entries: vec![Some(entry)],
            is_collection: false,
        }
    }

    pub fn collection(entries: Vec<Option<ExtractedEntry>>) -> Self {
        Self {
            entries,
            is_collection: true,
        }
    }
}

/// Extraction failure, already classified by the adapter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractionError {
    /// DNS, connect or timeout failure on our side of the wire
    #[error("Network failure: {0}")]
    Network(String),

    /// Private, age-gated or region-locked content
    #[error("Access denied: {0}")]
    AccessDenied(String),

    /// Anti-automation challenge ("confirm you're not a bot")
    #[error("Blocked by upstream: {0}")]
    Blocked(String),

    /// The item does not exist or was removed
    #[error("Unavailable: {0}")]
    Unavailable(String),

    #[error("Malformed extractor output: {0}")]
    Malformed(String),

    #[error("Extraction failed: {0}")]
    Failed(String),
}

/// Upstream resolution service.
///
/// # Errors
///
/// Implementations classify failures into [`ExtractionError`] variants; the
/// resolver decides retry behavior from the variant alone.
#[async_trait]
pub trait MediaExtractor: Send + Sync {
    async fn extract(
        &self,
        request: ExtractionRequest,
    ) -> std::result::Result<ExtractionResponse, ExtractionError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_builder_keeps_header_order() {
        let identity = ClientIdentity::new("firefox", "Mozilla/5.0")
            .with_header("Accept-Language", "en-US,en;q=0.5")
            .with_header("DNT", "1");

        assert_eq!(identity.headers.len(), 2);
        assert_eq!(identity.headers[0].0, "Accept-Language");
        assert_eq!(identity.headers[1].0, "DNT");
    }

    #[test]
    fn test_single_response_is_not_a_collection() {
        let response = ExtractionResponse::single(ExtractedEntry {
            id: Some("abc".into()),
            ..Default::default()
        });

        assert!(!response.is_collection);
        assert_eq!(response.entries.len(), 1);
    }
}
