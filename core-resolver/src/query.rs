//! Query classification.
//!
//! Anything that looks like a link to a known host is extracted directly;
//! everything else becomes a best-match search.

use crate::error::{ResolutionError, Result};

const URL_MARKERS: &[&str] = &[
    "http://",
    "https://",
    "www.",
    "youtube.com",
    "youtu.be",
    "music.youtube.com",
    "soundcloud.com",
    "spotify.com",
];

/// A classified user query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    /// Direct reference to a source page or playlist
    Direct(String),
    /// Free-text search
    Search(String),
}

impl Query {
    /// Classify `raw`, trimming surrounding whitespace.
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ResolutionError::InvalidQuery(
                "query cannot be empty".to_string(),
            ));
        }

        let lowered = trimmed.to_lowercase();
        if URL_MARKERS.iter().any(|marker| lowered.contains(marker)) {
            Ok(Query::Direct(trimmed.to_string()))
        } else {
            Ok(Query::Search(trimmed.to_string()))
        }
    }

    /// The extractor target: the URL itself, or `<prefix>:<text>`.
    pub fn target(&self, search_prefix: &str) -> String {
        match self {
            Query::Direct(url) => url.clone(),
            Query::Search(text) => format!("{}:{}", search_prefix, text),
        }
    }

    pub fn is_direct(&self) -> bool {
        matches!(self, Query::Direct(_))
    }
}
