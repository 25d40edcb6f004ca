//! # Resolver
//!
//! Turns a user query into track metadata by walking the strategy table
//! against the upstream extractor.
//!
//! ## Cascade
//!
//! 1. Classify the query: direct URL, or `<prefix>:<text>` search.
//! 2. Try each strategy in order. Before strategy `i > 0`, sleep
//!    `base + increment * i` to avoid correlated rate-limit hits.
//! 3. A network failure retries the *same* strategy (bounded), since it says
//!    nothing about the strategy itself.
//! 4. The first strategy returning a candidate with an identifier wins.
//! 5. If all fail, report the most specific error seen.

use std::sync::Arc;

use async_trait::async_trait;
use bridge_traits::{
    Clock, ExtractedEntry, ExtractionDepth, ExtractionError, ExtractionRequest,
    ExtractionResponse, MediaExtractor, SystemClock,
};
use chrono::{DateTime, Utc};
use core_runtime::config::ResolverPolicy;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::error::{ResolutionError, Result};
use crate::locator::StreamLocator;
use crate::query::Query;
use crate::strategy::{default_strategies, ExtractionStrategy, IdentityPool, IdentitySource};

/// Playlist cap when none is configured.
pub const DEFAULT_PLAYLIST_LIMIT: u32 = 50;

const UNKNOWN_TITLE: &str = "Unknown Title";
const UNKNOWN_UPLOADER: &str = "Unknown";

/// Metadata for one resolved track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackMetadata {
    /// Upstream identifier
    pub id: String,
    pub title: String,
    /// Zero means unknown or live
    pub duration_secs: u64,
    pub uploader: String,
    pub thumbnail_url: Option<String>,
    /// Stable page URL; always re-resolvable
    pub canonical_url: String,
    /// Absent for flat extraction results
    pub locator: Option<StreamLocator>,
}

impl TrackMetadata {
    fn from_entry(
        entry: ExtractedEntry,
        depth: ExtractionDepth,
        issued_at: DateTime<Utc>,
    ) -> Option<Self> {
        let id = entry.id.filter(|id| !id.trim().is_empty())?;

        let canonical_url = entry
            .webpage_url
            .filter(|url| !url.is_empty())
            .unwrap_or_else(|| format!("https://www.youtube.com/watch?v={}", id));

        let locator = match depth {
            ExtractionDepth::Full => entry
                .url
                .filter(|url| url.starts_with("http"))
                .map(|url| StreamLocator::parse(url, issued_at)),
            ExtractionDepth::Flat => None,
        };

        let duration_secs = entry
            .duration
            .filter(|secs| secs.is_finite() && *secs > 0.0)
            .map(|secs| secs.round() as u64)
            .unwrap_or(0);

        Some(Self {
            id,
            title: entry.title.unwrap_or_else(|| UNKNOWN_TITLE.to_string()),
            duration_secs,
            uploader: entry
                .uploader
                .unwrap_or_else(|| UNKNOWN_UPLOADER.to_string()),
            thumbnail_url: entry.thumbnail,
            canonical_url,
            locator,
        })
    }
}

/// Outcome of a successful resolve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// Candidates in upstream order, capped at the playlist limit
    pub tracks: Vec<TrackMetadata>,
    /// More than one candidate came back from a collection
    pub is_playlist: bool,
}

impl Resolution {
    pub fn first(&self) -> Option<&TrackMetadata> {
        self.tracks.first()
    }

    pub fn into_first(self) -> Option<TrackMetadata> {
        self.tracks.into_iter().next()
    }
}

/// Query-to-metadata resolution.
#[async_trait]
pub trait TrackResolver: Send + Sync {
    /// Resolve a URL or free-text query.
    async fn resolve(&self, query: &str) -> Result<Resolution>;

    /// Re-resolve a canonical URL into metadata carrying a fresh locator.
    async fn refresh(&self, canonical_url: &str) -> Result<TrackMetadata>;
}

/// Strategy-cascade resolver over a [`MediaExtractor`].
pub struct Resolver {
    extractor: Arc<dyn MediaExtractor>,
    strategies: Vec<ExtractionStrategy>,
    identities: IdentityPool,
    policy: ResolverPolicy,
    playlist_limit: u32,
    clock: Arc<dyn Clock>,
}

impl Resolver {
    /// Resolver with the default strategy table and a randomly offset
    /// identity rotation.
    pub fn new(extractor: Arc<dyn MediaExtractor>, policy: ResolverPolicy) -> Self {
        let identities = IdentityPool::default();
        let offset = rand::thread_rng().gen_range(0..identities.len());
        Self {
            extractor,
            strategies: default_strategies(),
            identities: identities.starting_at(offset),
            policy,
            playlist_limit: DEFAULT_PLAYLIST_LIMIT,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_strategies(mut self, strategies: Vec<ExtractionStrategy>) -> Self {
        self.strategies = strategies;
        self
    }

    pub fn with_identities(mut self, identities: IdentityPool) -> Self {
        self.identities = identities;
        self
    }

    pub fn with_playlist_limit(mut self, limit: u32) -> Self {
        self.playlist_limit = limit.max(1);
        self
    }

    pub fn strategies(&self) -> &[ExtractionStrategy] {
        &self.strategies
    }

    async fn cascade(
        &self,
        target: &str,
        strategies: Vec<&ExtractionStrategy>,
        require_locator: bool,
    ) -> Result<Resolution> {
        let mut reported: Option<ResolutionError> = None;

        for (index, strategy) in strategies.into_iter().enumerate() {
            let delay = self.policy.delay_before(index);
            if !delay.is_zero() {
                debug!(strategy = %strategy.name, delay_ms = delay.as_millis() as u64, "Pacing before next strategy");
                tokio::time::sleep(delay).await;
            }

            match self.try_strategy(strategy, target, require_locator).await {
                Ok(resolution) => {
                    info!(
                        strategy = %strategy.name,
                        tracks = resolution.tracks.len(),
                        is_playlist = resolution.is_playlist,
                        "Resolved query"
                    );
                    return Ok(resolution);
                }
                Err(error) => {
                    warn!(strategy = %strategy.name, error = %error, "Extraction strategy failed");
                    reported = match reported {
                        Some(previous) if previous.specificity() >= error.specificity() => {
                            Some(previous)
                        }
                        _ => Some(error),
                    };
                }
            }
        }

        Err(reported.unwrap_or_else(|| {
            ResolutionError::NotFound("no extraction strategy is configured".to_string())
        }))
    }

    async fn try_strategy(
        &self,
        strategy: &ExtractionStrategy,
        target: &str,
        require_locator: bool,
    ) -> Result<Resolution> {
        let identity = match &strategy.identity {
            IdentitySource::Rotating => self.identities.next(),
            IdentitySource::Fixed(identity) => identity.clone(),
        };

        let mut network_retries = 0;
        loop {
            let request = ExtractionRequest {
                target: target.to_string(),
                identity: identity.clone(),
                depth: strategy.depth,
                format: strategy.format.clone(),
                playlist_limit: self.playlist_limit,
            };

            match self.extractor.extract(request).await {
                Ok(response) => {
                    return self.build_resolution(response, strategy.depth, require_locator)
                }
                Err(ExtractionError::Network(message))
                    if network_retries < self.policy.transient_retries =>
                {
                    network_retries += 1;
                    debug!(
                        strategy = %strategy.name,
                        retry = network_retries,
                        error = %message,
                        "Network failure, retrying same strategy"
                    );
                    tokio::time::sleep(self.policy.transient_retry_delay).await;
                }
                Err(error) => return Err(error.into()),
            }
        }
    }

    fn build_resolution(
        &self,
        response: ExtractionResponse,
        depth: ExtractionDepth,
        require_locator: bool,
    ) -> Result<Resolution> {
        if response.entries.is_empty() {
            return Err(ResolutionError::NotFound(
                "upstream returned no results".to_string(),
            ));
        }

        // Every entry withheld is how the upstream answers a bot check.
        if response.entries.iter().all(Option::is_none) {
            return Err(ResolutionError::Throttled(
                "upstream withheld every entry".to_string(),
            ));
        }

        let issued_at = self.clock.now();
        let mut tracks: Vec<TrackMetadata> = response
            .entries
            .into_iter()
            .flatten()
            .filter_map(|entry| TrackMetadata::from_entry(entry, depth, issued_at))
            .filter(|track| !require_locator || track.locator.is_some())
            .collect();

        if tracks.is_empty() {
            let reason = if require_locator {
                "no candidate carried a stream locator"
            } else {
                "no candidate carried an identifier"
            };
            return Err(ResolutionError::NotFound(reason.to_string()));
        }

        tracks.truncate(self.playlist_limit as usize);
        let is_playlist = response.is_collection && tracks.len() > 1;

        Ok(Resolution {
            tracks,
            is_playlist,
        })
    }
}

#[async_trait]
impl TrackResolver for Resolver {
    #[instrument(skip(self))]
    async fn resolve(&self, query: &str) -> Result<Resolution> {
        let query = Query::parse(query)?;
        let target = query.target(&self.policy.search_prefix);
        debug!(direct = query.is_direct(), "Resolving query");

        self.cascade(&target, self.strategies.iter().collect(), false)
            .await
    }

    #[instrument(skip(self))]
    async fn refresh(&self, canonical_url: &str) -> Result<TrackMetadata> {
        let strategies: Vec<_> = self
            .strategies
            .iter()
            .filter(|strategy| strategy.yields_locator())
            .collect();

        let resolution = self.cascade(canonical_url, strategies, true).await?;
        resolution.into_first().ok_or_else(|| {
            ResolutionError::NotFound("re-resolution produced no candidate".to_string())
        })
    }
}

impl std::fmt::Debug for Resolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolver")
            .field("strategies", &self.strategies.len())
            .field("identities", &self.identities.len())
            .field("policy", &self.policy)
            .field("playlist_limit", &self.playlist_limit)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_without_id_is_rejected() {
        let entry = ExtractedEntry {
            title: Some("Untitled".into()),
            ..Default::default()
        };
        assert!(TrackMetadata::from_entry(entry, ExtractionDepth::Full, Utc::now()).is_none());
    }

    #[test]
    fn test_flat_entry_has_canonical_url_but_no_locator() {
        let entry = ExtractedEntry {
            id: Some("dQw4w9WgXcQ".into()),
            url: Some("https://www.youtube.com/watch?v=dQw4w9WgXcQ".into()),
            ..Default::default()
        };
        let track = TrackMetadata::from_entry(entry, ExtractionDepth::Flat, Utc::now()).unwrap();

        assert_eq!(
            track.canonical_url,
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ"
        );
        assert!(track.locator.is_none());
        assert_eq!(track.title, UNKNOWN_TITLE);
        assert_eq!(track.uploader, UNKNOWN_UPLOADER);
        assert_eq!(track.duration_secs, 0);
    }

    #[test]
    fn test_full_entry_parses_locator_expiry() {
        let entry = ExtractedEntry {
            id: Some("abc".into()),
            duration: Some(212.6),
            webpage_url: Some("https://www.youtube.com/watch?v=abc".into()),
            url: Some("https://rr1.googlevideo.com/videoplayback?expire=1700000000".into()),
            ..Default::default()
        };
        let track = TrackMetadata::from_entry(entry, ExtractionDepth::Full, Utc::now()).unwrap();

        assert_eq!(track.duration_secs, 213);
        let locator = track.locator.unwrap();
        assert_eq!(locator.expires_at.unwrap().timestamp(), 1_700_000_000);
    }
}
