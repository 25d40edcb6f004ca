//! # Engine Configuration
//!
//! Configuration for the queue engine: the host capabilities it runs on and
//! the policies that bound queues, retries and resolution pacing.
//!
//! ## Overview
//!
//! [`EngineConfig`] is built with [`EngineConfigBuilder`]. `build()` fails
//! fast when a required capability is missing and validates both policy
//! structs, so a config that exists is a config the engine can run with.
//!
//! ## Required Capabilities
//!
//! - `Transcoder` - Always required. It owns the voice connection's frame
//!   sink, so there is no sensible default.
//!
//! ## Optional Capabilities (with defaults)
//!
//! - `MediaExtractor` - desktop default: `yt-dlp` subprocess (`desktop-shims`)
//! - `Clock` - defaults to [`SystemClock`]
//! - `LoggerSink` - optional mirror for structured logs
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::{EngineConfig, PlaybackPolicy};
//! use std::sync::Arc;
//!
//! let config = EngineConfig::builder()
//!     .transcoder(Arc::new(my_transcoder))
//!     .playback_policy(PlaybackPolicy {
//!         max_queue_size: 200,
//!         ..PlaybackPolicy::default()
//!     })
//!     .build()?;
//! ```
//!
//! Policies deserialize with per-field defaults, so a host may load a partial
//! JSON document:
//!
//! ```ignore
//! let policy: PlaybackPolicy = serde_json::from_str(r#"{ "max_retries": 5 }"#)?;
//! ```

use crate::error::{Error, Result};
use bridge_traits::{Clock, LoggerSink, MediaExtractor, SystemClock, Transcoder};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Engine configuration.
///
/// Holds every capability and policy the engine needs. Construct it with
/// [`EngineConfig::builder`].
#[derive(Clone)]
pub struct EngineConfig {
    /// Upstream extraction service
    pub extractor: Arc<dyn MediaExtractor>,

    /// Stream-to-frames converter (required)
    pub transcoder: Arc<dyn Transcoder>,

    /// Time source for locator expiry checks
    pub clock: Arc<dyn Clock>,

    /// Optional host log mirror
    pub logger_sink: Option<Arc<dyn LoggerSink>>,

    pub playback: PlaybackPolicy,

    pub resolver: ResolverPolicy,
}

impl std::fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineConfig")
            .field("extractor", &"MediaExtractor { ... }")
            .field("transcoder", &"Transcoder { ... }")
            .field("clock", &"Clock { ... }")
            .field(
                "logger_sink",
                &self.logger_sink.as_ref().map(|_| "LoggerSink { ... }"),
            )
            .field("playback", &self.playback)
            .field("resolver", &self.resolver)
            .finish()
    }
}

impl EngineConfig {
    /// Creates a new builder for constructing an `EngineConfig`.
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }

    /// Validates both policies.
    pub fn validate(&self) -> Result<()> {
        self.playback
            .validate()
            .map_err(|e| Error::Config(format!("Invalid playback policy: {}", e)))?;
        self.resolver
            .validate()
            .map_err(|e| Error::Config(format!("Invalid resolver policy: {}", e)))?;
        Ok(())
    }
}

// ============================================================================
// Playback Policy
// ============================================================================

/// Bounds on queues, volume, and acquisition retries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackPolicy {
    /// Maximum number of queued tracks per session.
    ///
    /// Default: 100.
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,

    /// Tracks longer than this are rejected (single play) or skipped
    /// (playlist batches). Zero-length tracks are live or unknown and are
    /// always accepted.
    ///
    /// Default: 3600 seconds.
    #[serde(default = "default_max_song_length_secs")]
    pub max_song_length_secs: u64,

    /// Volume a new session starts at, in `[0.0, 1.0]`.
    ///
    /// Default: 0.5.
    #[serde(default = "default_volume")]
    pub default_volume: f32,

    /// Highest user-facing volume percentage accepted by `set_volume`.
    ///
    /// Default: 100.
    #[serde(default = "default_max_volume_percent")]
    pub max_volume_percent: u32,

    /// Consecutive acquisition failures tolerated before a session gives up
    /// and falls back to idle.
    ///
    /// Default: 3.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Pause between a failed acquisition and the next advance.
    ///
    /// Default: 1 second.
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff: Duration,

    /// A transcoder that has produced no audio after this long is treated as
    /// hung and the track fails.
    ///
    /// Default: 15 seconds.
    #[serde(default = "default_transcoder_start_timeout")]
    pub transcoder_start_timeout: Duration,

    /// Maximum entries taken from one playlist.
    ///
    /// Default: 50.
    #[serde(default = "default_playlist_limit")]
    pub playlist_limit: u32,

    /// Event bus buffer per subscriber.
    ///
    /// Default: 100.
    #[serde(default = "default_event_buffer_size")]
    pub event_buffer_size: usize,
}

impl Default for PlaybackPolicy {
    fn default() -> Self {
        Self {
            max_queue_size: default_max_queue_size(),
            max_song_length_secs: default_max_song_length_secs(),
            default_volume: default_volume(),
            max_volume_percent: default_max_volume_percent(),
            max_retries: default_max_retries(),
            retry_backoff: default_retry_backoff(),
            transcoder_start_timeout: default_transcoder_start_timeout(),
            playlist_limit: default_playlist_limit(),
            event_buffer_size: default_event_buffer_size(),
        }
    }
}

impl PlaybackPolicy {
    /// Validate policy values.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.max_queue_size == 0 {
            return Err("max_queue_size must be > 0".to_string());
        }

        if !(0.0..=1.0).contains(&self.default_volume) {
            return Err("default_volume must be between 0.0 and 1.0".to_string());
        }

        if self.max_volume_percent == 0 || self.max_volume_percent > 100 {
            return Err("max_volume_percent must be between 1 and 100".to_string());
        }

        if self.max_retries == 0 {
            return Err("max_retries must be > 0".to_string());
        }

        if self.transcoder_start_timeout.is_zero() {
            return Err("transcoder_start_timeout must be > 0".to_string());
        }

        if self.playlist_limit == 0 {
            return Err("playlist_limit must be > 0".to_string());
        }

        if self.event_buffer_size == 0 {
            return Err("event_buffer_size must be > 0".to_string());
        }

        Ok(())
    }

    /// Whether a track of `duration_secs` may be queued. Zero means unknown.
    pub fn accepts_duration(&self, duration_secs: u64) -> bool {
        duration_secs <= self.max_song_length_secs
    }
}

fn default_max_queue_size() -> usize {
    100
}

fn default_max_song_length_secs() -> u64 {
    3600
}

fn default_volume() -> f32 {
    0.5
}

fn default_max_volume_percent() -> u32 {
    100
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_backoff() -> Duration {
    Duration::from_secs(1)
}

fn default_transcoder_start_timeout() -> Duration {
    Duration::from_secs(15)
}

fn default_playlist_limit() -> u32 {
    50
}

fn default_event_buffer_size() -> usize {
    100
}

// ============================================================================
// Resolver Policy
// ============================================================================

/// Pacing for the extraction strategy cascade.
///
/// The delay before strategy `i` (zero-based, `i > 0`) is
/// `strategy_base_delay + strategy_delay_increment * i`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolverPolicy {
    /// Default: 3 seconds.
    #[serde(default = "default_strategy_base_delay")]
    pub strategy_base_delay: Duration,

    /// Default: 2 seconds.
    #[serde(default = "default_strategy_delay_increment")]
    pub strategy_delay_increment: Duration,

    /// Extra attempts with the same strategy after a network failure.
    ///
    /// Default: 2.
    #[serde(default = "default_transient_retries")]
    pub transient_retries: u32,

    /// Delay before retrying the same strategy after a network failure.
    ///
    /// Default: 3 seconds.
    #[serde(default = "default_transient_retry_delay")]
    pub transient_retry_delay: Duration,

    /// Search expression prefix for free-text queries.
    ///
    /// Default: `ytsearch1` (best single match).
    #[serde(default = "default_search_prefix")]
    pub search_prefix: String,
}

impl Default for ResolverPolicy {
    fn default() -> Self {
        Self {
            strategy_base_delay: default_strategy_base_delay(),
            strategy_delay_increment: default_strategy_delay_increment(),
            transient_retries: default_transient_retries(),
            transient_retry_delay: default_transient_retry_delay(),
            search_prefix: default_search_prefix(),
        }
    }
}

impl ResolverPolicy {
    /// Validate policy values.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.search_prefix.trim().is_empty() {
            return Err("search_prefix cannot be empty".to_string());
        }

        if self.search_prefix.contains(':') {
            return Err("search_prefix must not contain ':'".to_string());
        }

        if self.transient_retries > 10 {
            return Err("transient_retries exceeds maximum of 10".to_string());
        }

        Ok(())
    }

    /// Delay applied before trying the strategy at `index`.
    pub fn delay_before(&self, index: usize) -> Duration {
        if index == 0 {
            return Duration::ZERO;
        }
        self.strategy_base_delay + self.strategy_delay_increment * index as u32
    }

    /// Policy with no pacing delays, for tests and local tooling.
    pub fn immediate() -> Self {
        Self {
            strategy_base_delay: Duration::ZERO,
            strategy_delay_increment: Duration::ZERO,
            transient_retry_delay: Duration::ZERO,
            ..Self::default()
        }
    }
}

fn default_strategy_base_delay() -> Duration {
    Duration::from_secs(3)
}

fn default_strategy_delay_increment() -> Duration {
    Duration::from_secs(2)
}

fn default_transient_retries() -> u32 {
    2
}

fn default_transient_retry_delay() -> Duration {
    Duration::from_secs(3)
}

fn default_search_prefix() -> String {
    "ytsearch1".to_string()
}

// ============================================================================
// Capability Defaults
// ============================================================================

fn transcoder_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "Transcoder".to_string(),
        message: "A Transcoder implementation is required to produce audio. \
                 Desktop: construct bridge_desktop::FfmpegTranscoder with the voice \
                 connection's AudioFrameSink and pass it to .transcoder()."
            .to_string(),
    }
}

#[cfg(feature = "desktop-shims")]
fn provide_default_extractor() -> Result<Arc<dyn MediaExtractor>> {
    use bridge_desktop::YtDlpExtractor;

    let extractor: Arc<dyn MediaExtractor> = Arc::new(YtDlpExtractor::new());
    Ok(extractor)
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_extractor() -> Result<Arc<dyn MediaExtractor>> {
    Err(Error::CapabilityMissing {
        capability: "MediaExtractor".to_string(),
        message: "No MediaExtractor implementation provided. \
                 Desktop: enable the 'desktop-shims' feature to use the yt-dlp extractor. \
                 Other hosts: inject an extractor with .extractor()."
            .to_string(),
    })
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for [`EngineConfig`].
#[derive(Default)]
pub struct EngineConfigBuilder {
    extractor: Option<Arc<dyn MediaExtractor>>,
    transcoder: Option<Arc<dyn Transcoder>>,
    clock: Option<Arc<dyn Clock>>,
    logger_sink: Option<Arc<dyn LoggerSink>>,
    playback: Option<PlaybackPolicy>,
    resolver: Option<ResolverPolicy>,
}

impl EngineConfigBuilder {
    /// Sets the media extractor.
    ///
    /// If not provided, the `yt-dlp` extractor is used when the
    /// `desktop-shims` feature is enabled.
    pub fn extractor(mut self, extractor: Arc<dyn MediaExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    /// Sets the transcoder (required).
    pub fn transcoder(mut self, transcoder: Arc<dyn Transcoder>) -> Self {
        self.transcoder = Some(transcoder);
        self
    }

    /// Sets the time source. Defaults to [`SystemClock`].
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn logger_sink(mut self, sink: Arc<dyn LoggerSink>) -> Self {
        self.logger_sink = Some(sink);
        self
    }

    pub fn playback_policy(mut self, policy: PlaybackPolicy) -> Self {
        self.playback = Some(policy);
        self
    }

    pub fn resolver_policy(mut self, policy: ResolverPolicy) -> Self {
        self.resolver = Some(policy);
        self
    }

    /// Builds the final `EngineConfig`.
    ///
    /// # Errors
    ///
    /// - [`Error::CapabilityMissing`] when no transcoder was provided, or no
    ///   extractor was provided and no desktop default is compiled in
    /// - [`Error::Config`] when a policy value is out of range
    pub fn build(self) -> Result<EngineConfig> {
        let transcoder = self.transcoder.ok_or_else(transcoder_missing_error)?;

        let extractor = match self.extractor {
            Some(extractor) => extractor,
            None => provide_default_extractor()?,
        };

        let config = EngineConfig {
            extractor,
            transcoder,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            logger_sink: self.logger_sink,
            playback: self.playback.unwrap_or_default(),
            resolver: self.resolver.unwrap_or_default(),
        };

        config.validate()?;

        Ok(config)
    }
}
