//! Core service façade and bootstrap helpers.
//!
//! [`CoreService`] is the boundary the chat/command layer talks to. It
//! resolves queries, applies request-level policy (track length, playlist
//! handling) and forwards everything else to the session actors. Results are
//! structured values or typed [`CoreError`]s; no user-facing text is
//! produced here.
//!
//! Desktop hosts typically enable the `desktop-shims` feature (which depends
//! on `bridge-desktop`) and call [`bootstrap_desktop`] with their voice
//! connection's frame sink.

pub mod error;

pub use error::{CoreError, Result};

use std::sync::Arc;

use core_playback::{
    BatchOutcome, Requester, SessionContext, SessionHandle, SessionId, SessionRegistry,
    SessionSnapshot, ShuffleOutcome, StreamAcquirer, Track,
};
use core_resolver::{ResolutionError, Resolver, TrackResolver};
use core_runtime::config::{EngineConfig, PlaybackPolicy};
use core_runtime::events::{EventBus, EventStream};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

#[cfg(feature = "desktop-shims")]
pub use bridge_desktop::AudioFrameSink;

/// Who asked, and where to report back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    pub requester: Requester,
    /// Channel that failure notifications for this request should go to
    pub channel_id: Option<u64>,
}

impl RequestContext {
    pub fn new(requester: Requester, channel_id: Option<u64>) -> Self {
        Self {
            requester,
            channel_id,
        }
    }
}

/// Result of [`CoreService::play`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayOutcome {
    pub track: Track,
    /// 1-based queue position at insertion
    pub position: usize,
    /// The session was idle and is now acquiring this track
    pub started: bool,
}

/// Primary façade exposed to host applications.
#[derive(Clone)]
pub struct CoreService {
    inner: Arc<ServiceInner>,
}

struct ServiceInner {
    registry: SessionRegistry,
    resolver: Arc<dyn TrackResolver>,
    events: EventBus,
    policy: PlaybackPolicy,
}

impl CoreService {
    /// Build the service from a validated config, using the strategy-cascade
    /// [`Resolver`] over the config's extractor.
    pub fn new(config: EngineConfig) -> Result<Self> {
        let resolver = Resolver::new(config.extractor.clone(), config.resolver.clone())
            .with_clock(config.clock.clone())
            .with_playlist_limit(config.playback.playlist_limit);
        Self::with_resolver(config, Arc::new(resolver))
    }

    /// Build the service around a custom resolver.
    pub fn with_resolver(config: EngineConfig, resolver: Arc<dyn TrackResolver>) -> Result<Self> {
        config.validate()?;

        let policy = config.playback.clone();
        let events = EventBus::new(policy.event_buffer_size);
        let acquirer = StreamAcquirer::new(
            resolver.clone(),
            config.transcoder.clone(),
            config.clock.clone(),
            policy.transcoder_start_timeout,
        );
        let context = SessionContext {
            acquirer: Arc::new(acquirer),
            transcoder: config.transcoder.clone(),
            events: events.clone(),
            policy: policy.clone(),
        };

        info!(
            max_queue_size = policy.max_queue_size,
            max_retries = policy.max_retries,
            "Core service initialized"
        );

        Ok(Self {
            inner: Arc::new(ServiceInner {
                registry: SessionRegistry::new(context),
                resolver,
                events,
                policy,
            }),
        })
    }

    pub fn policy(&self) -> &PlaybackPolicy {
        &self.inner.policy
    }

    fn session(&self, session: SessionId) -> SessionHandle {
        self.inner.registry.get_or_create(session)
    }

    // ------------------------------------------------------------------------
    // Enqueueing
    // ------------------------------------------------------------------------

    /// Resolve `query` and enqueue the best match.
    ///
    /// A playlist URL enqueues its first entry only; use
    /// [`enqueue_playlist`](Self::enqueue_playlist) for the whole list.
    ///
    /// A `stop` that lands while the query is resolving wins: the result is
    /// dropped and this returns
    /// [`PlaybackError::Cancelled`](core_playback::PlaybackError::Cancelled).
    #[instrument(skip(self, request), fields(session_id = session.0))]
    pub async fn play(
        &self,
        session: SessionId,
        query: &str,
        request: RequestContext,
    ) -> Result<PlayOutcome> {
        let handle = self.session(session);
        let ticket = handle.begin_request().await?;

        let metadata = self
            .inner
            .resolver
            .resolve(query)
            .await?
            .into_first()
            .ok_or_else(|| ResolutionError::NotFound(query.to_string()))?;

        if !self.inner.policy.accepts_duration(metadata.duration_secs) {
            return Err(CoreError::TrackTooLong {
                title: metadata.title,
                duration_secs: metadata.duration_secs,
                max_secs: self.inner.policy.max_song_length_secs,
            });
        }

        let track = Track::from_metadata(metadata, request.requester)
            .with_origin_channel(request.channel_id);
        let outcome = handle.enqueue_with_ticket(ticket, track.clone()).await?;

        Ok(PlayOutcome {
            track,
            position: outcome.position,
            started: outcome.started,
        })
    }

    /// Resolve a playlist URL and enqueue its entries in order.
    ///
    /// Over-long entries and entries past the queue capacity are skipped and
    /// counted in the returned report. Like [`play`](Self::play), a `stop`
    /// during resolution cancels the request.
    #[instrument(skip(self, request), fields(session_id = session.0))]
    pub async fn enqueue_playlist(
        &self,
        session: SessionId,
        url: &str,
        request: RequestContext,
    ) -> Result<BatchOutcome> {
        let handle = self.session(session);
        let ticket = handle.begin_request().await?;

        let resolution = match self.inner.resolver.resolve(url).await {
            Ok(resolution) => resolution,
            Err(ResolutionError::NotFound(_)) => return Err(CoreError::EmptyPlaylist),
            Err(error) => return Err(error.into()),
        };
        if resolution.tracks.is_empty() {
            return Err(CoreError::EmptyPlaylist);
        }

        let tracks = resolution
            .tracks
            .into_iter()
            .map(|metadata| {
                Track::from_metadata(metadata, request.requester.clone())
                    .with_origin_channel(request.channel_id)
            })
            .collect();

        Ok(handle.enqueue_batch_with_ticket(ticket, tracks).await?)
    }

    // ------------------------------------------------------------------------
    // Transport
    // ------------------------------------------------------------------------

    pub async fn pause(&self, session: SessionId) -> Result<()> {
        Ok(self.session(session).pause().await?)
    }

    pub async fn resume(&self, session: SessionId) -> Result<()> {
        Ok(self.session(session).resume().await?)
    }

    pub async fn skip(&self, session: SessionId) -> Result<()> {
        Ok(self.session(session).skip().await?)
    }

    /// Stop output and clear the queue. The session stays registered.
    pub async fn stop(&self, session: SessionId) -> Result<()> {
        Ok(self.session(session).stop().await?)
    }

    /// Set volume from a percentage. Returns the applied linear gain.
    pub async fn set_volume(&self, session: SessionId, percent: u32) -> Result<f32> {
        Ok(self.session(session).set_volume(percent).await?)
    }

    // ------------------------------------------------------------------------
    // Queue
    // ------------------------------------------------------------------------

    pub async fn remove_at(&self, session: SessionId, position: usize) -> Result<Track> {
        Ok(self.session(session).remove_at(position).await?)
    }

    pub async fn move_track(&self, session: SessionId, from: usize, to: usize) -> Result<()> {
        Ok(self.session(session).move_track(from, to).await?)
    }

    pub async fn shuffle(&self, session: SessionId) -> Result<ShuffleOutcome> {
        Ok(self.session(session).shuffle().await?)
    }

    /// Drop queued tracks; the current track keeps playing.
    pub async fn clear(&self, session: SessionId) -> Result<usize> {
        Ok(self.session(session).clear().await?)
    }

    pub async fn set_repeat(&self, session: SessionId, enabled: bool) -> Result<bool> {
        Ok(self.session(session).set_repeat(Some(enabled)).await?)
    }

    pub async fn toggle_repeat(&self, session: SessionId) -> Result<bool> {
        Ok(self.session(session).set_repeat(None).await?)
    }

    pub async fn set_shuffle(&self, session: SessionId, enabled: bool) -> Result<bool> {
        Ok(self.session(session).set_shuffle(Some(enabled)).await?)
    }

    pub async fn toggle_shuffle(&self, session: SessionId) -> Result<bool> {
        Ok(self.session(session).set_shuffle(None).await?)
    }

    pub async fn now_playing(&self, session: SessionId) -> Result<Option<Track>> {
        Ok(self.queue(session).await?.current)
    }

    /// Full session snapshot: state, current track, queue and modes.
    pub async fn queue(&self, session: SessionId) -> Result<SessionSnapshot> {
        Ok(self.session(session).snapshot().await?)
    }

    // ------------------------------------------------------------------------
    // Events and lifecycle
    // ------------------------------------------------------------------------

    /// Every engine event.
    pub fn subscribe(&self) -> EventStream {
        EventStream::new(self.inner.events.subscribe())
    }

    /// Events of one session.
    pub fn subscribe_session(&self, session: SessionId) -> EventStream {
        self.subscribe()
            .filter(move |event| event.session_id() == session.0)
    }

    /// Tear the session down and forget it. Returns `false` if it did not
    /// exist.
    pub async fn leave(&self, session: SessionId) -> bool {
        self.inner.registry.remove(session).await
    }

    pub fn active_sessions(&self) -> Vec<SessionId> {
        self.inner.registry.session_ids()
    }

    /// Tear down every session.
    pub async fn shutdown(&self) {
        self.inner.registry.shutdown_all().await;
    }
}

impl std::fmt::Debug for CoreService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreService")
            .field("registry", &self.inner.registry)
            .field("policy", &self.inner.policy)
            .finish()
    }
}

/// Convenience bootstrapper for desktop hosts.
///
/// Uses `yt-dlp` for extraction and `ffmpeg` for transcoding, feeding PCM
/// into `sink`.
///
/// ```ignore
/// use core_service::bootstrap_desktop;
///
/// let core = bootstrap_desktop(voice_sink)?;
/// core.play(SessionId(guild_id), "lofi beats", request).await?;
/// ```
#[cfg(feature = "desktop-shims")]
pub fn bootstrap_desktop(sink: Arc<dyn AudioFrameSink>) -> Result<CoreService> {
    let config = EngineConfig::builder()
        .extractor(Arc::new(bridge_desktop::YtDlpExtractor::new()))
        .transcoder(Arc::new(bridge_desktop::FfmpegTranscoder::new(sink)))
        .build()?;
    CoreService::new(config)
}
