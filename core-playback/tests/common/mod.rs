//! Hand-written fakes for the resolver and transcoder boundaries.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bridge_traits::{
    BridgeError, Clock, CompletionCallback, OutputCompletion, OutputEnd, OutputHandle,
    OutputRequest, Transcoder, TranscoderError,
};
use chrono::{DateTime, TimeZone, Utc};
use core_playback::{
    Requester, SessionContext, SessionHandle, SessionId, SessionPlayer, StreamAcquirer, Track,
    TrackId,
};
use core_resolver::{Resolution, ResolutionError, StreamLocator, TrackMetadata, TrackResolver};
use core_runtime::config::PlaybackPolicy;
use core_runtime::events::{CoreEvent, EventBus, PlaybackEvent};
use parking_lot::Mutex;
use tokio::sync::broadcast::Receiver;

pub const NOW: i64 = 1_700_000_000;

pub fn now() -> DateTime<Utc> {
    Utc.timestamp_opt(NOW, 0).unwrap()
}

pub struct FixedClock;

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        now()
    }
}

pub fn fresh_locator(tag: &str) -> StreamLocator {
    StreamLocator::parse(
        format!("https://media.example/{}?expire={}", tag, NOW + 21_600),
        now(),
    )
}

pub fn expired_locator(tag: &str) -> StreamLocator {
    StreamLocator::parse(
        format!("https://media.example/{}?expire={}", tag, NOW - 10),
        now(),
    )
}

/// Locator without an `expire` parameter.
pub fn unknown_expiry_locator(tag: &str) -> StreamLocator {
    StreamLocator::parse(format!("https://media.example/{}", tag), now())
}

pub fn track(title: &str, duration_secs: u64, locator: Option<StreamLocator>) -> Track {
    Track {
        id: TrackId::new(),
        source_id: title.to_lowercase(),
        title: title.to_string(),
        duration_secs,
        uploader: "Uploader".to_string(),
        thumbnail_url: None,
        requester: Requester::new(7, "alice"),
        canonical_url: format!("https://www.youtube.com/watch?v={}", title),
        locator,
        origin_channel: Some(99),
    }
}

pub fn playable(title: &str) -> Track {
    track(title, 120, Some(fresh_locator(title)))
}

// ============================================================================
// Fake Resolver
// ============================================================================

#[derive(Default)]
pub struct FakeResolver {
    pub refresh_calls: AtomicUsize,
    pub fail_refresh: Mutex<Option<ResolutionError>>,
    pub refresh_delay: Mutex<Option<Duration>>,
}

impl FakeResolver {
    pub fn failing(error: ResolutionError) -> Self {
        let resolver = Self::default();
        *resolver.fail_refresh.lock() = Some(error);
        resolver
    }

    pub fn slow(delay: Duration) -> Self {
        let resolver = Self::default();
        *resolver.refresh_delay.lock() = Some(delay);
        resolver
    }

    pub fn refresh_count(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TrackResolver for FakeResolver {
    async fn resolve(&self, query: &str) -> core_resolver::Result<Resolution> {
        Err(ResolutionError::NotFound(query.to_string()))
    }

    async fn refresh(&self, canonical_url: &str) -> core_resolver::Result<TrackMetadata> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.refresh_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = self.fail_refresh.lock().clone() {
            return Err(error);
        }
        Ok(TrackMetadata {
            id: "refreshed".to_string(),
            title: "Refreshed".to_string(),
            duration_secs: 120,
            uploader: "Uploader".to_string(),
            thumbnail_url: None,
            canonical_url: canonical_url.to_string(),
            locator: Some(fresh_locator("refreshed")),
        })
    }
}

// ============================================================================
// Fake Transcoder
// ============================================================================

#[derive(Default)]
pub struct TranscoderLog {
    pub requests: Vec<OutputRequest>,
    pub handles: Vec<OutputHandle>,
    pub stopped: Vec<OutputHandle>,
    pub paused: Vec<OutputHandle>,
    pub resumed: Vec<OutputHandle>,
    pub volumes: Vec<(OutputHandle, f32)>,
}

/// Records calls and keeps each output's completion callback so tests can
/// end outputs on demand.
#[derive(Default)]
pub struct FakeTranscoder {
    pub log: Mutex<TranscoderLog>,
    script: Mutex<VecDeque<TranscoderError>>,
    callbacks: Mutex<HashMap<OutputHandle, CompletionCallback>>,
    start_delay: Mutex<Option<Duration>>,
}

impl FakeTranscoder {
    /// The next starts fail with these errors, in order.
    pub fn fail_next(&self, errors: impl IntoIterator<Item = TranscoderError>) {
        self.script.lock().extend(errors);
    }

    pub fn set_start_delay(&self, delay: Duration) {
        *self.start_delay.lock() = Some(delay);
    }

    pub fn start_count(&self) -> usize {
        self.log.lock().requests.len()
    }

    pub fn last_handle(&self) -> Option<OutputHandle> {
        self.log.lock().handles.last().copied()
    }

    /// End `handle` as if the input ran out.
    pub fn finish(&self, handle: OutputHandle) {
        self.complete(handle, OutputEnd::Finished);
    }

    fn complete(&self, handle: OutputHandle, end: OutputEnd) {
        let callback = self.callbacks.lock().remove(&handle);
        if let Some(callback) = callback {
            callback(OutputCompletion { handle, end });
        }
    }
}

#[async_trait]
impl Transcoder for FakeTranscoder {
    async fn start_output(
        &self,
        request: OutputRequest,
        on_complete: CompletionCallback,
    ) -> Result<OutputHandle, TranscoderError> {
        let delay = *self.start_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.log.lock().requests.push(request);
        if let Some(error) = self.script.lock().pop_front() {
            return Err(error);
        }

        let handle = OutputHandle::new();
        self.log.lock().handles.push(handle);
        self.callbacks.lock().insert(handle, on_complete);
        Ok(handle)
    }

    async fn stop(&self, handle: OutputHandle) -> Result<(), BridgeError> {
        self.log.lock().stopped.push(handle);
        self.complete(handle, OutputEnd::Stopped);
        Ok(())
    }

    async fn pause(&self, handle: OutputHandle) -> Result<(), BridgeError> {
        self.log.lock().paused.push(handle);
        Ok(())
    }

    async fn resume(&self, handle: OutputHandle) -> Result<(), BridgeError> {
        self.log.lock().resumed.push(handle);
        Ok(())
    }

    async fn set_volume(&self, handle: OutputHandle, volume: f32) -> Result<(), BridgeError> {
        self.log.lock().volumes.push((handle, volume));
        Ok(())
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub resolver: Arc<FakeResolver>,
    pub transcoder: Arc<FakeTranscoder>,
    pub events: EventBus,
    pub context: SessionContext,
}

impl Harness {
    pub fn new(resolver: FakeResolver) -> Self {
        Self::with_policy(resolver, PlaybackPolicy::default())
    }

    pub fn with_policy(resolver: FakeResolver, policy: PlaybackPolicy) -> Self {
        let resolver = Arc::new(resolver);
        let transcoder = Arc::new(FakeTranscoder::default());
        let events = EventBus::new(256);
        let acquirer = StreamAcquirer::new(
            resolver.clone(),
            transcoder.clone(),
            Arc::new(FixedClock),
            policy.transcoder_start_timeout,
        );
        let context = SessionContext {
            acquirer: Arc::new(acquirer),
            transcoder: transcoder.clone(),
            events: events.clone(),
            policy,
        };
        Self {
            resolver,
            transcoder,
            events,
            context,
        }
    }

    pub fn spawn(&self) -> SessionHandle {
        SessionPlayer::spawn(SessionId(1), self.context.clone())
    }
}

/// Next playback event, skipping queue events.
pub async fn next_playback(rx: &mut Receiver<CoreEvent>) -> PlaybackEvent {
    tokio::time::timeout(Duration::from_secs(300), async {
        loop {
            match rx.recv().await {
                Ok(CoreEvent::Playback(event)) => return event,
                Ok(_) => continue,
                Err(error) => panic!("event stream failed: {error}"),
            }
        }
    })
    .await
    .expect("timed out waiting for a playback event")
}

pub fn started_title(event: &PlaybackEvent) -> &str {
    match event {
        PlaybackEvent::Started { title, .. } => title,
        other => panic!("expected Started, got {other:?}"),
    }
}
