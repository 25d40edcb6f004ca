//! # Event Bus System
//!
//! Broadcast channel for everything a session does that the chat layer may
//! want to announce: tracks starting, queues draining, failures after the
//! retry budget is spent.
//!
//! ## Overview
//!
//! ```text
//! ┌────────────────┐
//! │ Session actor  │──┐
//! └────────────────┘  │
//! ┌────────────────┐  │      ┌─────────────┐      ┌──────────────────┐
//! │ Session actor  │──┼─────>│  EventBus   │─────>│  Subscriber 1    │
//! └────────────────┘  │      │ (broadcast) │      │  (chat notifier) │
//! ┌────────────────┐  │      └─────────────┘      └──────────────────┘
//! │  CoreService   │──┘             │             ┌──────────────────┐
//! └────────────────┘                └────────────>│  Subscriber N    │
//!                                                 └──────────────────┘
//! ```
//!
//! Events are the only way failures inside a session's self-driving advance
//! loop reach a user. Those failures have no command in flight to return to,
//! so [`PlaybackEvent::Error`] carries the channel that originated playback
//! and the host posts the notification there.
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, EventBus, EventStream, PlaybackEvent};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let bus = EventBus::new(100);
//! let mut stream = EventStream::new(bus.subscribe()).filter(|e| e.session_id() == 7);
//!
//! bus.emit(CoreEvent::Playback(PlaybackEvent::Paused { session_id: 7 }));
//!
//! let event = stream.recv().await.unwrap();
//! assert_eq!(event.notify_channel(), None);
//! # }
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

use tokio::sync::broadcast::error::{RecvError, TryRecvError};

pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event enum.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    Playback(PlaybackEvent),
    Queue(QueueEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Playback(e) => e.description(),
            CoreEvent::Queue(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Playback(PlaybackEvent::Error { .. }) => EventSeverity::Error,
            CoreEvent::Playback(PlaybackEvent::TrackFailed { .. }) => EventSeverity::Warning,
            CoreEvent::Playback(PlaybackEvent::Started { .. }) => EventSeverity::Info,
            CoreEvent::Queue(QueueEvent::PlaylistEnqueued { .. }) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }

    /// The session the event belongs to.
    pub fn session_id(&self) -> u64 {
        match self {
            CoreEvent::Playback(e) => e.session_id(),
            CoreEvent::Queue(e) => e.session_id(),
        }
    }

    /// Channel the host should announce this event in, when playback was
    /// requested from one. Only track starts and give-ups are announced.
    pub fn notify_channel(&self) -> Option<u64> {
        match self {
            CoreEvent::Playback(PlaybackEvent::Started { channel_id, .. })
            | CoreEvent::Playback(PlaybackEvent::Error { channel_id, .. }) => *channel_id,
            _ => None,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Playback Events
// ============================================================================

/// Now-playing transitions and failures.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event")]
pub enum PlaybackEvent {
    /// A track began producing audio.
    Started {
        session_id: u64,
        title: String,
        source_url: String,
        duration_secs: u64,
        /// Channel to announce in, if the track was requested from one
        channel_id: Option<u64>,
    },
    Paused {
        session_id: u64,
    },
    Resumed {
        session_id: u64,
    },
    /// Output stopped and the queue was cleared.
    Stopped {
        session_id: u64,
    },
    /// An acquisition failed; the session will advance again.
    TrackFailed {
        session_id: u64,
        title: String,
        message: String,
        /// Consecutive failures so far, starting at 1
        attempt: u32,
    },
    /// The retry budget is spent and the session fell back to idle.
    Error {
        session_id: u64,
        title: Option<String>,
        message: String,
        channel_id: Option<u64>,
    },
    /// Nothing left to play.
    QueueFinished {
        session_id: u64,
    },
}

impl PlaybackEvent {
    pub fn description(&self) -> &str {
        match self {
            PlaybackEvent::Started { .. } => "Playback started",
            PlaybackEvent::Paused { .. } => "Playback paused",
            PlaybackEvent::Resumed { .. } => "Playback resumed",
            PlaybackEvent::Stopped { .. } => "Playback stopped",
            PlaybackEvent::TrackFailed { .. } => "Track failed to start",
            PlaybackEvent::Error { .. } => "Playback gave up after repeated failures",
            PlaybackEvent::QueueFinished { .. } => "Queue finished",
        }
    }

    pub fn session_id(&self) -> u64 {
        match self {
            PlaybackEvent::Started { session_id, .. }
            | PlaybackEvent::Paused { session_id }
            | PlaybackEvent::Resumed { session_id }
            | PlaybackEvent::Stopped { session_id }
            | PlaybackEvent::TrackFailed { session_id, .. }
            | PlaybackEvent::Error { session_id, .. }
            | PlaybackEvent::QueueFinished { session_id } => *session_id,
        }
    }
}

// ============================================================================
// Queue Events
// ============================================================================

/// Queue mutations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum QueueEvent {
    Enqueued {
        session_id: u64,
        title: String,
        /// 1-based position in the queue
        position: usize,
    },
    PlaylistEnqueued {
        session_id: u64,
        inserted: usize,
        skipped_too_long: usize,
        skipped_for_capacity: usize,
    },
    Removed {
        session_id: u64,
        title: String,
        position: usize,
    },
    Moved {
        session_id: u64,
        from: usize,
        to: usize,
    },
    Shuffled {
        session_id: u64,
    },
    Cleared {
        session_id: u64,
        removed: usize,
    },
}

impl QueueEvent {
    pub fn description(&self) -> &str {
        match self {
            QueueEvent::Enqueued { .. } => "Track enqueued",
            QueueEvent::PlaylistEnqueued { .. } => "Playlist enqueued",
            QueueEvent::Removed { .. } => "Track removed from queue",
            QueueEvent::Moved { .. } => "Track moved",
            QueueEvent::Shuffled { .. } => "Queue shuffled",
            QueueEvent::Cleared { .. } => "Queue cleared",
        }
    }

    pub fn session_id(&self) -> u64 {
        match self {
            QueueEvent::Enqueued { session_id, .. }
            | QueueEvent::PlaylistEnqueued { session_id, .. }
            | QueueEvent::Removed { session_id, .. }
            | QueueEvent::Moved { session_id, .. }
            | QueueEvent::Shuffled { session_id }
            | QueueEvent::Cleared { session_id, .. } => *session_id,
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Broadcast bus shared by every session. Cloning shares the channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// A subscriber more than `capacity` events behind loses the oldest ones.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish `event`. Returns how many subscribers it reached; zero when
    /// nobody is listening, which is not an error for the engine.
    pub fn emit(&self, event: CoreEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    /// Raw receiver. Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream
// ============================================================================

type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// Subscriber for hosts that announce events in chat.
///
/// A slow host skips what it missed instead of failing: the gap is counted
/// in [`missed`](Self::missed) and the stream carries on with the oldest
/// event still buffered.
///
/// ```rust
/// use core_runtime::events::{EventBus, EventStream};
///
/// let event_bus = EventBus::new(100);
/// let guild_stream = EventStream::new(event_bus.subscribe())
///     .filter(|event| event.session_id() == 42);
/// ```
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
    missed: u64,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
            missed: 0,
        }
    }

    /// Only pass events matching `predicate`.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    /// Events dropped so far because this stream fell behind.
    pub fn missed(&self) -> u64 {
        self.missed
    }

    /// Next matching event, or `None` once the engine is gone.
    pub async fn recv(&mut self) -> Option<CoreEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if self.accepts(&event) => return Some(event),
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => self.missed += skipped,
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Next matching event already buffered, without waiting.
    pub fn try_recv(&mut self) -> Option<CoreEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) if self.accepts(&event) => return Some(event),
                Ok(_) => {}
                Err(TryRecvError::Lagged(skipped)) => self.missed += skipped,
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }

    fn accepts(&self, event: &CoreEvent) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(event))
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("filtered", &self.filter.is_some())
            .field("missed", &self.missed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn started(session_id: u64) -> CoreEvent {
        CoreEvent::Playback(PlaybackEvent::Started {
            session_id,
            title: "Song".to_string(),
            source_url: "https://www.youtube.com/watch?v=abc".to_string(),
            duration_secs: 200,
            channel_id: Some(9),
        })
    }

    #[test]
    fn test_emit_without_subscribers_reaches_nobody() {
        let bus = EventBus::new(10);
        assert_eq!(bus.emit(started(1)), 0);
    }

    #[tokio::test]
    async fn test_emit_reaches_every_subscriber() {
        let bus = EventBus::new(10);
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();

        assert_eq!(bus.emit(started(1)), 2);
        assert_eq!(first.recv().await.unwrap(), started(1));
        assert_eq!(second.recv().await.unwrap(), started(1));
    }

    #[tokio::test]
    async fn test_stream_filter_by_session() {
        let bus = EventBus::new(10);
        let mut stream = EventStream::new(bus.subscribe()).filter(|e| e.session_id() == 2);

        bus.emit(started(1));
        bus.emit(CoreEvent::Queue(QueueEvent::Shuffled { session_id: 2 }));

        let event = stream.recv().await.unwrap();
        assert_eq!(event, CoreEvent::Queue(QueueEvent::Shuffled { session_id: 2 }));
    }

    #[tokio::test]
    async fn test_try_recv_empty() {
        let bus = EventBus::new(10);
        let mut stream = EventStream::new(bus.subscribe());
        assert!(stream.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_lagging_stream_skips_ahead() {
        let bus = EventBus::new(2);
        let mut stream = EventStream::new(bus.subscribe());

        for id in 0..5 {
            bus.emit(started(id));
        }

        assert_eq!(stream.recv().await, Some(started(3)));
        assert_eq!(stream.missed(), 3);
        assert_eq!(stream.try_recv(), Some(started(4)));
        assert_eq!(stream.try_recv(), None);
    }

    #[tokio::test]
    async fn test_stream_ends_when_bus_dropped() {
        let bus = EventBus::new(4);
        let mut stream = EventStream::new(bus.subscribe());
        drop(bus);
        assert_eq!(stream.recv().await, None);
    }

    #[test]
    fn test_notify_channel() {
        assert_eq!(started(1).notify_channel(), Some(9));
        let failed = CoreEvent::Playback(PlaybackEvent::TrackFailed {
            session_id: 1,
            title: "Song".to_string(),
            message: "403".to_string(),
            attempt: 1,
        });
        assert_eq!(failed.notify_channel(), None);
    }

    #[test]
    fn test_event_severity() {
        let error = CoreEvent::Playback(PlaybackEvent::Error {
            session_id: 1,
            title: None,
            message: "gave up".to_string(),
            channel_id: None,
        });
        assert_eq!(error.severity(), EventSeverity::Error);
        assert_eq!(started(1).severity(), EventSeverity::Info);
        assert_eq!(
            CoreEvent::Queue(QueueEvent::Shuffled { session_id: 1 }).severity(),
            EventSeverity::Debug
        );
    }

    #[test]
    fn test_event_serialization() {
        let event = CoreEvent::Queue(QueueEvent::PlaylistEnqueued {
            session_id: 3,
            inserted: 2,
            skipped_too_long: 1,
            skipped_for_capacity: 0,
        });

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"Queue\""));
        assert!(json.contains("\"event\":\"PlaylistEnqueued\""));

        let back: CoreEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }
}
