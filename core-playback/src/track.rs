//! Track model.

use std::fmt;

use bridge_traits::Clock;
use core_resolver::{StreamLocator, TrackMetadata};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Session key: one per guild / room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for SessionId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Unique identifier of a queued track instance.
///
/// The same upstream video queued twice yields two distinct ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrackId(Uuid);

impl TrackId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TrackId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The user who asked for a track.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Requester {
    pub user_id: u64,
    pub display_name: String,
}

impl Requester {
    pub fn new(user_id: u64, display_name: impl Into<String>) -> Self {
        Self {
            user_id,
            display_name: display_name.into(),
        }
    }
}

/// The unit of queueing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    pub id: TrackId,
    /// Upstream identifier
    pub source_id: String,
    pub title: String,
    /// Zero means unknown or live
    pub duration_secs: u64,
    pub uploader: String,
    pub thumbnail_url: Option<String>,
    pub requester: Requester,
    /// Stable, re-resolvable page URL
    pub canonical_url: String,
    /// Transient stream URL; refreshed in place when it expires
    pub locator: Option<StreamLocator>,
    /// Chat channel the request came from, for failure notifications
    pub origin_channel: Option<u64>,
}

impl Track {
    pub fn from_metadata(metadata: TrackMetadata, requester: Requester) -> Self {
        Self {
            id: TrackId::new(),
            source_id: metadata.id,
            title: metadata.title,
            duration_secs: metadata.duration_secs,
            uploader: metadata.uploader,
            thumbnail_url: metadata.thumbnail_url,
            requester,
            canonical_url: metadata.canonical_url,
            locator: metadata.locator,
            origin_channel: None,
        }
    }

    pub fn with_origin_channel(mut self, channel_id: Option<u64>) -> Self {
        self.origin_channel = channel_id;
        self
    }

    /// A locator must be fetched before this track can be opened.
    pub fn needs_refresh(&self, clock: &dyn Clock) -> bool {
        match &self.locator {
            Some(locator) => locator.is_expired(clock),
            None => true,
        }
    }

    /// Replace the transient locator with a freshly resolved one.
    pub fn refresh_locator(&mut self, locator: StreamLocator) {
        self.locator = Some(locator);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    struct FixedClock(DateTime<Utc>);

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.0
        }
    }

    fn metadata(locator: Option<StreamLocator>) -> TrackMetadata {
        TrackMetadata {
            id: "abc".into(),
            title: "Song".into(),
            duration_secs: 180,
            uploader: "Artist".into(),
            thumbnail_url: None,
            canonical_url: "https://www.youtube.com/watch?v=abc".into(),
            locator,
        }
    }

    #[test]
    fn test_same_metadata_yields_distinct_tracks() {
        let requester = Requester::new(1, "alice");
        let a = Track::from_metadata(metadata(None), requester.clone());
        let b = Track::from_metadata(metadata(None), requester);
        assert_ne!(a.id, b.id);
        assert_eq!(a.source_id, b.source_id);
    }

    #[test]
    fn test_needs_refresh() {
        let issued = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let locator =
            StreamLocator::parse("https://host.example/v?expire=1700000600", issued);
        let mut track = Track::from_metadata(metadata(None), Requester::new(1, "alice"));
        let clock = FixedClock(issued);

        assert!(track.needs_refresh(&clock));

        track.refresh_locator(locator);
        assert!(!track.needs_refresh(&clock));
        assert!(track.needs_refresh(&FixedClock(issued + Duration::minutes(10))));
    }
}
