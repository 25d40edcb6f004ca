//! Transient stream locators.
//!
//! Upstream stream URLs are signed and short-lived. When the signature
//! carries an `expire` query parameter (unix seconds) we record it so the
//! acquirer can re-resolve before handing a dead link to the transcoder.

use bridge_traits::Clock;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

const EXPIRY_PARAM: &str = "expire";

/// A direct, possibly expiring, stream URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamLocator {
    pub url: String,
    pub issued_at: DateTime<Utc>,
    /// `None` means unknown: validated lazily on first playback failure.
    pub expires_at: Option<DateTime<Utc>>,
}

impl StreamLocator {
    /// Wrap `url`, reading its expiry from the query string when present.
    pub fn parse(url: impl Into<String>, issued_at: DateTime<Utc>) -> Self {
        let url = url.into();
        let expires_at = parse_expiry(&url);
        Self {
            url,
            issued_at,
            expires_at,
        }
    }

    /// `true` only when an expiry is known and has passed.
    pub fn is_expired(&self, clock: &dyn Clock) -> bool {
        self.expires_at
            .map(|deadline| clock.has_passed(deadline))
            .unwrap_or(false)
    }

    /// WebM/Opus streams can be forwarded without re-encoding.
    pub fn is_opus_passthrough(&self) -> bool {
        let Ok(parsed) = Url::parse(&self.url) else {
            return false;
        };

        let mut webm = false;
        let mut opus = false;
        for (key, value) in parsed.query_pairs() {
            match &*key {
                "mime" => webm = value == "audio/webm",
                "codecs" => opus = value.contains("opus"),
                _ => {}
            }
        }
        webm && opus
    }
}

/// Read the `expire` query parameter as a UTC timestamp.
pub fn parse_expiry(url: &str) -> Option<DateTime<Utc>> {
    let parsed = Url::parse(url).ok()?;
    let raw = parsed
        .query_pairs()
        .find(|(key, _)| &**key == EXPIRY_PARAM)
        .map(|(_, value)| value.into_owned())?;
    let seconds: i64 = raw.parse().ok()?;
    Utc.timestamp_opt(seconds, 0).single()
}
