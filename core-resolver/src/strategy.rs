//! Extraction strategy table.
//!
//! Each row pairs a client identity with an extraction depth and format
//! selector. The resolver walks the rows in order; adding, removing or
//! reordering a strategy is a table edit.

use std::sync::atomic::{AtomicUsize, Ordering};

use bridge_traits::{ClientIdentity, ExtractionDepth};

const ACCEPT_HTML: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";

const DESKTOP_USER_AGENTS: &[(&str, &str)] = &[
    (
        "chrome-windows",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    ),
    (
        "firefox-windows",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:133.0) Gecko/20100101 Firefox/133.0",
    ),
    (
        "chrome-macos",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    ),
    (
        "edge-windows",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36 Edg/131.0.0.0",
    ),
    (
        "chrome-linux",
        "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    ),
];

const MOBILE_SAFARI: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Mobile/15E148 Safari/604.1";
const FIREFOX: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:133.0) Gecko/20100101 Firefox/133.0";
const CRAWLER: &str = "Mozilla/5.0 (compatible; Googlebot/2.1; +http://www.google.com/bot.html)";

/// Where a strategy gets its client identity from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentitySource {
    /// Next identity from the resolver's rotating pool
    Rotating,
    Fixed(ClientIdentity),
}

/// One row of the strategy table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionStrategy {
    pub name: String,
    pub identity: IdentitySource,
    pub depth: ExtractionDepth,
    pub format: String,
}

impl ExtractionStrategy {
    pub fn new(
        name: impl Into<String>,
        identity: IdentitySource,
        depth: ExtractionDepth,
        format: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            identity,
            depth,
            format: format.into(),
        }
    }

    /// Only full-depth strategies yield stream locators.
    pub fn yields_locator(&self) -> bool {
        self.depth == ExtractionDepth::Full
    }
}

/// The default cascade, from most capable to lightest footprint.
pub fn default_strategies() -> Vec<ExtractionStrategy> {
    vec![
        ExtractionStrategy::new(
            "primary",
            IdentitySource::Rotating,
            ExtractionDepth::Full,
            "bestaudio[ext=webm]/bestaudio[ext=m4a]/bestaudio/best",
        ),
        ExtractionStrategy::new(
            "mobile",
            IdentitySource::Fixed(
                ClientIdentity::new("mobile-safari", MOBILE_SAFARI)
                    .with_header("Accept", ACCEPT_HTML)
                    .with_header("Accept-Language", "en-US,en;q=0.5")
                    .with_header("Accept-Encoding", "gzip, deflate"),
            ),
            ExtractionDepth::Full,
            "bestaudio/best",
        ),
        ExtractionStrategy::new(
            "minimal",
            IdentitySource::Fixed(
                ClientIdentity::new("firefox-minimal", FIREFOX)
                    .with_header("Accept", ACCEPT_HTML)
                    .with_header("Accept-Language", "en-US,en;q=0.9"),
            ),
            ExtractionDepth::Flat,
            "worstaudio/worst",
        ),
        ExtractionStrategy::new(
            "extended-headers",
            IdentitySource::Fixed(
                ClientIdentity::new("firefox-extended", FIREFOX)
                    .with_header(
                        "Accept",
                        "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8",
                    )
                    .with_header("Accept-Language", "en-US,en;q=0.5")
                    .with_header("Accept-Encoding", "gzip, deflate, br")
                    .with_header("Connection", "keep-alive")
                    .with_header("Upgrade-Insecure-Requests", "1")
                    .with_header("Sec-Fetch-Dest", "document")
                    .with_header("Sec-Fetch-Mode", "navigate")
                    .with_header("Sec-Fetch-Site", "none")
                    .with_header("Sec-Fetch-User", "?1"),
            ),
            ExtractionDepth::Full,
            "bestaudio/best",
        ),
        ExtractionStrategy::new(
            "crawler",
            IdentitySource::Fixed(
                ClientIdentity::new("crawler", CRAWLER).with_header("Accept", "*/*"),
            ),
            ExtractionDepth::Flat,
            "bestaudio",
        ),
    ]
}

/// Round-robin pool of desktop browser identities.
#[derive(Debug)]
pub struct IdentityPool {
    identities: Vec<ClientIdentity>,
    cursor: AtomicUsize,
}

impl IdentityPool {
    /// An empty `identities` list falls back to the built-in desktop pool.
    pub fn new(identities: Vec<ClientIdentity>) -> Self {
        let identities = if identities.is_empty() {
            desktop_identities()
        } else {
            identities
        };
        Self {
            identities,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Start the rotation at `offset`, so separate processes diverge.
    pub fn starting_at(self, offset: usize) -> Self {
        self.cursor.store(offset % self.identities.len(), Ordering::Relaxed);
        self
    }

    /// Hand out the next identity and advance the cursor.
    pub fn next(&self) -> ClientIdentity {
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.identities.len();
        self.identities[index].clone()
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }
}

impl Default for IdentityPool {
    fn default() -> Self {
        Self::new(desktop_identities())
    }
}

fn desktop_identities() -> Vec<ClientIdentity> {
    DESKTOP_USER_AGENTS
        .iter()
        .map(|(label, agent)| {
            ClientIdentity::new(*label, *agent)
                .with_header(
                    "Accept",
                    "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,image/apng,*/*;q=0.8",
                )
                .with_header("Accept-Language", "en-US,en;q=0.9")
                .with_header("DNT", "1")
                .with_header("Sec-Fetch-Mode", "navigate")
        })
        .collect()
}
