//! # Core Resolver
//!
//! Resolves user queries against an unreliable, rate-limited upstream.
//!
//! ## Overview
//!
//! - [`Resolver`] walks an ordered [`ExtractionStrategy`] table, pacing
//!   between strategies and retrying network failures in place
//! - [`Query`] decides between direct extraction and search
//! - [`StreamLocator`] records when a signed stream URL stops working
//! - [`TrackResolver`] is the seam the playback crate depends on
//!
//! Errors are reported as [`ResolutionError`] only after every strategy has
//! been tried.

pub mod error;
pub mod locator;
pub mod query;
pub mod resolver;
pub mod strategy;

pub use error::{ResolutionError, Result};
pub use locator::{parse_expiry, StreamLocator};
pub use query::Query;
pub use resolver::{Resolution, Resolver, TrackMetadata, TrackResolver, DEFAULT_PLAYLIST_LIMIT};
pub use strategy::{default_strategies, ExtractionStrategy, IdentityPool, IdentitySource};
