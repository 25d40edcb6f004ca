//! # Host Bridge Traits
//!
//! Capabilities the queue engine needs from its host, expressed as traits.
//!
//! ## Overview
//!
//! The engine never talks to the upstream media host, spawns processes or
//! reads the system clock on its own. Each of those is a trait defined here
//! and implemented per host (`bridge-desktop` ships the native adapters).
//!
//! ## Traits
//!
//! - [`MediaExtractor`](extractor::MediaExtractor) - Resolve a URL or search term into entries
//! - [`Transcoder`](transcoder::Transcoder) - Turn a stream locator into playable frames
//! - [`Clock`](time::Clock) - Time source for expiry checks and deterministic tests
//! - [`LoggerSink`](sink::LoggerSink) - Forward structured logs to the host
//!
//! ## Error Handling
//!
//! Extraction and transcoding report their own classified error types
//! ([`ExtractionError`](extractor::ExtractionError),
//! [`TranscoderError`](transcoder::TranscoderError)) because the engine makes
//! retry decisions from them. Everything else uses [`BridgeError`].
//!
//! ## Thread Safety
//!
//! All traits require `Send + Sync`. Completion callbacks handed to a
//! transcoder may be invoked from any thread.

pub mod error;
pub mod extractor;
pub mod sink;
pub mod time;
pub mod transcoder;

pub use error::BridgeError;

pub use extractor::{
    ClientIdentity, ExtractedEntry, ExtractionDepth, ExtractionError, ExtractionRequest,
    ExtractionResponse, MediaExtractor,
};
pub use sink::{ConsoleLogger, LogEntry, LogLevel, LoggerSink};
pub use time::{Clock, SystemClock};
pub use transcoder::{
    CompletionCallback, OutputCompletion, OutputEnd, OutputHandle, OutputRequest,
    ReconnectPolicy, Transcoder, TranscoderError,
};
