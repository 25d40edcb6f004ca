//! Transcoder Boundary
//!
//! A transcoder opens a stream locator and turns it into frames the voice
//! layer can send. The engine only starts, stops, pauses and re-levels
//! outputs; the frames never pass through it.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::error::Result;

/// Fixed reconnect flags handed to every output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    /// Reconnect when the input stream is interrupted
    pub reconnect: bool,
    /// Also reconnect on streamed (non-seekable) inputs
    pub reconnect_streamed: bool,
    /// Upper bound on the delay between reconnect attempts
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            reconnect: true,
            reconnect_streamed: true,
            max_delay: Duration::from_secs(5),
        }
    }
}

/// Opaque identifier of a running output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutputHandle(Uuid);

impl OutputHandle {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for OutputHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OutputHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Parameters for starting one output.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputRequest {
    pub locator: String,
    pub reconnect: ReconnectPolicy,
    /// Linear gain in `[0.0, 1.0]`
    pub volume: f32,
    /// The locator is already WebM/Opus; the transcoder may skip filters.
    pub opus_passthrough: bool,
}

/// Why an output ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputEnd {
    /// Input reached its natural end
    Finished,
    /// Ended by [`Transcoder::stop`]
    Stopped,
    /// Died mid-stream
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputCompletion {
    pub handle: OutputHandle,
    pub end: OutputEnd,
}

/// Invoked once per started output when it ends. May run on any thread.
pub type CompletionCallback = Arc<dyn Fn(OutputCompletion) + Send + Sync>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TranscoderError {
    /// The locator was refused (HTTP 403, expired signature)
    #[error("Stream access denied: {0}")]
    AccessDenied(String),

    #[error("No audio produced within {0:?}")]
    StartTimeout(Duration),

    #[error("Failed to launch transcoder: {0}")]
    Spawn(String),

    #[error("Transcoder failed: {0}")]
    Failed(String),
}

impl TranscoderError {
    /// Access-denied failures are the signal to re-resolve the locator.
    pub fn is_access_denied(&self) -> bool {
        matches!(self, TranscoderError::AccessDenied(_))
    }
}

/// Stream-to-frames converter.
///
/// # Completion contract
///
/// Every output returned by [`start_output`](Transcoder::start_output) fires
/// `on_complete` exactly once, whether it finished, failed or was stopped.
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Open `request.locator` and begin producing frames.
    ///
    /// Returns once the first audio has been produced, so that a refused or
    /// dead locator surfaces here rather than through the completion path.
    async fn start_output(
        &self,
        request: OutputRequest,
        on_complete: CompletionCallback,
    ) -> std::result::Result<OutputHandle, TranscoderError>;

    /// Terminate an output. Unknown handles are not an error.
    async fn stop(&self, handle: OutputHandle) -> Result<()>;

    async fn pause(&self, handle: OutputHandle) -> Result<()>;

    async fn resume(&self, handle: OutputHandle) -> Result<()>;

    /// Change the gain of a live output.
    async fn set_volume(&self, handle: OutputHandle, volume: f32) -> Result<()> {
        let _ = (handle, volume);
        Err(crate::BridgeError::NotAvailable(
            "live volume control".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_reconnect_policy() {
        let policy = ReconnectPolicy::default();
        assert!(policy.reconnect);
        assert!(policy.reconnect_streamed);
        assert_eq!(policy.max_delay, Duration::from_secs(5));
    }

    #[test]
    fn test_handles_are_unique() {
        assert_ne!(OutputHandle::new(), OutputHandle::new());
    }

    #[test]
    fn test_access_denied_classification() {
        assert!(TranscoderError::AccessDenied("403".into()).is_access_denied());
        assert!(!TranscoderError::StartTimeout(Duration::from_secs(1)).is_access_denied());
    }
}
