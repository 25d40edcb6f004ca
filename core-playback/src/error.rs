//! # Playback Error Types

use bridge_traits::TranscoderError;
use core_resolver::ResolutionError;
use thiserror::Error;

use crate::session::PlaybackState;
use crate::track::SessionId;

/// Errors returned by session commands.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlaybackError {
    // ========================================================================
    // Queue Errors
    // ========================================================================
    /// The queue is at capacity; nothing was inserted.
    #[error("Queue is full ({capacity} tracks)")]
    QueueFull { capacity: usize },

    /// A 1-based position outside `[1, len]`.
    #[error("Invalid queue position {index} (queue has {len} tracks)")]
    InvalidIndex { index: usize, len: usize },

    // ========================================================================
    // State Errors
    // ========================================================================
    #[error("Cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: PlaybackState,
    },

    #[error("Volume must be between 0 and {max}, got {percent}")]
    InvalidVolume { percent: u32, max: u32 },

    // ========================================================================
    // Output Errors
    // ========================================================================
    #[error(transparent)]
    Acquisition(#[from] AcquisitionError),

    /// The transcoder refused a pause/resume/stop request.
    #[error("Output control failed: {0}")]
    Output(String),

    // ========================================================================
    // Session Errors
    // ========================================================================
    /// The session actor has shut down.
    #[error("Session {0} is closed")]
    SessionClosed(SessionId),

    /// The session was stopped after this request began; nothing was applied.
    #[error("Request cancelled by stop")]
    Cancelled,
}

/// Why a track could not be made ready to play.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AcquisitionError {
    #[error("Stream re-resolution failed: {0}")]
    Resolution(#[from] ResolutionError),

    #[error("Transcoder failed to start: {0}")]
    Transcoder(#[from] TranscoderError),

    /// Abandoned because the session stopped.
    #[error("Acquisition cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, PlaybackError>;
