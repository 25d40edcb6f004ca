use core_playback::PlaybackError;
use core_resolver::ResolutionError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    #[error("Core initialization failed: {0}")]
    InitializationFailed(String),

    #[error("Resolution error: {0}")]
    Resolution(#[from] ResolutionError),

    #[error("Playback error: {0}")]
    Playback(#[from] PlaybackError),

    #[error("'{title}' is {duration_secs}s long; the limit is {max_secs}s")]
    TrackTooLong {
        title: String,
        duration_secs: u64,
        max_secs: u64,
    },

    #[error("Playlist has no playable entries")]
    EmptyPlaylist,
}

impl From<core_runtime::Error> for CoreError {
    fn from(error: core_runtime::Error) -> Self {
        CoreError::InitializationFailed(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
