//! # Desktop Bridge Implementations
//!
//! Native implementations of the host bridge traits for desktop and server
//! hosts (macOS, Windows, Linux).
//!
//! ## Overview
//!
//! - [`YtDlpExtractor`] implements `MediaExtractor` by running `yt-dlp`
//! - [`FfmpegTranscoder`] implements `Transcoder` by running `ffmpeg` and
//!   handing PCM frames to an [`AudioFrameSink`]
//!
//! Both expect their executables on `PATH` unless configured with
//! `with_program`.
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{FfmpegTranscoder, YtDlpExtractor};
//! use std::sync::Arc;
//!
//! let extractor = Arc::new(YtDlpExtractor::new());
//! let transcoder = Arc::new(FfmpegTranscoder::new(voice_sink));
//! ```

mod extractor;
mod transcoder;

pub use extractor::{classify_stderr, parse_output, YtDlpExtractor};
pub use transcoder::{
    classify_start_failure, scale_pcm, AudioFrameSink, FfmpegTranscoder, CHANNELS, FRAME_BYTES,
    SAMPLE_RATE,
};
