//! ffmpeg Transcoder
//!
//! Decodes a stream locator to 48 kHz stereo `s16le` PCM with an `ffmpeg`
//! subprocess and forwards it in 20 ms frames to an [`AudioFrameSink`].
//!
//! Volume is applied to the PCM in this process so it can change while the
//! output runs. Pausing stops reading from ffmpeg's stdout, which stalls the
//! subprocess through pipe backpressure.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bridge_traits::{
    BridgeError, CompletionCallback, OutputCompletion, OutputEnd, OutputHandle, OutputRequest,
    Transcoder, TranscoderError,
};
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

pub const SAMPLE_RATE: u32 = 48_000;
pub const CHANNELS: u16 = 2;
/// 20 ms of interleaved 16-bit stereo
pub const FRAME_BYTES: usize = (SAMPLE_RATE as usize / 50) * CHANNELS as usize * 2;

const DEFAULT_PROGRAM: &str = "ffmpeg";
const STDERR_TAIL_BYTES: usize = 4096;

/// Receives PCM frames for the voice connection.
#[async_trait]
pub trait AudioFrameSink: Send + Sync {
    /// One frame of [`FRAME_BYTES`] interleaved `s16le` samples.
    ///
    /// The sink paces playback; the transcoder waits for this call to
    /// return before reading more audio.
    async fn send_frame(&self, handle: OutputHandle, frame: Bytes) -> bridge_traits::error::Result<()>;

    /// The output ended and no more frames will arrive for `handle`.
    async fn end(&self, handle: OutputHandle) {
        let _ = handle;
    }
}

struct OutputControl {
    volume: Arc<AtomicU32>,
    paused: watch::Sender<bool>,
    stop: CancellationToken,
}

type Outputs = Arc<Mutex<HashMap<OutputHandle, OutputControl>>>;

/// `Transcoder` backed by an `ffmpeg` subprocess per output.
pub struct FfmpegTranscoder {
    sink: Arc<dyn AudioFrameSink>,
    program: PathBuf,
    outputs: Outputs,
}

impl FfmpegTranscoder {
    pub fn new(sink: Arc<dyn AudioFrameSink>) -> Self {
        Self {
            sink,
            program: PathBuf::from(DEFAULT_PROGRAM),
            outputs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    /// Number of live outputs.
    pub fn active_outputs(&self) -> usize {
        self.outputs.lock().len()
    }

    /// Command line arguments for one output.
    pub fn build_args(request: &OutputRequest) -> Vec<String> {
        let mut args: Vec<String> = ["-nostdin", "-hide_banner", "-loglevel", "error"]
            .iter()
            .map(|arg| arg.to_string())
            .collect();

        if request.reconnect.reconnect {
            args.extend(["-reconnect".to_string(), "1".to_string()]);
        }
        if request.reconnect.reconnect_streamed {
            args.extend(["-reconnect_streamed".to_string(), "1".to_string()]);
        }
        if request.reconnect.reconnect || request.reconnect.reconnect_streamed {
            args.extend([
                "-reconnect_delay_max".to_string(),
                request.reconnect.max_delay.as_secs().to_string(),
            ]);
        }

        // WebM/Opus input needs no format probing.
        if request.opus_passthrough {
            args.extend([
                "-analyzeduration".to_string(),
                "0".to_string(),
                "-probesize".to_string(),
                "32768".to_string(),
            ]);
        }

        args.extend([
            "-i".to_string(),
            request.locator.clone(),
            "-vn".to_string(),
            "-f".to_string(),
            "s16le".to_string(),
            "-ar".to_string(),
            SAMPLE_RATE.to_string(),
            "-ac".to_string(),
            CHANNELS.to_string(),
            "pipe:1".to_string(),
        ]);
        args
    }

    fn control<T>(
        &self,
        handle: OutputHandle,
        f: impl FnOnce(&OutputControl) -> T,
    ) -> bridge_traits::error::Result<T> {
        self.outputs
            .lock()
            .get(&handle)
            .map(f)
            .ok_or_else(|| BridgeError::UnknownOutput(handle.to_string()))
    }
}

impl std::fmt::Debug for FfmpegTranscoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FfmpegTranscoder")
            .field("program", &self.program)
            .field("active_outputs", &self.active_outputs())
            .finish()
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    #[instrument(skip(self, request, on_complete))]
    async fn start_output(
        &self,
        request: OutputRequest,
        on_complete: CompletionCallback,
    ) -> Result<OutputHandle, TranscoderError> {
        let mut child = Command::new(&self.program)
            .args(Self::build_args(&request))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| TranscoderError::Spawn(format!("{}: {}", self.program.display(), e)))?;

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| TranscoderError::Spawn("stdout not captured".to_string()))?;
        let stderr_tail = collect_stderr(&mut child);

        let mut first = vec![0u8; FRAME_BYTES];
        let read = read_frame(&mut stdout, &mut first)
            .await
            .map_err(|e| TranscoderError::Failed(e.to_string()))?;

        if read == 0 {
            let _ = child.wait().await;
            let stderr = join_stderr(stderr_tail).await;
            return Err(classify_start_failure(&stderr));
        }

        let handle = OutputHandle::new();
        let volume = Arc::new(AtomicU32::new(request.volume.to_bits()));
        let (paused_tx, paused_rx) = watch::channel(false);
        let stop = CancellationToken::new();
        self.outputs.lock().insert(
            handle,
            OutputControl {
                volume: volume.clone(),
                paused: paused_tx,
                stop: stop.clone(),
            },
        );

        info!(%handle, "ffmpeg output started");
        let pump = Pump {
            handle,
            stdout,
            child,
            stderr_tail,
            sink: self.sink.clone(),
            volume,
            paused: paused_rx,
            stop,
        };
        let outputs = self.outputs.clone();
        tokio::spawn(async move {
            let sink = pump.sink.clone();
            let end = pump.run(first).await;
            outputs.lock().remove(&handle);
            sink.end(handle).await;
            debug!(%handle, ?end, "ffmpeg output ended");
            on_complete(OutputCompletion { handle, end });
        });

        Ok(handle)
    }

    async fn stop(&self, handle: OutputHandle) -> bridge_traits::error::Result<()> {
        if let Some(control) = self.outputs.lock().get(&handle) {
            control.stop.cancel();
        }
        Ok(())
    }

    async fn pause(&self, handle: OutputHandle) -> bridge_traits::error::Result<()> {
        self.control(handle, |control| {
            control.paused.send_replace(true);
        })
    }

    async fn resume(&self, handle: OutputHandle) -> bridge_traits::error::Result<()> {
        self.control(handle, |control| {
            control.paused.send_replace(false);
        })
    }

    async fn set_volume(&self, handle: OutputHandle, volume: f32) -> bridge_traits::error::Result<()> {
        self.control(handle, |control| {
            control
                .volume
                .store(volume.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
        })
    }
}

// ============================================================================
// Pump
// ============================================================================

struct Pump {
    handle: OutputHandle,
    stdout: ChildStdout,
    child: Child,
    stderr_tail: JoinHandle<String>,
    sink: Arc<dyn AudioFrameSink>,
    volume: Arc<AtomicU32>,
    paused: watch::Receiver<bool>,
    stop: CancellationToken,
}

impl Pump {
    async fn run(mut self, first: Vec<u8>) -> OutputEnd {
        let mut frame = first;
        loop {
            if !self.wait_while_paused().await {
                return self.finish_stopped().await;
            }

            let gain = f32::from_bits(self.volume.load(Ordering::Relaxed));
            scale_pcm(&mut frame, gain);
            if let Err(error) = self.sink.send_frame(self.handle, Bytes::from(frame)).await {
                warn!(handle = %self.handle, error = %error, "Frame sink rejected audio");
                let _ = self.child.kill().await;
                return OutputEnd::Failed(error.to_string());
            }

            let mut next = vec![0u8; FRAME_BYTES];
            let read = tokio::select! {
                _ = self.stop.cancelled() => return self.finish_stopped().await,
                read = read_frame(&mut self.stdout, &mut next) => read,
            };

            match read {
                Ok(0) => return self.finish_eof().await,
                Ok(_) => frame = next,
                Err(error) => {
                    let _ = self.child.kill().await;
                    return OutputEnd::Failed(error.to_string());
                }
            }
        }
    }

    /// Returns `false` if the output was stopped while paused.
    async fn wait_while_paused(&mut self) -> bool {
        while *self.paused.borrow() {
            tokio::select! {
                _ = self.stop.cancelled() => return false,
                changed = self.paused.changed() => {
                    if changed.is_err() {
                        return false;
                    }
                }
            }
        }
        !self.stop.is_cancelled()
    }

    async fn finish_stopped(mut self) -> OutputEnd {
        let _ = self.child.kill().await;
        OutputEnd::Stopped
    }

    async fn finish_eof(mut self) -> OutputEnd {
        match self.child.wait().await {
            Ok(status) if status.success() => OutputEnd::Finished,
            Ok(status) => {
                let stderr = join_stderr(self.stderr_tail).await;
                OutputEnd::Failed(format!("ffmpeg exited with {}: {}", status, stderr.trim()))
            }
            Err(error) => OutputEnd::Failed(error.to_string()),
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Fill `buf` from `reader`, zero-padding a short final frame.
///
/// Returns the number of bytes actually read; zero means end of stream.
async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    buf[filled..].fill(0);
    Ok(filled)
}

/// Scale interleaved `s16le` samples in place.
pub fn scale_pcm(frame: &mut [u8], gain: f32) {
    if (gain - 1.0).abs() < f32::EPSILON {
        return;
    }
    for sample in frame.chunks_exact_mut(2) {
        let value = i16::from_le_bytes([sample[0], sample[1]]) as f32 * gain;
        let scaled = value.round().clamp(i16::MIN as f32, i16::MAX as f32) as i16;
        sample.copy_from_slice(&scaled.to_le_bytes());
    }
}

/// Map stderr of an ffmpeg that died before producing audio.
pub fn classify_start_failure(stderr: &str) -> TranscoderError {
    let lower = stderr.to_lowercase();
    let message = stderr.trim().to_string();
    if lower.contains("403") || lower.contains("forbidden") {
        TranscoderError::AccessDenied(message)
    } else if message.is_empty() {
        TranscoderError::Failed("ffmpeg produced no audio".to_string())
    } else {
        TranscoderError::Failed(message)
    }
}

fn collect_stderr(child: &mut Child) -> JoinHandle<String> {
    let stderr = child.stderr.take();
    tokio::spawn(async move {
        let Some(mut stderr) = stderr else {
            return String::new();
        };
        let mut tail: Vec<u8> = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            match stderr.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    tail.extend_from_slice(&chunk[..n]);
                    if tail.len() > STDERR_TAIL_BYTES {
                        tail.drain(..tail.len() - STDERR_TAIL_BYTES);
                    }
                }
            }
        }
        String::from_utf8_lossy(&tail).into_owned()
    })
}

async fn join_stderr(task: JoinHandle<String>) -> String {
    task.await.unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::ReconnectPolicy;

    struct NullSink;

    #[async_trait]
    impl AudioFrameSink for NullSink {
        async fn send_frame(
            &self,
            _handle: OutputHandle,
            _frame: Bytes,
        ) -> bridge_traits::error::Result<()> {
            Ok(())
        }
    }

    fn request(opus_passthrough: bool) -> OutputRequest {
        OutputRequest {
            locator: "https://media.example/audio?expire=1700000000".to_string(),
            reconnect: ReconnectPolicy::default(),
            volume: 0.5,
            opus_passthrough,
        }
    }

    #[test]
    fn test_frame_size_is_twenty_milliseconds() {
        assert_eq!(FRAME_BYTES, 3840);
    }

    #[test]
    fn test_build_args_reconnect_and_output_format() {
        let args = FfmpegTranscoder::build_args(&request(false));
        let joined = args.join(" ");

        assert!(joined.starts_with("-nostdin"));
        assert!(joined.contains("-reconnect 1 -reconnect_streamed 1 -reconnect_delay_max 5"));
        assert!(joined.contains("-f s16le -ar 48000 -ac 2 pipe:1"));
        assert!(!joined.contains("-analyzeduration"));

        let input = args.iter().position(|a| a == "-i").unwrap();
        assert!(args[input + 1].starts_with("https://media.example/audio"));
    }

    #[test]
    fn test_build_args_opus_passthrough_skips_probing() {
        let args = FfmpegTranscoder::build_args(&request(true));
        let probe = args.iter().position(|a| a == "-analyzeduration").unwrap();
        let input = args.iter().position(|a| a == "-i").unwrap();
        assert!(probe < input);
    }

    #[test]
    fn test_scale_pcm() {
        let mut frame = Vec::new();
        for sample in [1000i16, -1000, i16::MAX, i16::MIN] {
            frame.extend_from_slice(&sample.to_le_bytes());
        }

        scale_pcm(&mut frame, 0.5);
        let samples: Vec<i16> = frame
            .chunks_exact(2)
            .map(|s| i16::from_le_bytes([s[0], s[1]]))
            .collect();
        assert_eq!(samples, vec![500, -500, 16384, -16384]);
    }

    #[test]
    fn test_scale_pcm_unity_is_untouched() {
        let mut frame = 1234i16.to_le_bytes().to_vec();
        scale_pcm(&mut frame, 1.0);
        assert_eq!(i16::from_le_bytes([frame[0], frame[1]]), 1234);
    }

    #[test]
    fn test_classify_start_failure() {
        assert!(classify_start_failure(
            "https://media.example/audio: Server returned 403 Forbidden (access denied)"
        )
        .is_access_denied());
        assert!(matches!(
            classify_start_failure(""),
            TranscoderError::Failed(_)
        ));
    }

    #[tokio::test]
    async fn test_read_frame_pads_short_tail() {
        let data = vec![7u8; 10];
        let mut reader = &data[..];
        let mut buf = vec![1u8; 16];

        assert_eq!(read_frame(&mut reader, &mut buf).await.unwrap(), 10);
        assert_eq!(&buf[..10], &[7u8; 10]);
        assert_eq!(&buf[10..], &[0u8; 6]);
        assert_eq!(read_frame(&mut reader, &mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let transcoder =
            FfmpegTranscoder::new(Arc::new(NullSink)).with_program("/nonexistent/ffmpeg-binary");
        let on_complete: CompletionCallback = Arc::new(|_| {});

        let result = transcoder.start_output(request(false), on_complete).await;
        assert!(matches!(result, Err(TranscoderError::Spawn(_))));
        assert_eq!(transcoder.active_outputs(), 0);
    }

    #[tokio::test]
    async fn test_controls_on_unknown_handle() {
        let transcoder = FfmpegTranscoder::new(Arc::new(NullSink));
        let handle = OutputHandle::new();

        assert!(transcoder.stop(handle).await.is_ok());
        assert!(matches!(
            transcoder.pause(handle).await,
            Err(BridgeError::UnknownOutput(_))
        ));
        assert!(transcoder.set_volume(handle, 0.3).await.is_err());
    }
}
