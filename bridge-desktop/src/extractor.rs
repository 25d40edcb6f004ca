//! yt-dlp Media Extractor
//!
//! Runs `yt-dlp --dump-single-json` as a subprocess and maps its output and
//! failures onto the extractor contract.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use bridge_traits::{
    ExtractedEntry, ExtractionDepth, ExtractionError, ExtractionRequest, ExtractionResponse,
    MediaExtractor,
};
use serde_json::Value;
use tokio::process::Command;
use tracing::{debug, instrument, warn};

const DEFAULT_PROGRAM: &str = "yt-dlp";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// `MediaExtractor` backed by the `yt-dlp` command line tool.
#[derive(Debug, Clone)]
pub struct YtDlpExtractor {
    program: PathBuf,
    timeout: Duration,
}

impl YtDlpExtractor {
    /// Extractor using `yt-dlp` from `PATH` with a 60 second timeout.
    pub fn new() -> Self {
        Self {
            program: PathBuf::from(DEFAULT_PROGRAM),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Use a specific executable.
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Command line arguments for one request.
    pub fn build_args(request: &ExtractionRequest) -> Vec<String> {
        let mut args: Vec<String> = [
            "--dump-single-json",
            "--no-warnings",
            "--no-check-certificates",
            "--geo-bypass",
            "--ignore-errors",
        ]
        .iter()
        .map(|arg| arg.to_string())
        .collect();

        args.push("--user-agent".to_string());
        args.push(request.identity.user_agent.clone());
        for (name, value) in &request.identity.headers {
            args.push("--add-header".to_string());
            args.push(format!("{}:{}", name, value));
        }

        args.push("-f".to_string());
        args.push(request.format.clone());
        args.push("--playlist-end".to_string());
        args.push(request.playlist_limit.to_string());

        if request.depth == ExtractionDepth::Flat {
            args.push("--flat-playlist".to_string());
        }

        args.push("--".to_string());
        args.push(request.target.clone());
        args
    }
}

impl Default for YtDlpExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaExtractor for YtDlpExtractor {
    #[instrument(skip(self, request), fields(identity = %request.identity.label, depth = ?request.depth))]
    async fn extract(
        &self,
        request: ExtractionRequest,
    ) -> Result<ExtractionResponse, ExtractionError> {
        let args = Self::build_args(&request);

        let mut command = Command::new(&self.program);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, command.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(error)) => {
                warn!(error = %error, program = ?self.program, "Failed to run extractor");
                return Err(ExtractionError::Failed(format!(
                    "failed to run {}: {}",
                    self.program.display(),
                    error
                )));
            }
            Err(_) => {
                return Err(ExtractionError::Network(format!(
                    "extraction timed out after {:?}",
                    self.timeout
                )))
            }
        };

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() && output.stdout.is_empty() {
            let error = classify_stderr(&stderr);
            debug!(status = ?output.status.code(), error = %error, "Extractor exited with failure");
            return Err(error);
        }

        parse_output(&output.stdout)
    }
}

/// Parse `--dump-single-json` output.
///
/// Collections carry an `entries` array whose elements may be `null`; an
/// element that does not deserialize is treated the same way.
pub fn parse_output(stdout: &[u8]) -> Result<ExtractionResponse, ExtractionError> {
    let value: Value = serde_json::from_slice(stdout)
        .map_err(|e| ExtractionError::Malformed(e.to_string()))?;

    match value.get("entries") {
        Some(Value::Array(entries)) => {
            let entries = entries
                .iter()
                .map(|entry| match entry {
                    Value::Null => None,
                    other => serde_json::from_value::<ExtractedEntry>(other.clone()).ok(),
                })
                .collect();
            Ok(ExtractionResponse::collection(entries))
        }
        _ if value.is_null() => Ok(ExtractionResponse::collection(vec![None])),
        _ => serde_json::from_value::<ExtractedEntry>(value)
            .map(ExtractionResponse::single)
            .map_err(|e| ExtractionError::Malformed(e.to_string())),
    }
}

/// Map yt-dlp's stderr onto an error class.
pub fn classify_stderr(stderr: &str) -> ExtractionError {
    let lower = stderr.to_lowercase();
    let message = last_error_line(stderr);

    const BLOCKED: &[&str] = &[
        "sign in to confirm",
        "not a bot",
        "too many requests",
        "http error 429",
    ];
    const DENIED: &[&str] = &[
        "private video",
        "confirm your age",
        "age-restricted",
        "not available in your country",
        "members-only",
        "http error 403",
        "forbidden",
    ];
    const UNAVAILABLE: &[&str] = &[
        "video unavailable",
        "has been removed",
        "does not exist",
        "http error 404",
        "no video results",
    ];
    const NETWORK: &[&str] = &[
        "timed out",
        "name or service not known",
        "temporary failure in name resolution",
        "getaddrinfo failed",
        "connection reset",
        "connection refused",
        "network is unreachable",
    ];

    let matches = |needles: &[&str]| needles.iter().any(|needle| lower.contains(needle));

    if matches(BLOCKED) {
        ExtractionError::Blocked(message)
    } else if matches(DENIED) {
        ExtractionError::AccessDenied(message)
    } else if matches(UNAVAILABLE) {
        ExtractionError::Unavailable(message)
    } else if matches(NETWORK) {
        ExtractionError::Network(message)
    } else {
        ExtractionError::Failed(message)
    }
}

fn last_error_line(stderr: &str) -> String {
    stderr
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("extractor failed without output")
        .to_string()
}
