//! # Logging & Tracing Infrastructure
//!
//! Structured logging on top of `tracing`:
//! - Pretty, JSON or compact console output
//! - Per-crate filtering with an `EnvFilter` directive string
//! - Stream locators redacted before they reach a host sink
//! - Events mirrored into a host [`LoggerSink`], tagged with their session
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::logging::{init_logging, LoggingConfig};
//! use bridge_traits::sink::{ConsoleLogger, LogLevel};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let format = std::env::var("JUKEBOX_LOG_FORMAT")
//!         .ok()
//!         .and_then(|value| value.parse().ok())
//!         .unwrap_or_default();
//!     let config = LoggingConfig::default()
//!         .with_format(format)
//!         .with_level(LogLevel::Debug)
//!         .with_logger_sink(Arc::new(ConsoleLogger::default()));
//!
//!     init_logging(config).expect("Failed to initialize logging");
//!     tracing::info!(session_id = 42, "Engine started");
//! }
//! ```
//!
//! ## Session tagging
//!
//! Session actors run inside a `session` span carrying `session_id`. The sink
//! layer remembers that field per span, so every event emitted under it
//! reaches the [`LoggerSink`] with [`LogEntry::session_id`] set even when the
//! event itself does not repeat the field.

use std::fmt;
use std::io;
use std::str::FromStr;
use std::sync::Arc;

use bridge_traits::sink::{LogEntry, LogLevel, LoggerSink};
use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Id};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::{
    filter::EnvFilter,
    fmt::format::FmtSpan,
    layer::{Context, SubscriberExt},
    registry::LookupSpan,
    util::SubscriberInitExt,
    Layer, Registry,
};

use crate::error::{Error, Result};

/// Crates whose events pass at the configured level by default. Everything
/// else is held at `warn`.
const WORKSPACE_TARGETS: &[&str] = &[
    "jukebox_workspace",
    "core_runtime",
    "core_resolver",
    "core_playback",
    "core_service",
    "bridge_desktop",
];

/// Event fields that may hold a signed stream URL.
const LOCATOR_FIELDS: &[&str] = &["locator", "url", "stream_url"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Multi-line, coloured
    Pretty,
    /// One JSON object per line
    Json,
    /// One line per event
    Compact,
}

impl Default for LogFormat {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            Self::Pretty
        } else {
            Self::Json
        }
    }
}

impl FromStr for LogFormat {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            "compact" => Ok(Self::Compact),
            other => Err(Error::Config(format!(
                "unknown log format '{}' (expected pretty, json or compact)",
                other
            ))),
        }
    }
}

#[derive(Clone)]
pub struct LoggingConfig {
    pub format: LogFormat,
    /// Level applied to the workspace crates
    pub level: LogLevel,
    /// Full `EnvFilter` directive string; replaces the workspace default
    pub filter: Option<String>,
    pub logger_sink: Option<Arc<dyn LoggerSink>>,
    /// Log span open/close (pretty format only)
    pub enable_spans: bool,
    pub display_target: bool,
    /// Strip query strings from locator fields forwarded to the sink
    pub redact_locators: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            level: LogLevel::Info,
            filter: None,
            logger_sink: None,
            enable_spans: false,
            display_target: true,
            redact_locators: true,
        }
    }
}

impl fmt::Debug for LoggingConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoggingConfig")
            .field("format", &self.format)
            .field("level", &self.level)
            .field("filter", &self.filter)
            .field("logger_sink", &self.logger_sink.as_ref().map(|_| "<sink>"))
            .field("enable_spans", &self.enable_spans)
            .field("redact_locators", &self.redact_locators)
            .finish()
    }
}

impl LoggingConfig {
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn with_logger_sink(mut self, sink: Arc<dyn LoggerSink>) -> Self {
        self.logger_sink = Some(sink);
        self
    }

    pub fn with_spans(mut self, enable: bool) -> Self {
        self.enable_spans = enable;
        self
    }

    pub fn with_target(mut self, display: bool) -> Self {
        self.display_target = display;
        self
    }

    pub fn with_locator_redaction(mut self, redact: bool) -> Self {
        self.redact_locators = redact;
        self
    }
}

/// Install the global subscriber. Call once at startup.
///
/// # Errors
///
/// [`Error::Config`] for a filter that does not parse, [`Error::Logging`]
/// when a global subscriber is already installed.
pub fn init_logging(config: LoggingConfig) -> Result<()> {
    let filter = build_filter(&config)?;
    let sink_layer = LoggerSinkLayer::new(config.logger_sink.clone(), config.redact_locators);

    tracing_subscriber::registry()
        .with(console_layer(&config))
        .with(filter)
        .with(sink_layer)
        .try_init()
        .map_err(|e| Error::Logging(e.to_string()))
}

fn console_layer(config: &LoggingConfig) -> Box<dyn Layer<Registry> + Send + Sync> {
    let base = tracing_subscriber::fmt::layer()
        .with_target(config.display_target)
        .with_writer(io::stdout);

    match config.format {
        LogFormat::Pretty => base
            .pretty()
            .with_span_events(if config.enable_spans {
                FmtSpan::NEW | FmtSpan::CLOSE
            } else {
                FmtSpan::NONE
            })
            .boxed(),
        LogFormat::Json => base
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_span_list(false)
            .boxed(),
        LogFormat::Compact => base.compact().boxed(),
    }
}

fn build_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    let directives = match &config.filter {
        Some(custom) => custom.clone(),
        None => {
            let level = config.level.as_str().to_ascii_lowercase();
            std::iter::once("warn".to_string())
                .chain(
                    WORKSPACE_TARGETS
                        .iter()
                        .map(|target| format!("{}={}", target, level)),
                )
                .collect::<Vec<_>>()
                .join(",")
        }
    };

    EnvFilter::try_new(&directives)
        .map_err(|e| Error::Config(format!("invalid log filter '{}': {}", directives, e)))
}

// ============================================================================
// Sink layer
// ============================================================================

/// `session_id` recorded on a span, kept in the span's extensions.
struct SessionTag(String);

/// Mirrors events into a [`LoggerSink`].
struct LoggerSinkLayer {
    sink: Option<Arc<dyn LoggerSink>>,
    redact_locators: bool,
}

impl LoggerSinkLayer {
    fn new(sink: Option<Arc<dyn LoggerSink>>, redact_locators: bool) -> Self {
        Self {
            sink,
            redact_locators,
        }
    }

    fn entry_for(&self, level: LogLevel, event: &Event<'_>, session_id: Option<String>) -> LogEntry {
        let mut fields = FieldCollector::default();
        event.record(&mut fields);

        let message = fields
            .message
            .take()
            .unwrap_or_else(|| event.metadata().name().to_string());
        let mut entry = LogEntry::new(level, event.metadata().target(), message);
        entry.session_id = fields.session_id.take().or(session_id);

        for (name, value) in fields.values {
            let value = if self.redact_locators && LOCATOR_FIELDS.contains(&name) {
                redact_locator(&value)
            } else {
                value
            };
            entry = entry.with_field(name, value);
        }
        entry
    }
}

impl<S> Layer<S> for LoggerSinkLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        if self.sink.is_none() {
            return;
        }
        let mut fields = FieldCollector::default();
        attrs.record(&mut fields);
        if let (Some(session_id), Some(span)) = (fields.session_id, ctx.span(id)) {
            span.extensions_mut().insert(SessionTag(session_id));
        }
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let Some(sink) = self.sink.as_ref() else {
            return;
        };

        let level = log_level(*event.metadata().level());
        if level < sink.min_level() {
            return;
        }

        let inherited = ctx.event_scope(event).and_then(|scope| {
            scope
                .from_root()
                .filter_map(|span| span.extensions().get::<SessionTag>().map(|tag| tag.0.clone()))
                .last()
        });
        deliver(Arc::clone(sink), self.entry_for(level, event, inherited));
    }
}

/// Hand the entry to the sink on the ambient runtime, or inline when there is
/// none (startup code, plain unit tests).
fn deliver(sink: Arc<dyn LoggerSink>, entry: LogEntry) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move {
                if let Err(err) = sink.log(entry).await {
                    eprintln!("LoggerSink error: {}", err);
                }
            });
        }
        Err(_) => {
            if let Ok(runtime) = tokio::runtime::Builder::new_current_thread().build() {
                if let Err(err) = runtime.block_on(sink.log(entry)) {
                    eprintln!("LoggerSink error: {}", err);
                }
            }
        }
    }
}

#[derive(Default)]
struct FieldCollector {
    message: Option<String>,
    session_id: Option<String>,
    values: Vec<(&'static str, String)>,
}

impl FieldCollector {
    fn insert(&mut self, field: &Field, value: String) {
        match field.name() {
            "message" => self.message = Some(value),
            "session_id" => self.session_id = Some(value),
            name => self.values.push((name, value)),
        }
    }
}

impl Visit for FieldCollector {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.insert(field, value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.insert(field, format!("{:?}", value));
    }
}

fn log_level(level: Level) -> LogLevel {
    if level == Level::ERROR {
        LogLevel::Error
    } else if level == Level::WARN {
        LogLevel::Warn
    } else if level == Level::INFO {
        LogLevel::Info
    } else if level == Level::DEBUG {
        LogLevel::Debug
    } else {
        LogLevel::Trace
    }
}

/// Strip the query string from a stream locator before logging it.
///
/// Signed locators carry signatures, client IPs and expiry tokens in the
/// query; the host and path are enough to identify a stream.
///
/// ```ignore
/// use core_runtime::logging::redact_locator;
///
/// let locator = "https://rr1.googlevideo.com/videoplayback?expire=1700000000&sig=abc";
/// tracing::debug!(locator = %redact_locator(locator), "Opening stream");
/// // locator="https://rr1.googlevideo.com/videoplayback?[REDACTED]"
/// ```
pub fn redact_locator(locator: &str) -> String {
    match locator.split_once('?') {
        Some((base, query)) if !query.is_empty() => format!("{}?[REDACTED]", base),
        Some((base, _)) => base.to_string(),
        None => locator.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::error::Result as SinkResult;
    use std::sync::Mutex;

    #[derive(Default)]
    struct CapturingSink {
        entries: Mutex<Vec<LogEntry>>,
    }

    #[async_trait]
    impl LoggerSink for CapturingSink {
        async fn log(&self, entry: LogEntry) -> SinkResult<()> {
            self.entries.lock().unwrap().push(entry);
            Ok(())
        }

        fn min_level(&self) -> LogLevel {
            LogLevel::Debug
        }
    }

    fn capture(redact: bool) -> (Arc<CapturingSink>, impl Subscriber + Send + Sync) {
        let sink = Arc::new(CapturingSink::default());
        let layer = LoggerSinkLayer::new(Some(sink.clone() as Arc<dyn LoggerSink>), redact);
        (sink, tracing_subscriber::registry().with(layer))
    }

    #[test]
    fn test_log_format_from_str() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!(" compact ".parse::<LogFormat>().unwrap(), LogFormat::Compact);
        assert!(matches!(
            "syslog".parse::<LogFormat>(),
            Err(Error::Config(msg)) if msg.contains("syslog")
        ));
    }

    #[test]
    fn test_default_filter_covers_workspace() {
        let config = LoggingConfig::default().with_level(LogLevel::Debug);
        let filter = build_filter(&config).unwrap().to_string();
        assert!(filter.contains("core_playback=debug"));
        assert!(filter.contains("bridge_desktop=debug"));
    }

    #[test]
    fn test_custom_filter_replaces_default() {
        let config = LoggingConfig::default().with_filter("core_resolver=trace");
        let filter = build_filter(&config).unwrap().to_string();
        assert!(filter.contains("core_resolver=trace"));
        assert!(!filter.contains("core_playback"));
    }

    #[test]
    fn test_invalid_filter_is_config_error() {
        let config = LoggingConfig::default().with_filter("core_playback=loud");
        assert!(matches!(build_filter(&config), Err(Error::Config(_))));
    }

    #[test]
    fn test_redact_locator() {
        assert_eq!(
            redact_locator("https://host.example/videoplayback?expire=1&sig=x"),
            "https://host.example/videoplayback?[REDACTED]"
        );
        assert_eq!(redact_locator("https://a.example/path?"), "https://a.example/path");
        assert_eq!(
            redact_locator("https://www.youtube.com/watch"),
            "https://www.youtube.com/watch"
        );
    }

    #[test]
    fn test_sink_receives_event_fields() {
        let (sink, subscriber) = capture(true);
        tracing::subscriber::with_default(subscriber, || {
            tracing::warn!(
                target: "core_playback::player",
                session_id = 42u64,
                attempt = 2,
                "acquisition failed"
            );
            tracing::trace!("below the sink's level");
        });

        let entries = sink.entries.lock().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].target, "core_playback::player");
        assert_eq!(entries[0].message, "acquisition failed");
        assert_eq!(entries[0].session_id.as_deref(), Some("42"));
        assert_eq!(entries[0].fields.get("attempt").map(String::as_str), Some("2"));
    }

    #[test]
    fn test_session_id_inherited_from_span() {
        let (sink, subscriber) = capture(true);
        tracing::subscriber::with_default(subscriber, || {
            let span = tracing::info_span!("session", session_id = 7u64);
            let _entered = span.enter();
            tracing::info!("Now playing");
        });

        let entries = sink.entries.lock().unwrap();
        assert_eq!(entries[0].session_id.as_deref(), Some("7"));
    }

    #[test]
    fn test_locator_fields_redacted_for_sink() {
        let (sink, subscriber) = capture(true);
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(locator = "https://cdn.example/a?sig=secret", "Opening stream");
        });

        let entries = sink.entries.lock().unwrap();
        assert_eq!(
            entries[0].fields.get("locator").map(String::as_str),
            Some("https://cdn.example/a?[REDACTED]")
        );
    }

    #[test]
    fn test_redaction_can_be_disabled() {
        let (sink, subscriber) = capture(false);
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(url = "https://cdn.example/a?sig=secret", "Opening stream");
        });

        let entries = sink.entries.lock().unwrap();
        assert_eq!(
            entries[0].fields.get("url").map(String::as_str),
            Some("https://cdn.example/a?sig=secret")
        );
    }
}
