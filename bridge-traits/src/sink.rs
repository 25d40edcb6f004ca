//! Host Log Sink
//!
//! The engine's `tracing` events can be mirrored into whatever log pipeline
//! the host runs (a bot's admin channel, a file, stderr). Entries arrive
//! already filtered and with signed locators redacted.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "TRACE",
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = BridgeError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "TRACE" => Ok(LogLevel::Trace),
            "DEBUG" => Ok(LogLevel::Debug),
            "INFO" => Ok(LogLevel::Info),
            "WARN" | "WARNING" => Ok(LogLevel::Warn),
            "ERROR" => Ok(LogLevel::Error),
            _ => Err(BridgeError::OperationFailed(format!(
                "unknown log level '{}'",
                value
            ))),
        }
    }
}

/// One mirrored `tracing` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub level: LogLevel,
    pub timestamp: DateTime<Utc>,
    /// Module path that emitted the event
    pub target: String,
    pub message: String,
    /// Structured fields, sorted by name
    pub fields: BTreeMap<String, String>,
    /// Session (guild) the event happened in, if any
    pub session_id: Option<String>,
}

impl LogEntry {
    pub fn new(level: LogLevel, target: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level,
            timestamp: Utc::now(),
            target: target.into(),
            message: message.into(),
            fields: BTreeMap::new(),
            session_id: None,
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Single-line rendering:
    /// `<time> <LEVEL> [session <id>] <target>: <message> key=value ...`
    pub fn render(&self) -> String {
        let mut line = format!(
            "{} {:<5} ",
            self.timestamp.format("%Y-%m-%dT%H:%M:%S%.3fZ"),
            self.level
        );
        if let Some(session_id) = &self.session_id {
            line.push_str(&format!("[session {}] ", session_id));
        }
        line.push_str(&format!("{}: {}", self.target, self.message));
        for (key, value) in &self.fields {
            line.push_str(&format!(" {}={}", key, value));
        }
        line
    }
}

/// Receives mirrored log entries.
///
/// `log` runs on a spawned task, so a slow sink delays nothing but itself.
///
/// ```ignore
/// use bridge_traits::sink::{LogEntry, LogLevel, LoggerSink};
///
/// async fn report(logger: &dyn LoggerSink, error: &str) {
///     let entry = LogEntry::new(LogLevel::Error, "core_playback", error)
///         .with_session_id("42");
///     logger.log(entry).await.ok();
/// }
/// ```
#[async_trait::async_trait]
pub trait LoggerSink: Send + Sync {
    async fn log(&self, entry: LogEntry) -> Result<()>;

    async fn flush(&self) -> Result<()> {
        Ok(())
    }

    /// Entries below this level are never built.
    fn min_level(&self) -> LogLevel {
        LogLevel::Info
    }
}

/// Prints [`LogEntry::render`] lines to stderr.
#[derive(Debug, Clone)]
pub struct ConsoleLogger {
    pub min_level: LogLevel,
}

impl Default for ConsoleLogger {
    fn default() -> Self {
        Self {
            min_level: LogLevel::Info,
        }
    }
}

#[async_trait::async_trait]
impl LoggerSink for ConsoleLogger {
    async fn log(&self, entry: LogEntry) -> Result<()> {
        if entry.level >= self.min_level {
            eprintln!("{}", entry.render());
        }
        Ok(())
    }

    fn min_level(&self) -> LogLevel {
        self.min_level
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn entry() -> LogEntry {
        let mut entry = LogEntry::new(LogLevel::Warn, "core_resolver", "strategy failed")
            .with_field("strategy", "mobile")
            .with_field("attempt", "2")
            .with_session_id("1234");
        entry.timestamp = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        entry
    }

    #[test]
    fn test_render_orders_fields() {
        assert_eq!(
            entry().render(),
            "2024-05-01T12:00:00.000Z WARN  [session 1234] core_resolver: strategy failed attempt=2 strategy=mobile"
        );
    }

    #[test]
    fn test_render_without_session() {
        let mut entry = LogEntry::new(LogLevel::Info, "core_service", "Core service initialized");
        entry.timestamp = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        assert_eq!(
            entry.render(),
            "2024-05-01T12:00:00.000Z INFO  core_service: Core service initialized"
        );
    }

    #[test]
    fn test_level_parse() {
        assert_eq!("warning".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert_eq!(" debug ".parse::<LogLevel>().unwrap(), LogLevel::Debug);
        assert!("loud".parse::<LogLevel>().is_err());
        assert!(LogLevel::Error > LogLevel::Warn);
    }

    #[tokio::test]
    async fn test_console_logger_accepts_filtered_entries() {
        let logger = ConsoleLogger {
            min_level: LogLevel::Error,
        };
        assert!(logger.log(entry()).await.is_ok());
        assert_eq!(logger.min_level(), LogLevel::Error);
    }
}
