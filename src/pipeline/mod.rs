//! Normalized log entries and the seams between the parser that produces
//! them and the recorders they are forwarded to.

pub mod dispatch;
pub mod stacktrace;
pub mod timestamp;
pub mod zap;

#[cfg(test)]
pub mod testing;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Map, Value};

pub use dispatch::{DispatchError, Dispatcher};
pub use stacktrace::{Frame, Stacktrace};
pub use timestamp::{ResolvedTimestamp, TimestampSource};

/// One line written by Docker's `json-file` logging driver.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct DockerLogLine {
    /// The application's output, itself a JSON document for structured loggers.
    pub log: String,
    #[serde(default)]
    pub stream: String,
    /// RFC3339 timestamp with nanoseconds, set by the runtime.
    #[serde(default)]
    pub time: String,
}

impl DockerLogLine {
    pub fn from_json(text: &str) -> Result<Self, ParseError> {
        serde_json::from_str(text).map_err(ParseError::DockerLine)
    }
}

/// A parsed log entry, independent of the format it was written in.
pub trait Entry: Send + Sync + std::fmt::Debug {
    fn level(&self) -> &str;
    fn message(&self) -> &str;
    /// `None` when the entry carries no usable timestamp of its own.
    fn timestamp(&self) -> Option<ResolvedTimestamp>;
    /// Every structured field of the entry, including level and message.
    fn data(&self) -> &Map<String, Value>;
    /// The richer error-reporting view of this entry, if it has one.
    fn diagnostic(&self) -> Option<&dyn DiagnosticEntry> {
        None
    }
}

/// Entries that carry enough context to be reported as errors.
pub trait DiagnosticEntry: Entry {
    fn logger(&self) -> &str;
    /// Call site that produced the entry, e.g. `zap/logger.go:33`.
    fn culprit(&self) -> &str;
    fn release(&self) -> &str;
    /// Frames innermost call first. Empty when the entry has no stacktrace.
    fn stacktrace(&self) -> Stacktrace;
}

/// Per-line metadata that is not part of the entry itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryContext {
    /// Docker ID of the container that logged the line.
    pub container_id: String,
    /// When the line was read. Used if the entry has no timestamp.
    pub fallback_time: DateTime<Utc>,
}

impl EntryContext {
    pub fn new(container_id: impl Into<String>, fallback_time: DateTime<Utc>) -> Self {
        Self {
            container_id: container_id.into(),
            fallback_time,
        }
    }

    /// The entry's own timestamp, or the tail time when it has none.
    pub fn resolve_timestamp(&self, entry: &dyn Entry) -> ResolvedTimestamp {
        timestamp::or_tail_time(entry.timestamp(), self.fallback_time)
    }
}

/// Turns raw runtime lines into entries.
pub trait Parser: Send + Sync {
    fn parse(&self, line: &DockerLogLine) -> Result<Box<dyn Entry>, ParseError>;
}

/// A destination entries are forwarded to, e.g. Sentry.
#[async_trait]
pub trait Recorder: Send + Sync {
    /// Stable name used when reporting this recorder's errors.
    fn name(&self) -> &str;
    async fn record(&self, entry: &dyn Entry, ctx: &EntryContext) -> Result<(), RecorderError>;
    /// Called once, before the program exits.
    async fn close(&self) -> Result<(), RecorderError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("Unmarshaling Docker log entry: {0}")]
    DockerLine(#[source] serde_json::Error),
    #[error("Unmarshaling structured log entry: {0}")]
    Structured(#[source] serde_json::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum RecorderError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("Invalid DSN: {0}")]
    Dsn(String),
    #[error("Unable to acquire access token: {0}")]
    Token(String),
}
