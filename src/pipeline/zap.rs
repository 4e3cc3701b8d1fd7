//! Entries written by zap's JSON encoder.

use log::debug;
use serde_json::{Map, Value};

use super::stacktrace::{self, Stacktrace};
use super::timestamp::{self, ResolvedTimestamp};
use super::{DiagnosticEntry, DockerLogLine, Entry, ParseError, Parser};

/// Parses the `log` field of runtime lines as zap JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZapParser {
    raw_fallback: bool,
}

impl ZapParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// When enabled, lines that are not zap JSON become [`RawEntry`]s
    /// instead of parse errors.
    pub fn with_raw_fallback(mut self, enabled: bool) -> Self {
        self.raw_fallback = enabled;
        self
    }
}

impl Parser for ZapParser {
    fn parse(&self, line: &DockerLogLine) -> Result<Box<dyn Entry>, ParseError> {
        match serde_json::from_str::<Map<String, Value>>(&line.log) {
            Ok(fields) => Ok(Box::new(ZapEntry::from_fields(fields, &line.time))),
            Err(e) if self.raw_fallback => {
                debug!("Passing through unstructured line ({e})");
                Ok(Box::new(RawEntry::new(line)))
            }
            Err(e) => Err(ParseError::Structured(e)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ZapEntry {
    fields: Map<String, Value>,
    timestamp: Option<ResolvedTimestamp>,
}

impl ZapEntry {
    /// Resolves the timestamp from the fields, falling back to the
    /// runtime's time, and records the source under `timestamp_comes_from`.
    pub fn from_fields(mut fields: Map<String, Value>, runtime_time: &str) -> Self {
        let timestamp = timestamp::resolve(fields.get("ts"), runtime_time);
        if let Some(resolved) = timestamp {
            fields.insert(
                timestamp::SOURCE_KEY.to_string(),
                Value::String(resolved.source.as_ref().to_string()),
            );
        }
        Self { fields, timestamp }
    }

    fn get(&self, key: &str) -> &str {
        self.fields.get(key).and_then(Value::as_str).unwrap_or("")
    }
}

impl Entry for ZapEntry {
    fn level(&self) -> &str {
        self.get("level")
    }

    fn message(&self) -> &str {
        self.get("msg")
    }

    fn timestamp(&self) -> Option<ResolvedTimestamp> {
        self.timestamp
    }

    fn data(&self) -> &Map<String, Value> {
        &self.fields
    }

    fn diagnostic(&self) -> Option<&dyn DiagnosticEntry> {
        Some(self)
    }
}

impl DiagnosticEntry for ZapEntry {
    fn logger(&self) -> &str {
        self.get("logger")
    }

    fn culprit(&self) -> &str {
        self.get("caller")
    }

    fn release(&self) -> &str {
        self.get("release")
    }

    fn stacktrace(&self) -> Stacktrace {
        stacktrace::transcode(self.get("stacktrace"))
    }
}

/// Unstructured output kept verbatim as the message.
#[derive(Debug, Clone, PartialEq)]
pub struct RawEntry {
    message: String,
    timestamp: Option<ResolvedTimestamp>,
    data: Map<String, Value>,
}

impl RawEntry {
    pub fn new(line: &DockerLogLine) -> Self {
        Self {
            message: line.log.trim_end_matches(['\r', '\n']).to_string(),
            timestamp: timestamp::resolve(None, &line.time),
            data: Map::new(),
        }
    }
}

impl Entry for RawEntry {
    fn level(&self) -> &str {
        ""
    }

    fn message(&self) -> &str {
        &self.message
    }

    fn timestamp(&self) -> Option<ResolvedTimestamp> {
        self.timestamp
    }

    fn data(&self) -> &Map<String, Value> {
        &self.data
    }
}
