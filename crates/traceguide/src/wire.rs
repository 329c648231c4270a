//! Wire records for the report RPC.
//!
//! These are plain serde types; the byte encoding is owned by a
//! [`Codec`](crate::codec::Codec).

use serde::{Deserialize, Serialize};

/// Severity of a log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogLevel {
    #[serde(rename = "I")]
    Info,
    #[serde(rename = "W")]
    Warn,
    #[serde(rename = "E")]
    Error,
    #[serde(rename = "F")]
    Fatal,
}

impl LogLevel {
    /// Single-letter wire code.
    pub fn code(self) -> &'static str {
        match self {
            Self::Info => "I",
            Self::Warn => "W",
            Self::Error => "E",
            Self::Fatal => "F",
        }
    }

    /// Error and fatal records carry the error flag.
    pub fn is_error(self) -> bool {
        matches!(self, Self::Error | Self::Fatal)
    }
}

/// One buffered log event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub timestamp_micros: i64,
    /// Empty until identity exists; stamped when the batch is built.
    pub runtime_guid: String,
    pub span_guid: Option<String>,
    pub level: LogLevel,
    pub error_flag: bool,
    pub message: String,
    pub payload_json: Option<String>,
}

/// Correlation key/value for joining a span with an external identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceJoinId {
    pub trace_key: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
}

/// One finished span.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpanRecord {
    /// Empty until identity exists; stamped when the batch is built.
    pub runtime_guid: String,
    pub span_guid: String,
    pub span_name: String,
    pub oldest_micros: i64,
    pub youngest_micros: i64,
    pub join_ids: Vec<TraceJoinId>,
    pub attributes: Vec<KeyValue>,
    pub error_flag: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedCounter {
    pub name: String,
    pub value: i64,
}

/// Identity of the reporting runtime as sent to the collector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeInfo {
    pub guid: String,
    pub start_micros: i64,
    pub group_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Auth {
    pub access_token: String,
}

/// One batched report covering `[oldest_micros, youngest_micros]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportRequest {
    pub runtime: RuntimeInfo,
    pub oldest_micros: i64,
    pub youngest_micros: i64,
    pub log_records: Vec<LogRecord>,
    pub span_records: Vec<SpanRecord>,
    pub counters: Vec<NamedCounter>,
}

/// Server instruction carried on a report response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    #[serde(default)]
    pub disable: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportResponse {
    #[serde(default)]
    pub commands: Vec<Command>,
    #[serde(default)]
    pub errors: Vec<String>,
}

impl ReportResponse {
    /// Returns `true` if any command asks the client to stop reporting.
    pub fn requests_disable(&self) -> bool {
        self.commands.iter().any(|c| c.disable)
    }
}
