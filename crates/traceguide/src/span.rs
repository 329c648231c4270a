//! Span handle.
//!
//! A [`Span`] records one timed operation. It borrows the [`Runtime`] that
//! created it, so it can never outlive it, and it submits itself to that
//! runtime's span buffer on [`Span::finish`].
//!
//! A span dropped without `finish()` is finished automatically, after a
//! warning log, so span data is never silently lost. The end timestamp
//! doubles as the "finished" flag: zero means unfinished.
//!
//! Spans returned by a disabled runtime are inert: every method is a no-op.

use crate::identity::generate_guid;
use crate::runtime::Runtime;
use crate::wire::{KeyValue, LogLevel, SpanRecord, TraceJoinId};
use serde_json::Value;
use std::collections::BTreeMap;

/// Attribute recording the parent span's guid.
pub const PARENT_SPAN_GUID_KEY: &str = "parent_span_guid";
/// Join key for the end user of an operation.
pub const END_USER_ID_KEY: &str = "end_user_id";

/// Mutable per-span state, finished and serialized by the runtime.
#[derive(Debug, Clone, Default)]
pub(crate) struct SpanData {
    pub(crate) guid: String,
    pub(crate) operation: String,
    pub(crate) join_ids: BTreeMap<String, String>,
    pub(crate) attributes: BTreeMap<String, String>,
    pub(crate) start_micros: i64,
    pub(crate) end_micros: i64,
    pub(crate) error_flag: bool,
}

impl SpanData {
    /// Wire-ready record. Join ids and attributes are already strings.
    pub(crate) fn to_record(&self, runtime_guid: &str) -> SpanRecord {
        SpanRecord {
            runtime_guid: runtime_guid.to_owned(),
            span_guid: self.guid.clone(),
            span_name: self.operation.clone(),
            oldest_micros: self.start_micros,
            youngest_micros: self.end_micros,
            join_ids: self
                .join_ids
                .iter()
                .map(|(key, value)| TraceJoinId {
                    trace_key: key.clone(),
                    value: value.clone(),
                })
                .collect(),
            attributes: self
                .attributes
                .iter()
                .map(|(key, value)| KeyValue {
                    key: key.clone(),
                    value: value.clone(),
                })
                .collect(),
            error_flag: self.error_flag,
        }
    }
}

/// Handle to one in-progress operation.
#[derive(Debug)]
pub struct Span<'rt> {
    runtime: Option<&'rt Runtime>,
    data: SpanData,
}

impl<'rt> Span<'rt> {
    pub(crate) fn live(runtime: &'rt Runtime, start_micros: i64) -> Self {
        Self {
            runtime: Some(runtime),
            data: SpanData {
                guid: generate_guid(),
                start_micros,
                ..SpanData::default()
            },
        }
    }

    /// An inert span, handed out by a disabled runtime.
    pub(crate) fn noop() -> Self {
        Self {
            runtime: None,
            data: SpanData::default(),
        }
    }

    pub fn guid(&self) -> &str {
        &self.data.guid
    }

    pub fn operation(&self) -> &str {
        &self.data.operation
    }

    pub fn join_ids(&self) -> &BTreeMap<String, String> {
        &self.data.join_ids
    }

    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.data.attributes
    }

    pub fn start_micros(&self) -> i64 {
        self.data.start_micros
    }

    pub fn end_micros(&self) -> i64 {
        self.data.end_micros
    }

    pub fn error_flag(&self) -> bool {
        self.data.error_flag
    }

    pub fn is_finished(&self) -> bool {
        self.data.end_micros != 0
    }

    pub fn is_noop(&self) -> bool {
        self.runtime.is_none()
    }

    pub fn set_operation(&mut self, name: impl Into<String>) -> &mut Self {
        if !self.is_noop() {
            self.data.operation = name.into();
        }
        self
    }

    /// Sets an attribute; a repeated key overwrites.
    pub fn add_attribute(&mut self, key: impl Into<String>, value: impl ToString) -> &mut Self {
        if !self.is_noop() {
            self.data.attributes.insert(key.into(), value.to_string());
        }
        self
    }

    /// Sets a join id; a repeated key overwrites. Values are stored as strings.
    pub fn add_trace_join_id(&mut self, key: impl Into<String>, value: impl ToString) -> &mut Self {
        if !self.is_noop() {
            self.data.join_ids.insert(key.into(), value.to_string());
        }
        self
    }

    pub fn set_end_user_id(&mut self, id: impl ToString) -> &mut Self {
        self.add_trace_join_id(END_USER_ID_KEY, id)
    }

    /// Links this span to `parent`.
    ///
    /// Join ids of the parent that the child has not set are copied; the
    /// child's own values always win. The parent's guid is recorded as the
    /// `parent_span_guid` attribute.
    pub fn set_parent(&mut self, parent: &Span<'_>) -> &mut Self {
        if self.is_noop() {
            return self;
        }
        for (key, value) in &parent.data.join_ids {
            self.data
                .join_ids
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
        self.add_attribute(PARENT_SPAN_GUID_KEY, parent.guid())
    }

    /// Emits a log record tagged with this span's guid.
    ///
    /// Error and fatal records also set the span's error flag.
    pub fn log(
        &mut self,
        level: LogLevel,
        message: impl Into<String>,
        payload: Option<&Value>,
    ) -> &mut Self {
        let Some(runtime) = self.runtime else {
            return self;
        };
        if level.is_error() {
            self.data.error_flag = true;
        }
        runtime.record_log(Some(&self.data.guid), level, message.into(), payload);
        self
    }

    pub fn info(&mut self, message: impl Into<String>) -> &mut Self {
        self.log(LogLevel::Info, message, None)
    }

    pub fn warn(&mut self, message: impl Into<String>) -> &mut Self {
        self.log(LogLevel::Warn, message, None)
    }

    pub fn error(&mut self, message: impl Into<String>) -> &mut Self {
        self.log(LogLevel::Error, message, None)
    }

    /// Logs at fatal level. The host process is not terminated.
    pub fn fatal(&mut self, message: impl Into<String>) -> &mut Self {
        self.log(LogLevel::Fatal, message, None)
    }

    /// Submits the span to the runtime's span buffer.
    ///
    /// Not deduplicated: finishing twice submits two records.
    pub fn finish(&mut self) {
        if let Some(runtime) = self.runtime {
            runtime.finish_span(&mut self.data);
        }
    }

    /// Wire-ready record for this span.
    pub fn to_record(&self, runtime_guid: &str) -> SpanRecord {
        self.data.to_record(runtime_guid)
    }
}

impl Drop for Span<'_> {
    fn drop(&mut self) {
        let Some(runtime) = self.runtime else {
            return;
        };
        if self.data.end_micros == 0 {
            runtime.record_log(
                Some(&self.data.guid),
                LogLevel::Warn,
                format!(
                    "finish() never called on span (operation='{}')",
                    self.data.operation
                ),
                None,
            );
            runtime.finish_span(&mut self.data);
        }
    }
}
