//! Buffering runtime.
//!
//! The [`Runtime`] owns the log and span buffers, the drop counters, the
//! report window and the transport. All of it lives behind one mutex, so
//! every public method takes `&self` and a runtime can be shared across
//! threads. There is no background flusher: after each log append or span
//! finish the caller's thread checks the flush deadline and, if it has
//! passed, flushes inline while still holding the lock. At most one flush is
//! therefore ever in flight.
//!
//! # Lifecycle
//!
//! ```text
//! new ──► buffering (identity optional) ──► flush ... flush ──► shutdown
//!              │
//!              └── disable() or server "disable" ──► inert (permanent)
//! ```
//!
//! Reports are only sent once identity is set. Records buffered before that
//! are kept and stamped with the runtime guid when the batch is built.

use crate::buffer::BoundedBuffer;
use crate::clock::{duration_micros, now_micros};
use crate::config::{DeliveryGuarantee, RuntimeOptions};
use crate::error::ConfigError;
use crate::identity::{self, Identity};
use crate::invariants::debug_assert_window_ordered;
use crate::payload::encode_payload;
use crate::span::{Span, SpanData};
use crate::transport::{self, SendOutcome, Transport};
use crate::wire::{
    Auth, LogLevel, LogRecord, NamedCounter, ReportRequest, ReportResponse, RuntimeInfo,
    SpanRecord,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Counter incremented for every log record evicted on overflow.
pub const DROPPED_LOGS: &str = "dropped_logs";
/// Counter incremented for every span record evicted on overflow.
pub const DROPPED_SPANS: &str = "dropped_spans";

/// Number of records waiting for the next flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Pending {
    pub logs: usize,
    pub spans: usize,
}

struct State {
    enabled: bool,
    identity: Option<Identity>,
    start_micros: i64,
    logs: BoundedBuffer<LogRecord>,
    spans: BoundedBuffer<SpanRecord>,
    counters: BTreeMap<String, i64>,
    report_start_micros: i64,
    next_flush_micros: i64,
    flush_period_micros: i64,
    transport: Box<dyn Transport>,
    rng: StdRng,
}

/// The instrumentation runtime.
pub struct Runtime {
    state: Mutex<State>,
    max_payload_depth: usize,
    delivery: DeliveryGuarantee,
    debug: bool,
    shut_down: AtomicBool,
}

impl Runtime {
    /// Creates a runtime with the transport selected by `options.transport`.
    ///
    /// If both identity fields are present they are validated and set;
    /// otherwise identity can be supplied later with [`Runtime::set_identity`].
    pub fn new(options: RuntimeOptions) -> Result<Self, ConfigError> {
        options.validate()?;
        let transport = transport::from_options(&options)?;
        Self::with_transport(options, transport)
    }

    /// Creates a runtime that delivers through `transport`.
    pub fn with_transport(
        options: RuntimeOptions,
        transport: Box<dyn Transport>,
    ) -> Result<Self, ConfigError> {
        options.validate()?;

        let start_micros = now_micros();
        let flush_period_micros = duration_micros(options.reporting_period);
        let identity = match options.identity() {
            Some((group_name, access_token)) => {
                Some(Identity::new(group_name, access_token, start_micros)?)
            }
            None => None,
        };

        let counters = [DROPPED_LOGS, DROPPED_SPANS]
            .into_iter()
            .map(|name| (name.to_owned(), 0))
            .collect();

        if options.debug {
            debug!(
                transport = transport.name(),
                max_log_records = options.max_log_records,
                max_span_records = options.max_span_records,
                identity_set = identity.is_some(),
                "runtime created"
            );
        }

        Ok(Self {
            state: Mutex::new(State {
                enabled: true,
                identity,
                start_micros,
                logs: BoundedBuffer::new(options.max_log_records),
                spans: BoundedBuffer::new(options.max_span_records),
                counters,
                report_start_micros: start_micros,
                next_flush_micros: start_micros.saturating_add(flush_period_micros),
                flush_period_micros,
                transport,
                rng: StdRng::from_entropy(),
            }),
            max_payload_depth: options.max_payload_depth,
            delivery: options.delivery,
            debug: options.debug,
            shut_down: AtomicBool::new(false),
        })
    }

    // A panic inside a transport must not wedge every later caller.
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sets the reporting identity.
    ///
    /// The first successful call fixes identity and derives the runtime guid.
    /// Repeating the same values is accepted; different values are rejected.
    pub fn set_identity(&self, group_name: &str, access_token: &str) -> Result<(), ConfigError> {
        identity::validate(group_name, access_token)?;
        let mut state = self.lock();
        match &state.identity {
            Some(existing) => existing.check_consistent(group_name, access_token),
            None => {
                let identity = Identity::new(group_name, access_token, state.start_micros)?;
                if self.debug {
                    debug!(guid = identity.runtime_guid(), "runtime identity set");
                }
                state.identity = Some(identity);
                Ok(())
            }
        }
    }

    /// Runtime guid, once identity is set.
    pub fn guid(&self) -> Option<String> {
        self.lock()
            .identity
            .as_ref()
            .map(|identity| identity.runtime_guid().to_owned())
    }

    pub fn identity(&self) -> Option<Identity> {
        self.lock().identity.clone()
    }

    pub fn is_enabled(&self) -> bool {
        self.lock().enabled
    }

    /// Buffers a log record, with an optional structured payload.
    ///
    /// A payload nested deeper than `max_payload_depth` is dropped from the
    /// record; the message is still buffered.
    pub fn log(&self, level: LogLevel, message: impl Into<String>, payload: Option<&Value>) {
        self.record_log(None, level, message.into(), payload);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, message, None);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.log(LogLevel::Warn, message, None);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(LogLevel::Error, message, None);
    }

    /// Logs at fatal level. The host process is not terminated.
    pub fn fatal(&self, message: impl Into<String>) {
        self.log(LogLevel::Fatal, message, None);
    }

    pub(crate) fn record_log(
        &self,
        span_guid: Option<&str>,
        level: LogLevel,
        message: String,
        payload: Option<&Value>,
    ) {
        let payload_json = payload.and_then(|value| {
            match encode_payload(value, self.max_payload_depth) {
                Ok(json) => Some(json),
                Err(e) => {
                    debug!(error = %e, "log payload rejected");
                    None
                }
            }
        });

        let mut state = self.lock();
        if !state.enabled {
            return;
        }
        let record = LogRecord {
            timestamp_micros: now_micros(),
            runtime_guid: state.runtime_guid(),
            span_guid: span_guid.map(str::to_owned),
            level,
            error_flag: level.is_error(),
            message,
            payload_json,
        };
        let State { logs, rng, .. } = &mut *state;
        if logs.push(record, rng) {
            state.increment(DROPPED_LOGS);
        }
        self.flush_if_due(&mut state);
    }

    /// Starts a span timed from now. A disabled runtime returns an inert span.
    pub fn start_span(&self) -> Span<'_> {
        if !self.is_enabled() {
            return Span::noop();
        }
        Span::live(self, now_micros())
    }

    pub(crate) fn finish_span(&self, data: &mut SpanData) {
        let mut state = self.lock();
        if !state.enabled {
            return;
        }
        data.end_micros = now_micros().max(data.start_micros);
        let record = data.to_record(&state.runtime_guid());
        let State { spans, rng, .. } = &mut *state;
        if spans.push(record, rng) {
            state.increment(DROPPED_SPANS);
        }
        self.flush_if_due(&mut state);
    }

    fn flush_if_due(&self, state: &mut State) {
        if now_micros() >= state.next_flush_micros {
            self.flush_locked(state);
        }
    }

    /// Sends everything buffered as one report.
    ///
    /// Does nothing while identity is unset or when both buffers are empty.
    /// Delivery failures are absorbed; they never reach the caller.
    pub fn flush(&self) {
        let mut state = self.lock();
        self.flush_locked(&mut state);
    }

    fn flush_locked(&self, state: &mut State) {
        if !state.enabled {
            return;
        }
        let now = now_micros();
        state.next_flush_micros = now.saturating_add(state.flush_period_micros);

        let Some(identity) = state.identity.clone() else {
            return;
        };
        if state.logs.is_empty() && state.spans.is_empty() {
            return;
        }

        let guid = identity.runtime_guid();
        let mut log_records = state.logs.take();
        for record in log_records.iter_mut().filter(|r| r.runtime_guid.is_empty()) {
            record.runtime_guid = guid.to_owned();
        }
        let mut span_records = state.spans.take();
        for record in span_records.iter_mut().filter(|r| r.runtime_guid.is_empty()) {
            record.runtime_guid = guid.to_owned();
        }

        let counters = state
            .counters
            .iter()
            .map(|(name, value)| NamedCounter {
                name: name.clone(),
                value: *value,
            })
            .collect();
        state.counters.values_mut().for_each(|value| *value = 0);

        let oldest_micros = state.report_start_micros;
        let youngest_micros = now.max(oldest_micros);
        debug_assert_window_ordered!(oldest_micros, youngest_micros);

        let request = ReportRequest {
            runtime: RuntimeInfo {
                guid: guid.to_owned(),
                start_micros: identity.start_micros(),
                group_name: identity.group_name().to_owned(),
            },
            oldest_micros,
            youngest_micros,
            log_records,
            span_records,
            counters,
        };
        let auth = Auth {
            access_token: identity.access_token().to_owned(),
        };

        if self.debug {
            debug!(
                logs = request.log_records.len(),
                spans = request.span_records.len(),
                oldest_micros,
                youngest_micros,
                "flushing report"
            );
        }

        match state.transport.send(&auth, &request) {
            SendOutcome::Unconfirmed => state.report_start_micros = youngest_micros,
            SendOutcome::Delivered(response) => {
                state.report_start_micros = youngest_micros;
                self.apply_response(state, &response);
            }
            SendOutcome::Failed(e) => {
                debug!(error = %e, transport = state.transport.name(), "report delivery failed");
                match self.delivery {
                    DeliveryGuarantee::ClearOnSend => state.report_start_micros = youngest_micros,
                    DeliveryGuarantee::RetainUntilAcknowledged => state.retain(request),
                }
            }
        }
    }

    fn apply_response(&self, state: &mut State, response: &ReportResponse) {
        for error in &response.errors {
            debug!(error = %error, "collector reported an error");
        }
        if response.requests_disable() {
            debug!("collector requested disable");
            state.disable();
        }
    }

    /// Discards all buffered data and turns every later call into a no-op.
    /// Permanent.
    pub fn disable(&self) {
        self.lock().disable();
    }

    pub fn pending(&self) -> Pending {
        let state = self.lock();
        Pending {
            logs: state.logs.len(),
            spans: state.spans.len(),
        }
    }

    /// Current counter values, including the drop counters.
    pub fn counters(&self) -> BTreeMap<String, i64> {
        self.lock().counters.clone()
    }

    /// Final flush, then releases the transport. Runs at most once.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut state = self.lock();
        self.flush_locked(&mut state);
        state.transport.close();
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("Runtime")
            .field("enabled", &state.enabled)
            .field("identity", &state.identity)
            .field("pending_logs", &state.logs.len())
            .field("pending_spans", &state.spans.len())
            .field("transport", &state.transport.name())
            .finish_non_exhaustive()
    }
}

impl State {
    fn runtime_guid(&self) -> String {
        self.identity
            .as_ref()
            .map(|identity| identity.runtime_guid().to_owned())
            .unwrap_or_default()
    }

    fn increment(&mut self, name: &str) {
        *self.counters.entry(name.to_owned()).or_insert(0) += 1;
    }

    fn disable(&mut self) {
        self.enabled = false;
        self.logs.clear();
        self.spans.clear();
    }

    /// Puts an unsent report back; the window start is left unchanged.
    fn retain(&mut self, request: ReportRequest) {
        let dropped_logs = self.logs.restore(request.log_records);
        let dropped_spans = self.spans.restore(request.span_records);
        for counter in request.counters {
            *self.counters.entry(counter.name).or_insert(0) += counter.value;
        }
        for (name, dropped) in [(DROPPED_LOGS, dropped_logs), (DROPPED_SPANS, dropped_spans)] {
            *self.counters.entry(name.to_owned()).or_insert(0) +=
                i64::try_from(dropped).unwrap_or(i64::MAX);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::wire::Command;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    /// Records every request and answers with a scripted outcome.
    struct RecordingTransport {
        sent: Arc<Mutex<Vec<ReportRequest>>>,
        outcome: SendOutcome,
    }

    impl Transport for RecordingTransport {
        fn send(&mut self, _auth: &Auth, request: &ReportRequest) -> SendOutcome {
            self.sent.lock().unwrap().push(request.clone());
            self.outcome.clone()
        }

        fn name(&self) -> &str {
            "recording"
        }
    }

    fn options() -> RuntimeOptions {
        RuntimeOptions::default().with_reporting_period(Duration::from_secs(3600))
    }

    fn runtime_with(
        options: RuntimeOptions,
        outcome: SendOutcome,
    ) -> (Runtime, Arc<Mutex<Vec<ReportRequest>>>) {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let transport = RecordingTransport {
            sent: Arc::clone(&sent),
            outcome,
        };
        let runtime = Runtime::with_transport(options, Box::new(transport)).unwrap();
        (runtime, sent)
    }

    #[test]
    fn test_flush_sends_stamped_batch() {
        let (rt, sent) = runtime_with(
            options().with_identity("group", "token"),
            SendOutcome::Unconfirmed,
        );
        rt.info("hello");
        let mut span = rt.start_span();
        span.set_operation("op/1");
        span.finish();
        rt.flush();

        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        let report = &sent[0];
        let guid = rt.guid().unwrap();
        assert_eq!(report.runtime.guid, guid);
        assert_eq!(report.runtime.group_name, "group");
        assert_eq!(report.log_records[0].message, "hello");
        assert_eq!(report.log_records[0].runtime_guid, guid);
        assert_eq!(report.span_records[0].span_name, "op/1");
        assert!(report.oldest_micros <= report.youngest_micros);
        assert_eq!(rt.pending(), Pending::default());
    }

    #[test]
    fn test_flush_without_identity_keeps_records() {
        let (rt, sent) = runtime_with(options(), SendOutcome::Unconfirmed);
        rt.info("early");
        rt.flush();
        assert!(sent.lock().unwrap().is_empty());
        assert_eq!(rt.pending().logs, 1);

        rt.set_identity("group", "token").unwrap();
        rt.flush();
        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].log_records[0].runtime_guid, rt.guid().unwrap());
    }

    #[test]
    fn test_empty_flush_sends_nothing() {
        let (rt, sent) = runtime_with(
            options().with_identity("group", "token"),
            SendOutcome::Unconfirmed,
        );
        rt.flush();
        assert!(sent.lock().unwrap().is_empty());
    }

    #[test]
    fn test_identity_is_immutable() {
        let (rt, _) = runtime_with(options(), SendOutcome::Unconfirmed);
        assert_eq!(rt.set_identity("group", ""), Err(ConfigError::EmptyAccessToken));
        assert!(rt.guid().is_none());

        rt.set_identity("group", "token").unwrap();
        let guid = rt.guid();
        assert_eq!(rt.set_identity("group", "token"), Ok(()));
        assert_eq!(
            rt.set_identity("group", "other"),
            Err(ConfigError::AccessTokenChanged)
        );
        assert_eq!(
            rt.set_identity("other", "token"),
            Err(ConfigError::GroupNameChanged)
        );
        assert_eq!(rt.guid(), guid);
    }

    #[test]
    fn test_same_identity_same_guid() {
        let (a, _) = runtime_with(
            options().with_identity("group", "token"),
            SendOutcome::Unconfirmed,
        );
        let (b, _) = runtime_with(
            options().with_identity("group", "token"),
            SendOutcome::Unconfirmed,
        );
        assert_eq!(a.guid(), b.guid());
    }

    #[test]
    fn test_overflow_counts_dropped_logs() {
        let (rt, sent) = runtime_with(
            options()
                .with_identity("group", "token")
                .with_max_log_records(3),
            SendOutcome::Unconfirmed,
        );
        for i in 0..5 {
            rt.info(format!("log {i}"));
        }
        assert_eq!(rt.pending().logs, 3);
        assert_eq!(rt.counters()[DROPPED_LOGS], 2);

        rt.flush();
        let sent = sent.lock().unwrap();
        // Newest record always survives eviction
        assert!(sent[0].log_records.iter().any(|r| r.message == "log 4"));
        let dropped = sent[0]
            .counters
            .iter()
            .find(|c| c.name == DROPPED_LOGS)
            .unwrap();
        assert_eq!(dropped.value, 2);
        assert_eq!(rt.counters()[DROPPED_LOGS], 0);
    }

    #[test]
    fn test_zero_capacity_drops_everything() {
        let (rt, _) = runtime_with(options().with_max_span_records(0), SendOutcome::Unconfirmed);
        rt.start_span().finish();
        assert_eq!(rt.pending().spans, 0);
        assert_eq!(rt.counters()[DROPPED_SPANS], 1);
    }

    #[test]
    fn test_scheduled_flush_runs_inline() {
        let (rt, sent) = runtime_with(
            RuntimeOptions::default()
                .with_identity("group", "token")
                .with_reporting_period(Duration::ZERO),
            SendOutcome::Unconfirmed,
        );
        rt.info("due immediately");
        assert_eq!(sent.lock().unwrap().len(), 1);
        assert_eq!(rt.pending().logs, 0);
    }

    #[test]
    fn test_too_deep_payload_is_dropped_from_record() {
        let (rt, sent) = runtime_with(
            options()
                .with_identity("group", "token")
                .with_max_payload_depth(1),
            SendOutcome::Unconfirmed,
        );
        rt.log(LogLevel::Info, "shallow", Some(&json!({"a": 1})));
        rt.log(LogLevel::Info, "deep", Some(&json!({"a": {"b": 1}})));
        rt.flush();

        let sent = sent.lock().unwrap();
        let records = &sent[0].log_records;
        assert_eq!(records[0].payload_json.as_deref(), Some(r#"{"a":1}"#));
        assert_eq!(records[1].message, "deep");
        assert!(records[1].payload_json.is_none());
    }

    #[test]
    fn test_error_levels_set_error_flag() {
        let (rt, sent) = runtime_with(
            options().with_identity("group", "token"),
            SendOutcome::Unconfirmed,
        );
        rt.warn("w");
        rt.fatal("f");
        rt.flush();

        let sent = sent.lock().unwrap();
        assert!(!sent[0].log_records[0].error_flag);
        assert!(sent[0].log_records[1].error_flag);
        assert_eq!(sent[0].log_records[1].level, LogLevel::Fatal);
    }

    #[test]
    fn test_disable_is_permanent() {
        let (rt, sent) = runtime_with(
            options().with_identity("group", "token"),
            SendOutcome::Unconfirmed,
        );
        rt.info("before");
        rt.disable();
        rt.info("after");
        let span = rt.start_span();
        assert!(span.is_noop());
        drop(span);
        rt.flush();

        assert!(!rt.is_enabled());
        assert_eq!(rt.pending(), Pending::default());
        assert!(sent.lock().unwrap().is_empty());
    }

    #[test]
    fn test_disable_command_disables_runtime() {
        let response = ReportResponse {
            commands: vec![Command { disable: true }],
            errors: vec![],
        };
        let (rt, sent) = runtime_with(
            options().with_identity("group", "token"),
            SendOutcome::Delivered(response),
        );
        rt.info("one");
        rt.flush();
        assert!(!rt.is_enabled());

        rt.info("two");
        rt.flush();
        assert_eq!(sent.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_failed_send_clears_by_default() {
        let (rt, sent) = runtime_with(
            options().with_identity("group", "token"),
            SendOutcome::Failed(TransportError::Connect("refused".into())),
        );
        rt.info("lost");
        rt.flush();
        assert_eq!(rt.pending().logs, 0);

        rt.info("next");
        rt.flush();
        let sent = sent.lock().unwrap();
        assert_eq!(sent[1].log_records.len(), 1);
        assert!(sent[1].oldest_micros >= sent[0].youngest_micros);
    }

    #[test]
    fn test_failed_send_retains_when_configured() {
        let (rt, sent) = runtime_with(
            options()
                .with_identity("group", "token")
                .with_delivery(DeliveryGuarantee::RetainUntilAcknowledged)
                .with_max_log_records(2),
            SendOutcome::Failed(TransportError::Connect("refused".into())),
        );
        rt.info("a");
        rt.info("b");
        rt.info("c");
        rt.flush();
        assert_eq!(rt.pending().logs, 2);
        assert_eq!(rt.counters()[DROPPED_LOGS], 1);

        rt.info("d");
        rt.flush();
        let sent = sent.lock().unwrap();
        assert_eq!(sent[1].oldest_micros, sent[0].oldest_micros);
        let messages: Vec<_> = sent[1].log_records.iter().map(|r| r.message.as_str()).collect();
        assert_eq!(messages.len(), 2);
        assert!(messages.contains(&"d"));
    }

    #[test]
    fn test_concurrent_hosts_account_for_every_record() {
        const THREADS: usize = 8;
        const CALLS_PER_THREAD: usize = 500;

        let (rt, sent) = runtime_with(
            RuntimeOptions::default()
                .with_identity("group", "token")
                .with_max_log_records(16)
                .with_max_span_records(16)
                .with_reporting_period(Duration::from_micros(200)),
            SendOutcome::Unconfirmed,
        );

        std::thread::scope(|scope| {
            for t in 0..THREADS {
                let rt = &rt;
                scope.spawn(move || {
                    for i in 0..CALLS_PER_THREAD {
                        rt.info(format!("thread {t} log {i}"));
                        rt.start_span().finish();
                    }
                });
            }
        });

        let sent = sent.lock().unwrap();
        let counter = |name: &str| -> usize {
            let reported: i64 = sent
                .iter()
                .flat_map(|report| &report.counters)
                .filter(|c| c.name == name)
                .map(|c| c.value)
                .sum();
            (reported + rt.counters()[name]) as usize
        };

        let sent_logs: usize = sent.iter().map(|r| r.log_records.len()).sum();
        let sent_spans: usize = sent.iter().map(|r| r.span_records.len()).sum();
        let pending = rt.pending();
        let calls = THREADS * CALLS_PER_THREAD;
        assert_eq!(sent_logs + pending.logs + counter(DROPPED_LOGS), calls);
        assert_eq!(sent_spans + pending.spans + counter(DROPPED_SPANS), calls);

        // Flushes are serialized, so windows tile in send order
        for report in sent.iter() {
            assert!(report.oldest_micros <= report.youngest_micros);
        }
        for pair in sent.windows(2) {
            assert_eq!(pair[1].oldest_micros, pair[0].youngest_micros);
        }
    }

    #[test]
    fn test_shutdown_flushes_once() {
        let (rt, sent) = runtime_with(
            options().with_identity("group", "token"),
            SendOutcome::Unconfirmed,
        );
        rt.info("final");
        rt.shutdown();
        rt.shutdown();
        drop(rt);
        assert_eq!(sent.lock().unwrap().len(), 1);
    }
}
