//! Traceguide Instrumentation Client
//!
//! An in-process client that lets a host program emit structured log events
//! and timed span records, holds them in bounded in-memory buffers, and
//! periodically ships them to a remote collector as one batched report call.
//!
//! # Design
//!
//! - **No background flusher**: every buffering call runs to completion on the
//!   caller's thread. After each log append or span finish the runtime checks a
//!   flush deadline and, if due, flushes inline.
//! - **Bounded memory**: log and span buffers never exceed their configured
//!   maximum. Overflow evicts a random older record and always keeps the newest.
//! - **Fire-and-forget delivery**: the default transport writes a framed HTTP
//!   POST to a persistent socket and never reads the response. Transport
//!   failures are absorbed and never reach the host.
//!
//! # Example
//!
//! ```rust,ignore
//! use traceguide::{Runtime, RuntimeOptions};
//!
//! let runtime = Runtime::new(
//!     RuntimeOptions::default().with_identity("checkout", "my-access-token"),
//! )?;
//!
//! runtime.info("service started");
//!
//! let mut span = runtime.start_span();
//! span.set_operation("charge/card").add_trace_join_id("user", 42);
//! span.finish();
//!
//! runtime.flush();
//! ```

mod invariants;

pub mod buffer;
pub mod clock;
pub mod codec;
pub mod config;
pub mod error;
pub mod global;
pub mod identity;
pub mod payload;
pub mod runtime;
pub mod span;
pub mod transport;
pub mod wire;

// Re-export main types
pub use buffer::BoundedBuffer;
pub use codec::{BincodeCodec, Codec, JsonCodec, REPORT_METHOD};
pub use config::{ConnectConfig, DeliveryGuarantee, RuntimeOptions, TransportKind};
pub use error::{CodecError, ConfigError, PayloadError, TransportError};
pub use identity::Identity;
pub use runtime::{Pending, Runtime};
pub use span::Span;
pub use transport::{
    Endpoint, FireAndForgetTransport, HttpTransport, NullTransport, Scheme, SendOutcome,
    Transport,
};
pub use wire::{
    Auth, Command, KeyValue, LogLevel, LogRecord, NamedCounter, ReportRequest, ReportResponse,
    RuntimeInfo, SpanRecord, TraceJoinId,
};

/// Payload values attached to log records.
pub use serde_json::Value as Payload;
