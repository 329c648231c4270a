//! Report delivery.
//!
//! A [`Transport`] takes one batched report and attempts delivery. Two
//! variants exist and a runtime uses exactly one of them:
//!
//! - [`FireAndForgetTransport`] (default): persistent raw socket, hand-framed
//!   HTTP POST, never reads the response. Success means "written".
//! - [`HttpTransport`]: waits for and decodes the response, which may carry
//!   server commands. Trades the non-blocking guarantee for observability.
//!
//! Transports never panic and never return errors to the host; the outcome
//! is reported to the runtime as a [`SendOutcome`].

mod connection;
mod fire_and_forget;
pub mod framing;
mod http;

pub use fire_and_forget::{FireAndForgetTransport, TransportMetrics};
pub use http::HttpTransport;

use crate::config::{RuntimeOptions, TransportKind};
use crate::error::{ConfigError, TransportError};
use crate::wire::{Auth, ReportRequest, ReportResponse};

/// Result of one delivery attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    /// Bytes were handed to the network; success is unknowable.
    Unconfirmed,
    /// The collector acknowledged the report.
    Delivered(ReportResponse),
    /// Delivery observably failed.
    Failed(TransportError),
}

/// Delivers report batches to a collector.
pub trait Transport: Send {
    /// Attempts delivery of one report. Must not block beyond the
    /// transport's own connect/write bounds.
    fn send(&mut self, auth: &Auth, request: &ReportRequest) -> SendOutcome;

    /// Releases any held connection.
    fn close(&mut self) {}

    /// Returns the transport name for debugging.
    fn name(&self) -> &str;
}

/// Connection scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    /// TLS over TCP.
    Secure,
    /// Plain TCP.
    Plain,
}

impl Scheme {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Secure => "https",
            Self::Plain => "http",
        }
    }
}

/// Collector address, fixed at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
    pub path: String,
}

impl Endpoint {
    pub fn new(scheme: Scheme, host: impl Into<String>, port: u16, path: &str) -> Self {
        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{path}")
        };
        Self {
            scheme,
            host: host.into(),
            port,
            path,
        }
    }

    pub fn from_options(options: &RuntimeOptions) -> Self {
        let scheme = if options.secure {
            Scheme::Secure
        } else {
            Scheme::Plain
        };
        Self::new(
            scheme,
            options.service_host.clone(),
            options.effective_port(),
            &options.service_path,
        )
    }

    /// `Host` header value; port 80 is implied.
    pub fn host_header(&self) -> String {
        if self.port == 80 {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    pub fn url(&self) -> String {
        format!(
            "{}://{}:{}{}",
            self.scheme.as_str(),
            self.host,
            self.port,
            self.path
        )
    }
}

/// Builds the transport selected by `options.transport`.
pub fn from_options(options: &RuntimeOptions) -> Result<Box<dyn Transport>, ConfigError> {
    let transport: Box<dyn Transport> = match options.transport {
        TransportKind::FireAndForget => Box::new(FireAndForgetTransport::from_options(options)?),
        TransportKind::Http => Box::new(HttpTransport::from_options(options)),
    };
    Ok(transport)
}

/// Transport that discards every report.
#[derive(Debug, Default)]
pub struct NullTransport;

impl NullTransport {
    pub fn new() -> Self {
        Self
    }
}

impl Transport for NullTransport {
    fn send(&mut self, _auth: &Auth, _request: &ReportRequest) -> SendOutcome {
        SendOutcome::Unconfirmed
    }

    fn name(&self) -> &str {
        "null"
    }
}
