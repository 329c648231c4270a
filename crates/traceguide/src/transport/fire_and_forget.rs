//! Fire-and-forget persistent transport.
//!
//! Holds one socket per transport, opened lazily on the first send and kept
//! across flushes. Each send frames the report as a raw HTTP POST and writes
//! it in bounded chunks. Responses are never parsed: inbound bytes are drained
//! and discarded before the next write.
//!
//! # Failure handling
//!
//! | Failure | Effect |
//! |---------|--------|
//! | resolve/connect | up to `connect_attempts` tries, then `Failed` |
//! | zero-byte write, write error | connection closed and discarded, `Failed` |
//! | peer closed between sends | detected on drain, reconnect before writing |
//!
//! A failed send is never retried within the same call; the next flush
//! re-creates the connection.

use super::connection::{default_tls_config, Connection};
use super::framing::frame_post;
use super::{Endpoint, Scheme, SendOutcome, Transport};
use crate::codec::{BincodeCodec, Codec, REPORT_METHOD};
use crate::config::{ConnectConfig, RuntimeOptions};
use crate::error::{ConfigError, TransportError};
use crate::wire::{Auth, ReportRequest};
use rustls::ClientConfig;
use std::io::{ErrorKind, Write};
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use tracing::{debug, trace};

/// Counters for the persistent connection (plain u64, owned by one transport).
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TransportMetrics {
    /// Reports fully written
    pub reports_written: u64,
    /// Reports abandoned after a connect or write failure
    pub reports_failed: u64,
    /// Sockets opened
    pub connections_opened: u64,
    /// Bytes written across all reports
    pub bytes_written: u64,
}

/// Write-only transport over a persistent socket.
pub struct FireAndForgetTransport<C: Codec = BincodeCodec> {
    endpoint: Endpoint,
    codec: C,
    config: ConnectConfig,
    tls: Option<Arc<ClientConfig>>,
    addrs: Vec<SocketAddr>,
    connection: Option<Connection>,
    seq_id: u32,
    debug: bool,
    metrics: TransportMetrics,
}

impl FireAndForgetTransport<BincodeCodec> {
    /// Builds the default transport from runtime options.
    pub fn from_options(options: &RuntimeOptions) -> Result<Self, ConfigError> {
        let transport = Self::new(
            Endpoint::from_options(options),
            BincodeCodec,
            options.connect.clone(),
        )?;
        Ok(transport.with_debug(options.debug))
    }
}

impl<C: Codec> FireAndForgetTransport<C> {
    /// Creates a transport for `endpoint`. No connection is opened yet.
    pub fn new(endpoint: Endpoint, codec: C, config: ConnectConfig) -> Result<Self, ConfigError> {
        let tls = match endpoint.scheme {
            Scheme::Secure => Some(default_tls_config()?),
            Scheme::Plain => None,
        };
        Ok(Self {
            endpoint,
            codec,
            config,
            tls,
            addrs: Vec::new(),
            connection: None,
            seq_id: 0,
            debug: false,
            metrics: TransportMetrics::default(),
        })
    }

    /// Enables diagnostic logging of socket internals.
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn metrics(&self) -> &TransportMetrics {
        &self.metrics
    }

    /// Returns `true` while a persistent connection is held.
    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Resolves the endpoint once; the result is cached after the first success.
    fn resolve(&mut self) -> Result<&[SocketAddr], TransportError> {
        if self.addrs.is_empty() {
            let target = (self.endpoint.host.as_str(), self.endpoint.port);
            self.addrs = target
                .to_socket_addrs()
                .map_err(|e| TransportError::Resolve(format!("{}: {e}", self.endpoint.host)))?
                .collect();
            if self.addrs.is_empty() {
                return Err(TransportError::Resolve(self.endpoint.host.clone()));
            }
        }
        Ok(&self.addrs)
    }

    fn open(&mut self) -> Result<Connection, TransportError> {
        let addrs = self.resolve()?.to_vec();
        let attempts = self.config.connect_attempts.max(1);
        let mut last_err = TransportError::Connect("no connection attempt made".into());

        for attempt in 0..attempts {
            for addr in &addrs {
                match Connection::open(addr, &self.endpoint.host, &self.config, self.tls.as_ref())
                {
                    Ok(conn) => {
                        self.metrics.connections_opened += 1;
                        if self.debug {
                            debug!(%addr, attempt, "collector connection opened");
                        }
                        return Ok(conn);
                    }
                    Err(e) => {
                        if self.debug {
                            debug!(%addr, attempt, error = %e, "collector connect failed");
                        }
                        last_err = e;
                    }
                }
            }
        }

        Err(last_err)
    }

    /// Returns the live connection, replacing it if the peer went away.
    fn ensure_connection(&mut self) -> Result<&mut Connection, TransportError> {
        let conn = match self.connection.take() {
            Some(mut conn) => {
                if conn.drain_inbound() {
                    conn
                } else {
                    if self.debug {
                        debug!("collector closed the persistent connection, reconnecting");
                    }
                    conn.shutdown();
                    self.open()?
                }
            }
            None => self.open()?,
        };
        Ok(self.connection.insert(conn))
    }

    fn write_frame(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        let max_chunk = self.config.max_bytes_per_write;
        let debug = self.debug;
        let conn = self.ensure_connection()?;

        let total = frame.len();
        let mut sent = 0;
        while sent < total {
            let end = (sent + max_chunk).min(total);
            match conn.write(&frame[sent..end]) {
                Ok(0) => return Err(TransportError::ZeroWrite { sent, total }),
                Ok(written) => {
                    sent += written;
                    if debug {
                        trace!(written, sent, total, "socket write");
                    }
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => {
                    return Err(TransportError::Write {
                        sent,
                        total,
                        reason: e.to_string(),
                    })
                }
            }
        }

        conn.flush().map_err(|e| TransportError::Write {
            sent,
            total,
            reason: e.to_string(),
        })
    }
}

impl<C: Codec> Transport for FireAndForgetTransport<C> {
    fn send(&mut self, auth: &Auth, request: &ReportRequest) -> SendOutcome {
        self.seq_id = self.seq_id.wrapping_add(1);
        let body = match self
            .codec
            .encode_call(REPORT_METHOD, self.seq_id, auth, request)
        {
            Ok(body) => body,
            Err(e) => {
                self.metrics.reports_failed += 1;
                return SendOutcome::Failed(e.into());
            }
        };
        let frame = frame_post(&self.endpoint, self.codec.content_type(), &body);

        match self.write_frame(&frame) {
            Ok(()) => {
                self.metrics.reports_written += 1;
                self.metrics.bytes_written += frame.len() as u64;
                SendOutcome::Unconfirmed
            }
            Err(e) => {
                if self.debug {
                    debug!(error = %e, "report send failed");
                }
                self.metrics.reports_failed += 1;
                if e.is_connection_fatal() {
                    self.close();
                }
                SendOutcome::Failed(e)
            }
        }
    }

    fn close(&mut self) {
        if let Some(conn) = self.connection.take() {
            conn.shutdown();
        }
    }

    fn name(&self) -> &str {
        "fire_and_forget"
    }
}

impl<C: Codec> Drop for FireAndForgetTransport<C> {
    fn drop(&mut self) {
        self.close();
    }
}
