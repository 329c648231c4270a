//! Response-observing HTTP transport.
//!
//! Sends each report through a blocking HTTP client and decodes the
//! collector's response, which may carry commands such as "disable".
//!
//! The client lives on a worker thread owned by the transport. The caller's
//! thread only hands over the encoded body and waits for the reply, so a
//! runtime flushed from inside an async executor never builds, uses or drops
//! the blocking client there. The worker is started lazily and discarded on
//! any failure so the next flush starts from a fresh client.

use super::framing::USER_AGENT;
use super::{Endpoint, SendOutcome, Transport};
use crate::codec::{BincodeCodec, Codec, REPORT_METHOD};
use crate::config::RuntimeOptions;
use crate::error::TransportError;
use crate::wire::{Auth, ReportRequest, ReportResponse};
use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::debug;

/// Default end-to-end request timeout
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Extra time granted to the worker beyond the client's own timeouts.
const REPLY_GRACE: Duration = Duration::from_millis(500);

type Reply = Result<Vec<u8>, TransportError>;

/// One POST handed to the worker.
struct Exchange {
    body: Vec<u8>,
    reply: Sender<Reply>,
}

/// Settings the worker needs to build and drive its client.
#[derive(Clone)]
struct ClientSettings {
    url: String,
    content_type: &'static str,
    connect_timeout: Duration,
    request_timeout: Duration,
}

/// Worker thread holding the blocking client for its whole lifetime.
struct Worker {
    jobs: Sender<Exchange>,
    handle: JoinHandle<()>,
}

impl Worker {
    fn spawn(settings: ClientSettings) -> Result<Self, TransportError> {
        let (jobs, inbox) = mpsc::channel();
        let handle = thread::Builder::new()
            .name("traceguide-http".into())
            .spawn(move || run_worker(&settings, &inbox))
            .map_err(|e| TransportError::Http(format!("worker spawn failed: {e}")))?;
        Ok(Self { jobs, handle })
    }

    fn is_alive(&self) -> bool {
        !self.handle.is_finished()
    }
}

fn run_worker(settings: &ClientSettings, inbox: &Receiver<Exchange>) {
    let client = Client::builder()
        .connect_timeout(settings.connect_timeout)
        .timeout(settings.request_timeout)
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| TransportError::Http(e.to_string()));

    // Exits once the transport drops its sender; the client is dropped here.
    for job in inbox {
        let reply = match &client {
            Ok(client) => post(client, settings, job.body),
            Err(e) => Err(e.clone()),
        };
        let _ = job.reply.send(reply);
    }
}

fn post(client: &Client, settings: &ClientSettings, body: Vec<u8>) -> Reply {
    let response = client
        .post(&settings.url)
        .header(CONTENT_TYPE, settings.content_type)
        .header(ACCEPT, settings.content_type)
        .body(body)
        .send()
        .map_err(|e| TransportError::Http(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        return Err(TransportError::Status(status.as_u16()));
    }

    response
        .bytes()
        .map(|bytes| bytes.to_vec())
        .map_err(|e| TransportError::Http(e.to_string()))
}

/// Request/response transport over a worker-owned HTTP client.
pub struct HttpTransport<C: Codec = BincodeCodec> {
    endpoint: Endpoint,
    codec: C,
    connect_timeout: Duration,
    request_timeout: Duration,
    worker: Option<Worker>,
    seq_id: u32,
    debug: bool,
}

impl HttpTransport<BincodeCodec> {
    pub fn from_options(options: &RuntimeOptions) -> Self {
        Self::new(Endpoint::from_options(options), BincodeCodec)
            .with_connect_timeout(options.connect.connect_timeout)
            .with_debug(options.debug)
    }
}

impl<C: Codec> HttpTransport<C> {
    pub fn new(endpoint: Endpoint, codec: C) -> Self {
        Self {
            endpoint,
            codec,
            connect_timeout: Duration::from_secs(1),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            worker: None,
            seq_id: 0,
            debug: false,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Returns `true` while a worker thread is running.
    pub fn has_worker(&self) -> bool {
        self.worker.as_ref().is_some_and(Worker::is_alive)
    }

    /// Returns the running worker, starting a new one if needed.
    fn worker(&mut self) -> Result<&Worker, TransportError> {
        if !self.has_worker() {
            let settings = ClientSettings {
                url: self.endpoint.url(),
                content_type: self.codec.content_type(),
                connect_timeout: self.connect_timeout,
                request_timeout: self.request_timeout,
            };
            self.worker = Some(Worker::spawn(settings)?);
        }
        self.worker
            .as_ref()
            .ok_or_else(|| TransportError::Http("worker unavailable".into()))
    }

    fn exchange(&mut self, body: Vec<u8>) -> Result<ReportResponse, TransportError> {
        let wait = self.connect_timeout + self.request_timeout + REPLY_GRACE;
        let (reply, answer) = mpsc::channel();
        self.worker()?
            .jobs
            .send(Exchange { body, reply })
            .map_err(|_| TransportError::Http("http worker exited".into()))?;

        let bytes = match answer.recv_timeout(wait) {
            Ok(reply) => reply?,
            Err(RecvTimeoutError::Timeout) => {
                return Err(TransportError::Http(format!(
                    "no reply from http worker within {wait:?}"
                )))
            }
            Err(RecvTimeoutError::Disconnected) => {
                return Err(TransportError::Http("http worker panicked".into()))
            }
        };

        self.codec
            .decode_response(&bytes)
            .map_err(|e| TransportError::Decode(e.to_string()))
    }
}

impl<C: Codec> Transport for HttpTransport<C> {
    fn send(&mut self, auth: &Auth, request: &ReportRequest) -> SendOutcome {
        self.seq_id = self.seq_id.wrapping_add(1);
        let body = match self
            .codec
            .encode_call(REPORT_METHOD, self.seq_id, auth, request)
        {
            Ok(body) => body,
            Err(e) => return SendOutcome::Failed(e.into()),
        };

        match self.exchange(body) {
            Ok(response) => {
                if self.debug {
                    debug!(
                        commands = response.commands.len(),
                        errors = response.errors.len(),
                        "report acknowledged"
                    );
                }
                SendOutcome::Delivered(response)
            }
            Err(e) => {
                if self.debug {
                    debug!(error = %e, "report exchange failed, discarding worker");
                }
                // Fresh client on the next attempt
                self.close();
                SendOutcome::Failed(e)
            }
        }
    }

    /// Detaches the worker; it exits once its queue is empty and drops the
    /// client on its own thread.
    fn close(&mut self) {
        self.worker = None;
    }

    fn name(&self) -> &str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Scheme;
    use crate::wire::RuntimeInfo;
    use std::net::TcpListener;

    #[test]
    fn test_unreachable_collector_is_failed_outcome() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let mut transport =
            HttpTransport::new(Endpoint::new(Scheme::Plain, "127.0.0.1", port, "/r"), BincodeCodec)
                .with_connect_timeout(Duration::from_millis(200))
                .with_request_timeout(Duration::from_millis(500));

        let request = ReportRequest {
            runtime: RuntimeInfo {
                guid: "g".into(),
                start_micros: 0,
                group_name: "group".into(),
            },
            oldest_micros: 0,
            youngest_micros: 0,
            log_records: vec![],
            span_records: vec![],
            counters: vec![],
        };
        let auth = Auth {
            access_token: "t".into(),
        };

        let outcome = transport.send(&auth, &request);
        assert!(matches!(outcome, SendOutcome::Failed(TransportError::Http(_))));
        assert!(!transport.has_worker());
    }
}
