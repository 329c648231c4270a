//! Runtime configuration.

use crate::error::ConfigError;
use serde::Deserialize;
use std::time::Duration;

/// Default collector host.
pub const DEFAULT_SERVICE_HOST: &str = "api.traceguide.io";
/// Default collector port when `secure` is set.
pub const DEFAULT_SECURE_PORT: u16 = 9997;
/// Default collector port for plaintext connections.
pub const DEFAULT_PLAIN_PORT: u16 = 9998;
/// Default report RPC path.
pub const DEFAULT_SERVICE_PATH: &str = "/_rpc/v1/crouton/binary";

/// Which transport the runtime builds when none is supplied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Persistent socket, write-only, never reads a response.
    #[default]
    FireAndForget,
    /// HTTP client that waits for and decodes the response.
    Http,
}

/// What the runtime does with a batch whose send failed.
///
/// These are two contradictory reliability policies; pick one per deployment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryGuarantee {
    /// Buffers are cleared once a send is attempted, whatever the outcome.
    #[default]
    ClearOnSend,
    /// A send that observably failed puts its records and counters back.
    RetainUntilAcknowledged,
}

/// Socket-level limits for the collector connection.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConnectConfig {
    /// Timeout for opening the socket. Also bounds each write.
    ///
    /// Default: 1s
    #[serde(with = "secs_f64")]
    pub connect_timeout: Duration,

    /// Connection attempts per send before giving up silently.
    ///
    /// Default: 1
    pub connect_attempts: u32,

    /// Max bytes handed to a single socket write.
    ///
    /// Default: 8192
    pub max_bytes_per_write: usize,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(1),
            connect_attempts: 1,
            max_bytes_per_write: 8192,
        }
    }
}

/// Options recognized by [`Runtime`](crate::Runtime).
///
/// Deserializable from any serde format; missing fields take their defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RuntimeOptions {
    pub service_host: String,
    /// Explicit port. `None` picks the default for the scheme.
    pub service_port: Option<u16>,
    pub service_path: String,
    /// Selects TLS and the default port.
    pub secure: bool,
    pub max_log_records: usize,
    pub max_span_records: usize,
    /// Seconds between scheduled flushes.
    #[serde(rename = "reporting_period_secs", with = "secs_f64")]
    pub reporting_period: Duration,
    /// Payloads nested deeper than this are rejected.
    pub max_payload_depth: usize,
    /// Enables diagnostic logging of transport internals.
    pub debug: bool,
    pub group_name: Option<String>,
    pub access_token: Option<String>,
    pub transport: TransportKind,
    pub delivery: DeliveryGuarantee,
    pub connect: ConnectConfig,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            service_host: DEFAULT_SERVICE_HOST.to_string(),
            service_port: None,
            service_path: DEFAULT_SERVICE_PATH.to_string(),
            secure: true,
            max_log_records: 1000,
            max_span_records: 1000,
            reporting_period: Duration::from_secs(5),
            max_payload_depth: 10,
            debug: false,
            group_name: None,
            access_token: None,
            transport: TransportKind::default(),
            delivery: DeliveryGuarantee::default(),
            connect: ConnectConfig::default(),
        }
    }
}

impl RuntimeOptions {
    /// Sets both identity fields.
    pub fn with_identity(
        mut self,
        group_name: impl Into<String>,
        access_token: impl Into<String>,
    ) -> Self {
        self.group_name = Some(group_name.into());
        self.access_token = Some(access_token.into());
        self
    }

    /// Sets the collector host and port.
    pub fn with_service(mut self, host: impl Into<String>, port: u16) -> Self {
        self.service_host = host.into();
        self.service_port = Some(port);
        self
    }

    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    pub fn with_max_log_records(mut self, max: usize) -> Self {
        self.max_log_records = max;
        self
    }

    pub fn with_max_span_records(mut self, max: usize) -> Self {
        self.max_span_records = max;
        self
    }

    pub fn with_reporting_period(mut self, period: Duration) -> Self {
        self.reporting_period = period;
        self
    }

    pub fn with_max_payload_depth(mut self, depth: usize) -> Self {
        self.max_payload_depth = depth;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_transport(mut self, kind: TransportKind) -> Self {
        self.transport = kind;
        self
    }

    pub fn with_delivery(mut self, delivery: DeliveryGuarantee) -> Self {
        self.delivery = delivery;
        self
    }

    pub fn with_connect(mut self, connect: ConnectConfig) -> Self {
        self.connect = connect;
        self
    }

    /// Port actually used: the explicit one, else the scheme default.
    pub fn effective_port(&self) -> u16 {
        self.service_port.unwrap_or(if self.secure {
            DEFAULT_SECURE_PORT
        } else {
            DEFAULT_PLAIN_PORT
        })
    }

    /// Identity fields, if both were supplied.
    pub fn identity(&self) -> Option<(&str, &str)> {
        match (&self.group_name, &self.access_token) {
            (Some(group), Some(token)) => Some((group.as_str(), token.as_str())),
            _ => None,
        }
    }

    /// Rejects values the runtime cannot operate with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_host.is_empty() {
            return Err(ConfigError::InvalidOption(
                "service_host must not be empty".into(),
            ));
        }
        if self.connect.max_bytes_per_write == 0 {
            return Err(ConfigError::InvalidOption(
                "max_bytes_per_write must be positive".into(),
            ));
        }
        if self.connect.connect_timeout.is_zero() {
            return Err(ConfigError::InvalidOption(
                "connect_timeout must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Serde adapter for durations written as (fractional) seconds.
mod secs_f64 {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let opts = RuntimeOptions::default();
        assert_eq!(opts.max_log_records, 1000);
        assert_eq!(opts.max_span_records, 1000);
        assert_eq!(opts.reporting_period, Duration::from_secs(5));
        assert_eq!(opts.max_payload_depth, 10);
        assert_eq!(opts.effective_port(), DEFAULT_SECURE_PORT);
        assert!(opts.identity().is_none());
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn test_secure_selects_default_port() {
        let plain = RuntimeOptions::default().with_secure(false);
        assert_eq!(plain.effective_port(), DEFAULT_PLAIN_PORT);

        let explicit = plain.with_service("localhost", 8080);
        assert_eq!(explicit.effective_port(), 8080);
    }

    #[test]
    fn test_deserialize_partial() {
        let opts: RuntimeOptions = serde_json::from_str(
            r#"{
                "service_host": "collector.local",
                "secure": false,
                "reporting_period_secs": 0.5,
                "group_name": "g",
                "access_token": "t",
                "transport": "http",
                "delivery": "retain_until_acknowledged",
                "connect": { "connect_attempts": 3 }
            }"#,
        )
        .unwrap();

        assert_eq!(opts.service_host, "collector.local");
        assert_eq!(opts.reporting_period, Duration::from_millis(500));
        assert_eq!(opts.identity(), Some(("g", "t")));
        assert_eq!(opts.transport, TransportKind::Http);
        assert_eq!(opts.delivery, DeliveryGuarantee::RetainUntilAcknowledged);
        assert_eq!(opts.connect.connect_attempts, 3);
        assert_eq!(opts.connect.max_bytes_per_write, 8192);
        assert_eq!(opts.max_log_records, 1000);
    }

    #[test]
    fn test_negative_period_rejected_at_parse() {
        let result: Result<RuntimeOptions, _> =
            serde_json::from_str(r#"{ "reporting_period_secs": -1.0 }"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_rejects_zero_chunk() {
        let opts = RuntimeOptions::default().with_connect(ConnectConfig {
            max_bytes_per_write: 0,
            ..Default::default()
        });
        assert!(matches!(opts.validate(), Err(ConfigError::InvalidOption(_))));
    }
}
