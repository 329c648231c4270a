//! Error types for the instrumentation client.
//!
//! Only [`ConfigError`] ever reaches the host. Payload, codec and transport
//! errors are absorbed inside the runtime and surface only as diagnostics.

use thiserror::Error;

/// Invalid, missing or conflicting configuration. Reported synchronously.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// The access token was empty.
    #[error("access_token must be a non-empty string")]
    EmptyAccessToken,
    /// The group name was empty.
    #[error("group_name must be a non-empty string")]
    EmptyGroupName,
    /// A different access token was supplied after identity was set.
    #[error("access_token cannot be changed after it is set")]
    AccessTokenChanged,
    /// A different group name was supplied after identity was set.
    #[error("group_name cannot be changed after it is set")]
    GroupNameChanged,
    /// The process-wide runtime was already initialized.
    #[error("instrumentation library already initialized")]
    AlreadyInitialized,
    /// An option value is out of range.
    #[error("invalid option: {0}")]
    InvalidOption(String),
    /// The TLS client configuration could not be built.
    #[error("tls configuration failed: {0}")]
    Tls(String),
}

/// A log payload that could not be attached to its record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PayloadError {
    /// Nesting exceeds the configured maximum; payloads are rejected, not trimmed.
    #[error("payload nesting exceeds maximum depth {max}")]
    TooDeep { max: usize },
    /// The payload could not be encoded.
    #[error("payload encoding failed: {0}")]
    Encode(String),
}

/// Encoding or decoding of an RPC envelope failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("encode failed: {0}")]
    Encode(String),
    #[error("decode failed: {0}")]
    Decode(String),
}

/// Transport-level failures. Never propagated out of the runtime.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The collector host could not be resolved.
    #[error("could not resolve {0}")]
    Resolve(String),
    /// No connection could be opened.
    #[error("connect failed: {0}")]
    Connect(String),
    /// TLS setup or handshake failed.
    #[error("tls error: {0}")]
    Tls(String),
    /// Writing to the socket failed.
    #[error("write failed after {sent} of {total} bytes: {reason}")]
    Write {
        sent: usize,
        total: usize,
        reason: String,
    },
    /// The socket accepted zero bytes.
    #[error("zero bytes written to socket (sent {sent} of {total})")]
    ZeroWrite { sent: usize, total: usize },
    /// The request could not be encoded.
    #[error("encode failed: {0}")]
    Encode(#[from] CodecError),
    /// The HTTP exchange failed.
    #[error("http error: {0}")]
    Http(String),
    /// The collector answered with a non-success status.
    #[error("collector returned HTTP {0}")]
    Status(u16),
    /// The response body could not be decoded.
    #[error("response decode failed: {0}")]
    Decode(String),
}

impl TransportError {
    /// Returns `true` if the failure means the current connection is unusable.
    pub fn is_connection_fatal(&self) -> bool {
        matches!(
            self,
            Self::Connect(_) | Self::Tls(_) | Self::Write { .. } | Self::ZeroWrite { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_error_converts_into_transport_error() {
        let err: TransportError = CodecError::Encode("boom".into()).into();
        assert!(matches!(err, TransportError::Encode(_)));
        assert!(!err.is_connection_fatal());
    }

    #[test]
    fn test_write_errors_are_connection_fatal() {
        let err = TransportError::ZeroWrite { sent: 3, total: 10 };
        assert!(err.is_connection_fatal());
        assert_eq!(
            err.to_string(),
            "zero bytes written to socket (sent 3 of 10)"
        );
    }
}
