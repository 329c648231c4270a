//! RPC envelope codecs.
//!
//! The runtime never touches bytes directly: a [`Codec`] turns a report call
//! into a request body and a response body back into a [`ReportResponse`].
//! [`BincodeCodec`] is the compact binary default; [`JsonCodec`] is useful
//! against debugging collectors.

use crate::error::CodecError;
use crate::wire::{Auth, ReportRequest, ReportResponse};
use serde::{Deserialize, Serialize};

/// RPC method name for the batched report call.
pub const REPORT_METHOD: &str = "Report";

/// A decoded report call, as a collector sees it.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ReportCall {
    pub method: String,
    pub seq_id: u32,
    pub auth: Auth,
    pub request: ReportRequest,
}

#[derive(Serialize)]
struct ReportCallRef<'a> {
    method: &'a str,
    seq_id: u32,
    auth: &'a Auth,
    request: &'a ReportRequest,
}

/// Encoding of report calls and responses.
pub trait Codec: Send + Sync {
    /// MIME type used for both `Accept` and `Content-Type`.
    fn content_type(&self) -> &'static str;

    /// Encodes one call envelope (method framing + body).
    fn encode_call(
        &self,
        method: &str,
        seq_id: u32,
        auth: &Auth,
        request: &ReportRequest,
    ) -> Result<Vec<u8>, CodecError>;

    /// Decodes a call envelope (collector side).
    fn decode_call(&self, bytes: &[u8]) -> Result<ReportCall, CodecError>;

    fn encode_response(&self, response: &ReportResponse) -> Result<Vec<u8>, CodecError>;

    fn decode_response(&self, bytes: &[u8]) -> Result<ReportResponse, CodecError>;
}

/// Binary envelope encoding via `bincode`.
#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeCodec;

impl Codec for BincodeCodec {
    fn content_type(&self) -> &'static str {
        "application/x-traceguide-bincode"
    }

    fn encode_call(
        &self,
        method: &str,
        seq_id: u32,
        auth: &Auth,
        request: &ReportRequest,
    ) -> Result<Vec<u8>, CodecError> {
        let call = ReportCallRef {
            method,
            seq_id,
            auth,
            request,
        };
        bincode::serialize(&call).map_err(|e| CodecError::Encode(e.to_string()))
    }

    fn decode_call(&self, bytes: &[u8]) -> Result<ReportCall, CodecError> {
        bincode::deserialize(bytes).map_err(|e| CodecError::Decode(e.to_string()))
    }

    fn encode_response(&self, response: &ReportResponse) -> Result<Vec<u8>, CodecError> {
        bincode::serialize(response).map_err(|e| CodecError::Encode(e.to_string()))
    }

    fn decode_response(&self, bytes: &[u8]) -> Result<ReportResponse, CodecError> {
        bincode::deserialize(bytes).map_err(|e| CodecError::Decode(e.to_string()))
    }
}

/// JSON envelope encoding via `serde_json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn content_type(&self) -> &'static str {
        "application/json"
    }

    fn encode_call(
        &self,
        method: &str,
        seq_id: u32,
        auth: &Auth,
        request: &ReportRequest,
    ) -> Result<Vec<u8>, CodecError> {
        let call = ReportCallRef {
            method,
            seq_id,
            auth,
            request,
        };
        serde_json::to_vec(&call).map_err(|e| CodecError::Encode(e.to_string()))
    }

    fn decode_call(&self, bytes: &[u8]) -> Result<ReportCall, CodecError> {
        serde_json::from_slice(bytes).map_err(|e| CodecError::Decode(e.to_string()))
    }

    fn encode_response(&self, response: &ReportResponse) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(response).map_err(|e| CodecError::Encode(e.to_string()))
    }

    fn decode_response(&self, bytes: &[u8]) -> Result<ReportResponse, CodecError> {
        serde_json::from_slice(bytes).map_err(|e| CodecError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{Command, LogLevel, LogRecord, NamedCounter, RuntimeInfo};

    fn sample_request() -> ReportRequest {
        ReportRequest {
            runtime: RuntimeInfo {
                guid: "abc".into(),
                start_micros: 1,
                group_name: "group".into(),
            },
            oldest_micros: 1,
            youngest_micros: 2,
            log_records: vec![LogRecord {
                timestamp_micros: 2,
                runtime_guid: "abc".into(),
                span_guid: None,
                level: LogLevel::Info,
                error_flag: false,
                message: "hello".into(),
                payload_json: Some("[1]".into()),
            }],
            span_records: vec![],
            counters: vec![NamedCounter {
                name: "dropped_logs".into(),
                value: 0,
            }],
        }
    }

    #[test]
    fn test_bincode_call_envelope() {
        let codec = BincodeCodec;
        let auth = Auth {
            access_token: "token".into(),
        };
        let bytes = codec
            .encode_call(REPORT_METHOD, 7, &auth, &sample_request())
            .unwrap();
        let call = codec.decode_call(&bytes).unwrap();

        assert_eq!(call.method, "Report");
        assert_eq!(call.seq_id, 7);
        assert_eq!(call.auth, auth);
        assert_eq!(call.request.log_records[0].message, "hello");
    }

    #[test]
    fn test_json_response_with_disable() {
        let codec = JsonCodec;
        let resp = ReportResponse {
            commands: vec![Command { disable: true }],
            errors: vec![],
        };
        let bytes = codec.encode_response(&resp).unwrap();
        assert!(codec.decode_response(&bytes).unwrap().requests_disable());
    }

    #[test]
    fn test_garbage_fails_to_decode() {
        assert!(matches!(
            BincodeCodec.decode_response(&[0xff, 0xff, 0xff]),
            Err(CodecError::Decode(_))
        ));
        assert!(JsonCodec.decode_call(b"not json").is_err());
    }
}
