//! Hand-built HTTP/1.1 request framing.
//!
//! The fire-and-forget path writes these bytes verbatim to a raw socket; no
//! HTTP client is involved so that no response ever has to be parsed.

use super::Endpoint;

/// `User-Agent` sent with every report.
pub const USER_AGENT: &str = concat!("traceguide-rust/", env!("CARGO_PKG_VERSION"));

/// Frames `body` as a single `POST` to `endpoint`.
pub fn frame_post(endpoint: &Endpoint, content_type: &str, body: &[u8]) -> Vec<u8> {
    let head = format!(
        "POST {path} HTTP/1.1\r\n\
         Host: {host}\r\n\
         Accept: {content_type}\r\n\
         User-Agent: {USER_AGENT}\r\n\
         Content-Type: {content_type}\r\n\
         Content-Length: {length}\r\n\
         \r\n",
        path = endpoint.path,
        host = endpoint.host_header(),
        length = body.len(),
    );

    let mut frame = Vec::with_capacity(head.len() + body.len());
    frame.extend_from_slice(head.as_bytes());
    frame.extend_from_slice(body);
    frame
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Scheme;

    fn endpoint(port: u16) -> Endpoint {
        Endpoint::new(Scheme::Plain, "collector.local", port, "/_rpc/report")
    }

    #[test]
    fn test_frame_layout() {
        let frame = frame_post(&endpoint(9998), "application/x-test", b"BODY");
        let text = String::from_utf8(frame).unwrap();

        assert!(text.starts_with("POST /_rpc/report HTTP/1.1\r\n"));
        assert!(text.contains("Host: collector.local:9998\r\n"));
        assert!(text.contains("Accept: application/x-test\r\n"));
        assert!(text.contains("Content-Type: application/x-test\r\n"));
        assert!(text.contains("Content-Length: 4\r\n"));
        assert!(text.ends_with("\r\n\r\nBODY"));
    }

    #[test]
    fn test_port_80_omitted_from_host() {
        let frame = frame_post(&endpoint(80), "a/b", b"");
        let text = String::from_utf8(frame).unwrap();
        assert!(text.contains("Host: collector.local\r\n"));
        assert!(text.contains("Content-Length: 0\r\n"));
    }

    #[test]
    fn test_binary_body_is_verbatim() {
        let body = [0u8, 159, 146, 150, 255];
        let frame = frame_post(&endpoint(1), "a/b", &body);
        assert_eq!(&frame[frame.len() - body.len()..], &body);
    }
}
