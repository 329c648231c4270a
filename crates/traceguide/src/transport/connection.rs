//! Raw collector connection: a TCP socket, optionally wrapped in TLS.

use crate::config::ConnectConfig;
use crate::error::{ConfigError, TransportError};
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, ClientConnection, RootCertStore, StreamOwned};
use std::io::{self, ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;

/// Reads attempted per drain; a collector that keeps sending cannot hold
/// the caller longer than this.
const MAX_DRAIN_READS: usize = 16;

/// TLS client configuration trusting the bundled web PKI roots.
pub(crate) fn default_tls_config() -> Result<Arc<ClientConfig>, ConfigError> {
    let roots = RootCertStore {
        roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
    };
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| ConfigError::Tls(e.to_string()))?
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(Arc::new(config))
}

pub(crate) enum Connection {
    Plain(TcpStream),
    Tls(Box<StreamOwned<ClientConnection, TcpStream>>),
}

impl Connection {
    /// Opens a socket to `addr` and, with `tls`, completes the handshake.
    pub(crate) fn open(
        addr: &SocketAddr,
        host: &str,
        config: &ConnectConfig,
        tls: Option<&Arc<ClientConfig>>,
    ) -> Result<Self, TransportError> {
        let mut sock = TcpStream::connect_timeout(addr, config.connect_timeout)
            .map_err(|e| TransportError::Connect(format!("{addr}: {e}")))?;

        // Writes (and the TLS handshake) are bounded by the same timeout.
        sock.set_write_timeout(Some(config.connect_timeout))
            .and_then(|()| sock.set_read_timeout(Some(config.connect_timeout)))
            .and_then(|()| sock.set_nodelay(true))
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        let Some(tls) = tls else {
            return Ok(Self::Plain(sock));
        };

        let server_name = ServerName::try_from(host)
            .map(|name| name.to_owned())
            .map_err(|e| TransportError::Tls(format!("invalid server name {host}: {e}")))?;
        let mut conn = ClientConnection::new(Arc::clone(tls), server_name)
            .map_err(|e| TransportError::Tls(e.to_string()))?;
        while conn.is_handshaking() {
            conn.complete_io(&mut sock)
                .map_err(|e| TransportError::Tls(e.to_string()))?;
        }

        Ok(Self::Tls(Box::new(StreamOwned::new(conn, sock))))
    }

    fn socket(&self) -> &TcpStream {
        match self {
            Self::Plain(sock) => sock,
            Self::Tls(stream) => stream.get_ref(),
        }
    }

    /// Reads and discards whatever the peer has sent, without blocking.
    ///
    /// Stops after [`MAX_DRAIN_READS`] reads; leftover bytes wait for the
    /// next drain. Returns `false` if the peer closed the connection or it
    /// errored.
    pub(crate) fn drain_inbound(&mut self) -> bool {
        if self.socket().set_nonblocking(true).is_err() {
            return false;
        }

        let mut scratch = [0u8; 4096];
        let mut alive = true;
        for _ in 0..MAX_DRAIN_READS {
            match self.read(&mut scratch) {
                Ok(0) => {
                    alive = false;
                    break;
                }
                Ok(_) => {}
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(_) => {
                    alive = false;
                    break;
                }
            }
        }

        alive && self.socket().set_nonblocking(false).is_ok()
    }

    /// Shuts the socket down; errors are irrelevant at this point.
    pub(crate) fn shutdown(self) {
        match self {
            Self::Plain(sock) => {
                let _ = sock.shutdown(std::net::Shutdown::Both);
            }
            Self::Tls(mut stream) => {
                stream.conn.send_close_notify();
                let _ = stream.flush();
                let _ = stream.sock.shutdown(std::net::Shutdown::Both);
            }
        }
    }
}

impl Read for Connection {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Plain(sock) => sock.read(buf),
            Self::Tls(stream) => stream.read(buf),
        }
    }
}

impl Write for Connection {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Plain(sock) => sock.write(buf),
            Self::Tls(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Plain(sock) => sock.flush(),
            Self::Tls(stream) => stream.flush(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::time::Duration;

    fn config() -> ConnectConfig {
        ConnectConfig {
            connect_timeout: Duration::from_millis(500),
            ..Default::default()
        }
    }

    #[test]
    fn test_plain_connection_drains_and_detects_close() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let mut conn = Connection::open(&addr, "127.0.0.1", &config(), None).unwrap();
        let (mut server_side, _) = listener.accept().unwrap();

        // Nothing pending: still alive
        assert!(conn.drain_inbound());

        server_side.write_all(b"HTTP/1.1 200 OK\r\n\r\n").unwrap();
        std::thread::sleep(Duration::from_millis(50));
        assert!(conn.drain_inbound());

        drop(server_side);
        std::thread::sleep(Duration::from_millis(50));
        assert!(!conn.drain_inbound());
    }

    #[test]
    fn test_drain_is_bounded_under_continuous_input() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let mut conn = Connection::open(&addr, "127.0.0.1", &config(), None).unwrap();
        let (mut server_side, _) = listener.accept().unwrap();

        // Far more than one drain consumes
        let flood = vec![b'x'; MAX_DRAIN_READS * 4096 * 4];
        let writer = std::thread::spawn(move || {
            let _ = server_side.write_all(&flood);
            server_side
        });
        std::thread::sleep(Duration::from_millis(100));

        assert!(conn.drain_inbound());
        assert!(conn.drain_inbound());
        drop(conn);
        let _ = writer.join();
    }

    #[test]
    fn test_connect_refused() {
        // Bind then drop to get a port nobody listens on
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap()
        };
        let result = Connection::open(&addr, "127.0.0.1", &config(), None);
        assert!(matches!(result, Err(TransportError::Connect(_))));
    }
}
