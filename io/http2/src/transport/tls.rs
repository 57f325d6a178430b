//! TLS transport using rustls.

use super::{Transport, TransportState};
use bytes::{Buf, BufMut, BytesMut};
use rustls::pki_types::ServerName;
use std::io::{self, Read, Write};
use std::sync::Arc;

/// ALPN identifier for HTTP/2 over TLS.
pub const ALPN_H2: &[u8] = b"h2";

/// Root store holding the Mozilla roots shipped with `webpki-roots`.
pub fn webpki_root_store() -> rustls::RootCertStore {
    rustls::RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned())
}

/// Client configuration that trusts `roots` and offers only `h2`.
pub fn client_config(roots: rustls::RootCertStore) -> rustls::ClientConfig {
    let mut config = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    config.alpn_protocols = vec![ALPN_H2.to_vec()];
    config
}

/// Drives a rustls `ClientConnection` entirely through in-memory buffers.
pub struct TlsTransport {
    conn: rustls::ClientConnection,
    state: TransportState,
    /// Ciphertext read from the socket and not yet consumed by rustls.
    incoming: BytesMut,
    /// Ciphertext to write to the socket.
    outgoing: BytesMut,
    /// Decrypted application data.
    plaintext: BytesMut,
}

impl TlsTransport {
    /// Start a handshake with `server_name`, which is used for SNI and
    /// certificate verification.
    pub fn new(config: Arc<rustls::ClientConfig>, server_name: &str) -> io::Result<Self> {
        let name = ServerName::try_from(server_name.to_string())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let conn = rustls::ClientConnection::new(config, name).map_err(io::Error::other)?;

        let mut transport = Self {
            conn,
            state: TransportState::Handshaking,
            incoming: BytesMut::with_capacity(16384),
            outgoing: BytesMut::with_capacity(16384),
            plaintext: BytesMut::with_capacity(16384),
        };
        // ClientHello
        transport.drain_tls()?;
        Ok(transport)
    }

    /// The protocol selected by ALPN, once the handshake is complete.
    pub fn alpn_protocol(&self) -> Option<&[u8]> {
        self.conn.alpn_protocol()
    }

    fn process_tls(&mut self) -> io::Result<()> {
        while !self.incoming.is_empty() {
            let mut cursor = io::Cursor::new(&self.incoming[..]);
            let n = match self.conn.read_tls(&mut cursor) {
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => 0,
                Err(e) => return Err(e),
            };
            self.incoming.advance(n);

            let state = match self.conn.process_new_packets() {
                Ok(state) => state,
                Err(e) => {
                    self.state = TransportState::Error;
                    // Queue the alert rustls generated for the peer.
                    let _ = self.drain_tls();
                    return Err(io::Error::new(io::ErrorKind::InvalidData, e));
                }
            };

            let mut remaining = state.plaintext_bytes_to_read();
            while remaining > 0 {
                let start = self.plaintext.len();
                self.plaintext.resize(start + remaining, 0);
                let read = self.conn.reader().read(&mut self.plaintext[start..])?;
                self.plaintext.truncate(start + read);
                if read == 0 {
                    break;
                }
                remaining -= read;
            }

            if state.peer_has_closed() && self.state == TransportState::Ready {
                self.state = TransportState::Closed;
            }
            if n == 0 {
                break;
            }
        }

        if self.state == TransportState::Handshaking && !self.conn.is_handshaking() {
            self.state = TransportState::Ready;
        }
        self.drain_tls()
    }

    /// Move ciphertext produced by rustls into the outgoing buffer.
    fn drain_tls(&mut self) -> io::Result<()> {
        while self.conn.wants_write() {
            let mut writer = (&mut self.outgoing).writer();
            if self.conn.write_tls(&mut writer)? == 0 {
                break;
            }
        }
        Ok(())
    }
}

impl Transport for TlsTransport {
    fn state(&self) -> TransportState {
        self.state
    }

    fn send(&mut self, data: &[u8]) -> io::Result<usize> {
        if self.state != TransportState::Ready {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "TLS session not ready",
            ));
        }
        let n = self.conn.writer().write(data)?;
        self.drain_tls()?;
        Ok(n)
    }

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.plaintext.is_empty() {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        let n = buf.len().min(self.plaintext.len());
        buf[..n].copy_from_slice(&self.plaintext[..n]);
        self.plaintext.advance(n);
        Ok(n)
    }

    fn on_recv(&mut self, data: &[u8]) -> io::Result<()> {
        self.incoming.extend_from_slice(data);
        self.process_tls()
    }

    fn pending_send(&self) -> &[u8] {
        &self.outgoing
    }

    fn advance_send(&mut self, n: usize) {
        self.outgoing.advance(n.min(self.outgoing.len()));
    }

    fn shutdown(&mut self) -> io::Result<()> {
        if self.state != TransportState::Closed {
            self.conn.send_close_notify();
            self.drain_tls()?;
            self.state = TransportState::Closed;
        }
        Ok(())
    }
}
