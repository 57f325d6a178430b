//! Byte transports underneath the HTTP/2 connection.
//!
//! A transport sits between the socket and the frame layer. The plain
//! transport passes bytes through; the TLS transport encrypts and decrypts
//! them with rustls. Neither touches the socket itself.

mod plain;
mod tls;

pub use plain::PlainTransport;
pub use tls::{ALPN_H2, TlsTransport, client_config, webpki_root_store};

use std::io;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    /// TLS handshake in progress.
    Handshaking,
    /// Application data may flow.
    Ready,
    Error,
    Closed,
}

/// Buffer-oriented transport.
pub trait Transport {
    fn state(&self) -> TransportState;

    fn is_ready(&self) -> bool {
        self.state() == TransportState::Ready
    }

    /// Queue application bytes for sending.
    ///
    /// Returns how many bytes were accepted, which may be fewer than offered.
    fn send(&mut self, data: &[u8]) -> io::Result<usize>;

    /// Read received application bytes. Returns `WouldBlock` when none are
    /// buffered.
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Hand the transport bytes read from the socket.
    fn on_recv(&mut self, data: &[u8]) -> io::Result<()>;

    /// Bytes waiting to be written to the socket.
    fn pending_send(&self) -> &[u8];

    /// Mark `n` bytes of [`pending_send`](Self::pending_send) as written.
    fn advance_send(&mut self, n: usize);

    fn has_pending_send(&self) -> bool {
        !self.pending_send().is_empty()
    }

    fn shutdown(&mut self) -> io::Result<()>;
}

/// Either transport, so a single session type can drive both.
pub enum ClientTransport {
    Plain(PlainTransport),
    Tls(Box<TlsTransport>),
}

impl ClientTransport {
    pub fn is_tls(&self) -> bool {
        matches!(self, ClientTransport::Tls(_))
    }
}

impl Transport for ClientTransport {
    fn state(&self) -> TransportState {
        match self {
            ClientTransport::Plain(t) => t.state(),
            ClientTransport::Tls(t) => t.state(),
        }
    }

    fn send(&mut self, data: &[u8]) -> io::Result<usize> {
        match self {
            ClientTransport::Plain(t) => t.send(data),
            ClientTransport::Tls(t) => t.send(data),
        }
    }

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            ClientTransport::Plain(t) => t.recv(buf),
            ClientTransport::Tls(t) => t.recv(buf),
        }
    }

    fn on_recv(&mut self, data: &[u8]) -> io::Result<()> {
        match self {
            ClientTransport::Plain(t) => t.on_recv(data),
            ClientTransport::Tls(t) => t.on_recv(data),
        }
    }

    fn pending_send(&self) -> &[u8] {
        match self {
            ClientTransport::Plain(t) => t.pending_send(),
            ClientTransport::Tls(t) => t.pending_send(),
        }
    }

    fn advance_send(&mut self, n: usize) {
        match self {
            ClientTransport::Plain(t) => t.advance_send(n),
            ClientTransport::Tls(t) => t.advance_send(n),
        }
    }

    fn shutdown(&mut self) -> io::Result<()> {
        match self {
            ClientTransport::Plain(t) => t.shutdown(),
            ClientTransport::Tls(t) => t.shutdown(),
        }
    }
}
