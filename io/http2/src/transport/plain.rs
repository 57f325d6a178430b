//! Cleartext (h2c) transport.

use super::{Transport, TransportState};
use bytes::{Buf, BytesMut};
use std::io;

/// Passes bytes between the socket and the connection unchanged.
pub struct PlainTransport {
    state: TransportState,
    recv_buf: BytesMut,
    send_buf: BytesMut,
}

impl PlainTransport {
    pub fn new() -> Self {
        Self {
            state: TransportState::Ready,
            recv_buf: BytesMut::with_capacity(16384),
            send_buf: BytesMut::with_capacity(16384),
        }
    }
}

impl Default for PlainTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for PlainTransport {
    fn state(&self) -> TransportState {
        self.state
    }

    fn send(&mut self, data: &[u8]) -> io::Result<usize> {
        if self.state != TransportState::Ready {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "transport not ready",
            ));
        }
        self.send_buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.recv_buf.is_empty() {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        let n = buf.len().min(self.recv_buf.len());
        buf[..n].copy_from_slice(&self.recv_buf[..n]);
        self.recv_buf.advance(n);
        Ok(n)
    }

    fn on_recv(&mut self, data: &[u8]) -> io::Result<()> {
        self.recv_buf.extend_from_slice(data);
        Ok(())
    }

    fn pending_send(&self) -> &[u8] {
        &self.send_buf
    }

    fn advance_send(&mut self, n: usize) {
        self.send_buf.advance(n.min(self.send_buf.len()));
    }

    fn shutdown(&mut self) -> io::Result<()> {
        self.state = TransportState::Closed;
        Ok(())
    }
}
