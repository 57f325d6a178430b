//! Per-stream state.

use super::flow_control::{RecvWindow, SendWindow};
use crate::frame::StreamId;

/// Stream states a client-initiated stream passes through (RFC 9113 Section 5.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Open,
    /// We sent END_STREAM.
    HalfClosedLocal,
    /// The server sent END_STREAM.
    HalfClosedRemote,
    Closed,
}

#[derive(Debug)]
pub struct Stream {
    id: StreamId,
    state: StreamState,
    pub(crate) send: SendWindow,
    pub(crate) recv: RecvWindow,
}

impl Stream {
    pub fn new(id: StreamId, send_window: u32, recv_window: u32) -> Self {
        Self {
            id,
            state: StreamState::Open,
            send: SendWindow::new(send_window),
            recv: RecvWindow::new(recv_window),
        }
    }

    pub fn id(&self) -> StreamId {
        self.id
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn can_send(&self) -> bool {
        matches!(self.state, StreamState::Open | StreamState::HalfClosedRemote)
    }

    pub fn can_recv(&self) -> bool {
        matches!(self.state, StreamState::Open | StreamState::HalfClosedLocal)
    }

    pub fn is_closed(&self) -> bool {
        self.state == StreamState::Closed
    }

    pub fn send_end_stream(&mut self) {
        self.state = match self.state {
            StreamState::Open => StreamState::HalfClosedLocal,
            StreamState::HalfClosedRemote => StreamState::Closed,
            other => other,
        };
    }

    pub fn recv_end_stream(&mut self) {
        self.state = match self.state {
            StreamState::Open => StreamState::HalfClosedRemote,
            StreamState::HalfClosedLocal => StreamState::Closed,
            other => other,
        };
    }
}
