//! Client side HTTP/2 connection state machine.
//!
//! [`Connection`] is sans-IO: bytes read from the socket go in through
//! [`Connection::on_recv`], bytes to write come out of
//! [`Connection::pending_send`], and everything the server did in between
//! is reported as a list of [`ConnectionEvent`]s from
//! [`Connection::poll_events`]. It handles:
//! - the preface and SETTINGS exchange
//! - stream lifecycle, including HEADERS + CONTINUATION assembly
//! - flow control at connection and stream level, in both directions
//! - PING replies and GOAWAY

mod flow_control;
mod settings;
mod stream;

pub use flow_control::{FlowControlError, RecvWindow, SendWindow};
pub use settings::ConnectionSettings;
pub use stream::{Stream, StreamState};

use crate::frame::{
    self, ContinuationFrame, DataFrame, ErrorCode, Frame, FrameDecoder, FrameEncoder, FrameError,
    GoAwayFrame, HeadersFrame, PingFrame, RstStreamFrame, SettingId, SettingsFrame, StreamId,
    WindowUpdateFrame,
};
use crate::hpack::{HeaderField, HpackDecoder, HpackEncoder, HpackError};
use crate::transport::Transport;

use bytes::{Bytes, BytesMut};
use std::collections::{HashMap, VecDeque};
use std::io;
use tracing::{debug, trace};

/// Largest header block we will buffer across CONTINUATION frames.
const MAX_HEADER_BLOCK_SIZE: usize = 1024 * 1024;

/// Highest stream identifier a client may open.
const MAX_STREAM_ID: u32 = 0x7FFF_FFFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Preface not written yet.
    WaitingPreface,
    /// Preface written, server SETTINGS not yet received.
    WaitingSettings,
    Open,
    /// The server sent GOAWAY. Streams it accepted may still complete.
    Draining,
    Closed,
}

#[derive(Debug)]
pub enum ConnectionEvent {
    /// The server's first SETTINGS frame arrived.
    Ready,
    /// A complete header block (response headers or trailers).
    Headers {
        stream_id: StreamId,
        headers: Vec<HeaderField>,
        end_stream: bool,
    },
    Data {
        stream_id: StreamId,
        data: Bytes,
        end_stream: bool,
    },
    /// Both directions of the stream have ended and it has been released.
    StreamClosed { stream_id: StreamId },
    /// The stream was reset, by the server or by us after a stream error.
    StreamReset {
        stream_id: StreamId,
        error_code: ErrorCode,
    },
    GoAway {
        last_stream_id: StreamId,
        error_code: ErrorCode,
    },
    /// A connection error. The connection is closed after this event.
    Error(ConnectionError),
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
    #[error("hpack error: {0}")]
    Hpack(#[from] HpackError),
    #[error("flow control error: {0}")]
    FlowControl(#[from] FlowControlError),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl ConnectionError {
    /// The code reported to the peer in GOAWAY.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            ConnectionError::Frame(e) => e.error_code(),
            ConnectionError::Hpack(HpackError::Decode(_)) => ErrorCode::CompressionError,
            ConnectionError::Hpack(_) => ErrorCode::ProtocolError,
            ConnectionError::FlowControl(_) => ErrorCode::FlowControlError,
            ConnectionError::Protocol(_) => ErrorCode::ProtocolError,
            ConnectionError::Io(_) => ErrorCode::InternalError,
        }
    }
}

/// A header block split across HEADERS and CONTINUATION frames.
struct PartialHeaders {
    stream_id: StreamId,
    end_stream: bool,
    block: BytesMut,
}

/// Request body bytes waiting for flow-control credit.
struct PendingData {
    stream_id: StreamId,
    data: Bytes,
    end_stream: bool,
}

/// HTTP/2 client connection over a [`Transport`].
pub struct Connection<T: Transport> {
    transport: T,
    state: ConnectionState,
    local_settings: ConnectionSettings,
    remote_settings: ConnectionSettings,
    got_settings: bool,
    frame_encoder: FrameEncoder,
    frame_decoder: FrameDecoder,
    hpack_encoder: HpackEncoder,
    hpack_decoder: HpackDecoder,
    streams: HashMap<u32, Stream>,
    next_stream_id: u32,
    send_window: SendWindow,
    recv_window: RecvWindow,
    partial_headers: Option<PartialHeaders>,
    outbound: VecDeque<PendingData>,
    /// Frames encoded but not yet accepted by the transport.
    write_buf: BytesMut,
    /// Plaintext received but not yet parsed into frames.
    read_buf: BytesMut,
    events: Vec<ConnectionEvent>,
}

impl<T: Transport> Connection<T> {
    pub fn new(transport: T) -> Self {
        Self::with_settings(transport, ConnectionSettings::default())
    }

    /// Create a connection that advertises `settings` to the server.
    pub fn with_settings(transport: T, settings: ConnectionSettings) -> Self {
        let mut frame_decoder = FrameDecoder::new();
        frame_decoder.set_max_frame_size(settings.max_frame_size);
        let mut hpack_decoder = HpackDecoder::new();
        hpack_decoder.set_max_header_list_size(settings.max_header_list_size as usize);

        // The connection window always starts at the protocol default; it is
        // raised with a WINDOW_UPDATE after the preface when configured higher.
        let recv_target = settings
            .initial_window_size
            .max(frame::DEFAULT_INITIAL_WINDOW_SIZE);

        Self {
            transport,
            state: ConnectionState::WaitingPreface,
            local_settings: settings,
            remote_settings: ConnectionSettings::peer_defaults(),
            got_settings: false,
            frame_encoder: FrameEncoder::new(),
            frame_decoder,
            hpack_encoder: HpackEncoder::new(),
            hpack_decoder,
            streams: HashMap::new(),
            next_stream_id: 1,
            send_window: SendWindow::new(frame::DEFAULT_INITIAL_WINDOW_SIZE),
            recv_window: RecvWindow::new(recv_target),
            partial_headers: None,
            outbound: VecDeque::new(),
            write_buf: BytesMut::with_capacity(16384),
            read_buf: BytesMut::with_capacity(16384),
            events: Vec::new(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// True once the server's SETTINGS have been received and the
    /// connection has not started closing.
    pub fn is_ready(&self) -> bool {
        self.state == ConnectionState::Open && self.transport.is_ready()
    }

    /// Whether new streams may be opened. Requests may be sent before the
    /// server's SETTINGS arrive.
    pub fn can_start_request(&self) -> bool {
        matches!(
            self.state,
            ConnectionState::WaitingSettings | ConnectionState::Open
        )
    }

    pub fn local_settings(&self) -> &ConnectionSettings {
        &self.local_settings
    }

    pub fn remote_settings(&self) -> &ConnectionSettings {
        &self.remote_settings
    }

    pub fn active_streams(&self) -> usize {
        self.streams.len()
    }

    pub fn stream_state(&self, stream_id: StreamId) -> Option<StreamState> {
        self.streams.get(&stream_id.value()).map(Stream::state)
    }

    /// True while request body bytes are waiting for window credit.
    pub fn has_queued_data(&self) -> bool {
        !self.outbound.is_empty()
    }

    /// Write the connection preface and our SETTINGS.
    ///
    /// Call once the transport is ready (after the TLS handshake, if any).
    pub fn on_transport_ready(&mut self) -> Result<(), ConnectionError> {
        if self.state != ConnectionState::WaitingPreface {
            return Ok(());
        }

        self.write_buf.extend_from_slice(frame::CONNECTION_PREFACE);
        let settings = SettingsFrame {
            ack: false,
            settings: self.local_settings.to_settings(),
        };
        self.frame_encoder
            .encode(&Frame::Settings(settings), &mut self.write_buf);

        let extra = self
            .local_settings
            .initial_window_size
            .saturating_sub(frame::DEFAULT_INITIAL_WINDOW_SIZE);
        if extra > 0 {
            self.frame_encoder
                .encode_window_update(StreamId::CONNECTION, extra, &mut self.write_buf);
        }

        self.state = ConnectionState::WaitingSettings;
        self.flush()
    }

    /// Feed raw bytes read from the socket.
    ///
    /// Protocol violations by the server are not returned here: they close
    /// the connection and surface as [`ConnectionEvent::Error`]. Only
    /// transport failures are returned as `Err`.
    pub fn on_recv(&mut self, data: &[u8]) -> Result<(), ConnectionError> {
        self.transport.on_recv(data)?;

        let mut buf = [0u8; 16384];
        loop {
            match self.transport.recv(&mut buf) {
                Ok(0) => break,
                Ok(n) => self.read_buf.extend_from_slice(&buf[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e.into()),
            }
        }

        self.process_frames();
        self.flush()
    }

    fn process_frames(&mut self) {
        while self.state != ConnectionState::Closed {
            let frame = match self.frame_decoder.decode(&mut self.read_buf) {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    self.fail(e.into());
                    break;
                }
            };

            trace!(stream_id = %frame.stream_id(), ?frame, "received frame");
            if let Err(e) = self.handle_frame(frame) {
                self.fail(e);
            }
        }
    }

    /// Close the connection after a connection error.
    fn fail(&mut self, error: ConnectionError) {
        debug!(error = %error, "connection error");
        self.frame_encoder
            .encode_goaway(StreamId::CONNECTION, error.error_code(), &mut self.write_buf);
        self.state = ConnectionState::Closed;
        self.streams.clear();
        self.outbound.clear();
        self.partial_headers = None;
        self.events.push(ConnectionEvent::Error(error));
    }

    fn handle_frame(&mut self, frame: Frame) -> Result<(), ConnectionError> {
        // A header block must be finished before any other frame arrives.
        if let Some(partial) = &self.partial_headers
            && !matches!(&frame, Frame::Continuation(f) if f.stream_id == partial.stream_id)
        {
            return Err(ConnectionError::Protocol(format!(
                "expected CONTINUATION for stream {}",
                partial.stream_id
            )));
        }

        match frame {
            Frame::Settings(f) => self.handle_settings(f),
            Frame::Ping(f) => {
                if !f.ack {
                    self.frame_encoder.encode_ping_ack(f.data, &mut self.write_buf);
                }
                Ok(())
            }
            Frame::GoAway(f) => {
                self.handle_goaway(f);
                Ok(())
            }
            Frame::WindowUpdate(f) => self.handle_window_update(f),
            Frame::Headers(f) => self.handle_headers(f),
            Frame::Continuation(f) => self.handle_continuation(f),
            Frame::Data(f) => self.handle_data(f),
            Frame::RstStream(f) => {
                self.handle_rst_stream(f);
                Ok(())
            }
            Frame::PushPromise(_) => Err(ConnectionError::Protocol(
                "PUSH_PROMISE received with push disabled".to_string(),
            )),
            Frame::Priority(_) | Frame::Unknown(_) => Ok(()),
        }
    }

    fn handle_settings(&mut self, frame: SettingsFrame) -> Result<(), ConnectionError> {
        if frame.ack {
            trace!("server acknowledged settings");
            return Ok(());
        }

        for setting in &frame.settings {
            match setting.id {
                SettingId::MaxConcurrentStreams => {
                    self.remote_settings.max_concurrent_streams = setting.value;
                }
                SettingId::InitialWindowSize => {
                    let delta = setting.value as i64
                        - self.remote_settings.initial_window_size as i64;
                    self.remote_settings.initial_window_size = setting.value;
                    for stream in self.streams.values_mut() {
                        stream.send.adjust(delta)?;
                    }
                }
                SettingId::MaxFrameSize => {
                    self.remote_settings.max_frame_size = setting.value;
                }
                SettingId::MaxHeaderListSize => {
                    self.remote_settings.max_header_list_size = setting.value;
                }
                SettingId::HeaderTableSize => {
                    // The encoder never inserts into its dynamic table, so a
                    // smaller table needs no size update.
                    self.remote_settings.header_table_size = setting.value;
                }
                SettingId::EnablePush => {
                    self.remote_settings.enable_push = setting.value == 1;
                }
                SettingId::Unknown(_) => {}
            }
        }

        self.frame_encoder.encode_settings_ack(&mut self.write_buf);

        if !self.got_settings {
            self.got_settings = true;
            if self.state == ConnectionState::WaitingSettings {
                self.state = ConnectionState::Open;
            }
            self.events.push(ConnectionEvent::Ready);
        }

        // A larger initial window may release queued data.
        self.flush_outbound();
        Ok(())
    }

    fn handle_goaway(&mut self, frame: GoAwayFrame) {
        let error_code = ErrorCode::from_u32(frame.error_code);
        debug!(
            last_stream_id = %frame.last_stream_id,
            error_code = %error_code,
            "server sent GOAWAY"
        );
        if self.state != ConnectionState::Closed {
            self.state = ConnectionState::Draining;
        }

        // Streams above last_stream_id were never processed by the server.
        let last = frame.last_stream_id.value();
        self.streams.retain(|id, _| *id <= last);
        self.outbound.retain(|pending| pending.stream_id.value() <= last);

        self.events.push(ConnectionEvent::GoAway {
            last_stream_id: frame.last_stream_id,
            error_code,
        });
    }

    fn handle_window_update(&mut self, frame: WindowUpdateFrame) -> Result<(), ConnectionError> {
        if frame.stream_id.is_connection_level() {
            self.send_window.increase(frame.increment)?;
        } else if let Some(stream) = self.streams.get_mut(&frame.stream_id.value())
            && stream.send.increase(frame.increment).is_err()
        {
            self.reset_stream_with_event(frame.stream_id, ErrorCode::FlowControlError);
            return Ok(());
        }

        self.flush_outbound();
        Ok(())
    }

    fn handle_headers(&mut self, frame: HeadersFrame) -> Result<(), ConnectionError> {
        if frame.end_headers {
            return self.complete_headers(frame.stream_id, frame.end_stream, &frame.header_block);
        }

        let mut block = BytesMut::with_capacity(frame.header_block.len() * 2);
        block.extend_from_slice(&frame.header_block);
        self.partial_headers = Some(PartialHeaders {
            stream_id: frame.stream_id,
            end_stream: frame.end_stream,
            block,
        });
        Ok(())
    }

    fn handle_continuation(&mut self, frame: ContinuationFrame) -> Result<(), ConnectionError> {
        let Some(mut partial) = self.partial_headers.take() else {
            return Err(ConnectionError::Protocol(format!(
                "unexpected CONTINUATION on stream {}",
                frame.stream_id
            )));
        };

        if partial.block.len() + frame.header_block.len() > MAX_HEADER_BLOCK_SIZE {
            return Err(ConnectionError::Protocol(
                "header block exceeds size limit".to_string(),
            ));
        }
        partial.block.extend_from_slice(&frame.header_block);

        if frame.end_headers {
            self.complete_headers(partial.stream_id, partial.end_stream, &partial.block)
        } else {
            self.partial_headers = Some(partial);
            Ok(())
        }
    }

    fn complete_headers(
        &mut self,
        stream_id: StreamId,
        end_stream: bool,
        block: &[u8],
    ) -> Result<(), ConnectionError> {
        // Decode even for unknown streams to keep the HPACK table in sync.
        let headers = self.hpack_decoder.decode(block)?;

        let Some(stream) = self.streams.get_mut(&stream_id.value()) else {
            trace!(%stream_id, "ignoring headers for inactive stream");
            return Ok(());
        };
        if !stream.can_recv() {
            self.reset_stream_with_event(stream_id, ErrorCode::StreamClosed);
            return Ok(());
        }

        self.events.push(ConnectionEvent::Headers {
            stream_id,
            headers,
            end_stream,
        });
        if end_stream {
            stream.recv_end_stream();
            self.close_if_done(stream_id);
        }
        Ok(())
    }

    fn handle_data(&mut self, frame: DataFrame) -> Result<(), ConnectionError> {
        let len = frame.flow_controlled_len();
        self.recv_window.consume(len)?;

        let stream_id = frame.stream_id;
        match self.streams.get_mut(&stream_id.value()) {
            Some(stream) if stream.can_recv() => {
                if stream.recv.consume(len).is_err() {
                    self.reset_stream_with_event(stream_id, ErrorCode::FlowControlError);
                } else {
                    if !frame.end_stream
                        && let Some(increment) = stream.recv.take_update()
                    {
                        self.frame_encoder
                            .encode_window_update(stream_id, increment, &mut self.write_buf);
                    }
                    if frame.end_stream {
                        stream.recv_end_stream();
                    }

                    self.events.push(ConnectionEvent::Data {
                        stream_id,
                        data: frame.data,
                        end_stream: frame.end_stream,
                    });
                    if frame.end_stream {
                        self.close_if_done(stream_id);
                    }
                }
            }
            Some(_) => self.reset_stream_with_event(stream_id, ErrorCode::StreamClosed),
            None => trace!(%stream_id, len, "discarding data for inactive stream"),
        }

        if let Some(increment) = self.recv_window.take_update() {
            self.frame_encoder
                .encode_window_update(StreamId::CONNECTION, increment, &mut self.write_buf);
        }
        Ok(())
    }

    fn handle_rst_stream(&mut self, frame: RstStreamFrame) {
        let error_code = ErrorCode::from_u32(frame.error_code);
        if self.streams.remove(&frame.stream_id.value()).is_none() {
            return;
        }
        debug!(stream_id = %frame.stream_id, error_code = %error_code, "stream reset by server");
        self.outbound.retain(|p| p.stream_id != frame.stream_id);
        self.events.push(ConnectionEvent::StreamReset {
            stream_id: frame.stream_id,
            error_code,
        });
    }

    /// Open a new stream and send its request headers.
    ///
    /// Header blocks larger than the server's max frame size are split into
    /// HEADERS followed by CONTINUATION frames.
    pub fn start_request(
        &mut self,
        headers: &[HeaderField],
        end_stream: bool,
    ) -> Result<StreamId, ConnectionError> {
        if !self.can_start_request() {
            return Err(ConnectionError::Protocol(format!(
                "cannot open stream in state {:?}",
                self.state
            )));
        }
        if self.streams.len() as u64 >= self.remote_settings.max_concurrent_streams as u64 {
            return Err(ConnectionError::Protocol(format!(
                "concurrent stream limit {} reached",
                self.remote_settings.max_concurrent_streams
            )));
        }
        if self.next_stream_id > MAX_STREAM_ID {
            return Err(ConnectionError::Protocol(
                "stream identifiers exhausted".to_string(),
            ));
        }

        let stream_id = StreamId::new(self.next_stream_id);
        self.next_stream_id += 2;

        let mut stream = Stream::new(
            stream_id,
            self.remote_settings.initial_window_size,
            self.local_settings.initial_window_size,
        );
        if end_stream {
            stream.send_end_stream();
        }
        self.streams.insert(stream_id.value(), stream);

        let mut block = BytesMut::new();
        self.hpack_encoder.encode(headers, &mut block);
        let mut block = block.freeze();

        let max = self.remote_settings.max_frame_size as usize;
        let first = block.split_to(block.len().min(max));
        self.frame_encoder.encode(
            &Frame::Headers(HeadersFrame {
                stream_id,
                end_stream,
                end_headers: block.is_empty(),
                priority: None,
                header_block: first,
            }),
            &mut self.write_buf,
        );
        while !block.is_empty() {
            let fragment = block.split_to(block.len().min(max));
            self.frame_encoder.encode(
                &Frame::Continuation(ContinuationFrame {
                    stream_id,
                    end_headers: block.is_empty(),
                    header_block: fragment,
                }),
                &mut self.write_buf,
            );
        }

        trace!(%stream_id, end_stream, "opened stream");
        self.flush()?;
        Ok(stream_id)
    }

    /// Queue request body bytes on a stream.
    ///
    /// Data is written as far as the connection and stream windows allow;
    /// the rest is sent as WINDOW_UPDATEs arrive.
    pub fn send_data(
        &mut self,
        stream_id: StreamId,
        data: Bytes,
        end_stream: bool,
    ) -> Result<(), ConnectionError> {
        match self.streams.get(&stream_id.value()) {
            Some(stream) if stream.can_send() => {}
            _ => {
                return Err(ConnectionError::Protocol(format!(
                    "stream {stream_id} is not open for sending"
                )));
            }
        }

        self.outbound.push_back(PendingData {
            stream_id,
            data,
            end_stream,
        });
        self.flush_outbound();
        self.flush()
    }

    /// Encode as much queued body data as flow control permits.
    fn flush_outbound(&mut self) {
        let mut blocked = VecDeque::new();
        let mut finished = Vec::new();

        while let Some(mut pending) = self.outbound.pop_front() {
            let Some(stream) = self.streams.get_mut(&pending.stream_id.value()) else {
                continue;
            };

            loop {
                let window = self
                    .send_window
                    .available()
                    .min(stream.send.available())
                    .min(self.remote_settings.max_frame_size) as usize;
                let len = pending.data.len().min(window);
                if len == 0 && !pending.data.is_empty() {
                    break;
                }

                let chunk = pending.data.split_to(len);
                let done = pending.data.is_empty();
                let end_stream = done && pending.end_stream;
                self.send_window.consume(len as u32);
                stream.send.consume(len as u32);
                self.frame_encoder.encode(
                    &Frame::Data(DataFrame::new(pending.stream_id, chunk, end_stream)),
                    &mut self.write_buf,
                );

                if done {
                    if end_stream {
                        stream.send_end_stream();
                        finished.push(pending.stream_id);
                    }
                    break;
                }
            }

            if !pending.data.is_empty() {
                blocked.push_back(pending);
            }
        }

        self.outbound = blocked;
        for stream_id in finished {
            self.close_if_done(stream_id);
        }
    }

    fn close_if_done(&mut self, stream_id: StreamId) {
        if self
            .streams
            .get(&stream_id.value())
            .is_some_and(Stream::is_closed)
        {
            self.streams.remove(&stream_id.value());
            trace!(%stream_id, "stream closed");
            self.events.push(ConnectionEvent::StreamClosed { stream_id });
        }
    }

    /// Reset a stream because of a stream error we detected.
    fn reset_stream_with_event(&mut self, stream_id: StreamId, code: ErrorCode) {
        self.reset_stream(stream_id, code);
        self.events.push(ConnectionEvent::StreamReset {
            stream_id,
            error_code: code,
        });
    }

    /// Abandon a stream and tell the server with RST_STREAM.
    pub fn reset_stream(&mut self, stream_id: StreamId, code: ErrorCode) {
        if self.streams.remove(&stream_id.value()).is_none() {
            return;
        }
        self.outbound.retain(|p| p.stream_id != stream_id);
        self.frame_encoder
            .encode_rst_stream(stream_id, code, &mut self.write_buf);
    }

    /// Send GOAWAY and close the connection. Idempotent.
    pub fn shutdown(&mut self, code: ErrorCode) -> Result<(), ConnectionError> {
        if self.state == ConnectionState::Closed {
            return Ok(());
        }
        if self.state != ConnectionState::WaitingPreface {
            // No server-initiated streams are ever accepted.
            self.frame_encoder
                .encode_goaway(StreamId::CONNECTION, code, &mut self.write_buf);
            self.flush()?;
        }
        self.state = ConnectionState::Closed;
        self.streams.clear();
        self.outbound.clear();
        self.transport.shutdown()?;
        Ok(())
    }

    /// Move encoded frames into the transport.
    pub fn flush(&mut self) -> Result<(), ConnectionError> {
        while !self.write_buf.is_empty() {
            match self.transport.send(&self.write_buf) {
                Ok(0) => break,
                Ok(n) => {
                    let _ = self.write_buf.split_to(n);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    pub fn poll_events(&mut self) -> Vec<ConnectionEvent> {
        std::mem::take(&mut self.events)
    }

    /// Bytes ready to be written to the socket.
    pub fn pending_send(&self) -> &[u8] {
        self.transport.pending_send()
    }

    /// Mark `n` bytes of [`pending_send`](Self::pending_send) as written.
    pub fn advance_send(&mut self, n: usize) {
        self.transport.advance_send(n);
    }

    pub fn has_pending_send(&self) -> bool {
        self.transport.has_pending_send() || !self.write_buf.is_empty()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{FRAME_HEADER_SIZE, Setting, flags};
    use crate::transport::PlainTransport;

    fn connected() -> Connection<PlainTransport> {
        let mut conn = Connection::new(PlainTransport::new());
        conn.on_transport_ready().unwrap();
        let n = conn.pending_send().len();
        conn.advance_send(n);
        conn
    }

    fn encode(frame: Frame) -> BytesMut {
        let mut buf = BytesMut::new();
        FrameEncoder::new().encode(&frame, &mut buf);
        buf
    }

    fn server_settings(settings: Vec<Setting>) -> BytesMut {
        encode(Frame::Settings(SettingsFrame { ack: false, settings }))
    }

    fn response_headers(stream_id: StreamId, headers: &[HeaderField], end_stream: bool) -> BytesMut {
        let mut block = BytesMut::new();
        HpackEncoder::new().encode(headers, &mut block);
        encode(Frame::Headers(HeadersFrame {
            stream_id,
            end_stream,
            end_headers: true,
            priority: None,
            header_block: block.freeze(),
        }))
    }

    /// Decode everything the client has written since the last drain.
    fn written_frames(conn: &mut Connection<PlainTransport>) -> Vec<Frame> {
        let mut buf = BytesMut::from(conn.pending_send());
        let n = buf.len();
        conn.advance_send(n);
        let decoder = FrameDecoder::new();
        let mut frames = Vec::new();
        while let Some(frame) = decoder.decode(&mut buf).unwrap() {
            frames.push(frame);
        }
        frames
    }

    fn request_headers() -> Vec<HeaderField> {
        vec![
            HeaderField::new(":method", "POST"),
            HeaderField::new(":scheme", "http"),
            HeaderField::new(":path", "/svc/Method"),
            HeaderField::new(":authority", "localhost"),
        ]
    }

    // Preface and settings

    #[test]
    fn test_preface_and_settings_written() {
        let mut conn = Connection::new(PlainTransport::new());
        assert_eq!(conn.state(), ConnectionState::WaitingPreface);
        conn.on_transport_ready().unwrap();
        assert_eq!(conn.state(), ConnectionState::WaitingSettings);

        let sent = conn.pending_send().to_vec();
        assert!(sent.starts_with(frame::CONNECTION_PREFACE));
        let mut rest = BytesMut::from(&sent[frame::CONNECTION_PREFACE.len()..]);
        let Some(Frame::Settings(settings)) = FrameDecoder::new().decode(&mut rest).unwrap()
        else {
            panic!("expected SETTINGS after preface");
        };
        assert!(!settings.ack);
        assert!(
            settings
                .settings
                .contains(&Setting::new(SettingId::MaxConcurrentStreams, 100))
        );
        assert!(rest.is_empty());
    }

    #[test]
    fn test_larger_window_raises_connection_window() {
        let settings = ConnectionSettings::new().initial_window_size(1 << 20);
        let mut conn = Connection::with_settings(PlainTransport::new(), settings);
        conn.on_transport_ready().unwrap();
        let sent = conn.pending_send().to_vec();
        let mut rest = BytesMut::from(&sent[frame::CONNECTION_PREFACE.len()..]);
        let decoder = FrameDecoder::new();
        decoder.decode(&mut rest).unwrap();
        let Some(Frame::WindowUpdate(update)) = decoder.decode(&mut rest).unwrap() else {
            panic!("expected WINDOW_UPDATE");
        };
        assert!(update.stream_id.is_connection_level());
        assert_eq!(update.increment, (1 << 20) - 65535);
    }

    #[test]
    fn test_server_settings_acked_and_ready() {
        let mut conn = connected();
        conn.on_recv(&server_settings(vec![Setting::new(
            SettingId::MaxFrameSize,
            32768,
        )]))
        .unwrap();

        assert_eq!(conn.state(), ConnectionState::Open);
        assert!(conn.is_ready());
        assert_eq!(conn.remote_settings().max_frame_size, 32768);
        assert!(matches!(conn.poll_events()[..], [ConnectionEvent::Ready]));

        let frames = written_frames(&mut conn);
        assert!(matches!(&frames[..], [Frame::Settings(s)] if s.ack));
    }

    #[test]
    fn test_ping_is_answered() {
        let mut conn = connected();
        let ping = encode(Frame::Ping(PingFrame {
            ack: false,
            data: *b"12345678",
        }));
        conn.on_recv(&ping).unwrap();
        let frames = written_frames(&mut conn);
        assert!(matches!(&frames[..], [Frame::Ping(p)] if p.ack && &p.data == b"12345678"));
    }

    // Request/response

    #[test]
    fn test_request_before_server_settings() {
        let mut conn = connected();
        let stream_id = conn.start_request(&request_headers(), false).unwrap();
        assert_eq!(stream_id, StreamId::new(1));
        conn.send_data(stream_id, Bytes::from_static(b"body"), true)
            .unwrap();

        let frames = written_frames(&mut conn);
        assert!(matches!(&frames[0], Frame::Headers(h) if h.end_headers && !h.end_stream));
        assert!(matches!(&frames[1], Frame::Data(d) if d.end_stream && &d.data[..] == b"body"));
        assert_eq!(
            conn.stream_state(stream_id),
            Some(StreamState::HalfClosedLocal)
        );

        let second = conn.start_request(&request_headers(), true).unwrap();
        assert_eq!(second, StreamId::new(3));
    }

    #[test]
    fn test_full_response_closes_stream() {
        let mut conn = connected();
        let stream_id = conn.start_request(&request_headers(), true).unwrap();

        let mut input = server_settings(Vec::new());
        input.extend_from_slice(&response_headers(
            stream_id,
            &[HeaderField::new(":status", "200")],
            false,
        ));
        input.extend_from_slice(&encode(Frame::Data(DataFrame::new(
            stream_id,
            Bytes::from_static(b"payload"),
            false,
        ))));
        input.extend_from_slice(&response_headers(
            stream_id,
            &[HeaderField::new("grpc-status", "0")],
            true,
        ));
        conn.on_recv(&input).unwrap();

        let events = conn.poll_events();
        assert!(matches!(events[0], ConnectionEvent::Ready));
        assert!(matches!(
            &events[1],
            ConnectionEvent::Headers { headers, end_stream: false, .. }
                if headers[0] == HeaderField::new(":status", "200")
        ));
        assert!(matches!(
            &events[2],
            ConnectionEvent::Data { data, end_stream: false, .. } if &data[..] == b"payload"
        ));
        assert!(matches!(
            &events[3],
            ConnectionEvent::Headers { end_stream: true, .. }
        ));
        assert!(matches!(
            events[4],
            ConnectionEvent::StreamClosed { stream_id: id } if id == stream_id
        ));
        assert_eq!(conn.active_streams(), 0);
    }

    #[test]
    fn test_continuation_is_assembled() {
        let mut conn = connected();
        let stream_id = conn.start_request(&request_headers(), true).unwrap();

        let mut block = BytesMut::new();
        HpackEncoder::new().encode(
            &[
                HeaderField::new(":status", "200"),
                HeaderField::new("x-long", "v".repeat(64)),
            ],
            &mut block,
        );
        let mut block = block.freeze();
        let head = block.split_to(4);

        let mut input = encode(Frame::Headers(HeadersFrame {
            stream_id,
            end_stream: false,
            end_headers: false,
            priority: None,
            header_block: head,
        }));
        input.extend_from_slice(&encode(Frame::Continuation(ContinuationFrame {
            stream_id,
            end_headers: true,
            header_block: block,
        })));
        conn.on_recv(&input).unwrap();

        let events = conn.poll_events();
        let [ConnectionEvent::Headers { headers, .. }] = &events[..] else {
            panic!("expected a single headers event, got {events:?}");
        };
        assert_eq!(headers[1].value, "v".repeat(64).into_bytes());
    }

    #[test]
    fn test_interleaved_frame_during_continuation_is_error() {
        let mut conn = connected();
        let stream_id = conn.start_request(&request_headers(), true).unwrap();
        let mut input = encode(Frame::Headers(HeadersFrame {
            stream_id,
            end_stream: false,
            end_headers: false,
            priority: None,
            header_block: Bytes::from_static(&[0x88]),
        }));
        input.extend_from_slice(&encode(Frame::Ping(PingFrame {
            ack: false,
            data: [0; 8],
        })));
        conn.on_recv(&input).unwrap();

        assert_eq!(conn.state(), ConnectionState::Closed);
        let events = conn.poll_events();
        assert!(matches!(
            &events[..],
            [ConnectionEvent::Error(ConnectionError::Protocol(_))]
        ));
        let frames = written_frames(&mut conn);
        assert!(matches!(
            frames.last(),
            Some(Frame::GoAway(g)) if g.error_code == ErrorCode::ProtocolError.to_u32()
        ));
    }

    #[test]
    fn test_large_header_block_uses_continuation() {
        let mut conn = connected();
        let mut headers = request_headers();
        headers.push(HeaderField::new("x-big", vec![b'a'; 20_000]));
        conn.start_request(&headers, true).unwrap();

        let frames = written_frames(&mut conn);
        assert!(matches!(&frames[0], Frame::Headers(h) if !h.end_headers && h.end_stream));
        assert!(matches!(frames.last(), Some(Frame::Continuation(c)) if c.end_headers));
    }

    // Flow control

    #[test]
    fn test_send_respects_stream_window() {
        let mut conn = connected();
        conn.on_recv(&server_settings(vec![Setting::new(
            SettingId::InitialWindowSize,
            10,
        )]))
        .unwrap();
        conn.poll_events();
        written_frames(&mut conn);

        let stream_id = conn.start_request(&request_headers(), false).unwrap();
        conn.send_data(stream_id, Bytes::from_static(b"0123456789abcdef"), true)
            .unwrap();
        assert!(conn.has_queued_data());

        let frames = written_frames(&mut conn);
        assert!(matches!(&frames[1], Frame::Data(d) if d.data.len() == 10 && !d.end_stream));

        conn.on_recv(&encode(Frame::WindowUpdate(WindowUpdateFrame {
            stream_id,
            increment: 100,
        })))
        .unwrap();
        assert!(!conn.has_queued_data());
        let frames = written_frames(&mut conn);
        assert!(matches!(&frames[..], [Frame::Data(d)] if &d.data[..] == b"abcdef" && d.end_stream));
    }

    #[test]
    fn test_data_frames_split_at_max_frame_size() {
        let mut conn = connected();
        let stream_id = conn.start_request(&request_headers(), false).unwrap();
        conn.send_data(stream_id, Bytes::from(vec![7u8; 40_000]), true)
            .unwrap();

        let frames = written_frames(&mut conn);
        let sizes: Vec<usize> = frames
            .iter()
            .filter_map(|f| match f {
                Frame::Data(d) => Some(d.data.len()),
                _ => None,
            })
            .collect();
        assert_eq!(sizes, vec![16384, 16384, 7232]);
    }

    #[test]
    fn test_receive_window_updates_sent() {
        let mut conn = connected();
        let stream_id = conn.start_request(&request_headers(), true).unwrap();
        written_frames(&mut conn);

        let data = encode(Frame::Data(DataFrame::new(
            stream_id,
            Bytes::from(vec![0u8; 16384]),
            false,
        )));
        conn.on_recv(&data).unwrap();
        conn.on_recv(&data).unwrap();

        let frames = written_frames(&mut conn);
        let updates: Vec<(StreamId, u32)> = frames
            .iter()
            .filter_map(|f| match f {
                Frame::WindowUpdate(u) => Some((u.stream_id, u.increment)),
                _ => None,
            })
            .collect();
        assert!(updates.contains(&(stream_id, 32768)));
        assert!(updates.contains(&(StreamId::CONNECTION, 32768)));
    }

    #[test]
    fn test_sustained_data_keeps_window_open() {
        let mut conn = connected();
        let stream_id = conn.start_request(&request_headers(), true).unwrap();
        for _ in 0..8 {
            let data = encode(Frame::Data(DataFrame::new(
                stream_id,
                Bytes::from(vec![0u8; 16384]),
                false,
            )));
            conn.on_recv(&data).unwrap();
        }

        let events = conn.poll_events();
        assert_eq!(events.len(), 8);
        assert!(events.iter().all(|e| matches!(e, ConnectionEvent::Data { .. })));
        assert_eq!(conn.state(), ConnectionState::WaitingSettings);
    }

    #[test]
    fn test_window_overrun_is_connection_error() {
        let mut conn = connected();
        let stream_id = conn.start_request(&request_headers(), true).unwrap();
        // Exhaust most of the connection window without reaching the
        // replenish threshold, then overrun it.
        conn.recv_window.consume(60_000).unwrap();
        let data = encode(Frame::Data(DataFrame::new(
            stream_id,
            Bytes::from(vec![0u8; 10_000]),
            false,
        )));
        conn.on_recv(&data).unwrap();

        assert_eq!(conn.state(), ConnectionState::Closed);
        assert!(matches!(
            conn.poll_events()[..],
            [ConnectionEvent::Error(ConnectionError::FlowControl(_))]
        ));
    }

    // Resets and shutdown

    #[test]
    fn test_rst_stream_reported() {
        let mut conn = connected();
        let stream_id = conn.start_request(&request_headers(), true).unwrap();
        conn.on_recv(&encode(Frame::RstStream(RstStreamFrame {
            stream_id,
            error_code: ErrorCode::RefusedStream.to_u32(),
        })))
        .unwrap();

        let events = conn.poll_events();
        assert!(matches!(
            events[..],
            [ConnectionEvent::StreamReset { error_code: ErrorCode::RefusedStream, .. }]
        ));
        assert_eq!(conn.active_streams(), 0);
    }

    #[test]
    fn test_goaway_drops_unprocessed_streams() {
        let mut conn = connected();
        let first = conn.start_request(&request_headers(), true).unwrap();
        let second = conn.start_request(&request_headers(), true).unwrap();

        conn.on_recv(&encode(Frame::GoAway(GoAwayFrame {
            last_stream_id: first,
            error_code: 0,
            debug_data: Bytes::new(),
        })))
        .unwrap();

        assert_eq!(conn.state(), ConnectionState::Draining);
        assert!(!conn.can_start_request());
        assert!(conn.stream_state(first).is_some());
        assert!(conn.stream_state(second).is_none());
        assert!(matches!(
            conn.poll_events()[..],
            [ConnectionEvent::GoAway { last_stream_id, error_code: ErrorCode::NoError }]
                if last_stream_id == first
        ));
    }

    #[test]
    fn test_push_promise_is_protocol_error() {
        let mut conn = connected();
        let mut buf = BytesMut::new();
        FrameEncoder::new().encode(
            &Frame::PushPromise(frame::PushPromiseFrame {
                stream_id: StreamId::new(1),
                end_headers: true,
                promised_stream_id: StreamId::new(2),
                header_block: Bytes::new(),
            }),
            &mut buf,
        );
        conn.on_recv(&buf).unwrap();
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[test]
    fn test_reset_stream_writes_rst() {
        let mut conn = connected();
        let stream_id = conn.start_request(&request_headers(), true).unwrap();
        written_frames(&mut conn);
        conn.reset_stream(stream_id, ErrorCode::Cancel);
        conn.flush().unwrap();

        let frames = written_frames(&mut conn);
        assert!(matches!(
            &frames[..],
            [Frame::RstStream(r)] if r.error_code == ErrorCode::Cancel.to_u32()
        ));
        assert!(conn.poll_events().is_empty());
    }

    #[test]
    fn test_shutdown_sends_goaway_once() {
        let mut conn = connected();
        conn.shutdown(ErrorCode::NoError).unwrap();
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert!(conn.start_request(&request_headers(), true).is_err());

        let sent = conn.pending_send().len();
        assert_eq!(sent, FRAME_HEADER_SIZE + 8);
        conn.shutdown(ErrorCode::NoError).unwrap();
        assert_eq!(conn.pending_send().len(), sent);
    }

    #[test]
    fn test_padded_data_counts_toward_window() {
        let mut conn = connected();
        let stream_id = conn.start_request(&request_headers(), true).unwrap();
        let mut raw = BytesMut::new();
        let payload_len: u32 = 1 + 3 + 200;
        raw.extend_from_slice(&payload_len.to_be_bytes()[1..]);
        raw.extend_from_slice(&[0x0, flags::PADDED]);
        raw.extend_from_slice(&stream_id.value().to_be_bytes());
        raw.extend_from_slice(&[200, b'a', b'b', b'c']);
        raw.extend_from_slice(&[0u8; 200]);
        conn.on_recv(&raw).unwrap();

        let events = conn.poll_events();
        assert!(matches!(&events[..], [ConnectionEvent::Data { data, .. }] if &data[..] == b"abc"));
        assert_eq!(conn.recv_window.available(), 65535 - 204);
    }
}
