use super::response::ResponseAccumulator;
use super::{Endpoint, Request, Response, SessionDriver, SessionError, SessionOptions};
use crate::connection::{Connection, ConnectionEvent, ConnectionSettings};
use crate::frame::{ErrorCode, StreamId};
use crate::hpack::HeaderField;
use crate::transport::{ALPN_H2, ClientTransport, PlainTransport, TlsTransport, Transport};

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

const READ_BUFFER_SIZE: usize = 16 * 1024;

/// An HTTP/2 client session over a blocking socket.
///
/// Each [`send_request`](SessionDriver::send_request) call drives the
/// connection on the caller's thread. The socket's read timeout is the
/// poll interval, so every loop iteration either processes received bytes
/// or waits at most that long.
pub struct Session {
    options: SessionOptions,
    link: Option<Link>,
    responses: HashMap<u32, ResponseAccumulator>,
}

struct Link {
    socket: TcpStream,
    conn: Connection<ClientTransport>,
    authority: String,
    scheme: &'static str,
    connected_at: Instant,
    last_used: Instant,
}

impl Session {
    pub fn new(options: SessionOptions) -> Self {
        Self {
            options,
            link: None,
            responses: HashMap::new(),
        }
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    fn open_socket(
        &self,
        endpoint: &Endpoint,
        limit: ConnectLimit,
    ) -> Result<TcpStream, SessionError> {
        let addrs: Vec<SocketAddr> = (endpoint.host.as_str(), endpoint.port)
            .to_socket_addrs()
            .map_err(|source| SessionError::Resolve {
                host: endpoint.host.clone(),
                source,
            })?
            .collect();

        let mut last_error = None;
        for addr in addrs {
            let timeout = limit.remaining().ok_or_else(|| limit.expired())?;
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(socket) => {
                    self.configure_socket(&socket)?;
                    debug!(%addr, "tcp connected");
                    return Ok(socket);
                }
                Err(source) => {
                    debug!(%addr, error = %source, "tcp connect failed");
                    last_error = Some(SessionError::Connect { addr, source });
                }
            }
        }

        if limit.remaining().is_none() {
            return Err(limit.expired());
        }
        Err(last_error.unwrap_or_else(|| SessionError::Resolve {
            host: endpoint.host.clone(),
            source: io::Error::new(io::ErrorKind::NotFound, "no addresses found"),
        }))
    }

    fn configure_socket(&self, socket: &TcpStream) -> Result<(), SessionError> {
        socket.set_nodelay(self.options.tcp_nodelay)?;
        socket.set_read_timeout(Some(self.options.poll_interval))?;
        socket.set_write_timeout(Some(self.options.connect_timeout))?;

        if let Some(time) = self.options.keepalive_time {
            #[allow(unused_mut)]
            let mut keepalive = socket2::TcpKeepalive::new().with_time(time);
            #[cfg(any(target_os = "linux", target_os = "macos", windows))]
            if let Some(interval) = self.options.keepalive_interval {
                keepalive = keepalive.with_interval(interval);
            }
            socket2::SockRef::from(socket).set_tcp_keepalive(&keepalive)?;
        }
        Ok(())
    }

    /// Complete the TLS handshake before `limit`, whatever the peer does.
    fn handshake(
        &self,
        socket: &mut TcpStream,
        config: Arc<rustls::ClientConfig>,
        host: &str,
        limit: ConnectLimit,
    ) -> Result<TlsTransport, SessionError> {
        let mut tls =
            TlsTransport::new(config, host).map_err(|e| SessionError::Tls(e.to_string()))?;
        let mut buf = vec![0u8; READ_BUFFER_SIZE];

        loop {
            write_out(socket, &mut tls)?;

            if tls.is_ready() {
                match tls.alpn_protocol() {
                    Some(proto) if proto != ALPN_H2 => {
                        return Err(SessionError::Tls(format!(
                            "server negotiated {:?} instead of h2",
                            String::from_utf8_lossy(proto)
                        )));
                    }
                    None => debug!("server did not negotiate ALPN, assuming h2"),
                    _ => {}
                }
                socket.set_read_timeout(Some(self.options.poll_interval))?;
                return Ok(tls);
            }

            let Some(left) = limit.remaining() else {
                debug!(host, "tls handshake timed out");
                return Err(limit.expired());
            };
            socket.set_read_timeout(Some(left.min(self.options.poll_interval)))?;

            match socket.read(&mut buf) {
                Ok(0) => {
                    return Err(SessionError::Tls(
                        "connection closed during handshake".to_string(),
                    ));
                }
                Ok(n) => {
                    if let Err(e) = tls.on_recv(&buf[..n]) {
                        // Let the server see our alert before giving up.
                        let _ = write_out(socket, &mut tls);
                        return Err(SessionError::Tls(e.to_string()));
                    }
                }
                Err(e) if is_retryable(&e) => continue,
                Err(e) => return Err(SessionError::Io(e)),
            }
        }
    }

    /// Run the read/write loop until `stream_id` finishes.
    fn run_until_complete(
        &mut self,
        stream_id: StreamId,
        deadline: Option<Instant>,
    ) -> Result<(), SessionError> {
        let mut buf = vec![0u8; READ_BUFFER_SIZE];

        for _ in 0..self.options.max_iterations {
            let link = self.link.as_mut().ok_or(SessionError::NotConnected)?;
            link.flush()?;

            if self
                .responses
                .get(&stream_id.value())
                .is_none_or(|r| r.is_finished())
            {
                return Ok(());
            }

            if let Some(deadline) = deadline
                && Instant::now() >= deadline
            {
                return Err(SessionError::DeadlineExceeded);
            }

            let n = match link.socket.read(&mut buf) {
                Ok(0) => return Err(SessionError::Closed),
                Ok(n) => n,
                Err(e) if is_retryable(&e) => continue,
                Err(e) => return Err(SessionError::Io(e)),
            };
            trace!(bytes = n, "read");

            link.conn.on_recv(&buf[..n])?;
            for event in link.conn.poll_events() {
                dispatch(&mut self.responses, event)?;
            }
        }

        Err(SessionError::IterationLimit(self.options.max_iterations))
    }

    /// Leave the connection usable after a per-call failure, or tear it down.
    fn recover(&mut self, stream_id: StreamId, error: &SessionError) {
        if error.is_fatal() {
            debug!(%error, "dropping connection");
            self.disconnect();
            return;
        }

        if let SessionError::DeadlineExceeded = error
            && let Some(link) = self.link.as_mut()
        {
            link.conn.reset_stream(stream_id, ErrorCode::Cancel);
            if let Err(e) = link.flush() {
                debug!(error = %e, "failed to flush RST_STREAM");
            }
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new(SessionOptions::default())
    }
}

impl SessionDriver for Session {
    fn connect(
        &mut self,
        endpoint: &Endpoint,
        deadline: Option<Instant>,
    ) -> Result<(), SessionError> {
        if self.is_connected() {
            return Ok(());
        }
        // Replace a dead, draining, idle or aged connection.
        self.disconnect();

        let limit = ConnectLimit::new(self.options.connect_timeout, deadline);
        let mut socket = self.open_socket(endpoint, limit)?;
        let transport = match &endpoint.tls {
            Some(config) => ClientTransport::Tls(Box::new(self.handshake(
                &mut socket,
                config.clone(),
                &endpoint.host,
                limit,
            )?)),
            None => ClientTransport::Plain(PlainTransport::new()),
        };

        let settings = ConnectionSettings::new()
            .max_concurrent_streams(self.options.max_concurrent_streams)
            .initial_window_size(self.options.initial_window_size);
        let mut conn = Connection::with_settings(transport, settings);
        conn.on_transport_ready()
            .map_err(|e| SessionError::Setup(e.to_string()))?;

        let now = Instant::now();
        let mut link = Link {
            socket,
            conn,
            authority: endpoint.authority(),
            scheme: endpoint.scheme(),
            connected_at: now,
            last_used: now,
        };
        link.flush()?;

        debug!(
            authority = %link.authority,
            tls = endpoint.is_tls(),
            "http2 session established"
        );
        self.link = Some(link);
        Ok(())
    }

    fn send_request(&mut self, request: Request) -> Result<Response, SessionError> {
        let link = self.link.as_mut().ok_or(SessionError::NotConnected)?;
        if !link.conn.can_start_request() {
            return Err(SessionError::NotConnected);
        }

        let headers = request_headers(&request, link);
        let end_stream = request.body.is_empty();
        let stream_id = link
            .conn
            .start_request(&headers, end_stream)
            .map_err(SessionError::Submit)?;
        if !end_stream
            && let Err(e) = link.conn.send_data(stream_id, request.body, true)
        {
            link.conn.reset_stream(stream_id, ErrorCode::InternalError);
            return Err(SessionError::Submit(e));
        }
        link.last_used = Instant::now();
        trace!(%stream_id, path = %request.path, "request submitted");

        self.responses
            .insert(stream_id.value(), ResponseAccumulator::new());
        let result = self.run_until_complete(stream_id, request.deadline);
        let accumulator = self.responses.remove(&stream_id.value());

        if let Some(link) = self.link.as_mut() {
            link.last_used = Instant::now();
        }

        let outcome = result.and_then(|()| match accumulator {
            Some(acc) => acc.into_response(),
            None => Err(SessionError::Closed),
        });

        match outcome {
            Ok(response) => Ok(response),
            Err(error) => {
                self.recover(stream_id, &error);
                Err(error)
            }
        }
    }

    fn disconnect(&mut self) {
        let Some(mut link) = self.link.take() else {
            return;
        };
        self.responses.clear();

        if let Err(e) = link.conn.shutdown(ErrorCode::NoError) {
            debug!(error = %e, "error sending GOAWAY");
        }
        if let Err(e) = write_out(&mut link.socket, link.conn.transport_mut()) {
            debug!(error = %e, "error flushing on disconnect");
        }
        if let Err(e) = link.socket.shutdown(Shutdown::Both)
            && e.kind() != io::ErrorKind::NotConnected
        {
            warn!(error = %e, "socket shutdown failed");
        }
        debug!(authority = %link.authority, "http2 session closed");
    }

    fn is_connected(&self) -> bool {
        self.link
            .as_ref()
            .is_some_and(|link| link.is_usable(&self.options))
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// The point in time by which a connect attempt must finish.
#[derive(Debug, Clone, Copy)]
struct ConnectLimit {
    at: Instant,
    timeout: Duration,
    /// The caller's deadline comes before the connect timeout.
    caller_deadline: bool,
}

impl ConnectLimit {
    fn new(timeout: Duration, deadline: Option<Instant>) -> Self {
        let at = Instant::now() + timeout;
        match deadline {
            Some(deadline) if deadline <= at => Self {
                at: deadline,
                timeout,
                caller_deadline: true,
            },
            _ => Self {
                at,
                timeout,
                caller_deadline: false,
            },
        }
    }

    /// Time left, or `None` once the limit has passed.
    fn remaining(&self) -> Option<Duration> {
        let left = self.at.saturating_duration_since(Instant::now());
        (!left.is_zero()).then_some(left)
    }

    fn expired(&self) -> SessionError {
        if self.caller_deadline {
            SessionError::DeadlineExceeded
        } else {
            SessionError::ConnectTimeout(self.timeout)
        }
    }
}

impl Link {
    fn is_usable(&self, options: &SessionOptions) -> bool {
        if !self.conn.can_start_request() || !self.conn.transport().is_ready() {
            return false;
        }
        if let Some(idle) = options.max_connection_idle
            && self.last_used.elapsed() > idle
        {
            return false;
        }
        if let Some(age) = options.max_connection_age
            && self.connected_at.elapsed() > age
        {
            return false;
        }
        true
    }

    /// Move queued frames through the transport and onto the socket.
    fn flush(&mut self) -> Result<(), SessionError> {
        loop {
            self.conn.flush()?;
            if !self.conn.transport().has_pending_send() {
                return Ok(());
            }
            write_out(&mut self.socket, self.conn.transport_mut())?;
        }
    }
}

fn request_headers(request: &Request, link: &Link) -> Vec<HeaderField> {
    let authority = request
        .authority
        .as_deref()
        .filter(|a| !a.is_empty())
        .unwrap_or(&link.authority);

    let mut headers = Vec::with_capacity(4 + request.headers.len());
    headers.push(HeaderField::new(":method", request.method.as_str()));
    headers.push(HeaderField::new(":scheme", link.scheme));
    headers.push(HeaderField::new(":path", request.path.as_str()));
    headers.push(HeaderField::new(":authority", authority));
    headers.extend(request.headers.iter().filter(|h| !h.is_pseudo()).cloned());
    headers
}

fn dispatch(
    responses: &mut HashMap<u32, ResponseAccumulator>,
    event: ConnectionEvent,
) -> Result<(), SessionError> {
    match event {
        ConnectionEvent::Ready => trace!("server settings received"),
        ConnectionEvent::Headers {
            stream_id,
            headers,
            end_stream,
        } => {
            if let Some(acc) = responses.get_mut(&stream_id.value()) {
                acc.on_headers(headers, end_stream);
            }
        }
        ConnectionEvent::Data {
            stream_id,
            data,
            end_stream,
        } => {
            if let Some(acc) = responses.get_mut(&stream_id.value()) {
                acc.on_data(&data, end_stream);
            }
        }
        ConnectionEvent::StreamClosed { stream_id } => {
            if let Some(acc) = responses.get_mut(&stream_id.value()) {
                acc.complete();
            }
        }
        ConnectionEvent::StreamReset {
            stream_id,
            error_code,
        } => {
            debug!(%stream_id, %error_code, "stream reset");
            if let Some(acc) = responses.get_mut(&stream_id.value()) {
                acc.reset(error_code);
            }
        }
        ConnectionEvent::GoAway {
            last_stream_id,
            error_code,
        } => {
            debug!(%last_stream_id, %error_code, "received GOAWAY");
            for (_, acc) in responses
                .iter_mut()
                .filter(|(id, _)| **id > last_stream_id.value())
            {
                acc.refuse(error_code);
            }
        }
        ConnectionEvent::Error(e) => return Err(SessionError::Protocol(e)),
    }
    Ok(())
}

/// Write everything the transport has queued.
fn write_out<T: Transport>(socket: &mut TcpStream, transport: &mut T) -> io::Result<()> {
    while transport.has_pending_send() {
        match socket.write(transport.pending_send()) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => transport.advance_send(n),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

fn is_retryable(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
    )
}
