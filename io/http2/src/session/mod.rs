//! Blocking request execution over a single HTTP/2 connection.
//!
//! [`Session`] owns one TCP socket (optionally wrapped in TLS) and a
//! [`Connection`](crate::Connection). [`SessionDriver::send_request`]
//! submits one request and runs the read/write loop on the calling thread
//! until that stream completes, fails, or the loop's iteration budget runs
//! out. The trait exists so callers can substitute the network layer.

mod driver;
mod response;

pub use driver::Session;

use crate::frame::ErrorCode;
use crate::hpack::HeaderField;
use crate::connection::ConnectionError;

use bytes::Bytes;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Synchronous HTTP/2 request/response exchange.
///
/// Implementations are not thread safe; callers serialize access.
pub trait SessionDriver {
    /// Open the connection if it is not already open.
    ///
    /// Connecting gives up at `deadline` when one is set, failing with
    /// [`SessionError::DeadlineExceeded`].
    fn connect(
        &mut self,
        endpoint: &Endpoint,
        deadline: Option<Instant>,
    ) -> Result<(), SessionError>;

    /// Send one request and block until its response has been received.
    fn send_request(&mut self, request: Request) -> Result<Response, SessionError>;

    /// Close the connection. Idempotent.
    fn disconnect(&mut self);

    fn is_connected(&self) -> bool;
}

/// Where to connect, and whether to use TLS.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    /// TLS client configuration. `None` selects cleartext HTTP/2.
    pub tls: Option<Arc<rustls::ClientConfig>>,
}

impl Endpoint {
    pub fn plain(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            tls: None,
        }
    }

    pub fn tls(host: impl Into<String>, port: u16, config: Arc<rustls::ClientConfig>) -> Self {
        Self {
            host: host.into(),
            port,
            tls: Some(config),
        }
    }

    pub fn is_tls(&self) -> bool {
        self.tls.is_some()
    }

    pub fn scheme(&self) -> &'static str {
        if self.is_tls() { "https" } else { "http" }
    }

    /// `host:port`, with IPv6 literals in brackets.
    pub fn authority(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// An outgoing request.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: String,
    pub path: String,
    /// `:authority` override. Defaults to the endpoint's `host:port`.
    pub authority: Option<String>,
    /// Regular headers. Pseudo-headers here are ignored.
    pub headers: Vec<HeaderField>,
    pub body: Bytes,
    /// Give up waiting for the response at this instant.
    pub deadline: Option<Instant>,
}

impl Request {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            authority: None,
            headers: Vec::new(),
            body: Bytes::new(),
            deadline: None,
        }
    }

    pub fn header(mut self, name: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        self.headers.push(HeaderField::new(name, value));
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn authority(mut self, authority: impl Into<String>) -> Self {
        self.authority = Some(authority.into());
        self
    }

    pub fn deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// A complete response.
#[derive(Debug, Clone, Default)]
pub struct Response {
    /// Value of `:status`, or 0 if the server omitted it.
    pub status: u16,
    pub headers: Vec<HeaderField>,
    pub trailers: Vec<HeaderField>,
    pub body: Bytes,
}

impl Response {
    /// First response header named `name` (lower-case).
    pub fn header(&self, name: &str) -> Option<&[u8]> {
        find(&self.headers, name)
    }

    pub fn trailer(&self, name: &str) -> Option<&[u8]> {
        find(&self.trailers, name)
    }

    /// Look `name` up in the trailers, then in the headers. Trailers-only
    /// responses carry their status fields in the header block.
    pub fn trailer_or_header(&self, name: &str) -> Option<&[u8]> {
        self.trailer(name).or_else(|| self.header(name))
    }
}

fn find<'a>(fields: &'a [HeaderField], name: &str) -> Option<&'a [u8]> {
    fields
        .iter()
        .find(|f| f.name == name.as_bytes())
        .map(|f| &f.value[..])
}

/// Tuning for [`Session`].
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Upper bound on read/write loop iterations per request.
    pub max_iterations: usize,
    /// Socket read timeout, which is how long one idle iteration waits.
    pub poll_interval: Duration,
    pub connect_timeout: Duration,
    /// SETTINGS_MAX_CONCURRENT_STREAMS advertised to the server.
    pub max_concurrent_streams: u32,
    /// Stream receive window advertised to the server.
    pub initial_window_size: u32,
    pub tcp_nodelay: bool,
    /// Idle time before TCP keepalive probes start.
    pub keepalive_time: Option<Duration>,
    /// Interval between TCP keepalive probes.
    pub keepalive_interval: Option<Duration>,
    /// A connection unused for longer than this is replaced on the next connect.
    pub max_connection_idle: Option<Duration>,
    /// A connection older than this is replaced on the next connect.
    pub max_connection_age: Option<Duration>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            max_iterations: 3000,
            poll_interval: Duration::from_millis(10),
            connect_timeout: Duration::from_secs(5),
            max_concurrent_streams: crate::frame::DEFAULT_MAX_CONCURRENT_STREAMS,
            initial_window_size: crate::frame::DEFAULT_INITIAL_WINDOW_SIZE,
            tcp_nodelay: true,
            keepalive_time: None,
            keepalive_interval: None,
            max_connection_idle: None,
            max_connection_age: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("failed to resolve host {host}: {source}")]
    Resolve { host: String, source: io::Error },
    #[error("failed to connect to {addr}: {source}")]
    Connect { addr: SocketAddr, source: io::Error },
    #[error("connect did not complete within {0:?}")]
    ConnectTimeout(Duration),
    #[error("TLS error: {0}")]
    Tls(String),
    #[error("failed to initialize HTTP/2 session: {0}")]
    Setup(String),
    #[error("failed to submit request: {0}")]
    Submit(ConnectionError),
    #[error("HTTP/2 protocol error: {0}")]
    Protocol(ConnectionError),
    #[error("stream reset by server: {0}")]
    StreamReset(ErrorCode),
    #[error("connection going away ({0}) before the request was processed")]
    GoAway(ErrorCode),
    #[error("connection closed by server")]
    Closed,
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("deadline exceeded")]
    DeadlineExceeded,
    #[error("exceeded maximum iterations ({0}) waiting for response")]
    IterationLimit(usize),
    #[error("not connected")]
    NotConnected,
}

impl From<ConnectionError> for SessionError {
    fn from(e: ConnectionError) -> Self {
        match e {
            ConnectionError::Io(e) => SessionError::Io(e),
            other => SessionError::Protocol(other),
        }
    }
}

impl SessionError {
    /// Whether the connection can no longer be used after this error.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            SessionError::StreamReset(_) | SessionError::DeadlineExceeded | SessionError::Submit(_)
        )
    }
}
