//! The channel: one gRPC call becomes one HTTP/2 request.

use crate::args::{self, ChannelArguments};
use crate::context::ClientContext;
use crate::credentials::ChannelCredentials;
use crate::frame::{FramingError, encode_message, strip_message_header};
use crate::metadata::{self, CONTENT_TYPE, Timeout};
use crate::status::{Code, Status};
use crate::target::Target;

use bytes::Bytes;
use http2::{Endpoint, ErrorCode, Request, Response, Session, SessionDriver, SessionError};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// A channel shared between stubs. Calls through one channel are
/// serialized by the lock.
pub type SharedChannel = Arc<Mutex<Channel>>;

const CONNECT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Create a channel with default arguments.
pub fn create_channel(target: &str, credentials: ChannelCredentials) -> SharedChannel {
    create_custom_channel(target, credentials, ChannelArguments::new())
}

pub fn create_custom_channel(
    target: &str,
    credentials: ChannelCredentials,
    args: ChannelArguments,
) -> SharedChannel {
    Arc::new(Mutex::new(Channel::with_args(target, credentials, args)))
}

/// A client connection to one target.
///
/// The channel owns a single [`SessionDriver`] and therefore at most one
/// network connection. It is not safe for concurrent use; share it through
/// [`SharedChannel`]. Dropping the channel closes the connection.
pub struct Channel {
    target: String,
    credentials: ChannelCredentials,
    args: ChannelArguments,
    endpoint: Option<Endpoint>,
    driver: Box<dyn SessionDriver + Send>,
}

impl Channel {
    pub fn new(target: &str, credentials: ChannelCredentials) -> Self {
        Self::with_args(target, credentials, ChannelArguments::new())
    }

    pub fn with_args(target: &str, credentials: ChannelCredentials, args: ChannelArguments) -> Self {
        let options = args.session_options(Default::default());
        Self::with_driver(target, credentials, args, Box::new(Session::new(options)))
    }

    /// Build a channel around any [`SessionDriver`].
    pub fn with_driver(
        target: &str,
        credentials: ChannelCredentials,
        args: ChannelArguments,
        driver: Box<dyn SessionDriver + Send>,
    ) -> Self {
        Self {
            target: target.to_string(),
            credentials,
            args,
            endpoint: None,
            driver,
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn credentials(&self) -> &ChannelCredentials {
        &self.credentials
    }

    pub fn arguments(&self) -> &ChannelArguments {
        &self.args
    }

    /// Connect if not already connected.
    pub fn connect(&mut self) -> Result<(), Status> {
        self.connect_before(None)
    }

    /// Connect, giving up with DEADLINE_EXCEEDED once `deadline` passes.
    fn connect_before(&mut self, deadline: Option<Instant>) -> Result<(), Status> {
        if self.driver.is_connected() {
            return Ok(());
        }
        let endpoint = self.endpoint()?.clone();
        self.driver
            .connect(&endpoint, deadline)
            .map_err(|e| session_status(&e))?;
        debug!(target = %self.target, tls = endpoint.is_tls(), "channel connected");
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.driver.is_connected()
    }

    /// Make one connection attempt, then wait for the channel to report
    /// connected. Returns false if `deadline` passes first.
    pub fn wait_for_connected(&mut self, deadline: Instant) -> bool {
        if let Err(status) = self.connect_before(Some(deadline)) {
            debug!(target = %self.target, %status, "connect attempt failed");
        }
        loop {
            if self.driver.is_connected() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            std::thread::sleep(CONNECT_POLL_INTERVAL.min(deadline - now));
        }
    }

    pub fn disconnect(&mut self) {
        self.driver.disconnect();
    }

    /// Run one unary call and return the response payload.
    ///
    /// An expired context fails with DEADLINE_EXCEEDED before any network
    /// activity, including connecting.
    pub fn execute_request(
        &mut self,
        method: &str,
        context: &ClientContext,
        request: &[u8],
    ) -> Result<Bytes, Status> {
        if context.is_expired() {
            return Err(Status::deadline_exceeded("deadline exceeded before call started"));
        }
        self.connect_before(context.deadline())?;

        if let Some(algorithm) = context.compression_algorithm() {
            debug!(algorithm, "compression is not supported; sending uncompressed");
        }

        let request = self.build_request(method, context, request)?;
        trace!(method, bytes = request.body.len(), "sending call");
        let response = self
            .driver
            .send_request(request)
            .map_err(|e| session_status(&e))?;
        interpret_response(response)
    }

    fn build_request(
        &mut self,
        method: &str,
        context: &ClientContext,
        payload: &[u8],
    ) -> Result<Request, Status> {
        let authority = match context.authority() {
            Some(authority) => authority.to_string(),
            None => self.endpoint()?.authority(),
        };
        let prefix = context
            .user_agent_prefix()
            .or_else(|| self.args.get_string(args::PRIMARY_USER_AGENT));

        let mut request = Request::new("POST", method)
            .authority(authority)
            .header("content-type", CONTENT_TYPE)
            .header("te", "trailers")
            .header("user-agent", metadata::user_agent(prefix))
            .body(encode_message(payload).map_err(|e| framing_status(&e))?);

        if let Some(remaining) = context.remaining() {
            request = request.header(
                "grpc-timeout",
                Timeout::from_duration(remaining).to_grpc_format(),
            );
        }
        if let Some(deadline) = context.deadline() {
            request = request.deadline(deadline);
        }

        // Names differing only in case collapse to one header; the entry
        // set last wins.
        let mut entries: Vec<(String, &str)> = Vec::new();
        for (key, value) in context.metadata() {
            let key = key.to_ascii_lowercase();
            if metadata::is_reserved(&key) {
                debug!(key = %key, "ignoring reserved metadata key");
                continue;
            }
            match entries.iter_mut().find(|(k, _)| *k == key) {
                Some(entry) => entry.1 = value,
                None => entries.push((key, value)),
            }
        }
        for (key, value) in entries {
            request = request.header(key, value);
        }
        Ok(request)
    }

    fn endpoint(&mut self) -> Result<&Endpoint, Status> {
        if self.endpoint.is_none() {
            let target = Target::parse(&self.target, self.credentials.is_secure())?;
            let tls = if target.is_secure() {
                Some(self.credentials.tls_config()?)
            } else {
                None
            };
            self.endpoint = Some(Endpoint {
                host: target.host().to_string(),
                port: target.port(),
                tls,
            });
        }
        self.endpoint
            .as_ref()
            .ok_or_else(|| Status::internal("endpoint not resolved"))
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.driver.disconnect();
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("target", &self.target)
            .field("credentials", &self.credentials.kind())
            .field("connected", &self.driver.is_connected())
            .finish()
    }
}

/// Turn a complete HTTP/2 response into the call result.
fn interpret_response(response: Response) -> Result<Bytes, Status> {
    if response.status != 200 {
        return Err(Status::internal(format!("HTTP error: {}", response.status)));
    }
    // A failing grpc-status wins over whatever the body holds.
    if let Some(status) = grpc_status(&response) {
        return Err(status);
    }
    strip_message_header(response.body).map_err(|e| framing_status(&e))
}

fn framing_status(error: &FramingError) -> Status {
    match error {
        FramingError::TooLarge { .. } => Status::resource_exhausted(error.to_string()),
        FramingError::Truncated { .. } => Status::internal(error.to_string()),
    }
}

/// The failure carried by `grpc-status`, if any. A missing header or `0`
/// means success.
fn grpc_status(response: &Response) -> Option<Status> {
    let raw = response.trailer_or_header("grpc-status")?;
    let code = std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.trim().parse::<i32>().ok())
        .map_or(Code::Unknown, Code::from_i32);
    if code.is_ok() {
        return None;
    }

    let message = response
        .trailer_or_header("grpc-message")
        .and_then(|m| std::str::from_utf8(m).ok())
        .map(metadata::percent_decode)
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| "Unknown gRPC error".to_string());
    Some(Status::new(code, message))
}

/// Map a session failure onto a status code.
pub(crate) fn session_status(error: &SessionError) -> Status {
    let code = match error {
        SessionError::Resolve { .. }
        | SessionError::Connect { .. }
        | SessionError::ConnectTimeout(_)
        | SessionError::Tls(_)
        | SessionError::Closed
        | SessionError::Io(_)
        | SessionError::GoAway(_)
        | SessionError::NotConnected => Code::Unavailable,
        SessionError::Setup(_)
        | SessionError::Submit(_)
        | SessionError::Protocol(_)
        | SessionError::IterationLimit(_) => Code::Internal,
        SessionError::DeadlineExceeded => Code::DeadlineExceeded,
        SessionError::StreamReset(reason) => match reason {
            ErrorCode::RefusedStream => Code::Unavailable,
            ErrorCode::Cancel => Code::Cancelled,
            ErrorCode::EnhanceYourCalm => Code::ResourceExhausted,
            ErrorCode::InadequateSecurity => Code::PermissionDenied,
            _ => Code::Internal,
        },
    };
    Status::new(code, error.to_string())
}
