//! Building block for generated service clients.

use crate::channel::SharedChannel;
use crate::context::ClientContext;
use crate::status::Status;

use bytes::Bytes;

/// Serialization failure reported by a [`Message`] implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct CodecError(String);

impl CodecError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// A value that can be sent in or received from a call.
///
/// Implemented by the serialization layer (generated protobuf types, for
/// example). The transport never looks inside the bytes.
pub trait Message: Sized {
    fn encode(&self) -> Result<Bytes, CodecError>;

    fn decode(bytes: Bytes) -> Result<Self, CodecError>;
}

impl Message for Bytes {
    fn encode(&self) -> Result<Bytes, CodecError> {
        Ok(self.clone())
    }

    fn decode(bytes: Bytes) -> Result<Self, CodecError> {
        Ok(bytes)
    }
}

impl Message for Vec<u8> {
    fn encode(&self) -> Result<Bytes, CodecError> {
        Ok(Bytes::copy_from_slice(self))
    }

    fn decode(bytes: Bytes) -> Result<Self, CodecError> {
        Ok(bytes.to_vec())
    }
}

/// Shared plumbing for per-service client types.
///
/// Several stubs may hold the same channel.
///
/// ```no_run
/// use grpc_client::{ChannelCredentials, ClientContext, StubBase, create_channel};
///
/// let channel = create_channel("localhost:50051", ChannelCredentials::insecure());
/// let stub = StubBase::new(channel);
/// let reply = stub.make_call("/echo.Echo/Say", &ClientContext::new(), b"hi");
/// ```
#[derive(Debug, Clone, Default)]
pub struct StubBase {
    channel: Option<SharedChannel>,
}

impl StubBase {
    pub fn new(channel: SharedChannel) -> Self {
        Self {
            channel: Some(channel),
        }
    }

    /// A stub with no channel. Every call fails with INTERNAL.
    pub fn unbound() -> Self {
        Self { channel: None }
    }

    pub fn channel(&self) -> Option<&SharedChannel> {
        self.channel.as_ref()
    }

    /// Send pre-serialized `request` to `method` and return the raw reply.
    pub fn make_call(
        &self,
        method: &str,
        context: &ClientContext,
        request: &[u8],
    ) -> Result<Bytes, Status> {
        let channel = self
            .channel
            .as_ref()
            .ok_or_else(|| Status::internal("stub has no channel"))?;
        channel.lock().execute_request(method, context, request)
    }

    /// Typed unary call. Codec failures become INTERNAL.
    pub fn unary<Req: Message, Resp: Message>(
        &self,
        method: &str,
        context: &ClientContext,
        request: &Req,
    ) -> Result<Resp, Status> {
        let request = request
            .encode()
            .map_err(|e| Status::internal(format!("failed to serialize request: {e}")))?;
        let reply = self.make_call(method, context, &request)?;
        Resp::decode(reply)
            .map_err(|e| Status::internal(format!("failed to deserialize response: {e}")))
    }
}
