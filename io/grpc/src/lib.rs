//! grpc-client - unary gRPC calls over a blocking HTTP/2 session.
//!
//! A [`Channel`] turns one call into one HTTP/2 request: it frames the
//! request payload, sends the gRPC headers, waits for the response on the
//! calling thread and maps `grpc-status` into a [`Status`]. Payloads are
//! opaque bytes; serialization belongs to the caller or to generated code
//! built on [`StubBase`].
//!
//! Messages are framed as:
//! - 1 byte: compressed flag (always 0)
//! - 4 bytes: message length (big-endian u32)
//! - N bytes: message payload

pub mod args;
mod channel;
pub mod config;
mod context;
mod credentials;
pub mod frame;
pub mod metadata;
mod status;
mod stub;
mod target;

pub use args::{ArgValue, ChannelArguments};
pub use channel::{Channel, SharedChannel, create_channel, create_custom_channel};
pub use config::{ChannelConfig, ConfigError};
pub use context::ClientContext;
pub use credentials::{ChannelCredentials, SslCredentialsOptions};
pub use frame::{decode_message, encode_message};
pub use status::{Code, Status};
pub use stub::{CodecError, Message, StubBase};
pub use target::Target;

pub use http2::{Endpoint, Request, Response, Session, SessionDriver, SessionError, SessionOptions};
