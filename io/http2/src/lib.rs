//! http2 - a blocking HTTP/2 client.
//!
//! The protocol engine is sans-IO: [`Connection`] consumes bytes read from
//! a socket and produces bytes to write plus a queue of
//! [`ConnectionEvent`]s. [`Session`] owns the socket and runs that engine
//! on the calling thread, one request at a time.
//!
//! # Modules
//!
//! - `frame`: HTTP/2 frame types, encoding, and decoding
//! - `hpack`: HPACK header compression
//! - `connection`: client connection state machine and flow control
//! - `transport`: plain TCP and rustls byte transports
//! - `session`: socket ownership and the request loop

pub mod connection;
pub mod frame;
pub mod hpack;
pub mod session;
pub mod transport;

pub use frame::{
    CONNECTION_PREFACE, DEFAULT_HEADER_TABLE_SIZE, DEFAULT_INITIAL_WINDOW_SIZE,
    DEFAULT_MAX_CONCURRENT_STREAMS, DEFAULT_MAX_FRAME_SIZE, DataFrame, ErrorCode,
    FRAME_HEADER_SIZE, Frame, FrameDecoder, FrameEncoder, FrameError, FrameType, GoAwayFrame,
    HeadersFrame, PingFrame, Priority, RstStreamFrame, Setting, SettingId, SettingsFrame, StreamId,
    WindowUpdateFrame,
};

pub use hpack::{HeaderField, HpackDecoder, HpackEncoder, HpackError};

pub use transport::{
    ALPN_H2, ClientTransport, PlainTransport, TlsTransport, Transport, TransportState,
    client_config, webpki_root_store,
};

pub use connection::{
    Connection, ConnectionError, ConnectionEvent, ConnectionSettings, ConnectionState, Stream,
    StreamState,
};

pub use session::{
    Endpoint, Request, Response, Session, SessionDriver, SessionError, SessionOptions,
};
