//! End-to-end calls through a real session to a loopback HTTP/2 server.

use bytes::{Bytes, BytesMut};
use grpc_client::{
    Channel, ChannelArguments, ChannelConfig, ChannelCredentials, ClientContext, Code, StubBase,
    create_channel, create_custom_channel,
};
use http2::{
    CONNECTION_PREFACE, DataFrame, Frame, FrameDecoder, FrameEncoder, HeaderField, HeadersFrame,
    HpackDecoder, HpackEncoder, SettingsFrame, StreamId,
};
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

// ── Test server ─────────────────────────────────────────────────────────

/// How the server answers one call.
#[derive(Clone)]
struct Reply {
    http_status: &'static str,
    body: Vec<u8>,
    trailers: Vec<(&'static str, &'static str)>,
}

impl Reply {
    fn ok(payload: &[u8]) -> Self {
        let mut body = vec![0, 0, 0, 0, payload.len() as u8];
        body.extend_from_slice(payload);
        Self {
            http_status: "200",
            body,
            trailers: vec![("grpc-status", "0")],
        }
    }
}

/// What the server saw for one call.
struct Seen {
    headers: Vec<HeaderField>,
    body: Vec<u8>,
}

impl Seen {
    fn header(&self, name: &str) -> Option<String> {
        self.headers
            .iter()
            .find(|h| h.name == name.as_bytes())
            .and_then(|h| h.value_str())
            .map(str::to_string)
    }
}

struct Conn {
    socket: TcpStream,
    buf: BytesMut,
    decoder: FrameDecoder,
    encoder: FrameEncoder,
    hpack_in: HpackDecoder,
    hpack_out: HpackEncoder,
}

impl Conn {
    fn read_frame(&mut self) -> Option<Frame> {
        loop {
            if let Some(frame) = self.decoder.decode(&mut self.buf).unwrap() {
                return Some(frame);
            }
            let mut chunk = [0u8; 4096];
            match self.socket.read(&mut chunk) {
                Ok(0) | Err(_) => return None,
                Ok(n) => self.buf.extend_from_slice(&chunk[..n]),
            }
        }
    }

    fn write(&mut self, frame: Frame) {
        let mut out = BytesMut::new();
        self.encoder.encode(&frame, &mut out);
        self.socket.write_all(&out).unwrap();
    }

    fn headers(&mut self, stream_id: StreamId, fields: &[(&str, &str)], end_stream: bool) {
        let fields: Vec<HeaderField> = fields
            .iter()
            .map(|(k, v)| HeaderField::new(*k, *v))
            .collect();
        let mut block = BytesMut::new();
        self.hpack_out.encode(&fields, &mut block);
        self.write(Frame::Headers(HeadersFrame {
            stream_id,
            end_stream,
            end_headers: true,
            priority: None,
            header_block: block.freeze(),
        }));
    }
}

/// Accept one connection and answer one call per reply.
fn serve(replies: Vec<Reply>) -> (u16, JoinHandle<Vec<Seen>>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let handle = thread::spawn(move || {
        let (socket, _) = listener.accept().unwrap();
        socket
            .set_read_timeout(Some(Duration::from_secs(10)))
            .unwrap();
        let mut conn = Conn {
            socket,
            buf: BytesMut::new(),
            decoder: FrameDecoder::new(),
            encoder: FrameEncoder::new(),
            hpack_in: HpackDecoder::new(),
            hpack_out: HpackEncoder::new(),
        };

        let mut preface = [0u8; 24];
        conn.socket.read_exact(&mut preface).unwrap();
        assert_eq!(&preface[..], CONNECTION_PREFACE);
        conn.write(Frame::Settings(SettingsFrame::default()));

        let mut seen = Vec::new();
        let mut replies = replies.into_iter();
        let mut pending: Option<(StreamId, Seen)> = None;

        while let Some(frame) = conn.read_frame() {
            let finished = match frame {
                Frame::Settings(settings) if !settings.ack => {
                    let mut out = BytesMut::new();
                    conn.encoder.encode_settings_ack(&mut out);
                    conn.socket.write_all(&out).unwrap();
                    false
                }
                Frame::Headers(headers) => {
                    let fields = conn.hpack_in.decode(&headers.header_block).unwrap();
                    pending = Some((
                        headers.stream_id,
                        Seen {
                            headers: fields,
                            body: Vec::new(),
                        },
                    ));
                    headers.end_stream
                }
                Frame::Data(data) => {
                    if let Some((_, call)) = pending.as_mut() {
                        call.body.extend_from_slice(&data.data);
                    }
                    data.end_stream
                }
                _ => false,
            };

            if finished && let Some((stream_id, call)) = pending.take() {
                // Out of replies: keep reading so the call stalls.
                let Some(reply) = replies.next() else { continue };
                conn.headers(stream_id, &[(":status", reply.http_status)], false);
                if !reply.body.is_empty() {
                    conn.write(Frame::Data(DataFrame::new(
                        stream_id,
                        Bytes::from(reply.body),
                        false,
                    )));
                }
                conn.headers(stream_id, &reply.trailers, true);
                seen.push(call);
            }
        }
        seen
    });

    (port, handle)
}

// ── Tests ───────────────────────────────────────────────────────────────

#[test]
fn unary_success() {
    let (port, server) = serve(vec![Reply::ok(b"AB")]);
    let channel = create_channel(&format!("127.0.0.1:{port}"), ChannelCredentials::insecure());

    let mut ctx = ClientContext::new();
    ctx.add_metadata("x-tenant", "acme");
    ctx.set_timeout(Duration::from_secs(10));
    let reply = channel
        .lock()
        .execute_request("/test.Echo/Say", &ctx, &[0x01, 0x02, 0x03])
        .unwrap();
    assert_eq!(&reply[..], b"AB");

    drop(channel);
    let seen = server.join().unwrap();
    assert_eq!(seen.len(), 1);
    let call = &seen[0];
    assert_eq!(call.body, vec![0, 0, 0, 0, 3, 0x01, 0x02, 0x03]);
    assert_eq!(call.header(":method").as_deref(), Some("POST"));
    assert_eq!(call.header(":path").as_deref(), Some("/test.Echo/Say"));
    assert_eq!(call.header(":scheme").as_deref(), Some("http"));
    assert_eq!(call.header(":authority"), Some(format!("127.0.0.1:{port}")));
    assert_eq!(
        call.header("content-type").as_deref(),
        Some("application/grpc+proto")
    );
    assert_eq!(call.header("te").as_deref(), Some("trailers"));
    assert_eq!(call.header("x-tenant").as_deref(), Some("acme"));
    assert!(call.header("user-agent").is_some());
    assert!(call.header("grpc-timeout").is_some());
}

#[test]
fn remote_failures_and_malformed_responses() {
    let replies = vec![
        Reply {
            trailers: vec![("grpc-status", "5"), ("grpc-message", "missing")],
            ..Reply::ok(b"AB")
        },
        Reply {
            body: vec![0, 0, 0],
            ..Reply::ok(b"")
        },
        Reply {
            http_status: "500",
            ..Reply::ok(b"AB")
        },
        Reply::ok(b"still here"),
    ];
    let (port, server) = serve(replies);
    let channel = create_channel(&format!("http://127.0.0.1:{port}"), ChannelCredentials::insecure());
    let stub = StubBase::new(channel);
    let ctx = ClientContext::new();

    let status = stub.make_call("/svc/M", &ctx, b"").unwrap_err();
    assert_eq!(status.code(), Code::NotFound);
    assert_eq!(status.message(), "missing");

    let status = stub.make_call("/svc/M", &ctx, b"").unwrap_err();
    assert_eq!(status.code(), Code::Internal);
    assert!(status.message().contains("invalid gRPC response format"));

    let status = stub.make_call("/svc/M", &ctx, b"").unwrap_err();
    assert_eq!(status.code(), Code::Internal);
    assert!(status.message().contains("500"));

    // Failed calls leave the connection usable.
    let reply = stub.make_call("/svc/M", &ctx, b"").unwrap();
    assert_eq!(&reply[..], b"still here");

    drop(stub);
    assert_eq!(server.join().unwrap().len(), 4);
}

#[test]
fn stalled_server_hits_iteration_budget() {
    // Accept the call but never answer it.
    let (port, server) = serve(Vec::new());
    let mut args = ChannelArguments::new();
    args.set_int(grpc_client::args::CLIENT_MAX_ITERATIONS, 20);
    let channel = create_custom_channel(
        &format!("127.0.0.1:{port}"),
        ChannelCredentials::insecure(),
        args,
    );

    let status = channel
        .lock()
        .execute_request("/svc/Slow", &ClientContext::new(), b"")
        .unwrap_err();
    assert_eq!(status.code(), Code::Internal);
    assert!(status.message().contains("exceeded maximum iterations"));

    drop(channel);
    server.join().unwrap();
}

#[test]
fn deadline_during_call() {
    let (port, server) = serve(Vec::new());
    let channel = create_channel(&format!("127.0.0.1:{port}"), ChannelCredentials::insecure());

    let mut ctx = ClientContext::new();
    ctx.set_timeout(Duration::from_millis(100));
    let started = Instant::now();
    let status = channel
        .lock()
        .execute_request("/svc/Slow", &ctx, b"")
        .unwrap_err();
    assert_eq!(status.code(), Code::DeadlineExceeded);
    assert!(started.elapsed() < Duration::from_secs(5));

    drop(channel);
    server.join().unwrap();
}

#[test]
fn unreachable_target_is_unavailable() {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let channel = create_channel(&format!("127.0.0.1:{port}"), ChannelCredentials::insecure());
    let mut channel = channel.lock();

    let status = channel
        .execute_request("/svc/M", &ClientContext::new(), b"")
        .unwrap_err();
    assert_eq!(status.code(), Code::Unavailable);
    assert!(!channel.wait_for_connected(Instant::now() + Duration::from_millis(30)));
}

/// A TLS target whose peer accepts the connection and never speaks.
fn silent_tls_target() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, format!("https://127.0.0.1:{port}"))
}

#[test]
fn silent_tls_peer_respects_connect_deadline() {
    let (_listener, target) = silent_tls_target();
    let mut channel = Channel::new(&target, ChannelCredentials::insecure());

    let started = Instant::now();
    assert!(!channel.wait_for_connected(started + Duration::from_millis(200)));
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[test]
fn silent_tls_peer_respects_call_deadline() {
    let (_listener, target) = silent_tls_target();
    let channel = create_channel(&target, ChannelCredentials::insecure());

    let mut ctx = ClientContext::new();
    ctx.set_timeout(Duration::from_millis(200));
    let started = Instant::now();
    let status = channel
        .lock()
        .execute_request("/svc/M", &ctx, b"")
        .unwrap_err();
    assert_eq!(status.code(), Code::DeadlineExceeded);
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[test]
fn channel_from_config_file() {
    let (port, server) = serve(vec![Reply::ok(b"cfg")]);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("channel.toml");
    std::fs::write(
        &path,
        format!(
            "target = \"127.0.0.1:{port}\"\nuser_agent_prefix = \"cfg-test/1\"\n\n[session]\nmax_iterations = 500\n"
        ),
    )
    .unwrap();

    let config = ChannelConfig::load(&path).unwrap();
    let mut channel = config.build().unwrap();
    let reply = channel
        .execute_request("/svc/M", &ClientContext::new(), b"x")
        .unwrap();
    assert_eq!(&reply[..], b"cfg");

    drop(channel);
    let seen = server.join().unwrap();
    assert!(
        seen[0]
            .header("user-agent")
            .is_some_and(|ua| ua.starts_with("cfg-test/1 "))
    );
}
