//! Shared utilities for integration tests: an in-process relay and a raw
//! WebSocket client that speaks the wire format directly.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_util::codec::Decoder;

use room_relay::config::RelayConfig;
use room_relay::lifecycle::Shutdown;
use room_relay::net::listener::Listener;
use room_relay::ws::codec::{encode_frame, FrameCodec};
use room_relay::ws::frame::{Frame, Opcode};
use room_relay::{RelayContext, RelayServer};

pub const KEY: &str = "dGhlIHNhbXBsZSBub25jZQ==";
pub const ACCEPT: &str = "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=";

const IO_TIMEOUT: Duration = Duration::from_secs(5);

/// A relay running on an ephemeral local port.
pub struct TestServer {
    pub addr: SocketAddr,
    pub context: Arc<RelayContext>,
    shutdown: Shutdown,
    handle: JoinHandle<std::io::Result<()>>,
}

impl TestServer {
    pub async fn start() -> Self {
        Self::start_with(RelayConfig::default()).await
    }

    pub async fn start_with(mut config: RelayConfig) -> Self {
        config.listener.bind_address = "127.0.0.1:0".into();
        let listener = Listener::bind(&config.listener).await.unwrap();
        let addr = listener.local_addr().unwrap();

        let shutdown = Shutdown::new();
        let server = RelayServer::new(&config);
        let context = server.context();
        let handle = tokio::spawn(server.run(listener, shutdown.subscribe()));

        Self {
            addr,
            context,
            shutdown,
            handle,
        }
    }

    /// Trigger shutdown and wait for the drain to finish.
    pub async fn stop(self) {
        self.shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(10), self.handle)
            .await
            .expect("server did not stop")
            .unwrap()
            .unwrap();
    }

    /// Poll until the registry holds `count` connections.
    pub async fn wait_for_members(&self, count: usize) {
        let registry = self.context.registry();
        tokio::time::timeout(IO_TIMEOUT, async {
            while registry.connection_count() != count {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap_or_else(|_| {
            panic!("expected {count} members, have {}", registry.connection_count())
        });
    }
}

/// Send `request` on a fresh connection and read until the server closes.
pub async fn raw_request(addr: SocketAddr, request: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut response = Vec::new();
    tokio::time::timeout(IO_TIMEOUT, stream.read_to_end(&mut response))
        .await
        .expect("server did not close")
        .unwrap();
    String::from_utf8(response).unwrap()
}

pub fn upgrade_request(room: Option<&str>) -> String {
    let target = match room {
        Some(room) => format!("/?room={room}"),
        None => "/".to_string(),
    };
    format!(
        "GET {target} HTTP/1.1\r\n\
         Host: localhost\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: {KEY}\r\n\
         Sec-WebSocket-Version: 13\r\n\r\n"
    )
}

/// Minimal client speaking raw frames, so tests can send anything.
pub struct RawClient {
    stream: TcpStream,
    buf: BytesMut,
    codec: FrameCodec,
}

impl RawClient {
    /// Connect and complete the handshake.
    pub async fn connect(addr: SocketAddr, room: Option<&str>) -> Self {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(upgrade_request(room).as_bytes()).await.unwrap();

        let mut buf = BytesMut::with_capacity(4096);
        let head_end = loop {
            if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos + 4;
            }
            let n = tokio::time::timeout(IO_TIMEOUT, stream.read_buf(&mut buf))
                .await
                .expect("handshake timed out")
                .unwrap();
            assert!(n > 0, "server closed during handshake");
        };
        let head = buf.split_to(head_end);
        let head = std::str::from_utf8(&head).unwrap();
        assert!(head.starts_with("HTTP/1.1 101 Switching Protocols\r\n"), "{head}");
        assert!(head.contains(&format!("Sec-WebSocket-Accept: {ACCEPT}\r\n")), "{head}");

        Self {
            stream,
            buf,
            codec: FrameCodec::new(),
        }
    }

    /// Send a frame masked with a random key, as a browser would.
    pub async fn send(&mut self, frame: &Frame) {
        let mut out = BytesMut::new();
        encode_frame(frame, Some(rand::random()), &mut out);
        self.stream.write_all(&out).await.unwrap();
    }

    /// Send a frame without masking it.
    pub async fn send_unmasked(&mut self, frame: &Frame) {
        let mut out = BytesMut::new();
        encode_frame(frame, None, &mut out);
        self.stream.write_all(&out).await.unwrap();
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.unwrap();
    }

    pub async fn send_text(&mut self, text: &str) {
        self.send(&Frame::text(text.to_string())).await;
    }

    /// Next frame from the server, or `None` once the server closed.
    pub async fn recv(&mut self) -> Option<Frame> {
        tokio::time::timeout(IO_TIMEOUT, self.next_frame())
            .await
            .expect("no frame within timeout")
    }

    async fn next_frame(&mut self) -> Option<Frame> {
        loop {
            if let Some(frame) = self.codec.decode(&mut self.buf).unwrap() {
                return Some(frame);
            }
            match self.stream.read_buf(&mut self.buf).await {
                Ok(0) | Err(_) => return None,
                Ok(_) => {}
            }
        }
    }

    pub async fn recv_text(&mut self) -> String {
        let frame = self.recv().await.expect("connection closed");
        assert_eq!(frame.opcode, Opcode::Text);
        String::from_utf8(frame.payload.to_vec()).unwrap()
    }

    /// Expect a close frame and return its status code.
    pub async fn recv_close(&mut self) -> Option<u16> {
        let frame = self.recv().await.expect("connection closed without close frame");
        assert_eq!(frame.opcode, Opcode::Close, "unexpected {frame:?}");
        (frame.payload.len() >= 2).then(|| u16::from_be_bytes([frame.payload[0], frame.payload[1]]))
    }

    /// Assert that nothing arrives for `wait`.
    pub async fn expect_silence(&mut self, wait: Duration) {
        if let Ok(frame) = tokio::time::timeout(wait, self.next_frame()).await {
            panic!("expected silence, got {frame:?}");
        }
    }

    /// Assert the server closes the TCP stream.
    pub async fn expect_eof(&mut self) {
        assert!(self.recv().await.is_none());
    }
}
