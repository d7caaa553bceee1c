//! Per-connection driver.
//!
//! # Responsibilities
//! - Run the opening handshake, or answer plain HTTP and hang up
//! - Join the room only once the handshake succeeded
//! - Feed socket reads into the frame decoder and act on each frame
//! - Hand the write half to a writer task fed by the outbound queue
//! - Leave the room and release the socket on every exit path
//!
//! # Data Flow
//! ```text
//! socket read half → BytesMut → FrameCodec → Session::on_frame
//!     text message → BroadcastRouter → member queues → writer tasks
//!     ping         → pong on own queue
//!     close        → echoed close on own queue, session ends
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_util::codec::Decoder;

use crate::config::{ViolationPolicy, WebSocketConfig};
use crate::http::request::{read_head, RequestError};
use crate::http::response::{self, StatusBody};
use crate::http::server::RelayContext;
use crate::net::connection::{
    report_transport_error, ConnectionGuard, ConnectionId, ConnectionState, Lifecycle, Outbound,
    OutboundSender, TransportErrorKind,
};
use crate::observability::metrics;
use crate::rooms::{BroadcastRouter, RoomId};
use crate::ws::close::{CloseCode, CloseReason};
use crate::ws::codec::{encode_to_bytes, FrameCodec};
use crate::ws::error::{CodecError, ProtocolViolation};
use crate::ws::frame::{Frame, Opcode};
use crate::ws::handshake::{self, Upgrade};
use crate::ws::message::{Message, MessageAssembler};

const READ_BUFFER_SIZE: usize = 8 * 1024;

/// How long queued frames may take to flush once the session has ended.
const WRITER_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Why a session ended.
#[derive(Debug)]
pub enum Disconnect {
    /// Peer sent a close frame.
    PeerClose(CloseReason),
    /// Peer closed the TCP stream without a close frame.
    Eof,
    Transport(TransportErrorKind),
    Violation(ProtocolViolation),
    Codec(CodecError),
    IdleTimeout,
    ServerShutdown,
    /// Outbound queue filled up and the router evicted the member.
    SlowConsumer,
}

/// Serve one accepted TCP connection until it closes.
pub async fn serve(
    stream: TcpStream,
    peer: SocketAddr,
    ctx: Arc<RelayContext>,
    guard: ConnectionGuard,
) {
    let id = guard.id();
    let mut lifecycle = Lifecycle::new(id);
    tracing::debug!(connection_id = %id, peer = %peer, "Connection established");

    let (mut reader, mut writer) = stream.into_split();
    let mut buf = BytesMut::with_capacity(READ_BUFFER_SIZE);

    let Some(upgrade) = negotiate(&mut reader, &mut writer, &mut buf, &ctx, id).await else {
        step(&mut lifecycle, ConnectionState::Closing);
        step(&mut lifecycle, ConnectionState::Closed);
        return;
    };

    // Join before the 101 goes out so the client is a member as soon as it
    // can send. Frames queued in between are written after the response.
    let registry = ctx.router.registry().clone();
    let (outbound, rx) = OutboundSender::channel(id, ctx.config.max_queued_frames);
    registry.register(outbound.clone(), upgrade.room.clone());

    if let Err(e) = writer.write_all(upgrade.response().as_bytes()).await {
        report_transport_error(id, &e);
        metrics::handshake("transport_error");
        registry.deregister(id);
        step(&mut lifecycle, ConnectionState::Closing);
        step(&mut lifecycle, ConnectionState::Closed);
        return;
    }
    metrics::handshake("accepted");
    step(&mut lifecycle, ConnectionState::Open);

    let writer_task = tokio::spawn(write_loop(writer, rx, id));
    let writer_abort = writer_task.abort_handle();
    tracing::info!(
        connection_id = %id,
        peer = %peer,
        room = %upgrade.room,
        "WebSocket connection open"
    );

    let mut session = Session::new(
        id,
        upgrade.room,
        outbound,
        ctx.router.clone(),
        &ctx.config,
    );
    let reason = session
        .read_loop(
            &mut reader,
            &mut buf,
            ctx.tracker.drain_receiver(),
            ctx.config.idle_timeout(),
        )
        .await;

    step(&mut lifecycle, ConnectionState::Closing);
    registry.deregister(id);
    log_disconnect(id, &reason);

    // The writer exits once every sender is gone and the queue is flushed.
    drop(session);
    if tokio::time::timeout(WRITER_FLUSH_TIMEOUT, writer_task).await.is_err() {
        tracing::debug!(connection_id = %id, "Writer did not flush in time");
        writer_abort.abort();
    }
    step(&mut lifecycle, ConnectionState::Closed);
    drop(guard);
}

fn step(lifecycle: &mut Lifecycle, next: ConnectionState) {
    if let Err(e) = lifecycle.advance(next) {
        tracing::warn!(error = %e, "Unexpected lifecycle transition");
    }
}

fn log_disconnect(id: ConnectionId, reason: &Disconnect) {
    match reason {
        Disconnect::PeerClose(close) => match close.code {
            Some(code) => tracing::info!(
                connection_id = %id,
                code = code.as_u16(),
                meaning = code.describe(),
                reason = %close.reason,
                "Peer closed connection"
            ),
            None => tracing::info!(connection_id = %id, "Peer closed connection without status"),
        },
        Disconnect::Eof => tracing::info!(connection_id = %id, "Socket disconnected"),
        Disconnect::Transport(kind) => {
            tracing::info!(connection_id = %id, kind = kind.label(), "Connection dropped")
        }
        Disconnect::Violation(v) => {
            tracing::info!(connection_id = %id, violation = %v, "Closed for protocol violation")
        }
        Disconnect::Codec(e) => {
            tracing::info!(connection_id = %id, error = %e, "Closed on undecodable frame")
        }
        Disconnect::IdleTimeout => tracing::info!(connection_id = %id, "Closed idle connection"),
        Disconnect::ServerShutdown => tracing::debug!(connection_id = %id, "Closed for shutdown"),
        Disconnect::SlowConsumer => {
            tracing::info!(connection_id = %id, "Closed slow consumer")
        }
    }
}

/// Read and validate the request head. Rejections and plain HTTP requests are
/// answered here; an accepted upgrade is returned for the caller to complete.
async fn negotiate(
    reader: &mut OwnedReadHalf,
    writer: &mut OwnedWriteHalf,
    buf: &mut BytesMut,
    ctx: &RelayContext,
    id: ConnectionId,
) -> Option<Upgrade> {
    let read = tokio::time::timeout(
        ctx.config.handshake_timeout(),
        read_head(reader, buf, ctx.config.max_handshake_bytes),
    )
    .await;

    let request = match read {
        Err(_) => {
            tracing::debug!(connection_id = %id, "Handshake timed out");
            metrics::handshake("timeout");
            return None;
        }
        Ok(Err(RequestError::Io(e))) => {
            report_transport_error(id, &e);
            metrics::handshake("transport_error");
            return None;
        }
        Ok(Err(RequestError::UnexpectedEof)) => {
            tracing::debug!(connection_id = %id, "Closed before sending a request");
            metrics::handshake("eof");
            return None;
        }
        Ok(Err(e)) => {
            tracing::debug!(connection_id = %id, error = %e, "Malformed request head");
            metrics::handshake("rejected");
            respond_and_close(writer, &response::bad_request(&[]), id).await;
            return None;
        }
        Ok(Ok(request)) => request,
    };

    if !handshake::is_upgrade_request(&request) {
        let registry = ctx.router.registry();
        let body = StatusBody {
            status: "ok",
            rooms: registry.room_count(),
            connections: registry.connection_count(),
        };
        tracing::debug!(connection_id = %id, path = request.path(), "Answered plain HTTP request");
        metrics::handshake("plain_http");
        match response::json_ok(&body) {
            Ok(resp) => respond_and_close(writer, &resp, id).await,
            Err(e) => {
                tracing::warn!(connection_id = %id, error = %e, "Failed to encode status body")
            }
        }
        return None;
    }

    match handshake::accept(&request) {
        Ok(upgrade) => Some(upgrade),
        Err(e) => {
            tracing::debug!(connection_id = %id, error = %e, "Upgrade rejected");
            metrics::handshake("rejected");
            respond_and_close(writer, &e.response(), id).await;
            None
        }
    }
}

async fn respond_and_close(writer: &mut OwnedWriteHalf, response: &str, id: ConnectionId) {
    if let Err(e) = writer.write_all(response.as_bytes()).await {
        report_transport_error(id, &e);
        return;
    }
    let _ = writer.shutdown().await;
}

/// Owns the write half. Stops after a close frame, on a write error, or
/// when every sender is gone.
async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut rx: mpsc::Receiver<Outbound>,
    id: ConnectionId,
) {
    while let Some(outbound) = rx.recv().await {
        let (bytes, last) = match outbound {
            Outbound::Frame(bytes) => (bytes, false),
            Outbound::Close(bytes) => (bytes, true),
        };
        if let Err(e) = writer.write_all(&bytes).await {
            report_transport_error(id, &e);
            return;
        }
        if last {
            break;
        }
    }
    let _ = writer.shutdown().await;
}

/// Decode-side state of an open connection.
struct Session {
    id: ConnectionId,
    room: RoomId,
    outbound: OutboundSender,
    router: BroadcastRouter,
    codec: FrameCodec,
    assembler: MessageAssembler,
    policy: ViolationPolicy,
}

impl Session {
    fn new(
        id: ConnectionId,
        room: RoomId,
        outbound: OutboundSender,
        router: BroadcastRouter,
        config: &WebSocketConfig,
    ) -> Self {
        Self {
            id,
            room,
            outbound,
            router,
            codec: FrameCodec::new().max_payload_size(config.max_payload_size),
            assembler: MessageAssembler::new(config.max_message_size),
            policy: config.violation_policy,
        }
    }

    async fn read_loop(
        &mut self,
        reader: &mut OwnedReadHalf,
        buf: &mut BytesMut,
        mut drain: watch::Receiver<bool>,
        idle_timeout: Option<Duration>,
    ) -> Disconnect {
        let eviction = self.outbound.eviction();
        loop {
            if let Some(disconnect) = self.drain_frames(buf) {
                return disconnect;
            }
            if *drain.borrow_and_update() {
                self.send_close(CloseCode::GoingAway);
                return Disconnect::ServerShutdown;
            }

            buf.reserve(READ_BUFFER_SIZE);
            tokio::select! {
                read = reader.read_buf(buf) => match read {
                    Ok(0) => {
                        if !self.codec.is_idle() {
                            tracing::debug!(
                                connection_id = %self.id,
                                "Stream ended inside a frame"
                            );
                        }
                        return Disconnect::Eof;
                    }
                    Ok(n) => metrics::bytes_received(n),
                    Err(e) => return Disconnect::Transport(report_transport_error(self.id, &e)),
                },
                Ok(()) = drain.changed() => {
                    self.send_close(CloseCode::GoingAway);
                    return Disconnect::ServerShutdown;
                }
                _ = idle(idle_timeout) => {
                    self.send_close(CloseCode::GoingAway);
                    return Disconnect::IdleTimeout;
                }
                _ = eviction.notified() => {
                    self.send_close(CloseCode::PolicyViolation);
                    return Disconnect::SlowConsumer;
                }
            }
        }
    }

    /// Decode and handle every complete frame in `buf`.
    fn drain_frames(&mut self, buf: &mut BytesMut) -> Option<Disconnect> {
        loop {
            match self.codec.decode(buf) {
                Ok(Some(frame)) => {
                    if let Some(disconnect) = self.on_frame(frame) {
                        return Some(disconnect);
                    }
                }
                Ok(None) => return None,
                Err(e) => {
                    metrics::protocol_violation(e.kind());
                    self.send_close(e.close_code());
                    return Some(Disconnect::Codec(e));
                }
            }
        }
    }

    fn on_frame(&mut self, frame: Frame) -> Option<Disconnect> {
        metrics::frame_received(frame.opcode.label());
        tracing::trace!(
            connection_id = %self.id,
            opcode = frame.opcode.label(),
            fin = frame.fin,
            len = frame.payload.len(),
            "Frame received"
        );

        if let Err(violation) = frame.check_client_frame() {
            // A close frame ends the session whatever its shape.
            if frame.opcode == Opcode::Close {
                return Some(self.fail(violation));
            }
            return self.on_violation(violation);
        }

        match frame.opcode {
            Opcode::Close => match CloseReason::parse(&frame.payload) {
                Ok(reason) => {
                    let echo = Frame::close(reason.code.map(CloseCode::as_u16), "");
                    let _ = self.outbound.send(Outbound::Close(encode_to_bytes(&echo)));
                    Some(Disconnect::PeerClose(reason))
                }
                Err(violation) => Some(self.fail(violation)),
            },
            Opcode::Ping => {
                let pong = encode_to_bytes(&Frame::pong(frame.payload));
                let _ = self.outbound.send(Outbound::Frame(pong));
                None
            }
            Opcode::Pong => None,
            _ => match self.assembler.push(frame) {
                Ok(Some(Message::Text(text))) => {
                    let report = self.router.relay_text(&self.room, &text);
                    tracing::debug!(
                        connection_id = %self.id,
                        room = %self.room,
                        len = text.len(),
                        delivered = report.delivered,
                        "Relayed text message"
                    );
                    None
                }
                Ok(Some(Message::Binary(data))) => {
                    tracing::debug!(
                        connection_id = %self.id,
                        len = data.len(),
                        "Binary message ignored"
                    );
                    None
                }
                Ok(None) => None,
                Err(violation) => self.on_violation(violation),
            },
        }
    }

    fn on_violation(&mut self, violation: ProtocolViolation) -> Option<Disconnect> {
        if violation.is_fatal() || self.policy == ViolationPolicy::Close {
            return Some(self.fail(violation));
        }
        metrics::protocol_violation(violation.kind());
        tracing::debug!(
            connection_id = %self.id,
            violation = %violation,
            "Protocol violation, frame dropped"
        );
        None
    }

    /// Close with the violation's code and end the session.
    fn fail(&self, violation: ProtocolViolation) -> Disconnect {
        metrics::protocol_violation(violation.kind());
        tracing::debug!(
            connection_id = %self.id,
            violation = %violation,
            "Protocol violation, closing"
        );
        self.send_close(violation.close_code());
        Disconnect::Violation(violation)
    }

    fn send_close(&self, code: CloseCode) {
        let frame = Frame::close(Some(code.as_u16()), code.describe());
        let _ = self.outbound.send(Outbound::Close(encode_to_bytes(&frame)));
    }
}

async fn idle(timeout: Option<Duration>) {
    match timeout {
        Some(duration) => tokio::time::sleep(duration).await,
        None => std::future::pending().await,
    }
}
