//! Connection state machine and lifecycle tracking.
//!
//! # Responsibilities
//! - Track connection state (Handshaking → Open → Closing → Closed)
//! - Generate unique connection IDs for tracing
//! - Carry outbound frames to the task that owns the socket's write half
//! - Classify transport errors so expected disconnects stay quiet
//! - Coordinate graceful shutdown per-connection

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch, Notify};

use crate::observability::metrics;

/// Global atomic counter for connection IDs.
/// Using relaxed ordering is sufficient since we only need uniqueness, not synchronization.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Connection state for lifecycle tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Waiting for the HTTP upgrade request.
    Handshaking,
    /// Handshake complete; frames are decoded and relayed.
    Open,
    /// Leaving its room; no more frames are decoded.
    Closing,
    /// Transport released. Terminal.
    Closed,
}

/// Rejected state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid connection state transition {from:?} -> {to:?}")]
pub struct InvalidTransition {
    pub from: ConnectionState,
    pub to: ConnectionState,
}

/// Per-connection state machine.
///
/// A connection that fails during the handshake goes straight from
/// `Handshaking` to `Closing`.
#[derive(Debug)]
pub struct Lifecycle {
    id: ConnectionId,
    state: ConnectionState,
}

impl Lifecycle {
    pub fn new(id: ConnectionId) -> Self {
        Self {
            id,
            state: ConnectionState::Handshaking,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open
    }

    /// Move to `next` if the transition is allowed.
    pub fn advance(&mut self, next: ConnectionState) -> Result<(), InvalidTransition> {
        use ConnectionState::*;
        let allowed = matches!(
            (self.state, next),
            (Handshaking, Open) | (Handshaking, Closing) | (Open, Closing) | (Closing, Closed)
        );
        if !allowed {
            return Err(InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        tracing::trace!(
            connection_id = %self.id,
            from = ?self.state,
            to = ?next,
            "Connection state change"
        );
        self.state = next;
        Ok(())
    }
}

/// Bytes queued for a connection's writer task.
#[derive(Debug, Clone)]
pub enum Outbound {
    /// An encoded frame.
    Frame(Bytes),
    /// An encoded close frame. The writer stops after sending it.
    Close(Bytes),
}

/// Why a frame could not be queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendFailure {
    /// The queue is at capacity; the peer is not reading fast enough.
    Full,
    /// The writer task has exited.
    Closed,
}

/// Sending side of a connection's bounded outbound queue.
///
/// The queue closes when the writer task exits, which is how the rest of the
/// server learns that the transport is gone. A member whose queue fills up is
/// evicted: the owning session is notified and closes the connection.
#[derive(Debug, Clone)]
pub struct OutboundSender {
    id: ConnectionId,
    tx: mpsc::Sender<Outbound>,
    eviction: Arc<Notify>,
}

impl OutboundSender {
    /// Create a sender/receiver pair holding at most `capacity` data frames.
    /// One extra slot is kept for the closing frame.
    pub fn channel(id: ConnectionId, capacity: usize) -> (Self, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(capacity.max(1) + 1);
        let sender = Self {
            id,
            tx,
            eviction: Arc::new(Notify::new()),
        };
        (sender, rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Whether the writer is still accepting frames.
    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Queue bytes for the writer without waiting.
    pub fn send(&self, outbound: Outbound) -> Result<(), SendFailure> {
        let only_close_slot_left = self.tx.capacity() <= 1 && !self.tx.is_closed();
        if only_close_slot_left && matches!(outbound, Outbound::Frame(_)) {
            return Err(SendFailure::Full);
        }
        self.tx.try_send(outbound).map_err(|e| match e {
            TrySendError::Full(_) => SendFailure::Full,
            TrySendError::Closed(_) => SendFailure::Closed,
        })
    }

    /// Ask the owning session to drop this connection.
    pub fn evict(&self) {
        self.eviction.notify_one();
    }

    /// Handle the owning session waits on for [`OutboundSender::evict`].
    pub fn eviction(&self) -> Arc<Notify> {
        Arc::clone(&self.eviction)
    }
}

/// Transport error classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// Peer reset or aborted the connection (e.g. a browser refresh).
    Reset,
    /// Write after the peer closed.
    BrokenPipe,
    /// Anything else.
    Unclassified,
}

impl TransportErrorKind {
    pub fn classify(error: &io::Error) -> Self {
        match error.kind() {
            io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted => Self::Reset,
            io::ErrorKind::BrokenPipe => Self::BrokenPipe,
            _ => Self::Unclassified,
        }
    }

    /// Reset and broken pipe are ordinary ways for a peer to leave.
    pub fn is_expected(self) -> bool {
        !matches!(self, Self::Unclassified)
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Reset => "reset",
            Self::BrokenPipe => "broken_pipe",
            Self::Unclassified => "unclassified",
        }
    }
}

/// Log and count a transport error. Never escalates past the connection.
pub fn report_transport_error(id: ConnectionId, error: &io::Error) -> TransportErrorKind {
    let kind = TransportErrorKind::classify(error);
    metrics::transport_error(kind.label());
    if kind.is_expected() {
        tracing::debug!(connection_id = %id, kind = kind.label(), "Client disconnected abruptly");
    } else {
        tracing::warn!(connection_id = %id, error = %error, "Transport error");
    }
    kind
}

/// Tracks active connections for graceful shutdown.
///
/// Uses a watch channel to tell connections that the server is draining.
#[derive(Debug, Clone)]
pub struct ConnectionTracker {
    /// Current count of active connections.
    active_count: Arc<AtomicU64>,
    /// Flipped to `true` when the server starts draining.
    drain_tx: Arc<watch::Sender<bool>>,
    drain_rx: watch::Receiver<bool>,
}

impl ConnectionTracker {
    /// Create a new connection tracker.
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            active_count: Arc::new(AtomicU64::new(0)),
            drain_tx: Arc::new(tx),
            drain_rx: rx,
        }
    }

    /// Record a new active connection. Returns a guard that decrements on drop.
    pub fn track(&self) -> ConnectionGuard {
        self.active_count.fetch_add(1, Ordering::SeqCst);
        metrics::connection_opened();
        ConnectionGuard {
            active_count: Arc::clone(&self.active_count),
            id: ConnectionId::new(),
        }
    }

    /// Get current active connection count.
    pub fn active_count(&self) -> u64 {
        self.active_count.load(Ordering::SeqCst)
    }

    /// Ask every connection to close.
    pub fn begin_drain(&self) {
        let _ = self.drain_tx.send(true);
    }

    /// Wait until all connections are closed.
    pub async fn wait_for_shutdown(&self) {
        while self.active_count.load(Ordering::SeqCst) > 0 {
            tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
        }
    }

    /// Clone the drain receiver for use in connection tasks.
    pub fn drain_receiver(&self) -> watch::Receiver<bool> {
        self.drain_rx.clone()
    }
}

impl Default for ConnectionTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Guard that tracks a connection's lifetime.
/// Decrements active count when dropped.
#[derive(Debug)]
pub struct ConnectionGuard {
    active_count: Arc<AtomicU64>,
    id: ConnectionId,
}

impl ConnectionGuard {
    /// Get this connection's ID.
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.active_count.fetch_sub(1, Ordering::SeqCst);
        metrics::connection_closed();
        tracing::trace!(connection_id = %self.id, "Connection released");
    }
}
