//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection limits)
//!     → connection.rs (lifecycle tracking, state machine, outbound queue)
//!     → Hand off to the WebSocket session
//!
//! Connection States:
//!     Handshaking → Open → Closing → Closed
//! ```
//!
//! # Design Decisions
//! - Semaphore-bounded accepts prevent resource exhaustion
//! - Each connection tracked for graceful shutdown

pub mod connection;
pub mod listener;
