//! WebSocket protocol (RFC 6455 base framing, no extensions).
//!
//! # Data Flow
//! ```text
//! Request head
//!     → handshake.rs (validate upgrade, accept key, room id)
//!
//! Socket bytes
//!     → codec.rs (restartable frame decoder)
//!     → frame.rs (per-frame protocol checks)
//!     → message.rs (fragment reassembly, UTF-8 check)
//!     → session.rs (dispatch: relay, pong, close)
//!
//! Errors
//!     → error.rs (violations and codec failures, with close codes)
//!     → close.rs (status codes on the wire)
//! ```

pub mod close;
pub mod codec;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod message;
pub mod session;

pub use close::{CloseCode, CloseReason};
pub use codec::FrameCodec;
pub use error::{CodecError, ProtocolViolation};
pub use frame::{Frame, Opcode};
pub use message::{Message, MessageAssembler};
