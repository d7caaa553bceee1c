//! Protocol-level error types.

use thiserror::Error;

use crate::ws::close::CloseCode;

/// A frame or message that breaks RFC 6455 rules.
///
/// Most violations leave the byte stream in sync, so the session may either
/// drop the offending frame or close the connection depending on the
/// configured policy. Violations reported by [`ProtocolViolation::is_fatal`]
/// always close the connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolViolation {
    #[error("reserved bits set without a negotiated extension")]
    ReservedBits,

    #[error("reserved opcode {0:#x}")]
    ReservedOpcode(u8),

    #[error("client frame is not masked")]
    UnmaskedFrame,

    #[error("control frame is fragmented")]
    FragmentedControl,

    #[error("control frame payload of {0} bytes exceeds 125")]
    ControlTooLarge(u64),

    #[error("text payload is not valid UTF-8")]
    InvalidUtf8,

    #[error("continuation frame without a message in progress")]
    UnexpectedContinuation,

    #[error("new data frame while a fragmented message is in progress")]
    InterleavedMessage,

    #[error("close frame payload of one byte")]
    MalformedClose,

    #[error("close code {0} may not be sent on the wire")]
    InvalidCloseCode(u16),

    #[error("message of {size} bytes exceeds the {max} byte limit")]
    MessageTooBig { size: u64, max: usize },
}

impl ProtocolViolation {
    /// Status code sent to the peer when the connection is closed for this
    /// violation.
    pub fn close_code(&self) -> CloseCode {
        match self {
            ProtocolViolation::InvalidUtf8 => CloseCode::InvalidPayload,
            ProtocolViolation::MessageTooBig { .. } => CloseCode::MessageTooBig,
            _ => CloseCode::ProtocolError,
        }
    }

    /// Violations that close the connection regardless of policy.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ProtocolViolation::MessageTooBig { .. })
    }

    /// Metric label.
    pub fn kind(&self) -> &'static str {
        match self {
            ProtocolViolation::ReservedBits => "reserved_bits",
            ProtocolViolation::ReservedOpcode(_) => "reserved_opcode",
            ProtocolViolation::UnmaskedFrame => "unmasked_frame",
            ProtocolViolation::FragmentedControl => "fragmented_control",
            ProtocolViolation::ControlTooLarge(_) => "control_too_large",
            ProtocolViolation::InvalidUtf8 => "invalid_utf8",
            ProtocolViolation::UnexpectedContinuation => "unexpected_continuation",
            ProtocolViolation::InterleavedMessage => "interleaved_message",
            ProtocolViolation::MalformedClose => "malformed_close",
            ProtocolViolation::InvalidCloseCode(_) => "invalid_close_code",
            ProtocolViolation::MessageTooBig { .. } => "message_too_big",
        }
    }
}

/// Errors raised by the frame decoder. The stream cannot be resynchronised
/// after any of these.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("frame payload of {size} bytes exceeds the {max} byte limit")]
    PayloadTooLarge { size: u64, max: usize },

    #[error("most significant bit of the 64-bit payload length is set")]
    ReservedLengthBit,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CodecError {
    pub fn close_code(&self) -> CloseCode {
        match self {
            CodecError::PayloadTooLarge { .. } => CloseCode::MessageTooBig,
            CodecError::ReservedLengthBit => CloseCode::ProtocolError,
            CodecError::Io(_) => CloseCode::InternalError,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            CodecError::PayloadTooLarge { .. } => "payload_too_large",
            CodecError::ReservedLengthBit => "reserved_length_bit",
            CodecError::Io(_) => "io",
        }
    }
}
