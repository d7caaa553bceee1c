//! WebSocket frame types (RFC 6455 Section 5.2).
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
//! |N|V|V|V|       |S|             |   (if payload len==126/127)   |
//! | |1|2|3|       |K|             |                               |
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |                 Masking key (if MASK set)                     |
//! +---------------------------------------------------------------+
//! |                         Payload data                          |
//! +---------------------------------------------------------------+
//! ```

use bytes::Bytes;

use crate::ws::error::ProtocolViolation;

/// Largest payload a control frame may carry.
pub const MAX_CONTROL_PAYLOAD: u64 = 125;

/// Frame opcode.
///
/// Values the protocol leaves unassigned are kept as `Reserved` so the
/// decoder can hand the frame up and the session decides what to do with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
    Reserved(u8),
}

impl Opcode {
    /// Parse the low nibble of the first header byte.
    pub fn from_u8(value: u8) -> Self {
        match value & 0x0F {
            0x0 => Opcode::Continuation,
            0x1 => Opcode::Text,
            0x2 => Opcode::Binary,
            0x8 => Opcode::Close,
            0x9 => Opcode::Ping,
            0xA => Opcode::Pong,
            other => Opcode::Reserved(other),
        }
    }

    /// Wire value of this opcode.
    pub fn as_u8(self) -> u8 {
        match self {
            Opcode::Continuation => 0x0,
            Opcode::Text => 0x1,
            Opcode::Binary => 0x2,
            Opcode::Close => 0x8,
            Opcode::Ping => 0x9,
            Opcode::Pong => 0xA,
            Opcode::Reserved(value) => value & 0x0F,
        }
    }

    /// Control opcodes have the high bit of the nibble set.
    pub fn is_control(self) -> bool {
        self.as_u8() & 0x08 != 0
    }

    /// Short label used for log fields and metric labels.
    pub fn label(self) -> &'static str {
        match self {
            Opcode::Continuation => "continuation",
            Opcode::Text => "text",
            Opcode::Binary => "binary",
            Opcode::Close => "close",
            Opcode::Ping => "ping",
            Opcode::Pong => "pong",
            Opcode::Reserved(_) => "reserved",
        }
    }
}

/// A fully assembled frame. The payload is always unmasked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Final fragment of a message.
    pub fin: bool,
    pub rsv1: bool,
    pub rsv2: bool,
    pub rsv3: bool,
    pub opcode: Opcode,
    /// Mask key the peer used, if the frame arrived masked.
    pub mask_key: Option<[u8; 4]>,
    pub payload: Bytes,
}

impl Frame {
    /// Create an unmasked frame with clear reserved bits.
    pub fn new(fin: bool, opcode: Opcode, payload: impl Into<Bytes>) -> Self {
        Self {
            fin,
            rsv1: false,
            rsv2: false,
            rsv3: false,
            opcode,
            mask_key: None,
            payload: payload.into(),
        }
    }

    pub fn text(payload: impl Into<Bytes>) -> Self {
        Self::new(true, Opcode::Text, payload)
    }

    pub fn binary(payload: impl Into<Bytes>) -> Self {
        Self::new(true, Opcode::Binary, payload)
    }

    pub fn ping(payload: impl Into<Bytes>) -> Self {
        Self::new(true, Opcode::Ping, payload)
    }

    pub fn pong(payload: impl Into<Bytes>) -> Self {
        Self::new(true, Opcode::Pong, payload)
    }

    /// Close frame with an optional status code and reason text.
    ///
    /// The reason is ignored when no code is given, since a close payload
    /// must start with the code.
    pub fn close(code: Option<u16>, reason: &str) -> Self {
        let payload = match code {
            Some(code) => {
                let mut data = Vec::with_capacity(2 + reason.len());
                data.extend_from_slice(&code.to_be_bytes());
                data.extend_from_slice(reason.as_bytes());
                data
            }
            None => Vec::new(),
        };
        Self::new(true, Opcode::Close, payload)
    }

    /// Whether the frame arrived masked.
    pub fn is_masked(&self) -> bool {
        self.mask_key.is_some()
    }

    /// Logical payload length.
    pub fn payload_len(&self) -> u64 {
        self.payload.len() as u64
    }

    pub fn has_reserved_bits(&self) -> bool {
        self.rsv1 || self.rsv2 || self.rsv3
    }

    /// Header-level checks for a frame sent by a client.
    ///
    /// No extensions are negotiated, so reserved bits must be clear. Client
    /// frames must be masked, and control frames must be unfragmented and
    /// carry at most 125 bytes.
    pub fn check_client_frame(&self) -> Result<(), ProtocolViolation> {
        if self.has_reserved_bits() {
            return Err(ProtocolViolation::ReservedBits);
        }
        if let Opcode::Reserved(value) = self.opcode {
            return Err(ProtocolViolation::ReservedOpcode(value));
        }
        if !self.is_masked() {
            return Err(ProtocolViolation::UnmaskedFrame);
        }
        if self.opcode.is_control() {
            if !self.fin {
                return Err(ProtocolViolation::FragmentedControl);
            }
            if self.payload_len() > MAX_CONTROL_PAYLOAD {
                return Err(ProtocolViolation::ControlTooLarge(self.payload_len()));
            }
        }
        Ok(())
    }
}
