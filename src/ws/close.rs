//! Close status codes and close frame payloads (RFC 6455 Section 7.4).

use std::fmt;

use crate::ws::error::ProtocolViolation;

/// Close status code.
///
/// Codes without a named variant are preserved as `Other` so an unusual
/// code from a peer is still reported accurately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseCode {
    /// 1000: the purpose of the connection has been fulfilled.
    Normal,
    /// 1001: the endpoint is going away (server shutdown, page navigation).
    GoingAway,
    /// 1002: protocol error.
    ProtocolError,
    /// 1003: a data type the endpoint cannot accept.
    UnsupportedData,
    /// 1007: payload inconsistent with the message type (bad UTF-8).
    InvalidPayload,
    /// 1008: policy violation.
    PolicyViolation,
    /// 1009: message too big to process.
    MessageTooBig,
    /// 1011: unexpected server condition.
    InternalError,
    Other(u16),
}

impl CloseCode {
    pub fn from_u16(code: u16) -> Self {
        match code {
            1000 => CloseCode::Normal,
            1001 => CloseCode::GoingAway,
            1002 => CloseCode::ProtocolError,
            1003 => CloseCode::UnsupportedData,
            1007 => CloseCode::InvalidPayload,
            1008 => CloseCode::PolicyViolation,
            1009 => CloseCode::MessageTooBig,
            1011 => CloseCode::InternalError,
            other => CloseCode::Other(other),
        }
    }

    pub fn as_u16(self) -> u16 {
        match self {
            CloseCode::Normal => 1000,
            CloseCode::GoingAway => 1001,
            CloseCode::ProtocolError => 1002,
            CloseCode::UnsupportedData => 1003,
            CloseCode::InvalidPayload => 1007,
            CloseCode::PolicyViolation => 1008,
            CloseCode::MessageTooBig => 1009,
            CloseCode::InternalError => 1011,
            CloseCode::Other(code) => code,
        }
    }

    /// Whether an endpoint may put this code in a close frame.
    ///
    /// 1004-1006 and 1015 are reserved for local reporting, and codes below
    /// 1000 or from 5000 up are never valid.
    pub fn is_sendable(self) -> bool {
        matches!(self.as_u16(), 1000..=1003 | 1007..=1014 | 3000..=4999)
    }

    /// Human readable meaning, used in logs.
    pub fn describe(self) -> &'static str {
        match self {
            CloseCode::Normal => "normal closure",
            CloseCode::GoingAway => "endpoint going away",
            CloseCode::ProtocolError => "protocol error",
            CloseCode::UnsupportedData => "unsupported data",
            CloseCode::InvalidPayload => "invalid payload data",
            CloseCode::PolicyViolation => "policy violation",
            CloseCode::MessageTooBig => "message too big",
            CloseCode::InternalError => "internal error",
            CloseCode::Other(_) => "unrecognized code",
        }
    }
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.as_u16(), self.describe())
    }
}

/// Parsed payload of a close frame.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CloseReason {
    /// Status code, absent when the peer sent an empty close payload.
    pub code: Option<CloseCode>,
    pub reason: String,
}

impl CloseReason {
    /// Parse a close payload: empty, or a big-endian code followed by
    /// optional UTF-8 reason text. Codes that may not appear on the wire are
    /// rejected.
    pub fn parse(payload: &[u8]) -> Result<Self, ProtocolViolation> {
        match payload.len() {
            0 => Ok(Self::default()),
            1 => Err(ProtocolViolation::MalformedClose),
            _ => {
                let code = CloseCode::from_u16(u16::from_be_bytes([payload[0], payload[1]]));
                if !code.is_sendable() {
                    return Err(ProtocolViolation::InvalidCloseCode(code.as_u16()));
                }
                let reason = std::str::from_utf8(&payload[2..])
                    .map_err(|_| ProtocolViolation::InvalidUtf8)?
                    .to_string();
                Ok(Self {
                    code: Some(code),
                    reason,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_round_trip() {
        for code in [1000u16, 1001, 1002, 1003, 1007, 1008, 1009, 1011, 4000, 3999] {
            assert_eq!(CloseCode::from_u16(code).as_u16(), code);
        }
        assert_eq!(CloseCode::from_u16(4321), CloseCode::Other(4321));
    }

    #[test]
    fn parse_empty_payload() {
        let reason = CloseReason::parse(&[]).unwrap();
        assert_eq!(reason.code, None);
        assert!(reason.reason.is_empty());
    }

    #[test]
    fn parse_code_and_reason() {
        let reason = CloseReason::parse(&[0x03, 0xE9, b'b', b'y', b'e']).unwrap();
        assert_eq!(reason.code, Some(CloseCode::GoingAway));
        assert_eq!(reason.reason, "bye");
    }

    #[test]
    fn parse_rejects_single_byte_and_bad_utf8() {
        assert_eq!(CloseReason::parse(&[0x03]), Err(ProtocolViolation::MalformedClose));
        assert_eq!(
            CloseReason::parse(&[0x03, 0xE8, 0xFF]),
            Err(ProtocolViolation::InvalidUtf8)
        );
    }

    #[test]
    fn parse_rejects_codes_reserved_off_the_wire() {
        for code in [0u16, 999, 1004, 1005, 1006, 1015, 2999, 5000] {
            let payload = code.to_be_bytes();
            assert_eq!(
                CloseReason::parse(&payload),
                Err(ProtocolViolation::InvalidCloseCode(code)),
                "code {code}"
            );
        }
        for code in [1000u16, 1003, 1007, 1011, 3000, 4999] {
            assert!(CloseCode::from_u16(code).is_sendable(), "code {code}");
        }
    }
}
