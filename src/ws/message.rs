//! Message reassembly from data frames.

use bytes::{Bytes, BytesMut};

use crate::ws::error::ProtocolViolation;
use crate::ws::frame::{Frame, Opcode};

/// A complete application message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Text(String),
    Binary(Bytes),
}

#[derive(Debug)]
struct Partial {
    opcode: Opcode,
    buf: BytesMut,
}

/// Joins a fragmented message (`fin = 0` start, continuation frames, final
/// frame) back into one [`Message`].
///
/// Control frames may arrive between fragments and must not be pushed here.
/// After a violation the in-progress message is discarded, so the assembler
/// is ready for a fresh message either way.
#[derive(Debug)]
pub struct MessageAssembler {
    max_message_size: usize,
    partial: Option<Partial>,
}

impl MessageAssembler {
    pub fn new(max_message_size: usize) -> Self {
        Self {
            max_message_size,
            partial: None,
        }
    }

    /// True while a fragmented message is waiting for more frames.
    pub fn in_progress(&self) -> bool {
        self.partial.is_some()
    }

    /// Feed one data frame. Returns the message once its final frame arrives.
    pub fn push(&mut self, frame: Frame) -> Result<Option<Message>, ProtocolViolation> {
        match frame.opcode {
            Opcode::Continuation => {
                let Some(mut partial) = self.partial.take() else {
                    return Err(ProtocolViolation::UnexpectedContinuation);
                };
                let size = (partial.buf.len() + frame.payload.len()) as u64;
                if size > self.max_message_size as u64 {
                    return Err(ProtocolViolation::MessageTooBig {
                        size,
                        max: self.max_message_size,
                    });
                }
                partial.buf.extend_from_slice(&frame.payload);
                if frame.fin {
                    finish(partial.opcode, partial.buf.freeze()).map(Some)
                } else {
                    self.partial = Some(partial);
                    Ok(None)
                }
            }
            Opcode::Text | Opcode::Binary => {
                if self.partial.take().is_some() {
                    return Err(ProtocolViolation::InterleavedMessage);
                }
                if frame.payload_len() > self.max_message_size as u64 {
                    return Err(ProtocolViolation::MessageTooBig {
                        size: frame.payload_len(),
                        max: self.max_message_size,
                    });
                }
                if frame.fin {
                    finish(frame.opcode, frame.payload).map(Some)
                } else {
                    self.partial = Some(Partial {
                        opcode: frame.opcode,
                        buf: BytesMut::from(&frame.payload[..]),
                    });
                    Ok(None)
                }
            }
            // Control and reserved opcodes are rejected before reaching here.
            other => Err(ProtocolViolation::ReservedOpcode(other.as_u8())),
        }
    }
}

fn finish(opcode: Opcode, payload: Bytes) -> Result<Message, ProtocolViolation> {
    if opcode == Opcode::Text {
        let text = String::from_utf8(payload.to_vec()).map_err(|_| ProtocolViolation::InvalidUtf8)?;
        Ok(Message::Text(text))
    } else {
        Ok(Message::Binary(payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fragment(fin: bool, opcode: Opcode, data: &[u8]) -> Frame {
        Frame::new(fin, opcode, data.to_vec())
    }

    #[test]
    fn single_frame_text() {
        let mut assembler = MessageAssembler::new(1024);
        let message = assembler.push(Frame::text("hello")).unwrap();
        assert_eq!(message, Some(Message::Text("hello".into())));
    }

    #[test]
    fn reassembles_fragments() {
        let mut assembler = MessageAssembler::new(1024);
        assert_eq!(assembler.push(fragment(false, Opcode::Text, b"Hel")).unwrap(), None);
        assert!(assembler.in_progress());
        assert_eq!(assembler.push(fragment(false, Opcode::Continuation, b"l")).unwrap(), None);
        let message = assembler.push(fragment(true, Opcode::Continuation, b"o")).unwrap();
        assert_eq!(message, Some(Message::Text("Hello".into())));
        assert!(!assembler.in_progress());
    }

    #[test]
    fn utf8_checked_on_whole_message() {
        // U+00E9 split across two fragments.
        let mut assembler = MessageAssembler::new(1024);
        assembler.push(fragment(false, Opcode::Text, &[0xC3])).unwrap();
        let message = assembler.push(fragment(true, Opcode::Continuation, &[0xA9])).unwrap();
        assert_eq!(message, Some(Message::Text("\u{e9}".into())));
    }

    #[test]
    fn invalid_utf8_rejected() {
        let mut assembler = MessageAssembler::new(1024);
        assert_eq!(
            assembler.push(Frame::text(vec![0xFF, 0xFE])),
            Err(ProtocolViolation::InvalidUtf8)
        );
    }

    #[test]
    fn stray_continuation_rejected() {
        let mut assembler = MessageAssembler::new(1024);
        assert_eq!(
            assembler.push(fragment(true, Opcode::Continuation, b"x")),
            Err(ProtocolViolation::UnexpectedContinuation)
        );
    }

    #[test]
    fn interleaved_message_discards_partial() {
        let mut assembler = MessageAssembler::new(1024);
        assembler.push(fragment(false, Opcode::Text, b"a")).unwrap();
        assert_eq!(
            assembler.push(Frame::text("b")),
            Err(ProtocolViolation::InterleavedMessage)
        );
        assert!(!assembler.in_progress());
        assert_eq!(
            assembler.push(Frame::text("c")).unwrap(),
            Some(Message::Text("c".into()))
        );
    }

    #[test]
    fn size_limit_applies_across_fragments() {
        let mut assembler = MessageAssembler::new(4);
        assembler.push(fragment(false, Opcode::Binary, b"abc")).unwrap();
        assert_eq!(
            assembler.push(fragment(true, Opcode::Continuation, b"de")),
            Err(ProtocolViolation::MessageTooBig { size: 5, max: 4 })
        );
    }

    #[test]
    fn binary_message() {
        let mut assembler = MessageAssembler::new(16);
        let message = assembler.push(Frame::binary(vec![0u8, 1, 2])).unwrap();
        assert_eq!(message, Some(Message::Binary(Bytes::from_static(&[0, 1, 2]))));
    }
}
