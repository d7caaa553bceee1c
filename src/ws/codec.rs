//! Frame codec: an incremental RFC 6455 decoder and a server-side encoder.
//!
//! The decoder is a restartable state machine over an append-only buffer.
//! Bytes may arrive in chunks of any size; header fields are consumed as soon
//! as they are complete and the payload is only taken once every byte of it
//! is buffered, so a partial frame is never produced. Several frames in one
//! buffer are returned by successive `decode` calls.
//!
//! Nothing here performs I/O. The session feeds bytes in and writes the
//! encoded output itself.

use bytes::{BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::ws::error::CodecError;
use crate::ws::frame::{Frame, Opcode};

/// Header fields carried between decode states.
#[derive(Debug, Clone, Copy)]
struct HeaderBits {
    fin: bool,
    rsv1: bool,
    rsv2: bool,
    rsv3: bool,
    opcode: Opcode,
    masked: bool,
}

#[derive(Debug)]
enum DecodeState {
    /// Waiting for the first two header bytes.
    Header,
    /// Waiting for a 2- or 8-byte extended length.
    ExtendedLength { bits: HeaderBits, width: usize },
    /// Waiting for the 4-byte mask key.
    MaskKey { bits: HeaderBits, payload_len: usize },
    /// Waiting for the whole payload.
    Payload {
        bits: HeaderBits,
        mask_key: Option<[u8; 4]>,
        payload_len: usize,
    },
}

/// Server-side frame codec.
#[derive(Debug)]
pub struct FrameCodec {
    max_payload_size: usize,
    state: DecodeState,
}

impl FrameCodec {
    /// Default maximum payload size (16 MiB).
    pub const DEFAULT_MAX_PAYLOAD_SIZE: usize = 16 * 1024 * 1024;

    pub fn new() -> Self {
        Self {
            max_payload_size: Self::DEFAULT_MAX_PAYLOAD_SIZE,
            state: DecodeState::Header,
        }
    }

    /// Set the largest payload a single frame may declare.
    pub fn max_payload_size(mut self, size: usize) -> Self {
        self.max_payload_size = size;
        self
    }

    /// True when no partially decoded frame is pending.
    pub fn is_idle(&self) -> bool {
        matches!(self.state, DecodeState::Header)
    }

    fn check_len(&mut self, len: u64) -> Result<usize, CodecError> {
        match usize::try_from(len) {
            Ok(len) if len <= self.max_payload_size => Ok(len),
            _ => {
                self.state = DecodeState::Header;
                Err(CodecError::PayloadTooLarge {
                    size: len,
                    max: self.max_payload_size,
                })
            }
        }
    }

    fn after_length(bits: HeaderBits, payload_len: usize) -> DecodeState {
        if bits.masked {
            DecodeState::MaskKey { bits, payload_len }
        } else {
            DecodeState::Payload {
                bits,
                mask_key: None,
                payload_len,
            }
        }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, CodecError> {
        loop {
            match self.state {
                DecodeState::Header => {
                    if src.len() < 2 {
                        return Ok(None);
                    }
                    let first = src[0];
                    let second = src[1];
                    let bits = HeaderBits {
                        fin: first & 0x80 != 0,
                        rsv1: first & 0x40 != 0,
                        rsv2: first & 0x20 != 0,
                        rsv3: first & 0x10 != 0,
                        opcode: Opcode::from_u8(first),
                        masked: second & 0x80 != 0,
                    };
                    let _ = src.split_to(2);

                    self.state = match second & 0x7F {
                        126 => DecodeState::ExtendedLength { bits, width: 2 },
                        127 => DecodeState::ExtendedLength { bits, width: 8 },
                        len => {
                            let len = self.check_len(u64::from(len))?;
                            Self::after_length(bits, len)
                        }
                    };
                }

                DecodeState::ExtendedLength { bits, width } => {
                    if src.len() < width {
                        return Ok(None);
                    }
                    let raw = src.split_to(width);
                    let len = if width == 2 {
                        u64::from(u16::from_be_bytes([raw[0], raw[1]]))
                    } else {
                        let mut be = [0u8; 8];
                        be.copy_from_slice(&raw);
                        let len = u64::from_be_bytes(be);
                        if len & (1 << 63) != 0 {
                            self.state = DecodeState::Header;
                            return Err(CodecError::ReservedLengthBit);
                        }
                        len
                    };
                    let len = self.check_len(len)?;
                    self.state = Self::after_length(bits, len);
                }

                DecodeState::MaskKey { bits, payload_len } => {
                    if src.len() < 4 {
                        return Ok(None);
                    }
                    let raw = src.split_to(4);
                    let mut key = [0u8; 4];
                    key.copy_from_slice(&raw);
                    self.state = DecodeState::Payload {
                        bits,
                        mask_key: Some(key),
                        payload_len,
                    };
                }

                DecodeState::Payload {
                    bits,
                    mask_key,
                    payload_len,
                } => {
                    if src.len() < payload_len {
                        src.reserve(payload_len - src.len());
                        return Ok(None);
                    }
                    let mut payload = src.split_to(payload_len);
                    if let Some(key) = mask_key {
                        apply_mask(&mut payload, key);
                    }
                    self.state = DecodeState::Header;

                    return Ok(Some(Frame {
                        fin: bits.fin,
                        rsv1: bits.rsv1,
                        rsv2: bits.rsv2,
                        rsv3: bits.rsv3,
                        opcode: bits.opcode,
                        mask_key,
                        payload: payload.freeze(),
                    }));
                }
            }
        }
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = CodecError;

    /// Server frames are never masked.
    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), CodecError> {
        encode_frame(&frame, None, dst);
        Ok(())
    }
}

/// Write `frame` to `dst`, masking the payload with `mask_key` when given.
///
/// The length always uses the shortest of the three encodings: one byte
/// below 126, `126` plus a 16-bit length up to 65535, otherwise `127` plus a
/// 64-bit length.
pub fn encode_frame(frame: &Frame, mask_key: Option<[u8; 4]>, dst: &mut BytesMut) {
    let len = frame.payload.len();

    let mut first = frame.opcode.as_u8();
    if frame.fin {
        first |= 0x80;
    }
    if frame.rsv1 {
        first |= 0x40;
    }
    if frame.rsv2 {
        first |= 0x20;
    }
    if frame.rsv3 {
        first |= 0x10;
    }
    let mask_bit = if mask_key.is_some() { 0x80 } else { 0 };

    let ext = if len < 126 {
        0
    } else if len <= 0xFFFF {
        2
    } else {
        8
    };
    let key_len = if mask_key.is_some() { 4 } else { 0 };
    dst.reserve(2 + ext + key_len + len);

    dst.put_u8(first);
    if len < 126 {
        dst.put_u8(mask_bit | len as u8);
    } else if len <= 0xFFFF {
        dst.put_u8(mask_bit | 126);
        dst.put_u16(len as u16);
    } else {
        dst.put_u8(mask_bit | 127);
        dst.put_u64(len as u64);
    }

    match mask_key {
        Some(key) => {
            dst.put_slice(&key);
            let start = dst.len();
            dst.put_slice(&frame.payload);
            apply_mask(&mut dst[start..], key);
        }
        None => dst.put_slice(&frame.payload),
    }
}

/// Encode a server frame into a standalone buffer that can be shared
/// between many receivers.
pub fn encode_to_bytes(frame: &Frame) -> Bytes {
    let mut dst = BytesMut::new();
    encode_frame(frame, None, &mut dst);
    dst.freeze()
}

/// XOR `payload` with the repeating 4-byte key. Applying it twice with the
/// same key restores the input.
pub fn apply_mask(payload: &mut [u8], key: [u8; 4]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= key[i % 4];
    }
}
