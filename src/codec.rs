// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Frame encoding/decoding and wire-format datatype conversion.
//!
//! The wire format is bit-exact:
//!
//! ```text
//! offset  size  field
//!  0      1     sender_id
//!  1      1     recipient_id   (0 = broadcast)
//!  2      1     payload_len L  (0..255)
//!  3      2     sequence       (LE, 0 = absent)
//!  5      1     ack_requested  (0 or 255)
//!  6      1     start_marker   = 255
//!  7      L     payload
//!  7+L    1     checksum_hi    = sum(bytes[0..7+L]) >> 8
//!  8+L    1     checksum_lo    = sum(bytes[0..7+L]) & 0xFF
//!  9+L    1     stop_marker    = 255
//! ```

use crate::error::CodecError;

/// Marker byte used for both the start and stop of a frame.
pub const MARKER: u8 = 255;
/// Fixed header length in bytes (sender, recipient, len, seq, ack, start).
pub const HEADER_LEN: usize = 7;
/// Fixed trailer length in bytes (checksum_hi, checksum_lo, stop).
pub const TRAILER_LEN: usize = 3;
/// Smallest possible frame: empty payload.
pub const MIN_FRAME_LEN: usize = HEADER_LEN + TRAILER_LEN;
/// Largest payload a single frame can carry.
pub const MAX_PAYLOAD_LEN: usize = 255;

/// Broadcast recipient/sender id.
pub const BROADCAST_ID: u8 = 0;

/// Command byte: ack reply.
pub const CMD_ACK: u8 = 0;
/// Command byte: announce/merge a device into the routing graph.
pub const CMD_ADD: u8 = 1;
/// Command byte: remove a device from the routing graph.
pub const CMD_REMOVE: u8 = 2;
/// Command byte: write a named store.
pub const CMD_PUT: u8 = 6;
/// Command byte: read a named store.
pub const CMD_GET: u8 = 7;

/// A decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub sender_id: u8,
    pub recipient_id: u8,
    pub sequence: u16,
    pub ack_requested: bool,
    pub payload: Vec<u8>,
}

impl Frame {
    /// Command byte (first payload byte), if the payload is non-empty.
    pub fn command(&self) -> Option<u8> {
        self.payload.first().copied()
    }

    pub fn is_broadcast(&self) -> bool {
        self.recipient_id == BROADCAST_ID
    }
}

/// Sum of all bytes, truncated to 16 bits the way the wire checksum is.
fn checksum(bytes: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    for b in bytes {
        sum = sum.wrapping_add(*b as u32);
    }
    (sum & 0xFFFF) as u16
}

/// Encode a frame. `sequence = None` omits the sequence (encodes 0).
/// `checksum = false` writes a zeroed, unchecked trailer (`0, 0, 255`).
pub fn encode(
    sender_id: u8,
    recipient_id: u8,
    payload: &[u8],
    ack_requested: bool,
    sequence: Option<u16>,
    include_checksum: bool,
) -> Result<Vec<u8>, CodecError> {
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(CodecError::PayloadTooLarge(payload.len()));
    }

    let mut buf = Vec::with_capacity(MIN_FRAME_LEN + payload.len());
    buf.push(sender_id);
    buf.push(recipient_id);
    buf.push(payload.len() as u8);
    let seq = sequence.unwrap_or(0);
    buf.extend_from_slice(&seq.to_le_bytes());
    buf.push(if ack_requested { MARKER } else { 0 });
    buf.push(MARKER);
    buf.extend_from_slice(payload);

    if include_checksum {
        let sum = checksum(&buf);
        buf.push((sum >> 8) as u8);
        buf.push((sum & 0xFF) as u8);
    } else {
        buf.push(0);
        buf.push(0);
    }
    buf.push(MARKER);

    Ok(buf)
}

/// Decode a single frame from the front of `buf`.
///
/// On success returns the frame and the number of bytes it occupied so the
/// caller can advance its cursor. Every rejection is recoverable: the
/// incoming byte-stream parser (`transport`) advances exactly one byte and
/// retries, per the resynchronisation invariant.
pub fn decode(buf: &[u8]) -> Result<(Frame, usize), CodecError> {
    if buf.len() < MIN_FRAME_LEN {
        return Err(CodecError::BufferTooShort);
    }

    let sender_id = buf[0];
    let recipient_id = buf[1];
    let len = buf[2] as usize;
    let sequence = u16::from_le_bytes([buf[3], buf[4]]);
    let ack_byte = buf[5];
    let ack_requested = match ack_byte {
        0 => false,
        MARKER => true,
        other => return Err(CodecError::InvalidAckByte(other)),
    };
    if buf[6] != MARKER {
        return Err(CodecError::InvalidStartMarker);
    }

    let total = HEADER_LEN + len + TRAILER_LEN;
    if buf.len() < total {
        return Err(CodecError::IncompletePayload);
    }

    let payload = buf[HEADER_LEN..HEADER_LEN + len].to_vec();
    let checksum_hi = buf[HEADER_LEN + len];
    let checksum_lo = buf[HEADER_LEN + len + 1];
    let stop_marker = buf[HEADER_LEN + len + 2];
    if stop_marker != MARKER {
        return Err(CodecError::InvalidStopMarker);
    }

    let expected = ((checksum_hi as u16) << 8) | checksum_lo as u16;
    let actual = checksum(&buf[..HEADER_LEN + len]);
    if expected != actual {
        return Err(CodecError::ChecksumMismatch { expected, actual });
    }

    Ok((
        Frame {
            sender_id,
            recipient_id,
            sequence,
            ack_requested,
            payload,
        },
        total,
    ))
}

/// Closed enumeration of wire datatypes, each carrying its byte code and
/// nominal size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Datatype {
    Float16,
    Float32,
    Float64,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Char,
    Bool,
}

impl Datatype {
    pub fn wire_code(self) -> u8 {
        match self {
            Self::Float16 => 10,
            Self::Float32 => 12,
            Self::Float64 => 13,
            Self::Int8 => 20,
            Self::Int16 => 21,
            Self::Int32 => 22,
            Self::Int64 => 23,
            Self::UInt8 => 25,
            Self::UInt16 => 26,
            Self::UInt32 => 27,
            Self::UInt64 => 28,
            Self::Char => 30,
            Self::Bool => 31,
        }
    }

    pub fn from_wire_code(code: u8) -> Option<Self> {
        Some(match code {
            10 => Self::Float16,
            12 => Self::Float32,
            13 => Self::Float64,
            20 => Self::Int8,
            21 => Self::Int16,
            22 => Self::Int32,
            23 => Self::Int64,
            25 => Self::UInt8,
            26 => Self::UInt16,
            27 => Self::UInt32,
            28 => Self::UInt64,
            30 => Self::Char,
            31 => Self::Bool,
            _ => return None,
        })
    }

    /// Nominal fixed size in bytes. `Char` is nominally 1 but in practice
    /// carries the raw remainder of the payload (see `to_bytes`/`from_bytes`).
    pub fn size(self) -> usize {
        match self {
            Self::Float16 => 2,
            Self::Float32 => 4,
            Self::Float64 => 8,
            Self::Int8 | Self::UInt8 | Self::Bool | Self::Char => 1,
            Self::Int16 | Self::UInt16 => 2,
            Self::Int32 | Self::UInt32 => 4,
            Self::Int64 | Self::UInt64 => 8,
        }
    }

    pub fn signed(self) -> bool {
        matches!(self, Self::Int8 | Self::Int16 | Self::Int32 | Self::Int64)
    }
}

/// A decoded value, tagged by the datatype that produced it.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Float16(f32),
    Float32(f32),
    Float64(f64),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    UInt8(u8),
    UInt16(u16),
    UInt32(u32),
    UInt64(u64),
    Char(String),
    Bool(bool),
}

impl Value {
    pub fn dtype(&self) -> Datatype {
        match self {
            Self::Float16(_) => Datatype::Float16,
            Self::Float32(_) => Datatype::Float32,
            Self::Float64(_) => Datatype::Float64,
            Self::Int8(_) => Datatype::Int8,
            Self::Int16(_) => Datatype::Int16,
            Self::Int32(_) => Datatype::Int32,
            Self::Int64(_) => Datatype::Int64,
            Self::UInt8(_) => Datatype::UInt8,
            Self::UInt16(_) => Datatype::UInt16,
            Self::UInt32(_) => Datatype::UInt32,
            Self::UInt64(_) => Datatype::UInt64,
            Self::Char(_) => Datatype::Char,
            Self::Bool(_) => Datatype::Bool,
        }
    }
}

/// Encode `value` into its wire bytes. For everything but `Char` this is
/// exactly `dtype.size()` bytes, little-endian; `Char` is the raw UTF-8
/// bytes of the string, whatever length the caller's payload budget allows.
pub fn to_bytes(value: &Value) -> Result<Vec<u8>, CodecError> {
    Ok(match value {
        Value::Float16(v) => f32_to_half(*v).to_le_bytes().to_vec(),
        Value::Float32(v) => v.to_le_bytes().to_vec(),
        Value::Float64(v) => v.to_le_bytes().to_vec(),
        Value::Int8(v) => v.to_le_bytes().to_vec(),
        Value::Int16(v) => v.to_le_bytes().to_vec(),
        Value::Int32(v) => v.to_le_bytes().to_vec(),
        Value::Int64(v) => v.to_le_bytes().to_vec(),
        Value::UInt8(v) => v.to_le_bytes().to_vec(),
        Value::UInt16(v) => v.to_le_bytes().to_vec(),
        Value::UInt32(v) => v.to_le_bytes().to_vec(),
        Value::UInt64(v) => v.to_le_bytes().to_vec(),
        Value::Bool(v) => vec![if *v { 1 } else { 0 }],
        Value::Char(s) => s.as_bytes().to_vec(),
    })
}

/// Decode `bytes` as `dtype`. For fixed-size types `bytes` must be exactly
/// `dtype.size()` long; `Char` accepts any length and is decoded as UTF-8;
/// `Bool` treats any nonzero byte as true.
pub fn from_bytes(bytes: &[u8], dtype: Datatype) -> Result<Value, CodecError> {
    fn exact<const N: usize>(bytes: &[u8]) -> Result<[u8; N], CodecError> {
        bytes.try_into().map_err(|_| CodecError::InvalidValueEncoding)
    }

    Ok(match dtype {
        Datatype::Float16 => Value::Float16(half_to_f32(u16::from_le_bytes(exact(bytes)?))),
        Datatype::Float32 => Value::Float32(f32::from_le_bytes(exact(bytes)?)),
        Datatype::Float64 => Value::Float64(f64::from_le_bytes(exact(bytes)?)),
        Datatype::Int8 => Value::Int8(i8::from_le_bytes(exact(bytes)?)),
        Datatype::Int16 => Value::Int16(i16::from_le_bytes(exact(bytes)?)),
        Datatype::Int32 => Value::Int32(i32::from_le_bytes(exact(bytes)?)),
        Datatype::Int64 => Value::Int64(i64::from_le_bytes(exact(bytes)?)),
        Datatype::UInt8 => Value::UInt8(u8::from_le_bytes(exact(bytes)?)),
        Datatype::UInt16 => Value::UInt16(u16::from_le_bytes(exact(bytes)?)),
        Datatype::UInt32 => Value::UInt32(u32::from_le_bytes(exact(bytes)?)),
        Datatype::UInt64 => Value::UInt64(u64::from_le_bytes(exact(bytes)?)),
        Datatype::Bool => {
            let b = bytes.first().ok_or(CodecError::InvalidValueEncoding)?;
            Value::Bool(*b != 0)
        }
        Datatype::Char => {
            let s = std::str::from_utf8(bytes).map_err(|_| CodecError::InvalidValueEncoding)?;
            Value::Char(s.to_string())
        }
    })
}

/// IEEE-754 binary16 -> binary32. No fabricated dependency on a `half`
/// crate; the conversion is a handful of bit operations.
fn half_to_f32(bits: u16) -> f32 {
    let sign = (bits >> 15) & 1;
    let exponent = (bits >> 10) & 0x1F;
    let fraction = bits & 0x3FF;

    let (exp32, frac32) = if exponent == 0 {
        if fraction == 0 {
            (0u32, 0u32)
        } else {
            // subnormal half -> normal float
            let mut exp = -1i32;
            let mut frac = fraction;
            while frac & 0x400 == 0 {
                frac <<= 1;
                exp -= 1;
            }
            frac &= 0x3FF;
            (((exp + 127 - 15) as u32) & 0xFF, (frac as u32) << 13)
        }
    } else if exponent == 0x1F {
        (0xFF, (fraction as u32) << 13)
    } else {
        ((exponent as u32) + (127 - 15), (fraction as u32) << 13)
    };

    let bits32 = ((sign as u32) << 31) | (exp32 << 23) | frac32;
    f32::from_bits(bits32)
}

/// IEEE-754 binary32 -> binary16, rounding to nearest.
fn f32_to_half(value: f32) -> u16 {
    let bits = value.to_bits();
    let sign = ((bits >> 16) & 0x8000) as u16;
    let exponent = ((bits >> 23) & 0xFF) as i32;
    let mantissa = bits & 0x7FFFFF;

    if exponent == 0xFF {
        // inf / nan
        let nan_bit = if mantissa != 0 { 0x200 } else { 0 };
        return sign | 0x7C00 | nan_bit;
    }

    let unbiased = exponent - 127;
    if unbiased > 15 {
        return sign | 0x7C00; // overflow -> inf
    }
    if unbiased < -24 {
        return sign; // underflow -> zero
    }
    if unbiased < -14 {
        // subnormal half
        let shift = (-unbiased - 14) as u32;
        let mantissa_with_implicit = mantissa | 0x800000;
        return sign | ((mantissa_with_implicit >> (shift + 13)) as u16);
    }

    let half_exp = ((unbiased + 15) as u16) << 10;
    let half_mantissa = (mantissa >> 13) as u16;
    sign | half_exp | half_mantissa
}
