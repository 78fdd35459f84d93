//! Binary Protocol Types
//!
//! This module defines the opcodes, reply codes and value encodings of the
//! wire protocol, plus the [`Reply`] type and its serialization.
//!
//! ## Request Format
//!
//! ```text
//! ┌──────────────────┬───────────────┬────────────────────────────┐
//! │ i32 total length │ u16 opcode    │ payload (length - 2 bytes) │
//! └──────────────────┴───────────────┴────────────────────────────┘
//! ```
//!
//! ## Reply Format
//!
//! ```text
//! ┌────────────┬──────────────┬─────────────────┬─────────┐
//! │ u16 status │ u8 encoding  │ u32 payload len │ payload │
//! └────────────┴──────────────┴─────────────────┴─────────┘
//! ```
//!
//! A key/value set payload is `u32 count` followed by `count` entries of
//! `u32 key len, key, u8 encoding, u32 value len, value`.
//!
//! All multi-byte integers are little-endian.

use crate::storage::Value;
use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;

/// Size of the reply header: status + encoding + payload length.
pub const REPLY_HEADER_LEN: usize = 2 + 1 + 4;

/// Request opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Opcode {
    Set = 1,
    Ttl = 2,
    Get = 3,
    Del = 4,
    Inc = 5,
    Dec = 6,
    Lock = 7,
    Unlock = 8,
    MSet = 9,
    MTtl = 10,
    MGet = 11,
    MDel = 12,
    MInc = 13,
    MDec = 14,
    MLock = 15,
    MUnlock = 16,
    Count = 17,
    Stats = 18,
    Ping = 19,
    Meta = 20,
    Keys = 21,
    End = 0xff,
}

impl Opcode {
    /// Upper-case command name, for logs.
    pub fn name(self) -> &'static str {
        match self {
            Opcode::Set => "SET",
            Opcode::Ttl => "TTL",
            Opcode::Get => "GET",
            Opcode::Del => "DEL",
            Opcode::Inc => "INC",
            Opcode::Dec => "DEC",
            Opcode::Lock => "LOCK",
            Opcode::Unlock => "UNLOCK",
            Opcode::MSet => "MSET",
            Opcode::MTtl => "MTTL",
            Opcode::MGet => "MGET",
            Opcode::MDel => "MDEL",
            Opcode::MInc => "MINC",
            Opcode::MDec => "MDEC",
            Opcode::MLock => "MLOCK",
            Opcode::MUnlock => "MUNLOCK",
            Opcode::Count => "COUNT",
            Opcode::Stats => "STATS",
            Opcode::Ping => "PING",
            Opcode::Meta => "META",
            Opcode::Keys => "KEYS",
            Opcode::End => "END",
        }
    }
}

impl TryFrom<u16> for Opcode {
    type Error = u16;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Ok(match value {
            1 => Opcode::Set,
            2 => Opcode::Ttl,
            3 => Opcode::Get,
            4 => Opcode::Del,
            5 => Opcode::Inc,
            6 => Opcode::Dec,
            7 => Opcode::Lock,
            8 => Opcode::Unlock,
            9 => Opcode::MSet,
            10 => Opcode::MTtl,
            11 => Opcode::MGet,
            12 => Opcode::MDel,
            13 => Opcode::MInc,
            14 => Opcode::MDec,
            15 => Opcode::MLock,
            16 => Opcode::MUnlock,
            17 => Opcode::Count,
            18 => Opcode::Stats,
            19 => Opcode::Ping,
            20 => Opcode::Meta,
            21 => Opcode::Keys,
            0xff => Opcode::End,
            other => return Err(other),
        })
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Reply status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Status {
    /// Generic error
    Err = 0,
    NotFound = 1,
    /// Not a number
    Nan = 2,
    /// Memory budget exhausted
    Mem = 3,
    Locked = 4,
    Ok = 5,
    /// Single value
    Val = 6,
    /// Key/value set
    KVal = 7,
}

impl Status {
    #[inline]
    pub fn code(self) -> u16 {
        self as u16
    }
}

/// How a value's bytes are to be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Encoding {
    Plain = 0,
    /// Only ever used for stored values; replies carry the decompressed form
    Compressed = 1,
    /// 8-byte little-endian signed integer
    Number = 2,
}

impl Encoding {
    #[inline]
    pub fn tag(self) -> u8 {
        self as u8
    }

    #[inline]
    pub fn is_compressed(self) -> bool {
        self == Encoding::Compressed
    }
}

/// A reply to a single request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// A bare status with a single zero byte as payload
    Code(Status),
    /// One value
    Value(Value),
    /// Ordered key/value pairs
    KeyValues(Vec<(Bytes, Value)>),
}

impl Reply {
    pub fn ok() -> Self {
        Reply::Code(Status::Ok)
    }

    pub fn error() -> Self {
        Reply::Code(Status::Err)
    }

    pub fn not_found() -> Self {
        Reply::Code(Status::NotFound)
    }

    pub fn nan() -> Self {
        Reply::Code(Status::Nan)
    }

    pub fn out_of_memory() -> Self {
        Reply::Code(Status::Mem)
    }

    pub fn locked() -> Self {
        Reply::Code(Status::Locked)
    }

    /// An affected-items count, sent as a number.
    pub fn count(n: usize) -> Self {
        Reply::Value(Value::Number(n as i64))
    }

    pub fn number(n: i64) -> Self {
        Reply::Value(Value::Number(n))
    }

    pub fn plain(data: impl Into<Bytes>) -> Self {
        Reply::Value(Value::Plain(data.into()))
    }

    /// Status code carried in the header.
    pub fn status(&self) -> Status {
        match self {
            Reply::Code(status) => *status,
            Reply::Value(_) => Status::Val,
            Reply::KeyValues(_) => Status::KVal,
        }
    }

    /// Total serialized size, header included.
    pub fn encoded_len(&self) -> usize {
        REPLY_HEADER_LEN + self.payload_len()
    }

    fn payload_len(&self) -> usize {
        match self {
            Reply::Code(_) => 1,
            Reply::Value(value) => value_len(value),
            Reply::KeyValues(pairs) => {
                4 + pairs
                    .iter()
                    .map(|(key, value)| 4 + key.len() + 1 + 4 + value_len(value))
                    .sum::<usize>()
            }
        }
    }

    /// Serializes the reply into a freshly allocated buffer.
    pub fn serialize(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.serialize_into(&mut buf);
        buf.freeze()
    }

    /// Serializes the reply, appending to `buf`.
    pub fn serialize_into(&self, buf: &mut BytesMut) {
        buf.reserve(self.encoded_len());
        buf.put_u16_le(self.status().code());

        match self {
            Reply::Code(_) => {
                buf.put_u8(Encoding::Plain.tag());
                buf.put_u32_le(1);
                buf.put_u8(0);
            }
            Reply::Value(value) => {
                buf.put_u8(value.encoding().tag());
                buf.put_u32_le(value_len(value) as u32);
                put_value(buf, value);
            }
            Reply::KeyValues(pairs) => {
                buf.put_u8(Encoding::Plain.tag());
                buf.put_u32_le(self.payload_len() as u32);
                buf.put_u32_le(pairs.len() as u32);
                for (key, value) in pairs {
                    buf.put_u32_le(key.len() as u32);
                    buf.put_slice(key);
                    buf.put_u8(value.encoding().tag());
                    buf.put_u32_le(value_len(value) as u32);
                    put_value(buf, value);
                }
            }
        }
    }
}

fn value_len(value: &Value) -> usize {
    match value {
        Value::Plain(data) | Value::Compressed(data) => data.len(),
        Value::Number(_) => 8,
    }
}

fn put_value(buf: &mut BytesMut, value: &Value) {
    match value {
        Value::Plain(data) | Value::Compressed(data) => buf.put_slice(data),
        Value::Number(n) => buf.put_i64_le(*n),
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Code(status) => write!(f, "{:?}", status),
            Reply::Value(Value::Number(n)) => write!(f, "(number) {}", n),
            Reply::Value(Value::Plain(data)) | Reply::Value(Value::Compressed(data)) => {
                write!(f, "\"{}\"", String::from_utf8_lossy(data))
            }
            Reply::KeyValues(pairs) => write!(f, "({} pairs)", pairs.len()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_conversion() {
        assert_eq!(Opcode::try_from(1), Ok(Opcode::Set));
        assert_eq!(Opcode::try_from(17), Ok(Opcode::Count));
        assert_eq!(Opcode::try_from(0xff), Ok(Opcode::End));
        assert_eq!(Opcode::try_from(22), Err(22));
        assert_eq!(Opcode::try_from(0), Err(0));
        assert_eq!(Opcode::MUnlock as u16, 16);
        assert_eq!(Opcode::Keys.to_string(), "KEYS");
    }

    #[test]
    fn test_code_reply_layout() {
        let bytes = Reply::ok().serialize();
        assert_eq!(&bytes[..], &[5, 0, 0, 1, 0, 0, 0, 0]);

        let bytes = Reply::locked().serialize();
        assert_eq!(&bytes[..2], &[4, 0]);
        assert_eq!(bytes.len(), Reply::locked().encoded_len());
    }

    #[test]
    fn test_plain_value_layout() {
        let bytes = Reply::plain("alice").serialize();
        let mut expected = vec![6, 0, 0, 5, 0, 0, 0];
        expected.extend_from_slice(b"alice");
        assert_eq!(&bytes[..], &expected[..]);
    }

    #[test]
    fn test_number_value_layout() {
        let bytes = Reply::number(-2).serialize();
        assert_eq!(&bytes[..7], &[6, 0, 2, 8, 0, 0, 0]);
        assert_eq!(&bytes[7..], &(-2i64).to_le_bytes());
    }

    #[test]
    fn test_key_values_layout() {
        let reply = Reply::KeyValues(vec![
            (Bytes::from("k1"), Value::Plain(Bytes::from("v"))),
            (Bytes::from("k2"), Value::Number(7)),
        ]);
        let bytes = reply.serialize();
        assert_eq!(bytes.len(), reply.encoded_len());

        assert_eq!(&bytes[..3], &[7, 0, 0]);
        let payload_len = u32::from_le_bytes(bytes[3..7].try_into().unwrap()) as usize;
        assert_eq!(payload_len, bytes.len() - REPLY_HEADER_LEN);

        let payload = &bytes[7..];
        assert_eq!(&payload[..4], &2u32.to_le_bytes());
        // first entry: klen, "k1", enc, vlen, "v"
        assert_eq!(&payload[4..8], &2u32.to_le_bytes());
        assert_eq!(&payload[8..10], b"k1");
        assert_eq!(payload[10], Encoding::Plain.tag());
        assert_eq!(&payload[11..15], &1u32.to_le_bytes());
        assert_eq!(payload[15], b'v');
        // second entry carries a number
        assert_eq!(&payload[16..20], &2u32.to_le_bytes());
        assert_eq!(&payload[20..22], b"k2");
        assert_eq!(payload[22], Encoding::Number.tag());
        assert_eq!(&payload[23..27], &8u32.to_le_bytes());
        assert_eq!(&payload[27..35], &7i64.to_le_bytes());
    }

    #[test]
    fn test_empty_key_values() {
        let reply = Reply::KeyValues(Vec::new());
        let bytes = reply.serialize();
        assert_eq!(&bytes[3..7], &4u32.to_le_bytes());
        assert_eq!(&bytes[7..], &0u32.to_le_bytes());
    }
}
