//! Request Field Parser
//!
//! Request payloads are ASCII fields separated by a single space byte. The
//! parser splits a payload into the fields an opcode expects and enforces
//! the configured key and value limits while doing so.
//!
//! ## Layouts
//!
//! | Shape | Payload | Used by |
//! |---|---|---|
//! | key | `<key>` | GET, DEL, INC, DEC, UNLOCK and their multi-key forms |
//! | key + arg | `<key> <arg>` | TTL, LOCK, META, MSET, MTTL, MLOCK |
//! | ttl + key + value | `<ttl> <key> <value>` | SET |
//!
//! The last field of a layout always extends to the end of the payload, so
//! values may contain spaces.
//!
//! ## Zero-Copy
//!
//! Fields are returned as `Bytes` slices of the request buffer, so splitting
//! a request never copies key or value data.

use bytes::Bytes;

/// The single byte separating fields.
pub const SEPARATOR: u8 = b' ';

/// Errors that can occur while splitting a request payload.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// A required field is absent
    #[error("missing {0} field")]
    MissingField(&'static str),

    /// The key (or prefix expression) is empty
    #[error("empty key")]
    EmptyKey,

    /// The key exceeds the configured limit
    #[error("key length {len} exceeds limit of {max} bytes")]
    KeyTooLong { len: usize, max: usize },

    /// The value exceeds the configured limit
    #[error("value length {len} exceeds limit of {max} bytes")]
    ValueTooLong { len: usize, max: usize },

    /// A numeric field does not hold an integer
    #[error("invalid number in {0} field")]
    InvalidNumber(&'static str),
}

/// Result type for field parsing.
pub type ParseResult<T> = Result<T, ParseError>;

/// Size limits applied while splitting fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub max_key_size: usize,
    pub max_value_size: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_key_size: 512,
            max_value_size: 1024 * 1024,
        }
    }
}

/// Splits request payloads into fields.
///
/// # Example
///
/// ```
/// use triekv::protocol::{FieldParser, Limits};
/// use bytes::Bytes;
///
/// let parser = FieldParser::new(Limits::default());
/// let (ttl, key, value) = parser
///     .ttl_key_value(&Bytes::from("-1 user:1 alice smith"))
///     .unwrap();
///
/// assert_eq!(ttl, -1);
/// assert_eq!(key, Bytes::from("user:1"));
/// assert_eq!(value, Bytes::from("alice smith"));
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct FieldParser {
    limits: Limits,
}

impl FieldParser {
    pub fn new(limits: Limits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> Limits {
        self.limits
    }

    /// Parses a payload holding just a key. Anything after the first
    /// separator is ignored.
    pub fn key(&self, payload: &Bytes) -> ParseResult<Bytes> {
        let (key, _) = split_once(payload);
        self.check_key(key)
    }

    /// Parses `<key> <rest>`, where `rest` is an argument or a value.
    pub fn key_value(&self, payload: &Bytes) -> ParseResult<(Bytes, Bytes)> {
        let (key, rest) = split_once(payload);
        let key = self.check_key(key)?;
        let value = rest.ok_or(ParseError::MissingField("value"))?;
        Ok((key, self.check_value(value)?))
    }

    /// Parses `<key> <number>`.
    pub fn key_number(&self, payload: &Bytes, field: &'static str) -> ParseResult<(Bytes, Bytes)> {
        let (key, rest) = split_once(payload);
        let key = self.check_key(key)?;
        let arg = rest.ok_or(ParseError::MissingField(field))?;
        Ok((key, arg))
    }

    /// Parses the SET layout `<ttl> <key> <value>`.
    pub fn ttl_key_value(&self, payload: &Bytes) -> ParseResult<(i64, Bytes, Bytes)> {
        let (ttl, rest) = split_once(payload);
        let rest = rest.ok_or(ParseError::MissingField("key"))?;
        let ttl = parse_int(&ttl).ok_or(ParseError::InvalidNumber("ttl"))?;
        let (key, value) = self.key_value(&rest)?;
        Ok((ttl, key, value))
    }

    fn check_key(&self, key: Bytes) -> ParseResult<Bytes> {
        if key.is_empty() {
            return Err(ParseError::EmptyKey);
        }
        if key.len() > self.limits.max_key_size {
            return Err(ParseError::KeyTooLong {
                len: key.len(),
                max: self.limits.max_key_size,
            });
        }
        Ok(key)
    }

    fn check_value(&self, value: Bytes) -> ParseResult<Bytes> {
        if value.len() > self.limits.max_value_size {
            return Err(ParseError::ValueTooLong {
                len: value.len(),
                max: self.limits.max_value_size,
            });
        }
        Ok(value)
    }
}

/// Splits at the first separator. The second half is `None` when there is
/// no separator at all.
fn split_once(payload: &Bytes) -> (Bytes, Option<Bytes>) {
    match payload.iter().position(|&b| b == SEPARATOR) {
        Some(pos) => (payload.slice(..pos), Some(payload.slice(pos + 1..))),
        None => (payload.clone(), None),
    }
}

/// Parses an optionally signed decimal integer spanning the whole field.
pub fn parse_int(field: &[u8]) -> Option<i64> {
    std::str::from_utf8(field).ok()?.parse().ok()
}

/// Renders up to `max` bytes as a hex and printable-ASCII dump, for logging
/// requests that could not be understood.
pub fn hexdump(data: &[u8], max: usize) -> String {
    let data = &data[..data.len().min(max)];
    let mut out = String::with_capacity(data.len() * 4 + 8);

    for (row, chunk) in data.chunks(16).enumerate() {
        if row > 0 {
            out.push('\n');
        }
        out.push_str(&format!("{:04x}  ", row * 16));
        for i in 0..16 {
            match chunk.get(i) {
                Some(b) => out.push_str(&format!("{:02x} ", b)),
                None => out.push_str("   "),
            }
        }
        out.push(' ');
        out.extend(chunk.iter().map(|&b| {
            if b.is_ascii_graphic() || b == b' ' {
                b as char
            } else {
                '.'
            }
        }));
    }

    out
}
