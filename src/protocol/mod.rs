//! Binary Protocol Implementation
//!
//! Requests are length-prefixed frames carrying an opcode and a payload of
//! space-separated fields; replies are a fixed header plus an encoded value.
//!
//! ## Modules
//!
//! - `types`: opcodes, status codes, encodings and the `Reply` type
//! - `parser`: zero-copy splitting of request payloads into fields
//!
//! ## Example
//!
//! ```
//! use triekv::protocol::{FieldParser, Reply};
//! use bytes::Bytes;
//!
//! // Splitting an incoming payload
//! let parser = FieldParser::default();
//! let key = parser.key(&Bytes::from("user:1")).unwrap();
//! assert_eq!(key, Bytes::from("user:1"));
//!
//! // Creating a reply
//! let bytes = Reply::plain("alice").serialize();
//! assert_eq!(bytes.len(), 7 + 5);
//! ```

pub mod parser;
pub mod types;

// Re-export commonly used types for convenience
pub use parser::{hexdump, parse_int, FieldParser, Limits, ParseError, ParseResult};
pub use types::{Encoding, Opcode, Reply, Status, REPLY_HEADER_LEN};
