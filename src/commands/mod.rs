//! Commands Module
//!
//! Maps binary-protocol opcodes onto storage engine operations.
//!
//! ## Example
//!
//! ```
//! use triekv::commands::CommandHandler;
//! use triekv::protocol::{Limits, Opcode, Reply};
//! use triekv::storage::{StorageConfig, StorageEngine};
//! use bytes::{BufMut, BytesMut};
//!
//! let handler = CommandHandler::new(Limits::default());
//! let mut engine = StorageEngine::new(StorageConfig::default());
//!
//! let mut body = BytesMut::new();
//! body.put_u16_le(Opcode::Ping as u16);
//!
//! let reply = handler.execute(&mut engine, body.freeze()).unwrap();
//! assert_eq!(reply, Reply::ok());
//! ```

pub mod handler;

pub use handler::{CommandHandler, DispatchError, Request};
