//! # triekv - An In-Memory Key-Value Cache with Prefix Queries
//!
//! triekv is a single-threaded, in-memory cache server speaking a compact
//! binary protocol. Keys live in a byte-wise prefix tree, so any command
//! can also be applied to every key sharing a literal prefix.
//!
//! ## Features
//!
//! - **Prefix Operations**: `MGET user:` reads every key starting with `user:`
//! - **TTL Support**: items expire lazily on access and by periodic sweeps
//! - **Item Locks**: clients can freeze items against writes and expiry
//! - **Compression**: large values are stored LZ4-compressed when it pays off
//! - **Memory Budget**: exact accounting, write refusal and stale-item eviction
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              triekv                                     │
//! │                                                                         │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐                  │
//! │  │ TCP / unix  │───>│ Connection  │───>│  Command    │                  │
//! │  │  listener   │    │  Handler    │    │  Handler    │                  │
//! │  └─────────────┘    └─────────────┘    └──────┬──────┘                  │
//! │                                               │                         │
//! │                                               ▼                         │
//! │  ┌─────────────┐    ┌──────────────────────────────────────────────┐    │
//! │  │  Binary     │    │              StorageEngine                   │    │
//! │  │  protocol   │    │   Trie<Item>  ─  ServerStats  ─  lz4 codec   │    │
//! │  └─────────────┘    └──────────────────────────────────────────────┘    │
//! │                                               ▲                         │
//! │                     ┌─────────────────────────┴───────────────────────┐ │
//! │                     │  Timers: cron, expiry, memory, idle, stats      │ │
//! │                     └─────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//!          everything above runs on one thread (tokio LocalSet)
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use triekv::config::Config;
//! use triekv::server::Server;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> anyhow::Result<()> {
//!     let local = tokio::task::LocalSet::new();
//!     local
//!         .run_until(async {
//!             let server = Server::bind(Config::default()).await?;
//!             server.run().await
//!         })
//!         .await
//! }
//! ```
//!
//! ## Wire Protocol
//!
//! Requests are `i32 length | u16 opcode | payload`, replies are
//! `u16 status | u8 encoding | u32 length | payload`, all little-endian.
//! Payload fields are separated by a single space, e.g. `SET` carries
//! `"<ttl> <key> <value>"`.
//!
//! ## Module Overview
//!
//! - [`protocol`]: opcodes, status codes, reply encoding and field parsing
//! - [`storage`]: prefix tree, items, compression, sweeps and counters
//! - [`commands`]: opcode dispatch onto the storage engine
//! - [`connection`]: per-client request/reply state machine
//! - [`server`]: listeners, timers, client registry and process lifecycle
//! - [`config`]: config file, typed readers and command line
//! - [`memory`]: OS memory introspection and formatting helpers

pub mod commands;
pub mod config;
pub mod connection;
pub mod memory;
pub mod protocol;
pub mod server;
pub mod storage;

// Re-export commonly used types for convenience
pub use commands::CommandHandler;
pub use config::Config;
pub use protocol::{Opcode, Reply, Status};
pub use server::Server;
pub use storage::{StorageConfig, StorageEngine};

/// The default port triekv listens on
pub const DEFAULT_PORT: u16 = 10128;

/// The default host triekv binds to
pub const DEFAULT_ADDRESS: &str = "127.0.0.1";

/// Version of triekv
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
