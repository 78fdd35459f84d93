//! Storage Engine Module
//!
//! This module provides the cache engine for triekv: a byte-wise prefix
//! index whose slots own cache items, with TTL, locking, compression and
//! exact memory accounting.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     StorageEngine                           │
//! │  ┌──────────────────────────┐   ┌────────────────────────┐  │
//! │  │ Trie<Item> (arena)       │   │ ServerStats            │  │
//! │  │  node ─ node ─ node      │   │  items / memory used   │  │
//! │  │         └─ node [Item]   │   │  peak / compressed     │  │
//! │  └──────────────────────────┘   └────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────┘
//!                            ▲
//!                            │  &mut, same thread
//!              ┌─────────────┴─────────────┐
//!              │  Maintenance sweeps       │
//!              │  (server timers)          │
//!              └───────────────────────────┘
//! ```
//!
//! ## Features
//!
//! - **Prefix Index**: literal-prefix enumeration for multi-key commands
//! - **TTL Support**: per-item time-to-live, clamped to a configured maximum
//! - **Locks**: per-item write/delete guards that also suspend expiry
//! - **Compression**: large values stored LZ4-compressed when it pays off
//! - **Memory Budget**: writes refused and stale items evicted above it
//!
//! ## Example
//!
//! ```
//! use triekv::storage::{StorageEngine, StorageConfig};
//! use bytes::Bytes;
//!
//! let mut engine = StorageEngine::new(StorageConfig::default());
//!
//! engine.set(b"session", Bytes::from("token123"), 3600).unwrap();
//! assert_eq!(engine.len(), 1);
//!
//! let now = engine.now();
//! engine.set_now(now + 3600);
//! engine.expire_sweep();
//! assert!(engine.is_empty());
//! ```

pub mod compress;
pub mod engine;
pub mod expiry;
pub mod item;
pub mod stats;
pub mod trie;

// Re-export commonly used types
pub use compress::CodecError;
pub use engine::{parse_arg, unix_now, MetaField, StorageConfig, StorageEngine, StoreError, StoreResult};
pub use expiry::SweepReport;
pub use item::{Item, Value, ITEM_OVERHEAD, LOCK_PERMANENT};
pub use stats::ServerStats;
pub use trie::{NodeId, Trie, ROOT};
