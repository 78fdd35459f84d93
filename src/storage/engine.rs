//! Storage Engine with Expiry and Lock Support
//!
//! This module implements the cache engine: a [`Trie`] of [`Item`]s plus the
//! server-wide counters that every item creation and destruction updates.
//!
//! ## Design Decisions
//!
//! 1. **Single owner**: The engine is owned by the server thread. There are
//!    no locks around it; requests and maintenance sweeps interleave on one
//!    thread and take `&mut self` in turn.
//! 2. **Engine clock**: `now` is a whole-second timestamp set by the server
//!    on every cron tick and before each request, so every decision in a
//!    request agrees on the time.
//! 3. **Lazy + active expiry**: Expired items are destroyed when a request
//!    touches them (see [`StorageEngine::check_and_maybe_expire`]) and by the
//!    periodic sweeps in [`crate::storage::expiry`].
//! 4. **Locks win**: A locked item is never expired, evicted, overwritten or
//!    deleted.
//!
//! ## Item Lifecycle
//!
//! ```text
//!   SET / MSET / INC(absent)
//!            │ create_item ──> stats.item_created
//!            ▼
//!   ┌──────────────────┐  TTL / LOCK / UNLOCK / INC / DEC
//!   │  live in a slot  │ ◄──────────────────────────────┐
//!   └────────┬─────────┘ ───────────────────────────────┘
//!            │ DEL / overwrite / expiry / eviction / teardown
//!            ▼ destroy_item ──> stats.item_destroyed
//! ```
//!
//! Multi-key operations treat their expression as a literal prefix and
//! resolve it with a trie search. Members that are expired (and for writes,
//! locked) are skipped and not counted.

use crate::protocol::parse_int;
use crate::storage::compress::{self, CodecError};
use crate::storage::item::{Item, Value, LOCK_PERMANENT};
use crate::storage::stats::ServerStats;
use crate::storage::trie::{NodeId, Trie};
use bytes::Bytes;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// Current wall-clock time in whole seconds since the Unix epoch.
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Tunables for the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageConfig {
    /// Memory budget in bytes; writes are refused and eviction kicks in above it
    pub max_memory: u64,
    /// Upper bound applied to every TTL, in seconds
    pub max_item_ttl: i64,
    /// Values longer than this are candidates for compression
    pub compression_threshold: usize,
    /// Items not accessed for this many seconds may be evicted under memory pressure
    pub gc_ratio: i64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            max_memory: 2 * 1024 * 1024 * 1024,
            max_item_ttl: 30 * 24 * 3600,
            compression_threshold: 40 * 1024,
            gc_ratio: 3600,
        }
    }
}

/// Application-level failures, each mapping to a reply status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("key not found")]
    NotFound,
    #[error("value is not a number")]
    NotANumber,
    #[error("memory limit reached")]
    OutOfMemory,
    #[error("item is locked")]
    Locked,
    #[error("stored value could not be decoded")]
    Corrupt,
}

/// Result type for engine operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Item attributes exposed by META.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetaField {
    Size,
    Encoding,
    Access,
    Created,
    Ttl,
    Left,
    Lock,
}

impl MetaField {
    pub fn parse(name: &[u8]) -> Option<Self> {
        Some(match name {
            b"size" => MetaField::Size,
            b"encoding" => MetaField::Encoding,
            b"access" => MetaField::Access,
            b"created" => MetaField::Created,
            b"ttl" => MetaField::Ttl,
            b"left" => MetaField::Left,
            b"lock" => MetaField::Lock,
            _ => return None,
        })
    }
}

/// The cache engine.
///
/// # Example
///
/// ```
/// use triekv::storage::{StorageEngine, StorageConfig, Value};
/// use bytes::Bytes;
///
/// let mut engine = StorageEngine::new(StorageConfig::default());
///
/// engine.set(b"user:1", Bytes::from("alice"), -1).unwrap();
/// engine.set(b"user:2", Bytes::from("bob"), -1).unwrap();
///
/// assert_eq!(engine.get(b"user:1"), Ok(Value::Plain(Bytes::from("alice"))));
/// assert_eq!(engine.count(b"user:"), Ok(2));
/// ```
#[derive(Debug)]
pub struct StorageEngine {
    /// Prefix index owning every live item
    trie: Trie<Item>,

    /// Server-wide counters
    stats: ServerStats,

    config: StorageConfig,

    /// Engine clock, seconds since epoch
    now: i64,
}

impl StorageEngine {
    /// Creates an empty engine with its clock set to the current time.
    pub fn new(config: StorageConfig) -> Self {
        let now = unix_now();
        Self {
            trie: Trie::new(),
            stats: ServerStats::new(now),
            config,
            now,
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    #[inline]
    pub fn now(&self) -> i64 {
        self.now
    }

    /// Advances (or rewinds) the engine clock.
    #[inline]
    pub fn set_now(&mut self, now: i64) {
        self.now = now;
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub fn stats(&self) -> &ServerStats {
        &self.stats
    }

    pub fn stats_mut(&mut self) -> &mut ServerStats {
        &mut self.stats
    }

    /// Number of live items, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.trie.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trie.is_empty()
    }

    /// Whether memory used exceeds the configured budget.
    #[inline]
    pub fn is_over_memory(&self) -> bool {
        self.stats.memory_used > self.config.max_memory
    }

    #[cfg(test)]
    pub(crate) fn config_mut(&mut self) -> &mut StorageConfig {
        &mut self.config
    }

    #[cfg(test)]
    pub(crate) fn trie_mut(&mut self) -> &mut Trie<Item> {
        &mut self.trie
    }

    pub(crate) fn parts_mut(&mut self) -> (&mut Trie<Item>, &mut ServerStats) {
        (&mut self.trie, &mut self.stats)
    }

    // ========================================================================
    // Item Store
    // ========================================================================

    /// Applies the compression policy to a value about to be stored.
    pub fn encode(&self, data: &Bytes) -> Value {
        if data.len() > self.config.compression_threshold {
            if let Some(compressed) = compress::compress(data) {
                return Value::Compressed(compressed);
            }
        }
        Value::Plain(data.clone())
    }

    /// Counts a compression for every item stored in compressed form.
    fn record_compression(&mut self, original: usize, value: &Value) {
        if let Value::Compressed(stored) = value {
            self.stats.compressed(original, stored.len());
        }
    }

    /// Restores a stored value to the form sent to clients.
    pub fn expose(value: &Value) -> Result<Value, CodecError> {
        match value {
            Value::Compressed(data) => Ok(Value::Plain(compress::decompress(data)?)),
            other => Ok(other.clone()),
        }
    }

    /// Creates an item stamped with the engine clock and accounts for it.
    pub fn create_item(&mut self, value: Value, ttl: i64) -> Item {
        let item = Item::new(value, self.clamp_ttl(ttl), self.now);
        self.stats.item_created(&item, self.now);
        item
    }

    /// Releases an item and reverses its accounting.
    pub fn destroy_item(&mut self, item: Item) {
        self.stats.item_destroyed(&item);
    }

    fn clamp_ttl(&self, ttl: i64) -> i64 {
        ttl.min(self.config.max_item_ttl)
    }

    /// Validates the item in slot `id`, destroying it and emptying the slot
    /// if its TTL lapsed while unlocked.
    ///
    /// # Returns
    ///
    /// `true` if the slot still holds a live item.
    pub fn check_and_maybe_expire(&mut self, id: NodeId) -> bool {
        let now = self.now;
        match self.trie.get(id) {
            None => false,
            Some(item) if item.is_expired(now) => {
                debug!(ttl = item.ttl, "TTL expired for item");
                if let Some(item) = self.trie.take(id) {
                    self.destroy_item(item);
                }
                false
            }
            Some(_) => true,
        }
    }

    /// Resolves `key` to the node of a live item.
    fn live_node(&mut self, key: &[u8]) -> StoreResult<NodeId> {
        match self.trie.find_node(key) {
            Some(id) if self.check_and_maybe_expire(id) => Ok(id),
            _ => Err(StoreError::NotFound),
        }
    }

    fn live_item(&mut self, key: &[u8]) -> StoreResult<&mut Item> {
        let id = self.live_node(key)?;
        self.trie.get_mut(id).ok_or(StoreError::NotFound)
    }

    // ========================================================================
    // Single-Key Operations
    // ========================================================================

    /// Stores `data` under `key`, replacing any previous value.
    ///
    /// # Returns
    ///
    /// The value as clients will read it back.
    pub fn set(&mut self, key: &[u8], data: Bytes, ttl: i64) -> StoreResult<Value> {
        if self.is_over_memory() {
            return Err(StoreError::OutOfMemory);
        }

        if let Some(id) = self.trie.find_node(key) {
            if self.check_and_maybe_expire(id)
                && self.trie.get(id).is_some_and(|item| item.is_locked(self.now))
            {
                return Err(StoreError::Locked);
            }
        }

        let value = self.encode(&data);
        self.record_compression(data.len(), &value);
        let item = self.create_item(value, ttl);
        if let Some(old) = self.trie.insert(key, item) {
            self.destroy_item(old);
        }

        Ok(Value::Plain(data))
    }

    /// Reads the value stored under `key`.
    pub fn get(&mut self, key: &[u8]) -> StoreResult<Value> {
        let now = self.now;
        let item = self.live_item(key)?;
        item.touch(now);
        Self::expose(&item.value).map_err(|e| {
            warn!(error = %e, "Failed to decode stored value");
            StoreError::Corrupt
        })
    }

    /// Removes `key`.
    pub fn del(&mut self, key: &[u8]) -> StoreResult<()> {
        let id = self.live_node(key)?;
        if self.trie.get(id).is_some_and(|item| item.is_locked(self.now)) {
            return Err(StoreError::Locked);
        }
        if let Some(item) = self.trie.take(id) {
            self.destroy_item(item);
        }
        Ok(())
    }

    /// Sets the TTL of `key`, counting from now.
    pub fn ttl(&mut self, key: &[u8], ttl: i64) -> StoreResult<()> {
        let now = self.now;
        let ttl = self.clamp_ttl(ttl);
        let item = self.live_item(key)?;
        if item.is_locked(now) {
            return Err(StoreError::Locked);
        }
        item.ttl = ttl;
        item.touched_at = now;
        item.touch(now);
        Ok(())
    }

    /// Adds `delta` to the number stored under `key`.
    ///
    /// A missing key is created holding `delta`. A plain value that parses
    /// as an integer is converted to a number first.
    pub fn incr(&mut self, key: &[u8], delta: i64) -> StoreResult<i64> {
        let now = self.now;
        let id = match self.trie.find_node(key) {
            Some(id) if self.check_and_maybe_expire(id) => id,
            _ => {
                let item = self.create_item(Value::Number(delta), -1);
                if let Some(old) = self.trie.insert(key, item) {
                    self.destroy_item(old);
                }
                return Ok(delta);
            }
        };

        let (trie, stats) = self.parts_mut();
        let item = trie.get_mut(id).ok_or(StoreError::NotFound)?;
        if item.is_locked(now) {
            return Err(StoreError::Locked);
        }
        apply_delta(item, delta, now, stats)
    }

    /// Locks `key` for `seconds`, or until unlocked if `seconds` is negative.
    pub fn lock(&mut self, key: &[u8], seconds: i64) -> StoreResult<()> {
        let now = self.now;
        let item = self.live_item(key)?;
        if item.is_locked(now) {
            return Err(StoreError::Locked);
        }
        set_lock(item, seconds, now);
        Ok(())
    }

    /// Clears the lock on `key`.
    pub fn unlock(&mut self, key: &[u8]) -> StoreResult<()> {
        let now = self.now;
        let item = self.live_item(key)?;
        item.lock = 0;
        item.touch(now);
        Ok(())
    }

    /// Reads one attribute of the item under `key`.
    pub fn meta(&mut self, key: &[u8], field: MetaField) -> StoreResult<i64> {
        let now = self.now;
        let item = self.live_item(key)?;
        Ok(match field {
            MetaField::Size => item.size() as i64,
            MetaField::Encoding => item.encoding().tag() as i64,
            MetaField::Access => item.last_access,
            MetaField::Created => item.created_at,
            MetaField::Ttl => item.ttl,
            MetaField::Left => item.ttl_left(now),
            MetaField::Lock => item.lock,
        })
    }

    // ========================================================================
    // Multi-Key Operations
    // ========================================================================

    /// Resolves `prefix` to matching nodes, failing when nothing matches.
    fn matching(&self, prefix: &[u8]) -> StoreResult<Vec<(Bytes, NodeId)>> {
        let nodes = self.trie.search_nodes(prefix);
        if nodes.is_empty() {
            Err(StoreError::NotFound)
        } else {
            Ok(nodes)
        }
    }

    /// Runs `op` on every live item under `prefix`, counting the items for
    /// which it reports success. Expired members are destroyed and skipped.
    fn for_each_live<F>(&mut self, prefix: &[u8], mut op: F) -> StoreResult<usize>
    where
        F: FnMut(&mut Item, i64, &mut ServerStats) -> bool,
    {
        let nodes = self.matching(prefix)?;
        let now = self.now;
        let mut affected = 0;

        for (_, id) in nodes {
            if !self.check_and_maybe_expire(id) {
                continue;
            }
            let (trie, stats) = self.parts_mut();
            if let Some(item) = trie.get_mut(id) {
                if op(item, now, stats) {
                    affected += 1;
                }
            }
        }

        Ok(affected)
    }

    /// Replaces the value of every unlocked item under `prefix`.
    pub fn mset(&mut self, prefix: &[u8], data: Bytes) -> StoreResult<usize> {
        if self.is_over_memory() {
            return Err(StoreError::OutOfMemory);
        }
        let nodes = self.matching(prefix)?;
        let value = self.encode(&data);
        let mut affected = 0;

        for (_, id) in nodes {
            if !self.check_and_maybe_expire(id)
                || self.trie.get(id).is_some_and(|item| item.is_locked(self.now))
            {
                continue;
            }
            self.record_compression(data.len(), &value);
            let item = self.create_item(value.clone(), -1);
            if let Some(old) = self.trie.replace(id, item) {
                self.destroy_item(old);
            }
            affected += 1;
        }

        Ok(affected)
    }

    /// Sets the TTL of every unlocked item under `prefix`.
    pub fn mttl(&mut self, prefix: &[u8], ttl: i64) -> StoreResult<usize> {
        let ttl = self.clamp_ttl(ttl);
        self.for_each_live(prefix, |item, now, _| {
            if item.is_locked(now) {
                return false;
            }
            item.ttl = ttl;
            item.touched_at = now;
            item.touch(now);
            true
        })
    }

    /// Reads every live item under `prefix`.
    pub fn mget(&mut self, prefix: &[u8]) -> StoreResult<Vec<(Bytes, Value)>> {
        let nodes = self.matching(prefix)?;
        let now = self.now;
        let mut pairs = Vec::with_capacity(nodes.len());

        for (key, id) in nodes {
            if !self.check_and_maybe_expire(id) {
                continue;
            }
            if let Some(item) = self.trie.get_mut(id) {
                item.touch(now);
                match Self::expose(&item.value) {
                    Ok(value) => pairs.push((key, value)),
                    Err(e) => warn!(error = %e, "Skipping undecodable value"),
                }
            }
        }

        Ok(pairs)
    }

    /// Removes every unlocked item under `prefix`.
    pub fn mdel(&mut self, prefix: &[u8]) -> StoreResult<usize> {
        let nodes = self.matching(prefix)?;
        let mut affected = 0;

        for (_, id) in nodes {
            if !self.check_and_maybe_expire(id)
                || self.trie.get(id).is_some_and(|item| item.is_locked(self.now))
            {
                continue;
            }
            if let Some(item) = self.trie.take(id) {
                self.destroy_item(item);
                affected += 1;
            }
        }

        Ok(affected)
    }

    /// Adds `delta` to every unlocked numeric item under `prefix`.
    /// Non-numeric members are skipped.
    pub fn mincr(&mut self, prefix: &[u8], delta: i64) -> StoreResult<usize> {
        self.for_each_live(prefix, |item, now, stats| {
            !item.is_locked(now) && apply_delta(item, delta, now, stats).is_ok()
        })
    }

    /// Locks every unlocked item under `prefix`.
    pub fn mlock(&mut self, prefix: &[u8], seconds: i64) -> StoreResult<usize> {
        self.for_each_live(prefix, |item, now, _| {
            if item.is_locked(now) {
                return false;
            }
            set_lock(item, seconds, now);
            true
        })
    }

    /// Unlocks every item under `prefix`.
    pub fn munlock(&mut self, prefix: &[u8]) -> StoreResult<usize> {
        self.for_each_live(prefix, |item, now, _| {
            item.lock = 0;
            item.touch(now);
            true
        })
    }

    /// Counts live items under `prefix`.
    pub fn count(&mut self, prefix: &[u8]) -> StoreResult<usize> {
        self.for_each_live(prefix, |_, _, _| true)
    }

    /// Lists live keys under `prefix`.
    pub fn keys(&mut self, prefix: &[u8]) -> StoreResult<Vec<Bytes>> {
        let nodes = self.matching(prefix)?;
        let mut keys = Vec::with_capacity(nodes.len());
        for (key, id) in nodes {
            if self.check_and_maybe_expire(id) {
                keys.push(key);
            }
        }
        Ok(keys)
    }
}

/// Adds `delta` to a numeric item, promoting a numeric plain value to a
/// number in place. Arithmetic wraps.
fn apply_delta(item: &mut Item, delta: i64, now: i64, stats: &mut ServerStats) -> StoreResult<i64> {
    let current = item.value.as_number().ok_or(StoreError::NotANumber)?;
    let updated = current.wrapping_add(delta);

    let old_size = item.size();
    item.value = Value::Number(updated);
    stats.item_resized(old_size, item.size());
    item.touch(now);

    Ok(updated)
}

fn set_lock(item: &mut Item, seconds: i64, now: i64) {
    item.lock = if seconds < 0 { LOCK_PERMANENT } else { seconds };
    item.touched_at = now;
    item.touch(now);
}

/// Parses a numeric argument, mapping failure to [`StoreError::NotANumber`].
pub fn parse_arg(field: &[u8]) -> StoreResult<i64> {
    parse_int(field).ok_or(StoreError::NotANumber)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::item::ITEM_OVERHEAD;

    const T0: i64 = 1_700_000_000;

    fn engine() -> StorageEngine {
        let mut engine = StorageEngine::new(StorageConfig::default());
        engine.set_now(T0);
        engine
    }

    fn plain(s: &str) -> Value {
        Value::Plain(Bytes::copy_from_slice(s.as_bytes()))
    }

    /// Recomputes Σ(size + overhead) straight from the trie.
    fn accounted(engine: &mut StorageEngine) -> u64 {
        let mut total = 0u64;
        engine.trie_mut().recurse(crate::storage::trie::ROOT, |_, slot| {
            if let Some(item) = slot {
                total += (item.size() + ITEM_OVERHEAD) as u64;
            }
        });
        total
    }

    #[test]
    fn test_set_and_get() {
        let mut engine = engine();
        assert_eq!(engine.set(b"key", Bytes::from("value"), -1), Ok(plain("value")));
        assert_eq!(engine.get(b"key"), Ok(plain("value")));
    }

    #[test]
    fn test_get_nonexistent() {
        let mut engine = engine();
        assert_eq!(engine.get(b"nonexistent"), Err(StoreError::NotFound));
    }

    #[test]
    fn test_overwrite_destroys_previous() {
        let mut engine = engine();
        engine.set(b"k", Bytes::from("first"), -1).unwrap();
        engine.set(b"k", Bytes::from("second!"), -1).unwrap();

        assert_eq!(engine.get(b"k"), Ok(plain("second!")));
        assert_eq!(engine.stats().total_items, 1);
        assert_eq!(engine.stats().memory_used, (7 + ITEM_OVERHEAD) as u64);
    }

    #[test]
    fn test_delete() {
        let mut engine = engine();
        engine.set(b"key", Bytes::from("value"), -1).unwrap();
        assert_eq!(engine.del(b"key"), Ok(()));
        assert_eq!(engine.get(b"key"), Err(StoreError::NotFound));
        assert_eq!(engine.del(b"key"), Err(StoreError::NotFound));
    }

    #[test]
    fn test_ttl_boundary() {
        let mut engine = engine();
        engine.set(b"session", Bytes::from("abc"), 10).unwrap();

        engine.set_now(T0 + 9);
        assert!(engine.get(b"session").is_ok());

        engine.set_now(T0 + 10);
        assert_eq!(engine.get(b"session"), Err(StoreError::NotFound));
        assert_eq!(engine.stats().total_items, 0);
        assert_eq!(engine.stats().memory_used, 0);
    }

    #[test]
    fn test_ttl_clamped_to_max() {
        let mut engine = StorageEngine::new(StorageConfig {
            max_item_ttl: 100,
            ..Default::default()
        });
        engine.set_now(T0);
        engine.set(b"k", Bytes::from("v"), 1_000_000).unwrap();
        assert_eq!(engine.meta(b"k", MetaField::Ttl), Ok(100));

        engine.ttl(b"k", 5000).unwrap();
        assert_eq!(engine.meta(b"k", MetaField::Ttl), Ok(100));
    }

    #[test]
    fn test_ttl_command_restarts_window() {
        let mut engine = engine();
        engine.set(b"k", Bytes::from("v"), -1).unwrap();

        engine.set_now(T0 + 50);
        engine.ttl(b"k", 5).unwrap();
        assert_eq!(engine.meta(b"k", MetaField::Left), Ok(5));

        engine.set_now(T0 + 54);
        assert!(engine.get(b"k").is_ok());
        engine.set_now(T0 + 55);
        assert_eq!(engine.get(b"k"), Err(StoreError::NotFound));
        assert_eq!(engine.ttl(b"k", 5), Err(StoreError::NotFound));
    }

    #[test]
    fn test_incr_scenario() {
        let mut engine = engine();
        assert_eq!(engine.incr(b"counter", 1), Ok(1));
        assert_eq!(engine.incr(b"counter", 1), Ok(2));
        assert_eq!(engine.get(b"counter"), Ok(Value::Number(2)));

        engine.set(b"counter", Bytes::from("abc"), -1).unwrap();
        assert_eq!(engine.incr(b"counter", 1), Err(StoreError::NotANumber));
    }

    #[test]
    fn test_decr_absent_seeds_minus_one() {
        let mut engine = engine();
        assert_eq!(engine.incr(b"d", -1), Ok(-1));
    }

    #[test]
    fn test_incr_promotes_plain_number() {
        let mut engine = engine();
        engine.set(b"num", Bytes::from("10"), -1).unwrap();
        assert_eq!(engine.meta(b"num", MetaField::Encoding), Ok(0));

        assert_eq!(engine.incr(b"num", 1), Ok(11));
        assert_eq!(engine.meta(b"num", MetaField::Encoding), Ok(2));
        assert_eq!(engine.meta(b"num", MetaField::Size), Ok(8));
        assert_eq!(engine.stats().memory_used, (8 + ITEM_OVERHEAD) as u64);
    }

    #[test]
    fn test_incr_wraps() {
        let mut engine = engine();
        engine.set(b"max", Bytes::from(i64::MAX.to_string()), -1).unwrap();
        assert_eq!(engine.incr(b"max", 1), Ok(i64::MIN));
    }

    #[test]
    fn test_lock_scenario() {
        let mut engine = engine();
        engine.set(b"user:2", Bytes::from("bob"), -1).unwrap();

        assert_eq!(engine.lock(b"user:2", -1), Ok(()));
        assert_eq!(engine.del(b"user:2"), Err(StoreError::Locked));
        assert_eq!(engine.set(b"user:2", Bytes::from("x"), -1), Err(StoreError::Locked));
        assert_eq!(engine.incr(b"user:2", 1), Err(StoreError::Locked));
        assert_eq!(engine.lock(b"user:2", 10), Err(StoreError::Locked));

        assert_eq!(engine.unlock(b"user:2"), Ok(()));
        assert_eq!(engine.del(b"user:2"), Ok(()));
    }

    #[test]
    fn test_timed_lock_lapses() {
        let mut engine = engine();
        engine.set(b"k", Bytes::from("v"), -1).unwrap();
        engine.lock(b"k", 5).unwrap();

        engine.set_now(T0 + 4);
        assert_eq!(engine.del(b"k"), Err(StoreError::Locked));
        engine.set_now(T0 + 5);
        assert_eq!(engine.del(b"k"), Ok(()));
    }

    #[test]
    fn test_lock_overrides_ttl() {
        let mut engine = engine();
        engine.set(b"k", Bytes::from("v"), 2).unwrap();
        engine.lock(b"k", -1).unwrap();

        engine.set_now(T0 + 100);
        assert_eq!(engine.get(b"k"), Ok(plain("v")));

        engine.unlock(b"k").unwrap();
        assert_eq!(engine.get(b"k"), Err(StoreError::NotFound));
    }

    #[test]
    fn test_out_of_memory() {
        let mut engine = StorageEngine::new(StorageConfig {
            max_memory: 1,
            ..Default::default()
        });
        // The first write is admitted, then the budget is exceeded
        assert!(engine.set(b"a", Bytes::from("x"), -1).is_ok());
        assert_eq!(engine.set(b"b", Bytes::from("y"), -1), Err(StoreError::OutOfMemory));
        assert_eq!(engine.mset(b"a", Bytes::from("y")), Err(StoreError::OutOfMemory));
    }

    #[test]
    fn test_compression_transparency() {
        let mut engine = StorageEngine::new(StorageConfig {
            compression_threshold: 64,
            ..Default::default()
        });
        let data = Bytes::from("abcdefgh".repeat(512));
        engine.set(b"big", data.clone(), -1).unwrap();

        assert_eq!(engine.meta(b"big", MetaField::Encoding), Ok(1));
        assert!((engine.meta(b"big", MetaField::Size).unwrap() as usize) < data.len());
        assert_eq!(engine.stats().total_compressed_items, 1);
        assert_eq!(engine.get(b"big"), Ok(Value::Plain(data)));
    }

    #[test]
    fn test_mset_counts_compression_per_stored_item() {
        let mut engine = StorageEngine::new(StorageConfig {
            compression_threshold: 64,
            ..Default::default()
        });
        engine.set(b"m:1", Bytes::from("a"), -1).unwrap();
        engine.set(b"m:2", Bytes::from("b"), -1).unwrap();
        engine.set(b"m:3", Bytes::from("c"), -1).unwrap();
        engine.lock(b"m:2", -1).unwrap();
        assert_eq!(engine.stats().compressions, 0);

        let data = Bytes::from("abcdefgh".repeat(512));
        assert_eq!(engine.mset(b"m:", data.clone()), Ok(2));
        assert_eq!(engine.stats().compressions, 2);
        assert_eq!(engine.stats().total_compressed_items, 2);

        // Nothing rewritten, nothing counted
        engine.lock(b"m:1", -1).unwrap();
        engine.lock(b"m:3", -1).unwrap();
        assert_eq!(engine.mset(b"m:", data), Ok(0));
        assert_eq!(engine.stats().compressions, 2);
    }

    #[test]
    fn test_small_values_not_compressed() {
        let mut engine = StorageEngine::new(StorageConfig {
            compression_threshold: 64,
            ..Default::default()
        });
        engine.set(b"small", Bytes::from("a".repeat(64)), -1).unwrap();
        assert_eq!(engine.meta(b"small", MetaField::Encoding), Ok(0));
    }

    #[test]
    fn test_multi_key_scenario() {
        let mut engine = engine();
        engine.set(b"user:1", Bytes::from("alice"), -1).unwrap();
        engine.set(b"user:2", Bytes::from("bob"), -1).unwrap();

        let mut pairs = engine.mget(b"user:").unwrap();
        pairs.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(
            pairs,
            vec![
                (Bytes::from("user:1"), plain("alice")),
                (Bytes::from("user:2"), plain("bob")),
            ]
        );
        assert_eq!(engine.count(b"user:"), Ok(2));

        engine.del(b"user:1").unwrap();
        assert_eq!(engine.get(b"user:1"), Err(StoreError::NotFound));
        assert_eq!(engine.count(b"user:"), Ok(1));
    }

    #[test]
    fn test_multi_key_not_found() {
        let mut engine = engine();
        assert_eq!(engine.mget(b"nothing"), Err(StoreError::NotFound));
        assert_eq!(engine.mdel(b"nothing"), Err(StoreError::NotFound));
        assert_eq!(engine.count(b"nothing"), Err(StoreError::NotFound));
        assert_eq!(engine.keys(b"nothing"), Err(StoreError::NotFound));
    }

    #[test]
    fn test_mdel_skips_locked() {
        let mut engine = engine();
        for key in ["p:1", "p:2", "p:3"] {
            engine.set(key.as_bytes(), Bytes::from("v"), -1).unwrap();
        }
        engine.lock(b"p:2", -1).unwrap();

        assert_eq!(engine.mdel(b"p:"), Ok(2));
        assert_eq!(engine.keys(b"p:"), Ok(vec![Bytes::from("p:2")]));
    }

    #[test]
    fn test_mset_and_mttl_skip_locked_and_expired() {
        let mut engine = engine();
        engine.set(b"m:1", Bytes::from("a"), -1).unwrap();
        engine.set(b"m:2", Bytes::from("b"), -1).unwrap();
        engine.set(b"m:3", Bytes::from("c"), 1).unwrap();
        engine.lock(b"m:2", -1).unwrap();

        engine.set_now(T0 + 1);
        assert_eq!(engine.mset(b"m:", Bytes::from("z")), Ok(1));
        assert_eq!(engine.get(b"m:1"), Ok(plain("z")));
        assert_eq!(engine.get(b"m:2"), Ok(plain("b")));
        assert_eq!(engine.get(b"m:3"), Err(StoreError::NotFound));

        assert_eq!(engine.mttl(b"m:", 30), Ok(1));
    }

    #[test]
    fn test_mincr_skips_non_numeric() {
        let mut engine = engine();
        engine.set(b"n:1", Bytes::from("1"), -1).unwrap();
        engine.set(b"n:2", Bytes::from("x"), -1).unwrap();
        engine.incr(b"n:3", 5).unwrap();

        assert_eq!(engine.mincr(b"n:", 1), Ok(2));
        assert_eq!(engine.get(b"n:1"), Ok(Value::Number(2)));
        assert_eq!(engine.get(b"n:3"), Ok(Value::Number(6)));
        assert_eq!(engine.mincr(b"n:", -1), Ok(2));
    }

    #[test]
    fn test_mlock_munlock() {
        let mut engine = engine();
        engine.set(b"l:1", Bytes::from("a"), -1).unwrap();
        engine.set(b"l:2", Bytes::from("b"), -1).unwrap();
        engine.lock(b"l:1", -1).unwrap();

        assert_eq!(engine.mlock(b"l:", -1), Ok(1));
        assert_eq!(engine.mdel(b"l:"), Ok(0));
        assert_eq!(engine.munlock(b"l:"), Ok(2));
        assert_eq!(engine.mdel(b"l:"), Ok(2));
    }

    #[test]
    fn test_count_after_expiry_is_zero_not_missing() {
        let mut engine = engine();
        engine.set(b"e:1", Bytes::from("a"), 1).unwrap();
        engine.set_now(T0 + 5);

        // The prefix still resolves, so the reply is a count
        assert_eq!(engine.count(b"e:"), Ok(0));
        assert_eq!(engine.stats().total_items, 0);
    }

    #[test]
    fn test_meta_fields() {
        let mut engine = engine();
        engine.set(b"k", Bytes::from("hello"), 60).unwrap();
        engine.set_now(T0 + 10);
        engine.get(b"k").unwrap();

        assert_eq!(engine.meta(b"k", MetaField::Size), Ok(5));
        assert_eq!(engine.meta(b"k", MetaField::Created), Ok(T0));
        assert_eq!(engine.meta(b"k", MetaField::Access), Ok(T0 + 10));
        assert_eq!(engine.meta(b"k", MetaField::Ttl), Ok(60));
        assert_eq!(engine.meta(b"k", MetaField::Left), Ok(50));
        assert_eq!(engine.meta(b"k", MetaField::Lock), Ok(0));
        assert_eq!(engine.meta(b"missing", MetaField::Size), Err(StoreError::NotFound));

        assert_eq!(MetaField::parse(b"left"), Some(MetaField::Left));
        assert_eq!(MetaField::parse(b"bogus"), None);
    }

    #[test]
    fn test_memory_accounting_never_drifts() {
        let mut engine = StorageEngine::new(StorageConfig {
            compression_threshold: 32,
            ..Default::default()
        });
        engine.set_now(T0);

        for i in 0..50 {
            let key = format!("key:{}", i % 17);
            match i % 5 {
                0 => {
                    engine.set(key.as_bytes(), Bytes::from("x".repeat(i * 7)), -1).unwrap();
                }
                1 => {
                    let _ = engine.del(key.as_bytes());
                }
                2 => {
                    let _ = engine.incr(key.as_bytes(), 3);
                }
                3 => {
                    engine.set(key.as_bytes(), Bytes::from(i.to_string()), 2).unwrap();
                }
                _ => {
                    let _ = engine.mset(b"key:1", Bytes::from("yy"));
                }
            }
            let used = engine.stats().memory_used;
            assert_eq!(used, accounted(&mut engine));
            assert_eq!(engine.stats().total_items as usize, engine.len());
        }
    }

    #[test]
    fn test_parse_arg() {
        assert_eq!(parse_arg(b"-1"), Ok(-1));
        assert_eq!(parse_arg(b"ten"), Err(StoreError::NotANumber));
    }
}
