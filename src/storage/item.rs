//! Cache Items
//!
//! An [`Item`] is what a trie slot owns: the stored value plus the
//! bookkeeping that drives expiration, locking and memory accounting.
//!
//! ## Timestamps
//!
//! All times are whole seconds since the Unix epoch, taken from the engine
//! clock rather than the wall clock so sweeps and requests handled in the
//! same tick agree on "now".
//!
//! - `created_at`: when the item was stored
//! - `touched_at`: reference point for both TTL and lock windows; reset by
//!   TTL and LOCK
//! - `last_access`: last read or write, used by memory-pressure eviction

use crate::protocol::{parse_int, Encoding};
use bytes::Bytes;

/// Lock value meaning "locked until explicitly unlocked".
pub const LOCK_PERMANENT: i64 = -1;

/// Payload of an item, tagged with how it is stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// Raw bytes as sent by the client
    Plain(Bytes),
    /// Compressed form of a value larger than the compression threshold
    Compressed(Bytes),
    /// Unboxed integer, produced by INC/DEC
    Number(i64),
}

impl Value {
    /// Wire encoding tag for this value.
    pub fn encoding(&self) -> Encoding {
        match self {
            Value::Plain(_) => Encoding::Plain,
            Value::Compressed(_) => Encoding::Compressed,
            Value::Number(_) => Encoding::Number,
        }
    }

    /// Number of bytes this value accounts for.
    pub fn size(&self) -> usize {
        match self {
            Value::Plain(data) | Value::Compressed(data) => data.len(),
            Value::Number(_) => std::mem::size_of::<i64>(),
        }
    }

    /// Interprets the value as an integer, the way INC/DEC see it.
    ///
    /// A plain value qualifies only if all of its bytes form a decimal integer.
    pub fn as_number(&self) -> Option<i64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Plain(data) => parse_int(data),
            Value::Compressed(_) => None,
        }
    }
}

/// A stored cache entry.
#[derive(Debug, Clone)]
pub struct Item {
    /// The stored payload
    pub value: Value,
    /// When the item was created
    pub created_at: i64,
    /// Reference time for TTL and lock windows
    pub touched_at: i64,
    /// Last time a request read or modified the item
    pub last_access: i64,
    /// Seconds to live; `<= 0` never expires
    pub ttl: i64,
    /// 0 = unlocked, [`LOCK_PERMANENT`] = locked, `> 0` = locked for that many seconds
    pub lock: i64,
}

/// Fixed bookkeeping cost charged per item on top of its payload size.
pub const ITEM_OVERHEAD: usize = std::mem::size_of::<Item>();

impl Item {
    /// Creates an item stamped at `now`.
    pub fn new(value: Value, ttl: i64, now: i64) -> Self {
        Self {
            value,
            created_at: now,
            touched_at: now,
            last_access: now,
            ttl,
            lock: 0,
        }
    }

    /// Logical size of the payload.
    #[inline]
    pub fn size(&self) -> usize {
        self.value.size()
    }

    /// Bytes this item contributes to the memory-used counter.
    #[inline]
    pub fn footprint(&self) -> usize {
        self.size() + ITEM_OVERHEAD
    }

    #[inline]
    pub fn encoding(&self) -> Encoding {
        self.value.encoding()
    }

    /// Whether writes and deletes are currently refused.
    pub fn is_locked(&self, now: i64) -> bool {
        self.lock == LOCK_PERMANENT || (self.lock > 0 && now - self.touched_at < self.lock)
    }

    /// Whether the TTL has lapsed. Locking is not taken into account.
    pub fn ttl_elapsed(&self, now: i64) -> bool {
        self.ttl > 0 && now - self.touched_at >= self.ttl
    }

    /// An item expires once its TTL has lapsed, unless it is locked.
    pub fn is_expired(&self, now: i64) -> bool {
        self.ttl_elapsed(now) && !self.is_locked(now)
    }

    /// Seconds until the TTL lapses, or -1 if the item never expires.
    pub fn ttl_left(&self, now: i64) -> i64 {
        if self.ttl <= 0 {
            -1
        } else {
            (self.ttl - (now - self.touched_at)).max(0)
        }
    }

    /// Records a read or write at `now`.
    #[inline]
    pub fn touch(&mut self, now: i64) {
        self.last_access = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain(s: &str) -> Value {
        Value::Plain(Bytes::copy_from_slice(s.as_bytes()))
    }

    #[test]
    fn test_value_encoding_and_size() {
        assert_eq!(plain("hello").encoding(), Encoding::Plain);
        assert_eq!(plain("hello").size(), 5);
        assert_eq!(Value::Number(42).encoding(), Encoding::Number);
        assert_eq!(Value::Number(42).size(), 8);
        assert_eq!(
            Value::Compressed(Bytes::from_static(b"abc")).encoding(),
            Encoding::Compressed
        );
    }

    #[test]
    fn test_as_number() {
        assert_eq!(plain("123").as_number(), Some(123));
        assert_eq!(plain("-7").as_number(), Some(-7));
        assert_eq!(plain("12a").as_number(), None);
        assert_eq!(plain("").as_number(), None);
        assert_eq!(plain(" 1").as_number(), None);
        assert_eq!(Value::Number(9).as_number(), Some(9));
    }

    #[test]
    fn test_ttl_boundary() {
        let item = Item::new(plain("v"), 10, 1000);
        assert!(!item.is_expired(1009));
        assert!(item.is_expired(1010));
        assert!(item.is_expired(5000));
        assert_eq!(item.ttl_left(1004), 6);
        assert_eq!(item.ttl_left(2000), 0);
    }

    #[test]
    fn test_no_ttl_never_expires() {
        let mut item = Item::new(plain("v"), -1, 0);
        assert!(!item.is_expired(i64::MAX / 2));
        assert_eq!(item.ttl_left(100), -1);

        item.ttl = 0;
        assert!(!item.is_expired(i64::MAX / 2));
    }

    #[test]
    fn test_lock_windows() {
        let mut item = Item::new(plain("v"), -1, 100);
        assert!(!item.is_locked(100));

        item.lock = 5;
        assert!(item.is_locked(104));
        assert!(!item.is_locked(105));

        item.lock = LOCK_PERMANENT;
        assert!(item.is_locked(1_000_000));
    }

    #[test]
    fn test_lock_suppresses_expiry() {
        let mut item = Item::new(plain("v"), 2, 0);
        item.lock = LOCK_PERMANENT;
        assert!(item.ttl_elapsed(10));
        assert!(!item.is_expired(10));

        item.lock = 0;
        assert!(item.is_expired(10));
    }
}
