//! Maintenance Sweeps
//!
//! Full-tree passes the server runs from its timers. Lazy expiry (on
//! access) alone would leave items nobody reads again in memory forever;
//! these sweeps reclaim them.
//!
//! ## Sweeps
//!
//! - **Expiration**: destroys every item whose TTL lapsed and which is not locked.
//! - **Memory pressure**: only while memory used exceeds the budget, destroys
//!   unlocked items not accessed for at least `gc_ratio` seconds, stopping as
//!   soon as usage is back under the budget.
//! - **Teardown**: destroys everything, used at shutdown.
//!
//! Every destruction goes through `ServerStats::item_destroyed`, so the
//! counters stay exact whichever path removes an item.

use crate::storage::engine::StorageEngine;
use crate::storage::trie::ROOT;
use tracing::{debug, info, trace};

/// Outcome of a single sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Items inspected
    pub scanned: usize,
    /// Items destroyed
    pub freed: usize,
}

impl StorageEngine {
    /// Destroys every unlocked item whose TTL has lapsed.
    pub fn expire_sweep(&mut self) -> SweepReport {
        let now = self.now();
        let mut report = SweepReport::default();
        let (trie, stats) = self.parts_mut();

        trie.recurse(ROOT, |_, slot| {
            let Some(item) = slot.as_ref() else { return };
            report.scanned += 1;
            if item.is_expired(now) {
                if let Some(item) = slot.take() {
                    stats.item_destroyed(&item);
                    report.freed += 1;
                }
            }
        });

        if report.freed > 0 {
            debug!(
                scanned = report.scanned,
                freed = report.freed,
                items_remaining = self.len(),
                "Expired items cleaned up"
            );
        } else {
            trace!(scanned = report.scanned, "Expiration sweep found nothing");
        }

        report
    }

    /// Evicts stale, unlocked items while memory used exceeds the budget.
    pub fn memory_sweep(&mut self) -> SweepReport {
        let mut report = SweepReport::default();
        if !self.is_over_memory() {
            return report;
        }

        let now = self.now();
        let max_memory = self.config().max_memory;
        let gc_ratio = self.config().gc_ratio;
        let before = self.stats().memory_used;
        let (trie, stats) = self.parts_mut();

        trie.recurse(ROOT, |_, slot| {
            if stats.memory_used <= max_memory {
                return;
            }
            let Some(item) = slot.as_ref() else { return };
            report.scanned += 1;
            if item.is_locked(now) {
                return;
            }
            if item.is_expired(now) || now - item.last_access >= gc_ratio {
                if let Some(item) = slot.take() {
                    stats.item_destroyed(&item);
                    report.freed += 1;
                }
            }
        });

        info!(
            freed = report.freed,
            reclaimed = before.saturating_sub(self.stats().memory_used),
            memory_used = self.stats().memory_used,
            max_memory = max_memory,
            "Memory pressure sweep finished"
        );

        report
    }

    /// Destroys every item and resets the index.
    pub fn destroy_all(&mut self) -> usize {
        let (trie, stats) = self.parts_mut();
        let mut freed = 0;

        trie.recurse(ROOT, |_, slot| {
            if let Some(item) = slot.take() {
                stats.item_destroyed(&item);
                freed += 1;
            }
        });
        trie.clear();

        debug!(freed = freed, "All items destroyed");
        freed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::engine::StorageConfig;
    use bytes::Bytes;

    const T0: i64 = 1_700_000_000;

    fn engine_with(config: StorageConfig) -> StorageEngine {
        let mut engine = StorageEngine::new(config);
        engine.set_now(T0);
        engine
    }

    #[test]
    fn test_sweep_cleans_expired_keys() {
        let mut engine = engine_with(StorageConfig::default());

        for i in 0..10 {
            engine
                .set(format!("key{}", i).as_bytes(), Bytes::from("value"), 5)
                .unwrap();
        }
        engine.set(b"persistent", Bytes::from("value"), -1).unwrap();
        assert_eq!(engine.len(), 11);

        engine.set_now(T0 + 4);
        assert_eq!(engine.expire_sweep().freed, 0);

        engine.set_now(T0 + 5);
        let report = engine.expire_sweep();
        assert_eq!(report.scanned, 11);
        assert_eq!(report.freed, 10);
        assert_eq!(engine.len(), 1);
        assert_eq!(engine.stats().total_items, 1);
        assert!(engine.get(b"persistent").is_ok());
    }

    #[test]
    fn test_sweep_spares_locked_items() {
        let mut engine = engine_with(StorageConfig::default());
        engine.set(b"locked", Bytes::from("v"), 1).unwrap();
        engine.lock(b"locked", -1).unwrap();

        engine.set_now(T0 + 100);
        assert_eq!(engine.expire_sweep().freed, 0);

        engine.unlock(b"locked").unwrap();
        assert_eq!(engine.expire_sweep().freed, 1);
        assert!(engine.is_empty());
    }

    #[test]
    fn test_memory_sweep_noop_under_budget() {
        let mut engine = engine_with(StorageConfig::default());
        engine.set(b"k", Bytes::from("v"), -1).unwrap();
        engine.set_now(T0 + 1_000_000);
        assert_eq!(engine.memory_sweep(), SweepReport::default());
        assert_eq!(engine.len(), 1);
    }

    #[test]
    fn test_memory_sweep_evicts_stale_until_under_budget() {
        let mut engine = engine_with(StorageConfig {
            max_memory: u64::MAX,
            gc_ratio: 60,
            ..Default::default()
        });

        for i in 0..10 {
            engine
                .set(format!("old:{}", i).as_bytes(), Bytes::from("x".repeat(100)), -1)
                .unwrap();
        }
        engine.set(b"pinned", Bytes::from("x".repeat(100)), -1).unwrap();
        engine.lock(b"pinned", -1).unwrap();

        engine.set_now(T0 + 120);
        engine.set(b"fresh", Bytes::from("x".repeat(100)), -1).unwrap();

        // Shrink the budget so that roughly half the items must go
        let per_item = engine.stats().memory_used / engine.len() as u64;
        let budget = per_item * 6;
        engine.config_mut().max_memory = budget;

        let report = engine.memory_sweep();
        assert!(report.freed > 0);
        assert!(engine.stats().memory_used <= budget);
        assert!(engine.get(b"pinned").is_ok());
        assert!(engine.get(b"fresh").is_ok());
    }

    #[test]
    fn test_destroy_all_resets_counters() {
        let mut engine = engine_with(StorageConfig::default());
        engine.set(b"a", Bytes::from("1"), -1).unwrap();
        engine.set(b"b", Bytes::from("2"), 10).unwrap();
        engine.incr(b"c", 1).unwrap();
        engine.lock(b"a", -1).unwrap();

        assert_eq!(engine.destroy_all(), 3);
        assert!(engine.is_empty());
        assert_eq!(engine.stats().total_items, 0);
        assert_eq!(engine.stats().memory_used, 0);
    }
}
