//! Server-wide counters
//!
//! Item counters and memory accounting are only ever changed through
//! [`ServerStats::item_created`], [`ServerStats::item_destroyed`] and
//! [`ServerStats::item_resized`], which keeps `memory_used` equal to the sum
//! of every live item's footprint.

use crate::memory::MemorySample;
use crate::storage::item::Item;

#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    /// Process start, seconds since epoch
    pub started: i64,
    /// First insertion ever, 0 if none
    pub first_item_seen: i64,
    /// Most recent insertion, 0 if none
    pub last_item_seen: i64,

    pub total_items: u64,
    pub total_compressed_items: u64,
    /// Currently connected clients
    pub total_clients: u64,
    pub total_cron_done: u64,
    pub total_connections: u64,
    pub total_requests: u64,

    /// Σ(item size + overhead) over live items
    pub memory_used: u64,
    pub memory_peak: u64,

    /// Number of values stored compressed since start
    pub compressions: u64,
    /// Sum of per-value compression ratios, in percent saved
    pub compression_saved_pct: f64,

    /// Last OS memory sample, refreshed by the memory timer
    pub os_memory: MemorySample,
}

impl ServerStats {
    pub fn new(started: i64) -> Self {
        Self {
            started,
            ..Default::default()
        }
    }

    /// Accounts for a freshly created item.
    pub fn item_created(&mut self, item: &Item, now: i64) {
        self.total_items += 1;
        if item.encoding().is_compressed() {
            self.total_compressed_items += 1;
        }

        self.memory_used += item.footprint() as u64;
        self.memory_peak = self.memory_peak.max(self.memory_used);

        if self.first_item_seen == 0 {
            self.first_item_seen = now;
        }
        self.last_item_seen = now;
    }

    /// Reverses [`ServerStats::item_created`].
    pub fn item_destroyed(&mut self, item: &Item) {
        self.total_items = self.total_items.saturating_sub(1);
        if item.encoding().is_compressed() {
            self.total_compressed_items = self.total_compressed_items.saturating_sub(1);
        }
        self.memory_used = self.memory_used.saturating_sub(item.footprint() as u64);
    }

    /// Adjusts memory for an item whose payload changed size in place.
    pub fn item_resized(&mut self, old_size: usize, new_size: usize) {
        self.memory_used = (self.memory_used + new_size as u64).saturating_sub(old_size as u64);
        self.memory_peak = self.memory_peak.max(self.memory_used);
    }

    /// Records one successful compression.
    pub fn compressed(&mut self, original: usize, stored: usize) {
        if original == 0 {
            return;
        }
        let saved = 100.0 * (1.0 - stored as f64 / original as f64);
        self.compressions += 1;
        self.compression_saved_pct += saved;
    }

    /// Process RSS over accounted item memory, 0 when either is unknown.
    pub fn memory_fragmentation(&self) -> f64 {
        if self.os_memory.resident == 0 || self.memory_used == 0 {
            0.0
        } else {
            self.os_memory.resident as f64 / self.memory_used as f64
        }
    }

    /// Mean stored item size, overhead included.
    pub fn item_size_avg(&self) -> f64 {
        if self.total_items == 0 {
            0.0
        } else {
            self.memory_used as f64 / self.total_items as f64
        }
    }

    /// Mean percentage saved by compression.
    pub fn compr_rate_avg(&self) -> f64 {
        if self.compressions == 0 {
            0.0
        } else {
            self.compression_saved_pct / self.compressions as f64
        }
    }

    pub fn reqs_per_client_avg(&self) -> f64 {
        if self.total_connections == 0 {
            0.0
        } else {
            self.total_requests as f64 / self.total_connections as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::item::{Value, ITEM_OVERHEAD};
    use bytes::Bytes;

    #[test]
    fn test_create_destroy_balances() {
        let mut stats = ServerStats::new(100);
        let a = Item::new(Value::Plain(Bytes::from_static(b"hello")), -1, 100);
        let b = Item::new(Value::Compressed(Bytes::from_static(b"xyz")), -1, 105);

        stats.item_created(&a, 100);
        stats.item_created(&b, 105);
        assert_eq!(stats.total_items, 2);
        assert_eq!(stats.total_compressed_items, 1);
        assert_eq!(
            stats.memory_used,
            (5 + 3 + 2 * ITEM_OVERHEAD) as u64
        );
        assert_eq!(stats.first_item_seen, 100);
        assert_eq!(stats.last_item_seen, 105);

        stats.item_destroyed(&a);
        stats.item_destroyed(&b);
        assert_eq!(stats.total_items, 0);
        assert_eq!(stats.total_compressed_items, 0);
        assert_eq!(stats.memory_used, 0);
        assert_eq!(stats.memory_peak, (8 + 2 * ITEM_OVERHEAD) as u64);
    }

    #[test]
    fn test_resize() {
        let mut stats = ServerStats::new(0);
        let item = Item::new(Value::Plain(Bytes::from_static(b"12345678901")), -1, 0);
        stats.item_created(&item, 0);

        stats.item_resized(11, 8);
        assert_eq!(stats.memory_used, (8 + ITEM_OVERHEAD) as u64);
    }

    #[test]
    fn test_averages() {
        let mut stats = ServerStats::new(0);
        assert_eq!(stats.item_size_avg(), 0.0);
        assert_eq!(stats.compr_rate_avg(), 0.0);

        stats.compressed(100, 25);
        stats.compressed(100, 75);
        assert!((stats.compr_rate_avg() - 50.0).abs() < f64::EPSILON);

        stats.total_connections = 4;
        stats.total_requests = 10;
        assert!((stats.reqs_per_client_avg() - 2.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_memory_fragmentation() {
        let mut stats = ServerStats::new(0);
        assert_eq!(stats.memory_fragmentation(), 0.0);

        stats.memory_used = 1000;
        assert_eq!(stats.memory_fragmentation(), 0.0);

        stats.os_memory = MemorySample {
            available: 1 << 30,
            resident: 2500,
        };
        assert!((stats.memory_fragmentation() - 2.5).abs() < f64::EPSILON);
    }
}
