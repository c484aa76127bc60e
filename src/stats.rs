//! Rebalance traffic counters.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, Ordering};

/// Live counters, updated by send callbacks and the receive path.
#[derive(Debug, Default)]
pub struct RebStats {
    pub tx_reb_count: AtomicI64,
    pub tx_reb_size: AtomicI64,
    pub rx_reb_count: AtomicI64,
    pub rx_reb_size: AtomicI64,
    pub retransmits: AtomicI64,
}

impl RebStats {
    pub fn add_tx(&self, size: i64) {
        self.tx_reb_count.fetch_add(1, Ordering::Relaxed);
        self.tx_reb_size.fetch_add(size, Ordering::Relaxed);
    }

    pub fn add_rx(&self, size: i64) {
        self.rx_reb_count.fetch_add(1, Ordering::Relaxed);
        self.rx_reb_size.fetch_add(size, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RebStatsSnapshot {
        RebStatsSnapshot {
            tx_reb_count: self.tx_reb_count.load(Ordering::Relaxed),
            tx_reb_size: self.tx_reb_size.load(Ordering::Relaxed),
            rx_reb_count: self.rx_reb_count.load(Ordering::Relaxed),
            rx_reb_size: self.rx_reb_size.load(Ordering::Relaxed),
            retransmits: self.retransmits.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebStatsSnapshot {
    pub tx_reb_count: i64,
    pub tx_reb_size: i64,
    pub rx_reb_count: i64,
    pub rx_reb_size: i64,
    pub retransmits: i64,
}

impl RebStatsSnapshot {
    /// Per-run delta relative to the counters captured at run begin.
    pub fn delta(&self, begin: &RebStatsSnapshot) -> RebStatsSnapshot {
        RebStatsSnapshot {
            tx_reb_count: self.tx_reb_count - begin.tx_reb_count,
            tx_reb_size: self.tx_reb_size - begin.tx_reb_size,
            rx_reb_count: self.rx_reb_count - begin.rx_reb_count,
            rx_reb_size: self.rx_reb_size - begin.rx_reb_size,
            retransmits: self.retransmits - begin.retransmits,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delta() {
        let stats = RebStats::default();
        stats.add_tx(100);
        let begin = stats.snapshot();
        stats.add_tx(50);
        stats.add_rx(70);
        let delta = stats.snapshot().delta(&begin);
        assert_eq!(delta.tx_reb_count, 1);
        assert_eq!(delta.tx_reb_size, 50);
        assert_eq!(delta.rx_reb_count, 1);
        assert_eq!(delta.rx_reb_size, 70);
    }
}
