//! Scheduler-wide dispatch statistics.
//!
//! Counters are updated with relaxed atomics on the hot path and read as a
//! consistent-enough snapshot for reporting.

use crate::config::NUM_PRIO;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub(crate) struct StatsCounters {
    dispatched: [AtomicU64; NUM_PRIO],
    empty_rounds: AtomicU64,
    pktin_polls: AtomicU64,
}

impl StatsCounters {
    pub fn record_dispatch(&self, prio: usize, events: usize) {
        self.dispatched[prio].fetch_add(events as u64, Ordering::Relaxed);
    }

    pub fn record_empty_round(&self) {
        self.empty_rounds.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_pktin_poll(&self) {
        self.pktin_polls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> SchedStats {
        SchedStats {
            dispatched: std::array::from_fn(|p| self.dispatched[p].load(Ordering::Relaxed)),
            empty_rounds: self.empty_rounds.load(Ordering::Relaxed),
            pktin_polls: self.pktin_polls.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time scheduler counters.
#[derive(Debug, Clone, Serialize)]
pub struct SchedStats {
    /// Events dispatched per priority level.
    pub dispatched: [u64; NUM_PRIO],
    /// Dispatch rounds that found no work.
    pub empty_rounds: u64,
    /// Packet-input poll commands serviced.
    pub pktin_polls: u64,
}

impl SchedStats {
    pub fn total_dispatched(&self) -> u64 {
        self.dispatched.iter().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_counters() {
        let counters = StatsCounters::default();
        counters.record_dispatch(1, 3);
        counters.record_dispatch(1, 2);
        counters.record_empty_round();
        let snap = counters.snapshot();
        assert_eq!(snap.dispatched[1], 5);
        assert_eq!(snap.total_dispatched(), 5);
        assert_eq!(snap.empty_rounds, 1);
    }
}
