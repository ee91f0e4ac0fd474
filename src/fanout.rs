//! Priority fan-out table carrying schedule command records.
//!
//! The table is a `NUM_PRIO x QUEUES_PER_PRIO` grid of MPMC lanes. Each lane
//! carries command records; a per-priority bitmask records which buckets have
//! registered producers so the dispatch walk can skip empty priority bands in
//! constant time without taking the mask lock.

use crate::config::{NUM_PRIO, NUM_SCHED_CMD, QUEUES_PER_PRIO};
use crate::error::SchedError;
use crate::pktio::PktioEntry;
use crate::queue::SchedQueue;
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

/// Command record cycled through the fan-out lanes.
#[derive(Clone)]
pub(crate) enum SchedCmd {
    /// Pull events from a producer queue.
    Dequeue { queue: Arc<SchedQueue> },
    /// Poll a packet-input interface.
    PollPktin { pktio: Arc<PktioEntry> },
}

/// Position of a lane in the fan-out grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct LaneRef {
    pub prio: usize,
    pub bucket: usize,
}

struct Lane {
    tx: Sender<SchedCmd>,
    rx: Receiver<SchedCmd>,
}

pub(crate) struct FanoutTable {
    lanes: Vec<Vec<Lane>>,
    /// Bit `b` set iff at least one producer is registered at `(prio, b)`.
    /// Read lock-free by the dispatch walk; written under the mask lock.
    masks: [AtomicU8; NUM_PRIO],
    /// Registration counts behind the masks.
    counts: Mutex<[[u32; QUEUES_PER_PRIO]; NUM_PRIO]>,
    /// Command records still available for new registrations.
    budget: AtomicUsize,
}

impl FanoutTable {
    pub fn new() -> FanoutTable {
        let lanes = (0..NUM_PRIO)
            .map(|_| {
                (0..QUEUES_PER_PRIO)
                    .map(|_| {
                        let (tx, rx) = unbounded();
                        Lane { tx, rx }
                    })
                    .collect()
            })
            .collect();
        FanoutTable {
            lanes,
            masks: std::array::from_fn(|_| AtomicU8::new(0)),
            counts: Mutex::new([[0; QUEUES_PER_PRIO]; NUM_PRIO]),
            budget: AtomicUsize::new(NUM_SCHED_CMD),
        }
    }

    /// Bucket a producer hashes into, from the low bits of its stable id.
    pub fn bucket_of(id: usize) -> usize {
        id & (QUEUES_PER_PRIO - 1)
    }

    /// Claim a command record for a new registration.
    pub fn claim_cmd(&self) -> Result<(), SchedError> {
        self.budget
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .map(|_| ())
            .map_err(|_| SchedError::CmdPoolExhausted)
    }

    /// Return a command record after its registration ends.
    pub fn release_cmd(&self) {
        let prev = self.budget.fetch_add(1, Ordering::AcqRel);
        debug_assert!(prev < NUM_SCHED_CMD);
    }

    /// Register a producer at `(prio, bucket_of(id))` and hand back its lane.
    pub fn register(&self, id: usize, prio: usize) -> LaneRef {
        let bucket = Self::bucket_of(id);
        let mut counts = self.counts.lock();
        counts[prio][bucket] += 1;
        self.masks[prio].fetch_or(1 << bucket, Ordering::Relaxed);
        LaneRef { prio, bucket }
    }

    /// Drop a registration; the mask bit clears when the last one goes.
    pub fn unregister(&self, id: usize, prio: usize) {
        let bucket = Self::bucket_of(id);
        let mut counts = self.counts.lock();
        counts[prio][bucket] -= 1;
        if counts[prio][bucket] == 0 {
            self.masks[prio].fetch_and(!(1u8 << bucket), Ordering::Relaxed);
        }
    }

    pub fn mask(&self, prio: usize) -> u8 {
        self.masks[prio].load(Ordering::Relaxed)
    }

    /// Enqueue a command into a lane. Lanes live as long as the table, so a
    /// closed lane is an internal inconsistency, not a runtime condition.
    pub fn send(&self, lane: LaneRef, cmd: SchedCmd) {
        self.lanes[lane.prio][lane.bucket]
            .tx
            .send(cmd)
            .expect("fan-out lane closed");
    }

    pub fn try_recv(&self, lane: LaneRef) -> Option<SchedCmd> {
        self.lanes[lane.prio][lane.bucket].rx.try_recv().ok()
    }
}
