//! Pull-mode event scheduler for user-space data-plane runtimes.
//!
//! Events from many producer queues and packet-input pollers are multiplexed
//! across a fixed set of worker threads, honoring per-queue synchronization
//! contracts (parallel / atomic / ordered), priority, and thread-group
//! affinity. Every worker, in a tight loop, asks the scheduler for the next
//! batch of events and the queue they came from, processes them, then asks
//! again.

pub mod buffer_pool;
pub mod config;
pub mod error;
pub mod event;
mod fanout;
pub mod group;
pub mod pktio;
pub mod queue;
pub mod sched;
pub mod stats;
pub mod threading;
pub mod thrmask;

pub use error::SchedError;
pub use event::Event;
pub use group::GroupId;
pub use pktio::{ChannelInput, PktInput};
pub use queue::{QueueParam, SchedQueue, SyncMode};
pub use sched::{wait_time, SchedThread, Scheduler, Wait};
pub use stats::SchedStats;
pub use threading::ThreadKind;
pub use thrmask::ThreadMask;
