//! Build-time scheduler configuration.
//!
//! All limits are fixed at compile time so the hot path indexes plain arrays
//! and bitmasks instead of chasing growable structures.

/// Number of scheduling priority levels. Lower value means higher priority.
pub const NUM_PRIO: usize = 8;

/// Fan-out buckets per priority level. Producers hash into a bucket so that
/// many queues sharing a priority do not contend on a single lane.
pub const QUEUES_PER_PRIO: usize = 4;

/// Maximum events moved into the thread-local cache per dispatch.
pub const MAX_DEQ: usize = 4;

/// Maximum producer queues registered at once.
pub const MAX_QUEUES: usize = 1024;

/// Maximum packet-input interfaces registered at once.
pub const MAX_PKTIOS: usize = 64;

/// Command records available: one per scheduled queue and packet interface.
pub const NUM_SCHED_CMD: usize = MAX_QUEUES + MAX_PKTIOS;

/// Ordered locks per ordered queue.
pub const MAX_ORDERED_LOCKS: usize = 2;

/// Scheduling group table size, built-in groups included.
pub const MAX_SCHED_GROUPS: usize = 16;

/// Group names longer than this are truncated.
pub const GROUP_NAME_LEN: usize = 32;

/// Worker and control threads the scheduler can serve at once.
pub const MAX_THREADS: usize = 128;

// The per-priority bucket mask is a u8 and the thread mask a u128.
const _: () = assert!(QUEUES_PER_PRIO <= 8, "bucket mask is too small");
const _: () = assert!(MAX_THREADS <= 128, "thread mask is too small");
const _: () = assert!(QUEUES_PER_PRIO.is_power_of_two());
