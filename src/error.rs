//! Error types reported at the public scheduler boundary.

use thiserror::Error;

/// Recoverable scheduler failures.
///
/// Invariant violations that would silently corrupt ordering are not errors;
/// they are enforced with assertions on the hot path.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SchedError {
    /// Every command record is attached to a live registration. Raise
    /// `MAX_QUEUES` / `MAX_PKTIOS` or destroy an existing producer.
    #[error("command record pool exhausted")]
    CmdPoolExhausted,

    /// All thread slots are claimed.
    #[error("no free scheduler thread slot")]
    TooManyThreads,

    /// Priority outside `[0, NUM_PRIO)`.
    #[error("invalid priority level")]
    InvalidPriority,

    /// An ordered queue declared more locks than `MAX_ORDERED_LOCKS`.
    #[error("too many ordered locks")]
    TooManyOrderedLocks,

    /// Group id outside the named range, or the slot is unoccupied.
    #[error("invalid scheduling group")]
    InvalidGroup,

    /// No free slot for another named group.
    #[error("scheduling group table is full")]
    GroupTableFull,

    /// Enqueue refused because the queue was destroyed.
    #[error("queue has been destroyed")]
    QueueDestroyed,

    /// Thread teardown refused: the local context still holds cached events.
    #[error("thread-local scheduling context is not empty")]
    LocalContextBusy,
}
