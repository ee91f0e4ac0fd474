//! Producer queues drained by the scheduler.
//!
//! Each queue carries its synchronization contract (parallel / atomic /
//! ordered), a priority, and a thread-group binding. The scheduling status of
//! its command record is tracked under the queue lock: an enqueue into an
//! empty queue re-arms the command, an empty dequeue disarms it, so a wakeup
//! can never be lost between the two.
//!
//! Ordered queues additionally stamp every enqueued event with an order
//! number and per-lock sync values, and own the resolution machinery that
//! retires those orders in source sequence once consumers release them.

use crate::config::{MAX_ORDERED_LOCKS, NUM_PRIO};
use crate::error::SchedError;
use crate::event::Event;
use crate::fanout::LaneRef;
use crate::group::GroupId;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Synchronization contract of a producer queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncMode {
    /// Unrestricted parallel dispatch.
    #[default]
    Parallel,
    /// At most one thread processes the queue's events at a time.
    Atomic,
    /// Parallel dispatch, one event per scheduler round, with sequence
    /// numbers for downstream serialization.
    Ordered,
}

/// Producer queue creation parameters.
#[derive(Debug, Clone)]
pub struct QueueParam {
    /// Priority level in `[0, NUM_PRIO)`; lower is higher priority.
    pub prio: usize,
    pub sync: SyncMode,
    /// Threads outside this group never consume from the queue.
    pub group: GroupId,
    /// Ordered locks declared by the queue; meaningful only for `Ordered`.
    pub lock_count: usize,
}

impl Default for QueueParam {
    fn default() -> QueueParam {
        QueueParam {
            prio: NUM_PRIO / 2,
            sync: SyncMode::Parallel,
            group: GroupId::ALL,
            lock_count: 0,
        }
    }
}

/// Scheduling status of the queue's command record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QueueState {
    /// Command parked on the queue entry; the next enqueue re-arms it.
    NotScheduled,
    /// Command circulating in a fan-out lane or held by a worker.
    Scheduled,
    /// Destroy requested; the next dispatch finalizes the queue.
    Destroyed,
    /// Finalized and unregistered.
    Free,
}

struct Fifo {
    events: VecDeque<Event>,
    state: QueueState,
    /// Next order / per-lock sync stamp; advances once per enqueued event.
    next_stamp: u64,
}

/// Ordered resolution state. Its lock is taken before any queue lock and
/// never the other way around.
#[derive(Default)]
struct OrderState {
    /// Next order number to resolve.
    order_out: u64,
    /// Orders released out of turn, waiting on their predecessors.
    resolved_ahead: BTreeSet<u64>,
    /// Events forwarded under an unresolved ordered context, delivered to
    /// their destinations in source order when the order resolves.
    stash: BTreeMap<u64, Vec<(Arc<SchedQueue>, Event)>>,
}

/// Outcome of a dispatch-side batch dequeue.
pub(crate) enum Dequeued {
    /// Queue destroyed; the caller finalizes it and drops the command.
    Destroyed,
    /// Queue empty; its command was disarmed under the queue lock.
    Empty,
    Batch(Vec<Event>),
}

/// An application-facing FIFO of events registered with the scheduler.
pub struct SchedQueue {
    name: String,
    id: usize,
    param: QueueParam,
    pub(crate) lane: LaneRef,
    fifo: Mutex<Fifo>,
    order: Mutex<OrderState>,
    /// Per-lock sequence gates; advanced by `order_unlock` and by order
    /// resolution for events that never took the lock.
    sync_out: [AtomicU64; MAX_ORDERED_LOCKS],
}

impl SchedQueue {
    pub(crate) fn new(name: &str, id: usize, param: QueueParam, lane: LaneRef) -> Arc<SchedQueue> {
        debug_assert!(param.prio < NUM_PRIO);
        debug_assert!(param.lock_count <= MAX_ORDERED_LOCKS);
        Arc::new(SchedQueue {
            name: name.to_string(),
            id,
            param,
            lane,
            fifo: Mutex::new(Fifo {
                events: VecDeque::new(),
                state: QueueState::NotScheduled,
                next_stamp: 0,
            }),
            order: Mutex::new(OrderState::default()),
            sync_out: std::array::from_fn(|_| AtomicU64::new(0)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn id(&self) -> usize {
        self.id
    }

    pub fn prio(&self) -> usize {
        self.param.prio
    }

    pub fn sync_mode(&self) -> SyncMode {
        self.param.sync
    }

    pub fn group(&self) -> GroupId {
        self.param.group
    }

    pub fn lock_count(&self) -> usize {
        self.param.lock_count
    }

    /// Events currently waiting in the queue.
    pub fn pending(&self) -> usize {
        self.fifo.lock().events.len()
    }

    pub(crate) fn sync_gate(&self, lock_index: usize) -> &AtomicU64 {
        &self.sync_out[lock_index]
    }

    /// Append an event, stamping ordered metadata at the source. Returns
    /// whether the queue's command must be re-armed (empty transition).
    pub(crate) fn enqueue_direct(&self, mut ev: Event) -> Result<bool, SchedError> {
        let mut fifo = self.fifo.lock();
        match fifo.state {
            QueueState::Destroyed | QueueState::Free => return Err(SchedError::QueueDestroyed),
            QueueState::NotScheduled | QueueState::Scheduled => {}
        }
        if self.param.sync == SyncMode::Ordered {
            ev.ord.order = fifo.next_stamp;
            ev.ord.sync = [fifo.next_stamp; MAX_ORDERED_LOCKS];
            fifo.next_stamp += 1;
        }
        fifo.events.push_back(ev);
        if fifo.state == QueueState::NotScheduled {
            fifo.state = QueueState::Scheduled;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Dispatch-side dequeue of up to `max` events.
    pub(crate) fn deq_batch(&self, max: usize) -> Dequeued {
        let mut fifo = self.fifo.lock();
        match fifo.state {
            QueueState::Destroyed | QueueState::Free => return Dequeued::Destroyed,
            QueueState::NotScheduled | QueueState::Scheduled => {}
        }
        if fifo.events.is_empty() {
            fifo.state = QueueState::NotScheduled;
            return Dequeued::Empty;
        }
        let n = max.min(fifo.events.len());
        Dequeued::Batch(fifo.events.drain(..n).collect())
    }

    /// Mark the queue destroyed, dropping pending events. Returns true when
    /// the command is parked here and the caller can retire the registration
    /// immediately; otherwise the dispatcher holding the command finalizes.
    pub(crate) fn destroy_mark(&self) -> bool {
        let mut fifo = self.fifo.lock();
        fifo.events.clear();
        match fifo.state {
            QueueState::NotScheduled => {
                fifo.state = QueueState::Free;
                true
            }
            QueueState::Scheduled => {
                fifo.state = QueueState::Destroyed;
                false
            }
            QueueState::Destroyed | QueueState::Free => false,
        }
    }

    pub(crate) fn finalize(&self) {
        let mut fifo = self.fifo.lock();
        debug_assert_eq!(fifo.state, QueueState::Destroyed);
        fifo.state = QueueState::Free;
    }

    /// Forward `ev` to `dest` under this queue's ordered context.
    ///
    /// An in-order forward is delivered immediately and resolves the caller's
    /// context through the enqueue (returns `Ok(true)`). An out-of-order
    /// forward is stashed against its order and delivered when the order
    /// resolves (`Ok(false)`); the caller's context stays live until its
    /// normal release. Queues that transitioned non-empty are appended to
    /// `wakes` for the caller to re-arm.
    pub(crate) fn ordered_enqueue(
        self: &Arc<Self>,
        order: u64,
        dest: &Arc<SchedQueue>,
        mut ev: Event,
        wakes: &mut Vec<Arc<SchedQueue>>,
    ) -> Result<bool, SchedError> {
        let mut st = self.order.lock();
        debug_assert!(order >= st.order_out);
        if order == st.order_out {
            if dest.enqueue_direct(ev)? {
                wakes.push(dest.clone());
            }
            self.advance(&mut st, wakes);
            Ok(true)
        } else {
            // Mark the parked forward with its origin; the cascade checks
            // the marker before releasing it downstream.
            ev.ord.origin = Some(Arc::downgrade(self));
            st.stash.entry(order).or_default().push((dest.clone(), ev));
            Ok(false)
        }
    }

    /// Retire `order`. Out-of-turn releases are recorded and retired by the
    /// in-turn resolver's cascade, so ownership of the order always transfers
    /// here and the caller may clear its context.
    pub(crate) fn release_order(
        &self,
        order: u64,
        enq_called: bool,
        wakes: &mut Vec<Arc<SchedQueue>>,
    ) {
        let mut st = self.order.lock();
        if order < st.order_out {
            debug_assert!(false, "order released twice");
            return;
        }
        if !enq_called {
            debug_assert!(!st.stash.contains_key(&order));
        }
        if order != st.order_out {
            st.resolved_ahead.insert(order);
            return;
        }
        self.advance(&mut st, wakes);
    }

    /// Retire the head order: deliver its stashed forwards in source order,
    /// advance the output cursor and the per-lock gates past it, then cascade
    /// through any successors already released out of turn.
    fn advance(&self, st: &mut OrderState, wakes: &mut Vec<Arc<SchedQueue>>) {
        loop {
            if let Some(entries) = st.stash.remove(&st.order_out) {
                for (dest, mut ev) in entries {
                    // A parked forward must still belong to this queue's
                    // ordering chain.
                    debug_assert!(ev
                        .ord
                        .origin
                        .as_ref()
                        .is_some_and(|origin| std::ptr::eq(origin.as_ptr(), self)));
                    ev.ord.origin = None;
                    match dest.enqueue_direct(ev) {
                        Ok(true) => wakes.push(dest),
                        Ok(false) => {}
                        // Destination destroyed while the forward was parked.
                        Err(_) => {}
                    }
                }
            }
            st.order_out += 1;
            let next = st.order_out;
            for gate in self.sync_out.iter().take(self.param.lock_count) {
                gate.fetch_max(next, Ordering::AcqRel);
            }
            if !st.resolved_ahead.remove(&st.order_out) {
                break;
            }
        }
    }
}
