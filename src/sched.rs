//! The scheduling engine: process-wide context and the per-thread pull loop.
//!
//! Worker threads pull work; there is no dispatcher thread. Each `schedule`
//! call drains the thread-local cache first, releases any atomic or ordered
//! context left over from the previous batch, then walks the priority levels
//! from most to least critical. Within a priority the walk starts at a bucket
//! seeded by the thread id so concurrent workers spread across the lanes
//! instead of contending on one. A dequeued command is dispatched by tag:
//! packet-input commands run one driver poll round and cycle back; dequeue
//! commands drain a batch from their producer queue into the cache, then the
//! queue's discipline decides whether the command is re-armed immediately
//! (parallel, ordered) or held until this thread finishes the batch (atomic).

use crate::config::{MAX_DEQ, MAX_ORDERED_LOCKS, NUM_PRIO, QUEUES_PER_PRIO};
use crate::error::SchedError;
use crate::event::Event;
use crate::fanout::{FanoutTable, LaneRef, SchedCmd};
use crate::group::{GroupId, GroupTable};
use crate::pktio::{PktInput, PktioEntry};
use crate::queue::{Dequeued, QueueParam, SchedQueue, SyncMode};
use crate::stats::{SchedStats, StatsCounters};
use crate::threading::{ThreadKind, ThreadSlots};
use crate::thrmask::ThreadMask;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Wait policy for a schedule call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wait {
    /// Busy-loop until an event arrives.
    Forever,
    /// Return immediately when nothing was dispatched.
    NoWait,
    /// Busy-loop until the budget elapses on the monotonic clock.
    Timeout(Duration),
}

/// Convert a nanosecond budget into a wait specification.
pub fn wait_time(ns: u64) -> Wait {
    Wait::Timeout(Duration::from_nanos(ns))
}

/// Process-wide scheduler context shared by all worker threads.
pub struct Scheduler {
    fanout: FanoutTable,
    groups: GroupTable,
    threads: ThreadSlots,
    stats: StatsCounters,
    next_queue_id: AtomicUsize,
    next_pktio_id: AtomicUsize,
}

impl Scheduler {
    pub fn new() -> Arc<Scheduler> {
        debug!("scheduler init");
        Arc::new(Scheduler {
            fanout: FanoutTable::new(),
            groups: GroupTable::new(),
            threads: ThreadSlots::new(),
            stats: StatsCounters::default(),
            next_queue_id: AtomicUsize::new(0),
            next_pktio_id: AtomicUsize::new(0),
        })
    }

    /// Register a producer queue with the scheduler.
    ///
    /// The queue claims a command record and a fan-out registration but does
    /// not become schedulable until its first enqueue re-arms the command.
    pub fn queue_create(&self, name: &str, param: QueueParam) -> Result<Arc<SchedQueue>, SchedError> {
        if param.prio >= NUM_PRIO {
            return Err(SchedError::InvalidPriority);
        }
        if param.lock_count > MAX_ORDERED_LOCKS {
            return Err(SchedError::TooManyOrderedLocks);
        }
        self.fanout.claim_cmd()?;
        let id = self.next_queue_id.fetch_add(1, Ordering::Relaxed);
        let lane = self.fanout.register(id, param.prio);
        debug!(queue = name, prio = param.prio, "queue registered");
        Ok(SchedQueue::new(name, id, param, lane))
    }

    /// Destroy a producer queue, dropping its pending events.
    ///
    /// When the queue's command is parked on the entry the registration is
    /// retired at once; otherwise whichever worker next dispatches the
    /// command finalizes the queue.
    pub fn queue_destroy(&self, queue: &Arc<SchedQueue>) {
        if queue.destroy_mark() {
            self.retire_queue(queue);
        }
    }

    fn retire_queue(&self, queue: &SchedQueue) {
        self.fanout.unregister(queue.id(), queue.prio());
        self.fanout.release_cmd();
        debug!(queue = queue.name(), "queue retired");
    }

    /// Register a packet-input interface at the given priority.
    ///
    /// Interfaces are schedulable from the start: their poll command enters
    /// the fan-out immediately and cycles until `poll` reports stopped.
    pub fn pktio_start(&self, input: Box<dyn PktInput>, prio: usize) -> Result<(), SchedError> {
        if prio >= NUM_PRIO {
            return Err(SchedError::InvalidPriority);
        }
        self.fanout.claim_cmd()?;
        let id = self.next_pktio_id.fetch_add(1, Ordering::Relaxed);
        let lane = self.fanout.register(id, prio);
        debug!(prio, "pktio registered");
        self.fanout
            .send(lane, SchedCmd::PollPktin { pktio: Arc::new(PktioEntry { id, prio, input }) });
        Ok(())
    }

    /// Enqueue an event from outside any worker context.
    ///
    /// Worker threads holding an ordered context must enqueue through
    /// [`SchedThread::enqueue`] so forwards serialize with their source order.
    pub fn enqueue(&self, queue: &Arc<SchedQueue>, ev: Event) -> Result<(), SchedError> {
        if queue.enqueue_direct(ev)? {
            self.wake(queue);
        }
        Ok(())
    }

    /// Re-arm a queue's command after it transitioned non-empty.
    pub(crate) fn wake(&self, queue: &Arc<SchedQueue>) {
        self.fanout
            .send(queue.lane, SchedCmd::Dequeue { queue: queue.clone() });
    }

    /// Claim a thread slot and build the thread-local scheduling context.
    pub fn thread_local(self: &Arc<Self>, kind: ThreadKind) -> Result<SchedThread, SchedError> {
        let thr = self.threads.claim()?;
        self.groups.builtin_join(GroupId::ALL, thr);
        let builtin = match kind {
            ThreadKind::Worker => GroupId::WORKER,
            ThreadKind::Control => GroupId::CONTROL,
        };
        self.groups.builtin_join(builtin, thr);
        Ok(SchedThread {
            sched: self.clone(),
            kind,
            thr,
            cache: VecDeque::with_capacity(MAX_DEQ),
            src: None,
            held: None,
            ordered: None,
            pause: false,
        })
    }

    pub fn num_prio(&self) -> usize {
        NUM_PRIO
    }

    pub fn stats(&self) -> SchedStats {
        self.stats.snapshot()
    }

    // Group API.

    pub fn group_create(&self, name: &str, mask: &ThreadMask) -> Result<GroupId, SchedError> {
        self.groups.create(name, mask)
    }

    pub fn group_destroy(&self, group: GroupId) -> Result<(), SchedError> {
        self.groups.destroy(group)
    }

    pub fn group_lookup(&self, name: &str) -> Option<GroupId> {
        self.groups.lookup(name)
    }

    pub fn group_join(&self, group: GroupId, mask: &ThreadMask) -> Result<(), SchedError> {
        self.groups.join(group, mask)
    }

    pub fn group_leave(&self, group: GroupId, mask: &ThreadMask) -> Result<(), SchedError> {
        self.groups.leave(group, mask)
    }

    pub fn group_thrmask(&self, group: GroupId) -> Result<ThreadMask, SchedError> {
        self.groups.thrmask(group)
    }

    /// Drain every fan-out lane at process teardown, finalizing producers
    /// whose commands are still circulating.
    pub fn shutdown(&self) {
        for prio in 0..NUM_PRIO {
            for bucket in 0..QUEUES_PER_PRIO {
                let lane = LaneRef { prio, bucket };
                while let Some(cmd) = self.fanout.try_recv(lane) {
                    match cmd {
                        SchedCmd::Dequeue { queue } => match queue.deq_batch(1) {
                            Dequeued::Destroyed => {
                                queue.finalize();
                                self.retire_queue(&queue);
                            }
                            Dequeued::Batch(_) => {
                                error!(queue = queue.name(), "queue not empty at termination");
                            }
                            Dequeued::Empty => {}
                        },
                        SchedCmd::PollPktin { pktio } => {
                            self.fanout.unregister(pktio.id, pktio.prio);
                            self.fanout.release_cmd();
                        }
                    }
                }
            }
        }
        debug!("scheduler terminated");
    }
}

/// Command held while a thread owns an atomic queue's batch.
struct Hold {
    lane: LaneRef,
    queue: Arc<SchedQueue>,
}

/// Ordered context captured with a dispatched ordered event.
struct OrderedCtx {
    origin: Arc<SchedQueue>,
    order: u64,
    sync: [u64; MAX_ORDERED_LOCKS],
    enq_called: bool,
}

/// Per-thread scheduling context. Single-writer: only the owning thread
/// touches it, so the hot path is free of shared-state traffic.
pub struct SchedThread {
    sched: Arc<Scheduler>,
    kind: ThreadKind,
    thr: usize,
    cache: VecDeque<Event>,
    /// Producer queue of the cached batch.
    src: Option<Arc<SchedQueue>>,
    held: Option<Hold>,
    ordered: Option<OrderedCtx>,
    pause: bool,
}

impl SchedThread {
    /// Scheduler thread id; indexes thread-mask bits.
    pub fn thread_id(&self) -> usize {
        self.thr
    }

    /// Pull one event. Returns the event and the queue it came from.
    pub fn schedule(&mut self, wait: Wait) -> Option<(Arc<SchedQueue>, Event)> {
        let mut out = Vec::with_capacity(1);
        let src = self.schedule_loop(wait, &mut out, 1)?;
        out.pop().map(|ev| (src, ev))
    }

    /// Pull up to `max_num` events from a single producer queue, appending
    /// them to `out`. Returns the source queue when anything was delivered.
    pub fn schedule_multi(
        &mut self,
        wait: Wait,
        out: &mut Vec<Event>,
        max_num: usize,
    ) -> Option<Arc<SchedQueue>> {
        self.schedule_loop(wait, out, max_num)
    }

    fn schedule_loop(
        &mut self,
        wait: Wait,
        out: &mut Vec<Event>,
        max_num: usize,
    ) -> Option<Arc<SchedQueue>> {
        let mut deadline = None;
        loop {
            let (n, src) = self.schedule_once(out, max_num);
            if n > 0 {
                return src;
            }
            match wait {
                Wait::Forever => continue,
                Wait::NoWait => return None,
                Wait::Timeout(budget) => {
                    let limit = *deadline.get_or_insert_with(|| Instant::now() + budget);
                    if Instant::now() >= limit {
                        return None;
                    }
                }
            }
        }
    }

    /// One dispatch round: cache fast path, context release, priority walk.
    fn schedule_once(&mut self, out: &mut Vec<Event>, max_num: usize) -> (usize, Option<Arc<SchedQueue>>) {
        if !self.cache.is_empty() {
            let n = self.copy_out(out, max_num);
            return (n, self.src.clone());
        }

        self.release_context();

        if self.pause {
            return (0, None);
        }

        for prio in 0..NUM_PRIO {
            if self.sched.fanout.mask(prio) == 0 {
                continue;
            }
            let start = self.thr & (QUEUES_PER_PRIO - 1);
            for step in 0..QUEUES_PER_PRIO {
                let bucket = (start + step) & (QUEUES_PER_PRIO - 1);
                if self.sched.fanout.mask(prio) & (1 << bucket) == 0 {
                    continue;
                }
                let lane = LaneRef { prio, bucket };
                let Some(cmd) = self.sched.fanout.try_recv(lane) else {
                    continue;
                };

                match cmd {
                    SchedCmd::PollPktin { pktio } => {
                        self.sched.stats.record_pktin_poll();
                        if pktio.input.poll() {
                            // Interface stopped: retire its registration.
                            self.sched.fanout.unregister(pktio.id, pktio.prio);
                            self.sched.fanout.release_cmd();
                            debug!(prio = pktio.prio, "pktio stopped");
                        } else {
                            self.sched.fanout.send(lane, SchedCmd::PollPktin { pktio });
                        }
                        continue;
                    }
                    SchedCmd::Dequeue { queue } => {
                        let group = queue.group();
                        if group != GroupId::ALL && !self.sched.groups.is_member(group, self.thr) {
                            // Not eligible for this queue's work; keep the
                            // command circulating for a thread that is.
                            self.sched.fanout.send(lane, SchedCmd::Dequeue { queue });
                            continue;
                        }

                        // Ordered queues dispatch one event per round so
                        // consecutive events spread across threads.
                        let max_deq = match queue.sync_mode() {
                            SyncMode::Ordered => 1,
                            _ => MAX_DEQ,
                        };
                        match queue.deq_batch(max_deq) {
                            Dequeued::Destroyed => {
                                queue.finalize();
                                self.sched.retire_queue(&queue);
                                continue;
                            }
                            Dequeued::Empty => {
                                // Command disarmed under the queue lock; the
                                // next enqueue re-arms it.
                                continue;
                            }
                            Dequeued::Batch(events) => {
                                self.sched.stats.record_dispatch(prio, events.len());
                                match queue.sync_mode() {
                                    SyncMode::Ordered => {
                                        self.sched
                                            .fanout
                                            .send(lane, SchedCmd::Dequeue { queue: queue.clone() });
                                        self.ordered = Some(OrderedCtx {
                                            origin: queue.clone(),
                                            order: events[0].ord.order,
                                            sync: events[0].ord.sync,
                                            enq_called: false,
                                        });
                                    }
                                    SyncMode::Atomic => {
                                        self.held = Some(Hold {
                                            lane,
                                            queue: queue.clone(),
                                        });
                                    }
                                    SyncMode::Parallel => {
                                        self.sched
                                            .fanout
                                            .send(lane, SchedCmd::Dequeue { queue: queue.clone() });
                                    }
                                }
                                self.cache = events.into();
                                self.src = Some(queue.clone());
                                let n = self.copy_out(out, max_num);
                                return (n, Some(queue));
                            }
                        }
                    }
                }
            }
        }

        self.sched.stats.record_empty_round();
        (0, None)
    }

    fn copy_out(&mut self, out: &mut Vec<Event>, max_num: usize) -> usize {
        let mut n = 0;
        while n < max_num {
            match self.cache.pop_front() {
                Some(ev) => {
                    out.push(ev);
                    n += 1;
                }
                None => break,
            }
        }
        n
    }

    /// Release a held atomic queue once the local cache has drained. With
    /// events still cached the release is deferred; the thread is considered
    /// to be inside the atomic batch until then.
    pub fn release_atomic(&mut self) {
        if self.cache.is_empty() {
            if let Some(hold) = self.held.take() {
                self.sched
                    .fanout
                    .send(hold.lane, SchedCmd::Dequeue { queue: hold.queue });
            }
        }
    }

    /// Resolve the current ordered context against its origin queue.
    pub fn release_ordered(&mut self) {
        if let Some(ctx) = self.ordered.take() {
            let mut wakes = Vec::new();
            ctx.origin.release_order(ctx.order, ctx.enq_called, &mut wakes);
            for queue in &wakes {
                self.sched.wake(queue);
            }
        }
    }

    /// Release whichever context the previous batch left behind. Called at
    /// the top of every dispatch round and usable explicitly before blocking
    /// on anything external.
    pub fn release_context(&mut self) {
        if self.ordered.is_some() {
            self.release_ordered();
        } else {
            self.release_atomic();
        }
    }

    /// Enter the critical section guarded by ordered lock `lock_index`,
    /// waiting until every earlier event of the origin queue has passed the
    /// gate. No-op without an ordered context or for an undeclared lock.
    pub fn order_lock(&self, lock_index: usize) {
        let Some(ctx) = &self.ordered else { return };
        if lock_index >= ctx.origin.lock_count() {
            return;
        }
        let sync = ctx.sync[lock_index];
        let gate = ctx.origin.sync_gate(lock_index);
        let mut out = gate.load(Ordering::Acquire);
        debug_assert!(sync >= out);
        // The gate advances through unlocks and through order resolution, so
        // events that never take this lock cannot stall the wait.
        let mut spins = 0u32;
        while out != sync {
            spins = spins.wrapping_add(1);
            if spins & 0x7f == 0 {
                std::thread::yield_now();
            } else {
                std::hint::spin_loop();
            }
            out = gate.load(Ordering::Acquire);
        }
    }

    /// Leave the critical section, passing the gate to the next event.
    pub fn order_unlock(&self, lock_index: usize) {
        let Some(ctx) = &self.ordered else { return };
        if lock_index >= ctx.origin.lock_count() {
            return;
        }
        let gate = ctx.origin.sync_gate(lock_index);
        debug_assert_eq!(ctx.sync[lock_index], gate.load(Ordering::Acquire));
        gate.fetch_add(1, Ordering::Release);
    }

    /// Enqueue from this worker. Under an ordered context the forward is
    /// serialized with its source order: in-order forwards deliver at once
    /// and resolve the context, out-of-order forwards are parked by the
    /// origin queue until their turn.
    pub fn enqueue(&mut self, dest: &Arc<SchedQueue>, ev: Event) -> Result<(), SchedError> {
        let (origin, order) = match self.ordered.as_mut() {
            Some(ctx) => {
                ctx.enq_called = true;
                (ctx.origin.clone(), ctx.order)
            }
            None => return self.sched.enqueue(dest, ev),
        };
        let mut wakes = Vec::new();
        let resolved = origin.ordered_enqueue(order, dest, ev, &mut wakes)?;
        if resolved {
            self.ordered = None;
        }
        for queue in &wakes {
            self.sched.wake(queue);
        }
        Ok(())
    }

    /// Stop dispatching to this thread; cached events are still delivered.
    pub fn pause(&mut self) {
        self.pause = true;
    }

    pub fn resume(&mut self) {
        self.pause = false;
    }

    pub fn is_paused(&self) -> bool {
        self.pause
    }

    /// Placeholder for a dispatch prefetch hint.
    pub fn prefetch(&self, _num: usize) {}

    /// Tear down the thread context.
    ///
    /// With events still cached the teardown is refused: the context comes
    /// back alongside [`SchedError::LocalContextBusy`] so the caller can
    /// drain and retry. Held atomic or ordered contexts are released on the
    /// way out.
    pub fn finish(mut self) -> Result<(), (SchedError, SchedThread)> {
        if !self.cache.is_empty() {
            return Err((SchedError::LocalContextBusy, self));
        }
        self.release_context();
        Ok(())
    }
}

impl Drop for SchedThread {
    fn drop(&mut self) {
        if !self.cache.is_empty() {
            warn!(thr = self.thr, "dropping thread context with undelivered events");
            self.cache.clear();
        }
        self.release_context();
        let builtin = match self.kind {
            ThreadKind::Worker => GroupId::WORKER,
            ThreadKind::Control => GroupId::CONTROL,
        };
        self.sched.groups.builtin_leave(builtin, self.thr);
        self.sched.groups.builtin_leave(GroupId::ALL, self.thr);
        self.sched.threads.release(self.thr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_time_converts_nanoseconds() {
        assert_eq!(wait_time(1_500), Wait::Timeout(Duration::from_nanos(1_500)));
    }

    #[test]
    fn paused_thread_dispatches_nothing() {
        let sched = Scheduler::new();
        let queue = sched.queue_create("q", QueueParam::default()).unwrap();
        sched.enqueue(&queue, Event::new(&[1])).unwrap();

        let mut thread = sched.thread_local(ThreadKind::Worker).unwrap();
        thread.pause();
        assert!(thread.schedule(Wait::NoWait).is_none());
        thread.resume();
        let (src, ev) = thread.schedule(Wait::NoWait).unwrap();
        assert_eq!(src.name(), "q");
        assert_eq!(ev.payload(), &[1]);
        assert_eq!(sched.num_prio(), NUM_PRIO);
        assert!(thread.finish().is_ok());
    }

    #[test]
    fn thread_slots_seed_bucket_rotation() {
        let sched = Scheduler::new();
        let a = sched.thread_local(ThreadKind::Worker).unwrap();
        let b = sched.thread_local(ThreadKind::Control).unwrap();
        assert_ne!(a.thread_id(), b.thread_id());
        drop(b);
        let c = sched.thread_local(ThreadKind::Worker).unwrap();
        assert_eq!(c.thread_id(), 1);
        drop(a);
        drop(c);
    }
}
