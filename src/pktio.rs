//! Packet-input polling integration.
//!
//! Interfaces are not polled by a dedicated thread: a `PollPktin` command
//! record cycles through the fan-out lanes and whichever worker dequeues it
//! runs one poll round. The driver delivers its packets straight into
//! destination producer queues; the scheduler never caches packets from this
//! path.

use crate::event::Event;
use crate::queue::SchedQueue;
use crate::sched::Scheduler;
use crossbeam_channel::{Receiver, TryRecvError};
use std::sync::{Arc, Weak};

/// Driver-side polling hook.
pub trait PktInput: Send + Sync {
    /// Run one poll round, delivering any pending packets into destination
    /// queues. Returns true once the interface has stopped and should leave
    /// the scheduler.
    fn poll(&self) -> bool;
}

/// A registered packet-input interface.
pub(crate) struct PktioEntry {
    pub id: usize,
    pub prio: usize,
    pub input: Box<dyn PktInput>,
}

/// Channel-fed input: drains a crossbeam receiver into a destination queue.
///
/// Reports stopped once the feeding side disconnects. Useful for tests and
/// for staging packets produced off the worker threads.
pub struct ChannelInput {
    sched: Weak<Scheduler>,
    feed: Receiver<Event>,
    dest: Arc<SchedQueue>,
    burst: usize,
}

impl ChannelInput {
    pub fn new(
        sched: &Arc<Scheduler>,
        feed: Receiver<Event>,
        dest: Arc<SchedQueue>,
        burst: usize,
    ) -> ChannelInput {
        ChannelInput {
            sched: Arc::downgrade(sched),
            feed,
            dest,
            burst: burst.max(1),
        }
    }
}

impl PktInput for ChannelInput {
    fn poll(&self) -> bool {
        let Some(sched) = self.sched.upgrade() else {
            return true;
        };
        for _ in 0..self.burst {
            match self.feed.try_recv() {
                Ok(ev) => {
                    // A destroyed destination drops the packet, as the
                    // destroy protocol permits.
                    let _ = sched.enqueue(&self.dest, ev);
                }
                Err(TryRecvError::Empty) => return false,
                Err(TryRecvError::Disconnected) => return true,
            }
        }
        false
    }
}
