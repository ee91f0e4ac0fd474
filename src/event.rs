//! Event representation handed between producers and the scheduler.

use crate::buffer_pool::{take, PayloadRef};
use crate::config::MAX_ORDERED_LOCKS;
use crate::queue::SchedQueue;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Weak;

static EVENT_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Maximum payload size carried by an event (standard Ethernet MTU).
pub const MAX_EVENT_SIZE: usize = 1500;

/// Ordering header stamped when an event enters an ordered queue.
///
/// `order` and the per-lock `sync` values advance in lockstep at the source,
/// so downstream consumers taking an ordered lock observe source order.
#[derive(Debug, Clone, Default)]
pub(crate) struct OrderHdr {
    pub order: u64,
    pub sync: [u64; MAX_ORDERED_LOCKS],
    /// Origin queue of a forward parked while its source order is
    /// unresolved; validated and cleared when the order resolves and the
    /// event is released downstream.
    pub origin: Option<Weak<SchedQueue>>,
}

/// Unit of work dispatched by the scheduler.
///
/// The payload is backed by the recycling pool; cloning an [`Event`] shares
/// the bytes instead of copying them.
#[derive(Debug, Clone)]
pub struct Event {
    pub id: u64,
    payload: PayloadRef,
    pub(crate) ord: OrderHdr,
}

impl Event {
    /// Create an event from payload bytes, leasing a pooled buffer.
    pub fn new(payload: &[u8]) -> Event {
        let len = payload.len().min(MAX_EVENT_SIZE);
        let mut lease = take(len);
        lease.as_mut_slice()[..len].copy_from_slice(&payload[..len]);
        Event::from_payload(lease.seal(len))
    }

    /// Wrap an already sealed payload.
    pub fn from_payload(payload: PayloadRef) -> Event {
        Event {
            id: EVENT_ID_COUNTER.fetch_add(1, Ordering::Relaxed),
            payload,
            ord: OrderHdr::default(),
        }
    }

    /// Borrow the payload bytes.
    pub fn payload(&self) -> &[u8] {
        self.payload.as_slice()
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_carries_payload() {
        let ev = Event::new(&[1, 2, 3]);
        assert_eq!(ev.payload(), &[1, 2, 3]);
        assert_eq!(ev.len(), 3);
    }

    #[test]
    fn event_ids_are_unique() {
        let a = Event::new(&[]);
        let b = Event::new(&[]);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn oversized_payload_is_clamped() {
        let big = vec![0u8; MAX_EVENT_SIZE + 100];
        let ev = Event::new(&big);
        assert_eq!(ev.len(), MAX_EVENT_SIZE);
    }
}
