//! Scheduling thread groups.
//!
//! A group is a named thread mask restricting which workers may consume from
//! the queues bound to it. Built-in groups occupy reserved low ids; named
//! user groups are allocated from `NAMED_BASE` upward. A slot is free while
//! its name is empty, so `group_create` does not reject duplicate names;
//! `group_lookup` returns the first match.

use crate::config::{GROUP_NAME_LEN, MAX_SCHED_GROUPS};
use crate::error::SchedError;
use crate::thrmask::ThreadMask;
use parking_lot::Mutex;

/// Handle to a scheduling group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GroupId(pub(crate) usize);

impl GroupId {
    /// Every thread; queues bound here are never gated.
    pub const ALL: GroupId = GroupId(0);
    /// Worker threads.
    pub const WORKER: GroupId = GroupId(1);
    /// Control threads.
    pub const CONTROL: GroupId = GroupId(2);

    /// First id available to named user groups.
    pub(crate) const NAMED_BASE: usize = 3;

    pub fn index(self) -> usize {
        self.0
    }
}

struct GroupSlot {
    /// Empty means the slot is free (built-in slots are reserved by id, not
    /// by name).
    name: String,
    mask: ThreadMask,
}

pub(crate) struct GroupTable {
    slots: Mutex<Vec<GroupSlot>>,
}

impl GroupTable {
    pub fn new() -> GroupTable {
        let slots = (0..MAX_SCHED_GROUPS)
            .map(|_| GroupSlot {
                name: String::new(),
                mask: ThreadMask::zero(),
            })
            .collect();
        GroupTable {
            slots: Mutex::new(slots),
        }
    }

    fn named_slot_occupied(slots: &[GroupSlot], group: GroupId) -> bool {
        group.0 >= GroupId::NAMED_BASE
            && group.0 < MAX_SCHED_GROUPS
            && !slots[group.0].name.is_empty()
    }

    /// Allocate the first free named slot. The name is truncated to
    /// `GROUP_NAME_LEN - 1` characters.
    pub fn create(&self, name: &str, mask: &ThreadMask) -> Result<GroupId, SchedError> {
        let mut slots = self.slots.lock();
        for (i, slot) in slots.iter_mut().enumerate().skip(GroupId::NAMED_BASE) {
            if slot.name.is_empty() {
                slot.name = name.chars().take(GROUP_NAME_LEN - 1).collect();
                slot.mask = *mask;
                return Ok(GroupId(i));
            }
        }
        Err(SchedError::GroupTableFull)
    }

    pub fn destroy(&self, group: GroupId) -> Result<(), SchedError> {
        let mut slots = self.slots.lock();
        if !Self::named_slot_occupied(&slots, group) {
            return Err(SchedError::InvalidGroup);
        }
        slots[group.0].name.clear();
        slots[group.0].mask = ThreadMask::zero();
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Option<GroupId> {
        let slots = self.slots.lock();
        (GroupId::NAMED_BASE..MAX_SCHED_GROUPS)
            .find(|&i| !slots[i].name.is_empty() && slots[i].name == name)
            .map(GroupId)
    }

    pub fn join(&self, group: GroupId, mask: &ThreadMask) -> Result<(), SchedError> {
        let mut slots = self.slots.lock();
        if !Self::named_slot_occupied(&slots, group) {
            return Err(SchedError::InvalidGroup);
        }
        slots[group.0].mask.merge(mask);
        Ok(())
    }

    pub fn leave(&self, group: GroupId, mask: &ThreadMask) -> Result<(), SchedError> {
        let mut slots = self.slots.lock();
        if !Self::named_slot_occupied(&slots, group) {
            return Err(SchedError::InvalidGroup);
        }
        slots[group.0].mask.remove(mask);
        Ok(())
    }

    pub fn thrmask(&self, group: GroupId) -> Result<ThreadMask, SchedError> {
        let slots = self.slots.lock();
        if !Self::named_slot_occupied(&slots, group) {
            return Err(SchedError::InvalidGroup);
        }
        Ok(slots[group.0].mask)
    }

    /// Dispatch-side eligibility check; valid for built-in and named ids.
    pub fn is_member(&self, group: GroupId, thr: usize) -> bool {
        let slots = self.slots.lock();
        group.0 < MAX_SCHED_GROUPS && slots[group.0].mask.contains(thr)
    }

    /// Register a thread slot with the built-in groups on thread init.
    pub fn builtin_join(&self, group: GroupId, thr: usize) {
        debug_assert!(group.0 < GroupId::NAMED_BASE);
        self.slots.lock()[group.0].mask.set(thr);
    }

    pub fn builtin_leave(&self, group: GroupId, thr: usize) {
        debug_assert!(group.0 < GroupId::NAMED_BASE);
        self.slots.lock()[group.0].mask.clear(thr);
    }
}
