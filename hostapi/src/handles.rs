//! Handle table — the arena mapping integer handles to host values.
//!
//! Slots 0–3 are permanent constants (undefined, null, true, false) and are
//! never reused or mutated. Every other slot is either live or part of a
//! freelist threaded through the slots themselves: a free slot stores the
//! index of the next free slot, allocation pops the head, and drop/take
//! push the freed slot back (LIFO reuse). There is no compaction and there
//! are no generation counters.
//!
//! Hazards, intentional and documented:
//! - `get`/`take` on a stale or out-of-range handle panic. Handle validity
//!   is the caller's contract; there is no recoverable error path.
//! - Dropping an already-freed handle corrupts the freelist. A
//!   `debug_assert!` catches it in debug builds; release builds keep the
//!   zero-overhead path.

use crate::value::HostValue;

/// Handle of the `undefined` constant.
pub const UNDEFINED: u32 = 0;
/// Handle of the `null` constant.
pub const NULL: u32 = 1;
/// Handle of the `true` constant.
pub const TRUE: u32 = 2;
/// Handle of the `false` constant.
pub const FALSE: u32 = 3;

/// First dynamically allocated handle; everything below is reserved.
pub const FIRST_DYNAMIC: u32 = 4;

enum Slot {
    Live(HostValue),
    Free(u32),
}

/// Arena of host values addressed by `u32` handles.
pub struct HandleTable {
    slots: Vec<Slot>,
    free_head: u32,
}

impl HandleTable {
    /// Create a table pre-seeded with the four reserved constants.
    pub fn new() -> Self {
        let slots = vec![
            Slot::Live(HostValue::Undefined),
            Slot::Live(HostValue::Null),
            Slot::Live(HostValue::Bool(true)),
            Slot::Live(HostValue::Bool(false)),
        ];
        Self {
            slots,
            free_head: FIRST_DYNAMIC,
        }
    }

    /// Move a value into the arena and return its handle.
    ///
    /// Pops the freelist head, growing the arena when the freelist is
    /// exhausted. Ownership of the slot transfers to the guest until it
    /// takes or drops the handle.
    pub fn alloc(&mut self, value: HostValue) -> u32 {
        if self.free_head as usize == self.slots.len() {
            self.slots.push(Slot::Free(self.free_head + 1));
        }
        let idx = self.free_head;
        let slot = std::mem::replace(&mut self.slots[idx as usize], Slot::Live(value));
        self.free_head = match slot {
            Slot::Free(next) => next,
            Slot::Live(_) => unreachable!("freelist head pointed at a live slot"),
        };
        idx
    }

    /// Borrow the value behind a handle.
    ///
    /// Panics if the handle is stale or out of range — invalid use is
    /// fatal by design.
    pub fn get(&self, handle: u32) -> &HostValue {
        match &self.slots[handle as usize] {
            Slot::Live(v) => v,
            Slot::Free(_) => panic!("handle {handle} is not live"),
        }
    }

    /// Return the value and invalidate the handle.
    ///
    /// Reserved handles stay live; their constant is returned by clone.
    pub fn take(&mut self, handle: u32) -> HostValue {
        if handle < FIRST_DYNAMIC {
            return self.get(handle).clone();
        }
        let slot = std::mem::replace(&mut self.slots[handle as usize], Slot::Free(self.free_head));
        match slot {
            Slot::Live(v) => {
                self.free_head = handle;
                v
            }
            Slot::Free(_) => panic!("handle {handle} is not live"),
        }
    }

    /// Invalidate a handle without returning its value. No-op for the
    /// reserved constants.
    pub fn drop_handle(&mut self, handle: u32) {
        if handle < FIRST_DYNAMIC {
            return;
        }
        debug_assert!(
            matches!(self.slots[handle as usize], Slot::Live(_)),
            "double drop of handle {handle}"
        );
        self.slots[handle as usize] = Slot::Free(self.free_head);
        self.free_head = handle;
    }

    /// Number of live dynamically allocated handles.
    pub fn live_count(&self) -> usize {
        self.slots[FIRST_DYNAMIC as usize..]
            .iter()
            .filter(|s| matches!(s, Slot::Live(_)))
            .count()
    }
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}
