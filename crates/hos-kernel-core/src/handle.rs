//! Per-process handle table
//!
//! Maps small opaque `u32` handles to kernel objects. A handle packs a slot
//! index with a 15-bit linear id: `handle = (linear_id << 15) | index`. The
//! linear id advances on every allocation, so a recycled slot never hands
//! out the value of a handle that was just closed.
//!
//! # Properties (Verification Targets)
//!
//! 1. **No Forged Object**: only handles returned by `generate` resolve
//! 2. **No Stale Resolve**: a closed handle never resolves again
//! 3. **Bounded**: the table never holds more than `capacity` entries

use alloc::vec::Vec;

use serde::{Deserialize, Serialize};
use thiserror::Error;

const INDEX_BITS: u32 = 15;
const INDEX_MASK: u32 = (1 << INDEX_BITS) - 1;
const LINEAR_ID_MASK: u32 = (1 << 15) - 1;

/// Upper bound on table capacity imposed by the index width.
pub const MAX_CAPACITY: usize = 1 << INDEX_BITS;

/// An opaque handle value as seen by guest code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct Handle(pub u32);

impl Handle {
    /// Never a valid handle.
    pub const INVALID: Handle = Handle(0);
    /// Pseudo-handle naming the calling process.
    pub const CURRENT_PROCESS: Handle = Handle(0xFFFF_8001);
    /// Pseudo-handle naming the calling thread.
    pub const CURRENT_THREAD: Handle = Handle(0xFFFF_8000);

    pub const fn raw(self) -> u32 {
        self.0
    }

    pub const fn is_pseudo(self) -> bool {
        self.0 == Self::CURRENT_PROCESS.0 || self.0 == Self::CURRENT_THREAD.0
    }

    const fn index(self) -> usize {
        (self.0 & INDEX_MASK) as usize
    }

    const fn linear_id(self) -> u16 {
        ((self.0 >> INDEX_BITS) & LINEAR_ID_MASK) as u16
    }

    const fn compose(linear_id: u16, index: usize) -> Self {
        Handle(((linear_id as u32) << INDEX_BITS) | index as u32)
    }
}

/// Handle table errors
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum HandleError {
    /// Every slot is in use.
    #[error("handle table full ({capacity} entries)")]
    OutOfHandles { capacity: usize },
    /// The handle is not bound in this table.
    #[error("invalid handle {0:#x}")]
    InvalidHandle(u32),
}

#[derive(Clone, Debug)]
struct Entry<O> {
    linear_id: u16,
    object: O,
}

/// Per-process handle table.
#[derive(Clone, Debug)]
pub struct HandleTable<O> {
    slots: Vec<Option<Entry<O>>>,
    /// Freed slot indices, reused LIFO
    free: Vec<usize>,
    capacity: usize,
    next_linear_id: u16,
    count: usize,
}

impl<O: Clone> HandleTable<O> {
    /// Create a table holding at most `capacity` handles.
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            capacity: capacity.clamp(1, MAX_CAPACITY),
            next_linear_id: 1,
            count: 0,
        }
    }

    /// Bind `object` to a fresh handle.
    pub fn generate(&mut self, object: O) -> Result<Handle, HandleError> {
        if self.count >= self.capacity {
            return Err(HandleError::OutOfHandles {
                capacity: self.capacity,
            });
        }

        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.slots.push(None);
                self.slots.len() - 1
            }
        };

        let linear_id = self.advance_linear_id();
        self.slots[index] = Some(Entry { linear_id, object });
        self.count += 1;
        Ok(Handle::compose(linear_id, index))
    }

    /// Look up the object bound to `handle`.
    pub fn resolve(&self, handle: Handle) -> Option<&O> {
        if handle.is_pseudo() || handle == Handle::INVALID || handle.0 >> 30 != 0 {
            return None;
        }
        match self.slots.get(handle.index()) {
            Some(Some(entry)) if entry.linear_id == handle.linear_id() => Some(&entry.object),
            _ => None,
        }
    }

    /// Unbind `handle`, returning the object so the caller can drop its
    /// reference outside any lock.
    pub fn close(&mut self, handle: Handle) -> Result<O, HandleError> {
        if self.resolve(handle).is_none() {
            return Err(HandleError::InvalidHandle(handle.0));
        }
        let index = handle.index();
        let entry = self.slots[index]
            .take()
            .ok_or(HandleError::InvalidHandle(handle.0))?;
        self.free.push(index);
        self.count -= 1;
        Ok(entry.object)
    }

    /// Remove every binding, returning the objects in handle order.
    pub fn drain(&mut self) -> Vec<(Handle, O)> {
        let mut drained = Vec::with_capacity(self.count);
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if let Some(entry) = slot.take() {
                drained.push((Handle::compose(entry.linear_id, index), entry.object));
            }
        }
        self.slots.clear();
        self.free.clear();
        self.count = 0;
        drained
    }

    /// Iterate over live bindings.
    pub fn iter(&self) -> impl Iterator<Item = (Handle, &O)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.as_ref()
                .map(|entry| (Handle::compose(entry.linear_id, index), &entry.object))
        })
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn contains(&self, handle: Handle) -> bool {
        self.resolve(handle).is_some()
    }

    fn advance_linear_id(&mut self) -> u16 {
        let id = self.next_linear_id;
        self.next_linear_id = if id as u32 >= LINEAR_ID_MASK { 1 } else { id + 1 };
        id
    }
}

// ============================================================================
// Kani Proofs
// ============================================================================

#[cfg(kani)]
mod kani_proofs {
    use super::*;

    /// Proof: a closed handle never resolves
    #[kani::proof]
    #[kani::unwind(4)]
    fn proof_closed_handle_never_resolves() {
        let mut table: HandleTable<u8> = HandleTable::new(2);
        let handle = table.generate(kani::any()).unwrap();
        table.close(handle).unwrap();
        kani::assert(table.resolve(handle).is_none(), "closed handle resolved");
    }

    /// Proof: arbitrary values resolve only if generated
    #[kani::proof]
    #[kani::unwind(4)]
    fn proof_no_forged_handle() {
        let mut table: HandleTable<u8> = HandleTable::new(2);
        let handle = table.generate(7).unwrap();
        let forged = Handle(kani::any());
        if forged != handle {
            kani::assert(table.resolve(forged).is_none(), "forged handle resolved");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn test_generate_then_resolve() {
        let mut table = HandleTable::new(4);
        let a = table.generate("a").unwrap();
        let b = table.generate("b").unwrap();
        assert_ne!(a, b);
        assert_eq!(table.resolve(a), Some(&"a"));
        assert_eq!(table.resolve(b), Some(&"b"));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_resolve_after_close_is_not_found() {
        let mut table = HandleTable::new(4);
        let a = table.generate(1u32).unwrap();
        assert_eq!(table.close(a), Ok(1));
        assert_eq!(table.resolve(a), None);
        assert_eq!(table.close(a), Err(HandleError::InvalidHandle(a.raw())));
    }

    #[test]
    fn test_recycled_slot_gets_new_value() {
        let mut table = HandleTable::new(4);
        let a = table.generate(1u32).unwrap();
        table.close(a).unwrap();
        let b = table.generate(2u32).unwrap();
        assert_eq!(a.index(), b.index());
        assert_ne!(a, b);
        assert_eq!(table.resolve(a), None);
        assert_eq!(table.resolve(b), Some(&2));
    }

    #[test]
    fn test_live_handles_are_unique() {
        let mut table = HandleTable::new(64);
        let mut live = Vec::new();
        for round in 0..10u32 {
            for i in 0..5 {
                live.push(table.generate(round * 10 + i).unwrap());
            }
            let closed = live.remove(0);
            table.close(closed).unwrap();
        }
        let mut values: Vec<u32> = live.iter().map(|h| h.raw()).collect();
        values.sort_unstable();
        values.dedup();
        assert_eq!(values.len(), live.len());
    }

    #[test]
    fn test_out_of_handles() {
        let mut table = HandleTable::new(2);
        table.generate(()).unwrap();
        table.generate(()).unwrap();
        assert_eq!(
            table.generate(()),
            Err(HandleError::OutOfHandles { capacity: 2 })
        );
    }

    #[test]
    fn test_capacity_freed_by_close() {
        let mut table = HandleTable::new(1);
        let a = table.generate(()).unwrap();
        table.close(a).unwrap();
        assert!(table.generate(()).is_ok());
    }

    #[test]
    fn test_pseudo_and_invalid_handles_never_resolve() {
        let mut table = HandleTable::new(4);
        table.generate(()).unwrap();
        assert_eq!(table.resolve(Handle::INVALID), None);
        assert_eq!(table.resolve(Handle::CURRENT_PROCESS), None);
        assert_eq!(table.resolve(Handle::CURRENT_THREAD), None);
    }

    #[test]
    fn test_tables_are_independent() {
        let mut first = HandleTable::new(4);
        let mut second: HandleTable<&str> = HandleTable::new(4);
        let handle = first.generate("first").unwrap();
        assert_eq!(second.resolve(handle), None);
        second.generate("second").unwrap();
        assert_eq!(first.resolve(handle), Some(&"first"));
    }

    #[test]
    fn test_drain_empties_table() {
        let mut table = HandleTable::new(4);
        let a = table.generate(1).unwrap();
        let b = table.generate(2).unwrap();
        let drained = table.drain();
        assert_eq!(drained, vec![(a, 1), (b, 2)]);
        assert!(table.is_empty());
        assert_eq!(table.resolve(a), None);
    }

    #[test]
    fn test_linear_id_wraps_to_one() {
        let mut table = HandleTable::new(1);
        for _ in 0..(LINEAR_ID_MASK as usize + 2) {
            let h = table.generate(()).unwrap();
            assert_ne!(h.linear_id(), 0);
            table.close(h).unwrap();
        }
    }
}
