//! Pure arithmetic over the two counter words of a coordination buffer
//! (spec.md §3 `CoordinationBuffer`, §4.2 `CircularBuffer`).
//!
//! Unlike the teacher's `Ring<T>`, which embeds `head`/`tail` as `AtomicU64`
//! fields it owns, `CircularBuffer` holds no state of its own — it is a view
//! over bytes that live in a [`LocalMemorySlot`], because those bytes are
//! what a remote participant's one-sided `memcpy` actually writes into.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::memory::LocalMemorySlot;

/// Byte size of one coordination-buffer word (the system's size-type).
pub const WORD_SIZE: usize = std::mem::size_of::<u64>();

/// `HEAD_ADVANCE_COUNT` lives at byte offset 0.
pub const HEAD_ADVANCE_COUNT_IDX: usize = 0;

/// `TAIL_ADVANCE_COUNT` lives at byte offset `WORD_SIZE`.
pub const TAIL_ADVANCE_COUNT_IDX: usize = WORD_SIZE;

/// `getCoordinationBufferSize()` (spec.md §4.7): exactly two words, no
/// padding, no header.
pub const fn coordination_buffer_size() -> usize {
    2 * WORD_SIZE
}

/// Zeroes both words of a coordination buffer.
///
/// # Errors
///
/// Returns [`crate::ChannelError::InvalidArgument`] if `slot` is smaller than
/// [`coordination_buffer_size`].
pub fn initialize_coordination_buffer(
    slot: &LocalMemorySlot,
) -> Result<(), crate::error::ChannelError> {
    if slot.size() < coordination_buffer_size() {
        return Err(crate::error::ChannelError::invalid_argument(
            "coordination buffer smaller than two words",
        ));
    }
    CircularBuffer::new(slot, 0).set_head(0);
    CircularBuffer::new(slot, 0).set_tail(0);
    Ok(())
}

/// A pure computation over the `[HEAD_ADVANCE_COUNT, TAIL_ADVANCE_COUNT]`
/// words inside a coordination buffer's bytes.
///
/// Holds no state; every accessor re-reads the backing bytes through an
/// atomic load so that a remotely-applied `memcpy` into those bytes is
/// always observed on the next call — the volatile-reads requirement from
/// spec.md §9 ("compilers must not hoist them out of spin loops").
pub struct CircularBuffer<'a> {
    coordination: &'a LocalMemorySlot,
    capacity: usize,
}

impl<'a> CircularBuffer<'a> {
    pub fn new(coordination: &'a LocalMemorySlot, capacity: usize) -> Self {
        debug_assert!(coordination.size() >= coordination_buffer_size());
        Self {
            coordination,
            capacity,
        }
    }

    fn word(&self, idx: usize) -> &AtomicU64 {
        // SAFETY: construction asserts the slot holds at least two words,
        // `idx` is one of the two fixed (8-byte-aligned) offsets defined
        // above, and `LocalMemorySlot` storage is always allocated
        // 8-byte aligned.
        unsafe { self.coordination.atomic_u64_at(idx) }
    }

    fn head_word(&self) -> &AtomicU64 {
        self.word(HEAD_ADVANCE_COUNT_IDX)
    }

    fn tail_word(&self) -> &AtomicU64 {
        self.word(TAIL_ADVANCE_COUNT_IDX)
    }

    /// Raw (un-wrapped) HEAD virtual counter.
    pub fn head_count(&self) -> u64 {
        self.head_word().load(Ordering::Acquire)
    }

    /// Raw (un-wrapped) TAIL virtual counter.
    pub fn tail_count(&self) -> u64 {
        self.tail_word().load(Ordering::Acquire)
    }

    /// Ring index (`head mod capacity`) for the slot the next push would use.
    pub fn get_head(&self) -> usize {
        (self.head_count() % self.capacity as u64) as usize
    }

    /// Ring index (`tail mod capacity`) for the oldest unread token.
    pub fn get_tail(&self) -> usize {
        (self.tail_count() % self.capacity as u64) as usize
    }

    /// `HEAD − TAIL`: the number of in-flight tokens.
    pub fn get_depth(&self) -> usize {
        self.head_count().wrapping_sub(self.tail_count()) as usize
    }

    pub fn is_full(&self) -> bool {
        self.get_depth() >= self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.head_count() == self.tail_count()
    }

    /// Advances HEAD by `n` locally (no transport involved).
    ///
    /// # Panics
    ///
    /// Panics (a fatal protocol-bug abort, per spec.md §7) if `depth + n`
    /// would exceed `capacity` — the depth invariant `0 ≤ HEAD − TAIL ≤
    /// capacity` would be violated.
    pub fn advance_head(&self, n: usize) {
        let depth = self.get_depth();
        assert!(
            depth + n <= self.capacity,
            "FATAL: advanceHead({n}) would violate depth invariant (depth={depth}, capacity={})",
            self.capacity
        );
        let new_head = self.head_count().wrapping_add(n as u64);
        self.head_word().store(new_head, Ordering::Release);
    }

    /// Advances TAIL by `n` locally (no transport involved).
    ///
    /// # Panics
    ///
    /// Panics (a fatal protocol-bug abort) if `n` exceeds the current depth.
    pub fn advance_tail(&self, n: usize) {
        let depth = self.get_depth();
        assert!(
            n <= depth,
            "FATAL: advanceTail({n}) would violate depth invariant (depth={depth})"
        );
        let new_tail = self.tail_count().wrapping_add(n as u64);
        self.tail_word().store(new_tail, Ordering::Release);
    }

    /// Fatal-check setter: used only to (re-)initialize a coordination
    /// buffer, never as part of the push/pop protocol.
    ///
    /// # Panics
    ///
    /// Panics if the new HEAD would fall below the current TAIL.
    pub fn set_head(&self, value: u64) {
        assert!(
            value >= self.tail_count(),
            "FATAL: setHead({value}) below TAIL({})",
            self.tail_count()
        );
        self.head_word().store(value, Ordering::Release);
    }

    /// Fatal-check setter: used only to (re-)initialize a coordination
    /// buffer, never as part of the push/pop protocol.
    ///
    /// # Panics
    ///
    /// Panics if the new TAIL would rise above the current HEAD.
    pub fn set_tail(&self, value: u64) {
        assert!(
            value <= self.head_count(),
            "FATAL: setTail({value}) above HEAD({})",
            self.head_count()
        );
        self.tail_word().store(value, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{HostMemoryManager, MemoryManager, MemorySpace};

    fn coord_slot() -> LocalMemorySlot {
        let mgr = HostMemoryManager::new();
        let space = MemorySpace::host(0);
        mgr.allocate_local_memory_slot(&space, coordination_buffer_size())
            .unwrap()
    }

    #[test]
    fn starts_empty_after_initialize() {
        let slot = coord_slot();
        initialize_coordination_buffer(&slot).unwrap();
        let cb = CircularBuffer::new(&slot, 4);
        assert!(cb.is_empty());
        assert_eq!(cb.get_depth(), 0);
    }

    #[test]
    fn initialize_rejects_undersized_slot() {
        let mgr = HostMemoryManager::new();
        let space = MemorySpace::host(0);
        let slot = mgr
            .allocate_local_memory_slot(&space, coordination_buffer_size() - 1)
            .unwrap();
        assert!(initialize_coordination_buffer(&slot).is_err());
    }

    #[test]
    fn advance_head_then_tail_tracks_depth() {
        let slot = coord_slot();
        initialize_coordination_buffer(&slot).unwrap();
        let cb = CircularBuffer::new(&slot, 4);

        cb.advance_head(3);
        assert_eq!(cb.get_depth(), 3);
        assert!(!cb.is_full());

        cb.advance_head(1);
        assert!(cb.is_full());

        cb.advance_tail(4);
        assert!(cb.is_empty());
    }

    #[test]
    #[should_panic(expected = "violate depth invariant")]
    fn advance_head_past_capacity_is_fatal() {
        let slot = coord_slot();
        initialize_coordination_buffer(&slot).unwrap();
        let cb = CircularBuffer::new(&slot, 2);
        cb.advance_head(3);
    }

    #[test]
    #[should_panic(expected = "violate depth invariant")]
    fn advance_tail_past_head_is_fatal() {
        let slot = coord_slot();
        initialize_coordination_buffer(&slot).unwrap();
        let cb = CircularBuffer::new(&slot, 2);
        cb.advance_tail(1);
    }
}
