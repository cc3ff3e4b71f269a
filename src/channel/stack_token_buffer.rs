//! Fixed-size token variant specialization (spec.md §4.7 "Fixed-size token
//! variant specialisations"), gated behind the `stack-ring` feature.
//!
//! Grounded in the teacher's `StackRing<T, N>`: a same-process, no-heap SPSC
//! ring with the buffer embedded directly in the struct rather than reached
//! through a [`crate::memory::LocalMemorySlot`]. Unlike [`crate::channel::spsc`],
//! this type does not go through [`crate::comm::CommunicationManager`] at
//! all — like the teacher's `StackRing`, it is a local optimization for
//! when both ends of a channel are known to be in the same address space,
//! not a one-sided-transport binding.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_utils::CachePadded;

const fn assert_power_of_two(n: usize) {
    assert!(n > 0, "StackTokenBuffer capacity must be > 0");
    assert!(
        n.is_power_of_two(),
        "StackTokenBuffer capacity must be a power of 2"
    );
}

/// A stack-allocated, const-capacity SPSC ring of fixed-size `Copy` tokens.
///
/// `N` must be a power of two (enforced at construction) so the ring index
/// is a mask rather than a modulo. `head`/`tail` are each wrapped in a
/// `CachePadded` so a producer spinning on `head` and a consumer spinning on
/// `tail` don't thrash each other's core through false sharing.
pub struct StackTokenBuffer<T, const N: usize> {
    head: CachePadded<AtomicU64>,
    tail: CachePadded<AtomicU64>,
    buffer: UnsafeCell<[MaybeUninit<T>; N]>,
}

// SAFETY: `head` is only ever written by the producer side (`push`), `tail`
// only by the consumer side (`pop`); the buffer slot at index `i` is written
// by `push` strictly before the `head` store that makes it visible, and read
// by `pop` strictly after the `head` load observes it, mirroring the
// Acquire/Release protocol `CircularBuffer` uses.
unsafe impl<T: Send, const N: usize> Send for StackTokenBuffer<T, N> {}
unsafe impl<T: Send, const N: usize> Sync for StackTokenBuffer<T, N> {}

impl<T: Copy, const N: usize> StackTokenBuffer<T, N> {
    pub fn new() -> Self {
        assert_power_of_two(N);
        Self {
            head: CachePadded::new(AtomicU64::new(0)),
            tail: CachePadded::new(AtomicU64::new(0)),
            buffer: UnsafeCell::new([MaybeUninit::uninit(); N]),
        }
    }

    #[inline]
    fn mask(v: u64) -> usize {
        (v as usize) & (N - 1)
    }

    pub fn depth(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        head.wrapping_sub(tail) as usize
    }

    pub fn is_full(&self) -> bool {
        self.depth() >= N
    }

    pub fn is_empty(&self) -> bool {
        self.depth() == 0
    }

    /// Pushes one token. Returns `false` if the ring is full — a plain
    /// boolean, not a `ChannelError`: this type sits outside the one-sided
    /// channel's error taxonomy entirely, the same way the teacher's
    /// `StackRing::push` returns `bool` rather than a `Result`.
    pub fn push(&self, value: T) -> bool {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Acquire);
        if (head.wrapping_sub(tail) as usize) >= N {
            return false;
        }
        let idx = Self::mask(head);
        // SAFETY: idx < N by construction of mask(); only the producer
        // writes this slot, and only between this store's `head` value and
        // the next time the consumer observes it via pop().
        unsafe {
            (*self.buffer.get())[idx].write(value);
        }
        self.head.store(head.wrapping_add(1), Ordering::Release);
        true
    }

    /// Pops one token, or `None` if the ring is empty.
    pub fn pop(&self) -> Option<T> {
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Acquire);
        if tail == head {
            return None;
        }
        let idx = Self::mask(tail);
        // SAFETY: the Acquire load of `head` above happens-after the
        // producer's Release store that wrote this slot.
        let value = unsafe { (*self.buffer.get())[idx].assume_init() };
        self.tail.store(tail.wrapping_add(1), Ordering::Release);
        Some(value)
    }
}

impl<T: Copy, const N: usize> Default for StackTokenBuffer<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_pop_round_trip() {
        let ring: StackTokenBuffer<u64, 4> = StackTokenBuffer::new();
        assert!(ring.is_empty());
        assert!(ring.push(1));
        assert!(ring.push(2));
        assert_eq!(ring.depth(), 2);
        assert_eq!(ring.pop(), Some(1));
        assert_eq!(ring.pop(), Some(2));
        assert_eq!(ring.pop(), None);
    }

    #[test]
    fn push_past_capacity_returns_false() {
        let ring: StackTokenBuffer<u64, 2> = StackTokenBuffer::new();
        assert!(ring.push(1));
        assert!(ring.push(2));
        assert!(!ring.push(3));
    }

    #[test]
    #[should_panic(expected = "power of 2")]
    fn non_power_of_two_capacity_is_fatal() {
        let _ring: StackTokenBuffer<u64, 3> = StackTokenBuffer::new();
    }
}
