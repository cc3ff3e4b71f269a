//! Locking MPSC (spec.md §4.5): many producers share one consumer-owned
//! coordination buffer. A distributed lock (spec.md §4.1
//! `acquireGlobalLock`/`releaseGlobalLock`) serializes producers' access to
//! the shared HEAD counter; the consumer, being the sole writer of TAIL,
//! never contends with anything.
//!
//! Unlike [`crate::channel::spsc`], the shared coordination buffer is a
//! single physical region — a producer's local mirror exists only to give
//! `CircularBuffer`'s arithmetic a byte range to compute over while the lock
//! is held; it is pulled fresh from the shared buffer before every push and
//! pushed back before the lock is released.

use crate::circular_buffer::{
    coordination_buffer_size, initialize_coordination_buffer, CircularBuffer,
    HEAD_ADVANCE_COUNT_IDX, TAIL_ADVANCE_COUNT_IDX, WORD_SIZE,
};
use crate::comm::{CommunicationManager, SlotRef, Tag};
use crate::error::ChannelError;
use crate::memory::{GlobalMemorySlot, LocalMemorySlot, MemoryManager, MemorySpace};
use crate::metrics::{Metrics, MetricsSnapshot};

use super::{token_buffer_size, validate_construction, WellKnownKey};

/// One producer's handle onto a locking-MPSC channel.
///
/// Cheap to clone-construct many of against the same `tag` — every producer
/// created this way contends for the same lock bit, keyed off the shared
/// coordination buffer's identity.
pub struct MpscLockingProducer<C: CommunicationManager> {
    comm: C,
    token_size: usize,
    capacity: usize,
    local_mirror: LocalMemorySlot,
    shared_coordination: GlobalMemorySlot,
    shared_token_buffer: GlobalMemorySlot,
    metrics: Metrics,
}

/// The single consumer of a locking-MPSC channel.
pub struct MpscLockingConsumer<C: CommunicationManager> {
    comm: C,
    token_size: usize,
    capacity: usize,
    token_buffer: LocalMemorySlot,
    shared_coordination: LocalMemorySlot,
    metrics: Metrics,
}

impl<C: CommunicationManager> MpscLockingProducer<C> {
    /// Joins a channel already (or concurrently) being constructed by
    /// [`MpscLockingConsumer::connect`] under the same `tag`. Every producer
    /// calls this independently; `fence_tag` rendezvouses it with the
    /// consumer's publish.
    pub fn connect(
        comm: C,
        mem: &dyn MemoryManager,
        local_space: MemorySpace,
        tag: Tag,
        token_size: usize,
        capacity: usize,
    ) -> Result<Self, ChannelError> {
        if token_size == 0 {
            return Err(ChannelError::invalid_argument("tokenSize must be >= 1"));
        }
        if capacity == 0 {
            return Err(ChannelError::invalid_argument("capacity must be >= 1"));
        }

        comm.fence_tag(tag);
        let shared_coordination = comm
            .get_global_memory_slot(tag, WellKnownKey::CONSUMER_COORDINATION)
            .ok_or_else(|| ChannelError::transport("shared coordination buffer not published"))?;
        let shared_token_buffer = comm
            .get_global_memory_slot(tag, WellKnownKey::TOKEN_BUFFER)
            .ok_or_else(|| ChannelError::transport("shared token buffer not published"))?;

        let local_mirror = mem
            .allocate_local_memory_slot(&local_space, coordination_buffer_size())
            .map_err(|_| ChannelError::transport("failed to allocate local mirror"))?;
        comm.memcpy(
            SlotRef::Local(&local_mirror),
            0,
            SlotRef::Global(&shared_coordination),
            0,
            coordination_buffer_size(),
        )?;

        validate_construction(
            token_size,
            capacity,
            shared_token_buffer.local().size(),
            local_mirror.size(),
        )?;

        Ok(Self {
            comm,
            token_size,
            capacity,
            local_mirror,
            shared_coordination,
            shared_token_buffer,
            metrics: Metrics::new(),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn token_size(&self) -> usize {
        self.token_size
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// `push(sourceSlot, n)` (spec.md §4.5).
    ///
    /// Returns `Ok(false)` — never an error — when the distributed lock was
    /// already held by another producer; the caller decides whether to
    /// retry. Any other failure (bad arguments, insufficient capacity, a
    /// transport error) is a real error.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if `source` is smaller than `n * tokenSize` or `n`
    /// structurally exceeds `capacity`. `OutOfRange` if, once the lock is
    /// held, there is not enough free capacity for `n` more tokens.
    pub fn push(&self, source: &LocalMemorySlot, n: usize) -> Result<bool, ChannelError> {
        if n == 0 {
            return Ok(true);
        }
        if n > self.capacity {
            return Err(ChannelError::invalid_argument("push: n exceeds capacity"));
        }
        if source.size() < n * self.token_size {
            return Err(ChannelError::invalid_argument(
                "push: source slot smaller than n * tokenSize",
            ));
        }

        if !self.comm.acquire_global_lock(SlotRef::Global(&self.shared_coordination)) {
            self.metrics.add_lock_contended();
            return Ok(false);
        }

        let result = self.push_locked(source, n);
        self.comm.release_global_lock(SlotRef::Global(&self.shared_coordination));
        result.map(|()| true)
    }

    fn push_locked(&self, source: &LocalMemorySlot, n: usize) -> Result<(), ChannelError> {
        // Refresh the mirror's TAIL: the consumer may have popped since we
        // last held the lock.
        self.comm.memcpy(
            SlotRef::Local(&self.local_mirror),
            TAIL_ADVANCE_COUNT_IDX,
            SlotRef::Global(&self.shared_coordination),
            TAIL_ADVANCE_COUNT_IDX,
            WORD_SIZE,
        )?;

        let cb = CircularBuffer::new(&self.local_mirror, self.capacity);
        let depth = cb.get_depth();
        if depth + n > self.capacity {
            return Err(ChannelError::out_of_range("push: not enough free capacity"));
        }

        let sent_before = source.messages_sent();
        let recv_before = source.messages_received();
        for i in 0..n {
            let ring_index = cb.get_head();
            self.comm.memcpy(
                SlotRef::Global(&self.shared_token_buffer),
                ring_index * self.token_size,
                SlotRef::Local(source),
                i * self.token_size,
                self.token_size,
            )?;
            cb.advance_head(1);
        }
        self.comm.fence_slot(
            SlotRef::Local(source),
            sent_before + n as u64,
            recv_before,
        );

        let mirror_sent_before = self.local_mirror.messages_sent();
        self.comm.memcpy(
            SlotRef::Global(&self.shared_coordination),
            HEAD_ADVANCE_COUNT_IDX,
            SlotRef::Local(&self.local_mirror),
            HEAD_ADVANCE_COUNT_IDX,
            WORD_SIZE,
        )?;
        self.comm.fence_slot(
            SlotRef::Local(&self.local_mirror),
            mirror_sent_before + 1,
            self.local_mirror.messages_received(),
        );

        self.metrics.add_messages_sent(n as u64);
        self.metrics.add_batch_sent();
        Ok(())
    }

    /// Convenience wrapper: pushes a single `Copy` value via a transient
    /// source slot. See [`crate::channel::spsc::SpscProducer::push_value`]
    /// for the same tradeoff.
    pub fn push_value<T: Copy>(
        &self,
        mem: &dyn MemoryManager,
        space: &MemorySpace,
        value: T,
    ) -> Result<bool, ChannelError> {
        if std::mem::size_of::<T>() != self.token_size {
            return Err(ChannelError::invalid_argument(
                "push_value: size_of::<T>() does not match tokenSize",
            ));
        }
        let source = mem
            .allocate_local_memory_slot(space, self.token_size)
            .map_err(|_| ChannelError::transport("failed to allocate transient source slot"))?;
        unsafe {
            source.write_at(0, value);
        }
        let result = self.push(&source, 1);
        let _ = mem.free_local_memory_slot(&source);
        result
    }
}

impl<C: CommunicationManager> MpscLockingConsumer<C> {
    /// Publishes the shared token buffer and coordination buffer under
    /// `tag`, then fences so that any producer already waiting on
    /// `fence_tag(tag)` can proceed.
    pub fn connect(
        comm: C,
        mem: &dyn MemoryManager,
        space: MemorySpace,
        tag: Tag,
        token_size: usize,
        capacity: usize,
    ) -> Result<Self, ChannelError> {
        if token_size == 0 {
            return Err(ChannelError::invalid_argument("tokenSize must be >= 1"));
        }
        if capacity == 0 {
            return Err(ChannelError::invalid_argument("capacity must be >= 1"));
        }

        let token_buffer = mem
            .allocate_local_memory_slot(&space, token_buffer_size(token_size, capacity))
            .map_err(|_| ChannelError::transport("failed to allocate token buffer"))?;
        let shared_coordination = mem
            .allocate_local_memory_slot(&space, coordination_buffer_size())
            .map_err(|_| ChannelError::transport("failed to allocate coordination buffer"))?;
        initialize_coordination_buffer(&shared_coordination)?;

        let owner = comm.new_instance();
        comm.exchange_global_memory_slots(
            tag,
            &[
                (WellKnownKey::TOKEN_BUFFER, token_buffer.clone()),
                (WellKnownKey::CONSUMER_COORDINATION, shared_coordination.clone()),
            ],
            owner,
        )?;
        comm.fence_tag(tag);

        validate_construction(
            token_size,
            capacity,
            token_buffer.size(),
            shared_coordination.size(),
        )?;

        Ok(Self {
            comm,
            token_size,
            capacity,
            token_buffer,
            shared_coordination,
            metrics: Metrics::new(),
        })
    }

    /// A no-op for this crate's synchronous bindings — kept for symmetry
    /// with [`crate::channel::spsc::SpscConsumer::update_depth`] and so a
    /// genuinely asynchronous transport has somewhere to hook a poll.
    pub fn update_depth(&self) {
        self.comm.query_memory_slot_updates(&self.shared_coordination);
    }

    fn buffer(&self) -> CircularBuffer<'_> {
        CircularBuffer::new(&self.shared_coordination, self.capacity)
    }

    pub fn depth(&self) -> usize {
        self.buffer().get_depth()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn token_size(&self) -> usize {
        self.token_size
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// `peek(pos)` (spec.md §4.5): brackets the read in acquire/release of
    /// the same coordination-buffer lock producers contend for. Returns
    /// `Ok(None)` — the sentinel spec.md calls out ("for example −1") —
    /// when the lock could not be taken, letting the caller retry.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if `pos >= capacity`. `OutOfRange` if, once the
    /// lock is held, `pos >= depth`.
    pub fn peek(&self, pos: usize) -> Result<Option<usize>, ChannelError> {
        if pos >= self.capacity {
            return Err(ChannelError::invalid_argument("peek: pos >= capacity"));
        }
        if !self.comm.acquire_global_lock(SlotRef::Local(&self.shared_coordination)) {
            self.metrics.add_lock_contended();
            return Ok(None);
        }
        let result = self.peek_locked(pos);
        self.comm.release_global_lock(SlotRef::Local(&self.shared_coordination));
        result.map(Some)
    }

    fn peek_locked(&self, pos: usize) -> Result<usize, ChannelError> {
        self.update_depth();
        let cb = self.buffer();
        if pos >= cb.get_depth() {
            return Err(ChannelError::out_of_range("peek: pos >= depth"));
        }
        Ok(((cb.tail_count() + pos as u64) % self.capacity as u64) as usize)
    }

    /// # Safety
    ///
    /// See [`crate::channel::spsc::SpscConsumer::read_token`].
    pub unsafe fn read_token<T: Copy>(&self, ring_index: usize) -> T {
        self.token_buffer.read_at(ring_index * self.token_size)
    }

    /// Convenience wrapper over [`Self::peek`] + [`Self::read_token`].
    /// Returns `Ok(None)` on lock contention, same as [`Self::peek`].
    pub fn peek_value<T: Copy>(&self, pos: usize) -> Result<Option<T>, ChannelError> {
        if std::mem::size_of::<T>() != self.token_size {
            return Err(ChannelError::invalid_argument(
                "peek_value: size_of::<T>() does not match tokenSize",
            ));
        }
        match self.peek(pos)? {
            Some(ring_index) => Ok(Some(unsafe { self.read_token(ring_index) })),
            None => Ok(None),
        }
    }

    /// `pop(n)` (spec.md §4.5): brackets the TAIL advance in the same lock.
    /// Returns `Ok(false)` — never an error — on contention, matching
    /// [`MpscLockingProducer::push`]'s contention convention.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if `n > capacity`. `OutOfRange` if, once the lock
    /// is held, `n` exceeds the current depth.
    pub fn pop(&self, n: usize) -> Result<bool, ChannelError> {
        if n == 0 {
            return Ok(true);
        }
        if n > self.capacity {
            return Err(ChannelError::invalid_argument("pop: n exceeds capacity"));
        }
        if !self.comm.acquire_global_lock(SlotRef::Local(&self.shared_coordination)) {
            self.metrics.add_lock_contended();
            return Ok(false);
        }
        let result = self.pop_locked(n);
        self.comm.release_global_lock(SlotRef::Local(&self.shared_coordination));
        result.map(|()| true)
    }

    fn pop_locked(&self, n: usize) -> Result<(), ChannelError> {
        let cb = self.buffer();
        if n > cb.get_depth() {
            return Err(ChannelError::out_of_range("pop: n exceeds depth"));
        }
        cb.advance_tail(n);
        self.metrics.add_messages_received(n as u64);
        self.metrics.add_batch_received();
        Ok(())
    }
}
