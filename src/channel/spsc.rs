//! SPSC Producer/Consumer (spec.md §4.3/§4.4): the highest-weighted
//! component of this crate. One producer, one consumer, each holding a
//! coordination buffer the *other* side writes into.

use crate::circular_buffer::{
    coordination_buffer_size, initialize_coordination_buffer, CircularBuffer,
    HEAD_ADVANCE_COUNT_IDX, TAIL_ADVANCE_COUNT_IDX, WORD_SIZE,
};
use crate::comm::{CommunicationManager, SlotRef, Tag};
use crate::error::ChannelError;
use crate::memory::{LocalMemorySlot, MemoryManager, MemorySpace};
use crate::metrics::{Metrics, MetricsSnapshot};

use super::{token_buffer_size, validate_construction, WellKnownKey};

/// The producer side of an SPSC channel.
///
/// Owns the coordination buffer the *consumer* writes TAIL into; the
/// producer itself only ever advances HEAD. Its token buffer lives on the
/// consumer's side (the producer only ever writes into it remotely).
pub struct SpscProducer<C: CommunicationManager> {
    comm: C,
    token_size: usize,
    capacity: usize,
    local_coordination: LocalMemorySlot,
    remote_consumer_coordination: crate::memory::GlobalMemorySlot,
    remote_consumer_token_buffer: crate::memory::GlobalMemorySlot,
    metrics: Metrics,
}

/// The consumer side of an SPSC channel.
///
/// Owns the token buffer and the coordination buffer the *producer* writes
/// HEAD into; the consumer itself only ever advances TAIL.
pub struct SpscConsumer<C: CommunicationManager> {
    comm: C,
    token_size: usize,
    capacity: usize,
    token_buffer: LocalMemorySlot,
    local_coordination: LocalMemorySlot,
    remote_producer_coordination: crate::memory::GlobalMemorySlot,
    metrics: Metrics,
}

impl<C: CommunicationManager> SpscProducer<C> {
    /// Performs the collective construction described in spec.md §6:
    /// publish this side's coordination buffer, fence, then bind to the
    /// consumer's token buffer and coordination buffer.
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

        let local_coordination = mem
            .allocate_local_memory_slot(&space, coordination_buffer_size())
            .map_err(|_| ChannelError::transport("failed to allocate coordination buffer"))?;
        initialize_coordination_buffer(&local_coordination)?;

        let owner = comm.new_instance();
        comm.exchange_global_memory_slots(
            tag,
            &[(WellKnownKey::PRODUCER_COORDINATION, local_coordination.clone())],
            owner,
        )?;
        comm.fence_tag(tag);

        let remote_consumer_coordination = comm
            .get_global_memory_slot(tag, WellKnownKey::CONSUMER_COORDINATION)
            .ok_or_else(|| ChannelError::transport("consumer coordination buffer not published"))?;
        let remote_consumer_token_buffer = comm
            .get_global_memory_slot(tag, WellKnownKey::TOKEN_BUFFER)
            .ok_or_else(|| ChannelError::transport("consumer token buffer not published"))?;

        validate_construction(
            token_size,
            capacity,
            remote_consumer_token_buffer.local().size(),
            local_coordination.size(),
        )?;

        Ok(Self {
            comm,
            token_size,
            capacity,
            local_coordination,
            remote_consumer_coordination,
            remote_consumer_token_buffer,
            metrics: Metrics::new(),
        })
    }

    /// `updateDepth()`: applies any TAIL advance the consumer has pushed
    /// into this producer's local coordination buffer.
    pub fn update_depth(&self) {
        self.comm.query_memory_slot_updates(&self.local_coordination);
    }

    fn buffer(&self) -> CircularBuffer<'_> {
        CircularBuffer::new(&self.local_coordination, self.capacity)
    }

    pub fn depth(&self) -> usize {
        self.buffer().get_depth()
    }

    pub fn is_full(&self) -> bool {
        self.buffer().is_full()
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

    /// `push(sourceSlot, n)` (spec.md §4.3): copies `n` tokens from
    /// `source` into the consumer's remote token buffer, then publishes the
    /// new HEAD.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if `source` is smaller than `n * tokenSize`, or `n`
    /// structurally exceeds `capacity`. `OutOfRange` if there is not
    /// currently enough free capacity to hold `n` more tokens.
    pub fn push(&self, source: &LocalMemorySlot, n: usize) -> Result<(), ChannelError> {
        if n == 0 {
            return Ok(());
        }
        if n > self.capacity {
            return Err(ChannelError::invalid_argument("push: n exceeds capacity"));
        }
        if source.size() < n * self.token_size {
            return Err(ChannelError::invalid_argument(
                "push: source slot smaller than n * tokenSize",
            ));
        }

        self.update_depth();
        let cb = self.buffer();
        let depth = cb.get_depth();
        if depth + n > self.capacity {
            return Err(ChannelError::out_of_range("push: not enough free capacity"));
        }

        let sent_before = source.messages_sent();
        let recv_before = source.messages_received();

        for i in 0..n {
            let ring_index = cb.get_head();
            self.comm.memcpy(
                SlotRef::Global(&self.remote_consumer_token_buffer),
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

        let coord_sent_before = self.local_coordination.messages_sent();
        self.comm.memcpy(
            SlotRef::Global(&self.remote_consumer_coordination),
            HEAD_ADVANCE_COUNT_IDX,
            SlotRef::Local(&self.local_coordination),
            HEAD_ADVANCE_COUNT_IDX,
            WORD_SIZE,
        )?;
        self.comm.fence_slot(
            SlotRef::Local(&self.local_coordination),
            coord_sent_before + 1,
            self.local_coordination.messages_received(),
        );

        self.metrics.add_messages_sent(n as u64);
        self.metrics.add_batch_sent();
        Ok(())
    }

    /// Convenience wrapper: pushes a single `Copy` value by registering a
    /// transient source slot for it. Not on the hot path — callers that push
    /// many tokens should build their own reusable source slot and call
    /// [`Self::push`] directly, the way a batch producer would.
    pub fn push_value<T: Copy>(
        &self,
        mem: &dyn MemoryManager,
        space: &MemorySpace,
        value: T,
    ) -> Result<(), ChannelError> {
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

impl<C: CommunicationManager> SpscConsumer<C> {
    /// Performs the collective construction described in spec.md §6:
    /// publish this side's token buffer and coordination buffer, fence,
    /// then bind to the producer's coordination buffer.
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
        let local_coordination = mem
            .allocate_local_memory_slot(&space, coordination_buffer_size())
            .map_err(|_| ChannelError::transport("failed to allocate coordination buffer"))?;
        initialize_coordination_buffer(&local_coordination)?;

        let owner = comm.new_instance();
        comm.exchange_global_memory_slots(
            tag,
            &[
                (WellKnownKey::TOKEN_BUFFER, token_buffer.clone()),
                (WellKnownKey::CONSUMER_COORDINATION, local_coordination.clone()),
            ],
            owner,
        )?;
        comm.fence_tag(tag);

        let remote_producer_coordination = comm
            .get_global_memory_slot(tag, WellKnownKey::PRODUCER_COORDINATION)
            .ok_or_else(|| ChannelError::transport("producer coordination buffer not published"))?;

        validate_construction(
            token_size,
            capacity,
            token_buffer.size(),
            local_coordination.size(),
        )?;

        Ok(Self {
            comm,
            token_size,
            capacity,
            token_buffer,
            local_coordination,
            remote_producer_coordination,
            metrics: Metrics::new(),
        })
    }

    /// `updateDepth()`: applies any HEAD advance the producer has pushed
    /// into this consumer's local coordination buffer.
    pub fn update_depth(&self) {
        self.comm.query_memory_slot_updates(&self.local_coordination);
    }

    fn buffer(&self) -> CircularBuffer<'_> {
        CircularBuffer::new(&self.local_coordination, self.capacity)
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

    /// `peek(pos)` (spec.md §4.4): returns the ring index of the token
    /// `pos` slots behind the current depth, without consuming it.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if `pos >= capacity` (structurally out of bounds
    /// regardless of depth). `OutOfRange` if `pos >= depth` (no such token
    /// has arrived yet).
    pub fn peek(&self, pos: usize) -> Result<usize, ChannelError> {
        if pos >= self.capacity {
            return Err(ChannelError::invalid_argument("peek: pos >= capacity"));
        }
        self.update_depth();
        let cb = self.buffer();
        if pos >= cb.get_depth() {
            return Err(ChannelError::out_of_range("peek: pos >= depth"));
        }
        Ok(((cb.tail_count() + pos as u64) % self.capacity as u64) as usize)
    }

    /// Reads the token at ring index `ring_index` as a `T`.
    ///
    /// # Safety
    ///
    /// `ring_index` must be a value previously returned by [`Self::peek`]
    /// for a token that has not since been popped, and `size_of::<T>()`
    /// must not exceed `tokenSize`.
    pub unsafe fn read_token<T: Copy>(&self, ring_index: usize) -> T {
        self.token_buffer.read_at(ring_index * self.token_size)
    }

    /// Convenience wrapper over [`Self::peek`] + [`Self::read_token`] for
    /// fixed-size `Copy` tokens.
    pub fn peek_value<T: Copy>(&self, pos: usize) -> Result<T, ChannelError> {
        if std::mem::size_of::<T>() != self.token_size {
            return Err(ChannelError::invalid_argument(
                "peek_value: size_of::<T>() does not match tokenSize",
            ));
        }
        let ring_index = self.peek(pos)?;
        Ok(unsafe { self.read_token(ring_index) })
    }

    /// `pop(n)` (spec.md §4.4): advances TAIL by `n`, then publishes the
    /// new TAIL to the producer.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if `n > capacity`. `OutOfRange` if `n` exceeds the
    /// current depth.
    pub fn pop(&self, n: usize) -> Result<(), ChannelError> {
        if n == 0 {
            return Ok(());
        }
        if n > self.capacity {
            return Err(ChannelError::invalid_argument("pop: n exceeds capacity"));
        }
        self.update_depth();
        let cb = self.buffer();
        if n > cb.get_depth() {
            return Err(ChannelError::out_of_range("pop: n exceeds depth"));
        }
        cb.advance_tail(n);

        let coord_sent_before = self.local_coordination.messages_sent();
        self.comm.memcpy(
            SlotRef::Global(&self.remote_producer_coordination),
            TAIL_ADVANCE_COUNT_IDX,
            SlotRef::Local(&self.local_coordination),
            TAIL_ADVANCE_COUNT_IDX,
            WORD_SIZE,
        )?;
        self.comm.fence_slot(
            SlotRef::Local(&self.local_coordination),
            coord_sent_before + 1,
            self.local_coordination.messages_received(),
        );

        self.metrics.add_messages_received(n as u64);
        self.metrics.add_batch_received();
        Ok(())
    }
}

/// Drives both sides of a construction for same-process test and benchmark
/// harnesses, where one thread happens to own both handles. A real
/// deployment calls [`SpscProducer::connect`]/[`SpscConsumer::connect`]
/// independently, each on its own participant.
pub fn build_pair<C: CommunicationManager>(
    comm: C,
    mem: &dyn MemoryManager,
    space: MemorySpace,
    tag: Tag,
    token_size: usize,
    capacity: usize,
) -> Result<(SpscProducer<C>, SpscConsumer<C>), ChannelError> {
    let consumer = SpscConsumer::connect(comm.clone(), mem, space, tag, token_size, capacity)?;
    let producer = SpscProducer::connect(comm, mem, space, tag, token_size, capacity)?;
    Ok((producer, consumer))
}
