//! Non-locking MPSC (spec.md §4.6): a fan-in of `N` independent SPSC
//! channels, one per producer, so no producer ever contends with another —
//! the tradeoff, per spec.md, is that the consumer must track an
//! `arrivalOrder` queue recording which producer's ring each observed token
//! came from, since there is no single shared HEAD/TAIL pair to read a
//! global position out of.
//!
//! Grounded in the teacher's `Channel<T>`/`Producer<T>` ring-decomposition
//! design (`channel.rs`): "Each producer gets a dedicated SPSC ring,
//! eliminating producer-producer contention." That design's round-robin
//! `recv`/`consume_all` is generalized here into the `arrivalOrder`
//! first-observed-order queue spec.md requires.

use std::collections::VecDeque;

use crate::comm::{CommunicationManager, Tag};
use crate::error::ChannelError;
use crate::memory::{MemoryManager, MemorySpace};
use crate::metrics::MetricsSnapshot;

use super::spsc::{SpscConsumer, SpscProducer};

/// Fan-in consumer for the non-locking MPSC variant.
///
/// Holds one [`SpscConsumer`] per producer plus the `arrivalOrder` queue:
/// each time [`Self::update_depth`] observes a producer's depth increase by
/// `k`, it appends that producer's index `k` times, in producer-iteration
/// order. This is "first observed", not wall-clock arrival order — the
/// same relaxation spec.md's Design Notes accept for this variant.
pub struct MpscNonLockingConsumer<C: CommunicationManager> {
    consumers: Vec<SpscConsumer<C>>,
    arrival_order: VecDeque<usize>,
    depths: Vec<usize>,
}

impl<C: CommunicationManager> MpscNonLockingConsumer<C> {
    /// Connects `num_producers` independent SPSC consumers, one per tag in
    /// `tag_base .. tag_base + num_producers`.
    pub fn connect(
        comm: C,
        mem: &dyn MemoryManager,
        space: MemorySpace,
        tag_base: Tag,
        num_producers: usize,
        token_size: usize,
        capacity: usize,
    ) -> Result<Self, ChannelError> {
        if num_producers == 0 {
            return Err(ChannelError::invalid_argument("num_producers must be >= 1"));
        }
        let mut consumers = Vec::with_capacity(num_producers);
        for i in 0..num_producers {
            consumers.push(SpscConsumer::connect(
                comm.clone(),
                mem,
                space,
                tag_base + i as Tag,
                token_size,
                capacity,
            )?);
        }
        let depths = vec![0; num_producers];
        Ok(Self {
            consumers,
            arrival_order: VecDeque::new(),
            depths,
        })
    }

    pub fn num_producers(&self) -> usize {
        self.consumers.len()
    }

    /// Refreshes every sub-consumer's depth and extends `arrivalOrder` with
    /// any newly observed tokens, in producer-index order.
    ///
    /// # Panics
    ///
    /// Panics (a fatal protocol-bug abort, per spec.md §7) if
    /// `sum(depths) != arrivalOrder.len()` after the refresh — the
    /// consistency invariant this variant's Design Notes require.
    pub fn update_depth(&mut self) {
        for (idx, consumer) in self.consumers.iter().enumerate() {
            consumer.update_depth();
            let new_depth = consumer.depth();
            let old_depth = self.depths[idx];
            if new_depth > old_depth {
                for _ in 0..(new_depth - old_depth) {
                    self.arrival_order.push_back(idx);
                }
            }
            self.depths[idx] = new_depth;
        }
        let total_depth: usize = self.depths.iter().sum();
        assert_eq!(
            total_depth,
            self.arrival_order.len(),
            "FATAL: sum(depths) != arrivalOrder length (depths={:?}, arrivalOrder.len()={})",
            self.depths,
            self.arrival_order.len()
        );
    }

    /// Total tokens currently queued across every producer's ring.
    pub fn depth(&self) -> usize {
        self.arrival_order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arrival_order.is_empty()
    }

    /// `peek(pos)`. Only `pos == 0` is supported (spec.md §4.6): this
    /// variant can answer "what's next" but not "what's at position k"
    /// without materializing the full interleaving, which `arrivalOrder`
    /// already does lazily rather than eagerly.
    ///
    /// Returns `(producer_index, ring_index)` so the caller can read the
    /// token out of the right producer's ring via
    /// [`SpscConsumer::read_token`].
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if `pos != 0`. `OutOfRange` if the queue is empty.
    pub fn peek(&mut self, pos: usize) -> Result<(usize, usize), ChannelError> {
        if pos != 0 {
            return Err(ChannelError::invalid_argument(
                "non-locking MPSC peek only supports pos == 0",
            ));
        }
        self.update_depth();
        let producer_index = *self
            .arrival_order
            .front()
            .ok_or_else(|| ChannelError::out_of_range("peek: queue is empty"))?;
        let ring_index = self.consumers[producer_index].peek(0)?;
        Ok((producer_index, ring_index))
    }

    pub fn peek_value<T: Copy>(&mut self, pos: usize) -> Result<T, ChannelError> {
        if pos != 0 {
            return Err(ChannelError::invalid_argument(
                "non-locking MPSC peek only supports pos == 0",
            ));
        }
        self.update_depth();
        let producer_index = *self
            .arrival_order
            .front()
            .ok_or_else(|| ChannelError::out_of_range("peek: queue is empty"))?;
        self.consumers[producer_index].peek_value::<T>(0)
    }

    /// `pop(n)`: dequeues the first `n` entries of `arrivalOrder` and pops
    /// the corresponding count from each affected producer's ring. Grouping
    /// by producer (rather than issuing `n` individual single-token pops)
    /// keeps this at one `pop` call per distinct producer in the batch,
    /// matching the teacher's batch-consume design intent.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if `n > capacity` for any affected ring (surfaced
    /// by the underlying [`SpscConsumer::pop`]). `OutOfRange` if `n` exceeds
    /// the total queued depth.
    pub fn pop(&mut self, n: usize) -> Result<(), ChannelError> {
        if n == 0 {
            return Ok(());
        }
        self.update_depth();
        if n > self.arrival_order.len() {
            return Err(ChannelError::out_of_range("pop: n exceeds depth"));
        }

        let mut counts = vec![0usize; self.consumers.len()];
        for _ in 0..n {
            let idx = self
                .arrival_order
                .pop_front()
                .expect("checked against arrival_order.len() above");
            counts[idx] += 1;
        }
        for (idx, count) in counts.into_iter().enumerate() {
            if count > 0 {
                self.consumers[idx].pop(count)?;
                self.depths[idx] -= count;
            }
        }
        Ok(())
    }

    /// Aggregated metrics across every producer-facing ring.
    pub fn metrics(&self) -> MetricsSnapshot {
        let mut snapshot = MetricsSnapshot::default();
        for consumer in &self.consumers {
            let m = consumer.metrics();
            snapshot.messages_received += m.messages_received;
            snapshot.batches_received += m.batches_received;
        }
        snapshot
    }
}

/// Connects the producer side of ring `producer_index` of a non-locking
/// MPSC channel. Plain [`SpscProducer`]s — this variant needs nothing
/// beyond the ordinary SPSC protocol on the producer side, since fan-in
/// bookkeeping is entirely the consumer's responsibility.
pub fn connect_producer<C: CommunicationManager>(
    comm: C,
    mem: &dyn MemoryManager,
    space: MemorySpace,
    tag_base: Tag,
    producer_index: usize,
    token_size: usize,
    capacity: usize,
) -> Result<SpscProducer<C>, ChannelError> {
    SpscProducer::connect(
        comm,
        mem,
        space,
        tag_base + producer_index as Tag,
        token_size,
        capacity,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::SequentialCommunicationManager;
    use crate::memory::HostMemoryManager;

    fn setup(
        num_producers: usize,
        capacity: usize,
    ) -> (
        Vec<SpscProducer<SequentialCommunicationManager>>,
        MpscNonLockingConsumer<SequentialCommunicationManager>,
    ) {
        let comm = SequentialCommunicationManager::new();
        let mem = HostMemoryManager::new();
        let space = MemorySpace::host(0);
        let token_size = std::mem::size_of::<u64>();

        let consumer = MpscNonLockingConsumer::connect(
            comm.clone(),
            &mem,
            space,
            100,
            num_producers,
            token_size,
            capacity,
        )
        .unwrap();

        let producers = (0..num_producers)
            .map(|i| connect_producer(comm.clone(), &mem, space, 100, i, token_size, capacity).unwrap())
            .collect();

        (producers, consumer)
    }

    #[test]
    fn three_producer_fan_in_preserves_per_producer_order() {
        let (producers, mut consumer) = setup(3, 8);
        let mem = HostMemoryManager::new();
        let space = MemorySpace::host(0);

        producers[0].push_value(&mem, &space, 1u64).unwrap();
        producers[1].push_value(&mem, &space, 10u64).unwrap();
        producers[2].push_value(&mem, &space, 100u64).unwrap();
        producers[0].push_value(&mem, &space, 2u64).unwrap();

        consumer.update_depth();
        assert_eq!(consumer.depth(), 4);

        let mut drained = Vec::new();
        while !consumer.is_empty() {
            let v = consumer.peek_value::<u64>(0).unwrap();
            drained.push(v);
            consumer.pop(1).unwrap();
        }

        let producer0_values: Vec<u64> = drained.iter().copied().filter(|v| *v == 1 || *v == 2).collect();
        assert_eq!(producer0_values, vec![1, 2]);
        assert_eq!(drained.len(), 4);
    }

    #[test]
    fn peek_nonzero_pos_is_invalid_argument() {
        let (producers, mut consumer) = setup(1, 4);
        let mem = HostMemoryManager::new();
        let space = MemorySpace::host(0);
        producers[0].push_value(&mem, &space, 7u64).unwrap();
        assert!(matches!(
            consumer.peek(1),
            Err(ChannelError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn pop_past_depth_is_out_of_range() {
        let (_producers, mut consumer) = setup(2, 4);
        assert!(matches!(consumer.pop(1), Err(ChannelError::OutOfRange { .. })));
    }
}
