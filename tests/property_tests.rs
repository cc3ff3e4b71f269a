//! Property-based tests for the SPSC channel's depth and ordering
//! invariants, run against the deterministic single-threaded binding.

use proptest::prelude::*;

use fabric_channels::channel::spsc::build_pair;
use fabric_channels::comm::SequentialCommunicationManager;
use fabric_channels::memory::{HostMemoryManager, MemorySpace};

const CAPACITY: usize = 16;

proptest! {
    /// Depth never exceeds capacity, and never goes negative, across any
    /// interleaving of single-token pushes and pops.
    #[test]
    fn depth_stays_within_capacity(ops in prop::collection::vec(any::<bool>(), 0..200)) {
        let comm = SequentialCommunicationManager::new();
        let mem = HostMemoryManager::new();
        let space = MemorySpace::host(0);
        let (producer, consumer) = build_pair(comm, &mem, space, 0, 8, CAPACITY).unwrap();

        let mut expected_depth = 0usize;
        for (i, push) in ops.iter().enumerate() {
            if *push {
                if producer.push_value(&mem, &space, i as u64).is_ok() {
                    expected_depth += 1;
                }
            } else if expected_depth > 0 {
                consumer.pop(1).unwrap();
                expected_depth -= 1;
            }
            prop_assert!(consumer.depth() <= CAPACITY);
            prop_assert_eq!(consumer.depth(), expected_depth);
        }
    }

    /// Tokens are observed in the same order they were pushed.
    #[test]
    fn fifo_order_is_preserved(values in prop::collection::vec(any::<u64>(), 0..CAPACITY)) {
        let comm = SequentialCommunicationManager::new();
        let mem = HostMemoryManager::new();
        let space = MemorySpace::host(0);
        let (producer, consumer) = build_pair(comm, &mem, space, 0, 8, CAPACITY).unwrap();

        for v in &values {
            producer.push_value(&mem, &space, *v).unwrap();
        }

        let mut drained = Vec::new();
        while !consumer.is_empty() {
            drained.push(consumer.peek_value::<u64>(0).unwrap());
            consumer.pop(1).unwrap();
        }
        prop_assert_eq!(drained, values);
    }

    /// Pushing k tokens then popping k tokens always returns depth to zero,
    /// regardless of how the k is split across calls.
    #[test]
    fn push_then_pop_conserves_count(
        batch1 in 0usize..CAPACITY,
        batch2 in 0usize..CAPACITY,
    ) {
        let comm = SequentialCommunicationManager::new();
        let mem = HostMemoryManager::new();
        let space = MemorySpace::host(0);
        let (producer, consumer) = build_pair(comm, &mem, space, 0, 8, CAPACITY).unwrap();

        let total = (batch1 + batch2).min(CAPACITY);
        for i in 0..total {
            producer.push_value(&mem, &space, i as u64).unwrap();
        }
        prop_assert_eq!(consumer.depth(), total);
        consumer.pop(total).unwrap();
        prop_assert_eq!(consumer.depth(), 0);
        prop_assert!(consumer.is_empty());
    }

    /// Calling peek repeatedly without an intervening pop always returns the
    /// same token and never changes depth.
    #[test]
    fn peek_is_idempotent(values in prop::collection::vec(any::<u64>(), 1..CAPACITY)) {
        let comm = SequentialCommunicationManager::new();
        let mem = HostMemoryManager::new();
        let space = MemorySpace::host(0);
        let (producer, consumer) = build_pair(comm, &mem, space, 0, 8, CAPACITY).unwrap();

        for v in &values {
            producer.push_value(&mem, &space, *v).unwrap();
        }

        let depth_before = consumer.depth();
        let first = consumer.peek_value::<u64>(0).unwrap();
        for _ in 0..5 {
            prop_assert_eq!(consumer.peek_value::<u64>(0).unwrap(), first);
            prop_assert_eq!(consumer.depth(), depth_before);
        }
    }
}
