//! End-to-end non-locking MPSC scenario (spec.md §8 scenario 5): three
//! producers fan into one consumer across real threads, each producer's
//! tokens observed in its own push order, with `arrivalOrder` empty and
//! every sub-ring empty once the consumer has drained everything.

use fabric_channels::channel::mpsc_nonlocking::{connect_producer, MpscNonLockingConsumer};
use fabric_channels::comm::PthreadsCommunicationManager;
use fabric_channels::memory::{HostMemoryManager, MemorySpace};

const TOKEN_SIZE: usize = std::mem::size_of::<u64>();

#[test]
fn three_producers_fan_in_across_threads() {
    const NUM_PRODUCERS: usize = 3;
    const CAPACITY: usize = 2;
    const TAG_BASE: u64 = 20;

    // Every producer/consumer SPSC pair fences on its own tag, so each
    // rendezvous is still just the two parties that share that tag.
    let comm = PthreadsCommunicationManager::new(2);
    let space = MemorySpace::host(0);

    let consumer_comm = comm.clone();
    let consumer_handle = std::thread::spawn(move || {
        let mem = HostMemoryManager::new();
        MpscNonLockingConsumer::connect(
            consumer_comm,
            &mem,
            space,
            TAG_BASE,
            NUM_PRODUCERS,
            TOKEN_SIZE,
            CAPACITY,
        )
        .unwrap()
    });

    // Disjoint value ranges per producer so the consumer can attribute each
    // drained value back to its producer without extra bookkeeping.
    let producer_values = [vec![1u64, 2], vec![2000u64, 2001], vec![3000u64, 3001]];
    let producer_handles: Vec<_> = producer_values
        .iter()
        .cloned()
        .enumerate()
        .map(|(i, values)| {
            let comm = comm.clone();
            std::thread::spawn(move || {
                let mem = HostMemoryManager::new();
                let space = MemorySpace::host(0);
                let producer =
                    connect_producer(comm, &mem, space, TAG_BASE, i, TOKEN_SIZE, CAPACITY).unwrap();
                for v in values {
                    loop {
                        if producer.push_value(&mem, &space, v).is_ok() {
                            break;
                        }
                        std::hint::spin_loop();
                    }
                }
            })
        })
        .collect();

    let mut consumer = consumer_handle.join().unwrap();
    let total: usize = producer_values.iter().map(Vec::len).sum();

    let mut drained = Vec::with_capacity(total);
    while drained.len() < total {
        consumer.update_depth();
        while !consumer.is_empty() {
            drained.push(consumer.peek_value::<u64>(0).unwrap());
            consumer.pop(1).unwrap();
        }
        std::hint::spin_loop();
    }

    for handle in producer_handles {
        handle.join().unwrap();
    }

    assert_eq!(drained.len(), total);

    // Per-producer FIFO: producer 0's values (1, 2) appear in push order
    // among the values drained, same for producers 1 and 2.
    for values in &producer_values {
        let seen: Vec<u64> = drained
            .iter()
            .copied()
            .filter(|v| values.contains(v))
            .collect();
        assert_eq!(&seen, values);
    }

    assert!(consumer.is_empty());
    assert_eq!(consumer.depth(), 0);
}
