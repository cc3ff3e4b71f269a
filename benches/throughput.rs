use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::thread;

use fabric_channels::channel::mpsc_locking::{MpscLockingConsumer, MpscLockingProducer};
use fabric_channels::channel::mpsc_nonlocking::{connect_producer, MpscNonLockingConsumer};
use fabric_channels::channel::spsc::build_pair;
use fabric_channels::comm::PthreadsCommunicationManager;
use fabric_channels::memory::{HostMemoryManager, MemorySpace};

const MSG_COUNT: u64 = 200_000;
const CAPACITY: usize = 4096;
const TOKEN_SIZE: usize = std::mem::size_of::<u64>();

fn bench_spsc(c: &mut Criterion) {
    let mut group = c.benchmark_group("spsc");
    group.throughput(Throughput::Elements(MSG_COUNT));

    group.bench_function("single_producer_consumer", |b| {
        b.iter(|| {
            // build_pair drives both `connect()` calls from this one thread,
            // so the fence only ever needs to rendezvous a single party.
            let comm = PthreadsCommunicationManager::new(1);
            let mem = HostMemoryManager::new();
            let space = MemorySpace::host(0);
            let (producer, consumer) =
                build_pair(comm, &mem, space, 0, TOKEN_SIZE, CAPACITY).unwrap();

            let producer_handle = thread::spawn(move || {
                let mem = HostMemoryManager::new();
                let space = MemorySpace::host(0);
                let mut sent = 0u64;
                while sent < MSG_COUNT {
                    if producer.push_value(&mem, &space, sent).is_ok() {
                        sent += 1;
                    } else {
                        std::hint::spin_loop();
                    }
                }
            });

            let mut received = 0u64;
            while received < MSG_COUNT {
                if consumer.depth() > 0 {
                    let v = consumer.peek_value::<u64>(0).unwrap();
                    black_box(v);
                    consumer.pop(1).unwrap();
                    received += 1;
                } else {
                    consumer.update_depth();
                    std::hint::spin_loop();
                }
            }

            producer_handle.join().unwrap();
        });
    });

    group.finish();
}

fn bench_mpsc_locking(c: &mut Criterion) {
    let mut group = c.benchmark_group("mpsc_locking");

    for num_producers in [2, 4, 8].iter() {
        let total = MSG_COUNT * (*num_producers as u64);
        group.throughput(Throughput::Elements(total));

        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{n}P_1C", n = num_producers)),
            num_producers,
            |b, &n| {
                b.iter(|| {
                    let comm = PthreadsCommunicationManager::new(n + 1);
                    let space = MemorySpace::host(0);

                    let consumer_comm = comm.clone();
                    let consumer_handle = thread::spawn(move || {
                        let mem = HostMemoryManager::new();
                        MpscLockingConsumer::connect(consumer_comm, &mem, space, 1, TOKEN_SIZE, CAPACITY)
                            .unwrap()
                    });

                    let producer_handles: Vec<_> = (0..n)
                        .map(|_| {
                            let comm = comm.clone();
                            thread::spawn(move || {
                                let mem = HostMemoryManager::new();
                                let producer =
                                    MpscLockingProducer::connect(comm, &mem, space, 1, TOKEN_SIZE, CAPACITY)
                                        .unwrap();
                                let mut sent = 0u64;
                                while sent < MSG_COUNT {
                                    if producer.push_value(&mem, &space, sent).unwrap() {
                                        sent += 1;
                                    } else {
                                        std::hint::spin_loop();
                                    }
                                }
                            })
                        })
                        .collect();

                    let consumer = consumer_handle.join().unwrap();
                    let mut received = 0u64;
                    while received < total {
                        while consumer.depth() == 0 {
                            std::hint::spin_loop();
                        }
                        let drained = consumer.depth();
                        for pos in 0..drained {
                            loop {
                                if let Some(v) = consumer.peek_value::<u64>(pos).unwrap() {
                                    black_box(v);
                                    break;
                                }
                                std::hint::spin_loop();
                            }
                        }
                        loop {
                            if consumer.pop(drained).unwrap() {
                                break;
                            }
                            std::hint::spin_loop();
                        }
                        received += drained as u64;
                    }

                    for handle in producer_handles {
                        handle.join().unwrap();
                    }
                });
            },
        );
    }

    group.finish();
}

fn bench_mpsc_nonlocking(c: &mut Criterion) {
    let mut group = c.benchmark_group("mpsc_nonlocking");

    for num_producers in [2, 4, 8].iter() {
        let total = MSG_COUNT * (*num_producers as u64);
        group.throughput(Throughput::Elements(total));

        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{n}P_1C", n = num_producers)),
            num_producers,
            |b, &n| {
                b.iter(|| {
                    // Every producer-consumer pair in this variant fences on
                    // its own tag, so the shared barrier only ever needs to
                    // rendezvous two parties (one producer, the consumer) at
                    // a time, regardless of `n`.
                    let comm = PthreadsCommunicationManager::new(2);
                    let space = MemorySpace::host(0);

                    let consumer_handle = {
                        let comm = comm.clone();
                        thread::spawn(move || {
                            let mem = HostMemoryManager::new();
                            MpscNonLockingConsumer::connect(comm, &mem, space, 10, n, TOKEN_SIZE, CAPACITY)
                                .unwrap()
                        })
                    };

                    let producer_handles: Vec<_> = (0..n)
                        .map(|i| {
                            let comm = comm.clone();
                            thread::spawn(move || {
                                let mem = HostMemoryManager::new();
                                let space = MemorySpace::host(0);
                                let producer =
                                    connect_producer(comm, &mem, space, 10, i, TOKEN_SIZE, CAPACITY)
                                        .unwrap();
                                let mut sent = 0u64;
                                while sent < MSG_COUNT {
                                    if producer.push_value(&mem, &space, sent).is_ok() {
                                        sent += 1;
                                    } else {
                                        std::hint::spin_loop();
                                    }
                                }
                            })
                        })
                        .collect();

                    let mut consumer = consumer_handle.join().unwrap();
                    let mut received = 0u64;
                    while received < total {
                        consumer.update_depth();
                        while !consumer.is_empty() {
                            black_box(consumer.peek_value::<u64>(0).unwrap());
                            consumer.pop(1).unwrap();
                            received += 1;
                        }
                        std::hint::spin_loop();
                    }

                    for handle in producer_handles {
                        handle.join().unwrap();
                    }
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_spsc, bench_mpsc_locking, bench_mpsc_nonlocking);
criterion_main!(benches);
