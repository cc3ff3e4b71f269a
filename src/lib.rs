//! A distributed, lock-free channel runtime built over a one-sided
//! (remote-memory) operation set: `memcpy`/`fence`/global-slot-exchange/
//! global-lock.
//!
//! Three flow-control protocols share one `CircularBuffer` arithmetic core
//! and one `CommunicationManager`/`MemoryManager` contract pair:
//!
//! - [`channel::spsc`] — single-producer single-consumer, each side owning
//!   the coordination buffer the *other* side writes into.
//! - [`channel::mpsc_locking`] — many producers sharing one consumer-owned
//!   coordination buffer, serialized by a distributed lock.
//! - [`channel::mpsc_nonlocking`] — a fan-in of independent SPSC rings, one
//!   per producer, with an `arrivalOrder` queue standing in for a single
//!   shared position.
//!
//! Two [`comm::CommunicationManager`] bindings are provided:
//! [`comm::SequentialCommunicationManager`] (single-threaded, no internal
//! synchronization — good for deterministic tests) and
//! [`comm::PthreadsCommunicationManager`] (thread-safe, `Barrier`-based
//! fencing). Both operate over an in-process registry; a genuinely
//! cross-process binding implements the same trait against a real
//! transport.
//!
//! # Example
//!
//! ```
//! use fabric_channels::channel::spsc::build_pair;
//! use fabric_channels::comm::SequentialCommunicationManager;
//! use fabric_channels::memory::{HostMemoryManager, MemorySpace};
//!
//! let comm = SequentialCommunicationManager::new();
//! let mem = HostMemoryManager::new();
//! let space = MemorySpace::host(0);
//!
//! let (producer, consumer) = build_pair(comm, &mem, space, 0, 8, 16).unwrap();
//! producer.push_value(&mem, &space, 42u64).unwrap();
//! assert_eq!(consumer.peek_value::<u64>(0).unwrap(), 42);
//! ```

pub mod backoff;
pub mod channel;
pub mod circular_buffer;
pub mod comm;
pub mod config;
pub mod error;
pub mod memory;
pub mod metrics;

pub use backoff::Backoff;
pub use config::{ChannelConfig, HIGH_THROUGHPUT_CONFIG, LOW_LATENCY_CONFIG};
pub use error::ChannelError;
pub use metrics::{Metrics, MetricsSnapshot};
