//! CommunicationManager contract (spec.md §4.1 / §6): the one-sided
//! memcpy/fence/global-slot-exchange/global-lock operation set the channel
//! core consumes. Modeled as a trait per the Design Notes ("model it as an
//! interface trait (Rust)"), with the operation set kept closed — backends
//! must not grow methods the core secretly depends on.

mod pthreads;
mod sequential;

pub use pthreads::PthreadsCommunicationManager;
pub use sequential::SequentialCommunicationManager;

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::ChannelError;
use crate::memory::{GlobalMemorySlot, InstanceId, LocalMemorySlot};

/// Scopes a collective exchange of global memory slots.
pub type Tag = u64;

/// Names one slot within an `exchangeGlobalMemorySlots` call.
pub type GlobalKey = u64;

/// Either endpoint of a `memcpy`/`fence`: a slot this process owns, or a
/// handle to one owned by another participant.
pub enum SlotRef<'a> {
    Local(&'a LocalMemorySlot),
    Global(&'a GlobalMemorySlot),
}

impl SlotRef<'_> {
    fn local(&self) -> &LocalMemorySlot {
        match self {
            SlotRef::Local(slot) => slot,
            SlotRef::Global(slot) => slot.local(),
        }
    }
}

impl<'a> From<&'a LocalMemorySlot> for SlotRef<'a> {
    fn from(slot: &'a LocalMemorySlot) -> Self {
        SlotRef::Local(slot)
    }
}

impl<'a> From<&'a GlobalMemorySlot> for SlotRef<'a> {
    fn from(slot: &'a GlobalMemorySlot) -> Self {
        SlotRef::Global(slot)
    }
}

/// The operation set the channel core consumes (spec.md §4.1). All
/// operations are non-blocking except where noted on the method itself.
pub trait CommunicationManager: Clone {
    /// Posts a one-sided transfer. Completion is only observable after a
    /// matching `fence` on the same tag or slot. On completion this MUST
    /// atomically increment `src.messagesSent` and `dst.messagesRecv` by one,
    /// independent of `size`.
    ///
    /// Per spec.md §7, a failure here is fatal for the affected channel;
    /// it is returned as a `Transport` error for the caller to propagate
    /// rather than retry.
    fn memcpy(
        &self,
        dst: SlotRef<'_>,
        dst_offset: usize,
        src: SlotRef<'_>,
        src_offset: usize,
        size: usize,
    ) -> Result<(), ChannelError>;

    /// Blocks until all `memcpy`s published under `tag` are observed, locally
    /// and globally.
    fn fence_tag(&self, tag: Tag);

    /// Blocks until `slot`'s `messagesSent`/`messagesRecv` counters reach the
    /// given expected values.
    fn fence_slot(&self, slot: SlotRef<'_>, expected_sent: u64, expected_recv: u64);

    /// Collective: publishes `keyed` slots under `tag`. Must be followed by
    /// `fence_tag(tag)` before any participant's `get_global_memory_slot`
    /// calls for that tag are guaranteed to succeed. Repeating this with a
    /// live `(tag, key)` pair (no intervening `destroy` + fence) is a usage
    /// error.
    fn exchange_global_memory_slots(
        &self,
        tag: Tag,
        keyed: &[(GlobalKey, LocalMemorySlot)],
        owner: InstanceId,
    ) -> Result<(), ChannelError>;

    /// Retrieves a slot published under `(tag, key)`, if any.
    fn get_global_memory_slot(&self, tag: Tag, key: GlobalKey) -> Option<GlobalMemorySlot>;

    /// Removes `(tag, key)` from the registry. The pair may be reused only
    /// after a following `fence_tag(tag)`.
    fn destroy_global_memory_slot(&self, tag: Tag, key: GlobalKey);

    /// Requests that any asynchronous arrivals into `slot` be applied to its
    /// counters. A no-op for bindings (like both of this crate's) that apply
    /// every `memcpy` synchronously.
    fn query_memory_slot_updates(&self, slot: &LocalMemorySlot);

    /// Non-blocking try-acquire. Reentrant-unsafe: acquiring a lock already
    /// held by the caller self-deadlocks (the caller simply gets `false`
    /// back, since the bit is already set).
    fn acquire_global_lock(&self, slot: SlotRef<'_>) -> bool;

    /// Releases a lock previously acquired by this caller. Releasing a lock
    /// that is not held is a logic error.
    ///
    /// # Panics
    ///
    /// Panics if the lock identified by `slot` is not currently held.
    fn release_global_lock(&self, slot: SlotRef<'_>);

    /// Drains the local receive queue, making prior sends visible to the
    /// application layer. A no-op for this crate's synchronous bindings.
    fn flush_received(&self);

    /// Allocates a fresh [`InstanceId`] for a participant (producer or
    /// consumer endpoint) constructed against this manager.
    fn new_instance(&self) -> InstanceId;
}

/// Registry state shared by both bindings: published global slots and the
/// per-slot lock bits used by `acquire_global_lock`/`release_global_lock`.
/// Kept binding-agnostic so the sequential and pthreads implementations only
/// differ in how they synchronize access to it.
#[derive(Default)]
pub(crate) struct RegistryState {
    published: HashMap<(Tag, GlobalKey), GlobalMemorySlot>,
    locks: HashMap<usize, Arc<std::sync::atomic::AtomicBool>>,
    next_instance: u64,
}

impl RegistryState {
    fn publish(
        &mut self,
        tag: Tag,
        keyed: &[(GlobalKey, LocalMemorySlot)],
        owner: InstanceId,
    ) -> Result<(), ChannelError> {
        for (key, _) in keyed {
            if self.published.contains_key(&(tag, *key)) {
                return Err(ChannelError::invalid_argument(
                    "exchangeGlobalMemorySlots: (tag, key) already live",
                ));
            }
        }
        for (key, slot) in keyed {
            self.published
                .insert((tag, *key), GlobalMemorySlot::new(tag, *key, owner, slot.clone()));
        }
        Ok(())
    }

    fn get(&self, tag: Tag, key: GlobalKey) -> Option<GlobalMemorySlot> {
        self.published.get(&(tag, key)).cloned()
    }

    fn destroy(&mut self, tag: Tag, key: GlobalKey) {
        self.published.remove(&(tag, key));
    }

    fn next_instance(&mut self) -> InstanceId {
        let id = self.next_instance;
        self.next_instance += 1;
        InstanceId(id)
    }

    fn lock_bit(&mut self, identity: usize) -> Arc<std::sync::atomic::AtomicBool> {
        self.locks
            .entry(identity)
            .or_insert_with(|| Arc::new(std::sync::atomic::AtomicBool::new(false)))
            .clone()
    }
}

/// Performs the byte copy and counter bookkeeping common to every binding.
/// Failures are bounds/use-after-free checks surfaced as `Transport` errors
/// rather than undefined behaviour.
fn do_memcpy(
    dst: SlotRef<'_>,
    dst_offset: usize,
    src: SlotRef<'_>,
    src_offset: usize,
    size: usize,
) -> Result<(), ChannelError> {
    let dst_slot = dst.local();
    let src_slot = src.local();

    if dst_slot.is_freed() || src_slot.is_freed() {
        return Err(ChannelError::transport("memcpy on a freed memory slot"));
    }
    if dst_offset
        .checked_add(size)
        .is_none_or(|end| end > dst_slot.size())
    {
        return Err(ChannelError::transport("memcpy destination out of bounds"));
    }
    if src_offset
        .checked_add(size)
        .is_none_or(|end| end > src_slot.size())
    {
        return Err(ChannelError::transport("memcpy source out of bounds"));
    }

    // SAFETY: bounds were just checked above. The channel protocol is the
    // one-sided transport's only synchronization: producer and consumer
    // write disjoint byte ranges (reserved token slots, or coordination
    // words only one side ever writes), exactly as `spec.md` §5 requires.
    unsafe {
        let dst_ptr = dst_slot.as_mut_ptr().add(dst_offset);
        let src_ptr = src_slot.as_ptr().add(src_offset);
        std::ptr::copy_nonoverlapping(src_ptr, dst_ptr, size);
    }

    src_slot.record_sent();
    dst_slot.record_received();
    Ok(())
}

fn spin_until_fenced(slot: SlotRef<'_>, expected_sent: u64, expected_recv: u64) {
    let local = slot.local();
    let mut backoff = crate::backoff::Backoff::new();
    while local.messages_sent() < expected_sent || local.messages_received() < expected_recv {
        backoff.snooze();
        if backoff.is_completed() {
            backoff.reset();
        }
    }
}
