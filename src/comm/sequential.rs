use std::cell::RefCell;
use std::rc::Rc;

use super::{do_memcpy, spin_until_fenced, CommunicationManager, GlobalKey, RegistryState, SlotRef, Tag};
use crate::error::ChannelError;
use crate::memory::{GlobalMemorySlot, InstanceId, LocalMemorySlot};

/// A single-threaded binding with no internal synchronization, intended for
/// deterministic unit/property tests where both endpoints are driven from
/// the same thread.
///
/// This mirrors the "sequential" backend of this class of runtime: the
/// simplest possible implementation of the contract, used as a baseline and
/// for tests that don't need real concurrency. It deliberately has no
/// `Send`/`Sync` bound — sharing a `SequentialCommunicationManager` across
/// threads is a compile error, not a runtime race.
#[derive(Clone)]
pub struct SequentialCommunicationManager {
    registry: Rc<RefCell<RegistryState>>,
}

impl SequentialCommunicationManager {
    pub fn new() -> Self {
        Self {
            registry: Rc::new(RefCell::new(RegistryState::default())),
        }
    }
}

impl Default for SequentialCommunicationManager {
    fn default() -> Self {
        Self::new()
    }
}

impl CommunicationManager for SequentialCommunicationManager {
    fn memcpy(
        &self,
        dst: SlotRef<'_>,
        dst_offset: usize,
        src: SlotRef<'_>,
        src_offset: usize,
        size: usize,
    ) -> Result<(), ChannelError> {
        do_memcpy(dst, dst_offset, src, src_offset, size)
    }

    fn fence_tag(&self, _tag: Tag) {
        // Every memcpy above already applied synchronously; nothing to wait for.
    }

    fn fence_slot(&self, slot: SlotRef<'_>, expected_sent: u64, expected_recv: u64) {
        spin_until_fenced(slot, expected_sent, expected_recv);
    }

    fn exchange_global_memory_slots(
        &self,
        tag: Tag,
        keyed: &[(GlobalKey, LocalMemorySlot)],
        owner: InstanceId,
    ) -> Result<(), ChannelError> {
        self.registry.borrow_mut().publish(tag, keyed, owner)
    }

    fn get_global_memory_slot(&self, tag: Tag, key: GlobalKey) -> Option<GlobalMemorySlot> {
        self.registry.borrow().get(tag, key)
    }

    fn destroy_global_memory_slot(&self, tag: Tag, key: GlobalKey) {
        self.registry.borrow_mut().destroy(tag, key);
    }

    fn query_memory_slot_updates(&self, _slot: &LocalMemorySlot) {}

    fn acquire_global_lock(&self, slot: SlotRef<'_>) -> bool {
        let identity = slot.local().identity();
        let bit = self.registry.borrow_mut().lock_bit(identity);
        bit.compare_exchange(
            false,
            true,
            std::sync::atomic::Ordering::Acquire,
            std::sync::atomic::Ordering::Relaxed,
        )
        .is_ok()
    }

    fn release_global_lock(&self, slot: SlotRef<'_>) {
        let identity = slot.local().identity();
        let bit = self.registry.borrow_mut().lock_bit(identity);
        let was_held = bit.swap(false, std::sync::atomic::Ordering::Release);
        assert!(was_held, "release_global_lock: lock was not held");
    }

    fn flush_received(&self) {}

    fn new_instance(&self) -> InstanceId {
        self.registry.borrow_mut().next_instance()
    }
}
