use std::collections::HashMap;
use std::sync::{Arc, Barrier, Mutex};

use super::{do_memcpy, spin_until_fenced, CommunicationManager, GlobalKey, RegistryState, SlotRef, Tag};
use crate::error::ChannelError;
use crate::memory::{GlobalMemorySlot, InstanceId, LocalMemorySlot};

/// A thread-safe binding for endpoints that live on distinct threads of the
/// same process — the role spec.md §5 describes as "the pthreads binding
/// takes an internal mutex for exchange/registry operations; the
/// barrier-based fence synchronises the configured fence-count of threads".
#[derive(Clone)]
pub struct PthreadsCommunicationManager {
    registry: Arc<Mutex<RegistryState>>,
    barriers: Arc<Mutex<HashMap<Tag, Arc<Barrier>>>>,
    fence_count: usize,
}

impl PthreadsCommunicationManager {
    /// `fence_count` is the number of participants `fence_tag` rendezvouses
    /// — 2 for a plain SPSC/producer-consumer pair, `max_producers + 1` for
    /// a locking-MPSC construction barrier, and so on.
    pub fn new(fence_count: usize) -> Self {
        assert!(fence_count > 0, "fence_count must be non-zero");
        Self {
            registry: Arc::new(Mutex::new(RegistryState::default())),
            barriers: Arc::new(Mutex::new(HashMap::new())),
            fence_count,
        }
    }

    fn barrier_for(&self, tag: Tag) -> Arc<Barrier> {
        self.barriers
            .lock()
            .unwrap()
            .entry(tag)
            .or_insert_with(|| Arc::new(Barrier::new(self.fence_count)))
            .clone()
    }
}

impl CommunicationManager for PthreadsCommunicationManager {
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

    fn fence_tag(&self, tag: Tag) {
        let barrier = self.barrier_for(tag);
        barrier.wait();
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
        tracing::debug!(tag, count = keyed.len(), "exchanging global memory slots");
        let mut registry = self.registry.lock().unwrap();
        registry.publish(tag, keyed, owner)
    }

    fn get_global_memory_slot(&self, tag: Tag, key: GlobalKey) -> Option<GlobalMemorySlot> {
        self.registry.lock().unwrap().get(tag, key)
    }

    fn destroy_global_memory_slot(&self, tag: Tag, key: GlobalKey) {
        self.registry.lock().unwrap().destroy(tag, key);
    }

    fn query_memory_slot_updates(&self, _slot: &LocalMemorySlot) {}

    fn acquire_global_lock(&self, slot: SlotRef<'_>) -> bool {
        let identity = slot.local().identity();
        let bit = self.registry.lock().unwrap().lock_bit(identity);
        let acquired = bit
            .compare_exchange(
                false,
                true,
                std::sync::atomic::Ordering::Acquire,
                std::sync::atomic::Ordering::Relaxed,
            )
            .is_ok();
        if !acquired {
            tracing::trace!(identity, "global lock contended");
        }
        acquired
    }

    fn release_global_lock(&self, slot: SlotRef<'_>) {
        let identity = slot.local().identity();
        let bit = self.registry.lock().unwrap().lock_bit(identity);
        let was_held = bit.swap(false, std::sync::atomic::Ordering::Release);
        assert!(was_held, "release_global_lock: lock was not held");
    }

    fn flush_received(&self) {}

    fn new_instance(&self) -> InstanceId {
        self.registry.lock().unwrap().next_instance()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{HostMemoryManager, MemoryManager, MemorySpace};

    #[test]
    fn lock_is_exclusive_and_starvation_free_under_two_threads() {
        let comm = PthreadsCommunicationManager::new(2);
        let mgr = HostMemoryManager::new();
        let space = MemorySpace::host(0);
        let slot = mgr.allocate_local_memory_slot(&space, 8).unwrap();

        assert!(comm.acquire_global_lock(SlotRef::Local(&slot)));
        assert!(!comm.acquire_global_lock(SlotRef::Local(&slot)));
        comm.release_global_lock(SlotRef::Local(&slot));
        assert!(comm.acquire_global_lock(SlotRef::Local(&slot)));
    }

    #[test]
    #[should_panic(expected = "lock was not held")]
    fn releasing_unheld_lock_is_a_logic_error() {
        let comm = PthreadsCommunicationManager::new(2);
        let mgr = HostMemoryManager::new();
        let space = MemorySpace::host(0);
        let slot = mgr.allocate_local_memory_slot(&space, 8).unwrap();
        comm.release_global_lock(SlotRef::Local(&slot));
    }

    #[test]
    fn exchange_collision_on_live_tag_key_is_an_error() {
        let comm = PthreadsCommunicationManager::new(1);
        let mgr = HostMemoryManager::new();
        let space = MemorySpace::host(0);
        let slot = mgr.allocate_local_memory_slot(&space, 8).unwrap();
        let owner = comm.new_instance();

        comm.exchange_global_memory_slots(7, &[(0, slot.clone())], owner)
            .unwrap();
        assert!(comm
            .exchange_global_memory_slots(7, &[(0, slot)], owner)
            .is_err());
    }
}
