//! MemoryManager contract (spec.md §6) and the data types it hands back:
//! [`MemorySpace`], [`LocalMemorySlot`] and [`GlobalMemorySlot`] (spec.md §3).
//!
//! This module is the leaf dependency of the whole crate: the channel layer
//! never allocates bytes itself, it only asks a `MemoryManager` for a slot
//! and hands that slot to a `CommunicationManager`.

use std::alloc::{alloc_zeroed, dealloc, handle_alloc_error, Layout};
use std::cell::UnsafeCell;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use thiserror::Error;

/// Errors a [`MemoryManager`] can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MemoryError {
    /// The requested allocation could not be satisfied.
    #[error("resource exhausted: {reason}")]
    ResourceExhausted {
        /// Human-readable description.
        reason: &'static str,
    },
    /// The slot was already freed/deregistered.
    #[error("use after free")]
    UseAfterFree,
}

/// What kind of addressable region a [`MemorySpace`] names.
///
/// Hardware topology discovery (the actual probing of NUMA nodes / device
/// HBM) is explicitly out of scope (spec.md §1); this enum only models the
/// tag a discovered space would carry. Only `HostRam` has a concrete backing
/// implementation in this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemorySpaceKind {
    HostRam,
    DeviceHbm,
    Cluster,
}

/// An opaque identifier of an addressable memory region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemorySpace {
    id: u64,
    byte_size: usize,
    kind: MemorySpaceKind,
}

impl MemorySpace {
    pub const fn new(id: u64, byte_size: usize, kind: MemorySpaceKind) -> Self {
        Self {
            id,
            byte_size,
            kind,
        }
    }

    /// A single host-RAM space with an unspecified total size, good enough
    /// for the tests and benchmarks in this crate (topology discovery that
    /// would populate `byte_size` accurately is out of scope).
    pub const fn host(id: u64) -> Self {
        Self::new(id, usize::MAX, MemorySpaceKind::HostRam)
    }

    pub const fn id(&self) -> u64 {
        self.id
    }

    pub const fn byte_size(&self) -> usize {
        self.byte_size
    }

    pub const fn kind(&self) -> MemorySpaceKind {
        self.kind
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotMode {
    Allocated,
    Registered,
}

/// An owned byte buffer aligned to `align_of::<u64>()`.
///
/// `CircularBuffer` reinterprets a coordination-buffer slot's bytes as
/// `AtomicU64`s (spec.md §4.2); a plain `Box<[u8]>` from `vec![0u8; n]` only
/// guarantees 1-byte alignment, which makes that reinterpretation undefined
/// behavior. This type allocates with an explicit 8-byte-aligned `Layout` so
/// every `LocalMemorySlot`, not just coordination buffers, is safe to view as
/// `AtomicU64` words.
struct AlignedBytes {
    ptr: NonNull<u8>,
    len: usize,
    layout: Layout,
}

// SAFETY: the bytes behind `ptr` are only reached through `as_ptr`/
// `as_mut_ptr`, under the same single-writer-per-byte-range discipline the
// rest of `LocalMemorySlot` relies on.
unsafe impl Send for AlignedBytes {}
unsafe impl Sync for AlignedBytes {}

impl AlignedBytes {
    fn layout_for(len: usize) -> Layout {
        Layout::from_size_align(len.max(1), std::mem::align_of::<u64>())
            .expect("slot size exceeds the allocator's addressable range")
    }

    /// A zero-filled buffer of `len` bytes.
    fn zeroed(len: usize) -> Self {
        let layout = Self::layout_for(len);
        let ptr = if len == 0 {
            NonNull::dangling()
        } else {
            // SAFETY: `layout` has non-zero size in this branch.
            let raw = unsafe { alloc_zeroed(layout) };
            NonNull::new(raw).unwrap_or_else(|| handle_alloc_error(layout))
        };
        Self { ptr, len, layout }
    }

    /// A buffer of the same length as `bytes`, holding a copy of its
    /// contents. Used for `register_local_memory_slot`: caller-supplied
    /// bytes can't be assumed to already be 8-byte aligned, so registering
    /// them copies into a freshly aligned allocation rather than adopting
    /// the caller's storage in place.
    fn copy_from(bytes: &[u8]) -> Self {
        let storage = Self::zeroed(bytes.len());
        if !bytes.is_empty() {
            // SAFETY: `storage` was just allocated with `bytes.len()` bytes
            // and doesn't overlap `bytes`.
            unsafe {
                std::ptr::copy_nonoverlapping(bytes.as_ptr(), storage.ptr.as_ptr(), bytes.len());
            }
        }
        storage
    }

    fn len(&self) -> usize {
        self.len
    }

    fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }

    fn as_mut_ptr(&mut self) -> *mut u8 {
        self.ptr.as_ptr()
    }
}

impl Drop for AlignedBytes {
    fn drop(&mut self) {
        if self.layout.size() > 0 {
            // SAFETY: `ptr`/`layout` are exactly the pair handed back by
            // `alloc_zeroed` in `zeroed`.
            unsafe { dealloc(self.ptr.as_ptr(), self.layout) };
        }
    }
}

struct LocalMemorySlotInner {
    space: MemorySpace,
    storage: UnsafeCell<AlignedBytes>,
    size: usize,
    mode: SlotMode,
    messages_sent: AtomicU64,
    messages_recv: AtomicU64,
    freed: AtomicBool,
}

// SAFETY: `storage` is only accessed through raw pointers handed out by
// `as_ptr`/`as_mut_ptr`; callers (CircularBuffer, the comm bindings) uphold
// the single-writer-per-byte-range discipline the channel protocol
// guarantees, exactly as `Ring<T>` relies on for its own `UnsafeCell` buffer.
unsafe impl Send for LocalMemorySlotInner {}
unsafe impl Sync for LocalMemorySlotInner {}

/// Ownership of a byte range within one [`MemorySpace`], plus the two
/// monotonically non-decreasing counters `messagesSent`/`messagesRecv` a
/// [`crate::comm::CommunicationManager`] maintains on it (spec.md §3).
///
/// Cloning a `LocalMemorySlot` shares the same underlying bytes — this is
/// what lets a [`GlobalMemorySlot`] handle obtained by a remote participant
/// alias the owner's memory for a one-sided write.
#[derive(Clone)]
pub struct LocalMemorySlot {
    inner: Arc<LocalMemorySlotInner>,
}

impl LocalMemorySlot {
    fn new(space: MemorySpace, storage: AlignedBytes, mode: SlotMode) -> Self {
        let size = storage.len();
        Self {
            inner: Arc::new(LocalMemorySlotInner {
                space,
                storage: UnsafeCell::new(storage),
                size,
                mode,
                messages_sent: AtomicU64::new(0),
                messages_recv: AtomicU64::new(0),
                freed: AtomicBool::new(false),
            }),
        }
    }

    pub fn space(&self) -> &MemorySpace {
        &self.inner.space
    }

    pub fn size(&self) -> usize {
        self.inner.size
    }

    pub fn is_freed(&self) -> bool {
        self.inner.freed.load(Ordering::Acquire)
    }

    /// Identity for this slot's backing bytes, stable across clones.
    /// Used to key the global-lock registry: two `LocalMemorySlot` handles
    /// that alias the same memory (e.g. an owner's handle and a remote
    /// participant's `GlobalMemorySlot`) must contend for the same lock bit.
    pub(crate) fn identity(&self) -> usize {
        Arc::as_ptr(&self.inner) as usize
    }

    /// Raw read access to the slot's bytes.
    ///
    /// # Safety
    ///
    /// The caller must not read bytes that a concurrent writer may still be
    /// updating outside of the channel's `head`/`tail` discipline.
    pub unsafe fn as_ptr(&self) -> *const u8 {
        (*self.inner.storage.get()).as_ptr()
    }

    /// Raw write access to the slot's bytes.
    ///
    /// # Safety
    ///
    /// The caller must hold whatever exclusivity the channel protocol
    /// promises for the byte range being written (e.g. the producer's
    /// reserved token slots, or a coordination-buffer word only one side
    /// writes).
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn as_mut_ptr(&self) -> *mut u8 {
        (*self.inner.storage.get()).as_mut_ptr()
    }

    /// Reinterprets the coordination words at `offset` as an `&AtomicU64`.
    ///
    /// # Safety
    ///
    /// `offset + 8` must not exceed `size()`, and `offset` must be 8-byte
    /// aligned. Storage is always allocated 8-byte aligned, so the second
    /// condition reduces to `offset % 8 == 0`.
    pub(crate) unsafe fn atomic_u64_at(&self, offset: usize) -> &AtomicU64 {
        &*self.as_ptr().add(offset).cast::<AtomicU64>()
    }

    pub fn messages_sent(&self) -> u64 {
        self.inner.messages_sent.load(Ordering::Acquire)
    }

    pub fn messages_received(&self) -> u64 {
        self.inner.messages_recv.load(Ordering::Acquire)
    }

    pub(crate) fn record_sent(&self) {
        self.inner.messages_sent.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn record_received(&self) {
        self.inner.messages_recv.fetch_add(1, Ordering::AcqRel);
    }

    /// Writes `value` at byte `offset`, unaligned.
    ///
    /// # Safety
    ///
    /// `offset + size_of::<T>()` must not exceed `size()`, and the byte range
    /// must be one this caller's side of the channel protocol is allowed to
    /// write (reserved token slot, or a coordination word only this side
    /// advances).
    pub unsafe fn write_at<T: Copy>(&self, offset: usize, value: T) {
        self.as_mut_ptr().add(offset).cast::<T>().write_unaligned(value);
    }

    /// Reads a `T` from byte `offset`, unaligned.
    ///
    /// # Safety
    ///
    /// `offset + size_of::<T>()` must not exceed `size()`, and the bytes must
    /// already have been written (no concurrent writer outside the channel's
    /// `head`/`tail` discipline).
    pub unsafe fn read_at<T: Copy>(&self, offset: usize) -> T {
        self.as_ptr().add(offset).cast::<T>().read_unaligned()
    }

    fn mark_freed(&self) -> Result<(), MemoryError> {
        if self.inner.freed.swap(true, Ordering::AcqRel) {
            Err(MemoryError::UseAfterFree)
        } else {
            Ok(())
        }
    }
}

/// A handle to memory owned by another participant, reachable via one-sided
/// transport under a `(tag, key)` name (spec.md §3).
///
/// In this crate's in-process bindings the handle aliases the owner's
/// [`LocalMemorySlot`] directly; a genuinely cross-process binding would
/// instead carry whatever remote-addressing token that transport needs, with
/// the same `tag`/`key`/`owner` bookkeeping.
#[derive(Clone)]
pub struct GlobalMemorySlot {
    tag: u64,
    key: u64,
    owner: InstanceId,
    local: LocalMemorySlot,
}

impl GlobalMemorySlot {
    pub(crate) fn new(tag: u64, key: u64, owner: InstanceId, local: LocalMemorySlot) -> Self {
        Self {
            tag,
            key,
            owner,
            local,
        }
    }

    pub fn tag(&self) -> u64 {
        self.tag
    }

    pub fn key(&self) -> u64 {
        self.key
    }

    pub fn owner(&self) -> InstanceId {
        self.owner
    }

    pub fn local(&self) -> &LocalMemorySlot {
        &self.local
    }
}

/// Identifies which participant registered a [`GlobalMemorySlot`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstanceId(pub u64);

/// `allocateLocalMemorySlot` / `registerLocalMemorySlot` / `freeLocalMemorySlot`
/// / `deregisterLocalMemorySlot` / `memset` (spec.md §6).
pub trait MemoryManager: Send + Sync {
    /// Allocates a new, manager-owned slot of `size` bytes in `space`.
    fn allocate_local_memory_slot(
        &self,
        space: &MemorySpace,
        size: usize,
    ) -> Result<LocalMemorySlot, MemoryError>;

    /// Wraps caller-supplied bytes as a slot without taking allocation
    /// responsibility for them — `deregister_local_memory_slot` only
    /// detaches the slot, it never frees anything the manager didn't
    /// allocate itself. The returned slot's storage is a freshly
    /// 8-byte-aligned copy of `buffer`'s contents, not `buffer` itself,
    /// since the caller's allocation may not be aligned.
    fn register_local_memory_slot(&self, space: &MemorySpace, buffer: Box<[u8]>)
        -> LocalMemorySlot;

    /// Releases a manager-allocated slot.
    fn free_local_memory_slot(&self, slot: &LocalMemorySlot) -> Result<(), MemoryError>;

    /// Detaches a caller-registered slot without freeing the caller's bytes.
    fn deregister_local_memory_slot(&self, slot: &LocalMemorySlot) -> Result<(), MemoryError>;

    /// Fills `slot`'s bytes with `value`.
    fn memset(&self, slot: &LocalMemorySlot, value: u8);
}

/// The only concrete `MemoryManager` this crate ships: plain host RAM via
/// the Rust global allocator. Accelerator/cluster memory spaces are
/// out of scope (spec.md §1 — "device-kernel launching" is an external
/// collaborator).
#[derive(Debug, Default)]
pub struct HostMemoryManager;

impl HostMemoryManager {
    pub fn new() -> Self {
        Self
    }
}

impl MemoryManager for HostMemoryManager {
    fn allocate_local_memory_slot(
        &self,
        space: &MemorySpace,
        size: usize,
    ) -> Result<LocalMemorySlot, MemoryError> {
        if size == 0 {
            return Err(MemoryError::ResourceExhausted {
                reason: "zero-sized allocation",
            });
        }
        let storage = AlignedBytes::zeroed(size);
        Ok(LocalMemorySlot::new(*space, storage, SlotMode::Allocated))
    }

    fn register_local_memory_slot(
        &self,
        space: &MemorySpace,
        buffer: Box<[u8]>,
    ) -> LocalMemorySlot {
        // `buffer` isn't guaranteed to be 8-byte aligned, so registering it
        // copies into a freshly aligned allocation rather than adopting the
        // caller's storage in place (see `AlignedBytes::copy_from`).
        let storage = AlignedBytes::copy_from(&buffer);
        LocalMemorySlot::new(*space, storage, SlotMode::Registered)
    }

    fn free_local_memory_slot(&self, slot: &LocalMemorySlot) -> Result<(), MemoryError> {
        debug_assert_eq!(
            slot.inner.mode,
            SlotMode::Allocated,
            "free_local_memory_slot called on a registered (caller-owned) slot"
        );
        slot.mark_freed()
    }

    fn deregister_local_memory_slot(&self, slot: &LocalMemorySlot) -> Result<(), MemoryError> {
        debug_assert_eq!(
            slot.inner.mode,
            SlotMode::Registered,
            "deregister_local_memory_slot called on a manager-allocated slot"
        );
        slot.mark_freed()
    }

    fn memset(&self, slot: &LocalMemorySlot, value: u8) {
        // SAFETY: exclusive access is the caller's responsibility, same as
        // every other raw accessor on LocalMemorySlot.
        unsafe {
            let ptr = slot.as_mut_ptr();
            std::ptr::write_bytes(ptr, value, slot.size());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_zeroes_memory() {
        let mgr = HostMemoryManager::new();
        let space = MemorySpace::host(0);
        let slot = mgr.allocate_local_memory_slot(&space, 16).unwrap();
        assert_eq!(slot.size(), 16);
        unsafe {
            let bytes = std::slice::from_raw_parts(slot.as_ptr(), 16);
            assert!(bytes.iter().all(|&b| b == 0));
        }
    }

    #[test]
    fn zero_size_allocation_is_resource_exhausted() {
        let mgr = HostMemoryManager::new();
        let space = MemorySpace::host(0);
        assert_eq!(
            mgr.allocate_local_memory_slot(&space, 0),
            Err(MemoryError::ResourceExhausted {
                reason: "zero-sized allocation"
            })
        );
    }

    #[test]
    fn double_free_is_use_after_free() {
        let mgr = HostMemoryManager::new();
        let space = MemorySpace::host(0);
        let slot = mgr.allocate_local_memory_slot(&space, 8).unwrap();
        assert!(mgr.free_local_memory_slot(&slot).is_ok());
        assert_eq!(
            mgr.free_local_memory_slot(&slot),
            Err(MemoryError::UseAfterFree)
        );
    }

    #[test]
    fn memset_fills_bytes() {
        let mgr = HostMemoryManager::new();
        let space = MemorySpace::host(0);
        let slot = mgr.allocate_local_memory_slot(&space, 4).unwrap();
        mgr.memset(&slot, 0xAB);
        unsafe {
            let bytes = std::slice::from_raw_parts(slot.as_ptr(), 4);
            assert_eq!(bytes, &[0xAB; 4]);
        }
    }
}
