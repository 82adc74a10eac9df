use ::core::alloc::{GlobalAlloc, Layout};
use ::core::mem::size_of;
use ::core::ptr::{self, NonNull};

use spin::{Mutex, MutexGuard};

use super::core::{align_up, checked_align_up, is_aligned, AllocError, FreeError};
use crate::arch;

/// Marker of a block that is live.
pub const ALLOC_MAGIC: u32 = 0xDEAD_BEEF;
/// Marker written by `kfree`; the space stays consumed.
pub const FREED_MAGIC: u32 = 0xFEE1_DEAD;

/// Minimum alignment of every header and payload.
pub const HEAP_ALIGN: usize = 16;
pub const HEADER_SIZE: usize = size_of::<BlockHeader>();

#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct BlockHeader {
    size: usize,
    magic: u32,
    /// Payload address in 16-byte units, truncated. Ties the header to the
    /// spot it was written at, so payload bytes that merely look like a
    /// header are rejected.
    anchor: u32,
}

impl BlockHeader {
    fn anchor_for(payload: usize) -> u32 {
        (payload / HEAP_ALIGN) as u32
    }
}

const _: () = assert!(HEADER_SIZE == HEAP_ALIGN);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
    pub capacity: usize,
    /// Bytes the cursor has advanced over, headers and padding included.
    pub consumed: usize,
    pub remaining: usize,
    pub live_blocks: usize,
    pub released_blocks: usize,
    pub released_bytes: usize,
}

// ============================================================================
// KERNEL HEAP (bump arena with tagged blocks)
// ============================================================================

/// Linear heap. The cursor only moves forward: `kfree` checks the block and
/// marks it released, but the bytes are never handed out again. Addresses
/// returned by successive allocations are strictly increasing.
pub struct KernelHeap {
    start: usize,
    end: usize,
    cursor: usize,
    live_blocks: usize,
    released_blocks: usize,
    released_bytes: usize,
}

// The arena is plain memory addressed by integers; ownership of the region
// was established by `init`.
unsafe impl Send for KernelHeap {}

impl KernelHeap {
    pub const fn empty() -> Self {
        Self {
            start: 0,
            end: 0,
            cursor: 0,
            live_blocks: 0,
            released_blocks: 0,
            released_bytes: 0,
        }
    }

    /// # Safety
    /// - `heap_start..heap_start + heap_size` must be valid, writable memory
    ///   used by nothing else for the lifetime of the heap
    pub unsafe fn new(heap_start: usize, heap_size: usize) -> Result<Self, AllocError> {
        let mut heap = Self::empty();
        heap.init(heap_start, heap_size)?;
        Ok(heap)
    }

    /// # Safety
    /// Same contract as [`KernelHeap::new`].
    pub unsafe fn init(&mut self, heap_start: usize, heap_size: usize) -> Result<(), AllocError> {
        if heap_start == 0 || heap_size == 0 {
            return Err(AllocError::InvalidSize);
        }
        let end = heap_start.checked_add(heap_size).ok_or(AllocError::InvalidSize)?;
        let start = checked_align_up(heap_start, HEAP_ALIGN).ok_or(AllocError::InvalidSize)?;
        if start >= end {
            return Err(AllocError::InvalidSize);
        }

        *self = Self {
            start,
            end,
            cursor: start,
            ..Self::empty()
        };
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.end != 0
    }

    /// Allocate `size` bytes with a 16-byte aligned payload.
    pub fn kmalloc(&mut self, size: usize) -> Result<NonNull<u8>, AllocError> {
        self.kmalloc_aligned(size, HEAP_ALIGN)
    }

    /// Allocate `size` bytes whose payload address is a multiple of `align`.
    ///
    /// Padding goes in front of the header so the header always sits
    /// immediately before the payload.
    pub fn kmalloc_aligned(&mut self, size: usize, align: usize) -> Result<NonNull<u8>, AllocError> {
        if !self.is_initialized() {
            return Err(AllocError::Uninitialized);
        }
        if size == 0 {
            return Err(AllocError::InvalidSize);
        }
        if align == 0 || !align.is_power_of_two() {
            return Err(AllocError::InvalidAlignment);
        }
        let align = align.max(HEAP_ALIGN);

        let first_payload = self.cursor.checked_add(HEADER_SIZE).ok_or(AllocError::OutOfMemory)?;
        let payload = checked_align_up(first_payload, align).ok_or(AllocError::OutOfMemory)?;
        let block_end = payload
            .checked_add(size)
            .and_then(|end| checked_align_up(end, HEAP_ALIGN))
            .ok_or(AllocError::OutOfMemory)?;

        if block_end > self.end {
            log::debug!(
                "kmalloc: {} bytes (align {}) exceeds heap, {} bytes left",
                size,
                align,
                self.end - self.cursor
            );
            return Err(AllocError::OutOfMemory);
        }

        let header = (payload - HEADER_SIZE) as *mut BlockHeader;
        unsafe {
            ptr::write(
                header,
                BlockHeader {
                    size,
                    magic: ALLOC_MAGIC,
                    anchor: BlockHeader::anchor_for(payload),
                },
            );
        }

        self.cursor = block_end;
        self.live_blocks += 1;

        // `payload` is non-zero: it is past `start`, which is non-zero.
        Ok(unsafe { NonNull::new_unchecked(payload as *mut u8) })
    }

    /// Validate and release a block. Space is not reclaimed.
    pub fn kfree(&mut self, ptr: NonNull<u8>) -> Result<(), FreeError> {
        let addr = ptr.as_ptr() as usize;

        if addr < self.start + HEADER_SIZE || addr >= self.cursor || !is_aligned(addr, HEAP_ALIGN) {
            log::warn!("kfree: {:#x} is not a kernel heap block", addr);
            return Err(FreeError::NotOwned);
        }

        let header = (addr - HEADER_SIZE) as *mut BlockHeader;
        let block = unsafe { ptr::read(header) };

        if block.magic != ALLOC_MAGIC && block.magic != FREED_MAGIC {
            log::warn!("kfree: invalid free detected at {:#x} (marker {:#010x})", addr, block.magic);
            return Err(FreeError::Corrupted);
        }
        if !self.header_fits(addr, &block) {
            log::warn!("kfree: {:#x} is not the start of a heap block", addr);
            return Err(FreeError::Corrupted);
        }
        if block.magic == FREED_MAGIC {
            log::warn!("kfree: double free of block at {:#x}", addr);
            return Err(FreeError::DoubleFree);
        }

        unsafe { (*header).magic = FREED_MAGIC };
        self.live_blocks = self.live_blocks.saturating_sub(1);
        self.released_blocks += 1;
        self.released_bytes += block.size;
        Ok(())
    }

    /// Payload size recorded for a live block.
    pub fn block_size(&self, ptr: NonNull<u8>) -> Option<usize> {
        let addr = ptr.as_ptr() as usize;
        if addr < self.start + HEADER_SIZE || addr >= self.cursor || !is_aligned(addr, HEAP_ALIGN) {
            return None;
        }
        let block = unsafe { ptr::read((addr - HEADER_SIZE) as *const BlockHeader) };
        (block.magic == ALLOC_MAGIC && self.header_fits(addr, &block)).then_some(block.size)
    }

    fn header_fits(&self, payload: usize, block: &BlockHeader) -> bool {
        block.anchor == BlockHeader::anchor_for(payload)
            && block.size != 0
            && block.size <= self.cursor - payload
    }

    pub fn stats(&self) -> HeapStats {
        HeapStats {
            capacity: self.end - self.start,
            consumed: self.cursor - self.start,
            remaining: self.end - self.cursor,
            live_blocks: self.live_blocks,
            released_blocks: self.released_blocks,
            released_bytes: self.released_bytes,
        }
    }
}

// ============================================================================
// LOCKED HEAP (global allocator front end)
// ============================================================================

pub struct LockedHeap {
    inner: Mutex<KernelHeap>,
}

impl LockedHeap {
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(KernelHeap::empty()),
        }
    }

    /// Callers on the main flow must hold interrupts off while the guard is
    /// alive; see [`LockedHeap::with`].
    pub fn lock(&self) -> MutexGuard<'_, KernelHeap> {
        self.inner.lock()
    }

    /// Run `f` on the heap with interrupts disabled.
    pub fn with<R>(&self, f: impl FnOnce(&mut KernelHeap) -> R) -> R {
        arch::without_interrupts(|| f(&mut self.inner.lock()))
    }
}

impl Default for LockedHeap {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl GlobalAlloc for LockedHeap {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let size = align_up(layout.size().max(1), HEAP_ALIGN);
        self.with(|heap| heap.kmalloc_aligned(size, layout.align()))
            .map_or(ptr::null_mut(), NonNull::as_ptr)
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        if let Some(ptr) = NonNull::new(ptr) {
            let _ = self.with(|heap| heap.kfree(ptr));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;
    use alloc::vec::Vec;

    /// 16-byte aligned backing store owned by the test.
    struct Arena {
        buf: Vec<u128>,
    }

    impl Arena {
        fn new(bytes: usize) -> Self {
            Self { buf: vec![0u128; bytes / 16] }
        }

        fn heap(&mut self) -> KernelHeap {
            let start = self.buf.as_mut_ptr() as usize;
            unsafe { KernelHeap::new(start, self.buf.len() * 16).unwrap() }
        }
    }

    #[test]
    fn test_kmalloc_rejects_zero() {
        let mut arena = Arena::new(4096);
        let mut heap = arena.heap();
        assert_eq!(heap.kmalloc(0), Err(AllocError::InvalidSize));
        assert_eq!(heap.stats().consumed, 0);
    }

    #[test]
    fn test_kmalloc_alignment_and_usable_size() {
        let mut arena = Arena::new(64 * 1024);
        let mut heap = arena.heap();

        let mut previous = 0usize;
        for size in [1usize, 7, 16, 33, 100, 4000, 3] {
            let p = heap.kmalloc(size).unwrap();
            let addr = p.as_ptr() as usize;
            assert_eq!(addr % 16, 0, "payload for {} bytes not 16-aligned", size);
            assert!(addr > previous, "cursor went backwards");
            assert_eq!(heap.block_size(p), Some(size));
            unsafe { ptr::write_bytes(p.as_ptr(), 0xAB, size) };
            previous = addr + size;
        }
    }

    #[test]
    fn test_kmalloc_header_layout() {
        let mut arena = Arena::new(4096);
        let mut heap = arena.heap();
        let base = heap.stats();

        let p = heap.kmalloc(20).unwrap();
        let header = unsafe { ptr::read((p.as_ptr() as usize - HEADER_SIZE) as *const BlockHeader) };
        assert_eq!(header.size, 20);
        assert_eq!(header.magic, ALLOC_MAGIC);
        // 20 + 16 rounded up to 16
        assert_eq!(heap.stats().consumed - base.consumed, 48);
    }

    #[test]
    fn test_kmalloc_aligned_power_of_two() {
        let mut arena = Arena::new(256 * 1024);
        let mut heap = arena.heap();

        heap.kmalloc(5).unwrap();
        for align in [1usize, 2, 8, 16, 32, 64, 256, 4096] {
            let p = heap.kmalloc_aligned(24, align).unwrap();
            assert_eq!(p.as_ptr() as usize % align, 0, "align {}", align);
            assert_eq!(heap.block_size(p), Some(24));
        }
        // plain allocations stay 16-aligned after padded ones
        let p = heap.kmalloc(9).unwrap();
        assert_eq!(p.as_ptr() as usize % 16, 0);
    }

    #[test]
    fn test_kmalloc_aligned_rejects_bad_alignment() {
        let mut arena = Arena::new(4096);
        let mut heap = arena.heap();
        assert_eq!(heap.kmalloc_aligned(8, 0), Err(AllocError::InvalidAlignment));
        assert_eq!(heap.kmalloc_aligned(8, 48), Err(AllocError::InvalidAlignment));
    }

    #[test]
    fn test_out_of_memory_leaves_cursor() {
        let mut arena = Arena::new(256);
        let mut heap = arena.heap();

        // 200 + 16 -> 224 bytes
        heap.kmalloc(200).unwrap();
        let before = heap.stats();
        assert_eq!(heap.kmalloc(64), Err(AllocError::OutOfMemory));
        assert_eq!(heap.stats(), before);
        // exactly filling the remainder is allowed
        assert!(heap.kmalloc(before.remaining - HEADER_SIZE).is_ok());
        assert_eq!(heap.stats().remaining, 0);
    }

    #[test]
    fn test_kfree_does_not_reclaim() {
        let mut arena = Arena::new(4096);
        let mut heap = arena.heap();

        let a = heap.kmalloc(32).unwrap();
        let consumed = heap.stats().consumed;
        assert_eq!(heap.kfree(a), Ok(()));

        let stats = heap.stats();
        assert_eq!(stats.consumed, consumed);
        assert_eq!(stats.live_blocks, 0);
        assert_eq!(stats.released_blocks, 1);
        assert_eq!(stats.released_bytes, 32);

        let b = heap.kmalloc(32).unwrap();
        assert!(b.as_ptr() as usize > a.as_ptr() as usize);
    }

    #[test]
    fn test_kfree_double_free_detected() {
        let mut arena = Arena::new(4096);
        let mut heap = arena.heap();

        let a = heap.kmalloc(8).unwrap();
        heap.kfree(a).unwrap();
        assert_eq!(heap.kfree(a), Err(FreeError::DoubleFree));
        assert_eq!(heap.stats().released_blocks, 1);
    }

    #[test]
    fn test_kfree_corrupted_header() {
        let mut arena = Arena::new(4096);
        let mut heap = arena.heap();

        let a = heap.kmalloc(64).unwrap();
        unsafe { ptr::write_bytes(a.as_ptr().sub(HEADER_SIZE), 0x41, HEADER_SIZE) };
        assert_eq!(heap.kfree(a), Err(FreeError::Corrupted));
        assert_eq!(heap.stats().live_blocks, 1);

        // a pointer into the middle of a payload has no header in front of it
        let b = heap.kmalloc(128).unwrap();
        let inner = unsafe { NonNull::new_unchecked(b.as_ptr().add(64)) };
        assert_eq!(heap.kfree(inner), Err(FreeError::Corrupted));
    }

    #[test]
    fn test_kfree_rejects_header_lookalike_in_payload() {
        let mut arena = Arena::new(4096);
        let mut heap = arena.heap();

        let a = heap.kmalloc(64).unwrap();
        let inner = unsafe { NonNull::new_unchecked(a.as_ptr().add(HEADER_SIZE)) };
        unsafe {
            ptr::write(
                a.as_ptr() as *mut BlockHeader,
                BlockHeader {
                    size: 8,
                    magic: ALLOC_MAGIC,
                    anchor: 0,
                },
            );
        }
        heap.kfree(a).unwrap();
        assert_eq!(heap.kfree(inner), Err(FreeError::Corrupted));
        assert_eq!(heap.block_size(inner), None);

        let stats = heap.stats();
        assert_eq!(stats.live_blocks, 0);
        assert_eq!(stats.released_blocks, 1);
    }

    #[test]
    fn test_kfree_exact_forgery_keeps_counters_sane() {
        let mut arena = Arena::new(4096);
        let mut heap = arena.heap();

        let a = heap.kmalloc(64).unwrap();
        let inner = unsafe { NonNull::new_unchecked(a.as_ptr().add(HEADER_SIZE)) };
        unsafe {
            ptr::write(
                a.as_ptr() as *mut BlockHeader,
                BlockHeader {
                    size: 8,
                    magic: ALLOC_MAGIC,
                    anchor: BlockHeader::anchor_for(inner.as_ptr() as usize),
                },
            );
        }
        heap.kfree(a).unwrap();
        // indistinguishable from a real block; must not underflow
        assert_eq!(heap.kfree(inner), Ok(()));
        assert_eq!(heap.stats().live_blocks, 0);
        assert_eq!(heap.stats().released_blocks, 2);
    }

    #[test]
    fn test_kfree_foreign_pointer() {
        let mut arena = Arena::new(4096);
        let mut heap = arena.heap();
        heap.kmalloc(16).unwrap();

        let mut local = [0u128; 4];
        let foreign = NonNull::new(local.as_mut_ptr() as *mut u8).unwrap();
        assert_eq!(heap.kfree(foreign), Err(FreeError::NotOwned));

        // beyond the cursor is not handed out yet
        let tail = heap.stats();
        let past = heap.kmalloc(16).unwrap();
        let beyond = unsafe { NonNull::new_unchecked(past.as_ptr().add(64)) };
        assert_eq!(heap.kfree(beyond), Err(FreeError::NotOwned));
        assert!(tail.remaining > 0);
    }

    #[test]
    fn test_uninitialized_heap() {
        let mut heap = KernelHeap::empty();
        assert_eq!(heap.kmalloc(8), Err(AllocError::Uninitialized));
    }

    #[test]
    fn test_locked_heap_global_alloc() {
        let mut arena = Arena::new(4096);
        let locked = LockedHeap::new();
        unsafe {
            locked
                .lock()
                .init(arena.buf.as_mut_ptr() as usize, arena.buf.len() * 16)
                .unwrap();
        }

        let layout = Layout::from_size_align(40, 64).unwrap();
        let p = unsafe { locked.alloc(layout) };
        assert!(!p.is_null());
        assert_eq!(p as usize % 64, 0);
        unsafe { locked.dealloc(p, layout) };
        assert_eq!(locked.lock().stats().released_blocks, 1);
    }
}
