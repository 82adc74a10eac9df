//! # Memory Manager
//!
//! Two pools live here:
//! - [`PAGES`]: bitmap allocator over the first 128 MiB of physical memory
//! - [`HEAP`]: linear kernel heap, also the `#[global_allocator]` on the
//!   bare-metal target
//!
//! The free functions below take each lock with interrupts disabled.

use ::core::ptr::{addr_of_mut, NonNull};

use bootloader_api::info::{MemoryRegion, MemoryRegionKind};
use spin::Mutex;
use x86_64::PhysAddr;

pub mod allocators;
pub mod bitmap;
pub mod physical;

pub use allocators::{AllocError, FreeError, HeapStats, KernelHeap, LockedHeap, PageError};
pub use physical::PhysicalMemoryManager;
/// Page table entry flags for callers that build mappings.
pub use x86_64::structures::paging::PageTableFlags as PageFlags;

use crate::arch;
use crate::config::{KERNEL_HEAP_SIZE, PHYSICAL_MEMORY_SIZE, RESERVED_PAGES, TOTAL_PAGES};

#[repr(align(4096))]
struct HeapBuffer([u8; KERNEL_HEAP_SIZE]);
static mut KERNEL_HEAP_BUFFER: HeapBuffer = HeapBuffer([0; KERNEL_HEAP_SIZE]);

pub static PAGES: Mutex<PhysicalMemoryManager> =
    Mutex::new(PhysicalMemoryManager::new(TOTAL_PAGES, RESERVED_PAGES));

#[cfg_attr(target_os = "none", global_allocator)]
pub static HEAP: LockedHeap = LockedHeap::new();

/// Bring up the page bitmap and the kernel heap.
///
/// Every region of `regions` that is not usable RAM is reserved in the bitmap
/// so the page allocator never hands it out.
pub fn init(regions: &[MemoryRegion]) -> Result<(), &'static str> {
    let reserved = arch::without_interrupts(|| {
        let mut pages = PAGES.lock();
        pages.init();
        reserve_unusable(&mut pages, regions)
    });
    log::debug!("memory: {} pages reserved from the boot memory map", reserved);

    let heap_start = addr_of_mut!(KERNEL_HEAP_BUFFER) as usize;
    HEAP.with(|heap| unsafe { heap.init(heap_start, KERNEL_HEAP_SIZE) })
        .map_err(|_| "Failed to initialize kernel heap")?;

    log::info!(
        "memory: {} KiB free of {} KiB, heap {:#x}..{:#x}",
        free() / 1024,
        total() / 1024,
        heap_start,
        heap_start + KERNEL_HEAP_SIZE
    );
    Ok(())
}

/// Reserve the pages of every non-usable region below the managed limit.
pub fn reserve_unusable(pages: &mut PhysicalMemoryManager, regions: &[MemoryRegion]) -> usize {
    let limit = PHYSICAL_MEMORY_SIZE as u64;
    regions
        .iter()
        .filter(|region| region.kind != MemoryRegionKind::Usable && region.start < limit)
        .map(|region| {
            pages.reserve_range(PhysAddr::new(region.start), PhysAddr::new(region.end.min(limit)))
        })
        .sum()
}

// ============================================================================
// PAGES
// ============================================================================

pub fn alloc_page() -> Option<PhysAddr> {
    let page = arch::without_interrupts(|| PAGES.lock().alloc_page());
    if page.is_none() {
        log::warn!("alloc_page: out of physical memory");
    }
    page
}

pub fn free_page(addr: PhysAddr) -> Result<(), PageError> {
    arch::without_interrupts(|| PAGES.lock().free_page(addr)).map_err(|err| {
        log::warn!("free_page({:#x}): {}", addr.as_u64(), err);
        err
    })
}

pub fn alloc_pages(count: usize) -> Option<PhysAddr> {
    arch::without_interrupts(|| PAGES.lock().alloc_pages(count))
}

pub fn free_pages(addr: PhysAddr, count: usize) -> usize {
    arch::without_interrupts(|| PAGES.lock().free_pages(addr, count))
}

pub fn reserve_range(start: PhysAddr, end: PhysAddr) -> usize {
    arch::without_interrupts(|| PAGES.lock().reserve_range(start, end))
}

/// Managed physical memory in bytes.
pub fn total() -> usize {
    arch::without_interrupts(|| PAGES.lock().total_bytes())
}

pub fn free() -> usize {
    arch::without_interrupts(|| PAGES.lock().free_bytes())
}

pub fn used() -> usize {
    arch::without_interrupts(|| PAGES.lock().used_bytes())
}

// ============================================================================
// HEAP
// ============================================================================

pub fn kmalloc(size: usize) -> Result<NonNull<u8>, AllocError> {
    HEAP.with(|heap| heap.kmalloc(size))
}

pub fn kmalloc_aligned(size: usize, align: usize) -> Result<NonNull<u8>, AllocError> {
    HEAP.with(|heap| heap.kmalloc_aligned(size, align))
}

pub fn kfree(ptr: NonNull<u8>) -> Result<(), FreeError> {
    HEAP.with(|heap| heap.kfree(ptr))
}

pub fn heap_stats() -> HeapStats {
    HEAP.with(|heap| heap.stats())
}
