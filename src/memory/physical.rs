use x86_64::PhysAddr;

use super::allocators::PageError;
use super::bitmap::PageBitmap;
use crate::config::PAGE_SIZE;

/// Bitmap allocator over physical pages `0..total_pages`.
///
/// Invariant: `bitmap.count_set() == total_pages - free_pages`.
/// Pages below `reserved_pages` are set at `init` and can never be freed.
pub struct PhysicalMemoryManager {
    bitmap: PageBitmap,
    total_pages: usize,
    free_pages: usize,
    reserved_pages: usize,
}

impl PhysicalMemoryManager {
    pub const fn new(total_pages: usize, reserved_pages: usize) -> Self {
        let bitmap = PageBitmap::new(total_pages);
        let total_pages = bitmap.len();
        let reserved_pages = if reserved_pages > total_pages {
            total_pages
        } else {
            reserved_pages
        };
        Self {
            bitmap,
            total_pages,
            free_pages: total_pages,
            reserved_pages,
        }
    }

    /// Mark everything free, then reserve the kernel load region.
    pub fn init(&mut self) {
        self.bitmap = PageBitmap::new(self.total_pages);
        for page in 0..self.reserved_pages {
            self.bitmap.set(page);
        }
        self.free_pages = self.total_pages - self.reserved_pages;
    }

    /// Mark every page overlapping `start..end` as allocated (firmware,
    /// bootloader and MMIO regions). Pages already set are left alone.
    pub fn reserve_range(&mut self, start: PhysAddr, end: PhysAddr) -> usize {
        let first = start.as_u64() as usize / PAGE_SIZE;
        let last = (end.as_u64() as usize).div_ceil(PAGE_SIZE).min(self.total_pages);

        let mut newly_reserved = 0;
        for page in first..last {
            if !self.bitmap.test(page) {
                self.bitmap.set(page);
                newly_reserved += 1;
            }
        }
        self.free_pages -= newly_reserved;
        newly_reserved
    }

    pub fn alloc_page(&mut self) -> Option<PhysAddr> {
        let page = self.bitmap.first_clear()?;
        self.bitmap.set(page);
        self.free_pages -= 1;
        Some(page_address(page))
    }

    /// Double frees and reserved pages are reported and otherwise ignored.
    pub fn free_page(&mut self, addr: PhysAddr) -> Result<(), PageError> {
        let page = addr.as_u64() as usize / PAGE_SIZE;
        if page >= self.total_pages {
            return Err(PageError::OutOfRange);
        }
        if page < self.reserved_pages {
            return Err(PageError::Reserved);
        }
        if !self.bitmap.test(page) {
            return Err(PageError::NotAllocated);
        }
        self.bitmap.clear(page);
        self.free_pages += 1;
        Ok(())
    }

    /// First-fit run of `count` pages, all or nothing.
    pub fn alloc_pages(&mut self, count: usize) -> Option<PhysAddr> {
        let start = self.bitmap.first_clear_run(count)?;
        for page in start..start + count {
            self.bitmap.set(page);
        }
        self.free_pages -= count;
        Some(page_address(start))
    }

    /// Clear `count` pages starting at `addr`, clamped to managed memory.
    /// Only pages that were set are credited back; reserved pages are kept.
    /// Returns the number of pages released.
    pub fn free_pages(&mut self, addr: PhysAddr, count: usize) -> usize {
        let first = (addr.as_u64() as usize / PAGE_SIZE).max(self.reserved_pages);
        let last = (addr.as_u64() as usize / PAGE_SIZE)
            .saturating_add(count)
            .min(self.total_pages);

        let mut released = 0;
        for page in first..last {
            if self.bitmap.test(page) {
                self.bitmap.clear(page);
                released += 1;
            }
        }
        self.free_pages += released;
        released
    }

    pub fn is_allocated(&self, addr: PhysAddr) -> bool {
        let page = addr.as_u64() as usize / PAGE_SIZE;
        page < self.total_pages && self.bitmap.test(page)
    }

    pub fn total_pages(&self) -> usize {
        self.total_pages
    }

    pub fn free_page_count(&self) -> usize {
        self.free_pages
    }

    pub fn used_page_count(&self) -> usize {
        self.total_pages - self.free_pages
    }

    pub fn allocated_bits(&self) -> usize {
        self.bitmap.count_set()
    }

    pub fn total_bytes(&self) -> usize {
        self.total_pages * PAGE_SIZE
    }

    pub fn free_bytes(&self) -> usize {
        self.free_pages * PAGE_SIZE
    }

    pub fn used_bytes(&self) -> usize {
        self.used_page_count() * PAGE_SIZE
    }
}

#[inline]
fn page_address(page: usize) -> PhysAddr {
    PhysAddr::new((page * PAGE_SIZE) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RESERVED_PAGES, TOTAL_PAGES};
    use alloc::vec::Vec;

    fn manager(total: usize, reserved: usize) -> PhysicalMemoryManager {
        let mut pmm = PhysicalMemoryManager::new(total, reserved);
        pmm.init();
        pmm
    }

    fn assert_consistent(pmm: &PhysicalMemoryManager) {
        assert_eq!(pmm.allocated_bits(), pmm.total_pages() - pmm.free_page_count());
    }

    #[test]
    fn test_init_reserves_kernel_region() {
        let pmm = manager(TOTAL_PAGES, RESERVED_PAGES);
        assert_eq!(pmm.total_bytes(), 128 * 1024 * 1024);
        assert_eq!(pmm.free_page_count(), TOTAL_PAGES - RESERVED_PAGES);
        assert!(pmm.is_allocated(PhysAddr::new(0)));
        assert!(pmm.is_allocated(PhysAddr::new(0xFF000)));
        assert!(!pmm.is_allocated(PhysAddr::new(0x100000)));
        assert_consistent(&pmm);
    }

    #[test]
    fn test_const_construction_clamps() {
        const EARLY: PhysicalMemoryManager = PhysicalMemoryManager::new(usize::MAX, usize::MAX);
        let mut pmm = EARLY;
        assert_eq!(pmm.total_pages(), TOTAL_PAGES);
        assert_eq!(pmm.free_page_count(), TOTAL_PAGES);

        pmm.init();
        assert_eq!(pmm.free_page_count(), 0);
        assert_eq!(pmm.alloc_page(), None);
        assert_consistent(&pmm);
    }

    #[test]
    fn test_alloc_page_first_fit() {
        let mut pmm = manager(64, 4);
        assert_eq!(pmm.alloc_page(), Some(PhysAddr::new(4 * 4096)));
        assert_eq!(pmm.alloc_page(), Some(PhysAddr::new(5 * 4096)));
        pmm.free_page(PhysAddr::new(4 * 4096)).unwrap();
        assert_eq!(pmm.alloc_page(), Some(PhysAddr::new(4 * 4096)));
        assert_consistent(&pmm);
    }

    #[test]
    fn test_alloc_until_exhausted() {
        let mut pmm = manager(40, 8);
        let mut pages = Vec::new();
        while let Some(page) = pmm.alloc_page() {
            pages.push(page);
            assert_consistent(&pmm);
        }
        assert_eq!(pages.len(), 32);
        assert_eq!(pmm.free_bytes(), 0);
        assert_eq!(pmm.used_bytes(), pmm.total_bytes());

        for page in pages {
            pmm.free_page(page).unwrap();
            assert_consistent(&pmm);
        }
        assert_eq!(pmm.free_page_count(), 32);
    }

    #[test]
    fn test_double_free_ignored() {
        let mut pmm = manager(32, 2);
        let page = pmm.alloc_page().unwrap();
        assert_eq!(pmm.free_page(page), Ok(()));
        let free = pmm.free_page_count();
        assert_eq!(pmm.free_page(page), Err(PageError::NotAllocated));
        assert_eq!(pmm.free_page_count(), free);
        assert_consistent(&pmm);
    }

    #[test]
    fn test_free_reserved_or_out_of_range() {
        let mut pmm = manager(32, 2);
        assert_eq!(pmm.free_page(PhysAddr::new(0x1000)), Err(PageError::Reserved));
        assert_eq!(pmm.free_page(PhysAddr::new(32 * 4096)), Err(PageError::OutOfRange));
        assert_eq!(pmm.free_page_count(), 30);
    }

    #[test]
    fn test_alloc_pages_contiguous_no_overlap() {
        let mut pmm = manager(64, 4);
        let single = pmm.alloc_page().unwrap();
        let a = pmm.alloc_pages(3).unwrap();
        assert_eq!(a, PhysAddr::new(5 * 4096));

        // punch a one-page hole, then ask for more than fits in it
        let b = pmm.alloc_pages(4).unwrap();
        pmm.free_page(a + 4096u64).unwrap();
        let c = pmm.alloc_pages(2).unwrap();
        assert_eq!(c, b + 4 * 4096u64);

        for page in 0..4u64 {
            assert!(pmm.is_allocated(b + page * 4096));
        }
        assert!(pmm.is_allocated(single));
        assert!(!pmm.is_allocated(a + 4096u64));
        assert_consistent(&pmm);
    }

    #[test]
    fn test_alloc_pages_all_or_nothing() {
        let mut pmm = manager(16, 4);
        let free = pmm.free_page_count();
        assert_eq!(pmm.alloc_pages(13), None);
        assert_eq!(pmm.free_page_count(), free);
        assert_eq!(pmm.alloc_pages(12), Some(PhysAddr::new(4 * 4096)));
        assert_eq!(pmm.free_page_count(), 0);
        assert_consistent(&pmm);
    }

    #[test]
    fn test_free_pages_clamped_and_counted() {
        let mut pmm = manager(16, 4);
        let run = pmm.alloc_pages(4).unwrap();
        pmm.free_page(run + 4096u64).unwrap();

        // one page in the run is already free and the tail runs off the end
        assert_eq!(pmm.free_pages(run, 100), 3);
        assert_eq!(pmm.free_page_count(), 12);
        assert_consistent(&pmm);

        // reserved region is never released
        assert_eq!(pmm.free_pages(PhysAddr::new(0), 4), 0);
        assert_eq!(pmm.free_page_count(), 12);
    }

    #[test]
    fn test_reserve_range() {
        let mut pmm = manager(64, 4);
        let reserved = pmm.reserve_range(PhysAddr::new(0x2000), PhysAddr::new(0x8800));
        // pages 2..9, of which 2 and 3 were already reserved
        assert_eq!(reserved, 5);
        assert_eq!(pmm.alloc_page(), Some(PhysAddr::new(9 * 4096)));
        assert_consistent(&pmm);
    }
}
