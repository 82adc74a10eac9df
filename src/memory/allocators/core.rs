/// Core utilities and error types for allocators
use core::fmt;

// ============================================================================
// UTILITY FUNCTIONS
// ============================================================================

/// `align` must be a power of two.
#[inline]
pub(crate) const fn align_up(addr: usize, align: usize) -> usize {
    (addr + align - 1) & !(align - 1)
}

#[inline]
pub(crate) const fn align_down(addr: usize, align: usize) -> usize {
    addr & !(align - 1)
}

#[inline]
pub(crate) fn is_aligned(addr: usize, align: usize) -> bool {
    addr & (align - 1) == 0
}

/// Overflow-checked `align_up`.
#[inline]
pub(crate) fn checked_align_up(addr: usize, align: usize) -> Option<usize> {
    Some(addr.checked_add(align - 1)? & !(align - 1))
}

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Why an allocation request produced no memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    OutOfMemory,
    InvalidSize,
    InvalidAlignment,
    Uninitialized,
}

/// Why `kfree` refused a pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreeError {
    /// The pointer does not lie inside the handed-out part of the heap.
    NotOwned,
    /// The block header's marker is not a live or released marker.
    Corrupted,
    /// The block was already released.
    DoubleFree,
}

/// Why a physical page release was ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageError {
    OutOfRange,
    /// Page belongs to the permanently reserved kernel region.
    Reserved,
    /// Page was not allocated (double free).
    NotAllocated,
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllocError::OutOfMemory => write!(f, "out of memory"),
            AllocError::InvalidSize => write!(f, "invalid allocation size"),
            AllocError::InvalidAlignment => write!(f, "alignment is not a power of two"),
            AllocError::Uninitialized => write!(f, "allocator not initialized"),
        }
    }
}

impl fmt::Display for FreeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FreeError::NotOwned => write!(f, "pointer not owned by the kernel heap"),
            FreeError::Corrupted => write!(f, "block header corrupted"),
            FreeError::DoubleFree => write!(f, "block already released"),
        }
    }
}

impl fmt::Display for PageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PageError::OutOfRange => write!(f, "page outside managed memory"),
            PageError::Reserved => write!(f, "page is permanently reserved"),
            PageError::NotAllocated => write!(f, "page is not allocated"),
        }
    }
}
