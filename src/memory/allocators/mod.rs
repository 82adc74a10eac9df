//! # Memory Allocators
//!
//! ### KernelHeap
//! - Bump arena: a single cursor advances through a fixed region
//! - Every block carries a 16-byte header (payload size + marker)
//! - `kfree` validates the marker and poisons it; space is never reused
//!
//! ### LockedHeap
//! - `spin::Mutex` wrapper, interrupt-safe
//! - Implements `GlobalAlloc` so `alloc` collections draw from the same arena
//!
//! ## Core Utilities
//!
//! - `AllocError`, `FreeError`, `PageError`: failure types
//! - Alignment helpers: `align_up`, `align_down`

pub(crate) mod core;
pub mod heap;

pub use self::core::{AllocError, FreeError, PageError};
pub use heap::{HeapStats, KernelHeap, LockedHeap, HEADER_SIZE};
