//! Per-task kernel stacks and the initial frame a new task starts from.
//!
//! Layout written by [`TaskStack::prepare_entry`], from the top down:
//!
//! ```text
//! top -   8  exit trampoline      <- return address of the entry function
//! top -  16  ss      = 0x10  ┐
//! top -  24  rsp     = top-8  │
//! top -  32  rflags  = 0x202  │ consumed by iretq
//! top -  40  cs      = 0x08   │
//! top -  48  rip     = entry ┘
//! top -  56  entry trampoline     <- `ret` target of the context switch
//! top -  64  rbp = 0
//! top -  72  rbx = exit hook
//! top -  80  r12 = 0
//! top -  88  r13 = 0
//! top -  96  r14 = 0
//! top - 104  r15 = 0              <- saved rsp
//! ```

use core::ptr::NonNull;

use crate::arch;
use crate::memory::allocators::core::align_up;
use crate::memory::{AllocError, FreeError, KernelHeap};

pub const ENTRY_CODE_SELECTOR: u64 = 0x08;
pub const ENTRY_STACK_SELECTOR: u64 = 0x10;
/// Reserved bit 1 plus IF: the task starts with interrupts enabled.
pub const ENTRY_RFLAGS: u64 = 0x202;

const STACK_ALIGN: usize = 16;
const WORD: u64 = 8;
/// Words from the top down to the saved stack pointer.
const ENTRY_WORDS: usize = 13;
const FRAME_OFFSET: usize = 6;
pub const MIN_STACK_SIZE: usize = 256;

/// A stack carved from the kernel heap. Released explicitly through
/// [`TaskStack::release`]; dropping it leaks the block.
#[derive(Debug)]
pub struct TaskStack {
    base: NonNull<u8>,
    size: usize,
}

// The block belongs to exactly one task and is only touched by the
// scheduler under its lock.
unsafe impl Send for TaskStack {}

impl TaskStack {
    pub fn allocate(heap: &mut KernelHeap, size: usize) -> Result<Self, AllocError> {
        if size < MIN_STACK_SIZE {
            return Err(AllocError::InvalidSize);
        }
        let size = align_up(size, STACK_ALIGN);
        let base = heap.kmalloc_aligned(size, STACK_ALIGN)?;
        Ok(Self { base, size })
    }

    pub fn base(&self) -> u64 {
        self.base.as_ptr() as u64
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// One past the highest byte; 16-byte aligned.
    pub fn top(&self) -> u64 {
        self.base() + self.size as u64
    }

    pub fn release(self, heap: &mut KernelHeap) -> Result<(), FreeError> {
        heap.kfree(self.base)
    }

    fn words(&self) -> *mut u64 {
        self.top() as *mut u64
    }

    /// Lay out the initial frame for `entry`. `exit_hook` runs if `entry`
    /// ever returns. Returns the stack pointer to resume from.
    pub fn prepare_entry(&mut self, entry: u64, exit_hook: u64) -> u64 {
        let top = self.top();
        let layout: [u64; ENTRY_WORDS] = [
            0,                            // r15
            0,                            // r14
            0,                            // r13
            0,                            // r12
            exit_hook,                    // rbx
            0,                            // rbp
            arch::task_entry_trampoline(),
            entry,
            ENTRY_CODE_SELECTOR,
            ENTRY_RFLAGS,
            top - WORD,
            ENTRY_STACK_SELECTOR,
            arch::task_exit_trampoline(),
        ];

        let start = unsafe { self.words().sub(ENTRY_WORDS) };
        for (offset, word) in layout.iter().enumerate() {
            unsafe { start.add(offset).write(*word) };
        }
        start as u64
    }

    /// The five iretq words `(rip, cs, rflags, rsp, ss)` as currently on the
    /// stack.
    pub fn entry_frame(&self) -> [u64; 5] {
        let frame = unsafe { self.words().sub(FRAME_OFFSET) };
        let mut words = [0u64; 5];
        for (offset, word) in words.iter_mut().enumerate() {
            *word = unsafe { frame.add(offset).read() };
        }
        words
    }
}
