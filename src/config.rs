//! # Kernel Configuration
//!
//! Compile-time sizing for the core subsystems.
//!
//! | Constant               | Value   | Used by                      |
//! |------------------------|---------|------------------------------|
//! | `PAGE_SIZE`            | 4 KiB   | page bitmap, statistics      |
//! | `PHYSICAL_MEMORY_SIZE` | 128 MiB | page bitmap coverage         |
//! | `RESERVED_PAGES`       | 256     | kernel load region (1 MiB)   |
//! | `KERNEL_HEAP_SIZE`     | 16 MiB  | bump heap backing store      |
//! | `TASK_STACK_SIZE`      | 16 KiB  | per-task stacks              |
//! | `TIMER_FREQUENCY_HZ`   | 100     | PIT channel 0                |

use log::LevelFilter;

pub const PAGE_SIZE: usize = 4096;
pub const PHYSICAL_MEMORY_SIZE: usize = 128 * 1024 * 1024;
pub const TOTAL_PAGES: usize = PHYSICAL_MEMORY_SIZE / PAGE_SIZE;
pub const RESERVED_PAGES: usize = 256;

pub const KERNEL_HEAP_SIZE: usize = 16 * 1024 * 1024;

pub const TASK_STACK_SIZE: usize = 16 * 1024;
/// Longest task name in bytes; longer names are truncated.
pub const TASK_NAME_MAX: usize = 31;

pub const TIMER_FREQUENCY_HZ: u32 = 100;

/// Boot parameters handed to `init_kernel`.
#[derive(Debug, Clone, Copy)]
pub struct KernelConfig {
    pub timer_hz: u32,
    pub task_stack_size: usize,
    pub log_level: LevelFilter,
}

impl KernelConfig {
    pub const DEFAULT: KernelConfig = KernelConfig {
        timer_hz: TIMER_FREQUENCY_HZ,
        task_stack_size: TASK_STACK_SIZE,
        log_level: LevelFilter::Info,
    };
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}
