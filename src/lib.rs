//! # nexus-kernel
//!
//! Core of a small x86_64 kernel: interrupt subsystem, physical page and
//! heap allocators, and a cooperative round-robin scheduler, plus the timer
//! and keyboard drivers that sit directly on top of them.
//!
//! The crate is `no_std` on the bare-metal target and builds against `std`
//! for host unit tests; hardware access goes through [`io::PortIo`] and the
//! CPU primitives in [`arch`].

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod arch;
pub mod config;
pub mod drivers;
pub mod executor;
pub mod interrupts;
pub mod io;
pub mod kernel;
pub mod logger;
pub mod memory;
pub mod serial;
pub mod task;

pub use config::KernelConfig;
pub use kernel::init_kernel;
