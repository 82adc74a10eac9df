//! # Kernel Initialization Module
//!
//! - `init`: ordered bring-up of memory, interrupts, drivers and scheduler
//! - `status`: per-component status tracking
//!
//! ```ignore
//! use crate::kernel::{register_component, update_component_status, InitStatus};
//!
//! register_component("Memory");
//! // ... initialize memory ...
//! update_component_status("Memory", InitStatus::Completed);
//! ```

pub mod init;
pub mod status;

pub use init::init_kernel;
pub use status::{
    all_components_ready, component_status, register_component, update_component_status,
    InitStatus,
};
