//! Device drivers built on the interrupt subsystem.
//!
//! - `pit`: system timer on IRQ 0
//! - `ps2_keyboard`: PS/2 keyboard on IRQ 1

pub mod pit;
pub mod ps2_keyboard;
