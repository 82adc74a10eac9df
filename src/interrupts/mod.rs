//! # Interrupt Handling Module
//!
//! - **GDT**: Global Descriptor Table with TSS for the double-fault stack
//! - **IDT**: 256 gates, each pointing at its own entry stub
//! - **PIC**: 8259 remap, line masking and end-of-interrupt
//! - **Dispatch**: per-vector handler registry behind one common trap path
//!
//! ## Interrupt Vector Layout
//!
//! | Vector | Type           | Default handler               |
//! |--------|----------------|-------------------------------|
//! | 0-31   | CPU Exceptions | log, panic (breakpoint: log)  |
//! | 32     | Timer (IRQ0)   | registered by `drivers::pit`  |
//! | 33     | Keyboard (IRQ1)| registered by `drivers::ps2_keyboard` |
//! | 34-255 | Unassigned     | acknowledged and dropped      |
//!
//! ## Usage
//!
//! ```ignore
//! interrupts::init(); // GDT, IDT, PIC remap
//! interrupts::register_handler(InterruptIndex::Timer.as_u8(), on_tick);
//! interrupts::unmask_irq(InterruptIndex::Timer.irq());
//! arch::enable_interrupts();
//! ```

use spin::Lazy;
use x86_64::structures::idt::InterruptDescriptorTable;

pub mod context;
pub mod dispatch;
pub mod gdt;
pub mod idt;
pub mod pic;
mod stubs;

pub use context::InterruptContext;
pub use dispatch::{HandlerRegistry, InterruptHandler, InterruptSubsystem};
pub use pic::InterruptIndex;

use crate::io::HardwarePorts;

pub static INTERRUPTS: InterruptSubsystem<HardwarePorts> =
    InterruptSubsystem::new(unsafe { HardwarePorts::new() });

static IDT: Lazy<InterruptDescriptorTable> = Lazy::new(|| {
    let mut idt = InterruptDescriptorTable::new();
    idt::populate(&mut idt, &stubs::stub_addresses());
    idt
});

const BREAKPOINT: u8 = 3;
const PAGE_FAULT: u8 = 14;
const EXCEPTION_COUNT: u8 = 32;

const EXCEPTION_NAMES: [&str; EXCEPTION_COUNT as usize] = [
    "DIVIDE ERROR",
    "DEBUG",
    "NON-MASKABLE INTERRUPT",
    "BREAKPOINT",
    "OVERFLOW",
    "BOUND RANGE EXCEEDED",
    "INVALID OPCODE",
    "DEVICE NOT AVAILABLE",
    "DOUBLE FAULT",
    "COPROCESSOR SEGMENT OVERRUN",
    "INVALID TSS",
    "SEGMENT NOT PRESENT",
    "STACK-SEGMENT FAULT",
    "GENERAL PROTECTION FAULT",
    "PAGE FAULT",
    "RESERVED",
    "X87 FLOATING-POINT",
    "ALIGNMENT CHECK",
    "MACHINE CHECK",
    "SIMD FLOATING-POINT",
    "VIRTUALIZATION",
    "CONTROL PROTECTION",
    "RESERVED",
    "RESERVED",
    "RESERVED",
    "RESERVED",
    "RESERVED",
    "RESERVED",
    "HYPERVISOR INJECTION",
    "VMM COMMUNICATION",
    "SECURITY",
    "RESERVED",
];

/// Load GDT and IDT, install the exception handlers and remap the PIC.
/// All IRQ lines keep the mask they had; drivers unmask their own.
pub fn init() {
    gdt::init();
    for vector in 0..EXCEPTION_COUNT {
        INTERRUPTS.register_handler(vector, exception_handler);
    }
    IDT.load();
    INTERRUPTS.initialize();
    log::info!("interrupts: IDT loaded, PIC remapped to vectors 32-47");
}

/// Install or replace the handler for `vector`.
pub fn register_handler<H>(vector: u8, handler: H)
where
    H: InterruptHandler + 'static,
{
    INTERRUPTS.register_handler(vector, handler);
}

pub fn mask_irq(irq: u8) {
    INTERRUPTS.mask_irq(irq);
}

pub fn unmask_irq(irq: u8) {
    INTERRUPTS.unmask_irq(irq);
}

pub fn exception_name(vector: u8) -> &'static str {
    EXCEPTION_NAMES.get(vector as usize).copied().unwrap_or("INTERRUPT")
}

/// Exceptions the kernel survives.
pub fn is_recoverable(vector: u8) -> bool {
    vector == BREAKPOINT
}

fn exception_handler(context: &InterruptContext) {
    let vector = context.vector as u8;
    let name = exception_name(vector);

    if is_recoverable(vector) {
        log::warn!("EXCEPTION: {} at {:#x}", name, context.rip);
        return;
    }

    log::error!("EXCEPTION: {} (error code {:#x})", name, context.error_code);
    if vector == PAGE_FAULT {
        if let Some(addr) = fault_address() {
            log::error!("Accessed Address: {:#x}", addr);
        }
    }
    log::error!("{:#x?}", context);
    panic!("EXCEPTION: {}", name);
}

#[cfg(target_os = "none")]
fn fault_address() -> Option<u64> {
    x86_64::registers::control::Cr2::read().ok().map(|addr| addr.as_u64())
}

#[cfg(not(target_os = "none"))]
fn fault_address() -> Option<u64> {
    None
}

/// Called by `isr_common` with a pointer to the saved context.
#[cfg_attr(not(target_os = "none"), allow(dead_code))]
extern "C" fn interrupt_dispatch(context: &InterruptContext) {
    INTERRUPTS.dispatch(context);
}
