//! # Interrupt Descriptor Table
//!
//! The table itself is `x86_64`'s [`InterruptDescriptorTable`]. Every one of
//! its 256 gates, reserved exception slots included, is pointed at the
//! per-vector entry stub, so no vector can ever reach an empty slot. The
//! stubs deal with error codes themselves, which is why gates are filled by
//! raw address instead of typed handler functions.

use ::core::mem::size_of;

use x86_64::structures::gdt::SegmentSelector;
use x86_64::structures::idt::{Entry, EntryOptions, HandlerFunc, InterruptDescriptorTable};
use x86_64::VirtAddr;

use super::gdt::DOUBLE_FAULT_IST_INDEX;

pub const IDT_ENTRIES: usize = 256;

/// Kernel code segment selector (GDT entry 1).
pub const KERNEL_CODE_SELECTOR: SegmentSelector = SegmentSelector(0x08);

const DOUBLE_FAULT_VECTOR: usize = 8;

const _: () =
    assert!(size_of::<InterruptDescriptorTable>() == IDT_ENTRIES * size_of::<Entry<HandlerFunc>>());

/// All 256 gates in vector order.
pub fn gates(idt: &InterruptDescriptorTable) -> &[Entry<HandlerFunc>; IDT_ENTRIES] {
    // SAFETY: the table is `repr(C)` and consists of exactly 256 `repr(C)`
    // `Entry<F>` values whose only difference is a `PhantomData` marker.
    unsafe { &*(idt as *const InterruptDescriptorTable).cast::<[Entry<HandlerFunc>; IDT_ENTRIES]>() }
}

fn gates_mut(idt: &mut InterruptDescriptorTable) -> &mut [Entry<HandlerFunc>; IDT_ENTRIES] {
    // SAFETY: see `gates`.
    unsafe { &mut *(idt as *mut InterruptDescriptorTable).cast::<[Entry<HandlerFunc>; IDT_ENTRIES]>() }
}

/// # Safety
/// `stub` must be an interrupt entry point that ends in `iretq`.
unsafe fn set_gate<F>(gate: &mut Entry<F>, stub: u64) -> &mut EntryOptions {
    let options = gate.set_handler_addr(VirtAddr::new(stub));
    options.set_code_selector(KERNEL_CODE_SELECTOR)
}

/// Point every vector at `stubs[vector]` through the kernel code segment.
/// The double fault runs on its own IST stack.
pub fn populate(idt: &mut InterruptDescriptorTable, stubs: &[u64; IDT_ENTRIES]) {
    for (gate, &stub) in gates_mut(idt).iter_mut().zip(stubs) {
        unsafe { set_gate(gate, stub) };
    }
    unsafe {
        set_gate(&mut idt.double_fault, stubs[DOUBLE_FAULT_VECTOR])
            .set_stack_index(DOUBLE_FAULT_IST_INDEX);
    }
}
