//! Global Descriptor Table and TSS.
//!
//! Layout: null, kernel code (0x08), kernel data (0x10), TSS (0x18). The TSS
//! carries a private stack for the double-fault handler.

use core::ptr::addr_of;

use spin::Lazy;
use x86_64::structures::gdt::{Descriptor, GlobalDescriptorTable, SegmentSelector};
use x86_64::structures::tss::TaskStateSegment;
use x86_64::VirtAddr;

/// Index into `TaskStateSegment::interrupt_stack_table`. Gates name it as
/// IST slot `DOUBLE_FAULT_IST_INDEX + 1`.
pub const DOUBLE_FAULT_IST_INDEX: u16 = 0;

const DOUBLE_FAULT_STACK_SIZE: usize = 4 * 4096;

#[repr(align(16))]
struct FaultStack([u8; DOUBLE_FAULT_STACK_SIZE]);

static mut DOUBLE_FAULT_STACK: FaultStack = FaultStack([0; DOUBLE_FAULT_STACK_SIZE]);

static TSS: Lazy<TaskStateSegment> = Lazy::new(|| {
    let mut tss = TaskStateSegment::new();

    tss.interrupt_stack_table[DOUBLE_FAULT_IST_INDEX as usize] = {
        let stack_start = VirtAddr::from_ptr(addr_of!(DOUBLE_FAULT_STACK));
        stack_start + DOUBLE_FAULT_STACK_SIZE as u64
    };

    tss
});

#[derive(Debug, Clone, Copy)]
pub struct Selectors {
    pub code_selector: SegmentSelector,
    pub data_selector: SegmentSelector,
    pub tss_selector: SegmentSelector,
}

static GDT: Lazy<(GlobalDescriptorTable, Selectors)> = Lazy::new(|| {
    let mut gdt = GlobalDescriptorTable::new();

    let code_selector = gdt.append(Descriptor::kernel_code_segment());
    let data_selector = gdt.append(Descriptor::kernel_data_segment());
    let tss_selector = gdt.append(Descriptor::tss_segment(&TSS));

    (
        gdt,
        Selectors {
            code_selector,
            data_selector,
            tss_selector,
        },
    )
});

pub fn selectors() -> Selectors {
    GDT.1
}

/// Load the GDT, reload every segment register and the task register.
#[cfg(target_os = "none")]
pub fn init() {
    use x86_64::instructions::segmentation::{Segment, CS, DS, ES, SS};

    let (ref gdt, ref selectors) = *GDT;
    gdt.load();

    unsafe {
        CS::set_reg(selectors.code_selector);
        DS::set_reg(selectors.data_selector);
        ES::set_reg(selectors.data_selector);
        SS::set_reg(selectors.data_selector);
        x86_64::instructions::tables::load_tss(selectors.tss_selector);
    }
    log::debug!(
        "gdt: code {:#x}, data {:#x}, tss {:#x}",
        selectors.code_selector.0,
        selectors.data_selector.0,
        selectors.tss_selector.0
    );
}

#[cfg(not(target_os = "none"))]
pub fn init() {}
