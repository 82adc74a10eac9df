//! Low-level entry stubs, one per vector.
//!
//! Each stub is padded to 16 bytes, so stub `n` lives at
//! `isr_stub_base + 16 * n`. A stub pushes a zero error code when the CPU
//! does not supply one, then its vector number, and jumps to `isr_common`,
//! which saves the general-purpose registers and hands the resulting
//! [`InterruptContext`](super::context::InterruptContext) to the dispatcher.

use super::idt::IDT_ENTRIES;

const STUB_STRIDE: u64 = 16;

#[cfg(target_os = "none")]
mod imp {
    use core::arch::global_asm;
    use core::ptr::addr_of;

    global_asm!(
        ".pushsection .text",
        ".macro isr_noerr vec",
        "    .balign 16",
        "    pushq $0",
        "    pushq $\\vec",
        "    jmp isr_common",
        ".endm",
        ".macro isr_err vec",
        "    .balign 16",
        "    pushq $\\vec",
        "    jmp isr_common",
        ".endm",
        "",
        ".balign 16",
        ".global isr_stub_base",
        "isr_stub_base:",
        "isr_noerr 0",
        "isr_noerr 1",
        "isr_noerr 2",
        "isr_noerr 3",
        "isr_noerr 4",
        "isr_noerr 5",
        "isr_noerr 6",
        "isr_noerr 7",
        "isr_err 8",
        "isr_noerr 9",
        "isr_err 10",
        "isr_err 11",
        "isr_err 12",
        "isr_err 13",
        "isr_err 14",
        "isr_noerr 15",
        "isr_noerr 16",
        "isr_err 17",
        "isr_noerr 18",
        "isr_noerr 19",
        "isr_noerr 20",
        "isr_err 21",
        "isr_noerr 22",
        "isr_noerr 23",
        "isr_noerr 24",
        "isr_noerr 25",
        "isr_noerr 26",
        "isr_noerr 27",
        "isr_noerr 28",
        "isr_err 29",
        "isr_err 30",
        "isr_noerr 31",
        ".set vector, 32",
        ".rept 224",
        "    isr_noerr vector",
        "    .set vector, vector + 1",
        ".endr",
        "",
        "isr_common:",
        "    pushq %rax",
        "    pushq %rcx",
        "    pushq %rdx",
        "    pushq %rbx",
        "    pushq %rbp",
        "    pushq %rsi",
        "    pushq %rdi",
        "    pushq %r8",
        "    pushq %r9",
        "    pushq %r10",
        "    pushq %r11",
        "    pushq %r12",
        "    pushq %r13",
        "    pushq %r14",
        "    pushq %r15",
        "    movq %rsp, %rdi",
        "    cld",
        "    call {dispatch}",
        "    popq %r15",
        "    popq %r14",
        "    popq %r13",
        "    popq %r12",
        "    popq %r11",
        "    popq %r10",
        "    popq %r9",
        "    popq %r8",
        "    popq %rdi",
        "    popq %rsi",
        "    popq %rbp",
        "    popq %rbx",
        "    popq %rdx",
        "    popq %rcx",
        "    popq %rax",
        "    addq $16, %rsp",
        "    iretq",
        ".popsection",
        dispatch = sym super::super::interrupt_dispatch,
        options(att_syntax)
    );

    extern "C" {
        static isr_stub_base: u8;
    }

    pub fn stub_base() -> u64 {
        addr_of!(isr_stub_base) as u64
    }
}

#[cfg(not(target_os = "none"))]
mod imp {
    /// Hosted builds have no entry code; a fixed base keeps the table shape.
    pub fn stub_base() -> u64 {
        0x10_0000
    }
}

/// Entry address for every vector, in vector order.
pub fn stub_addresses() -> [u64; IDT_ENTRIES] {
    let base = imp::stub_base();
    let mut stubs = [0u64; IDT_ENTRIES];
    for (vector, stub) in stubs.iter_mut().enumerate() {
        *stub = base + STUB_STRIDE * vector as u64;
    }
    stubs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stub_stride() {
        let stubs = stub_addresses();
        assert_eq!(stubs[1] - stubs[0], 16);
        assert_eq!(stubs[255] - stubs[0], 255 * 16);
    }
}
