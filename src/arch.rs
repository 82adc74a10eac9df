//! CPU primitives used by the core.
//!
//! On the bare-metal target these execute the real privileged instructions.
//! Hosted builds (unit tests) get inert stand-ins: there is a single thread,
//! no interrupt flag to toggle, and no stacks to switch.

pub use imp::*;

#[cfg(target_os = "none")]
mod imp {
    use core::arch::global_asm;
    use x86_64::instructions::{hlt, interrupts};

    // Callee-saved registers are pushed onto the outgoing stack, the resulting
    // stack pointer is stored through `rdi`, and the incoming stack in `rsi` is
    // unwound in the same order. A fresh task's stack is laid out so that the
    // final `ret` lands on `kernel_task_trampoline`, whose `iretq` consumes
    // the prepared entry frame. When the entry function returns it lands on
    // `kernel_task_exit`, which realigns the stack and calls the exit hook
    // left in `rbx` (callee-saved, so it survives the entry function).
    global_asm!(
        ".pushsection .text",
        ".global kernel_switch_context",
        "kernel_switch_context:",
        "    pushq %rbp",
        "    pushq %rbx",
        "    pushq %r12",
        "    pushq %r13",
        "    pushq %r14",
        "    pushq %r15",
        "    movq %rsp, (%rdi)",
        "    movq %rsi, %rsp",
        "    popq %r15",
        "    popq %r14",
        "    popq %r13",
        "    popq %r12",
        "    popq %rbx",
        "    popq %rbp",
        "    ret",
        ".global kernel_task_trampoline",
        "kernel_task_trampoline:",
        "    iretq",
        ".global kernel_task_exit",
        "kernel_task_exit:",
        "    andq $-16, %rsp",
        "    callq *%rbx",
        "    ud2",
        ".popsection",
        options(att_syntax)
    );

    extern "C" {
        fn kernel_switch_context(save_rsp: *mut u64, next_rsp: u64);
        fn kernel_task_trampoline();
        fn kernel_task_exit();
    }

    #[inline]
    pub fn without_interrupts<F, R>(f: F) -> R
    where
        F: FnOnce() -> R,
    {
        interrupts::without_interrupts(f)
    }

    #[inline]
    pub fn enable_interrupts() {
        interrupts::enable();
    }

    #[inline]
    pub fn halt() {
        hlt();
    }

    /// Atomically re-enables interrupts and halts until the next one.
    #[inline]
    pub fn enable_and_halt() {
        interrupts::enable_and_hlt();
    }

    /// # Safety
    /// Must be called with interrupts disabled. `next_rsp` must be a stack
    /// pointer previously saved by this function or prepared by
    /// `task::stack::TaskStack::prepare_entry`.
    pub unsafe fn switch_context(save_rsp: *mut u64, next_rsp: u64) {
        kernel_switch_context(save_rsp, next_rsp);
    }

    pub fn task_entry_trampoline() -> u64 {
        kernel_task_trampoline as usize as u64
    }

    pub fn task_exit_trampoline() -> u64 {
        kernel_task_exit as usize as u64
    }
}

#[cfg(not(target_os = "none"))]
mod imp {
    #[inline]
    pub fn without_interrupts<F, R>(f: F) -> R
    where
        F: FnOnce() -> R,
    {
        f()
    }

    #[inline]
    pub fn enable_interrupts() {}

    #[inline]
    pub fn halt() {
        core::hint::spin_loop();
    }

    #[inline]
    pub fn enable_and_halt() {
        core::hint::spin_loop();
    }

    /// # Safety
    /// No-op when hosted: the scheduler's bookkeeping still switches the
    /// logical current task, but execution stays on the caller's stack.
    pub unsafe fn switch_context(_save_rsp: *mut u64, _next_rsp: u64) {}

    pub fn task_entry_trampoline() -> u64 {
        0
    }

    pub fn task_exit_trampoline() -> u64 {
        0
    }
}
