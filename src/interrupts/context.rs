/// Register snapshot pushed by the common trap stub.
///
/// Field order mirrors the stack from the lowest address upward: the stub
/// pushes the general-purpose registers last, so `r15` sits at the stack
/// pointer handed to the dispatcher. `vector` and `error_code` are pushed by
/// the per-vector stub (0 when the CPU supplies no error code), and the last
/// five words are the frame the CPU pushed on entry.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InterruptContext {
    pub r15: u64,
    pub r14: u64,
    pub r13: u64,
    pub r12: u64,
    pub r11: u64,
    pub r10: u64,
    pub r9: u64,
    pub r8: u64,
    pub rdi: u64,
    pub rsi: u64,
    pub rbp: u64,
    pub rbx: u64,
    pub rdx: u64,
    pub rcx: u64,
    pub rax: u64,

    pub vector: u64,
    pub error_code: u64,

    pub rip: u64,
    pub cs: u64,
    pub rflags: u64,
    pub rsp: u64,
    pub ss: u64,
}

impl InterruptContext {
    /// Context for `vector` with every register cleared.
    pub const fn for_vector(vector: u8) -> Self {
        Self {
            r15: 0,
            r14: 0,
            r13: 0,
            r12: 0,
            r11: 0,
            r10: 0,
            r9: 0,
            r8: 0,
            rdi: 0,
            rsi: 0,
            rbp: 0,
            rbx: 0,
            rdx: 0,
            rcx: 0,
            rax: 0,
            vector: vector as u64,
            error_code: 0,
            rip: 0,
            cs: 0,
            rflags: 0,
            rsp: 0,
            ss: 0,
        }
    }

    /// The trap came from ring 3.
    pub fn from_user_mode(&self) -> bool {
        self.cs & 0b11 == 0b11
    }
}

const _: () = assert!(::core::mem::size_of::<InterruptContext>() == 22 * 8);
