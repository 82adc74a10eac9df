//! # Programmable Interrupt Controller (8259 PIC)
//!
//! Configures the legacy 8259 PIC pair for interrupt routing.
//!
//! ## PIC Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐
//! │   PIC 1     │     │   PIC 2     │
//! │  (Master)   │◀────│  (Slave)    │
//! │ IRQ 0-7     │     │ IRQ 8-15    │
//! └─────────────┘     └─────────────┘
//!       │
//!       ▼
//!     CPU
//! ```
//!
//! ## Vector Remapping
//!
//! By default, IRQ 0-15 collide with CPU exception vectors.
//! We remap them:
//! - PIC 1: vectors 32-39 (IRQ 0-7)
//! - PIC 2: vectors 40-47 (IRQ 8-15)
//!
//! ## Interrupt Assignments
//!
//! | IRQ | Vector | Device    |
//! |-----|--------|-----------|
//! | 0   | 32     | Timer     |
//! | 1   | 33     | Keyboard  |

use crate::io::PortIo;

pub const PIC_1_OFFSET: u8 = 32;
pub const PIC_2_OFFSET: u8 = 40;

pub const PIC_1_COMMAND: u16 = 0x20;
pub const PIC_1_DATA: u16 = 0x21;
pub const PIC_2_COMMAND: u16 = 0xA0;
pub const PIC_2_DATA: u16 = 0xA1;

const CMD_INIT: u8 = 0x11;
const CMD_END_OF_INTERRUPT: u8 = 0x20;
/// ICW3 for the master: a slave is wired to IRQ 2.
const CASCADE_MASTER: u8 = 0x04;
/// ICW3 for the slave: its cascade identity is 2.
const CASCADE_SLAVE: u8 = 0x02;
const MODE_8086: u8 = 0x01;

// Interrupt indices - these are the actual vector numbers the CPU sees
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum InterruptIndex {
    Timer = PIC_1_OFFSET,        // 32 - IRQ0
    Keyboard = PIC_1_OFFSET + 1, // 33 - IRQ1
}

impl InterruptIndex {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Line number on the PIC pair (0-15).
    pub fn irq(self) -> u8 {
        self.as_u8() - PIC_1_OFFSET
    }
}

/// The master/slave 8259 pair, driven through `P`.
pub struct ChainedPics<P: PortIo> {
    ports: P,
}

impl<P: PortIo> ChainedPics<P> {
    pub const fn new(ports: P) -> Self {
        Self { ports }
    }

    /// Remap IRQ 0-15 to vectors 32-47, preserving both line masks.
    pub fn remap(&mut self) {
        let p = &mut self.ports;

        let mask_1 = p.read_u8(PIC_1_DATA);
        let mask_2 = p.read_u8(PIC_2_DATA);

        p.write_u8(PIC_1_COMMAND, CMD_INIT);
        p.io_wait();
        p.write_u8(PIC_2_COMMAND, CMD_INIT);
        p.io_wait();

        p.write_u8(PIC_1_DATA, PIC_1_OFFSET);
        p.io_wait();
        p.write_u8(PIC_2_DATA, PIC_2_OFFSET);
        p.io_wait();

        p.write_u8(PIC_1_DATA, CASCADE_MASTER);
        p.io_wait();
        p.write_u8(PIC_2_DATA, CASCADE_SLAVE);
        p.io_wait();

        p.write_u8(PIC_1_DATA, MODE_8086);
        p.io_wait();
        p.write_u8(PIC_2_DATA, MODE_8086);
        p.io_wait();

        p.write_u8(PIC_1_DATA, mask_1);
        p.write_u8(PIC_2_DATA, mask_2);
    }

    /// Whether `vector` belongs to one of the two PICs.
    pub fn handles_interrupt(&self, vector: u8) -> bool {
        (PIC_1_OFFSET..PIC_2_OFFSET + 8).contains(&vector)
    }

    /// Acknowledge `vector`. Slave first when it owns the line, then master.
    /// Vectors outside 32-47 are ignored.
    pub fn end_of_interrupt(&mut self, vector: u8) {
        if !self.handles_interrupt(vector) {
            return;
        }
        if vector >= PIC_2_OFFSET {
            self.ports.write_u8(PIC_2_COMMAND, CMD_END_OF_INTERRUPT);
        }
        self.ports.write_u8(PIC_1_COMMAND, CMD_END_OF_INTERRUPT);
    }

    /// Stop delivery of `irq` (0-15).
    pub fn mask(&mut self, irq: u8) {
        let (port, bit) = Self::line(irq);
        let value = self.ports.read_u8(port) | (1 << bit);
        self.ports.write_u8(port, value);
    }

    /// Allow delivery of `irq` (0-15). Unmasking a slave line also opens the
    /// cascade line on the master.
    pub fn unmask(&mut self, irq: u8) {
        let (port, bit) = Self::line(irq);
        let value = self.ports.read_u8(port) & !(1 << bit);
        self.ports.write_u8(port, value);
        if port == PIC_2_DATA {
            let master = self.ports.read_u8(PIC_1_DATA) & !(1 << 2);
            self.ports.write_u8(PIC_1_DATA, master);
        }
    }

    fn line(irq: u8) -> (u16, u8) {
        let irq = irq & 0x0F;
        if irq < 8 {
            (PIC_1_DATA, irq)
        } else {
            (PIC_2_DATA, irq - 8)
        }
    }
}
