//! Port I/O
//!
//! Every driver and the PIC talk to hardware through [`PortIo`]. The real
//! implementation wraps `x86_64::instructions::port::Port`; unit tests swap in
//! [`mock::RecordingPorts`] to assert the exact access sequence.

use x86_64::instructions::port::Port;

/// Scratch port written to burn roughly one microsecond between PIC commands.
const IO_DELAY_PORT: u16 = 0x80;

pub trait PortIo {
    fn read_u8(&mut self, port: u16) -> u8;
    fn write_u8(&mut self, port: u16, value: u8);

    /// Short delay required by slow controllers between consecutive writes.
    fn io_wait(&mut self) {
        self.write_u8(IO_DELAY_PORT, 0);
    }
}

/// Direct access to the CPU's I/O port space.
#[derive(Debug)]
pub struct HardwarePorts {
    _private: (),
}

impl HardwarePorts {
    /// # Safety
    /// The caller must be running in ring 0 and must ensure that whoever holds
    /// this value is the only code driving the ports it touches.
    pub const unsafe fn new() -> Self {
        Self { _private: () }
    }
}

impl PortIo for HardwarePorts {
    fn read_u8(&mut self, port: u16) -> u8 {
        unsafe { Port::<u8>::new(port).read() }
    }

    fn write_u8(&mut self, port: u16, value: u8) {
        unsafe { Port::<u8>::new(port).write(value) }
    }
}
