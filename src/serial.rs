//! COM1 serial console.
//!
//! The only output device the core owns. `serial_println!` is the raw
//! channel (panic handler, boot banner); everything else goes through the
//! `log` facade installed by [`crate::logger`].

use core::fmt::{self, Write};
use spin::Mutex;
use uart_16550::SerialPort;

use crate::arch;

const COM1: u16 = 0x3F8;

pub static SERIAL: Mutex<SerialPort> = Mutex::new(unsafe { SerialPort::new(COM1) });

pub fn init() {
    arch::without_interrupts(|| SERIAL.lock().init());
}

#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    // An interrupt handler that logs must not find the port locked by the
    // code it interrupted.
    arch::without_interrupts(|| {
        let _ = SERIAL.lock().write_fmt(args);
    });
}

#[macro_export]
macro_rules! serial_print {
    ($($arg:tt)*) => {
        $crate::serial::_print(format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! serial_println {
    () => ($crate::serial_print!("\n"));
    ($($arg:tt)*) => {
        $crate::serial::_print(format_args!("{}\n", format_args!($($arg)*)))
    };
}
