//! # PS/2 Keyboard Driver
//!
//! Handles PS/2 keyboard input via the IRQ1 interrupt.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐    IRQ1     ┌──────────────────┐     ┌──────────────┐
//! │  Keyboard   │────────────▶│ ScancodeDecoder  │────▶│  KeyBuffer   │
//! │  (Port 60)  │             │ - Shift / Ctrl   │     │  (256 bytes) │
//! └─────────────┘             │ - US layout      │     └──────┬───────┘
//!                             └──────────────────┘            │
//!                                                             ▼
//!                                                  read_char / try_read_char
//! ```
//!
//! ## Scancode Processing
//!
//! 1. IRQ1 handler reads the scancode from port 0x60
//! 2. 0x2A/0x36 press and 0xAA/0xB6 release track Shift; 0x1D/0x9D track Ctrl
//! 3. Other key releases (bit 7 set) are ignored
//! 4. Presses are mapped through the US table and pushed to the ring buffer;
//!    when it is full the character is dropped
//! 5. Tasks blocked in `read_char` are woken

use alloc::vec::Vec;

use spin::Mutex;

use crate::arch;
use crate::executor;
use crate::interrupts::{self, InterruptContext, InterruptIndex};
use crate::io::{HardwarePorts, PortIo};
use crate::task::TaskHandle;

pub const KEYBOARD_BUFFER_SIZE: usize = 256;

const DATA_PORT: u16 = 0x60;

const LEFT_SHIFT_PRESSED: u8 = 0x2A;
const RIGHT_SHIFT_PRESSED: u8 = 0x36;
const LEFT_SHIFT_RELEASED: u8 = 0xAA;
const RIGHT_SHIFT_RELEASED: u8 = 0xB6;
const CTRL_PRESSED: u8 = 0x1D;
const CTRL_RELEASED: u8 = 0x9D;
const RELEASE_BIT: u8 = 0x80;

/// Scancode set 1, US layout. 0 marks keys without a character.
#[rustfmt::skip]
const US_LOWER: [u8; 58] = [
    0, 27, b'1', b'2', b'3', b'4', b'5', b'6', b'7', b'8', b'9', b'0', b'-', b'=', 0x08,
    b'\t', b'q', b'w', b'e', b'r', b't', b'y', b'u', b'i', b'o', b'p', b'[', b']', b'\n',
    0, b'a', b's', b'd', b'f', b'g', b'h', b'j', b'k', b'l', b';', b'\'', b'`',
    0, b'\\', b'z', b'x', b'c', b'v', b'b', b'n', b'm', b',', b'.', b'/', 0,
    b'*', 0, b' ',
];

#[rustfmt::skip]
const US_UPPER: [u8; 58] = [
    0, 27, b'!', b'@', b'#', b'$', b'%', b'^', b'&', b'*', b'(', b')', b'_', b'+', 0x08,
    b'\t', b'Q', b'W', b'E', b'R', b'T', b'Y', b'U', b'I', b'O', b'P', b'{', b'}', b'\n',
    0, b'A', b'S', b'D', b'F', b'G', b'H', b'J', b'K', b'L', b':', b'"', b'~',
    0, b'|', b'Z', b'X', b'C', b'V', b'B', b'N', b'M', b'<', b'>', b'?', 0,
    b'*', 0, b' ',
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEvent {
    pub character: char,
    pub ctrl: bool,
    pub shift: bool,
}

pub struct ScancodeDecoder {
    shift_pressed: bool,
    ctrl_pressed: bool,
}

impl ScancodeDecoder {
    pub const fn new() -> Self {
        Self {
            shift_pressed: false,
            ctrl_pressed: false,
        }
    }

    pub fn process_scancode(&mut self, scancode: u8) -> Option<KeyEvent> {
        match scancode {
            LEFT_SHIFT_PRESSED | RIGHT_SHIFT_PRESSED => {
                self.shift_pressed = true;
                return None;
            }
            LEFT_SHIFT_RELEASED | RIGHT_SHIFT_RELEASED => {
                self.shift_pressed = false;
                return None;
            }
            CTRL_PRESSED => {
                self.ctrl_pressed = true;
                return None;
            }
            CTRL_RELEASED => {
                self.ctrl_pressed = false;
                return None;
            }
            _ => {}
        }

        if scancode & RELEASE_BIT != 0 {
            return None;
        }

        let table = if self.shift_pressed { &US_UPPER } else { &US_LOWER };
        match table.get(scancode as usize).copied() {
            Some(0) | None => None,
            Some(byte) => Some(KeyEvent {
                character: byte as char,
                ctrl: self.ctrl_pressed,
                shift: self.shift_pressed,
            }),
        }
    }

    pub fn shift_pressed(&self) -> bool {
        self.shift_pressed
    }

    pub fn ctrl_pressed(&self) -> bool {
        self.ctrl_pressed
    }
}

impl Default for ScancodeDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Ring of decoded characters. One slot stays empty to tell full from empty.
pub struct KeyBuffer {
    buf: [u8; KEYBOARD_BUFFER_SIZE],
    read_pos: usize,
    write_pos: usize,
}

impl KeyBuffer {
    pub const fn new() -> Self {
        Self {
            buf: [0; KEYBOARD_BUFFER_SIZE],
            read_pos: 0,
            write_pos: 0,
        }
    }

    /// Returns `false` when the buffer was full and `byte` was dropped.
    pub fn push(&mut self, byte: u8) -> bool {
        let next = (self.write_pos + 1) % KEYBOARD_BUFFER_SIZE;
        if next == self.read_pos {
            return false;
        }
        self.buf[self.write_pos] = byte;
        self.write_pos = next;
        true
    }

    pub fn pop(&mut self) -> Option<u8> {
        if self.is_empty() {
            return None;
        }
        let byte = self.buf[self.read_pos];
        self.read_pos = (self.read_pos + 1) % KEYBOARD_BUFFER_SIZE;
        Some(byte)
    }

    pub fn is_empty(&self) -> bool {
        self.read_pos == self.write_pos
    }

    pub fn len(&self) -> usize {
        (self.write_pos + KEYBOARD_BUFFER_SIZE - self.read_pos) % KEYBOARD_BUFFER_SIZE
    }

    pub fn clear(&mut self) {
        self.read_pos = 0;
        self.write_pos = 0;
    }
}

impl Default for KeyBuffer {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Keyboard {
    decoder: ScancodeDecoder,
    buffer: KeyBuffer,
    dropped: u64,
}

impl Keyboard {
    pub const fn new() -> Self {
        Self {
            decoder: ScancodeDecoder::new(),
            buffer: KeyBuffer::new(),
            dropped: 0,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Decode one scancode. Returns `true` if a character was buffered.
    pub fn handle_scancode(&mut self, scancode: u8) -> bool {
        let Some(event) = self.decoder.process_scancode(scancode) else {
            return false;
        };
        if self.buffer.push(event.character as u8) {
            true
        } else {
            self.dropped += 1;
            false
        }
    }

    /// Read and decode the pending scancode from the controller.
    pub fn service<P: PortIo>(&mut self, ports: &mut P) -> bool {
        let scancode = ports.read_u8(DATA_PORT);
        self.handle_scancode(scancode)
    }

    pub fn pop(&mut self) -> Option<char> {
        self.buffer.pop().map(char::from)
    }

    pub fn has_char(&self) -> bool {
        !self.buffer.is_empty()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl Default for Keyboard {
    fn default() -> Self {
        Self::new()
    }
}

static KEYBOARD: Mutex<Keyboard> = Mutex::new(Keyboard::new());
/// Tasks parked in `read_char`.
static WAITERS: Mutex<Vec<TaskHandle>> = Mutex::new(Vec::new());

/// Reset driver state, install the IRQ1 handler and unmask the line.
pub fn init() {
    arch::without_interrupts(|| KEYBOARD.lock().reset());
    interrupts::register_handler(InterruptIndex::Keyboard.as_u8(), on_interrupt);
    interrupts::unmask_irq(InterruptIndex::Keyboard.irq());
    log::info!("ps2_keyboard: ready on IRQ {}", InterruptIndex::Keyboard.irq());
}

fn on_interrupt(_context: &InterruptContext) {
    let mut ports = unsafe { HardwarePorts::new() };
    if KEYBOARD.lock().service(&mut ports) {
        // drain keeps the allocation; nothing is freed in interrupt context
        for handle in WAITERS.lock().drain(..) {
            let _ = executor::wake(handle);
        }
    }
}

pub fn has_char() -> bool {
    arch::without_interrupts(|| KEYBOARD.lock().has_char())
}

pub fn try_read_char() -> Option<char> {
    arch::without_interrupts(|| KEYBOARD.lock().pop())
}

/// Block the calling task until a character arrives.
pub fn read_char() -> char {
    loop {
        if let Some(ch) = try_read_char() {
            return ch;
        }

        let parked = arch::without_interrupts(|| {
            if KEYBOARD.lock().has_char() {
                return true;
            }
            let Some(handle) = executor::current_handle() else {
                return false;
            };
            if !enqueue_waiter(&mut WAITERS.lock(), handle) {
                log::warn!("ps2_keyboard: waiter list full, polling instead");
                return false;
            }
            if executor::block_current().is_ok() {
                return true;
            }
            WAITERS.lock().retain(|waiter| *waiter != handle);
            false
        });

        if !parked {
            arch::enable_and_halt();
        }
    }
}

/// Record `handle` as waiting for input. `false` when the list cannot grow;
/// the heap may be exhausted, and a failed push would abort.
fn enqueue_waiter(waiters: &mut Vec<TaskHandle>, handle: TaskHandle) -> bool {
    if waiters.contains(&handle) {
        return true;
    }
    if waiters.try_reserve(1).is_err() {
        return false;
    }
    waiters.push(handle);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::mock::{PortAccess, RecordingPorts};

    fn decode(decoder: &mut ScancodeDecoder, scancode: u8) -> Option<char> {
        decoder.process_scancode(scancode).map(|event| event.character)
    }

    #[test]
    fn test_plain_keys() {
        let mut decoder = ScancodeDecoder::new();
        assert_eq!(decode(&mut decoder, 0x1E), Some('a'));
        assert_eq!(decode(&mut decoder, 0x02), Some('1'));
        assert_eq!(decode(&mut decoder, 0x1C), Some('\n'));
        assert_eq!(decode(&mut decoder, 0x0E), Some('\x08'));
        assert_eq!(decode(&mut decoder, 0x39), Some(' '));
        assert_eq!(decode(&mut decoder, 0x01), Some('\x1b'));
    }

    #[test]
    fn test_shift_tracking() {
        let mut decoder = ScancodeDecoder::new();
        assert_eq!(decode(&mut decoder, 0x2A), None);
        assert!(decoder.shift_pressed());
        assert_eq!(decode(&mut decoder, 0x1E), Some('A'));
        assert_eq!(decode(&mut decoder, 0x02), Some('!'));
        assert_eq!(decode(&mut decoder, 0xAA), None);
        assert_eq!(decode(&mut decoder, 0x1E), Some('a'));

        decode(&mut decoder, 0x36);
        assert_eq!(decode(&mut decoder, 0x28), Some('"'));
        decode(&mut decoder, 0xB6);
        assert!(!decoder.shift_pressed());
    }

    #[test]
    fn test_ctrl_and_releases() {
        let mut decoder = ScancodeDecoder::new();
        decode(&mut decoder, 0x1D);
        let event = decoder.process_scancode(0x2E).unwrap();
        assert_eq!(event.character, 'c');
        assert!(event.ctrl);
        decode(&mut decoder, 0x9D);
        assert!(!decoder.ctrl_pressed());

        // key-up of 'a' and keys outside the table produce nothing
        assert_eq!(decode(&mut decoder, 0x9E), None);
        assert_eq!(decode(&mut decoder, 0x3B), None);
        assert_eq!(decode(&mut decoder, 0x38), None);
    }

    #[test]
    fn test_buffer_drops_when_full() {
        let mut buffer = KeyBuffer::new();
        let stored = (0..300u32).filter(|i| buffer.push(*i as u8)).count();
        assert_eq!(stored, KEYBOARD_BUFFER_SIZE - 1);
        assert_eq!(buffer.len(), KEYBOARD_BUFFER_SIZE - 1);
        assert_eq!(buffer.pop(), Some(0));
        assert_eq!(buffer.pop(), Some(1));
        assert!(buffer.push(b'x'));
    }

    #[test]
    fn test_keyboard_service_reads_data_port() {
        let ports = RecordingPorts::new();
        ports.preset(0x60, 0x23);
        let mut keyboard = Keyboard::new();
        let mut device = ports.clone();

        assert!(keyboard.service(&mut device));
        assert_eq!(ports.accesses(), [PortAccess::Read(0x60)]);
        assert!(keyboard.has_char());
        assert_eq!(keyboard.pop(), Some('h'));
        assert!(!keyboard.has_char());
    }

    #[test]
    fn test_keyboard_counts_dropped() {
        let mut keyboard = Keyboard::new();
        for _ in 0..KEYBOARD_BUFFER_SIZE {
            keyboard.handle_scancode(0x1E);
        }
        assert_eq!(keyboard.dropped(), 1);
        assert!(!keyboard.handle_scancode(0x2A));
        keyboard.reset();
        assert!(!keyboard.has_char());
    }

    #[test]
    fn test_enqueue_waiter_once() {
        let first = TaskHandle { index: 2, generation: 0 };
        let second = TaskHandle { index: 3, generation: 1 };
        let mut waiters = Vec::new();

        assert!(enqueue_waiter(&mut waiters, first));
        assert!(enqueue_waiter(&mut waiters, second));
        assert!(enqueue_waiter(&mut waiters, first));
        assert_eq!(waiters, [first, second]);
    }
}
