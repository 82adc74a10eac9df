//! # Programmable Interval Timer (8253/8254)
//!
//! Channel 0 runs as a square-wave generator at the configured rate and
//! raises IRQ 0 (vector 32) on every period.
//!
//! | Port | Use                         |
//! |------|-----------------------------|
//! | 0x43 | mode/command register       |
//! | 0x40 | channel 0 data (divisor)    |

use core::fmt;
use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use spin::Mutex;

use crate::arch;
use crate::executor;
use crate::interrupts::{self, InterruptContext, InterruptIndex};
use crate::io::{HardwarePorts, PortIo};

/// Input clock of the PIT in Hz.
pub const PIT_BASE_FREQUENCY: u32 = 1_193_182;

const PIT_COMMAND: u16 = 0x43;
const PIT_CHANNEL0: u16 = 0x40;
/// Channel 0, lobyte/hibyte access, mode 3 (square wave), binary.
const MODE_SQUARE_WAVE: u8 = 0x36;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PitError {
    /// The rate cannot be expressed as a 16-bit divisor.
    InvalidFrequency,
}

impl fmt::Display for PitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PitError::InvalidFrequency => write!(f, "timer frequency out of range"),
        }
    }
}

/// Divisor for `hz`. Rates below ~19 Hz or above the base clock do not fit.
pub fn divisor_for(hz: u32) -> Result<u16, PitError> {
    if hz == 0 {
        return Err(PitError::InvalidFrequency);
    }
    match PIT_BASE_FREQUENCY / hz {
        0 => Err(PitError::InvalidFrequency),
        divisor => u16::try_from(divisor).map_err(|_| PitError::InvalidFrequency),
    }
}

pub struct Pit<P: PortIo> {
    ports: P,
}

impl<P: PortIo> Pit<P> {
    pub const fn new(ports: P) -> Self {
        Self { ports }
    }

    /// Program channel 0 to fire `hz` times per second.
    pub fn program(&mut self, hz: u32) -> Result<u16, PitError> {
        let divisor = divisor_for(hz)?;
        let [low, high] = divisor.to_le_bytes();
        self.ports.write_u8(PIT_COMMAND, MODE_SQUARE_WAVE);
        self.ports.write_u8(PIT_CHANNEL0, low);
        self.ports.write_u8(PIT_CHANNEL0, high);
        Ok(divisor)
    }
}

/// Tick bookkeeping shared between the IRQ handler and readers.
pub struct TickCounter {
    ticks: AtomicU64,
    frequency: AtomicU32,
}

impl TickCounter {
    pub const fn new() -> Self {
        Self {
            ticks: AtomicU64::new(0),
            frequency: AtomicU32::new(0),
        }
    }

    pub fn start(&self, hz: u32) {
        self.ticks.store(0, Ordering::Relaxed);
        self.frequency.store(hz, Ordering::Release);
    }

    pub fn tick(&self) -> u64 {
        self.ticks.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    pub fn frequency(&self) -> u32 {
        self.frequency.load(Ordering::Acquire)
    }

    pub fn uptime_ms(&self) -> u64 {
        match self.frequency() {
            0 => 0,
            hz => self.ticks() * 1000 / hz as u64,
        }
    }

    /// Ticks covering at least `ms` milliseconds.
    pub fn ticks_for_ms(&self, ms: u64) -> u64 {
        (ms * self.frequency() as u64).div_ceil(1000)
    }
}

impl Default for TickCounter {
    fn default() -> Self {
        Self::new()
    }
}

static PIT: Mutex<Pit<HardwarePorts>> = Mutex::new(Pit::new(unsafe { HardwarePorts::new() }));
static TIMER: TickCounter = TickCounter::new();

/// Program the PIT, install the tick handler and unmask IRQ 0.
pub fn init(hz: u32) -> Result<(), PitError> {
    let divisor = arch::without_interrupts(|| PIT.lock().program(hz))?;
    TIMER.start(hz);
    interrupts::register_handler(InterruptIndex::Timer.as_u8(), on_tick);
    interrupts::unmask_irq(InterruptIndex::Timer.irq());
    log::info!("pit: {} Hz (divisor {})", hz, divisor);
    Ok(())
}

fn on_tick(_context: &InterruptContext) {
    TIMER.tick();
    executor::tick();
}

pub fn ticks() -> u64 {
    TIMER.ticks()
}

pub fn frequency() -> u32 {
    TIMER.frequency()
}

pub fn uptime_ms() -> u64 {
    TIMER.uptime_ms()
}

/// Wait at least `ms` milliseconds, letting other tasks run meanwhile.
pub fn sleep(ms: u64) {
    if TIMER.frequency() == 0 {
        log::warn!("pit: sleep({}) before the timer was started", ms);
        return;
    }
    let target = TIMER.ticks() + TIMER.ticks_for_ms(ms);
    while TIMER.ticks() < target {
        executor::yield_now();
        if TIMER.ticks() < target {
            arch::enable_and_halt();
        }
    }
}
