//! Handler registry and the dispatch path shared by every vector.

use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use spin::Mutex;

use super::context::InterruptContext;
use super::idt::IDT_ENTRIES;
use super::pic::ChainedPics;
use crate::arch;
use crate::io::PortIo;

/// Something that runs when a vector fires. Runs with interrupts disabled
/// and must not block.
pub trait InterruptHandler: Send + Sync {
    fn handle(&self, context: &InterruptContext);
}

impl<F> InterruptHandler for F
where
    F: Fn(&InterruptContext) + Send + Sync,
{
    fn handle(&self, context: &InterruptContext) {
        self(context)
    }
}

/// One slot per vector. Slots are replaced, never cleared.
pub struct HandlerRegistry {
    slots: [Option<Arc<dyn InterruptHandler>>; IDT_ENTRIES],
}

impl HandlerRegistry {
    pub const fn new() -> Self {
        const EMPTY: Option<Arc<dyn InterruptHandler>> = None;
        Self {
            slots: [EMPTY; IDT_ENTRIES],
        }
    }

    /// Install `handler`, returning the one it replaced.
    pub fn insert(
        &mut self,
        vector: u8,
        handler: Arc<dyn InterruptHandler>,
    ) -> Option<Arc<dyn InterruptHandler>> {
        self.slots[vector as usize].replace(handler)
    }

    pub fn get(&self, vector: u8) -> Option<Arc<dyn InterruptHandler>> {
        self.slots[vector as usize].clone()
    }

    pub fn is_registered(&self, vector: u8) -> bool {
        self.slots[vector as usize].is_some()
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Registry plus the PIC pair it acknowledges through.
pub struct InterruptSubsystem<P: PortIo> {
    handlers: Mutex<HandlerRegistry>,
    pics: Mutex<ChainedPics<P>>,
    initialized: AtomicBool,
    unhandled: AtomicU64,
}

impl<P: PortIo> InterruptSubsystem<P> {
    pub const fn new(ports: P) -> Self {
        Self {
            handlers: Mutex::new(HandlerRegistry::new()),
            pics: Mutex::new(ChainedPics::new(ports)),
            initialized: AtomicBool::new(false),
            unhandled: AtomicU64::new(0),
        }
    }

    /// Remap the PIC pair. Must run before the first hardware interrupt is
    /// unmasked.
    pub fn initialize(&self) {
        arch::without_interrupts(|| self.pics.lock().remap());
        self.initialized.store(true, Ordering::Release);
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Install or replace the handler for `vector`; the last registration wins.
    pub fn register_handler<H>(&self, vector: u8, handler: H)
    where
        H: InterruptHandler + 'static,
    {
        let handler: Arc<dyn InterruptHandler> = Arc::new(handler);
        let previous = arch::without_interrupts(|| self.handlers.lock().insert(vector, handler));
        if previous.is_some() {
            log::debug!("interrupts: handler for vector {} replaced", vector);
        } else {
            log::trace!("interrupts: handler for vector {} registered", vector);
        }
    }

    pub fn is_registered(&self, vector: u8) -> bool {
        arch::without_interrupts(|| self.handlers.lock().is_registered(vector))
    }

    /// Run the handler for `context.vector`, then acknowledge PIC vectors.
    ///
    /// Called from the trap path with interrupts disabled. The registry lock
    /// is released before the handler runs so a handler may itself register.
    pub fn dispatch(&self, context: &InterruptContext) {
        let Ok(vector) = u8::try_from(context.vector) else {
            log::warn!("interrupts: dropping trap with bad vector {:#x}", context.vector);
            return;
        };

        let handler = self.handlers.lock().get(vector);
        match handler {
            Some(handler) => handler.handle(context),
            None => {
                self.unhandled.fetch_add(1, Ordering::Relaxed);
            }
        }

        self.pics.lock().end_of_interrupt(vector);
    }

    pub fn unhandled_count(&self) -> u64 {
        self.unhandled.load(Ordering::Relaxed)
    }

    pub fn mask_irq(&self, irq: u8) {
        arch::without_interrupts(|| self.pics.lock().mask(irq));
    }

    pub fn unmask_irq(&self, irq: u8) {
        arch::without_interrupts(|| self.pics.lock().unmask(irq));
    }
}
