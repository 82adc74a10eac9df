/// Kernel initialization phases
use bootloader_api::info::MemoryRegion;

use crate::arch;
use crate::config::KernelConfig;
use crate::drivers::{pit, ps2_keyboard};
use crate::kernel::status::{register_component, update_component_status, InitStatus};
use crate::{executor, interrupts, memory};

const PHASES: [&str; 5] = ["Memory", "Interrupts", "Timer", "Keyboard", "Scheduler"];

/// Initialize kernel in proper order with error handling.
///
/// Memory comes first so handler registration can allocate; the PIC is
/// remapped before any driver unmasks its line; interrupts are enabled last.
pub fn init_kernel(config: &KernelConfig, regions: &[MemoryRegion]) -> Result<(), &'static str> {
    for name in PHASES {
        register_component(name);
    }
    log::info!("nexus-kernel: initializing");

    init_phase(1, "Memory", || memory::init(regions))?;
    init_phase(2, "Interrupts", || {
        interrupts::init();
        Ok(())
    })?;
    init_phase(3, "Timer", || {
        pit::init(config.timer_hz).map_err(|_| "invalid timer frequency")
    })?;
    init_phase(4, "Keyboard", || {
        ps2_keyboard::init();
        Ok(())
    })?;
    init_phase(5, "Scheduler", || {
        executor::initialize(config.task_stack_size)
            .map(|_| ())
            .map_err(|_| "scheduler already initialized")
    })?;

    arch::enable_interrupts();
    log::info!("nexus-kernel: initialization complete");
    Ok(())
}

fn init_phase(
    step: usize,
    name: &'static str,
    init_fn: impl FnOnce() -> Result<(), &'static str>,
) -> Result<(), &'static str> {
    update_component_status(name, InitStatus::InProgress);
    log::info!("[{}/{}] Initializing {}...", step, PHASES.len(), name);

    match init_fn() {
        Ok(()) => {
            update_component_status(name, InitStatus::Completed);
            log::debug!("{} initialized", name);
            Ok(())
        }
        Err(e) => {
            update_component_status(name, InitStatus::Failed(e));
            log::error!("{} failed: {}", name, e);
            Err(e)
        }
    }
}
