//! Cooperative Task Executor
//!
//! Owns the global [`Scheduler`] and turns its decisions into real context
//! switches. Tasks are never preempted; they give up the CPU by calling
//! [`yield_now`], [`block_current`] or [`exit`].
//!
//! # Usage
//! ```ignore
//! executor::initialize(config.task_stack_size)?;
//! executor::create("worker", worker_main)?;
//! loop {
//!     executor::yield_now();
//!     arch::enable_and_halt();
//! }
//! ```
//!
//! Lock order: `SCHEDULER` before `memory::HEAP`. Stacks are allocated
//! before the scheduler lock is taken.

use core::sync::atomic::{AtomicUsize, Ordering};

use spin::Mutex;

use crate::arch;
use crate::config::TASK_STACK_SIZE;
use crate::memory::HEAP;
use crate::task::{Scheduler, SchedulerError, Switch, TaskHandle, TaskInfo, TaskStack};

pub static SCHEDULER: Mutex<Scheduler> = Mutex::new(Scheduler::new());

static STACK_SIZE: AtomicUsize = AtomicUsize::new(TASK_STACK_SIZE);

/// Adopt the current flow of execution as the bootstrap task.
pub fn initialize(stack_size: usize) -> Result<TaskHandle, SchedulerError> {
    STACK_SIZE.store(stack_size, Ordering::Relaxed);
    let handle = arch::without_interrupts(|| SCHEDULER.lock().initialize())?;
    log::info!("scheduler: ready, {} KiB task stacks", stack_size / 1024);
    Ok(handle)
}

pub fn is_initialized() -> bool {
    arch::without_interrupts(|| SCHEDULER.lock().is_initialized())
}

/// Spawn a task running `entry` on a fresh stack. If `entry` returns, the
/// task exits.
pub fn create(name: &str, entry: extern "C" fn()) -> Result<TaskHandle, SchedulerError> {
    arch::without_interrupts(|| {
        let mut scheduler = SCHEDULER.lock();
        if !scheduler.is_initialized() {
            return Err(SchedulerError::NotInitialized);
        }
        scheduler.reserve()
    })
    .map_err(|err| {
        log::warn!("scheduler: cannot track '{}': {}", name, err);
        err
    })?;

    let size = STACK_SIZE.load(Ordering::Relaxed);
    let stack = HEAP
        .with(|heap| TaskStack::allocate(heap, size))
        .map_err(|err| {
            log::warn!("scheduler: no stack for '{}': {}", name, err);
            SchedulerError::OutOfMemory
        })?;

    arch::without_interrupts(|| SCHEDULER.lock().create(name, entry, stack, task_returned))
}

/// Give the CPU to the next runnable task, if there is one.
pub fn yield_now() {
    arch::without_interrupts(|| {
        let switch = SCHEDULER.lock().yield_now();
        if let Some(switch) = switch {
            perform(switch);
        }
    });
}

/// Terminate the calling task. Never returns; the stack is reclaimed by a
/// later [`reap`].
pub fn exit() -> ! {
    arch::without_interrupts(|| {
        let switch = SCHEDULER.lock().exit_current();
        if let Some(switch) = switch {
            perform(switch);
        }
    });

    // nothing else was runnable; wait for an interrupt to wake someone
    loop {
        arch::enable_and_halt();
        yield_now();
    }
}

/// Park the calling task until [`wake`] is called on its handle.
pub fn block_current() -> Result<(), SchedulerError> {
    arch::without_interrupts(|| {
        let switch = SCHEDULER.lock().block_current()?;
        perform(switch);
        Ok(())
    })
}

/// Safe to call from interrupt handlers.
pub fn wake(handle: TaskHandle) -> Result<(), SchedulerError> {
    arch::without_interrupts(|| SCHEDULER.lock().wake(handle))
}

/// The running task.
pub fn current() -> Option<TaskInfo> {
    arch::without_interrupts(|| {
        let scheduler = SCHEDULER.lock();
        let handle = scheduler.current_handle()?;
        scheduler.current()?;
        scheduler.info(handle)
    })
}

pub fn current_handle() -> Option<TaskHandle> {
    arch::without_interrupts(|| SCHEDULER.lock().current_handle())
}

/// Release stacks of terminated tasks back to the heap.
pub fn reap() -> usize {
    arch::without_interrupts(|| {
        SCHEDULER.lock().reap_terminated(|stack| {
            if let Err(err) = HEAP.with(|heap| stack.release(heap)) {
                log::warn!("scheduler: task stack release failed: {}", err);
            }
        })
    })
}

/// Timer hook: charge the tick to whoever is running. Runs in interrupt
/// context.
pub fn tick() {
    SCHEDULER.lock().tick();
}

pub fn task_count() -> usize {
    arch::without_interrupts(|| SCHEDULER.lock().task_count())
}

/// Log every task in ring order.
pub fn dump_tasks() {
    arch::without_interrupts(|| {
        for task in SCHEDULER.lock().tasks() {
            log::info!(
                "task {:>3} {:<16} {:?} ({} ticks)",
                task.id(),
                task.name(),
                task.state(),
                task.ticks()
            );
        }
    });
}

/// Must run with interrupts disabled and with the scheduler lock released.
fn perform(switch: Switch) {
    unsafe { arch::switch_context(switch.save_rsp, switch.resume_rsp) };
}

/// Landing point for a task whose entry function returned.
extern "C" fn task_returned() -> ! {
    if let Some(task) = current() {
        log::debug!("scheduler: task {} '{}' returned", task.id, task.name);
    }
    exit()
}
