//! Round-robin ring of task control blocks.
//!
//! Tasks live in an arena of generational slots; the ring is a list of slot
//! indices in creation order, starting with the bootstrap task. The scheduler
//! only does bookkeeping: `yield_now` and friends return a [`Switch`] that the
//! executor carries out on the CPU.

use alloc::vec::Vec;

use super::stack::TaskStack;
use super::{SchedulerError, Task, TaskContext, TaskHandle, TaskId, TaskInfo, TaskState};

const BOOTSTRAP_NAME: &str = "kernel";

struct Slot {
    generation: u32,
    task: Option<Task>,
}

/// A decided transfer of control from one task to another.
#[derive(Debug)]
pub struct Switch {
    pub from: TaskId,
    pub to: TaskId,
    /// Where the outgoing task's stack pointer is stored.
    pub save_rsp: *mut u64,
    pub resume_rsp: u64,
}

pub struct Scheduler {
    slots: Vec<Slot>,
    ring: Vec<usize>,
    current: Option<usize>,
    next_id: u64,
}

impl Scheduler {
    pub const fn new() -> Self {
        Self {
            slots: Vec::new(),
            ring: Vec::new(),
            current: None,
            next_id: 0,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.current.is_some()
    }

    /// Adopt the running boot flow as task 0.
    pub fn initialize(&mut self) -> Result<TaskHandle, SchedulerError> {
        if self.is_initialized() {
            return Err(SchedulerError::AlreadyInitialized);
        }
        self.reserve()?;
        let id = self.allocate_id();
        let handle = self.insert(Task::bootstrap(id, BOOTSTRAP_NAME));
        self.current = Some(handle.index);
        log::debug!("scheduler: bootstrap task {} adopted", id);
        Ok(handle)
    }

    /// Make room for one more task without touching the global allocator
    /// later. Callers allocate the task's stack only after this succeeds.
    pub fn reserve(&mut self) -> Result<(), SchedulerError> {
        let slot_free = self.slots.iter().any(|slot| slot.task.is_none());
        if !slot_free && self.slots.try_reserve(1).is_err() {
            return Err(SchedulerError::OutOfMemory);
        }
        self.ring
            .try_reserve(1)
            .map_err(|_| SchedulerError::OutOfMemory)
    }

    /// Add a `Ready` task that starts at `entry` on `stack`. `exit_hook`
    /// runs if `entry` returns.
    ///
    /// Fails with `OutOfMemory` if the task table cannot grow; the stack is
    /// then dropped unreleased, so call [`Scheduler::reserve`] first.
    pub fn create(
        &mut self,
        name: &str,
        entry: extern "C" fn(),
        mut stack: TaskStack,
        exit_hook: extern "C" fn() -> !,
    ) -> Result<TaskHandle, SchedulerError> {
        if !self.is_initialized() {
            return Err(SchedulerError::NotInitialized);
        }

        self.reserve()?;
        let rsp = stack.prepare_entry(entry as usize as u64, exit_hook as usize as u64);
        let id = self.allocate_id();
        let context = TaskContext { rsp, rbp: 0 };
        let handle = self.insert(Task::with_stack(id, name, stack, context));
        log::debug!("scheduler: created task {} '{}'", id, name);
        Ok(handle)
    }

    /// Pick the next runnable task after the current one and make it current.
    /// Returns `None` when the walk comes back to the caller.
    pub fn yield_now(&mut self) -> Option<Switch> {
        let current = self.current?;
        let position = self.ring.iter().position(|&index| index == current)?;
        let len = self.ring.len();

        let next = (1..len)
            .map(|step| self.ring[(position + step) % len])
            .find(|&index| self.task(index).is_some_and(|task| task.state.is_runnable()))?;

        let (from, save_rsp) = {
            let outgoing = self.task_mut(current)?;
            if outgoing.state == TaskState::Running {
                outgoing.state = TaskState::Ready;
            }
            (outgoing.id, &mut outgoing.context.rsp as *mut u64)
        };
        let (to, resume_rsp) = {
            let incoming = self.task_mut(next)?;
            incoming.state = TaskState::Running;
            (incoming.id, incoming.context.rsp)
        };
        self.current = Some(next);

        log::trace!("scheduler: switch {} -> {}", from, to);
        Some(Switch {
            from,
            to,
            save_rsp,
            resume_rsp,
        })
    }

    /// Terminate the current task and move on.
    pub fn exit_current(&mut self) -> Option<Switch> {
        let task = self.current.and_then(|index| self.task_mut(index))?;
        task.state = TaskState::Terminated;
        log::debug!("scheduler: task {} exited", task.id);
        self.yield_now()
    }

    /// Park the current task until [`Scheduler::wake`]. Fails, leaving the
    /// task running, when nothing else could run in the meantime.
    pub fn block_current(&mut self) -> Result<Switch, SchedulerError> {
        let index = self.current.ok_or(SchedulerError::NotInitialized)?;
        self.task_mut(index).ok_or(SchedulerError::NotInitialized)?.state = TaskState::Blocked;

        match self.yield_now() {
            Some(switch) => Ok(switch),
            None => {
                if let Some(task) = self.task_mut(index) {
                    task.state = TaskState::Running;
                }
                Err(SchedulerError::NoRunnableTask)
            }
        }
    }

    /// Make a blocked task runnable again. Other states are left alone.
    pub fn wake(&mut self, handle: TaskHandle) -> Result<(), SchedulerError> {
        let task = self.get_mut(handle).ok_or(SchedulerError::UnknownTask)?;
        if task.state == TaskState::Blocked {
            task.state = TaskState::Ready;
        }
        Ok(())
    }

    /// The task marked `Running`, if any.
    pub fn current(&self) -> Option<&Task> {
        self.current
            .and_then(|index| self.task(index))
            .filter(|task| task.state == TaskState::Running)
    }

    pub fn current_handle(&self) -> Option<TaskHandle> {
        let index = self.current?;
        Some(TaskHandle {
            index,
            generation: self.slots[index].generation,
        })
    }

    pub fn get(&self, handle: TaskHandle) -> Option<&Task> {
        let slot = self.slots.get(handle.index)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.task.as_ref()
    }

    pub fn info(&self, handle: TaskHandle) -> Option<TaskInfo> {
        self.get(handle).map(|task| TaskInfo {
            handle,
            id: task.id,
            name: task.name,
            state: task.state,
            ticks: task.ticks,
        })
    }

    /// Charge one timer tick to the running task.
    pub fn tick(&mut self) {
        if let Some(task) = self.current.and_then(|index| self.task_mut(index)) {
            if task.state == TaskState::Running {
                task.ticks += 1;
            }
        }
    }

    /// Remove terminated tasks from the ring and hand their stacks to
    /// `release`. The current task is never reaped, even if terminated,
    /// since it is still executing on its stack.
    pub fn reap_terminated(&mut self, mut release: impl FnMut(TaskStack)) -> usize {
        let current = self.current;
        let mut reaped = 0;
        let mut position = 0;

        while position < self.ring.len() {
            let index = self.ring[position];
            let terminated = self
                .task(index)
                .is_some_and(|task| task.state == TaskState::Terminated);
            if !terminated || Some(index) == current {
                position += 1;
                continue;
            }

            self.ring.remove(position);
            let slot = &mut self.slots[index];
            slot.generation = slot.generation.wrapping_add(1);
            if let Some(stack) = slot.task.take().and_then(|task| task.stack) {
                release(stack);
            }
            reaped += 1;
        }

        if reaped > 0 {
            log::debug!("scheduler: reaped {} task(s)", reaped);
        }
        reaped
    }

    /// Tasks in ring order.
    pub fn tasks(&self) -> impl Iterator<Item = &Task> + '_ {
        self.ring.iter().filter_map(move |&index| self.task(index))
    }

    pub fn task_count(&self) -> usize {
        self.ring.len()
    }

    fn allocate_id(&mut self) -> TaskId {
        let id = TaskId(self.next_id);
        self.next_id += 1;
        id
    }

    fn insert(&mut self, task: Task) -> TaskHandle {
        let index = match self.slots.iter().position(|slot| slot.task.is_none()) {
            Some(index) => {
                self.slots[index].task = Some(task);
                index
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    task: Some(task),
                });
                self.slots.len() - 1
            }
        };
        self.ring.push(index);
        TaskHandle {
            index,
            generation: self.slots[index].generation,
        }
    }

    fn get_mut(&mut self, handle: TaskHandle) -> Option<&mut Task> {
        let slot = self.slots.get_mut(handle.index)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.task.as_mut()
    }

    fn task(&self, index: usize) -> Option<&Task> {
        self.slots.get(index)?.task.as_ref()
    }

    fn task_mut(&mut self, index: usize) -> Option<&mut Task> {
        self.slots.get_mut(index)?.task.as_mut()
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::KernelHeap;
    use alloc::vec;

    extern "C" fn entry_a() {}
    extern "C" fn entry_b() {}
    extern "C" fn never_returns() -> ! {
        loop {
            core::hint::spin_loop();
        }
    }

    struct Fixture {
        _backing: Vec<u128>,
        heap: KernelHeap,
        scheduler: Scheduler,
    }

    impl Fixture {
        fn new() -> Self {
            let mut backing = vec![0u128; 8 * 1024];
            let heap = unsafe {
                KernelHeap::new(backing.as_mut_ptr() as usize, backing.len() * 16).unwrap()
            };
            let mut scheduler = Scheduler::new();
            scheduler.initialize().unwrap();
            Self {
                _backing: backing,
                heap,
                scheduler,
            }
        }

        fn spawn(&mut self, name: &str, entry: extern "C" fn()) -> TaskHandle {
            let stack = TaskStack::allocate(&mut self.heap, 4096).unwrap();
            self.scheduler.create(name, entry, stack, never_returns).unwrap()
        }

        fn current_name(&self) -> &str {
            self.scheduler.current().map(|task| task.name()).unwrap_or("<none>")
        }

        fn step(&mut self) -> &str {
            self.scheduler.yield_now();
            self.current_name()
        }
    }

    #[test]
    fn test_initialize_bootstrap() {
        let mut scheduler = Scheduler::new();
        assert!(scheduler.current().is_none());
        let handle = scheduler.initialize().unwrap();

        let task = scheduler.current().unwrap();
        assert_eq!(task.id(), TaskId(0));
        assert_eq!(task.name(), "kernel");
        assert_eq!(task.state(), TaskState::Running);
        assert_eq!(scheduler.current_handle(), Some(handle));
        assert_eq!(scheduler.initialize().unwrap_err(), SchedulerError::AlreadyInitialized);
    }

    #[test]
    fn test_create_requires_initialize() {
        let mut backing = vec![0u128; 1024];
        let mut heap =
            unsafe { KernelHeap::new(backing.as_mut_ptr() as usize, backing.len() * 16).unwrap() };
        let stack = TaskStack::allocate(&mut heap, 1024).unwrap();
        let mut scheduler = Scheduler::new();
        assert_eq!(
            scheduler.create("t", entry_a, stack, never_returns).unwrap_err(),
            SchedulerError::NotInitialized
        );
    }

    #[test]
    fn test_create_prepares_entry_frame() {
        let mut fx = Fixture::new();
        let handle = fx.spawn("t", entry_a);
        let task = fx.scheduler.get(handle).unwrap();

        assert_eq!(task.state(), TaskState::Ready);
        assert_eq!(task.id(), TaskId(1));
        assert_eq!(
            task.initial_frame(),
            Some([entry_a as usize as u64, 0x08, 0x202])
        );
        let stack = task.stack().unwrap();
        assert_eq!(task.context().rsp, stack.top() - 104);

        // six callee-saved words and the trampoline return sit below the triple
        let saved = task.context().rsp as *const u64;
        let words = unsafe { core::slice::from_raw_parts(saved, 13) };
        assert_eq!(words[6], crate::arch::task_entry_trampoline());
        assert_eq!(words[7..10], [entry_a as usize as u64, 0x08, 0x202]);
    }

    #[test]
    fn test_reserve_makes_room_before_create() {
        let mut fx = Fixture::new();
        fx.scheduler.reserve().unwrap();
        let slots = fx.scheduler.slots.capacity();
        let ring = fx.scheduler.ring.capacity();
        assert!(slots > fx.scheduler.slots.len());
        assert!(ring > fx.scheduler.ring.len());

        fx.spawn("A", entry_a);
        assert_eq!(fx.scheduler.slots.capacity(), slots);
        assert_eq!(fx.scheduler.ring.capacity(), ring);
        assert_eq!(fx.scheduler.task_count(), 2);
    }

    #[test]
    fn test_round_robin_order() {
        let mut fx = Fixture::new();
        fx.spawn("A", entry_a);
        fx.spawn("B", entry_b);

        assert_eq!(fx.current_name(), "kernel");
        assert_eq!(fx.step(), "A");
        assert_eq!(fx.step(), "B");
        assert_eq!(fx.step(), "kernel");
        assert_eq!(fx.step(), "A");
    }

    #[test]
    fn test_terminated_task_skipped() {
        let mut fx = Fixture::new();
        fx.spawn("A", entry_a);
        fx.spawn("B", entry_b);

        assert_eq!(fx.step(), "A");
        let switch = fx.scheduler.exit_current().unwrap();
        assert_eq!(switch.from, TaskId(1));
        assert_eq!(switch.to, TaskId(2));
        assert_eq!(fx.current_name(), "B");

        assert_eq!(fx.step(), "kernel");
        assert_eq!(fx.step(), "B");
        assert_eq!(fx.step(), "kernel");
    }

    #[test]
    fn test_yield_alone_is_noop() {
        let mut fx = Fixture::new();
        assert!(fx.scheduler.yield_now().is_none());
        assert_eq!(fx.current_name(), "kernel");
    }

    #[test]
    fn test_switch_records_stack_pointers() {
        let mut fx = Fixture::new();
        let a = fx.spawn("A", entry_a);
        let prepared = fx.scheduler.get(a).unwrap().context().rsp;

        let switch = fx.scheduler.yield_now().unwrap();
        assert_eq!(switch.resume_rsp, prepared);

        // the executor's context switch writes through save_rsp
        unsafe { switch.save_rsp.write(0xB007_5000) };
        let back = fx.scheduler.yield_now().unwrap();
        assert_eq!(back.resume_rsp, 0xB007_5000);
    }

    #[test]
    fn test_block_and_wake() {
        let mut fx = Fixture::new();
        let a = fx.spawn("A", entry_a);

        assert_eq!(fx.step(), "A");
        fx.scheduler.block_current().unwrap();
        assert_eq!(fx.scheduler.get(a).unwrap().state(), TaskState::Blocked);
        assert_eq!(fx.current_name(), "kernel");

        // A is skipped while blocked
        assert!(fx.scheduler.yield_now().is_none());

        fx.scheduler.wake(a).unwrap();
        assert_eq!(fx.scheduler.get(a).unwrap().state(), TaskState::Ready);
        assert_eq!(fx.step(), "A");
    }

    #[test]
    fn test_block_alone_fails() {
        let mut fx = Fixture::new();
        assert_eq!(fx.scheduler.block_current().unwrap_err(), SchedulerError::NoRunnableTask);
        assert_eq!(fx.current_name(), "kernel");
    }

    #[test]
    fn test_reap_invalidates_handles() {
        let mut fx = Fixture::new();
        let a = fx.spawn("A", entry_a);
        fx.spawn("B", entry_b);

        fx.step();
        fx.scheduler.exit_current();

        let mut released = Vec::new();
        assert_eq!(fx.scheduler.reap_terminated(|stack| released.push(stack)), 1);
        assert_eq!(released.len(), 1);
        assert_eq!(fx.scheduler.task_count(), 2);
        assert!(fx.scheduler.get(a).is_none());
        assert_eq!(fx.scheduler.wake(a).unwrap_err(), SchedulerError::UnknownTask);

        // the freed slot is reused under a new generation
        let c = fx.spawn("C", entry_a);
        assert_eq!(c.index, a.index);
        assert_ne!(c.generation, a.generation);
        assert_eq!(fx.scheduler.get(c).unwrap().id(), TaskId(3));

        let names: Vec<&str> = fx.scheduler.tasks().map(|task| task.name()).collect();
        assert_eq!(names, ["kernel", "B", "C"]);

        for stack in released {
            stack.release(&mut fx.heap).unwrap();
        }
    }

    #[test]
    fn test_current_terminated_not_reaped() {
        let mut fx = Fixture::new();
        fx.spawn("A", entry_a);
        fx.step();
        // A exits but nothing else is runnable except kernel, which takes over
        fx.scheduler.exit_current().unwrap();
        assert_eq!(fx.current_name(), "kernel");

        let mut fx = Fixture::new();
        assert!(fx.scheduler.exit_current().is_none());
        assert!(fx.scheduler.current().is_none());
        assert_eq!(fx.scheduler.reap_terminated(|_| {}), 0);
    }

    #[test]
    fn test_tick_charges_running_task() {
        let mut fx = Fixture::new();
        let a = fx.spawn("A", entry_a);
        fx.scheduler.tick();
        fx.step();
        fx.scheduler.tick();
        fx.scheduler.tick();

        assert_eq!(fx.scheduler.get(a).unwrap().ticks(), 2);
        let info = fx.scheduler.info(a).unwrap();
        assert_eq!(info.ticks, 2);
        assert_eq!(info.name.as_str(), "A");
    }
}
