//! Task Scheduling System
//!
//! Cooperative round-robin scheduling over a ring of task control blocks.
//!
//! # Task Lifecycle
//! 1. The boot flow becomes task 0 (`kernel`) via `Scheduler::initialize`
//! 2. `Scheduler::create` gives a new task its own stack, state `Ready`
//! 3. `yield_now` hands the CPU to the next runnable task in ring order
//! 4. `exit_current` marks the caller `Terminated`; `reap_terminated` frees it
//!
//! `Blocked` tasks are skipped until someone calls `wake` on their handle.

use core::fmt;

pub mod scheduler;
pub mod stack;

pub use scheduler::{Scheduler, Switch};
pub use stack::TaskStack;

use crate::config::TASK_NAME_MAX;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskState {
    Running,
    Ready,
    Blocked,
    Terminated,
}

impl TaskState {
    /// Eligible to be picked by the round-robin walk.
    pub fn is_runnable(self) -> bool {
        matches!(self, TaskState::Ready | TaskState::Running)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable reference to a task slot. A handle goes stale once its task is
/// reaped; the slot's generation no longer matches.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TaskHandle {
    pub(crate) index: usize,
    pub(crate) generation: u32,
}

/// Inline task name, at most `TASK_NAME_MAX` bytes.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct TaskName {
    bytes: [u8; TASK_NAME_MAX + 1],
    len: u8,
}

impl TaskName {
    /// Longer names are truncated at a character boundary.
    pub fn new(name: &str) -> Self {
        let mut len = name.len().min(TASK_NAME_MAX);
        while !name.is_char_boundary(len) {
            len -= 1;
        }
        let mut bytes = [0u8; TASK_NAME_MAX + 1];
        bytes[..len].copy_from_slice(&name.as_bytes()[..len]);
        Self {
            bytes,
            len: len as u8,
        }
    }

    pub fn as_str(&self) -> &str {
        core::str::from_utf8(&self.bytes[..self.len as usize]).unwrap_or_default()
    }
}

impl fmt::Debug for TaskName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.as_str(), f)
    }
}

impl fmt::Display for TaskName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resumption data. `rsp` is written by the context switch when the task
/// gives up the CPU.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TaskContext {
    pub rsp: u64,
    pub rbp: u64,
}

/// Task control block.
pub struct Task {
    id: TaskId,
    name: TaskName,
    state: TaskState,
    /// `None` for the bootstrap task, which runs on the boot stack.
    stack: Option<TaskStack>,
    context: TaskContext,
    ticks: u64,
}

impl Task {
    pub(crate) fn bootstrap(id: TaskId, name: &str) -> Self {
        Self {
            id,
            name: TaskName::new(name),
            state: TaskState::Running,
            stack: None,
            context: TaskContext::default(),
            ticks: 0,
        }
    }

    pub(crate) fn with_stack(id: TaskId, name: &str, stack: TaskStack, context: TaskContext) -> Self {
        Self {
            id,
            name: TaskName::new(name),
            state: TaskState::Ready,
            stack: Some(stack),
            context,
            ticks: 0,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn context(&self) -> TaskContext {
        self.context
    }

    /// Timer ticks spent as the running task.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn stack(&self) -> Option<&TaskStack> {
        self.stack.as_ref()
    }

    /// Words a first context restore consumes: `(rip, cs, rflags)`.
    /// Only meaningful before the task has run.
    ///
    /// These are the first three words of the `iretq` frame near the stack
    /// top, not the words at the saved `rsp`: the switch first pops the
    /// callee-saved block and returns into the entry trampoline, and only
    /// then does `iretq` consume this triple.
    pub fn initial_frame(&self) -> Option<[u64; 3]> {
        self.stack.as_ref().map(|stack| {
            let frame = stack.entry_frame();
            [frame[0], frame[1], frame[2]]
        })
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state)
            .field("ticks", &self.ticks)
            .finish()
    }
}

/// Copyable view of a task, handed out past the scheduler lock.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TaskInfo {
    pub handle: TaskHandle,
    pub id: TaskId,
    pub name: TaskName,
    pub state: TaskState,
    pub ticks: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerError {
    NotInitialized,
    AlreadyInitialized,
    OutOfMemory,
    /// Blocking would leave nothing to run.
    NoRunnableTask,
    /// Handle refers to a reaped task.
    UnknownTask,
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulerError::NotInitialized => write!(f, "scheduler not initialized"),
            SchedulerError::AlreadyInitialized => write!(f, "scheduler already initialized"),
            SchedulerError::OutOfMemory => write!(f, "out of memory for task stack"),
            SchedulerError::NoRunnableTask => write!(f, "no other runnable task"),
            SchedulerError::UnknownTask => write!(f, "unknown task"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_name_truncation() {
        let name = TaskName::new("a-very-long-task-name-that-keeps-going");
        assert_eq!(name.as_str().len(), TASK_NAME_MAX);
        assert_eq!(name.as_str(), "a-very-long-task-name-that-keep");

        // 'é' is two bytes; cutting through it backs off to the boundary
        let accented = TaskName::new("ééééééééééééééééé");
        assert_eq!(accented.as_str().len(), 30);
    }

    #[test]
    fn test_bootstrap_task() {
        let task = Task::bootstrap(TaskId(0), "kernel");
        assert_eq!(task.name(), "kernel");
        assert_eq!(task.state(), TaskState::Running);
        assert!(task.stack().is_none());
        assert!(task.initial_frame().is_none());
    }

    #[test]
    fn test_runnable_states() {
        assert!(TaskState::Ready.is_runnable());
        assert!(TaskState::Running.is_runnable());
        assert!(!TaskState::Blocked.is_runnable());
        assert!(!TaskState::Terminated.is_runnable());
    }
}
