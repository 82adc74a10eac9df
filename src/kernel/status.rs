use core::fmt;
use spin::Mutex;

use crate::arch;

const MAX_COMPONENTS: usize = 8;

/// Kernel initialization status tracking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitStatus {
    NotStarted,
    InProgress,
    Completed,
    Failed(&'static str),
}

/// Kernel component status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComponentStatus {
    pub name: &'static str,
    pub status: InitStatus,
}

impl ComponentStatus {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            status: InitStatus::NotStarted,
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self.status, InitStatus::Completed)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, InitStatus::Failed(_))
    }
}

/// Fixed-capacity table; boot tracking must not depend on the heap.
pub struct StatusTable {
    entries: [Option<ComponentStatus>; MAX_COMPONENTS],
}

impl StatusTable {
    pub const fn new() -> Self {
        Self {
            entries: [None; MAX_COMPONENTS],
        }
    }

    /// Returns `false` if the table is full. Registering a name twice
    /// resets it to `NotStarted`.
    pub fn register(&mut self, name: &'static str) -> bool {
        if let Some(existing) = self.find_mut(name) {
            existing.status = InitStatus::NotStarted;
            return true;
        }
        match self.entries.iter_mut().find(|slot| slot.is_none()) {
            Some(slot) => {
                *slot = Some(ComponentStatus::new(name));
                true
            }
            None => false,
        }
    }

    pub fn update(&mut self, name: &'static str, status: InitStatus) {
        if let Some(component) = self.find_mut(name) {
            component.status = status;
        }
    }

    pub fn get(&self, name: &str) -> Option<ComponentStatus> {
        self.iter().find(|component| component.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = ComponentStatus> + '_ {
        self.entries.iter().flatten().copied()
    }

    pub fn all_ready(&self) -> bool {
        self.iter().next().is_some() && self.iter().all(|component| component.is_complete())
    }

    pub fn clear(&mut self) {
        self.entries = [None; MAX_COMPONENTS];
    }

    fn find_mut(&mut self, name: &str) -> Option<&mut ComponentStatus> {
        self.entries
            .iter_mut()
            .flatten()
            .find(|component| component.name == name)
    }
}

impl Default for StatusTable {
    fn default() -> Self {
        Self::new()
    }
}

static INIT_STATUS: Mutex<StatusTable> = Mutex::new(StatusTable::new());

/// Track kernel component initialization
pub fn register_component(name: &'static str) {
    let registered = arch::without_interrupts(|| INIT_STATUS.lock().register(name));
    if !registered {
        log::warn!("status: no room to track '{}'", name);
    }
}

/// Update component status
pub fn update_component_status(name: &'static str, status: InitStatus) {
    arch::without_interrupts(|| INIT_STATUS.lock().update(name, status));
}

pub fn component_status(name: &str) -> Option<ComponentStatus> {
    arch::without_interrupts(|| INIT_STATUS.lock().get(name))
}

/// Check if all components are initialized
pub fn all_components_ready() -> bool {
    arch::without_interrupts(|| INIT_STATUS.lock().all_ready())
}

/// Log one line per tracked component.
pub fn log_summary() {
    arch::without_interrupts(|| {
        for component in INIT_STATUS.lock().iter() {
            log::info!("  {:<12} {}", component.name, component.status);
        }
    });
}

impl fmt::Display for InitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InitStatus::NotStarted => write!(f, "Not Started"),
            InitStatus::InProgress => write!(f, "In Progress"),
            InitStatus::Completed => write!(f, "Completed"),
            InitStatus::Failed(err) => write!(f, "Failed: {}", err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::format;

    #[test]
    fn test_register_and_update() {
        let mut table = StatusTable::new();
        assert!(!table.all_ready());

        table.register("Memory");
        table.register("Interrupts");
        assert_eq!(table.get("Memory").unwrap().status, InitStatus::NotStarted);

        table.update("Memory", InitStatus::Completed);
        assert!(!table.all_ready());
        table.update("Interrupts", InitStatus::Completed);
        assert!(table.all_ready());

        table.update("Interrupts", InitStatus::Failed("no PIC"));
        assert!(table.get("Interrupts").unwrap().is_failed());
        assert!(!table.all_ready());
    }

    #[test]
    fn test_capacity_and_reregister() {
        let mut table = StatusTable::new();
        let names = ["a", "b", "c", "d", "e", "f", "g", "h"];
        for name in names {
            assert!(table.register(name));
        }
        assert!(!table.register("overflow"));

        table.update("c", InitStatus::Completed);
        assert!(table.register("c"));
        assert_eq!(table.get("c").unwrap().status, InitStatus::NotStarted);
        assert_eq!(table.iter().count(), MAX_COMPONENTS);
    }

    #[test]
    fn test_status_display() {
        assert_eq!(format!("{}", InitStatus::Failed("boom")), "Failed: boom");
        assert_eq!(format!("{}", InitStatus::InProgress), "In Progress");
    }
}
