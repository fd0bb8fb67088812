//! Resident memory of the current process

use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

/// Reads the worker's own resident set size
pub struct RssReader {
    system: System,
    pid: Option<Pid>,
}

impl RssReader {
    pub fn new() -> Self {
        Self {
            system: System::new(),
            pid: sysinfo::get_current_pid().ok(),
        }
    }

    /// Resident bytes, or `None` where the platform does not expose them
    pub fn current(&mut self) -> Option<u64> {
        let pid = self.pid?;
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::nothing().with_memory(),
        );
        self.system
            .process(pid)
            .map(|process| process.memory())
            .filter(|bytes| *bytes > 0)
    }
}

impl Default for RssReader {
    fn default() -> Self {
        Self::new()
    }
}
