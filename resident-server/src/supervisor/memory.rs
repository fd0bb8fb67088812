//! Resident memory sampling for worker processes

use resident_pool::WorkerId;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

/// Samples resident memory of worker pids
pub struct MemorySampler {
    system: System,
}

impl MemorySampler {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }

    /// Resident bytes for every worker whose process could be read
    pub fn sample(&mut self, workers: &[(WorkerId, u32)]) -> Vec<(WorkerId, u64)> {
        if workers.is_empty() {
            return Vec::new();
        }

        let pids: Vec<Pid> = workers.iter().map(|(_, pid)| Pid::from_u32(*pid)).collect();
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&pids),
            true,
            ProcessRefreshKind::nothing().with_memory(),
        );

        workers
            .iter()
            .filter_map(|(id, pid)| {
                self.system
                    .process(Pid::from_u32(*pid))
                    .map(|process| (*id, process.memory()))
            })
            .collect()
    }
}

impl Default for MemorySampler {
    fn default() -> Self {
        Self::new()
    }
}
