//! Per-worker heartbeat records read by the supervisor

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use resident_pool::WorkerId;
use tokio::time::Instant;

/// What the supervisor knows about one worker's recent activity
#[derive(Debug, Clone, Copy)]
pub struct WatchRecord {
    pub requests_served: u64,
    pub first_seen: Instant,
    pub last_heartbeat: Instant,
    pub busy: bool,
}

/// Shared table of [`WatchRecord`]s, written by dispatches and read by
/// the supervisor
#[derive(Debug, Clone, Default)]
pub struct WatchTable {
    records: Arc<Mutex<HashMap<WorkerId, WatchRecord>>>,
}

impl WatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// A request was handed to `id`
    pub fn begin(&self, id: WorkerId) {
        let now = Instant::now();
        let mut records = self.records.lock();
        let record = records.entry(id).or_insert(WatchRecord {
            requests_served: 0,
            first_seen: now,
            last_heartbeat: now,
            busy: false,
        });
        record.busy = true;
        record.last_heartbeat = now;
    }

    /// The worker reported progress
    pub fn heartbeat(&self, id: WorkerId) {
        if let Some(record) = self.records.lock().get_mut(&id) {
            record.last_heartbeat = Instant::now();
        }
    }

    /// The request finished with a response
    pub fn complete(&self, id: WorkerId) {
        if let Some(record) = self.records.lock().get_mut(&id) {
            record.busy = false;
            record.requests_served += 1;
            record.last_heartbeat = Instant::now();
        }
    }

    /// The request ended without a response; the worker is gone
    pub fn forget(&self, id: WorkerId) {
        self.records.lock().remove(&id);
    }

    pub fn get(&self, id: WorkerId) -> Option<WatchRecord> {
        self.records.lock().get(&id).copied()
    }

    /// Busy workers silent for longer than `threshold`
    pub fn stalled(&self, threshold: Duration) -> Vec<WorkerId> {
        let now = Instant::now();
        self.records
            .lock()
            .iter()
            .filter(|(_, r)| r.busy && now.duration_since(r.last_heartbeat) > threshold)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Drop records for workers that no longer exist
    pub fn retain<F: Fn(WorkerId) -> bool>(&self, keep: F) {
        self.records.lock().retain(|id, _| keep(*id));
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_busy_worker_stalls_without_heartbeats() {
        let table = WatchTable::new();
        let id = WorkerId::new(1);
        table.begin(id);

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(table.stalled(Duration::from_secs(3)), vec![id]);

        table.heartbeat(id);
        assert!(table.stalled(Duration::from_secs(3)).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_worker_never_stalls() {
        let table = WatchTable::new();
        let id = WorkerId::new(2);
        table.begin(id);
        table.complete(id);

        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(table.stalled(Duration::from_secs(1)).is_empty());
        assert_eq!(table.get(id).unwrap().requests_served, 1);
    }

    #[tokio::test]
    async fn test_retain_prunes_departed_workers() {
        let table = WatchTable::new();
        table.begin(WorkerId::new(1));
        table.begin(WorkerId::new(2));
        table.retain(|id| id == WorkerId::new(2));
        assert_eq!(table.len(), 1);
        assert!(table.get(WorkerId::new(1)).is_none());
    }
}
