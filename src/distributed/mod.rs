//! Multi-worker mode
//!
//! Workers pull page tasks from a [`TaskQueue`] and run the same per-page
//! logic as local mode. This is best-effort task distribution: a worker that
//! disappears mid-task only costs that page a transient failure, which a
//! resumed job retries.
//!
//! Worker liveness is tracked in the [`WorkerRegistry`]; a worker is offline
//! once its last heartbeat is older than the heartbeat timeout.

mod executor;
mod queue;

pub use executor::{run_worker, DistributedExecutor};
pub use queue::{ChannelTaskQueue, TaskQueue, WorkTask};

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Liveness of a worker, derived from its record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerStatus {
    Idle,
    Busy,
    Offline,
}

/// A registered worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerRecord {
    pub id: String,
    pub host: String,
    pub port: u16,
    /// Page tasks the worker runs at once
    pub capacity: usize,
    /// Page tasks currently running
    pub active: usize,
    pub last_heartbeat: Instant,
}

impl WorkerRecord {
    pub fn new(id: impl Into<String>, host: impl Into<String>, port: u16, capacity: usize) -> Self {
        Self {
            id: id.into(),
            host: host.into(),
            port,
            capacity: capacity.max(1),
            active: 0,
            last_heartbeat: Instant::now(),
        }
    }

    /// Status at `now`; offline wins over busy
    pub fn status_at(&self, now: Instant, heartbeat_timeout: Duration) -> WorkerStatus {
        if now.saturating_duration_since(self.last_heartbeat) > heartbeat_timeout {
            WorkerStatus::Offline
        } else if self.active > 0 {
            WorkerStatus::Busy
        } else {
            WorkerStatus::Idle
        }
    }
}

/// Every known worker and its heartbeat
#[derive(Debug)]
pub struct WorkerRegistry {
    heartbeat_timeout: Duration,
    workers: Mutex<HashMap<String, WorkerRecord>>,
}

impl WorkerRegistry {
    pub fn new(heartbeat_timeout: Duration) -> Self {
        Self {
            heartbeat_timeout,
            workers: Mutex::new(HashMap::new()),
        }
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        self.heartbeat_timeout
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, WorkerRecord>> {
        self.workers.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Adds (or replaces) a worker; registering counts as a heartbeat
    pub fn register(&self, mut record: WorkerRecord) {
        record.last_heartbeat = Instant::now();
        info!(
            "Worker {} registered at {}:{} (capacity {})",
            record.id, record.host, record.port, record.capacity
        );
        self.lock().insert(record.id.clone(), record);
    }

    pub fn deregister(&self, id: &str) -> Option<WorkerRecord> {
        let removed = self.lock().remove(id);
        if removed.is_some() {
            info!("Worker {} deregistered", id);
        }
        removed
    }

    /// Records a heartbeat; returns false for unknown workers
    pub fn heartbeat(&self, id: &str) -> bool {
        match self.lock().get_mut(id) {
            Some(record) => {
                record.last_heartbeat = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Notes that a worker picked up a task
    pub fn begin_task(&self, id: &str) {
        if let Some(record) = self.lock().get_mut(id) {
            record.active += 1;
            record.last_heartbeat = Instant::now();
        }
    }

    /// Notes that a worker finished a task
    pub fn finish_task(&self, id: &str) {
        if let Some(record) = self.lock().get_mut(id) {
            record.active = record.active.saturating_sub(1);
            record.last_heartbeat = Instant::now();
        }
    }

    pub fn status(&self, id: &str) -> Option<WorkerStatus> {
        let now = Instant::now();
        self.lock()
            .get(id)
            .map(|r| r.status_at(now, self.heartbeat_timeout))
    }

    /// Every worker with its current status, sorted by id
    pub fn workers(&self) -> Vec<(WorkerRecord, WorkerStatus)> {
        let now = Instant::now();
        let mut workers: Vec<_> = self
            .lock()
            .values()
            .map(|r| (r.clone(), r.status_at(now, self.heartbeat_timeout)))
            .collect();
        workers.sort_by(|a, b| a.0.id.cmp(&b.0.id));
        workers
    }

    /// Number of workers not offline
    pub fn online_count(&self) -> usize {
        self.workers()
            .iter()
            .filter(|(_, status)| *status != WorkerStatus::Offline)
            .count()
    }

    /// Combined capacity of workers not offline
    pub fn online_capacity(&self) -> usize {
        self.workers()
            .iter()
            .filter(|(_, status)| *status != WorkerStatus::Offline)
            .map(|(record, _)| record.capacity)
            .sum()
    }

    /// Drops workers that have been offline for a while; returns their ids
    pub fn prune_offline(&self) -> Vec<String> {
        let now = Instant::now();
        let timeout = self.heartbeat_timeout;
        let mut workers = self.lock();
        let offline: Vec<String> = workers
            .values()
            .filter(|r| r.status_at(now, timeout) == WorkerStatus::Offline)
            .map(|r| r.id.clone())
            .collect();
        for id in &offline {
            workers.remove(id);
            debug!("Pruned offline worker {}", id);
        }
        offline
    }
}
