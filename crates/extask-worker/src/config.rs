//! Worker configuration.

use std::time::Duration;

use extask_core::WorkerId;

/// Settings of one polling engine.
///
/// Built once and handed to [`crate::Worker::new`]; it is not changed
/// afterwards.
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    /// Identity used for every lock and outcome report.
    pub worker_id: WorkerId,

    /// Lock duration for topics that do not set their own.
    pub lock_duration: Duration,

    /// Maximum tasks claimed per fetch.
    pub max_tasks: u32,

    /// Maximum handlers running concurrently per subscription.
    pub pool_size: usize,

    /// Fetch by priority; engine default when unset.
    pub use_priority: Option<bool>,

    /// Long polling timeout of each fetch.
    pub long_polling_timeout: Duration,

    /// One step of the linear fetch backoff.
    pub backoff_unit: Duration,

    /// Start a lock extender for every task before its handler runs.
    pub auto_extend_lock: bool,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            worker_id: WorkerId::generate(),
            lock_duration: Duration::from_secs(60),
            max_tasks: 10,
            pool_size: 4,
            use_priority: None,
            long_polling_timeout: Duration::from_secs(20),
            backoff_unit: Duration::from_secs(1),
            auto_extend_lock: false,
        }
    }
}

impl WorkerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_worker_id(mut self, worker_id: impl Into<WorkerId>) -> Self {
        self.worker_id = worker_id.into();
        self
    }

    pub fn with_lock_duration(mut self, duration: Duration) -> Self {
        self.lock_duration = duration;
        self
    }

    pub fn with_max_tasks(mut self, max_tasks: u32) -> Self {
        self.max_tasks = max_tasks;
        self
    }

    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    pub fn with_use_priority(mut self, use_priority: bool) -> Self {
        self.use_priority = Some(use_priority);
        self
    }

    pub fn with_long_polling_timeout(mut self, timeout: Duration) -> Self {
        self.long_polling_timeout = timeout;
        self
    }

    pub fn with_backoff_unit(mut self, unit: Duration) -> Self {
        self.backoff_unit = unit;
        self
    }

    pub fn with_auto_extend_lock(mut self, enabled: bool) -> Self {
        self.auto_extend_lock = enabled;
        self
    }

    /// Pool size, never below one.
    pub fn effective_pool_size(&self) -> usize {
        self.pool_size.max(1)
    }
}
