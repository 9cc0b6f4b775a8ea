//! Lock renewal for long running handlers.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use extask_core::{ExtendLockRequest, TaskId, TaskService, WorkerId};

/// Time between renewals for a given extension: nine tenths of it, so each
/// renewal lands before the previous extension runs out.
pub fn renewal_period(extension: Duration) -> Duration {
    let period = extension * 9 / 10;
    if period.is_zero() {
        Duration::from_millis(1)
    } else {
        period
    }
}

/// Periodically extends the lock of one task until stopped.
///
/// Renewal is best effort: when an extension is refused the loop logs and
/// exits, and the handler finds out when it reports its outcome.
pub struct LockExtender {
    service: Arc<dyn TaskService>,
    task_id: TaskId,
    worker_id: WorkerId,
    extension: Duration,
    running: Mutex<Option<CancellationToken>>,
}

impl LockExtender {
    pub fn new(
        service: Arc<dyn TaskService>,
        task_id: TaskId,
        worker_id: WorkerId,
        extension: Duration,
    ) -> Self {
        Self {
            service,
            task_id,
            worker_id,
            extension,
            running: Mutex::new(None),
        }
    }

    /// Extension requested on every renewal.
    pub fn extension(&self) -> Duration {
        self.extension
    }

    /// Start renewing. Does nothing if already running.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        if running.as_ref().is_some_and(|token| !token.is_cancelled()) {
            return;
        }

        let token = CancellationToken::new();
        *running = Some(token.clone());

        let service = Arc::clone(&self.service);
        let task_id = self.task_id.clone();
        let request = ExtendLockRequest {
            worker_id: self.worker_id.clone(),
            new_duration: self.extension.as_millis() as u64,
        };
        let period = renewal_period(self.extension);

        tokio::spawn(async move {
            run_renewals(service, task_id, request, period, token).await;
        });
    }

    /// Stop renewing.
    ///
    /// Returns true if this call sent the stop signal. Stopping an extender
    /// that was never started, was already stopped or gave up on its own
    /// returns false.
    pub fn stop(&self) -> bool {
        let token = self
            .running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        match token {
            Some(token) if !token.is_cancelled() => {
                token.cancel();
                true
            }
            _ => false,
        }
    }

    /// True between `start` and `stop`, unless renewal already gave up.
    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|token| !token.is_cancelled())
    }
}

impl Drop for LockExtender {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_renewals(
    service: Arc<dyn TaskService>,
    task_id: TaskId,
    request: ExtendLockRequest,
    period: Duration,
    token: CancellationToken,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        match service.extend_lock(&task_id, &request).await {
            Ok(()) => {
                debug!(task_id = %task_id, new_duration_ms = request.new_duration, "Extended lock");
            }
            Err(e) => {
                warn!(task_id = %task_id, error = %e, "Failed to extend lock, giving up renewal");
                token.cancel();
                break;
            }
        }
    }
}
