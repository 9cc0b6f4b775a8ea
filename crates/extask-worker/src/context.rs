//! What a handler sees of the task it is running.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use extask_core::{
    BpmnErrorRequest, CompleteRequest, ExtendLockRequest, FailureRequest, LockedTask,
    ServiceError, TaskId, TaskService, Variables, WorkerId,
};

use crate::lease::LockExtender;

/// A technical failure to report for a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub message: String,
    pub details: Option<String>,
    /// Retries left after this failure; the engine keeps its count when unset.
    pub retries: Option<u32>,
    /// Delay before the task can be fetched again.
    pub retry_delay: Option<Duration>,
}

impl Failure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            details: None,
            retries: None,
            retry_delay: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = Some(delay);
        self
    }

    pub(crate) fn into_request(self, worker_id: WorkerId) -> FailureRequest {
        FailureRequest {
            worker_id,
            error_message: self.message,
            error_details: self.details,
            retries: self.retries,
            retry_timeout: self.retry_delay.map(|d| d.as_millis() as u64),
        }
    }
}

/// The interface a handler uses to inspect its task and report the outcome.
///
/// Exactly one of [`complete`](Self::complete),
/// [`report_business_error`](Self::report_business_error) and
/// [`report_failure`](Self::report_failure) should be called per task. A task
/// without an outcome stays locked until its lock expires and is then fetched
/// again.
#[async_trait]
pub trait TaskContext: Send + Sync {
    /// The locked task snapshot.
    fn task(&self) -> &LockedTask;

    fn task_id(&self) -> &TaskId {
        &self.task().id
    }

    fn topic(&self) -> &str {
        &self.task().topic_name
    }

    fn retries_remaining(&self) -> Option<u32> {
        self.task().retries
    }

    fn variables(&self) -> &Variables {
        &self.task().variables
    }

    /// Complete the task, setting process and task-local variables.
    async fn complete(
        &self,
        variables: Variables,
        local_variables: Variables,
    ) -> Result<(), ServiceError>;

    /// Throw a BPMN error with the given code.
    async fn report_business_error(&self, code: &str, message: &str) -> Result<(), ServiceError>;

    /// Report a technical failure.
    async fn report_failure(&self, failure: Failure) -> Result<(), ServiceError>;

    /// Extend the lock once, to `duration` from now.
    async fn extend_lock(&self, duration: Duration) -> Result<(), ServiceError>;

    /// Keep the lock alive in the background until stopped or an outcome is
    /// reported.
    fn start_lock_extender(&self);

    fn stop_lock_extender(&self);
}

/// Production [`TaskContext`] backed by a [`TaskService`].
pub struct ExternalTaskContext {
    task: LockedTask,
    service: Arc<dyn TaskService>,
    worker_id: WorkerId,
    extender: LockExtender,
    reported: AtomicBool,
}

impl ExternalTaskContext {
    /// `lock_extension` is the duration each background renewal asks for.
    pub fn new(
        task: LockedTask,
        service: Arc<dyn TaskService>,
        worker_id: WorkerId,
        lock_extension: Duration,
    ) -> Self {
        let extender = LockExtender::new(
            Arc::clone(&service),
            task.id.clone(),
            worker_id.clone(),
            lock_extension,
        );
        Self {
            task,
            service,
            worker_id,
            extender,
            reported: AtomicBool::new(false),
        }
    }

    /// True once the engine accepted an outcome for this task. A rejected
    /// report leaves this false so a failure can still be reported.
    pub fn outcome_reported(&self) -> bool {
        self.reported.load(Ordering::SeqCst)
    }

    pub fn worker_id(&self) -> &WorkerId {
        &self.worker_id
    }

    pub fn lock_extender(&self) -> &LockExtender {
        &self.extender
    }

    fn begin_outcome(&self, outcome: &'static str) {
        if self.outcome_reported() {
            debug!(task_id = %self.task.id, outcome, "Outcome already reported for task");
        }
        self.extender.stop();
    }

    fn finish_outcome(&self, result: Result<(), ServiceError>) -> Result<(), ServiceError> {
        if result.is_ok() {
            self.reported.store(true, Ordering::SeqCst);
        }
        result
    }
}

#[async_trait]
impl TaskContext for ExternalTaskContext {
    fn task(&self) -> &LockedTask {
        &self.task
    }

    async fn complete(
        &self,
        variables: Variables,
        local_variables: Variables,
    ) -> Result<(), ServiceError> {
        self.begin_outcome("complete");
        let request = CompleteRequest {
            worker_id: self.worker_id.clone(),
            variables,
            local_variables,
        };
        let result = self.service.complete(&self.task.id, &request).await;
        self.finish_outcome(result)
    }

    async fn report_business_error(&self, code: &str, message: &str) -> Result<(), ServiceError> {
        self.begin_outcome("bpmn_error");
        let request = BpmnErrorRequest {
            worker_id: self.worker_id.clone(),
            error_code: code.to_string(),
            error_message: message.to_string(),
            variables: None,
        };
        let result = self.service.report_bpmn_error(&self.task.id, &request).await;
        self.finish_outcome(result)
    }

    async fn report_failure(&self, failure: Failure) -> Result<(), ServiceError> {
        self.begin_outcome("failure");
        let request = failure.into_request(self.worker_id.clone());
        let result = self.service.report_failure(&self.task.id, &request).await;
        self.finish_outcome(result)
    }

    async fn extend_lock(&self, duration: Duration) -> Result<(), ServiceError> {
        let request = ExtendLockRequest {
            worker_id: self.worker_id.clone(),
            new_duration: duration.as_millis() as u64,
        };
        self.service.extend_lock(&self.task.id, &request).await
    }

    fn start_lock_extender(&self) {
        self.extender.start();
    }

    fn stop_lock_extender(&self) {
        self.extender.stop();
    }
}
