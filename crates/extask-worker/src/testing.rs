//! Test doubles for handlers and the polling engine.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use extask_core::{
    BpmnErrorRequest, CompleteRequest, ExtendLockRequest, FailureRequest, FetchAndLockRequest,
    LockedTask, ServiceError, TaskId, TaskService, Variables,
};

use crate::context::{Failure, TaskContext};

/// How long an exhausted script makes `fetch_and_lock` wait before answering
/// with an empty batch, standing in for a long poll.
const IDLE_POLL: Duration = Duration::from_millis(20);

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// An outcome reported through a [`StubContext`].
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Completed {
        variables: Variables,
        local_variables: Variables,
    },
    BusinessError {
        code: String,
        message: String,
    },
    Failure(Failure),
}

/// In-memory [`TaskContext`] for unit testing handlers without an engine.
pub struct StubContext {
    task: LockedTask,
    outcomes: Mutex<Vec<Outcome>>,
    lock_extensions: Mutex<Vec<Duration>>,
    extender_running: AtomicBool,
}

impl StubContext {
    /// A context for a task `stub-task` on topic `stub-topic` carrying
    /// `variables`.
    pub fn new(variables: Variables) -> Self {
        Self::for_task(LockedTask::new("stub-task", "stub-topic").with_variables(variables))
    }

    pub fn for_task(task: LockedTask) -> Self {
        Self {
            task,
            outcomes: Mutex::new(Vec::new()),
            lock_extensions: Mutex::new(Vec::new()),
            extender_running: AtomicBool::new(false),
        }
    }

    /// Every outcome reported so far, in order.
    pub fn outcomes(&self) -> Vec<Outcome> {
        guard(&self.outcomes).clone()
    }

    /// Durations passed to `extend_lock`.
    pub fn lock_extensions(&self) -> Vec<Duration> {
        guard(&self.lock_extensions).clone()
    }

    pub fn extender_running(&self) -> bool {
        self.extender_running.load(Ordering::SeqCst)
    }

    fn record(&self, outcome: Outcome) {
        self.extender_running.store(false, Ordering::SeqCst);
        guard(&self.outcomes).push(outcome);
    }
}

#[async_trait]
impl TaskContext for StubContext {
    fn task(&self) -> &LockedTask {
        &self.task
    }

    async fn complete(
        &self,
        variables: Variables,
        local_variables: Variables,
    ) -> Result<(), ServiceError> {
        self.record(Outcome::Completed {
            variables,
            local_variables,
        });
        Ok(())
    }

    async fn report_business_error(&self, code: &str, message: &str) -> Result<(), ServiceError> {
        self.record(Outcome::BusinessError {
            code: code.to_string(),
            message: message.to_string(),
        });
        Ok(())
    }

    async fn report_failure(&self, failure: Failure) -> Result<(), ServiceError> {
        self.record(Outcome::Failure(failure));
        Ok(())
    }

    async fn extend_lock(&self, duration: Duration) -> Result<(), ServiceError> {
        guard(&self.lock_extensions).push(duration);
        Ok(())
    }

    fn start_lock_extender(&self) {
        self.extender_running.store(true, Ordering::SeqCst);
    }

    fn stop_lock_extender(&self) {
        self.extender_running.store(false, Ordering::SeqCst);
    }
}

/// A [`TaskService`] that replays scripted fetch results and records every
/// call.
///
/// Once the script runs out, fetches wait briefly and return an empty batch.
#[derive(Default)]
pub struct ScriptedTaskService {
    script: Mutex<VecDeque<Result<Vec<LockedTask>, ServiceError>>>,
    fetches: Mutex<Vec<(Instant, FetchAndLockRequest)>>,
    completions: Mutex<Vec<(TaskId, CompleteRequest)>>,
    failures: Mutex<Vec<(TaskId, FailureRequest)>>,
    bpmn_errors: Mutex<Vec<(TaskId, BpmnErrorRequest)>>,
    lock_extensions: Mutex<Vec<(TaskId, ExtendLockRequest)>>,
    fail_lock_extensions: AtomicBool,
    fail_failure_reports: AtomicBool,
    fail_completions: AtomicBool,
}

impl ScriptedTaskService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful fetch returning `tasks`.
    pub fn push_batch(&self, tasks: Vec<LockedTask>) {
        guard(&self.script).push_back(Ok(tasks));
    }

    /// Queue a failed fetch.
    pub fn push_fetch_error(&self, error: ServiceError) {
        guard(&self.script).push_back(Err(error));
    }

    /// Refuse every lock extension with `NotFound`.
    pub fn fail_lock_extensions(&self, fail: bool) {
        self.fail_lock_extensions.store(fail, Ordering::SeqCst);
    }

    /// Reject every completion with a 500 (the completion is still recorded).
    pub fn fail_completions(&self, fail: bool) {
        self.fail_completions.store(fail, Ordering::SeqCst);
    }

    /// Refuse every failure report (the report is still recorded).
    pub fn fail_failure_reports(&self, fail: bool) {
        self.fail_failure_reports.store(fail, Ordering::SeqCst);
    }

    pub fn fetch_count(&self) -> usize {
        guard(&self.fetches).len()
    }

    pub fn fetch_requests(&self) -> Vec<FetchAndLockRequest> {
        guard(&self.fetches).iter().map(|(_, r)| r.clone()).collect()
    }

    /// When each fetch started.
    pub fn fetch_times(&self) -> Vec<Instant> {
        guard(&self.fetches).iter().map(|(at, _)| *at).collect()
    }

    pub fn completions(&self) -> Vec<(TaskId, CompleteRequest)> {
        guard(&self.completions).clone()
    }

    pub fn failures(&self) -> Vec<(TaskId, FailureRequest)> {
        guard(&self.failures).clone()
    }

    pub fn bpmn_errors(&self) -> Vec<(TaskId, BpmnErrorRequest)> {
        guard(&self.bpmn_errors).clone()
    }

    pub fn lock_extensions(&self) -> Vec<(TaskId, ExtendLockRequest)> {
        guard(&self.lock_extensions).clone()
    }

    /// Completions, failures and BPMN errors together.
    pub fn outcome_count(&self) -> usize {
        guard(&self.completions).len() + guard(&self.failures).len() + guard(&self.bpmn_errors).len()
    }
}

#[async_trait]
impl TaskService for ScriptedTaskService {
    async fn fetch_and_lock(
        &self,
        request: &FetchAndLockRequest,
    ) -> Result<Vec<LockedTask>, ServiceError> {
        guard(&self.fetches).push((Instant::now(), request.clone()));
        let next = guard(&self.script).pop_front();
        match next {
            Some(result) => result,
            None => {
                tokio::time::sleep(IDLE_POLL).await;
                Ok(Vec::new())
            }
        }
    }

    async fn complete(&self, task_id: &TaskId, request: &CompleteRequest) -> Result<(), ServiceError> {
        guard(&self.completions).push((task_id.clone(), request.clone()));
        if self.fail_completions.load(Ordering::SeqCst) {
            return Err(ServiceError::Rejected {
                status: 500,
                kind: "ProcessEngineException".to_string(),
                message: format!("Cannot deserialize variables of task {task_id}"),
            });
        }
        Ok(())
    }

    async fn report_failure(
        &self,
        task_id: &TaskId,
        request: &FailureRequest,
    ) -> Result<(), ServiceError> {
        guard(&self.failures).push((task_id.clone(), request.clone()));
        if self.fail_failure_reports.load(Ordering::SeqCst) {
            return Err(ServiceError::Transport("connection reset".to_string()));
        }
        Ok(())
    }

    async fn report_bpmn_error(
        &self,
        task_id: &TaskId,
        request: &BpmnErrorRequest,
    ) -> Result<(), ServiceError> {
        guard(&self.bpmn_errors).push((task_id.clone(), request.clone()));
        Ok(())
    }

    async fn extend_lock(
        &self,
        task_id: &TaskId,
        request: &ExtendLockRequest,
    ) -> Result<(), ServiceError> {
        guard(&self.lock_extensions).push((task_id.clone(), request.clone()));
        if self.fail_lock_extensions.load(Ordering::SeqCst) {
            return Err(ServiceError::NotFound(format!("external task {task_id}")));
        }
        Ok(())
    }
}
