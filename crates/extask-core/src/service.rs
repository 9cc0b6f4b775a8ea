//! Remote task service interface.

use async_trait::async_trait;

use crate::request::{
    BpmnErrorRequest, CompleteRequest, ExtendLockRequest, FailureRequest, FetchAndLockRequest,
};
use crate::{LockedTask, ServiceError, TaskId};

/// The external task operations a worker needs from the engine.
///
/// Implementations are shared between the fetch loop, every worker loop and
/// every lock extender, so they must be cheap to call concurrently.
#[async_trait]
pub trait TaskService: Send + Sync {
    /// Claim a batch of tasks, waiting up to the request's long polling
    /// timeout when none are available.
    async fn fetch_and_lock(
        &self,
        request: &FetchAndLockRequest,
    ) -> Result<Vec<LockedTask>, ServiceError>;

    async fn complete(&self, task_id: &TaskId, request: &CompleteRequest)
        -> Result<(), ServiceError>;

    async fn report_failure(
        &self,
        task_id: &TaskId,
        request: &FailureRequest,
    ) -> Result<(), ServiceError>;

    async fn report_bpmn_error(
        &self,
        task_id: &TaskId,
        request: &BpmnErrorRequest,
    ) -> Result<(), ServiceError>;

    async fn extend_lock(
        &self,
        task_id: &TaskId,
        request: &ExtendLockRequest,
    ) -> Result<(), ServiceError>;
}
