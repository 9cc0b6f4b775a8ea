//! Locked external task snapshot.

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

use crate::{TaskId, Variables, WorkerId};

/// An external task as returned by fetch-and-lock.
///
/// This is a snapshot taken when the lock was granted. The engine owns the
/// task; the worker only reports an outcome for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockedTask {
    /// Unique task identifier.
    pub id: TaskId,

    /// Topic the task was published on.
    pub topic_name: String,

    /// Worker holding the lock.
    #[serde(default)]
    pub worker_id: Option<WorkerId>,

    #[serde(default)]
    pub activity_id: Option<String>,

    #[serde(default)]
    pub activity_instance_id: Option<String>,

    #[serde(default)]
    pub execution_id: Option<String>,

    #[serde(default)]
    pub process_instance_id: Option<String>,

    #[serde(default)]
    pub process_definition_id: Option<String>,

    #[serde(default)]
    pub process_definition_key: Option<String>,

    #[serde(default)]
    pub tenant_id: Option<String>,

    #[serde(default)]
    pub business_key: Option<String>,

    /// Retries left; `None` until the first failure is reported.
    #[serde(default)]
    pub retries: Option<u32>,

    #[serde(default)]
    pub priority: i64,

    #[serde(default)]
    pub suspended: bool,

    /// When the current lock expires.
    #[serde(default, with = "crate::time::option")]
    pub lock_expiration_time: Option<DateTime<FixedOffset>>,

    /// Message of the last reported failure.
    #[serde(default)]
    pub error_message: Option<String>,

    /// Details of the last reported failure.
    #[serde(default)]
    pub error_details: Option<String>,

    /// Variables requested by the topic subscription.
    #[serde(default)]
    pub variables: Variables,
}

impl LockedTask {
    /// Create a task snapshot with only id and topic set.
    pub fn new(id: impl Into<TaskId>, topic_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            topic_name: topic_name.into(),
            worker_id: None,
            activity_id: None,
            activity_instance_id: None,
            execution_id: None,
            process_instance_id: None,
            process_definition_id: None,
            process_definition_key: None,
            tenant_id: None,
            business_key: None,
            retries: None,
            priority: 0,
            suspended: false,
            lock_expiration_time: None,
            error_message: None,
            error_details: None,
            variables: Variables::new(),
        }
    }

    /// Builder method to set the variables.
    pub fn with_variables(mut self, variables: Variables) -> Self {
        self.variables = variables;
        self
    }

    /// Builder method to set the remaining retries.
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    /// Builder method to set the business key.
    pub fn with_business_key(mut self, key: impl Into<String>) -> Self {
        self.business_key = Some(key.into());
        self
    }

    /// Builder method to set the lock owner.
    pub fn with_worker_id(mut self, worker_id: WorkerId) -> Self {
        self.worker_id = Some(worker_id);
        self
    }
}
