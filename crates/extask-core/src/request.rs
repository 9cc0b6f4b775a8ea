//! Request payloads for the external task endpoints.
//!
//! Field names follow the engine's REST API. Durations are milliseconds on the
//! wire; optional fields are left out when unset.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Variables, WorkerId};

/// Claim up to `max_tasks` tasks across the given topics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchAndLockRequest {
    pub worker_id: WorkerId,
    pub max_tasks: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_priority: Option<bool>,
    /// Long polling timeout in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub async_response_timeout: Option<u64>,
    pub topics: Vec<TopicSubscription>,
}

/// One topic of a fetch-and-lock request with its lock duration and filters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicSubscription {
    pub topic_name: String,

    /// Lock duration in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock_duration: Option<u64>,

    /// Variables to fetch; all variables when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variables: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_variables: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub business_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_definition_id: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub process_definition_id_in: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_definition_key: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub process_definition_key_in: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub without_tenant_id: Option<bool>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tenant_id_in: Vec<String>,

    /// Only tasks whose process has these variable values.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_variables: Option<Variables>,

    /// Let the engine deserialize serializable values to JSON.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deserialize_values: Option<bool>,
}

impl TopicSubscription {
    pub fn new(topic_name: impl Into<String>) -> Self {
        Self {
            topic_name: topic_name.into(),
            ..Default::default()
        }
    }

    pub fn with_lock_duration(mut self, duration: Duration) -> Self {
        self.lock_duration = Some(duration.as_millis() as u64);
        self
    }

    /// Restrict the fetched variables to these names.
    pub fn with_variables<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.variables = Some(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_local_variables(mut self, local: bool) -> Self {
        self.local_variables = Some(local);
        self
    }

    pub fn with_business_key(mut self, key: impl Into<String>) -> Self {
        self.business_key = Some(key.into());
        self
    }

    pub fn with_process_definition_key(mut self, key: impl Into<String>) -> Self {
        self.process_definition_key = Some(key.into());
        self
    }

    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id_in.push(tenant_id.into());
        self
    }

    pub fn with_process_variables(mut self, variables: Variables) -> Self {
        self.process_variables = Some(variables);
        self
    }

    pub fn with_deserialize_values(mut self, deserialize: bool) -> Self {
        self.deserialize_values = Some(deserialize);
        self
    }

    /// Lock duration as a [`Duration`], if set.
    pub fn lock_duration(&self) -> Option<Duration> {
        self.lock_duration.map(Duration::from_millis)
    }
}

/// Complete a task, optionally updating process and local variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteRequest {
    pub worker_id: WorkerId,
    pub variables: Variables,
    pub local_variables: Variables,
}

/// Report a technical failure.
///
/// With `retries` unset the engine keeps its current retry count; `Some(0)`
/// raises an incident.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureRequest {
    pub worker_id: WorkerId,
    pub error_message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_details: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,
    /// Milliseconds before the task can be fetched again.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_timeout: Option<u64>,
}

/// Report a business error, routed to a BPMN error boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BpmnErrorRequest {
    pub worker_id: WorkerId,
    pub error_code: String,
    pub error_message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variables: Option<Variables>,
}

/// Set a new lock duration counted from now.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtendLockRequest {
    pub worker_id: WorkerId,
    /// Milliseconds.
    pub new_duration: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fetch_request_omits_unset_fields() {
        let request = FetchAndLockRequest {
            worker_id: WorkerId::new("w1"),
            max_tasks: 5,
            use_priority: None,
            async_response_timeout: Some(20_000),
            topics: vec![TopicSubscription::new("mail")
                .with_lock_duration(Duration::from_secs(10))
                .with_variables(["to", "subject"])],
        };

        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({
                "workerId": "w1",
                "maxTasks": 5,
                "asyncResponseTimeout": 20000,
                "topics": [{
                    "topicName": "mail",
                    "lockDuration": 10000,
                    "variables": ["to", "subject"]
                }]
            })
        );
    }

    #[test]
    fn test_failure_without_retries_leaves_them_out() {
        let request = FailureRequest {
            worker_id: WorkerId::new("w1"),
            error_message: "boom".to_string(),
            error_details: None,
            retries: None,
            retry_timeout: None,
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({"workerId": "w1", "errorMessage": "boom"})
        );
    }

    #[test]
    fn test_failure_with_zero_retries_is_sent() {
        let request = FailureRequest {
            worker_id: WorkerId::new("w1"),
            error_message: "boom".to_string(),
            error_details: Some("trace".to_string()),
            retries: Some(0),
            retry_timeout: Some(1500),
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["retries"], json!(0));
        assert_eq!(value["retryTimeout"], json!(1500));
        assert_eq!(value["errorDetails"], json!("trace"));
    }
}
