//! HTTP implementation of the external task service.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use extask_core::{
    BpmnErrorRequest, CompleteRequest, ExtendLockRequest, FailureRequest, FetchAndLockRequest,
    LockedTask, ServiceError, TaskId, TaskService,
};

use crate::error::{classify_response, classify_transport};

/// Default engine REST root.
pub const DEFAULT_ENDPOINT_URL: &str = "http://localhost:8080/engine-rest";

/// Default request timeout. Must stay above the long polling timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Connection settings for [`HttpTaskService`].
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub endpoint_url: String,
    pub user_agent: String,
    pub timeout: Duration,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            endpoint_url: DEFAULT_ENDPOINT_URL.to_string(),
            user_agent: format!("extask/{}", env!("CARGO_PKG_VERSION")),
            timeout: DEFAULT_TIMEOUT,
            username: None,
            password: None,
        }
    }
}

impl ClientOptions {
    pub fn with_endpoint(mut self, url: impl Into<String>) -> Self {
        self.endpoint_url = url.into();
        self
    }

    /// Use HTTP basic auth.
    pub fn with_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Basic auth user. Without a password an empty one is sent.
    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }
}

/// Talks to the engine's `/external-task` REST resource.
#[derive(Clone)]
pub struct HttpTaskService {
    inner: reqwest::Client,
    base_url: String,
    username: Option<String>,
    password: Option<String>,
}

impl HttpTaskService {
    /// Create a new client.
    pub fn new(options: ClientOptions) -> Result<Self, ServiceError> {
        let inner = reqwest::Client::builder()
            .user_agent(options.user_agent)
            .timeout(options.timeout)
            .build()
            .map_err(|e| ServiceError::Transport(e.to_string()))?;

        Ok(Self {
            inner,
            base_url: options.endpoint_url.trim_end_matches('/').to_string(),
            username: options.username,
            password: options.password,
        })
    }

    /// Engine REST root this client talks to.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<reqwest::Response, ServiceError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, "POST request");

        let mut request = self.inner.post(&url).json(body);
        if let Some(user) = &self.username {
            request = request.basic_auth(user, self.password.as_ref());
        }

        let response = request.send().await.map_err(classify_transport)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let text = response.text().await.map_err(|e| {
            ServiceError::Transport(format!("failed to read {status} response body: {e}"))
        })?;
        Err(classify_response(status, path, &text))
    }

    async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, ServiceError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self.post(path, body).await?;
        response
            .json()
            .await
            .map_err(|e| ServiceError::Protocol(e.to_string()))
    }

    fn task_path(task_id: &TaskId, action: &str) -> String {
        format!("/external-task/{}/{}", task_id, action)
    }
}

#[async_trait]
impl TaskService for HttpTaskService {
    async fn fetch_and_lock(
        &self,
        request: &FetchAndLockRequest,
    ) -> Result<Vec<LockedTask>, ServiceError> {
        self.post_json("/external-task/fetchAndLock", request).await
    }

    async fn complete(
        &self,
        task_id: &TaskId,
        request: &CompleteRequest,
    ) -> Result<(), ServiceError> {
        self.post(&Self::task_path(task_id, "complete"), request)
            .await
            .map(|_| ())
    }

    async fn report_failure(
        &self,
        task_id: &TaskId,
        request: &FailureRequest,
    ) -> Result<(), ServiceError> {
        self.post(&Self::task_path(task_id, "failure"), request)
            .await
            .map(|_| ())
    }

    async fn report_bpmn_error(
        &self,
        task_id: &TaskId,
        request: &BpmnErrorRequest,
    ) -> Result<(), ServiceError> {
        self.post(&Self::task_path(task_id, "bpmnError"), request)
            .await
            .map(|_| ())
    }

    async fn extend_lock(
        &self,
        task_id: &TaskId,
        request: &ExtendLockRequest,
    ) -> Result<(), ServiceError> {
        self.post(&Self::task_path(task_id, "extendLock"), request)
            .await
            .map(|_| ())
    }
}
