//! HTTP client implementing [`TaskQueue`] against a [`QueueServer`](super::QueueServer).

use super::protocol::{self, CapabilitiesDto, ErrorResponse, ResultDto, TaskDto};
use crate::capability::WorkerCapabilities;
use crate::config::QueueConfig;
use crate::error::{RelayError, RelayResult};
use crate::queue::TaskQueue;
use crate::task::{Task, TaskId, TaskRequest, TaskResult};
use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

/// Queue proxy talking to a remote queue server.
///
/// Blocking waits poll the server every [`QueueConfig::poll_interval`];
/// a `204` answer just means "nothing yet".
#[derive(Debug, Clone)]
pub struct RemoteQueue {
    inner: reqwest::Client,
    base_url: String,
    config: QueueConfig,
}

impl RemoteQueue {
    /// Create a client for the server at `base_url`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_config(base_url, QueueConfig::default())
    }

    /// Create a client with a custom poll interval.
    pub fn with_config(base_url: impl Into<String>, config: QueueConfig) -> Self {
        Self {
            inner: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            config,
        }
    }

    /// Server address, without trailing slash
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send(&self, request: RequestBuilder, url: &str) -> RelayResult<Response> {
        debug!(url = %url, "Queue request");
        request
            .send()
            .await
            .map_err(|e| RelayError::transport_source(format!("Request to {} failed", url), e))
    }

    async fn decode<T: DeserializeOwned>(response: Response, url: &str) -> RelayResult<T> {
        response
            .json()
            .await
            .map_err(|e| RelayError::transport_source(format!("Invalid response from {}", url), e))
    }

    /// Map a non-success response to an error.
    ///
    /// Conflicts carrying a known kind become the matching queue error
    /// for `task_id`; anything else is a transport failure.
    async fn failure(response: Response, url: &str, task_id: Option<TaskId>) -> RelayError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if status == StatusCode::CONFLICT {
            if let (Ok(err), Some(task_id)) = (serde_json::from_str::<ErrorResponse>(&body), task_id)
            {
                match err.error.as_str() {
                    "duplicate_task" => return RelayError::DuplicateTask { task_id },
                    "duplicate_result" => return RelayError::DuplicateResult { task_id },
                    "unknown_task" => return RelayError::UnknownTask { task_id },
                    _ => {}
                }
            }
        }

        RelayError::transport(
            format!("Unexpected status {} from {}: {}", status, url, body),
            Some(status.as_u16()),
        )
    }
}

#[async_trait]
impl TaskQueue for RemoteQueue {
    async fn is_empty(&self) -> RelayResult<bool> {
        let url = self.url(protocol::IS_EMPTY);
        let response = self.send(self.inner.get(&url), &url).await?;
        match response.status() {
            StatusCode::OK => Self::decode(response, &url).await,
            _ => Err(Self::failure(response, &url, None).await),
        }
    }

    async fn try_claim(&self, capabilities: &WorkerCapabilities) -> RelayResult<Option<Task>> {
        let url = self.url(protocol::WAIT_FOR_TASK);
        let body = CapabilitiesDto::from(capabilities);
        let response = self.send(self.inner.post(&url).json(&body), &url).await?;
        match response.status() {
            StatusCode::OK => {
                let task: TaskDto = Self::decode(response, &url).await?;
                Ok(Some(task.into_task()))
            }
            StatusCode::NO_CONTENT => Ok(None),
            _ => Err(Self::failure(response, &url, None).await),
        }
    }

    async fn enqueue(&self, request: TaskRequest) -> RelayResult<TaskId> {
        let url = self.url(protocol::ENQUEUE);
        let body = TaskDto::from(request);
        let task_id = body.id;
        let response = self.send(self.inner.post(&url).json(&body), &url).await?;
        match response.status() {
            StatusCode::OK => Ok(task_id),
            _ => Err(Self::failure(response, &url, Some(task_id)).await),
        }
    }

    async fn submit_result(&self, result: TaskResult) -> RelayResult<()> {
        let url = self.url(protocol::SUBMIT_RESULT);
        let task_id = result.task_id;
        let body = ResultDto::from(result);
        let response = self.send(self.inner.post(&url).json(&body), &url).await?;
        match response.status() {
            StatusCode::OK => Ok(()),
            _ => Err(Self::failure(response, &url, Some(task_id)).await),
        }
    }

    async fn try_get_result(&self, task_id: TaskId) -> RelayResult<Option<TaskResult>> {
        let url = self.url(&format!("{}/{}", protocol::GET_RESULT, task_id));
        let response = self.send(self.inner.get(&url), &url).await?;
        match response.status() {
            StatusCode::OK => {
                let result: ResultDto = Self::decode(response, &url).await?;
                Ok(Some(result.into()))
            }
            StatusCode::NO_CONTENT => Ok(None),
            _ => Err(Self::failure(response, &url, Some(task_id)).await),
        }
    }

    fn poll_interval(&self) -> Duration {
        self.config.poll_interval()
    }
}
