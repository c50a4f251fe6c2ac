//! HTTP front for a [`LocalQueue`].

use super::protocol::{self, CapabilitiesDto, ErrorResponse, ResultDto, TaskDto};
use crate::error::{RelayError, RelayResult};
use crate::queue::{LocalQueue, TaskQueue};
use crate::task::TaskId;
use axum::{
    Json, Router,
    extract::{Path, State},
    http::{StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use std::sync::Arc;
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Serves one [`LocalQueue`] over HTTP.
///
/// Every request goes through the wrapped queue, so remote and in-process
/// claimers share the same critical section.
#[derive(Debug, Clone)]
pub struct QueueServer {
    queue: Arc<LocalQueue>,
}

impl QueueServer {
    /// Wrap a queue
    pub fn new(queue: Arc<LocalQueue>) -> Self {
        Self { queue }
    }

    /// The served queue
    pub fn queue(&self) -> Arc<LocalQueue> {
        Arc::clone(&self.queue)
    }

    /// Create the HTTP router.
    pub fn router(&self) -> Router {
        Router::new()
            .route(protocol::IS_EMPTY, get(is_empty).fallback(not_found))
            .route(protocol::WAIT_FOR_TASK, post(wait_for_task).fallback(not_found))
            .route(protocol::ENQUEUE, post(enqueue).fallback(not_found))
            .route(protocol::SUBMIT_RESULT, post(submit_result).fallback(not_found))
            .route(
                &format!("{}/:task_id", protocol::GET_RESULT),
                get(get_result).fallback(not_found),
            )
            .fallback(not_found)
            .with_state(Arc::clone(&self.queue))
    }

    /// Serve on `listener` until `cancel` fires.
    pub async fn serve(&self, listener: TcpListener, cancel: CancellationToken) -> RelayResult<()> {
        let addr = listener.local_addr()?;
        info!(addr = %addr, "Queue server listening");

        axum::serve(listener, self.router())
            .with_graceful_shutdown(cancel.cancelled_owned())
            .await?;

        info!(addr = %addr, "Queue server stopped");
        Ok(())
    }

    /// Bind `addr` and serve until `cancel` fires.
    pub async fn bind(
        &self,
        addr: impl ToSocketAddrs,
        cancel: CancellationToken,
    ) -> RelayResult<()> {
        let listener = TcpListener::bind(addr).await?;
        self.serve(listener, cancel).await
    }
}

fn error_response(err: RelayError) -> Response {
    let status = match &err {
        RelayError::DuplicateTask { .. }
        | RelayError::DuplicateResult { .. }
        | RelayError::UnknownTask { .. } => {
            warn!(error = %err, "Rejected request");
            StatusCode::CONFLICT
        }
        _ => {
            error!(error = %err, "Queue operation failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, Json(ErrorResponse::from(&err))).into_response()
}

async fn is_empty(State(queue): State<Arc<LocalQueue>>) -> Response {
    match queue.is_empty().await {
        Ok(empty) => Json(empty).into_response(),
        Err(e) => error_response(e),
    }
}

async fn wait_for_task(
    State(queue): State<Arc<LocalQueue>>,
    Json(capabilities): Json<CapabilitiesDto>,
) -> Response {
    match queue.try_claim(&capabilities.into()).await {
        Ok(Some(task)) => Json(TaskDto::from(&task)).into_response(),
        Ok(None) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(e),
    }
}

async fn enqueue(State(queue): State<Arc<LocalQueue>>, Json(task): Json<TaskDto>) -> Response {
    match queue.enqueue(task.into_request()).await {
        Ok(task_id) => {
            debug!(task_id = %task_id, "Remote enqueue");
            StatusCode::OK.into_response()
        }
        Err(e) => error_response(e),
    }
}

async fn submit_result(
    State(queue): State<Arc<LocalQueue>>,
    Json(result): Json<ResultDto>,
) -> Response {
    match queue.submit_result(result.into()).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => error_response(e),
    }
}

async fn get_result(
    State(queue): State<Arc<LocalQueue>>,
    Path(task_id): Path<String>,
) -> Response {
    let Ok(task_id) = task_id.parse::<TaskId>() else {
        return (
            StatusCode::BAD_REQUEST,
            format!("Invalid task id: {}", task_id),
        )
            .into_response();
    };

    match queue.try_get_result(task_id).await {
        Ok(Some(result)) => Json(ResultDto::from(result)).into_response(),
        Ok(None) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(e),
    }
}

async fn not_found(uri: Uri) -> Response {
    (StatusCode::NOT_FOUND, format!("Not Found: {}", uri.path())).into_response()
}
