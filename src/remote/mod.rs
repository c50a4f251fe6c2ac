//! Remote queue access over HTTP.
//!
//! [`QueueServer`] exposes one [`LocalQueue`](crate::queue::LocalQueue) as a
//! small JSON API; [`RemoteQueue`] implements [`TaskQueue`](crate::queue::TaskQueue)
//! on top of it, so workers and producers on other hosts behave exactly like
//! local ones.
//!
//! | Method & path                  | Body             | Success           | No data |
//! |--------------------------------|------------------|-------------------|---------|
//! | `GET /queue/isEmpty`           |                  | `200` bool        |         |
//! | `POST /queue/waitForTask`      | capabilities     | `200` task        | `204`   |
//! | `POST /queue/enqueue`          | task             | `200`             |         |
//! | `POST /queue/submitResult`     | result           | `200`             |         |
//! | `GET /queue/getResult/{id}`    |                  | `200` result      | `204`   |
//!
//! Duplicate tasks and results are answered with `409` and an
//! [`ErrorResponse`](protocol::ErrorResponse); unknown routes with `404` and a
//! plain-text `Not Found: {path}` body.

pub mod client;
pub mod protocol;
pub mod server;

pub use client::RemoteQueue;
pub use server::QueueServer;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{Capability, WorkerCapabilities, WorkerInfo};
    use crate::config::QueueConfig;
    use crate::core::{AddRunner, Node};
    use crate::error::RelayError;
    use crate::queue::{LocalQueue, QueueFactory, TaskQueue, TaskQueueExt};
    use crate::task::{TaskRequest, TaskResult};
    use crate::trace::TraceMetadata;
    use crate::utils::ManualClock;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;
    use tokio_test::{assert_err, assert_ok};
    use tokio_util::sync::CancellationToken;
    use uuid::Uuid;

    struct TestServer {
        base_url: String,
        queue: Arc<LocalQueue>,
        cancel: CancellationToken,
        handle: JoinHandle<crate::error::RelayResult<()>>,
    }

    impl TestServer {
        async fn start(queue: LocalQueue) -> Self {
            let queue = Arc::new(queue);
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let base_url = format!("http://{}/", listener.local_addr().unwrap());

            let server = QueueServer::new(Arc::clone(&queue));
            let cancel = CancellationToken::new();
            let token = cancel.clone();
            let handle = tokio::spawn(async move { server.serve(listener, token).await });

            Self {
                base_url,
                queue,
                cancel,
                handle,
            }
        }

        fn client(&self) -> RemoteQueue {
            RemoteQueue::with_config(&self.base_url, QueueConfig::default().with_poll_interval(10))
        }

        async fn stop(self) {
            self.cancel.cancel();
            assert_ok!(self.handle.await.unwrap());
        }
    }

    fn adder() -> WorkerCapabilities {
        WorkerCapabilities::new(
            WorkerInfo::new(Uuid::new_v4(), "remote-0"),
            [Capability::runner("Add"), Capability::from("pool/b")],
        )
    }

    #[tokio::test]
    async fn test_remote_queue_operations() {
        let server = TestServer::start(LocalQueue::new()).await;
        let client = server.client();
        assert!(!client.base_url().ends_with('/'));

        assert!(client.is_empty().await.unwrap());
        let task_id = client
            .enqueue(
                TaskRequest::new("Add", json!({"A": 1, "B": 2}))
                    .priority(1)
                    .require("pool/b"),
            )
            .await
            .unwrap();
        assert!(!client.is_empty().await.unwrap());
        assert_eq!(server.queue.pending_len().await, 1);

        let task = client.try_claim(&adder()).await.unwrap().unwrap();
        assert_eq!(task.id, task_id);
        assert_eq!(task.runner, "Add");
        assert_eq!(task.priority, 1);
        assert_eq!(task.payload, json!({"A": 1, "B": 2}));
        assert_eq!(task.extra_capabilities, vec![Capability::from("pool/b")]);
        assert!(client.is_empty().await.unwrap());

        assert!(client.try_get_result(task_id).await.unwrap().is_none());
        let result = TaskResult::success(task_id, json!(3), TraceMetadata::default());
        client.submit_result(result.clone()).await.unwrap();
        assert_eq!(client.try_get_result(task_id).await.unwrap(), Some(result));

        server.stop().await;
    }

    #[tokio::test]
    async fn test_claim_respects_capabilities_remotely() {
        let server = TestServer::start(LocalQueue::new()).await;
        let client = server.client();

        client
            .enqueue(TaskRequest::new("Add", json!(null)).require("pool/gpu"))
            .await
            .unwrap();
        assert!(client.try_claim(&adder()).await.unwrap().is_none());
        assert!(!client.is_empty().await.unwrap());

        server.stop().await;
    }

    #[tokio::test]
    async fn test_queue_time_crosses_the_wire() {
        let clock = ManualClock::new();
        let queue = LocalQueue::with_clock(QueueConfig::default(), Arc::new(clock.clone()));
        let server = TestServer::start(queue).await;
        let client = server.client();

        client
            .enqueue(TaskRequest::new("Add", json!(null)))
            .await
            .unwrap();
        clock.advance(Duration::from_millis(250));

        let task = client.try_claim(&adder()).await.unwrap().unwrap();
        assert_eq!(task.queue_time(), Duration::from_millis(250));

        server.stop().await;
    }

    #[tokio::test]
    async fn test_duplicates_map_back_to_errors() {
        let server = TestServer::start(LocalQueue::new()).await;
        let client = server.client();
        let task_id = Uuid::new_v4();

        client
            .enqueue(TaskRequest::new("Add", json!(null)).with_id(task_id))
            .await
            .unwrap();
        let err = assert_err!(
            client
                .enqueue(TaskRequest::new("Add", json!(null)).with_id(task_id))
                .await
        );
        assert!(matches!(err, RelayError::DuplicateTask { task_id: id } if id == task_id));

        let first = TaskResult::success(task_id, json!(1), TraceMetadata::default());
        client.submit_result(first.clone()).await.unwrap();
        let err = assert_err!(
            client
                .submit_result(TaskResult::success(task_id, json!(2), TraceMetadata::default()))
                .await
        );
        assert!(matches!(err, RelayError::DuplicateResult { task_id: id } if id == task_id));
        assert_eq!(client.try_get_result(task_id).await.unwrap(), Some(first));

        let stray = Uuid::new_v4();
        let err = assert_err!(
            client
                .submit_result(TaskResult::success(stray, json!(0), TraceMetadata::default()))
                .await
        );
        assert!(matches!(err, RelayError::UnknownTask { task_id: id } if id == stray));
        assert!(client.try_get_result(stray).await.unwrap().is_none());

        server.stop().await;
    }

    #[tokio::test]
    async fn test_unknown_routes() {
        let server = TestServer::start(LocalQueue::new()).await;
        let http = reqwest::Client::new();
        let base = server.base_url.trim_end_matches('/').to_string();

        let response = http.get(format!("{}/nope", base)).send().await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
        assert_eq!(response.text().await.unwrap(), "Not Found: /nope");

        let response = http
            .get(format!("{}/queue/enqueue", base))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
        assert_eq!(response.text().await.unwrap(), "Not Found: /queue/enqueue");

        let response = http
            .get(format!("{}/queue/getResult/not-a-uuid", base))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);

        server.stop().await;
    }

    #[tokio::test]
    async fn test_result_without_trace_metadata_rejected() {
        let server = TestServer::start(LocalQueue::new()).await;
        let client = server.client();
        let task_id = client
            .enqueue(TaskRequest::new("Add", json!({"A": 1, "B": 2})))
            .await
            .unwrap();

        let response = reqwest::Client::new()
            .post(format!("{}/queue/submitResult", client.base_url()))
            .json(&json!({"taskId": task_id, "isError": false, "payload": 3}))
            .send()
            .await
            .unwrap();
        assert!(response.status().is_client_error());
        assert!(server.queue.try_get_result(task_id).await.unwrap().is_none());

        server.stop().await;
    }

    #[tokio::test]
    async fn test_unreachable_server_is_a_transport_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = RemoteQueue::new(format!("http://{}", addr));
        let err = assert_err!(client.is_empty().await);
        assert!(matches!(err, RelayError::Transport { status: None, .. }));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_remote_node_end_to_end() {
        let server = TestServer::start(LocalQueue::new()).await;

        let node = Arc::new(Node::new(
            "remote",
            2,
            QueueFactory::remote(server.base_url.clone()),
            vec![Capability::from("pool/b")],
        ));
        node.add_runner(AddRunner).await;
        let running = Arc::clone(&node);
        let node_handle = tokio::spawn(async move { running.run().await });

        let producer = server.client();
        let cancel = CancellationToken::new();
        let result = tokio::time::timeout(
            Duration::from_secs(10),
            producer.enqueue_and_wait(
                TaskRequest::new("Add", json!({"A": 1, "B": 2}))
                    .priority(1)
                    .require("pool/b"),
                Duration::from_millis(10),
                &cancel,
            ),
        )
        .await
        .unwrap()
        .unwrap();

        assert!(!result.is_error);
        assert_eq!(result.payload, json!(3));
        let worker_name = result.trace.data["worker_name"].as_str().unwrap().to_string();
        assert!(worker_name.starts_with("remote-"));

        let invalid = producer
            .enqueue_and_wait(
                TaskRequest::new("Add", json!({"A": 1})),
                Duration::from_millis(10),
                &cancel,
            )
            .await
            .unwrap();
        assert!(invalid.is_error);

        tokio::time::timeout(Duration::from_secs(10), node.stop_on_idle())
            .await
            .unwrap()
            .unwrap();
        assert_ok!(node_handle.await.unwrap());
        server.stop().await;
    }
}
