use relayq::prelude::*;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[tokio::main]
async fn main() -> RelayResult<()> {
    init_logging(&LoggingConfig {
        level: LogLevel::Warn,
        ..LoggingConfig::default()
    })?;

    println!("🚀 relayq local example");

    let queue: SharedQueue = Arc::new(LocalQueue::new());
    let node = Arc::new(Node::new(
        "local",
        64,
        QueueFactory::shared(queue.clone()),
        Vec::new(),
    ));
    node.add_runner(AddRunner).await;
    node.add_runner(DelayRunner).await;

    let running = Arc::clone(&node);
    let handle = tokio::spawn(async move { running.run().await });

    let started = Instant::now();
    for i in 0..1000u64 {
        queue
            .enqueue(TaskRequest::new("Delay", json!({ "Delay": 10 + i % 40 })).priority((i % 4) as i32))
            .await?;
    }
    println!("📥 Enqueued 1000 delay tasks");

    let result = queue
        .enqueue_and_wait(
            TaskRequest::new("Add", json!({ "A": 1, "B": 2 })).priority(-1),
            Duration::from_millis(100),
            &CancellationToken::new(),
        )
        .await?;
    println!(
        "➕ 1 + 2 = {} (ran on {})",
        result.payload, result.trace.data["worker_name"]
    );

    node.stop_on_idle().await?;
    handle
        .await
        .map_err(|e| RelayError::execution(e.to_string()))??;

    println!("✅ Drained the queue in {:?}", started.elapsed());
    Ok(())
}
