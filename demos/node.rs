use relayq::prelude::*;
use std::sync::Arc;
use tokio::signal;

#[tokio::main]
async fn main() -> RelayResult<()> {
    init_logging(&LoggingConfig::default())?;

    let mut args = std::env::args().skip(1);
    let config_path = args
        .next()
        .ok_or_else(|| RelayError::config("usage: node <config.json> [queue-url]"))?;
    let queue_url = args
        .next()
        .unwrap_or_else(|| format!("http://{}", ServerConfig::default().bind_addr));

    let node = Arc::new(Node::from_file(&config_path, QueueFactory::remote(queue_url.clone()))?);
    node.add_runner(AddRunner).await;
    node.add_runner(DelayRunner).await;
    node.add_runner(EchoRunner).await;

    let workers = node.build().await;
    println!(
        "🔧 Node {} with {} workers pulling from {}",
        node.name(),
        workers.len(),
        queue_url
    );

    let stopper = Arc::clone(&node);
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            println!("🛑 Finishing in-flight tasks");
            stopper.graceful_stop().await;
        }
    });

    node.run().await?;
    println!("✅ Node stopped");
    Ok(())
}
