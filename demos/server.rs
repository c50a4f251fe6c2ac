use relayq::prelude::*;
use std::sync::Arc;
use tokio::signal;

#[tokio::main]
async fn main() -> RelayResult<()> {
    init_logging(&LoggingConfig::default())?;

    let config = ServerConfig {
        bind_addr: std::env::args()
            .nth(1)
            .unwrap_or_else(|| ServerConfig::default().bind_addr),
    };

    let server = QueueServer::new(Arc::new(LocalQueue::new()));
    let cancel = CancellationToken::new();

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            println!("🛑 Shutting down queue server");
        }
        shutdown.cancel();
    });

    println!("📡 Serving queue on http://{} (Ctrl+C to stop)", config.bind_addr);
    server.bind(config.bind_addr.as_str(), cancel).await
}
