//! kvd server entry point.
//!
//! Parses the three positional startup arguments, initializes
//! structured logging, and runs the TCP accept loop.

use kvd::{Result, Server, ServerConfig};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .init();

    let config = ServerConfig::parse();

    tracing::info!(
        max_clients = config.max_clients,
        database_shards = config.database_shards,
        user_shards = config.user_shards,
        port = config.port,
        "starting kvd"
    );

    let server = Server::new(&config);
    server.run().await
}
