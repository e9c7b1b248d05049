//! TCP accept loop: admission-gated, one spawned task per session
//! (spec.md §2 control flow, §4.6).

use crate::admission::Admission;
use crate::config::ServerConfig;
use crate::error::Result;
use crate::handler::handle_connection;
use crate::store::Store;
use std::sync::Arc;
use tokio::net::TcpListener;

pub struct Server {
    store: Arc<Store>,
    admission: Arc<Admission>,
    port: u16,
}

impl Server {
    pub fn new(config: &ServerConfig) -> Self {
        Self {
            store: Arc::new(Store::new(config.database_shards, config.user_shards)),
            admission: Arc::new(Admission::new(config.max_clients)),
            port: config.port,
        }
    }

    pub async fn run(&self) -> Result<()> {
        let addr = format!("0.0.0.0:{}", self.port);
        let listener = TcpListener::bind(&addr).await?;

        tracing::info!(%addr, "kvd listening");

        loop {
            // Blocks while at or above the configured concurrent-client
            // bound; a session's teardown calls `admission.release()`.
            self.admission.acquire().await;

            let (socket, peer) = listener.accept().await?;
            tracing::debug!(%peer, "accepted connection");

            let store = self.store.clone();
            let admission = self.admission.clone();
            tokio::spawn(async move {
                handle_connection(socket, store, admission).await;
            });
        }
    }
}
