//! Listener loop: accepts raw connections and hands them to the manager

use std::sync::Arc;

use log::{error, info, warn};
use tokio::net::TcpListener;

use crate::config::ServerConfig;
use crate::core::client::RoomClient;
use crate::core::manager::RoomManager;
use crate::core::pool::Pool;
use crate::error::{Result, RustyRoomsError};

/// Thin accept-loop driver around the room manager
pub struct RoomServer {
    config: ServerConfig,
    clients_pool: Arc<Pool<Arc<RoomClient>>>,
    manager: Arc<RoomManager>,
}

impl RoomServer {
    pub fn new(
        config: ServerConfig,
        clients_pool: Arc<Pool<Arc<RoomClient>>>,
        manager: Arc<RoomManager>,
    ) -> Self {
        Self {
            config,
            clients_pool,
            manager,
        }
    }

    pub fn manager(&self) -> &Arc<RoomManager> {
        &self.manager
    }

    /// Bind the configured endpoint and serve forever
    pub async fn run(&self) -> Result<()> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| RustyRoomsError::ConnectionError(format!("bind {}: {}", addr, e)))?;

        info!("listening on {}", addr);
        self.serve(listener).await
    }

    /// Accept connections on an already-bound listener
    ///
    /// Split out from [`RoomServer::run`] so tests can bind an ephemeral
    /// port first.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("accept failed: {}", e);
                    continue;
                }
            };

            info!("connection from {}", peer);

            let client = match self.clients_pool.get() {
                Ok(client) => client,
                Err(e) => {
                    error!("failed to lease client for {}: {}", peer, e);
                    continue;
                }
            };

            if let Err(e) = client.attach(stream) {
                error!("failed to attach {}: {}", peer, e);
                if let Err(e) = self.clients_pool.free(client) {
                    error!("failed to recycle client: {}", e);
                }
                continue;
            }

            self.manager.attach_client(client);
        }
    }
}
