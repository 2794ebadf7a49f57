use std::sync::Arc;

use log::{error, info, warn};

use rusty_rooms::config::ServerConfig;
use rusty_rooms::constants::{BUFFER_POOL_PREWARM, COMMAND_POOL_PREWARM};
use rusty_rooms::core::buffer::ByteBuffer;
use rusty_rooms::core::channel::Channel;
use rusty_rooms::core::client::RoomClient;
use rusty_rooms::core::manager::RoomManager;
use rusty_rooms::core::pool::Pool;
use rusty_rooms::core::protocol::{create_command_pool, Codec};
use rusty_rooms::core::transport::SocketTransport;
use rusty_rooms::server::RoomServer;

#[tokio::main]
async fn main() {
    // Initialize env
    match dotenvy::dotenv() {
        Ok(_) => info!("Environment variables loaded from .env file"),
        Err(e) => warn!("Failed to load .env file: {}", e),
    };

    // Initialize logging
    env_logger::init();

    // Load config from the environment
    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    info!(
        "Configuration: host={}, port={}, packet_size={}, room_ttl={}s",
        config.host,
        config.port,
        config.packet_size,
        config.room_ttl.as_secs()
    );

    // Wire the object graph explicitly; it is static for the process lifetime
    let packet_size = config.packet_size;
    let buffers = Arc::new(Pool::with_prewarm(
        move || ByteBuffer::new(packet_size),
        BUFFER_POOL_PREWARM,
    ));
    let commands = create_command_pool(COMMAND_POOL_PREWARM);
    let codec = Arc::new(Codec::new(buffers.clone(), commands.clone()));

    let channels_pool = Arc::new(Pool::new(|| Arc::new(Channel::new())));

    let client_buffers = buffers.clone();
    let client_codec = codec.clone();
    let client_commands = commands.clone();
    let clients_pool = Arc::new(Pool::with_recycler(
        move || {
            let transport = Arc::new(SocketTransport::new(client_buffers.clone()));
            RoomClient::new(transport, client_codec.clone(), client_commands.clone())
        },
        0,
        |client| client.reset(),
    ));

    let manager = Arc::new(RoomManager::new(commands, channels_pool, config.room_ttl));
    manager.clone().start_sweep_task();

    info!("Starting Rusty Rooms server");

    let server = RoomServer::new(config, clients_pool, manager);
    if let Err(e) = server.run().await {
        error!("Server exited with error: {}", e);
        std::process::exit(1);
    }
}
