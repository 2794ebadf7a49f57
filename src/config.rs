//! Server configuration module
//! Handles dynamic configuration parameters for the room server

use crate::constants::{
    DEFAULT_HOST, DEFAULT_PACKET_SIZE, DEFAULT_PORT, DEFAULT_ROOM_TTL_SECS, MIN_PACKET_SIZE,
};
use crate::error::{Result, RustyRoomsError};
use std::env;
use std::time::Duration;

/// Server configuration parameters
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Capacity of every pooled wire buffer; also the maximum frame size
    pub packet_size: usize,
    /// How long a room may stay silent before the sweep reclaims it
    pub room_ttl: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            packet_size: DEFAULT_PACKET_SIZE,
            room_ttl: Duration::from_secs(DEFAULT_ROOM_TTL_SECS),
        }
    }
}

impl ServerConfig {
    /// Create a configuration for unit and integration tests
    pub fn for_testing() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            packet_size: DEFAULT_PACKET_SIZE,
            room_ttl: Duration::from_secs(DEFAULT_ROOM_TTL_SECS),
        }
    }

    /// Load configuration from environment variables if available
    pub fn from_env() -> Result<Self> {
        let host = env::var("RUSTY_ROOMS_HOST").unwrap_or(DEFAULT_HOST.to_string());
        let port = env::var("RUSTY_ROOMS_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(DEFAULT_PORT);

        let packet_size = env::var("RUSTY_ROOMS_BUFFER")
            .ok()
            .and_then(|b| b.parse().ok())
            .unwrap_or(DEFAULT_PACKET_SIZE);

        let room_ttl_secs = env::var("RUSTY_ROOMS_ROOM_TTL")
            .ok()
            .and_then(|t| t.parse().ok())
            .unwrap_or(DEFAULT_ROOM_TTL_SECS);

        let config = Self {
            host,
            port,
            packet_size,
            room_ttl: Duration::from_secs(room_ttl_secs),
        };
        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values that would break the wire protocol
    pub fn validate(&self) -> Result<()> {
        if self.packet_size < MIN_PACKET_SIZE {
            return Err(RustyRoomsError::ConfigError(format!(
                "packet size {} is below the minimum of {} bytes",
                self.packet_size, MIN_PACKET_SIZE
            )));
        }

        if self.room_ttl.is_zero() {
            return Err(RustyRoomsError::ConfigError(
                "room TTL must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}
