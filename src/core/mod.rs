//! Core functionality for the room server

pub mod buffer;
pub mod channel;
pub mod client;
pub mod manager;
pub mod pool;
pub mod protocol;
pub mod transport;

// Re-export main components for convenience
pub use buffer::ByteBuffer;
pub use channel::{Channel, RoomRemoveReason};
pub use client::{ClientEvents, RoomClient};
pub use manager::{ManagerStats, RoomManager};
pub use pool::{Pool, PoolStats, Reusable, UsageFlag};
pub use protocol::{Codec, Command};
pub use transport::{SocketTransport, TransportListener};
