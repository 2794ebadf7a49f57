// Fundamental configuration constants
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 4040;

// Wire buffer configuration constants
pub const DEFAULT_PACKET_SIZE: usize = 2048;
pub const MIN_PACKET_SIZE: usize = 256;

// Pool pre-warm counts
pub const BUFFER_POOL_PREWARM: usize = 64;
pub const COMMAND_POOL_PREWARM: usize = 1024;

// Room lifecycle constants
pub const DEFAULT_ROOM_TTL_SECS: u64 = 60;
pub const ROOM_SWEEP_INTERVAL_SECS: u64 = 1;
