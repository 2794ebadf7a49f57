use std::error::Error;
use std::fmt;
use std::sync::PoisonError;

#[derive(Debug)]
pub enum RustyRoomsError {
    // Pool errors
    PoolState(String),

    // Protocol errors
    ProtocolViolation(String),
    MessageTooLarge(usize),

    // Transport errors
    AlreadyAttached,
    TransportDetached,
    SocketNotConnected,
    ConnectionError(String),

    // Room errors
    AlreadyInRoom,
    WrongRoom,

    // System errors
    SystemError(String),

    // Configuration errors
    ConfigError(String),
}

impl fmt::Display for RustyRoomsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PoolState(msg) => write!(f, "Pool state error: {}", msg),
            Self::ProtocolViolation(msg) => write!(f, "Protocol violation: {}", msg),
            Self::MessageTooLarge(size) => write!(f, "Message exceeds buffer capacity: {} bytes", size),
            Self::AlreadyAttached => write!(f, "Transport is already attached"),
            Self::TransportDetached => write!(f, "Transport is detached"),
            Self::SocketNotConnected => write!(f, "Socket is not connected"),
            Self::ConnectionError(msg) => write!(f, "Connection error: {}", msg),
            Self::AlreadyInRoom => write!(f, "Client already belongs to a room"),
            Self::WrongRoom => write!(f, "Client does not belong to this room"),
            Self::SystemError(msg) => write!(f, "System error: {}", msg),
            Self::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl Error for RustyRoomsError {}

// Converting from PoisonError to facilitate poisoned mutex handling
impl<T> From<PoisonError<T>> for RustyRoomsError {
    fn from(err: PoisonError<T>) -> Self {
        RustyRoomsError::SystemError(format!("Mutex poisoned: {}", err))
    }
}

// Generic result type for RustyRooms
pub type Result<T> = std::result::Result<T, RustyRoomsError>;
