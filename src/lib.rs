//! Rusty Rooms - a pooled TCP room server implemented in Rust
//!
//! This library provides the core functionality for grouping connected
//! clients into named rooms and broadcasting messages among room members
//! over a delimited text protocol.

pub mod config;
pub mod constants;
pub mod core;
pub mod error;
pub mod server;

// Re-export main components
pub use config::*;
pub use constants::*;
