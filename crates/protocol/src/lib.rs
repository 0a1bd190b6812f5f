//! Shared data model for the GameShelf library server.
//!
//! Scanner output, persisted game records, byte intervals and the JSON
//! bodies exchanged over the HTTP API.

pub mod messages;
pub mod types;

pub use types::{ByteInterval, FileDescriptor, GameId, GameRecord};

/// Header carrying the requested download speed limit in KiB/s.
pub const SPEED_LIMIT_HEADER: &str = "x-download-speed-limit";
