//! Library scanning.
//!
//! Walks the configured root directories and turns every regular game
//! file into a [`FileDescriptor`](gameshelf_protocol::FileDescriptor)
//! carrying a SHA-256 content checksum. The walk is lazy: descriptors are
//! produced one at a time by the [`Scan`] iterator, and a file that cannot
//! be read yields an error item without stopping the walk.

mod error;
mod identify;
mod scanner;

pub use error::ScanError;
pub use identify::{ContentId, checksum_bytes, identify};
pub use scanner::{IgnoreSet, Scan, ScanConfig, Scanner};

/// Read buffer used while hashing files: 64 KiB.
pub const HASH_BUFFER_SIZE: usize = 64 * 1024;
