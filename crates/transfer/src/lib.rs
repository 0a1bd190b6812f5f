//! Game downloads.
//!
//! Resolves HTTP `Range` headers against the file on disk, streams the
//! selected bytes through an optional per-request token bucket and
//! assembles the response metadata.

mod download;
mod range;
mod throttle;

pub use download::{ByteStream, Download, DownloadError, DownloadRequest, DownloadStatus, Downloader};
pub use range::{RangeError, resolve_range};
pub use throttle::{ThrottledReader, TokenBucket};

/// Largest chunk read from disk per stream item: 64 KiB.
///
/// Throttled streams use smaller chunks when the per-second limit is below
/// this size, so a single chunk never exceeds the bucket.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;
