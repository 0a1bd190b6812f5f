//! Download orchestration: registry lookup, range resolution and the
//! throttled body stream.

use std::io::{self, SeekFrom};
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::Stream;
use gameshelf_protocol::{ByteInterval, GameId, GameRecord};
use gameshelf_registry::{GameStore, StoreError};
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use tokio::io::AsyncSeekExt;
use tracing::{debug, info};

use crate::range::{RangeError, resolve_range};
use crate::throttle::ThrottledReader;

/// Response body of a download.
pub type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

/// Errors produced by [`Downloader::download`].
#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    /// Unknown or soft-deleted game.
    #[error("game {0} not found")]
    NotFound(GameId),

    /// The registry points at a file that cannot be read; a reindex
    /// resolves it.
    #[error("game {id}: cannot read {}: {source}", .path.display())]
    Io {
        id: GameId,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("game {id}: {source}")]
    Range {
        id: GameId,
        file_size: u64,
        #[source]
        source: RangeError,
    },

    #[error("registry error: {0}")]
    Store(StoreError),
}

/// A download as asked for by a client.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadRequest {
    pub game_id: GameId,
    /// Raw `Range` header.
    pub range: Option<String>,
    /// Requested bandwidth in bytes per second; zero means unlimited.
    pub speed_limit: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadStatus {
    /// 200, the whole file.
    Ok,
    /// 206, a single byte range.
    PartialContent,
}

impl DownloadStatus {
    pub fn code(self) -> u16 {
        match self {
            Self::Ok => 200,
            Self::PartialContent => 206,
        }
    }
}

/// A ready-to-send download.
pub struct Download {
    pub game: GameRecord,
    pub status: DownloadStatus,
    /// Header name/value pairs, names lower-case.
    pub headers: Vec<(&'static str, String)>,
    /// Bytes served; `None` for an empty file.
    pub interval: Option<ByteInterval>,
    pub file_size: u64,
    /// Effective bandwidth limit in bytes per second.
    pub speed_limit: Option<u64>,
    pub body: ByteStream,
}

impl Download {
    pub fn content_length(&self) -> u64 {
        self.interval.map_or(0, |i| i.len())
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

impl std::fmt::Debug for Download {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Download")
            .field("game", &self.game.id)
            .field("status", &self.status)
            .field("interval", &self.interval)
            .field("file_size", &self.file_size)
            .field("speed_limit", &self.speed_limit)
            .finish_non_exhaustive()
    }
}

/// Serves game files out of the registry.
pub struct Downloader {
    store: Arc<dyn GameStore>,
    max_speed: Option<u64>,
}

impl Downloader {
    pub fn new(store: Arc<dyn GameStore>) -> Self {
        Self {
            store,
            max_speed: None,
        }
    }

    /// Caps every download at `bytes_per_sec`; `None` or zero removes the cap.
    pub fn with_max_speed(mut self, bytes_per_sec: Option<u64>) -> Self {
        self.max_speed = bytes_per_sec.filter(|&l| l > 0);
        self
    }

    /// Combines a requested limit with the configured cap. The slower one
    /// wins; zero counts as no limit.
    pub fn effective_limit(&self, requested: Option<u64>) -> Option<u64> {
        match (requested.filter(|&l| l > 0), self.max_speed) {
            (Some(requested), Some(max)) => Some(requested.min(max)),
            (requested, max) => requested.or(max),
        }
    }

    /// Prepares the download described by `request`.
    ///
    /// Nothing is read before the returned body is polled, and every
    /// failure visible up front (unknown game, missing file, bad range)
    /// is reported here rather than mid-stream.
    pub async fn download(&self, request: DownloadRequest) -> Result<Download, DownloadError> {
        let id = request.game_id;
        let game = match self.store.find_by_id(id) {
            Ok(game) if game.is_live() => game,
            Ok(_) | Err(StoreError::NotFound(_)) => return Err(DownloadError::NotFound(id)),
            Err(e) => return Err(DownloadError::Store(e)),
        };
        let io_error = |source: io::Error| DownloadError::Io {
            id,
            path: game.path.clone(),
            source,
        };

        // Size and bytes both come from the same handle, even if the path
        // is swapped underneath us.
        let mut file = tokio::fs::File::open(&game.path).await.map_err(io_error)?;
        let metadata = file.metadata().await.map_err(io_error)?;
        if !metadata.is_file() {
            return Err(io_error(io::Error::new(
                io::ErrorKind::InvalidInput,
                "not a regular file",
            )));
        }
        let file_size = metadata.len();

        // An empty file has no byte interval; any Range header is moot.
        let interval = if file_size == 0 {
            None
        } else {
            let interval = resolve_range(request.range.as_deref(), file_size).map_err(|source| {
                DownloadError::Range {
                    id,
                    file_size,
                    source,
                }
            })?;
            Some(interval)
        };
        let status = match interval {
            Some(i) if !i.is_full(file_size) => DownloadStatus::PartialContent,
            _ => DownloadStatus::Ok,
        };

        let (start, len) = interval.map_or((0, 0), |i| (i.start, i.len()));
        if start > 0 {
            file.seek(SeekFrom::Start(start)).await.map_err(io_error)?;
        }

        let speed_limit = self.effective_limit(request.speed_limit);
        let mut headers = vec![
            ("accept-ranges", "bytes".to_string()),
            ("content-length", len.to_string()),
            ("content-type", "application/octet-stream".to_string()),
            ("content-disposition", content_disposition(&game.file_name())),
        ];
        if let (DownloadStatus::PartialContent, Some(i)) = (status, interval) {
            headers.push(("content-range", i.content_range(file_size)));
        }

        info!(
            id,
            path = %game.path.display(),
            status = status.code(),
            bytes = len,
            file_size,
            speed_limit = speed_limit.unwrap_or(0),
            "download started"
        );
        debug!(?interval, "download interval");

        let body: ByteStream = Box::pin(ThrottledReader::new(file, len, speed_limit).into_stream());
        Ok(Download {
            game,
            status,
            headers,
            interval,
            file_size,
            speed_limit,
            body,
        })
    }
}

/// `attachment` disposition with an ASCII fallback name and, for other
/// names, an RFC 5987 `filename*`.
fn content_disposition(name: &str) -> String {
    let fallback: String = name
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_ascii() && !c.is_ascii_control() => c,
            _ => '_',
        })
        .collect();
    if fallback == name {
        format!("attachment; filename=\"{fallback}\"")
    } else {
        format!(
            "attachment; filename=\"{fallback}\"; filename*=UTF-8''{}",
            utf8_percent_encode(name, NON_ALPHANUMERIC)
        )
    }
}
