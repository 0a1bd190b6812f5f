//! Bandwidth limiting.

use std::io;
use std::time::Duration;

use bytes::Bytes;
use futures_util::Stream;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::Instant;

use crate::DEFAULT_CHUNK_SIZE;

/// Token bucket refilled at a fixed byte rate.
///
/// Capacity is one second's worth of bytes and the bucket starts full, so a
/// transfer may burst up to one second of data before it is paced.
#[derive(Debug)]
pub struct TokenBucket {
    rate: f64,
    capacity: f64,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// Bucket allowing `bytes_per_sec` bytes per second. Must be non-zero.
    pub fn new(bytes_per_sec: u64) -> Self {
        let rate = bytes_per_sec.max(1) as f64;
        Self {
            rate,
            capacity: rate,
            tokens: rate,
            last_refill: Instant::now(),
        }
    }

    pub fn capacity(&self) -> u64 {
        self.capacity as u64
    }

    /// Waits until `n` bytes may be sent and takes them from the bucket.
    ///
    /// Requests larger than the capacity are served in capacity-sized
    /// steps. Dropping the returned future abandons the wait.
    pub async fn acquire(&mut self, n: u64) {
        let mut remaining = n as f64;
        while remaining > 0.0 {
            let step = remaining.min(self.capacity);
            self.refill();
            if self.tokens < step {
                let deficit = step - self.tokens;
                tokio::time::sleep(Duration::from_secs_f64(deficit / self.rate)).await;
                self.refill();
            }
            self.tokens -= step;
            remaining -= step;
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate).min(self.capacity);
        self.last_refill = now;
    }
}

/// Reads exactly `len` bytes from an [`AsyncRead`] in chunks, pacing each
/// chunk through an optional [`TokenBucket`].
pub struct ThrottledReader<R> {
    reader: R,
    remaining: u64,
    chunk_size: usize,
    bucket: Option<TokenBucket>,
}

impl<R: AsyncRead + Unpin> ThrottledReader<R> {
    /// `limit` is in bytes per second; `None` or zero reads unthrottled.
    pub fn new(reader: R, len: u64, limit: Option<u64>) -> Self {
        let bucket = limit.filter(|&l| l > 0).map(TokenBucket::new);
        let chunk_size = bucket
            .as_ref()
            .map_or(DEFAULT_CHUNK_SIZE, |b| {
                DEFAULT_CHUNK_SIZE.min(b.capacity() as usize)
            })
            .max(1);
        Self {
            reader,
            remaining: len,
            chunk_size,
            bucket,
        }
    }

    pub fn is_throttled(&self) -> bool {
        self.bucket.is_some()
    }

    /// Bytes still to be read.
    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Reads the next chunk, or `None` once `len` bytes were produced.
    ///
    /// A source that ends before `len` bytes fails with
    /// [`io::ErrorKind::UnexpectedEof`].
    pub async fn next_chunk(&mut self) -> io::Result<Option<Bytes>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        let want = self.remaining.min(self.chunk_size as u64) as usize;
        if let Some(bucket) = self.bucket.as_mut() {
            bucket.acquire(want as u64).await;
        }

        let mut buf = vec![0u8; want];
        self.reader.read_exact(&mut buf).await?;
        self.remaining -= want as u64;
        Ok(Some(Bytes::from(buf)))
    }
}

impl<R: AsyncRead + Unpin + Send + 'static> ThrottledReader<R> {
    /// Turns the reader into a byte stream. Dropping the stream drops the
    /// reader, including any pending wait on the bucket.
    pub fn into_stream(self) -> impl Stream<Item = io::Result<Bytes>> + Send + 'static {
        futures_util::stream::try_unfold(self, |mut reader| async move {
            let chunk = reader.next_chunk().await?;
            Ok::<_, io::Error>(chunk.map(|chunk| (chunk, reader)))
        })
    }
}
