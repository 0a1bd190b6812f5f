use std::io::Read;
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::{HASH_BUFFER_SIZE, ScanError};

/// Content identity of a file: checksum plus the number of bytes hashed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentId {
    pub checksum: String,
    pub size: u64,
}

/// Computes SHA-256 of `data` and returns the hex-encoded digest.
pub fn checksum_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Hashes the full content of `path`.
///
/// Fails if the file cannot be opened or read, or if its length changes
/// while it is being hashed.
pub fn identify(path: &Path) -> Result<ContentId, ScanError> {
    let mut file = std::fs::File::open(path).map_err(|e| ScanError::io(path, e))?;
    let expected = file.metadata().map_err(|e| ScanError::io(path, e))?.len();

    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; HASH_BUFFER_SIZE];
    let mut size: u64 = 0;
    loop {
        let n = file.read(&mut buf).map_err(|e| ScanError::io(path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        size += n as u64;
    }

    if size != expected {
        return Err(ScanError::io(
            path,
            std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("file changed while hashing: expected {expected} bytes, read {size}"),
            ),
        ));
    }

    Ok(ContentId {
        checksum: hex::encode(hasher.finalize()),
        size,
    })
}
