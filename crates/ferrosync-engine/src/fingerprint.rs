//! Content fingerprints
//!
//! Fingerprints are BLAKE3 digests streamed through a fixed-size read buffer,
//! so memory use does not depend on the size of the file being hashed.

use ferrosync_types::{Error, Fingerprint, IoResultExt, Result, SyncPath};
use std::io::SeekFrom;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::trace;

/// Largest byte range that can be fingerprinted (the largest seekable offset)
pub const MAX_RANGE_LENGTH: u64 = i64::MAX as u64;

/// Streams file contents into fingerprints
#[derive(Debug, Clone)]
pub struct Fingerprinter {
    buffer_size: usize,
}

impl Fingerprinter {
    /// Create a fingerprinter reading `buffer_size` bytes at a time
    pub fn new(buffer_size: usize) -> Self {
        Self {
            buffer_size: buffer_size.max(1),
        }
    }

    /// Fingerprint the whole file at `path` under `root`
    pub async fn whole_file(&self, root: &Path, path: &SyncPath) -> Result<Fingerprint> {
        let full = path
            .components()
            .fold(root.to_path_buf(), |acc, part| acc.join(part));
        let context = format!("fingerprinting {}", path);

        let mut file = File::open(&full).await.transient(&context)?;
        let mut hasher = blake3::Hasher::new();
        let mut buffer = vec![0u8; self.buffer_size];
        let mut total = 0u64;

        loop {
            let read = file.read(&mut buffer).await.transient(&context)?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
            total += read as u64;
        }

        trace!("Fingerprinted {} ({} bytes)", path, total);
        Ok(Fingerprint::from_bytes(*hasher.finalize().as_bytes()))
    }

    /// Fingerprint exactly `length` bytes of `file` starting at `offset`
    pub async fn byte_range(&self, file: &Path, offset: u64, length: u64) -> Result<Fingerprint> {
        let end = offset.checked_add(length);
        if length > MAX_RANGE_LENGTH || end.map_or(true, |end| end > MAX_RANGE_LENGTH) {
            return Err(Error::transient("too big for fingerprinting"));
        }
        let Ok(mut remaining) = usize::try_from(length) else {
            return Err(Error::transient("too big for fingerprinting"));
        };

        let context = format!("fingerprinting {}", file.display());
        let mut handle = File::open(file).await.transient(&context)?;
        handle
            .seek(SeekFrom::Start(offset))
            .await
            .transient(&context)?;

        let mut hasher = blake3::Hasher::new();
        let mut buffer = vec![0u8; self.buffer_size.min(remaining.max(1))];

        while remaining > 0 {
            let want = remaining.min(buffer.len());
            let read = handle
                .read(&mut buffer[..want])
                .await
                .transient(&context)?;
            if read == 0 {
                return Err(Error::transient("truncated file"));
            }
            hasher.update(&buffer[..read]);
            remaining -= read;
        }

        Ok(Fingerprint::from_bytes(*hasher.finalize().as_bytes()))
    }
}
