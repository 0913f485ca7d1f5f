//! Console capture for confined processes.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::io::{AsyncRead, AsyncReadExt};

/// Read size used while draining a pipe.
const CHUNK_SIZE: usize = 8 * 1024;

#[derive(Debug, Default)]
struct Captured {
    bytes: Vec<u8>,
    dropped: usize,
}

/// A bounded byte buffer filled by a pipe reader and read by the supervisor.
///
/// Clones share one buffer, so whatever a reader task has copied out of the
/// pipe stays visible even if that task is later aborted. Bytes past `limit`
/// are counted and discarded.
#[derive(Clone, Debug)]
pub struct CapturedOutput {
    inner: Arc<Mutex<Captured>>,
    limit: usize,
}

impl CapturedOutput {
    /// Create a buffer that keeps at most `limit` bytes.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            inner: Arc::default(),
            limit,
        }
    }

    /// Append bytes to the buffer, dropping whatever exceeds the limit.
    pub fn extend(&self, bytes: &[u8]) {
        let mut captured = self.lock();
        let room = self.limit.saturating_sub(captured.bytes.len());
        let kept = room.min(bytes.len());
        captured.bytes.extend_from_slice(&bytes[..kept]);
        captured.dropped += bytes.len() - kept;
    }

    /// Copy `reader` into the buffer until end of stream or a read error.
    ///
    /// The pipe is read to the end even once the buffer is full, so the
    /// writer never blocks on it. Returns the number of bytes read.
    pub async fn drain<R>(self, mut reader: R) -> usize
    where
        R: AsyncRead + Unpin,
    {
        let mut chunk = vec![0u8; CHUNK_SIZE];
        let mut total = 0;
        loop {
            match reader.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => {
                    self.extend(&chunk[..n]);
                    total += n;
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::debug!(error = %e, "console pipe read failed");
                    break;
                }
            }
        }
        total
    }

    /// Get the captured output as bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.lock().bytes.clone()
    }

    /// Bytes read but not kept because the buffer was full.
    pub fn dropped(&self) -> usize {
        self.lock().dropped
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Captured> {
        // A panic mid-append leaves valid bytes behind; keep them.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
