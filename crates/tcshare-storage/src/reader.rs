//! Exact-length ranged reads over one stored object

use std::io::SeekFrom;
use std::path::Path;

use bytes::Bytes;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, Take};

use tcshare_core::{TcshareError, TcshareResult};

/// Open handle on a stored object. A read either returns exactly the bytes
/// asked for or fails; it never returns a short buffer.
#[derive(Debug)]
pub struct ObjectReader {
    id: String,
    file: Option<File>,
    size: u64,
    chunk_size: usize,
}

impl ObjectReader {
    pub async fn open(path: &Path, id: &str, chunk_size: usize) -> TcshareResult<Self> {
        let file = match File::open(path).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(TcshareError::NotFound(id.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        let size = file.metadata().await?.len();
        Ok(Self {
            id: id.to_string(),
            file: Some(file),
            size,
            chunk_size,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    fn check_range(&self, start: u64, end: u64) -> TcshareResult<()> {
        if start > end || end > self.size {
            return Err(TcshareError::OutOfRange {
                from: start,
                to: end,
                size: self.size,
            });
        }
        Ok(())
    }

    /// Read `[start, end)`.
    pub async fn read(&mut self, start: u64, end: u64) -> TcshareResult<Bytes> {
        self.check_range(start, end)?;
        let len = usize::try_from(end - start)
            .map_err(|_| TcshareError::invalid("range does not fit in memory"))?;

        let size = self.size;
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| TcshareError::invalid("reader already closed"))?;
        file.seek(SeekFrom::Start(start)).await?;
        let mut buf = vec![0u8; len];
        match file.read_exact(&mut buf).await {
            Ok(_) => Ok(Bytes::from(buf)),
            // Truncated underneath us since open
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                Err(TcshareError::OutOfRange {
                    from: start,
                    to: end,
                    size,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Read chunk `n` of the body:
    /// `[body_start + n·C, min(size, body_start + (n+1)·C))`.
    /// Empty once the chunk starts at or past end of file.
    pub async fn read_chunk(&mut self, n: u64, body_start: u64) -> TcshareResult<Bytes> {
        let chunk = self.chunk_size as u64;
        let start = n
            .checked_mul(chunk)
            .and_then(|off| off.checked_add(body_start))
            .unwrap_or(u64::MAX);
        if start >= self.size {
            return Ok(Bytes::new());
        }
        let end = start.saturating_add(chunk).min(self.size);
        self.read(start, end).await
    }

    /// Hand over `[start, end)` as a reader for streaming responses. Nothing
    /// is buffered, so the range may be as large as the object.
    pub async fn into_range(mut self, start: u64, end: u64) -> TcshareResult<Take<File>> {
        self.check_range(start, end)?;
        let mut file = self
            .file
            .take()
            .ok_or_else(|| TcshareError::invalid("reader already closed"))?;
        file.seek(SeekFrom::Start(start)).await?;
        Ok(file.take(end - start))
    }

    pub fn close(mut self) {
        self.file.take();
    }
}
