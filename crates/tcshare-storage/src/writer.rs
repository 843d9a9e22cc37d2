//! Append-only writer for one object being uploaded

use std::path::PathBuf;

use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, warn};

use tcshare_core::{TcshareError, TcshareResult};

/// Sequential writer. `write` suspends while the buffer drains to disk, which
/// is the only admission control between a fast client and a slow disk.
///
/// The object survives only through [`ObjectWriter::end`]. [`ObjectWriter::clear`]
/// deletes it, and so does dropping a writer that was never ended.
#[derive(Debug)]
pub struct ObjectWriter {
    id: String,
    path: PathBuf,
    sink: Option<BufWriter<File>>,
    written: u64,
    size_limit: Option<u64>,
}

impl ObjectWriter {
    pub async fn create(
        path: PathBuf,
        id: String,
        buffer_bytes: usize,
        size_limit: Option<u64>,
    ) -> TcshareResult<Self> {
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await?;
        debug!(id = %id, "object created");
        Ok(Self {
            id,
            path,
            sink: Some(BufWriter::with_capacity(buffer_bytes.max(1), file)),
            written: 0,
            size_limit,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Bytes accepted so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Append `data`. Fails with `SizeLimit` (writing nothing) once the running
    /// total would exceed the cap; the caller then clears the object.
    pub async fn write(&mut self, data: &[u8]) -> TcshareResult<()> {
        let total = self.written + data.len() as u64;
        if let Some(limit) = self.size_limit {
            if total > limit {
                return Err(TcshareError::SizeLimit { limit });
            }
        }
        let sink = self
            .sink
            .as_mut()
            .ok_or_else(|| TcshareError::invalid("writer already finished"))?;
        sink.write_all(data).await?;
        self.written = total;
        Ok(())
    }

    /// Flush and fsync. Resolves only once the object is durable.
    pub async fn end(mut self) -> TcshareResult<u64> {
        let mut sink = self
            .sink
            .take()
            .ok_or_else(|| TcshareError::invalid("writer already finished"))?;
        let result = async {
            sink.flush().await?;
            sink.get_mut().sync_all().await?;
            Ok::<_, std::io::Error>(())
        }
        .await;
        if let Err(e) = result {
            drop(sink);
            self.remove_partial();
            return Err(e.into());
        }
        debug!(id = %self.id, bytes = self.written, "object committed");
        Ok(self.written)
    }

    /// Abort and delete the partial object.
    pub async fn clear(mut self) -> TcshareResult<()> {
        self.sink.take();
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        debug!(id = %self.id, bytes = self.written, "partial object cleared");
        Ok(())
    }

    fn remove_partial(&self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(id = %self.id, "failed to remove partial object: {e}");
            }
        }
    }
}

impl Drop for ObjectWriter {
    fn drop(&mut self) {
        if self.sink.take().is_some() {
            warn!(
                id = %self.id,
                bytes = self.written,
                "writer dropped before end, removing partial object"
            );
            self.remove_partial();
        }
    }
}
