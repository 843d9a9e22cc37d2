//! Object-store backend via OpenDAL (S3, or in-memory for tests)

use std::future::Future;
use std::time::Duration;

use bytes::Bytes;
use opendal::{ErrorKind, Operator};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tcshare_core::config::StorageConfig;
use tcshare_core::types::SendResult;
use tcshare_core::{TcshareError, TcshareResult};

use super::{ensure_exact, Receiver, Sender};
use crate::upload::UploadPipeline;

fn storage_err(path: &str, e: opendal::Error) -> TcshareError {
    match e.kind() {
        ErrorKind::NotFound => TcshareError::NotFound(path.to_string()),
        _ => TcshareError::transport(format!("{path}: {e}")),
    }
}

#[derive(Debug, Clone)]
pub struct ObjectStoreReceiver {
    op: Operator,
    path: String,
}

impl ObjectStoreReceiver {
    pub fn new(op: Operator, path: &str) -> Self {
        Self {
            op,
            path: path.to_string(),
        }
    }
}

impl Receiver for ObjectStoreReceiver {
    async fn size(&self) -> TcshareResult<u64> {
        let meta = self
            .op
            .stat(&self.path)
            .await
            .map_err(|e| storage_err(&self.path, e))?;
        Ok(meta.content_length())
    }

    async fn receive(&self, from: u64, to: u64) -> TcshareResult<Bytes> {
        if from >= to {
            return Ok(Bytes::new());
        }
        let data = self
            .op
            .read_with(&self.path)
            .range(from..to)
            .await
            .map_err(|e| storage_err(&self.path, e))?
            .to_bytes();
        ensure_exact(from, to, &data)?;
        Ok(data)
    }
}

/// Appends segments through a chunked OpenDAL writer, commits on close, and
/// captures a presigned read URL when the service supports it.
#[derive(Debug, Clone)]
pub struct ObjectStoreSender {
    op: Operator,
    append_size: usize,
    share_ttl: Duration,
}

impl ObjectStoreSender {
    pub fn new(op: Operator, storage: &StorageConfig) -> Self {
        Self {
            op,
            append_size: storage.append_size,
            share_ttl: Duration::from_secs(storage.share_ttl_secs),
        }
    }

    async fn discard(&self, path: &str, mut writer: opendal::Writer) {
        if let Err(e) = writer.abort().await {
            debug!(path, "writer abort: {e}");
        }
        if let Err(e) = self.op.delete(path).await {
            warn!(path, "failed to delete partial object: {e}");
        }
    }

    /// Await the commit. If it fails, remove whatever the store kept under `path`.
    async fn commit<T>(
        &self,
        path: &str,
        close: impl Future<Output = opendal::Result<T>>,
    ) -> TcshareResult<()> {
        if let Err(e) = close.await {
            if let Err(del) = self.op.delete(path).await {
                warn!(path, "failed to delete uncommitted object: {del}");
            }
            return Err(storage_err(path, e));
        }
        Ok(())
    }

    async fn share_url(&self, path: &str) -> Option<String> {
        if !self.op.info().full_capability().presign_read {
            return None;
        }
        match self.op.presign_read(path, self.share_ttl).await {
            Ok(req) => Some(req.uri().to_string()),
            Err(e) => {
                warn!(path, "presign failed, no share link: {e}");
                None
            }
        }
    }
}

impl Sender for ObjectStoreSender {
    async fn send(
        &self,
        mut pipeline: UploadPipeline,
        cancel: CancellationToken,
    ) -> TcshareResult<SendResult> {
        let path = uuid::Uuid::new_v4().simple().to_string();
        let mut writer = self
            .op
            .writer_with(&path)
            .chunk(self.append_size)
            .await
            .map_err(|e| storage_err(&path, e))?;

        let mut appended = 0u64;
        loop {
            if cancel.is_cancelled() {
                self.discard(&path, writer).await;
                info!(path = %path, bytes = appended, "upload canceled, partial object removed");
                return Ok(SendResult::canceled());
            }
            let segment = match pipeline.next_segment().await {
                Ok(Some(segment)) => segment,
                Ok(None) => break,
                Err(e) => {
                    self.discard(&path, writer).await;
                    return Err(e);
                }
            };
            appended += segment.len() as u64;
            if let Err(e) = writer.write(segment).await {
                self.discard(&path, writer).await;
                return Err(storage_err(&path, e));
            }
        }

        self.commit(&path, writer.close()).await?;
        info!(path = %path, bytes = appended, "object committed");

        Ok(SendResult {
            share_url: self.share_url(&path).await,
            key_fragment: pipeline.key_fragment().unwrap_or_default().to_string(),
            id: path,
        })
    }
}
