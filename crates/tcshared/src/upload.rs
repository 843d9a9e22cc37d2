//! Upload channel: one lockstep session per TCP connection
//!
//! The server acks each segment with `{"status":200}` only after it has been
//! handed to the writer, so a slow disk stalls the client instead of growing
//! a buffer. The object is committed on the end-of-upload sentinel and
//! deleted on every other way a session can end.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tcshare_core::config::TcshareConfig;
use tcshare_core::types::{ServerMessage, END_OF_UPLOAD};
use tcshare_core::{TcshareError, TcshareResult};
use tcshare_storage::{FileStore, ObjectWriter};
use tcshare_transfer::backend::self_hosted::upload_codec;

use crate::metrics::Metrics;

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub chunk_size: usize,
    pub idle_timeout: Duration,
}

impl SessionOptions {
    pub fn from_config(config: &TcshareConfig) -> Self {
        Self {
            chunk_size: config.transfer.chunk_size,
            idle_timeout: Duration::from_secs(config.daemon.upload_idle_timeout_secs),
        }
    }
}

/// Accept upload connections until `shutdown` fires. Sessions run
/// independently; each owns exactly one object.
pub async fn serve(
    listener: TcpListener,
    store: FileStore,
    metrics: Arc<Metrics>,
    options: SessionOptions,
    shutdown: CancellationToken,
) {
    loop {
        let (stream, peer) = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    warn!("upload accept failed: {e}");
                    continue;
                }
            },
        };
        let (store, metrics, options) = (store.clone(), metrics.clone(), options.clone());
        tokio::spawn(async move {
            match handle_session(stream, &store, &metrics, &options).await {
                Ok(Some(id)) => debug!(peer = %peer, id = %id, "upload session closed"),
                Ok(None) => debug!(peer = %peer, "upload session abandoned"),
                Err(e) => warn!(peer = %peer, "upload session failed: {e}"),
            }
        });
    }
    info!("upload listener stopped");
}

/// Run one session over `io`. Returns the committed id, or `None` when the
/// client went away before the sentinel.
pub async fn handle_session<S>(
    io: S,
    store: &FileStore,
    metrics: &Metrics,
    options: &SessionOptions,
) -> TcshareResult<Option<String>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut framed = Framed::new(io, upload_codec(options.chunk_size));
    let mut writer = store.create().await?;
    metrics.uploads_started.inc();
    debug!(id = %writer.id(), "upload session opened");

    if send(&mut framed, &ServerMessage::ready()).await.is_err() {
        abort(writer, metrics, "client went away").await;
        return Ok(None);
    }

    loop {
        let frame = match tokio::time::timeout(options.idle_timeout, framed.next()).await {
            Err(_) => {
                abort(writer, metrics, "idle timeout").await;
                return Err(TcshareError::transport(format!(
                    "no segment within {}s",
                    options.idle_timeout.as_secs()
                )));
            }
            Ok(None) => {
                abort(writer, metrics, "connection closed before end of upload").await;
                return Ok(None);
            }
            Ok(Some(Err(e))) => {
                abort(writer, metrics, "malformed frame").await;
                return Err(TcshareError::transport(format!("upload channel: {e}")));
            }
            Ok(Some(Ok(frame))) => frame,
        };

        if &frame[..] == END_OF_UPLOAD {
            let id = writer.id().to_string();
            let bytes = writer.end().await?;
            send(&mut framed, &ServerMessage::Accepted { id: id.clone() }).await?;
            metrics.uploads_completed.inc();
            info!(id = %id, bytes, "upload accepted");
            return Ok(Some(id));
        }

        if let Err(e) = writer.write(&frame).await {
            let _ = send(
                &mut framed,
                &ServerMessage::Error {
                    error: e.to_string(),
                },
            )
            .await;
            abort(writer, metrics, "write rejected").await;
            return Err(e);
        }
        metrics.bytes_received.inc_by(frame.len() as u64);

        if send(&mut framed, &ServerMessage::ready()).await.is_err() {
            abort(writer, metrics, "client went away").await;
            return Ok(None);
        }
    }
}

async fn send<S>(
    framed: &mut Framed<S, LengthDelimitedCodec>,
    message: &ServerMessage,
) -> TcshareResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let bytes = message.to_bytes()?;
    framed
        .send(Bytes::from(bytes))
        .await
        .map_err(|e| TcshareError::transport(format!("upload channel: {e}")))
}

async fn abort(writer: ObjectWriter, metrics: &Metrics, reason: &str) {
    let id = writer.id().to_string();
    let bytes = writer.written();
    if let Err(e) = writer.clear().await {
        warn!(id = %id, "failed to clear aborted upload: {e}");
    }
    metrics.uploads_aborted.inc();
    info!(id = %id, bytes, reason, "upload aborted, partial object removed");
}
