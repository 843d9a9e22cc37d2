//! Self-hosted backend: tcshared
//!
//! Reads are ranged HTTP GETs. Uploads use a lockstep channel over TCP,
//! one length-delimited frame per message: the server sends
//! `{"status":200}` when ready, the client answers with one segment (or
//! the end-of-upload sentinel), and the server finishes with `{"id":..}`.
//! The next segment is never produced before the previous one is acked.

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use reqwest::StatusCode;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use tcshare_core::config::{StorageConfig, TransferConfig};
use tcshare_core::frame::LENGTH_PREFIX_SIZE;
use tcshare_core::types::{SendResult, ServerMessage, SizeResponse, END_OF_UPLOAD};
use tcshare_core::{TcshareError, TcshareResult};

use super::{ensure_exact, Receiver, Sender};
use crate::upload::UploadPipeline;

/// Header carrying the inclusive start of a ranged read.
pub const RANGE_START_HEADER: &str = "X-Range-Start";
/// Header carrying the exclusive end of a ranged read.
pub const RANGE_END_HEADER: &str = "X-Range-End";

/// Frame codec for the upload channel. Frames must fit the largest segment:
/// a body chunk or the length-prefixed metadata block.
pub fn upload_codec(chunk_size: usize) -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .max_frame_length(chunk_size.max(LENGTH_PREFIX_SIZE + u16::MAX as usize))
        .new_codec()
}

fn http_err(url: &str, e: reqwest::Error) -> TcshareError {
    TcshareError::transport(format!("GET {url}: {e}"))
}

#[derive(Debug, Clone)]
pub struct SelfHostedReceiver {
    client: reqwest::Client,
    base_url: String,
    id: String,
}

impl SelfHostedReceiver {
    pub fn new(server_url: &str, id: &str) -> Self {
        Self::with_client(reqwest::Client::new(), server_url, id)
    }

    pub fn with_client(client: reqwest::Client, server_url: &str, id: &str) -> Self {
        Self {
            client,
            base_url: server_url.trim_end_matches('/').to_string(),
            id: id.to_string(),
        }
    }
}

impl Receiver for SelfHostedReceiver {
    async fn size(&self) -> TcshareResult<u64> {
        let url = format!("{}/api/size/{}", self.base_url, self.id);
        let resp = self.client.get(&url).send().await.map_err(|e| http_err(&url, e))?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(TcshareError::NotFound(self.id.clone()));
        }
        let body: SizeResponse = resp
            .error_for_status()
            .map_err(|e| http_err(&url, e))?
            .json()
            .await
            .map_err(|e| http_err(&url, e))?;
        Ok(body.size)
    }

    async fn receive(&self, from: u64, to: u64) -> TcshareResult<Bytes> {
        let url = format!("{}/api/download/{}", self.base_url, self.id);
        let resp = self
            .client
            .get(&url)
            .header(RANGE_START_HEADER, from)
            .header(RANGE_END_HEADER, to)
            .send()
            .await
            .map_err(|e| http_err(&url, e))?;

        match resp.status() {
            StatusCode::NOT_FOUND => return Err(TcshareError::NotFound(self.id.clone())),
            StatusCode::RANGE_NOT_SATISFIABLE => {
                let size = resp.json::<SizeResponse>().await.map_or(0, |s| s.size);
                return Err(TcshareError::OutOfRange { from, to, size });
            }
            _ => {}
        }

        let data = resp
            .error_for_status()
            .map_err(|e| http_err(&url, e))?
            .bytes()
            .await
            .map_err(|e| http_err(&url, e))?;
        ensure_exact(from, to, &data)?;
        Ok(data)
    }
}

#[derive(Debug, Clone)]
pub struct SelfHostedSender {
    upload_addr: String,
    server_url: String,
    chunk_size: usize,
}

impl SelfHostedSender {
    pub fn new(storage: &StorageConfig, transfer: &TransferConfig) -> Self {
        Self {
            upload_addr: storage.upload_addr.clone(),
            server_url: storage.server_url.trim_end_matches('/').to_string(),
            chunk_size: transfer.chunk_size,
        }
    }
}

impl Sender for SelfHostedSender {
    async fn send(
        &self,
        mut pipeline: UploadPipeline,
        cancel: CancellationToken,
    ) -> TcshareResult<SendResult> {
        let stream = TcpStream::connect(&self.upload_addr)
            .await
            .map_err(|e| TcshareError::transport(format!("connect {}: {e}", self.upload_addr)))?;

        let Some(id) = send_over(stream, &mut pipeline, &cancel, self.chunk_size).await? else {
            return Ok(SendResult::canceled());
        };
        let key_fragment = pipeline.key_fragment().unwrap_or_default().to_string();
        Ok(SendResult {
            share_url: Some(format!("{}/download/{id}#{key_fragment}", self.server_url)),
            id,
            key_fragment,
        })
    }
}

/// Run the client side of the upload channel over `io`. Returns the
/// accepted id, or `None` when cancelled; the channel is dropped without
/// the sentinel so the server discards the partial object.
pub async fn send_over<S>(
    io: S,
    pipeline: &mut UploadPipeline,
    cancel: &CancellationToken,
    chunk_size: usize,
) -> TcshareResult<Option<String>>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let mut framed = Framed::new(io, upload_codec(chunk_size));
    let mut sent = 0usize;

    loop {
        let frame = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!(segments = sent, "upload canceled, closing channel");
                return Ok(None);
            }
            frame = framed.next() => frame,
        };
        let frame = frame
            .ok_or_else(|| {
                TcshareError::transport("upload channel closed before the upload was accepted")
            })?
            .map_err(|e| TcshareError::transport(format!("upload channel: {e}")))?;
        let message = ServerMessage::from_bytes(&frame)
            .map_err(|e| TcshareError::transport(e.to_string()))?;

        match message {
            ServerMessage::Ready { status: 200 } => {
                if cancel.is_cancelled() {
                    info!(segments = sent, "upload canceled, closing channel");
                    return Ok(None);
                }
                let segment = match pipeline.next_segment().await? {
                    Some(segment) => segment,
                    None => Bytes::from_static(END_OF_UPLOAD),
                };
                framed
                    .send(segment)
                    .await
                    .map_err(|e| TcshareError::transport(format!("upload channel: {e}")))?;
                sent += 1;
            }
            ServerMessage::Ready { status } => {
                return Err(TcshareError::transport(format!(
                    "unexpected upload status {status}"
                )))
            }
            ServerMessage::Accepted { id } => {
                if !pipeline.is_finished() {
                    return Err(TcshareError::transport(format!(
                        "server accepted {id} after {sent} segments, before the upload finished"
                    )));
                }
                debug!(id = %id, segments = sent, "upload accepted");
                return Ok(Some(id));
            }
            ServerMessage::Error { error } => {
                return Err(TcshareError::transport(format!("server aborted upload: {error}")))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upload::UploadOptions;

    #[test]
    fn test_codec_fits_metadata_block() {
        let codec = upload_codec(1024);
        assert_eq!(codec.max_frame_length(), 2 + 65535);
        assert_eq!(upload_codec(1 << 20).max_frame_length(), 1 << 20);
    }

    /// Minimal in-process server: acks every frame, answers the sentinel
    /// with an id.
    async fn fake_server(io: tokio::io::DuplexStream) -> Vec<Bytes> {
        let mut framed = Framed::new(io, upload_codec(64 * 1024));
        let ready = Bytes::from(ServerMessage::ready().to_bytes().unwrap());
        let mut received = Vec::new();
        if framed.send(ready.clone()).await.is_err() {
            return received;
        }
        while let Some(Ok(frame)) = framed.next().await {
            if &frame[..] == END_OF_UPLOAD {
                let done = ServerMessage::Accepted { id: "f00d".into() };
                let _ = framed.send(Bytes::from(done.to_bytes().unwrap())).await;
                break;
            }
            received.push(frame.freeze());
            if framed.send(ready.clone()).await.is_err() {
                break;
            }
        }
        received
    }

    #[tokio::test]
    async fn test_lockstep_sends_every_segment_then_sentinel() {
        let (client, server) = tokio::io::duplex(256 * 1024);
        let server = tokio::spawn(fake_server(server));

        let mut pipeline =
            UploadPipeline::new(&b"hello"[..], 5, "h.txt", UploadOptions::default()).unwrap();
        let id = send_over(client, &mut pipeline, &CancellationToken::new(), 64 * 1024)
            .await
            .unwrap();
        assert_eq!(id.as_deref(), Some("f00d"));

        let received = server.await.unwrap();
        assert_eq!(received.len(), 3);
        assert_eq!(received[0].len(), 12 + 1 + 16);
        assert_eq!(received[2].len(), 5 + 16);
    }

    #[tokio::test]
    async fn test_precancelled_sends_nothing() {
        let (client, server) = tokio::io::duplex(1024);
        let server = tokio::spawn(fake_server(server));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let mut pipeline =
            UploadPipeline::new(&b"x"[..], 1, "x", UploadOptions::default()).unwrap();
        let id = send_over(client, &mut pipeline, &cancel, 1024).await.unwrap();
        assert!(id.is_none());
        assert!(server.await.unwrap().is_empty());
        assert!(pipeline.key_fragment().is_none());
    }

    #[tokio::test]
    async fn test_early_accept_is_transport_error() {
        let (client, server) = tokio::io::duplex(64 * 1024);
        tokio::spawn(async move {
            let mut framed = Framed::new(server, upload_codec(1024));
            let ready = Bytes::from(ServerMessage::ready().to_bytes().unwrap());
            let _ = framed.send(ready).await;
            let _additional_data = framed.next().await;
            let done = ServerMessage::Accepted { id: "early".into() };
            let _ = framed.send(Bytes::from(done.to_bytes().unwrap())).await;
        });

        let source = std::io::Cursor::new(vec![9u8; 3000]);
        let mut pipeline =
            UploadPipeline::new(source, 3000, "t.bin", UploadOptions::default()).unwrap();
        let err = send_over(client, &mut pipeline, &CancellationToken::new(), 1024)
            .await
            .unwrap_err();
        assert!(matches!(err, TcshareError::Transport(_)));
        assert!(err.to_string().contains("before the upload finished"));
        assert!(!pipeline.is_finished());
    }

    #[tokio::test]
    async fn test_server_error_is_transport_error() {
        let (client, server) = tokio::io::duplex(1024);
        tokio::spawn(async move {
            let mut framed = Framed::new(server, upload_codec(1024));
            let msg = ServerMessage::Error {
                error: "size limit exceeded".into(),
            };
            let _ = framed.send(Bytes::from(msg.to_bytes().unwrap())).await;
        });
        let mut pipeline =
            UploadPipeline::new(&b"x"[..], 1, "x", UploadOptions::default()).unwrap();
        let err = send_over(client, &mut pipeline, &CancellationToken::new(), 1024)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("size limit"));
    }
}
