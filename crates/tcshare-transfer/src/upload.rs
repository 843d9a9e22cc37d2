//! Upload pipeline: file → ordered wire segments
//!
//! Each [`UploadPipeline::next_segment`] call advances exactly one stage:
//!
//! ```text
//! AdditionalData  IV || flag || salt
//! Metadata        u16 len || seal(json(meta) || body_iv)
//! Body            ciphertext chunks, tag appended to the last one
//! Done            None
//! ```

use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use secrecy::{ExposeSecret, SecretString};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, info};

use tcshare_core::config::TransferConfig;
use tcshare_core::types::FileMetadata;
use tcshare_core::{FrameLayout, TcshareError, TcshareResult};
use tcshare_crypto::{
    combine_keys, derive_password_key, encode_fragment, Encryptor, KdfParams, SecretKey,
};

use crate::entropy::EntropySource;
use crate::ProgressFn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStage {
    AdditionalData,
    Metadata,
    Body,
    Done,
}

/// Knobs for one upload.
#[derive(Default)]
pub struct UploadOptions {
    pub transfer: TransferConfig,
    pub password: Option<SecretString>,
    pub entropy: EntropySource,
    pub progress: Option<ProgressFn>,
}

/// Key material and IVs, prepared when the first segment is pulled.
struct Session {
    encryptor: Encryptor,
    salt: Option<Vec<u8>>,
    key_fragment: String,
}

pub struct UploadPipeline {
    source: Box<dyn AsyncRead + Send + Unpin>,
    name: String,
    size: u64,
    stored_size: u64,
    remaining: u64,
    options: UploadOptions,
    layout: FrameLayout,
    stage: UploadStage,
    session: Option<Session>,
}

impl UploadPipeline {
    /// `size` must be the exact byte length `source` will yield.
    pub fn new(
        source: impl AsyncRead + Send + Unpin + 'static,
        size: u64,
        name: impl Into<String>,
        options: UploadOptions,
    ) -> TcshareResult<Self> {
        options.transfer.validate()?;
        let name = name.into();
        let stored_size = stored_size(&options, &name, size)?;
        if let Some(limit) = options.transfer.size_limit() {
            if stored_size > limit {
                return Err(TcshareError::SizeLimit { limit });
            }
        }
        Ok(Self {
            source: Box::new(source),
            name,
            size,
            stored_size,
            remaining: size,
            layout: options.transfer.layout(),
            options,
            stage: UploadStage::AdditionalData,
            session: None,
        })
    }

    pub async fn from_path(path: &Path, options: UploadOptions) -> TcshareResult<Self> {
        let file = tokio::fs::File::open(path).await?;
        let size = file.metadata().await?.len();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| TcshareError::invalid(format!("not a file: {}", path.display())))?;
        Self::new(file, size, name, options)
    }

    pub fn stage(&self) -> UploadStage {
        self.stage
    }

    pub fn is_finished(&self) -> bool {
        self.stage == UploadStage::Done
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Bytes the finished object will occupy on the server.
    pub fn stored_size(&self) -> u64 {
        self.stored_size
    }

    /// Share-link fragment: base64 of the random key. The password-derived
    /// part never leaves this process. `None` until the pipeline has started.
    pub fn key_fragment(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.key_fragment.as_str())
    }

    /// Produce the next wire segment, or `None` once everything is out.
    pub async fn next_segment(&mut self) -> TcshareResult<Option<Bytes>> {
        let segment = match self.stage {
            UploadStage::AdditionalData => self.additional_data().await?,
            UploadStage::Metadata => self.metadata().await?,
            UploadStage::Body => self.body_chunk().await?,
            UploadStage::Done => return Ok(None),
        };
        Ok(Some(Bytes::from(segment)))
    }

    async fn additional_data(&mut self) -> TcshareResult<Vec<u8>> {
        let transfer = &self.options.transfer;
        let entropy = &self.options.entropy;

        let random_key = SecretKey::from_bytes(entropy.random(transfer.key_length).await?)?;
        let header_iv = entropy.random(transfer.iv_length).await?;

        let (key, salt) = match &self.options.password {
            Some(password) => {
                let salt = entropy.random(transfer.salt_length).await?;
                let password_key = derive_key_blocking(password, &salt, transfer).await?;
                (combine_keys(&random_key, &password_key)?, Some(salt))
            }
            None => (random_key.clone(), None),
        };

        let segment = self
            .layout
            .encode_additional_data(&header_iv, salt.as_deref())?;
        self.session = Some(Session {
            encryptor: Encryptor::new(&key, &header_iv, transfer.auth_tag_length)?,
            salt,
            key_fragment: encode_fragment(random_key.as_bytes()),
        });
        self.stage = UploadStage::Metadata;
        debug!(name = %self.name, password = self.options.password.is_some(), "upload started");
        Ok(segment)
    }

    async fn metadata(&mut self) -> TcshareResult<Vec<u8>> {
        let body_iv = self
            .options
            .entropy
            .random(self.options.transfer.iv_length)
            .await?;
        let session = self.session.as_mut().ok_or_else(not_started)?;

        let metadata = FileMetadata {
            name: self.name.clone(),
            size: self.size,
            salt: session.salt.as_ref().map(|s| STANDARD.encode(s)),
        };
        let mut plaintext = metadata.to_bytes()?;
        plaintext.extend_from_slice(&body_iv);

        let sealed = session.encryptor.seal(&plaintext)?;
        session.encryptor.begin_body(&body_iv)?;

        let segment = self.layout.encode_metadata_segment(&sealed)?;
        self.stage = UploadStage::Body;
        Ok(segment)
    }

    async fn body_chunk(&mut self) -> TcshareResult<Vec<u8>> {
        let want = self
            .remaining
            .min(self.options.transfer.plaintext_chunk_size() as u64) as usize;
        let mut plaintext = vec![0u8; want];
        if let Err(e) = self.source.read_exact(&mut plaintext).await {
            return Err(match e.kind() {
                std::io::ErrorKind::UnexpectedEof => TcshareError::transport(format!(
                    "source ended early: {} of {} bytes read",
                    self.size - self.remaining,
                    self.size
                )),
                _ => e.into(),
            });
        }
        self.remaining -= want as u64;

        if let Some(cb) = &self.options.progress {
            cb(want as u64);
        }

        let session = self.session.as_mut().ok_or_else(not_started)?;
        let mut segment = session.encryptor.encrypt(&plaintext)?;
        if self.remaining == 0 {
            segment.extend(session.encryptor.finalize()?);
            self.stage = UploadStage::Done;
            info!(name = %self.name, bytes = self.size, "upload stream complete");
        }
        Ok(segment)
    }
}

/// Exact object size for `size` plaintext bytes. The metadata JSON length
/// depends only on the salt width, never on its random content.
fn stored_size(options: &UploadOptions, name: &str, size: u64) -> TcshareResult<u64> {
    let transfer = &options.transfer;
    let metadata = FileMetadata {
        name: name.to_owned(),
        size,
        salt: options
            .password
            .as_ref()
            .map(|_| STANDARD.encode(vec![0u8; transfer.salt_length])),
    };
    let sealed_len = metadata.to_bytes()?.len() + transfer.iv_length + transfer.auth_tag_length;
    let overhead = transfer.layout().min_object_size(sealed_len);
    overhead
        .checked_add(size)
        .ok_or_else(|| TcshareError::invalid(format!("file too large: {size} bytes")))
}

fn not_started() -> TcshareError {
    TcshareError::invalid("upload session not started")
}

/// Argon2id is CPU and memory heavy; keep it off the async workers.
pub(crate) async fn derive_key_blocking(
    password: &SecretString,
    salt: &[u8],
    transfer: &TransferConfig,
) -> TcshareResult<SecretKey> {
    let password = SecretString::from(password.expose_secret().to_owned());
    let salt = salt.to_vec();
    let key_length = transfer.key_length;
    let params = KdfParams::from(&transfer.kdf);
    tokio::task::spawn_blocking(move || {
        derive_password_key(&password, &salt, key_length, &params)
    })
    .await
    .map_err(|e| TcshareError::Other(anyhow::anyhow!("KDF task failed: {e}")))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;
    use tcshare_core::config::KdfConfig;
    use tcshare_crypto::decode_fragment;

    fn transfer(chunk_size: usize) -> TransferConfig {
        TransferConfig {
            chunk_size,
            kdf: KdfConfig {
                mem_cost_kib: 1024,
                time_cost: 1,
                parallelism: 1,
            },
            ..Default::default()
        }
    }

    async fn collect(mut p: UploadPipeline) -> Vec<Bytes> {
        let mut out = Vec::new();
        while let Some(seg) = p.next_segment().await.unwrap() {
            out.push(seg);
        }
        out
    }

    #[tokio::test]
    async fn test_ten_byte_file_iv16() {
        let options = UploadOptions {
            transfer: TransferConfig {
                iv_length: 16,
                ..transfer(64 * 1024)
            },
            ..Default::default()
        };
        let p = UploadPipeline::new(&b"0123456789"[..], 10, "ten.txt", options).unwrap();
        let segments = collect(p).await;
        assert_eq!(segments.len(), 3);

        // IV 16 + flag 1 + zero salt 16
        let ad = &segments[0];
        assert_eq!(ad.len(), 33);
        assert_eq!(ad[16], 0);
        assert!(ad[17..].iter().all(|b| *b == 0));

        let meta = &segments[1];
        let declared = u16::from_be_bytes([meta[0], meta[1]]) as usize;
        assert_eq!(declared, meta.len() - 2);

        // 10 bytes of ciphertext + 16-byte tag, no splitting
        assert_eq!(segments[2].len(), 10 + 16);
    }

    #[tokio::test]
    async fn test_stage_progression_and_fragment_timing() {
        let mut p = UploadPipeline::new(&b"abc"[..], 3, "a", UploadOptions::default()).unwrap();
        assert_eq!(p.stage(), UploadStage::AdditionalData);
        assert!(p.key_fragment().is_none());

        p.next_segment().await.unwrap().unwrap();
        assert_eq!(p.stage(), UploadStage::Metadata);
        let fragment = p.key_fragment().unwrap().to_string();
        assert_eq!(decode_fragment(&fragment).unwrap().len(), 32);

        p.next_segment().await.unwrap().unwrap();
        assert_eq!(p.stage(), UploadStage::Body);
        p.next_segment().await.unwrap().unwrap();
        assert!(p.is_finished());
        assert!(p.next_segment().await.unwrap().is_none());
        assert_eq!(p.key_fragment().unwrap(), fragment);
    }

    #[tokio::test]
    async fn test_segment_sizes_respect_chunk_size() {
        let chunk = 64usize;
        let data = vec![7u8; 200];
        let options = UploadOptions {
            transfer: transfer(chunk),
            ..Default::default()
        };
        let pipeline = UploadPipeline::new(std::io::Cursor::new(data), 200, "x", options).unwrap();
        let segments = collect(pipeline).await;
        let body = &segments[2..];
        // 48 plaintext bytes per chunk: 48+48+48+48+8
        assert_eq!(body.len(), 5);
        assert!(body.iter().all(|s| s.len() <= chunk));
        assert_eq!(body.last().unwrap().len(), 8 + 16);
        assert_eq!(body.iter().map(|s| s.len()).sum::<usize>(), 200 + 16);
    }

    #[tokio::test]
    async fn test_empty_file_has_tag_only_body() {
        let pipeline = UploadPipeline::new(&b""[..], 0, "empty", UploadOptions::default()).unwrap();
        let segments = collect(pipeline).await;
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[2].len(), 16);
    }

    #[tokio::test]
    async fn test_password_sets_flag_and_salt() {
        let options = UploadOptions {
            transfer: transfer(1024),
            password: Some(SecretString::from("secret")),
            ..Default::default()
        };
        let mut p = UploadPipeline::new(&b"hi"[..], 2, "pw", options).unwrap();
        let ad = p.next_segment().await.unwrap().unwrap();
        assert_eq!(ad[12], 1);
        assert!(ad[13..].iter().any(|b| *b != 0), "salt must be random");
        assert_eq!(decode_fragment(p.key_fragment().unwrap()).unwrap().len(), 32);
    }

    #[tokio::test]
    async fn test_progress_reports_plaintext_lengths() {
        let seen = Arc::new(AtomicU64::new(0));
        let calls = Arc::new(AtomicU64::new(0));
        let (s, c) = (seen.clone(), calls.clone());
        let options = UploadOptions {
            transfer: transfer(64),
            progress: Some(Box::new(move |n| {
                s.fetch_add(n, Ordering::SeqCst);
                c.fetch_add(1, Ordering::SeqCst);
            })),
            ..Default::default()
        };
        let source = std::io::Cursor::new(vec![1u8; 100]);
        collect(UploadPipeline::new(source, 100, "p", options).unwrap()).await;
        assert_eq!(seen.load(Ordering::SeqCst), 100);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_short_source_is_transport_error() {
        let mut p = UploadPipeline::new(&b"short"[..], 50, "s", UploadOptions::default()).unwrap();
        p.next_segment().await.unwrap();
        p.next_segment().await.unwrap();
        let err = p.next_segment().await.unwrap_err();
        assert!(matches!(err, TcshareError::Transport(_)));
    }

    #[test]
    fn test_rejects_oversized_and_bad_config() {
        let options = UploadOptions {
            transfer: TransferConfig {
                max_file_size: 10,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(matches!(
            UploadPipeline::new(&b""[..], 0, "big", options),
            Err(TcshareError::SizeLimit { limit: 10 })
        ));

        let options = UploadOptions {
            transfer: TransferConfig {
                key_length: 20,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(UploadPipeline::new(&b""[..], 0, "bad", options).is_err());
    }

    #[tokio::test]
    async fn test_stored_size_matches_emitted_bytes() {
        for password in [None, Some(SecretString::from("pw"))] {
            let options = UploadOptions {
                transfer: transfer(64),
                password,
                ..Default::default()
            };
            let source = std::io::Cursor::new(vec![3u8; 150]);
            let pipeline = UploadPipeline::new(source, 150, "sized.bin", options).unwrap();
            let expected = pipeline.stored_size();
            let emitted: usize = collect(pipeline).await.iter().map(|s| s.len()).sum();
            assert_eq!(emitted as u64, expected);
        }
    }

    #[test]
    fn test_size_limit_counts_stored_bytes() {
        let exact = UploadPipeline::new(&b""[..], 1990, "edge.bin", UploadOptions::default())
            .unwrap()
            .stored_size();
        assert!(exact > 1990);

        let at_limit = UploadOptions {
            transfer: TransferConfig {
                max_file_size: exact,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(UploadPipeline::new(&b""[..], 1990, "edge.bin", at_limit).is_ok());

        let below = UploadOptions {
            transfer: TransferConfig {
                max_file_size: exact - 1,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(matches!(
            UploadPipeline::new(&b""[..], 1990, "edge.bin", below),
            Err(TcshareError::SizeLimit { .. })
        ));
    }

    #[tokio::test]
    async fn test_from_path_uses_file_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.pdf");
        tokio::fs::write(&path, b"%PDF").await.unwrap();
        let p = UploadPipeline::from_path(&path, UploadOptions::default()).await.unwrap();
        assert_eq!(p.name(), "report.pdf");
        assert_eq!(p.size(), 4);
    }
}
