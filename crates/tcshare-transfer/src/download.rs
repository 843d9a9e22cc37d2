//! Download pipeline: ranged reads → verified plaintext
//!
//! 1. [`DownloadPipeline::fetch_plain_data`] reads the fixed header and the
//!    sealed metadata block (two ranged reads).
//! 2. [`DownloadPipeline::validate`] opens the metadata block with the
//!    caller's key (and password). `Ok(false)` means wrong credentials.
//! 3. [`DownloadPipeline::download_chunk`] streams the body; the last chunk
//!    always carries the whole tag and is verified before it is returned.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use secrecy::SecretString;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use tcshare_core::config::TransferConfig;
use tcshare_core::frame::PlainHeader;
use tcshare_core::types::FileMetadata;
use tcshare_core::{FrameLayout, TcshareError, TcshareResult};
use tcshare_crypto::{combine_keys, decode_fragment, Decryptor, SecretKey};

use crate::backend::Receiver;
use crate::upload::derive_key_blocking;
use crate::ProgressFn;

/// Key as the recipient supplies it.
#[derive(Debug, Clone, Copy)]
pub enum KeyInput<'a> {
    Raw(&'a [u8]),
    /// Share-link fragment (base64)
    Fragment(&'a str),
}

impl KeyInput<'_> {
    fn to_key(self, key_length: usize) -> TcshareResult<SecretKey> {
        let bytes = match self {
            Self::Raw(b) => b.to_vec(),
            Self::Fragment(f) => decode_fragment(f)?,
        };
        if bytes.len() != key_length {
            return Err(TcshareError::invalid(format!(
                "key must be {key_length} bytes, got {}",
                bytes.len()
            )));
        }
        SecretKey::from_bytes(bytes)
    }
}

impl<'a> From<&'a str> for KeyInput<'a> {
    fn from(fragment: &'a str) -> Self {
        Self::Fragment(fragment)
    }
}

impl<'a> From<&'a [u8]> for KeyInput<'a> {
    fn from(raw: &'a [u8]) -> Self {
        Self::Raw(raw)
    }
}

/// Half-open byte range of one body chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRange {
    pub start: u64,
    pub end: u64,
    /// Carries the tag; must go through finalize-and-verify
    pub last: bool,
}

/// Range of the chunk starting at `cursor`, or `None` once past the object.
///
/// Chunks are `chunk_size` wide over `[body_start, size - tag)`; the chunk
/// that reaches `size - tag` is stretched to `size` so the tag is never
/// split across reads. An empty body yields a single tag-only chunk.
pub fn chunk_range(
    cursor: u64,
    object_size: u64,
    chunk_size: u64,
    tag_length: u64,
) -> Option<ChunkRange> {
    if cursor >= object_size {
        return None;
    }
    let body_end = object_size.saturating_sub(tag_length);
    let end = cursor.saturating_add(chunk_size).min(body_end);
    if end >= body_end {
        Some(ChunkRange {
            start: cursor,
            end: object_size,
            last: true,
        })
    } else {
        Some(ChunkRange {
            start: cursor,
            end,
            last: false,
        })
    }
}

struct PlainData {
    header: PlainHeader,
    sealed_metadata: Bytes,
    size: u64,
}

pub struct DownloadPipeline<R> {
    receiver: R,
    transfer: TransferConfig,
    layout: FrameLayout,
    progress: Option<ProgressFn>,
    plain: Option<PlainData>,
    metadata: Option<FileMetadata>,
    decryptor: Option<Decryptor>,
    cursor: u64,
    delivered: u64,
}

impl<R: Receiver> DownloadPipeline<R> {
    pub fn new(receiver: R, transfer: TransferConfig) -> TcshareResult<Self> {
        transfer.validate()?;
        Ok(Self {
            receiver,
            layout: transfer.layout(),
            transfer,
            progress: None,
            plain: None,
            metadata: None,
            decryptor: None,
            cursor: 0,
            delivered: 0,
        })
    }

    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Read the header and the sealed metadata block.
    pub async fn fetch_plain_data(&mut self) -> TcshareResult<()> {
        let size = self.receiver.size().await?;
        let header_len = self.layout.metadata_start() as u64;
        if size < header_len {
            return Err(TcshareError::invalid(format!(
                "object of {size} bytes is shorter than its {header_len}-byte header"
            )));
        }

        let header_bytes = self.receiver.receive(0, header_len).await?;
        let header = self.layout.parse_header(&header_bytes)?;

        let min = self.layout.min_object_size(header.metadata_length);
        if size < min {
            return Err(TcshareError::invalid(format!(
                "object of {size} bytes is truncated (at least {min} expected)"
            )));
        }

        let range = self.layout.metadata_range(header.metadata_length);
        let sealed_metadata = self
            .receiver
            .receive(range.start as u64, range.end as u64)
            .await?;

        debug!(size, password = header.password, "plain data fetched");
        self.plain = Some(PlainData {
            header,
            sealed_metadata,
            size,
        });
        Ok(())
    }

    /// Answerable before any key is known.
    pub fn password_required(&self) -> TcshareResult<bool> {
        Ok(self.plain()?.header.password)
    }

    /// Encrypted object size, once the plain data is fetched.
    pub fn object_size(&self) -> Option<u64> {
        self.plain.as_ref().map(|p| p.size)
    }

    /// Try a key (and password). `Ok(false)` means the metadata tag did not
    /// verify: wrong key or wrong password. The pipeline stays usable for
    /// another attempt.
    pub async fn validate(
        &mut self,
        key: KeyInput<'_>,
        password: Option<&SecretString>,
    ) -> TcshareResult<bool> {
        let random_key = key.to_key(self.transfer.key_length)?;
        let (header, sealed) = {
            let plain = self.plain()?;
            (plain.header.clone(), plain.sealed_metadata.clone())
        };

        let key = if header.password {
            let password = password
                .ok_or_else(|| TcshareError::invalid("object is password protected"))?;
            let password_key = derive_key_blocking(password, &header.salt, &self.transfer).await?;
            combine_keys(&random_key, &password_key)?
        } else {
            random_key
        };

        let mut decryptor = Decryptor::new(&key, &header.iv, self.transfer.auth_tag_length)?;
        let plaintext = match decryptor.open(&sealed) {
            Ok(p) => p,
            Err(e) if e.is_authentication() => {
                debug!("metadata did not verify: wrong key or password");
                return Ok(false);
            }
            Err(e) => return Err(e),
        };

        let iv_length = self.transfer.iv_length;
        if plaintext.len() < iv_length {
            return Err(TcshareError::invalid("metadata block too short for body IV"));
        }
        let (json, body_iv) = plaintext.split_at(plaintext.len() - iv_length);
        let metadata = FileMetadata::from_bytes(json)?;
        decryptor.begin_body(body_iv)?;

        self.cursor = self.layout.body_start(header.metadata_length) as u64;
        info!(name = %metadata.name, size = metadata.size, "key validated");
        self.metadata = Some(metadata);
        self.decryptor = Some(decryptor);
        self.delivered = 0;
        Ok(true)
    }

    pub fn metadata(&self) -> Option<&FileMetadata> {
        self.metadata.as_ref()
    }

    /// Next decrypted chunk, or `None` when the body is exhausted. The
    /// chunk that carries the tag is returned only after it verifies.
    pub async fn download_chunk(&mut self) -> TcshareResult<Option<Bytes>> {
        let size = self.plain()?.size;
        let Some(range) = chunk_range(
            self.cursor,
            size,
            self.transfer.chunk_size as u64,
            self.transfer.auth_tag_length as u64,
        ) else {
            return Ok(None);
        };

        let data = self.receiver.receive(range.start, range.end).await?;
        let decryptor = self
            .decryptor
            .as_mut()
            .ok_or_else(|| TcshareError::invalid("download not validated"))?;

        let plaintext = if range.last {
            let plaintext = decryptor.finalize_and_verify(&data);
            self.decryptor = None;
            plaintext?
        } else {
            decryptor.decrypt(&data)?
        };

        self.cursor = range.end;
        self.delivered += plaintext.len() as u64;
        if let Some(cb) = &self.progress {
            cb(plaintext.len() as u64);
        }

        if range.last {
            let expected = self.metadata.as_ref().map_or(0, |m| m.size);
            if self.delivered != expected {
                return Err(TcshareError::invalid(format!(
                    "body holds {} bytes but metadata declares {expected}",
                    self.delivered
                )));
            }
        }
        Ok(Some(Bytes::from(plaintext)))
    }

    /// Stream the body into `dest`. Bytes land in a temporary sibling that is
    /// renamed into place only after the tag verifies, and removed otherwise.
    pub async fn download_to_path(&mut self, dest: &Path) -> TcshareResult<u64> {
        let tmp = partial_path(dest)?;
        match self.write_verified(&tmp).await {
            Ok(bytes) => {
                tokio::fs::rename(&tmp, dest).await?;
                info!(path = %dest.display(), bytes, "download complete");
                Ok(bytes)
            }
            Err(e) => {
                if let Err(rm) = tokio::fs::remove_file(&tmp).await {
                    if rm.kind() != std::io::ErrorKind::NotFound {
                        warn!(path = %tmp.display(), "failed to remove partial download: {rm}");
                    }
                }
                Err(e)
            }
        }
    }

    async fn write_verified(&mut self, tmp: &Path) -> TcshareResult<u64> {
        let mut file = tokio::fs::File::create(tmp).await?;
        let mut bytes = 0u64;
        while let Some(chunk) = self.download_chunk().await? {
            file.write_all(&chunk).await?;
            bytes += chunk.len() as u64;
        }
        file.flush().await?;
        file.sync_all().await?;
        Ok(bytes)
    }

    fn plain(&self) -> TcshareResult<&PlainData> {
        self.plain
            .as_ref()
            .ok_or_else(|| TcshareError::invalid("plain data not fetched yet"))
    }
}

fn partial_path(dest: &Path) -> TcshareResult<PathBuf> {
    let name = dest
        .file_name()
        .ok_or_else(|| TcshareError::invalid(format!("not a file path: {}", dest.display())))?;
    let mut tmp = name.to_os_string();
    tmp.push(".tcshare_tmp");
    Ok(dest.with_file_name(tmp))
}
