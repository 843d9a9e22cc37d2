//! Object namespace on the local filesystem

use std::path::{Path, PathBuf};

use tcshare_core::config::{DaemonConfig, TransferConfig};
use tcshare_core::{TcshareError, TcshareResult};
use tracing::debug;

use crate::reader::ObjectReader;
use crate::writer::ObjectWriter;

/// Width of an object id: a v4 uuid in simple (undashed) form.
pub const ID_LENGTH: usize = 32;

/// Per-store knobs, usually taken from the daemon and transfer config.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Wire chunk size served by [`ObjectReader::read_chunk`]
    pub chunk_size: usize,
    /// Writer buffer; a full buffer suspends the writer until flushed
    pub write_buffer_bytes: usize,
    /// Cap on bytes per object (None = unlimited)
    pub size_limit: Option<u64>,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self::from_config(&DaemonConfig::default(), &TransferConfig::default())
    }
}

impl StoreOptions {
    pub fn from_config(daemon: &DaemonConfig, transfer: &TransferConfig) -> Self {
        Self {
            chunk_size: transfer.chunk_size,
            write_buffer_bytes: daemon.write_buffer_bytes,
            size_limit: transfer.size_limit(),
        }
    }
}

/// Maps object ids to files under `root`. Each id names exactly one file
/// and is owned by a single session while it is being written.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
    options: StoreOptions,
}

impl FileStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>, options: StoreOptions) -> TcshareResult<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        debug!(root = %root.display(), "file store opened");
        Ok(Self { root, options })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    /// Fresh random id.
    pub fn new_id() -> String {
        uuid::Uuid::new_v4().simple().to_string()
    }

    /// Ids are 32 lowercase hex chars; anything else could escape the root.
    pub fn validate_id(id: &str) -> TcshareResult<()> {
        let well_formed = id.len() == ID_LENGTH
            && id
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if !well_formed {
            return Err(TcshareError::invalid(format!("malformed object id: {id:?}")));
        }
        Ok(())
    }

    pub fn path_for(&self, id: &str) -> TcshareResult<PathBuf> {
        Self::validate_id(id)?;
        Ok(self.root.join(id))
    }

    /// Open an existing object for ranged reads.
    pub async fn reader(&self, id: &str) -> TcshareResult<ObjectReader> {
        let path = self.path_for(id)?;
        ObjectReader::open(&path, id, self.options.chunk_size).await
    }

    /// Create a new object under a fresh id.
    pub async fn create(&self) -> TcshareResult<ObjectWriter> {
        let id = Self::new_id();
        let path = self.path_for(&id)?;
        ObjectWriter::create(
            path,
            id,
            self.options.write_buffer_bytes,
            self.options.size_limit,
        )
        .await
    }

    pub async fn exists(&self, id: &str) -> TcshareResult<bool> {
        Ok(tokio::fs::try_exists(self.path_for(id)?).await?)
    }

    /// Delete an object. Deleting an absent object is not an error.
    pub async fn remove(&self, id: &str) -> TcshareResult<()> {
        match tokio::fs::remove_file(self.path_for(id)?).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Readiness probe: the root exists and accepts new files.
    pub async fn is_writable(&self) -> bool {
        let probe = self.root.join(format!(".probe-{}", Self::new_id()));
        match tokio::fs::write(&probe, b"").await {
            Ok(()) => {
                let _ = tokio::fs::remove_file(&probe).await;
                true
            }
            Err(_) => false,
        }
    }
}
