//! tcshare-transfer: encrypted chunked transfer protocol
//!
//! - [`upload::UploadPipeline`]: file → ordered wire segments
//!   (additional data, metadata block, body chunks)
//! - [`download::DownloadPipeline`]: ranged reads → verified plaintext
//! - [`backend`]: `Receiver`/`Sender` contracts with a self-hosted and an
//!   object-store implementation, selected by configuration

pub mod backend;
pub mod download;
pub mod entropy;
pub mod upload;

pub use backend::{AnyReceiver, AnySender, Receiver, Sender};
pub use download::{DownloadPipeline, KeyInput};
pub use entropy::EntropySource;
pub use upload::{UploadOptions, UploadPipeline, UploadStage};

/// Progress callback, invoked with the plaintext bytes of each chunk.
pub type ProgressFn = Box<dyn Fn(u64) + Send + Sync>;

pub use tokio_util::sync::CancellationToken;
