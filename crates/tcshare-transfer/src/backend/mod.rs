//! Storage backend contracts
//!
//! A [`Receiver`] serves exact half-open byte ranges of one stored object.
//! A [`Sender`] drains an [`UploadPipeline`] into storage and reports the
//! resulting id. Which implementation is used is a configuration value
//! ([`Backend`]), resolved once into [`AnyReceiver`] / [`AnySender`].

pub mod object_store;
pub mod self_hosted;

use std::future::Future;

use bytes::Bytes;
use opendal::Operator;
use tokio_util::sync::CancellationToken;

use tcshare_core::config::{Backend, TcshareConfig};
use tcshare_core::types::SendResult;
use tcshare_core::{TcshareError, TcshareResult};

use crate::upload::UploadPipeline;

pub use object_store::{ObjectStoreReceiver, ObjectStoreSender};
pub use self_hosted::{SelfHostedReceiver, SelfHostedSender};

pub trait Receiver: Send + Sync {
    /// Total stored size of the object.
    fn size(&self) -> impl Future<Output = TcshareResult<u64>> + Send;

    /// Exactly the bytes of `[from, to)`.
    fn receive(&self, from: u64, to: u64) -> impl Future<Output = TcshareResult<Bytes>> + Send;
}

pub trait Sender: Send + Sync {
    /// Drive `pipeline` to completion. Cancelling resolves with
    /// [`SendResult::canceled`] and removes whatever was stored.
    fn send(
        &self,
        pipeline: UploadPipeline,
        cancel: CancellationToken,
    ) -> impl Future<Output = TcshareResult<SendResult>> + Send;
}

/// Reject a read that did not return exactly `to - from` bytes.
pub fn ensure_exact(from: u64, to: u64, data: &Bytes) -> TcshareResult<()> {
    let expected = to.saturating_sub(from);
    if data.len() as u64 != expected {
        return Err(TcshareError::transport(format!(
            "range [{from}, {to}) returned {} bytes, expected {expected}",
            data.len()
        )));
    }
    Ok(())
}

fn operator_required(operator: Option<Operator>) -> TcshareResult<Operator> {
    operator.ok_or_else(|| {
        TcshareError::Config("object_store backend selected but no operator was configured".into())
    })
}

pub enum AnyReceiver {
    SelfHosted(SelfHostedReceiver),
    ObjectStore(ObjectStoreReceiver),
}

impl AnyReceiver {
    /// Receiver for object `id` on the configured backend. `operator` is
    /// only consulted for the object-store backend.
    pub fn from_config(
        config: &TcshareConfig,
        operator: Option<Operator>,
        id: &str,
    ) -> TcshareResult<Self> {
        Ok(match config.storage.backend {
            Backend::SelfHosted => {
                Self::SelfHosted(SelfHostedReceiver::new(&config.storage.server_url, id))
            }
            Backend::ObjectStore => {
                Self::ObjectStore(ObjectStoreReceiver::new(operator_required(operator)?, id))
            }
        })
    }
}

impl Receiver for AnyReceiver {
    async fn size(&self) -> TcshareResult<u64> {
        match self {
            Self::SelfHosted(r) => r.size().await,
            Self::ObjectStore(r) => r.size().await,
        }
    }

    async fn receive(&self, from: u64, to: u64) -> TcshareResult<Bytes> {
        match self {
            Self::SelfHosted(r) => r.receive(from, to).await,
            Self::ObjectStore(r) => r.receive(from, to).await,
        }
    }
}

pub enum AnySender {
    SelfHosted(SelfHostedSender),
    ObjectStore(ObjectStoreSender),
}

impl AnySender {
    pub fn from_config(config: &TcshareConfig, operator: Option<Operator>) -> TcshareResult<Self> {
        Ok(match config.storage.backend {
            Backend::SelfHosted => {
                Self::SelfHosted(SelfHostedSender::new(&config.storage, &config.transfer))
            }
            Backend::ObjectStore => Self::ObjectStore(ObjectStoreSender::new(
                operator_required(operator)?,
                &config.storage,
            )),
        })
    }
}

impl Sender for AnySender {
    async fn send(
        &self,
        pipeline: UploadPipeline,
        cancel: CancellationToken,
    ) -> TcshareResult<SendResult> {
        match self {
            Self::SelfHosted(s) => s.send(pipeline, cancel).await,
            Self::ObjectStore(s) => s.send(pipeline, cancel).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_exact() {
        assert!(ensure_exact(0, 3, &Bytes::from_static(b"abc")).is_ok());
        assert!(ensure_exact(5, 5, &Bytes::new()).is_ok());
        let err = ensure_exact(0, 4, &Bytes::from_static(b"abc")).unwrap_err();
        assert!(matches!(err, TcshareError::Transport(_)));
    }

    #[test]
    fn test_selection_follows_config() {
        let mut config = TcshareConfig::default();
        assert!(matches!(
            AnySender::from_config(&config, None).unwrap(),
            AnySender::SelfHosted(_)
        ));

        config.storage.backend = Backend::ObjectStore;
        assert!(matches!(
            AnySender::from_config(&config, None),
            Err(TcshareError::Config(_))
        ));
        let op = Operator::new(opendal::services::Memory::default())
            .unwrap()
            .finish();
        assert!(matches!(
            AnyReceiver::from_config(&config, Some(op), "obj").unwrap(),
            AnyReceiver::ObjectStore(_)
        ));
    }
}
