//! OpenDAL operator for the object-store backend

use anyhow::{Context, Result};
use opendal::Operator;
use tracing::warn;

use tcshare_core::config::StorageConfig;

/// S3 access key pair.
#[derive(Clone)]
pub struct S3Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl std::fmt::Debug for S3Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .finish()
    }
}

impl S3Credentials {
    /// `AWS_*` variables first, then the `TCSHARE_*` fallbacks.
    pub fn from_env() -> Result<Self> {
        let lookup = |aws: &str, ours: &str| {
            std::env::var(aws)
                .or_else(|_| std::env::var(ours))
                .with_context(|| format!("S3 credentials not set: export {aws} (or {ours})"))
        };
        Ok(Self {
            access_key_id: lookup("AWS_ACCESS_KEY_ID", "TCSHARE_ACCESS_KEY_ID")?,
            secret_access_key: lookup("AWS_SECRET_ACCESS_KEY", "TCSHARE_SECRET_ACCESS_KEY")?,
        })
    }
}

/// Refuse plaintext endpoints under `enforce_tls`, warn otherwise.
pub fn check_endpoint_tls(storage: &StorageConfig) -> Result<()> {
    if !storage.endpoint.starts_with("http://") {
        return Ok(());
    }
    if storage.enforce_tls {
        anyhow::bail!(
            "S3 endpoint {} is plaintext HTTP but storage.enforce_tls is set",
            storage.endpoint
        );
    }
    warn!(
        endpoint = %storage.endpoint,
        "S3 endpoint is plaintext HTTP; set storage.enforce_tls for production"
    );
    Ok(())
}

/// Operator rooted at `storage.prefix` in `storage.bucket`, with logging and
/// jittered retries. Path-style addressing (the opendal default) keeps
/// SeaweedFS and MinIO working.
pub fn build_operator(storage: &StorageConfig, credentials: &S3Credentials) -> Result<Operator> {
    check_endpoint_tls(storage)?;

    let root = format!("/{}", storage.prefix.trim_matches('/'));
    let builder = opendal::services::S3::default()
        .endpoint(&storage.endpoint)
        .region(&storage.region)
        .bucket(&storage.bucket)
        .root(&root)
        .access_key_id(&credentials.access_key_id)
        .secret_access_key(&credentials.secret_access_key);

    Ok(Operator::new(builder)
        .with_context(|| format!("S3 operator for bucket {}", storage.bucket))?
        .layer(opendal::layers::LoggingLayer::default())
        .layer(opendal::layers::RetryLayer::new().with_max_times(5).with_jitter())
        .finish())
}
