//! Where IV and key randomness comes from

use tcshare_core::config::{Backend, StorageConfig};
use tcshare_core::{TcshareError, TcshareResult};
use tcshare_crypto::{mix_random, MAX_RANDOM_SIZE};
use tracing::{debug, warn};

/// Local randomness, optionally mixed with bytes fetched from a tcshared
/// server (`GET {base_url}/api/random/{n}`).
#[derive(Debug, Clone, Default)]
pub enum EntropySource {
    #[default]
    Local,
    Remote {
        client: reqwest::Client,
        base_url: String,
    },
}

impl EntropySource {
    pub fn remote(base_url: impl Into<String>) -> Self {
        Self::Remote {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Remote mixing only applies to the self-hosted backend.
    pub fn from_config(storage: &StorageConfig) -> Self {
        match storage.backend {
            Backend::SelfHosted if storage.remote_entropy => Self::remote(&storage.server_url),
            _ => Self::Local,
        }
    }

    /// `size` random bytes. Remote failures degrade to local-only.
    pub async fn random(&self, size: usize) -> TcshareResult<Vec<u8>> {
        if size > MAX_RANDOM_SIZE {
            return Err(TcshareError::invalid(format!(
                "cannot derive {size} random bytes (max {MAX_RANDOM_SIZE})"
            )));
        }
        match self {
            Self::Local => mix_random(size, None),
            Self::Remote { client, base_url } => match fetch_remote(client, base_url, size).await {
                Ok(remote) => mix_random(size, Some(&remote)),
                Err(e) => {
                    warn!(url = %base_url, "remote entropy unavailable, using local only: {e}");
                    mix_random(size, None)
                }
            },
        }
    }
}

async fn fetch_remote(
    client: &reqwest::Client,
    base_url: &str,
    size: usize,
) -> TcshareResult<Vec<u8>> {
    let url = format!("{base_url}/api/random/{size}");
    let resp = client
        .get(&url)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| TcshareError::transport(format!("GET {url}: {e}")))?;
    let body = resp
        .bytes()
        .await
        .map_err(|e| TcshareError::transport(format!("GET {url}: {e}")))?;
    if body.len() != size {
        return Err(TcshareError::transport(format!(
            "remote entropy returned {} bytes, expected {size}",
            body.len()
        )));
    }
    debug!(size, "mixed remote entropy");
    Ok(body.to_vec())
}
