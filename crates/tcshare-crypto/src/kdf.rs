//! Key derivation: Argon2id password → key

use argon2::{Algorithm, Argon2, Params, Version};
use secrecy::{ExposeSecret, SecretString};
use zeroize::Zeroize;

use tcshare_core::config::KdfConfig;
use tcshare_core::{TcshareError, TcshareResult};

use crate::keys::SecretKey;

/// Argon2id parameters for KDF
#[derive(Debug, Clone)]
pub struct KdfParams {
    /// Memory cost in KiB (default: 65536 = 64 MiB)
    pub mem_cost_kib: u32,
    /// Time cost / iterations (default: 3)
    pub time_cost: u32,
    /// Parallelism (default: 4)
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self::from(&KdfConfig::default())
    }
}

impl From<&KdfConfig> for KdfParams {
    fn from(cfg: &KdfConfig) -> Self {
        Self {
            mem_cost_kib: cfg.mem_cost_kib,
            time_cost: cfg.time_cost,
            parallelism: cfg.parallelism,
        }
    }
}

/// Derive a `key_length`-byte key from a password and salt using Argon2id.
///
/// The salt is random per upload and stored in the object header; it does
/// not need to be secret.
pub fn derive_password_key(
    password: &SecretString,
    salt: &[u8],
    key_length: usize,
    params: &KdfParams,
) -> TcshareResult<SecretKey> {
    let argon2_params = Params::new(
        params.mem_cost_kib,
        params.time_cost,
        params.parallelism,
        Some(key_length),
    )
    .map_err(|e| TcshareError::invalid(format!("invalid Argon2id params: {e}")))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon2_params);

    let mut key = vec![0u8; key_length];
    if let Err(e) = argon2.hash_password_into(password.expose_secret().as_bytes(), salt, &mut key) {
        key.zeroize();
        return Err(TcshareError::invalid(format!("Argon2id KDF failed: {e}")));
    }

    SecretKey::from_bytes(key)
}
