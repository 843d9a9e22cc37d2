//! Key material: zeroizing key type, key mixing, share-link fragments

use base64::engine::general_purpose::{STANDARD, URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use sha2::{Digest, Sha256};
use zeroize::Zeroize;

use tcshare_core::{TcshareError, TcshareResult};

/// A 128- or 256-bit AES key. Zeroized on drop.
#[derive(Clone)]
pub struct SecretKey {
    bytes: Vec<u8>,
}

impl SecretKey {
    pub fn from_bytes(mut bytes: Vec<u8>) -> TcshareResult<Self> {
        match bytes.len() {
            16 | 32 => Ok(Self { bytes }),
            n => {
                bytes.zeroize();
                Err(TcshareError::invalid(format!(
                    "key must be 16 or 32 bytes, got {n}"
                )))
            }
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl Drop for SecretKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretKey")
            .field("len", &self.bytes.len())
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Mix a random key with a password-derived key: `SHA-256(k1 || k2)`
/// truncated to the key length. The result never equals either input, so
/// the exported random part alone cannot decrypt.
pub fn combine_keys(k1: &SecretKey, k2: &SecretKey) -> TcshareResult<SecretKey> {
    if k1.len() != k2.len() {
        return Err(TcshareError::invalid(format!(
            "cannot combine keys of {} and {} bytes",
            k1.len(),
            k2.len()
        )));
    }
    let mut hasher = Sha256::new();
    hasher.update(k1.as_bytes());
    hasher.update(k2.as_bytes());
    let mut digest = hasher.finalize();
    let key = SecretKey::from_bytes(digest[..k1.len()].to_vec());
    digest.zeroize();
    key
}

/// Encode key bytes for the `#fragment` part of a share link.
pub fn encode_fragment(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Decode a share-link fragment. URL-safe unpadded is canonical; standard
/// and padded alphabets are accepted for pasted keys.
pub fn decode_fragment(fragment: &str) -> TcshareResult<Vec<u8>> {
    let fragment = fragment.trim();
    URL_SAFE_NO_PAD
        .decode(fragment)
        .or_else(|_| URL_SAFE.decode(fragment))
        .or_else(|_| STANDARD.decode(fragment))
        .map_err(|e| TcshareError::invalid(format!("key fragment is not base64: {e}")))
}
