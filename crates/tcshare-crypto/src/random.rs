//! Randomness mixing for keys and IVs
//!
//! Local OS randomness is hashed together with bytes supplied by the server
//! when it is reachable, so neither side alone controls an IV.

use rand::RngCore;
use sha2::{Digest, Sha512};
use zeroize::Zeroize;

use tcshare_core::{TcshareError, TcshareResult};

/// Widest value the combiner can produce (one SHA-512 digest).
pub const MAX_RANDOM_SIZE: usize = 64;

/// `size` bytes straight from the OS generator.
pub fn local_random(size: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; size];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

/// `SHA-512(local || remote)[..size]`, local-only when `remote` is `None`.
pub fn mix_random(size: usize, remote: Option<&[u8]>) -> TcshareResult<Vec<u8>> {
    if size > MAX_RANDOM_SIZE {
        return Err(TcshareError::invalid(format!(
            "cannot derive {size} random bytes (max {MAX_RANDOM_SIZE})"
        )));
    }

    let mut local = local_random(MAX_RANDOM_SIZE);
    let mut hasher = Sha512::new();
    hasher.update(&local);
    local.zeroize();
    if let Some(remote) = remote {
        hasher.update(remote);
    }
    let mut digest = hasher.finalize();
    let out = digest[..size].to_vec();
    digest.zeroize();
    Ok(out)
}
