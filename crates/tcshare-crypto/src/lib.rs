//! tcshare-crypto: cipher engine for encrypted chunked transfers
//!
//! Key material:
//! ```text
//! no password:  key = R                        fragment = b64(R)
//! password:     key = SHA-256(R || Argon2id(pw, salt))[..len]
//!                                              fragment = b64(R)
//! ```
//! `R` is mixed from local and (optionally) server randomness. One key seals
//! two AES-GCM streams per object: the metadata block under the header IV,
//! then the body under a fresh IV carried inside the sealed metadata.

pub mod cipher;
mod gcm;
pub mod kdf;
pub mod keys;
pub mod random;

pub use cipher::{CipherPhase, Decryptor, Encryptor};
pub use kdf::{derive_password_key, KdfParams};
pub use keys::{combine_keys, decode_fragment, encode_fragment, SecretKey};
pub use random::{local_random, mix_random, MAX_RANDOM_SIZE};

/// AES-GCM block width; also the widest supported tag.
pub const BLOCK_SIZE: usize = 16;

/// Narrowest tag accepted.
pub const MIN_TAG_SIZE: usize = 12;
