//! Incremental AES-GCM (NIST SP 800-38D) with empty AAD
//!
//! `aes-gcm` only seals whole messages, and a body here is sealed once across
//! many chunks. This is the same construction split open: AES-CTR (inc32)
//! for the keystream and GHASH over the ciphertext, buffered so chunk
//! boundaries need not fall on 16-byte blocks.

use aes::cipher::{BlockEncrypt, KeyInit, KeyIvInit, StreamCipher};
use aes::{Aes128, Aes256, Block};
use ctr::Ctr32BE;
use ghash::universal_hash::UniversalHash;
use ghash::GHash;
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

use tcshare_core::{TcshareError, TcshareResult};

use crate::BLOCK_SIZE;

/// GCM caps a single message at 2^39 - 256 bits.
const MAX_MESSAGE_BYTES: u64 = (1 << 36) - 32;

enum Keystream {
    Aes128(Ctr32BE<Aes128>),
    Aes256(Ctr32BE<Aes256>),
}

impl Keystream {
    fn apply(&mut self, buf: &mut [u8]) {
        match self {
            Self::Aes128(c) => c.apply_keystream(buf),
            Self::Aes256(c) => c.apply_keystream(buf),
        }
    }
}

/// One GCM message in progress.
pub(crate) struct GcmStream {
    keystream: Keystream,
    ghash: GHash,
    tag_mask: Block,
    pending: Vec<u8>,
    processed: u64,
}

impl GcmStream {
    pub(crate) fn new(key: &[u8], iv: &[u8]) -> TcshareResult<Self> {
        if iv.is_empty() {
            return Err(TcshareError::invalid("IV must not be empty"));
        }

        let mut h = Block::default();
        let block_key = BlockKey::new(key)?;
        block_key.encrypt_block(&mut h);

        let j0 = derive_j0(&h, iv);
        let mut tag_mask = j0;
        block_key.encrypt_block(&mut tag_mask);

        let counter = inc32(j0);
        let keystream = match block_key {
            BlockKey::Aes128(_) => Keystream::Aes128(
                Ctr32BE::<Aes128>::new_from_slices(key, &counter)
                    .map_err(|e| TcshareError::invalid(format!("AES-128-CTR init: {e}")))?,
            ),
            BlockKey::Aes256(_) => Keystream::Aes256(
                Ctr32BE::<Aes256>::new_from_slices(key, &counter)
                    .map_err(|e| TcshareError::invalid(format!("AES-256-CTR init: {e}")))?,
            ),
        };

        Ok(Self {
            keystream,
            ghash: GHash::new(&h),
            tag_mask,
            pending: Vec::with_capacity(BLOCK_SIZE),
            processed: 0,
        })
    }

    pub(crate) fn encrypt(&mut self, plaintext: &[u8]) -> TcshareResult<Vec<u8>> {
        self.check_limit(plaintext.len())?;
        let mut buf = plaintext.to_vec();
        self.keystream.apply(&mut buf);
        self.absorb(&buf);
        Ok(buf)
    }

    pub(crate) fn decrypt(&mut self, ciphertext: &[u8]) -> TcshareResult<Vec<u8>> {
        self.check_limit(ciphertext.len())?;
        self.absorb(ciphertext);
        let mut buf = ciphertext.to_vec();
        self.keystream.apply(&mut buf);
        Ok(buf)
    }

    /// Full 16-byte tag over everything processed so far.
    pub(crate) fn finish(mut self) -> Block {
        if !self.pending.is_empty() {
            self.ghash.update_padded(&self.pending);
            self.pending.zeroize();
        }
        let mut lengths = Block::default();
        // AAD is always empty: its bit length stays zero in lengths[..8]
        lengths[8..].copy_from_slice(&(self.processed * 8).to_be_bytes());
        self.ghash.update(&[lengths]);

        let mut tag = self.ghash.finalize();
        for (t, m) in tag.iter_mut().zip(self.tag_mask.iter()) {
            *t ^= m;
        }
        tag
    }

    fn check_limit(&self, len: usize) -> TcshareResult<()> {
        if self.processed + len as u64 > MAX_MESSAGE_BYTES {
            return Err(TcshareError::invalid(
                "stream exceeds the AES-GCM message size limit",
            ));
        }
        Ok(())
    }

    fn absorb(&mut self, ciphertext: &[u8]) {
        self.processed += ciphertext.len() as u64;
        let mut data = ciphertext;

        if !self.pending.is_empty() {
            let take = (BLOCK_SIZE - self.pending.len()).min(data.len());
            self.pending.extend_from_slice(&data[..take]);
            data = &data[take..];
            if self.pending.len() < BLOCK_SIZE {
                return;
            }
            let block = Block::clone_from_slice(&self.pending);
            self.ghash.update(&[block]);
            self.pending.clear();
        }

        let mut blocks = data.chunks_exact(BLOCK_SIZE);
        for chunk in &mut blocks {
            self.ghash.update(&[Block::clone_from_slice(chunk)]);
        }
        self.pending.extend_from_slice(blocks.remainder());
    }
}

/// Compare the leading `expected.len()` bytes of a computed tag in constant time.
pub(crate) fn tags_match(computed: &Block, expected: &[u8]) -> bool {
    if expected.is_empty() || expected.len() > BLOCK_SIZE {
        return false;
    }
    computed[..expected.len()].ct_eq(expected).into()
}

enum BlockKey {
    Aes128(Aes128),
    Aes256(Aes256),
}

impl BlockKey {
    fn new(key: &[u8]) -> TcshareResult<Self> {
        match key.len() {
            16 => Aes128::new_from_slice(key)
                .map(Self::Aes128)
                .map_err(|e| TcshareError::invalid(format!("AES-128 key: {e}"))),
            32 => Aes256::new_from_slice(key)
                .map(Self::Aes256)
                .map_err(|e| TcshareError::invalid(format!("AES-256 key: {e}"))),
            n => Err(TcshareError::invalid(format!(
                "key must be 16 or 32 bytes, got {n}"
            ))),
        }
    }

    fn encrypt_block(&self, block: &mut Block) {
        match self {
            Self::Aes128(c) => c.encrypt_block(block),
            Self::Aes256(c) => c.encrypt_block(block),
        }
    }
}

/// Pre-counter block: `IV || 0^31 || 1` for 96-bit IVs, GHASH of the padded
/// IV and its bit length otherwise.
fn derive_j0(h: &Block, iv: &[u8]) -> Block {
    let mut j0 = Block::default();
    if iv.len() == 12 {
        j0[..12].copy_from_slice(iv);
        j0[15] = 1;
        return j0;
    }

    let mut g = GHash::new(h);
    g.update_padded(iv);
    let mut lengths = Block::default();
    lengths[8..].copy_from_slice(&((iv.len() as u64) * 8).to_be_bytes());
    g.update(&[lengths]);
    g.finalize()
}

fn inc32(mut block: Block) -> Block {
    let mut ctr = [0u8; 4];
    ctr.copy_from_slice(&block[12..]);
    let next = u32::from_be_bytes(ctr).wrapping_add(1);
    block[12..].copy_from_slice(&next.to_be_bytes());
    block
}
