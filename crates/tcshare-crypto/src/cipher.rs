//! Two-phase cipher sessions
//!
//! One derived key seals two streams per object. A session starts in
//! [`CipherPhase::Metadata`] under the header IV; once that stream is
//! finalized, [`Encryptor::begin_body`] / [`Decryptor::begin_body`] moves it
//! to [`CipherPhase::Body`] under a fresh IV. The key is never re-derived.

use zeroize::Zeroize;

use tcshare_core::{TcshareError, TcshareResult};

use crate::gcm::{tags_match, GcmStream};
use crate::keys::SecretKey;
use crate::{BLOCK_SIZE, MIN_TAG_SIZE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherPhase {
    Metadata,
    Body,
}

/// Shared phase bookkeeping for both directions.
struct Session {
    key: SecretKey,
    tag_length: usize,
    phase: CipherPhase,
    stream: Option<GcmStream>,
}

impl Session {
    fn new(key: &SecretKey, iv: &[u8], tag_length: usize) -> TcshareResult<Self> {
        if !(MIN_TAG_SIZE..=BLOCK_SIZE).contains(&tag_length) {
            return Err(TcshareError::invalid(format!(
                "tag length must be {MIN_TAG_SIZE}..={BLOCK_SIZE}, got {tag_length}"
            )));
        }
        Ok(Self {
            stream: Some(GcmStream::new(key.as_bytes(), iv)?),
            key: key.clone(),
            tag_length,
            phase: CipherPhase::Metadata,
        })
    }

    fn stream(&mut self) -> TcshareResult<&mut GcmStream> {
        let phase = self.phase;
        self.stream
            .as_mut()
            .ok_or_else(|| TcshareError::invalid(format!("{phase:?} stream already finalized")))
    }

    fn take_stream(&mut self) -> TcshareResult<GcmStream> {
        let phase = self.phase;
        self.stream
            .take()
            .ok_or_else(|| TcshareError::invalid(format!("{phase:?} stream already finalized")))
    }

    fn begin_body(&mut self, iv: &[u8]) -> TcshareResult<()> {
        match (self.phase, self.stream.is_some()) {
            (CipherPhase::Metadata, false) => {
                self.stream = Some(GcmStream::new(self.key.as_bytes(), iv)?);
                self.phase = CipherPhase::Body;
                Ok(())
            }
            (CipherPhase::Metadata, true) => Err(TcshareError::invalid(
                "metadata stream must be finalized before the body begins",
            )),
            (CipherPhase::Body, _) => Err(TcshareError::invalid("body phase already started")),
        }
    }
}

/// Streaming encryptor. Ciphertext has the plaintext's length; the tag comes
/// out once, from [`Encryptor::finalize`].
pub struct Encryptor {
    session: Session,
}

impl Encryptor {
    pub fn new(key: &SecretKey, iv: &[u8], tag_length: usize) -> TcshareResult<Self> {
        Ok(Self {
            session: Session::new(key, iv, tag_length)?,
        })
    }

    pub fn phase(&self) -> CipherPhase {
        self.session.phase
    }

    pub fn encrypt(&mut self, chunk: &[u8]) -> TcshareResult<Vec<u8>> {
        self.session.stream()?.encrypt(chunk)
    }

    /// Close the current stream and return its tag.
    pub fn finalize(&mut self) -> TcshareResult<Vec<u8>> {
        let tag_length = self.session.tag_length;
        let tag = self.session.take_stream()?.finish();
        Ok(tag[..tag_length].to_vec())
    }

    /// Encrypt a whole message and append its tag.
    pub fn seal(&mut self, plaintext: &[u8]) -> TcshareResult<Vec<u8>> {
        let mut out = self.encrypt(plaintext)?;
        out.extend(self.finalize()?);
        Ok(out)
    }

    /// Switch from the finalized metadata stream to the body stream.
    pub fn begin_body(&mut self, iv: &[u8]) -> TcshareResult<()> {
        self.session.begin_body(iv)
    }
}

/// Streaming decryptor. Output of [`Decryptor::decrypt`] is unauthenticated
/// until [`Decryptor::finalize_and_verify`] succeeds.
pub struct Decryptor {
    session: Session,
}

impl Decryptor {
    pub fn new(key: &SecretKey, iv: &[u8], tag_length: usize) -> TcshareResult<Self> {
        Ok(Self {
            session: Session::new(key, iv, tag_length)?,
        })
    }

    pub fn phase(&self) -> CipherPhase {
        self.session.phase
    }

    pub fn decrypt(&mut self, chunk: &[u8]) -> TcshareResult<Vec<u8>> {
        self.session.stream()?.decrypt(chunk)
    }

    /// Decrypt the last chunk, whose trailing `tag_length` bytes are the tag,
    /// and verify the whole stream. The stream is closed either way.
    pub fn finalize_and_verify(&mut self, last_chunk_with_tag: &[u8]) -> TcshareResult<Vec<u8>> {
        let tag_length = self.session.tag_length;
        if last_chunk_with_tag.len() < tag_length {
            self.session.stream = None;
            return Err(TcshareError::Authentication(format!(
                "final chunk of {} bytes cannot hold a {tag_length}-byte tag",
                last_chunk_with_tag.len()
            )));
        }

        let (ciphertext, tag) =
            last_chunk_with_tag.split_at(last_chunk_with_tag.len() - tag_length);
        let mut stream = self.session.take_stream()?;
        let mut plaintext = stream.decrypt(ciphertext)?;
        let computed = stream.finish();

        if !tags_match(&computed, tag) {
            plaintext.zeroize();
            return Err(TcshareError::Authentication(
                "tag mismatch: wrong key or tampered data".into(),
            ));
        }
        Ok(plaintext)
    }

    /// Decrypt and verify a whole sealed message.
    pub fn open(&mut self, sealed: &[u8]) -> TcshareResult<Vec<u8>> {
        self.finalize_and_verify(sealed)
    }

    /// Switch from the verified metadata stream to the body stream.
    pub fn begin_body(&mut self, iv: &[u8]) -> TcshareResult<()> {
        self.session.begin_body(iv)
    }
}
