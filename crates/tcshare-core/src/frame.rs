//! Stored object frame layout
//!
//! ```text
//! [0 .. iv)                      IV of the metadata phase
//! [iv .. iv+1)                   password flag (0/1)
//! [iv+1 .. iv+1+salt)            salt (zero-filled without password)
//! [.. +2)                        u16 BE: len(encrypted metadata || tag)
//! [.. +len)                      encrypted metadata || tag
//! [.. size-tag)                  body ciphertext
//! [size-tag .. size)             body tag
//! ```
//!
//! Every offset is computed here from the configured widths; no other module
//! hard-codes a position.

use std::ops::Range;

use crate::error::{TcshareError, TcshareResult};

/// Width of the metadata length prefix.
pub const LENGTH_PREFIX_SIZE: usize = 2;

/// Encode a metadata block length as 2 bytes big-endian.
pub fn encode_length(n: usize) -> TcshareResult<[u8; LENGTH_PREFIX_SIZE]> {
    let n = u16::try_from(n).map_err(|_| {
        TcshareError::invalid(format!("metadata block of {n} bytes exceeds u16 length prefix"))
    })?;
    Ok(n.to_be_bytes())
}

/// Decode a 2-byte big-endian metadata block length.
pub fn decode_length(bytes: &[u8]) -> TcshareResult<usize> {
    let arr: [u8; LENGTH_PREFIX_SIZE] = bytes.try_into().map_err(|_| {
        TcshareError::invalid(format!(
            "length prefix must be {LENGTH_PREFIX_SIZE} bytes, got {}",
            bytes.len()
        ))
    })?;
    Ok(u16::from_be_bytes(arr) as usize)
}

/// Field widths of a frame. Pure arithmetic, no I/O.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLayout {
    pub iv_length: usize,
    pub salt_length: usize,
    pub auth_tag_length: usize,
}

/// Fixed-width prefix of a frame, parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlainHeader {
    pub iv: Vec<u8>,
    pub password: bool,
    pub salt: Vec<u8>,
    pub metadata_length: usize,
}

impl FrameLayout {
    pub const fn new(iv_length: usize, salt_length: usize, auth_tag_length: usize) -> Self {
        Self {
            iv_length,
            salt_length,
            auth_tag_length,
        }
    }

    pub fn iv_range(&self) -> Range<usize> {
        0..self.iv_length
    }

    pub fn flag_offset(&self) -> usize {
        self.iv_length
    }

    pub fn salt_range(&self) -> Range<usize> {
        let start = self.flag_offset() + 1;
        start..start + self.salt_length
    }

    pub fn length_range(&self) -> Range<usize> {
        let start = self.salt_range().end;
        start..start + LENGTH_PREFIX_SIZE
    }

    /// Bytes of `IV || flag || salt`, the additional-data segment.
    pub fn additional_data_len(&self) -> usize {
        self.salt_range().end
    }

    /// Everything before the metadata block: `iv + 1 + salt + 2`.
    pub fn metadata_start(&self) -> usize {
        self.length_range().end
    }

    pub fn metadata_range(&self, metadata_length: usize) -> Range<usize> {
        let start = self.metadata_start();
        start..start + metadata_length
    }

    pub fn body_start(&self, metadata_length: usize) -> usize {
        self.metadata_start() + metadata_length
    }

    /// End of body ciphertext; the tag occupies `[body_end, size)`.
    pub fn body_end(&self, object_size: u64) -> TcshareResult<u64> {
        object_size
            .checked_sub(self.auth_tag_length as u64)
            .ok_or_else(|| {
                TcshareError::invalid(format!(
                    "object of {object_size} bytes is shorter than the auth tag"
                ))
            })
    }

    /// Smallest well-formed object for a given metadata length: header,
    /// metadata block, and an empty body carrying only its tag.
    pub fn min_object_size(&self, metadata_length: usize) -> u64 {
        (self.body_start(metadata_length) + self.auth_tag_length) as u64
    }

    /// Serialize `IV || flag || salt`. The salt is zero-filled when absent.
    pub fn encode_additional_data(&self, iv: &[u8], salt: Option<&[u8]>) -> TcshareResult<Vec<u8>> {
        if iv.len() != self.iv_length {
            return Err(TcshareError::invalid(format!(
                "IV must be {} bytes, got {}",
                self.iv_length,
                iv.len()
            )));
        }
        let mut out = Vec::with_capacity(self.additional_data_len());
        out.extend_from_slice(iv);
        match salt {
            Some(salt) => {
                if salt.len() != self.salt_length {
                    return Err(TcshareError::invalid(format!(
                        "salt must be {} bytes, got {}",
                        self.salt_length,
                        salt.len()
                    )));
                }
                out.push(1);
                out.extend_from_slice(salt);
            }
            None => {
                out.push(0);
                out.resize(self.additional_data_len(), 0);
            }
        }
        Ok(out)
    }

    /// Serialize the metadata segment: length prefix then the sealed block.
    pub fn encode_metadata_segment(&self, sealed: &[u8]) -> TcshareResult<Vec<u8>> {
        let prefix = encode_length(sealed.len())?;
        let mut out = Vec::with_capacity(LENGTH_PREFIX_SIZE + sealed.len());
        out.extend_from_slice(&prefix);
        out.extend_from_slice(sealed);
        Ok(out)
    }

    /// Parse the first `metadata_start()` bytes of an object.
    pub fn parse_header(&self, bytes: &[u8]) -> TcshareResult<PlainHeader> {
        if bytes.len() != self.metadata_start() {
            return Err(TcshareError::invalid(format!(
                "header must be {} bytes, got {}",
                self.metadata_start(),
                bytes.len()
            )));
        }
        let password = match bytes[self.flag_offset()] {
            0 => false,
            1 => true,
            other => {
                return Err(TcshareError::invalid(format!(
                    "malformed header: password flag {other}"
                )))
            }
        };
        let metadata_length = decode_length(&bytes[self.length_range()])?;
        if metadata_length < self.auth_tag_length + self.iv_length {
            return Err(TcshareError::invalid(format!(
                "malformed header: metadata block of {metadata_length} bytes cannot hold IV and tag"
            )));
        }
        Ok(PlainHeader {
            iv: bytes[self.iv_range()].to_vec(),
            password,
            salt: bytes[self.salt_range()].to_vec(),
            metadata_length,
        })
    }
}
