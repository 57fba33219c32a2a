//! Canonical little-endian framing shared by the node, commit and slice
//! codecs.
//!
//! Every serialized form in this crate is canonical: encoding is
//! deterministic and decoding validates framing strictly, so re-serializing
//! a decoded value yields identical bytes and therefore an identical digest.

use std::fmt;

use crate::hash::DIGEST_LEN;
use crate::hash::RawDigest;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// The buffer ended before the announced frame did.
    Truncated,
    /// A length prefix or tag byte is out of range.
    BadFrame,
    /// A step or tag payload failed to decode.
    BadStep,
    /// Entries are not in canonical order.
    BadOrdering,
    /// The same entry appears twice.
    Redundant,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Truncated => write!(f, "the encoded value is truncated"),
            DecodeError::BadFrame => write!(f, "the encoded value is malformed"),
            DecodeError::BadStep => write!(f, "a path element in the encoded value is malformed"),
            DecodeError::BadOrdering => write!(f, "the encoded entries are not in canonical order"),
            DecodeError::Redundant => write!(f, "the encoded value contains redundant entries"),
        }
    }
}

impl std::error::Error for DecodeError {}

/// Cursor over an encoded buffer.
pub(crate) struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Reader { buf, pos: 0 }
    }

    pub fn is_empty(&self) -> bool {
        self.pos == self.buf.len()
    }

    pub fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        let end = self.pos.checked_add(n).ok_or(DecodeError::BadFrame)?;
        if end > self.buf.len() {
            return Err(DecodeError::Truncated);
        }
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    pub fn u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    pub fn u32(&mut self) -> Result<u32, DecodeError> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes(bytes.try_into().expect("length checked")))
    }

    pub fn u64(&mut self) -> Result<u64, DecodeError> {
        let bytes = self.take(8)?;
        Ok(u64::from_le_bytes(bytes.try_into().expect("length checked")))
    }

    pub fn i64(&mut self) -> Result<i64, DecodeError> {
        let bytes = self.take(8)?;
        Ok(i64::from_le_bytes(bytes.try_into().expect("length checked")))
    }

    pub fn digest(&mut self) -> Result<RawDigest, DecodeError> {
        let bytes = self.take(DIGEST_LEN)?;
        Ok(bytes.try_into().expect("length checked"))
    }

    /// A `u32` length prefix followed by that many bytes.
    pub fn frame(&mut self) -> Result<&'a [u8], DecodeError> {
        let len = self.u32()? as usize;
        self.take(len)
    }

    /// Fails unless the buffer was consumed exactly.
    pub fn finish(self) -> Result<(), DecodeError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(DecodeError::BadFrame)
        }
    }
}

pub(crate) fn put_u8(out: &mut Vec<u8>, v: u8) {
    out.push(v);
}

pub(crate) fn put_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

pub(crate) fn put_u64(out: &mut Vec<u8>, v: u64) {
    out.extend_from_slice(&v.to_le_bytes());
}

pub(crate) fn put_i64(out: &mut Vec<u8>, v: i64) {
    out.extend_from_slice(&v.to_le_bytes());
}

pub(crate) fn put_digest(out: &mut Vec<u8>, raw: &RawDigest) {
    out.extend_from_slice(raw);
}

/// A `u32` length prefix followed by the bytes.
pub(crate) fn put_frame(out: &mut Vec<u8>, bytes: &[u8]) {
    put_u32(out, bytes.len() as u32);
    out.extend_from_slice(bytes);
}
