//! Digests and typed handles.
//!
//! The hash function is a capability parameter: anything implementing
//! [`HashProtocol`] (a 256-bit [`digest::Digest`]) can address content.
//! A [`Digest`] is the raw 32-byte identifier; a [`Handle`] pairs a digest
//! with a phantom kind so that contents, node and commit addresses cannot be
//! confused even though they share one physical store.

use std::fmt;
use std::marker::PhantomData;

use digest::typenum::U32;
use hex::FromHex;
use hex::FromHexError;

/// A trait for hash functions usable as content addresses.
///
/// Implemented by hash functions producing a 256-bit digest.
pub trait HashProtocol: digest::Digest<OutputSize = U32> + Clone + Send + 'static {
    const NAME: &'static str;
}

use blake2::Blake2b as Blake2bUnsized;
pub type Blake2b = Blake2bUnsized<U32>;

pub use blake3::Hasher as Blake3;

impl HashProtocol for Blake2b {
    const NAME: &'static str = "blake2";
}

impl HashProtocol for Blake3 {
    const NAME: &'static str = "blake3";
}

/// The width of every digest in bytes.
pub const DIGEST_LEN: usize = 32;

/// The raw byte form of a digest.
pub type RawDigest = [u8; DIGEST_LEN];

/// A 256-bit content address produced by a [`HashProtocol`].
///
/// Equality is byte equality; the protocol only appears in the phantom
/// parameter and the textual rendering.
#[repr(transparent)]
pub struct Digest<H> {
    pub raw: RawDigest,
    _hasher: PhantomData<fn(H) -> ()>,
}

impl<H> Digest<H> {
    pub const fn new(raw: RawDigest) -> Self {
        Digest {
            raw,
            _hasher: PhantomData,
        }
    }
}

impl<H: HashProtocol> Digest<H> {
    /// Hashes `bytes` with the protocol `H`.
    pub fn of_bytes(bytes: &[u8]) -> Self {
        Digest::new(H::digest(bytes).into())
    }

    pub fn from_hex(hex: &str) -> Result<Self, FromHexError> {
        Ok(Digest::new(RawDigest::from_hex(hex)?))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.raw)
    }

    /// Renders the digest with its protocol prefix, e.g. `blake3:ab01…`.
    pub fn to_tagged_string(&self) -> String {
        let mut out = String::new();
        out.push_str(H::NAME);
        out.push(':');
        out.push_str(&hex::encode(self.raw));
        out
    }

    /// Parses a protocol-prefixed digest produced by
    /// [`to_tagged_string`](Self::to_tagged_string).
    pub fn from_tagged_str(s: &str) -> Result<Self, HashError> {
        let protocol = H::NAME;
        let Some(rest) = s.strip_prefix(protocol) else {
            return Err(HashError::BadProtocol);
        };
        let Some(hex_part) = rest.strip_prefix(':') else {
            return Err(HashError::BadProtocol);
        };
        Ok(Digest::from_hex(hex_part)?)
    }
}

/// An error that can occur when parsing a digest from a string.
/// Caused by a wrong protocol prefix or a bad hex encoding.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HashError {
    BadProtocol,
    BadHex(FromHexError),
}

impl From<FromHexError> for HashError {
    fn from(value: FromHexError) -> Self {
        HashError::BadHex(value)
    }
}

impl fmt::Display for HashError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HashError::BadProtocol => write!(f, "digest string has a foreign protocol prefix"),
            HashError::BadHex(e) => write!(f, "digest string is not valid hex: {e}"),
        }
    }
}

impl std::error::Error for HashError {}

// The phantom parameter defeats `derive`, so the usual value impls are
// written out, independent of any bounds on `H`.

impl<H> Clone for Digest<H> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<H> Copy for Digest<H> {}

impl<H> PartialEq for Digest<H> {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl<H> Eq for Digest<H> {}

impl<H> PartialOrd for Digest<H> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<H> Ord for Digest<H> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.raw.cmp(&other.raw)
    }
}

impl<H> std::hash::Hash for Digest<H> {
    fn hash<S: std::hash::Hasher>(&self, state: &mut S) {
        self.raw.hash(state);
    }
}

impl<H> fmt::Debug for Digest<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", hex::encode(self.raw))
    }
}

/// Marker for handles addressing user contents.
pub struct ContentsKind;
/// Marker for handles addressing tree nodes.
pub struct NodeKind;
/// Marker for handles addressing commits.
pub struct CommitKind;

/// A digest tagged with the kind of object it addresses.
///
/// Contents, nodes and commits live in one append-only store; the phantom
/// kind keeps their addresses apart at compile time. Converting between
/// kinds is deliberately explicit via [`Handle::digest`] and
/// [`Handle::from_digest`].
#[repr(transparent)]
pub struct Handle<H, K> {
    digest: Digest<H>,
    _kind: PhantomData<fn(K) -> ()>,
}

impl<H, K> Handle<H, K> {
    pub const fn from_digest(digest: Digest<H>) -> Self {
        Handle {
            digest,
            _kind: PhantomData,
        }
    }

    pub fn digest(&self) -> Digest<H> {
        self.digest
    }
}

impl<H, K> Clone for Handle<H, K> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<H, K> Copy for Handle<H, K> {}

impl<H, K> PartialEq for Handle<H, K> {
    fn eq(&self, other: &Self) -> bool {
        self.digest == other.digest
    }
}

impl<H, K> Eq for Handle<H, K> {}

impl<H, K> PartialOrd for Handle<H, K> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<H, K> Ord for Handle<H, K> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.digest.cmp(&other.digest)
    }
}

impl<H, K> std::hash::Hash for Handle<H, K> {
    fn hash<S: std::hash::Hasher>(&self, state: &mut S) {
        self.digest.hash(state);
    }
}

impl<H, K> fmt::Debug for Handle<H, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({})", hex::encode(self.digest.raw))
    }
}
