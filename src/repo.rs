//! Storage capabilities.
//!
//! The engine is written against two backend capabilities and stays
//! agnostic of where bytes live. A [`BlockStore`] is append-only and
//! content-addressed: contents, nodes and commits are three logical stores
//! separated by typed handles over one physical store. A [`NameStore`] is
//! the only mutable state: a map from branch names to commit digests with
//! watch support. Every backend-touching operation returns a future so that
//! in-memory and remote backends present one uniform, cooperative surface.
//!
//! Backends report their own error types; the engine wraps them and never
//! retries backend failures.

pub mod memory;

use std::error::Error;
use std::fmt;
use std::fmt::Debug;
use std::future::Future;

use anybytes::Bytes;

use crate::commit::Commit;
use crate::contents::Contents;
use crate::hash::CommitKind;
use crate::hash::ContentsKind;
use crate::hash::Digest;
use crate::hash::Handle;
use crate::hash::HashProtocol;
use crate::hash::NodeKind;
use crate::merge::Conflict;
use crate::node::Node;
use crate::path::Step;
use crate::watch::HeadStream;
use crate::wire::DecodeError;

/// Capability trait for branch names.
pub trait TagName: Ord + Eq + Clone + Debug + Send + Sync + 'static {
    /// The distinguished default branch.
    fn master() -> Self;

    fn encode(&self, out: &mut Vec<u8>);

    fn decode(bytes: &[u8]) -> Result<Self, DecodeError>;
}

impl TagName for String {
    fn master() -> Self {
        "master".to_string()
    }

    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.as_bytes());
    }

    fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| DecodeError::BadStep)
    }
}

/// Append-only content-addressed storage.
///
/// `add` is idempotent: storing equal bytes yields the same digest and does
/// not grow the store. There are no updates and no deletes.
pub trait BlockStore<H: HashProtocol> {
    type Err: Error + Debug + Send + Sync + 'static;

    fn add(&self, bytes: Bytes) -> impl Future<Output = Result<Digest<H>, Self::Err>>;

    /// Returns `None` for unknown digests; unknown is not an error.
    fn read(&self, digest: &Digest<H>) -> impl Future<Output = Result<Option<Bytes>, Self::Err>>;

    fn contains(&self, digest: &Digest<H>) -> impl Future<Output = Result<bool, Self::Err>>;

    /// Enumerates stored digests. Export convenience only; the engine never
    /// depends on it for correctness and backends may return less than the
    /// full set.
    fn list(&self) -> impl Future<Output = Result<Vec<Digest<H>>, Self::Err>>;
}

/// Mutable branch-name storage with per-key watchers.
///
/// `update` is an unconditional write; optimistic concurrency lives in the
/// engine, which re-reads before writing and retries on observed
/// divergence. Watchers of a single key observe a linearization of its
/// writes; there is no cross-key ordering guarantee.
pub trait NameStore<T: TagName, H: HashProtocol> {
    type Err: Error + Debug + Send + Sync + 'static;

    /// The current head of `tag`, absent when the branch does not exist.
    fn head(&self, tag: &T) -> impl Future<Output = Result<Option<Digest<H>>, Self::Err>>;

    fn mem(&self, tag: &T) -> impl Future<Output = Result<bool, Self::Err>>;

    fn update(&self, tag: &T, head: Digest<H>) -> impl Future<Output = Result<(), Self::Err>>;

    fn remove(&self, tag: &T) -> impl Future<Output = Result<(), Self::Err>>;

    fn tags(&self) -> impl Future<Output = Result<Vec<T>, Self::Err>>;

    fn dump(&self) -> impl Future<Output = Result<Vec<(T, Digest<H>)>, Self::Err>>;

    /// Subscribes to head changes of `tag`, starting with `initial` when
    /// provided.
    fn watch(&self, tag: &T, initial: Option<Option<Digest<H>>>) -> HeadStream<H>;
}

/// The backend bundle the engine runs over: both capabilities on one
/// cloneable value, clones sharing state.
pub trait Backend<H: HashProtocol, T: TagName>:
    BlockStore<H> + NameStore<T, H> + Clone + Send + Sync + 'static
{
}

impl<B, H, T> Backend<H, T> for B
where
    H: HashProtocol,
    T: TagName,
    B: BlockStore<H> + NameStore<T, H> + Clone + Send + Sync + 'static,
{
}

/// Failure while reading or decoding a stored object.
#[derive(Debug)]
pub enum ObjectError<E> {
    /// The backend failed; propagated unchanged.
    Backend(E),
    /// The stored bytes do not decode; the store is corrupt.
    Decode(DecodeError),
    /// A node or commit references a digest the backend reports absent.
    /// Fatal to the running operation; no value is synthesized.
    Dangling(String),
}

impl<E: fmt::Display> fmt::Display for ObjectError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectError::Backend(e) => write!(f, "backend failure: {e}"),
            ObjectError::Decode(e) => write!(f, "stored object does not decode: {e}"),
            ObjectError::Dangling(digest) => {
                write!(f, "object references absent digest {digest}")
            }
        }
    }
}

impl<E: Error + 'static> Error for ObjectError<E> {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ObjectError::Backend(e) => Some(e),
            ObjectError::Decode(e) => Some(e),
            ObjectError::Dangling(_) => None,
        }
    }
}

/// Engine-level error, generic over the backend's block and name errors.
#[derive(Debug)]
pub enum StoreError<BE, NE> {
    /// The block store failed.
    Blocks(BE),
    /// The name store failed.
    Names(NE),
    /// A stored object does not decode.
    Decode(DecodeError),
    /// A stored object references an absent digest.
    Dangling(String),
    /// A three-way merge could not resolve, an optimistic retry was
    /// exhausted, or a view replay observed a divergent read.
    Conflict(Conflict),
    /// `update_tag` refused to overwrite an existing branch.
    DuplicatedTag(String),
    /// `import` refused to overwrite existing branches.
    DuplicatedTags(Vec<String>),
    /// An `_exn` variant found nothing.
    NotFound,
}

impl<BE: fmt::Display, NE: fmt::Display> fmt::Display for StoreError<BE, NE> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Blocks(e) => write!(f, "block store failure: {e}"),
            StoreError::Names(e) => write!(f, "name store failure: {e}"),
            StoreError::Decode(e) => write!(f, "stored object does not decode: {e}"),
            StoreError::Dangling(digest) => {
                write!(f, "object references absent digest {digest}")
            }
            StoreError::Conflict(c) => write!(f, "{c}"),
            StoreError::DuplicatedTag(tag) => write!(f, "branch {tag} already exists"),
            StoreError::DuplicatedTags(tags) => {
                write!(f, "branches already exist: {}", tags.join(", "))
            }
            StoreError::NotFound => write!(f, "required key is absent"),
        }
    }
}

impl<BE, NE> Error for StoreError<BE, NE>
where
    BE: Error + 'static,
    NE: Error + 'static,
{
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            StoreError::Blocks(e) => Some(e),
            StoreError::Names(e) => Some(e),
            StoreError::Decode(e) => Some(e),
            StoreError::Conflict(c) => Some(c),
            _ => None,
        }
    }
}

impl<BE, NE> From<Conflict> for StoreError<BE, NE> {
    fn from(c: Conflict) -> Self {
        StoreError::Conflict(c)
    }
}

impl<BE, NE> From<ObjectError<BE>> for StoreError<BE, NE> {
    fn from(e: ObjectError<BE>) -> Self {
        match e {
            ObjectError::Backend(e) => StoreError::Blocks(e),
            ObjectError::Decode(e) => StoreError::Decode(e),
            ObjectError::Dangling(d) => StoreError::Dangling(d),
        }
    }
}

impl<BE, NE> StoreError<BE, NE> {
    /// True when the error is a structured merge/replay conflict rather
    /// than a storage failure.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }
}

// Typed object access. These helpers layer canonical codecs and the
// dangling-reference check over the raw byte store; the engine reads
// objects exclusively through them.

pub async fn add_contents<H, C, B>(
    blocks: &B,
    value: &C,
) -> Result<Handle<H, ContentsKind>, B::Err>
where
    H: HashProtocol,
    C: Contents,
    B: BlockStore<H>,
{
    let digest = blocks.add(value.to_bytes()).await?;
    Ok(Handle::from_digest(digest))
}

pub async fn read_contents<H, C, B>(
    blocks: &B,
    handle: Handle<H, ContentsKind>,
) -> Result<Option<C>, ObjectError<B::Err>>
where
    H: HashProtocol,
    C: Contents,
    B: BlockStore<H>,
{
    let Some(bytes) = blocks
        .read(&handle.digest())
        .await
        .map_err(ObjectError::Backend)?
    else {
        return Ok(None);
    };
    C::from_bytes(&bytes).map(Some).map_err(ObjectError::Decode)
}

pub async fn read_contents_exn<H, C, B>(
    blocks: &B,
    handle: Handle<H, ContentsKind>,
) -> Result<C, ObjectError<B::Err>>
where
    H: HashProtocol,
    C: Contents,
    B: BlockStore<H>,
{
    read_contents(blocks, handle)
        .await?
        .ok_or_else(|| ObjectError::Dangling(handle.digest().to_hex()))
}

pub async fn add_node<H, S, B>(
    blocks: &B,
    node: &Node<H, S>,
) -> Result<Handle<H, NodeKind>, B::Err>
where
    H: HashProtocol,
    S: Step,
    B: BlockStore<H>,
{
    let digest = blocks.add(node.encode()).await?;
    Ok(Handle::from_digest(digest))
}

pub async fn read_node<H, S, B>(
    blocks: &B,
    handle: Handle<H, NodeKind>,
) -> Result<Option<Node<H, S>>, ObjectError<B::Err>>
where
    H: HashProtocol,
    S: Step,
    B: BlockStore<H>,
{
    let Some(bytes) = blocks
        .read(&handle.digest())
        .await
        .map_err(ObjectError::Backend)?
    else {
        return Ok(None);
    };
    Node::decode(&bytes).map(Some).map_err(ObjectError::Decode)
}

pub async fn read_node_exn<H, S, B>(
    blocks: &B,
    handle: Handle<H, NodeKind>,
) -> Result<Node<H, S>, ObjectError<B::Err>>
where
    H: HashProtocol,
    S: Step,
    B: BlockStore<H>,
{
    read_node(blocks, handle)
        .await?
        .ok_or_else(|| ObjectError::Dangling(handle.digest().to_hex()))
}

pub async fn add_commit<H, B>(
    blocks: &B,
    commit: &Commit<H>,
) -> Result<Handle<H, CommitKind>, B::Err>
where
    H: HashProtocol,
    B: BlockStore<H>,
{
    let digest = blocks.add(commit.encode()).await?;
    Ok(Handle::from_digest(digest))
}

pub async fn read_commit<H, B>(
    blocks: &B,
    handle: Handle<H, CommitKind>,
) -> Result<Option<Commit<H>>, ObjectError<B::Err>>
where
    H: HashProtocol,
    B: BlockStore<H>,
{
    let Some(bytes) = blocks
        .read(&handle.digest())
        .await
        .map_err(ObjectError::Backend)?
    else {
        return Ok(None);
    };
    Commit::decode(&bytes)
        .map(Some)
        .map_err(ObjectError::Decode)
}

pub async fn read_commit_exn<H, B>(
    blocks: &B,
    handle: Handle<H, CommitKind>,
) -> Result<Commit<H>, ObjectError<B::Err>>
where
    H: HashProtocol,
    B: BlockStore<H>,
{
    read_commit(blocks, handle)
        .await?
        .ok_or_else(|| ObjectError::Dangling(handle.digest().to_hex()))
}
