//! Slice export and import.
//!
//! A slice is a self-contained bundle of contents, nodes, commits and tags
//! representing a partial store — the unit of replication between stores.
//! Export walks the commit graph from a `max` frontier, bounded by `depth`
//! and a `min` frontier; import writes the content-addressed sections
//! unconditionally (idempotent by hash) and refuses to clobber existing
//! tags unless forced. Values travel as the raw stored bytes, so a
//! round-trip through a slice is byte-faithful.

use std::collections::BTreeSet;

use anybytes::Bytes;
use tracing::debug;

use crate::hash::CommitKind;
use crate::hash::Digest;
use crate::hash::Handle;
use crate::hash::HashProtocol;
use crate::graph;
use crate::graph::WalkKind;
use crate::repo::Backend;
use crate::repo::StoreError;
use crate::repo::TagName;
use crate::store::CommitHandle;
use crate::store::Error;
use crate::store::Schema;
use crate::store::Store;
use crate::wire;
use crate::wire::DecodeError;
use crate::wire::Reader;

/// Bounds of a slice export.
pub struct SliceParams<H> {
    /// Include the nodes and contents referenced by the exported commits.
    pub full: bool,
    /// Parent edges to walk from the `max` frontier.
    pub depth: Option<usize>,
    /// Commits that terminate the walk; included, not descended past.
    pub min: Vec<Handle<H, CommitKind>>,
    /// Roots of the export; all branch tips when absent.
    pub max: Option<Vec<Handle<H, CommitKind>>>,
}

impl<H> Default for SliceParams<H> {
    fn default() -> Self {
        SliceParams {
            full: true,
            depth: None,
            min: Vec::new(),
            max: None,
        }
    }
}

/// An opaque bundle of a partial store: the four-section multimap.
#[derive(Debug)]
pub struct Slice<H: HashProtocol, T: TagName> {
    pub contents: Vec<(Digest<H>, Bytes)>,
    pub nodes: Vec<(Digest<H>, Bytes)>,
    pub commits: Vec<(Digest<H>, Bytes)>,
    pub tags: Vec<(T, Digest<H>)>,
}

impl<H: HashProtocol, T: TagName> Default for Slice<H, T> {
    fn default() -> Self {
        Slice {
            contents: Vec::new(),
            nodes: Vec::new(),
            commits: Vec::new(),
            tags: Vec::new(),
        }
    }
}

impl<H: HashProtocol, T: TagName> Slice<H, T> {
    pub fn is_empty(&self) -> bool {
        self.contents.is_empty()
            && self.nodes.is_empty()
            && self.commits.is_empty()
            && self.tags.is_empty()
    }

    /// Length-delimited framing over the four sections, in order.
    pub fn encode(&self) -> Bytes {
        let mut out = Vec::new();
        for section in [&self.contents, &self.nodes, &self.commits] {
            wire::put_u32(&mut out, section.len() as u32);
            for (digest, bytes) in section {
                wire::put_digest(&mut out, &digest.raw);
                wire::put_frame(&mut out, bytes.as_ref());
            }
        }
        wire::put_u32(&mut out, self.tags.len() as u32);
        let mut tag_buf = Vec::new();
        for (tag, digest) in &self.tags {
            tag_buf.clear();
            tag.encode(&mut tag_buf);
            wire::put_frame(&mut out, &tag_buf);
            wire::put_digest(&mut out, &digest.raw);
        }
        Bytes::from(out)
    }

    pub fn decode(bytes: &Bytes) -> Result<Self, DecodeError> {
        let mut reader = Reader::new(bytes.as_ref());
        let mut slice = Slice::default();

        for section in [&mut slice.contents, &mut slice.nodes, &mut slice.commits] {
            let count = reader.u32()?;
            for _ in 0..count {
                let digest = Digest::new(reader.digest()?);
                let payload = Bytes::from(reader.frame()?.to_vec());
                section.push((digest, payload));
            }
        }
        let count = reader.u32()?;
        for _ in 0..count {
            let tag = T::decode(reader.frame()?)?;
            let digest = Digest::new(reader.digest()?);
            slice.tags.push((tag, digest));
        }
        reader.finish()?;
        Ok(slice)
    }
}

/// Exports the subgraph bounded by `params` from a backend.
pub async fn export<S, B>(
    backend: &B,
    params: SliceParams<S::Hash>,
) -> Result<Slice<S::Hash, S::Tag>, Error<S, B>>
where
    S: Schema,
    B: Backend<S::Hash, S::Tag>,
{
    let tips = backend.dump().await.map_err(StoreError::Names)?;
    let roots: Vec<CommitHandle<S>> = match params.max {
        Some(max) => max,
        None => tips.iter().map(|(_, d)| Handle::from_digest(*d)).collect(),
    };
    let min: BTreeSet<Digest<S::Hash>> = params.min.iter().map(|h| h.digest()).collect();

    let items =
        graph::walk::<S::Hash, S::Step, B>(backend, &roots, params.depth, &min, params.full)
            .await?;

    let mut slice = Slice::default();
    let mut commit_digests: BTreeSet<Digest<S::Hash>> = BTreeSet::new();
    for item in items {
        let bytes = backend
            .read(&item.digest)
            .await
            .map_err(StoreError::Blocks)?
            .ok_or_else(|| StoreError::Dangling(item.digest.to_hex()))?;
        match item.kind {
            WalkKind::Contents => slice.contents.push((item.digest, bytes)),
            WalkKind::Node => slice.nodes.push((item.digest, bytes)),
            WalkKind::Commit => {
                commit_digests.insert(item.digest);
                slice.commits.push((item.digest, bytes));
            }
        }
    }

    // Only tags whose tip made it into the bundle; anything else would
    // point outside the slice after import.
    for (tag, digest) in tips {
        if commit_digests.contains(&digest) {
            slice.tags.push((tag, digest));
        }
    }

    debug!(
        contents = slice.contents.len(),
        nodes = slice.nodes.len(),
        commits = slice.commits.len(),
        tags = slice.tags.len(),
        "slice export"
    );
    Ok(slice)
}

async fn import_objects<S, B>(
    backend: &B,
    slice: &Slice<S::Hash, S::Tag>,
) -> Result<(), Error<S, B>>
where
    S: Schema,
    B: Backend<S::Hash, S::Tag>,
{
    for section in [&slice.contents, &slice.nodes, &slice.commits] {
        for (_, bytes) in section {
            backend
                .add(bytes.clone())
                .await
                .map_err(StoreError::Blocks)?;
        }
    }
    Ok(())
}

/// Imports a slice. Objects are written unconditionally (idempotent); tags
/// that already exist are left untouched and reported as `DuplicatedTags`
/// after all non-colliding tags were written.
pub async fn import<S, B>(backend: &B, slice: &Slice<S::Hash, S::Tag>) -> Result<(), Error<S, B>>
where
    S: Schema,
    B: Backend<S::Hash, S::Tag>,
{
    import_objects::<S, B>(backend, slice).await?;

    let mut duplicated = Vec::new();
    for (tag, digest) in &slice.tags {
        if backend.mem(tag).await.map_err(StoreError::Names)? {
            duplicated.push(format!("{tag:?}"));
            continue;
        }
        backend
            .update(tag, *digest)
            .await
            .map_err(StoreError::Names)?;
    }
    if !duplicated.is_empty() {
        return Err(StoreError::DuplicatedTags(duplicated));
    }
    Ok(())
}

/// Imports a slice, overwriting colliding tags.
pub async fn import_force<S, B>(
    backend: &B,
    slice: &Slice<S::Hash, S::Tag>,
) -> Result<(), Error<S, B>>
where
    S: Schema,
    B: Backend<S::Hash, S::Tag>,
{
    import_objects::<S, B>(backend, slice).await?;
    for (tag, digest) in &slice.tags {
        backend
            .update(tag, *digest)
            .await
            .map_err(StoreError::Names)?;
    }
    Ok(())
}

impl<S, B> Store<S, B>
where
    S: Schema,
    B: Backend<S::Hash, S::Tag>,
{
    pub async fn export(
        &self,
        params: SliceParams<S::Hash>,
    ) -> Result<Slice<S::Hash, S::Tag>, Error<S, B>> {
        export::<S, B>(self.backend(), params).await
    }

    pub async fn import(&self, slice: &Slice<S::Hash, S::Tag>) -> Result<(), Error<S, B>> {
        import::<S, B>(self.backend(), slice).await
    }

    pub async fn import_force(&self, slice: &Slice<S::Hash, S::Tag>) -> Result<(), Error<S, B>> {
        import_force::<S, B>(self.backend(), slice).await
    }
}
