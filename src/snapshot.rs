//! Snapshots.
//!
//! A snapshot pins the head a handle saw at one moment and offers read-only
//! read-through from it. Reverting a store to a snapshot is just a head
//! update; merging one is the ordinary three-way merge with the snapshot
//! head as the incoming side. Key watches yield `(key, snapshot)` pairs, one
//! per observed change of the value under the key.

use std::pin::Pin;

use futures::stream;
use futures::Stream;
use futures::StreamExt;

use crate::graph;
use crate::hash::Handle;
use crate::path::Key;
use crate::repo::read_contents_exn;
use crate::repo::Backend;
use crate::repo::StoreError;
use crate::store::CommitHandle;
use crate::store::Error;
use crate::store::Schema;
use crate::store::Store;

/// A frozen head with read-only read-through.
pub struct Snapshot<S: Schema, B: Backend<S::Hash, S::Tag>> {
    backend: B,
    head: Option<CommitHandle<S>>,
}

impl<S, B> Clone for Snapshot<S, B>
where
    S: Schema,
    B: Backend<S::Hash, S::Tag>,
{
    fn clone(&self) -> Self {
        Snapshot {
            backend: self.backend.clone(),
            head: self.head,
        }
    }
}

impl<S, B> Snapshot<S, B>
where
    S: Schema,
    B: Backend<S::Hash, S::Tag>,
{
    pub fn head(&self) -> Option<CommitHandle<S>> {
        self.head
    }

    /// Reads `key` as of the snapshot, regardless of where the branch
    /// moved since.
    pub async fn read(&self, key: &[S::Step]) -> Result<Option<S::Contents>, Error<S, B>> {
        let Some(head) = self.head else {
            return Ok(None);
        };
        match graph::find(&self.backend, head, key).await? {
            Some(handle) => Ok(Some(read_contents_exn(&self.backend, handle).await?)),
            None => Ok(None),
        }
    }

    pub async fn mem(&self, key: &[S::Step]) -> Result<bool, Error<S, B>> {
        Ok(self.read(key).await?.is_some())
    }
}

impl<S, B> Store<S, B>
where
    S: Schema,
    B: Backend<S::Hash, S::Tag>,
{
    /// Pins the currently visible head.
    pub async fn snapshot(&self) -> Result<Snapshot<S, B>, Error<S, B>> {
        Ok(Snapshot {
            backend: self.backend().clone(),
            head: self.head().await?,
        })
    }

    /// Moves the head back to the snapshot. Reverting to a snapshot of an
    /// empty store deletes the branch entry.
    pub async fn revert(&mut self, snapshot: &Snapshot<S, B>) -> Result<(), Error<S, B>> {
        match snapshot.head {
            Some(head) => self.update_head(head).await,
            None => self.set_visible_head(None).await,
        }
    }

    /// Three-way merge with the snapshot head as the incoming side.
    pub async fn merge_snapshot(&mut self, snapshot: &Snapshot<S, B>) -> Result<(), Error<S, B>> {
        let head = snapshot.head.ok_or(StoreError::NotFound)?;
        self.merge_head(head).await
    }

    /// Watches the value under `key` on the attached branch. Each yielded
    /// pair carries a snapshot of the head that changed the value; a
    /// backend failure mid-stream terminates the stream.
    pub async fn watch_key(
        &self,
        key: Key<S::Step>,
    ) -> Result<KeyStream<S, B>, Error<S, B>> {
        let tag = self.tag().cloned().ok_or(StoreError::NotFound)?;
        let backend = self.backend().clone();

        let baseline = match self.head().await? {
            Some(head) => graph::find(&backend, head, &key).await?,
            None => None,
        };
        let heads = backend.watch(&tag, None);

        Ok(Box::pin(stream::unfold(
            (heads, baseline, backend, key),
            |(mut heads, mut last, backend, key)| async move {
                loop {
                    let head = heads.next().await?;
                    let head = head.map(Handle::from_digest);
                    let value = match head {
                        Some(head) => graph::find(&backend, head, &key).await.ok()?,
                        None => None,
                    };
                    if value != last {
                        last = value;
                        let snapshot = Snapshot {
                            backend: backend.clone(),
                            head,
                        };
                        return Some(((key.clone(), snapshot), (heads, last, backend, key)));
                    }
                }
            },
        )))
    }
}

/// The change stream [`Store::watch_key`] yields: `(key, snapshot)` pairs,
/// one per observed change of the value under the key.
pub type KeyStream<S, B> =
    Pin<Box<dyn Stream<Item = (Key<<S as Schema>::Step>, Snapshot<S, B>)>>>;
