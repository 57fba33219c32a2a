//! In-memory backend.
//!
//! Implements both storage capabilities over plain maps. Useful for unit
//! tests and ephemeral stores; clones share state, so every handle cloned
//! from one `MemoryStore` sees the same blocks, branches and watchers.

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::fmt;
use std::sync::Arc;
use std::sync::Mutex;

use anybytes::Bytes;

use crate::hash::Digest;
use crate::hash::HashProtocol;
use crate::repo::BlockStore;
use crate::repo::NameStore;
use crate::repo::TagName;
use crate::watch::HeadStream;
use crate::watch::WatchRegistry;

pub struct MemoryStore<T: TagName, H: HashProtocol> {
    blocks: Arc<Mutex<BTreeMap<Digest<H>, Bytes>>>,
    names: Arc<Mutex<BTreeMap<T, Digest<H>>>>,
    watches: WatchRegistry<T, H>,
}

impl<T: TagName, H: HashProtocol> Clone for MemoryStore<T, H> {
    fn clone(&self) -> Self {
        MemoryStore {
            blocks: self.blocks.clone(),
            names: self.names.clone(),
            watches: self.watches.clone(),
        }
    }
}

impl<T: TagName, H: HashProtocol> Default for MemoryStore<T, H> {
    fn default() -> Self {
        MemoryStore::new()
    }
}

impl<T: TagName, H: HashProtocol> fmt::Debug for MemoryStore<T, H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let blocks = self.blocks.lock().expect("poisoned lock").len();
        let names = self.names.lock().expect("poisoned lock").len();
        write!(f, "MemoryStore {{ blocks: {blocks}, names: {names} }}")
    }
}

impl<T: TagName, H: HashProtocol> MemoryStore<T, H> {
    pub fn new() -> Self {
        MemoryStore {
            blocks: Arc::new(Mutex::new(BTreeMap::new())),
            names: Arc::new(Mutex::new(BTreeMap::new())),
            watches: WatchRegistry::new(),
        }
    }

    /// Number of distinct stored objects; add idempotence makes this stable
    /// under re-insertion.
    pub fn block_count(&self) -> usize {
        self.blocks.lock().expect("poisoned lock").len()
    }
}

impl<T: TagName, H: HashProtocol> BlockStore<H> for MemoryStore<T, H> {
    type Err = Infallible;

    async fn add(&self, bytes: Bytes) -> Result<Digest<H>, Self::Err> {
        let digest = Digest::of_bytes(bytes.as_ref());
        self.blocks
            .lock()
            .expect("poisoned lock")
            .entry(digest)
            .or_insert(bytes);
        Ok(digest)
    }

    async fn read(&self, digest: &Digest<H>) -> Result<Option<Bytes>, Self::Err> {
        Ok(self
            .blocks
            .lock()
            .expect("poisoned lock")
            .get(digest)
            .cloned())
    }

    async fn contains(&self, digest: &Digest<H>) -> Result<bool, Self::Err> {
        Ok(self
            .blocks
            .lock()
            .expect("poisoned lock")
            .contains_key(digest))
    }

    async fn list(&self) -> Result<Vec<Digest<H>>, Self::Err> {
        Ok(self
            .blocks
            .lock()
            .expect("poisoned lock")
            .keys()
            .copied()
            .collect())
    }
}

impl<T: TagName, H: HashProtocol> NameStore<T, H> for MemoryStore<T, H> {
    type Err = Infallible;

    async fn head(&self, tag: &T) -> Result<Option<Digest<H>>, Self::Err> {
        Ok(self.names.lock().expect("poisoned lock").get(tag).copied())
    }

    async fn mem(&self, tag: &T) -> Result<bool, Self::Err> {
        Ok(self.names.lock().expect("poisoned lock").contains_key(tag))
    }

    async fn update(&self, tag: &T, head: Digest<H>) -> Result<(), Self::Err> {
        self.names
            .lock()
            .expect("poisoned lock")
            .insert(tag.clone(), head);
        self.watches.notify(tag, Some(head)).await;
        Ok(())
    }

    async fn remove(&self, tag: &T) -> Result<(), Self::Err> {
        let removed = self.names.lock().expect("poisoned lock").remove(tag);
        if removed.is_some() {
            self.watches.notify(tag, None).await;
        }
        Ok(())
    }

    async fn tags(&self) -> Result<Vec<T>, Self::Err> {
        Ok(self
            .names
            .lock()
            .expect("poisoned lock")
            .keys()
            .cloned()
            .collect())
    }

    async fn dump(&self) -> Result<Vec<(T, Digest<H>)>, Self::Err> {
        Ok(self
            .names
            .lock()
            .expect("poisoned lock")
            .iter()
            .map(|(tag, head)| (tag.clone(), *head))
            .collect())
    }

    fn watch(&self, tag: &T, initial: Option<Option<Digest<H>>>) -> HeadStream<H> {
        self.watches.subscribe(tag, initial)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::Blake3;
    use futures::executor::block_on;

    type Store = MemoryStore<String, Blake3>;

    #[test]
    fn add_is_idempotent() {
        block_on(async {
            let store = Store::new();
            let a = store.add(Bytes::from(b"payload".to_vec())).await.unwrap();
            let b = store.add(Bytes::from(b"payload".to_vec())).await.unwrap();
            assert_eq!(a, b);
            assert_eq!(store.block_count(), 1);
        });
    }

    #[test]
    fn read_unknown_is_absent() {
        block_on(async {
            let store = Store::new();
            let missing = Digest::of_bytes(b"nothing here");
            assert_eq!(store.read(&missing).await.unwrap(), None);
            assert!(!store.contains(&missing).await.unwrap());
        });
    }

    #[test]
    fn clones_share_state() {
        block_on(async {
            let store = Store::new();
            let other = store.clone();
            let digest = store.add(Bytes::from(b"shared".to_vec())).await.unwrap();
            assert!(other.contains(&digest).await.unwrap());

            other
                .update(&"master".to_string(), digest)
                .await
                .unwrap();
            assert_eq!(
                store.head(&"master".to_string()).await.unwrap(),
                Some(digest)
            );
        });
    }

    #[test]
    fn remove_deletes_the_entry() {
        block_on(async {
            let store = Store::new();
            let digest = store.add(Bytes::from(b"c".to_vec())).await.unwrap();
            store.update(&"master".to_string(), digest).await.unwrap();
            store.remove(&"master".to_string()).await.unwrap();
            assert!(!store.mem(&"master".to_string()).await.unwrap());
        });
    }
}
