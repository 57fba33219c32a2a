//! The watch registry.
//!
//! Fans head changes out to per-tag subscribers. Each subscription is an
//! independent [`HeadStream`] over a bounded channel: slow consumers do not
//! lose events, they suspend the notifying producer instead. The registry
//! is shared between all handles of a backend; notification is driven by
//! the name store's `update`/`remove`, or optionally by an
//! externally-registered directory-watch hook.

use std::collections::BTreeMap;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::Mutex;
use std::task::Context;
use std::task::Poll;

use futures::channel::mpsc;
use futures::SinkExt;
use futures::Stream;
use futures::StreamExt;
use tracing::trace;

use crate::hash::Digest;

/// Per-subscriber buffer size. A full buffer suspends the producer rather
/// than dropping or coalescing events.
const WATCH_BUFFER: usize = 16;

/// A lazy sequence of observed head values for one tag.
///
/// Dropping the stream cancels the subscription.
pub struct HeadStream<H> {
    rx: mpsc::Receiver<Option<Digest<H>>>,
}

impl<H> Stream for HeadStream<H> {
    type Item = Option<Digest<H>>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_next_unpin(cx)
    }
}

impl<H> Unpin for HeadStream<H> {}

/// Per-tag subscriber sets with notify-on-change fan-out.
pub struct WatchRegistry<T, H> {
    subscribers: Arc<Mutex<BTreeMap<T, Vec<mpsc::Sender<Option<Digest<H>>>>>>>,
}

impl<T, H> Clone for WatchRegistry<T, H> {
    fn clone(&self) -> Self {
        WatchRegistry {
            subscribers: self.subscribers.clone(),
        }
    }
}

impl<T, H> Default for WatchRegistry<T, H>
where
    T: Ord,
{
    fn default() -> Self {
        WatchRegistry::new()
    }
}

impl<T, H> WatchRegistry<T, H>
where
    T: Ord,
{
    pub fn new() -> Self {
        WatchRegistry {
            subscribers: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }

    /// Drops every subscription; their streams terminate.
    pub fn clear(&self) {
        self.subscribers.lock().expect("poisoned lock").clear();
    }
}

impl<T, H> WatchRegistry<T, H>
where
    T: Ord + Clone,
{
    /// Registers a subscriber for `tag`. When `initial` is given the stream
    /// starts with that value before any notification.
    pub fn subscribe(&self, tag: &T, initial: Option<Option<Digest<H>>>) -> HeadStream<H> {
        let (mut tx, rx) = mpsc::channel(WATCH_BUFFER);
        if let Some(seed) = initial {
            // The channel is fresh, the buffer cannot be full.
            let _ = tx.try_send(seed);
        }
        self.subscribers
            .lock()
            .expect("poisoned lock")
            .entry(tag.clone())
            .or_default()
            .push(tx);
        HeadStream { rx }
    }

    /// Delivers `head` to every subscriber of `tag` that existed before the
    /// call, suspending on full buffers. Closed subscriptions are pruned.
    pub async fn notify(&self, tag: &T, head: Option<Digest<H>>)
    where
        H: 'static,
    {
        let senders: Vec<mpsc::Sender<Option<Digest<H>>>> = {
            let subscribers = self.subscribers.lock().expect("poisoned lock");
            match subscribers.get(tag) {
                Some(senders) => senders.clone(),
                None => return,
            }
        };
        trace!(subscribers = senders.len(), "watch notify");

        for mut tx in senders {
            // A send error means the stream was dropped; pruned below.
            let _ = tx.send(head).await;
        }

        let mut subscribers = self.subscribers.lock().expect("poisoned lock");
        if let Some(senders) = subscribers.get_mut(tag) {
            senders.retain(|tx| !tx.is_closed());
            if senders.is_empty() {
                subscribers.remove(tag);
            }
        }
    }
}

/// Callback handed to the directory-watch hook; invoked with each changed
/// path.
pub type DirChange = Box<dyn Fn(&Path) + Send + Sync>;

type DirHook = Box<dyn Fn(&Path, DirChange) + Send + Sync>;

static DIR_HOOK: Mutex<Option<DirHook>> = Mutex::new(None);

/// Registers the process-global directory-watch hook consumed by
/// [`WatchRegistry::listen_dir`]. The default is a no-op: without a hook,
/// disk-backed watching is disabled.
pub fn set_dir_watch_hook(hook: impl Fn(&Path, DirChange) + Send + Sync + 'static) {
    *DIR_HOOK.lock().expect("poisoned lock") = Some(Box::new(hook));
}

impl<T, H> WatchRegistry<T, H>
where
    T: Ord + Clone + Send + Sync + 'static,
    H: Send + 'static,
{
    /// Drives notifications for this registry from filesystem changes under
    /// `path`: each changed file is parsed into a tag and its current head
    /// loaded, then delivered like any other notification. Does nothing
    /// when no hook is registered.
    pub fn listen_dir<P, L>(&self, path: &Path, key_parser: P, value_loader: L)
    where
        P: Fn(&Path) -> Option<T> + Send + Sync + 'static,
        L: Fn(&T) -> Option<Digest<H>> + Send + Sync + 'static,
    {
        let hook = DIR_HOOK.lock().expect("poisoned lock");
        let Some(hook) = hook.as_ref() else {
            return;
        };
        let registry = self.clone();
        hook(
            path,
            Box::new(move |changed: &Path| {
                let Some(tag) = key_parser(changed) else {
                    return;
                };
                let head = value_loader(&tag);
                futures::executor::block_on(registry.notify(&tag, head));
            }),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::Blake3;
    use futures::executor::block_on;

    fn digest(payload: &[u8]) -> Digest<Blake3> {
        Digest::of_bytes(payload)
    }

    #[test]
    fn subscriber_sees_every_update() {
        block_on(async {
            let registry: WatchRegistry<String, Blake3> = WatchRegistry::new();
            let mut stream = registry.subscribe(&"master".to_string(), None);

            registry.notify(&"master".to_string(), Some(digest(b"c1"))).await;
            registry.notify(&"master".to_string(), Some(digest(b"c2"))).await;
            registry.notify(&"master".to_string(), None).await;

            assert_eq!(stream.next().await, Some(Some(digest(b"c1"))));
            assert_eq!(stream.next().await, Some(Some(digest(b"c2"))));
            assert_eq!(stream.next().await, Some(None));
        });
    }

    #[test]
    fn initial_value_is_delivered_first() {
        block_on(async {
            let registry: WatchRegistry<String, Blake3> = WatchRegistry::new();
            let mut stream =
                registry.subscribe(&"master".to_string(), Some(Some(digest(b"seed"))));
            registry.notify(&"master".to_string(), Some(digest(b"c1"))).await;

            assert_eq!(stream.next().await, Some(Some(digest(b"seed"))));
            assert_eq!(stream.next().await, Some(Some(digest(b"c1"))));
        });
    }

    #[test]
    fn unrelated_tags_do_not_cross() {
        block_on(async {
            let registry: WatchRegistry<String, Blake3> = WatchRegistry::new();
            let mut master = registry.subscribe(&"master".to_string(), None);
            let _topic = registry.subscribe(&"topic".to_string(), None);

            registry.notify(&"topic".to_string(), Some(digest(b"t"))).await;
            registry.notify(&"master".to_string(), Some(digest(b"m"))).await;

            assert_eq!(master.next().await, Some(Some(digest(b"m"))));
        });
    }

    #[test]
    fn dropped_subscription_is_pruned() {
        block_on(async {
            let registry: WatchRegistry<String, Blake3> = WatchRegistry::new();
            let stream = registry.subscribe(&"master".to_string(), None);
            drop(stream);
            registry.notify(&"master".to_string(), Some(digest(b"c"))).await;
            registry.notify(&"master".to_string(), Some(digest(b"d"))).await;
        });
    }
}
