//! Transactional views.
//!
//! A view is an in-memory staging area over a subtree of the store. It
//! records every observation it makes — reads, writes, listings — in an
//! action log, and keeps pending writes in a shadow map. The log is what
//! makes optimistic concurrency possible: committing replays nothing
//! (`update_path` replaces), while `rebase_path` re-executes the log
//! against the current tip and reports a conflict when any recorded
//! observation diverged. Views are session-scoped and never shared between
//! handles.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use tracing::debug;

use crate::graph;
use crate::merge;
use crate::merge::Conflict;
use crate::node::Node;
use crate::path::Key;
use crate::repo::read_contents_exn;
use crate::repo::read_node_exn;
use crate::repo::Backend;
use crate::repo::StoreError;
use crate::store::graft;
use crate::store::CommitHandle;
use crate::store::ContentsHandle;
use crate::store::Error;
use crate::store::Graft;
use crate::store::NodeHandle;
use crate::store::Schema;
use crate::store::Store;
use crate::contents::Contents;
use crate::commit::Commit;
use crate::repo::add_commit;
use crate::repo::add_contents;

/// One observed operation, in issue order.
pub enum Action<S: Schema> {
    /// A read-through and the value it observed.
    Read(Key<S::Step>, Option<S::Contents>),
    /// A pending write; an absent value is a removal.
    Write(Key<S::Step>, Option<S::Contents>),
    /// A listing and the steps it observed.
    List(Key<S::Step>, Vec<S::Step>),
}

impl<S: Schema> Clone for Action<S> {
    fn clone(&self) -> Self {
        match self {
            Action::Read(k, v) => Action::Read(k.clone(), v.clone()),
            Action::Write(k, v) => Action::Write(k.clone(), v.clone()),
            Action::List(k, steps) => Action::List(k.clone(), steps.clone()),
        }
    }
}

impl<S: Schema> PartialEq for Action<S> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Action::Read(k, v), Action::Read(ko, vo)) => k == ko && v == vo,
            (Action::Write(k, v), Action::Write(ko, vo)) => k == ko && v == vo,
            (Action::List(k, s), Action::List(ko, so)) => k == ko && s == so,
            _ => false,
        }
    }
}

impl<S: Schema> Eq for Action<S> {}

impl<S: Schema> std::fmt::Debug for Action<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::Read(k, v) => f.debug_tuple("Read").field(k).field(v).finish(),
            Action::Write(k, v) => f.debug_tuple("Write").field(k).field(v).finish(),
            Action::List(k, s) => f.debug_tuple("List").field(k).field(s).finish(),
        }
    }
}

/// An in-memory staging area over the subtree at a key.
pub struct View<S: Schema, B: Backend<S::Hash, S::Tag>> {
    backend: B,
    path: Key<S::Step>,
    base_root: Option<NodeHandle<S>>,
    base_head: Option<CommitHandle<S>>,
    updates: BTreeMap<Key<S::Step>, Option<S::Contents>>,
    actions: Vec<Action<S>>,
}

impl<S, B> View<S, B>
where
    S: Schema,
    B: Backend<S::Hash, S::Tag>,
{
    /// An empty view: no backing subtree, no recorded history.
    pub fn empty(backend: B) -> Self {
        View {
            backend,
            path: Vec::new(),
            base_root: None,
            base_head: None,
            updates: BTreeMap::new(),
            actions: Vec::new(),
        }
    }

    /// A view over an existing subtree, unattached to any branch state.
    pub fn of_node(backend: B, root: NodeHandle<S>) -> Self {
        View {
            backend,
            path: Vec::new(),
            base_root: Some(root),
            base_head: None,
            updates: BTreeMap::new(),
            actions: Vec::new(),
        }
    }

    /// The key this view is mounted at.
    pub fn path(&self) -> &[S::Step] {
        &self.path
    }

    /// The branch head observed when the view was created.
    pub fn base_head(&self) -> Option<CommitHandle<S>> {
        self.base_head
    }

    /// The recorded action log, in issue order.
    pub fn actions(&self) -> &[Action<S>] {
        &self.actions
    }

    async fn base_value(&self, key: &[S::Step]) -> Result<Option<S::Contents>, Error<S, B>> {
        let handle = graph::find_in_tree(&self.backend, self.base_root, key).await?;
        load_contents::<S, B>(&self.backend, handle).await
    }

    /// Reads `key` relative to the view: a pending write wins, otherwise
    /// the backing subtree is consulted and the observation recorded.
    pub async fn read(&mut self, key: &[S::Step]) -> Result<Option<S::Contents>, Error<S, B>> {
        if let Some(pending) = self.updates.get(key) {
            return Ok(pending.clone());
        }
        for action in &self.actions {
            if let Action::Read(k, v) = action {
                if k.as_slice() == key {
                    return Ok(v.clone());
                }
            }
        }
        let value = self.base_value(key).await?;
        self.actions
            .push(Action::Read(key.to_vec(), value.clone()));
        Ok(value)
    }

    pub async fn mem(&mut self, key: &[S::Step]) -> Result<bool, Error<S, B>> {
        Ok(self.read(key).await?.is_some())
    }

    /// Stages a write; nothing reaches the store before commit.
    pub fn update(&mut self, key: impl Into<Key<S::Step>>, value: S::Contents) {
        let key = key.into();
        self.updates.insert(key.clone(), Some(value.clone()));
        self.actions.push(Action::Write(key, Some(value)));
    }

    /// Stages a removal.
    pub fn remove(&mut self, key: impl Into<Key<S::Step>>) {
        let key = key.into();
        self.updates.insert(key.clone(), None);
        self.actions.push(Action::Write(key, None));
    }

    /// Lists the steps below `key` as the view currently sees them, and
    /// records the observation.
    pub async fn list(&mut self, key: &[S::Step]) -> Result<Vec<S::Step>, Error<S, B>> {
        let steps =
            list_through::<S, B>(&self.backend, self.base_root, &self.updates, key).await?;
        self.actions.push(Action::List(key.to_vec(), steps.clone()));
        Ok(steps)
    }

    /// Merges this view's edits into `other`.
    ///
    /// Both views are treated as edit sequences over the store state at
    /// view creation. This view's recorded reads are validated against
    /// `other`'s final view; keys written by both sides either agree or go
    /// through the contents merge. Only `other` is updated.
    pub async fn merge_into(&self, other: &mut View<S, B>) -> Result<(), Error<S, B>> {
        for action in &self.actions {
            let Action::Read(key, observed) = action else {
                continue;
            };
            let their_value = match other.updates.get(key.as_slice()) {
                Some(pending) => pending.clone(),
                None => other.base_value(key).await?,
            };
            if their_value != *observed {
                return Err(Conflict::new(format!(
                    "read of {key:?} no longer holds in the target view"
                ))
                .into());
            }
        }

        let contents_merge = merge::option(S::Contents::merge());
        for (key, ours) in &self.updates {
            let merged = match other.updates.get(key) {
                None => ours.clone(),
                Some(theirs) if theirs == ours => continue,
                Some(theirs) => {
                    let old = self.base_value(key).await?;
                    match contents_merge.run(Some(&old), ours, theirs) {
                        Ok(v) => v,
                        Err(c) => return Err(c.at(format_args!("{key:?}")).into()),
                    }
                }
            };
            other.updates.insert(key.clone(), merged.clone());
            other.actions.push(Action::Write(key.clone(), merged));
        }
        Ok(())
    }

    /// Writes the pending contents and assembles the staged subtree on top
    /// of `base`, bottom-up.
    async fn stage_subtree(
        &self,
        base: Option<NodeHandle<S>>,
    ) -> Result<Option<NodeHandle<S>>, Error<S, B>> {
        let mut root = base;
        for (key, value) in &self.updates {
            let contents: Option<ContentsHandle<S>> = match value {
                Some(v) => Some(
                    add_contents(&self.backend, v)
                        .await
                        .map_err(StoreError::Blocks)?,
                ),
                None => None,
            };
            root = graft::<S, B>(&self.backend, root, key, Graft::Contents(contents)).await?;
        }
        Ok(root)
    }
}

async fn load_contents<S, B>(
    backend: &B,
    handle: Option<ContentsHandle<S>>,
) -> Result<Option<S::Contents>, Error<S, B>>
where
    S: Schema,
    B: Backend<S::Hash, S::Tag>,
{
    match handle {
        Some(handle) => Ok(Some(read_contents_exn(backend, handle).await?)),
        None => Ok(None),
    }
}

/// The steps below `key` through a pending-write overlay: base steps minus
/// leaves the overlay removed, plus steps the overlay introduced.
async fn list_through<S, B>(
    backend: &B,
    root: Option<NodeHandle<S>>,
    overlay: &BTreeMap<Key<S::Step>, Option<S::Contents>>,
    key: &[S::Step],
) -> Result<Vec<S::Step>, Error<S, B>>
where
    S: Schema,
    B: Backend<S::Hash, S::Tag>,
{
    let base_node: Option<Node<S::Hash, S::Step>> =
        match graph::node_at(backend, root, key).await? {
            Some(handle) => Some(read_node_exn(backend, handle).await?),
            None => None,
        };

    let mut steps: BTreeSet<S::Step> = base_node
        .as_ref()
        .map(|node| node.steps().into_iter().collect())
        .unwrap_or_default();

    for (k, v) in overlay {
        if k.len() <= key.len() || &k[..key.len()] != key {
            continue;
        }
        let step = k[key.len()].clone();
        if v.is_none() && k.len() == key.len() + 1 {
            let keeps_child = base_node
                .as_ref()
                .is_some_and(|node| node.succ(&step).is_some());
            if !keeps_child {
                steps.remove(&step);
            }
        }
    }
    for (k, v) in overlay {
        if k.len() <= key.len() || &k[..key.len()] != key {
            continue;
        }
        if v.is_some() {
            steps.insert(k[key.len()].clone());
        }
    }
    Ok(steps.into_iter().collect())
}

impl<S, B> Store<S, B>
where
    S: Schema,
    B: Backend<S::Hash, S::Tag>,
{
    /// Opens a view over the subtree at `key`, capturing the current head.
    pub async fn view(&self, key: impl Into<Key<S::Step>>) -> Result<View<S, B>, Error<S, B>> {
        let key = key.into();
        let head = self.head().await?;
        let root = match head {
            Some(head) => {
                let commit = crate::repo::read_commit_exn(self.backend(), head).await?;
                graph::node_at(self.backend(), commit.node, &key).await?
            }
            None => None,
        };
        Ok(View {
            backend: self.backend().clone(),
            path: key,
            base_root: root,
            base_head: head,
            updates: BTreeMap::new(),
            actions: Vec::new(),
        })
    }

    /// Commits the view at its key with replace semantics: the staged
    /// subtree is built over the view's base and grafted over whatever the
    /// branch currently holds, without conflict detection.
    pub async fn update_path(
        &mut self,
        view: &mut View<S, B>,
    ) -> Result<CommitHandle<S>, Error<S, B>> {
        let subtree = view.stage_subtree(view.base_root).await?;
        debug!(writes = view.updates.len(), "view commit (replace)");
        let handle = self
            .commit_graft(&view.path.clone(), Graft::Subtree(subtree))
            .await?;
        view.base_head = Some(handle);
        view.base_root = subtree;
        view.updates.clear();
        view.actions.clear();
        Ok(handle)
    }

    /// Re-executes the view's action log against the current tip and
    /// commits on top of it.
    ///
    /// Every recorded read and listing must observe the same value it
    /// originally did — through the writes recorded before it — otherwise
    /// the rebase fails with a conflict and the branch is left untouched.
    pub async fn rebase_path(
        &mut self,
        view: &mut View<S, B>,
    ) -> Result<CommitHandle<S>, Error<S, B>> {
        let tip_head = self.head().await?;
        let tip_root = match tip_head {
            Some(head) => crate::repo::read_commit_exn(self.backend(), head).await?.node,
            None => None,
        };
        let tip_subtree = graph::node_at(self.backend(), tip_root, &view.path).await?;

        let mut replay: BTreeMap<Key<S::Step>, Option<S::Contents>> = BTreeMap::new();
        for action in &view.actions {
            match action {
                Action::Write(key, value) => {
                    replay.insert(key.clone(), value.clone());
                }
                Action::Read(key, recorded) => {
                    let current = match replay.get(key) {
                        Some(pending) => pending.clone(),
                        None => {
                            let handle = graph::find_in_tree(
                                self.backend(),
                                tip_subtree,
                                key,
                            )
                            .await?;
                            load_contents::<S, B>(self.backend(), handle).await?
                        }
                    };
                    if current != *recorded {
                        debug!(?key, "divergent read during rebase");
                        return Err(Conflict::new(format!(
                            "read of {key:?} diverged from the recorded value"
                        ))
                        .into());
                    }
                }
                Action::List(key, recorded) => {
                    let current =
                        list_through::<S, B>(self.backend(), tip_subtree, &replay, key).await?;
                    if current != *recorded {
                        return Err(Conflict::new(format!(
                            "listing of {key:?} diverged from the recorded result"
                        ))
                        .into());
                    }
                }
            }
        }

        let subtree = view.stage_subtree(tip_subtree).await?;
        let root = graft::<S, B>(self.backend(), tip_root, &view.path, Graft::Subtree(subtree))
            .await?;
        let commit = Commit::new(self.task().restamped(), root, tip_head);
        let handle = add_commit(self.backend(), &commit)
            .await
            .map_err(StoreError::Blocks)?;
        if !self.try_advance(tip_head, handle).await? {
            return Err(Conflict::new("the branch moved while the view was rebasing").into());
        }
        view.base_head = Some(handle);
        view.base_root = subtree;
        view.updates.clear();
        view.actions.clear();
        Ok(handle)
    }
}
