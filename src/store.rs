//! The branch engine.
//!
//! A [`Store`] is a per-session handle over a backend: it resolves reads
//! through the currently visible head, turns writes into new trees and
//! commits, and moves the branch pointer. A handle is *attached* to a
//! branch name or *detached* on an explicit head; several handles may share
//! one backend and coordinate only through the name store.
//!
//! The name store offers no compare-and-swap, so every head advance is
//! optimistic: read the head, compute, re-read, write — and retry from
//! scratch when the head moved in between.

use std::future::Future;
use std::pin::Pin;

use tracing::debug;

use crate::commit::Commit;
use crate::commit::Task;
use crate::config::Config;
use crate::contents::Contents;
use crate::graph;
use crate::hash::CommitKind;
use crate::hash::ContentsKind;
use crate::hash::Handle;
use crate::hash::HashProtocol;
use crate::hash::NodeKind;
use crate::merge;
use crate::merge::Conflict;
use crate::node::Node;
use crate::path::Step;
use crate::repo::add_commit;
use crate::repo::add_contents;
use crate::repo::add_node;
use crate::repo::read_commit_exn;
use crate::repo::read_contents_exn;
use crate::repo::read_node_exn;
use crate::repo::Backend;
use crate::repo::BlockStore;
use crate::repo::NameStore;
use crate::repo::ObjectError;
use crate::repo::StoreError;
use crate::repo::TagName;

/// The capability bundle a store is instantiated over: hash, step, contents
/// and tag types chosen together.
pub trait Schema: Send + Sync + 'static {
    type Hash: HashProtocol;
    type Step: Step;
    type Contents: Contents;
    type Tag: TagName;
}

/// Blake3 digests, string steps, string contents, string branch names.
pub struct Basic;

impl Schema for Basic {
    type Hash = crate::hash::Blake3;
    type Step = String;
    type Contents = String;
    type Tag = String;
}

pub type CommitHandle<S> = Handle<<S as Schema>::Hash, CommitKind>;
pub type NodeHandle<S> = Handle<<S as Schema>::Hash, NodeKind>;
pub type ContentsHandle<S> = Handle<<S as Schema>::Hash, ContentsKind>;

pub type BlocksErr<S, B> = <B as BlockStore<<S as Schema>::Hash>>::Err;
pub type NamesErr<S, B> = <B as NameStore<<S as Schema>::Tag, <S as Schema>::Hash>>::Err;

/// The error type of every engine operation over schema `S` and backend `B`.
pub type Error<S, B> = StoreError<BlocksErr<S, B>, NamesErr<S, B>>;

/// Attempts before an optimistic head update reports a conflict.
const UPDATE_RETRIES: usize = 8;

enum HeadRef<S: Schema> {
    Attached(S::Tag),
    Detached(Option<CommitHandle<S>>),
}

/// A session handle on a store.
pub struct Store<S: Schema, B: Backend<S::Hash, S::Tag>> {
    backend: B,
    config: Config,
    task: Task,
    head: HeadRef<S>,
}

impl<S, B> Store<S, B>
where
    S: Schema,
    B: Backend<S::Hash, S::Tag>,
{
    /// An attached handle on `tag`. An absent branch is simply empty
    /// history; it comes into existence with the first head update.
    pub fn of_tag(backend: B, config: Config, task: Task, tag: S::Tag) -> Self {
        Store {
            backend,
            config,
            task,
            head: HeadRef::Attached(tag),
        }
    }

    /// An attached handle on the distinguished `master` branch.
    pub fn master(backend: B, config: Config, task: Task) -> Self {
        Store::of_tag(backend, config, task, S::Tag::master())
    }

    /// A detached handle pinned at `head`.
    pub fn of_head(backend: B, config: Config, task: Task, head: CommitHandle<S>) -> Self {
        Store {
            backend,
            config,
            task,
            head: HeadRef::Detached(Some(head)),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn task(&self) -> &Task {
        &self.task
    }

    /// The branch this handle is attached to, absent when detached.
    pub fn tag(&self) -> Option<&S::Tag> {
        match &self.head {
            HeadRef::Attached(tag) => Some(tag),
            HeadRef::Detached(_) => None,
        }
    }

    /// The currently visible head commit.
    pub async fn head(&self) -> Result<Option<CommitHandle<S>>, Error<S, B>> {
        match &self.head {
            HeadRef::Attached(tag) => Ok(self
                .backend
                .head(tag)
                .await
                .map_err(StoreError::Names)?
                .map(Handle::from_digest)),
            HeadRef::Detached(pin) => Ok(*pin),
        }
    }

    pub async fn head_exn(&self) -> Result<CommitHandle<S>, Error<S, B>> {
        self.head().await?.ok_or(StoreError::NotFound)
    }

    /// Points this handle at `tag`; the lineages stay independent.
    pub fn switch(&mut self, tag: S::Tag) {
        self.head = HeadRef::Attached(tag);
    }

    /// Drops the branch association, retaining the current head.
    pub async fn detach(&mut self) -> Result<(), Error<S, B>> {
        let head = self.head().await?;
        self.head = HeadRef::Detached(head);
        Ok(())
    }

    /// Creates branch `tag` at the current head and attaches this handle to
    /// it. Fails with `DuplicatedTag` when the branch exists.
    pub async fn update_tag(&mut self, tag: S::Tag) -> Result<(), Error<S, B>> {
        if self.backend.mem(&tag).await.map_err(StoreError::Names)? {
            return Err(StoreError::DuplicatedTag(format!("{tag:?}")));
        }
        self.update_tag_force(tag).await
    }

    /// Like [`update_tag`](Self::update_tag) but overwrites an existing
    /// branch.
    pub async fn update_tag_force(&mut self, tag: S::Tag) -> Result<(), Error<S, B>> {
        if let Some(head) = self.head().await? {
            self.backend
                .update(&tag, head.digest())
                .await
                .map_err(StoreError::Names)?;
        }
        self.head = HeadRef::Attached(tag);
        Ok(())
    }

    /// A new handle attached to a fresh branch `tag` at the current head.
    pub async fn clone_branch(&self, tag: S::Tag) -> Result<Store<S, B>, Error<S, B>> {
        if self.backend.mem(&tag).await.map_err(StoreError::Names)? {
            return Err(StoreError::DuplicatedTag(format!("{tag:?}")));
        }
        self.clone_branch_force(tag).await
    }

    /// Like [`clone_branch`](Self::clone_branch) but overwrites.
    pub async fn clone_branch_force(&self, tag: S::Tag) -> Result<Store<S, B>, Error<S, B>> {
        if let Some(head) = self.head().await? {
            self.backend
                .update(&tag, head.digest())
                .await
                .map_err(StoreError::Names)?;
        }
        Ok(Store {
            backend: self.backend.clone(),
            config: self.config.clone(),
            task: self.task.clone(),
            head: HeadRef::Attached(tag),
        })
    }

    /// Deletes branch `tag`.
    pub async fn remove_tag(&self, tag: &S::Tag) -> Result<(), Error<S, B>> {
        self.backend.remove(tag).await.map_err(StoreError::Names)
    }

    /// All known branch tips.
    pub async fn heads(&self) -> Result<Vec<(S::Tag, CommitHandle<S>)>, Error<S, B>> {
        Ok(self
            .backend
            .dump()
            .await
            .map_err(StoreError::Names)?
            .into_iter()
            .map(|(tag, digest)| (tag, Handle::from_digest(digest)))
            .collect())
    }

    /// Makes `head` the visible head, deleting the branch entry (or
    /// clearing the pin) when it is absent.
    pub(crate) async fn set_visible_head(
        &mut self,
        head: Option<CommitHandle<S>>,
    ) -> Result<(), Error<S, B>> {
        match head {
            Some(head) => self.update_head(head).await,
            None => match &mut self.head {
                HeadRef::Attached(tag) => {
                    let tag = tag.clone();
                    self.backend.remove(&tag).await.map_err(StoreError::Names)
                }
                HeadRef::Detached(pin) => {
                    *pin = None;
                    Ok(())
                }
            },
        }
    }

    /// Moves the branch pointer (or the detached pin) unconditionally.
    pub async fn update_head(&mut self, head: CommitHandle<S>) -> Result<(), Error<S, B>> {
        match &mut self.head {
            HeadRef::Attached(tag) => {
                let tag = tag.clone();
                self.backend
                    .update(&tag, head.digest())
                    .await
                    .map_err(StoreError::Names)
            }
            HeadRef::Detached(pin) => {
                *pin = Some(head);
                Ok(())
            }
        }
    }

    /// Advances the head from `expected` to `new`, failing when another
    /// handle moved it in between. This re-read-then-write emulates a
    /// compare-and-swap over the plain name store.
    pub(crate) async fn try_advance(
        &mut self,
        expected: Option<CommitHandle<S>>,
        new: CommitHandle<S>,
    ) -> Result<bool, Error<S, B>> {
        match &mut self.head {
            HeadRef::Detached(pin) => {
                *pin = Some(new);
                Ok(true)
            }
            HeadRef::Attached(tag) => {
                let tag = tag.clone();
                let current = self
                    .backend
                    .head(&tag)
                    .await
                    .map_err(StoreError::Names)?
                    .map(Handle::from_digest);
                if current != expected {
                    debug!("head moved during optimistic update, retrying");
                    return Ok(false);
                }
                self.backend
                    .update(&tag, new.digest())
                    .await
                    .map_err(StoreError::Names)?;
                Ok(true)
            }
        }
    }

    async fn root_of(
        &self,
        head: Option<CommitHandle<S>>,
    ) -> Result<Option<NodeHandle<S>>, Error<S, B>> {
        match head {
            Some(head) => Ok(read_commit_exn(&self.backend, head).await?.node),
            None => Ok(None),
        }
    }

    /// Reads the contents under `key` through the current head.
    pub async fn read(&self, key: &[S::Step]) -> Result<Option<S::Contents>, Error<S, B>> {
        let Some(head) = self.head().await? else {
            return Ok(None);
        };
        match graph::find(&self.backend, head, key).await? {
            Some(handle) => Ok(Some(read_contents_exn(&self.backend, handle).await?)),
            None => Ok(None),
        }
    }

    pub async fn read_exn(&self, key: &[S::Step]) -> Result<S::Contents, Error<S, B>> {
        self.read(key).await?.ok_or(StoreError::NotFound)
    }

    pub async fn mem(&self, key: &[S::Step]) -> Result<bool, Error<S, B>> {
        Ok(self.read(key).await?.is_some())
    }

    /// The steps immediately below `key`: sub-directories and leaves alike.
    pub async fn list(&self, key: &[S::Step]) -> Result<Vec<S::Step>, Error<S, B>> {
        let root = self.root_of(self.head().await?).await?;
        let Some(node) = graph::node_at(&self.backend, root, key).await? else {
            return Ok(Vec::new());
        };
        let node: Node<S::Hash, S::Step> = read_node_exn(&self.backend, node).await?;
        Ok(node.steps())
    }

    /// Sets `key` to `value`: writes the new spine of nodes bottom-up, a
    /// commit with the previous head as parent, and advances the branch.
    pub async fn update(
        &mut self,
        key: &[S::Step],
        value: S::Contents,
    ) -> Result<CommitHandle<S>, Error<S, B>> {
        let contents = add_contents(&self.backend, &value)
            .await
            .map_err(StoreError::Blocks)?;
        self.commit_graft(key, Graft::Contents(Some(contents)))
            .await
    }

    /// Removes the contents under `key`, pruning emptied nodes.
    pub async fn remove(&mut self, key: &[S::Step]) -> Result<CommitHandle<S>, Error<S, B>> {
        self.commit_graft(key, Graft::Contents(None)).await
    }

    /// Optimistic write loop shared by updates, removals and view commits.
    pub(crate) async fn commit_graft(
        &mut self,
        key: &[S::Step],
        patch: Graft<S::Hash>,
    ) -> Result<CommitHandle<S>, Error<S, B>> {
        if key.is_empty() && matches!(patch, Graft::Contents(_)) {
            return Err(Conflict::new("cannot write contents at the empty key").into());
        }
        for _attempt in 0..UPDATE_RETRIES {
            let old_head = self.head().await?;
            let old_root = self.root_of(old_head).await?;
            let new_root = graft::<S, B>(&self.backend, old_root, key, patch).await?;
            let commit = Commit::new(self.task.restamped(), new_root, old_head);
            let handle = add_commit(&self.backend, &commit)
                .await
                .map_err(StoreError::Blocks)?;
            if self.try_advance(old_head, handle).await? {
                return Ok(handle);
            }
        }
        Err(Conflict::new("optimistic head update exhausted its retries").into())
    }

    /// Three-way merge of `theirs` into the current head.
    ///
    /// Already-merged heads are a no-op; a head reachable from `theirs`
    /// fast-forwards the pointer without a new commit; diverged heads merge
    /// their trees against the lowest common ancestor and produce a merge
    /// commit with both parents. A conflict leaves the branch untouched.
    pub async fn merge_head(&mut self, theirs: CommitHandle<S>) -> Result<(), Error<S, B>> {
        for _attempt in 0..UPDATE_RETRIES {
            let Some(ours) = self.head().await? else {
                self.update_head(theirs).await?;
                return Ok(());
            };
            if ours == theirs || graph::is_ancestor(&self.backend, theirs, ours).await? {
                return Ok(());
            }
            if graph::is_ancestor(&self.backend, ours, theirs).await? {
                debug!("fast-forward merge");
                if self.try_advance(Some(ours), theirs).await? {
                    return Ok(());
                }
                continue;
            }

            let lcas = graph::lca(&self.backend, ours, theirs).await?;
            if lcas.is_empty() {
                return Err(Conflict::new("the histories share no common ancestor").into());
            }
            debug!(candidates = lcas.len(), "three-way merge");

            let our_commit = read_commit_exn(&self.backend, ours).await?;
            let their_commit = read_commit_exn(&self.backend, theirs).await?;

            let mut outcome = Err(Conflict::new("no merge candidates"));
            for lca in lcas {
                let base = read_commit_exn(&self.backend, lca).await?.node;
                match merge_nodes::<S, B>(&self.backend, base, our_commit.node, their_commit.node)
                    .await
                {
                    Ok(root) => {
                        outcome = Ok(root);
                        break;
                    }
                    Err(StoreError::Conflict(c)) => outcome = Err(c),
                    Err(e) => return Err(e),
                }
            }
            let root = outcome?;

            let commit = Commit::new(self.task.restamped(), root, [ours, theirs]);
            let handle = add_commit(&self.backend, &commit)
                .await
                .map_err(StoreError::Blocks)?;
            if self.try_advance(Some(ours), handle).await? {
                return Ok(());
            }
        }
        Err(Conflict::new("optimistic head update exhausted its retries").into())
    }

    /// Merges the head of branch `tag` into this handle.
    pub async fn merge_tag(&mut self, tag: &S::Tag) -> Result<(), Error<S, B>> {
        let theirs = self
            .backend
            .head(tag)
            .await
            .map_err(StoreError::Names)?
            .map(Handle::from_digest)
            .ok_or(StoreError::NotFound)?;
        self.merge_head(theirs).await
    }

    /// Subscribes to head changes of the attached branch, starting with the
    /// current head.
    pub async fn watch(&self) -> Result<crate::watch::HeadStream<S::Hash>, Error<S, B>> {
        let tag = match &self.head {
            HeadRef::Attached(tag) => tag.clone(),
            HeadRef::Detached(_) => return Err(StoreError::NotFound),
        };
        let current = self
            .backend
            .head(&tag)
            .await
            .map_err(StoreError::Names)?;
        Ok(self.backend.watch(&tag, Some(current)))
    }
}

/// A patch applied at a key while rebuilding the spine of a tree.
pub(crate) enum Graft<H> {
    /// Set or remove the contents edge at the key.
    Contents(Option<Handle<H, ContentsKind>>),
    /// Replace (or remove) the whole subtree at the key.
    Subtree(Option<Handle<H, NodeKind>>),
}

impl<H> Clone for Graft<H> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<H> Copy for Graft<H> {}

/// Rebuilds the path from `root` down to `key`, applies `patch` there and
/// hashes the new spine bottom-up. Nodes left without edges are pruned.
pub(crate) fn graft<'a, S, B>(
    blocks: &'a B,
    root: Option<NodeHandle<S>>,
    key: &'a [S::Step],
    patch: Graft<S::Hash>,
) -> Pin<Box<dyn Future<Output = Result<Option<NodeHandle<S>>, Error<S, B>>> + 'a>>
where
    S: Schema,
    B: Backend<S::Hash, S::Tag>,
{
    Box::pin(async move {
        if key.is_empty() {
            return match patch {
                Graft::Subtree(subtree) => Ok(subtree),
                Graft::Contents(_) => {
                    debug_assert!(false, "contents graft at the empty key");
                    Ok(root)
                }
            };
        }

        let node: Node<S::Hash, S::Step> = match root {
            Some(handle) => read_node_exn(blocks, handle).await?,
            None => Node::empty(),
        };

        let step = key[0].clone();
        let node = if key.len() == 1 {
            if let Graft::Contents(contents) = patch {
                node.with_contents(step, contents)
            } else {
                let child = graft::<S, B>(blocks, node.succ(&step), &key[1..], patch).await?;
                node.with_succ(step, child)
            }
        } else {
            let child = graft::<S, B>(blocks, node.succ(&step), &key[1..], patch).await?;
            node.with_succ(step, child)
        };

        if node.is_empty() {
            return Ok(None);
        }
        let handle = add_node(blocks, &node).await.map_err(StoreError::Blocks)?;
        Ok(Some(handle))
    })
}

async fn read_optional_contents<S, B>(
    blocks: &B,
    handle: Option<ContentsHandle<S>>,
) -> Result<Option<S::Contents>, ObjectError<BlocksErr<S, B>>>
where
    S: Schema,
    B: Backend<S::Hash, S::Tag>,
{
    match handle {
        Some(handle) => Ok(Some(read_contents_exn(blocks, handle).await?)),
        None => Ok(None),
    }
}

/// Recursive three-way merge of node trees.
///
/// Edges are joined per step: contents edges merge through the contents
/// capability lifted with [`merge::option`], child edges merge recursively.
/// Equal sides short-circuit without loading values, which the merge laws
/// make sound. The merged tree is written as it is built; a conflict
/// surfaces with the step path that produced it.
pub(crate) fn merge_nodes<'a, S, B>(
    blocks: &'a B,
    old: Option<NodeHandle<S>>,
    a: Option<NodeHandle<S>>,
    b: Option<NodeHandle<S>>,
) -> Pin<Box<dyn Future<Output = Result<Option<NodeHandle<S>>, Error<S, B>>> + 'a>>
where
    S: Schema,
    B: Backend<S::Hash, S::Tag>,
{
    Box::pin(async move {
        if a == b {
            return Ok(a);
        }

        let load = |handle: Option<NodeHandle<S>>| async move {
            match handle {
                Some(handle) => read_node_exn::<S::Hash, S::Step, B>(blocks, handle).await,
                None => Ok(Node::empty()),
            }
        };
        let old_node = load(old).await?;
        let a_node = load(a).await?;
        let b_node = load(b).await?;

        let mut steps = a_node.steps();
        steps.extend(b_node.steps());
        steps.extend(old_node.steps());
        steps.sort();
        steps.dedup();

        let contents_merge = merge::option(S::Contents::merge());
        let mut merged: Node<S::Hash, S::Step> = Node::empty();

        for step in steps {
            let o = old_node.contents(&step);
            let x = a_node.contents(&step);
            let y = b_node.contents(&step);
            let contents = if x == y {
                x
            } else {
                let o = read_optional_contents::<S, B>(blocks, o).await?;
                let x = read_optional_contents::<S, B>(blocks, x).await?;
                let y = read_optional_contents::<S, B>(blocks, y).await?;
                match contents_merge.run(Some(&o), &x, &y) {
                    Ok(Some(v)) => Some(
                        add_contents(blocks, &v)
                            .await
                            .map_err(StoreError::Blocks)?,
                    ),
                    Ok(None) => None,
                    Err(c) => return Err(c.at(format_args!("{step:?}")).into()),
                }
            };
            if contents.is_some() {
                merged = merged.with_contents(step.clone(), contents);
            }

            let child = match merge_nodes::<S, B>(
                blocks,
                old_node.succ(&step),
                a_node.succ(&step),
                b_node.succ(&step),
            )
            .await
            {
                Ok(child) => child,
                Err(StoreError::Conflict(c)) => {
                    return Err(c.at(format_args!("{step:?}")).into())
                }
                Err(e) => return Err(e),
            };
            if child.is_some() {
                merged = merged.with_succ(step, child);
            }
        }

        if merged.is_empty() {
            return Ok(None);
        }
        let handle = add_node(blocks, &merged)
            .await
            .map_err(StoreError::Blocks)?;
        Ok(Some(handle))
    })
}
