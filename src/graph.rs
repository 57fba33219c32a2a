//! Graph traversal over the Merkle DAG.
//!
//! Everything here walks hashes through a [`BlockStore`]: path lookups from
//! a commit down to a contents leaf, bounded history walks, ancestor tests
//! and lowest common ancestors. Walks visit every hash at most once and are
//! bounded by an edge `depth` from the roots and by a `min` frontier of
//! digests that terminate the walk.

use std::collections::BTreeSet;
use std::collections::VecDeque;

use crate::hash::CommitKind;
use crate::hash::ContentsKind;
use crate::hash::Digest;
use crate::hash::Handle;
use crate::hash::HashProtocol;
use crate::hash::NodeKind;
use crate::path::Step;
use crate::repo::read_commit_exn;
use crate::repo::read_node_exn;
use crate::repo::BlockStore;
use crate::repo::ObjectError;

/// Looks the contents digest up under `key`, starting from a commit.
///
/// A missing edge anywhere along the path makes the result absent, never an
/// error.
pub async fn find<H, S, B>(
    blocks: &B,
    commit: Handle<H, CommitKind>,
    key: &[S],
) -> Result<Option<Handle<H, ContentsKind>>, ObjectError<B::Err>>
where
    H: HashProtocol,
    S: Step,
    B: BlockStore<H>,
{
    let commit = read_commit_exn(blocks, commit).await?;
    find_in_tree(blocks, commit.node, key).await
}

/// [`find`], but starting from an optional subtree root.
pub async fn find_in_tree<H, S, B>(
    blocks: &B,
    root: Option<Handle<H, NodeKind>>,
    key: &[S],
) -> Result<Option<Handle<H, ContentsKind>>, ObjectError<B::Err>>
where
    H: HashProtocol,
    S: Step,
    B: BlockStore<H>,
{
    let Some((last, prefix)) = key.split_last() else {
        return Ok(None);
    };
    let Some(node) = node_at(blocks, root, prefix).await? else {
        return Ok(None);
    };
    let node = read_node_exn::<H, S, B>(blocks, node).await?;
    Ok(node.contents(last))
}

/// The subtree handle at `key`; the empty key names the root itself.
pub async fn node_at<H, S, B>(
    blocks: &B,
    root: Option<Handle<H, NodeKind>>,
    key: &[S],
) -> Result<Option<Handle<H, NodeKind>>, ObjectError<B::Err>>
where
    H: HashProtocol,
    S: Step,
    B: BlockStore<H>,
{
    let mut current = match root {
        Some(root) => root,
        None => return Ok(None),
    };
    for step in key {
        let node = read_node_exn::<H, S, B>(blocks, current).await?;
        match node.succ(step) {
            Some(child) => current = child,
            None => return Ok(None),
        }
    }
    Ok(Some(current))
}

/// Enumerates the commits reachable from `roots` through parent edges.
///
/// `depth` bounds the number of parent edges walked from the roots; a
/// commit whose digest is in `min` is included but terminates its branch of
/// the walk. Each commit is visited at most once, in breadth-first order.
pub async fn history<H, B>(
    blocks: &B,
    roots: &[Handle<H, CommitKind>],
    depth: Option<usize>,
    min: &BTreeSet<Digest<H>>,
) -> Result<Vec<Handle<H, CommitKind>>, ObjectError<B::Err>>
where
    H: HashProtocol,
    B: BlockStore<H>,
{
    let mut visited: BTreeSet<Digest<H>> = BTreeSet::new();
    let mut queue: VecDeque<(Handle<H, CommitKind>, usize)> =
        roots.iter().map(|&handle| (handle, 0)).collect();
    let mut out = Vec::new();

    while let Some((handle, level)) = queue.pop_front() {
        if !visited.insert(handle.digest()) {
            continue;
        }
        out.push(handle);

        if min.contains(&handle.digest()) {
            continue;
        }
        if depth.is_some_and(|depth| level >= depth) {
            continue;
        }

        let commit = read_commit_exn(blocks, handle).await?;
        for parent in commit.parents {
            queue.push_back((parent, level + 1));
        }
    }
    Ok(out)
}

/// Whether `ancestor` is reachable from `descendant` via parent edges.
/// Every commit is an ancestor of itself.
pub async fn is_ancestor<H, B>(
    blocks: &B,
    ancestor: Handle<H, CommitKind>,
    descendant: Handle<H, CommitKind>,
) -> Result<bool, ObjectError<B::Err>>
where
    H: HashProtocol,
    B: BlockStore<H>,
{
    let target = ancestor.digest();
    let mut visited: BTreeSet<Digest<H>> = BTreeSet::new();
    let mut stack = vec![descendant];

    while let Some(handle) = stack.pop() {
        if handle.digest() == target {
            return Ok(true);
        }
        if !visited.insert(handle.digest()) {
            continue;
        }
        let commit = read_commit_exn(blocks, handle).await?;
        stack.extend(commit.parents);
    }
    Ok(false)
}

/// Lowest common ancestors of two commits.
///
/// The result is the set of common ancestors with no descendant inside the
/// common-ancestor set, in ascending digest order. It may hold more than
/// one commit (criss-cross histories) or none (disjoint histories).
pub async fn lca<H, B>(
    blocks: &B,
    a: Handle<H, CommitKind>,
    b: Handle<H, CommitKind>,
) -> Result<Vec<Handle<H, CommitKind>>, ObjectError<B::Err>>
where
    H: HashProtocol,
    B: BlockStore<H>,
{
    let none = BTreeSet::new();
    let of_a = history(blocks, &[a], None, &none).await?;
    let of_b: BTreeSet<Digest<H>> = history(blocks, &[b], None, &none)
        .await?
        .into_iter()
        .map(|h| h.digest())
        .collect();

    let common: Vec<Handle<H, CommitKind>> = of_a
        .into_iter()
        .filter(|h| of_b.contains(&h.digest()))
        .collect();
    let common_digests: BTreeSet<Digest<H>> = common.iter().map(|h| h.digest()).collect();

    // The common-ancestor set is closed under parents, so any non-maximal
    // member is the direct parent of another member.
    let mut dominated: BTreeSet<Digest<H>> = BTreeSet::new();
    for handle in &common {
        let commit = read_commit_exn(blocks, *handle).await?;
        for parent in commit.parents {
            if common_digests.contains(&parent.digest()) {
                dominated.insert(parent.digest());
            }
        }
    }

    let mut result: Vec<Handle<H, CommitKind>> = common
        .into_iter()
        .filter(|h| !dominated.contains(&h.digest()))
        .collect();
    result.sort();
    Ok(result)
}

/// The kind of object a walk item addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkKind {
    Commit,
    Node,
    Contents,
}

/// One reachable object together with its outgoing hash edges; the input
/// the external graph exporter formats.
pub struct WalkItem<H> {
    pub digest: Digest<H>,
    pub kind: WalkKind,
    pub edges: Vec<Digest<H>>,
}

impl<H> Clone for WalkItem<H> {
    fn clone(&self) -> Self {
        WalkItem {
            digest: self.digest,
            kind: self.kind,
            edges: self.edges.clone(),
        }
    }
}

impl<H> std::fmt::Debug for WalkItem<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalkItem")
            .field("digest", &self.digest)
            .field("kind", &self.kind)
            .field("edges", &self.edges)
            .finish()
    }
}

/// Enumerates every hash reachable from `roots`.
///
/// In history mode (`full = false`) only commits and their parent edges are
/// visited. In full mode each admitted commit also contributes its node
/// tree and contents. Commits in `min` terminate the walk: they appear in
/// the result but neither their parents nor their tree are followed.
pub async fn walk<H, S, B>(
    blocks: &B,
    roots: &[Handle<H, CommitKind>],
    depth: Option<usize>,
    min: &BTreeSet<Digest<H>>,
    full: bool,
) -> Result<Vec<WalkItem<H>>, ObjectError<B::Err>>
where
    H: HashProtocol,
    S: Step,
    B: BlockStore<H>,
{
    let commits = history(blocks, roots, depth, min).await?;
    let mut out = Vec::new();
    let mut seen_nodes: BTreeSet<Digest<H>> = BTreeSet::new();
    let mut seen_contents: BTreeSet<Digest<H>> = BTreeSet::new();

    for handle in commits {
        let terminal = min.contains(&handle.digest());
        let commit = read_commit_exn(blocks, handle).await?;

        let mut edges: Vec<Digest<H>> = commit.parents.iter().map(|p| p.digest()).collect();
        if let Some(node) = commit.node {
            edges.push(node.digest());
        }
        out.push(WalkItem {
            digest: handle.digest(),
            kind: WalkKind::Commit,
            edges,
        });

        if !full || terminal {
            continue;
        }
        let Some(root) = commit.node else {
            continue;
        };

        let mut stack = vec![root];
        while let Some(node_handle) = stack.pop() {
            if !seen_nodes.insert(node_handle.digest()) {
                continue;
            }
            let node = read_node_exn::<H, S, B>(blocks, node_handle).await?;

            let mut edges: Vec<Digest<H>> = Vec::new();
            for contents in node.contents_handles() {
                edges.push(contents.digest());
                if seen_contents.insert(contents.digest()) {
                    if !blocks
                        .contains(&contents.digest())
                        .await
                        .map_err(ObjectError::Backend)?
                    {
                        return Err(ObjectError::Dangling(contents.digest().to_hex()));
                    }
                    out.push(WalkItem {
                        digest: contents.digest(),
                        kind: WalkKind::Contents,
                        edges: Vec::new(),
                    });
                }
            }
            for child in node.child_handles() {
                edges.push(child.digest());
                stack.push(child);
            }
            out.push(WalkItem {
                digest: node_handle.digest(),
                kind: WalkKind::Node,
                edges,
            });
        }
    }
    Ok(out)
}
