//! The node model.
//!
//! A node is the directory-like object of the tree: a set of labeled edges
//! where each step may carry a contents edge ("file here"), a child edge
//! ("subtree here"), or both — the two kinds are disjoint namespaces. Nodes
//! reference contents and children by hash only and never own them.
//!
//! All operations here are pure and return new node values; writing a node
//! into the store is a separate `add`. The canonical serialization emits
//! edges in `(step, kind)` order and decoding rejects misordered or
//! redundant edges, so a node's digest depends only on its edge set.

use std::collections::BTreeMap;
use std::fmt;

use anybytes::Bytes;
use itertools::Itertools;

use crate::hash::ContentsKind;
use crate::hash::Digest;
use crate::hash::Handle;
use crate::hash::HashProtocol;
use crate::hash::NodeKind;
use crate::path::Step;
use crate::wire;
use crate::wire::DecodeError;
use crate::wire::Reader;

const EDGE_CONTENTS: u8 = 0;
const EDGE_CHILD: u8 = 1;

/// One outgoing edge of a node.
pub enum Edge<H> {
    Contents(Digest<H>),
    Child(Digest<H>),
}

impl<H> Clone for Edge<H> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<H> Copy for Edge<H> {}

impl<H> PartialEq for Edge<H> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Edge::Contents(a), Edge::Contents(b)) => a == b,
            (Edge::Child(a), Edge::Child(b)) => a == b,
            _ => false,
        }
    }
}

impl<H> Eq for Edge<H> {}

impl<H> fmt::Debug for Edge<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Edge::Contents(d) => f.debug_tuple("Contents").field(d).finish(),
            Edge::Child(d) => f.debug_tuple("Child").field(d).finish(),
        }
    }
}

pub struct Node<H, S: Ord> {
    contents: BTreeMap<S, Handle<H, ContentsKind>>,
    children: BTreeMap<S, Handle<H, NodeKind>>,
}

impl<H, S: Ord + Clone> Clone for Node<H, S> {
    fn clone(&self) -> Self {
        Node {
            contents: self.contents.clone(),
            children: self.children.clone(),
        }
    }
}

impl<H, S: Ord> PartialEq for Node<H, S> {
    fn eq(&self, other: &Self) -> bool {
        self.contents == other.contents && self.children == other.children
    }
}

impl<H, S: Ord> Eq for Node<H, S> {}

impl<H, S: Ord + fmt::Debug> fmt::Debug for Node<H, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("contents", &self.contents)
            .field("children", &self.children)
            .finish()
    }
}

impl<H, S: Ord> Default for Node<H, S> {
    fn default() -> Self {
        Node::empty()
    }
}

impl<H, S: Ord> Node<H, S> {
    /// The node with no edges.
    pub fn empty() -> Self {
        Node {
            contents: BTreeMap::new(),
            children: BTreeMap::new(),
        }
    }

    pub fn new(
        contents: impl IntoIterator<Item = (S, Handle<H, ContentsKind>)>,
        children: impl IntoIterator<Item = (S, Handle<H, NodeKind>)>,
    ) -> Self {
        Node {
            contents: contents.into_iter().collect(),
            children: children.into_iter().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.contents.is_empty() && self.children.is_empty()
    }

    pub fn contents(&self, step: &S) -> Option<Handle<H, ContentsKind>> {
        self.contents.get(step).copied()
    }

    pub fn succ(&self, step: &S) -> Option<Handle<H, NodeKind>> {
        self.children.get(step).copied()
    }

    pub fn child_handles(&self) -> impl Iterator<Item = Handle<H, NodeKind>> + '_ {
        self.children.values().copied()
    }

    pub fn contents_handles(&self) -> impl Iterator<Item = Handle<H, ContentsKind>> + '_ {
        self.contents.values().copied()
    }
}

impl<H, S: Step> Node<H, S> {
    /// Returns this node with the contents edge at `step` set or removed.
    pub fn with_contents(&self, step: S, handle: Option<Handle<H, ContentsKind>>) -> Self {
        let mut node = self.clone();
        match handle {
            Some(h) => {
                node.contents.insert(step, h);
            }
            None => {
                node.contents.remove(&step);
            }
        }
        node
    }

    /// Returns this node with the child edge at `step` set or removed.
    pub fn with_succ(&self, step: S, handle: Option<Handle<H, NodeKind>>) -> Self {
        let mut node = self.clone();
        match handle {
            Some(h) => {
                node.children.insert(step, h);
            }
            None => {
                node.children.remove(&step);
            }
        }
        node
    }

    /// All steps that carry at least one edge, in step order.
    pub fn steps(&self) -> Vec<S> {
        self.contents
            .keys()
            .chain(self.children.keys())
            .cloned()
            .sorted()
            .dedup()
            .collect()
    }

    /// All edges in canonical `(step, kind)` order.
    pub fn edges(&self) -> Vec<(S, Edge<H>)> {
        let mut edges = Vec::with_capacity(self.contents.len() + self.children.len());
        for step in self.steps() {
            if let Some(h) = self.contents.get(&step) {
                edges.push((step.clone(), Edge::Contents(h.digest())));
            }
            if let Some(h) = self.children.get(&step) {
                edges.push((step.clone(), Edge::Child(h.digest())));
            }
        }
        edges
    }
}

impl<H: HashProtocol, S: Step> Node<H, S> {
    pub fn encode(&self) -> Bytes {
        let mut out = Vec::new();
        let mut step_buf = Vec::new();
        for (step, edge) in self.edges() {
            let (kind, digest) = match edge {
                Edge::Contents(d) => (EDGE_CONTENTS, d),
                Edge::Child(d) => (EDGE_CHILD, d),
            };
            wire::put_u8(&mut out, kind);
            step_buf.clear();
            step.encode(&mut step_buf);
            wire::put_frame(&mut out, &step_buf);
            wire::put_digest(&mut out, &digest.raw);
        }
        Bytes::from(out)
    }

    pub fn decode(bytes: &Bytes) -> Result<Self, DecodeError> {
        let mut reader = Reader::new(bytes.as_ref());
        let mut node = Node::empty();
        let mut prev: Option<(S, u8)> = None;

        while !reader.is_empty() {
            let kind = reader.u8()?;
            let step = S::decode(reader.frame()?)?;
            let digest = Digest::new(reader.digest()?);

            if let Some((prev_step, prev_kind)) = &prev {
                match (prev_step, *prev_kind).cmp(&(&step, kind)) {
                    std::cmp::Ordering::Less => {}
                    std::cmp::Ordering::Equal => return Err(DecodeError::Redundant),
                    std::cmp::Ordering::Greater => return Err(DecodeError::BadOrdering),
                }
            }
            prev = Some((step.clone(), kind));

            match kind {
                EDGE_CONTENTS => {
                    node.contents.insert(step, Handle::from_digest(digest));
                }
                EDGE_CHILD => {
                    node.children.insert(step, Handle::from_digest(digest));
                }
                _ => return Err(DecodeError::BadFrame),
            }
        }
        Ok(node)
    }

    /// The digest of the canonical serialization.
    pub fn digest(&self) -> Digest<H> {
        Digest::of_bytes(self.encode().as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::Blake3;

    fn contents_handle(payload: &[u8]) -> Handle<Blake3, ContentsKind> {
        Handle::from_digest(Digest::of_bytes(payload))
    }

    fn node_handle(payload: &[u8]) -> Handle<Blake3, NodeKind> {
        Handle::from_digest(Digest::of_bytes(payload))
    }

    #[test]
    fn empty_node_roundtrip() {
        let node: Node<Blake3, String> = Node::empty();
        assert!(node.is_empty());
        let decoded = Node::decode(&node.encode()).unwrap();
        assert_eq!(node, decoded);
    }

    #[test]
    fn edge_kinds_share_a_step() {
        let node: Node<Blake3, String> = Node::empty()
            .with_contents("a".to_string(), Some(contents_handle(b"file")))
            .with_succ("a".to_string(), Some(node_handle(b"dir")));
        assert!(node.contents(&"a".to_string()).is_some());
        assert!(node.succ(&"a".to_string()).is_some());
        assert_eq!(node.steps(), vec!["a".to_string()]);
        assert_eq!(node.edges().len(), 2);

        let decoded = Node::decode(&node.encode()).unwrap();
        assert_eq!(node, decoded);
    }

    #[test]
    fn digest_depends_only_on_edges() {
        let a: Node<Blake3, String> = Node::empty()
            .with_contents("x".to_string(), Some(contents_handle(b"1")))
            .with_contents("y".to_string(), Some(contents_handle(b"2")));
        let b: Node<Blake3, String> = Node::empty()
            .with_contents("y".to_string(), Some(contents_handle(b"2")))
            .with_contents("x".to_string(), Some(contents_handle(b"1")));
        assert_eq!(a.digest(), b.digest());
    }

    #[test]
    fn removal_returns_a_new_value() {
        let node: Node<Blake3, String> =
            Node::empty().with_contents("k".to_string(), Some(contents_handle(b"v")));
        let removed = node.with_contents("k".to_string(), None);
        assert!(removed.is_empty());
        assert!(!node.is_empty());
    }

    #[test]
    fn decode_rejects_misordered_edges() {
        let b: Node<Blake3, String> = Node::empty()
            .with_contents("b".to_string(), Some(contents_handle(b"2")));
        let a: Node<Blake3, String> = Node::empty()
            .with_contents("a".to_string(), Some(contents_handle(b"1")));
        let mut swapped = b.encode().as_ref().to_vec();
        swapped.extend_from_slice(a.encode().as_ref());
        let err = Node::<Blake3, String>::decode(&Bytes::from(swapped)).unwrap_err();
        assert_eq!(err, DecodeError::BadOrdering);
    }

    #[test]
    fn decode_rejects_redundant_edges() {
        let node: Node<Blake3, String> =
            Node::empty().with_contents("a".to_string(), Some(contents_handle(b"1")));
        let mut doubled = node.encode().as_ref().to_vec();
        doubled.extend_from_slice(node.encode().as_ref());
        let err = Node::<Blake3, String>::decode(&Bytes::from(doubled)).unwrap_err();
        assert_eq!(err, DecodeError::Redundant);
    }
}
