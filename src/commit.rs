//! Commits and tasks.
//!
//! A commit is the immutable history record: audit metadata ([`Task`]), an
//! optional root node and an ordered list of parent commits, all addressed
//! by hash. A commit without a root node is the empty-history sentinel;
//! backends may refuse to store it, the model itself allows it.

use anybytes::Bytes;
use hifitime::Epoch;

use crate::hash::CommitKind;
use crate::hash::Digest;
use crate::hash::Handle;
use crate::hash::HashProtocol;
use crate::hash::NodeKind;
use crate::wire;
use crate::wire::DecodeError;
use crate::wire::Reader;

/// Audit metadata attached to every commit.
///
/// `uid` is generated by the store and opaque; two tasks from the same
/// owner at the same date still produce distinct commits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub date: i64,
    pub owner: String,
    pub uid: u64,
    pub messages: Vec<String>,
}

impl Task {
    /// Stamps a fresh task: current date, random uid, no messages.
    pub fn new(owner: impl Into<String>) -> Self {
        let now = Epoch::now().expect("system time");
        Task {
            date: now.to_unix_seconds() as i64,
            owner: owner.into(),
            uid: rand::random(),
            messages: Vec::new(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.messages.push(message.into());
        self
    }

    /// A copy of this task restamped with a fresh date and uid, keeping the
    /// owner and messages. Every commit gets its own stamp.
    pub fn restamped(&self) -> Self {
        let now = Epoch::now().expect("system time");
        Task {
            date: now.to_unix_seconds() as i64,
            owner: self.owner.clone(),
            uid: rand::random(),
            messages: self.messages.clone(),
        }
    }
}

pub struct Commit<H> {
    pub task: Task,
    pub node: Option<Handle<H, NodeKind>>,
    pub parents: Vec<Handle<H, CommitKind>>,
}

// Written out because `derive` would demand the bounds of the hasher type,
// which only ever appears in phantom position.

impl<H> Clone for Commit<H> {
    fn clone(&self) -> Self {
        Commit {
            task: self.task.clone(),
            node: self.node,
            parents: self.parents.clone(),
        }
    }
}

impl<H> PartialEq for Commit<H> {
    fn eq(&self, other: &Self) -> bool {
        self.task == other.task && self.node == other.node && self.parents == other.parents
    }
}

impl<H> Eq for Commit<H> {}

impl<H> std::fmt::Debug for Commit<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Commit")
            .field("task", &self.task)
            .field("node", &self.node)
            .field("parents", &self.parents)
            .finish()
    }
}

impl<H: HashProtocol> Commit<H> {
    pub fn new(
        task: Task,
        node: Option<Handle<H, NodeKind>>,
        parents: impl IntoIterator<Item = Handle<H, CommitKind>>,
    ) -> Self {
        Commit {
            task,
            node,
            parents: parents.into_iter().collect(),
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut out = Vec::new();
        wire::put_i64(&mut out, self.task.date);
        wire::put_u64(&mut out, self.task.uid);
        wire::put_frame(&mut out, self.task.owner.as_bytes());
        wire::put_u32(&mut out, self.task.messages.len() as u32);
        for message in &self.task.messages {
            wire::put_frame(&mut out, message.as_bytes());
        }
        match &self.node {
            Some(node) => {
                wire::put_u8(&mut out, 1);
                wire::put_digest(&mut out, &node.digest().raw);
            }
            None => wire::put_u8(&mut out, 0),
        }
        wire::put_u32(&mut out, self.parents.len() as u32);
        for parent in &self.parents {
            wire::put_digest(&mut out, &parent.digest().raw);
        }
        Bytes::from(out)
    }

    pub fn decode(bytes: &Bytes) -> Result<Self, DecodeError> {
        let mut reader = Reader::new(bytes.as_ref());

        let date = reader.i64()?;
        let uid = reader.u64()?;
        let owner = decode_string(reader.frame()?)?;
        let message_count = reader.u32()?;
        let mut messages = Vec::with_capacity(message_count as usize);
        for _ in 0..message_count {
            messages.push(decode_string(reader.frame()?)?);
        }

        let node = match reader.u8()? {
            0 => None,
            1 => Some(Handle::from_digest(Digest::new(reader.digest()?))),
            _ => return Err(DecodeError::BadFrame),
        };

        let parent_count = reader.u32()?;
        let mut parents = Vec::with_capacity(parent_count as usize);
        for _ in 0..parent_count {
            parents.push(Handle::from_digest(Digest::new(reader.digest()?)));
        }
        reader.finish()?;

        Ok(Commit {
            task: Task {
                date,
                owner,
                uid,
                messages,
            },
            node,
            parents,
        })
    }

    /// The digest of the canonical serialization; covers the task, the root
    /// node and the parent list.
    pub fn digest(&self) -> Digest<H> {
        Digest::of_bytes(self.encode().as_ref())
    }
}

fn decode_string(bytes: &[u8]) -> Result<String, DecodeError> {
    std::str::from_utf8(bytes)
        .map(str::to_owned)
        .map_err(|_| DecodeError::BadFrame)
}
