//! The common surface, re-exported for glob import.

pub use crate::commit::Commit;
pub use crate::commit::Task;
pub use crate::config::Config;
pub use crate::config::ConfigValue;
pub use crate::contents::Contents;
pub use crate::contents::Counter;
pub use crate::hash::Blake2b;
pub use crate::hash::Blake3;
pub use crate::hash::CommitKind;
pub use crate::hash::ContentsKind;
pub use crate::hash::Digest;
pub use crate::hash::Handle;
pub use crate::hash::HashProtocol;
pub use crate::hash::NodeKind;
pub use crate::merge::Conflict;
pub use crate::merge::Merge;
pub use crate::node::Node;
pub use crate::path::key;
pub use crate::path::Key;
pub use crate::path::Step;
pub use crate::repo::memory::MemoryStore;
pub use crate::repo::Backend;
pub use crate::repo::BlockStore;
pub use crate::repo::NameStore;
pub use crate::repo::StoreError;
pub use crate::repo::TagName;
pub use crate::slice::Slice;
pub use crate::slice::SliceParams;
pub use crate::snapshot::KeyStream;
pub use crate::snapshot::Snapshot;
pub use crate::store::Basic;
pub use crate::store::Schema;
pub use crate::store::Store;
pub use crate::sync::LocalRemote;
pub use crate::sync::Remote;
pub use crate::view::Action;
pub use crate::view::View;
pub use crate::watch::HeadStream;
pub use crate::watch::WatchRegistry;
