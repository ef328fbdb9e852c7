//! Persistent tree nodes.
//!
//! Everything stored in the tree is a [`Node`]: directory entries inside a
//! directory's child set, files and shards inside the identity index, and
//! nested [`NodeSet`]s when a container outgrows its fan-out. Nodes are
//! immutable and shared through `Arc`; a mutation returns new nodes along
//! the touched path and reuses everything else.
//!
//! ## Identity
//!
//! "Did this subtree change?" is answered by pointer equality
//! ([`Node::same`]). A mutation callback that hands back the node it was
//! given produces no copies at any level.

mod set;

use std::fmt;
use std::sync::Arc;

use cowfs_types::{FileId, Stamp};

use crate::dir_entry::DirEntry;
use crate::error::{FsError, FsResult, corrupted};
use crate::file::File;
use crate::index::FileMap;

pub use set::{Leaves, NodeSet};

/// Key of a node within its container.
///
/// One container only ever holds one kind of key: names in a directory,
/// shard bytes in the upper index levels, file ids in the bottom level.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Key {
    /// One byte of a [`FileId`], selecting an index shard.
    Shard(u8),
    /// A file slot in the bottom index level.
    Id(FileId),
    /// A directory entry name.
    Name(Arc<str>),
}

impl Key {
    /// Key for a directory entry name.
    pub fn name(name: &str) -> Self {
        Key::Name(Arc::from(name))
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Shard(b) => write!(f, "{b:02x}"),
            Key::Id(id) => write!(f, "{id}"),
            Key::Name(n) => f.write_str(n),
        }
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Shard(b) => write!(f, "Shard({b:02x})"),
            Key::Id(id) => write!(f, "Id({id})"),
            Key::Name(n) => write!(f, "Name({n:?})"),
        }
    }
}

/// Callback applied to the slot a mutation path leads to.
///
/// Receives the current occupant (`None` if the slot is empty) and returns
/// the new occupant (`None` deletes). Returning the argument unchanged is a
/// no-op that leaves every container on the path untouched.
pub type Mutator<'a> = dyn FnMut(Option<Node>) -> FsResult<Option<Node>> + 'a;

/// A tree element.
#[derive(Clone)]
pub enum Node {
    /// Name binding inside a directory's child set.
    Entry(Arc<DirEntry>),
    /// File record inside the identity index.
    File(Arc<File>),
    /// Identity index shard.
    Shard(Arc<FileMap>),
    /// Nested container covering a key range.
    Set(Arc<NodeSet>),
}

impl Node {
    /// Smallest key covered.
    pub fn min_key(&self) -> Key {
        match self {
            Node::Entry(e) => e.key(),
            Node::File(f) => Key::Id(f.id()),
            Node::Shard(m) => Key::Shard(m.shard_key()),
            Node::Set(s) => s.min_key().unwrap_or_else(|| corrupted("empty nested set")),
        }
    }

    /// Largest key covered.
    pub fn max_key(&self) -> Key {
        match self {
            Node::Set(s) => s.max_key().unwrap_or_else(|| corrupted("empty nested set")),
            _ => self.min_key(),
        }
    }

    /// Whether the node covers a single key (everything except nested sets).
    pub fn is_singleton(&self) -> bool {
        !matches!(self, Node::Set(_))
    }

    /// Pointer identity: the same immutable version of the same node.
    pub fn same(&self, other: &Node) -> bool {
        match (self, other) {
            (Node::Entry(a), Node::Entry(b)) => Arc::ptr_eq(a, b),
            (Node::File(a), Node::File(b)) => Arc::ptr_eq(a, b),
            (Node::Shard(a), Node::Shard(b)) => Arc::ptr_eq(a, b),
            (Node::Set(a), Node::Set(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Version stamp of this node.
    pub fn stamp(&self) -> Stamp {
        match self {
            Node::Entry(e) => e.stamp(),
            Node::File(f) => f.stamp(),
            Node::Shard(m) => m.stamp(),
            Node::Set(s) => s.stamp(),
        }
    }

    /// Apply `f` to the slot `path` leads to, starting inside this node.
    ///
    /// An empty path targets the node itself. Files descend into their child
    /// set, shards into their sub-containers; entries have nothing below.
    pub fn mutate(&self, path: &[Key], f: &mut Mutator<'_>) -> FsResult<Option<Node>> {
        match self {
            Node::Entry(_) if path.is_empty() => f(Some(self.clone())),
            Node::Entry(e) => Err(FsError::invalid_path(format!("{}/{}", e.name(), path[0]))),
            Node::File(file) => File::mutate(file, path, f),
            Node::Shard(_) if path.is_empty() => f(Some(self.clone())),
            Node::Shard(map) => {
                let new_map = FileMap::mutate(map, path, f)?;
                if new_map.is_empty() {
                    Ok(None)
                } else if Arc::ptr_eq(&new_map, map) {
                    Ok(Some(self.clone()))
                } else {
                    Ok(Some(Node::Shard(new_map)))
                }
            }
            Node::Set(set) => {
                let new_set = NodeSet::mutate(set, path, f)?;
                if new_set.is_empty() {
                    Ok(None)
                } else if Arc::ptr_eq(&new_set, set) {
                    Ok(Some(self.clone()))
                } else {
                    Ok(Some(Node::Set(new_set)))
                }
            }
        }
    }

    /// Read-only walk along `path`, never creating anything.
    pub fn lookup(&self, path: &[Key]) -> Option<Node> {
        let Some(first) = path.first() else {
            return Some(self.clone());
        };
        match self {
            Node::Entry(_) => None,
            Node::File(file) => file.entries()?.lookup(path),
            Node::Shard(map) => map.subs().lookup(path),
            Node::Set(set) => set.get(first).and_then(|n| n.lookup(&path[1..])),
        }
    }

    /// The directory entry, if this is one.
    pub fn as_entry(&self) -> Option<&Arc<DirEntry>> {
        match self {
            Node::Entry(e) => Some(e),
            _ => None,
        }
    }

    /// The file, if this is one.
    pub fn as_file(&self) -> Option<&Arc<File>> {
        match self {
            Node::File(f) => Some(f),
            _ => None,
        }
    }

    /// Write an indented rendering of this node and its descendants.
    pub(crate) fn dump(&self, out: &mut String, level: usize) {
        let indent = " ".repeat(level);
        match self {
            Node::Entry(e) => {
                out.push_str(&format!("{indent}entry {} -> {} ({})\n", e.name(), e.id(), e.kind()))
            }
            Node::File(f) => {
                out.push_str(&format!(
                    "{indent}file {} {} size={} nlink={}\n",
                    f.id(),
                    f.mode(),
                    f.size(),
                    f.nlink()
                ));
                if let Some(entries) = f.entries() {
                    entries.dump(out, level + 1);
                }
            }
            Node::Shard(m) => {
                out.push_str(&format!("{indent}shard {:02x}\n", m.shard_key()));
                m.subs().dump(out, level + 1);
            }
            Node::Set(s) => s.dump(out, level),
        }
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Entry(e) => write!(f, "Entry({} -> {})", e.name(), e.id()),
            Node::File(file) => write!(f, "File({} {})", file.id(), file.stamp()),
            Node::Shard(m) => write!(f, "Shard({:02x} {})", m.shard_key(), m.stamp()),
            Node::Set(s) => write!(f, "Set({} nodes {})", s.nodes().len(), s.stamp()),
        }
    }
}
