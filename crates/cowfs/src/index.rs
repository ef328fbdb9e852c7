//! Identity index: `FileId` → `File`.
//!
//! A fixed-depth radix tree of [`NodeSet`]s. Each level is keyed by one byte
//! of the identifier, most significant first, and the bottom level holds the
//! files keyed by their full identifier. Random identifiers spread files
//! evenly, so a mutation copies at most `levels + 1` small containers no
//! matter how many files the store holds.
//!
//! Shards come into existence only inside a write that stores something
//! through them and disappear again when their last file is removed.

use std::fmt;
use std::sync::Arc;

use cowfs_types::{FileId, Stamp};

use crate::error::{FsError, FsResult, corrupted};
use crate::file::File;
use crate::node::{Key, Mutator, Node, NodeSet};

/// One level of the identity index.
pub struct FileMap {
    stamp: Stamp,
    shard_key: u8,
    depth: usize,
    subs: Arc<NodeSet>,
}

impl FileMap {
    /// An empty index with `levels` shard levels above the file slots.
    pub fn new(levels: usize) -> Self {
        Self::shard(0, levels)
    }

    fn shard(shard_key: u8, depth: usize) -> Self {
        Self {
            stamp: Stamp::next(),
            shard_key,
            depth,
            subs: Arc::new(NodeSet::new()),
        }
    }

    pub fn stamp(&self) -> Stamp {
        self.stamp
    }

    /// Byte selecting this shard in its parent. Meaningless for the top level.
    pub fn shard_key(&self) -> u8 {
        self.shard_key
    }

    /// Shard levels below this one.
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn subs(&self) -> &Arc<NodeSet> {
        &self.subs
    }

    pub fn is_empty(&self) -> bool {
        self.subs.is_empty()
    }

    /// Key path from this level to the slot of `id`.
    ///
    /// Only meaningful on the top level; inner shards receive paths already
    /// trimmed by their parents.
    pub fn key_path(&self, id: FileId) -> Vec<Key> {
        let mut path: Vec<Key> = (0..self.depth).map(|i| Key::Shard(id.shard_byte(i))).collect();
        path.push(Key::Id(id));
        path
    }

    /// File stored under `id`. Never creates shards.
    pub fn get(&self, id: FileId) -> Option<Arc<File>> {
        match self.subs.lookup(&self.key_path(id))? {
            Node::File(file) => Some(file),
            other => corrupted(format_args!("index slot {id} holds {other:?}")),
        }
    }

    pub fn contains(&self, id: FileId) -> bool {
        self.get(id).is_some()
    }

    /// Apply `f` along `path`: shard keys for the remaining levels, then a
    /// file identifier, then optionally names inside that file.
    pub fn mutate(this: &Arc<Self>, path: &[Key], f: &mut Mutator<'_>) -> FsResult<Arc<Self>> {
        let subs = if this.depth == 0 {
            NodeSet::mutate(&this.subs, path, f)?
        } else {
            let Some(&Key::Shard(byte)) = path.first() else {
                return Err(FsError::invalid_path(format!("expected shard key, got {path:?}")));
            };
            let rest = &path[1..];
            let depth = this.depth - 1;
            NodeSet::mutate(&this.subs, &path[..1], &mut |slot| {
                let (child, existed) = match slot {
                    Some(Node::Shard(child)) => (child, true),
                    None => (Arc::new(FileMap::shard(byte, depth)), false),
                    Some(other) => corrupted(format_args!("shard slot {byte:02x} holds {other:?}")),
                };
                let new_child = FileMap::mutate(&child, rest, &mut *f)?;
                if new_child.is_empty() {
                    Ok(None)
                } else if existed && Arc::ptr_eq(&new_child, &child) {
                    Ok(Some(Node::Shard(child)))
                } else {
                    Ok(Some(Node::Shard(new_child)))
                }
            })?
        };

        if Arc::ptr_eq(&subs, &this.subs) {
            return Ok(Arc::clone(this));
        }
        Ok(Arc::new(Self {
            stamp: Stamp::next(),
            shard_key: this.shard_key,
            depth: this.depth,
            subs,
        }))
    }

    /// Store `file` under its identifier, replacing any previous version.
    pub fn put(this: &Arc<Self>, file: Arc<File>) -> FsResult<Arc<Self>> {
        let path = this.key_path(file.id());
        let node = Node::File(file);
        Self::mutate(this, &path, &mut |_| Ok(Some(node.clone())))
    }

    /// Drop the file stored under `id`, if any.
    pub fn remove(this: &Arc<Self>, id: FileId) -> FsResult<Arc<Self>> {
        let path = this.key_path(id);
        Self::mutate(this, &path, &mut |_| Ok(None))
    }

    /// Every file in identifier order.
    pub fn files(&self) -> Vec<Arc<File>> {
        let mut out = Vec::new();
        self.collect(&mut out);
        out
    }

    fn collect(&self, out: &mut Vec<Arc<File>>) {
        for node in self.subs.iter() {
            match node {
                Node::Shard(child) => child.collect(out),
                Node::File(file) => out.push(Arc::clone(file)),
                other => corrupted(format_args!("index holds {other:?}")),
            }
        }
    }

    pub(crate) fn dump(&self, out: &mut String) {
        self.subs.dump(out, 0);
    }
}

impl fmt::Debug for FileMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileMap")
            .field("shard_key", &format_args!("{:02x}", self.shard_key))
            .field("depth", &self.depth)
            .field("stamp", &self.stamp)
            .field("len", &self.subs.len())
            .finish()
    }
}
