//! Directory entries: name bindings inside a directory's child set.

use std::sync::Arc;

use cowfs_types::{FileId, FileType, Stamp};

use crate::node::Key;

/// Binds `name` to a file within one parent directory.
///
/// The file type is cached so listings don't need an index lookup per child.
#[derive(Debug)]
pub struct DirEntry {
    name: Arc<str>,
    id: FileId,
    kind: FileType,
    stamp: Stamp,
}

impl DirEntry {
    pub fn new(name: impl Into<Arc<str>>, id: FileId, kind: FileType) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            id,
            kind,
            stamp: Stamp::next(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Target file.
    pub fn id(&self) -> FileId {
        self.id
    }

    pub fn kind(&self) -> FileType {
        self.kind
    }

    pub fn is_dir(&self) -> bool {
        self.kind.is_dir()
    }

    pub fn stamp(&self) -> Stamp {
        self.stamp
    }

    /// Key of this entry in its parent's child set.
    pub fn key(&self) -> Key {
        Key::Name(Arc::clone(&self.name))
    }
}
