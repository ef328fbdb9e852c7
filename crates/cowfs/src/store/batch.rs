//! Transactions over the store.
//!
//! A [`Batch`] works on private copies of the root and index pointers.
//! Every operation rebuilds only the files along the path it touches; the
//! store installs the result when the batch closure returns `Ok`, and drops
//! it otherwise.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;

use cowfs_types::{FileId, FileType};
use tracing::debug;

use super::registry::Registry;
use super::tree::{Snapshot, Tree};
use crate::config::StoreConfig;
use crate::dir_entry::DirEntry;
use crate::error::{FsError, FsResult, corrupted};
use crate::file::File;
use crate::index::FileMap;
use crate::node::{Key, Node, NodeSet};
use crate::path;

/// Pending store changes, applied together on commit.
pub(crate) struct Changes {
    pub(crate) tree: Tree,
    pub(crate) opened: Vec<FileId>,
    pub(crate) detached: HashMap<FileId, Arc<File>>,
}

/// A set of mutations committed atomically.
///
/// Obtained through [`MemFs::batch`](crate::MemFs::batch). Operations see
/// the effects of earlier operations in the same batch.
pub struct Batch<'a> {
    config: &'a StoreConfig,
    registry: &'a Registry,
    tree: Tree,
    opened: Vec<FileId>,
    detached: HashMap<FileId, Arc<File>>,
}

impl<'a> Batch<'a> {
    pub(crate) fn new(config: &'a StoreConfig, tree: Tree, registry: &'a Registry) -> Self {
        Self {
            config,
            registry,
            tree,
            opened: Vec::new(),
            detached: HashMap::new(),
        }
    }

    pub(crate) fn into_changes(self) -> Changes {
        Changes {
            tree: self.tree,
            opened: self.opened,
            detached: self.detached,
        }
    }

    /// Read-only view of the working state, including this batch's changes.
    pub fn view(&self) -> Snapshot {
        Snapshot {
            tree: self.tree.clone(),
            max_hops: self.config.max_symlink_hops,
        }
    }

    // ========================================================================
    // Namespace operations
    // ========================================================================

    /// Create a directory. The name must not be bound yet.
    pub fn make_dir(&mut self, path: &str) -> FsResult<()> {
        let comps = path::split(path)?;
        self.make_dir_at(&comps).map_err(|e| e.in_path(path))
    }

    fn make_dir_at(&mut self, comps: &[&str]) -> FsResult<()> {
        if comps.is_empty() {
            return Err(FsError::already_exists("/"));
        }
        let perm = self.config.dir_mode;
        self.mutate_entry(comps, |batch, name, current| {
            if current.is_some() {
                return Err(FsError::already_exists(name));
            }
            let entry = batch.add_file(name, |id| File::new(id, FileType::Directory, perm))?;
            Ok(Some(entry))
        })?;
        Ok(())
    }

    /// Create a directory and any missing parents. Existing directories
    /// along the way are fine.
    pub fn make_dir_all(&mut self, path: &str) -> FsResult<()> {
        let comps = path::split(path)?;
        self.make_dir_all_at(&comps).map_err(|e| e.in_path(path))
    }

    fn make_dir_all_at(&mut self, comps: &[&str]) -> FsResult<()> {
        for i in 1..=comps.len() {
            let prefix = &comps[..i];
            match self.resolve(prefix, true) {
                Ok(entry) if entry.is_dir() => {}
                Ok(_) => return Err(FsError::type_mismatch(prefix.join("/"))),
                Err(FsError::NotFound(_)) => {
                    self.ensure(prefix, FileType::Directory, self.config.dir_mode)?;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Create a regular file, or truncate it if it exists.
    pub fn create(&mut self, path: &str) -> FsResult<FileId> {
        let comps = path::split(path)?;
        self.create_at(&comps).map_err(|e| e.in_path(path))
    }

    fn create_at(&mut self, comps: &[&str]) -> FsResult<FileId> {
        match self.resolve(comps, true) {
            Ok(entry) if entry.is_dir() => Err(FsError::type_mismatch("is a directory")),
            Ok(entry) => {
                let file = self.file(entry.id());
                if file.size() > 0 {
                    self.put(file.truncated(0)?)?;
                }
                Ok(entry.id())
            }
            Err(FsError::NotFound(_)) => {
                let (id, _) = self.ensure(comps, FileType::File, self.config.file_mode)?;
                Ok(id)
            }
            Err(e) => Err(e),
        }
    }

    /// Resolve `path` for a new handle, creating a regular file if asked.
    /// The open is registered on commit.
    pub(crate) fn open_file(&mut self, path: &str, create: bool) -> FsResult<FileId> {
        let comps = path::split(path)?;
        let id = match self.resolve(&comps, true) {
            Ok(entry) => entry.id(),
            Err(FsError::NotFound(_)) if create => {
                self.ensure(&comps, FileType::File, self.config.file_mode)
                    .map_err(|e| e.in_path(path))?
                    .0
            }
            Err(e) => return Err(e.in_path(path)),
        };
        self.opened.push(id);
        Ok(id)
    }

    /// Like [`Batch::create`], registering a handle on commit.
    pub(crate) fn create_file(&mut self, path: &str) -> FsResult<FileId> {
        let id = self.create(path)?;
        self.opened.push(id);
        Ok(id)
    }

    /// Remove the entry at `path`.
    ///
    /// Directories must be empty unless `recursive`. Files losing their last
    /// link leave the index; those still open stay readable through their
    /// handles.
    pub fn remove(&mut self, path: &str, recursive: bool) -> FsResult<()> {
        let comps = path::split(path)?;
        self.remove_at(&comps, recursive).map_err(|e| e.in_path(path))
    }

    fn remove_at(&mut self, comps: &[&str], recursive: bool) -> FsResult<()> {
        if comps.is_empty() {
            return Err(FsError::CannotRemove("/".into()));
        }
        self.mutate_entry(comps, |batch, name, current| {
            let Some(entry) = current else {
                return Err(FsError::not_found(name));
            };
            if entry.is_dir() && !recursive {
                let dir = batch.file(entry.id());
                if dir.entries().is_some_and(|e| !e.is_empty()) {
                    return Err(FsError::DirNotEmpty(name.to_string()));
                }
            }
            batch.release(&entry)?;
            Ok(None)
        })?;
        Ok(())
    }

    /// Bind `new` to the file `old` names. Directories cannot be linked.
    pub fn link(&mut self, old: &str, new: &str) -> FsResult<()> {
        let old_comps = path::split(old)?;
        let new_comps = path::split(new)?;
        let src = self.resolve(&old_comps, false).map_err(|e| e.in_path(old))?;
        if src.is_dir() {
            return Err(FsError::CannotLink(old.to_string()));
        }
        self.link_at(&src, &new_comps).map_err(|e| e.in_path(new))
    }

    fn link_at(&mut self, src: &DirEntry, comps: &[&str]) -> FsResult<()> {
        if comps.is_empty() {
            return Err(FsError::already_exists("/"));
        }
        self.mutate_entry(comps, |batch, name, current| {
            if current.is_some() {
                return Err(FsError::already_exists(name));
            }
            let file = batch.file(src.id());
            batch.put(file.with_nlink(file.nlink() + 1))?;
            Ok(Some(DirEntry::new(name, src.id(), src.kind())))
        })?;
        Ok(())
    }

    /// Create a symbolic link at `new` pointing to `target`.
    ///
    /// Targets are resolved from the store root when followed.
    pub fn symlink(&mut self, target: &str, new: &str) -> FsResult<()> {
        if target.is_empty() {
            return Err(FsError::invalid_path("empty symlink target"));
        }
        let comps = path::split(new)?;
        self.symlink_at(target, &comps).map_err(|e| e.in_path(new))
    }

    fn symlink_at(&mut self, target: &str, comps: &[&str]) -> FsResult<()> {
        if comps.is_empty() {
            return Err(FsError::already_exists("/"));
        }
        self.mutate_entry(comps, |batch, name, current| {
            if current.is_some() {
                return Err(FsError::already_exists(name));
            }
            let entry = batch.add_file(name, |id| File::symlink(id, target))?;
            Ok(Some(entry))
        })?;
        Ok(())
    }

    /// Target of the symlink at `path`.
    pub fn read_link(&self, path: &str) -> FsResult<String> {
        self.view().read_link(path)
    }

    /// Move the entry at `old` to `new`, replacing a compatible target.
    ///
    /// A directory can only replace an empty directory and a non-directory
    /// only a non-directory. Renaming onto another link of the same file does
    /// nothing.
    pub fn rename(&mut self, old: &str, new: &str) -> FsResult<()> {
        let old_comps = path::split(old)?;
        let new_comps = path::split(new)?;
        if old_comps.is_empty() {
            return Err(FsError::CannotRemove(old.to_string()));
        }
        if new_comps.is_empty() {
            return Err(FsError::CannotRemove(new.to_string()));
        }
        let src = self.resolve(&old_comps, false).map_err(|e| e.in_path(old))?;
        if old_comps == new_comps {
            return Ok(());
        }
        self.rename_at(&src, &old_comps, &new_comps).map_err(|e| e.in_path(new))
    }

    fn rename_at(&mut self, src: &DirEntry, old: &[&str], new: &[&str]) -> FsResult<()> {
        let Some((&name, parent)) = new.split_last() else {
            return Err(FsError::CannotRemove("/".into()));
        };
        let chain = self.tree.walk(parent, true, self.config.max_symlink_hops)?;
        if src.is_dir() && chain.iter().any(|e| e.id() == src.id()) {
            return Err(FsError::invalid_path("cannot move a directory into itself"));
        }
        let Some(parent) = chain.last() else {
            corrupted("empty resolution chain");
        };
        let dir = self.file(parent.id());
        let Some(entries) = dir.entries() else {
            return Err(FsError::type_mismatch(format!("{} is not a directory", parent.name())));
        };
        if let Some(existing) = entries.get(&Key::name(name)).and_then(Node::as_entry) {
            if existing.id() == src.id() {
                return Ok(());
            }
            match (src.is_dir(), existing.is_dir()) {
                (true, false) => {
                    return Err(FsError::type_mismatch(format!("{name} is not a directory")));
                }
                (false, true) => {
                    return Err(FsError::type_mismatch(format!("{name} is a directory")));
                }
                (true, true) => {
                    let target = self.file(existing.id());
                    if target.entries().is_some_and(|e| !e.is_empty()) {
                        return Err(FsError::DirNotEmpty(name.to_string()));
                    }
                }
                (false, false) => {}
            }
        }

        self.mutate_entry(old, |_, _, _| Ok(None))?;
        self.mutate_entry(new, |batch, name, current| {
            if let Some(replaced) = current {
                batch.release(&replaced)?;
            }
            Ok(Some(DirEntry::new(name, src.id(), src.kind())))
        })?;
        Ok(())
    }

    // ========================================================================
    // Metadata and content
    // ========================================================================

    /// Replace permission bits.
    pub fn change_mode(&mut self, path: &str, perm: u32, follow: bool) -> FsResult<()> {
        self.change_at(path, follow, |file| Ok(Some(file.with_perm(perm))))
    }

    /// Replace owner fields; `None` keeps the current value.
    pub fn change_owner(
        &mut self,
        path: &str,
        uid: Option<u32>,
        gid: Option<u32>,
        follow: bool,
    ) -> FsResult<()> {
        self.change_at(path, follow, |file| Ok(Some(file.with_owner(uid, gid))))
    }

    /// Set access and modification times.
    pub fn change_times(
        &mut self,
        path: &str,
        atime: SystemTime,
        mtime: SystemTime,
        follow: bool,
    ) -> FsResult<()> {
        self.change_at(path, follow, |file| Ok(Some(file.with_times(atime, mtime))))
    }

    /// Shrink or zero-extend the regular file at `path`.
    pub fn truncate(&mut self, path: &str, size: u64) -> FsResult<()> {
        self.change_at(path, true, |file| resize(file, size))
    }

    /// Replace the content of the file at `path`, creating it if needed.
    pub fn write_file(&mut self, path: &str, data: &[u8]) -> FsResult<()> {
        let id = self.create(path)?;
        self.write_id(id, data, 0).map_err(|e| e.in_path(path))?;
        Ok(())
    }

    fn change_at(
        &mut self,
        path: &str,
        follow: bool,
        f: impl FnOnce(&File) -> FsResult<Option<File>>,
    ) -> FsResult<()> {
        let comps = path::split(path)?;
        self.resolve(&comps, follow)
            .and_then(|entry| self.change_by_id(entry.id(), f))
            .map_err(|e| e.in_path(path))?;
        Ok(())
    }

    /// Apply `f` to the current version of `id`.
    ///
    /// Detached files are updated in their snapshot; everything else in the
    /// index. `f` returning `None` leaves the file as it is.
    pub(crate) fn change_by_id(
        &mut self,
        id: FileId,
        f: impl FnOnce(&File) -> FsResult<Option<File>>,
    ) -> FsResult<Arc<File>> {
        let detached = self
            .detached
            .get(&id)
            .or_else(|| self.registry.detached(id))
            .cloned();
        if let Some(file) = detached {
            let Some(new) = f(&file)? else {
                return Ok(file);
            };
            let new = Arc::new(new);
            self.detached.insert(id, Arc::clone(&new));
            return Ok(new);
        }

        let file = self
            .tree
            .files
            .get(id)
            .ok_or_else(|| FsError::not_found(id.to_string()))?;
        match f(&file)? {
            None => Ok(file),
            Some(new) => self.put(new),
        }
    }

    /// Write `data` at `offset` into the file `id`.
    pub(crate) fn write_id(&mut self, id: FileId, data: &[u8], offset: u64) -> FsResult<usize> {
        let mut written = 0;
        self.change_by_id(id, |file| {
            let (new, n) = file.write_at(data, offset)?;
            written = n;
            Ok((n > 0).then_some(new))
        })?;
        Ok(written)
    }

    /// Resize the file `id`.
    pub(crate) fn truncate_id(&mut self, id: FileId, size: u64) -> FsResult<()> {
        self.change_by_id(id, |file| resize(file, size))?;
        Ok(())
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn file(&self, id: FileId) -> Arc<File> {
        self.tree.file(id)
    }

    fn put(&mut self, file: File) -> FsResult<Arc<File>> {
        let file = Arc::new(file);
        self.tree.files = FileMap::put(&self.tree.files, Arc::clone(&file))?;
        Ok(file)
    }

    fn resolve(&self, comps: &[&str], follow: bool) -> FsResult<Arc<DirEntry>> {
        self.tree.resolve(comps, follow, self.config.max_symlink_hops)
    }

    /// A random identifier not used by any file, live or detached.
    fn fresh_id(&self) -> FileId {
        loop {
            let id = FileId::random();
            if !self.tree.files.contains(id)
                && !self.registry.contains(id)
                && !self.detached.contains_key(&id)
            {
                return id;
            }
            debug!(%id, "file id collision");
        }
    }

    /// Index a new file built by `make` and return an entry for it.
    fn add_file(
        &mut self,
        name: &str,
        make: impl FnOnce(FileId) -> File,
    ) -> FsResult<Arc<DirEntry>> {
        let id = self.fresh_id();
        let file = make(id).owned_by(self.config.uid, self.config.gid);
        let kind = file.kind();
        self.put(file)?;
        Ok(DirEntry::new(name, id, kind))
    }

    /// Make sure `comps` names a file of type `kind`, creating it if absent.
    ///
    /// Returns the file and whether it was created. An existing entry of the
    /// right type is left untouched, so ensuring twice changes nothing.
    pub(crate) fn ensure(
        &mut self,
        comps: &[&str],
        kind: FileType,
        perm: u32,
    ) -> FsResult<(FileId, bool)> {
        if comps.is_empty() {
            if kind.is_dir() {
                return Ok((self.tree.root.id(), false));
            }
            return Err(FsError::type_mismatch("/ is a directory"));
        }
        let mut created = false;
        let entry = self.mutate_entry(comps, |batch, name, current| match current {
            Some(entry) if entry.kind() == kind => Ok(Some(entry)),
            Some(entry) => Err(FsError::type_mismatch(format!(
                "{name} exists as {}",
                entry.kind()
            ))),
            None => {
                created = true;
                Ok(Some(batch.add_file(name, |id| File::new(id, kind, perm))?))
            }
        })?;
        match entry {
            Some(entry) => Ok((entry.id(), created)),
            None => corrupted("ensure left no entry"),
        }
    }

    /// Replace the entry named by the last component of `comps`.
    ///
    /// The parent is resolved following symlinks. `f` receives the current
    /// entry (if any) and returns the new one (`None` unbinds the name); it
    /// may change other files through the batch. The parent directory is
    /// rewritten only if the entry actually changed.
    fn mutate_entry<F>(&mut self, comps: &[&str], f: F) -> FsResult<Option<Arc<DirEntry>>>
    where
        F: FnOnce(&mut Self, &str, Option<Arc<DirEntry>>) -> FsResult<Option<Arc<DirEntry>>>,
    {
        let Some((&name, parent_comps)) = comps.split_last() else {
            return Err(FsError::invalid_path("/"));
        };
        let parent = self.resolve(parent_comps, true)?;
        let key = Key::name(name);

        let current = {
            let dir = self.file(parent.id());
            let entries = dir_entries(&dir, &parent)?;
            entries.get(&key).map(|node| match node.as_entry() {
                Some(entry) => Arc::clone(entry),
                None => corrupted(format_args!("directory {} holds {node:?}", dir.id())),
            })
        };

        let new = f(self, name, current.clone())?;
        let unchanged = match (&current, &new) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        };
        if unchanged {
            return Ok(new);
        }

        // `f` may have revised the parent, so rebuild from its latest version.
        let dir = self.file(parent.id());
        let entries = dir_entries(&dir, &parent)?;
        let node = new.clone().map(Node::Entry);
        let new_entries = NodeSet::mutate(entries, &[key], &mut |_| Ok(node.clone()))?;
        if !Arc::ptr_eq(&new_entries, entries) {
            self.put(dir.with_entries(new_entries))?;
        }
        Ok(new)
    }

    /// Drop one entry's worth of links for `entry` and everything below it.
    ///
    /// Counts removed entries per file across the subtree; a file whose link
    /// count reaches zero leaves the index and, if open, becomes detached.
    fn release(&mut self, entry: &DirEntry) -> FsResult<()> {
        let mut removed: HashMap<FileId, u32> = HashMap::from([(entry.id(), 1)]);
        let mut dirs = Vec::new();
        if entry.is_dir() {
            dirs.push(entry.id());
        }
        while let Some(id) = dirs.pop() {
            let dir = self.file(id);
            let Some(entries) = dir.entries() else {
                continue;
            };
            for node in entries.iter() {
                let Some(child) = node.as_entry() else {
                    continue;
                };
                *removed.entry(child.id()).or_insert(0) += 1;
                if child.is_dir() {
                    dirs.push(child.id());
                }
            }
        }

        for (id, count) in removed {
            let file = self.file(id);
            let left = file.nlink().saturating_sub(count);
            if left > 0 {
                self.put(file.with_nlink(left))?;
                continue;
            }
            self.tree.files = FileMap::remove(&self.tree.files, id)?;
            if self.open_count(id) > 0 {
                debug!(%id, "file unlinked while open");
                self.detached.insert(id, Arc::new(file.with_nlink(0)));
            }
        }
        Ok(())
    }

    /// Open handles on `id`, counting opens made earlier in this batch.
    fn open_count(&self, id: FileId) -> usize {
        self.registry.open_count(id) + self.opened.iter().filter(|&&o| o == id).count()
    }
}

fn dir_entries<'f>(dir: &'f File, entry: &DirEntry) -> FsResult<&'f Arc<NodeSet>> {
    dir.entries()
        .ok_or_else(|| FsError::type_mismatch(format!("{} is not a directory", entry.name())))
}

fn resize(file: &File, size: u64) -> FsResult<Option<File>> {
    if file.kind().is_file() && file.size() == size {
        return Ok(None);
    }
    file.truncated(size).map(Some)
}
