//! Root pointers and path resolution.

use std::collections::VecDeque;
use std::sync::Arc;

use cowfs_types::{FileId, FileInfo, FileType};
use tracing::{trace, warn};

use crate::dir_entry::DirEntry;
use crate::error::{FsError, FsResult, corrupted};
use crate::file::File;
use crate::index::FileMap;
use crate::node::Key;
use crate::path;

/// One committed (or in-progress) state of the namespace.
///
/// Cloning copies two pointers.
#[derive(Clone)]
pub(crate) struct Tree {
    pub(crate) root: Arc<DirEntry>,
    pub(crate) files: Arc<FileMap>,
}

impl Tree {
    /// A tree holding only `root`, indexed with `levels` shard levels.
    pub(crate) fn new(root: File, levels: usize) -> FsResult<Self> {
        let root_entry = DirEntry::new("/", root.id(), FileType::Directory);
        let files = FileMap::put(&Arc::new(FileMap::new(levels)), Arc::new(root))?;
        Ok(Self {
            root: root_entry,
            files,
        })
    }

    /// File behind a live entry. Absence means the tree is corrupt.
    pub(crate) fn file(&self, id: FileId) -> Arc<File> {
        self.files
            .get(id)
            .unwrap_or_else(|| corrupted(format_args!("entry points at missing file {id}")))
    }

    /// Resolve `comps` to the chain of entries from the root to the target.
    ///
    /// Symlinks in intermediate positions are always followed; the final one
    /// only if `follow_last`. Following a link restarts from the root with the
    /// target's components in front of the remaining ones, and drops the
    /// chain walked so far.
    pub(crate) fn walk(
        &self,
        comps: &[&str],
        follow_last: bool,
        max_hops: usize,
    ) -> FsResult<Vec<Arc<DirEntry>>> {
        let mut pending: VecDeque<String> = comps.iter().map(|c| c.to_string()).collect();
        let mut chain = vec![Arc::clone(&self.root)];
        let mut hops = 0;

        while let Some(name) = pending.pop_front() {
            let Some(current) = chain.last() else {
                corrupted("empty resolution chain");
            };
            let dir = self.file(current.id());
            let Some(entries) = dir.entries() else {
                return Err(FsError::type_mismatch(format!("{} is not a directory", current.name())));
            };
            let child = match entries.get(&Key::name(&name)) {
                Some(node) => match node.as_entry() {
                    Some(entry) => Arc::clone(entry),
                    None => corrupted(format_args!("directory {} holds {node:?}", dir.id())),
                },
                None => return Err(FsError::not_found(name)),
            };

            if child.kind().is_symlink() && (follow_last || !pending.is_empty()) {
                hops += 1;
                if hops > max_hops {
                    warn!(link = %name, hops, "symlink hop limit reached");
                    return Err(FsError::TooManyLinks(name));
                }
                let link = self.file(child.id());
                let target = link.target().unwrap_or_default();
                trace!(link = %name, target, "following symlink");
                for comp in path::split(target)?.into_iter().rev() {
                    pending.push_front(comp.to_string());
                }
                chain.truncate(1);
                continue;
            }

            chain.push(child);
        }

        Ok(chain)
    }

    /// Resolve `comps` to the target entry.
    pub(crate) fn resolve(
        &self,
        comps: &[&str],
        follow_last: bool,
        max_hops: usize,
    ) -> FsResult<Arc<DirEntry>> {
        let mut chain = self.walk(comps, follow_last, max_hops)?;
        Ok(chain.pop().unwrap_or_else(|| Arc::clone(&self.root)))
    }

    fn dump_dir(&self, dir: &File, prefix: &str, out: &mut String) {
        let Some(entries) = dir.entries() else {
            return;
        };
        for node in entries.iter() {
            let Some(entry) = node.as_entry() else {
                continue;
            };
            let file = self.file(entry.id());
            let path = format!("{prefix}{}", entry.name());
            match file.target() {
                Some(target) => {
                    out.push_str(&format!("{} {path} -> {target} [{}]\n", file.mode(), file.id()))
                }
                None => out.push_str(&format!(
                    "{} {path} size={} nlink={} [{}]\n",
                    file.mode(),
                    file.size(),
                    file.nlink(),
                    file.id()
                )),
            }
            if file.is_dir() {
                self.dump_dir(&file, &format!("{path}/"), out);
            }
        }
    }
}

/// Read-only view of the store at one version.
///
/// Taking a snapshot copies two pointers; later commits never affect it.
#[derive(Clone)]
pub struct Snapshot {
    pub(crate) tree: Tree,
    pub(crate) max_hops: usize,
}

impl Snapshot {
    fn resolve(&self, path: &str, follow: bool) -> FsResult<Arc<DirEntry>> {
        self.tree.resolve(&path::split(path)?, follow, self.max_hops)
    }

    /// File reached by `path`, following symlinks.
    pub fn file(&self, path: &str) -> FsResult<Arc<File>> {
        let entry = self.resolve(path, true).map_err(|e| e.in_path(path))?;
        Ok(self.tree.file(entry.id()))
    }

    /// File stored under `id`, if any.
    pub fn file_by_id(&self, id: FileId) -> Option<Arc<File>> {
        self.tree.files.get(id)
    }

    pub fn exists(&self, path: &str) -> bool {
        self.resolve(path, true).is_ok()
    }

    /// Metadata of the file `path` names, following symlinks.
    pub fn stat(&self, path: &str) -> FsResult<FileInfo> {
        self.stat_with(path, true)
    }

    /// Metadata of `path` itself; a final symlink is not followed.
    pub fn link_stat(&self, path: &str) -> FsResult<FileInfo> {
        self.stat_with(path, false)
    }

    fn stat_with(&self, path: &str, follow: bool) -> FsResult<FileInfo> {
        let entry = self.resolve(path, follow).map_err(|e| e.in_path(path))?;
        let name = path::base_name(path)?;
        Ok(self.tree.file(entry.id()).info(name))
    }

    /// Entries of the directory at `path`, in name order.
    pub fn read_dir(&self, path: &str) -> FsResult<Vec<FileInfo>> {
        let dir = self.file(path)?;
        let Some(entries) = dir.entries() else {
            return Err(FsError::type_mismatch(path));
        };
        Ok(entries
            .iter()
            .filter_map(|node| node.as_entry())
            .map(|entry| self.tree.file(entry.id()).info(entry.name()))
            .collect())
    }

    /// Whole content of the regular file at `path`.
    pub fn read_file(&self, path: &str) -> FsResult<Vec<u8>> {
        let file = self.file(path)?;
        let mut buf = vec![0u8; file.size() as usize];
        let (n, _) = file.read_at(&mut buf, 0).map_err(|e| e.in_path(path))?;
        buf.truncate(n);
        Ok(buf)
    }

    /// Target of the symlink at `path`.
    pub fn read_link(&self, path: &str) -> FsResult<String> {
        let entry = self.resolve(path, false).map_err(|e| e.in_path(path))?;
        let file = self.tree.file(entry.id());
        file.target()
            .map(str::to_string)
            .ok_or_else(|| FsError::NotSymlink(path.to_string()))
    }

    /// Number of files in the identity index.
    pub fn file_count(&self) -> usize {
        self.tree.files.files().len()
    }

    /// Human-readable rendering of the namespace and the identity index.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        let root = self.tree.file(self.tree.root.id());
        out.push_str(&format!("{} / [{}]\n", root.mode(), root.id()));
        self.tree.dump_dir(&root, "/", &mut out);
        out.push_str("index:\n");
        self.tree.files.dump(&mut out);
        out
    }
}
