//! The store: committed tree pointers, version counter and handle registry.
//!
//! One `RwLock` guards all three. Readers hold it just long enough to copy
//! the tree pointers; a batch holds it exclusively from the first operation
//! to the commit, so batches are serialized and a handle never sees a file
//! half way between the tree and the registry.

mod batch;
mod registry;
mod tree;

use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use cowfs_types::{FileId, FileInfo, FileType};
use parking_lot::RwLock;
use tracing::{debug, trace};

use crate::config::StoreConfig;
use crate::error::{FsError, FsResult, corrupted};
use crate::file::File;
use crate::handle::Handle;
use crate::index::FileMap;
use crate::path;

pub use batch::Batch;
pub use tree::Snapshot;

use registry::Registry;
use tree::Tree;

struct State {
    tree: Tree,
    version: u64,
    registry: Registry,
}

/// Store internals shared between the store and its handles.
pub(crate) struct Shared {
    config: StoreConfig,
    state: RwLock<State>,
}

impl Shared {
    /// Run `f` as one batch and commit its changes if it succeeds.
    pub(crate) fn update<T>(&self, f: impl FnOnce(&mut Batch<'_>) -> FsResult<T>) -> FsResult<T> {
        let mut state = self.state.write();
        let mut batch = Batch::new(&self.config, state.tree.clone(), &state.registry);
        let out = match f(&mut batch) {
            Ok(out) => out,
            Err(e) => {
                trace!(error = %e, "batch discarded");
                return Err(e);
            }
        };
        let changes = batch.into_changes();

        state.version += 1;
        let version = state.version;
        state.tree = changes.tree;
        state.registry.apply(changes.opened, changes.detached, version);
        debug!(version, "batch committed");
        Ok(out)
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            tree: self.state.read().tree.clone(),
            max_hops: self.config.max_symlink_hops,
        }
    }

    /// Current version of `id`: its detached snapshot if it has one, else
    /// the indexed file.
    pub(crate) fn load(&self, id: FileId) -> FsResult<Arc<File>> {
        let state = self.state.read();
        if let Some(file) = state.registry.detached(id) {
            return Ok(Arc::clone(file));
        }
        state
            .tree
            .files
            .get(id)
            .ok_or_else(|| FsError::not_found(id.to_string()))
    }

    /// Like [`Shared::load`], together with the index needed to stat the
    /// children of a directory.
    pub(crate) fn load_with_index(&self, id: FileId) -> FsResult<(Arc<File>, Arc<FileMap>)> {
        let state = self.state.read();
        let files = Arc::clone(&state.tree.files);
        let file = match state.registry.detached(id) {
            Some(file) => Arc::clone(file),
            None => files
                .get(id)
                .ok_or_else(|| FsError::not_found(id.to_string()))?,
        };
        Ok((file, files))
    }

    pub(crate) fn detached_at(&self, id: FileId) -> Option<u64> {
        self.state.read().registry.detached_at(id)
    }

    pub(crate) fn close(&self, id: FileId) {
        self.state.write().registry.close(id);
    }
}

/// In-memory copy-on-write filesystem.
///
/// Cloning is cheap and every clone refers to the same store.
///
/// Handles must not be opened or closed from inside a [`MemFs::batch`]
/// closure: the batch holds the store lock.
#[derive(Clone)]
pub struct MemFs {
    shared: Arc<Shared>,
}

impl Default for MemFs {
    fn default() -> Self {
        Self::new()
    }
}

impl MemFs {
    /// A store holding an empty root directory, with default settings.
    pub fn new() -> Self {
        match Self::with_config(StoreConfig::default()) {
            Ok(fs) => fs,
            Err(e) => corrupted(format_args!("default config rejected: {e}")),
        }
    }

    /// A store with the given settings.
    pub fn with_config(config: StoreConfig) -> FsResult<Self> {
        config.validate()?;
        let root = File::new(FileId::random(), FileType::Directory, config.dir_mode)
            .owned_by(config.uid, config.gid);
        let tree = Tree::new(root, config.shard_levels)?;
        debug!(shard_levels = config.shard_levels, "store created");
        Ok(Self {
            shared: Arc::new(Shared {
                config,
                state: RwLock::new(State {
                    tree,
                    version: 0,
                    registry: Registry::default(),
                }),
            }),
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.shared.config
    }

    /// Committed batches so far.
    pub fn version(&self) -> u64 {
        self.shared.state.read().version
    }

    /// Files with at least one open handle.
    pub fn open_files(&self) -> usize {
        self.shared.state.read().registry.len()
    }

    /// Run several mutations as one atomic batch.
    ///
    /// Changes become visible together when `f` returns `Ok`; an error
    /// discards all of them.
    pub fn batch<T>(&self, f: impl FnOnce(&mut Batch<'_>) -> FsResult<T>) -> FsResult<T> {
        self.shared.update(f)
    }

    /// Read-only view of the current version.
    pub fn snapshot(&self) -> Snapshot {
        self.shared.snapshot()
    }

    // ========================================================================
    // Handles
    // ========================================================================

    /// Open the file at `path`, creating an empty regular file if it does
    /// not exist and `create` is set.
    pub fn open(&self, path: &str, create: bool) -> FsResult<Handle> {
        let name = path::base_name(path)?.to_string();
        let id = self.shared.update(|b| b.open_file(path, create))?;
        Ok(Handle::new(Arc::clone(&self.shared), id, name))
    }

    /// Create (or truncate) the regular file at `path` and open it.
    pub fn create(&self, path: &str) -> FsResult<Handle> {
        let name = path::base_name(path)?.to_string();
        let id = self.shared.update(|b| b.create_file(path))?;
        Ok(Handle::new(Arc::clone(&self.shared), id, name))
    }

    // ========================================================================
    // Single-operation batches
    // ========================================================================

    pub fn make_dir(&self, path: &str) -> FsResult<()> {
        self.batch(|b| b.make_dir(path))
    }

    pub fn make_dir_all(&self, path: &str) -> FsResult<()> {
        self.batch(|b| b.make_dir_all(path))
    }

    pub fn remove(&self, path: &str, recursive: bool) -> FsResult<()> {
        self.batch(|b| b.remove(path, recursive))
    }

    pub fn link(&self, old: &str, new: &str) -> FsResult<()> {
        self.batch(|b| b.link(old, new))
    }

    pub fn symlink(&self, target: &str, new: &str) -> FsResult<()> {
        self.batch(|b| b.symlink(target, new))
    }

    pub fn rename(&self, old: &str, new: &str) -> FsResult<()> {
        self.batch(|b| b.rename(old, new))
    }

    pub fn change_mode(&self, path: &str, perm: u32, follow: bool) -> FsResult<()> {
        self.batch(|b| b.change_mode(path, perm, follow))
    }

    pub fn change_owner(
        &self,
        path: &str,
        uid: Option<u32>,
        gid: Option<u32>,
        follow: bool,
    ) -> FsResult<()> {
        self.batch(|b| b.change_owner(path, uid, gid, follow))
    }

    pub fn change_times(
        &self,
        path: &str,
        atime: SystemTime,
        mtime: SystemTime,
        follow: bool,
    ) -> FsResult<()> {
        self.batch(|b| b.change_times(path, atime, mtime, follow))
    }

    pub fn truncate(&self, path: &str, size: u64) -> FsResult<()> {
        self.batch(|b| b.truncate(path, size))
    }

    /// Replace the content of the file at `path`, creating it if needed.
    pub fn write_file(&self, path: &str, data: &[u8]) -> FsResult<()> {
        self.batch(|b| b.write_file(path, data))
    }

    // ========================================================================
    // Reads
    // ========================================================================

    pub fn stat(&self, path: &str) -> FsResult<FileInfo> {
        self.snapshot().stat(path)
    }

    pub fn link_stat(&self, path: &str) -> FsResult<FileInfo> {
        self.snapshot().link_stat(path)
    }

    pub fn read_link(&self, path: &str) -> FsResult<String> {
        self.snapshot().read_link(path)
    }

    pub fn read_dir(&self, path: &str) -> FsResult<Vec<FileInfo>> {
        self.snapshot().read_dir(path)
    }

    pub fn read_file(&self, path: &str) -> FsResult<Vec<u8>> {
        self.snapshot().read_file(path)
    }

    /// Human-readable rendering of the current tree and index.
    pub fn dump(&self) -> String {
        self.snapshot().dump()
    }
}

impl fmt::Debug for MemFs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.read();
        f.debug_struct("MemFs")
            .field("version", &state.version)
            .field("root", &state.tree.root.id())
            .field("open_files", &state.registry.len())
            .finish()
    }
}
