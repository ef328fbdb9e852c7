//! Open-handle registry.
//!
//! Tracks how many handles reference each file, and keeps the last version
//! of files that were unlinked while open ("detached"). Guarded by the same
//! lock as the tree pointers, so a handle never observes a file that is in
//! neither place.

use std::collections::HashMap;
use std::sync::Arc;

use cowfs_types::FileId;
use tracing::debug;

use crate::file::File;

#[derive(Default)]
struct OpenFile {
    count: usize,
    detached: Option<Arc<File>>,
    detached_at: Option<u64>,
}

#[derive(Default)]
pub(crate) struct Registry {
    open: HashMap<FileId, OpenFile>,
}

impl Registry {
    /// Handles currently open on `id`.
    pub(crate) fn open_count(&self, id: FileId) -> usize {
        self.open.get(&id).map_or(0, |f| f.count)
    }

    /// Whether `id` has an entry at all (open or detached).
    pub(crate) fn contains(&self, id: FileId) -> bool {
        self.open.contains_key(&id)
    }

    /// Snapshot of a detached file.
    pub(crate) fn detached(&self, id: FileId) -> Option<&Arc<File>> {
        self.open.get(&id)?.detached.as_ref()
    }

    /// Store version at which `id` was detached.
    pub(crate) fn detached_at(&self, id: FileId) -> Option<u64> {
        self.open.get(&id)?.detached_at
    }

    /// Apply a committed batch's opens and detached snapshots.
    pub(crate) fn apply(
        &mut self,
        opened: Vec<FileId>,
        detached: HashMap<FileId, Arc<File>>,
        version: u64,
    ) {
        for id in opened {
            self.open.entry(id).or_default().count += 1;
        }
        for (id, file) in detached {
            let Some(entry) = self.open.get_mut(&id) else {
                debug!(%id, "dropping snapshot of file with no open handles");
                continue;
            };
            if entry.detached_at.is_none() {
                debug!(%id, version, "file detached");
                entry.detached_at = Some(version);
            }
            entry.detached = Some(file);
        }
    }

    /// Release one handle on `id`. The entry and any snapshot go away with
    /// the last handle.
    pub(crate) fn close(&mut self, id: FileId) {
        let Some(entry) = self.open.get_mut(&id) else {
            return;
        };
        entry.count = entry.count.saturating_sub(1);
        if entry.count == 0 && self.open.remove(&id).is_some_and(|e| e.detached.is_some()) {
            debug!(%id, "last handle closed, discarding detached file");
        }
    }

    /// Number of files with open handles.
    pub(crate) fn len(&self) -> usize {
        self.open.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cowfs_types::FileType;

    fn file(raw: u64) -> Arc<File> {
        Arc::new(File::new(FileId::from_raw(raw), FileType::File, 0o644))
    }

    #[test]
    fn test_open_close_counts() {
        let mut reg = Registry::default();
        let id = FileId::from_raw(1);
        reg.apply(vec![id, id], HashMap::new(), 1);
        assert_eq!(reg.open_count(id), 2);
        reg.close(id);
        assert_eq!(reg.open_count(id), 1);
        reg.close(id);
        assert!(!reg.contains(id));
        reg.close(id);
        assert_eq!(reg.len(), 0);
    }

    #[test]
    fn test_detach_keeps_first_version() {
        let mut reg = Registry::default();
        let id = FileId::from_raw(1);
        reg.apply(vec![id], HashMap::new(), 1);
        reg.apply(Vec::new(), HashMap::from([(id, file(1))]), 5);
        assert_eq!(reg.detached_at(id), Some(5));

        let newer = file(1);
        reg.apply(Vec::new(), HashMap::from([(id, Arc::clone(&newer))]), 6);
        assert_eq!(reg.detached_at(id), Some(5));
        assert!(Arc::ptr_eq(reg.detached(id).unwrap(), &newer));

        reg.close(id);
        assert!(reg.detached(id).is_none());
    }

    #[test]
    fn test_detach_without_handles_is_dropped() {
        let mut reg = Registry::default();
        let id = FileId::from_raw(2);
        reg.apply(Vec::new(), HashMap::from([(id, file(2))]), 3);
        assert!(!reg.contains(id));
    }
}
