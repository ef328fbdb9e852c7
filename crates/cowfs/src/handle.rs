//! Open-file handles.
//!
//! A handle is bound to a file identity, not to the path it was opened
//! through. Renaming the file leaves the handle working; removing the last
//! link moves the file into the store's detached registry, where the handle
//! keeps reading and writing it until it is closed.

use std::fmt;
use std::io::{self, SeekFrom};
use std::sync::Arc;
use std::time::SystemTime;

use cowfs_types::{FileId, FileInfo};
use parking_lot::Mutex;

use crate::error::{FsError, FsResult};
use crate::index::FileMap;
use crate::node::{Key, NodeSet};
use crate::store::Shared;

/// Directory listing in progress: the child set as of the first `read_dir`
/// call and the last name returned.
struct Listing {
    entries: Arc<NodeSet>,
    files: Arc<FileMap>,
    cursor: Option<Key>,
}

struct HandleState {
    offset: u64,
    closed: bool,
    listing: Option<Listing>,
}

/// Cursor over one open file.
///
/// All methods take `&self`; the offset and listing cursor are guarded by
/// an internal mutex. Dropping the handle closes it.
pub struct Handle {
    shared: Arc<Shared>,
    id: FileId,
    name: String,
    state: Mutex<HandleState>,
}

impl Handle {
    pub(crate) fn new(shared: Arc<Shared>, id: FileId, name: String) -> Self {
        Self {
            shared,
            id,
            name,
            state: Mutex::new(HandleState {
                offset: 0,
                closed: false,
                listing: None,
            }),
        }
    }

    /// Identity of the open file.
    pub fn id(&self) -> FileId {
        self.id
    }

    /// Base name of the path the handle was opened with.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current byte offset.
    pub fn offset(&self) -> u64 {
        self.state.lock().offset
    }

    /// Read at the current offset and advance it. Returns 0 at end of file,
    /// as `io::Read` does; use [`Handle::read_at`] for an explicit flag.
    pub fn read(&self, buf: &mut [u8]) -> FsResult<usize> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(FsError::Closed);
        }
        let file = self.shared.load(self.id)?;
        let (n, _) = file.read_at(buf, state.offset)?;
        state.offset += n as u64;
        Ok(n)
    }

    /// Read at `offset` without moving the handle's offset.
    ///
    /// Returns the byte count and whether the read reached end of file; a
    /// count short of `buf.len()` always comes with `true`.
    pub fn read_at(&self, buf: &mut [u8], offset: u64) -> FsResult<(usize, bool)> {
        let state = self.state.lock();
        if state.closed {
            return Err(FsError::Closed);
        }
        let file = self.shared.load(self.id)?;
        file.read_at(buf, offset)
    }

    /// Write at the current offset and advance it.
    pub fn write(&self, data: &[u8]) -> FsResult<usize> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(FsError::Closed);
        }
        let offset = state.offset;
        let n = self.shared.update(|b| b.write_id(self.id, data, offset))?;
        state.offset += n as u64;
        Ok(n)
    }

    /// Write at `offset` without moving the handle's offset.
    pub fn write_at(&self, data: &[u8], offset: u64) -> FsResult<usize> {
        let state = self.state.lock();
        if state.closed {
            return Err(FsError::Closed);
        }
        self.shared.update(|b| b.write_id(self.id, data, offset))
    }

    /// Move the offset. Positions before the start of the file are rejected.
    pub fn seek(&self, pos: SeekFrom) -> FsResult<u64> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(FsError::Closed);
        }
        let target = match pos {
            SeekFrom::Start(n) => Some(n),
            SeekFrom::Current(delta) => state.offset.checked_add_signed(delta),
            SeekFrom::End(delta) => self.shared.load(self.id)?.size().checked_add_signed(delta),
        };
        let Some(target) = target else {
            return Err(FsError::bad_argument(format!("seek to {pos:?} out of range")));
        };
        state.offset = target;
        Ok(target)
    }

    /// Next entries of a directory listing.
    ///
    /// The listing reflects the directory as of the first call. With
    /// `n > 0` at most `n` entries are returned; otherwise all remaining
    /// ones. An empty result means the listing is exhausted.
    pub fn read_dir(&self, n: isize) -> FsResult<Vec<FileInfo>> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(FsError::Closed);
        }
        if state.listing.is_none() {
            let (dir, files) = self.shared.load_with_index(self.id)?;
            let Some(entries) = dir.entries() else {
                return Err(FsError::type_mismatch(format!("{} is not a directory", self.name)));
            };
            state.listing = Some(Listing {
                entries: Arc::clone(entries),
                files,
                cursor: None,
            });
        }
        let Some(listing) = state.listing.as_mut() else {
            return Ok(Vec::new());
        };

        let limit = if n > 0 { n as usize } else { usize::MAX };
        let leaves = match &listing.cursor {
            Some(key) => listing.entries.iter_after(key),
            None => listing.entries.iter(),
        };
        let mut out = Vec::new();
        let mut last = None;
        for node in leaves.take(limit) {
            let Some(entry) = node.as_entry() else {
                continue;
            };
            last = Some(entry.key());
            // Children of a detached directory may already be gone.
            if let Some(file) = listing.files.get(entry.id()) {
                out.push(file.info(entry.name()));
            }
        }
        if last.is_some() {
            listing.cursor = last;
        }
        Ok(out)
    }

    /// Metadata of the open file.
    pub fn stat(&self) -> FsResult<FileInfo> {
        self.check_open()?;
        Ok(self.shared.load(self.id)?.info(&self.name))
    }

    /// Nothing to flush; fails only on a closed handle.
    pub fn sync(&self) -> FsResult<()> {
        self.check_open()
    }

    pub fn truncate(&self, size: u64) -> FsResult<()> {
        let _state = self.lock_open()?;
        self.shared.update(|b| b.truncate_id(self.id, size))
    }

    pub fn change_mode(&self, perm: u32) -> FsResult<()> {
        let _state = self.lock_open()?;
        self.shared.update(|b| {
            b.change_by_id(self.id, |f| Ok(Some(f.with_perm(perm))))?;
            Ok(())
        })
    }

    pub fn change_owner(&self, uid: Option<u32>, gid: Option<u32>) -> FsResult<()> {
        let _state = self.lock_open()?;
        self.shared.update(|b| {
            b.change_by_id(self.id, |f| Ok(Some(f.with_owner(uid, gid))))?;
            Ok(())
        })
    }

    pub fn change_times(&self, atime: SystemTime, mtime: SystemTime) -> FsResult<()> {
        let _state = self.lock_open()?;
        self.shared.update(|b| {
            b.change_by_id(self.id, |f| Ok(Some(f.with_times(atime, mtime))))?;
            Ok(())
        })
    }

    /// Store version at which the file lost its last link, if it has.
    pub fn detached_since(&self) -> Option<u64> {
        self.shared.detached_at(self.id)
    }

    /// Release the handle. Closing twice is fine.
    pub fn close(&self) -> FsResult<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Ok(());
        }
        state.closed = true;
        state.listing = None;
        self.shared.close(self.id);
        Ok(())
    }

    fn check_open(&self) -> FsResult<()> {
        self.lock_open().map(drop)
    }

    fn lock_open(&self) -> FsResult<parking_lot::MutexGuard<'_, HandleState>> {
        let state = self.state.lock();
        if state.closed {
            return Err(FsError::Closed);
        }
        Ok(state)
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish()
    }
}

// ============================================================================
// std::io adapters
// ============================================================================

impl io::Read for Handle {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Handle::read(self, buf).map_err(Into::into)
    }
}

impl io::Read for &Handle {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Handle::read(*self, buf).map_err(Into::into)
    }
}

impl io::Write for Handle {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Handle::write(self, buf).map_err(Into::into)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.sync().map_err(Into::into)
    }
}

impl io::Write for &Handle {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Handle::write(*self, buf).map_err(Into::into)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.sync().map_err(Into::into)
    }
}

impl io::Seek for Handle {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        Handle::seek(self, pos).map_err(Into::into)
    }
}

impl io::Seek for &Handle {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        Handle::seek(*self, pos).map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Seek, Write};

    use super::*;
    use crate::MemFs;

    #[test]
    fn test_write_seek_read() {
        let fs = MemFs::new();
        let h = fs.create("f").unwrap();
        assert_eq!(h.write(b"hello world").unwrap(), 11);
        assert_eq!(h.seek(SeekFrom::Start(6)).unwrap(), 6);
        let mut buf = [0u8; 16];
        let n = h.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"world");
        assert_eq!(h.read(&mut buf).unwrap(), 0);

        assert_eq!(h.seek(SeekFrom::End(-5)).unwrap(), 6);
        assert_eq!(h.seek(SeekFrom::Current(-6)).unwrap(), 0);
        assert!(matches!(h.seek(SeekFrom::Current(-1)), Err(FsError::BadArgument(_))));
    }

    #[test]
    fn test_read_at_reports_eof() {
        let fs = MemFs::new();
        let h = fs.create("f").unwrap();
        h.write(b"hello").unwrap();
        let mut buf = [0u8; 3];
        assert_eq!(h.read_at(&mut buf, 0).unwrap(), (3, false));
        assert_eq!(&buf, b"hel");
        assert_eq!(h.read_at(&mut buf, 3).unwrap(), (2, true));
        assert_eq!(&buf[..2], b"lo");
        assert_eq!(h.read_at(&mut buf, 9).unwrap(), (0, true));
        assert_eq!(h.offset(), 5);
    }

    #[test]
    fn test_io_traits() {
        let fs = MemFs::new();
        let mut h = fs.create("f").unwrap();
        h.write_all(b"abc").unwrap();
        h.flush().unwrap();
        h.rewind().unwrap();
        let mut s = String::new();
        h.read_to_string(&mut s).unwrap();
        assert_eq!(s, "abc");

        let mut shared = &h;
        shared.seek(SeekFrom::Start(1)).unwrap();
        let mut buf = Vec::new();
        shared.read_to_end(&mut buf).unwrap();
        assert_eq!(buf, b"bc");
    }

    #[test]
    fn test_closed_handle() {
        let fs = MemFs::new();
        let h = fs.create("f").unwrap();
        h.close().unwrap();
        h.close().unwrap();
        assert_eq!(h.read(&mut [0u8; 1]).unwrap_err(), FsError::Closed);
        assert_eq!(h.write(b"x").unwrap_err(), FsError::Closed);
        assert_eq!(h.stat().unwrap_err(), FsError::Closed);
        assert_eq!(fs.open_files(), 0);

        let err: io::Error = h.sync().unwrap_err().into();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[test]
    fn test_drop_closes() {
        let fs = MemFs::new();
        {
            let _a = fs.create("f").unwrap();
            let _b = fs.open("f", false).unwrap();
            assert_eq!(fs.open_files(), 1);
        }
        assert_eq!(fs.open_files(), 0);
    }

    #[test]
    fn test_read_dir_pages() {
        let fs = MemFs::new();
        fs.make_dir("d").unwrap();
        for name in ["c", "a", "b", "e", "d"] {
            fs.write_file(&format!("d/{name}"), name.as_bytes()).unwrap();
        }
        let h = fs.open("d", false).unwrap();
        let page: Vec<_> = h.read_dir(2).unwrap().into_iter().map(|i| i.name).collect();
        assert_eq!(page, ["a", "b"]);

        // Changes after the listing started are not seen.
        fs.write_file("d/bb", b"").unwrap();

        let page: Vec<_> = h.read_dir(2).unwrap().into_iter().map(|i| i.name).collect();
        assert_eq!(page, ["c", "d"]);
        let rest: Vec<_> = h.read_dir(0).unwrap().into_iter().map(|i| i.name).collect();
        assert_eq!(rest, ["e"]);
        assert!(h.read_dir(0).unwrap().is_empty());
        assert!(h.read_dir(3).unwrap().is_empty());
    }

    #[test]
    fn test_read_dir_on_file() {
        let fs = MemFs::new();
        let h = fs.create("f").unwrap();
        assert!(matches!(h.read_dir(0), Err(FsError::TypeMismatch(_))));
    }

    #[test]
    fn test_handle_follows_rename() {
        let fs = MemFs::new();
        let h = fs.create("a").unwrap();
        fs.rename("a", "b").unwrap();
        h.write(b"moved").unwrap();
        assert_eq!(fs.read_file("b").unwrap(), b"moved");
        assert_eq!(h.name(), "a");
        assert_eq!(h.stat().unwrap().size(), 5);
    }
}
