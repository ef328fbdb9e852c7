//! File records: content, child set or link target, plus metadata.
//!
//! A `File` is never modified in place. Every operation that changes one
//! returns a new `File` carrying a fresh [`Stamp`]; the caller swaps it into
//! the identity index.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use cowfs_types::{ExtFileInfo, FileId, FileInfo, FileMode, FileType, Stamp};

use crate::error::{FsError, FsResult};
use crate::node::{Key, Mutator, Node, NodeSet};

/// What a file holds.
#[derive(Clone)]
pub enum Body {
    /// Bytes of a regular file.
    Content(Arc<[u8]>),
    /// Children of a directory.
    Entries(Arc<NodeSet>),
    /// Target of a symbolic link.
    Link(Arc<str>),
}

/// One version of a file's content and metadata.
#[derive(Clone)]
pub struct File {
    id: FileId,
    stamp: Stamp,
    kind: FileType,
    perm: u32,
    uid: u32,
    gid: u32,
    nlink: u32,
    atime: SystemTime,
    mtime: SystemTime,
    ctime: SystemTime,
    body: Body,
}

/// `now`, or one nanosecond past `prev` if the clock has not moved on.
fn tick(prev: SystemTime) -> SystemTime {
    let now = SystemTime::now();
    if now > prev {
        now
    } else {
        prev + Duration::from_nanos(1)
    }
}

impl File {
    /// A new file of the given type with an empty body, counted as linked
    /// from exactly one directory entry.
    pub fn new(id: FileId, kind: FileType, perm: u32) -> Self {
        let now = SystemTime::now();
        let body = match kind {
            FileType::File => Body::Content(Arc::from(&[][..])),
            FileType::Directory => Body::Entries(Arc::new(NodeSet::new())),
            FileType::Symlink => Body::Link(Arc::from("")),
        };
        Self {
            id,
            stamp: Stamp::next(),
            kind,
            perm: FileMode::new(kind, perm).perm(),
            uid: 0,
            gid: 0,
            nlink: 1,
            atime: now,
            mtime: now,
            ctime: now,
            body,
        }
    }

    /// A new symbolic link pointing at `target`.
    pub fn symlink(id: FileId, target: &str) -> Self {
        let mut file = Self::new(id, FileType::Symlink, 0o777);
        file.body = Body::Link(Arc::from(target));
        file
    }

    /// Builder form of [`File::with_owner`] for freshly made files.
    pub fn owned_by(mut self, uid: u32, gid: u32) -> Self {
        self.uid = uid;
        self.gid = gid;
        self
    }

    /// Copy with a fresh stamp and status-change time.
    fn derive(&self) -> Self {
        Self {
            id: self.id,
            stamp: Stamp::next(),
            kind: self.kind,
            perm: self.perm,
            uid: self.uid,
            gid: self.gid,
            nlink: self.nlink,
            atime: self.atime,
            mtime: self.mtime,
            ctime: tick(self.ctime),
            body: self.body.clone(),
        }
    }

    /// Copy with a fresh stamp and an advanced modification time.
    pub fn revise(&self) -> Self {
        let mut file = self.derive();
        file.mtime = tick(self.mtime);
        file
    }

    pub fn id(&self) -> FileId {
        self.id
    }

    pub fn stamp(&self) -> Stamp {
        self.stamp
    }

    pub fn kind(&self) -> FileType {
        self.kind
    }

    pub fn is_dir(&self) -> bool {
        self.kind.is_dir()
    }

    pub fn mode(&self) -> FileMode {
        FileMode::new(self.kind, self.perm)
    }

    pub fn uid(&self) -> u32 {
        self.uid
    }

    pub fn gid(&self) -> u32 {
        self.gid
    }

    /// Number of directory entries bound to this file.
    pub fn nlink(&self) -> u32 {
        self.nlink
    }

    pub fn atime(&self) -> SystemTime {
        self.atime
    }

    pub fn mtime(&self) -> SystemTime {
        self.mtime
    }

    pub fn ctime(&self) -> SystemTime {
        self.ctime
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    /// Content length, or target length for a symlink. Directories report 0.
    pub fn size(&self) -> u64 {
        match &self.body {
            Body::Content(bytes) => bytes.len() as u64,
            Body::Link(target) => target.len() as u64,
            Body::Entries(_) => 0,
        }
    }

    /// Child set of a directory.
    pub fn entries(&self) -> Option<&Arc<NodeSet>> {
        match &self.body {
            Body::Entries(entries) => Some(entries),
            _ => None,
        }
    }

    /// Target of a symlink.
    pub fn target(&self) -> Option<&str> {
        match &self.body {
            Body::Link(target) => Some(target),
            _ => None,
        }
    }

    /// Copy `offset..` into `buf`. Returns bytes copied and whether the end
    /// of the content was reached before `buf` was filled.
    pub fn read_at(&self, buf: &mut [u8], offset: u64) -> FsResult<(usize, bool)> {
        let Body::Content(bytes) = &self.body else {
            return Err(FsError::type_mismatch(format!("{} is not a regular file", self.id)));
        };
        let start = usize::try_from(offset).unwrap_or(usize::MAX).min(bytes.len());
        let n = buf.len().min(bytes.len() - start);
        buf[..n].copy_from_slice(&bytes[start..start + n]);
        Ok((n, n < buf.len()))
    }

    /// New version with `data` overlaid at `offset`, zero-filling any gap
    /// past the current end. Empty `data` leaves the file as it is.
    pub fn write_at(&self, data: &[u8], offset: u64) -> FsResult<(Self, usize)> {
        let Body::Content(bytes) = &self.body else {
            return Err(FsError::type_mismatch(format!("{} is not a regular file", self.id)));
        };
        let start = usize::try_from(offset)
            .map_err(|_| FsError::bad_argument(format!("offset {offset} out of range")))?;
        let end = start
            .checked_add(data.len())
            .ok_or_else(|| FsError::bad_argument(format!("offset {offset} out of range")))?;
        if data.is_empty() {
            return Ok((self.clone(), 0));
        }

        let mut content = Vec::with_capacity(end.max(bytes.len()));
        content.extend_from_slice(bytes);
        if content.len() < end {
            content.resize(end, 0);
        }
        content[start..end].copy_from_slice(data);

        let mut file = self.revise();
        file.body = Body::Content(content.into());
        Ok((file, data.len()))
    }

    /// New version shrunk or zero-extended to `size` bytes.
    pub fn truncated(&self, size: u64) -> FsResult<Self> {
        let Body::Content(bytes) = &self.body else {
            return Err(FsError::type_mismatch(format!("{} is not a regular file", self.id)));
        };
        let size = usize::try_from(size)
            .map_err(|_| FsError::bad_argument(format!("size {size} out of range")))?;
        let mut content = bytes[..size.min(bytes.len())].to_vec();
        content.resize(size, 0);

        let mut file = self.revise();
        file.body = Body::Content(content.into());
        Ok(file)
    }

    /// New version of a directory holding `entries`.
    pub fn with_entries(&self, entries: Arc<NodeSet>) -> Self {
        let mut file = self.revise();
        file.body = Body::Entries(entries);
        file
    }

    /// New version with permission bits replaced. Type bits are kept.
    pub fn with_perm(&self, perm: u32) -> Self {
        let mut file = self.derive();
        file.perm = FileMode::new(self.kind, perm).perm();
        file
    }

    /// New version with the given owner fields replaced.
    pub fn with_owner(&self, uid: Option<u32>, gid: Option<u32>) -> Self {
        let mut file = self.derive();
        file.uid = uid.unwrap_or(self.uid);
        file.gid = gid.unwrap_or(self.gid);
        file
    }

    /// New version with access and modification times set.
    pub fn with_times(&self, atime: SystemTime, mtime: SystemTime) -> Self {
        let mut file = self.derive();
        file.atime = atime;
        file.mtime = mtime;
        file
    }

    /// New version with the link count set.
    pub fn with_nlink(&self, nlink: u32) -> Self {
        let mut file = self.derive();
        file.nlink = nlink;
        file
    }

    /// Stat record, reporting `name` as the base name.
    pub fn info(&self, name: &str) -> FileInfo {
        FileInfo {
            name: name.to_string(),
            size: self.size(),
            mode: self.mode(),
            mtime: self.mtime,
            ext: ExtFileInfo {
                id: self.id,
                uid: self.uid,
                gid: self.gid,
                atime: self.atime,
                ctime: self.ctime,
                nlink: self.nlink,
            },
        }
    }

    /// Mutation entry point for a file slot.
    ///
    /// With an empty path `f` replaces the file itself; the replacement must
    /// keep the identifier and the directory flag. Otherwise the path continues
    /// into the directory's child set, and a changed child set yields a
    /// revised directory.
    pub(crate) fn mutate(
        this: &Arc<Self>,
        path: &[Key],
        f: &mut Mutator<'_>,
    ) -> FsResult<Option<Node>> {
        if path.is_empty() {
            let result = f(Some(Node::File(Arc::clone(this))))?;
            if let Some(node) = &result {
                this.check_replacement(node)?;
            }
            return Ok(result);
        }

        let Some(entries) = this.entries() else {
            return Err(FsError::type_mismatch(format!("{} is not a directory", path[0])));
        };
        let new_entries = NodeSet::mutate(entries, path, f)?;
        if Arc::ptr_eq(&new_entries, entries) {
            return Ok(Some(Node::File(Arc::clone(this))));
        }
        Ok(Some(Node::File(Arc::new(this.with_entries(new_entries)))))
    }

    fn check_replacement(&self, node: &Node) -> FsResult<()> {
        let Node::File(new) = node else {
            return Err(FsError::type_mismatch(format!("{} replaced by {node:?}", self.id)));
        };
        if new.id != self.id {
            return Err(FsError::NameMismatch {
                expected: self.id.to_string(),
                got: new.id.to_string(),
            });
        }
        if new.is_dir() != self.is_dir() {
            return Err(FsError::type_mismatch(format!(
                "{} cannot change from {} to {}",
                self.id, self.kind, new.kind
            )));
        }
        Ok(())
    }
}
