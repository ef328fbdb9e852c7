//! File metadata types.
//!
//! `FileInfo` is the minimal portable shape (name, size, mode, mtime,
//! is-directory). Everything else lives in [`ExtFileInfo`], reached through
//! [`FileInfo::ext`].

use std::fmt;
use std::str::FromStr;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use strum::EnumString;

use crate::FileId;

/// Permission bits mask (rwx for user, group, other plus setuid/setgid/sticky).
const PERM_MASK: u32 = 0o7777;

const S_IFMT: u32 = 0o170000;
const S_IFREG: u32 = 0o100000;
const S_IFDIR: u32 = 0o040000;
const S_IFLNK: u32 = 0o120000;

/// File type enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(ascii_case_insensitive)]
pub enum FileType {
    /// Regular file.
    #[strum(serialize = "file", serialize = "regular")]
    File,
    /// Directory.
    #[strum(serialize = "directory", serialize = "dir")]
    Directory,
    /// Symbolic link.
    #[strum(serialize = "symlink", serialize = "link")]
    Symlink,
}

impl FileType {
    /// Returns true if this is a regular file.
    pub fn is_file(&self) -> bool {
        matches!(self, FileType::File)
    }

    /// Returns true if this is a directory.
    pub fn is_dir(&self) -> bool {
        matches!(self, FileType::Directory)
    }

    /// Returns true if this is a symbolic link.
    pub fn is_symlink(&self) -> bool {
        matches!(self, FileType::Symlink)
    }

    /// The `S_IFMT` bits for this type.
    pub fn type_bits(&self) -> u32 {
        match self {
            FileType::File => S_IFREG,
            FileType::Directory => S_IFDIR,
            FileType::Symlink => S_IFLNK,
        }
    }

    /// Parse from string (case-insensitive), accepting aliases.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        <Self as FromStr>::from_str(s).ok()
    }

    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::File => "file",
            FileType::Directory => "directory",
            FileType::Symlink => "symlink",
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Unix-style mode: type bits plus permission bits.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileMode(u32);

impl FileMode {
    /// Combine a file type with permission bits. Extra bits in `perm` are dropped.
    pub fn new(kind: FileType, perm: u32) -> Self {
        Self(kind.type_bits() | (perm & PERM_MASK))
    }

    /// The raw `st_mode` value.
    pub fn bits(&self) -> u32 {
        self.0
    }

    /// Permission bits only.
    pub fn perm(&self) -> u32 {
        self.0 & PERM_MASK
    }

    /// The file type encoded in the type bits.
    pub fn file_type(&self) -> FileType {
        match self.0 & S_IFMT {
            S_IFDIR => FileType::Directory,
            S_IFLNK => FileType::Symlink,
            _ => FileType::File,
        }
    }

    /// Returns true if the type bits say directory.
    pub fn is_dir(&self) -> bool {
        self.file_type().is_dir()
    }

    /// Returns true if the type bits say symbolic link.
    pub fn is_symlink(&self) -> bool {
        self.file_type().is_symlink()
    }
}

impl fmt::Display for FileMode {
    /// `ls -l` style, e.g. `drwxr-xr-x`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.file_type() {
            FileType::File => '-',
            FileType::Directory => 'd',
            FileType::Symlink => 'l',
        };
        let mut s = String::with_capacity(10);
        s.push(kind);
        for shift in [6, 3, 0] {
            let bits = (self.0 >> shift) & 0o7;
            s.push(if bits & 0o4 != 0 { 'r' } else { '-' });
            s.push(if bits & 0o2 != 0 { 'w' } else { '-' });
            s.push(if bits & 0o1 != 0 { 'x' } else { '-' });
        }
        f.write_str(&s)
    }
}

impl fmt::Debug for FileMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FileMode({:o} {})", self.0, self)
    }
}

/// Metadata beyond the portable file-info shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtFileInfo {
    /// Identifier of the file (shared by all hardlinks).
    pub id: FileId,
    /// Owner user ID.
    pub uid: u32,
    /// Owner group ID.
    pub gid: u32,
    /// Last access time.
    pub atime: SystemTime,
    /// Last status change time.
    pub ctime: SystemTime,
    /// Number of directory entries referencing the file.
    pub nlink: u32,
}

/// File metadata as reported by `stat`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    /// Base name the file was reached through.
    pub name: String,
    /// Size in bytes (content length, or target length for symlinks).
    pub size: u64,
    /// Type and permission bits.
    pub mode: FileMode,
    /// Last modification time.
    pub mtime: SystemTime,
    /// Extended fields.
    pub ext: ExtFileInfo,
}

impl FileInfo {
    /// Base name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Type and permission bits.
    pub fn mode(&self) -> FileMode {
        self.mode
    }

    /// Last modification time.
    pub fn mod_time(&self) -> SystemTime {
        self.mtime
    }

    /// Returns true if this is a directory.
    pub fn is_dir(&self) -> bool {
        self.mode.is_dir()
    }

    /// File type.
    pub fn file_type(&self) -> FileType {
        self.mode.file_type()
    }

    /// Extended metadata (uid, gid, atime, ...).
    pub fn ext(&self) -> &ExtFileInfo {
        &self.ext
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_type() {
        assert!(FileType::File.is_file());
        assert!(!FileType::File.is_dir());
        assert!(FileType::Directory.is_dir());
        assert!(FileType::Symlink.is_symlink());
    }

    #[test]
    fn test_file_type_parse_aliases() {
        assert_eq!(FileType::from_str("DIR"), Some(FileType::Directory));
        assert_eq!(FileType::from_str("regular"), Some(FileType::File));
        assert_eq!(FileType::from_str("link"), Some(FileType::Symlink));
        assert_eq!(FileType::from_str("socket"), None);
    }

    #[test]
    fn test_mode_bits() {
        let mode = FileMode::new(FileType::Directory, 0o755);
        assert!(mode.is_dir());
        assert_eq!(mode.perm(), 0o755);
        assert_eq!(mode.bits(), 0o040755);
        assert_eq!(mode.to_string(), "drwxr-xr-x");

        let mode = FileMode::new(FileType::File, 0o100644);
        assert_eq!(mode.file_type(), FileType::File);
        assert_eq!(mode.perm(), 0o644);
        assert_eq!(mode.to_string(), "-rw-r--r--");

        assert_eq!(FileMode::new(FileType::Symlink, 0o777).to_string(), "lrwxrwxrwx");
    }
}
