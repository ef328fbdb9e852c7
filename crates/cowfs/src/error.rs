//! Store error types.

use std::fmt;
use std::io;

use thiserror::Error;

/// Errors returned by store, batch and handle operations.
///
/// Every variant is a recoverable, caller-visible condition. Broken internal
/// invariants are not represented here; see [`corrupted`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FsError {
    /// Path, name or identifier absent.
    #[error("not found: {0}")]
    NotFound(String),

    /// Name already bound.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Directory/non-directory conflict for the same identity.
    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    /// A mutation tried to change the key of an existing slot.
    #[error("name mismatch: expected {expected}, got {got}")]
    NameMismatch { expected: String, got: String },

    /// Empty, ".", ".." or otherwise unusable name component.
    #[error("invalid name: {0:?}")]
    InvalidName(String),

    /// Malformed path.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Non-recursive remove of a populated directory.
    #[error("directory not empty: {0}")]
    DirNotEmpty(String),

    /// Hardlink target is a directory.
    #[error("cannot link directory: {0}")]
    CannotLink(String),

    /// Not a symbolic link.
    #[error("not a symbolic link: {0}")]
    NotSymlink(String),

    /// Symlink resolution exceeded the hop bound.
    #[error("too many levels of symbolic links: {0}")]
    TooManyLinks(String),

    /// Operation on a closed handle.
    #[error("handle is closed")]
    Closed,

    /// Unsupported argument (negative seek, oversized length, ...).
    #[error("bad argument: {0}")]
    BadArgument(String),

    /// Attempt to remove or replace the root.
    #[error("cannot remove: {0}")]
    CannotRemove(String),

    /// Store configuration rejected.
    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

impl FsError {
    /// Create a NotFound error.
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound(path.into())
    }

    /// Create an AlreadyExists error.
    pub fn already_exists(path: impl Into<String>) -> Self {
        Self::AlreadyExists(path.into())
    }

    /// Create a TypeMismatch error.
    pub fn type_mismatch(path: impl Into<String>) -> Self {
        Self::TypeMismatch(path.into())
    }

    /// Create an InvalidPath error.
    pub fn invalid_path(path: impl Into<String>) -> Self {
        Self::InvalidPath(path.into())
    }

    /// Create a BadArgument error.
    pub fn bad_argument(msg: impl Into<String>) -> Self {
        Self::BadArgument(msg.into())
    }

    /// Annotate with the path under resolution.
    ///
    /// Errors raised deep inside tree mutation only know the key they failed
    /// on; the operation boundary prefixes the full path.
    pub fn in_path(self, path: &str) -> Self {
        let at = |detail: String| {
            if detail.is_empty() || detail == path {
                path.to_string()
            } else {
                format!("{path} ({detail})")
            }
        };
        match self {
            Self::NotFound(d) => Self::NotFound(at(d)),
            Self::AlreadyExists(d) => Self::AlreadyExists(at(d)),
            Self::TypeMismatch(d) => Self::TypeMismatch(at(d)),
            Self::InvalidPath(d) => Self::InvalidPath(at(d)),
            Self::DirNotEmpty(d) => Self::DirNotEmpty(at(d)),
            Self::CannotLink(d) => Self::CannotLink(at(d)),
            Self::NotSymlink(d) => Self::NotSymlink(at(d)),
            Self::TooManyLinks(d) => Self::TooManyLinks(at(d)),
            Self::CannotRemove(d) => Self::CannotRemove(at(d)),
            other => other,
        }
    }
}

/// Convert FsError to std::io::Error for compatibility.
impl From<FsError> for io::Error {
    fn from(e: FsError) -> Self {
        let kind = match &e {
            FsError::NotFound(_) => io::ErrorKind::NotFound,
            FsError::AlreadyExists(_) => io::ErrorKind::AlreadyExists,
            FsError::TypeMismatch(_) => io::ErrorKind::InvalidInput,
            FsError::NameMismatch { .. } => io::ErrorKind::InvalidInput,
            FsError::InvalidName(_) | FsError::InvalidPath(_) => io::ErrorKind::InvalidInput,
            FsError::DirNotEmpty(_) => io::ErrorKind::DirectoryNotEmpty,
            FsError::CannotLink(_) => io::ErrorKind::PermissionDenied,
            FsError::NotSymlink(_) => io::ErrorKind::InvalidInput,
            FsError::TooManyLinks(_) => io::ErrorKind::InvalidInput,
            FsError::Closed => io::ErrorKind::BrokenPipe,
            FsError::BadArgument(_) => io::ErrorKind::InvalidInput,
            FsError::CannotRemove(_) => io::ErrorKind::PermissionDenied,
            FsError::InvalidConfig(_) => io::ErrorKind::InvalidData,
        };
        io::Error::new(kind, e)
    }
}

/// Store result type.
pub type FsResult<T> = Result<T, FsError>;

/// Abort on a broken internal invariant.
///
/// A directory entry whose file is missing from the index, or an index slot
/// holding the wrong kind of node, means the tree is corrupt. That is not a
/// condition callers can recover from, so it is never returned as `FsError`.
#[cold]
#[track_caller]
pub(crate) fn corrupted(what: impl fmt::Display) -> ! {
    tracing::error!("index corruption: {what}");
    panic!("index corruption: {what}");
}
