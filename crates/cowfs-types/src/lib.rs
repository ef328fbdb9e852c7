//! Shared identity and metadata types for cowfs.
//!
//! - [`FileId`] names a file's content and metadata independent of any path.
//! - [`Stamp`] marks one immutable version of a tree node.
//! - [`FileType`], [`FileMode`], [`FileInfo`] describe files the way `stat`
//!   reports them, with [`ExtFileInfo`] carrying the fields that don't fit
//!   the minimal portable shape.

pub mod ids;
mod types;

pub use ids::{FileId, Stamp};
pub use types::{ExtFileInfo, FileInfo, FileMode, FileType};
