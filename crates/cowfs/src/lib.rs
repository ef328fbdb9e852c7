//! # cowfs
//!
//! In-memory POSIX-like filesystem built from immutable, shared tree nodes.
//!
//! Every mutation rebuilds only the path from the changed node up to the
//! root and shares everything else with the previous version. That makes
//! snapshots free and lets a group of operations commit atomically: a
//! [`Batch`] works on a private copy of the root pointers and installs them
//! only if every operation succeeds.
//!
//! # Layout
//!
//! - **Namespace**: directories hold their children in a [`NodeSet`] of
//!   [`DirEntry`] leaves keyed by name. Entries carry only a name and a
//!   [`FileId`].
//! - **Identity index**: a [`FileMap`] maps every `FileId` to its current
//!   [`File`]. Hardlinks are several entries naming one identity.
//! - **Handles**: a [`Handle`] is bound to an identity. Files unlinked while
//!   open keep living in the store's registry until the last handle closes.
//!
//! ```
//! use cowfs::MemFs;
//!
//! let fs = MemFs::new();
//! fs.batch(|b| {
//!     b.make_dir_all("etc/app")?;
//!     b.write_file("etc/app/conf", b"debug = true")
//! })
//! .unwrap();
//! assert_eq!(fs.read_file("etc/app/conf").unwrap(), b"debug = true");
//! ```

mod config;
mod dir_entry;
mod error;
mod file;
mod handle;
mod index;
pub mod node;
pub mod path;
mod store;

pub use config::StoreConfig;
pub use dir_entry::DirEntry;
pub use error::{FsError, FsResult};
pub use file::{Body, File};
pub use handle::Handle;
pub use index::FileMap;
pub use node::{Key, Leaves, Node, NodeSet};
pub use store::{Batch, MemFs, Snapshot};

pub use cowfs_types::{ExtFileInfo, FileId, FileInfo, FileMode, FileType, Stamp};
