//! Store configuration.
//!
//! Defaults suit almost every use; the knobs exist for tests and for callers
//! that know their file population. Configs can be written inline with the
//! `with_*` builders or loaded from RON:
//!
//! ```ron
//! (
//!     shard_levels: 3,
//!     max_symlink_hops: 16,
//!     file_mode: 0o644,
//! )
//! ```

use serde::{Deserialize, Serialize};

use cowfs_types::ids::FILE_ID_BYTES;

use crate::error::{FsError, FsResult};

/// Configuration for a [`MemFs`](crate::MemFs) store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Byte levels of the identity index above the file slots.
    ///
    /// Bounds the copy-on-write fan-out of each mutation independently of how
    /// many files the store holds. At most 8 (one per identifier byte).
    pub shard_levels: usize,

    /// Symbolic links one resolution may follow before giving up.
    pub max_symlink_hops: usize,

    /// Permission bits for files made by `create`/`open(create)`.
    pub file_mode: u32,

    /// Permission bits for directories made by `make_dir`.
    pub dir_mode: u32,

    /// Owner given to new files and directories.
    pub uid: u32,

    /// Group given to new files and directories.
    pub gid: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            shard_levels: 2,
            max_symlink_hops: 40,
            file_mode: 0o666,
            dir_mode: 0o755,
            uid: 0,
            gid: 0,
        }
    }
}

impl StoreConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the identity index depth.
    pub fn with_shard_levels(mut self, levels: usize) -> Self {
        self.shard_levels = levels;
        self
    }

    /// Set the symlink hop bound.
    pub fn with_max_symlink_hops(mut self, hops: usize) -> Self {
        self.max_symlink_hops = hops;
        self
    }

    /// Set the permission bits for new files.
    pub fn with_file_mode(mut self, mode: u32) -> Self {
        self.file_mode = mode;
        self
    }

    /// Set the permission bits for new directories.
    pub fn with_dir_mode(mut self, mode: u32) -> Self {
        self.dir_mode = mode;
        self
    }

    /// Set the owner of new files and directories.
    pub fn with_owner(mut self, uid: u32, gid: u32) -> Self {
        self.uid = uid;
        self.gid = gid;
        self
    }

    /// Parse a RON document. Missing fields take their defaults.
    pub fn from_ron(source: &str) -> FsResult<Self> {
        let config: Self =
            ron::from_str(source).map_err(|e| FsError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check the values are usable.
    pub fn validate(&self) -> FsResult<()> {
        if self.shard_levels > FILE_ID_BYTES {
            return Err(FsError::InvalidConfig(format!(
                "shard_levels {} exceeds identifier width {}",
                self.shard_levels, FILE_ID_BYTES
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = StoreConfig::default();
        assert_eq!(config.shard_levels, 2);
        assert_eq!(config.max_symlink_hops, 40);
        assert_eq!(config.file_mode, 0o666);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = StoreConfig::new()
            .with_shard_levels(3)
            .with_max_symlink_hops(8)
            .with_owner(1000, 100);
        assert_eq!(config.shard_levels, 3);
        assert_eq!(config.max_symlink_hops, 8);
        assert_eq!((config.uid, config.gid), (1000, 100));
    }

    #[test]
    fn test_from_ron_partial() {
        let config = StoreConfig::from_ron("(shard_levels: 3, file_mode: 420)").unwrap();
        assert_eq!(config.shard_levels, 3);
        assert_eq!(config.file_mode, 0o644);
        assert_eq!(config.dir_mode, 0o755);
    }

    #[test]
    fn test_from_ron_rejects_deep_index() {
        let err = StoreConfig::from_ron("(shard_levels: 9)").unwrap_err();
        assert!(matches!(err, FsError::InvalidConfig(_)));
    }

    #[test]
    fn test_from_ron_rejects_garbage() {
        let err = StoreConfig::from_ron("(shard_levels: \"many\")").unwrap_err();
        assert!(matches!(err, FsError::InvalidConfig(_)));
    }
}
