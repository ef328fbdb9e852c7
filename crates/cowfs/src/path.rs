//! Path splitting.
//!
//! Paths are slash-separated and relative to the store root. A leading `/`
//! and a single trailing `/` are tolerated; `""`, `"."` and `"/"` name the
//! root. Components are never normalized: `.`, `..` and empty components
//! are rejected rather than resolved.

use crate::error::{FsError, FsResult};

/// Split a path into name components.
pub fn split(path: &str) -> FsResult<Vec<&str>> {
    let trimmed = path.trim_start_matches('/');
    let trimmed = trimmed.strip_suffix('/').unwrap_or(trimmed);
    if trimmed.is_empty() || trimmed == "." {
        return Ok(Vec::new());
    }
    let parts: Vec<&str> = trimmed.split('/').collect();
    if parts.iter().any(|p| !is_valid_name(p)) {
        return Err(FsError::invalid_path(path));
    }
    Ok(parts)
}

/// Whether `name` can be bound in a directory.
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\0'])
}

/// The last component of `path`, or `"."` for the root.
pub fn base_name(path: &str) -> FsResult<&str> {
    Ok(split(path)?.last().copied().unwrap_or("."))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_forms() {
        for root in ["", ".", "/", "//"] {
            assert!(split(root).unwrap().is_empty(), "{root:?}");
        }
    }

    #[test]
    fn test_components() {
        assert_eq!(split("foo/bar/baz").unwrap(), vec!["foo", "bar", "baz"]);
        assert_eq!(split("/foo/bar/").unwrap(), vec!["foo", "bar"]);
    }

    #[test]
    fn test_rejects_dot_components() {
        for bad in ["foo/../bar", "./foo", "foo//bar", "foo/.", "a/\0"] {
            assert!(matches!(split(bad), Err(FsError::InvalidPath(_))), "{bad:?}");
        }
    }

    #[test]
    fn test_base_name() {
        assert_eq!(base_name("a/b/c").unwrap(), "c");
        assert_eq!(base_name("/").unwrap(), ".");
    }
}
