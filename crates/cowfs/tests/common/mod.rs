//! Shared helpers for cowfs integration tests.

#![allow(dead_code)]

use cowfs::MemFs;
use tracing_subscriber::EnvFilter;

/// Route store logs to the test harness. Set `RUST_LOG=cowfs=debug` to see them.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A store with a small tree:
///
/// ```text
/// docs/readme   "hello"
/// docs/notes/
/// bin/
/// ```
pub fn populated() -> MemFs {
    init_tracing();
    let fs = MemFs::new();
    fs.batch(|b| {
        b.make_dir_all("docs/notes")?;
        b.make_dir("bin")?;
        b.write_file("docs/readme", b"hello")
    })
    .unwrap();
    fs
}

/// Names returned by a directory listing, in order.
pub fn names(fs: &MemFs, path: &str) -> Vec<String> {
    fs.read_dir(path).unwrap().into_iter().map(|i| i.name).collect()
}
