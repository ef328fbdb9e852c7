//! End-to-end tests of the store through its public API.

mod common;

use std::io::{Read, SeekFrom, Write};
use std::thread;
use std::time::{Duration, SystemTime};

use cowfs::{FileType, FsError, MemFs, StoreConfig};

use common::{names, populated};

#[test]
fn test_nested_create_and_list() {
    let fs = populated();
    assert_eq!(names(&fs, "/"), ["bin", "docs"]);
    assert_eq!(names(&fs, "docs"), ["notes", "readme"]);

    let info = fs.stat("docs/readme").unwrap();
    assert_eq!(info.size(), 5);
    assert_eq!(info.file_type(), FileType::File);
    assert_eq!(info.ext().nlink, 1);
    assert!(fs.stat("docs/notes").unwrap().is_dir());
    assert_eq!(fs.stat("docs/notes").unwrap().size(), 0);
}

#[test]
fn test_make_dir_conflicts() {
    let fs = populated();
    assert!(matches!(fs.make_dir("docs"), Err(FsError::AlreadyExists(_))));
    assert!(matches!(fs.make_dir("/"), Err(FsError::AlreadyExists(_))));
    assert!(matches!(fs.make_dir("missing/dir"), Err(FsError::NotFound(_))));

    fs.make_dir_all("docs/notes/2024").unwrap();
    fs.make_dir_all("docs/notes/2024").unwrap();
    assert_eq!(names(&fs, "docs/notes"), ["2024"]);

    let err = fs.make_dir_all("docs/readme/sub").unwrap_err();
    assert!(matches!(err, FsError::TypeMismatch(_)));
}

#[test]
fn test_invalid_paths() {
    let fs = populated();
    for bad in ["docs/../bin", "./docs/x", "docs//readme"] {
        assert!(matches!(fs.write_file(bad, b"x"), Err(FsError::InvalidPath(_))), "{bad}");
    }
    assert!(matches!(fs.read_file("docs/readme/x"), Err(FsError::TypeMismatch(_))));
    assert!(matches!(fs.read_dir("docs/readme"), Err(FsError::TypeMismatch(_))));
    assert!(matches!(fs.create("docs"), Err(FsError::TypeMismatch(_))));
}

#[test]
fn test_remove_rules() {
    let fs = populated();
    assert_eq!(fs.snapshot().file_count(), 5);

    let err = fs.remove("docs", false).unwrap_err();
    assert!(matches!(err, FsError::DirNotEmpty(_)));
    assert!(matches!(fs.remove("/", true), Err(FsError::CannotRemove(_))));
    assert!(matches!(fs.remove("nope", false), Err(FsError::NotFound(_))));

    fs.remove("bin", false).unwrap();
    fs.remove("docs", true).unwrap();
    assert!(fs.read_dir("/").unwrap().is_empty());
    assert_eq!(fs.snapshot().file_count(), 1);
}

#[test]
fn test_failed_batch_leaves_store_untouched() {
    let fs = populated();
    let version = fs.version();
    let err = fs
        .batch(|b| {
            b.write_file("docs/readme", b"clobbered")?;
            b.remove("bin", false)?;
            b.remove("bin", false)
        })
        .unwrap_err();
    assert!(matches!(err, FsError::NotFound(_)));
    assert_eq!(fs.version(), version);
    assert_eq!(fs.read_file("docs/readme").unwrap(), b"hello");
    assert!(fs.stat("bin").is_ok());
}

#[test]
fn test_batch_sees_own_changes() {
    let fs = MemFs::new();
    let listing = fs
        .batch(|b| {
            b.make_dir("a")?;
            b.write_file("a/f", b"1")?;
            b.rename("a/f", "a/g")?;
            b.view().read_dir("a")
        })
        .unwrap();
    assert_eq!(listing.len(), 1);
    assert_eq!(listing[0].name(), "g");
    assert_eq!(fs.version(), 1);
}

#[test]
fn test_detached_file_stays_readable() {
    let fs = populated();
    let mut h = fs.open("docs/readme", false).unwrap();
    fs.remove("docs/readme", false).unwrap();
    let removed_at = fs.version();

    assert!(matches!(fs.stat("docs/readme"), Err(FsError::NotFound(_))));
    assert_eq!(h.detached_since(), Some(removed_at));
    assert_eq!(h.stat().unwrap().ext().nlink, 0);

    let mut content = String::new();
    h.read_to_string(&mut content).unwrap();
    assert_eq!(content, "hello");

    h.write_at(b"J", 0).unwrap();
    let mut buf = [0u8; 5];
    h.read_at(&mut buf, 0).unwrap();
    assert_eq!(&buf, b"Jello");
    assert_eq!(h.detached_since(), Some(removed_at));
    assert!(!fs.snapshot().exists("docs/readme"));

    assert_eq!(fs.open_files(), 1);
    h.close().unwrap();
    assert_eq!(fs.open_files(), 0);
    assert_eq!(h.read(&mut buf).unwrap_err(), FsError::Closed);
}

#[test]
fn test_parent_removed_while_child_open() {
    let fs = populated();
    let h = fs.create("docs/notes/todo").unwrap();
    h.write(b"buy milk").unwrap();

    fs.remove("docs", true).unwrap();
    assert!(h.detached_since().is_some());
    assert_eq!(h.stat().unwrap().size(), 8);

    h.write_at(b"oat", 4).unwrap();
    let mut buf = vec![0u8; 8];
    h.read_at(&mut buf, 0).unwrap();
    assert_eq!(buf, b"buy oatk");
    // root and bin
    assert_eq!(fs.snapshot().file_count(), 2);
}

#[test]
fn test_open_directory_handle_after_removal() {
    let fs = populated();
    let dir = fs.open("docs", false).unwrap();
    fs.remove("docs", true).unwrap();
    // Children went with the directory.
    assert!(dir.read_dir(0).unwrap().is_empty());
}

#[test]
fn test_handles_share_one_file() {
    let fs = MemFs::new();
    let writer = fs.open("log", true).unwrap();
    let reader = fs.open("log", false).unwrap();
    assert_eq!(writer.id(), reader.id());
    assert_eq!(fs.open_files(), 1);

    writer.write(b"line 1\n").unwrap();
    writer.write(b"line 2\n").unwrap();
    let mut buf = [0u8; 7];
    assert_eq!(reader.read(&mut buf).unwrap(), 7);
    assert_eq!(&buf, b"line 1\n");
    assert_eq!(reader.offset(), 7);

    drop(writer);
    assert_eq!(fs.open_files(), 1);
    drop(reader);
    assert_eq!(fs.open_files(), 0);
}

#[test]
fn test_handle_seek_and_sparse_write() {
    let fs = MemFs::new();
    let mut h = fs.create("sparse").unwrap();
    h.seek(SeekFrom::Start(4)).unwrap();
    h.write_all(b"z").unwrap();
    h.flush().unwrap();
    assert_eq!(fs.read_file("sparse").unwrap(), b"\0\0\0\0z");

    assert_eq!(h.seek(SeekFrom::End(-1)).unwrap(), 4);
    assert!(matches!(h.seek(SeekFrom::Current(-10)), Err(FsError::BadArgument(_))));

    let mut rest = Vec::new();
    h.read_to_end(&mut rest).unwrap();
    assert_eq!(rest, b"z");
}

#[test]
fn test_create_truncates_existing() {
    let fs = populated();
    let h = fs.create("docs/readme").unwrap();
    assert_eq!(h.stat().unwrap().size(), 0);
    assert_eq!(fs.read_file("docs/readme").unwrap(), b"");
}

#[test]
fn test_truncate() {
    let fs = populated();
    fs.truncate("docs/readme", 2).unwrap();
    assert_eq!(fs.read_file("docs/readme").unwrap(), b"he");
    fs.truncate("docs/readme", 4).unwrap();
    assert_eq!(fs.read_file("docs/readme").unwrap(), b"he\0\0");
    assert!(matches!(fs.truncate("docs", 0), Err(FsError::TypeMismatch(_))));
}

#[test]
fn test_hardlink_survives_removal() {
    let fs = populated();
    fs.link("docs/readme", "bin/hello").unwrap();
    assert_eq!(fs.stat("docs/readme").unwrap().ext().nlink, 2);
    assert_eq!(
        fs.stat("docs/readme").unwrap().ext().id,
        fs.stat("bin/hello").unwrap().ext().id
    );

    fs.remove("docs", true).unwrap();
    assert_eq!(fs.read_file("bin/hello").unwrap(), b"hello");
    assert_eq!(fs.stat("bin/hello").unwrap().ext().nlink, 1);

    assert!(matches!(fs.link("bin", "bin2"), Err(FsError::CannotLink(_))));
    assert!(matches!(fs.link("bin/hello", "bin/hello"), Err(FsError::AlreadyExists(_))));
}

#[test]
fn test_symlinks() {
    let fs = populated();
    fs.symlink("docs", "d").unwrap();
    assert_eq!(fs.read_file("d/readme").unwrap(), b"hello");
    assert_eq!(fs.read_link("d").unwrap(), "docs");
    assert!(fs.stat("d").unwrap().is_dir());
    assert!(fs.link_stat("d").unwrap().mode().is_symlink());
    assert_eq!(names(&fs, "d"), ["notes", "readme"]);

    fs.write_file("d/new", b"via link").unwrap();
    assert_eq!(fs.read_file("docs/new").unwrap(), b"via link");

    fs.symlink("nowhere", "dangling").unwrap();
    assert!(matches!(fs.stat("dangling"), Err(FsError::NotFound(_))));
    assert!(fs.link_stat("dangling").is_ok());
    assert!(matches!(fs.write_file("dangling", b"x"), Err(FsError::TypeMismatch(_))));

    assert!(matches!(fs.read_link("docs/readme"), Err(FsError::NotSymlink(_))));
    assert!(matches!(fs.symlink("", "empty"), Err(FsError::InvalidPath(_))));
    assert!(matches!(fs.symlink("docs", "d"), Err(FsError::AlreadyExists(_))));
}

#[test]
fn test_symlink_loops_are_bounded() {
    let fs = MemFs::new();
    fs.symlink("loop", "loop").unwrap();
    fs.symlink("pong", "ping").unwrap();
    fs.symlink("ping", "pong").unwrap();
    assert!(matches!(fs.stat("loop"), Err(FsError::TooManyLinks(_))));
    assert!(matches!(fs.read_file("ping/x"), Err(FsError::TooManyLinks(_))));
    assert!(fs.link_stat("loop").is_ok());
}

#[test]
fn test_symlink_hop_limit_from_config() {
    let fs = MemFs::with_config(StoreConfig::new().with_max_symlink_hops(1)).unwrap();
    fs.make_dir("target").unwrap();
    fs.symlink("target", "one").unwrap();
    fs.symlink("one", "two").unwrap();
    assert!(fs.stat("one").unwrap().is_dir());
    assert!(matches!(fs.stat("two"), Err(FsError::TooManyLinks(_))));
}

#[test]
fn test_symlink_metadata_without_follow() {
    let fs = populated();
    fs.symlink("docs/readme", "r").unwrap();
    fs.change_mode("r", 0o600, true).unwrap();
    assert_eq!(fs.stat("docs/readme").unwrap().mode().perm(), 0o600);
    assert_eq!(fs.link_stat("r").unwrap().mode().perm(), 0o777);

    fs.change_owner("r", Some(42), None, false).unwrap();
    assert_eq!(fs.link_stat("r").unwrap().ext().uid, 42);
    assert_eq!(fs.stat("docs/readme").unwrap().ext().uid, 0);
}

#[test]
fn test_rename() {
    let fs = populated();
    fs.write_file("bin/old", b"old").unwrap();
    let before = fs.snapshot().file_count();

    fs.rename("docs/readme", "bin/old").unwrap();
    assert_eq!(fs.read_file("bin/old").unwrap(), b"hello");
    assert!(!fs.snapshot().exists("docs/readme"));
    assert_eq!(fs.snapshot().file_count(), before - 1);

    fs.rename("docs/notes", "bin/notes").unwrap();
    assert_eq!(names(&fs, "bin"), ["notes", "old"]);
    assert!(fs.read_dir("docs").unwrap().is_empty());

    fs.write_file("docs/f", b"").unwrap();
    assert!(matches!(fs.rename("bin", "docs"), Err(FsError::DirNotEmpty(_))));
    assert!(matches!(fs.rename("bin", "bin/notes/x"), Err(FsError::InvalidPath(_))));
    assert!(matches!(fs.rename("/", "x"), Err(FsError::CannotRemove(_))));
    assert!(matches!(fs.rename("missing", "x"), Err(FsError::NotFound(_))));
}

#[test]
fn test_rename_onto_own_hardlink_is_noop() {
    let fs = populated();
    fs.link("docs/readme", "docs/alias").unwrap();
    fs.rename("docs/readme", "docs/alias").unwrap();
    assert!(fs.stat("docs/readme").is_ok());
    assert_eq!(fs.stat("docs/alias").unwrap().ext().nlink, 2);
}

#[test]
fn test_handle_survives_rename() {
    let fs = populated();
    let h = fs.open("docs/readme", false).unwrap();
    fs.rename("docs/readme", "bin/readme").unwrap();
    h.write_at(b"J", 0).unwrap();
    assert_eq!(fs.read_file("bin/readme").unwrap(), b"Jello");
    assert!(h.detached_since().is_none());
}

#[test]
fn test_mod_times() {
    let fs = MemFs::new();
    fs.write_file("f", b"1").unwrap();
    let first = fs.stat("f").unwrap().mod_time();
    fs.write_file("f", b"2").unwrap();
    let second = fs.stat("f").unwrap().mod_time();
    assert!(second > first);

    let root_before = fs.stat("/").unwrap().mod_time();
    fs.write_file("g", b"").unwrap();
    assert!(fs.stat("/").unwrap().mod_time() > root_before);

    let when = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000);
    fs.change_times("f", when, when, true).unwrap();
    let info = fs.stat("f").unwrap();
    assert_eq!(info.mod_time(), when);
    assert_eq!(info.ext().atime, when);
    assert!(info.ext().ctime > when);
}

#[test]
fn test_many_entries_stay_ordered() {
    let config = StoreConfig::from_ron("(shard_levels: 1)").unwrap();
    let fs = MemFs::with_config(config).unwrap();
    let mut expected: Vec<String> = (0..300).map(|i| format!("f{:03}", (i * 7) % 300)).collect();
    fs.batch(|b| {
        for name in &expected {
            b.write_file(name, name.as_bytes())?;
        }
        Ok(())
    })
    .unwrap();
    expected.sort();
    assert_eq!(names(&fs, "/"), expected);
    assert_eq!(fs.read_file("f123").unwrap(), b"f123");
    assert_eq!(fs.snapshot().file_count(), 301);
    assert!(fs.dump().contains("index:"));
}

#[test]
fn test_concurrent_writers() {
    let fs = populated();
    thread::scope(|s| {
        for t in 0..8 {
            let fs = fs.clone();
            s.spawn(move || {
                let h = fs.create(&format!("bin/t{t}")).unwrap();
                for i in 0..50 {
                    h.write(format!("{i:02}").as_bytes()).unwrap();
                }
            });
        }
    });
    for t in 0..8 {
        let data = fs.read_file(&format!("bin/t{t}")).unwrap();
        assert_eq!(data.len(), 100);
        assert!(data.starts_with(b"0001"));
    }
    assert_eq!(fs.open_files(), 0);
}

#[test]
fn test_readers_see_committed_versions_only() {
    let fs = MemFs::new();
    fs.make_dir("pair").unwrap();
    fs.batch(|b| {
        b.write_file("pair/a", b"0")?;
        b.write_file("pair/b", b"0")
    })
    .unwrap();

    thread::scope(|s| {
        let writer = fs.clone();
        s.spawn(move || {
            for i in 1..100u32 {
                let v = i.to_string();
                writer
                    .batch(|b| {
                        b.write_file("pair/a", v.as_bytes())?;
                        b.write_file("pair/b", v.as_bytes())
                    })
                    .unwrap();
            }
        });
        for _ in 0..100 {
            let snap = fs.snapshot();
            assert_eq!(snap.read_file("pair/a").unwrap(), snap.read_file("pair/b").unwrap());
        }
    });
}
