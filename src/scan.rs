//! Walk a directory tree and build a [`Tree`] from what's there.
//!
//! Unix-only: attribute fields (`uid`/`gid`/`ino`/`rdev`/...) come straight
//! from `stat(2)`.

use std::fs;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{FileTypeExt, MetadataExt};

use anyhow::{Context, Result};
use camino::Utf8Path;
use regex::Regex;

use crate::attributes::Attributes;
use crate::progress::{ProgressMeter, WarnOnce};
use crate::tree::{Directory, FileEntry, Tree};

#[derive(Default)]
struct Counts {
    files: u64,
    bytes: u64,
}

/// Scan `root` into a freshly built [`Tree`], rooted under
/// [`crate::tree::ROOT_NAME`]. Unreadable entries below the root are
/// skipped with a warning; an unreadable root fails the scan outright.
/// Entries whose name matches any of `skip` are left out of the tree
/// entirely (not even a warning).
pub fn scan(root: &Utf8Path, skip: &[Regex], meter: &dyn ProgressMeter, warnings: &WarnOnce) -> Result<Tree> {
    let meta = fs::symlink_metadata(root).with_context(|| format!("Couldn't stat {root}"))?;
    let mut root_dir = Directory::root(dir_attrs(&meta));
    let mut counts = Counts::default();
    scan_into(root, &mut root_dir, skip, meter, warnings, &mut counts)?;
    root_dir.sort();
    Ok(root_dir)
}

fn scan_into(
    path: &Utf8Path,
    dir: &mut Directory,
    skip: &[Regex],
    meter: &dyn ProgressMeter,
    warnings: &WarnOnce,
    counts: &mut Counts,
) -> Result<()> {
    let entries = match fs::read_dir(path) {
        Ok(e) => e,
        Err(e) => {
            warnings.warn(format!("couldn't read directory {path}: {e}"));
            return Ok(());
        }
    };

    for entry in entries {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warnings.warn(format!("couldn't read an entry of {path}: {e}"));
                continue;
            }
        };

        let os_name = entry.file_name();
        let Some(name) = os_name.to_str() else {
            warnings.warn(format!("skipping non-UTF-8 name under {path}"));
            continue;
        };
        if skip.iter().any(|re| re.is_match(name)) {
            continue;
        }

        let child_path = path.join(name);

        let meta = match fs::symlink_metadata(&child_path) {
            Ok(m) => m,
            Err(e) => {
                warnings.warn(format!("couldn't stat {child_path}: {e}"));
                continue;
            }
        };

        if meta.file_type().is_dir() {
            let mut child = Directory::new(name, dir_attrs(&meta));
            scan_into(&child_path, &mut child, skip, meter, warnings, counts)?;
            dir.dirs.push(child);
        } else if let Some(attrs) = entry_attrs(&child_path, &meta, warnings) {
            if let Attributes::File { size, .. } = &attrs {
                counts.files += 1;
                counts.bytes += (*size).max(0) as u64;
                meter.observe(counts.files, counts.bytes);
            }
            dir.files.push(FileEntry {
                name: name.to_string(),
                attrs,
            });
        }
    }
    Ok(())
}

fn dir_attrs(meta: &fs::Metadata) -> Attributes {
    Attributes::Dir {
        uid: meta.uid(),
        gid: meta.gid(),
        perm: meta.mode() & 0o7777,
    }
}

fn entry_attrs(path: &Utf8Path, meta: &fs::Metadata, warnings: &WarnOnce) -> Option<Attributes> {
    let uid = meta.uid();
    let gid = meta.gid();
    let perm = meta.mode() & 0o7777;
    let ft = meta.file_type();

    if ft.is_symlink() {
        match fs::read_link(path) {
            Ok(target) => Some(Attributes::Link {
                targ: target.as_os_str().as_bytes().to_vec(),
            }),
            Err(e) => {
                warnings.warn(format!("couldn't readlink {path}: {e}"));
                None
            }
        }
    } else if ft.is_file() {
        Some(Attributes::File {
            uid,
            gid,
            perm,
            mtime: meta.mtime(),
            ctime: meta.ctime(),
            ino: meta.ino(),
            size: meta.size() as i64,
            sha1: None,
        })
    } else if ft.is_fifo() {
        Some(Attributes::Fifo { uid, gid, perm })
    } else if ft.is_socket() {
        Some(Attributes::Socket { uid, gid, perm })
    } else if ft.is_char_device() {
        Some(Attributes::Char {
            uid,
            gid,
            perm,
            rdev: meta.rdev(),
        })
    } else if ft.is_block_device() {
        Some(Attributes::Block {
            uid,
            gid,
            perm,
            rdev: meta.rdev(),
        })
    } else {
        warnings.warn(format!("skipping {path}: unrecognized file type"));
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NullMeter;
    use camino::Utf8PathBuf;

    #[test]
    fn scans_files_dirs_and_symlinks() {
        let tmp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).unwrap();
        std::fs::write(root.join("a.txt"), b"hello").unwrap();
        std::fs::create_dir(root.join("sub")).unwrap();
        std::fs::write(root.join("sub/b.txt"), b"world").unwrap();
        #[cfg(unix)]
        std::os::unix::fs::symlink("a.txt", root.join("link")).unwrap();

        let warnings = WarnOnce::new();
        let tree = scan(&root, &[], &NullMeter, &warnings).unwrap();

        assert_eq!(tree.files.len(), 2);
        assert_eq!(tree.dirs.len(), 1);
        assert_eq!(tree.dirs[0].name, "sub");
        assert!(tree.find_file("link").unwrap().attrs.kind() == "lnk");
    }

    #[test]
    fn children_are_sorted() {
        let tmp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).unwrap();
        for name in ["zeta.txt", "alpha.txt", "mid.txt"] {
            std::fs::write(root.join(name), b"x").unwrap();
        }
        let warnings = WarnOnce::new();
        let tree = scan(&root, &[], &NullMeter, &warnings).unwrap();
        let names: Vec<_> = tree.files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["alpha.txt", "mid.txt", "zeta.txt"]);
    }

    #[test]
    fn skip_patterns_exclude_matching_names() {
        let tmp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).unwrap();
        std::fs::write(root.join("keep.txt"), b"x").unwrap();
        std::fs::create_dir(root.join("target")).unwrap();
        std::fs::write(root.join("target/build.o"), b"x").unwrap();

        let skip = [Regex::new("^target$").unwrap()];
        let warnings = WarnOnce::new();
        let tree = scan(&root, &skip, &NullMeter, &warnings).unwrap();

        assert_eq!(tree.files.len(), 1);
        assert!(tree.dirs.is_empty());
    }
}
