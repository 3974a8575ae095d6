//! Ordered recursive comparison of two trees.
//!
//! Relies on the sorted-children invariant both trees carry: each
//! directory's child directories and files are compared via a linear
//! merge by name, so the whole walk is a single pass with no lookups.

use std::cmp::Ordering;
use std::fmt;

use crate::attributes::Attributes;
use crate::tree::Directory;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffEntry {
    DirAdded(String),
    DirRemoved(String),
    FileAdded(String),
    FileRemoved(String),
    KindChanged(String),
    AttributesChanged(String, Vec<&'static str>),
}

impl fmt::Display for DiffEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiffEntry::DirAdded(path) => write!(f, "+ dir {path}"),
            DiffEntry::DirRemoved(path) => write!(f, "- dir {path}"),
            DiffEntry::FileAdded(path) => write!(f, "+ file {path}"),
            DiffEntry::FileRemoved(path) => write!(f, "- file {path}"),
            DiffEntry::KindChanged(path) => write!(f, "[kind] {path}"),
            DiffEntry::AttributesChanged(path, fields) => {
                write!(f, "[{}] {path}", fields.join(","))
            }
        }
    }
}

/// Compare two trees, returning a stable, line-oriented list of differences.
pub fn diff(old: &Directory, new: &Directory) -> Vec<DiffEntry> {
    let mut out = Vec::new();
    diff_attrs(&old.attrs, &new.attrs, "", &mut out);
    diff_dirs(old, new, "", &mut out);
    out
}

fn join_path(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}/{name}")
    }
}

fn diff_dirs(old: &Directory, new: &Directory, prefix: &str, out: &mut Vec<DiffEntry>) {
    let mut oi = old.dirs.iter().peekable();
    let mut ni = new.dirs.iter().peekable();
    loop {
        match (oi.peek(), ni.peek()) {
            (None, None) => break,
            (Some(o), None) => {
                out.push(DiffEntry::DirRemoved(join_path(prefix, &o.name)));
                oi.next();
            }
            (None, Some(n)) => {
                out.push(DiffEntry::DirAdded(join_path(prefix, &n.name)));
                ni.next();
            }
            (Some(o), Some(n)) => match o.name.cmp(&n.name) {
                Ordering::Less => {
                    out.push(DiffEntry::DirRemoved(join_path(prefix, &o.name)));
                    oi.next();
                }
                Ordering::Greater => {
                    out.push(DiffEntry::DirAdded(join_path(prefix, &n.name)));
                    ni.next();
                }
                Ordering::Equal => {
                    let path = join_path(prefix, &o.name);
                    diff_attrs(&o.attrs, &n.attrs, &path, out);
                    diff_dirs(o, n, &path, out);
                    oi.next();
                    ni.next();
                }
            },
        }
    }

    let mut oi = old.files.iter().peekable();
    let mut ni = new.files.iter().peekable();
    loop {
        match (oi.peek(), ni.peek()) {
            (None, None) => break,
            (Some(o), None) => {
                out.push(DiffEntry::FileRemoved(join_path(prefix, &o.name)));
                oi.next();
            }
            (None, Some(n)) => {
                out.push(DiffEntry::FileAdded(join_path(prefix, &n.name)));
                ni.next();
            }
            (Some(o), Some(n)) => match o.name.cmp(&n.name) {
                Ordering::Less => {
                    out.push(DiffEntry::FileRemoved(join_path(prefix, &o.name)));
                    oi.next();
                }
                Ordering::Greater => {
                    out.push(DiffEntry::FileAdded(join_path(prefix, &n.name)));
                    ni.next();
                }
                Ordering::Equal => {
                    let path = join_path(prefix, &o.name);
                    diff_attrs(&o.attrs, &n.attrs, &path, out);
                    oi.next();
                    ni.next();
                }
            },
        }
    }
}

/// Compare two attribute records, excluding `ctime` and `ino` (which are
/// fingerprints, not content).
fn diff_attrs(old: &Attributes, new: &Attributes, path: &str, out: &mut Vec<DiffEntry>) {
    if old.kind() != new.kind() {
        out.push(DiffEntry::KindChanged(path.to_string()));
        return;
    }

    let mut fields: Vec<&'static str> = Vec::new();
    match (old, new) {
        (
            Attributes::Dir { uid: u1, gid: g1, perm: p1 },
            Attributes::Dir { uid: u2, gid: g2, perm: p2 },
        )
        | (
            Attributes::Fifo { uid: u1, gid: g1, perm: p1 },
            Attributes::Fifo { uid: u2, gid: g2, perm: p2 },
        )
        | (
            Attributes::Socket { uid: u1, gid: g1, perm: p1 },
            Attributes::Socket { uid: u2, gid: g2, perm: p2 },
        ) => {
            if u1 != u2 {
                fields.push("uid");
            }
            if g1 != g2 {
                fields.push("gid");
            }
            if p1 != p2 {
                fields.push("perm");
            }
        }
        (
            Attributes::File {
                uid: u1,
                gid: g1,
                perm: p1,
                mtime: m1,
                size: s1,
                sha1: h1,
                ..
            },
            Attributes::File {
                uid: u2,
                gid: g2,
                perm: p2,
                mtime: m2,
                size: s2,
                sha1: h2,
                ..
            },
        ) => {
            if u1 != u2 {
                fields.push("uid");
            }
            if g1 != g2 {
                fields.push("gid");
            }
            if p1 != p2 {
                fields.push("perm");
            }
            if m1 != m2 {
                fields.push("mtime");
            }
            if s1 != s2 {
                fields.push("size");
            }
            if h1 != h2 {
                fields.push("sha1");
            }
        }
        (Attributes::Link { targ: t1 }, Attributes::Link { targ: t2 }) => {
            if t1 != t2 {
                fields.push("targ");
            }
        }
        (
            Attributes::Char { uid: u1, gid: g1, perm: p1, rdev: r1 },
            Attributes::Char { uid: u2, gid: g2, perm: p2, rdev: r2 },
        )
        | (
            Attributes::Block { uid: u1, gid: g1, perm: p1, rdev: r1 },
            Attributes::Block { uid: u2, gid: g2, perm: p2, rdev: r2 },
        ) => {
            if u1 != u2 {
                fields.push("uid");
            }
            if g1 != g2 {
                fields.push("gid");
            }
            if p1 != p2 {
                fields.push("perm");
            }
            if r1 != r2 {
                fields.push("rdev");
            }
        }
        _ => unreachable!("kind equality already checked above"),
    }

    if !fields.is_empty() {
        fields.sort_unstable();
        out.push(DiffEntry::AttributesChanged(path.to_string(), fields));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::FileEntry;

    fn dir_attrs() -> Attributes {
        Attributes::Dir { uid: 0, gid: 0, perm: 0o755 }
    }

    fn file_attrs(size: i64, sha1: Option<[u8; 20]>) -> Attributes {
        Attributes::File {
            uid: 0,
            gid: 0,
            perm: 0o644,
            mtime: 1,
            ctime: 1,
            ino: 1,
            size,
            sha1,
        }
    }

    #[test]
    fn identical_trees_diff_empty() {
        let mut t = Directory::root(dir_attrs());
        t.files.push(FileEntry { name: "a".into(), attrs: file_attrs(1, None) });
        assert!(diff(&t, &t).is_empty());
    }

    #[test]
    fn detects_added_and_removed_files() {
        let mut old = Directory::root(dir_attrs());
        old.files.push(FileEntry { name: "gone.txt".into(), attrs: file_attrs(1, None) });
        let mut new = Directory::root(dir_attrs());
        new.files.push(FileEntry { name: "new.txt".into(), attrs: file_attrs(1, None) });

        let d = diff(&old, &new);
        assert_eq!(
            d,
            vec![
                DiffEntry::FileRemoved("gone.txt".into()),
                DiffEntry::FileAdded("new.txt".into()),
            ]
        );
    }

    #[test]
    fn detects_size_change() {
        let mut old = Directory::root(dir_attrs());
        old.files.push(FileEntry { name: "a".into(), attrs: file_attrs(1, None) });
        let mut new = Directory::root(dir_attrs());
        new.files.push(FileEntry { name: "a".into(), attrs: file_attrs(2, None) });

        let d = diff(&old, &new);
        assert_eq!(d, vec![DiffEntry::AttributesChanged("a".into(), vec!["size"])]);
    }

    #[test]
    fn ctime_and_ino_are_excluded() {
        let mut old = Directory::root(dir_attrs());
        old.files.push(FileEntry {
            name: "a".into(),
            attrs: Attributes::File {
                uid: 0, gid: 0, perm: 0o644, mtime: 1, ctime: 1, ino: 1, size: 1, sha1: None,
            },
        });
        let mut new = Directory::root(dir_attrs());
        new.files.push(FileEntry {
            name: "a".into(),
            attrs: Attributes::File {
                uid: 0, gid: 0, perm: 0o644, mtime: 1, ctime: 999, ino: 999, size: 1, sha1: None,
            },
        });
        assert!(diff(&old, &new).is_empty());
    }

    #[test]
    fn kind_change_reported_once() {
        let mut old = Directory::root(dir_attrs());
        old.files.push(FileEntry { name: "a".into(), attrs: file_attrs(1, None) });
        let mut new = Directory::root(dir_attrs());
        new.files.push(FileEntry {
            name: "a".into(),
            attrs: Attributes::Link { targ: b"target".to_vec() },
        });
        assert_eq!(diff(&old, &new), vec![DiffEntry::KindChanged("a".into())]);
    }

    #[test]
    fn display_format() {
        assert_eq!(DiffEntry::DirAdded("x".into()).to_string(), "+ dir x");
        assert_eq!(
            DiffEntry::AttributesChanged("x".into(), vec!["size", "uid"]).to_string(),
            "[size,uid] x"
        );
    }
}
