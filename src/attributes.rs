//! Per-node attribute records and the escape codec used to serialize them.
//!
//! An [`Attributes`] value is a discriminated union keyed by file kind.
//! Encoding pairs keys and values, space-separated, wrapped in `[ ... ]`,
//! sorted by key so the output is canonical and diff-stable.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use anyhow::{bail, ensure, Context, Result};

use crate::progress::WarnOnce;

/// Kind tag written as the first byte of a tree-codec entry line
/// (`d`/`f`) combined with the `kind` attribute for non-directory,
/// non-regular-file entries.
pub const KIND_DIR: &str = "dir";
pub const KIND_FILE: &str = "file";
pub const KIND_LINK: &str = "lnk";
pub const KIND_FIFO: &str = "fifo";
pub const KIND_SOCK: &str = "sock";
pub const KIND_CHAR: &str = "chr";
pub const KIND_BLOCK: &str = "blk";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Attributes {
    Dir {
        uid: u32,
        gid: u32,
        perm: u32,
    },
    File {
        uid: u32,
        gid: u32,
        perm: u32,
        mtime: i64,
        ctime: i64,
        ino: u64,
        size: i64,
        sha1: Option<[u8; 20]>,
    },
    Link {
        targ: Vec<u8>,
    },
    Fifo {
        uid: u32,
        gid: u32,
        perm: u32,
    },
    Socket {
        uid: u32,
        gid: u32,
        perm: u32,
    },
    Char {
        uid: u32,
        gid: u32,
        perm: u32,
        rdev: u64,
    },
    Block {
        uid: u32,
        gid: u32,
        perm: u32,
        rdev: u64,
    },
}

impl Attributes {
    pub fn kind(&self) -> &'static str {
        match self {
            Attributes::Dir { .. } => KIND_DIR,
            Attributes::File { .. } => KIND_FILE,
            Attributes::Link { .. } => KIND_LINK,
            Attributes::Fifo { .. } => KIND_FIFO,
            Attributes::Socket { .. } => KIND_SOCK,
            Attributes::Char { .. } => KIND_CHAR,
            Attributes::Block { .. } => KIND_BLOCK,
        }
    }

    pub fn is_file(&self) -> bool {
        matches!(self, Attributes::File { .. })
    }

    pub fn sha1(&self) -> Option<&[u8; 20]> {
        match self {
            Attributes::File { sha1, .. } => sha1.as_ref(),
            _ => None,
        }
    }

    pub fn set_sha1(&mut self, digest: [u8; 20]) {
        if let Attributes::File { sha1, .. } = self {
            *sha1 = Some(digest);
        }
    }

    pub fn ino(&self) -> Option<u64> {
        match self {
            Attributes::File { ino, .. } => Some(*ino),
            _ => None,
        }
    }

    pub fn ctime(&self) -> Option<i64> {
        match self {
            Attributes::File { ctime, .. } => Some(*ctime),
            _ => None,
        }
    }

    pub fn size(&self) -> Option<i64> {
        match self {
            Attributes::File { size, .. } => Some(*size),
            _ => None,
        }
    }

    /// The key/value pairs carried by this attribute record, excluding
    /// `kind`, in no particular order (callers sort for canonicalization).
    fn pairs(&self) -> Vec<(&'static str, String)> {
        match self {
            Attributes::Dir { uid, gid, perm } => vec![
                ("uid", uid.to_string()),
                ("gid", gid.to_string()),
                ("perm", perm.to_string()),
            ],
            Attributes::File {
                uid,
                gid,
                perm,
                mtime,
                ctime,
                ino,
                size,
                sha1,
            } => {
                let mut v = vec![
                    ("uid", uid.to_string()),
                    ("gid", gid.to_string()),
                    ("perm", perm.to_string()),
                    ("mtime", mtime.to_string()),
                    ("ctime", ctime.to_string()),
                    ("ino", ino.to_string()),
                    ("size", size.to_string()),
                ];
                if let Some(digest) = sha1 {
                    v.push(("sha1", data_encoding::HEXLOWER.encode(digest)));
                }
                v
            }
            Attributes::Link { targ } => vec![("targ", escape(targ))],
            Attributes::Fifo { uid, gid, perm } | Attributes::Socket { uid, gid, perm } => vec![
                ("uid", uid.to_string()),
                ("gid", gid.to_string()),
                ("perm", perm.to_string()),
            ],
            Attributes::Char { uid, gid, perm, rdev } | Attributes::Block { uid, gid, perm, rdev } => {
                vec![
                    ("uid", uid.to_string()),
                    ("gid", gid.to_string()),
                    ("perm", perm.to_string()),
                    ("rdev", rdev.to_string()),
                ]
            }
        }
    }

    /// Render `kind <sorted pairs>` as the bracketed attribute block,
    /// e.g. `[gid 0 kind file mtime 123 perm 420 size 10 uid 0 ]`.
    pub fn encode(&self) -> String {
        let mut pairs = self.pairs();
        pairs.push(("kind", self.kind().to_string()));
        pairs.sort_by(|a, b| a.0.cmp(b.0));

        let mut out = String::from("[");
        for (key, val) in pairs {
            write!(out, "{key} {} ", escape(val.as_bytes())).unwrap();
        }
        out.push(']');
        out
    }

    /// Parse the inside of a `[...]` attribute block (without the brackets).
    /// Keys the format doesn't recognize for `kind` are not persisted back
    /// into the returned value; each distinct `(key, kind)` pair is
    /// reported through `warnings` once.
    pub fn decode(body: &str, warnings: &WarnOnce) -> Result<Attributes> {
        let mut map = BTreeMap::new();
        for tok in body.split_whitespace().collect::<Vec<_>>().chunks(2) {
            let [key, val] = tok else {
                bail!("BadAttributes: odd number of attribute tokens");
            };
            let val = unescape(val).context("BadEscape in attribute value")?;
            let val = String::from_utf8(val).context("BadField: non-utf8 attribute value")?;
            map.insert(key.to_string(), val);
        }

        let kind = map.remove("kind").ok_or_else(|| anyhow::anyhow!("BadAttributes: missing kind"))?;
        let get = |m: &BTreeMap<String, String>, k: &str| -> Result<String> {
            m.get(k)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("BadField({k}): missing"))
        };
        let parse_u32 = |s: &str, f: &str| -> Result<u32> {
            s.parse().with_context(|| format!("BadField({f})"))
        };
        let parse_u64 = |s: &str, f: &str| -> Result<u64> {
            s.parse().with_context(|| format!("BadField({f})"))
        };
        let parse_i64 = |s: &str, f: &str| -> Result<i64> {
            s.parse().with_context(|| format!("BadField({f})"))
        };

        let known: &[&str] = match kind.as_str() {
            KIND_DIR | KIND_FIFO | KIND_SOCK => &["uid", "gid", "perm"],
            KIND_FILE => &["uid", "gid", "perm", "mtime", "ctime", "ino", "size", "sha1"],
            KIND_LINK => &["targ"],
            KIND_CHAR | KIND_BLOCK => &["uid", "gid", "perm", "rdev"],
            _ => &[],
        };

        let attrs = match kind.as_str() {
            KIND_DIR => Ok::<Attributes, anyhow::Error>(Attributes::Dir {
                uid: parse_u32(&get(&map, "uid")?, "uid")?,
                gid: parse_u32(&get(&map, "gid")?, "gid")?,
                perm: parse_u32(&get(&map, "perm")?, "perm")?,
            }),
            KIND_FILE => {
                let sha1 = match map.get("sha1") {
                    Some(hex) => {
                        let bytes = data_encoding::HEXLOWER
                            .decode(hex.as_bytes())
                            .context("BadField(sha1): not hex")?;
                        ensure!(bytes.len() == 20, "BadField(sha1): wrong length");
                        let mut digest = [0u8; 20];
                        digest.copy_from_slice(&bytes);
                        Some(digest)
                    }
                    None => None,
                };
                Ok(Attributes::File {
                    uid: parse_u32(&get(&map, "uid")?, "uid")?,
                    gid: parse_u32(&get(&map, "gid")?, "gid")?,
                    perm: parse_u32(&get(&map, "perm")?, "perm")?,
                    mtime: parse_i64(&get(&map, "mtime")?, "mtime")?,
                    ctime: parse_i64(&get(&map, "ctime")?, "ctime")?,
                    ino: parse_u64(&get(&map, "ino")?, "ino")?,
                    size: parse_i64(&get(&map, "size")?, "size")?,
                    sha1,
                })
            }
            KIND_LINK => Ok(Attributes::Link {
                targ: get(&map, "targ")?.into_bytes(),
            }),
            KIND_FIFO => Ok(Attributes::Fifo {
                uid: parse_u32(&get(&map, "uid")?, "uid")?,
                gid: parse_u32(&get(&map, "gid")?, "gid")?,
                perm: parse_u32(&get(&map, "perm")?, "perm")?,
            }),
            KIND_SOCK => Ok(Attributes::Socket {
                uid: parse_u32(&get(&map, "uid")?, "uid")?,
                gid: parse_u32(&get(&map, "gid")?, "gid")?,
                perm: parse_u32(&get(&map, "perm")?, "perm")?,
            }),
            KIND_CHAR => Ok(Attributes::Char {
                uid: parse_u32(&get(&map, "uid")?, "uid")?,
                gid: parse_u32(&get(&map, "gid")?, "gid")?,
                perm: parse_u32(&get(&map, "perm")?, "perm")?,
                rdev: parse_u64(&get(&map, "rdev")?, "rdev")?,
            }),
            KIND_BLOCK => Ok(Attributes::Block {
                uid: parse_u32(&get(&map, "uid")?, "uid")?,
                gid: parse_u32(&get(&map, "gid")?, "gid")?,
                perm: parse_u32(&get(&map, "perm")?, "perm")?,
                rdev: parse_u64(&get(&map, "rdev")?, "rdev")?,
            }),
            other => bail!("BadAttributes: unknown kind {other:?}"),
        }?;

        for key in map.keys() {
            if !known.contains(&key.as_str()) {
                warnings.warn(format!("unknown attribute key {key:?} for kind {kind:?}"));
            }
        }

        Ok(attrs)
    }
}

/// Escape bytes outside `!`..`~` and the reserved bytes `=`, `[`, `]` as `=HH`.
pub fn escape(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    for &b in bytes {
        if (b'!'..=b'~').contains(&b) && b != b'=' && b != b'[' && b != b']' {
            out.push(b as char);
        } else {
            write!(out, "={b:02x}").unwrap();
        }
    }
    out
}

/// Reverse of [`escape`].
pub fn unescape(s: &str) -> Result<Vec<u8>> {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'=' {
            ensure!(i + 2 < bytes.len(), "truncated escape sequence");
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).context("invalid escape")?;
            let byte = u8::from_str_radix(hex, 16).context("invalid escape hex")?;
            out.push(byte);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_round_trips_reserved_bytes() {
        let raw = b"hello [world]=stuff \x01\n";
        let escaped = escape(raw);
        assert!(!escaped.contains('['));
        assert!(!escaped.contains(']'));
        assert_eq!(unescape(&escaped).unwrap(), raw);
    }

    #[test]
    fn dir_attrs_round_trip() {
        let attrs = Attributes::Dir {
            uid: 1000,
            gid: 1000,
            perm: 0o755,
        };
        let encoded = attrs.encode();
        let body = &encoded[1..encoded.len() - 1];
        let decoded = Attributes::decode(body, &WarnOnce::new()).unwrap();
        assert_eq!(attrs, decoded);
    }

    #[test]
    fn file_attrs_with_sha1_round_trip() {
        let attrs = Attributes::File {
            uid: 0,
            gid: 0,
            perm: 0o644,
            mtime: 1_700_000_000,
            ctime: 1_700_000_001,
            ino: 42,
            size: 1024,
            sha1: Some([0xabu8; 20]),
        };
        let encoded = attrs.encode();
        let body = &encoded[1..encoded.len() - 1];
        let decoded = Attributes::decode(body, &WarnOnce::new()).unwrap();
        assert_eq!(attrs, decoded);
    }

    #[test]
    fn encode_is_canonical_sorted_by_key() {
        let attrs = Attributes::Dir {
            uid: 1,
            gid: 2,
            perm: 3,
        };
        assert_eq!(attrs.encode(), "[gid 2 kind dir perm 3 uid 1 ]");
    }

    #[test]
    fn unknown_kind_fails() {
        assert!(Attributes::decode("kind bogus", &WarnOnce::new()).is_err());
    }

    #[test]
    fn unknown_key_is_dropped_and_warned_once() {
        let warnings = WarnOnce::new();
        let decoded = Attributes::decode("kind dir uid 0 gid 0 perm 493 color blue", &warnings).unwrap();
        assert_eq!(
            decoded,
            Attributes::Dir { uid: 0, gid: 0, perm: 493 }
        );
        assert_eq!(warnings.len(), 1);
        // Re-decoding the same unknown (key, kind) pair doesn't warn again.
        Attributes::decode("kind dir uid 0 gid 0 perm 493 color blue", &warnings).unwrap();
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn truncated_escape_fails() {
        assert!(unescape("ab=3").is_err());
    }
}
