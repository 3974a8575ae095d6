//! The snapshot tree model and its line-oriented text codec.
//!
//! A [`Tree`] is a preorder-serializable directory structure: `d`/`f`
//! entry lines, `-` ending a directory's children, `u` ending the
//! directory itself.

use std::fmt::Write as _;

use anyhow::{anyhow, bail, ensure, Result};

use crate::attributes::{escape, unescape, Attributes};
use crate::progress::WarnOnce;

pub const ROOT_NAME: &str = "__root__";
const MAGIC: &str = "asure-2.0";
const SEPARATOR: &str = "-----";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileEntry {
    pub name: String,
    pub attrs: Attributes,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Directory {
    pub name: String,
    pub attrs: Attributes,
    pub dirs: Vec<Directory>,
    pub files: Vec<FileEntry>,
}

/// A snapshot is just its root directory, named [`ROOT_NAME`].
pub type Tree = Directory;

impl Directory {
    pub fn new(name: impl Into<String>, attrs: Attributes) -> Self {
        Directory {
            name: name.into(),
            attrs,
            dirs: Vec::new(),
            files: Vec::new(),
        }
    }

    pub fn root(attrs: Attributes) -> Self {
        Directory::new(ROOT_NAME, attrs)
    }

    /// Sort this directory's children, and recursively all descendants,
    /// by name. The codec and the differ both rely on this invariant.
    pub fn sort(&mut self) {
        self.dirs.sort_by(|a, b| a.name.cmp(&b.name));
        self.files.sort_by(|a, b| a.name.cmp(&b.name));
        for d in &mut self.dirs {
            d.sort();
        }
    }

    pub fn find_dir(&self, name: &str) -> Option<&Directory> {
        self.dirs.iter().find(|d| d.name == name)
    }

    pub fn find_file(&self, name: &str) -> Option<&FileEntry> {
        self.files.iter().find(|f| f.name == name)
    }
}

/// Encode a tree to its canonical text form.
pub fn encode(tree: &Tree) -> String {
    let mut out = String::new();
    out.push_str(MAGIC);
    out.push('\n');
    out.push_str(SEPARATOR);
    out.push('\n');
    encode_dir(tree, &mut out);
    out
}

fn encode_dir(dir: &Directory, out: &mut String) {
    writeln!(out, "d{} {}", escape(dir.name.as_bytes()), dir.attrs.encode()).unwrap();
    for child in &dir.dirs {
        encode_dir(child, out);
    }
    out.push_str("-\n");
    for f in &dir.files {
        writeln!(out, "f{} {}", escape(f.name.as_bytes()), f.attrs.encode()).unwrap();
    }
    out.push_str("u\n");
}

/// Parse a whole tree from its canonical text form. Attributes bearing
/// keys this codec doesn't recognize are reported through `warnings`
/// rather than failing the parse.
pub fn decode(text: &str, warnings: &WarnOnce) -> Result<Tree> {
    let mut dec = TreeDecoder::new(warnings);
    for line in text.lines() {
        dec.push_line(line)?;
    }
    dec.finish()
}

#[derive(Debug)]
enum DecoderState {
    NeedMagic,
    NeedSeparator,
    Body,
    Done,
}

struct Frame {
    dir: Directory,
    reading_files: bool,
}

/// A push parser for the tree codec: feed it lines one at a time.
/// The weave delta builder uses this directly to parse a reconstructed
/// revision without buffering the whole text up front.
pub struct TreeDecoder<'a> {
    state: DecoderState,
    stack: Vec<Frame>,
    result: Option<Tree>,
    warnings: &'a WarnOnce,
}

impl<'a> TreeDecoder<'a> {
    pub fn new(warnings: &'a WarnOnce) -> Self {
        TreeDecoder {
            state: DecoderState::NeedMagic,
            stack: Vec::new(),
            result: None,
            warnings,
        }
    }

    pub fn push_line(&mut self, line: &str) -> Result<()> {
        match self.state {
            DecoderState::NeedMagic => {
                ensure!(line == MAGIC, "SyntaxError: bad magic {line:?}");
                self.state = DecoderState::NeedSeparator;
            }
            DecoderState::NeedSeparator => {
                ensure!(line == SEPARATOR, "SyntaxError: missing separator");
                self.state = DecoderState::Body;
            }
            DecoderState::Body => self.push_body_line(line)?,
            DecoderState::Done => bail!("SyntaxError: unexpected line after end of tree: {line:?}"),
        }
        Ok(())
    }

    fn push_body_line(&mut self, line: &str) -> Result<()> {
        if let Some(rest) = line.strip_prefix('d') {
            let (name, attrs) = parse_entry_line(rest, self.warnings)?;
            self.stack.push(Frame {
                dir: Directory::new(name, attrs),
                reading_files: false,
            });
        } else if line == "-" {
            let top = self
                .stack
                .last_mut()
                .ok_or_else(|| anyhow!("SyntaxError: '-' outside any directory"))?;
            ensure!(!top.reading_files, "SyntaxError: duplicate '-'");
            top.reading_files = true;
        } else if let Some(rest) = line.strip_prefix('f') {
            let top = self
                .stack
                .last_mut()
                .ok_or_else(|| anyhow!("SyntaxError: file entry outside any directory"))?;
            ensure!(top.reading_files, "SyntaxError: file entry before '-'");
            let (name, attrs) = parse_entry_line(rest, self.warnings)?;
            top.dir.files.push(FileEntry { name, attrs });
        } else if line == "u" {
            let frame = self
                .stack
                .pop()
                .ok_or_else(|| anyhow!("SyntaxError: 'u' without matching 'd'"))?;
            ensure!(frame.reading_files, "SyntaxError: 'u' before '-'");
            match self.stack.last_mut() {
                Some(parent) => parent.dir.dirs.push(frame.dir),
                None => {
                    self.result = Some(frame.dir);
                    self.state = DecoderState::Done;
                }
            }
        } else {
            bail!("SyntaxError: unrecognized line {line:?}");
        }
        Ok(())
    }

    pub fn finish(self) -> Result<Tree> {
        match self.state {
            DecoderState::Done => Ok(self.result.expect("Done implies result is set")),
            _ => bail!("SyntaxError: truncated tree (unexpected EOF)"),
        }
    }
}

fn parse_entry_line(rest: &str, warnings: &WarnOnce) -> Result<(String, Attributes)> {
    let bracket_pos = rest
        .find('[')
        .ok_or_else(|| anyhow!("SyntaxError: missing attribute block"))?;
    let name_part = rest[..bracket_pos].trim_end();
    let name = String::from_utf8(unescape(name_part)?)?;
    let atts_part = rest[bracket_pos..].trim();
    ensure!(
        atts_part.starts_with('[') && atts_part.ends_with(']'),
        "SyntaxError: malformed attribute block"
    );
    let attrs = Attributes::decode(&atts_part[1..atts_part.len() - 1], warnings)?;
    Ok((name, attrs))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file_attrs(size: i64) -> Attributes {
        Attributes::File {
            uid: 0,
            gid: 0,
            perm: 0o644,
            mtime: 1,
            ctime: 1,
            ino: 1,
            size,
            sha1: None,
        }
    }

    fn dir_attrs() -> Attributes {
        Attributes::Dir {
            uid: 0,
            gid: 0,
            perm: 0o755,
        }
    }

    fn sample_tree() -> Tree {
        let mut root = Directory::root(dir_attrs());
        let mut sub = Directory::new("sub", dir_attrs());
        sub.files.push(FileEntry {
            name: "leaf.txt".into(),
            attrs: file_attrs(5),
        });
        root.dirs.push(sub);
        root.files.push(FileEntry {
            name: "top.txt".into(),
            attrs: file_attrs(10),
        });
        root
    }

    #[test]
    fn round_trips_through_text() {
        let tree = sample_tree();
        let text = encode(&tree);
        let decoded = decode(&text, &WarnOnce::new()).unwrap();
        assert_eq!(tree, decoded);
    }

    #[test]
    fn encode_decode_encode_is_stable() {
        let text = encode(&sample_tree());
        let decoded = decode(&text, &WarnOnce::new()).unwrap();
        assert_eq!(encode(&decoded), text);
    }

    #[test]
    fn bad_magic_fails() {
        assert!(decode("not-a-tree\n-----\n", &WarnOnce::new()).is_err());
    }

    #[test]
    fn truncated_tree_fails() {
        let text = format!("{MAGIC}\n{SEPARATOR}\nd{ROOT_NAME} {}\n", dir_attrs().encode());
        assert!(decode(&text, &WarnOnce::new()).is_err());
    }

    #[test]
    fn file_before_separator_fails() {
        let text = format!(
            "{MAGIC}\n{SEPARATOR}\nd{ROOT_NAME} {}\nffoo {}\n-\nu\n",
            dir_attrs().encode(),
            file_attrs(1).encode()
        );
        assert!(decode(&text, &WarnOnce::new()).is_err());
    }
}
