//! Locates snapshot files on disk and mediates between the tree codec and
//! the weave format: naming, gzip, and the temp-file-then-rename discipline
//! that keeps `main` always whole.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Read, Write};

use anyhow::{anyhow, ensure, Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::file_util;
use crate::progress::WarnOnce;
use crate::tree::{self, Tree};
use crate::weave::{self, Delta, Header};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flavor {
    Plain,
    Weave,
}

/// A temp file being written, transparently gzipped or not. Exists so
/// [`Store::replace_main`] can recover the underlying [`File`] handle once
/// writing is done, to pass on to [`file_util::move_opened`].
enum TempWriter {
    Plain(File),
    Gz(GzEncoder<File>),
}

impl TempWriter {
    fn finish(self) -> Result<File> {
        match self {
            TempWriter::Plain(fh) => Ok(fh),
            TempWriter::Gz(enc) => enc.finish().context("finishing gzip stream"),
        }
    }
}

impl Write for TempWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            TempWriter::Plain(fh) => fh.write(buf),
            TempWriter::Gz(enc) => enc.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            TempWriter::Plain(fh) => fh.flush(),
            TempWriter::Gz(enc) => enc.flush(),
        }
    }
}

/// A store's location and naming. Cheap to construct; carries no open
/// file handles, so it's fine to build fresh per command invocation.
pub struct Store {
    dir: Utf8PathBuf,
    base: String,
    compressed: bool,
}

/// Parse the `-f <path>` surface into a [`Store`]: an existing directory
/// selects defaults, otherwise the basename is split into base/extension.
pub fn parse_path(s: &str) -> Result<Store> {
    let path = Utf8Path::new(s);
    if path.is_dir() {
        return Ok(Store::new(path.to_path_buf(), "2sure", true));
    }

    let parent = match path.parent() {
        Some(p) if !p.as_str().is_empty() => p,
        _ => Utf8Path::new("."),
    };
    ensure!(parent.is_dir(), "NotDir: {parent}");

    let file_name = path.file_name().ok_or_else(|| anyhow!("InvalidName: {s}"))?;

    let (rest, compressed) = match file_name.strip_suffix(".gz") {
        Some(stem) => (stem, true),
        None => (file_name, false),
    };

    let base = rest
        .strip_suffix(".dat")
        .or_else(|| rest.strip_suffix(".bak"))
        .or_else(|| rest.strip_suffix(".weave"))
        .ok_or_else(|| anyhow!("InvalidName: unrecognized extension in {file_name:?}"))?;

    Ok(Store::new(parent.to_path_buf(), base, compressed))
}

impl Store {
    pub fn new(dir: impl Into<Utf8PathBuf>, base: impl Into<String>, compressed: bool) -> Self {
        Store { dir: dir.into(), base: base.into(), compressed }
    }

    fn suffix(&self) -> &'static str {
        if self.compressed { ".gz" } else { "" }
    }

    fn path_for(&self, ext: &str) -> Utf8PathBuf {
        self.dir.join(format!("{}.{}{}", self.base, ext, self.suffix()))
    }

    pub fn backup_path(&self) -> Utf8PathBuf {
        self.path_for("bak")
    }

    /// Finds the current main file, if any, and what flavor it claims to
    /// be by its name. Tries both compressed and plain spellings, since
    /// `self.compressed` only governs what this process *writes*.
    pub fn main_path(&self) -> Option<(Utf8PathBuf, Flavor)> {
        for (ext, flavor) in [("dat", Flavor::Plain), ("weave", Flavor::Weave)] {
            for suffix in ["", ".gz"] {
                let candidate = self.dir.join(format!("{}.{}{}", self.base, ext, suffix));
                if candidate.is_file() {
                    return Some((candidate, flavor));
                }
            }
        }
        None
    }

    fn acquire_temp(&self) -> Result<(Utf8PathBuf, File)> {
        for n in 0u64.. {
            let candidate = self.dir.join(format!("{}.{}{}", self.base, n, self.suffix()));
            match std::fs::OpenOptions::new().write(true).create_new(true).open(&candidate) {
                Ok(fh) => return Ok((candidate, fh)),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e).with_context(|| format!("Couldn't create temp file {candidate}")),
            }
        }
        unreachable!("exhausted temp file numbers")
    }

    fn wrap_writer(&self, fh: File) -> TempWriter {
        if self.compressed {
            TempWriter::Gz(GzEncoder::new(fh, Compression::default()))
        } else {
            TempWriter::Plain(fh)
        }
    }

    /// Rename current main to backup (ignoring a missing main), then the
    /// temp file to `target_main`. On failure before the final rename the
    /// temp file is removed and main is untouched. Both renames go through
    /// [`file_util::move_opened`], which falls back to a copy when the
    /// store and its target live on different filesystems.
    fn replace_main(&self, temp_path: &Utf8Path, temp_fh: File, target_main: Utf8PathBuf) -> Result<()> {
        if let Some((old_main, _)) = self.main_path() {
            match File::open(&old_main) {
                Ok(old_fh) => {
                    if let Err(e) =
                        file_util::move_opened(old_main.as_std_path(), old_fh, self.backup_path().as_std_path())
                    {
                        let _ = std::fs::remove_file(temp_path);
                        return Err(e).with_context(|| format!("Couldn't back up {old_main}"));
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    let _ = std::fs::remove_file(temp_path);
                    return Err(e).with_context(|| format!("Couldn't open {old_main} for backup"));
                }
            }
        }
        file_util::move_opened(temp_path.as_std_path(), temp_fh, target_main.as_std_path())
            .with_context(|| format!("Couldn't rename {temp_path} to {target_main}"))
    }

    /// Writes the very first snapshot: a plain, history-less store.
    pub fn write_initial(&self, tree: &Tree) -> Result<()> {
        let text = tree::encode(tree);
        let (temp_path, temp_fh) = self.acquire_temp()?;
        let mut writer = self.wrap_writer(temp_fh);
        writer.write_all(text.as_bytes()).context("writing temp store")?;
        writer.flush().context("flushing temp store")?;
        let temp_fh = writer.finish()?;
        self.replace_main(&temp_path, temp_fh, self.path_for("dat"))
    }

    /// Appends a new delta, upgrading a plain store to a weave on first
    /// use (the plain snapshot becomes delta 1, named "initial").
    pub fn write_delta(
        &self,
        tree: &Tree,
        name: String,
        tags: BTreeMap<String, String>,
        time: String,
    ) -> Result<()> {
        let new_text = tree::encode(tree);

        let (mut header, existing_lines) = match self.main_path() {
            None => (Header::new(), Vec::new()),
            Some((path, Flavor::Weave)) => split_weave_buffer(read_raw_bytes(&path)?)?,
            Some((path, Flavor::Plain)) => {
                let old_text = read_raw_text(&path)?;
                let mut buf = Vec::new();
                let mut initial_header = Header::new();
                weave::build_delta(
                    &mut initial_header,
                    Vec::new(),
                    &old_text,
                    &mut buf,
                    "initial".to_string(),
                    BTreeMap::new(),
                    time.clone(),
                )?;
                split_weave_buffer(buf)?
            }
        };

        let mut out = Vec::new();
        weave::build_delta(&mut header, existing_lines, &new_text, &mut out, name, tags, time)?;

        let (temp_path, temp_fh) = self.acquire_temp()?;
        let mut writer = self.wrap_writer(temp_fh);
        writer.write_all(&out).context("writing temp store")?;
        writer.flush().context("flushing temp store")?;
        let temp_fh = writer.finish()?;
        self.replace_main(&temp_path, temp_fh, self.path_for("weave"))
    }

    pub fn read_latest(&self, warnings: &WarnOnce) -> Result<Tree> {
        self.read_delta(None, warnings)
    }

    pub fn read_delta(&self, revision: Option<u32>, warnings: &WarnOnce) -> Result<Tree> {
        let (path, flavor) = self
            .main_path()
            .ok_or_else(|| anyhow!("NoDelta: no store found at {}", self.dir))?;
        match flavor {
            Flavor::Plain => {
                ensure!(revision.is_none(), "NoDelta: plain store has only one revision");
                tree::decode(&read_raw_text(&path)?, warnings)
            }
            Flavor::Weave => {
                let (header, body) = split_weave_buffer(read_raw_bytes(&path)?)?;
                let target = match revision {
                    Some(n) => n,
                    None => header.latest().map(|d| d.number).context("NoDelta: weave has no deltas")?,
                };
                tree::decode(&weave::reconstruct(&body, target)?, warnings)
            }
        }
    }

    pub fn read_previous(&self, warnings: &WarnOnce) -> Result<Tree> {
        let header = self.header()?.context("NoDelta: store has no version history")?;
        let prior = header.prior().context("NoDelta: only one revision on record")?;
        self.read_delta(Some(prior.number), warnings)
    }

    pub fn list_deltas(&self) -> Result<Vec<Delta>> {
        Ok(self.header()?.map(|h| h.deltas).unwrap_or_default())
    }

    /// Reads whatever `main` was before the most recent write, for
    /// `signoff`. The backup always sits at `<base>.bak[.gz]`; flavor is
    /// sniffed from its content since its name carries no `dat`/`weave` tag.
    pub fn read_backup(&self, warnings: &WarnOnce) -> Result<Tree> {
        let path = self
            .backup_candidate()
            .ok_or_else(|| anyhow!("NoDelta: no backup file at {}", self.backup_path()))?;
        let raw = read_raw_bytes(&path)?;
        if raw.starts_with(b"\x01t") {
            let (header, body) = split_weave_buffer(raw)?;
            let target = header.latest().map(|d| d.number).context("NoDelta: backup weave has no deltas")?;
            tree::decode(&weave::reconstruct(&body, target)?, warnings)
        } else {
            let text = String::from_utf8(raw).context("Codec: backup was not valid utf-8")?;
            tree::decode(&text, warnings)
        }
    }

    fn backup_candidate(&self) -> Option<Utf8PathBuf> {
        for suffix in ["", ".gz"] {
            let candidate = self.dir.join(format!("{}.bak{}", self.base, suffix));
            if candidate.is_file() {
                return Some(candidate);
            }
        }
        None
    }

    fn header(&self) -> Result<Option<Header>> {
        match self.main_path() {
            None | Some((_, Flavor::Plain)) => Ok(None),
            Some((path, Flavor::Weave)) => {
                let (header, _) = split_weave_buffer(read_raw_bytes(&path)?)?;
                Ok(Some(header))
            }
        }
    }
}

fn open_reader(path: &Utf8Path) -> Result<Box<dyn BufRead>> {
    let fh = File::open(path).with_context(|| format!("Couldn't open {path}"))?;
    if path.as_str().ends_with(".gz") {
        Ok(Box::new(BufReader::new(GzDecoder::new(fh))))
    } else {
        Ok(Box::new(BufReader::new(fh)))
    }
}

fn read_raw_text(path: &Utf8Path) -> Result<String> {
    let mut s = String::new();
    open_reader(path)?.read_to_string(&mut s).with_context(|| format!("reading {path}"))?;
    Ok(s)
}

fn read_raw_bytes(path: &Utf8Path) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    open_reader(path)?.read_to_end(&mut buf).with_context(|| format!("reading {path}"))?;
    Ok(buf)
}

fn split_weave_buffer(buf: Vec<u8>) -> Result<(Header, Vec<String>)> {
    let text = String::from_utf8(buf).context("Codec: weave body was not valid utf-8")?;
    let mut lines = text.lines();
    let header_line = lines.next().context("Codec: empty weave file")?;
    let header_json = header_line
        .strip_prefix("\x01t")
        .context("Codec: missing weave header marker")?;
    let header = Header::from_json(header_json)?;
    Ok((header, lines.map(String::from).collect()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::Attributes;
    use crate::tree::Directory;

    fn sample(size: i64) -> Tree {
        let mut root = Directory::root(Attributes::Dir { uid: 0, gid: 0, perm: 0o755 });
        root.files.push(crate::tree::FileEntry {
            name: "a.txt".into(),
            attrs: Attributes::File {
                uid: 0,
                gid: 0,
                perm: 0o644,
                mtime: 1,
                ctime: 1,
                ino: 1,
                size,
                sha1: None,
            },
        });
        root
    }

    #[test]
    fn parse_path_strips_gz_and_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("2sure.weave.gz");
        let store = parse_path(path.to_str().unwrap()).unwrap();
        assert!(store.compressed);
        assert_eq!(store.base, "2sure");
    }

    #[test]
    fn parse_path_rejects_unknown_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("2sure.txt");
        assert!(parse_path(path.to_str().unwrap()).is_err());
    }

    #[test]
    fn scan_then_update_produces_two_readable_revisions() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(Utf8PathBuf::from_path_buf(dir.path().to_owned()).unwrap(), "2sure", false);
        let warnings = WarnOnce::new();

        store.write_initial(&sample(10)).unwrap();
        assert!(matches!(store.main_path().unwrap().1, Flavor::Plain));
        assert_eq!(store.read_latest(&warnings).unwrap(), sample(10));

        store
            .write_delta(&sample(20), "second".into(), BTreeMap::new(), "2024-01-01T00:00:00Z".into())
            .unwrap();
        assert!(matches!(store.main_path().unwrap().1, Flavor::Weave));
        assert_eq!(store.read_delta(Some(1), &warnings).unwrap(), sample(10));
        assert_eq!(store.read_latest(&warnings).unwrap(), sample(20));
        assert_eq!(store.read_previous(&warnings).unwrap(), sample(10));
        assert_eq!(store.list_deltas().unwrap().len(), 2);
        assert!(store.backup_path().is_file());
    }

    #[test]
    fn backup_is_readable_after_update() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(Utf8PathBuf::from_path_buf(dir.path().to_owned()).unwrap(), "2sure", false);
        let warnings = WarnOnce::new();
        store.write_initial(&sample(1)).unwrap();
        store
            .write_delta(&sample(2), "second".into(), BTreeMap::new(), "2024-01-01T00:00:00Z".into())
            .unwrap();
        assert_eq!(store.read_backup(&warnings).unwrap(), sample(1));
    }

    #[test]
    fn compressed_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(Utf8PathBuf::from_path_buf(dir.path().to_owned()).unwrap(), "2sure", true);
        let warnings = WarnOnce::new();
        store.write_initial(&sample(5)).unwrap();
        assert_eq!(store.read_latest(&warnings).unwrap(), sample(5));
        let (path, _) = store.main_path().unwrap();
        assert!(path.as_str().ends_with(".gz"));
    }
}
