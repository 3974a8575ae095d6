//! Small filesystem helpers: magic-byte checks and atomic temp+rename writes.

use std::fs::File;
use std::io::prelude::*;
use std::path::Path;

use anyhow::{ensure, Context, Result};
use tracing::debug;

/// Checks that `r` starts with exactly `expected`.
pub fn check_magic<R: Read>(r: &mut R, expected: &[u8]) -> Result<()> {
    let mut magic = vec![0u8; expected.len()];
    r.read_exact(&mut magic)?;
    ensure!(
        magic == expected,
        "Expected magic bytes {:?}, found {:?}",
        String::from_utf8_lossy(expected),
        String::from_utf8_lossy(&magic)
    );
    Ok(())
}

#[cfg(unix)]
pub fn move_opened<P, Q>(from: P, from_fh: File, to: Q) -> Result<()>
where
    P: AsRef<Path>,
    Q: AsRef<Path>,
{
    let from = from.as_ref();
    let to = to.as_ref();

    // POSIX lets us rename opened files. Neat!
    match std::fs::rename(from, to) {
        Ok(()) => {
            debug!("Renamed {} to {}", from.display(), to.display());
            Ok(())
        }
        // Once stabilized: e.kind() == ErrorKind::CrossesDevices
        Err(e) if e.raw_os_error() == Some(18) /* EXDEV */ => move_by_copy(from, from_fh, to),
        Err(e) => anyhow::bail!(e),
    }
}

#[cfg(windows)]
pub fn move_opened<P, Q>(from: P, from_fh: File, to: Q) -> Result<()>
where
    P: AsRef<Path>,
    Q: AsRef<Path>,
{
    // On Windows, we can't move an open file. Boo, Windows.
    move_by_copy(from.as_ref(), from_fh, to.as_ref())
}

fn move_by_copy(from: &Path, mut from_fh: File, to: &Path) -> Result<()> {
    from_fh.seek(std::io::SeekFrom::Start(0))?;
    safe_copy_to_file(from_fh, to)?;
    std::fs::remove_file(from).with_context(|| format!("Couldn't remove {}", from.display()))?;
    debug!("Moved {} to {}", from.display(), to.display());
    Ok(())
}

/// Copies the reader to a new file at `to + ".part"`, then renames to `to`.
///
/// This guarantees `to` never contains a partial file.
pub fn safe_copy_to_file<R: Read>(mut from: R, to: &Path) -> Result<()> {
    // To make things more atomic, copy to /dest/foo.part, then rename to
    // /dest/foo.
    let mut to_part = to.to_owned().into_os_string();
    to_part.push(".part");
    let to_part = Path::new(&to_part);

    let mut to_fh = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(to_part)
        .with_context(|| format!("Couldn't open {}", to_part.display()))?;

    std::io::copy(&mut from, &mut to_fh).with_context(|| format!("Couldn't write {}", to_part.display()))?;
    drop(from);

    to_fh.sync_all().with_context(|| format!("Couldn't sync {}", to_part.display()))?;
    drop(to_fh);

    std::fs::rename(to_part, to)
        .with_context(|| format!("Couldn't rename {} to {}", to_part.display(), to.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn magic_matches() {
        let mut data: &[u8] = b"asure-2.0 rest";
        assert!(check_magic(&mut data, b"asure-2.0").is_ok());
    }

    #[test]
    fn magic_mismatch_fails() {
        let mut data: &[u8] = b"nope-nope";
        assert!(check_magic(&mut data, b"asure-2.0").is_err());
    }

    #[test]
    fn safe_copy_leaves_no_partial_file_on_success() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.dat");
        safe_copy_to_file(&b"hello"[..], &dest).unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"hello");

        let mut part = dest.clone().into_os_string();
        part.push(".part");
        assert!(!Path::new(&part).exists());
    }
}
