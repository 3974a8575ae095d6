//! Estimate, migrate, and compute the sha1 content hashes attached to a
//! tree's regular-file entries.

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::sync::{mpsc, Arc, Mutex};

use camino::{Utf8Path, Utf8PathBuf};
use rustix::fs::{Mode, OFlags};
use sha1::{Digest, Sha1};

use crate::attributes::Attributes;
use crate::progress::{ProgressMeter, WarnOnce};
use crate::tree::{Directory, Tree};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HashEstimate {
    pub files: u64,
    pub bytes: u64,
}

/// Count and size of regular files still missing a sha1.
pub fn estimate(tree: &Tree) -> HashEstimate {
    let mut est = HashEstimate::default();
    estimate_into(tree, &mut est);
    est
}

fn estimate_into(dir: &Directory, est: &mut HashEstimate) {
    for f in &dir.files {
        if let Attributes::File {
            sha1: None, size, ..
        } = &f.attrs
        {
            est.files += 1;
            est.bytes += (*size).max(0) as u64;
        }
    }
    for d in &dir.dirs {
        estimate_into(d, est);
    }
}

/// Copy sha1 hashes from `prior` into `tree` wherever a file's `ino`,
/// `ctime`, and `size` all match an entry that already has a hash in
/// `prior`. Unchanged inode plus unchanged ctime is a strong local proof
/// the file hasn't been rewritten; this lets `update` skip rereading
/// gigabytes of unchanged data. Cross-filesystem reuse of a store is
/// unsupported and can produce false matches here.
pub fn migrate_from_prior(tree: &mut Tree, prior: &Tree) {
    let mut by_ino = HashMap::new();
    index_prior(prior, &mut by_ino);
    migrate_into(tree, &by_ino);
}

fn index_prior(dir: &Directory, by_ino: &mut HashMap<u64, (i64, i64, [u8; 20])>) {
    for f in &dir.files {
        if let Attributes::File {
            ino,
            ctime,
            size,
            sha1: Some(digest),
            ..
        } = &f.attrs
        {
            by_ino.insert(*ino, (*ctime, *size, *digest));
        }
    }
    for d in &dir.dirs {
        index_prior(d, by_ino);
    }
}

fn migrate_into(dir: &mut Directory, by_ino: &HashMap<u64, (i64, i64, [u8; 20])>) {
    for f in &mut dir.files {
        if let Attributes::File {
            ino,
            ctime,
            size,
            sha1,
            ..
        } = &mut f.attrs
        {
            if sha1.is_none() {
                if let Some((prior_ctime, prior_size, digest)) = by_ino.get(ino) {
                    if prior_ctime == ctime && prior_size == size {
                        *sha1 = Some(*digest);
                    }
                }
            }
        }
    }
    for d in &mut dir.dirs {
        migrate_into(d, by_ino);
    }
}

struct Job {
    id: u64,
    path: Utf8PathBuf,
    size: u64,
}

/// Fill in missing sha1 hashes by reading file contents.
///
/// A single producer (this function) walks the tree up front to build the
/// job list in a deterministic order; a pool of worker threads, sized to
/// the available cores, pulls jobs off a shared queue and hashes files.
/// A failed read logs a warning and leaves that file's sha1 absent; it
/// doesn't affect the others.
pub fn compute(tree: &mut Tree, root: &Utf8Path, meter: &dyn ProgressMeter, warnings: &WarnOnce) {
    let mut jobs = Vec::new();
    let mut next_id = 0u64;
    collect_jobs(tree, root, &mut next_id, &mut jobs);
    if jobs.is_empty() {
        return;
    }

    let workers = num_cpus::get().max(1).min(jobs.len());
    let queue = Arc::new(Mutex::new(jobs.into_iter()));
    let (results_tx, results_rx) = mpsc::channel::<(u64, u64, Option<[u8; 20]>)>();

    let mut results = HashMap::new();
    std::thread::scope(|scope| {
        for _ in 0..workers {
            let queue = Arc::clone(&queue);
            let results_tx = results_tx.clone();
            scope.spawn(move || loop {
                let job = { queue.lock().unwrap().next() };
                let Some(job) = job else { break };
                let digest = match hash_file(&job.path) {
                    Ok(d) => Some(d),
                    Err(e) => {
                        warnings.warn(format!("couldn't hash {}: {e}", job.path));
                        None
                    }
                };
                if results_tx.send((job.id, job.size, digest)).is_err() {
                    break;
                }
            });
        }
        drop(results_tx);

        let mut files = 0u64;
        let mut bytes = 0u64;
        for (id, size, digest) in results_rx {
            if digest.is_some() {
                files += 1;
                bytes += size;
                meter.observe(files, bytes);
            }
            results.insert(id, digest);
        }
    });

    let mut next_id = 0u64;
    apply_results(tree, &mut next_id, &results);
}

fn collect_jobs(dir: &Directory, base: &Utf8Path, next_id: &mut u64, jobs: &mut Vec<Job>) {
    for f in &dir.files {
        if let Attributes::File {
            sha1: None, size, ..
        } = &f.attrs
        {
            jobs.push(Job {
                id: *next_id,
                path: base.join(&f.name),
                size: (*size).max(0) as u64,
            });
            *next_id += 1;
        }
    }
    for d in &dir.dirs {
        collect_jobs(d, &base.join(&d.name), next_id, jobs);
    }
}

fn apply_results(dir: &mut Directory, next_id: &mut u64, results: &HashMap<u64, Option<[u8; 20]>>) {
    for f in &mut dir.files {
        if let Attributes::File { sha1, .. } = &mut f.attrs {
            if sha1.is_none() {
                if let Some(Some(digest)) = results.get(next_id) {
                    *sha1 = Some(*digest);
                }
                *next_id += 1;
            }
        }
    }
    for d in &mut dir.dirs {
        apply_results(d, next_id, results);
    }
}

/// Opens `path` for hashing. Tries `O_NOATIME` first so a full-tree hash
/// pass doesn't bump every file's access time; falls back to a plain open
/// when the hint isn't supported (non-Linux kernels, files we don't own).
fn open_for_hashing(path: &Utf8Path) -> std::io::Result<File> {
    match rustix::fs::open(path.as_std_path(), OFlags::RDONLY | OFlags::NOATIME, Mode::empty()) {
        Ok(fd) => Ok(File::from(fd)),
        Err(_) => File::open(path),
    }
}

fn hash_file(path: &Utf8Path) -> std::io::Result<[u8; 20]> {
    let mut file = open_for_hashing(path)?;
    let mut hasher = Sha1::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().into())
}
