//! The command-line front end: argument parsing and one dispatch function
//! per subcommand.

use std::collections::BTreeMap;

use anyhow::{ensure, Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use clap::{ArgAction, Parser, Subcommand};
use regex::Regex;

use crate::config::Configuration;
use crate::progress::{NullMeter, TerminalStatus, WarnOnce};
use crate::store::{self, Store};
use crate::{diff, hashing, scan, tree};

#[derive(Parser, Debug)]
#[command(name = "sureweave", version, about = "A file-tree integrity store with multi-version history")]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Store file or directory. Defaults to the configured base name in
    /// the current directory.
    #[arg(short = 'f', long = "file", global = true)]
    pub file: Option<String>,

    /// Root directory to scan.
    #[arg(short = 'd', long = "dir", global = true, default_value = ".")]
    pub dir: String,

    /// Tag the delta being written, `key=value`. Repeatable.
    #[arg(short = 't', long = "tag", global = true)]
    pub tags: Vec<String>,

    /// Name the delta being written. Defaults to an RFC-3339 timestamp
    /// if not given.
    #[arg(short = 'n', long = "name", global = true)]
    pub name: Option<String>,

    /// Regex of entry names to skip during scanning. Repeatable; merged
    /// after any patterns from the config file.
    #[arg(short = 's', long = "skip", global = true)]
    pub skip: Vec<String>,

    /// Increase log verbosity: warn, info, debug, trace.
    #[arg(short = 'v', global = true, action = ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create the initial snapshot.
    Scan,
    /// Snapshot again, migrating hashes from the prior revision.
    Update,
    /// Scan live and compare against a stored revision.
    Check {
        /// Revision to compare against. Defaults to the latest.
        #[arg(short = 'r', long = "revision")]
        revision: Option<u32>,
    },
    /// Compare the backed-up prior main against the current main.
    Signoff,
    /// Print the recorded deltas (weave stores only).
    List,
}

pub fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();
}

pub fn run(args: Args) -> Result<()> {
    let config = crate::config::load().unwrap_or_default();
    let store = resolve_store(args.file.as_deref(), &config)?;
    let skip = compile_skips(&config.merge_skips(args.skip.clone()))?;
    let root = Utf8PathBuf::from(args.dir);
    let tags = decode_tags(&args.tags)?;

    match args.command {
        Command::Scan => cmd_scan(&store, &root, &skip),
        Command::Update => cmd_update(&store, &root, &skip, tags, args.name),
        Command::Check { revision } => cmd_check(&store, &root, &skip, revision),
        Command::Signoff => cmd_signoff(&store),
        Command::List => cmd_list(&store),
    }
}

fn resolve_store(file: Option<&str>, config: &Configuration) -> Result<Store> {
    match file {
        Some(path) => store::parse_path(path),
        None => Ok(Store::new(".", config.default_base.clone(), config.compressed)),
    }
}

fn decode_tags(tags: &[String]) -> Result<BTreeMap<String, String>> {
    let mut map = BTreeMap::new();
    for tag in tags {
        let (k, v) = decode_tag(tag)?;
        map.insert(k, v);
    }
    Ok(map)
}

fn decode_tag(tag: &str) -> Result<(String, String)> {
    let (k, v) = tag
        .split_once('=')
        .with_context(|| format!("tag {tag:?} isn't of the form key=value"))?;
    ensure!(!k.is_empty(), "tag {tag:?} has an empty key");
    Ok((k.to_string(), v.to_string()))
}

fn compile_skips(patterns: &[String]) -> Result<Vec<Regex>> {
    patterns
        .iter()
        .map(|p| Regex::new(p).with_context(|| format!("bad skip pattern {p:?}")))
        .collect()
}

fn now_rfc3339() -> String {
    jiff::Timestamp::now().to_string()
}

fn count_files(dir: &tree::Directory) -> usize {
    dir.files.len() + dir.dirs.iter().map(count_files).sum::<usize>()
}

fn cmd_scan(store: &Store, root: &Utf8Path, skip: &[Regex]) -> Result<()> {
    let warnings = WarnOnce::new();
    let status = TerminalStatus::new("scanning");
    let mut snapshot = scan::scan(root, skip, &status, &warnings)?;
    hashing::compute(&mut snapshot, root, &status, &warnings);
    store.write_initial(&snapshot)?;
    eprintln!("wrote initial snapshot ({} entries)", count_files(&snapshot));
    Ok(())
}

fn cmd_update(
    store: &Store,
    root: &Utf8Path,
    skip: &[Regex],
    tags: BTreeMap<String, String>,
    name: Option<String>,
) -> Result<()> {
    let warnings = WarnOnce::new();
    let status = TerminalStatus::new("scanning");
    let prior = store
        .read_latest(&warnings)
        .context("NoDelta: nothing to update; run `scan` first")?;
    let mut snapshot = scan::scan(root, skip, &status, &warnings)?;
    hashing::migrate_from_prior(&mut snapshot, &prior);
    hashing::compute(&mut snapshot, root, &status, &warnings);
    let name = name.unwrap_or_else(now_rfc3339);
    store.write_delta(&snapshot, name, tags, now_rfc3339())?;
    eprintln!("wrote new delta ({} entries)", count_files(&snapshot));
    Ok(())
}

fn cmd_check(store: &Store, root: &Utf8Path, skip: &[Regex], revision: Option<u32>) -> Result<()> {
    let warnings = WarnOnce::new();
    let stored = store.read_delta(revision, &warnings)?;
    let live = scan::scan(root, skip, &NullMeter, &warnings)?;
    for entry in diff::diff(&stored, &live) {
        println!("{entry}");
    }
    Ok(())
}

fn cmd_signoff(store: &Store) -> Result<()> {
    let warnings = WarnOnce::new();
    let backup = store.read_backup(&warnings)?;
    let current = store.read_latest(&warnings)?;
    for entry in diff::diff(&backup, &current) {
        println!("{entry}");
    }
    Ok(())
}

fn cmd_list(store: &Store) -> Result<()> {
    let deltas = store.list_deltas()?;
    if deltas.is_empty() {
        println!("(no recorded deltas; store is a plain snapshot)");
        return Ok(());
    }
    println!("vers | time                 | name");
    println!("-----+----------------------+----------------");
    for delta in deltas.iter().rev() {
        let tags = delta
            .tags
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",");
        if tags.is_empty() {
            println!("{:4} | {:<20} | {}", delta.number, delta.time, delta.name);
        } else {
            println!("{:4} | {:<20} | {} ({tags})", delta.number, delta.time, delta.name);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_tag_requires_equals() {
        assert!(decode_tag("nope").is_err());
        assert_eq!(decode_tag("k=v").unwrap(), ("k".to_string(), "v".to_string()));
    }

    #[test]
    fn decode_tags_builds_map() {
        let tags = vec!["a=1".to_string(), "b=2".to_string()];
        let map = decode_tags(&tags).unwrap();
        assert_eq!(map.get("a"), Some(&"1".to_string()));
        assert_eq!(map.get("b"), Some(&"2".to_string()));
    }

    #[test]
    fn args_parse_scan_with_global_flags() {
        let args = Args::parse_from(["sureweave", "-d", "/tmp", "-t", "k=v", "-s", "^target$", "scan"]);
        assert_eq!(args.dir, "/tmp");
        assert_eq!(args.tags, vec!["k=v".to_string()]);
        assert_eq!(args.skip, vec!["^target$".to_string()]);
        assert!(matches!(args.command, Command::Scan));
    }

    #[test]
    fn args_parse_update_with_name() {
        let args = Args::parse_from(["sureweave", "-n", "before the migration", "update"]);
        assert_eq!(args.name, Some("before the migration".to_string()));
    }

    #[test]
    fn args_parse_update_without_name_defaults_to_none() {
        let args = Args::parse_from(["sureweave", "update"]);
        assert_eq!(args.name, None);
    }

    #[test]
    fn args_parse_check_with_revision() {
        let args = Args::parse_from(["sureweave", "check", "-r", "3"]);
        match args.command {
            Command::Check { revision } => assert_eq!(revision, Some(3)),
            _ => panic!("expected Check"),
        }
    }
}
