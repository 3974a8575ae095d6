//! Writes the (N+1)-th revision into a weave by diffing the
//! reconstructed base revision against a new snapshot, then splicing the
//! diff into a copy of the existing body.

use std::collections::BTreeMap;
use std::io::Write;

use anyhow::{Context, Result};
use similar::{ChangeTag, TextDiff};

use super::header::Header;
use super::parser::{drain_rest, parse_until, reconstruct, WeaveEvent, WeaveParser};
use super::writer::PassthroughWriter;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    /// Insert `lines` after (1-based, 0 meaning "before everything") old line `after`.
    Append { after: u64, lines: Vec<String> },
    /// Replace the inclusive 1-based range `[from, to]` with `lines`.
    Change { from: u64, to: u64, lines: Vec<String> },
    /// Delete the inclusive 1-based range `[from, to]`.
    Delete { from: u64, to: u64 },
}

/// Group `similar`'s change stream into ed-style range commands, so the
/// splice step below can stay oblivious to the diff engine underneath it.
fn diff_to_commands(old_text: &str, new_text: &str) -> Vec<Command> {
    let diff = TextDiff::from_lines(old_text, new_text);

    let mut commands = Vec::new();
    let mut old_line = 0u64;
    let mut pending_delete: Option<(u64, u64)> = None;
    let mut pending_insert: Vec<String> = Vec::new();

    let flush = |commands: &mut Vec<Command>,
                 pending_delete: &mut Option<(u64, u64)>,
                 pending_insert: &mut Vec<String>,
                 anchor: u64| {
        let deleted = pending_delete.take();
        let inserted = std::mem::take(pending_insert);
        match (deleted, inserted.is_empty()) {
            (None, true) => {}
            (None, false) => commands.push(Command::Append { after: anchor, lines: inserted }),
            (Some((from, to)), true) => commands.push(Command::Delete { from, to }),
            (Some((from, to)), false) => commands.push(Command::Change { from, to, lines: inserted }),
        }
    };

    for change in diff.iter_all_changes() {
        match change.tag() {
            ChangeTag::Equal => {
                flush(&mut commands, &mut pending_delete, &mut pending_insert, old_line);
                old_line += 1;
            }
            ChangeTag::Delete => {
                old_line += 1;
                let entry = pending_delete.get_or_insert((old_line, old_line));
                entry.1 = old_line;
            }
            ChangeTag::Insert => {
                pending_insert.push(change.value().trim_end_matches('\n').to_string());
            }
        }
    }
    flush(&mut commands, &mut pending_delete, &mut pending_insert, old_line);
    commands
}

/// Build delta N+1 from the weave's existing body (`existing_lines`,
/// newline-split, the `\x01t...` header line already stripped) and a new
/// snapshot's canonical text, writing the resulting header and body to
/// `output`.
pub fn build_delta(
    header: &mut Header,
    existing_lines: Vec<String>,
    new_snapshot_text: &str,
    mut output: impl Write,
    name: String,
    tags: BTreeMap<String, String>,
    time: String,
) -> Result<()> {
    let base_number = header.latest().map(|d| d.number).unwrap_or(0);

    let base_text = if base_number == 0 {
        String::new()
    } else {
        reconstruct(&existing_lines, base_number)?
    };

    let commands = diff_to_commands(&base_text, new_snapshot_text);
    let new_number = header.push(name, tags, time);

    writeln!(output, "\x01t{}", header.to_json()?).context("writing weave header")?;
    let mut writer = PassthroughWriter::new(output);

    let mut parser = WeaveParser::new(base_number);
    let mut remaining = existing_lines.into_iter().map(Ok);

    for command in commands {
        match command {
            Command::Append { after, lines } => {
                parse_until(&mut parser, &mut remaining, after, |ev| {
                    let _ = writer.write_event(ev);
                })?;
                writer.write_event(WeaveEvent::Insert(new_number))?;
                for line in &lines {
                    writer.write_event(WeaveEvent::Plain { text: line, keep: true })?;
                }
                writer.write_event(WeaveEvent::End(new_number))?;
            }
            Command::Delete { from, to } => {
                parse_until(&mut parser, &mut remaining, from - 1, |ev| {
                    let _ = writer.write_event(ev);
                })?;
                writer.write_event(WeaveEvent::Delete(new_number))?;
                parse_until(&mut parser, &mut remaining, to, |ev| {
                    let _ = writer.write_event(ev);
                })?;
                writer.write_event(WeaveEvent::End(new_number))?;
            }
            Command::Change { from, to, lines } => {
                parse_until(&mut parser, &mut remaining, from - 1, |ev| {
                    let _ = writer.write_event(ev);
                })?;
                writer.write_event(WeaveEvent::Delete(new_number))?;
                parse_until(&mut parser, &mut remaining, to, |ev| {
                    let _ = writer.write_event(ev);
                })?;
                writer.write_event(WeaveEvent::End(new_number))?;
                writer.write_event(WeaveEvent::Insert(new_number))?;
                for line in &lines {
                    writer.write_event(WeaveEvent::Plain { text: line, keep: true })?;
                }
                writer.write_event(WeaveEvent::End(new_number))?;
            }
        }
    }

    drain_rest(&mut parser, &mut remaining, |ev| {
        let _ = writer.write_event(ev);
    })?;

    writer.into_inner().flush()?;
    Ok(())
}
