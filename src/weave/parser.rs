//! Single-pass extraction of one revision from a weave's interleaved body.
//!
//! Feed [`WeaveParser`] lines one at a time; it tells you, for each plain
//! line, whether it belongs to the target revision. The state is just a
//! stack of open markers, so the parser can stop and resume mid-stream —
//! the delta builder relies on that to splice a new revision in place
//! without buffering the whole file.

use anyhow::{bail, ensure, Context, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Keep,
    Skip,
    /// Transparent: doesn't affect `keeping`, just holds a place on the
    /// stack until its matching `E` is seen.
    Next,
}

struct StackEntry {
    delta: u32,
    mode: Mode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeaveEvent<'a> {
    Plain { text: &'a str, keep: bool },
    Insert(u32),
    Delete(u32),
    End(u32),
}

/// Drives the extraction of a single revision (`target`) from a weave body.
pub struct WeaveParser {
    target: u32,
    stack: Vec<StackEntry>,
}

impl WeaveParser {
    pub fn new(target: u32) -> Self {
        WeaveParser { target, stack: Vec::new() }
    }

    fn keeping(&self) -> bool {
        for entry in self.stack.iter().rev() {
            match entry.mode {
                Mode::Keep => return true,
                Mode::Skip => return false,
                Mode::Next => continue,
            }
        }
        true
    }

    /// Feed one line of the weave body (no trailing newline). `sink` is
    /// called once with the event the line produced.
    pub fn push_line<'a>(&mut self, line: &'a str, mut sink: impl FnMut(WeaveEvent<'a>)) -> Result<()> {
        let Some(rest) = line.strip_prefix('\x01') else {
            sink(WeaveEvent::Plain { text: line, keep: self.keeping() });
            return Ok(());
        };

        let mut chars = rest.chars();
        let marker = chars.next().context("WeaveParseError: empty control line")?;
        let arg = rest[marker.len_utf8()..].trim();

        match marker {
            // The `\x01t<json>` header line lives outside the body proper;
            // callers strip it before driving the parser. Tolerate it here
            // too, as a no-op, in case a caller forwards it by mistake.
            't' => {}
            'I' => {
                let d: u32 = arg.parse().context("WeaveParseError: bad insert delta number")?;
                ensure!(
                    !self.stack.iter().any(|e| e.delta == d),
                    "WeaveParseError: duplicate push of delta {d}"
                );
                sink(WeaveEvent::Insert(d));
                let mode = if self.target >= d { Mode::Keep } else { Mode::Skip };
                self.stack.push(StackEntry { delta: d, mode });
            }
            'D' => {
                let d: u32 = arg.parse().context("WeaveParseError: bad delete delta number")?;
                ensure!(
                    !self.stack.iter().any(|e| e.delta == d),
                    "WeaveParseError: duplicate push of delta {d}"
                );
                sink(WeaveEvent::Delete(d));
                let mode = if self.target >= d { Mode::Skip } else { Mode::Next };
                self.stack.push(StackEntry { delta: d, mode });
            }
            'E' => {
                let d: u32 = arg.parse().context("WeaveParseError: bad end delta number")?;
                sink(WeaveEvent::End(d));
                let pos = self
                    .stack
                    .iter()
                    .rposition(|e| e.delta == d)
                    .with_context(|| format!("WeaveParseError: End({d}) without matching marker"))?;
                self.stack.remove(pos);
            }
            other => bail!("WeaveParseError: unknown control marker {other:?}"),
        }
        Ok(())
    }

    /// True once every opened marker has been closed. A well-formed weave
    /// reaches EOF in this state.
    pub fn is_balanced(&self) -> bool {
        self.stack.is_empty()
    }
}

/// Drive `parser` over `lines`, forwarding every event to `sink`, until
/// `target_kept_line` plain lines have been delivered with `keep=true`.
/// Numbering starts at 1; `target_kept_line == 0` returns immediately.
pub fn parse_until(
    parser: &mut WeaveParser,
    lines: &mut impl Iterator<Item = Result<String>>,
    target_kept_line: u64,
    mut sink: impl FnMut(WeaveEvent<'_>),
) -> Result<()> {
    let mut kept = 0u64;
    while kept < target_kept_line {
        let line = lines
            .next()
            .ok_or_else(|| anyhow::anyhow!("WeaveParseError: unexpected EOF at kept line {kept}, wanted {target_kept_line}"))??;
        parser.push_line(&line, |ev| {
            if let WeaveEvent::Plain { keep: true, .. } = ev {
                kept += 1;
            }
            sink(ev);
        })?;
    }
    Ok(())
}

/// Drive `parser` over every remaining line, forwarding every event.
pub fn drain_rest(
    parser: &mut WeaveParser,
    lines: &mut impl Iterator<Item = Result<String>>,
    mut sink: impl FnMut(WeaveEvent<'_>),
) -> Result<()> {
    for line in lines {
        let line = line?;
        parser.push_line(&line, |ev| sink(ev))?;
    }
    ensure!(parser.is_balanced(), "WeaveParseError: unbalanced markers at EOF");
    Ok(())
}

/// Reconstruct the full plain text of `revision` from a weave body.
pub fn reconstruct(lines: &[String], revision: u32) -> Result<String> {
    let mut parser = WeaveParser::new(revision);
    let mut out = String::new();
    for line in lines {
        parser.push_line(line, |ev| {
            if let WeaveEvent::Plain { text, keep: true } = ev {
                out.push_str(text);
                out.push('\n');
            }
        })?;
    }
    ensure!(parser.is_balanced(), "WeaveParseError: unbalanced markers at EOF");
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(s: &str) -> Vec<String> {
        s.lines().map(String::from).collect()
    }

    #[test]
    fn single_revision_is_all_plain() {
        let body = lines("alpha\nbeta\ngamma");
        assert_eq!(reconstruct(&body, 1).unwrap(), "alpha\nbeta\ngamma\n");
    }

    #[test]
    fn insert_only_visible_at_or_after_its_delta() {
        // revision 1: "alpha\ngamma"; revision 2 inserts "beta" between them.
        let body = lines("alpha\n\x01I 2\nbeta\n\x01E 2\ngamma");
        assert_eq!(reconstruct(&body, 1).unwrap(), "alpha\ngamma\n");
        assert_eq!(reconstruct(&body, 2).unwrap(), "alpha\nbeta\ngamma\n");
    }

    #[test]
    fn delete_only_visible_before_its_delta() {
        // revision 1: "alpha\nbeta\ngamma"; revision 2 deletes "beta".
        let body = lines("alpha\n\x01D 2\nbeta\n\x01E 2\ngamma");
        assert_eq!(reconstruct(&body, 1).unwrap(), "alpha\nbeta\ngamma\n");
        assert_eq!(reconstruct(&body, 2).unwrap(), "alpha\ngamma\n");
    }

    #[test]
    fn nested_markers_compose() {
        let body = lines("a\n\x01I 2\nb\n\x01D 3\nc\n\x01E 3\nd\n\x01E 2\ne");
        // rev1: a, e
        assert_eq!(reconstruct(&body, 1).unwrap(), "a\ne\n");
        // rev2: a, b, c, d, e (delete at 3 not yet applied)
        assert_eq!(reconstruct(&body, 2).unwrap(), "a\nb\nc\nd\ne\n");
        // rev3: a, b, d, e (c deleted)
        assert_eq!(reconstruct(&body, 3).unwrap(), "a\nb\nd\ne\n");
    }

    #[test]
    fn unknown_marker_fails() {
        let mut p = WeaveParser::new(1);
        assert!(p.push_line("\x01Zbogus", |_| {}).is_err());
    }

    #[test]
    fn unmatched_end_fails() {
        let mut p = WeaveParser::new(1);
        assert!(p.push_line("\x01E 9", |_| {}).is_err());
    }

    #[test]
    fn duplicate_insert_of_same_delta_fails() {
        let mut p = WeaveParser::new(2);
        p.push_line("\x01I 2", |_| {}).unwrap();
        assert!(p.push_line("\x01I 2", |_| {}).is_err());
    }

    #[test]
    fn duplicate_delete_of_same_delta_fails() {
        let mut p = WeaveParser::new(2);
        p.push_line("\x01D 2", |_| {}).unwrap();
        assert!(p.push_line("\x01D 2", |_| {}).is_err());
    }

    #[test]
    fn insert_then_delete_of_same_delta_is_also_rejected() {
        let mut p = WeaveParser::new(2);
        p.push_line("\x01I 2", |_| {}).unwrap();
        assert!(p.push_line("\x01D 2", |_| {}).is_err());
    }
}
