//! The write-only progress contract the scanner and hash engine report
//! through, plus a terminal status line that redraws itself in place.

use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use camino::Utf8Path;
use console::Term;
use unicode_segmentation::UnicodeSegmentation;

/// A write-only sink for scan/hash progress. Implementations are free to
/// throttle; callers must not rely on every call being observed.
pub trait ProgressMeter: Sync {
    fn observe(&self, files: u64, bytes: u64);
}

/// Discards everything. Used by tests and non-interactive runs.
pub struct NullMeter;

impl ProgressMeter for NullMeter {
    fn observe(&self, _files: u64, _bytes: u64) {}
}

/// Redraws a single status line on the terminal, matching the "clear and
/// redraw in place" behavior of a status manager that doesn't want to
/// scroll the screen per file scanned.
pub struct TerminalStatus {
    term: Term,
    label: &'static str,
    last: Mutex<(u64, u64)>,
}

impl TerminalStatus {
    pub fn new(label: &'static str) -> Self {
        TerminalStatus {
            term: Term::stderr(),
            label,
            last: Mutex::new((0, 0)),
        }
    }
}

impl ProgressMeter for TerminalStatus {
    fn observe(&self, files: u64, bytes: u64) {
        if !self.term.is_term() {
            return;
        }
        let mut last = self.last.lock().unwrap();
        *last = (files, bytes);
        let line = format!("{}: {} files, {} bytes", self.label, files, bytes);
        let _ = self.term.clear_line();
        let _ = self.term.write_str(&line);
    }
}

impl Drop for TerminalStatus {
    fn drop(&mut self) {
        if self.term.is_term() {
            let _ = self.term.clear_line();
        }
    }
}

/// Logs each distinct `(key)` reason exactly once, so a scan of a tree
/// with a thousand unreadable sockets doesn't spam a thousand warnings.
#[derive(Default)]
pub struct WarnOnce {
    seen: Mutex<std::collections::HashSet<String>>,
}

impl WarnOnce {
    pub fn new() -> Self {
        WarnOnce::default()
    }

    /// Logs `message` via `tracing::warn!` the first time this exact
    /// string is seen; silent on repeats.
    pub fn warn(&self, message: impl Into<String>) {
        let message = message.into();
        let mut seen = self.seen.lock().unwrap();
        if seen.insert(message.clone()) {
            tracing::warn!("{message}");
        }
    }

    /// How many distinct messages have been logged so far. Mainly useful
    /// for tests asserting that a warning fired exactly once.
    pub fn len(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Wraps a [`Read`] and bumps an [`AtomicU64`] by the number of bytes read.
pub struct AtomicCountRead<'a, R> {
    inner: R,
    count: &'a AtomicU64,
}

impl<'a, R: Read> AtomicCountRead<'a, R> {
    pub fn new(inner: R, count: &'a AtomicU64) -> Self {
        Self { inner, count }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Read for AtomicCountRead<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let num_read = self.inner.read(buf)?;
        self.count.fetch_add(num_read as u64, Ordering::Relaxed);
        Ok(num_read)
    }
}

/// Wraps a [`Write`] and bumps an [`AtomicU64`] by the number of bytes written.
pub struct AtomicCountWrite<'a, W> {
    inner: W,
    count: &'a AtomicU64,
}

impl<'a, W: Write> AtomicCountWrite<'a, W> {
    pub fn new(inner: W, count: &'a AtomicU64) -> Self {
        Self { inner, count }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for AtomicCountWrite<'_, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let num_written = self.inner.write(buf)?;
        self.count.fetch_add(num_written as u64, Ordering::Relaxed);
        Ok(num_written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Truncate a path to fit the terminal width, keeping the front and back.
pub fn truncate_path(p: &Utf8Path, term: &Term) -> String {
    let w = term.size().1 as usize;
    if w <= 3 {
        return ".".repeat(w);
    }
    let syms: Vec<_> = p.as_str().graphemes(true).collect();
    if syms.len() > w {
        let back: Vec<_> = p.file_name().unwrap_or(p.as_str()).graphemes(true).collect();
        if back.len() >= w - 3 {
            format!("...{}", back[back.len() - w + 3..].concat())
        } else {
            let front = &syms[..(w - back.len() - 3)];
            format!("{}...{}", front.concat(), back.concat())
        }
    } else {
        p.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warn_once_dedups() {
        let w = WarnOnce::new();
        w.warn("same reason");
        w.warn("same reason");
        w.warn("different reason");
        assert_eq!(w.seen.lock().unwrap().len(), 2);
    }
}
