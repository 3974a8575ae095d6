//! Thin emitters for weave events: no state beyond the underlying writer.

use std::io::{self, Write};

use super::parser::WeaveEvent;

/// Echoes every event verbatim, markers and all. Used while splicing a
/// new delta into a copy of an existing weave.
pub struct PassthroughWriter<W> {
    inner: W,
}

impl<W: Write> PassthroughWriter<W> {
    pub fn new(inner: W) -> Self {
        PassthroughWriter { inner }
    }

    pub fn write_event(&mut self, event: WeaveEvent<'_>) -> io::Result<()> {
        match event {
            WeaveEvent::Insert(d) => writeln!(self.inner, "\x01I {d}"),
            WeaveEvent::Delete(d) => writeln!(self.inner, "\x01D {d}"),
            WeaveEvent::End(d) => writeln!(self.inner, "\x01E {d}"),
            WeaveEvent::Plain { text, .. } => writeln!(self.inner, "{text}"),
        }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

/// Emits only plain lines with `keep == true`. Used to reconstruct one
/// revision to a temp file.
pub struct PlainWriter<W> {
    inner: W,
}

impl<W: Write> PlainWriter<W> {
    pub fn new(inner: W) -> Self {
        PlainWriter { inner }
    }

    pub fn write_event(&mut self, event: WeaveEvent<'_>) -> io::Result<()> {
        if let WeaveEvent::Plain { text, keep: true } = event {
            writeln!(self.inner, "{text}")?;
        }
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_writer_drops_unkept_and_markers() {
        let mut out = Vec::new();
        let mut w = PlainWriter::new(&mut out);
        w.write_event(WeaveEvent::Insert(2)).unwrap();
        w.write_event(WeaveEvent::Plain { text: "kept", keep: true }).unwrap();
        w.write_event(WeaveEvent::Plain { text: "dropped", keep: false }).unwrap();
        w.write_event(WeaveEvent::End(2)).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "kept\n");
    }

    #[test]
    fn passthrough_writer_echoes_markers() {
        let mut out = Vec::new();
        let mut w = PassthroughWriter::new(&mut out);
        w.write_event(WeaveEvent::Insert(2)).unwrap();
        w.write_event(WeaveEvent::Plain { text: "x", keep: true }).unwrap();
        w.write_event(WeaveEvent::End(2)).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "\x01I 2\nx\n\x01E 2\n");
    }
}
