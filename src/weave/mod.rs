//! A weave stores every captured revision of a sequence of lines in one
//! interleaved stream, SCCS-style: plain lines mixed with `I`/`D`/`E`
//! control markers that say which revisions an insertion or deletion
//! belongs to.

pub mod delta;
pub mod header;
pub mod parser;
pub mod writer;

pub use delta::build_delta;
pub use header::{Delta, Header};
pub use parser::{drain_rest, parse_until, reconstruct, WeaveEvent, WeaveParser};
pub use writer::{PassthroughWriter, PlainWriter};
