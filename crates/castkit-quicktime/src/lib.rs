//! QuickTime (.mov) movie writer.
//!
//! Streams video and sound samples into an `mdat` atom and writes the
//! complete `moov` header when the movie is finished. Frames can be
//! encoded on the way in with the built-in codecs from `castkit-codec`,
//! and a finished movie can be copied into a web-optimized layout with
//! the header ahead of the media data.

mod atom;
mod error;
mod track;
mod writer;

pub use error::{QuickTimeError, Result};
pub use writer::QuickTimeWriter;
