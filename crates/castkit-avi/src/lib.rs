//! AVI 1.0 (RIFF) movie writer.
//!
//! Writes video tracks into a `RIFF AVI ` container, encoding frames with
//! the built-in codecs from `castkit-codec` or accepting pre-encoded
//! samples. Files are limited to 4 GiB by the 32-bit RIFF size fields;
//! [`AviWriter::is_data_limit_reached`] reports when a recording should
//! rotate to a fresh file.

mod chunk;
mod error;
mod track;
mod writer;

pub use error::{AviError, Result};
pub use writer::AviWriter;
