//! Video format descriptions and well-known encoding identifiers.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A four-character code as used by both RIFF chunks and QuickTime atoms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FourCc(pub [u8; 4]);

impl FourCc {
    pub const fn new(tag: &[u8; 4]) -> Self {
        FourCc(*tag)
    }

    pub fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }

    /// The code as a big-endian integer, as stored on disk by atom headers.
    pub fn as_u32(&self) -> u32 {
        u32::from_be_bytes(self.0)
    }
}

impl fmt::Display for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0 {
            if b.is_ascii_graphic() || b == b' ' {
                write!(f, "{}", b as char)?;
            } else {
                write!(f, "\\x{b:02x}")?;
            }
        }
        Ok(())
    }
}

/// Device-independent bitmap, uncompressed bottom-up rows.
pub const ENC_AVI_DIB: FourCc = FourCc(*b"DIB ");
/// Microsoft run-length encoding.
pub const ENC_AVI_RLE: FourCc = FourCc(*b"RLE ");
/// TechSmith screen capture.
pub const ENC_AVI_TECHSMITH: FourCc = FourCc(*b"tscc");
/// Motion JPEG. No built-in encoder; for tracks fed pre-encoded samples.
pub const ENC_AVI_MJPG: FourCc = FourCc(*b"MJPG");
/// PNG-in-AVI. No built-in encoder; for tracks fed pre-encoded samples.
pub const ENC_AVI_PNG: FourCc = FourCc(*b"png ");
/// QuickTime uncompressed, top-down rows.
pub const ENC_QT_RAW: FourCc = FourCc(*b"raw ");
/// QuickTime animation (run-length) codec.
pub const ENC_QT_ANIMATION: FourCc = FourCc(*b"rle ");
/// QuickTime photo JPEG. No built-in encoder; for tracks fed pre-encoded
/// samples.
pub const ENC_QT_JPEG: FourCc = FourCc(*b"jpeg");
/// QuickTime PNG. No built-in encoder; for tracks fed pre-encoded samples.
pub const ENC_QT_PNG: FourCc = FourCc(*b"png ");

/// Whether samples of a format carry raw pixels or already-encoded bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Representation {
    Pixels,
    Encoded,
}

/// Describes the encoding of a video track or of the frames fed to a codec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoFormat {
    /// Encoding identifier, e.g. `tscc` or `raw `.
    pub encoding: FourCc,

    /// Human-readable compressor name, at most 31 bytes when stored in an
    /// atom-style sample description.
    pub compressor_name: String,

    /// Pixels on the way into an encoder, encoded bytes on the way out.
    pub repr: Representation,

    /// Frame width in pixels.
    pub width: u32,

    /// Frame height in pixels.
    pub height: u32,

    /// Bits per pixel: 4, 8, 16 or 24.
    pub depth: u8,
}

impl VideoFormat {
    pub fn new(encoding: FourCc, width: u32, height: u32, depth: u8) -> Self {
        VideoFormat {
            encoding,
            compressor_name: String::new(),
            repr: Representation::Encoded,
            width,
            height,
            depth,
        }
    }

    pub fn with_compressor_name(mut self, name: &str) -> Self {
        self.compressor_name = name.to_owned();
        self
    }

    pub fn with_repr(mut self, repr: Representation) -> Self {
        self.repr = repr;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fourcc_display_is_ascii() {
        assert_eq!(ENC_AVI_TECHSMITH.to_string(), "tscc");
        assert_eq!(ENC_QT_RAW.to_string(), "raw ");
        assert_eq!(FourCc([0x00, b'd', b'b', 0xff]).to_string(), "\\x00db\\xff");
    }

    #[test]
    fn fourcc_big_endian_value() {
        assert_eq!(FourCc(*b"moov").as_u32(), 0x6d6f_6f76);
    }
}
