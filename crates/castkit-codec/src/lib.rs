//! Built-in lossless video encoders.
//!
//! Four encoders cover the formats the container writers produce out of the
//! box: uncompressed bottom-up bitmaps (`DIB `), Microsoft run-length
//! encoding (`RLE `), TechSmith screen capture (`tscc`) and uncompressed
//! top-down QuickTime rasters (`raw `). Tracks with other encodings can
//! still be written from pre-encoded samples.

mod dib;
mod msrle;
mod raw;
mod rle;
mod techsmith;

pub use dib::DibCodec;
pub use msrle::RunLengthCodec;
pub use raw::RawCodec;
pub use techsmith::TechSmithCodec;

use castkit_media::{
    FourCc, VideoCodec, ENC_AVI_DIB, ENC_AVI_RLE, ENC_AVI_TECHSMITH, ENC_QT_RAW,
};

/// The built-in encoder for a RIFF video stream, if there is one.
pub fn codec_for_avi(encoding: FourCc) -> Option<Box<dyn VideoCodec>> {
    match encoding {
        ENC_AVI_DIB => Some(Box::new(DibCodec::new())),
        ENC_AVI_RLE => Some(Box::new(RunLengthCodec::new())),
        ENC_AVI_TECHSMITH => Some(Box::new(TechSmithCodec::new())),
        _ => None,
    }
}

/// The built-in encoder for an atom-style video track, if there is one.
pub fn codec_for_quicktime(encoding: FourCc) -> Option<Box<dyn VideoCodec>> {
    match encoding {
        ENC_QT_RAW => Some(Box::new(RawCodec::new())),
        _ => None,
    }
}
