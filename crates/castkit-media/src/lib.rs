//! Shared media types for the castkit container writers.
//!
//! This crate defines the vocabulary the codec and container crates speak:
//! frame buffers, pixel buffers, video formats, and the [`VideoCodec`] and
//! [`MovieWriter`] contracts. It contains no container- or codec-specific
//! logic.

mod codec;
mod error;
mod format;
mod frame;
mod pixels;
mod session;
mod writer;

pub use codec::VideoCodec;
pub use error::MediaError;
pub use format::{FourCc, Representation, VideoFormat};
pub use format::{
    ENC_AVI_DIB, ENC_AVI_MJPG, ENC_AVI_PNG, ENC_AVI_RLE, ENC_AVI_TECHSMITH, ENC_QT_ANIMATION,
    ENC_QT_JPEG, ENC_QT_PNG, ENC_QT_RAW,
};
pub use frame::{FrameBuffer, FrameFlags, FrameRef, Payload, PayloadRef};
pub use pixels::{Palette, PixelBuffer, PixelData};
pub use session::RecordingSession;
pub use writer::MovieWriter;

/// Supported media kinds for container tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Video,
    Audio,
    Midi,
    Text,
}

impl MediaKind {
    /// The RIFF stream-type FourCC for this media kind.
    pub fn avi_fourcc(self) -> FourCc {
        match self {
            MediaKind::Video => FourCc(*b"vids"),
            MediaKind::Audio => FourCc(*b"auds"),
            MediaKind::Midi => FourCc(*b"mids"),
            MediaKind::Text => FourCc(*b"txts"),
        }
    }
}
