//! Error types for the RIFF writer.

use castkit_media::FourCc;

#[derive(Debug, thiserror::Error)]
pub enum AviError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("chunk {tag} exceeds the 4 GiB RIFF size limit ({size} bytes)")]
    CapacityExceeded { tag: FourCc, size: u64 },

    #[error("no track with index {0}")]
    InvalidTrack(usize),

    #[error("tracks cannot be added after writing has started")]
    TracksFrozen,

    #[error("writer is closed")]
    Closed,

    #[error("writer is already finished")]
    Finished,

    #[error("no built-in encoder for format {0}")]
    UnsupportedFormat(FourCc),

    #[error(
        "frame dimensions {width}x{height} differ from the track dimensions \
         {track_width}x{track_height}"
    )]
    DimensionMismatch {
        width: u32,
        height: u32,
        track_width: u32,
        track_height: u32,
    },

    #[error("{0}")]
    InvalidArgument(&'static str),
}

pub type Result<T> = std::result::Result<T, AviError>;
