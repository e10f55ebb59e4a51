//! Per-track state for the RIFF writer.

use castkit_media::{FourCc, MediaKind, Palette, VideoCodec, VideoFormat};

use crate::chunk::ChunkId;

/// One recorded sample: a chunk in the `movi` list.
#[derive(Debug, Clone)]
pub(crate) struct Sample {
    /// The chunk tag, e.g. `00dc` or `00pc`.
    pub chunk_type: FourCc,

    /// Duration in media time scale units. Zero for palette changes.
    pub duration: u32,

    /// Position of the chunk header relative to the start of the movie.
    pub offset: u64,

    /// Payload length in bytes, without the chunk header.
    pub length: u64,

    /// Whether the sample is a key frame.
    pub is_sync: bool,
}

pub(crate) struct VideoTrack {
    pub format: VideoFormat,
    pub media_kind: MediaKind,
    pub time_scale: u32,
    pub frame_rate: u32,
    pub sync_interval: u32,
    pub samples: Vec<Sample>,
    pub codec: Option<Box<dyn VideoCodec>>,

    /// The global palette, written into `strf` for depths of 8 or less.
    pub palette: Option<Palette>,

    /// The palette in effect for the most recent frame; a differing frame
    /// palette emits a palette change chunk.
    pub previous_palette: Option<Palette>,

    /// Zero-padded two-digit stream index, the prefix of all chunk tags of
    /// this track.
    pub two_cc: [u8; 2],

    pub strh: Option<ChunkId>,
    pub strf: Option<ChunkId>,
}

impl VideoTrack {
    pub fn new(index: usize, format: VideoFormat, time_scale: u32, frame_rate: u32) -> Self {
        let palette = match format.depth {
            4 => Some(Palette::grayscale(4)),
            8 => Some(Palette::grayscale(8)),
            _ => None,
        };
        VideoTrack {
            format,
            media_kind: MediaKind::Video,
            time_scale,
            frame_rate,
            sync_interval: 0,
            samples: Vec::new(),
            codec: None,
            palette,
            previous_palette: None,
            two_cc: [b'0' + (index / 10 % 10) as u8, b'0' + (index % 10) as u8],
            strh: None,
            strf: None,
        }
    }

    /// The chunk tag for this track with the given two-character suffix.
    pub fn chunk_tag(&self, suffix: &[u8; 2]) -> FourCc {
        FourCc([self.two_cc[0], self.two_cc[1], suffix[0], suffix[1]])
    }

    /// The largest sample payload, used for suggested buffer sizes.
    pub fn largest_sample(&self) -> u64 {
        self.samples.iter().map(|s| s.length).max().unwrap_or(0)
    }
}
