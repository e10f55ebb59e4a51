//! Per-track state and sample table derivation for the atom writer.

use castkit_media::{FourCc, VideoCodec, VideoFormat};

/// One chunk of equally sized, equally timed samples in the media data.
///
/// Every write call produces one chunk; the sample tables are run-length
/// derived from the chunk list when the movie is finished.
#[derive(Debug, Clone)]
pub(crate) struct SampleChunk {
    /// Offset of the first sample, relative to the movie start.
    pub first_offset: u64,
    pub sample_count: u32,
    /// Duration of each sample in media time scale units.
    pub sample_duration: u64,
    /// Length of each sample in bytes.
    pub sample_length: u64,
    pub is_sync: bool,
}

pub(crate) enum Media {
    Video {
        format: VideoFormat,
        codec: Option<Box<dyn VideoCodec>>,
        /// 0 never forces a key frame, 1 forces every frame, n every n-th.
        sync_interval: u32,
    },
    Sound {
        sample_rate: f64,
        channels: u16,
        sample_size: u16,
        /// -1 for uncompressed sound, -2 for variable bit rate.
        compression_id: i16,
        samples_per_packet: u32,
        bytes_per_packet: u32,
        bytes_per_frame: u32,
        bytes_per_sample: u32,
    },
}

pub(crate) struct Track {
    pub compression: FourCc,
    pub time_scale: u32,
    pub media: Media,
    pub chunks: Vec<SampleChunk>,
}

impl Track {
    pub fn sample_count(&self) -> u64 {
        self.chunks.iter().map(|c| c.sample_count as u64).sum()
    }

    /// Total duration in media time scale units.
    pub fn media_duration(&self) -> u64 {
        self.chunks
            .iter()
            .map(|c| c.sample_count as u64 * c.sample_duration)
            .sum()
    }

    /// Total duration converted to movie time scale units.
    pub fn movie_duration(&self, movie_time_scale: u32) -> u64 {
        self.media_duration() * movie_time_scale as u64 / self.time_scale as u64
    }
}

/// Decoding-time-to-sample runs: (sample count, duration) pairs.
pub(crate) fn time_to_sample_runs(chunks: &[SampleChunk]) -> Vec<(u32, u32)> {
    let mut runs: Vec<(u32, u32)> = Vec::new();
    for c in chunks {
        let duration = c.sample_duration as u32;
        match runs.last_mut() {
            Some((count, d)) if *d == duration => *count += c.sample_count,
            _ => runs.push((c.sample_count, duration)),
        }
    }
    runs
}

/// Sample-to-chunk runs: (first chunk, samples per chunk), 1-based.
pub(crate) fn sample_to_chunk_runs(chunks: &[SampleChunk]) -> Vec<(u32, u32)> {
    let mut runs: Vec<(u32, u32)> = Vec::new();
    for (i, c) in chunks.iter().enumerate() {
        match runs.last() {
            Some((_, per)) if *per == c.sample_count => {}
            _ => runs.push((i as u32 + 1, c.sample_count)),
        }
    }
    runs
}

/// The common sample size, or `None` when sizes differ.
pub(crate) fn uniform_sample_size(chunks: &[SampleChunk]) -> Option<u64> {
    let mut size = None;
    for c in chunks {
        match size {
            None => size = Some(c.sample_length),
            Some(s) if s == c.sample_length => {}
            Some(_) => return None,
        }
    }
    Some(size.unwrap_or(0))
}

/// 1-based numbers of the sync samples, or `None` when every sample is
/// sync and the table can be omitted.
pub(crate) fn sync_sample_numbers(chunks: &[SampleChunk]) -> Option<Vec<u32>> {
    if chunks.iter().all(|c| c.is_sync) {
        return None;
    }
    let mut numbers = Vec::new();
    let mut n = 1u32;
    for c in chunks {
        for _ in 0..c.sample_count {
            if c.is_sync {
                numbers.push(n);
            }
            n += 1;
        }
    }
    Some(numbers)
}
