//! The writer contract shared by the container back-ends.

use crate::pixels::PixelBuffer;

/// A sink that turns time-ordered samples into a finished movie file.
///
/// Writers move through a small life cycle: tracks are added while the
/// writer is idle, the first write freezes the track list and emits the
/// file prolog, `finish` emits the epilog, and `close` releases the sink.
/// Both `finish` and `close` are idempotent; any write after `close` is an
/// error.
pub trait MovieWriter {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Encodes `pixels` with the track's codec and appends the result.
    ///
    /// `duration` is in the track's media time scale. Writers for
    /// constant-rate containers ignore it.
    fn write_frame(
        &mut self,
        track: usize,
        pixels: &PixelBuffer,
        duration: u64,
    ) -> Result<(), Self::Error>;

    /// Appends one already-encoded sample.
    fn write_sample(
        &mut self,
        track: usize,
        data: &[u8],
        duration: u64,
        is_sync: bool,
    ) -> Result<(), Self::Error>;

    /// Appends `sample_count` already-encoded samples of equal size and
    /// duration, packed back to back in `data`.
    fn write_samples(
        &mut self,
        track: usize,
        sample_count: u32,
        data: &[u8],
        sample_duration: u64,
        is_sync: bool,
    ) -> Result<(), Self::Error>;

    /// Whether samples of varying duration are representable.
    fn is_vfr_supported(&self) -> bool;

    /// True once the file is close enough to a format limit that the caller
    /// should rotate to a fresh writer.
    fn is_data_limit_reached(&mut self) -> bool;

    /// Frames silently dropped because the codec could not handle them.
    fn dropped_frames(&self) -> u64;

    /// Writes the file epilog. The file is valid once this returns.
    fn finish(&mut self) -> Result<(), Self::Error>;

    /// Finishes if needed and releases the sink.
    fn close(&mut self) -> Result<(), Self::Error>;
}
