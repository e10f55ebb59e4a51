//! The AVI 1.0 movie writer.
//!
//! Produces a `RIFF AVI ` file with one `LIST hdrl` header, a `LIST movi`
//! holding the sample chunks and an `idx1` index. Header chunks are written
//! zero-filled up front and patched when the movie is finished, so samples
//! stream straight to the sink.

use std::io::{Seek, SeekFrom, Write};

use byteorder::{LittleEndian, WriteBytesExt};
use tracing::{debug, warn};

use castkit_codec::codec_for_avi;
use castkit_media::{
    FourCc, FrameBuffer, FrameFlags, FrameRef, MovieWriter, Palette, PixelBuffer,
    Representation, VideoFormat, ENC_AVI_DIB, ENC_AVI_RLE,
};

use crate::chunk::{ChunkArena, ChunkId};
use crate::error::{AviError, Result};
use crate::track::{Sample, VideoTrack};

/// RIFF sizes are 32 bits; positions beyond this cannot be indexed.
const MAX_FILE_SIZE: u64 = 1 << 32;

/// Rotation threshold, comfortably below the hard limit.
const DATA_LIMIT: u64 = (1.8 * 1024.0 * 1024.0 * 1024.0) as u64;

const KEYFRAME_FLAG: u32 = 0x10;
const NO_TIME_FLAG: u32 = 0x100;
const PALCHANGE_FLAG: u32 = 0x0001_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Started,
    Finished,
    Closed,
}

/// Writes an AVI 1.0 movie to a seekable sink.
pub struct AviWriter<W: Write + Seek> {
    out: W,
    state: State,
    arena: ChunkArena,
    root: Option<ChunkId>,
    avih: Option<ChunkId>,
    movi: Option<ChunkId>,
    tracks: Vec<VideoTrack>,
    dropped: u64,
}

impl<W: Write + Seek> AviWriter<W> {
    /// Creates a writer; the movie starts at the sink's current position.
    pub fn new(mut out: W) -> Result<Self> {
        let base = out.stream_position()?;
        Ok(AviWriter {
            out,
            state: State::Idle,
            arena: ChunkArena::new(base),
            root: None,
            avih: None,
            movi: None,
            tracks: Vec::new(),
            dropped: 0,
        })
    }

    /// Adds a video track and returns its index.
    ///
    /// `frame_rate` over `time_scale` is the frames per second; every sample
    /// of the track has the same duration. `sync_interval` of 0 disables
    /// forced key frames, 1 makes every frame a key frame, n forces one
    /// every n frames.
    pub fn add_video_track(
        &mut self,
        encoding: FourCc,
        time_scale: u32,
        frame_rate: u32,
        width: u32,
        height: u32,
        depth: u8,
        sync_interval: u32,
    ) -> Result<usize> {
        self.ensure_open()?;
        if self.state != State::Idle {
            return Err(AviError::TracksFrozen);
        }
        if width == 0 || height == 0 {
            return Err(AviError::InvalidArgument("width and height must be at least 1"));
        }
        if time_scale == 0 || frame_rate == 0 {
            return Err(AviError::InvalidArgument(
                "time scale and frame rate must be at least 1",
            ));
        }

        let format = VideoFormat::new(encoding, width, height, depth);
        let mut track = VideoTrack::new(self.tracks.len(), format.clone(), time_scale, frame_rate);
        track.sync_interval = sync_interval;
        if let Some(mut codec) = codec_for_avi(encoding) {
            codec.negotiate_input(&format.clone().with_repr(Representation::Pixels));
            codec.negotiate_output(&format);
            track.codec = Some(codec);
        }
        self.tracks.push(track);
        Ok(self.tracks.len() - 1)
    }

    /// Replaces the global palette of an indexed track. Takes effect for
    /// the `strf` header and as the baseline for palette change chunks.
    pub fn set_palette(&mut self, track: usize, palette: Palette) -> Result<()> {
        let t = self.track_mut(track)?;
        t.palette = Some(palette);
        Ok(())
    }

    pub fn dropped_frames(&self) -> u64 {
        self.dropped
    }

    /// True once the file exceeds 1.8 GiB, leaving headroom below the hard
    /// 4 GiB RIFF limit. Callers should rotate to a fresh file.
    pub fn is_data_limit_reached(&mut self) -> bool {
        self.arena
            .position(&mut self.out)
            .map(|p| p > DATA_LIMIT)
            .unwrap_or(true)
    }

    fn track_mut(&mut self, index: usize) -> Result<&mut VideoTrack> {
        self.tracks
            .get_mut(index)
            .ok_or(AviError::InvalidTrack(index))
    }

    fn ensure_open(&self) -> Result<()> {
        match self.state {
            State::Closed => Err(AviError::Closed),
            _ => Ok(()),
        }
    }

    fn ensure_writable(&self) -> Result<()> {
        match self.state {
            State::Closed => Err(AviError::Closed),
            State::Finished => Err(AviError::Finished),
            _ => Ok(()),
        }
    }

    fn ensure_started(&mut self) -> Result<()> {
        if self.state == State::Idle {
            self.write_prolog()?;
            self.state = State::Started;
        }
        Ok(())
    }

    /// Opens the chunk skeleton: headers zero-filled, `movi` list open.
    fn write_prolog(&mut self) -> Result<()> {
        let w = &mut self.out;
        let root = self
            .arena
            .open_composite(w, None, FourCc(*b"RIFF"), FourCc(*b"AVI "))?;
        let hdrl = self
            .arena
            .open_composite(w, Some(root), FourCc(*b"LIST"), FourCc(*b"hdrl"))?;

        let avih = self.arena.open_fixed(w, Some(hdrl), FourCc(*b"avih"), 56)?;

        for track in &mut self.tracks {
            let strl = self
                .arena
                .open_composite(w, Some(hdrl), FourCc(*b"LIST"), FourCc(*b"strl"))?;

            let strh = self.arena.open_fixed(w, Some(strl), FourCc(*b"strh"), 56)?;
            track.strh = Some(strh);

            let strf_size = 40 + track.palette.as_ref().map_or(0, |p| p.len() as u64 * 4);
            let strf = self
                .arena
                .open_fixed(w, Some(strl), FourCc(*b"strf"), strf_size)?;
            track.strf = Some(strf);
        }

        let movi = self
            .arena
            .open_composite(w, Some(root), FourCc(*b"LIST"), FourCc(*b"movi"))?;

        self.root = Some(root);
        self.avih = Some(avih);
        self.movi = Some(movi);
        debug!(tracks = self.tracks.len(), "opened AVI chunk skeleton");
        Ok(())
    }

    /// Emits a palette change chunk when the frame palette differs from the
    /// one currently in effect.
    fn write_palette_change(&mut self, track: usize, frame_palette: &Palette) -> Result<()> {
        let movi = self.movi.expect("started");
        let t = &mut self.tracks[track];
        if t.previous_palette.is_none() {
            t.previous_palette = t.palette.clone();
        }
        if t.previous_palette.as_ref() == Some(frame_palette) {
            return Ok(());
        }
        t.previous_palette = Some(frame_palette.clone());

        let tag = t.chunk_tag(b"pc");
        let chunk = self.arena.open_data(&mut self.out, Some(movi), tag)?;
        let offset = self.arena.offset(chunk);

        let w = &mut self.out;
        w.write_u8(0)?; // bFirstEntry
        w.write_u8(frame_palette.len() as u8)?; // bNumEntries, 0 means 256
        w.write_u16::<LittleEndian>(0)?; // wFlags
        for [r, g, b] in frame_palette.entries() {
            w.write_all(&[*r, *g, *b, 0])?;
        }
        self.arena.finish(w, chunk)?;

        let length = self.arena.position(&mut self.out)? - offset - 8;
        self.tracks[track].samples.push(Sample {
            chunk_type: tag,
            duration: 0,
            offset,
            length,
            is_sync: false,
        });
        Ok(())
    }

    /// Encodes `pixels` with the track's codec and appends the result.
    ///
    /// `duration` is ignored, all AVI frames last one frame interval. A
    /// frame the codec cannot handle is dropped and counted, not an error.
    pub fn write_frame(&mut self, track: usize, pixels: &PixelBuffer, _duration: u64) -> Result<()> {
        self.ensure_writable()?;
        self.ensure_started()?;
        self.track_mut(track)?;

        let t = &self.tracks[track];
        if t.codec.is_none() {
            return Err(AviError::UnsupportedFormat(t.format.encoding));
        }
        if t.format.width != pixels.width || t.format.height != pixels.height {
            return Err(AviError::DimensionMismatch {
                width: pixels.width,
                height: pixels.height,
                track_width: t.format.width,
                track_height: t.format.height,
            });
        }

        if self.tracks[track].format.depth <= 8 {
            if let Some(frame_palette) = pixels.palette.clone() {
                self.write_palette_change(track, &frame_palette)?;
            }
        }

        let t = &mut self.tracks[track];
        let is_sync = t.sync_interval != 0 && t.samples.len() as u32 % t.sync_interval == 0;
        let mut output = FrameBuffer::default();
        let flags = FrameFlags {
            discard: false,
            key_frame: is_sync,
        };
        match t.codec.as_mut() {
            Some(codec) => codec.transform(FrameRef::pixels(pixels, flags), &mut output),
            None => return Err(AviError::UnsupportedFormat(t.format.encoding)),
        }
        if output.flags.discard {
            self.dropped += 1;
            warn!(track, "codec discarded frame");
            return Ok(());
        }
        let is_sync = output.flags.key_frame;

        let tag = self.tracks[track].chunk_tag(if is_sync { b"db" } else { b"dc" });
        let duration = self.tracks[track].frame_rate;
        self.append_chunk(track, tag, output.encoded_bytes(), duration, is_sync)
    }

    /// Appends one already-encoded sample. `duration` is ignored, AVI
    /// frames all last one frame interval.
    pub fn write_sample(
        &mut self,
        track: usize,
        data: &[u8],
        _duration: u64,
        is_sync: bool,
    ) -> Result<()> {
        self.ensure_writable()?;
        self.ensure_started()?;
        let t = self.track_mut(track)?;
        let suffix = if t.format.encoding == ENC_AVI_DIB {
            b"db"
        } else {
            b"dc"
        };
        let tag = t.chunk_tag(suffix);
        let duration = t.frame_rate;
        self.append_chunk(track, tag, data, duration, is_sync)
    }

    /// Appends several equally sized already-encoded samples.
    pub fn write_samples(
        &mut self,
        track: usize,
        sample_count: u32,
        data: &[u8],
        sample_duration: u64,
        is_sync: bool,
    ) -> Result<()> {
        if sample_count == 0 {
            return Ok(());
        }
        if data.len() % sample_count as usize != 0 {
            return Err(AviError::InvalidArgument(
                "data length must be divisible by the sample count",
            ));
        }
        let size = data.len() / sample_count as usize;
        for piece in data.chunks(size) {
            self.write_sample(track, piece, sample_duration, is_sync)?;
        }
        Ok(())
    }

    fn append_chunk(
        &mut self,
        track: usize,
        tag: FourCc,
        data: &[u8],
        duration: u32,
        is_sync: bool,
    ) -> Result<()> {
        let movi = self.movi.expect("started");
        let chunk = self.arena.open_data(&mut self.out, Some(movi), tag)?;
        let offset = self.arena.offset(chunk);
        self.out.write_all(data)?;
        self.arena.finish(&mut self.out, chunk)?;
        let length = self.arena.position(&mut self.out)? - offset - 8;

        self.tracks[track].samples.push(Sample {
            chunk_type: tag,
            duration,
            offset,
            length,
            is_sync,
        });

        let position = self.arena.position(&mut self.out)?;
        if position > MAX_FILE_SIZE {
            return Err(AviError::CapacityExceeded {
                tag: FourCc(*b"RIFF"),
                size: position,
            });
        }
        Ok(())
    }

    /// Writes the index and patches the headers. Idempotent.
    pub fn finish(&mut self) -> Result<()> {
        self.ensure_open()?;
        if self.state == State::Finished {
            return Ok(());
        }
        self.ensure_started()?;

        let movi = self.movi.expect("started");
        let root = self.root.expect("started");
        self.arena.finish(&mut self.out, movi)?;
        self.write_index(root, movi)?;
        self.fill_avih()?;
        self.fill_stream_headers()?;
        self.out.seek(SeekFrom::End(0))?;
        self.arena.finish(&mut self.out, root)?;
        self.out.flush()?;
        self.state = State::Finished;
        debug!("finished AVI movie");
        Ok(())
    }

    /// Finishes if necessary and flushes the sink.
    pub fn close(&mut self) -> Result<()> {
        if self.state == State::Started || self.state == State::Idle {
            self.finish()?;
        }
        if self.state != State::Closed {
            self.out.flush()?;
            self.state = State::Closed;
        }
        Ok(())
    }

    /// Consumes the writer and returns the sink.
    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_index(&mut self, root: ChunkId, movi: ChunkId) -> Result<()> {
        let idx1 = self.arena.open_data(&mut self.out, Some(root), FourCc(*b"idx1"))?;

        // Offsets are relative to the start of the movi list data.
        let movi_list_offset = self.arena.offset(movi) + 8;
        for track in &self.tracks {
            for sample in &track.samples {
                let mut flags = 0u32;
                if sample.chunk_type.0[2..] == *b"pc" {
                    flags |= NO_TIME_FLAG;
                }
                if sample.is_sync {
                    flags |= KEYFRAME_FLAG;
                }
                self.out.write_all(&sample.chunk_type.0)?;
                self.out.write_u32::<LittleEndian>(flags)?;
                self.out
                    .write_u32::<LittleEndian>((sample.offset - movi_list_offset) as u32)?;
                self.out.write_u32::<LittleEndian>(sample.length as u32)?;
            }
        }
        self.arena.finish(&mut self.out, idx1)?;
        Ok(())
    }

    fn fill_avih(&mut self) -> Result<()> {
        let avih = self.avih.expect("started");
        self.arena.seek_to_data(&mut self.out, avih)?;
        let w = &mut self.out;

        let micro_sec_per_frame = match self.tracks.first() {
            Some(t) => 1_000_000u64 * t.time_scale as u64 / t.frame_rate as u64,
            None => 0,
        };
        let total_frames: u64 = self.tracks.iter().map(|t| t.samples.len() as u64).sum();
        let largest = self
            .tracks
            .iter()
            .map(|t| t.largest_sample())
            .max()
            .unwrap_or(0);
        let (width, height) = match self.tracks.first() {
            Some(t) => (t.format.width, t.format.height),
            None => (0, 0),
        };

        w.write_u32::<LittleEndian>(micro_sec_per_frame as u32)?;
        w.write_u32::<LittleEndian>(0)?; // dwMaxBytesPerSec
        w.write_u32::<LittleEndian>(0)?; // dwPaddingGranularity
        w.write_u32::<LittleEndian>(0x10 | 0x20)?; // has index, must use index
        w.write_u32::<LittleEndian>(total_frames as u32)?;
        w.write_u32::<LittleEndian>(0)?; // dwInitialFrames
        w.write_u32::<LittleEndian>(self.tracks.len() as u32)?;
        w.write_u32::<LittleEndian>(largest as u32)?;
        w.write_u32::<LittleEndian>(width)?;
        w.write_u32::<LittleEndian>(height)?;
        w.write_all(&[0u8; 16])?; // dwReserved
        self.arena.seek_to_end(&mut self.out, avih)?;
        Ok(())
    }

    fn fill_stream_headers(&mut self) -> Result<()> {
        for i in 0..self.tracks.len() {
            let strh = self.tracks[i].strh.expect("started");
            let strf = self.tracks[i].strf.expect("started");

            self.arena.seek_to_data(&mut self.out, strh)?;
            {
                let t = &self.tracks[i];
                let w = &mut self.out;
                w.write_all(&t.media_kind.avi_fourcc().0)?; // fccType
                w.write_all(&t.format.encoding.0)?; // fccHandler
                if t.format.depth <= 8 {
                    w.write_u32::<LittleEndian>(PALCHANGE_FLAG)?;
                } else {
                    w.write_u32::<LittleEndian>(0)?;
                }
                w.write_u16::<LittleEndian>(0)?; // wPriority
                w.write_u16::<LittleEndian>(0)?; // wLanguage
                w.write_u32::<LittleEndian>(0)?; // dwInitialFrames
                w.write_u32::<LittleEndian>(t.time_scale)?; // dwScale
                w.write_u32::<LittleEndian>(t.frame_rate)?; // dwRate
                w.write_u32::<LittleEndian>(0)?; // dwStart
                w.write_u32::<LittleEndian>(t.samples.len() as u32)?; // dwLength
                w.write_u32::<LittleEndian>(t.largest_sample() as u32)?;
                w.write_i32::<LittleEndian>(-1)?; // dwQuality
                w.write_u32::<LittleEndian>(0)?; // dwSampleSize
                w.write_u16::<LittleEndian>(0)?; // rcFrame.left
                w.write_u16::<LittleEndian>(0)?; // rcFrame.top
                w.write_u16::<LittleEndian>(t.format.width as u16)?;
                w.write_u16::<LittleEndian>(t.format.height as u16)?;
            }
            self.arena.seek_to_end(&mut self.out, strh)?;

            self.arena.seek_to_data(&mut self.out, strf)?;
            {
                let t = &self.tracks[i];
                let fmt = &t.format;
                let w = &mut self.out;
                w.write_u32::<LittleEndian>(40)?; // biSize
                w.write_i32::<LittleEndian>(fmt.width as i32)?;
                w.write_i32::<LittleEndian>(fmt.height as i32)?;
                w.write_u16::<LittleEndian>(1)?; // biPlanes
                w.write_u16::<LittleEndian>(fmt.depth as u16)?;
                if fmt.encoding == ENC_AVI_DIB {
                    w.write_u32::<LittleEndian>(0)?; // BI_RGB
                } else if fmt.encoding == ENC_AVI_RLE {
                    match fmt.depth {
                        8 => w.write_u32::<LittleEndian>(1)?, // BI_RLE8
                        4 => w.write_u32::<LittleEndian>(2)?, // BI_RLE4
                        _ => return Err(AviError::UnsupportedFormat(fmt.encoding)),
                    }
                } else {
                    w.write_all(&fmt.encoding.0)?;
                }
                if fmt.encoding == ENC_AVI_DIB {
                    w.write_u32::<LittleEndian>(0)?; // biSizeImage
                } else if fmt.depth == 4 {
                    w.write_u32::<LittleEndian>(fmt.width * fmt.height / 2)?;
                } else {
                    let bytes_per_pixel = 1u32.max(fmt.depth as u32 / 8);
                    w.write_u32::<LittleEndian>(fmt.width * fmt.height * bytes_per_pixel)?;
                }
                w.write_i32::<LittleEndian>(0)?; // biXPelsPerMeter
                w.write_i32::<LittleEndian>(0)?; // biYPelsPerMeter
                w.write_u32::<LittleEndian>(t.palette.as_ref().map_or(0, |p| p.len() as u32))?;
                w.write_u32::<LittleEndian>(0)?; // biClrImportant
                if let Some(palette) = &t.palette {
                    for [r, g, b] in palette.entries() {
                        w.write_all(&[*b, *g, *r, 0])?;
                    }
                }
            }
            self.arena.seek_to_end(&mut self.out, strf)?;
        }
        Ok(())
    }
}

impl<W: Write + Seek> MovieWriter for AviWriter<W> {
    type Error = AviError;

    fn write_frame(&mut self, track: usize, pixels: &PixelBuffer, duration: u64) -> Result<()> {
        AviWriter::write_frame(self, track, pixels, duration)
    }

    fn write_sample(&mut self, track: usize, data: &[u8], duration: u64, is_sync: bool) -> Result<()> {
        AviWriter::write_sample(self, track, data, duration, is_sync)
    }

    fn write_samples(
        &mut self,
        track: usize,
        sample_count: u32,
        data: &[u8],
        sample_duration: u64,
        is_sync: bool,
    ) -> Result<()> {
        AviWriter::write_samples(self, track, sample_count, data, sample_duration, is_sync)
    }

    /// AVI has a single frame duration per track.
    fn is_vfr_supported(&self) -> bool {
        false
    }

    fn is_data_limit_reached(&mut self) -> bool {
        AviWriter::is_data_limit_reached(self)
    }

    fn dropped_frames(&self) -> u64 {
        self.dropped
    }

    fn finish(&mut self) -> Result<()> {
        AviWriter::finish(self)
    }

    fn close(&mut self) -> Result<()> {
        AviWriter::close(self)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::io::{self, Cursor};
    use std::rc::Rc;

    use castkit_media::{PixelData, ENC_AVI_TECHSMITH};

    use super::*;

    fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
        haystack.windows(needle.len()).position(|w| w == needle)
    }

    fn count(haystack: &[u8], needle: &[u8]) -> usize {
        haystack.windows(needle.len()).filter(|w| *w == needle).count()
    }

    fn u32_at(bytes: &[u8], pos: usize) -> u32 {
        u32::from_le_bytes(bytes[pos..pos + 4].try_into().unwrap())
    }

    fn rle_writer(frames: &[Vec<u8>]) -> Vec<u8> {
        let mut writer = AviWriter::new(Cursor::new(Vec::new())).unwrap();
        writer.add_video_track(ENC_AVI_RLE, 1, 30, 4, 2, 8, 0).unwrap();
        for frame in frames {
            let pixels = PixelBuffer::packed(4, 2, PixelData::Indexed8(frame.clone()));
            writer.write_frame(0, &pixels, 1).unwrap();
        }
        writer.finish().unwrap();
        writer.into_inner().into_inner()
    }

    #[test]
    fn movie_has_riff_skeleton_and_index() {
        let bytes = rle_writer(&[vec![1; 8], vec![1; 8]]);

        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(u32_at(&bytes, 4) as usize, bytes.len() - 8);
        assert_eq!(&bytes[8..12], b"AVI ");
        assert!(find(&bytes, b"LIST").is_some());
        assert!(find(&bytes, b"hdrl").is_some());
        assert!(find(&bytes, b"movi").is_some());
        assert!(find(&bytes, b"idx1").is_some());

        // First frame is a key frame chunk, second a delta chunk.
        assert_eq!(count(&bytes, b"00db"), 2); // movi chunk + index entry
        assert_eq!(count(&bytes, b"00dc"), 2);
    }

    #[test]
    fn index_entries_reference_chunks_relative_to_the_movi_list() {
        let bytes = rle_writer(&[vec![1; 8], vec![2; 8]]);

        let movi = find(&bytes, b"movi").unwrap();
        let idx1 = find(&bytes, b"idx1").unwrap();
        let entries = u32_at(&bytes, idx1 + 4) as usize / 16;
        assert_eq!(entries, 2);

        let first = idx1 + 8;
        assert_eq!(&bytes[first..first + 4], b"00db");
        assert_eq!(u32_at(&bytes, first + 4), 0x10); // key frame flag

        let second = first + 16;
        assert_eq!(&bytes[second..second + 4], b"00dc");
        assert_eq!(u32_at(&bytes, second + 4), 0);

        // The offset points at the chunk header, relative to the position
        // of the "movi" type tag.
        let first_offset = u32_at(&bytes, first + 8) as usize;
        let chunk_pos = movi + first_offset;
        assert_eq!(&bytes[chunk_pos..chunk_pos + 4], b"00db");
        let first_size = u32_at(&bytes, first + 12);
        assert_eq!(u32_at(&bytes, chunk_pos + 4), first_size);
    }

    #[test]
    fn header_fields_describe_the_track() {
        let bytes = rle_writer(&[vec![3; 8]]);

        let avih = find(&bytes, b"avih").unwrap() + 8;
        assert_eq!(u32_at(&bytes, avih), 1_000_000 / 30); // micro sec per frame
        assert_eq!(u32_at(&bytes, avih + 12), 0x30); // has index, must use index
        assert_eq!(u32_at(&bytes, avih + 16), 1); // total frames
        assert_eq!(u32_at(&bytes, avih + 24), 1); // streams
        assert_eq!(u32_at(&bytes, avih + 32), 4); // width
        assert_eq!(u32_at(&bytes, avih + 36), 2); // height

        let strh = find(&bytes, b"strh").unwrap() + 8;
        assert_eq!(&bytes[strh..strh + 4], b"vids");
        assert_eq!(&bytes[strh + 4..strh + 8], b"RLE ");
        assert_eq!(u32_at(&bytes, strh + 8), 0x0001_0000); // palette changes
        assert_eq!(u32_at(&bytes, strh + 20), 1); // dwScale
        assert_eq!(u32_at(&bytes, strh + 24), 30); // dwRate
        assert_eq!(u32_at(&bytes, strh + 32), 1); // dwLength

        // BITMAPINFOHEADER with a 256-entry palette appended.
        let strf = find(&bytes, b"strf").unwrap();
        assert_eq!(u32_at(&bytes, strf + 4), 40 + 256 * 4);
        assert_eq!(u32_at(&bytes, strf + 8), 40); // biSize
        assert_eq!(u32_at(&bytes, strf + 24), 1); // BI_RLE8
        assert_eq!(u32_at(&bytes, strf + 40), 256); // biClrUsed
        // First palette entry is black, stored b, g, r, 0.
        assert_eq!(&bytes[strf + 48..strf + 52], [0, 0, 0, 0]);
        // Entry 255 of the grayscale ramp is white.
        assert_eq!(&bytes[strf + 48 + 255 * 4..strf + 48 + 256 * 4], [255, 255, 255, 0]);
    }

    #[test]
    fn differing_frame_palette_emits_one_palette_change_chunk() {
        let mut writer = AviWriter::new(Cursor::new(Vec::new())).unwrap();
        writer.add_video_track(ENC_AVI_RLE, 1, 30, 4, 1, 8, 0).unwrap();

        let first = PixelBuffer::packed(4, 1, PixelData::Indexed8(vec![0; 4]))
            .with_palette(Palette::grayscale(8));
        writer.write_frame(0, &first, 1).unwrap();

        let red = Palette::new((0..256).map(|i| [i as u8, 0, 0]).collect());
        let second = PixelBuffer::packed(4, 1, PixelData::Indexed8(vec![1; 4]))
            .with_palette(red.clone());
        writer.write_frame(0, &second, 1).unwrap();

        // Same palette again, no further change chunk.
        let third = PixelBuffer::packed(4, 1, PixelData::Indexed8(vec![2; 4]))
            .with_palette(red);
        writer.write_frame(0, &third, 1).unwrap();

        writer.finish().unwrap();
        let bytes = writer.into_inner().into_inner();

        // One chunk in movi plus one index entry.
        assert_eq!(count(&bytes, b"00pc"), 2);

        let pc = find(&bytes, b"00pc").unwrap();
        assert_eq!(u32_at(&bytes, pc + 4), 4 + 256 * 4); // header + entries
        assert_eq!(bytes[pc + 8], 0); // bFirstEntry
        assert_eq!(bytes[pc + 9], 0); // bNumEntries, 0 means 256

        // The index entry carries the no-time flag and no key frame flag.
        let idx1 = find(&bytes, b"idx1").unwrap();
        let mut entry = idx1 + 8;
        while &bytes[entry..entry + 4] != b"00pc" {
            entry += 16;
        }
        assert_eq!(u32_at(&bytes, entry + 4), 0x100);
    }

    #[test]
    fn indexed_chunks_are_monotonic_and_non_overlapping() {
        let mut writer = AviWriter::new(Cursor::new(Vec::new())).unwrap();
        writer.add_video_track(ENC_AVI_RLE, 1, 30, 4, 1, 8, 0).unwrap();
        // Odd and even payloads, so some chunks carry a pad byte.
        for data in [&b"abc"[..], &b"de"[..], &b"fghij"[..], &b"k"[..]] {
            writer.write_sample(0, data, 1, true).unwrap();
        }
        writer.finish().unwrap();
        let bytes = writer.into_inner().into_inner();

        let movi = find(&bytes, b"movi").unwrap();
        let idx1 = find(&bytes, b"idx1").unwrap();
        let entries = u32_at(&bytes, idx1 + 4) as usize / 16;
        assert_eq!(entries, 4);

        let samples: [&[u8]; 4] = [b"abc", b"de", b"fghij", b"k"];
        let mut end = 4; // first chunk follows the movi type tag
        for (i, sample) in samples.iter().enumerate() {
            let entry = idx1 + 8 + i * 16;
            let offset = u32_at(&bytes, entry + 8) as usize;
            let length = u32_at(&bytes, entry + 12) as usize;
            assert!(offset >= end);
            let payload = movi + offset + 8;
            assert_eq!(&bytes[payload..payload + sample.len()], *sample);
            end = offset + 8 + length;
        }
    }

    #[test]
    fn dimension_mismatch_is_an_error() {
        let mut writer = AviWriter::new(Cursor::new(Vec::new())).unwrap();
        writer.add_video_track(ENC_AVI_RLE, 1, 30, 4, 2, 8, 0).unwrap();
        let pixels = PixelBuffer::packed(2, 2, PixelData::Indexed8(vec![0; 4]));
        assert!(matches!(
            writer.write_frame(0, &pixels, 1),
            Err(AviError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn sync_interval_forces_periodic_key_frames() {
        let mut writer = AviWriter::new(Cursor::new(Vec::new())).unwrap();
        writer
            .add_video_track(ENC_AVI_TECHSMITH, 1, 30, 2, 1, 8, 2)
            .unwrap();
        for i in 0..4u8 {
            let pixels = PixelBuffer::packed(2, 1, PixelData::Indexed8(vec![i; 2]));
            writer.write_frame(0, &pixels, 1).unwrap();
        }
        writer.finish().unwrap();
        let bytes = writer.into_inner().into_inner();

        let idx1 = find(&bytes, b"idx1").unwrap();
        let flags: Vec<u32> = (0..4).map(|i| u32_at(&bytes, idx1 + 8 + i * 16 + 4)).collect();
        assert_eq!(flags, [0x10, 0, 0x10, 0]);
    }

    #[test]
    fn finish_is_idempotent_and_close_rejects_further_writes() {
        let mut writer = AviWriter::new(Cursor::new(Vec::new())).unwrap();
        writer.add_video_track(ENC_AVI_RLE, 1, 30, 2, 1, 8, 0).unwrap();
        writer.write_sample(0, &[0, 1], 1, true).unwrap();

        writer.finish().unwrap();
        let len = writer.out.get_ref().len();
        writer.finish().unwrap();
        assert_eq!(writer.out.get_ref().len(), len);

        assert!(matches!(
            writer.write_sample(0, &[0, 1], 1, true),
            Err(AviError::Finished)
        ));

        writer.close().unwrap();
        assert!(matches!(
            writer.write_sample(0, &[0, 1], 1, true),
            Err(AviError::Closed)
        ));
        writer.close().unwrap();
    }

    #[test]
    fn empty_movie_is_still_valid() {
        let mut writer = AviWriter::new(Cursor::new(Vec::new())).unwrap();
        writer.add_video_track(ENC_AVI_RLE, 1, 30, 2, 1, 8, 0).unwrap();
        writer.finish().unwrap();
        let bytes = writer.into_inner().into_inner();

        assert_eq!(u32_at(&bytes, 4) as usize, bytes.len() - 8);
        let idx1 = find(&bytes, b"idx1").unwrap();
        assert_eq!(u32_at(&bytes, idx1 + 4), 0);
    }

    /// A sink that only tracks its position, letting tests place the writer
    /// near the 4 GiB boundary without allocating anything.
    #[derive(Clone)]
    struct PositionSink(Rc<Cell<u64>>);

    impl io::Write for PositionSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.set(self.0.get() + buf.len() as u64);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl io::Seek for PositionSink {
        fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
            match pos {
                io::SeekFrom::Start(p) => self.0.set(p),
                io::SeekFrom::Current(d) => self.0.set(self.0.get().wrapping_add_signed(d)),
                io::SeekFrom::End(d) => self.0.set(self.0.get().wrapping_add_signed(d)),
            }
            Ok(self.0.get())
        }
    }

    #[test]
    fn writes_crossing_four_gibibytes_fail() {
        let pos = Rc::new(Cell::new(0));
        let mut writer = AviWriter::new(PositionSink(pos.clone())).unwrap();
        writer.add_video_track(ENC_AVI_RLE, 1, 30, 2, 1, 8, 0).unwrap();
        writer.write_sample(0, &[0, 1], 1, true).unwrap();

        // A sample that ends exactly at the limit is still representable.
        pos.set((1 << 32) - 10);
        writer.write_sample(0, &[0, 1], 1, true).unwrap();
        assert_eq!(pos.get(), 1 << 32);

        pos.set((1 << 32) - 9);
        assert!(matches!(
            writer.write_sample(0, &[0, 1], 1, true),
            Err(AviError::CapacityExceeded { .. })
        ));
    }

    #[test]
    fn data_limit_trips_well_before_the_hard_limit() {
        let pos = Rc::new(Cell::new(0));
        let mut writer = AviWriter::new(PositionSink(pos.clone())).unwrap();
        writer.add_video_track(ENC_AVI_RLE, 1, 30, 2, 1, 8, 0).unwrap();
        writer.write_sample(0, &[0, 1], 1, true).unwrap();
        assert!(!writer.is_data_limit_reached());

        pos.set(1_932_735_284);
        assert!(writer.is_data_limit_reached());
    }
}

