//! The QuickTime movie writer.
//!
//! Streams samples into a `wide`/`mdat` atom pair and assembles the
//! complete `moov` header in memory when the movie is finished, so nothing
//! but the media data header is ever patched in place. A finished movie
//! can additionally be copied into a web-optimized layout with the header
//! in front of the media data, optionally DEFLATE-compressed.

use std::io::{Read, Seek, SeekFrom, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use byteorder::{BigEndian, WriteBytesExt};
use flate2::write::ZlibEncoder;
use flate2::Compression;
use tracing::{debug, warn};

use castkit_codec::codec_for_quicktime;
use castkit_media::{
    FourCc, FrameBuffer, FrameFlags, FrameRef, MovieWriter, PixelBuffer, Representation,
    VideoFormat,
};

use crate::atom::{AtomBuffer, WideDataAtom, MAC_TIMESTAMP_OFFSET};
use crate::error::{QuickTimeError, Result};
use crate::track::{
    sample_to_chunk_runs, sync_sample_numbers, time_to_sample_runs, uniform_sample_size, Media,
    SampleChunk, Track,
};

/// Media durations and stream positions beyond this overflow header fields
/// long before the 64 TiB format ceiling.
const DATA_LIMIT: u64 = 1 << 61;

const DEFAULT_MOVIE_TIME_SCALE: u32 = 600;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Started,
    Finished,
    Closed,
}

/// Writes a QuickTime movie to a seekable sink.
pub struct QuickTimeWriter<W: Write + Seek> {
    out: W,
    /// Absolute stream position the movie starts at.
    base: u64,
    state: State,
    movie_time_scale: u32,
    /// Seconds since the 1904 epoch, captured when the prolog is written.
    creation_time: u64,
    mdat: Option<WideDataAtom>,
    tracks: Vec<Track>,
    dropped: u64,
}

fn mac_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
        + MAC_TIMESTAMP_OFFSET
}

impl<W: Write + Seek> QuickTimeWriter<W> {
    /// Creates a writer; the movie starts at the sink's current position.
    pub fn new(mut out: W) -> Result<Self> {
        let base = out.stream_position()?;
        Ok(QuickTimeWriter {
            out,
            base,
            state: State::Idle,
            movie_time_scale: DEFAULT_MOVIE_TIME_SCALE,
            creation_time: 0,
            mdat: None,
            tracks: Vec::new(),
            dropped: 0,
        })
    }

    /// Sets the movie time scale, 600 by default.
    pub fn set_movie_time_scale(&mut self, time_scale: u32) -> Result<()> {
        if time_scale == 0 {
            return Err(QuickTimeError::InvalidArgument(
                "movie time scale must be at least 1",
            ));
        }
        self.movie_time_scale = time_scale;
        Ok(())
    }

    /// Adds a video track and returns its index.
    ///
    /// `time_scale` is typically the frame rate; for fractional rates use a
    /// multiple and scale frame durations accordingly. `sync_interval` of 0
    /// disables forced key frames, 1 makes every frame a key frame, n
    /// forces one every n frames.
    pub fn add_video_track(
        &mut self,
        encoding: FourCc,
        compressor_name: &str,
        time_scale: u32,
        width: u32,
        height: u32,
        depth: u8,
        sync_interval: u32,
    ) -> Result<usize> {
        self.ensure_writable()?;
        if compressor_name.is_empty() || compressor_name.len() > 31 {
            return Err(QuickTimeError::InvalidArgument(
                "compressor name must be between 1 and 31 bytes",
            ));
        }
        if time_scale == 0 {
            return Err(QuickTimeError::InvalidArgument(
                "time scale must be at least 1",
            ));
        }
        if width == 0 || height == 0 {
            return Err(QuickTimeError::InvalidArgument(
                "width and height must be at least 1",
            ));
        }
        self.ensure_started()?;

        let format = VideoFormat::new(encoding, width, height, depth)
            .with_compressor_name(compressor_name);
        let mut codec = codec_for_quicktime(encoding);
        if let Some(codec) = codec.as_mut() {
            codec.negotiate_input(&format.clone().with_repr(Representation::Pixels));
            codec.negotiate_output(&format);
        }
        self.tracks.push(Track {
            compression: encoding,
            time_scale,
            media: Media::Video {
                format,
                codec,
                sync_interval,
            },
            chunks: Vec::new(),
        });
        Ok(self.tracks.len() - 1)
    }

    /// Adds a sound track and returns its index.
    ///
    /// `time_scale` must equal the integer part of `sample_rate`. For
    /// uncompressed sound `frame_duration` is 1 and `frame_size` the bytes
    /// of one sample across all channels; for compressed sound they
    /// describe one compressed frame.
    #[allow(clippy::too_many_arguments)]
    pub fn add_audio_track(
        &mut self,
        compression: FourCc,
        time_scale: u32,
        sample_rate: f64,
        channels: u16,
        sample_size: u16,
        compressed: bool,
        frame_duration: u32,
        frame_size: u32,
    ) -> Result<usize> {
        self.ensure_writable()?;
        if time_scale == 0 {
            return Err(QuickTimeError::InvalidArgument(
                "time scale must be at least 1",
            ));
        }
        if time_scale as u64 != sample_rate as u64 {
            return Err(QuickTimeError::InvalidArgument(
                "time scale must match the integer part of the sample rate",
            ));
        }
        if channels != 1 && channels != 2 {
            return Err(QuickTimeError::InvalidArgument(
                "channel count must be 1 or 2",
            ));
        }
        if sample_size != 8 && sample_size != 16 {
            return Err(QuickTimeError::InvalidArgument(
                "sample size must be 8 or 16",
            ));
        }
        self.ensure_started()?;

        self.tracks.push(Track {
            compression,
            time_scale,
            media: Media::Sound {
                sample_rate,
                channels,
                sample_size,
                compression_id: if compressed { -2 } else { -1 },
                samples_per_packet: frame_duration,
                bytes_per_packet: if compressed {
                    frame_size
                } else {
                    frame_size / channels as u32
                },
                bytes_per_frame: if compressed {
                    frame_size * channels as u32
                } else {
                    frame_size
                },
                bytes_per_sample: sample_size as u32 / 8,
            },
            chunks: Vec::new(),
        });
        Ok(self.tracks.len() - 1)
    }

    pub fn dropped_frames(&self) -> u64 {
        self.dropped
    }

    /// True once the file position or any media duration exceeds 2^61,
    /// beyond which header fields overflow.
    pub fn is_data_limit_reached(&mut self) -> bool {
        let duration = self
            .tracks
            .iter()
            .map(|t| t.media_duration())
            .max()
            .unwrap_or(0);
        match self.position() {
            Ok(p) => p > DATA_LIMIT || duration > DATA_LIMIT,
            Err(_) => true,
        }
    }

    fn position(&mut self) -> Result<u64> {
        Ok(self.out.stream_position()? - self.base)
    }

    fn ensure_open(&self) -> Result<()> {
        match self.state {
            State::Closed => Err(QuickTimeError::Closed),
            _ => Ok(()),
        }
    }

    fn ensure_writable(&self) -> Result<()> {
        match self.state {
            State::Closed => Err(QuickTimeError::Closed),
            State::Finished => Err(QuickTimeError::Finished),
            _ => Ok(()),
        }
    }

    fn ensure_started(&mut self) -> Result<()> {
        if self.state == State::Idle {
            self.creation_time = mac_now();
            self.write_prolog()?;
            self.state = State::Started;
        }
        Ok(())
    }

    /// Writes the `ftyp` atom and reserves the media data header.
    fn write_prolog(&mut self) -> Result<()> {
        self.out.write_all(&ftyp_bytes()?)?;
        let offset = self.position()?;
        self.mdat = Some(WideDataAtom::open(&mut self.out, offset)?);
        debug!("opened QuickTime movie prolog");
        Ok(())
    }

    /// Encodes `pixels` with the track's codec and appends the result.
    ///
    /// `duration` is in the track's media time scale and may vary per
    /// frame. A frame the codec cannot handle is dropped and counted, not
    /// an error.
    pub fn write_frame(&mut self, track: usize, pixels: &PixelBuffer, duration: u64) -> Result<()> {
        self.ensure_writable()?;
        self.ensure_started()?;
        if duration < 1 {
            return Err(QuickTimeError::InvalidArgument(
                "duration must be at least 1",
            ));
        }
        let t = self
            .tracks
            .get_mut(track)
            .ok_or(QuickTimeError::InvalidTrack(track))?;
        let sample_index = t.sample_count();
        let (format, codec, sync_interval) = match &mut t.media {
            Media::Video {
                format,
                codec,
                sync_interval,
            } => (format, codec, *sync_interval),
            Media::Sound { .. } => {
                return Err(QuickTimeError::InvalidArgument("track does not hold video"))
            }
        };
        let codec = match codec.as_mut() {
            Some(codec) => codec,
            None => return Err(QuickTimeError::UnsupportedFormat(format.encoding)),
        };
        if format.width != pixels.width || format.height != pixels.height {
            return Err(QuickTimeError::DimensionMismatch {
                width: pixels.width,
                height: pixels.height,
                track_width: format.width,
                track_height: format.height,
            });
        }

        let is_sync = sync_interval != 0 && sample_index % sync_interval as u64 == 0;
        let mut output = FrameBuffer::default();
        let flags = FrameFlags {
            discard: false,
            key_frame: is_sync,
        };
        codec.transform(FrameRef::pixels(pixels, flags), &mut output);
        if output.flags.discard {
            self.dropped += 1;
            warn!(track, "codec discarded frame");
            return Ok(());
        }
        let is_sync = output.flags.key_frame;
        self.append_sample(track, output.encoded_bytes(), duration, is_sync)
    }

    /// Appends one already-encoded sample.
    pub fn write_sample(
        &mut self,
        track: usize,
        data: &[u8],
        duration: u64,
        is_sync: bool,
    ) -> Result<()> {
        self.ensure_writable()?;
        self.ensure_started()?;
        if duration < 1 {
            return Err(QuickTimeError::InvalidArgument(
                "duration must be at least 1",
            ));
        }
        if track >= self.tracks.len() {
            return Err(QuickTimeError::InvalidTrack(track));
        }
        self.append_sample(track, data, duration, is_sync)
    }

    /// Appends several equally sized already-encoded samples as one chunk.
    pub fn write_samples(
        &mut self,
        track: usize,
        sample_count: u32,
        data: &[u8],
        sample_duration: u64,
        is_sync: bool,
    ) -> Result<()> {
        self.ensure_writable()?;
        self.ensure_started()?;
        if sample_duration < 1 {
            return Err(QuickTimeError::InvalidArgument(
                "sample duration must be at least 1",
            ));
        }
        if sample_count == 0 {
            return Err(QuickTimeError::InvalidArgument(
                "sample count must be at least 1",
            ));
        }
        if data.len() % sample_count as usize != 0 {
            return Err(QuickTimeError::InvalidArgument(
                "data length must be divisible by the sample count",
            ));
        }
        if track >= self.tracks.len() {
            return Err(QuickTimeError::InvalidTrack(track));
        }

        let offset = self.position()?;
        self.out.write_all(data)?;
        self.tracks[track].chunks.push(SampleChunk {
            first_offset: offset,
            sample_count,
            sample_duration,
            sample_length: (data.len() / sample_count as usize) as u64,
            is_sync,
        });
        Ok(())
    }

    fn append_sample(
        &mut self,
        track: usize,
        data: &[u8],
        duration: u64,
        is_sync: bool,
    ) -> Result<()> {
        let offset = self.position()?;
        self.out.write_all(data)?;
        self.tracks[track].chunks.push(SampleChunk {
            first_offset: offset,
            sample_count: 1,
            sample_duration: duration,
            sample_length: data.len() as u64,
            is_sync,
        });
        Ok(())
    }

    /// Patches the media data header and appends the movie header.
    /// Idempotent.
    pub fn finish(&mut self) -> Result<()> {
        self.ensure_open()?;
        if self.state == State::Finished {
            return Ok(());
        }
        self.ensure_started()?;

        let end = self.position()?;
        if let Some(mdat) = self.mdat.as_mut() {
            mdat.finish(&mut self.out, self.base, end)?;
        }
        let moov = self.build_moov(mac_now(), 0)?;
        self.out.write_all(&moov)?;
        self.out.flush()?;
        self.state = State::Finished;
        debug!("finished QuickTime movie");
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

    /// Serializes the complete `moov` atom. `offset_shift` is added to all
    /// chunk offsets, used when the media data is relocated.
    fn build_moov(&self, modification_time: u64, offset_shift: u64) -> Result<Vec<u8>> {
        let mut b = AtomBuffer::new();
        let moov = b.begin(b"moov");

        let duration = self
            .tracks
            .iter()
            .map(|t| t.movie_duration(self.movie_time_scale))
            .max()
            .unwrap_or(0);

        let mvhd = b.begin(b"mvhd");
        b.write_u8(0); // version
        b.write_bytes(&[0, 0, 0]); // flags
        b.write_mac_timestamp(self.creation_time);
        b.write_mac_timestamp(modification_time);
        b.write_u32(self.movie_time_scale);
        b.write_u32(duration as u32);
        b.write_fixed_16_16(1.0); // preferred rate
        b.write_u16(256); // preferred volume
        b.write_zeros(10); // reserved
        write_identity_matrix(&mut b);
        b.write_u32(0); // preview time
        b.write_u32(0); // preview duration
        b.write_u32(0); // poster time
        b.write_u32(0); // selection time
        b.write_u32(0); // selection duration
        b.write_u32(0); // current time
        b.write_u32(self.tracks.len() as u32 + 1); // next track id
        b.end(mvhd)?;

        for (index, track) in self.tracks.iter().enumerate() {
            self.write_trak(&mut b, index, track, modification_time, offset_shift)?;
        }

        b.end(moov)?;
        Ok(b.into_bytes())
    }

    fn write_trak(
        &self,
        b: &mut AtomBuffer,
        index: usize,
        t: &Track,
        modification_time: u64,
        offset_shift: u64,
    ) -> Result<()> {
        let trak = b.begin(b"trak");

        let tkhd = b.begin(b"tkhd");
        b.write_u8(0); // version
        b.write_bytes(&[0, 0, 0x0f]); // enabled, in movie, in preview, in poster
        b.write_mac_timestamp(self.creation_time);
        b.write_mac_timestamp(modification_time);
        b.write_u32(index as u32 + 1); // track id
        b.write_u32(0); // reserved
        b.write_u32(t.movie_duration(self.movie_time_scale) as u32);
        b.write_zeros(8); // reserved
        b.write_u16(0); // layer
        b.write_u16(0); // alternate group
        b.write_u16(match t.media {
            Media::Sound { .. } => 256,
            Media::Video { .. } => 0,
        }); // volume
        b.write_u16(0); // reserved
        write_identity_matrix(b);
        match &t.media {
            Media::Video { format, .. } => {
                b.write_fixed_16_16(format.width as f64);
                b.write_fixed_16_16(format.height as f64);
            }
            Media::Sound { .. } => {
                b.write_u32(0);
                b.write_u32(0);
            }
        }
        b.end(tkhd)?;

        let mdia = b.begin(b"mdia");

        let mdhd = b.begin(b"mdhd");
        b.write_u8(0); // version
        b.write_bytes(&[0, 0, 0]); // flags
        b.write_mac_timestamp(self.creation_time);
        b.write_mac_timestamp(modification_time);
        b.write_u32(t.time_scale);
        b.write_u32(t.media_duration() as u32);
        b.write_u16(0); // language
        b.write_u16(0); // quality
        b.end(mdhd)?;

        let subtype = match t.media {
            Media::Video { .. } => b"vide",
            Media::Sound { .. } => b"soun",
        };
        write_handler(b, b"mhlr", subtype)?;

        let minf = b.begin(b"minf");
        match &t.media {
            Media::Video { .. } => {
                let vmhd = b.begin(b"vmhd");
                b.write_u8(0); // version
                b.write_bytes(&[0, 0, 1]); // no lean ahead
                b.write_u16(64); // graphics mode: dither copy
                b.write_u16(0x8000); // opcolor red
                b.write_u16(0x8000); // opcolor green
                b.write_u16(0x8000); // opcolor blue
                b.end(vmhd)?;
            }
            Media::Sound { .. } => {
                let smhd = b.begin(b"smhd");
                b.write_u8(0); // version
                b.write_bytes(&[0, 0, 0]); // flags
                b.write_u16(0); // balance
                b.write_u16(0); // reserved
                b.end(smhd)?;
            }
        }
        write_handler(b, b"dhlr", b"alis")?;

        let dinf = b.begin(b"dinf");
        let dref = b.begin(b"dref");
        b.write_u8(0); // version
        b.write_bytes(&[0, 0, 0]); // flags
        b.write_u32(1); // entry count
        b.write_u32(12); // entry size
        b.write_fourcc(b"alis");
        b.write_u8(0); // entry version
        b.write_bytes(&[0, 0, 1]); // data is in the same file
        b.end(dref)?;
        b.end(dinf)?;

        self.write_stbl(b, t, offset_shift)?;
        b.end(minf)?;
        b.end(mdia)?;
        b.end(trak)?;
        Ok(())
    }

    fn write_stbl(&self, b: &mut AtomBuffer, t: &Track, offset_shift: u64) -> Result<()> {
        let stbl = b.begin(b"stbl");

        let stsd = b.begin(b"stsd");
        b.write_u8(0); // version
        b.write_bytes(&[0, 0, 0]); // flags
        b.write_u32(1); // entry count
        match &t.media {
            Media::Video { format, .. } => {
                b.write_u32(86); // entry size
                b.write_fourcc(t.compression.as_bytes());
                b.write_zeros(6); // reserved
                b.write_u16(1); // data reference index
                b.write_u16(0); // version
                b.write_u16(0); // revision
                b.write_u32(0); // vendor
                b.write_u32(0); // temporal quality
                b.write_u32(512); // spatial quality: lossless
                b.write_u16(format.width as u16);
                b.write_u16(format.height as u16);
                b.write_fixed_16_16(72.0); // horizontal resolution
                b.write_fixed_16_16(72.0); // vertical resolution
                b.write_u32(0); // data size
                b.write_u16(1); // frames per sample
                b.write_pascal(&format.compressor_name, 32);
                b.write_u16(format.depth as u16);
                b.write_i16(-1); // no color table
            }
            Media::Sound {
                sample_rate,
                channels,
                sample_size,
                compression_id,
                samples_per_packet,
                bytes_per_packet,
                bytes_per_frame,
                bytes_per_sample,
            } => {
                b.write_u32(52); // entry size
                b.write_fourcc(t.compression.as_bytes());
                b.write_zeros(6); // reserved
                b.write_u16(1); // data reference index
                b.write_u16(1); // version
                b.write_u16(0); // revision
                b.write_u32(0); // vendor
                b.write_u16(*channels);
                b.write_u16(*sample_size);
                b.write_i16(*compression_id);
                b.write_u16(0); // packet size
                b.write_fixed_16_16(*sample_rate);
                b.write_u32(*samples_per_packet);
                b.write_u32(*bytes_per_packet);
                b.write_u32(*bytes_per_frame);
                b.write_u32(*bytes_per_sample);
            }
        }
        b.end(stsd)?;

        let runs = time_to_sample_runs(&t.chunks);
        let stts = b.begin(b"stts");
        b.write_u8(0);
        b.write_bytes(&[0, 0, 0]);
        b.write_u32(runs.len() as u32);
        for (count, duration) in &runs {
            b.write_u32(*count);
            b.write_u32(*duration);
        }
        b.end(stts)?;

        if let Some(numbers) = sync_sample_numbers(&t.chunks) {
            let stss = b.begin(b"stss");
            b.write_u8(0);
            b.write_bytes(&[0, 0, 0]);
            b.write_u32(numbers.len() as u32);
            for n in &numbers {
                b.write_u32(*n);
            }
            b.end(stss)?;
        }

        let runs = sample_to_chunk_runs(&t.chunks);
        let stsc = b.begin(b"stsc");
        b.write_u8(0);
        b.write_bytes(&[0, 0, 0]);
        b.write_u32(runs.len() as u32);
        for (first_chunk, samples_per_chunk) in &runs {
            b.write_u32(*first_chunk);
            b.write_u32(*samples_per_chunk);
            b.write_u32(1); // sample description id
        }
        b.end(stsc)?;

        let stsz = b.begin(b"stsz");
        b.write_u8(0);
        b.write_bytes(&[0, 0, 0]);
        match uniform_sample_size(&t.chunks) {
            Some(size) => {
                b.write_u32(size as u32);
                b.write_u32(t.sample_count() as u32);
            }
            None => {
                b.write_u32(0);
                b.write_u32(t.sample_count() as u32);
                for c in &t.chunks {
                    for _ in 0..c.sample_count {
                        b.write_u32(c.sample_length as u32);
                    }
                }
            }
        }
        b.end(stsz)?;

        // Chunk offsets are absolute file positions; fall back to the
        // 64-bit table once they no longer fit.
        let needs_co64 = t
            .chunks
            .iter()
            .any(|c| self.base + c.first_offset + offset_shift > u32::MAX as u64);
        if needs_co64 {
            let co64 = b.begin(b"co64");
            b.write_u8(0);
            b.write_bytes(&[0, 0, 0]);
            b.write_u32(t.chunks.len() as u32);
            for c in &t.chunks {
                b.write_u64(self.base + c.first_offset + offset_shift);
            }
            b.end(co64)?;
        } else {
            let stco = b.begin(b"stco");
            b.write_u8(0);
            b.write_bytes(&[0, 0, 0]);
            b.write_u32(t.chunks.len() as u32);
            for c in &t.chunks {
                b.write_u32((self.base + c.first_offset + offset_shift) as u32);
            }
            b.end(stco)?;
        }

        b.end(stbl)?;
        Ok(())
    }
}

impl<W: Write + Seek + Read> QuickTimeWriter<W> {
    /// Writes a copy of the movie whose header precedes the media data, so
    /// playback can start before the file has fully downloaded.
    ///
    /// Finishes the movie first. With `compress_header` the header bytes
    /// are DEFLATE-compressed and wrapped in a `cmov` atom, followed by a
    /// `free` atom whose size is settled by an iterative fit; when the fit
    /// fails the copy falls back to the uncompressed layout.
    pub fn write_web_optimized<S: Write>(
        &mut self,
        sink: &mut S,
        compress_header: bool,
    ) -> Result<()> {
        self.finish()?;
        let modification_time = mac_now();
        let (mdat_offset, mdat_size) = match self.mdat.as_ref() {
            Some(mdat) => (mdat.offset(), mdat.size()),
            None => {
                return Err(QuickTimeError::InvalidArgument(
                    "movie holds no media data",
                ))
            }
        };

        let mut compressed_layout = false;
        if compress_header {
            // Compressing the header changes the chunk offsets, which in
            // turn changes the compressed size; iterate until the header
            // plus free padding stops growing.
            let mut compressed = Vec::new();
            let mut plain_len = 0u64;
            let mut header_size = 0u64;
            let mut free_size = 0u64;
            let mut iterations = 5;
            loop {
                let shift = 48 + header_size + free_size;
                let moov = self.build_moov(modification_time, shift)?;
                plain_len = moov.len() as u64;
                let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
                encoder.write_all(&moov)?;
                compressed = encoder.finish()?;
                let len = compressed.len() as u64;

                iterations -= 1;
                if len > header_size + free_size && iterations > 0 {
                    if header_size != 0 {
                        free_size = free_size.max(len - header_size - free_size);
                    }
                    header_size = len;
                } else {
                    if len <= header_size + free_size {
                        free_size = header_size + free_size - len;
                        header_size = len;
                        compressed_layout = true;
                    }
                    break;
                }
            }

            if compressed_layout {
                sink.write_all(&ftyp_bytes()?)?;
                sink.write_u32::<BigEndian>((header_size + 40) as u32)?;
                sink.write_all(b"moov")?;
                sink.write_u32::<BigEndian>((header_size + 32) as u32)?;
                sink.write_all(b"cmov")?;
                sink.write_u32::<BigEndian>(12)?;
                sink.write_all(b"dcom")?;
                sink.write_all(b"zlib")?;
                sink.write_u32::<BigEndian>((header_size + 12) as u32)?;
                sink.write_all(b"cmvd")?;
                sink.write_u32::<BigEndian>(plain_len as u32)?;
                sink.write_all(&compressed)?;

                sink.write_u32::<BigEndian>((free_size + 8) as u32)?;
                sink.write_all(b"free")?;
                let zeros = [0u8; 256];
                let mut remaining = free_size;
                while remaining > 0 {
                    let n = remaining.min(zeros.len() as u64) as usize;
                    sink.write_all(&zeros[..n])?;
                    remaining -= n as u64;
                }
            } else {
                warn!("failed to compress the movie header, writing it plain");
            }
        }

        if !compressed_layout {
            // The header size feeds back into the chunk offsets, which can
            // flip a 32-bit offset table to 64 bits and grow the header.
            let mut shift = 0u64;
            loop {
                let moov = self.build_moov(modification_time, shift)?;
                if moov.len() as u64 == shift {
                    sink.write_all(&ftyp_bytes()?)?;
                    sink.write_all(&moov)?;
                    break;
                }
                shift = moov.len() as u64;
            }
        }

        self.out.seek(SeekFrom::Start(self.base + mdat_offset))?;
        let mut buf = [0u8; 4096];
        let mut remaining = mdat_size;
        while remaining > 0 {
            let n = remaining.min(buf.len() as u64) as usize;
            self.out.read_exact(&mut buf[..n])?;
            sink.write_all(&buf[..n])?;
            remaining -= n as u64;
        }
        self.out.seek(SeekFrom::End(0))?;
        sink.flush()?;
        Ok(())
    }
}

/// The file type atom: brand `qt  `, BCD version 2005-03-00, one
/// compatible brand and three empty slots.
fn ftyp_bytes() -> Result<Vec<u8>> {
    let mut b = AtomBuffer::new();
    let ftyp = b.begin(b"ftyp");
    b.write_fourcc(b"qt  "); // brand
    b.write_bytes(&[0x20, 0x05]); // version year, BCD
    b.write_u8(0x03); // version month
    b.write_u8(0x00); // version minor
    b.write_fourcc(b"qt  "); // compatible brand
    b.write_zeros(12); // three empty compatible brand slots
    b.end(ftyp)?;
    Ok(b.into_bytes())
}

fn write_identity_matrix(b: &mut AtomBuffer) {
    b.write_fixed_16_16(1.0);
    b.write_fixed_16_16(0.0);
    b.write_fixed_2_30(0.0);
    b.write_fixed_16_16(0.0);
    b.write_fixed_16_16(1.0);
    b.write_fixed_2_30(0.0);
    b.write_fixed_16_16(0.0);
    b.write_fixed_16_16(0.0);
    b.write_fixed_2_30(1.0);
}

fn write_handler(b: &mut AtomBuffer, component_type: &[u8; 4], subtype: &[u8; 4]) -> Result<()> {
    let hdlr = b.begin(b"hdlr");
    b.write_u8(0); // version
    b.write_bytes(&[0, 0, 0]); // flags
    b.write_fourcc(component_type);
    b.write_fourcc(subtype);
    b.write_u32(0); // component manufacturer
    b.write_u32(0); // component flags
    b.write_u32(0); // component flags mask
    b.write_pstring(""); // component name
    b.end(hdlr)
}

impl<W: Write + Seek> MovieWriter for QuickTimeWriter<W> {
    type Error = QuickTimeError;

    fn write_frame(&mut self, track: usize, pixels: &PixelBuffer, duration: u64) -> Result<()> {
        QuickTimeWriter::write_frame(self, track, pixels, duration)
    }

    fn write_sample(&mut self, track: usize, data: &[u8], duration: u64, is_sync: bool) -> Result<()> {
        QuickTimeWriter::write_sample(self, track, data, duration, is_sync)
    }

    fn write_samples(
        &mut self,
        track: usize,
        sample_count: u32,
        data: &[u8],
        sample_duration: u64,
        is_sync: bool,
    ) -> Result<()> {
        QuickTimeWriter::write_samples(self, track, sample_count, data, sample_duration, is_sync)
    }

    /// QuickTime stores per-sample durations.
    fn is_vfr_supported(&self) -> bool {
        true
    }

    fn is_data_limit_reached(&mut self) -> bool {
        QuickTimeWriter::is_data_limit_reached(self)
    }

    fn dropped_frames(&self) -> u64 {
        self.dropped
    }

    fn finish(&mut self) -> Result<()> {
        QuickTimeWriter::finish(self)
    }

    fn close(&mut self) -> Result<()> {
        QuickTimeWriter::close(self)
    }
}
