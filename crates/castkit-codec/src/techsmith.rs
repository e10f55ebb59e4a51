//! TechSmith screen capture encoder (`tscc`).
//!
//! Frames are run-length encoded with the shared op-stream emitter at 8, 16
//! or 24 bits per pixel, then wrapped in a zlib stream. A delta frame whose
//! op stream is just the two-byte end-of-bitmap marker (nothing changed) is
//! stored raw; decoders recognize it by its length.

use std::io::Write;

use bytes::Bytes;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use tracing::warn;

use castkit_media::{
    FrameBuffer, FrameFlags, FrameRef, Payload, PayloadRef, PixelData, Representation,
    VideoCodec, VideoFormat, ENC_AVI_TECHSMITH,
};

use crate::rle::{encode_delta, encode_key, LineSkipStyle};

#[derive(Debug, Clone)]
enum Snapshot {
    Indexed8(Vec<u8>),
    Rgb555(Vec<u16>),
    Rgb888(Vec<u32>),
}

/// Lossless screen-capture encoder with inter-frame prediction.
#[derive(Default)]
pub struct TechSmithCodec {
    output_format: Option<VideoFormat>,
    previous: Option<Snapshot>,
    scratch: Vec<u8>,
}

impl TechSmithCodec {
    pub fn new() -> Self {
        TechSmithCodec::default()
    }

    fn encode(&mut self, pixels: &castkit_media::PixelBuffer, key: bool) -> Option<bool> {
        let width = pixels.width as usize;
        let height = pixels.height as usize;
        let offset = pixels.offset;
        let stride = pixels.stride;
        self.scratch.clear();

        // A frame is a key frame when requested or when there is nothing to
        // predict from.
        let is_key = key || self.previous.is_none();

        match (&pixels.data, &self.previous) {
            (PixelData::Indexed8(data), prev) => {
                if is_key {
                    encode_key(&mut self.scratch, data, width, height, offset, stride);
                } else if let Some(Snapshot::Indexed8(prev)) = prev {
                    encode_delta(
                        &mut self.scratch,
                        data,
                        prev,
                        width,
                        height,
                        offset,
                        stride,
                        LineSkipStyle::Fold,
                    );
                } else {
                    return None;
                }
                self.previous = Some(Snapshot::Indexed8(data.clone()));
            }
            (PixelData::Rgb555(data), prev) => {
                if is_key {
                    encode_key(&mut self.scratch, data, width, height, offset, stride);
                } else if let Some(Snapshot::Rgb555(prev)) = prev {
                    encode_delta(
                        &mut self.scratch,
                        data,
                        prev,
                        width,
                        height,
                        offset,
                        stride,
                        LineSkipStyle::Fold,
                    );
                } else {
                    return None;
                }
                self.previous = Some(Snapshot::Rgb555(data.clone()));
            }
            (PixelData::Rgb888(data), prev) => {
                if is_key {
                    encode_key(&mut self.scratch, data, width, height, offset, stride);
                } else if let Some(Snapshot::Rgb888(prev)) = prev {
                    encode_delta(
                        &mut self.scratch,
                        data,
                        prev,
                        width,
                        height,
                        offset,
                        stride,
                        LineSkipStyle::Fold,
                    );
                } else {
                    return None;
                }
                self.previous = Some(Snapshot::Rgb888(data.clone()));
            }
        }
        Some(is_key)
    }
}

impl VideoCodec for TechSmithCodec {
    fn negotiate_input(&mut self, proposed: &VideoFormat) -> Option<VideoFormat> {
        Some(proposed.clone().with_repr(Representation::Pixels))
    }

    fn negotiate_output(&mut self, proposed: &VideoFormat) -> Option<VideoFormat> {
        let depth = match proposed.depth {
            0..=8 => 8,
            9..=16 => 16,
            _ => 24,
        };
        let format = VideoFormat {
            depth,
            repr: Representation::Encoded,
            compressor_name: "TechSmith Screen Capture".to_owned(),
            ..VideoFormat::new(ENC_AVI_TECHSMITH, proposed.width, proposed.height, depth)
        };
        self.output_format = Some(format.clone());
        Some(format)
    }

    fn transform(&mut self, input: FrameRef<'_>, output: &mut FrameBuffer) {
        if input.flags.discard {
            output.flags = FrameFlags::discard();
            return;
        }
        let pixels = match input.payload {
            PayloadRef::Pixels(p) if p.region_in_bounds() => p,
            _ => {
                warn!("dropping frame: payload is not a usable pixel buffer");
                output.flags = FrameFlags::discard();
                return;
            }
        };
        let depth_ok = match (&pixels.data, self.output_format.as_ref().map(|f| f.depth)) {
            (PixelData::Indexed8(_), Some(8)) => true,
            (PixelData::Rgb555(_), Some(16)) => true,
            (PixelData::Rgb888(_), Some(24)) => true,
            (_, None) => true,
            _ => false,
        };
        if !depth_ok {
            warn!("dropping frame: pixel data does not match the negotiated depth");
            output.flags = FrameFlags::discard();
            return;
        }

        let is_key = match self.encode(pixels, input.flags.key_frame) {
            Some(k) => k,
            None => {
                // Pixel layout changed mid-stream, re-key on the next frame.
                self.previous = None;
                output.flags = FrameFlags::discard();
                return;
            }
        };

        // Delta frames with nothing changed are stored raw; everything else
        // is deflated.
        let bytes = if !is_key && self.scratch.len() == 2 {
            Bytes::copy_from_slice(&self.scratch)
        } else {
            let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
            // Writing to a Vec cannot fail.
            enc.write_all(&self.scratch).unwrap();
            Bytes::from(enc.finish().unwrap())
        };

        output.length = bytes.len();
        output.offset = 0;
        output.payload = Payload::Encoded(bytes);
        output.flags = FrameFlags {
            discard: false,
            key_frame: is_key,
        };
        output.sample_count = 1;
    }

    fn reset(&mut self) {
        self.previous = None;
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use flate2::read::ZlibDecoder;

    use super::*;
    use castkit_media::PixelBuffer;

    fn inflate(data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        ZlibDecoder::new(data).read_to_end(&mut out).unwrap();
        out
    }

    fn codec_for(width: u32, height: u32, depth: u8) -> TechSmithCodec {
        let mut codec = TechSmithCodec::new();
        let proposed = VideoFormat::new(ENC_AVI_TECHSMITH, width, height, depth);
        assert!(codec.negotiate_output(&proposed).is_some());
        codec
    }

    #[test]
    fn first_frame_is_a_deflated_key_frame() {
        let mut codec = codec_for(4, 1, 8);
        let pixels = PixelBuffer::packed(4, 1, PixelData::Indexed8(vec![5, 5, 5, 9]));
        let mut out = FrameBuffer::default();
        codec.transform(FrameRef::pixels(&pixels, FrameFlags::default()), &mut out);

        assert!(out.flags.key_frame);
        assert_eq!(
            inflate(out.encoded_bytes()),
            [0x03, 0x05, 0x01, 0x09, 0x00, 0x00, 0x00, 0x01]
        );
    }

    #[test]
    fn unchanged_delta_frame_is_two_raw_bytes() {
        let mut codec = codec_for(4, 2, 8);
        let pixels = PixelBuffer::packed(4, 2, PixelData::Indexed8(vec![1; 8]));
        let mut out = FrameBuffer::default();
        codec.transform(FrameRef::pixels(&pixels, FrameFlags::default()), &mut out);
        assert!(out.flags.key_frame);

        let mut out = FrameBuffer::default();
        codec.transform(FrameRef::pixels(&pixels, FrameFlags::default()), &mut out);
        assert!(!out.flags.key_frame);
        assert_eq!(out.encoded_bytes(), [0x00, 0x01]);
    }

    #[test]
    fn changed_delta_frame_is_deflated() {
        let mut codec = codec_for(4, 1, 8);
        let first = PixelBuffer::packed(4, 1, PixelData::Indexed8(vec![1, 1, 1, 1]));
        let mut out = FrameBuffer::default();
        codec.transform(FrameRef::pixels(&first, FrameFlags::default()), &mut out);

        let second = PixelBuffer::packed(4, 1, PixelData::Indexed8(vec![1, 1, 1, 2]));
        let mut out = FrameBuffer::default();
        codec.transform(FrameRef::pixels(&second, FrameFlags::default()), &mut out);

        assert!(!out.flags.key_frame);
        // Skip 3, then a one-pixel repeat carried by the end-of-line logic.
        assert_eq!(
            inflate(out.encoded_bytes()),
            [0x00, 0x02, 0x03, 0x00, 0x01, 0x02, 0x00, 0x00, 0x00, 0x01]
        );
    }

    #[test]
    fn key_frame_flag_forces_a_key_frame() {
        let mut codec = codec_for(2, 1, 8);
        let pixels = PixelBuffer::packed(2, 1, PixelData::Indexed8(vec![1, 2]));
        let mut out = FrameBuffer::default();
        codec.transform(FrameRef::pixels(&pixels, FrameFlags::default()), &mut out);

        let mut out = FrameBuffer::default();
        codec.transform(FrameRef::pixels(&pixels, FrameFlags::key()), &mut out);
        assert!(out.flags.key_frame);
        assert_eq!(
            inflate(out.encoded_bytes()),
            [0x01, 0x01, 0x01, 0x02, 0x00, 0x00, 0x00, 0x01]
        );
    }

    #[test]
    fn reset_forces_a_key_frame() {
        let mut codec = codec_for(2, 1, 8);
        let pixels = PixelBuffer::packed(2, 1, PixelData::Indexed8(vec![3, 3]));
        let mut out = FrameBuffer::default();
        codec.transform(FrameRef::pixels(&pixels, FrameFlags::default()), &mut out);
        codec.reset();

        let mut out = FrameBuffer::default();
        codec.transform(FrameRef::pixels(&pixels, FrameFlags::default()), &mut out);
        assert!(out.flags.key_frame);
    }

    #[test]
    fn wrong_pixel_variant_is_discarded_and_counted_by_the_caller() {
        let mut codec = codec_for(2, 1, 8);
        let pixels = PixelBuffer::packed(2, 1, PixelData::Rgb888(vec![0, 0]));
        let mut out = FrameBuffer::default();
        codec.transform(FrameRef::pixels(&pixels, FrameFlags::default()), &mut out);
        assert!(out.flags.discard);
    }

    #[test]
    fn zero_height_frame_encodes_to_an_empty_bitmap() {
        let mut codec = codec_for(4, 0, 8);
        let pixels = PixelBuffer::packed(4, 0, PixelData::Indexed8(Vec::new()));
        let mut out = FrameBuffer::default();
        codec.transform(FrameRef::pixels(&pixels, FrameFlags::default()), &mut out);

        assert!(!out.flags.discard);
        assert!(out.flags.key_frame);
        assert_eq!(inflate(out.encoded_bytes()), [0x00, 0x01]);
    }

    #[test]
    fn sixteen_bit_frames_round_trip_the_emitter() {
        let mut codec = codec_for(3, 1, 16);
        let pixels = PixelBuffer::packed(3, 1, PixelData::Rgb555(vec![0x7fff, 0x7fff, 0x7fff]));
        let mut out = FrameBuffer::default();
        codec.transform(FrameRef::pixels(&pixels, FrameFlags::default()), &mut out);
        assert_eq!(
            inflate(out.encoded_bytes()),
            [0x03, 0xff, 0x7f, 0x00, 0x00, 0x00, 0x01]
        );
    }
}
