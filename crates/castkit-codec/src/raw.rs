//! Uncompressed QuickTime video encoder (`raw `).
//!
//! Rows are stored top-down. Depth 8 stores one palette index per byte,
//! depth 16 stores big-endian 1-5-5-5 words, depth 24 stores red, green,
//! blue. Every frame is a key frame.

use bytes::Bytes;
use tracing::warn;

use castkit_media::{
    FrameBuffer, FrameFlags, FrameRef, Payload, PayloadRef, PixelBuffer, PixelData,
    Representation, VideoCodec, VideoFormat, ENC_QT_RAW,
};

/// Writes frames as uncompressed top-down rasters.
#[derive(Default)]
pub struct RawCodec {
    output_format: Option<VideoFormat>,
    scratch: Vec<u8>,
}

impl RawCodec {
    pub fn new() -> Self {
        RawCodec::default()
    }

    fn encode(&mut self, pixels: &PixelBuffer, depth: u8) -> bool {
        let width = pixels.width as usize;
        let height = pixels.height as usize;
        self.scratch.clear();

        match (&pixels.data, depth) {
            (PixelData::Indexed8(data), 8) => {
                for y in 0..height {
                    self.scratch
                        .extend_from_slice(&data[pixels.offset + y * pixels.stride..][..width]);
                }
            }
            (PixelData::Rgb555(data), 16) => {
                for y in 0..height {
                    let row = &data[pixels.offset + y * pixels.stride..][..width];
                    for &p in row {
                        self.scratch.extend_from_slice(&p.to_be_bytes());
                    }
                }
            }
            (PixelData::Rgb888(data), 24) => {
                for y in 0..height {
                    let row = &data[pixels.offset + y * pixels.stride..][..width];
                    for &p in row {
                        self.scratch.push((p >> 16) as u8); // red
                        self.scratch.push((p >> 8) as u8); // green
                        self.scratch.push(p as u8); // blue
                    }
                }
            }
            _ => return false,
        }
        true
    }
}

impl VideoCodec for RawCodec {
    fn negotiate_input(&mut self, proposed: &VideoFormat) -> Option<VideoFormat> {
        Some(proposed.clone().with_repr(Representation::Pixels))
    }

    fn negotiate_output(&mut self, proposed: &VideoFormat) -> Option<VideoFormat> {
        if !matches!(proposed.depth, 8 | 16 | 24) {
            return None;
        }
        let format = VideoFormat {
            compressor_name: "None".to_owned(),
            repr: Representation::Encoded,
            ..VideoFormat::new(ENC_QT_RAW, proposed.width, proposed.height, proposed.depth)
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
        let depth = match &self.output_format {
            Some(f) => f.depth,
            None => 24,
        };
        if !self.encode(pixels, depth) {
            warn!(depth, "dropping frame: pixel data does not match the raster depth");
            output.flags = FrameFlags::discard();
            return;
        }

        output.length = self.scratch.len();
        output.offset = 0;
        output.payload = Payload::Encoded(Bytes::copy_from_slice(&self.scratch));
        output.flags = FrameFlags::key();
        output.sample_count = 1;
    }

    fn reset(&mut self) {}
}
