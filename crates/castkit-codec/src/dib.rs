//! Uncompressed device-independent bitmap encoder (`DIB `).
//!
//! Rows are stored bottom-up. Depth 4 packs two palette indices per byte,
//! high nibble first; depth 8 stores one index per byte; depth 24 stores
//! blue, green, red. Every frame is a key frame.

use bytes::Bytes;
use tracing::warn;

use castkit_media::{
    FrameBuffer, FrameFlags, FrameRef, Payload, PayloadRef, PixelBuffer, PixelData,
    Representation, VideoCodec, VideoFormat, ENC_AVI_DIB,
};

/// Writes frames as uncompressed bottom-up bitmaps.
#[derive(Default)]
pub struct DibCodec {
    output_format: Option<VideoFormat>,
    scratch: Vec<u8>,
}

impl DibCodec {
    pub fn new() -> Self {
        DibCodec::default()
    }

    fn encode(&mut self, pixels: &PixelBuffer, depth: u8) -> bool {
        let width = pixels.width as usize;
        let height = pixels.height as usize;
        self.scratch.clear();

        match (&pixels.data, depth) {
            (PixelData::Indexed8(data), 4) => {
                for y in (0..height).rev() {
                    let row = &data[pixels.offset + y * pixels.stride..][..width];
                    for pair in row.chunks(2) {
                        let hi = pair[0] & 0xf;
                        let lo = if pair.len() == 2 { pair[1] & 0xf } else { 0 };
                        self.scratch.push((hi << 4) | lo);
                    }
                }
            }
            (PixelData::Indexed8(data), 8) => {
                for y in (0..height).rev() {
                    self.scratch
                        .extend_from_slice(&data[pixels.offset + y * pixels.stride..][..width]);
                }
            }
            (PixelData::Rgb888(data), 24) => {
                for y in (0..height).rev() {
                    let row = &data[pixels.offset + y * pixels.stride..][..width];
                    for &p in row {
                        self.scratch.push(p as u8); // blue
                        self.scratch.push((p >> 8) as u8); // green
                        self.scratch.push((p >> 16) as u8); // red
                    }
                }
            }
            _ => return false,
        }
        true
    }
}

impl VideoCodec for DibCodec {
    fn negotiate_input(&mut self, proposed: &VideoFormat) -> Option<VideoFormat> {
        Some(proposed.clone().with_repr(Representation::Pixels))
    }

    fn negotiate_output(&mut self, proposed: &VideoFormat) -> Option<VideoFormat> {
        if !matches!(proposed.depth, 4 | 8 | 24) {
            return None;
        }
        let format = VideoFormat::new(ENC_AVI_DIB, proposed.width, proposed.height, proposed.depth)
            .with_repr(Representation::Encoded);
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
            None => 8,
        };
        if !self.encode(pixels, depth) {
            warn!(depth, "dropping frame: pixel data does not match the bitmap depth");
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
