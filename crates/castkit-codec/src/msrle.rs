//! Microsoft RLE encoder (`RLE `), 8 bits per pixel.
//!
//! Emits the plain op stream without any outer compression. Unlike the
//! TechSmith encoder, a delta frame whose run starts with exactly one
//! skipped line opens with a bare end-of-line op instead of a skip op.

use bytes::Bytes;
use tracing::warn;

use castkit_media::{
    FrameBuffer, FrameFlags, FrameRef, Payload, PayloadRef, PixelData, Representation,
    VideoCodec, VideoFormat, ENC_AVI_RLE,
};

use crate::rle::{encode_delta, encode_key, LineSkipStyle};

/// Run-length encoder for 8-bit indexed frames.
#[derive(Default)]
pub struct RunLengthCodec {
    previous: Option<Vec<u8>>,
    scratch: Vec<u8>,
}

impl RunLengthCodec {
    pub fn new() -> Self {
        RunLengthCodec::default()
    }
}

impl VideoCodec for RunLengthCodec {
    fn negotiate_input(&mut self, proposed: &VideoFormat) -> Option<VideoFormat> {
        let mut accepted = proposed.clone().with_repr(Representation::Pixels);
        accepted.depth = 8;
        Some(accepted)
    }

    fn negotiate_output(&mut self, proposed: &VideoFormat) -> Option<VideoFormat> {
        if proposed.depth != 8 {
            return None;
        }
        Some(
            VideoFormat::new(ENC_AVI_RLE, proposed.width, proposed.height, 8)
                .with_repr(Representation::Encoded),
        )
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
        let data = match &pixels.data {
            PixelData::Indexed8(data) => data,
            _ => {
                warn!("dropping frame: run-length encoding requires 8-bit indexed pixels");
                output.flags = FrameFlags::discard();
                return;
            }
        };

        let width = pixels.width as usize;
        let height = pixels.height as usize;
        self.scratch.clear();

        let is_key = match &self.previous {
            Some(prev) if !input.flags.key_frame => {
                encode_delta(
                    &mut self.scratch,
                    data,
                    prev,
                    width,
                    height,
                    pixels.offset,
                    pixels.stride,
                    LineSkipStyle::EolForSingleLine,
                );
                false
            }
            _ => {
                encode_key(
                    &mut self.scratch,
                    data,
                    width,
                    height,
                    pixels.offset,
                    pixels.stride,
                );
                true
            }
        };
        self.previous = Some(data.clone());

        output.length = self.scratch.len();
        output.offset = 0;
        output.payload = Payload::Encoded(Bytes::copy_from_slice(&self.scratch));
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
