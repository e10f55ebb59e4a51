//! Frame buffers: the unit of data passed through codecs and into writers.

use bytes::Bytes;

use crate::pixels::PixelBuffer;

/// Per-frame processing flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameFlags {
    /// The frame carries no usable data and must be dropped.
    pub discard: bool,

    /// The frame is self-contained and does not depend on earlier frames.
    pub key_frame: bool,
}

impl FrameFlags {
    pub fn key() -> Self {
        FrameFlags {
            discard: false,
            key_frame: true,
        }
    }

    pub fn discard() -> Self {
        FrameFlags {
            discard: true,
            key_frame: false,
        }
    }
}

/// Owned frame contents.
#[derive(Debug, Clone, Default)]
pub enum Payload {
    #[default]
    Empty,
    Pixels(PixelBuffer),
    Encoded(Bytes),
}

/// Borrowed frame contents, used on the input side of a codec.
#[derive(Debug, Clone, Copy)]
pub enum PayloadRef<'a> {
    Empty,
    Pixels(&'a PixelBuffer),
    Encoded(&'a [u8]),
}

/// A frame on its way through a codec.
///
/// `offset` and `length` delimit the valid region of an encoded payload;
/// pixel payloads carry their own geometry.
#[derive(Debug, Clone, Default)]
pub struct FrameBuffer {
    pub flags: FrameFlags,
    pub payload: Payload,
    pub offset: usize,
    pub length: usize,

    /// Presentation duration in `time_scale` units.
    pub duration: u64,

    /// Ticks per second that `duration` is expressed in.
    pub time_scale: u32,

    /// Number of media samples in the payload, usually 1 for video.
    pub sample_count: u32,
}

impl FrameBuffer {
    /// The valid bytes of an encoded payload, empty otherwise.
    pub fn encoded_bytes(&self) -> &[u8] {
        match &self.payload {
            Payload::Encoded(b) => &b[self.offset..self.offset + self.length],
            _ => &[],
        }
    }

    /// A borrowed view of this frame, suitable as codec input.
    pub fn as_ref(&self) -> FrameRef<'_> {
        let payload = match &self.payload {
            Payload::Empty => PayloadRef::Empty,
            Payload::Pixels(p) => PayloadRef::Pixels(p),
            Payload::Encoded(b) => PayloadRef::Encoded(&b[self.offset..self.offset + self.length]),
        };
        FrameRef {
            flags: self.flags,
            payload,
            duration: self.duration,
            time_scale: self.time_scale,
            sample_count: self.sample_count,
        }
    }
}

/// A borrowed frame handed to [`crate::VideoCodec::transform`].
#[derive(Debug, Clone, Copy)]
pub struct FrameRef<'a> {
    pub flags: FrameFlags,
    pub payload: PayloadRef<'a>,
    pub duration: u64,
    pub time_scale: u32,
    pub sample_count: u32,
}

impl<'a> FrameRef<'a> {
    /// A single pixel frame with the given flags.
    pub fn pixels(pixels: &'a PixelBuffer, flags: FrameFlags) -> Self {
        FrameRef {
            flags,
            payload: PayloadRef::Pixels(pixels),
            duration: 1,
            time_scale: 1,
            sample_count: 1,
        }
    }
}
