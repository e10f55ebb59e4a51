//! The codec contract shared by the built-in encoders.

use crate::format::VideoFormat;
use crate::frame::{FrameBuffer, FrameRef};

/// A stateful video encoder.
///
/// Formats are negotiated before the first frame: the caller proposes a
/// format and the codec answers with the closest one it supports, or `None`
/// when the proposal is out of reach. `transform` then converts one input
/// frame into one output frame. Encoders that predict from the previous
/// frame keep a snapshot internally; [`reset`](VideoCodec::reset) clears it
/// so the next output is a key frame again.
pub trait VideoCodec: Send {
    /// Proposes an input format. Returns the format actually accepted.
    fn negotiate_input(&mut self, proposed: &VideoFormat) -> Option<VideoFormat>;

    /// Proposes an output format. Returns the format actually produced.
    fn negotiate_output(&mut self, proposed: &VideoFormat) -> Option<VideoFormat>;

    /// Encodes one frame.
    ///
    /// On success `output` carries the encoded payload and flags. A frame the
    /// codec cannot handle comes back with the discard flag set instead of an
    /// error; input frames already flagged discard pass through untouched.
    fn transform(&mut self, input: FrameRef<'_>, output: &mut FrameBuffer);

    /// Drops any inter-frame state.
    fn reset(&mut self);
}
