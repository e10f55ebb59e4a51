//! Run-length op-stream emitter shared by the RLE-family encoders.
//!
//! The op-code grammar is the Microsoft RLE one, generalized over pixel
//! unit size. Scanlines are encoded bottom-to-top. Within a line:
//!
//! * `n, pixel` with `n` in `1..=255` repeats a pixel `n` times,
//! * `0x00, n, pixels...` with `n` in `3..=255` copies `n` literal pixels
//!   (followed by one pad byte when the unit is one byte and `n` is odd),
//! * `0x00 0x00` ends the line,
//! * `0x00 0x01` ends the bitmap,
//! * `0x00 0x02, dx, dy` skips `dx` pixels and `dy` lines (delta frames
//!   only).
//!
//! Multi-byte pixel units are serialized little-endian.

/// A pixel unit the emitter can serialize.
pub(crate) trait PixelUnit: Copy + Eq {
    /// Whether an odd-length literal run is followed by a pad byte. Only
    /// true for single-byte units; wider units never need alignment.
    const PAD_ODD_LITERAL: bool;

    fn put(self, dst: &mut Vec<u8>);
}

impl PixelUnit for u8 {
    const PAD_ODD_LITERAL: bool = true;

    fn put(self, dst: &mut Vec<u8>) {
        dst.push(self);
    }
}

impl PixelUnit for u16 {
    const PAD_ODD_LITERAL: bool = false;

    fn put(self, dst: &mut Vec<u8>) {
        dst.extend_from_slice(&self.to_le_bytes());
    }
}

/// 24-bit unit stored in the low bytes of a `u32`. Equality considers the
/// whole word, the serialized form only the low three bytes.
impl PixelUnit for u32 {
    const PAD_ODD_LITERAL: bool = false;

    fn put(self, dst: &mut Vec<u8>) {
        dst.extend_from_slice(&self.to_le_bytes()[..3]);
    }
}

/// Which op a delta encoder emits when whole lines at the start of a run
/// were unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LineSkipStyle {
    /// Always fold skipped lines into `(0, 2, dx, dy)` ops.
    Fold,

    /// Emit a plain end-of-line op when exactly one line was skipped and no
    /// horizontal skip follows, as the Microsoft RLE encoder does.
    EolForSingleLine,
}

fn put_run<P: PixelUnit>(dst: &mut Vec<u8>, run: &[P]) {
    for &p in run {
        p.put(dst);
    }
}

fn flush_literals<P: PixelUnit>(dst: &mut Vec<u8>, data: &[P], end: usize, count: &mut usize) {
    while *count > 0 {
        if *count < 3 {
            // Too short for a literal op, degrade to one-pixel repeats.
            dst.push(1);
            data[end - *count].put(dst);
            *count -= 1;
        } else {
            let run = (*count).min(254);
            dst.push(0);
            dst.push(run as u8);
            put_run(dst, &data[end - *count..end - *count + run]);
            if P::PAD_ODD_LITERAL && run % 2 == 1 {
                dst.push(0);
            }
            *count -= run;
        }
    }
}

/// Encodes a key frame: every pixel of the region is represented.
pub(crate) fn encode_key<P: PixelUnit>(
    dst: &mut Vec<u8>,
    data: &[P],
    width: usize,
    height: usize,
    offset: usize,
    stride: usize,
) {
    if height == 0 {
        dst.push(0);
        dst.push(1); // end of bitmap
        return;
    }
    let ymax = offset + height * stride;
    let upside_down = ymax - stride + offset;

    let mut y = offset;
    while y < ymax {
        let mut xy = upside_down - y;
        let xymax = xy + width;
        let mut literal_count = 0usize;

        while xy < xymax {
            let v = data[xy];
            let mut repeat_count = 0usize;
            while xy + repeat_count < xymax && repeat_count < 255 && data[xy + repeat_count] == v {
                repeat_count += 1;
            }

            if repeat_count < 3 {
                literal_count += 1;
                if literal_count == 254 {
                    dst.push(0);
                    dst.push(254);
                    put_run(dst, &data[xy + 1 - literal_count..xy + 1]);
                    literal_count = 0;
                }
                xy += 1;
            } else {
                flush_literals(dst, data, xy, &mut literal_count);
                dst.push(repeat_count as u8);
                v.put(dst);
                xy += repeat_count;
            }
        }

        flush_literals(dst, data, xymax, &mut literal_count);
        dst.push(0);
        dst.push(0); // end of line
        y += stride;
    }

    dst.push(0);
    dst.push(1); // end of bitmap
}

/// Encodes a delta frame: only pixels that differ from `prev` are
/// represented, unchanged stretches become skip ops.
///
/// `data` and `prev` must describe the same region; trailing unchanged
/// lines are dropped entirely, the end-of-bitmap op covers them.
pub(crate) fn encode_delta<P: PixelUnit>(
    dst: &mut Vec<u8>,
    data: &[P],
    prev: &[P],
    width: usize,
    height: usize,
    offset: usize,
    stride: usize,
    line_skip: LineSkipStyle,
) {
    if height == 0 {
        dst.push(0);
        dst.push(1); // end of bitmap
        return;
    }
    let ymax = offset + height * stride;
    let upside_down = ymax - stride + offset;

    // Lines skipped since the last emitted op. Carried forward so that a
    // run of unchanged lines collapses into the skip op of the next
    // changed line, and dropped silently when the frame ends first.
    let mut vertical_offset = 0usize;

    let mut y = offset;
    while y < ymax {
        let mut xy = upside_down - y;
        let xymax = xy + width;

        let mut skip_count = 0usize;
        while xy < xymax && data[xy] == prev[xy] {
            xy += 1;
            skip_count += 1;
        }
        if skip_count == width {
            vertical_offset += 1;
            y += stride;
            continue;
        }

        while vertical_offset > 0 || skip_count > 0 {
            if line_skip == LineSkipStyle::EolForSingleLine
                && vertical_offset == 1
                && skip_count == 0
            {
                dst.push(0);
                dst.push(0);
                vertical_offset = 0;
            } else {
                dst.push(0);
                dst.push(2);
                let dx = skip_count.min(255);
                let dy = vertical_offset.min(255);
                dst.push(dx as u8);
                dst.push(dy as u8);
                skip_count -= dx;
                vertical_offset -= dy;
            }
        }

        let mut literal_count = 0usize;
        while xy < xymax {
            let mut skip_count = 0usize;
            while xy + skip_count < xymax && data[xy + skip_count] == prev[xy + skip_count] {
                skip_count += 1;
            }

            let v = data[xy];
            let mut repeat_count = 0usize;
            while xy + repeat_count < xymax && repeat_count < 255 && data[xy + repeat_count] == v {
                repeat_count += 1;
            }

            if skip_count < 4 && xy + skip_count < xymax && repeat_count < 3 {
                literal_count += 1;
                xy += 1;
            } else {
                flush_literals(dst, data, xy, &mut literal_count);
                if xy + skip_count == xymax {
                    // Trailing unchanged pixels, the end-of-line op covers
                    // them.
                    xy += skip_count;
                } else if skip_count >= repeat_count {
                    while skip_count > 0 {
                        let dx = skip_count.min(255);
                        dst.push(0);
                        dst.push(2);
                        dst.push(dx as u8);
                        dst.push(0);
                        xy += dx;
                        skip_count -= dx;
                    }
                } else {
                    dst.push(repeat_count as u8);
                    v.put(dst);
                    xy += repeat_count;
                }
            }
        }

        flush_literals(dst, data, xymax, &mut literal_count);
        dst.push(0);
        dst.push(0); // end of line
        y += stride;
    }

    dst.push(0);
    dst.push(1); // end of bitmap
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Reference decoder for 8-bit op streams, bottom-up into a packed
    /// top-down raster. Starts from a copy of `base` so delta streams apply
    /// on top of the previous frame.
    pub(crate) fn decode8(stream: &[u8], width: usize, height: usize, base: &[u8]) -> Vec<u8> {
        let mut out = base.to_vec();
        let mut line = 0usize; // 0 = bottom scanline
        let mut x = 0usize;
        let mut i = 0usize;
        while i < stream.len() {
            let op = stream[i];
            i += 1;
            if op > 0 {
                let v = stream[i];
                i += 1;
                let row = height - 1 - line;
                for _ in 0..op {
                    out[row * width + x] = v;
                    x += 1;
                }
            } else {
                let arg = stream[i];
                i += 1;
                match arg {
                    0 => {
                        line += 1;
                        x = 0;
                    }
                    1 => break,
                    2 => {
                        x += stream[i] as usize;
                        line += stream[i + 1] as usize;
                        i += 2;
                    }
                    n => {
                        let n = n as usize;
                        let row = height - 1 - line;
                        for k in 0..n {
                            out[row * width + x] = stream[i + k];
                            x += 1;
                        }
                        i += n;
                        if n % 2 == 1 {
                            i += 1; // pad byte
                        }
                    }
                }
            }
        }
        out
    }

    #[test]
    fn key_run_and_short_literal() {
        let data = [5u8, 5, 5, 9];
        let mut dst = Vec::new();
        encode_key(&mut dst, &data, 4, 1, 0, 4);
        assert_eq!(dst, [0x03, 0x05, 0x01, 0x09, 0x00, 0x00, 0x00, 0x01]);
    }

    #[test]
    fn key_literal_run_of_three_or_more() {
        let data = [1u8, 2, 3, 4, 7, 7, 7, 7];
        let mut dst = Vec::new();
        encode_key(&mut dst, &data, 8, 1, 0, 8);
        // Four literals (even, no pad), then a repeat of four.
        assert_eq!(
            dst,
            [0x00, 0x04, 1, 2, 3, 4, 0x04, 0x07, 0x00, 0x00, 0x00, 0x01]
        );
    }

    #[test]
    fn key_odd_literal_run_is_padded() {
        let data = [1u8, 2, 3, 9, 9, 9];
        let mut dst = Vec::new();
        encode_key(&mut dst, &data, 6, 1, 0, 6);
        assert_eq!(
            dst,
            [0x00, 0x03, 1, 2, 3, 0x00, 0x03, 0x09, 0x00, 0x00, 0x00, 0x01]
        );
    }

    #[test]
    fn key_encodes_lines_bottom_up() {
        // Two rows: top all 1s, bottom all 2s. The bottom row comes first.
        let data = [1u8, 1, 1, 1, 2, 2, 2, 2];
        let mut dst = Vec::new();
        encode_key(&mut dst, &data, 4, 2, 0, 4);
        assert_eq!(
            dst,
            [0x04, 0x02, 0x00, 0x00, 0x04, 0x01, 0x00, 0x00, 0x00, 0x01]
        );
    }

    #[test]
    fn key_round_trips_through_reference_decoder() {
        let width = 23;
        let height = 7;
        let data: Vec<u8> = (0..width * height)
            .map(|i| ((i * 7) % 5 + (i / 31) % 3) as u8)
            .collect();
        let mut dst = Vec::new();
        encode_key(&mut dst, &data, width, height, 0, width);
        assert_eq!(decode8(&dst, width, height, &vec![0; width * height]), data);
    }

    #[test]
    fn key_respects_offset_and_stride() {
        // 2x2 region inside a 4-wide raster, starting at index 1.
        let data = [0u8, 1, 2, 0, 0, 3, 4, 0];
        let mut dst = Vec::new();
        encode_key(&mut dst, &data, 2, 2, 1, 4);
        // Bottom line (3, 4) first, then top line (1, 2).
        assert_eq!(
            dst,
            [
                0x01, 0x03, 0x01, 0x04, 0x00, 0x00, 0x01, 0x01, 0x01, 0x02, 0x00, 0x00, 0x00, 0x01
            ]
        );
    }

    #[test]
    fn zero_height_region_is_end_of_bitmap_only() {
        let data: [u8; 0] = [];
        let mut dst = Vec::new();
        encode_key(&mut dst, &data, 4, 0, 0, 4);
        assert_eq!(dst, [0x00, 0x01]);

        let mut dst = Vec::new();
        encode_delta(&mut dst, &data, &data, 4, 0, 0, 4, LineSkipStyle::Fold);
        assert_eq!(dst, [0x00, 0x01]);
    }

    #[test]
    fn delta_identical_frame_is_end_of_bitmap_only() {
        let data = [1u8, 2, 3, 4];
        let mut dst = Vec::new();
        encode_delta(&mut dst, &data, &data, 4, 1, 0, 4, LineSkipStyle::Fold);
        assert_eq!(dst, [0x00, 0x01]);
    }

    #[test]
    fn delta_single_changed_pixel() {
        let prev = [1u8, 1, 1, 1, 1, 1, 1, 1];
        let mut data = prev;
        data[5] = 9;
        let mut dst = Vec::new();
        encode_delta(&mut dst, &data, &prev, 8, 1, 0, 8, LineSkipStyle::Fold);
        // Skip 5, one-pixel repeat, trailing skip folded into end-of-line.
        assert_eq!(
            dst,
            [0x00, 0x02, 0x05, 0x00, 0x01, 0x09, 0x00, 0x00, 0x00, 0x01]
        );
    }

    #[test]
    fn delta_folds_skipped_lines_into_next_skip_op() {
        // 4x3: bottom line unchanged, middle line changed at x=2.
        let prev = [0u8; 12];
        let mut data = prev;
        data[4 + 2] = 7;
        let mut dst = Vec::new();
        encode_delta(&mut dst, &data, &prev, 4, 3, 0, 4, LineSkipStyle::Fold);
        assert_eq!(
            dst,
            [0x00, 0x02, 0x02, 0x01, 0x01, 0x07, 0x00, 0x00, 0x00, 0x01]
        );
    }

    #[test]
    fn delta_single_line_skip_as_eol() {
        let prev = [0u8; 12];
        let mut data = prev;
        data[4] = 7; // middle line, x=0
        let mut dst = Vec::new();
        encode_delta(
            &mut dst,
            &data,
            &prev,
            4,
            3,
            0,
            4,
            LineSkipStyle::EolForSingleLine,
        );
        // The skipped bottom line becomes a bare end-of-line op.
        assert_eq!(dst, [0x00, 0x00, 0x01, 0x07, 0x00, 0x00, 0x00, 0x01]);
    }

    #[test]
    fn delta_round_trips_through_reference_decoder() {
        let width = 31;
        let height = 9;
        let prev: Vec<u8> = (0..width * height).map(|i| (i % 11) as u8).collect();
        let mut data = prev.clone();
        for i in (0..data.len()).step_by(17) {
            data[i] = data[i].wrapping_add(3);
        }
        for style in [LineSkipStyle::Fold, LineSkipStyle::EolForSingleLine] {
            let mut dst = Vec::new();
            encode_delta(&mut dst, &data, &prev, width, height, 0, width, style);
            assert_eq!(decode8(&dst, width, height, &prev), data);
        }
    }

    #[test]
    fn sixteen_bit_units_are_little_endian() {
        let data = [0x1234u16, 0x1234, 0x1234, 0xabcd];
        let mut dst = Vec::new();
        encode_key(&mut dst, &data, 4, 1, 0, 4);
        assert_eq!(
            dst,
            [0x03, 0x34, 0x12, 0x01, 0xcd, 0xab, 0x00, 0x00, 0x00, 0x01]
        );
    }

    #[test]
    fn twenty_four_bit_units_drop_the_high_byte() {
        let data = [0x00aabbccu32, 0x00aabbcc, 0x00aabbcc, 0x00112233];
        let mut dst = Vec::new();
        encode_key(&mut dst, &data, 4, 1, 0, 4);
        assert_eq!(
            dst,
            [0x03, 0xcc, 0xbb, 0xaa, 0x01, 0x33, 0x22, 0x11, 0x00, 0x00, 0x00, 0x01]
        );
    }
}
