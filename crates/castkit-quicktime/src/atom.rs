//! QuickTime atom emission.
//!
//! Atoms are length-prefixed like RIFF chunks but big-endian, sized
//! including their own 8-byte header and never padded. The movie header is
//! assembled in memory with [`AtomBuffer`], which patches sizes in its
//! backing buffer instead of seeking. Only the media data atom is ever
//! patched in the output stream: [`WideDataAtom`] reserves 16 header bytes
//! up front and decides on finish whether they become a `wide` atom plus a
//! 32-bit `mdat` or a single 64-bit `mdat`.

use std::io::{Seek, SeekFrom, Write};

use castkit_media::FourCc;

use crate::error::{QuickTimeError, Result};

/// Seconds between 1904-01-01 and 1970-01-01. Atom timestamps count from
/// the former.
pub(crate) const MAC_TIMESTAMP_OFFSET: u64 = 2_082_844_800;

/// In-memory atom assembly with big-endian field helpers.
#[derive(Debug, Default)]
pub(crate) struct AtomBuffer {
    buf: Vec<u8>,
}

impl AtomBuffer {
    pub fn new() -> Self {
        AtomBuffer::default()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    /// Opens an atom and returns the index of its header for [`end`].
    ///
    /// [`end`]: AtomBuffer::end
    pub fn begin(&mut self, tag: &[u8; 4]) -> usize {
        let start = self.buf.len();
        self.buf.extend_from_slice(&[0; 4]);
        self.buf.extend_from_slice(tag);
        start
    }

    /// Closes the atom opened at `start`, patching its size field.
    pub fn end(&mut self, start: usize) -> Result<()> {
        let size = self.buf.len() - start;
        if size > u32::MAX as usize {
            let mut tag = [0u8; 4];
            tag.copy_from_slice(&self.buf[start + 4..start + 8]);
            return Err(QuickTimeError::CapacityExceeded {
                tag: FourCc(tag),
                size: size as u64,
            });
        }
        self.buf[start..start + 4].copy_from_slice(&(size as u32).to_be_bytes());
        Ok(())
    }

    pub fn write_bytes(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    pub fn write_zeros(&mut self, n: usize) {
        self.buf.resize(self.buf.len() + n, 0);
    }

    pub fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn write_u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn write_i16(&mut self, v: i16) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn write_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn write_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn write_fourcc(&mut self, tag: &[u8; 4]) {
        self.buf.extend_from_slice(tag);
    }

    /// 16.16 fixed-point number.
    pub fn write_fixed_16_16(&mut self, v: f64) {
        self.write_u32((v * 65536.0) as i64 as u32);
    }

    /// 2.30 fixed-point number.
    pub fn write_fixed_2_30(&mut self, v: f64) {
        self.write_u32((v * (1u64 << 30) as f64) as i64 as u32);
    }

    /// Timestamp in seconds since the 1904 epoch.
    pub fn write_mac_timestamp(&mut self, seconds_since_1904: u64) {
        self.write_u32(seconds_since_1904 as u32);
    }

    /// Pascal string in a fixed field: length byte, bytes, zero padding.
    pub fn write_pascal(&mut self, s: &str, field: usize) {
        debug_assert!(s.len() < field);
        self.buf.push(s.len() as u8);
        self.buf.extend_from_slice(s.as_bytes());
        self.write_zeros(field - 1 - s.len());
    }

    /// Variable-length Pascal string.
    pub fn write_pstring(&mut self, s: &str) {
        self.buf.push(s.len() as u8);
        self.buf.extend_from_slice(s.as_bytes());
    }
}

/// The media data atom, opened with 16 reserved header bytes.
#[derive(Debug)]
pub(crate) struct WideDataAtom {
    /// Header position relative to the movie start.
    offset: u64,
    /// Total size including the 16 reserved bytes, valid once finished.
    size: u64,
}

impl WideDataAtom {
    /// Reserves the header bytes at the current stream position.
    pub fn open<W: Write + Seek>(w: &mut W, offset: u64) -> Result<Self> {
        w.write_all(&[0u8; 16])?;
        Ok(WideDataAtom { offset, size: 0 })
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// First payload byte, relative to the movie start.
    pub fn data_offset(&self) -> u64 {
        self.offset + 16
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// The 16 header bytes for a finished payload. A payload whose atom
    /// size fits 32 bits is headed by an 8-byte `wide` atom and a 32-bit
    /// `mdat`; a larger payload becomes a single `mdat` whose 64-bit
    /// extended size spans all reserved bytes.
    pub fn header_bytes(payload: u64) -> [u8; 16] {
        let mut header = [0u8; 16];
        if payload + 8 <= u32::MAX as u64 {
            header[0..4].copy_from_slice(&8u32.to_be_bytes());
            header[4..8].copy_from_slice(b"wide");
            header[8..12].copy_from_slice(&((payload + 8) as u32).to_be_bytes());
            header[12..16].copy_from_slice(b"mdat");
        } else {
            header[0..4].copy_from_slice(&1u32.to_be_bytes());
            header[4..8].copy_from_slice(b"mdat");
            header[8..16].copy_from_slice(&(payload + 16).to_be_bytes());
        }
        header
    }

    /// Patches the header once the payload ends at `end` and restores the
    /// stream position. Offsets are relative to `base`.
    pub fn finish<W: Write + Seek>(&mut self, w: &mut W, base: u64, end: u64) -> Result<()> {
        let payload = end - self.data_offset();
        w.seek(SeekFrom::Start(base + self.offset))?;
        w.write_all(&Self::header_bytes(payload))?;
        w.seek(SeekFrom::Start(base + end))?;
        self.size = 16 + payload;
        Ok(())
    }
}
