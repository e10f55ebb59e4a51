//! Pixel buffers and palettes.

/// An RGB color table for indexed pixel formats.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Palette {
    entries: Vec<[u8; 3]>,
}

impl Palette {
    pub fn new(entries: Vec<[u8; 3]>) -> Self {
        Palette { entries }
    }

    /// An evenly spaced grayscale ramp with `2^depth` entries.
    pub fn grayscale(depth: u8) -> Self {
        let n = 1usize << depth;
        let entries = (0..n)
            .map(|i| {
                let v = (i * 255 / (n - 1)) as u8;
                [v, v, v]
            })
            .collect();
        Palette { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries as `[r, g, b]` triples.
    pub fn entries(&self) -> &[[u8; 3]] {
        &self.entries
    }
}

/// Raster storage, one element per pixel.
///
/// Indexed data holds palette indices, one byte per pixel even at depth 4.
/// RGB 555 packs 5 bits per component into the low 15 bits of each word, and
/// RGB 888 packs 8 bits per component into the low 24 bits of each word.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PixelData {
    Indexed8(Vec<u8>),
    Rgb555(Vec<u16>),
    Rgb888(Vec<u32>),
}

impl PixelData {
    pub fn len(&self) -> usize {
        match self {
            PixelData::Indexed8(v) => v.len(),
            PixelData::Rgb555(v) => v.len(),
            PixelData::Rgb888(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// An uncompressed frame: raster data plus the geometry needed to address it.
///
/// Pixel `(x, y)` with `y` counted from the top lives at index
/// `offset + y * stride + x`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    /// Frame width in pixels.
    pub width: u32,

    /// Frame height in pixels.
    pub height: u32,

    /// Index of the top-left pixel within `data`.
    pub offset: usize,

    /// Elements between the starts of consecutive scanlines.
    pub stride: usize,

    /// The raster itself.
    pub data: PixelData,

    /// Color table for indexed formats, `None` for direct color.
    pub palette: Option<Palette>,
}

impl PixelBuffer {
    /// A tightly packed buffer over `data` with `stride == width`.
    pub fn packed(width: u32, height: u32, data: PixelData) -> Self {
        PixelBuffer {
            width,
            height,
            offset: 0,
            stride: width as usize,
            data,
            palette: None,
        }
    }

    pub fn with_palette(mut self, palette: Palette) -> Self {
        self.palette = Some(palette);
        self
    }

    /// True when every addressed pixel lies inside `data`.
    pub fn region_in_bounds(&self) -> bool {
        if self.height == 0 {
            return true;
        }
        if self.stride < self.width as usize {
            return false;
        }
        let last_line = self.offset + (self.height as usize - 1) * self.stride;
        last_line + self.width as usize <= self.data.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grayscale_palette_endpoints() {
        let p = Palette::grayscale(8);
        assert_eq!(p.len(), 256);
        assert_eq!(p.entries()[0], [0, 0, 0]);
        assert_eq!(p.entries()[255], [255, 255, 255]);

        let p = Palette::grayscale(4);
        assert_eq!(p.len(), 16);
        assert_eq!(p.entries()[15], [255, 255, 255]);
    }

    #[test]
    fn region_bounds_respect_offset_and_stride() {
        let mut buf = PixelBuffer::packed(4, 2, PixelData::Indexed8(vec![0; 8]));
        assert!(buf.region_in_bounds());

        buf.stride = 5;
        assert!(!buf.region_in_bounds());

        buf.data = PixelData::Indexed8(vec![0; 9]);
        assert!(buf.region_in_bounds());

        buf.offset = 1;
        assert!(!buf.region_in_bounds());
    }
}
