//! CPU-side pixel buffers
//!
//! Captured frames, popup bitmaps and proxy overlay bitmaps are all plain
//! RGBA8 buffers in row-major order with a stride of `width * 4` bytes.
//! Blits between them are clipped against the destination: an overlay that
//! hangs off the right or bottom edge is truncated, never wrapped.

use super::damage::{DamageRegion, Size};
use anyhow::{Context, Result};
use std::fmt;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use thiserror::Error;

/// Number of bytes per pixel (RGBA8)
pub const BYTES_PER_PIXEL: usize = 4;

/// Errors produced when wrapping raw pixel data
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BitmapError {
    #[error("pixel data is {actual} bytes, expected {expected} for {width}x{height} RGBA")]
    SizeMismatch {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
}

/// RGBA colour used for surface backgrounds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const TRANSPARENT: Color = Color::rgba(0, 0, 0, 0);
    pub const WHITE: Color = Color::rgba(255, 255, 255, 255);

    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    pub fn is_opaque(&self) -> bool {
        self.a == u8::MAX
    }

    pub fn to_array(self) -> [u8; 4] {
        [self.r, self.g, self.b, self.a]
    }

    /// Parses `#RRGGBB` or `#RRGGBBAA`.
    pub fn from_hex(hex: &str) -> Option<Self> {
        let digits = hex.strip_prefix('#')?;
        if !(digits.len() == 6 || digits.len() == 8) || !digits.is_ascii() {
            return None;
        }
        let channel = |i: usize| u8::from_str_radix(&digits[i..i + 2], 16).ok();
        let a = if digits.len() == 8 { channel(6)? } else { u8::MAX };
        Some(Self::rgba(channel(0)?, channel(2)?, channel(4)?, a))
    }
}

/// A CPU pixel buffer holding one frame or overlay bitmap
#[derive(Clone, PartialEq, Eq, Default)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl fmt::Debug for PixelBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PixelBuffer")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.data.len())
            .finish()
    }
}

impl PixelBuffer {
    /// Creates a zeroed (fully transparent) buffer
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0; width as usize * height as usize * BYTES_PER_PIXEL],
        }
    }

    /// Creates a buffer filled with a single colour
    pub fn filled(width: u32, height: u32, color: Color) -> Self {
        let mut buffer = Self::new(width, height);
        buffer.fill(color);
        buffer
    }

    /// Wraps existing RGBA data
    pub fn from_rgba(width: u32, height: u32, data: Vec<u8>) -> Result<Self, BitmapError> {
        let expected = width as usize * height as usize * BYTES_PER_PIXEL;
        if data.len() != expected {
            return Err(BitmapError::SizeMismatch {
                width,
                height,
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }

    /// Region covering the whole buffer
    pub fn bounds(&self) -> DamageRegion {
        DamageRegion::from_size(self.size())
    }

    /// A buffer without any pixels; captures like this are degenerate
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Pixels as RGBA quadruples
    pub fn pixels(&self) -> &[[u8; 4]] {
        bytemuck::cast_slice(&self.data)
    }

    fn pixels_mut(&mut self) -> &mut [[u8; 4]] {
        bytemuck::cast_slice_mut(&mut self.data)
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.pixels()
            .get(y as usize * self.width as usize + x as usize)
            .copied()
    }

    pub fn set_pixel(&mut self, x: u32, y: u32, color: Color) {
        if x >= self.width || y >= self.height {
            return;
        }
        let index = y as usize * self.width as usize + x as usize;
        if let Some(px) = self.pixels_mut().get_mut(index) {
            *px = color.to_array();
        }
    }

    pub fn fill(&mut self, color: Color) {
        let rgba = color.to_array();
        self.pixels_mut().iter_mut().for_each(|px| *px = rgba);
    }

    /// Fills `region`, clipped to the buffer
    pub fn fill_region(&mut self, region: DamageRegion, color: Color) {
        let Some(clip) = region.intersection(&self.bounds()) else {
            return;
        };
        let rgba = color.to_array();
        let stride = self.width as usize;
        let pixels = self.pixels_mut();
        for row in clip.y as usize..clip.bottom() as usize {
            let start = row * stride + clip.x as usize;
            pixels[start..start + clip.width as usize]
                .iter_mut()
                .for_each(|px| *px = rgba);
        }
    }

    /// Copies `source` into this buffer with its top-left corner at the
    /// origin of `pos`.
    ///
    /// At most `pos.width` x `pos.height` pixels are copied. The copy is
    /// clipped to this buffer and to the extent of `source`, so a source
    /// smaller than `pos` or a `pos` hanging off an edge only copies the
    /// overlapping pixels.
    pub fn copy_from(&mut self, source: &PixelBuffer, pos: DamageRegion) {
        let dst_x0 = (pos.x as i64).max(0);
        let dst_y0 = (pos.y as i64).max(0);
        let x_end = pos
            .right()
            .min(self.width as i64)
            .min(pos.x as i64 + source.width as i64);
        let y_end = pos
            .bottom()
            .min(self.height as i64)
            .min(pos.y as i64 + source.height as i64);

        let width = x_end - dst_x0;
        let height = y_end - dst_y0;
        if width <= 0 || height <= 0 {
            return;
        }

        let src_x0 = dst_x0 - pos.x as i64;
        let src_y0 = dst_y0 - pos.y as i64;
        let row_bytes = width as usize * BYTES_PER_PIXEL;
        let dst_stride = self.width as usize * BYTES_PER_PIXEL;
        let src_stride = source.width as usize * BYTES_PER_PIXEL;

        for row in 0..height as usize {
            let dst = (dst_y0 as usize + row) * dst_stride + dst_x0 as usize * BYTES_PER_PIXEL;
            let src = (src_y0 as usize + row) * src_stride + src_x0 as usize * BYTES_PER_PIXEL;
            self.data[dst..dst + row_bytes].copy_from_slice(&source.data[src..src + row_bytes]);
        }
    }

    /// Copies the pixels under `region` into a new buffer of the region's
    /// size. Parts of the region outside this buffer read as transparent.
    pub fn extract(&self, region: DamageRegion) -> PixelBuffer {
        let mut out = PixelBuffer::new(region.width, region.height);
        if let Some(clip) = region.intersection(&self.bounds()) {
            let row_bytes = clip.width as usize * BYTES_PER_PIXEL;
            let src_stride = self.width as usize * BYTES_PER_PIXEL;
            let dst_stride = out.width as usize * BYTES_PER_PIXEL;
            let dst_x = (clip.x as i64 - region.x as i64) as usize;
            let dst_y = (clip.y as i64 - region.y as i64) as usize;
            for row in 0..clip.height as usize {
                let src = (clip.y as usize + row) * src_stride + clip.x as usize * BYTES_PER_PIXEL;
                let dst = (dst_y + row) * dst_stride + dst_x * BYTES_PER_PIXEL;
                out.data[dst..dst + row_bytes].copy_from_slice(&self.data[src..src + row_bytes]);
            }
        }
        out
    }

    /// Writes the buffer as an 8-bit RGBA PNG
    pub fn write_png(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let file = File::create(path)
            .with_context(|| format!("Failed to create {}", path.display()))?;

        let mut encoder = png::Encoder::new(BufWriter::new(file), self.width, self.height);
        encoder.set_color(png::ColorType::Rgba);
        encoder.set_depth(png::BitDepth::Eight);

        let mut writer = encoder.write_header().context("Failed to write PNG header")?;
        writer
            .write_image_data(&self.data)
            .context("Failed to write PNG data")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RED: Color = Color::rgba(255, 0, 0, 255);
    const BLUE: Color = Color::rgba(0, 0, 255, 255);

    #[test]
    fn test_color_from_hex() {
        assert_eq!(Color::from_hex("#FF8000"), Some(Color::rgba(255, 128, 0, 255)));
        assert_eq!(Color::from_hex("#00000000"), Some(Color::TRANSPARENT));
        assert_eq!(Color::from_hex("FF8000"), None);
        assert_eq!(Color::from_hex("#GG0000"), None);
        assert!(!Color::TRANSPARENT.is_opaque());
    }

    #[test]
    fn test_from_rgba_rejects_wrong_length() {
        let err = PixelBuffer::from_rgba(2, 2, vec![0; 15]).unwrap_err();
        assert!(matches!(err, BitmapError::SizeMismatch { expected: 16, .. }));
        assert!(PixelBuffer::from_rgba(2, 2, vec![0; 16]).is_ok());
    }

    #[test]
    fn test_copy_from_inside() {
        let mut base = PixelBuffer::filled(10, 10, RED);
        let overlay = PixelBuffer::filled(3, 2, BLUE);
        base.copy_from(&overlay, DamageRegion::new(4, 5, 3, 2));

        assert_eq!(base.pixel(4, 5), Some(BLUE.to_array()));
        assert_eq!(base.pixel(6, 6), Some(BLUE.to_array()));
        assert_eq!(base.pixel(7, 6), Some(RED.to_array()));
        assert_eq!(base.pixel(4, 7), Some(RED.to_array()));
    }

    #[test]
    fn test_copy_from_truncates_at_right_and_bottom() {
        let mut base = PixelBuffer::filled(10, 10, RED);
        let overlay = PixelBuffer::filled(6, 6, BLUE);
        base.copy_from(&overlay, DamageRegion::new(7, 8, 6, 6));

        assert_eq!(base.pixel(9, 9), Some(BLUE.to_array()));
        assert_eq!(base.pixel(6, 9), Some(RED.to_array()));
        // Nothing wrapped to the next row's start.
        assert_eq!(base.pixel(0, 9), Some(RED.to_array()));
    }

    #[test]
    fn test_copy_from_smaller_source_than_bounds() {
        let mut base = PixelBuffer::filled(10, 10, RED);
        let overlay = PixelBuffer::filled(2, 2, BLUE);
        base.copy_from(&overlay, DamageRegion::new(1, 1, 5, 5));

        assert_eq!(base.pixel(2, 2), Some(BLUE.to_array()));
        assert_eq!(base.pixel(3, 3), Some(RED.to_array()));
    }

    #[test]
    fn test_copy_from_negative_origin() {
        let mut base = PixelBuffer::filled(4, 4, RED);
        let mut overlay = PixelBuffer::filled(3, 3, BLUE);
        overlay.set_pixel(2, 2, Color::WHITE);
        base.copy_from(&overlay, DamageRegion::new(-1, -1, 3, 3));

        assert_eq!(base.pixel(0, 0), Some(BLUE.to_array()));
        assert_eq!(base.pixel(1, 1), Some(Color::WHITE.to_array()));
        assert_eq!(base.pixel(2, 2), Some(RED.to_array()));
    }

    #[test]
    fn test_extract_then_copy_back_restores() {
        let mut base = PixelBuffer::new(8, 8);
        for y in 0..8 {
            for x in 0..8 {
                base.set_pixel(x, y, Color::rgba(x as u8 * 10, y as u8 * 10, 7, 255));
            }
        }
        let pristine = base.clone();
        let region = DamageRegion::new(5, 5, 6, 6);

        let saved = base.extract(region);
        assert_eq!(saved.size(), Size::new(6, 6));
        base.fill_region(region, BLUE);
        assert_ne!(base, pristine);

        base.copy_from(&saved, region);
        assert_eq!(base, pristine);
    }

    #[test]
    fn test_write_png() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("frames/frame.png");
        PixelBuffer::filled(4, 3, RED).write_png(&path)?;

        let decoder = png::Decoder::new(File::open(&path)?);
        let reader = decoder.read_info()?;
        assert_eq!(reader.info().width, 4);
        assert_eq!(reader.info().height, 3);
        Ok(())
    }
}
