//! The `Frame` pixel buffer and the operations the pipeline needs on it.

use crate::types::{Color, PixelFormat, Rotate};
use image::{RgbImage, RgbaImage};
use thiserror::Error;

/// Errors from frame pixel operations.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("buffer length {actual} does not match {width}x{height} {format:?} ({expected})")]
    BadLength {
        width: u32,
        height: u32,
        format: PixelFormat,
        expected: usize,
        actual: usize,
    },

    #[error("frame dimensions {src_w}x{src_h} do not match {dst_w}x{dst_h}")]
    DimensionMismatch {
        src_w: u32,
        src_h: u32,
        dst_w: u32,
        dst_h: u32,
    },

    #[error("source {src_w}x{src_h} does not fit in destination {dst_w}x{dst_h}")]
    DoesNotFit {
        src_w: u32,
        src_h: u32,
        dst_w: u32,
        dst_h: u32,
    },

    #[error("pixel format {src:?} does not match {dst:?}")]
    FormatMismatch { src: PixelFormat, dst: PixelFormat },

    #[error("no conversion from {src:?} to {dst:?}")]
    Unconvertible { src: PixelFormat, dst: PixelFormat },
}

/// A 2D pixel buffer with an explicit format.
///
/// Rows are tightly packed (`width * bytes_per_pixel` stride). A frame is
/// exclusively owned by whichever pipeline stage currently holds it; the
/// move semantics of passing it along are what enforce the one-holder
/// invariant of the pooled buffers.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    width: u32,
    height: u32,
    format: PixelFormat,
    data: Vec<u8>,
}

impl Frame {
    /// Allocate a zeroed frame.
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        let len = width as usize * height as usize * format.bytes_per_pixel();
        Self {
            width,
            height,
            format,
            data: vec![0; len],
        }
    }

    /// Wrap an existing buffer, validating its length.
    pub fn from_raw(
        width: u32,
        height: u32,
        format: PixelFormat,
        data: Vec<u8>,
    ) -> Result<Self, FrameError> {
        let expected = width as usize * height as usize * format.bytes_per_pixel();
        if data.len() != expected {
            return Err(FrameError::BadLength {
                width,
                height,
                format,
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            format,
            data,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// `(width, height)` pair.
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// True when either dimension is zero.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Row stride in bytes.
    pub fn pitch(&self) -> usize {
        self.width as usize * self.format.bytes_per_pixel()
    }

    /// Re-shape this frame in place, reusing its allocation.
    ///
    /// Used by the dispatch scratch buffers, which are allocated once and
    /// resized to match whatever the current stream delivers.
    pub fn reshape(&mut self, width: u32, height: u32, format: PixelFormat) {
        let len = width as usize * height as usize * format.bytes_per_pixel();
        self.data.resize(len, 0);
        self.width = width;
        self.height = height;
        self.format = format;
    }

    /// Fill every pixel with `color` (its luminance for single-channel
    /// formats).
    pub fn fill(&mut self, color: Color) {
        match self.format {
            PixelFormat::Gray8 => self.data.fill(color.luma()),
            PixelFormat::Gray16 => {
                let v = color.luma() as u16 * 257;
                for px in self.data.chunks_exact_mut(2) {
                    px.copy_from_slice(&v.to_le_bytes());
                }
            }
            PixelFormat::Rgb8 => {
                for px in self.data.chunks_exact_mut(3) {
                    px[0] = color.r;
                    px[1] = color.g;
                    px[2] = color.b;
                }
            }
            PixelFormat::Rgba8 => {
                for px in self.data.chunks_exact_mut(4) {
                    px[0] = color.r;
                    px[1] = color.g;
                    px[2] = color.b;
                    px[3] = color.a;
                }
            }
        }
    }

    /// Copy `src` into this frame. Dimensions and format must match exactly;
    /// pooled framebuffers are fixed-size and are never reallocated here.
    pub fn copy_from(&mut self, src: &Frame) -> Result<(), FrameError> {
        if self.format != src.format {
            return Err(FrameError::FormatMismatch {
                src: src.format,
                dst: self.format,
            });
        }
        if self.width != src.width || self.height != src.height {
            return Err(FrameError::DimensionMismatch {
                src_w: src.width,
                src_h: src.height,
                dst_w: self.width,
                dst_h: self.height,
            });
        }
        self.data.copy_from_slice(&src.data);
        Ok(())
    }

    /// Rotate into `dst`, reshaping it as needed. Never rotates in place:
    /// a quarter turn swaps width/height, which would invalidate any
    /// sub-region view another stage holds into the source buffer.
    pub fn rotate_into(&self, rot: Rotate, dst: &mut Frame) {
        let (out_w, out_h) = rot.rotated_size(self.width, self.height);
        dst.reshape(out_w, out_h, self.format);

        let bpp = self.format.bytes_per_pixel();
        let src_pitch = self.pitch();
        let dst_pitch = dst.pitch();
        let (w, h) = (self.width as usize, self.height as usize);

        for dy in 0..out_h as usize {
            for dx in 0..out_w as usize {
                let (sx, sy) = match rot {
                    Rotate::Cw90 => (dy, h - 1 - dx),
                    Rotate::Ccw90 => (w - 1 - dy, dx),
                    Rotate::Half => (w - 1 - dx, h - 1 - dy),
                };
                let s = sy * src_pitch + sx * bpp;
                let d = dy * dst_pitch + dx * bpp;
                dst.data[d..d + bpp].copy_from_slice(&self.data[s..s + bpp]);
            }
        }
    }

    /// Convert into `dst` with the given target format, reshaping `dst`.
    ///
    /// Supported: identity, `Gray8` expansion to `Rgb8`/`Rgba8`, and
    /// `Rgb8`<->`Rgba8`. `Gray16` has no displayable conversion.
    pub fn convert_into(&self, target: PixelFormat, dst: &mut Frame) -> Result<(), FrameError> {
        if target == self.format {
            dst.reshape(self.width, self.height, target);
            dst.data.copy_from_slice(&self.data);
            return Ok(());
        }

        let err = FrameError::Unconvertible {
            src: self.format,
            dst: target,
        };

        dst.reshape(self.width, self.height, target);
        match (self.format, target) {
            (PixelFormat::Gray8, PixelFormat::Rgb8) => {
                for (d, s) in dst.data.chunks_exact_mut(3).zip(self.data.iter()) {
                    d[0] = *s;
                    d[1] = *s;
                    d[2] = *s;
                }
            }
            (PixelFormat::Gray8, PixelFormat::Rgba8) => {
                for (d, s) in dst.data.chunks_exact_mut(4).zip(self.data.iter()) {
                    d[0] = *s;
                    d[1] = *s;
                    d[2] = *s;
                    d[3] = 255;
                }
            }
            (PixelFormat::Rgb8, PixelFormat::Rgba8) => {
                for (d, s) in dst.data.chunks_exact_mut(4).zip(self.data.chunks_exact(3)) {
                    d[0] = s[0];
                    d[1] = s[1];
                    d[2] = s[2];
                    d[3] = 255;
                }
            }
            (PixelFormat::Rgba8, PixelFormat::Rgb8) => {
                for (d, s) in dst.data.chunks_exact_mut(3).zip(self.data.chunks_exact(4)) {
                    d[0] = s[0];
                    d[1] = s[1];
                    d[2] = s[2];
                }
            }
            _ => return Err(err),
        }
        Ok(())
    }

    /// Copy `src` into this frame's top-left corner. `src` must be the same
    /// format and no larger in either dimension.
    pub fn blit_top_left(&mut self, src: &Frame) -> Result<(), FrameError> {
        if self.format != src.format {
            return Err(FrameError::FormatMismatch {
                src: src.format,
                dst: self.format,
            });
        }
        if src.width > self.width || src.height > self.height {
            return Err(FrameError::DoesNotFit {
                src_w: src.width,
                src_h: src.height,
                dst_w: self.width,
                dst_h: self.height,
            });
        }

        let row = src.pitch();
        let dst_pitch = self.pitch();
        for y in 0..src.height as usize {
            let d = y * dst_pitch;
            let s = y * row;
            self.data[d..d + row].copy_from_slice(&src.data[s..s + row]);
        }
        Ok(())
    }

    /// Read one pixel as a [`Color`] (single-channel formats replicate into
    /// gray). Intended for tests and the software canvas, not hot paths.
    pub fn pixel(&self, x: u32, y: u32) -> Color {
        let bpp = self.format.bytes_per_pixel();
        let i = y as usize * self.pitch() + x as usize * bpp;
        match self.format {
            PixelFormat::Gray8 => {
                let v = self.data[i];
                Color::rgb(v, v, v)
            }
            PixelFormat::Gray16 => {
                let v = (u16::from_le_bytes([self.data[i], self.data[i + 1]]) >> 8) as u8;
                Color::rgb(v, v, v)
            }
            PixelFormat::Rgb8 => Color::rgb(self.data[i], self.data[i + 1], self.data[i + 2]),
            PixelFormat::Rgba8 => Color::rgba(
                self.data[i],
                self.data[i + 1],
                self.data[i + 2],
                self.data[i + 3],
            ),
        }
    }

    /// Write one pixel. Intended for tests and pattern generators.
    pub fn put_pixel(&mut self, x: u32, y: u32, color: Color) {
        let bpp = self.format.bytes_per_pixel();
        let i = y as usize * self.pitch() + x as usize * bpp;
        match self.format {
            PixelFormat::Gray8 => self.data[i] = color.luma(),
            PixelFormat::Gray16 => {
                let v = color.luma() as u16 * 257;
                self.data[i..i + 2].copy_from_slice(&v.to_le_bytes());
            }
            PixelFormat::Rgb8 => {
                self.data[i] = color.r;
                self.data[i + 1] = color.g;
                self.data[i + 2] = color.b;
            }
            PixelFormat::Rgba8 => {
                self.data[i] = color.r;
                self.data[i + 1] = color.g;
                self.data[i + 2] = color.b;
                self.data[i + 3] = color.a;
            }
        }
    }

    /// Build an `Rgb8` frame from an [`image::RgbImage`].
    pub fn from_rgb_image(img: &RgbImage) -> Self {
        Self {
            width: img.width(),
            height: img.height(),
            format: PixelFormat::Rgb8,
            data: img.as_raw().clone(),
        }
    }

    /// Render this frame out as an [`image::RgbaImage`].
    pub fn to_rgba_image(&self) -> RgbaImage {
        let mut out = RgbaImage::new(self.width, self.height);
        for y in 0..self.height {
            for x in 0..self.width {
                let c = self.pixel(x, y);
                out.put_pixel(x, y, image::Rgba([c.r, c.g, c.b, c.a]));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbered_gray(w: u32, h: u32) -> Frame {
        let data: Vec<u8> = (0..w * h).map(|i| i as u8).collect();
        Frame::from_raw(w, h, PixelFormat::Gray8, data).unwrap()
    }

    #[test]
    fn test_from_raw_rejects_bad_length() {
        assert!(Frame::from_raw(2, 2, PixelFormat::Rgb8, vec![0; 11]).is_err());
        assert!(Frame::from_raw(2, 2, PixelFormat::Rgb8, vec![0; 12]).is_ok());
    }

    #[test]
    fn test_rotate_cw90() {
        // 3x2 input:          2x3 output (cw):
        //  0 1 2               3 0
        //  3 4 5               4 1
        //                      5 2
        let src = numbered_gray(3, 2);
        let mut dst = Frame::new(0, 0, PixelFormat::Gray8);
        src.rotate_into(Rotate::Cw90, &mut dst);
        assert_eq!(dst.dimensions(), (2, 3));
        assert_eq!(dst.data(), &[3, 0, 4, 1, 5, 2]);
    }

    #[test]
    fn test_rotate_ccw90() {
        let src = numbered_gray(3, 2);
        let mut dst = Frame::new(0, 0, PixelFormat::Gray8);
        src.rotate_into(Rotate::Ccw90, &mut dst);
        assert_eq!(dst.dimensions(), (2, 3));
        assert_eq!(dst.data(), &[2, 5, 1, 4, 0, 3]);
    }

    #[test]
    fn test_rotate_half() {
        let src = numbered_gray(3, 2);
        let mut dst = Frame::new(0, 0, PixelFormat::Gray8);
        src.rotate_into(Rotate::Half, &mut dst);
        assert_eq!(dst.dimensions(), (3, 2));
        assert_eq!(dst.data(), &[5, 4, 3, 2, 1, 0]);
    }

    #[test]
    fn test_gray_to_rgba_expansion() {
        let src = numbered_gray(2, 1);
        let mut dst = Frame::new(0, 0, PixelFormat::Gray8);
        src.convert_into(PixelFormat::Rgba8, &mut dst).unwrap();
        assert_eq!(dst.format(), PixelFormat::Rgba8);
        assert_eq!(dst.data(), &[0, 0, 0, 255, 1, 1, 1, 255]);
    }

    #[test]
    fn test_gray16_is_not_displayable() {
        let src = Frame::new(2, 2, PixelFormat::Gray16);
        let mut dst = Frame::new(0, 0, PixelFormat::Gray8);
        assert!(matches!(
            src.convert_into(PixelFormat::Rgba8, &mut dst),
            Err(FrameError::Unconvertible { .. })
        ));
    }

    #[test]
    fn test_blit_top_left() {
        let mut dst = Frame::new(4, 4, PixelFormat::Gray8);
        dst.fill(Color::WHITE);
        let src = numbered_gray(2, 2);
        dst.blit_top_left(&src).unwrap();
        assert_eq!(dst.pixel(0, 0).r, 0);
        assert_eq!(dst.pixel(1, 1).r, 3);
        assert_eq!(dst.pixel(2, 0).r, 255);
        assert_eq!(dst.pixel(3, 3).r, 255);
    }

    #[test]
    fn test_blit_rejects_larger_source() {
        let mut dst = Frame::new(2, 2, PixelFormat::Gray8);
        let src = Frame::new(3, 2, PixelFormat::Gray8);
        assert!(matches!(
            dst.blit_top_left(&src),
            Err(FrameError::DoesNotFit { .. })
        ));
    }

    #[test]
    fn test_copy_from_requires_exact_match() {
        let mut dst = Frame::new(2, 2, PixelFormat::Rgb8);
        let src = Frame::new(2, 3, PixelFormat::Rgb8);
        assert!(dst.copy_from(&src).is_err());
        let src = Frame::new(2, 2, PixelFormat::Rgba8);
        assert!(dst.copy_from(&src).is_err());
        let mut src = Frame::new(2, 2, PixelFormat::Rgb8);
        src.fill(Color::rgb(9, 8, 7));
        dst.copy_from(&src).unwrap();
        assert_eq!(dst.pixel(1, 1), Color::rgb(9, 8, 7));
    }

    #[test]
    fn test_reshape_reuses_allocation() {
        let mut f = Frame::new(4, 4, PixelFormat::Rgba8);
        f.reshape(2, 2, PixelFormat::Gray8);
        assert_eq!(f.dimensions(), (2, 2));
        assert_eq!(f.data().len(), 4);
    }
}
