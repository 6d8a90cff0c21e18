//! RGBA pixel buffers
//!
//! Every buffer in the engine (viewport, cache window, sample image) is a
//! `PixelBuffer`. Allocation is fallible so that a region too large for the
//! process turns into [`RenderError::OutOfMemory`] rather than an abort.

use crate::error::{RenderError, RenderResult};
use crate::geometry::{Rect, Size};

/// How many bytes one pixel uses (RGBA8)
pub const BYTES_PER_PIXEL: u32 = 4;

/// Opaque black, used to clear a buffer before a cache blit
pub const BLACK: [u8; 4] = [0, 0, 0, 255];

/// Owned RGBA8 pixel data in row-major order.
#[derive(Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl std::fmt::Debug for PixelBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PixelBuffer")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.data.len())
            .finish()
    }
}

impl PixelBuffer {
    /// Allocate a zeroed (transparent) buffer.
    ///
    /// # Errors
    /// Returns [`RenderError::OutOfMemory`] if the allocation cannot be made.
    pub fn try_new(width: u32, height: u32) -> RenderResult<Self> {
        let bytes = byte_len(width, height);
        let len = usize::try_from(bytes).map_err(|_| RenderError::OutOfMemory { bytes })?;
        let mut data = Vec::new();
        data.try_reserve_exact(len)
            .map_err(|_| RenderError::OutOfMemory { bytes })?;
        data.resize(len, 0);
        Ok(Self { width, height, data })
    }

    /// Wrap existing RGBA8 data.
    ///
    /// # Errors
    /// Returns [`RenderError::Format`] if `data` does not hold exactly
    /// `width * height` pixels.
    pub fn from_rgba(width: u32, height: u32, data: Vec<u8>) -> RenderResult<Self> {
        if data.len() as u64 != byte_len(width, height) {
            return Err(RenderError::Format(format!(
                "expected {} bytes for {}x{} RGBA, got {}",
                byte_len(width, height),
                width,
                height,
                data.len()
            )));
        }
        Ok(Self { width, height, data })
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

    /// Bytes held by the pixel data
    pub fn memory_size(&self) -> usize {
        self.data.len()
    }

    /// Raw RGBA8 bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Consume the buffer and return its RGBA8 bytes
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// Read one pixel, or `None` outside the buffer
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = self.offset(x, y);
        let mut px = [0u8; 4];
        px.copy_from_slice(&self.data[i..i + 4]);
        Some(px)
    }

    /// Write one pixel; writes outside the buffer are ignored
    pub fn put_pixel(&mut self, x: u32, y: u32, rgba: [u8; 4]) {
        if x < self.width && y < self.height {
            let i = self.offset(x, y);
            self.data[i..i + 4].copy_from_slice(&rgba);
        }
    }

    /// Fill every pixel with one colour
    pub fn fill(&mut self, rgba: [u8; 4]) {
        for px in self.data.chunks_exact_mut(4) {
            px.copy_from_slice(&rgba);
        }
    }

    /// One row of pixel bytes
    pub fn row(&self, y: u32) -> &[u8] {
        let stride = self.stride();
        let start = y as usize * stride;
        &self.data[start..start + stride]
    }

    /// One row of pixel bytes, mutable
    pub fn row_mut(&mut self, y: u32) -> &mut [u8] {
        let stride = self.stride();
        let start = y as usize * stride;
        &mut self.data[start..start + stride]
    }

    /// Copy `src_rect` of `src` into `dst_rect` of this buffer, scaling with
    /// nearest-neighbour sampling.
    ///
    /// Destination pixels whose source sample falls outside `src` are left
    /// untouched, and destination pixels outside this buffer are skipped.
    pub fn blit(&mut self, src: &PixelBuffer, src_rect: Rect, dst_rect: Rect) {
        if src_rect.is_empty() || dst_rect.is_empty() {
            return;
        }
        if src_rect.size() == dst_rect.size() {
            self.copy_unscaled(src, src_rect, dst_rect);
            return;
        }

        let Some(visible) = dst_rect.intersect(&self.size().to_rect()) else {
            return;
        };
        let src_w = i64::from(src_rect.width());
        let src_h = i64::from(src_rect.height());
        let dst_w = i64::from(dst_rect.width());
        let dst_h = i64::from(dst_rect.height());

        for y in visible.top..visible.bottom {
            let sy = i64::from(src_rect.top) + i64::from(y - dst_rect.top) * src_h / dst_h;
            if sy < 0 || sy >= i64::from(src.height) {
                continue;
            }
            for x in visible.left..visible.right {
                let sx = i64::from(src_rect.left) + i64::from(x - dst_rect.left) * src_w / dst_w;
                if sx < 0 || sx >= i64::from(src.width) {
                    continue;
                }
                let si = src.offset(sx as u32, sy as u32);
                let di = self.offset(x as u32, y as u32);
                self.data[di..di + 4].copy_from_slice(&src.data[si..si + 4]);
            }
        }
    }

    /// Same-size copy, done a row slice at a time
    fn copy_unscaled(&mut self, src: &PixelBuffer, src_rect: Rect, dst_rect: Rect) {
        let dx = dst_rect.left - src_rect.left;
        let dy = dst_rect.top - src_rect.top;
        // Clip in source space against both buffers
        let Some(clipped) = src_rect
            .intersect(&src.size().to_rect())
            .and_then(|r| r.intersect(&self.size().to_rect().offset(-dx, -dy)))
        else {
            return;
        };

        let row_bytes = clipped.width() as usize * BYTES_PER_PIXEL as usize;
        for sy in clipped.top..clipped.bottom {
            let si = src.offset(clipped.left as u32, sy as u32);
            let di = self.offset((clipped.left + dx) as u32, (sy + dy) as u32);
            self.data[di..di + row_bytes].copy_from_slice(&src.data[si..si + row_bytes]);
        }
    }

    fn stride(&self) -> usize {
        self.width as usize * BYTES_PER_PIXEL as usize
    }

    fn offset(&self, x: u32, y: u32) -> usize {
        y as usize * self.stride() + x as usize * BYTES_PER_PIXEL as usize
    }
}

impl From<image::RgbaImage> for PixelBuffer {
    fn from(img: image::RgbaImage) -> Self {
        let (width, height) = img.dimensions();
        Self { width, height, data: img.into_raw() }
    }
}

impl From<PixelBuffer> for image::RgbaImage {
    fn from(buf: PixelBuffer) -> Self {
        // Length is an invariant of PixelBuffer, so from_raw cannot fail
        image::RgbaImage::from_raw(buf.width, buf.height, buf.data)
            .unwrap_or_else(|| image::RgbaImage::new(0, 0))
    }
}

/// Bytes needed for a `width x height` RGBA buffer
pub fn byte_len(width: u32, height: u32) -> u64 {
    u64::from(width)
        .saturating_mul(u64::from(height))
        .saturating_mul(u64::from(BYTES_PER_PIXEL))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(width: u32, height: u32) -> PixelBuffer {
        let mut buf = PixelBuffer::try_new(width, height).unwrap();
        for y in 0..height {
            for x in 0..width {
                buf.put_pixel(x, y, [x as u8, y as u8, 0, 255]);
            }
        }
        buf
    }

    #[test]
    fn test_try_new_allocates_zeroed() {
        let buf = PixelBuffer::try_new(4, 3).unwrap();
        assert_eq!(buf.memory_size(), 48);
        assert!(buf.as_bytes().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_try_new_reports_out_of_memory() {
        let err = PixelBuffer::try_new(u32::MAX, u32::MAX).unwrap_err();
        assert!(err.is_out_of_memory());
    }

    #[test]
    fn test_from_rgba_checks_length() {
        assert!(PixelBuffer::from_rgba(2, 2, vec![0; 16]).is_ok());
        assert!(matches!(
            PixelBuffer::from_rgba(2, 2, vec![0; 15]),
            Err(RenderError::Format(_))
        ));
    }

    #[test]
    fn test_pixel_access() {
        let mut buf = PixelBuffer::try_new(2, 2).unwrap();
        buf.put_pixel(1, 1, [1, 2, 3, 4]);
        assert_eq!(buf.pixel(1, 1), Some([1, 2, 3, 4]));
        assert_eq!(buf.pixel(2, 0), None);
        buf.put_pixel(5, 5, [9, 9, 9, 9]);
    }

    #[test]
    fn test_fill() {
        let mut buf = PixelBuffer::try_new(3, 3).unwrap();
        buf.fill(BLACK);
        assert_eq!(buf.pixel(2, 2), Some(BLACK));
    }

    #[test]
    fn test_blit_unscaled_sub_rect() {
        let src = gradient(10, 10);
        let mut dst = PixelBuffer::try_new(4, 4).unwrap();
        dst.blit(&src, Rect::new(3, 5, 7, 9), Rect::new(0, 0, 4, 4));
        assert_eq!(dst.pixel(0, 0), Some([3, 5, 0, 255]));
        assert_eq!(dst.pixel(3, 3), Some([6, 8, 0, 255]));
    }

    #[test]
    fn test_blit_unscaled_clips_source() {
        let src = gradient(4, 4);
        let mut dst = PixelBuffer::try_new(4, 4).unwrap();
        dst.blit(&src, Rect::new(2, 2, 6, 6), Rect::new(0, 0, 4, 4));
        assert_eq!(dst.pixel(1, 1), Some([3, 3, 0, 255]));
        // Outside the source: untouched
        assert_eq!(dst.pixel(3, 3), Some([0, 0, 0, 0]));
    }

    #[test]
    fn test_blit_upscales() {
        let src = gradient(2, 2);
        let mut dst = PixelBuffer::try_new(4, 4).unwrap();
        dst.blit(&src, Rect::new(0, 0, 2, 2), Rect::new(0, 0, 4, 4));
        assert_eq!(dst.pixel(0, 0), Some([0, 0, 0, 255]));
        assert_eq!(dst.pixel(1, 1), Some([0, 0, 0, 255]));
        assert_eq!(dst.pixel(2, 0), Some([1, 0, 0, 255]));
        assert_eq!(dst.pixel(3, 3), Some([1, 1, 0, 255]));
    }

    #[test]
    fn test_blit_downscales() {
        let src = gradient(8, 8);
        let mut dst = PixelBuffer::try_new(2, 2).unwrap();
        dst.blit(&src, Rect::new(0, 0, 8, 8), Rect::new(0, 0, 2, 2));
        assert_eq!(dst.pixel(0, 0), Some([0, 0, 0, 255]));
        assert_eq!(dst.pixel(1, 1), Some([4, 4, 0, 255]));
    }

    #[test]
    fn test_blit_empty_rects_are_ignored() {
        let src = gradient(2, 2);
        let mut dst = PixelBuffer::try_new(2, 2).unwrap();
        dst.blit(&src, Rect::default(), Rect::new(0, 0, 2, 2));
        assert!(dst.as_bytes().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_image_conversion() {
        let buf = gradient(3, 2);
        let img: image::RgbaImage = buf.clone().into();
        assert_eq!(img.dimensions(), (3, 2));
        let back = PixelBuffer::from(img);
        assert_eq!(back, buf);
    }
}
