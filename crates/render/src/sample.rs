//! Low resolution fallback image
//!
//! The sample is the whole scene decoded once at load time at
//! `1 / (1 << shift)` linear resolution. It is drawn whenever the high
//! resolution cache cannot serve a frame, so a sized viewport never shows
//! a blank frame once setup has succeeded.

use crate::error::RenderResult;
use crate::geometry::{Rect, Size};
use crate::pixels::PixelBuffer;
use crate::source::RegionSource;

/// Whole-scene buffer at reduced resolution.
#[derive(Debug, Clone)]
pub struct SampleImage {
    buffer: PixelBuffer,
    shift: u32,
}

impl SampleImage {
    /// Decode the sample from a region source.
    ///
    /// # Errors
    /// Propagates any decode error; at setup time all of them are fatal.
    pub fn decode(source: &dyn RegionSource, shift: u32) -> RenderResult<Self> {
        let buffer = source.decode_full(shift)?;
        tracing::debug!(size = %buffer.size(), shift, "decoded sample image");
        Ok(Self { buffer, shift })
    }

    /// Wrap an already downsampled buffer
    pub fn from_buffer(buffer: PixelBuffer, shift: u32) -> Self {
        Self { buffer, shift }
    }

    pub fn shift(&self) -> u32 {
        self.shift
    }

    pub fn size(&self) -> Size {
        self.buffer.size()
    }

    pub fn buffer(&self) -> &PixelBuffer {
        &self.buffer
    }

    /// Scale the part of the sample covering `scene_rect` onto all of `dst`.
    pub fn draw_into(&self, dst: &mut PixelBuffer, scene_rect: Rect) {
        if scene_rect.is_empty() || self.buffer.size().is_empty() {
            return;
        }
        let src = self.sample_rect(scene_rect);
        let target = dst.size().to_rect();
        dst.blit(&self.buffer, src, target);
    }

    /// Sample pixels covering `scene_rect`, kept inside the sample and at
    /// least one pixel on each axis.
    fn sample_rect(&self, scene_rect: Rect) -> Rect {
        let bounds = self.buffer.size().to_rect();
        let mut src = scene_rect.downscaled(self.shift);
        src.right = src.right.clamp(1, bounds.right);
        src.bottom = src.bottom.clamp(1, bounds.bottom);
        src.left = src.left.clamp(0, src.right - 1);
        src.top = src.top.clamp(0, src.bottom - 1);
        src
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_4x() -> SampleImage {
        // 100x100 scene sampled at 1/4: 25x25, each pixel tagged with its coords
        let mut buf = PixelBuffer::try_new(25, 25).unwrap();
        for y in 0..25 {
            for x in 0..25 {
                buf.put_pixel(x, y, [x as u8, y as u8, 0, 255]);
            }
        }
        SampleImage::from_buffer(buf, 2)
    }

    #[test]
    fn test_draw_maps_scene_to_sample_coords() {
        let sample = sample_4x();
        let mut dst = PixelBuffer::try_new(20, 20).unwrap();
        sample.draw_into(&mut dst, Rect::new(40, 20, 60, 40));
        // Scene (40, 20) is sample (10, 5); 5x5 sample pixels stretched to 20x20
        assert_eq!(dst.pixel(0, 0), Some([10, 5, 0, 255]));
        assert_eq!(dst.pixel(19, 19), Some([14, 9, 0, 255]));
    }

    #[test]
    fn test_draw_small_window_uses_covering_pixel() {
        let sample = sample_4x();
        let mut dst = PixelBuffer::try_new(8, 6).unwrap();
        // Narrower than one sample pixel on both axes
        sample.draw_into(&mut dst, Rect::new(41, 22, 43, 23));
        assert_eq!(dst.pixel(0, 0), Some([10, 5, 0, 255]));
        assert_eq!(dst.pixel(7, 5), Some([10, 5, 0, 255]));
    }

    #[test]
    fn test_draw_clamps_to_sample_edge() {
        // 102 scene pixels at 1/4 leave a partial column past the sample
        let sample = sample_4x();
        let mut dst = PixelBuffer::try_new(4, 4).unwrap();
        sample.draw_into(&mut dst, Rect::new(100, 100, 102, 102));
        assert_eq!(dst.pixel(0, 0), Some([24, 24, 0, 255]));
        assert_eq!(dst.pixel(3, 3), Some([24, 24, 0, 255]));
    }

    #[test]
    fn test_accessors() {
        let sample = sample_4x();
        assert_eq!(sample.shift(), 2);
        assert_eq!(sample.size(), Size::new(25, 25));
        assert_eq!(sample.buffer().width(), 25);
    }
}
