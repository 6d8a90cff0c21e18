//! Draw surface contract
//!
//! The renderer that finally shows a frame only has to accept a pixel buffer
//! together with source and destination rectangles.

use crate::geometry::Rect;
use crate::pixels::PixelBuffer;

/// Something a finished viewport frame can be composited onto.
pub trait DrawSurface {
    /// Composite `src_rect` of `src` into `dst_rect` of the surface
    fn blit(&mut self, src: &PixelBuffer, src_rect: Rect, dst_rect: Rect);

    /// Called once the frame has been drawn, for overlays
    fn finish(&mut self) {}
}

impl DrawSurface for PixelBuffer {
    fn blit(&mut self, src: &PixelBuffer, src_rect: Rect, dst_rect: Rect) {
        PixelBuffer::blit(self, src, src_rect, dst_rect);
    }
}
