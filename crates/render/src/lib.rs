//! Vastview Render Library
//!
//! Pixels and geometry for the windowed scene viewer: RGBA buffers with a
//! scaling blit, scene-space rectangles, the region source contract with
//! file and stream backed implementations, and the low resolution sample
//! image used as a fallback.

pub mod error;
pub mod geometry;
pub mod pixels;
pub mod sample;
pub mod source;
pub mod surface;

pub use error::{RenderError, RenderResult};
pub use geometry::{PointF, Rect, Size};
pub use pixels::{PixelBuffer, BLACK, BYTES_PER_PIXEL};
pub use sample::SampleImage;
pub use source::{ImageRegionSource, RawRegionSource, RegionSource};
pub use surface::DrawSurface;
