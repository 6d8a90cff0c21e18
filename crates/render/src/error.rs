//! Errors raised while allocating or decoding pixels

use crate::geometry::{Rect, Size};

/// Errors produced by pixel buffers and region sources.
///
/// Only [`RenderError::OutOfMemory`] is recoverable: the cache reacts to it
/// by shrinking future windows. Everything else is fatal to scene setup.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    /// A pixel allocation could not be satisfied
    #[error("out of memory allocating {bytes} bytes")]
    OutOfMemory { bytes: u64 },

    /// The requested region is empty or outside the image
    #[error("region {region} is outside image bounds {bounds}")]
    InvalidRegion { region: Rect, bounds: Size },

    /// The underlying stream failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The image could not be decoded
    #[error("image decode error: {0}")]
    Image(#[from] image::ImageError),

    /// The stream does not describe a usable image
    #[error("invalid image data: {0}")]
    Format(String),
}

impl RenderError {
    /// Returns true for the recoverable out-of-memory condition
    pub fn is_out_of_memory(&self) -> bool {
        matches!(self, RenderError::OutOfMemory { .. })
    }
}

/// Result alias for render operations
pub type RenderResult<T> = Result<T, RenderError>;
