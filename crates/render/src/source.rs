//! Region sources
//!
//! A [`RegionSource`] knows the dimensions of an image far too large to hold
//! in memory and can decode arbitrary rectangles of it on demand. The cache
//! worker calls [`RegionSource::decode_region`] off the interactive thread,
//! so implementations may take seconds; they must not assume the call will
//! succeed and report allocation failure as [`RenderError::OutOfMemory`].

use crate::error::{RenderError, RenderResult};
use crate::geometry::{Rect, Size};
use crate::pixels::{byte_len, PixelBuffer, BYTES_PER_PIXEL};
use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::{Mutex, PoisonError};

/// Lazily decodes rectangular regions of one large image.
pub trait RegionSource: Send + Sync {
    /// Full image dimensions in pixels
    fn bounds(&self) -> Size;

    /// Decode exactly `region` (scene coordinates) into a new buffer.
    fn decode_region(&self, region: Rect) -> RenderResult<PixelBuffer>;

    /// Decode the whole image downsampled by `1 << sample_shift` on each axis.
    fn decode_full(&self, sample_shift: u32) -> RenderResult<PixelBuffer>;
}

/// Reject empty regions and regions reaching outside `bounds`.
pub fn check_region(region: Rect, bounds: Size) -> RenderResult<()> {
    if region.is_empty() || !region.is_within(bounds) {
        return Err(RenderError::InvalidRegion { region, bounds });
    }
    Ok(())
}

/// Dimensions of a sample image decoded with `sample_shift`; never zero.
pub fn sample_size(bounds: Size, sample_shift: u32) -> Size {
    Size::new((bounds.width >> sample_shift).max(1), (bounds.height >> sample_shift).max(1))
}

/// Region source over any format the `image` crate can decode.
///
/// The compressed formats it reads offer no random access, so the image is
/// decoded once at construction and regions are cropped from it. Prefer
/// [`RawRegionSource`] when the image genuinely cannot fit in memory.
pub struct ImageRegionSource {
    pixels: PixelBuffer,
}

impl ImageRegionSource {
    /// Open an image file, guessing the format from its content.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or decoded.
    pub fn open<P: AsRef<Path>>(path: P) -> RenderResult<Self> {
        let file = File::open(path.as_ref())?;
        Self::from_reader(BufReader::new(file))
    }

    /// Decode an image from a seekable stream.
    ///
    /// # Errors
    /// Returns an error if the stream cannot be read or decoded.
    pub fn from_reader<R: BufRead + Seek>(reader: R) -> RenderResult<Self> {
        let decoded = image::ImageReader::new(reader)
            .with_guessed_format()?
            .decode()
            .map_err(map_image_error)?;
        let pixels = PixelBuffer::from(decoded.into_rgba8());
        if pixels.size().is_empty() {
            return Err(RenderError::Format("image has no pixels".to_string()));
        }
        tracing::debug!(size = %pixels.size(), "decoded image source");
        Ok(Self { pixels })
    }

    /// Wrap pixels that are already in memory
    pub fn from_pixels(pixels: PixelBuffer) -> Self {
        Self { pixels }
    }
}

impl RegionSource for ImageRegionSource {
    fn bounds(&self) -> Size {
        self.pixels.size()
    }

    fn decode_region(&self, region: Rect) -> RenderResult<PixelBuffer> {
        check_region(region, self.bounds())?;
        let size = region.size();
        let mut out = PixelBuffer::try_new(size.width, size.height)?;
        out.blit(&self.pixels, region, size.to_rect());
        Ok(out)
    }

    fn decode_full(&self, sample_shift: u32) -> RenderResult<PixelBuffer> {
        let size = sample_size(self.bounds(), sample_shift);
        let mut out = PixelBuffer::try_new(size.width, size.height)?;
        out.blit(&self.pixels, self.bounds().to_rect(), size.to_rect());
        Ok(out)
    }
}

fn map_image_error(err: image::ImageError) -> RenderError {
    use image::error::{ImageError, LimitErrorKind};
    match err {
        ImageError::Limits(ref limit)
            if matches!(limit.kind(), LimitErrorKind::InsufficientMemory) =>
        {
            RenderError::OutOfMemory { bytes: 0 }
        }
        other => RenderError::Image(other),
    }
}

/// Region source over an uncompressed RGBA8 stream.
///
/// The stream holds `width * height` pixels, row-major, no header; the
/// dimensions are supplied by the caller. Region decodes seek to and read
/// only the rows they need, so memory use is bounded by the region.
pub struct RawRegionSource<R> {
    reader: Mutex<R>,
    size: Size,
    base: u64,
}

impl RawRegionSource<BufReader<File>> {
    /// Open a raw RGBA file of the given dimensions.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened or is too short.
    pub fn open<P: AsRef<Path>>(path: P, size: Size) -> RenderResult<Self> {
        let file = File::open(path.as_ref())?;
        Self::new(BufReader::new(file), size)
    }
}

impl<R: Read + Seek + Send> RawRegionSource<R> {
    /// Wrap a seekable stream positioned at the first pixel.
    ///
    /// # Errors
    /// Returns [`RenderError::Format`] if the stream is shorter than the
    /// declared dimensions require, or the dimensions are empty.
    pub fn new(mut reader: R, size: Size) -> RenderResult<Self> {
        if size.is_empty() {
            return Err(RenderError::Format(format!("invalid raw image size {size}")));
        }
        let base = reader.stream_position()?;
        let end = reader.seek(SeekFrom::End(0))?;
        let needed = byte_len(size.width, size.height);
        if end.saturating_sub(base) < needed {
            return Err(RenderError::Format(format!(
                "raw stream holds {} bytes, {size} RGBA needs {needed}",
                end.saturating_sub(base)
            )));
        }
        Ok(Self { reader: Mutex::new(reader), size, base })
    }

    fn row_offset(&self, x: u32, y: u32) -> u64 {
        self.base
            + (u64::from(y) * u64::from(self.size.width) + u64::from(x)) * u64::from(BYTES_PER_PIXEL)
    }
}

impl<R: Read + Seek + Send> RegionSource for RawRegionSource<R> {
    fn bounds(&self) -> Size {
        self.size
    }

    fn decode_region(&self, region: Rect) -> RenderResult<PixelBuffer> {
        check_region(region, self.size)?;
        let size = region.size();
        let mut out = PixelBuffer::try_new(size.width, size.height)?;

        let mut reader = self.reader.lock().unwrap_or_else(PoisonError::into_inner);
        for row in 0..size.height {
            let y = region.top as u32 + row;
            reader.seek(SeekFrom::Start(self.row_offset(region.left as u32, y)))?;
            reader.read_exact(out.row_mut(row))?;
        }
        Ok(out)
    }

    fn decode_full(&self, sample_shift: u32) -> RenderResult<PixelBuffer> {
        let step = 1u32 << sample_shift;
        let size = sample_size(self.size, sample_shift);
        let mut out = PixelBuffer::try_new(size.width, size.height)?;
        let mut line = vec![0u8; self.size.width as usize * BYTES_PER_PIXEL as usize];

        let mut reader = self.reader.lock().unwrap_or_else(PoisonError::into_inner);
        for oy in 0..size.height {
            let y = (oy * step).min(self.size.height - 1);
            reader.seek(SeekFrom::Start(self.row_offset(0, y)))?;
            reader.read_exact(&mut line)?;
            let dst = out.row_mut(oy);
            for ox in 0..size.width as usize {
                let sx = (ox * step as usize).min(self.size.width as usize - 1);
                let s = sx * BYTES_PER_PIXEL as usize;
                let d = ox * BYTES_PER_PIXEL as usize;
                dst[d..d + 4].copy_from_slice(&line[s..s + 4]);
            }
        }
        Ok(out)
    }
}
