//! Scene-space geometry
//!
//! Integer rectangles use the half-open convention: `left..right` by
//! `top..bottom`. All scene, cache and viewport windows are expressed in
//! scene pixels.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Width and height in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    /// Create a new size
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Number of pixels covered
    pub fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    /// Returns true if either dimension is zero
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Rectangle anchored at the origin with this size
    pub fn to_rect(&self) -> Rect {
        Rect::from_origin_size(0, 0, *self)
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Floating point position, used for gesture focus points.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PointF {
    pub x: f32,
    pub y: f32,
}

impl PointF {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Integer rectangle in scene coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Rect {
    /// Create a rectangle from its four edges
    pub const fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self { left, top, right, bottom }
    }

    /// Create a rectangle from an origin and a size
    pub fn from_origin_size(x: i32, y: i32, size: Size) -> Self {
        Self {
            left: x,
            top: y,
            right: x.saturating_add(clamp_to_i32(size.width)),
            bottom: y.saturating_add(clamp_to_i32(size.height)),
        }
    }

    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }

    /// Size of the rectangle; inverted rectangles report zero
    pub fn size(&self) -> Size {
        Size::new(self.width().max(0) as u32, self.height().max(0) as u32)
    }

    pub fn is_empty(&self) -> bool {
        self.left >= self.right || self.top >= self.bottom
    }

    /// Returns true if `other` lies entirely inside this rectangle.
    ///
    /// An empty `other` is never contained, matching the behaviour a
    /// draw path expects when the viewport has not been sized yet.
    pub fn contains(&self, other: &Rect) -> bool {
        !self.is_empty()
            && !other.is_empty()
            && self.left <= other.left
            && self.top <= other.top
            && self.right >= other.right
            && self.bottom >= other.bottom
    }

    /// Returns true if the rectangle lies inside `[0, size]` on both axes
    pub fn is_within(&self, size: Size) -> bool {
        self.left >= 0
            && self.top >= 0
            && i64::from(self.right) <= i64::from(size.width)
            && i64::from(self.bottom) <= i64::from(size.height)
    }

    /// Intersection of two rectangles, or `None` if they do not overlap
    pub fn intersect(&self, other: &Rect) -> Option<Rect> {
        let r = Rect {
            left: self.left.max(other.left),
            top: self.top.max(other.top),
            right: self.right.min(other.right),
            bottom: self.bottom.min(other.bottom),
        };
        if r.is_empty() {
            None
        } else {
            Some(r)
        }
    }

    /// The same rectangle moved by `(dx, dy)`
    pub fn offset(&self, dx: i32, dy: i32) -> Rect {
        Rect {
            left: self.left + dx,
            top: self.top + dy,
            right: self.right + dx,
            bottom: self.bottom + dy,
        }
    }

    /// The rectangle at `1 / (1 << shift)` scale, rounded outwards so a
    /// non-empty rectangle never collapses to an empty one.
    pub fn downscaled(&self, shift: u32) -> Rect {
        let round = (1i64 << shift) - 1;
        let up = |v: i32| ((i64::from(v) + round) >> shift) as i32;
        Rect {
            left: self.left >> shift,
            top: self.top >> shift,
            right: up(self.right),
            bottom: up(self.bottom),
        }
    }
}

impl fmt::Display for Rect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{},{}][{},{}]", self.left, self.top, self.right, self.bottom)
    }
}

pub(crate) fn clamp_to_i32(v: u32) -> i32 {
    i32::try_from(v).unwrap_or(i32::MAX)
}
