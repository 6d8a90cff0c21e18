//! The on-screen window into the scene
//!
//! A viewport has a physical size (device pixels) and a zoom factor. Its
//! window in scene space is `physical / zoom`, placed at an origin that is
//! always clamped so the window stays inside the scene.

use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use vastview_cache::Frame;
use vastview_render::{
    DrawSurface, PixelBuffer, PointF, Rect, RenderResult, SampleImage, Size, BLACK,
};

/// Position and zoom of a viewport, for the caller to persist and restore.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ViewState {
    pub origin: (i32, i32),
    pub zoom: f32,
}

#[derive(Debug)]
struct ViewportInner {
    physical: Size,
    zoom: f64,
    window: Rect,
    buffer: Option<PixelBuffer>,
}

/// Viewport over a scene of fixed size.
#[derive(Debug)]
pub struct Viewport {
    scene: Size,
    min_visible: u32,
    inner: Mutex<ViewportInner>,
}

impl Viewport {
    /// Create an unsized viewport at the scene origin with zoom 1.
    pub fn new(scene: Size, min_visible_pixels: u32) -> Self {
        Self {
            scene,
            min_visible: min_visible_pixels.max(1),
            inner: Mutex::new(ViewportInner {
                physical: Size::default(),
                zoom: 1.0,
                window: Rect::default(),
                buffer: None,
            }),
        }
    }

    pub fn scene_size(&self) -> Size {
        self.scene
    }

    /// Resize the physical viewport, reallocating its buffer.
    ///
    /// The zoom is raised if needed so the window never exceeds the scene.
    ///
    /// # Errors
    /// Returns [`vastview_render::RenderError::OutOfMemory`] if the buffer
    /// cannot be allocated; the viewport is then left without a buffer.
    pub fn set_size(&self, physical: Size) -> RenderResult<()> {
        let mut inner = self.lock();
        inner.buffer = None;
        inner.physical = physical;
        inner.zoom = inner.zoom.max(self.min_zoom(physical));
        self.resize_window(&mut inner);

        if !physical.is_empty() {
            inner.buffer = Some(PixelBuffer::try_new(physical.width, physical.height)?);
        }
        Ok(())
    }

    pub fn physical_size(&self) -> Size {
        self.lock().physical
    }

    /// Current zoom; values above 1 magnify
    pub fn zoom_factor(&self) -> f32 {
        self.lock().zoom as f32
    }

    /// The visible part of the scene
    pub fn window(&self) -> Rect {
        self.lock().window
    }

    pub fn origin(&self) -> (i32, i32) {
        let window = self.lock().window;
        (window.left, window.top)
    }

    /// Move the window, clamping it into the scene.
    pub fn set_origin(&self, x: i32, y: i32) {
        let mut inner = self.lock();
        self.place(&mut inner, i64::from(x), i64::from(y));
    }

    /// Centre the window in the scene.
    pub fn center(&self) {
        let mut inner = self.lock();
        let size = inner.window.size();
        let x = (i64::from(self.scene.width) - i64::from(size.width)) / 2;
        let y = (i64::from(self.scene.height) - i64::from(size.height)) / 2;
        self.place(&mut inner, x, y);
    }

    /// Drag: place the window at `origin_at_down` moved against a screen
    /// space drag of `screen_delta`.
    pub fn pan_from(&self, origin_at_down: (i32, i32), screen_delta: PointF) {
        let mut inner = self.lock();
        let (sx, sy) = self.screen_to_scene_scale(&inner);
        let x = f64::from(origin_at_down.0) - f64::from(screen_delta.x) * sx;
        let y = f64::from(origin_at_down.1) - f64::from(screen_delta.y) * sy;
        self.place(&mut inner, x.round() as i64, y.round() as i64);
    }

    /// Zoom by `factor` keeping the scene point under `focus` (screen
    /// coordinates) in place.
    ///
    /// The resulting window is kept between the minimum visible extent and
    /// the scene size, with the physical aspect ratio preserved.
    pub fn zoom(&self, factor: f32, focus: PointF) {
        let factor = f64::from(factor);
        if !factor.is_finite() || factor <= 0.0 {
            return;
        }
        let mut inner = self.lock();
        let physical = inner.physical;
        if physical.is_empty() {
            return;
        }

        let (sx, sy) = self.screen_to_scene_scale(&inner);
        let focus_x = f64::from(focus.x);
        let focus_y = f64::from(focus.y);
        let scene_focus_x = f64::from(inner.window.left) + focus_x * sx;
        let scene_focus_y = f64::from(inner.window.top) + focus_y * sy;

        let pw = f64::from(physical.width);
        let ph = f64::from(physical.height);
        let aspect = pw / ph;
        let max_width = f64::from(self.scene.width).min(f64::from(self.scene.height) * aspect);
        let min_visible = f64::from(self.min_visible);
        let min_width = min_visible.max(min_visible * aspect).min(max_width);

        let width = (pw / (inner.zoom * factor)).clamp(min_width, max_width);
        inner.zoom = pw / width;
        self.resize_window(&mut inner);

        let (sx, sy) = self.screen_to_scene_scale(&inner);
        let x = scene_focus_x - focus_x * sx;
        let y = scene_focus_y - focus_y * sy;
        self.place(&mut inner, x.round() as i64, y.round() as i64);
    }

    pub fn view_state(&self) -> ViewState {
        let inner = self.lock();
        ViewState {
            origin: (inner.window.left, inner.window.top),
            zoom: inner.zoom as f32,
        }
    }

    /// Apply a saved position and zoom, clamped to what fits the scene.
    pub fn restore_view_state(&self, state: ViewState) {
        let mut inner = self.lock();
        let zoom = f64::from(state.zoom);
        if zoom.is_finite() && zoom > 0.0 {
            inner.zoom = zoom.max(self.min_zoom(inner.physical));
            self.resize_window(&mut inner);
        }
        self.place(&mut inner, i64::from(state.origin.0), i64::from(state.origin.1));
    }

    /// Render `frame` into the viewport buffer and present it on `surface`.
    ///
    /// A cached frame whose window no longer covers the viewport (the
    /// viewport moved after the cache was consulted) falls back to the
    /// sample image.
    pub fn present(&self, frame: &Frame, sample: &SampleImage, surface: &mut dyn DrawSurface) {
        let mut inner = self.lock();
        let window = inner.window;
        let Some(buffer) = inner.buffer.as_mut() else {
            return;
        };
        let full = buffer.size().to_rect();

        match frame {
            Frame::Blank => return,
            Frame::Cached(cached) if cached.window.contains(&window) => {
                buffer.fill(BLACK);
                buffer.blit(&cached.buffer, cached.source_rect(window), full);
            }
            Frame::Cached(_) | Frame::Sample => sample.draw_into(buffer, window),
        }
        surface.blit(buffer, full, full);
    }

    /// Scene pixels per screen pixel on each axis
    fn screen_to_scene_scale(&self, inner: &ViewportInner) -> (f64, f64) {
        let size = inner.window.size();
        let physical = inner.physical;
        if physical.is_empty() {
            return (1.0, 1.0);
        }
        (
            f64::from(size.width) / f64::from(physical.width),
            f64::from(size.height) / f64::from(physical.height),
        )
    }

    /// Smallest zoom at which `physical` fits inside the scene
    fn min_zoom(&self, physical: Size) -> f64 {
        if self.scene.is_empty() {
            return 1.0;
        }
        let zx = f64::from(physical.width) / f64::from(self.scene.width);
        let zy = f64::from(physical.height) / f64::from(self.scene.height);
        zx.max(zy).max(f64::MIN_POSITIVE)
    }

    /// Recompute the window extent from physical size and zoom, keeping the
    /// origin.
    fn resize_window(&self, inner: &mut ViewportInner) {
        let extent = |physical: u32, limit: u32| -> u32 {
            if physical == 0 {
                return 0;
            }
            let v = (f64::from(physical) / inner.zoom).round();
            (v.max(1.0) as u32).min(limit)
        };
        let size = Size::new(
            extent(inner.physical.width, self.scene.width),
            extent(inner.physical.height, self.scene.height),
        );
        let (left, top) = (inner.window.left, inner.window.top);
        inner.window = Rect::from_origin_size(left, top, size);
        self.place(inner, i64::from(left), i64::from(top));
    }

    fn place(&self, inner: &mut ViewportInner, x: i64, y: i64) {
        let size = inner.window.size();
        let max_x = (i64::from(self.scene.width) - i64::from(size.width)).max(0);
        let max_y = (i64::from(self.scene.height) - i64::from(size.height)).max(0);
        let x = x.clamp(0, max_x) as i32;
        let y = y.clamp(0, max_y) as i32;
        inner.window = Rect::from_origin_size(x, y, size);
    }

    fn lock(&self) -> MutexGuard<'_, ViewportInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
