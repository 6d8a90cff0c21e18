//! Cache window sizing
//!
//! The cache window is the viewport window grown by the largest symmetric
//! margin whose pixels fit in the byte budget, then clamped into the scene.
//! Margin clipped off one edge is handed to the opposite edge so the window
//! keeps its size wherever the viewport sits.
//!
//! ```text
//!   +-----------------------------------------------+
//!   |  cache window                                  |
//!   |        +----------------+                      |
//!   |        |    viewport    |                      |
//!   |        +----------------+                      |
//!   |                                                |
//!   +-----------------------------------------------+
//! ```

use vastview_render::{Rect, Size};

/// Largest margin `t` with `(vw + t) * (vh + t) * bytes_per_pixel < budget`.
///
/// The same margin is added to both axes. Returns 0 when even the bare
/// viewport does not fit the budget.
pub fn margin_for_budget(viewport: Size, bytes_per_pixel: u32, budget_bytes: u64) -> u64 {
    let vw = u128::from(viewport.width);
    let vh = u128::from(viewport.height);
    let bpp = u128::from(bytes_per_pixel.max(1));
    let budget = u128::from(budget_bytes);
    let fits = |t: u128| (vw + t) * (vh + t) * bpp < budget;

    if !fits(0) {
        return 0;
    }

    // Positive root of t^2 + (vw+vh)t + vw*vh - budget/bpp = 0, then nudge
    // onto the exact integer boundary.
    let (w, h) = (vw as f64, vh as f64);
    let pixels = budget as f64 / bpp as f64;
    let disc = (w - h) * (w - h) + 4.0 * pixels;
    let mut t = ((disc.sqrt() - (w + h)) / 2.0).max(0.0) as u128;

    while t > 0 && !fits(t) {
        t -= 1;
    }
    while fits(t + 1) {
        t += 1;
    }
    u64::try_from(t).unwrap_or(u64::MAX)
}

/// Compute the cache window for a viewport window.
///
/// The result always lies inside `[0, scene]`, and contains `viewport`
/// whenever `viewport` itself lies inside the scene.
pub fn cache_window(viewport: Rect, scene: Size, bytes_per_pixel: u32, budget_bytes: u64) -> Rect {
    let margin = margin_for_budget(viewport.size(), bytes_per_pixel, budget_bytes);

    let (left, right) = spread_axis(
        viewport.left,
        viewport.right,
        margin,
        i64::from(scene.width),
    );
    let (top, bottom) = spread_axis(
        viewport.top,
        viewport.bottom,
        margin,
        i64::from(scene.height),
    );

    Rect::new(left, top, right, bottom)
}

/// Grow `[low, high)` by `margin` split evenly on both sides, within `[0, limit]`.
fn spread_axis(low: i32, high: i32, margin: u64, limit: i64) -> (i32, i32) {
    let (low, high) = (i64::from(low), i64::from(high));
    let extent = high - low;

    let mut margin = i64::try_from(margin).unwrap_or(i64::MAX);
    if extent.saturating_add(margin) > limit {
        margin = (limit - extent).max(0);
    }

    let half = margin >> 1;
    let mut start = low - half;
    let mut end = high + half;
    if start < 0 {
        end -= start;
        start = 0;
    }
    if end > limit {
        start -= end - limit;
        end = limit;
    }
    // Only reachable if the viewport is larger than the scene
    start = start.max(0);

    (to_i32(start), to_i32(end))
}

fn to_i32(v: i64) -> i32 {
    i32::try_from(v).unwrap_or(if v < 0 { i32::MIN } else { i32::MAX })
}
