//! The cache window and its fill state machine.
//!
//! The draw path calls [`Cache::update`] once per frame. It decides under the
//! lock whether the cached buffer can serve the viewport and hands back an
//! `Arc` to it, so the pixel copy happens after the lock is released. The
//! fill worker drives the other half of the protocol through
//! [`Cache::wait_for_fill`], [`Cache::begin_fill`], [`Cache::plan_fill`] and
//! one of [`Cache::install`], [`Cache::fill_out_of_memory`] or
//! [`Cache::fill_failed`]. Each of those re-checks the state under the lock,
//! so a suspend or invalidate that lands mid-fill always wins.
//!
//! ```text
//!  Uninitialized --initialize--> Initialized --update--> StartUpdate
//!                                    ^                      |  ^
//!                                    |             begin_fill  | out of memory
//!                       set_suspend(false)                  v  |
//!                                    |                    InUpdate --install--> Ready
//!                                 Suspend                                         |
//!                                                      viewport left the window --+--> StartUpdate
//! ```

use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, error, warn};
use vastview_render::{PixelBuffer, Rect, RenderError, Size, BYTES_PER_PIXEL};

use crate::config::CacheConfig;
use crate::memory_budget::{BudgetPercent, MemoryProbe};
use crate::window::cache_window;

/// Fill state of a [`Cache`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheState {
    /// No region source attached yet
    Uninitialized,
    /// Ready to fill on the next frame
    Initialized,
    /// A fill has been requested and the worker has not picked it up
    StartUpdate,
    /// The worker is decoding
    InUpdate,
    /// The buffer is valid for the stored window
    Ready,
    /// Fills are paused
    Suspend,
}

impl fmt::Display for CacheState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CacheState::Uninitialized => "uninitialized",
            CacheState::Initialized => "initialized",
            CacheState::StartUpdate => "start_update",
            CacheState::InUpdate => "in_update",
            CacheState::Ready => "ready",
            CacheState::Suspend => "suspend",
        };
        f.write_str(name)
    }
}

/// Counters describing cache activity since creation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub fills_started: u64,
    pub fills_installed: u64,
    pub fills_discarded: u64,
    pub out_of_memory: u64,
    /// Frames served from the cache buffer
    pub cache_frames: u64,
    /// Frames that fell back to the sample image
    pub sample_frames: u64,
}

/// An installed cache buffer together with the scene window it covers.
#[derive(Debug, Clone)]
pub struct CachedFrame {
    pub buffer: Arc<PixelBuffer>,
    pub window: Rect,
}

impl CachedFrame {
    /// The part of the cache buffer showing `viewport_window`
    pub fn source_rect(&self, viewport_window: Rect) -> Rect {
        viewport_window.offset(-self.window.left, -self.window.top)
    }
}

/// What the draw path should show this frame.
#[derive(Debug, Clone)]
pub enum Frame {
    /// Copy from the cache buffer
    Cached(CachedFrame),
    /// Draw the low-resolution sample image
    Sample,
    /// Nothing to show yet
    Blank,
}

#[derive(Debug)]
struct CacheInner {
    state: CacheState,
    window: Rect,
    buffer: Option<Arc<PixelBuffer>>,
    shutdown: bool,
    stats: CacheStats,
}

/// The prefetched window around the viewport.
#[derive(Debug)]
pub struct Cache {
    scene: Size,
    budget: BudgetPercent,
    probe: Arc<dyn MemoryProbe>,
    log_transitions: bool,
    inner: Mutex<CacheInner>,
    changed: Condvar,
}

impl Cache {
    /// Create an uninitialized cache for a scene, using the memory probe the
    /// config asks for.
    pub fn new(scene: Size, config: &CacheConfig) -> Self {
        Self::with_probe(scene, config, config.memory_probe())
    }

    pub fn with_probe(scene: Size, config: &CacheConfig, probe: Arc<dyn MemoryProbe>) -> Self {
        Self {
            scene,
            budget: BudgetPercent::new(config.budget_percent),
            probe,
            log_transitions: config.log_transitions,
            inner: Mutex::new(CacheInner {
                state: CacheState::Uninitialized,
                window: Rect::default(),
                buffer: None,
                shutdown: false,
                stats: CacheStats::default(),
            }),
            changed: Condvar::new(),
        }
    }

    pub fn scene_size(&self) -> Size {
        self.scene
    }

    pub fn state(&self) -> CacheState {
        self.lock().state
    }

    /// The window of the current or most recently planned fill
    pub fn window(&self) -> Rect {
        self.lock().window
    }

    pub fn stats(&self) -> CacheStats {
        self.lock().stats
    }

    /// Current budget percentage
    pub fn budget_percent(&self) -> u8 {
        self.budget.get()
    }

    /// Bytes the next cache window may occupy
    pub fn budget_bytes(&self) -> u64 {
        self.budget.budget_bytes(self.probe.available_budget_bytes())
    }

    /// The window a fill for `viewport_window` would decode right now
    pub fn window_for(&self, viewport_window: Rect) -> Rect {
        cache_window(viewport_window, self.scene, BYTES_PER_PIXEL, self.budget_bytes())
    }

    /// Attach to a source: any previous buffer is dropped.
    pub fn initialize(&self) {
        let mut inner = self.lock();
        inner.buffer = None;
        self.transition(&mut inner, CacheState::Initialized);
    }

    /// Pause fills, or resume them if currently paused.
    ///
    /// `set_suspend(false)` does nothing unless the cache is suspended.
    pub fn set_suspend(&self, suspend: bool) {
        let mut inner = self.lock();
        if suspend {
            self.transition(&mut inner, CacheState::Suspend);
        } else if inner.state == CacheState::Suspend {
            self.transition(&mut inner, CacheState::Initialized);
        }
    }

    /// Force a refill on the next frame. An in-flight fill is discarded when
    /// it completes.
    pub fn invalidate(&self) {
        let mut inner = self.lock();
        self.transition(&mut inner, CacheState::Initialized);
    }

    /// Decide what to draw for `viewport_window`, requesting a fill if the
    /// cache cannot serve it.
    pub fn update(&self, viewport_window: Rect) -> Frame {
        let mut inner = self.lock();
        let frame = match inner.state {
            CacheState::Uninitialized => return Frame::Blank,
            CacheState::Initialized => {
                self.transition(&mut inner, CacheState::StartUpdate);
                Frame::Sample
            }
            CacheState::StartUpdate | CacheState::InUpdate | CacheState::Suspend => Frame::Sample,
            CacheState::Ready => match inner.buffer.clone() {
                Some(buffer) if inner.window.contains(&viewport_window) => {
                    Frame::Cached(CachedFrame {
                        buffer,
                        window: inner.window,
                    })
                }
                _ => {
                    self.transition(&mut inner, CacheState::StartUpdate);
                    Frame::Sample
                }
            },
        };

        match frame {
            Frame::Cached(_) => inner.stats.cache_frames += 1,
            _ => inner.stats.sample_frames += 1,
        }
        frame
    }

    /// Block until a fill is requested. Returns `false` once shut down.
    pub fn wait_for_fill(&self) -> bool {
        let inner = self.lock();
        let inner = self
            .changed
            .wait_while(inner, |i| !i.shutdown && i.state != CacheState::StartUpdate)
            .unwrap_or_else(PoisonError::into_inner);
        !inner.shutdown
    }

    /// Claim a requested fill, dropping the old buffer.
    ///
    /// Returns `false` if the request was withdrawn in the meantime.
    pub fn begin_fill(&self) -> bool {
        let mut inner = self.lock();
        if inner.state != CacheState::StartUpdate {
            return false;
        }
        inner.buffer = None;
        inner.stats.fills_started += 1;
        self.transition(&mut inner, CacheState::InUpdate);
        true
    }

    /// Compute and store the window to decode for `viewport_window`.
    ///
    /// Returns `None` if the fill was withdrawn.
    pub fn plan_fill(&self, viewport_window: Rect) -> Option<Rect> {
        let mut inner = self.lock();
        if inner.state != CacheState::InUpdate {
            return None;
        }
        inner.window = self.window_for(viewport_window);
        Some(inner.window)
    }

    /// Install a decoded buffer for the planned window.
    ///
    /// Returns `false` and drops `buffer` if the fill was withdrawn while it
    /// was decoding, or if its size does not match the planned window. A
    /// mismatched buffer is handled like a failed fill.
    pub fn install(&self, buffer: PixelBuffer) -> bool {
        let mut inner = self.lock();
        if inner.state != CacheState::InUpdate {
            inner.stats.fills_discarded += 1;
            warn!(
                state = %inner.state,
                window = %inner.window,
                "discarding completed cache fill"
            );
            return false;
        }
        if buffer.size() != inner.window.size() {
            inner.stats.fills_discarded += 1;
            error!(
                window = %inner.window,
                size = %buffer.size(),
                "cache fill returned a buffer of the wrong size"
            );
            self.transition(&mut inner, CacheState::Initialized);
            return false;
        }
        inner.buffer = Some(Arc::new(buffer));
        inner.stats.fills_installed += 1;
        self.transition(&mut inner, CacheState::Ready);
        true
    }

    /// Record an out-of-memory decode: shrink the budget and retry.
    ///
    /// Returns the new budget percentage. At a budget of zero there is
    /// nothing left to shrink, so the retry waits for the next frame instead.
    pub fn fill_out_of_memory(&self) -> u8 {
        let was = self.budget.get();
        let percent = self.budget.degrade();
        warn!(budget_percent = percent, "out of memory filling cache, shrinking budget");

        let mut inner = self.lock();
        inner.stats.out_of_memory += 1;
        if inner.state == CacheState::InUpdate {
            let next = if was == 0 {
                CacheState::Initialized
            } else {
                CacheState::StartUpdate
            };
            self.transition(&mut inner, next);
        }
        percent
    }

    /// Record a decode failure other than running out of memory.
    pub fn fill_failed(&self, err: &RenderError) {
        let mut inner = self.lock();
        error!(error = %err, window = %inner.window, "cache fill failed");
        if inner.state == CacheState::InUpdate {
            self.transition(&mut inner, CacheState::Initialized);
        }
    }

    /// Wake the worker and make every later [`Cache::wait_for_fill`] return
    /// `false`.
    pub fn shutdown(&self) {
        let mut inner = self.lock();
        inner.shutdown = true;
        self.changed.notify_all();
    }

    /// Undo [`Cache::shutdown`] so a new worker can run.
    pub fn resume(&self) {
        self.lock().shutdown = false;
    }

    /// Block until the state equals `target` or `timeout` passes.
    pub fn wait_for_state(&self, target: CacheState, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut inner = self.lock();
        while inner.state != target {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            inner = self
                .changed
                .wait_timeout(inner, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }

    fn transition(&self, inner: &mut CacheInner, to: CacheState) {
        if self.log_transitions && inner.state != to {
            debug!(from = %inner.state, to = %to, "cache state");
        }
        inner.state = to;
        self.changed.notify_all();
    }

    fn lock(&self) -> MutexGuard<'_, CacheInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_budget::FixedMemory;
    use std::thread;

    fn scenario_cache() -> Cache {
        let config = CacheConfig::default().with_budget_percent(10);
        Cache::with_probe(
            Size::new(4000, 3000),
            &config,
            Arc::new(FixedMemory::from_mb(256)),
        )
    }

    fn buffer_for(window: Rect) -> PixelBuffer {
        let size = window.size();
        PixelBuffer::try_new(size.width, size.height).unwrap()
    }

    #[test]
    fn test_uninitialized_update_is_noop() {
        let cache = scenario_cache();
        assert!(matches!(cache.update(Rect::new(0, 0, 800, 600)), Frame::Blank));
        assert_eq!(cache.state(), CacheState::Uninitialized);
        assert_eq!(cache.stats(), CacheStats::default());
    }

    #[test]
    fn test_initialized_update_requests_fill_once() {
        let cache = scenario_cache();
        cache.initialize();

        let viewport = Rect::new(0, 0, 800, 600);
        assert!(matches!(cache.update(viewport), Frame::Sample));
        assert_eq!(cache.state(), CacheState::StartUpdate);

        assert!(matches!(cache.update(viewport), Frame::Sample));
        assert_eq!(cache.state(), CacheState::StartUpdate);

        assert!(cache.begin_fill());
        assert!(!cache.begin_fill());
        assert!(matches!(cache.update(viewport), Frame::Sample));
        assert_eq!(cache.state(), CacheState::InUpdate);
        assert_eq!(cache.stats().fills_started, 1);
    }

    #[test]
    fn test_full_fill_cycle() {
        let cache = scenario_cache();
        cache.initialize();
        let viewport = Rect::new(1600, 1200, 2400, 1800);
        cache.update(viewport);

        assert!(cache.begin_fill());
        let window = cache.plan_fill(viewport).unwrap();
        assert_eq!(window, Rect::new(654, 254, 3346, 2746));
        assert!(cache.install(buffer_for(window)));
        assert_eq!(cache.state(), CacheState::Ready);

        match cache.update(viewport) {
            Frame::Cached(frame) => {
                assert_eq!(frame.window, window);
                assert_eq!(frame.source_rect(viewport), Rect::new(946, 946, 1746, 1546));
            }
            other => panic!("expected cached frame, got {other:?}"),
        }
        assert_eq!(cache.stats().cache_frames, 1);
    }

    #[test]
    fn test_viewport_leaving_window_requests_refill() {
        let cache = scenario_cache();
        cache.initialize();
        cache.update(Rect::new(0, 0, 800, 600));
        cache.begin_fill();
        let window = cache.plan_fill(Rect::new(0, 0, 800, 600)).unwrap();
        cache.install(buffer_for(window));

        assert!(matches!(
            cache.update(Rect::new(3200, 2400, 4000, 3000)),
            Frame::Sample
        ));
        assert_eq!(cache.state(), CacheState::StartUpdate);
    }

    #[test]
    fn test_install_rejects_mismatched_buffer() {
        let cache = scenario_cache();
        cache.initialize();
        let viewport = Rect::new(0, 0, 800, 600);
        cache.update(viewport);
        cache.begin_fill();
        assert!(cache.plan_fill(viewport).is_some());

        assert!(!cache.install(buffer_for(Rect::new(0, 0, 10, 10))));
        assert_eq!(cache.state(), CacheState::Initialized);
        assert_eq!(cache.stats().fills_installed, 0);
        assert_eq!(cache.stats().fills_discarded, 1);
        assert!(matches!(cache.update(viewport), Frame::Sample));
        assert_eq!(cache.state(), CacheState::StartUpdate);
    }

    #[test]
    fn test_invalidate_discards_in_flight_fill() {
        let cache = scenario_cache();
        cache.initialize();
        let viewport = Rect::new(0, 0, 800, 600);
        cache.update(viewport);
        cache.begin_fill();
        let window = cache.plan_fill(viewport).unwrap();

        cache.invalidate();
        assert!(cache.plan_fill(viewport).is_none());
        assert!(!cache.install(buffer_for(window)));
        assert_eq!(cache.state(), CacheState::Initialized);
        assert_eq!(cache.stats().fills_discarded, 1);
    }

    #[test]
    fn test_suspend_is_idempotent() {
        let cache = scenario_cache();
        cache.initialize();
        cache.update(Rect::new(0, 0, 800, 600));

        cache.set_suspend(false);
        assert_eq!(cache.state(), CacheState::StartUpdate);

        cache.set_suspend(true);
        assert_eq!(cache.state(), CacheState::Suspend);
        assert!(matches!(cache.update(Rect::new(0, 0, 800, 600)), Frame::Sample));
        assert_eq!(cache.state(), CacheState::Suspend);

        cache.set_suspend(false);
        cache.set_suspend(false);
        assert_eq!(cache.state(), CacheState::Initialized);
    }

    #[test]
    fn test_out_of_memory_shrinks_budget_and_retries() {
        let cache = scenario_cache();
        cache.initialize();
        cache.update(Rect::new(0, 0, 800, 600));
        cache.begin_fill();
        let first = cache.plan_fill(Rect::new(0, 0, 800, 600)).unwrap();

        assert_eq!(cache.fill_out_of_memory(), 9);
        assert_eq!(cache.budget_percent(), 9);
        assert_eq!(cache.state(), CacheState::StartUpdate);

        cache.begin_fill();
        let second = cache.plan_fill(Rect::new(0, 0, 800, 600)).unwrap();
        assert!(second.size().area() < first.size().area());
        assert_eq!(cache.stats().out_of_memory, 1);
    }

    #[test]
    fn test_out_of_memory_at_zero_budget_waits_for_next_frame() {
        let config = CacheConfig::default().with_budget_percent(1);
        let cache = Cache::with_probe(Size::new(100, 100), &config, Arc::new(FixedMemory::new(1)));
        cache.initialize();
        cache.update(Rect::new(0, 0, 10, 10));

        cache.begin_fill();
        assert_eq!(cache.fill_out_of_memory(), 0);
        assert_eq!(cache.state(), CacheState::StartUpdate);

        cache.begin_fill();
        assert_eq!(cache.fill_out_of_memory(), 0);
        assert_eq!(cache.state(), CacheState::Initialized);
    }

    #[test]
    fn test_fill_failed_returns_to_initialized() {
        let cache = scenario_cache();
        cache.initialize();
        cache.update(Rect::new(0, 0, 800, 600));
        cache.begin_fill();

        cache.fill_failed(&RenderError::Format("corrupt".to_string()));
        assert_eq!(cache.state(), CacheState::Initialized);
        assert_eq!(cache.budget_percent(), 10);
    }

    #[test]
    fn test_shutdown_releases_waiting_worker() {
        let cache = Arc::new(scenario_cache());
        cache.initialize();

        let waiter = {
            let cache = Arc::clone(&cache);
            thread::spawn(move || cache.wait_for_fill())
        };
        cache.shutdown();
        assert!(!waiter.join().unwrap());

        cache.resume();
        cache.update(Rect::new(0, 0, 800, 600));
        assert!(cache.wait_for_fill());
    }

    #[test]
    fn test_wait_for_state() {
        let cache = Arc::new(scenario_cache());
        assert!(!cache.wait_for_state(CacheState::Initialized, Duration::from_millis(20)));

        let setter = {
            let cache = Arc::clone(&cache);
            thread::spawn(move || cache.initialize())
        };
        assert!(cache.wait_for_state(CacheState::Initialized, Duration::from_secs(5)));
        setter.join().unwrap();
    }

    #[test]
    fn test_state_display() {
        assert_eq!(CacheState::StartUpdate.to_string(), "start_update");
        assert_eq!(CacheState::Ready.to_string(), "ready");
    }
}
