//! Scene: one image, one viewport, one cache and its fill worker.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;
use vastview_cache::{Cache, CacheConfig, CacheState, CacheStats, ConfigError, MemoryProbe};
use vastview_render::{
    DrawSurface, ImageRegionSource, Rect, RegionSource, RenderError, SampleImage, Size,
};

use crate::viewport::{ViewState, Viewport};
use crate::worker::CacheFillWorker;

/// Errors raised while setting up or starting a scene.
#[derive(Debug, thiserror::Error)]
pub enum SceneError {
    /// The image could not be opened, measured or sampled
    #[error("failed to load scene: {0}")]
    Render(#[from] RenderError),

    #[error("invalid cache configuration: {0}")]
    Config(#[from] ConfigError),

    /// The fill worker thread could not be created
    #[error("failed to spawn cache fill worker: {0}")]
    Spawn(#[source] std::io::Error),
}

/// A pannable, zoomable view of one large image.
///
/// Construction decodes the sample image synchronously; any failure there
/// is fatal and reported from [`Scene::new`]. Fills only happen once
/// [`Scene::start`] has launched the worker.
pub struct Scene {
    source: Arc<dyn RegionSource>,
    sample: SampleImage,
    viewport: Arc<Viewport>,
    cache: Arc<Cache>,
    worker: Option<CacheFillWorker>,
}

impl Scene {
    pub fn new(source: Arc<dyn RegionSource>, config: CacheConfig) -> Result<Self, SceneError> {
        let probe = config.memory_probe();
        Self::with_memory_probe(source, config, probe)
    }

    /// Like [`Scene::new`] with an explicit process memory query.
    pub fn with_memory_probe(
        source: Arc<dyn RegionSource>,
        config: CacheConfig,
        probe: Arc<dyn MemoryProbe>,
    ) -> Result<Self, SceneError> {
        config.validate()?;

        let bounds = source.bounds();
        if bounds.is_empty() {
            return Err(RenderError::Format(format!("image has no pixels ({bounds})")).into());
        }
        let sample = SampleImage::decode(source.as_ref(), config.sample_shift)?;

        let viewport = Arc::new(Viewport::new(bounds, config.min_visible_pixels));
        let cache = Arc::new(Cache::with_probe(bounds, &config, probe));
        cache.initialize();
        info!(size = %bounds, sample = %sample.size(), "scene loaded");

        Ok(Self {
            source,
            sample,
            viewport,
            cache,
            worker: None,
        })
    }

    /// Open an image file with the `image` crate's decoders.
    ///
    /// The whole image is decoded into memory up front. For scenes too large
    /// for that, build a [`vastview_render::RawRegionSource`] and pass it to
    /// [`Scene::new`] instead.
    pub fn from_path<P: AsRef<Path>>(path: P, config: CacheConfig) -> Result<Self, SceneError> {
        let source = ImageRegionSource::open(path)?;
        Self::new(Arc::new(source), config)
    }

    /// Launch the fill worker, replacing any worker already running.
    pub fn start(&mut self) -> Result<(), SceneError> {
        self.stop();
        let worker = CacheFillWorker::spawn(
            Arc::clone(&self.cache),
            Arc::clone(&self.viewport),
            Arc::clone(&self.source),
        )
        .map_err(SceneError::Spawn)?;
        self.worker = Some(worker);
        Ok(())
    }

    /// Stop the fill worker and wait for its thread to exit.
    pub fn stop(&mut self) {
        if let Some(mut worker) = self.worker.take() {
            worker.stop();
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(CacheFillWorker::is_running)
    }

    /// Draw the current frame onto `surface`.
    ///
    /// Never blocks on decoding: the cache either serves the frame or the
    /// sample image stands in while a fill runs.
    pub fn draw(&self, surface: &mut dyn DrawSurface) {
        let window = self.viewport.window();
        if window.is_empty() {
            return;
        }
        let frame = self.cache.update(window);
        self.viewport.present(&frame, &self.sample, surface);
        surface.finish();
    }

    /// Resize the viewport.
    pub fn set_size(&self, physical: Size) -> Result<(), SceneError> {
        Ok(self.viewport.set_size(physical)?)
    }

    pub fn viewport(&self) -> &Viewport {
        &self.viewport
    }

    pub fn sample(&self) -> &SampleImage {
        &self.sample
    }

    pub fn scene_size(&self) -> Size {
        self.cache.scene_size()
    }

    /// Pause fills while the view is in rapid motion
    pub fn set_suspend(&self, suspend: bool) {
        self.cache.set_suspend(suspend);
    }

    /// Throw the cache away and refill on the next frame
    pub fn invalidate(&self) {
        self.cache.invalidate();
    }

    pub fn cache_state(&self) -> CacheState {
        self.cache.state()
    }

    pub fn cache_window(&self) -> Rect {
        self.cache.window()
    }

    /// The window a fill would decode for the current viewport
    pub fn planned_cache_window(&self) -> Rect {
        self.cache.window_for(self.viewport.window())
    }

    pub fn budget_percent(&self) -> u8 {
        self.cache.budget_percent()
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Block until the cache reaches `state` or `timeout` passes.
    pub fn wait_for_state(&self, state: CacheState, timeout: Duration) -> bool {
        self.cache.wait_for_state(state, timeout)
    }

    pub fn view_state(&self) -> ViewState {
        self.viewport.view_state()
    }

    pub fn restore_view_state(&self, state: ViewState) {
        self.viewport.restore_view_state(state);
    }
}

impl Drop for Scene {
    fn drop(&mut self) {
        self.stop();
    }
}
