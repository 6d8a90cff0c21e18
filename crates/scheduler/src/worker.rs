//! Background cache fill worker.
//!
//! One thread per scene. It parks on the cache's condition variable until a
//! fill is requested, snapshots the viewport window, decodes the planned
//! cache window with no lock held, and installs the result. Every step
//! re-checks the cache state, so a suspend or invalidate that arrives while
//! the decode runs simply causes the result to be dropped.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use tracing::{debug, error, info};
use vastview_cache::Cache;
use vastview_render::RegionSource;

use crate::viewport::Viewport;

/// Handle to the running fill thread.
#[derive(Debug)]
pub struct CacheFillWorker {
    cache: Arc<Cache>,
    thread: Option<JoinHandle<()>>,
}

impl CacheFillWorker {
    /// Start the fill thread.
    ///
    /// # Errors
    /// Returns an error if the OS refuses to create the thread.
    pub fn spawn(
        cache: Arc<Cache>,
        viewport: Arc<Viewport>,
        source: Arc<dyn RegionSource>,
    ) -> io::Result<Self> {
        cache.resume();
        let thread = {
            let cache = Arc::clone(&cache);
            thread::Builder::new()
                .name("cache-fill".to_string())
                .spawn(move || Self::run(&cache, &viewport, source.as_ref()))?
        };

        Ok(Self {
            cache,
            thread: Some(thread),
        })
    }

    /// Returns true while the thread has not been joined
    pub fn is_running(&self) -> bool {
        self.thread.is_some()
    }

    /// Signal the thread to exit and wait for it.
    ///
    /// A decode in progress runs to completion first; its result is
    /// discarded if the cache state moved on.
    pub fn stop(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        self.cache.shutdown();
        if thread.join().is_err() {
            error!("cache fill worker panicked");
        }
    }

    fn run(cache: &Cache, viewport: &Viewport, source: &dyn RegionSource) {
        info!("cache fill worker started");

        while cache.wait_for_fill() {
            if !cache.begin_fill() {
                continue;
            }
            let viewport_window = viewport.window();
            let Some(window) = cache.plan_fill(viewport_window) else {
                continue;
            };

            let started = Instant::now();
            match source.decode_region(window) {
                Ok(buffer) => {
                    let bytes = buffer.memory_size();
                    if cache.install(buffer) {
                        debug!(
                            window = %window,
                            bytes,
                            elapsed_ms = started.elapsed().as_millis() as u64,
                            "cache filled"
                        );
                    }
                }
                Err(err) if err.is_out_of_memory() => {
                    cache.fill_out_of_memory();
                }
                Err(err) => cache.fill_failed(&err),
            }
        }

        info!("cache fill worker stopped");
    }
}

impl Drop for CacheFillWorker {
    fn drop(&mut self) {
        self.stop();
    }
}
