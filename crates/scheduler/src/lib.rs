//! Vastview Scheduler Library
//!
//! Ties a region source, a viewport and a cache together into a [`Scene`]
//! and runs the background thread that keeps the cache filled.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use vastview_cache::{CacheConfig, CacheState};
//! use vastview_render::{PixelBuffer, Size};
//! use vastview_scheduler::Scene;
//!
//! let mut scene = Scene::from_path("panorama.png", CacheConfig::default())?;
//! scene.set_size(Size::new(800, 600))?;
//! scene.viewport().center();
//! scene.start()?;
//!
//! let mut frame = PixelBuffer::try_new(800, 600)?;
//! scene.draw(&mut frame); // sample image while the cache fills
//! scene.wait_for_state(CacheState::Ready, Duration::from_secs(5));
//! scene.draw(&mut frame); // full resolution
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod scene;
mod viewport;
mod worker;

pub use scene::{Scene, SceneError};
pub use viewport::{ViewState, Viewport};
pub use worker::CacheFillWorker;
