//! Vastview Cache Library
//!
//! The prefetched cache window around the viewport: its fill state machine,
//! memory-budget driven sizing with an out-of-memory ratchet, and the
//! configuration shared by a scene.

pub mod cache;
pub mod config;
pub mod memory_budget;
pub mod window;

pub use cache::{Cache, CacheState, CacheStats, CachedFrame, Frame};
pub use config::{CacheConfig, ConfigError};
pub use memory_budget::{BudgetPercent, FixedMemory, MemoryProbe, SystemMemory};
pub use window::{cache_window, margin_for_budget};
