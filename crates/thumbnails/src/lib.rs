//! Two-tier thumbnail cache for video libraries.
//!
//! Lookups go memory → disk → generation. Concurrent requests for the same key share one
//! generation, folders can be pre-warmed in the background with a resumable cursor, and
//! subscribers hear about every key that becomes ready.

pub mod coalescer;
pub mod config;
pub mod disk;
pub mod error;
pub mod generator;
pub mod key;
pub mod memory;
pub mod notifier;
pub mod scheduler;
pub mod service;

#[cfg(test)]
pub(crate) mod testing;

pub use config::ThumbnailConfig;
pub use error::{Result, ThumbnailError};
pub use key::{BaseKey, DiskCacheKey, MemoryCacheKey};
pub use media_io::{RgbaFrame, VideoRef};
pub use scheduler::FolderStatus;
pub use service::ThumbnailService;
