use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use sysinfo::System;
use tracing::debug;

use crate::error::{Result, ThumbnailError};

/// Used when the platform reports no memory figures at all.
const FALLBACK_CEILING_BYTES: u64 = 512 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThumbnailConfig {
    pub cache_dir: PathBuf,
    /// Edge of the square every disk entry is generated at.
    pub canonical_dimension: u32,
    pub jpeg_quality: u8,
    /// Overrides the memory ceiling; unset means the memory currently available to the process.
    pub memory_ceiling_bytes: Option<u64>,
    /// The memory tier gets `ceiling / memory_fraction`.
    pub memory_fraction: u64,
    /// A single extraction running longer than this is abandoned.
    pub extraction_timeout_ms: u64,
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            canonical_dimension: 320,
            jpeg_quality: 70,
            memory_ceiling_bytes: None,
            memory_fraction: 6,
            extraction_timeout_ms: 20_000,
        }
    }
}

impl ThumbnailConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text).map_err(|e| ThumbnailError::Io(format!("{}: {}", path.display(), e)))
    }

    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = dir.into();
        self
    }

    pub fn memory_ceiling(&self) -> u64 {
        self.memory_ceiling_bytes.unwrap_or_else(available_memory_bytes)
    }

    pub fn memory_budget_bytes(&self) -> usize {
        (self.memory_ceiling() / self.memory_fraction.max(1)) as usize
    }

    pub fn extraction_timeout(&self) -> Duration {
        Duration::from_millis(self.extraction_timeout_ms.max(1))
    }
}

pub fn default_cache_dir() -> PathBuf {
    let base = dirs::cache_dir().unwrap_or_else(std::env::temp_dir);
    base.join("thumbs").join("video")
}

fn available_memory_bytes() -> u64 {
    let mut sys = System::new();
    sys.refresh_memory();
    let available = match sys.available_memory() {
        0 => sys.total_memory(),
        n => n,
    };
    debug!(available_mb = available / 1024 / 1024, total_mb = sys.total_memory() / 1024 / 1024, "system memory");
    if available == 0 { FALLBACK_CEILING_BYTES } else { available }
}
