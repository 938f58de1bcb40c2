use media_io::VideoRef;
use sha2::{Digest, Sha256};

/// Identity of the bytes behind a video. Overwriting, truncating or recreating the file
/// changes size or mtime and therefore the key; nothing else invalidates an entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BaseKey {
    pub locator: String,
    pub size: u64,
    pub modified_ms: i64,
}

impl BaseKey {
    pub fn of(video: &VideoRef) -> Self {
        Self { locator: video.locator.clone(), size: video.size, modified_ms: video.modified_ms }
    }
}

/// Memory tier key: one entry per requested on-screen size.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemoryCacheKey {
    pub base: BaseKey,
    pub width: u32,
    pub height: u32,
}

impl MemoryCacheKey {
    pub fn new(video: &VideoRef, width: u32, height: u32) -> Self {
        Self { base: BaseKey::of(video), width, height }
    }
}

/// Disk tier key: one entry per video at the canonical dimension.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DiskCacheKey {
    pub base: BaseKey,
    pub dimension: u32,
}

impl DiskCacheKey {
    pub fn new(base: BaseKey, dimension: u32) -> Self { Self { base, dimension } }

    /// Stable filename: sha256 of the canonical key string, hex encoded.
    pub fn file_name(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(format!("{}|{}|{}|{}|disk", self.base.locator, self.base.size, self.base.modified_ms, self.dimension).as_bytes());
        format!("{:x}.jpg", hasher.finalize())
    }
}

/// Hash over the ordered (locator, size, mtime) list plus the target size. Any reorder,
/// add, remove or resize produces a different signature.
pub fn content_signature(videos: &[VideoRef], width: u32, height: u32) -> String {
    let mut hasher = Sha256::new();
    for v in videos {
        hasher.update(v.locator.as_bytes());
        hasher.update([0u8]);
        hasher.update(v.size.to_le_bytes());
        hasher.update(v.modified_ms.to_le_bytes());
    }
    hasher.update(width.to_le_bytes());
    hasher.update(height.to_le_bytes());
    format!("{:x}", hasher.finalize())
}
