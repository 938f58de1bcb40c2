use media_io::{ImageCodec, RgbaFrame};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{Result, ThumbnailError};
use crate::key::{BaseKey, DiskCacheKey};

static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// One encoded image per video, named by the hash of its disk key. The directory listing
/// is the index.
pub struct DiskCache {
    dir: PathBuf,
    codec: Arc<dyn ImageCodec>,
    quality: u8,
    dimension: u32,
}

impl DiskCache {
    pub fn open(dir: PathBuf, codec: Arc<dyn ImageCodec>, quality: u8, dimension: u32) -> Result<Self> {
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir, codec, quality, dimension })
    }

    pub fn dir(&self) -> &Path { &self.dir }

    pub fn path_for(&self, base: &BaseKey) -> PathBuf {
        self.dir.join(DiskCacheKey::new(base.clone(), self.dimension).file_name())
    }

    /// Unreadable or undecodable entries count as misses.
    pub async fn load(&self, base: &BaseKey) -> Option<RgbaFrame> {
        let path = self.path_for(base);
        let bytes = match tokio::fs::read(&path).await {
            Ok(b) => b,
            Err(e) if e.kind() == ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "disk cache read failed");
                return None;
            }
        };
        let codec = self.codec.clone();
        match tokio::task::spawn_blocking(move || codec.decode(&bytes)).await {
            Ok(Ok(frame)) => {
                debug!(locator = %base.locator, "disk cache hit");
                Some(frame)
            }
            Ok(Err(e)) => {
                warn!(path = %path.display(), error = %e, "corrupt disk cache entry");
                None
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "disk cache decode task failed");
                None
            }
        }
    }

    /// Encode and write through a temp file so readers never see a partial entry.
    pub async fn store(&self, base: &BaseKey, frame: &RgbaFrame) -> Result<()> {
        let codec = self.codec.clone();
        let quality = self.quality;
        let frame = frame.clone();
        let bytes = tokio::task::spawn_blocking(move || codec.encode(&frame, quality)).await?
            .map_err(|e| ThumbnailError::Codec(e.to_string()))?;
        let path = self.path_for(base);
        let tmp = self.dir.join(format!(".{}.{}.tmp", std::process::id(), TMP_SEQ.fetch_add(1, Ordering::Relaxed)));
        if let Err(e) = tokio::fs::write(&tmp, &bytes).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    /// Best-effort wipe; returns how many files were removed.
    pub async fn clear(&self) -> usize {
        let mut removed = 0;
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(rd) => rd,
            Err(e) => {
                warn!(dir = %self.dir.display(), error = %e, "cannot list disk cache");
                return 0;
            }
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.is_dir() { continue; }
            match tokio::fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(e) => debug!(path = %path.display(), error = %e, "skip undeletable cache file"),
            }
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{frame, video, RawCodec};

    fn cache(dir: &Path) -> DiskCache {
        DiskCache::open(dir.to_path_buf(), Arc::new(RawCodec), 70, 320).unwrap()
    }

    #[tokio::test]
    async fn test_store_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let disk = cache(dir.path());
        let base = BaseKey::of(&video("a.mp4", 1000, 500));
        assert!(disk.load(&base).await.is_none());
        disk.store(&base, &frame(4, 7)).await.unwrap();
        assert_eq!(disk.load(&base).await, Some(frame(4, 7)));
        assert!(disk.path_for(&base).exists());
    }

    #[tokio::test]
    async fn test_changed_attributes_miss() {
        let dir = tempfile::tempdir().unwrap();
        let disk = cache(dir.path());
        disk.store(&BaseKey::of(&video("a.mp4", 1000, 500)), &frame(4, 7)).await.unwrap();
        assert!(disk.load(&BaseKey::of(&video("a.mp4", 1001, 500))).await.is_none());
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let disk = cache(dir.path());
        let base = BaseKey::of(&video("a.mp4", 1000, 500));
        std::fs::write(disk.path_for(&base), b"garbage").unwrap();
        assert!(disk.load(&base).await.is_none());
    }

    #[tokio::test]
    async fn test_clear_removes_every_file() {
        let dir = tempfile::tempdir().unwrap();
        let disk = cache(dir.path());
        for n in 0..3 {
            disk.store(&BaseKey::of(&video(&format!("{n}.mp4"), 1, 1)), &frame(2, n as u8)).await.unwrap();
        }
        assert_eq!(disk.clear().await, 3);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
