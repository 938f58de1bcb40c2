use crossbeam_channel::Receiver;
use media_io::{FrameExtractor, ImageCodec, RgbaFrame, RotationLookup, VideoRef};
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::coalescer::RequestCoalescer;
use crate::config::ThumbnailConfig;
use crate::disk::DiskCache;
use crate::error::{Result, ThumbnailError};
use crate::generator::ThumbnailGenerator;
use crate::key::MemoryCacheKey;
use crate::memory::MemoryCache;
use crate::notifier::ReadyNotifier;
use crate::scheduler::{FolderScheduler, FolderStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Lookup {
    MayGenerate,
    CacheOnly,
}

struct Inner {
    memory: MemoryCache,
    disk: DiskCache,
    // cache-only lookups get their own flights so they never hand a NotCached to a
    // caller that wanted generation
    coalescer: RequestCoalescer<(MemoryCacheKey, Lookup), Result<RgbaFrame>>,
    generator: ThumbnailGenerator,
    scheduler: FolderScheduler,
    notifier: ReadyNotifier,
}

/// Memory → disk → generate, with one flight per key and background folder pre-warm.
/// Cheap to clone; construct once and hand clones to whoever needs thumbnails.
///
/// All background work runs on the runtime captured at construction, so every method
/// can be called from threads outside it, such as a UI thread.
#[derive(Clone)]
pub struct ThumbnailService {
    inner: Arc<Inner>,
}

impl ThumbnailService {
    /// Build on the runtime of the calling context.
    pub fn new(config: &ThumbnailConfig, extractor: Arc<dyn FrameExtractor>, rotation: Arc<dyn RotationLookup>, codec: Arc<dyn ImageCodec>) -> Result<Self> {
        let handle = Handle::try_current().map_err(|_| ThumbnailError::NoRuntime)?;
        Self::with_handle(handle, config, extractor, rotation, codec)
    }

    pub fn with_handle(handle: Handle, config: &ThumbnailConfig, extractor: Arc<dyn FrameExtractor>, rotation: Arc<dyn RotationLookup>, codec: Arc<dyn ImageCodec>) -> Result<Self> {
        let disk = DiskCache::open(config.cache_dir.clone(), codec, config.jpeg_quality, config.canonical_dimension)?;
        let budget = config.memory_budget_bytes();
        info!(dir = %config.cache_dir.display(), memory_budget = budget, "thumbnail cache ready");
        Ok(Self {
            inner: Arc::new(Inner {
                memory: MemoryCache::new(budget),
                disk,
                coalescer: RequestCoalescer::new(handle.clone()),
                generator: ThumbnailGenerator::new(extractor, rotation, config.canonical_dimension, config.extraction_timeout()),
                scheduler: FolderScheduler::new(handle),
                notifier: ReadyNotifier::new(),
            }),
        })
    }

    /// May generate. `None` is the placeholder case; see `load_thumbnail` for the cause.
    pub async fn get_thumbnail(&self, video: &VideoRef, width: u32, height: u32) -> Option<RgbaFrame> {
        self.load_thumbnail(video, width, height).await.ok()
    }

    pub async fn load_thumbnail(&self, video: &VideoRef, width: u32, height: u32) -> Result<RgbaFrame> {
        self.inner.lookup(video, width, height, Lookup::MayGenerate).await
    }

    /// Memory and disk only; never starts a decode.
    pub async fn get_cached_thumbnail(&self, video: &VideoRef, width: u32, height: u32) -> Option<RgbaFrame> {
        self.load_cached_thumbnail(video, width, height).await.ok()
    }

    pub async fn load_cached_thumbnail(&self, video: &VideoRef, width: u32, height: u32) -> Result<RgbaFrame> {
        self.inner.lookup(video, width, height, Lookup::CacheOnly).await
    }

    pub fn get_thumbnail_from_memory(&self, video: &VideoRef, width: u32, height: u32) -> Option<RgbaFrame> {
        self.inner.memory.get(&MemoryCacheKey::new(video, width, height))
    }

    pub fn start_folder_generation(&self, folder_id: &str, videos: Vec<VideoRef>, width: u32, height: u32) {
        let inner: Weak<Inner> = Arc::downgrade(&self.inner);
        self.inner.scheduler.start(folder_id, videos, width, height, move |video: VideoRef| {
            let inner = inner.clone();
            async move {
                match inner.upgrade() {
                    Some(inner) => inner.lookup(&video, width, height, Lookup::MayGenerate).await.is_ok(),
                    None => false,
                }
            }
        });
    }

    pub fn pause_folder_generation(&self, folder_id: &str) {
        self.inner.scheduler.pause(folder_id);
    }

    pub fn folder_status(&self, folder_id: &str) -> FolderStatus { self.inner.scheduler.status(folder_id) }

    pub fn folder_cursor(&self, folder_id: &str) -> Option<usize> { self.inner.scheduler.cursor(folder_id) }

    pub async fn join_folder(&self, folder_id: &str) { self.inner.scheduler.join(folder_id).await }

    /// Stop all walks, drop all registrations and wipe both tiers. Lookups already running
    /// finish normally and may write into the emptied cache.
    pub async fn clear_thumbnail_cache(&self) {
        self.inner.scheduler.cancel_all();
        self.inner.coalescer.clear();
        self.inner.memory.evict_all();
        let removed = self.inner.disk.clear().await;
        info!(removed, "thumbnail cache cleared");
    }

    /// Keys that just became available in the memory tier.
    pub fn subscribe(&self) -> Receiver<MemoryCacheKey> { self.inner.notifier.subscribe() }

    pub fn memory(&self) -> &MemoryCache { &self.inner.memory }
}

impl Inner {
    async fn lookup(self: &Arc<Self>, video: &VideoRef, width: u32, height: u32, mode: Lookup) -> Result<RgbaFrame> {
        let key = MemoryCacheKey::new(video, width, height);
        if let Some(frame) = self.memory.get(&key) {
            return Ok(frame);
        }
        let (inner, video) = (self.clone(), video.clone());
        let flight_key = (key.clone(), mode);
        self.coalescer
            .run_exclusive(flight_key, async move { inner.resolve(video, key, mode).await })
            .await
            .unwrap_or(Err(ThumbnailError::Aborted))
    }

    async fn resolve(&self, video: VideoRef, key: MemoryCacheKey, mode: Lookup) -> Result<RgbaFrame> {
        // disk holds the canonical size only; it is returned as is for every requested size
        if let Some(frame) = self.disk.load(&key.base).await {
            self.publish(key, frame.clone());
            return Ok(frame);
        }
        if mode == Lookup::CacheOnly {
            return Err(ThumbnailError::NotCached);
        }
        let frame = self.generator.generate(&video).await?;
        if let Err(e) = self.disk.store(&key.base, &frame).await {
            warn!(locator = %video.locator, error = %e, "could not write thumbnail to disk cache");
        }
        debug!(locator = %video.locator, width = key.width, height = key.height, "thumbnail generated");
        self.publish(key, frame.clone());
        Ok(frame)
    }

    fn publish(&self, key: MemoryCacheKey, frame: RgbaFrame) {
        self.memory.put(key.clone(), frame);
        self.notifier.notify(&key);
    }
}
