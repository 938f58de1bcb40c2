use lru::LruCache;
use media_io::RgbaFrame;
use parking_lot::Mutex;

use crate::key::MemoryCacheKey;

struct Entries {
    lru: LruCache<MemoryCacheKey, RgbaFrame>,
    bytes: usize,
}

/// Byte-bounded LRU of decoded thumbnails. Lookups take the lock too since they reorder.
pub struct MemoryCache {
    entries: Mutex<Entries>,
    budget: usize,
}

impl MemoryCache {
    pub fn new(budget_bytes: usize) -> Self {
        Self { entries: Mutex::new(Entries { lru: LruCache::unbounded(), bytes: 0 }), budget: budget_bytes }
    }

    pub fn get(&self, key: &MemoryCacheKey) -> Option<RgbaFrame> {
        self.entries.lock().lru.get(key).cloned()
    }

    pub fn put(&self, key: MemoryCacheKey, frame: RgbaFrame) {
        let size = frame.byte_len();
        let mut e = self.entries.lock();
        if let Some(old) = e.lru.pop(&key) {
            e.bytes -= old.byte_len();
        }
        // a single frame larger than the whole budget would only flush everything else
        if size > self.budget {
            return;
        }
        while e.bytes + size > self.budget {
            match e.lru.pop_lru() {
                Some((_, evicted)) => e.bytes -= evicted.byte_len(),
                None => break,
            }
        }
        e.bytes += size;
        e.lru.put(key, frame);
    }

    pub fn evict_all(&self) {
        let mut e = self.entries.lock();
        e.lru.clear();
        e.bytes = 0;
    }

    pub fn len(&self) -> usize { self.entries.lock().lru.len() }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    pub fn bytes(&self) -> usize { self.entries.lock().bytes }

    pub fn budget(&self) -> usize { self.budget }
}
