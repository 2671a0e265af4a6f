//! Frame cache - key/lookup contract plus an LRU implementation.
//!
//! The engine itself never touches the cache. Display sinks consult it
//! before computing upstream and populate it afterwards. One cache is
//! typically shared by every engine in the process, so implementations
//! must be internally synchronised.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use log::trace;
use lru::LruCache;

use crate::entities::node::{NodeId, RectI};

/// Cache address of one rendered frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameKey {
    pub node: NodeId,
    pub time: i32,
    pub view: usize,
    pub mipmap_level: u32,
    /// Hash of the parameters and wiring upstream of `node`
    pub tree_hash: u64,
}

impl FrameKey {
    pub fn new(node: NodeId, time: i32, view: usize, mipmap_level: u32) -> Self {
        Self {
            node,
            time,
            view,
            mipmap_level,
            tree_hash: 0,
        }
    }

    pub fn with_tree_hash(mut self, tree_hash: u64) -> Self {
        self.tree_hash = tree_hash;
        self
    }
}

/// Single-channel image covering `window`.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub window: RectI,
    pub pixels: Vec<f32>,
}

impl Frame {
    pub fn new(window: RectI, pixels: Vec<f32>) -> Self {
        Self { window, pixels }
    }

    /// Frame filled with one value.
    pub fn filled(window: RectI, value: f32) -> Self {
        Self {
            window,
            pixels: vec![value; window.area() as usize],
        }
    }

    pub fn mean(&self) -> f32 {
        if self.pixels.is_empty() {
            return 0.0;
        }
        self.pixels.iter().sum::<f32>() / self.pixels.len() as f32
    }
}

/// Cache statistics (thread-safe counters).
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheStats {
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
}

impl CacheStatsSnapshot {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Abstract frame cache interface.
pub trait FrameCache: Send + Sync {
    /// Cached frame for `key`; counts a hit or a miss.
    fn get(&self, key: &FrameKey) -> Option<Arc<Frame>>;

    fn insert(&self, key: FrameKey, frame: Arc<Frame>);

    /// Lookup without touching recency or statistics.
    fn contains(&self, key: &FrameKey) -> bool;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn clear(&self);

    fn stats(&self) -> CacheStatsSnapshot;
}

/// Capacity-bounded LRU cache over the `lru` crate.
#[derive(Debug)]
pub struct LruFrameCache {
    frames: Mutex<LruCache<FrameKey, Arc<Frame>>>,
    stats: CacheStats,
}

impl LruFrameCache {
    /// Cache holding at most `capacity` frames (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            frames: Mutex::new(LruCache::new(capacity)),
            stats: CacheStats::default(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.lock().cap().get()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LruCache<FrameKey, Arc<Frame>>> {
        self.frames.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl FrameCache for LruFrameCache {
    fn get(&self, key: &FrameKey) -> Option<Arc<Frame>> {
        let found = self.lock().get(key).cloned();
        match found {
            Some(_) => self.stats.record_hit(),
            None => self.stats.record_miss(),
        }
        found
    }

    fn insert(&self, key: FrameKey, frame: Arc<Frame>) {
        if let Some((evicted, _)) = self.lock().push(key, frame) {
            if evicted != key {
                trace!("Frame cache evicted {:?}", evicted);
            }
        }
    }

    fn contains(&self, key: &FrameKey) -> bool {
        self.lock().contains(key)
    }

    fn len(&self) -> usize {
        self.lock().len()
    }

    fn clear(&self) {
        self.lock().clear();
        self.stats.reset();
    }

    fn stats(&self) -> CacheStatsSnapshot {
        self.stats.snapshot()
    }
}
