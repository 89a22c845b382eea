//! Heap-backed, LRU-evicted, thread-safe GPU texture pool (§4.1).
//!
//! Lock granularity follows the teacher's `gpu/resource_pool.rs`: one
//! `Mutex`-guarded inner state shared behind an `Arc`, `PooledTexture` handles
//! holding a `Weak` back-reference so the texture returns itself on `Drop`
//! (the `colliery` `texture_pool.rs` RAII pattern) regardless of which exit
//! path the caller takes.

mod key;

pub use key::{PoolKey, TextureDescriptor, TextureStorage, TextureUsage};

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, Weak};

use tracing::{debug, warn};

use crate::error::{Error, Result};

#[derive(Debug, Default, Clone, Copy)]
pub struct PoolStats {
    pub allocations: u64,
    pub reuses: u64,
    pub evictions: u64,
    pub returns: u64,
    pub count: usize,
    pub bytes: u64,
}

#[derive(Clone, Copy)]
pub struct PoolConfig {
    /// Total resident bytes the pool will hold before evicting.
    pub budget_bytes: u64,
    /// Max pooled textures retained per `PoolKey` before a `release` just drops the texture.
    pub max_per_key: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            budget_bytes: 256 * 1024 * 1024,
            max_per_key: 4,
        }
    }
}

struct PooledEntry {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    size_bytes: u64,
}

struct Inner {
    device: Arc<wgpu::Device>,
    config: PoolConfig,
    /// Free (not-currently-acquired) textures, grouped by key.
    free: HashMap<PoolKey, Vec<PooledEntry>>,
    /// LRU order over keys with at least one free entry, front = least-recently-returned.
    lru: VecDeque<PoolKey>,
    stats: PoolStats,
    resident_bytes: u64,
}

impl Inner {
    fn touch_lru(&mut self, key: PoolKey) {
        self.lru.retain(|k| k != &key);
        self.lru.push_back(key);
    }

    fn evict_one(&mut self) -> bool {
        let Some(key) = self.lru.pop_front() else {
            return false;
        };
        let Some(bucket) = self.free.get_mut(&key) else {
            return self.evict_one();
        };
        let Some(entry) = bucket.pop() else {
            return self.evict_one();
        };
        self.resident_bytes = self.resident_bytes.saturating_sub(entry.size_bytes);
        self.stats.evictions += 1;
        self.stats.count = self.stats.count.saturating_sub(1);
        self.stats.bytes = self.resident_bytes;
        if !bucket.is_empty() {
            self.lru.push_front(key);
        }
        drop(entry.texture);
        true
    }

    fn try_reuse(&mut self, key: &PoolKey) -> Option<PooledEntry> {
        let bucket = self.free.get_mut(key)?;
        let entry = bucket.pop()?;
        if bucket.is_empty() {
            self.lru.retain(|k| k != key);
        }
        self.resident_bytes = self.resident_bytes.saturating_sub(entry.size_bytes);
        self.stats.reuses += 1;
        self.stats.count = self.stats.count.saturating_sub(1);
        self.stats.bytes = self.resident_bytes;
        Some(entry)
    }

    fn make_room_for(&mut self, size_bytes: u64) -> Result<()> {
        if self.resident_bytes + size_bytes <= self.config.budget_bytes {
            return Ok(());
        }
        while self.resident_bytes + size_bytes > self.config.budget_bytes {
            if !self.evict_one() {
                break;
            }
        }
        Ok(())
    }

    fn allocate(&mut self, desc: &TextureDescriptor) -> Result<PooledEntry> {
        let size_bytes = desc.size_bytes();
        self.make_room_for(size_bytes)?;
        if size_bytes > self.config.budget_bytes {
            return Err(Error::AllocationExhausted {
                requested: size_bytes,
                budget: self.config.budget_bytes,
            });
        }

        let texture = self.device.create_texture(&desc.to_wgpu());
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        self.stats.allocations += 1;
        Ok(PooledEntry {
            texture,
            view,
            size_bytes,
        })
    }

    fn return_entry(&mut self, key: PoolKey, entry: PooledEntry) {
        let bucket = self.free.entry(key.clone()).or_default();
        if bucket.len() >= self.config.max_per_key {
            debug!(?key, "texture pool: per-key cap reached, dropping texture");
            drop(entry.texture);
            return;
        }
        self.resident_bytes += entry.size_bytes;
        self.stats.returns += 1;
        self.stats.count += 1;
        self.stats.bytes = self.resident_bytes;
        bucket.push(entry);
        self.touch_lru(key);

        while self.resident_bytes > self.config.budget_bytes {
            if !self.evict_one() {
                break;
            }
        }
    }
}

/// Thread-safe texture pool. Cheap to `Clone` (shares the inner `Arc`).
#[derive(Clone)]
pub struct TexturePool {
    inner: Arc<Mutex<Inner>>,
}

impl TexturePool {
    pub fn new(device: Arc<wgpu::Device>, config: PoolConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                device,
                config,
                free: HashMap::new(),
                lru: VecDeque::new(),
                stats: PoolStats::default(),
                resident_bytes: 0,
            })),
        }
    }

    /// §4.1 `acquire`: reuse a matching free texture or allocate a new one,
    /// evicting LRU entries first if the budget would otherwise be exceeded.
    pub fn acquire(&self, desc: TextureDescriptor) -> Result<PooledTexture> {
        let key = PoolKey::from_descriptor(&desc);
        let mut inner = self.inner.lock().expect("texture pool mutex poisoned");

        let entry = match inner.try_reuse(&key) {
            Some(entry) => entry,
            None => inner.allocate(&desc)?,
        };

        Ok(PooledTexture {
            texture: Some(entry.texture),
            view: Some(entry.view),
            key,
            width: desc.width,
            height: desc.height,
            size_bytes: entry.size_bytes,
            pool: Arc::downgrade(&self.inner),
            memoryless: false,
        })
    }

    /// §4.1 `acquire_intermediate`: convenience for private-storage,
    /// GPU-only intermediates used by the executor between nodes.
    pub fn acquire_intermediate(
        &self,
        format: wgpu::TextureFormat,
        width: u32,
        height: u32,
        usage: TextureUsage,
    ) -> Result<PooledTexture> {
        self.acquire(TextureDescriptor {
            format,
            width,
            height,
            usage,
            storage: TextureStorage::Private,
            mip_levels: 1,
        })
    }

    /// §4.1 `acquire_memoryless`: a transient tile-memory texture that is
    /// never pooled; its lifetime is exactly one render pass.
    pub fn acquire_memoryless(
        &self,
        format: wgpu::TextureFormat,
        width: u32,
        height: u32,
    ) -> Result<PooledTexture> {
        let desc = TextureDescriptor {
            format,
            width,
            height,
            usage: TextureUsage::RenderTarget,
            storage: TextureStorage::Memoryless,
            mip_levels: 1,
        };
        let inner = self.inner.lock().expect("texture pool mutex poisoned");
        let texture = inner.device.create_texture(&desc.to_wgpu());
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Ok(PooledTexture {
            texture: Some(texture),
            view: Some(view),
            key: PoolKey::from_descriptor(&desc),
            width,
            height,
            size_bytes: desc.size_bytes(),
            pool: Weak::new(),
            memoryless: true,
        })
    }

    /// §4.1 `purge`: drop every pooled (non-acquired) texture.
    pub fn purge(&self) {
        let mut inner = self.inner.lock().expect("texture pool mutex poisoned");
        inner.free.clear();
        inner.lru.clear();
        inner.resident_bytes = 0;
        inner.stats.count = 0;
        inner.stats.bytes = 0;
    }

    /// §4.1 `stats`: `(count, bytes, heap_bytes)`. `heap_bytes` mirrors
    /// `bytes` in this implementation — every pooled texture is accounted
    /// identically regardless of storage mode, since §4.1's heap-vs-device
    /// allocation choice affects only *where* a texture lives, not how its
    /// budget contribution is estimated (§4.1 size estimation formula).
    pub fn stats(&self) -> (usize, u64, u64) {
        let inner = self.inner.lock().expect("texture pool mutex poisoned");
        (inner.stats.count, inner.stats.bytes, inner.stats.bytes)
    }

    pub fn detailed_stats(&self) -> PoolStats {
        self.inner.lock().expect("texture pool mutex poisoned").stats
    }
}

/// A texture checked out from the pool with RAII semantics: returned on
/// `Drop` regardless of which exit path released it (panic unwind aside).
#[derive(Debug)]
pub struct PooledTexture {
    texture: Option<wgpu::Texture>,
    view: Option<wgpu::TextureView>,
    key: PoolKey,
    width: u32,
    height: u32,
    size_bytes: u64,
    pool: Weak<Mutex<Inner>>,
    memoryless: bool,
}

impl PooledTexture {
    pub fn texture(&self) -> &wgpu::Texture {
        self.texture.as_ref().expect("PooledTexture already released")
    }

    pub fn view(&self) -> &wgpu::TextureView {
        self.view.as_ref().expect("PooledTexture already released")
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn key(&self) -> &PoolKey {
        &self.key
    }

    /// §4.1 `release`, called explicitly. Also runs automatically on `Drop`;
    /// calling it explicitly lets the executor's eager-release bookkeeping
    /// (§4.4 open question) observe the return synchronously.
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        let (Some(texture), Some(view)) = (self.texture.take(), self.view.take()) else {
            return;
        };
        if self.memoryless {
            // Memoryless textures are never returned to the pool (§3.2 invariant).
            drop(texture);
            drop(view);
            return;
        }
        if let Some(pool) = self.pool.upgrade() {
            let mut inner = pool.lock().expect("texture pool mutex poisoned");
            inner.return_entry(
                self.key.clone(),
                PooledEntry {
                    texture,
                    view,
                    size_bytes: self.size_bytes,
                },
            );
        } else {
            warn!("texture pool dropped before a PooledTexture was released; destroying texture");
            drop(texture);
        }
    }
}

impl Drop for PooledTexture {
    fn drop(&mut self) {
        self.release_inner();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::texture_pool::key::test_support::headless_device;

    fn desc(w: u32, h: u32) -> TextureDescriptor {
        TextureDescriptor {
            format: wgpu::TextureFormat::Rgba16Float,
            width: w,
            height: h,
            usage: TextureUsage::ShaderReadWrite,
            storage: TextureStorage::Private,
            mip_levels: 1,
        }
    }

    #[tokio::test]
    async fn acquire_then_release_reuses_texture() {
        let device = headless_device().await;
        let pool = TexturePool::new(device, PoolConfig::default());

        let tex = pool.acquire(desc(64, 64)).unwrap();
        tex.release();
        assert_eq!(pool.detailed_stats().allocations, 1);

        let _tex2 = pool.acquire(desc(64, 64)).unwrap();
        let stats = pool.detailed_stats();
        assert_eq!(stats.allocations, 1);
        assert_eq!(stats.reuses, 1);
    }

    #[tokio::test]
    async fn drop_releases_without_explicit_call() {
        let device = headless_device().await;
        let pool = TexturePool::new(device, PoolConfig::default());
        {
            let _tex = pool.acquire(desc(32, 32)).unwrap();
        }
        let (count, bytes, _) = pool.stats();
        assert_eq!(count, 1);
        assert!(bytes > 0);
    }

    #[tokio::test]
    async fn eviction_under_budget_seed_scenario() {
        // Scenario 5: budget 64 MiB, ten 1920x1080 RGBA16F textures (~16 MiB
        // each acquire+release cycle), pool holds at most four afterwards.
        let device = headless_device().await;
        let config = PoolConfig {
            budget_bytes: 64 * 1024 * 1024,
            max_per_key: usize::MAX,
        };
        let pool = TexturePool::new(device, config);

        let textures: Vec<_> = (0..10).map(|_| pool.acquire(desc(1920, 1080)).unwrap()).collect();
        for tex in textures {
            tex.release();
        }

        let (count, bytes, _) = pool.stats();
        assert!(count <= 4, "pool held {count} textures, expected <= 4");
        assert!(bytes <= 64 * 1024 * 1024);

        // Eleventh acquire still succeeds.
        let eleventh = pool.acquire(desc(1920, 1080));
        assert!(eleventh.is_ok());
    }

    #[tokio::test]
    async fn memoryless_texture_is_never_pooled() {
        let device = headless_device().await;
        let pool = TexturePool::new(device, PoolConfig::default());
        {
            let _tex = pool.acquire_memoryless(wgpu::TextureFormat::Rgba16Float, 16, 16).unwrap();
        }
        let (count, _, _) = pool.stats();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn purge_drops_all_pooled_textures() {
        let device = headless_device().await;
        let pool = TexturePool::new(device, PoolConfig::default());
        for _ in 0..3 {
            pool.acquire(desc(8, 8)).unwrap().release();
        }
        pool.purge();
        let (count, bytes, _) = pool.stats();
        assert_eq!(count, 0);
        assert_eq!(bytes, 0);
    }

    #[tokio::test]
    async fn purged_pool_reacquire_produces_same_descriptor_hash() {
        let device = headless_device().await;
        let pool = TexturePool::new(device, PoolConfig::default());
        let key_before = pool.acquire(desc(128, 128)).unwrap().key().clone();
        pool.purge();
        let key_after = pool.acquire(desc(128, 128)).unwrap().key().clone();
        assert_eq!(key_before, key_after);
    }
}
