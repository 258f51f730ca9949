//! Read accelerators in front of the catalog and the block store.
//!
//! Entries never expire on their own, the directory invalidates them on every mutation.

mod lru;

use crate::config::{CacheKind, DirectoryConfig};
use crate::meta::FileRecord;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub use lru::LRUCache;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    /// metadata record by file name
    File(String),
    /// block by file id and block number
    Block(String, u64),
    /// the listing of all records
    AllFiles,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CacheValue {
    Record(FileRecord),
    /// a confirmed absence, so repeated lookups of a missing name stay local
    Missing,
    Block(Arc<Vec<u8>>),
    Records(Arc<Vec<FileRecord>>),
}

impl CacheValue {
    fn weight(&self) -> usize {
        match self {
            CacheValue::Block(b) => b.len().max(1),
            CacheValue::Records(r) => r.len().max(1) * 64,
            _ => 64,
        }
    }
}

pub trait Cache: Send + Sync {
    fn get(&self, key: &CacheKey) -> Option<CacheValue>;

    fn set(&self, key: CacheKey, val: CacheValue);

    fn delete(&self, key: &CacheKey);
}

/// Hands out one cache per namespace, directories sharing a namespace share entries.
pub trait CacheProvider: Send + Sync {
    fn cache(&self, namespace: &str) -> Arc<dyn Cache>;
}

pub struct LruCache {
    inner: Mutex<LRUCache<CacheKey, CacheValue>>,
}

impl LruCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(LRUCache::new(capacity)),
        }
    }
}

impl Cache for LruCache {
    fn get(&self, key: &CacheKey) -> Option<CacheValue> {
        let mut lru = self.inner.lock().unwrap();
        lru.get(key).cloned()
    }

    fn set(&self, key: CacheKey, val: CacheValue) {
        let w = val.weight();
        self.inner.lock().unwrap().add(key, val, w);
    }

    fn delete(&self, key: &CacheKey) {
        self.inner.lock().unwrap().del(key);
    }
}

pub struct MokaCache {
    inner: moka::sync::Cache<CacheKey, CacheValue>,
}

impl MokaCache {
    pub fn new(capacity: u64) -> Self {
        let inner = moka::sync::Cache::builder()
            .max_capacity(capacity)
            .weigher(|_k: &CacheKey, v: &CacheValue| -> u32 { v.weight().try_into().unwrap_or(u32::MAX) })
            .build();
        Self { inner }
    }
}

impl Cache for MokaCache {
    fn get(&self, key: &CacheKey) -> Option<CacheValue> {
        self.inner.get(key)
    }

    fn set(&self, key: CacheKey, val: CacheValue) {
        self.inner.insert(key, val);
    }

    fn delete(&self, key: &CacheKey) {
        self.inner.invalidate(key);
    }
}

/// Builds caches of one kind and remembers them by namespace.
pub struct NamespacedProvider<F> {
    caches: Mutex<HashMap<String, Arc<dyn Cache>>>,
    build: F,
}

impl<F> NamespacedProvider<F>
where
    F: Fn() -> Arc<dyn Cache> + Send + Sync,
{
    pub fn new(build: F) -> Self {
        Self {
            caches: Mutex::new(HashMap::new()),
            build,
        }
    }
}

impl<F> CacheProvider for NamespacedProvider<F>
where
    F: Fn() -> Arc<dyn Cache> + Send + Sync,
{
    fn cache(&self, namespace: &str) -> Arc<dyn Cache> {
        let mut caches = self.caches.lock().unwrap();
        caches
            .entry(namespace.to_string())
            .or_insert_with(|| {
                log::info!("new cache namespace {}", namespace);
                (self.build)()
            })
            .clone()
    }
}

pub fn lru_provider(capacity: usize) -> Arc<dyn CacheProvider> {
    Arc::new(NamespacedProvider::new(move || {
        Arc::new(LruCache::new(capacity)) as Arc<dyn Cache>
    }))
}

pub fn moka_provider(capacity: u64) -> Arc<dyn CacheProvider> {
    Arc::new(NamespacedProvider::new(move || {
        Arc::new(MokaCache::new(capacity)) as Arc<dyn Cache>
    }))
}

/// provider for the configured cache kind, `None` when caching is off
pub fn from_config(cfg: &DirectoryConfig) -> Option<Arc<dyn CacheProvider>> {
    match cfg.cache {
        CacheKind::None => None,
        CacheKind::Lru => Some(lru_provider(cfg.cache_capacity as usize)),
        CacheKind::Moka => Some(moka_provider(cfg.cache_capacity)),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn exercise(c: &dyn Cache) {
        let r = FileRecord::new("a");
        assert!(c.get(&CacheKey::File("a".into())).is_none());
        c.set(CacheKey::File("a".into()), CacheValue::Record(r.clone()));
        c.set(CacheKey::File("b".into()), CacheValue::Missing);
        c.set(
            CacheKey::Block(r.id().to_string(), 0),
            CacheValue::Block(Arc::new(vec![7u8; 16])),
        );
        assert_eq!(c.get(&CacheKey::File("a".into())), Some(CacheValue::Record(r.clone())));
        assert_eq!(c.get(&CacheKey::File("b".into())), Some(CacheValue::Missing));
        match c.get(&CacheKey::Block(r.id().to_string(), 0)) {
            Some(CacheValue::Block(b)) => assert_eq!(b.len(), 16),
            other => panic!("unexpected {:?}", other),
        }
        c.delete(&CacheKey::File("a".into()));
        assert!(c.get(&CacheKey::File("a".into())).is_none());
    }

    #[test]
    fn test_lru_cache() {
        exercise(&LruCache::new(1 << 20));
    }

    #[test]
    fn test_moka_cache() {
        exercise(&MokaCache::new(1 << 20));
    }

    #[test]
    fn test_namespace() {
        let p = lru_provider(1 << 20);
        let a = p.cache("idx");
        let b = p.cache("idx");
        let c = p.cache("other");
        a.set(CacheKey::AllFiles, CacheValue::Records(Arc::new(Vec::new())));
        assert!(b.get(&CacheKey::AllFiles).is_some());
        assert!(c.get(&CacheKey::AllFiles).is_none());
    }

    #[test]
    fn test_from_config() {
        let cfg = DirectoryConfig::default();
        assert!(from_config(&cfg).is_none());
        let cfg = DirectoryConfig {
            cache: CacheKind::Moka,
            ..DirectoryConfig::default()
        };
        assert!(from_config(&cfg).is_some());
    }
}
