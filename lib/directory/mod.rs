//! Block-addressed virtual directory over a `Backend`.
//!
//! A file is a `FileRecord` in the catalog plus `ceil(size / block_size)` blocks keyed by the
//! record id. Everything an engine needs from a directory (list, length, open, create,
//! delete, rename, lock) is served from those two stores, optionally through a cache.

mod input;
mod lock;
mod output;

use crate::backend;
use crate::cache::{self, Cache, CacheKey, CacheProvider, CacheValue};
use crate::config::{Config, DirectoryConfig};
use crate::error::{Error, Result};
use crate::meta::{Catalog, FileRecord};
use crate::store::{Backend, BlockStore};
use crate::utils::{blocks_for, DEFAULT_BLOCK_SIZE};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub use input::IndexInput;
pub use lock::DirectoryLock;
pub use output::IndexOutput;

const DEFAULT_CACHE_NAMESPACE: &str = "kvdir";

pub(crate) struct Inner {
    backend: Arc<dyn Backend>,
    cache: Option<Arc<dyn Cache>>,
    block_size: usize,
    closed: AtomicBool,
}

impl Inner {
    pub(crate) fn block_size(&self) -> usize {
        self.block_size
    }

    pub(crate) fn backend(&self) -> &dyn Backend {
        self.backend.as_ref()
    }

    fn cache_get(&self, key: &CacheKey) -> Option<CacheValue> {
        let v = self.cache.as_ref()?.get(key);
        log::trace!("cache {} {:?}", if v.is_some() { "hit" } else { "miss" }, key);
        v
    }

    fn cache_set(&self, key: CacheKey, val: CacheValue) {
        if let Some(c) = self.cache.as_ref() {
            c.set(key, val);
        }
    }

    pub(crate) fn cache_del(&self, key: &CacheKey) {
        if let Some(c) = self.cache.as_ref() {
            c.delete(key);
        }
    }

    fn invalidate_blocks(&self, record: &FileRecord) {
        if self.cache.is_none() {
            return;
        }
        for b in 0..blocks_for(record.size(), self.block_size as u64) {
            self.cache_del(&CacheKey::Block(record.id().to_string(), b));
        }
    }

    pub(crate) fn get_file_info(&self, name: &str) -> Result<Option<FileRecord>> {
        let key = CacheKey::File(name.to_string());
        match self.cache_get(&key) {
            Some(CacheValue::Record(r)) => return Ok(Some(r)),
            Some(CacheValue::Missing) => return Ok(None),
            _ => {}
        }
        let r = self.backend.get(name)?;
        match &r {
            Some(r) => self.cache_set(key, CacheValue::Record(r.clone())),
            None => self.cache_set(key, CacheValue::Missing),
        }
        Ok(r)
    }

    pub(crate) fn update_file_info(&self, record: &FileRecord) -> Result<()> {
        self.backend.put(record)?;
        self.cache_set(
            CacheKey::File(record.name().to_string()),
            CacheValue::Record(record.clone()),
        );
        self.cache_del(&CacheKey::AllFiles);
        Ok(())
    }

    pub(crate) fn remove_file_info(&self, name: &str) -> Result<()> {
        self.backend.remove(name)?;
        self.cache_del(&CacheKey::File(name.to_string()));
        self.cache_del(&CacheKey::AllFiles);
        Ok(())
    }

    fn all_file_info(&self) -> Result<Arc<Vec<FileRecord>>> {
        if let Some(CacheValue::Records(r)) = self.cache_get(&CacheKey::AllFiles) {
            return Ok(r);
        }
        let all = Arc::new(self.backend.list()?);
        self.cache_set(CacheKey::AllFiles, CacheValue::Records(all.clone()));
        Ok(all)
    }

    /// whether a live record other than `name` points at `id`, always read from the backend
    fn id_shared(&self, id: &str, name: &str) -> Result<bool> {
        let all = self.backend.list()?;
        Ok(all.iter().any(|r| r.id() == id && r.name() != name))
    }

    /// block `block` of `id` padded to the block size, `None` when the store has no such block
    pub(crate) fn read_block(&self, id: &str, block: u64) -> Result<Option<Arc<Vec<u8>>>> {
        let key = CacheKey::Block(id.to_string(), block);
        if let Some(CacheValue::Block(b)) = self.cache_get(&key) {
            return Ok(Some(b));
        }
        let data = match self.backend.read_block(id, block)? {
            None => return Ok(None),
            Some(mut d) => {
                if d.len() < self.block_size {
                    d.resize(self.block_size, 0);
                }
                Arc::new(d)
            }
        };
        self.cache_set(key, CacheValue::Block(data.clone()));
        Ok(Some(data))
    }

    pub(crate) fn write_block(&self, id: &str, block: u64, data: &[u8]) -> Result<()> {
        self.backend.write_block(id, block, data)?;
        self.cache_set(
            CacheKey::Block(id.to_string(), block),
            CacheValue::Block(Arc::new(data.to_vec())),
        );
        Ok(())
    }

    /// drop the data of a record that no longer has a name, unless another name still uses it
    fn reclaim(&self, record: &FileRecord) -> Result<()> {
        if self.id_shared(record.id(), record.name())? {
            log::info!("keep blocks of {}, id {} is still referenced", record.name(), record.id());
            return Ok(());
        }
        self.backend.remove_blocks(record.id())?;
        self.invalidate_blocks(record);
        Ok(())
    }
}

/// The storage contract consumed by an indexing engine.
///
/// Cloning is cheap, clones share the backend and the cache.
#[derive(Clone)]
pub struct Directory {
    inner: Arc<Inner>,
}

impl Directory {
    pub fn new(backend: Arc<dyn Backend>, block_size: usize) -> Self {
        Self::build(backend, block_size, None)
    }

    pub fn with_cache(backend: Arc<dyn Backend>, block_size: usize, cache: Arc<dyn Cache>) -> Self {
        Self::build(backend, block_size, Some(cache))
    }

    pub fn from_config(backend: Arc<dyn Backend>, cfg: &DirectoryConfig) -> Self {
        let cache = cache::from_config(cfg).map(|p| {
            let ns = cfg
                .cache_namespace
                .as_deref()
                .unwrap_or(DEFAULT_CACHE_NAMESPACE);
            p.cache(ns)
        });
        Self::build(backend, cfg.block_size(), cache)
    }

    /// backend and directory both from `cfg`
    pub fn open(cfg: &Config) -> Result<Self> {
        let backend = backend::from_config(&cfg.backend)?;
        Ok(Self::from_config(backend, &cfg.directory))
    }

    fn build(backend: Arc<dyn Backend>, block_size: usize, cache: Option<Arc<dyn Cache>>) -> Self {
        let block_size = if block_size == 0 {
            DEFAULT_BLOCK_SIZE
        } else {
            block_size
        };
        log::info!(
            "directory over {} backend, block size {}, cache {}",
            backend.kind(),
            block_size,
            cache.is_some()
        );
        Self {
            inner: Arc::new(Inner {
                backend,
                cache,
                block_size,
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn block_size(&self) -> usize {
        self.inner.block_size
    }

    pub fn backend(&self) -> Arc<dyn Backend> {
        self.inner.backend.clone()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(Error::Closed("directory".to_string()));
        }
        Ok(())
    }

    /// names of all live files, in backend enumeration order
    pub fn list_all(&self) -> Result<Vec<String>> {
        self.ensure_open()?;
        let all = self.inner.all_file_info()?;
        Ok(all.iter().map(|r| r.name().to_string()).collect())
    }

    pub fn file_length(&self, name: &str) -> Result<u64> {
        self.ensure_open()?;
        match self.inner.get_file_info(name)? {
            Some(r) => Ok(r.size()),
            None => Err(Error::NotFound(name.to_string())),
        }
    }

    pub fn file_exists(&self, name: &str) -> Result<bool> {
        self.ensure_open()?;
        Ok(self.inner.get_file_info(name)?.is_some())
    }

    /// reader bound to the id and size the record has now
    pub fn open_input(&self, name: &str) -> Result<IndexInput> {
        self.ensure_open()?;
        match self.inner.get_file_info(name)? {
            Some(r) => {
                log::trace!("open {} id {} size {}", name, r.id(), r.size());
                Ok(IndexInput::new(self.inner.clone(), r))
            }
            None => Err(Error::NotFound(name.to_string())),
        }
    }

    /// a fresh record replaces whatever `name` pointed to before
    pub fn create_output(&self, name: &str) -> Result<IndexOutput> {
        self.ensure_open()?;
        let record = FileRecord::new(name);
        self.inner.update_file_info(&record)?;
        log::trace!("create {} id {}", name, record.id());
        Ok(IndexOutput::new(self.inner.clone(), record))
    }

    /// `prefix + context + suffix + ".tmp"`, with a counter before `.tmp` while the name is taken
    pub fn create_temp_output(&self, prefix: &str, suffix: &str, context: &str) -> Result<IndexOutput> {
        self.ensure_open()?;
        let base = format!("{}{}{}", prefix, context, suffix);
        let mut name = format!("{}.tmp", base);
        let mut n = 0u64;
        while self.inner.get_file_info(&name)?.is_some() {
            n += 1;
            name = format!("{}_{}.tmp", base, n);
        }
        self.create_output(&name)
    }

    /// Remove `name` and its blocks. Absent names are a no-op.
    ///
    /// Blocks survive when another live name still references the same id.
    pub fn delete_file(&self, name: &str) -> Result<()> {
        self.ensure_open()?;
        let record = match self.inner.get_file_info(name)? {
            Some(r) => r,
            None => {
                log::trace!("delete {} absent", name);
                return Ok(());
            }
        };
        let inner = &self.inner;
        if inner.id_shared(record.id(), name)? {
            log::info!("delete {} keeps blocks, id {} is still referenced", name, record.id());
            inner.remove_file_info(name)?;
            return Ok(());
        }
        inner.backend.remove_file(&record)?;
        inner.cache_del(&CacheKey::File(name.to_string()));
        inner.cache_del(&CacheKey::AllFiles);
        inner.invalidate_blocks(&record);
        log::trace!("delete {} id {} size {}", name, record.id(), record.size());
        Ok(())
    }

    /// Point `dst` at the data of `src`, then drop `src`.
    ///
    /// The two catalog writes are separate, a crash in between leaves both names on the same
    /// id, which `delete_file` handles.
    pub fn rename(&self, src: &str, dst: &str) -> Result<()> {
        self.ensure_open()?;
        let record = self
            .inner
            .get_file_info(src)?
            .ok_or_else(|| Error::NotFound(src.to_string()))?;
        if src == dst {
            return Ok(());
        }
        let replaced = self.inner.get_file_info(dst)?;

        self.inner.update_file_info(&record.renamed(dst))?;
        self.inner.remove_file_info(src)?;

        if let Some(old) = replaced {
            if old.id() != record.id() {
                self.inner.reclaim(&old)?;
            }
        }
        log::trace!("rename {} -> {} id {}", src, dst, record.id());
        Ok(())
    }

    /// every write is visible as soon as it returns, nothing to do
    pub fn sync(&self, names: &[String]) -> Result<()> {
        self.ensure_open()?;
        log::trace!("sync {:?}", names);
        Ok(())
    }

    pub fn sync_meta_data(&self) -> Result<()> {
        self.ensure_open()?;
        log::trace!("sync metadata");
        Ok(())
    }

    pub fn obtain_lock(&self, name: &str) -> Result<DirectoryLock> {
        let lock = self.try_lock(name)?;
        if !lock.is_locked() {
            return Err(Error::LockObtainFailed(name.to_string()));
        }
        Ok(lock)
    }

    /// a single acquire attempt, the handle reports whether it won
    pub fn try_lock(&self, name: &str) -> Result<DirectoryLock> {
        self.ensure_open()?;
        DirectoryLock::try_obtain(self.clone(), name)
    }

    pub fn close(&self) {
        if !self.inner.closed.swap(true, Ordering::AcqRel) {
            log::info!("directory closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    pub(crate) fn inner(&self) -> &Arc<Inner> {
        &self.inner
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::backend::hash::{HashBackend, MemHashClient};
    use crate::cache::LruCache;
    use crate::utils::DEFAULT_METADATA_KEY;
    use std::io::{Read, Write};

    const BS: usize = 16;

    fn backend() -> Arc<HashBackend<MemHashClient>> {
        Arc::new(HashBackend::new(MemHashClient::new(), DEFAULT_METADATA_KEY))
    }

    fn write(dir: &Directory, name: &str, data: &[u8]) {
        let mut out = dir.create_output(name).unwrap();
        out.write_bytes(data).unwrap();
        out.close().unwrap();
    }

    fn read(dir: &Directory, name: &str) -> Vec<u8> {
        let mut input = dir.open_input(name).unwrap();
        let mut buf = vec![0u8; input.length() as usize];
        input.read_bytes(&mut buf).unwrap();
        buf
    }

    #[test]
    fn test_create_and_list() {
        let b = backend();
        let dir = Directory::new(b.clone(), BS);
        assert!(dir.list_all().unwrap().is_empty());
        write(&dir, "a", b"hello");
        write(&dir, "b", &[]);
        let mut names = dir.list_all().unwrap();
        names.sort();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(dir.file_length("a").unwrap(), 5);
        assert_eq!(dir.file_length("b").unwrap(), 0);
        assert!(dir.file_length("c").unwrap_err().is_not_found());
        assert!(matches!(dir.open_input("c"), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_overwrite() {
        let dir = Directory::new(backend(), BS);
        write(&dir, "a", &[1u8; 40]);
        write(&dir, "a", &[2u8; 3]);
        assert_eq!(read(&dir, "a"), vec![2u8; 3]);
    }

    #[test]
    fn test_delete() {
        let b = backend();
        let dir = Directory::new(b.clone(), BS);
        write(&dir, "a", &[7u8; 40]);
        let id = b.get("a").unwrap().unwrap().id().to_string();
        assert_eq!(b.client().hlen(&id), 3);

        dir.delete_file("a").unwrap();
        assert!(!b.client().exists(&id));
        assert!(matches!(dir.open_input("a"), Err(Error::NotFound(_))));
        // absent is fine
        dir.delete_file("a").unwrap();
    }

    #[test]
    fn test_rename() {
        let b = backend();
        let dir = Directory::new(b.clone(), BS);
        write(&dir, "a", b"segment data");
        write(&dir, "b", &[9u8; 20]);
        let old_b = b.get("b").unwrap().unwrap();

        dir.rename("a", "b").unwrap();
        assert_eq!(read(&dir, "b"), b"segment data");
        assert!(dir.file_length("a").unwrap_err().is_not_found());
        // replaced destination gave its blocks back
        assert!(b.read_block(old_b.id(), 0).unwrap().is_none());

        assert!(dir.rename("missing", "x").unwrap_err().is_not_found());
    }

    #[test]
    fn test_shared_id_survives_delete() {
        let b = backend();
        let dir = Directory::new(b.clone(), BS);
        write(&dir, "a", &[3u8; 20]);
        // the state a crash between the two rename steps leaves behind
        let r = b.get("a").unwrap().unwrap();
        b.put(&r.renamed("b")).unwrap();

        dir.delete_file("a").unwrap();
        assert_eq!(read(&dir, "b"), vec![3u8; 20]);
        dir.delete_file("b").unwrap();
        assert!(!b.client().exists(r.id()));
    }

    #[test]
    fn test_temp_output() {
        let dir = Directory::new(backend(), BS);
        let mut out = dir.create_temp_output("_0", "_sort", "merge").unwrap();
        assert_eq!(out.name(), "_0merge_sort.tmp");
        out.close().unwrap();
        let out = dir.create_temp_output("_0", "_sort", "merge").unwrap();
        assert_eq!(out.name(), "_0merge_sort_1.tmp");
    }

    #[test]
    fn test_io_traits() {
        let dir = Directory::new(backend(), BS);
        let mut out = dir.create_output("f").unwrap();
        out.write_all(&[5u8; 33]).unwrap();
        out.flush().unwrap();
        out.close().unwrap();
        let mut buf = Vec::new();
        dir.open_input("f").unwrap().read_to_end(&mut buf).unwrap();
        assert_eq!(buf, vec![5u8; 33]);
    }

    #[test]
    fn test_cache_through() {
        let b = backend();
        let cache: Arc<dyn Cache> = Arc::new(LruCache::new(1 << 20));
        let dir = Directory::with_cache(b.clone(), BS, cache.clone());
        write(&dir, "a", &[1u8; 20]);
        let r = b.get("a").unwrap().unwrap();
        assert!(cache.get(&CacheKey::Block(r.id().to_string(), 1)).is_some());
        assert_eq!(dir.list_all().unwrap(), vec!["a"]);
        assert!(cache.get(&CacheKey::AllFiles).is_some());

        // blocks come from the cache once loaded
        assert_eq!(read(&dir, "a"), vec![1u8; 20]);
        dir.delete_file("a").unwrap();
        assert!(cache.get(&CacheKey::AllFiles).is_none());
        assert!(cache.get(&CacheKey::Block(r.id().to_string(), 0)).is_none());
        assert!(cache.get(&CacheKey::Block(r.id().to_string(), 1)).is_none());
        assert!(dir.list_all().unwrap().is_empty());
        assert!(matches!(dir.open_input("a"), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_closed() {
        let dir = Directory::new(backend(), BS);
        dir.close();
        assert!(dir.is_closed());
        assert!(matches!(dir.list_all(), Err(Error::Closed(_))));
    }
}
