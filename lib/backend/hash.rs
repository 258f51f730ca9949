//! Hash key-value binding.
//!
//! Layout:
//! - one hash under `metadata_key`, field = file name, value = encoded `FileRecord`
//! - one hash per file id, field = block number in decimal, value = block bytes
//!
//! Locks use the conditional field set (`HSETNX`).

use crate::error::Result;
use crate::meta::{Catalog, FileRecord, MetaKV};
use crate::store::{Backend, BlockStore};
use std::collections::HashMap;
use std::sync::Mutex;

/// The handful of hash commands the binding needs.
pub trait HashClient: Send + Sync {
    fn hget(&self, key: &str, field: &str) -> Result<Option<Vec<u8>>>;

    fn hgetall(&self, key: &str) -> Result<Vec<(String, Vec<u8>)>>;

    fn hset(&self, key: &str, field: &str, val: &[u8]) -> Result<()>;

    /// set only if `field` is absent, returns whether it was set
    fn hsetnx(&self, key: &str, field: &str, val: &[u8]) -> Result<bool>;

    fn hdel(&self, key: &str, field: &str) -> Result<()>;

    fn del(&self, key: &str) -> Result<()>;

    /// `hdel(key, field)` followed by `del(other)`, clients that can pipeline do so
    fn hdel_then_del(&self, key: &str, field: &str, other: &str) -> Result<()> {
        self.hdel(key, field)?;
        self.del(other)
    }
}

/// In-process hash store, for embedding and tests.
#[derive(Default)]
pub struct MemHashClient {
    data: Mutex<HashMap<String, HashMap<String, Vec<u8>>>>,
}

impl MemHashClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// number of fields in hash `key`, 0 when absent
    pub fn hlen(&self, key: &str) -> usize {
        let data = self.data.lock().unwrap();
        data.get(key).map(|h| h.len()).unwrap_or(0)
    }

    pub fn exists(&self, key: &str) -> bool {
        self.data.lock().unwrap().contains_key(key)
    }
}

impl HashClient for MemHashClient {
    fn hget(&self, key: &str, field: &str) -> Result<Option<Vec<u8>>> {
        let data = self.data.lock().unwrap();
        Ok(data.get(key).and_then(|h| h.get(field)).cloned())
    }

    fn hgetall(&self, key: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let data = self.data.lock().unwrap();
        Ok(data
            .get(key)
            .map(|h| h.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default())
    }

    fn hset(&self, key: &str, field: &str, val: &[u8]) -> Result<()> {
        let mut data = self.data.lock().unwrap();
        data.entry(key.to_string())
            .or_default()
            .insert(field.to_string(), val.to_vec());
        Ok(())
    }

    fn hsetnx(&self, key: &str, field: &str, val: &[u8]) -> Result<bool> {
        let mut data = self.data.lock().unwrap();
        let h = data.entry(key.to_string()).or_default();
        if h.contains_key(field) {
            return Ok(false);
        }
        h.insert(field.to_string(), val.to_vec());
        Ok(true)
    }

    fn hdel(&self, key: &str, field: &str) -> Result<()> {
        let mut data = self.data.lock().unwrap();
        let empty = match data.get_mut(key) {
            None => return Ok(()),
            Some(h) => {
                h.remove(field);
                h.is_empty()
            }
        };
        // an empty hash doesn't exist
        if empty {
            data.remove(key);
        }
        Ok(())
    }

    fn del(&self, key: &str) -> Result<()> {
        self.data.lock().unwrap().remove(key);
        Ok(())
    }
}

#[cfg(feature = "redis")]
pub use self::redis_client::RedisClient;

#[cfg(feature = "redis")]
mod redis_client {
    use super::HashClient;
    use crate::error::Result;
    use redis::Commands;
    use std::collections::HashMap;
    use std::sync::Mutex;

    const MAX_IDLE: usize = 8;

    /// Redis server reached through a small pool of reused connections.
    pub struct RedisClient {
        client: redis::Client,
        idle: Mutex<Vec<redis::Connection>>,
    }

    impl RedisClient {
        pub fn open(url: &str) -> Result<Self> {
            let client = redis::Client::open(url)?;
            Ok(Self {
                client,
                idle: Mutex::new(Vec::new()),
            })
        }

        pub fn idle_connections(&self) -> usize {
            self.idle.lock().unwrap().len()
        }

        /// run `f` on a pooled connection, a connection that saw an error is not reused
        fn with_conn<T>(&self, f: impl FnOnce(&mut redis::Connection) -> redis::RedisResult<T>) -> Result<T> {
            let pooled = self.idle.lock().unwrap().pop();
            let mut con = match pooled {
                Some(c) => c,
                None => self.client.get_connection()?,
            };
            let v = f(&mut con)?;
            let mut idle = self.idle.lock().unwrap();
            if idle.len() < MAX_IDLE {
                idle.push(con);
            }
            Ok(v)
        }
    }

    impl HashClient for RedisClient {
        fn hget(&self, key: &str, field: &str) -> Result<Option<Vec<u8>>> {
            self.with_conn(|c| c.hget(key, field))
        }

        fn hgetall(&self, key: &str) -> Result<Vec<(String, Vec<u8>)>> {
            let m: HashMap<String, Vec<u8>> = self.with_conn(|c| c.hgetall(key))?;
            Ok(m.into_iter().collect())
        }

        fn hset(&self, key: &str, field: &str, val: &[u8]) -> Result<()> {
            self.with_conn(|c| c.hset(key, field, val))
        }

        fn hsetnx(&self, key: &str, field: &str, val: &[u8]) -> Result<bool> {
            self.with_conn(|c| c.hset_nx(key, field, val))
        }

        fn hdel(&self, key: &str, field: &str) -> Result<()> {
            self.with_conn(|c| c.hdel(key, field))
        }

        fn del(&self, key: &str) -> Result<()> {
            self.with_conn(|c| c.del(key))
        }

        fn hdel_then_del(&self, key: &str, field: &str, other: &str) -> Result<()> {
            self.with_conn(|c| {
                redis::pipe()
                    .hdel(key, field)
                    .ignore()
                    .del(other)
                    .ignore()
                    .query::<()>(c)
            })
        }
    }

    #[cfg(test)]
    mod test {
        use super::*;

        /// needs a server, e.g. `KVDIR_TEST_REDIS=redis://127.0.0.1:6379`
        #[test]
        #[ignore]
        fn test_connection_reused() {
            let url = std::env::var("KVDIR_TEST_REDIS").unwrap();
            let c = RedisClient::open(&url).unwrap();
            let key = format!("kvdir-test-{}", crate::utils::next_id());
            for i in 0..10u8 {
                c.hset(&key, &i.to_string(), &[i]).unwrap();
                assert_eq!(c.hget(&key, &i.to_string()).unwrap(), Some(vec![i]));
            }
            assert_eq!(c.hgetall(&key).unwrap().len(), 10);
            // sequential calls share one connection
            assert_eq!(c.idle_connections(), 1);
            c.del(&key).unwrap();
        }
    }
}

pub struct HashBackend<C: HashClient> {
    client: C,
    metadata_key: String,
}

impl<C: HashClient> HashBackend<C> {
    pub fn new(client: C, metadata_key: &str) -> Self {
        Self {
            client,
            metadata_key: metadata_key.to_string(),
        }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn metadata_key(&self) -> &str {
        &self.metadata_key
    }

    fn block_field(block: u64) -> String {
        block.to_string()
    }
}

impl<C: HashClient> Catalog for HashBackend<C> {
    fn get(&self, name: &str) -> Result<Option<FileRecord>> {
        let data = self.client.hget(&self.metadata_key, &FileRecord::key(name))?;
        Ok(data.and_then(|d| FileRecord::decode(&d)))
    }

    fn list(&self) -> Result<Vec<FileRecord>> {
        let all = self.client.hgetall(&self.metadata_key)?;
        Ok(all
            .into_iter()
            .filter_map(|(name, data)| {
                let r = FileRecord::decode(&data);
                if r.is_none() {
                    log::warn!("skip malformed record {}", name);
                }
                r
            })
            .collect())
    }

    fn put(&self, record: &FileRecord) -> Result<()> {
        self.client.hset(&self.metadata_key, &record.key(), &record.val())
    }

    fn put_if_absent(&self, record: &FileRecord) -> Result<bool> {
        self.client.hsetnx(&self.metadata_key, &record.key(), &record.val())
    }

    fn remove(&self, name: &str) -> Result<()> {
        self.client.hdel(&self.metadata_key, &FileRecord::key(name))
    }
}

impl<C: HashClient> BlockStore for HashBackend<C> {
    fn read_block(&self, id: &str, block: u64) -> Result<Option<Vec<u8>>> {
        self.client.hget(id, &Self::block_field(block))
    }

    fn write_block(&self, id: &str, block: u64, data: &[u8]) -> Result<()> {
        self.client.hset(id, &Self::block_field(block), data)
    }

    fn remove_blocks(&self, id: &str) -> Result<()> {
        self.client.del(id)
    }
}

impl<C: HashClient> Backend for HashBackend<C> {
    fn kind(&self) -> &'static str {
        "hash"
    }

    fn remove_file(&self, record: &FileRecord) -> Result<()> {
        self.client
            .hdel_then_del(&self.metadata_key, &record.key(), record.id())
    }
}
