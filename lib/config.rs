use crate::error::{Error, Result};
use crate::utils::{
    DEFAULT_BLOCK_SIZE, DEFAULT_COMMIT_PERIOD_MS, DEFAULT_METADATA_KEY, DEFAULT_REFRESH_PERIOD_MS,
    DEFAULT_TABLE_FILEDATA, DEFAULT_TABLE_METADATA,
};
use serde::Deserialize;
use std::fmt;
use std::fs;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub directory: DirectoryConfig,
    #[serde(default)]
    pub manager: ManagerConfig,
    #[serde(default)]
    pub backend: BackendConfig,
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(e.to_string()))
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CacheKind {
    #[default]
    None,
    Lru,
    Moka,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DirectoryConfig {
    #[serde(default = "default_block_size")]
    pub block_size: i64,
    #[serde(default)]
    pub cache: CacheKind,
    #[serde(default)]
    pub cache_namespace: Option<String>,
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: u64,
}

impl DirectoryConfig {
    /// non-positive values fall back to the default
    pub fn block_size(&self) -> usize {
        if self.block_size <= 0 {
            DEFAULT_BLOCK_SIZE
        } else {
            self.block_size as usize
        }
    }

    pub fn with_block_size(mut self, block_size: i64) -> Self {
        self.block_size = block_size;
        self
    }
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            block_size: default_block_size(),
            cache: CacheKind::None,
            cache_namespace: None,
            cache_capacity: default_cache_capacity(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ManagerConfig {
    #[serde(default = "default_refresh_period_ms")]
    pub refresh_period_ms: i64,
    #[serde(default = "default_commit_period_ms")]
    pub commit_period_ms: i64,
    #[serde(default = "default_nrt")]
    pub nrt: bool,
    #[serde(default = "default_scheduler_workers")]
    pub scheduler_workers: usize,
}

impl ManagerConfig {
    /// `None` when the period disables the task
    pub fn refresh_period(&self) -> Option<Duration> {
        period(self.refresh_period_ms)
    }

    pub fn commit_period(&self) -> Option<Duration> {
        period(self.commit_period_ms)
    }
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            refresh_period_ms: default_refresh_period_ms(),
            commit_period_ms: default_commit_period_ms(),
            nrt: default_nrt(),
            scheduler_workers: default_scheduler_workers(),
        }
    }
}

pub(crate) fn period(ms: i64) -> Option<Duration> {
    if ms > 0 {
        Some(Duration::from_millis(ms as u64))
    } else {
        None
    }
}

/// Consistency levels understood by the wide-column binding.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Consistency {
    Any,
    One,
    Two,
    Three,
    Quorum,
    All,
    LocalOne,
    LocalQuorum,
    EachQuorum,
    Serial,
    LocalSerial,
}

impl Consistency {
    /// only the serial levels give linearizable conditional writes
    pub fn is_serial(&self) -> bool {
        matches!(self, Consistency::Serial | Consistency::LocalSerial)
    }
}

impl fmt::Display for Consistency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Consistency::Any => "ANY",
            Consistency::One => "ONE",
            Consistency::Two => "TWO",
            Consistency::Three => "THREE",
            Consistency::Quorum => "QUORUM",
            Consistency::All => "ALL",
            Consistency::LocalOne => "LOCAL_ONE",
            Consistency::LocalQuorum => "LOCAL_QUORUM",
            Consistency::EachQuorum => "EACH_QUORUM",
            Consistency::Serial => "SERIAL",
            Consistency::LocalSerial => "LOCAL_SERIAL",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct ConsistencyConfig {
    #[serde(default = "default_consistency")]
    pub read_data: Consistency,
    #[serde(default = "default_consistency")]
    pub write_data: Consistency,
    #[serde(default = "default_consistency")]
    pub read_metadata: Consistency,
    #[serde(default = "default_consistency")]
    pub write_metadata: Consistency,
    #[serde(default = "default_consistency")]
    pub remove_metadata: Consistency,
    #[serde(default = "default_consistency")]
    pub remove_data: Consistency,
    #[serde(default = "default_lock_consistency")]
    pub lock: Consistency,
}

impl Default for ConsistencyConfig {
    fn default() -> Self {
        Self {
            read_data: default_consistency(),
            write_data: default_consistency(),
            read_metadata: default_consistency(),
            write_metadata: default_consistency(),
            remove_metadata: default_consistency(),
            remove_data: default_consistency(),
            lock: default_lock_consistency(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Hash,
    Column,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BackendConfig {
    #[serde(default)]
    pub kind: BackendKind,
    /// hash binding only; absent means the in-process store
    #[serde(default)]
    pub url: Option<String>,
    /// column binding only, `host:port` of cluster nodes; empty means the in-process store
    #[serde(default)]
    pub contact_points: Vec<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_metadata_key")]
    pub metadata_key: String,
    #[serde(default)]
    pub keyspace: Option<String>,
    #[serde(default = "default_table_metadata")]
    pub table_metadata: String,
    #[serde(default = "default_table_filedata")]
    pub table_filedata: String,
    #[serde(default)]
    pub consistency: ConsistencyConfig,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::Hash,
            url: None,
            contact_points: Vec::new(),
            username: None,
            password: None,
            metadata_key: default_metadata_key(),
            keyspace: None,
            table_metadata: default_table_metadata(),
            table_filedata: default_table_filedata(),
            consistency: ConsistencyConfig::default(),
        }
    }
}

fn default_block_size() -> i64 {
    DEFAULT_BLOCK_SIZE as i64
}

fn default_cache_capacity() -> u64 {
    64 << 20
}

fn default_refresh_period_ms() -> i64 {
    DEFAULT_REFRESH_PERIOD_MS
}

fn default_commit_period_ms() -> i64 {
    DEFAULT_COMMIT_PERIOD_MS
}

fn default_nrt() -> bool {
    true
}

fn default_scheduler_workers() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(2)
}

fn default_consistency() -> Consistency {
    Consistency::LocalQuorum
}

fn default_lock_consistency() -> Consistency {
    Consistency::LocalSerial
}

fn default_metadata_key() -> String {
    DEFAULT_METADATA_KEY.to_string()
}

fn default_table_metadata() -> String {
    DEFAULT_TABLE_METADATA.to_string()
}

fn default_table_filedata() -> String {
    DEFAULT_TABLE_FILEDATA.to_string()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = Config::parse("").unwrap();
        assert_eq!(cfg.directory.block_size(), 64 << 10);
        assert_eq!(cfg.directory.cache, CacheKind::None);
        assert_eq!(cfg.manager.refresh_period(), Some(Duration::from_millis(10000)));
        assert_eq!(cfg.manager.commit_period(), Some(Duration::from_millis(1000)));
        assert!(cfg.manager.nrt);
        assert_eq!(cfg.backend.kind, BackendKind::Hash);
        assert_eq!(cfg.backend.metadata_key, "_directory_metadata_");
        assert_eq!(cfg.backend.consistency.read_data, Consistency::LocalQuorum);
        assert_eq!(cfg.backend.consistency.lock, Consistency::LocalSerial);
    }

    #[test]
    fn test_parse() {
        let cfg = Config::parse(
            r#"
            [directory]
            block_size = -1
            cache = "moka"
            cache_namespace = "idx"

            [manager]
            refresh_period_ms = 0
            commit_period_ms = -5
            nrt = false

            [backend]
            kind = "column"
            keyspace = "search"
            contact_points = ["10.0.0.1:9042", "10.0.0.2:9042"]

            [backend.consistency]
            write_data = "ONE"
            lock = "SERIAL"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.directory.block_size(), 64 << 10);
        assert_eq!(cfg.directory.cache, CacheKind::Moka);
        assert_eq!(cfg.directory.cache_namespace.as_deref(), Some("idx"));
        assert_eq!(cfg.manager.refresh_period(), None);
        assert_eq!(cfg.manager.commit_period(), None);
        assert!(!cfg.manager.nrt);
        assert_eq!(cfg.backend.kind, BackendKind::Column);
        assert_eq!(cfg.backend.keyspace.as_deref(), Some("search"));
        assert_eq!(cfg.backend.contact_points.len(), 2);
        assert!(cfg.backend.username.is_none());
        assert_eq!(cfg.backend.table_filedata, "filedata");
        assert_eq!(cfg.backend.consistency.write_data, Consistency::One);
        assert_eq!(cfg.backend.consistency.read_data, Consistency::LocalQuorum);
        assert!(cfg.backend.consistency.lock.is_serial());
    }

    #[test]
    fn test_bad_config() {
        let r = Config::parse("[manager]\nnrt = \"yes\"");
        assert!(matches!(r, Err(Error::Config(_))));
    }
}
