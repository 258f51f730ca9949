pub mod column;
pub mod hash;

use crate::config::{BackendConfig, BackendKind};
use crate::error::Result;
use crate::store::Backend;
use column::{ColumnBackend, MemColumnSession};
use hash::{HashBackend, MemHashClient};
use std::sync::Arc;

/// Build the binding named by `cfg`.
///
/// A binding without an endpoint (`url` for hash, `contact_points` for column) runs against
/// an in-process store. An endpoint whose client isn't compiled in (features `redis` and
/// `cassandra`) is a configuration error.
pub fn from_config(cfg: &BackendConfig) -> Result<Arc<dyn Backend>> {
    match cfg.kind {
        BackendKind::Hash => hash_backend(cfg),
        BackendKind::Column => column_backend(cfg),
    }
}

#[cfg(feature = "redis")]
fn hash_backend(cfg: &BackendConfig) -> Result<Arc<dyn Backend>> {
    match cfg.url.as_deref() {
        Some(url) => {
            log::info!("hash backend at {}", url);
            let client = hash::RedisClient::open(url)?;
            Ok(Arc::new(HashBackend::new(client, &cfg.metadata_key)))
        }
        None => Ok(Arc::new(HashBackend::new(MemHashClient::new(), &cfg.metadata_key))),
    }
}

#[cfg(not(feature = "redis"))]
fn hash_backend(cfg: &BackendConfig) -> Result<Arc<dyn Backend>> {
    if let Some(url) = cfg.url.as_deref() {
        return Err(crate::error::Error::Config(format!("redis support not built, can't reach {}", url)));
    }
    Ok(Arc::new(HashBackend::new(MemHashClient::new(), &cfg.metadata_key)))
}

#[cfg(feature = "cassandra")]
fn column_backend(cfg: &BackendConfig) -> Result<Arc<dyn Backend>> {
    if cfg.contact_points.is_empty() {
        log::info!("column backend, in-process session");
        return Ok(Arc::new(ColumnBackend::from_config(MemColumnSession::new(), cfg)));
    }
    let session = column::ScyllaSession::connect(cfg)?;
    Ok(Arc::new(ColumnBackend::from_config(session, cfg)))
}

#[cfg(not(feature = "cassandra"))]
fn column_backend(cfg: &BackendConfig) -> Result<Arc<dyn Backend>> {
    if !cfg.contact_points.is_empty() {
        return Err(crate::error::Error::Config(format!(
            "cassandra support not built, can't reach {:?}",
            cfg.contact_points
        )));
    }
    log::info!("column backend, in-process session");
    Ok(Arc::new(ColumnBackend::from_config(MemColumnSession::new(), cfg)))
}
