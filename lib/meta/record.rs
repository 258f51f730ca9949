use super::MetaKV;
use crate::utils::{canonical_id, next_id};
use serde::{Deserialize, Serialize};

/// payloads this short can't hold a record, they are treated as absent
const MIN_RECORD_LEN: usize = 8;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    id: String,
    name: String,
    size: u64,
}

impl FileRecord {
    /// a record for `name` with a fresh id and zero size
    pub fn new(name: &str) -> Self {
        Self::with_id(&next_id(), name, 0)
    }

    pub fn with_id(id: &str, name: &str, size: u64) -> Self {
        Self {
            id: canonical_id(id),
            name: name.to_string(),
            size,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn set_size(&mut self, size: u64) {
        self.size = size;
    }

    /// same id and size under another name
    pub fn renamed(&self, name: &str) -> Self {
        Self {
            id: self.id.clone(),
            name: name.to_string(),
            size: self.size,
        }
    }

    pub fn key(name: &str) -> String {
        name.to_string()
    }

    pub fn val(this: &Self) -> Vec<u8> {
        bincode::serialize(this).expect("can't serialize file record")
    }

    /// undecodable or truncated payloads yield `None`
    pub fn decode(data: &[u8]) -> Option<Self> {
        if data.len() <= MIN_RECORD_LEN {
            log::warn!("file record payload too short, {} bytes", data.len());
            return None;
        }
        match bincode::deserialize::<FileRecord>(data) {
            Err(e) => {
                log::warn!("can't deserialize file record, error {}", e);
                None
            }
            Ok(mut r) => {
                r.id = canonical_id(&r.id);
                Some(r)
            }
        }
    }
}

impl MetaKV for FileRecord {
    fn key(&self) -> String {
        Self::key(&self.name)
    }

    fn val(&self) -> Vec<u8> {
        Self::val(self)
    }
}
