mod record;

use crate::error::Result;
pub use record::FileRecord;

pub trait MetaKV {
    fn key(&self) -> String;

    fn val(&self) -> Vec<u8>;
}

/// The metadata catalog: file name -> `FileRecord`.
///
/// Implementations talk to a remote store, every call is a round trip and may fail with
/// `Error::Backend`. Undecodable records are reported as absent.
pub trait Catalog: Send + Sync {
    fn get(&self, name: &str) -> Result<Option<FileRecord>>;

    /// read used to confirm lock ownership, bindings with tunable consistency read at the
    /// linearizable level here
    fn get_serial(&self, name: &str) -> Result<Option<FileRecord>> {
        self.get(name)
    }

    fn list(&self) -> Result<Vec<FileRecord>>;

    /// insert or overwrite
    fn put(&self, record: &FileRecord) -> Result<()>;

    /// conditional create, returns whether this call created the record
    fn put_if_absent(&self, record: &FileRecord) -> Result<bool>;

    fn remove(&self, name: &str) -> Result<()>;
}
