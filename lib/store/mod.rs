use crate::error::Result;
use crate::meta::{Catalog, FileRecord};

/// The block store: (file id, block number) -> block bytes.
///
/// Blocks are written and replaced as whole units. A stored block may be shorter or longer
/// than the logical data it holds, callers take the logical length from the file record.
pub trait BlockStore: Send + Sync {
    fn read_block(&self, id: &str, block: u64) -> Result<Option<Vec<u8>>>;

    fn write_block(&self, id: &str, block: u64, data: &[u8]) -> Result<()>;

    /// drop every block of `id`
    fn remove_blocks(&self, id: &str) -> Result<()>;
}

/// A backend binding provides both halves of the storage.
pub trait Backend: Catalog + BlockStore {
    fn kind(&self) -> &'static str;

    /// remove the record and its data, bindings that can group the two operations do so
    fn remove_file(&self, record: &FileRecord) -> Result<()> {
        self.remove(record.name())?;
        self.remove_blocks(record.id())
    }
}
