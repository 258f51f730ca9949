use super::Inner;
use crate::error::{Error, Result};
use crate::meta::FileRecord;
use std::io;
use std::sync::Arc;

/// Sequential writer. Bytes are buffered one block at a time, every full block goes to the
/// block store followed by a catalog update of the file size.
pub struct IndexOutput {
    inner: Arc<Inner>,
    record: FileRecord,
    crc: crc32fast::Hasher,
    written: u64,
    buffer: Vec<u8>,
    buffer_offset: usize,
    block_num: u64,
    closed: bool,
}

impl IndexOutput {
    pub(crate) fn new(inner: Arc<Inner>, record: FileRecord) -> Self {
        let buffer = vec![0u8; inner.block_size()];
        Self {
            inner,
            record,
            crc: crc32fast::Hasher::new(),
            written: 0,
            buffer,
            buffer_offset: 0,
            block_num: 0,
            closed: false,
        }
    }

    pub fn name(&self) -> &str {
        self.record.name()
    }

    pub fn description(&self) -> String {
        format!("{}_{}", self.record.id(), self.record.name())
    }

    pub fn write_byte(&mut self, b: u8) -> Result<()> {
        self.write_bytes(&[b])
    }

    pub fn write_bytes(&mut self, mut data: &[u8]) -> Result<()> {
        if self.closed {
            return Err(Error::Closed(self.description()));
        }
        while !data.is_empty() {
            let n = (self.buffer.len() - self.buffer_offset).min(data.len());
            let (head, rest) = data.split_at(n);
            self.buffer[self.buffer_offset..self.buffer_offset + n].copy_from_slice(head);
            self.crc.update(head);
            self.buffer_offset += n;
            self.written += n as u64;
            self.record.set_size(self.written);
            data = rest;
            if self.buffer_offset >= self.buffer.len() {
                self.flush_block()?;
            }
        }
        Ok(())
    }

    /// bytes written so far
    pub fn file_pointer(&self) -> u64 {
        self.written
    }

    /// CRC32 of every byte written so far
    pub fn checksum(&self) -> u32 {
        self.crc.clone().finalize()
    }

    /// flush the trailing partial block, later writes fail
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.flush_block()?;
        self.closed = true;
        Ok(())
    }

    fn flush_block(&mut self) -> Result<()> {
        if self.buffer_offset == 0 {
            return Ok(());
        }
        self.inner
            .write_block(self.record.id(), self.block_num, &self.buffer)?;
        log::trace!(
            "flush block {} of {} id {}, {} bytes",
            self.block_num,
            self.record.name(),
            self.record.id(),
            self.buffer_offset
        );
        self.block_num += 1;
        self.buffer_offset = 0;
        self.buffer.fill(0);
        self.inner.update_file_info(&self.record)
    }
}

impl io::Write for IndexOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_bytes(buf)?;
        Ok(buf.len())
    }

    /// partial blocks are only written on close
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for IndexOutput {
    fn drop(&mut self) {
        if !self.closed && self.buffer_offset > 0 {
            log::warn!(
                "writer {} dropped with {} unflushed bytes",
                self.description(),
                self.buffer_offset
            );
        }
    }
}

#[cfg(test)]
mod test {
    use crate::backend::hash::{HashBackend, MemHashClient};
    use crate::directory::Directory;
    use crate::error::Error;
    use crate::meta::Catalog;
    use crate::store::BlockStore;
    use crate::utils::DEFAULT_METADATA_KEY;
    use std::sync::Arc;

    #[test]
    fn test_flush_per_block() {
        let b = Arc::new(HashBackend::new(MemHashClient::new(), DEFAULT_METADATA_KEY));
        let dir = Directory::new(b.clone(), 8);
        let mut out = dir.create_output("f").unwrap();
        assert_eq!(b.get("f").unwrap().unwrap().size(), 0);

        out.write_bytes(&[1u8; 7]).unwrap();
        // still buffered
        assert_eq!(b.get("f").unwrap().unwrap().size(), 0);
        out.write_byte(1).unwrap();
        assert_eq!(b.get("f").unwrap().unwrap().size(), 8);

        out.write_bytes(&[2u8; 3]).unwrap();
        assert_eq!(out.file_pointer(), 11);
        out.close().unwrap();
        let r = b.get("f").unwrap().unwrap();
        assert_eq!(r.size(), 11);

        // the trailing block is stored zero padded
        let last = b.read_block(r.id(), 1).unwrap().unwrap();
        assert_eq!(last, vec![2, 2, 2, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_checksum() {
        let b = Arc::new(HashBackend::new(MemHashClient::new(), DEFAULT_METADATA_KEY));
        let dir = Directory::new(b, 4);
        let data = b"123456789";
        let mut out = dir.create_output("f").unwrap();
        assert_eq!(out.checksum(), 0);
        out.write_bytes(data).unwrap();
        assert_eq!(out.checksum(), crc32fast::hash(data));
        assert_eq!(out.checksum(), 0xcbf43926);
        out.close().unwrap();
        // close is idempotent, writes are not
        out.close().unwrap();
        assert!(matches!(out.write_byte(0), Err(Error::Closed(_))));
    }
}
