use super::Inner;
use crate::error::{Error, Result};
use crate::meta::FileRecord;
use std::io;
use std::sync::Arc;

/// Random-access reader over a file's blocks.
///
/// The reader covers `[offset, end)` of the file, `pos` is relative to `offset`. At most one
/// block is held in memory and it is loaded on the first read that needs it. Clones and
/// slices own a copy of that block, so their cursors never affect each other.
#[derive(Clone)]
pub struct IndexInput {
    inner: Arc<Inner>,
    desc: String,
    record: FileRecord,
    block: Option<Vec<u8>>,
    block_num: u64,
    block_offset: usize,
    offset: u64,
    end: u64,
    pos: u64,
}

impl IndexInput {
    pub(crate) fn new(inner: Arc<Inner>, record: FileRecord) -> Self {
        let desc = format!("{}_{}", record.id(), record.name());
        let end = record.size();
        Self {
            inner,
            desc,
            record,
            block: None,
            block_num: 0,
            block_offset: 0,
            offset: 0,
            end,
            pos: 0,
        }
    }

    pub fn description(&self) -> &str {
        &self.desc
    }

    pub fn name(&self) -> &str {
        self.record.name()
    }

    pub fn length(&self) -> u64 {
        self.end - self.offset
    }

    pub fn file_pointer(&self) -> u64 {
        self.pos
    }

    fn remaining(&self) -> u64 {
        self.length() - self.pos
    }

    pub fn seek(&mut self, pos: u64) -> Result<()> {
        if pos > self.length() {
            return Err(Error::OutOfBounds(format!(
                "seek {} outside [0, {}] of {}",
                pos,
                self.length(),
                self.desc
            )));
        }
        log::trace!("seek {} to {}, range {}..{}", self.desc, pos, self.offset, self.end);
        self.pos = pos;
        self.locate();
        Ok(())
    }

    /// A reader over `[offset, offset + length)` of this one, starting at its own position 0.
    pub fn slice(&self, desc: &str, offset: u64, length: u64) -> Result<IndexInput> {
        let fits = offset
            .checked_add(length)
            .map(|e| e <= self.length())
            .unwrap_or(false);
        if !fits {
            return Err(Error::OutOfBounds(format!(
                "slice {} at {} len {} exceeds {} of {}",
                desc,
                offset,
                length,
                self.length(),
                self.desc
            )));
        }
        let mut s = self.clone();
        s.desc = desc.to_string();
        s.offset = self.offset + offset;
        s.end = s.offset + length;
        s.seek(0)?;
        Ok(s)
    }

    /// point the cursor at `offset + pos`, drop the loaded block if it's not the one covering it
    fn locate(&mut self) {
        let bs = self.inner.block_size() as u64;
        let abs = self.offset + self.pos;
        let num = abs / bs;
        if num != self.block_num {
            self.block = None;
            self.block_num = num;
        }
        self.block_offset = (abs % bs) as usize;
    }

    fn load_block(&mut self) -> Result<&[u8]> {
        if self.block.is_none() {
            log::trace!("load block {} of {}", self.block_num, self.desc);
            let data = self
                .inner
                .read_block(self.record.id(), self.block_num)?
                .ok_or_else(|| Error::MissingBlock {
                    id: self.record.id().to_string(),
                    block: self.block_num,
                })?;
            self.block = Some(data.to_vec());
        }
        Ok(self.block.as_deref().unwrap_or_default())
    }

    pub fn read_byte(&mut self) -> Result<u8> {
        if self.remaining() == 0 {
            return Err(Error::Eof(self.desc.clone()));
        }
        self.locate();
        let off = self.block_offset;
        let b = self.load_block()?[off];
        self.pos += 1;
        self.locate();
        Ok(b)
    }

    /// fill `buf` entirely, nothing is consumed when fewer bytes remain
    pub fn read_bytes(&mut self, buf: &mut [u8]) -> Result<()> {
        if (buf.len() as u64) > self.remaining() {
            return Err(Error::Eof(format!(
                "{} wants {} bytes, {} left",
                self.desc,
                buf.len(),
                self.remaining()
            )));
        }
        let mut done = 0;
        while done < buf.len() {
            self.locate();
            let off = self.block_offset;
            let n = (self.inner.block_size() - off).min(buf.len() - done);
            let block = self.load_block()?;
            buf[done..done + n].copy_from_slice(&block[off..off + n]);
            done += n;
            self.pos += n as u64;
        }
        self.locate();
        Ok(())
    }
}

impl io::Read for IndexInput {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = (self.remaining().min(buf.len() as u64)) as usize;
        self.read_bytes(&mut buf[..n])?;
        Ok(n)
    }
}

impl io::Seek for IndexInput {
    fn seek(&mut self, from: io::SeekFrom) -> io::Result<u64> {
        let target = match from {
            io::SeekFrom::Start(p) => Some(p),
            io::SeekFrom::End(d) => self.length().checked_add_signed(d),
            io::SeekFrom::Current(d) => self.pos.checked_add_signed(d),
        };
        let p = target.ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "seek before start"))?;
        IndexInput::seek(self, p)?;
        Ok(p)
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
    use std::io::{Seek, SeekFrom};
    use std::sync::Arc;

    const BS: usize = 8;

    fn setup(data: &[u8]) -> (Arc<HashBackend<MemHashClient>>, Directory) {
        let b = Arc::new(HashBackend::new(MemHashClient::new(), DEFAULT_METADATA_KEY));
        let dir = Directory::new(b.clone(), BS);
        let mut out = dir.create_output("f").unwrap();
        out.write_bytes(data).unwrap();
        out.close().unwrap();
        (b, dir)
    }

    fn pattern(n: usize) -> Vec<u8> {
        (0..n).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn test_seek() {
        let data = pattern(30);
        let (_b, dir) = setup(&data);
        let mut input = dir.open_input("f").unwrap();
        input.seek(17).unwrap();
        assert_eq!(input.read_byte().unwrap(), data[17]);
        input.seek(3).unwrap();
        assert_eq!(input.read_byte().unwrap(), data[3]);
        assert_eq!(input.file_pointer(), 4);

        input.seek(30).unwrap();
        assert!(matches!(input.read_byte(), Err(Error::Eof(_))));
        assert!(matches!(input.seek(31), Err(Error::OutOfBounds(_))));

        Seek::seek(&mut input, SeekFrom::End(-2)).unwrap();
        assert_eq!(input.read_byte().unwrap(), data[28]);
        assert!(Seek::seek(&mut input, SeekFrom::Current(-100)).is_err());
    }

    #[test]
    fn test_read_across_blocks() {
        let data = pattern(30);
        let (_b, dir) = setup(&data);
        let mut input = dir.open_input("f").unwrap();
        input.seek(5).unwrap();
        let mut buf = vec![0u8; 20];
        input.read_bytes(&mut buf).unwrap();
        assert_eq!(buf, data[5..25]);

        let mut tail = vec![0u8; 6];
        assert!(matches!(input.read_bytes(&mut tail), Err(Error::Eof(_))));
        // nothing consumed
        assert_eq!(input.file_pointer(), 25);
        let mut tail = vec![0u8; 5];
        input.read_bytes(&mut tail).unwrap();
        assert_eq!(tail, data[25..]);
    }

    #[test]
    fn test_slices_are_independent() {
        let data = pattern(40);
        let (_b, dir) = setup(&data);
        let input = dir.open_input("f").unwrap();
        let mut a = input.slice("a", 6, 20).unwrap();
        let mut b = a.clone();
        assert_eq!(a.length(), 20);

        assert_eq!(a.read_byte().unwrap(), data[6]);
        a.seek(15).unwrap();
        assert_eq!(a.read_byte().unwrap(), data[21]);
        assert_eq!(b.file_pointer(), 0);
        assert_eq!(b.read_byte().unwrap(), data[6]);

        let mut c = a.slice("c", 2, 4).unwrap();
        assert_eq!(c.read_byte().unwrap(), data[8]);
        assert_eq!(a.file_pointer(), 16);
        assert!(matches!(a.slice("d", 18, 3), Err(Error::OutOfBounds(_))));
        assert!(matches!(a.slice("e", u64::MAX, 2), Err(Error::OutOfBounds(_))));

        let empty = input.slice("empty", 40, 0).unwrap();
        assert_eq!(empty.length(), 0);
    }

    #[test]
    fn test_missing_block() {
        let data = pattern(20);
        let (b, dir) = setup(&data);
        let id = b.get("f").unwrap().unwrap().id().to_string();
        let mut input = dir.open_input("f").unwrap();
        b.remove_blocks(&id).unwrap();
        input.seek(9).unwrap();
        assert!(matches!(input.read_byte(), Err(Error::MissingBlock { block: 1, .. })));
    }

    #[test]
    fn test_short_block_is_padded() {
        let (b, dir) = setup(&[]);
        let mut r = b.get("f").unwrap().unwrap();
        b.write_block(r.id(), 0, &[4, 5]).unwrap();
        r.set_size(4);
        b.put(&r).unwrap();
        let mut input = dir.open_input("f").unwrap();
        let mut buf = [9u8; 4];
        input.read_bytes(&mut buf).unwrap();
        assert_eq!(buf, [4, 5, 0, 0]);
    }
}
