use super::Directory;
use crate::cache::CacheKey;
use crate::error::{Error, Result};
use crate::meta::{Catalog, FileRecord};

/// Advisory lock stored as a zero-length file whose id is the owner token.
///
/// There is no expiry. A holder that dies without releasing keeps the lock until its record
/// is deleted by hand.
pub struct DirectoryLock {
    dir: Directory,
    record: FileRecord,
    locked: bool,
}

impl DirectoryLock {
    pub(crate) fn try_obtain(dir: Directory, name: &str) -> Result<Self> {
        let record = FileRecord::new(name);
        let inner = dir.inner().clone();
        let created = inner.backend().put_if_absent(&record)?;
        inner.cache_del(&CacheKey::File(name.to_string()));
        inner.cache_del(&CacheKey::AllFiles);

        // the stored token decides, not the write result alone
        let locked = created && Self::holder(&dir, name)?.as_deref() == Some(record.id());
        if locked {
            log::info!("lock {} obtained, token {}", name, record.id());
        } else {
            log::info!("lock {} is held elsewhere", name);
        }
        Ok(Self { dir, record, locked })
    }

    fn holder(dir: &Directory, name: &str) -> Result<Option<String>> {
        Ok(dir
            .inner()
            .backend()
            .get_serial(name)?
            .map(|r| r.id().to_string()))
    }

    pub fn name(&self) -> &str {
        self.record.name()
    }

    pub fn token(&self) -> &str {
        self.record.id()
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// fails once the lock was released here or its record no longer carries our token
    pub fn ensure_valid(&self) -> Result<()> {
        if !self.locked {
            return Err(Error::LockReleased(self.name().to_string()));
        }
        match Self::holder(&self.dir, self.name())? {
            Some(id) if id == self.token() => Ok(()),
            other => {
                log::warn!(
                    "lock {} lost, token {} now {:?}",
                    self.name(),
                    self.token(),
                    other
                );
                Err(Error::LockInvalidated(self.name().to_string()))
            }
        }
    }

    /// delete the lock record, a no-op when not held
    ///
    /// A record that carries another token by now belongs to someone else and is left alone.
    /// Release works on a closed directory too, a lock record has no expiry to fall back on.
    pub fn release(&mut self) -> Result<()> {
        if !self.locked {
            return Ok(());
        }
        match Self::holder(&self.dir, self.name())? {
            Some(id) if id == self.token() => self.dir.inner().remove_file_info(self.record.name())?,
            other => log::warn!("lock {} taken over by {:?}, not deleted", self.name(), other),
        }
        self.locked = false;
        log::info!("lock {} released", self.name());
        Ok(())
    }
}

impl Drop for DirectoryLock {
    fn drop(&mut self) {
        if self.locked {
            if let Err(e) = self.release() {
                log::error!("can't release lock {} error {}", self.name(), e);
            }
        }
    }
}
