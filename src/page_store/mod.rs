mod file_backend;
mod header;
mod pager;

pub(crate) use file_backend::{same_file, sync_parent_dir, FileBackend, LockMode};
pub(crate) use header::{DatabaseHeader, DB_HEADER_SIZE};
pub(crate) use pager::Pager;

use std::fmt::Debug;
use std::io;

/// Byte-addressable storage under a [`Pager`]
pub(crate) trait StorageBackend: 'static + Debug + Send + Sync {
    /// Gets the current length of the storage.
    fn len(&self) -> Result<u64, io::Error>;

    /// Reads the specified array of bytes from the storage.
    ///
    /// If `out.len()` + `offset` exceeds the length of the storage an appropriate `Error` must be returned.
    fn read(&self, offset: u64, out: &mut [u8]) -> Result<(), io::Error>;

    /// Sets the length of the storage.
    fn set_len(&self, len: u64) -> Result<(), io::Error>;

    /// Syncs all buffered data with the persistent storage.
    fn sync_data(&self) -> Result<(), io::Error>;

    /// Writes the specified array to the storage, extending it if needed.
    fn write(&self, offset: u64, data: &[u8]) -> Result<(), io::Error>;
}

/// Acts as temporal in-memory database storage.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct InMemoryBackend(std::sync::RwLock<Vec<u8>>);

#[cfg(test)]
impl InMemoryBackend {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn out_of_range() -> io::Error {
        io::Error::new(io::ErrorKind::InvalidInput, "Index out-of-range.")
    }
}

#[cfg(test)]
impl StorageBackend for InMemoryBackend {
    fn len(&self) -> Result<u64, io::Error> {
        Ok(self.0.read().unwrap().len() as u64)
    }

    fn read(&self, offset: u64, out: &mut [u8]) -> Result<(), io::Error> {
        let guard = self.0.read().unwrap();
        let offset = usize::try_from(offset).map_err(|_| Self::out_of_range())?;
        if offset + out.len() <= guard.len() {
            out.copy_from_slice(&guard[offset..offset + out.len()]);
            Ok(())
        } else {
            Err(Self::out_of_range())
        }
    }

    fn set_len(&self, len: u64) -> Result<(), io::Error> {
        let len = usize::try_from(len).map_err(|_| Self::out_of_range())?;
        self.0.write().unwrap().resize(len, 0);
        Ok(())
    }

    fn sync_data(&self) -> Result<(), io::Error> {
        Ok(())
    }

    fn write(&self, offset: u64, data: &[u8]) -> Result<(), io::Error> {
        let mut guard = self.0.write().unwrap();
        let offset = usize::try_from(offset).map_err(|_| Self::out_of_range())?;
        if guard.len() < offset + data.len() {
            guard.resize(offset + data.len(), 0);
        }
        guard[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }
}
