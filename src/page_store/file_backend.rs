use super::StorageBackend;
use crate::DatabaseError;
#[cfg(feature = "logging")]
use log::warn;
use std::fs::{File, TryLockError};
use std::io;
use std::path::Path;

#[cfg(unix)]
use std::os::unix::fs::FileExt;

#[cfg(windows)]
use std::os::windows::fs::FileExt;

/// Advisory lock taken when a [`FileBackend`] is created
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum LockMode {
    /// Read-only connections
    Shared,
    /// Read-write connections
    Exclusive,
    /// The lock is already held through another handle to the same file
    Unlocked,
}

/// Stores a database as a file on-disk.
#[derive(Debug)]
pub(crate) struct FileBackend {
    file: File,
    locked: bool,
}

impl FileBackend {
    /// Creates a new backend which stores data to the given file.
    ///
    /// Fails with [`DatabaseError::Busy`] if another handle holds a conflicting lock, whether it
    /// belongs to this process or another one.
    pub(crate) fn new(file: File, mode: LockMode) -> Result<Self, DatabaseError> {
        let result = match mode {
            LockMode::Shared => file.try_lock_shared(),
            LockMode::Exclusive => file.try_lock(),
            LockMode::Unlocked => {
                return Ok(Self {
                    file,
                    locked: false,
                })
            }
        };

        match result {
            Ok(()) => Ok(Self { file, locked: true }),
            Err(TryLockError::Error(err)) if err.kind() == io::ErrorKind::Unsupported => {
                #[cfg(feature = "logging")]
                warn!(
                    "File locks not supported on this platform. You must ensure that only a single process opens the database file at a time"
                );
                Ok(Self {
                    file,
                    locked: false,
                })
            }
            Err(TryLockError::WouldBlock) => Err(DatabaseError::Busy),
            Err(TryLockError::Error(err)) => Err(err.into()),
        }
    }

    pub(crate) fn file(&self) -> &File {
        &self.file
    }
}

impl StorageBackend for FileBackend {
    fn len(&self) -> Result<u64, io::Error> {
        Ok(self.file.metadata()?.len())
    }

    #[cfg(unix)]
    fn read(&self, offset: u64, out: &mut [u8]) -> Result<(), io::Error> {
        self.file.read_exact_at(out, offset)
    }

    #[cfg(windows)]
    fn read(&self, mut offset: u64, out: &mut [u8]) -> Result<(), io::Error> {
        let mut data_offset = 0;
        while data_offset < out.len() {
            let read = self.file.seek_read(&mut out[data_offset..], offset)?;
            if read == 0 {
                return Err(io::ErrorKind::UnexpectedEof.into());
            }
            offset += read as u64;
            data_offset += read;
        }
        Ok(())
    }

    fn set_len(&self, len: u64) -> Result<(), io::Error> {
        self.file.set_len(len)
    }

    fn sync_data(&self) -> Result<(), io::Error> {
        self.file.sync_data()
    }

    #[cfg(unix)]
    fn write(&self, offset: u64, data: &[u8]) -> Result<(), io::Error> {
        self.file.write_all_at(data, offset)
    }

    #[cfg(windows)]
    fn write(&self, mut offset: u64, data: &[u8]) -> Result<(), io::Error> {
        let mut data_offset = 0;
        while data_offset < data.len() {
            let written = self.file.seek_write(&data[data_offset..], offset)?;
            offset += written as u64;
            data_offset += written;
        }
        Ok(())
    }
}

impl Drop for FileBackend {
    fn drop(&mut self) {
        if self.locked {
            let _ = self.file.unlock();
        }
    }
}

/// Whether `path` still names the file behind `file`
pub(crate) fn same_file(file: &File, path: &Path) -> io::Result<bool> {
    let current = match std::fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(err),
    };

    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        let held = file.metadata()?;
        Ok(held.dev() == current.dev() && held.ino() == current.ino())
    }

    #[cfg(not(unix))]
    {
        let _ = file;
        Ok(current.is_file())
    }
}

/// Makes renames and unlinks in the directory containing `path` durable
pub(crate) fn sync_parent_dir(path: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        let parent = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        File::open(parent)?.sync_all()
    }

    #[cfg(not(unix))]
    {
        let _ = path;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::OpenOptions;
    use tempfile::NamedTempFile;

    fn reopen(file: &NamedTempFile) -> File {
        OpenOptions::new()
            .read(true)
            .write(true)
            .open(file.path())
            .unwrap()
    }

    #[test]
    fn exclusive_lock_conflicts_in_process() {
        let tmpfile = NamedTempFile::new().unwrap();
        let _first = FileBackend::new(reopen(&tmpfile), LockMode::Exclusive).unwrap();
        assert!(matches!(
            FileBackend::new(reopen(&tmpfile), LockMode::Exclusive),
            Err(DatabaseError::Busy)
        ));
        assert!(matches!(
            FileBackend::new(reopen(&tmpfile), LockMode::Shared),
            Err(DatabaseError::Busy)
        ));
    }

    #[test]
    fn shared_locks_coexist() {
        let tmpfile = NamedTempFile::new().unwrap();
        let _first = FileBackend::new(reopen(&tmpfile), LockMode::Shared).unwrap();
        let _second = FileBackend::new(reopen(&tmpfile), LockMode::Shared).unwrap();
        assert!(matches!(
            FileBackend::new(reopen(&tmpfile), LockMode::Exclusive),
            Err(DatabaseError::Busy)
        ));
    }

    #[test]
    fn lock_released_on_drop() {
        let tmpfile = NamedTempFile::new().unwrap();
        drop(FileBackend::new(reopen(&tmpfile), LockMode::Exclusive).unwrap());
        assert!(FileBackend::new(reopen(&tmpfile), LockMode::Exclusive).is_ok());
    }

    #[test]
    fn read_write_extend() {
        let tmpfile = NamedTempFile::new().unwrap();
        let backend = FileBackend::new(reopen(&tmpfile), LockMode::Unlocked).unwrap();
        backend.write(10, b"hello").unwrap();
        assert_eq!(backend.len().unwrap(), 15);

        let mut out = [0u8; 5];
        backend.read(10, &mut out).unwrap();
        assert_eq!(&out, b"hello");
        assert!(backend.read(12, &mut out).is_err());
    }

    #[test]
    fn same_file_tracks_renames() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db");
        let moved = dir.path().join("moved");
        let file = File::create(&path).unwrap();
        assert!(same_file(&file, &path).unwrap());

        std::fs::rename(&path, &moved).unwrap();
        assert!(!same_file(&file, &path).unwrap());
        File::create(&path).unwrap();
        assert!(!same_file(&file, &path).unwrap());
        assert!(same_file(&file, &moved).unwrap());
    }
}
