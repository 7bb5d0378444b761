use crate::page_store::{same_file, FileBackend, LockMode};
use crate::RekeyError;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

/// Proof that no other connection, in this process or any other, has the database open
///
/// Holds an exclusive advisory lock on the file until released or dropped.
#[derive(Debug)]
pub struct ExclusivityGuard {
    path: PathBuf,
    lock: FileBackend,
}

impl ExclusivityGuard {
    /// Fails with [`RekeyError::Busy`] if any connection holds the file, and with
    /// [`RekeyError::Io`] if it does not exist. Creates nothing on disk
    pub fn acquire(path: impl AsRef<Path>) -> Result<Self, RekeyError> {
        let path = path.as_ref();
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let lock = FileBackend::new(file, LockMode::Exclusive)?;

        Ok(Self {
            path: path.to_path_buf(),
            lock,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Checks that the path still names the locked file
    pub fn verify(&self) -> Result<(), RekeyError> {
        if same_file(self.lock.file(), &self.path)? {
            Ok(())
        } else {
            Err(RekeyError::Busy)
        }
    }

    /// A second handle on the locked file, for reading it while the guard is held
    pub(crate) fn backend(&self) -> Result<FileBackend, RekeyError> {
        let file = self.lock.file().try_clone()?;
        Ok(FileBackend::new(file, LockMode::Unlocked)?)
    }

    pub fn release(self) {}
}
