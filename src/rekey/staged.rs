use super::guard::ExclusivityGuard;
use crate::codec::CodecParams;
use crate::page_store::{
    same_file, sync_parent_dir, DatabaseHeader, FileBackend, LockMode, Pager, DB_HEADER_SIZE,
};
use crate::RekeyError;
use std::cmp::min;
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

#[cfg(feature = "logging")]
use log::{debug, info, warn};

/// Suffix of the marker held for the whole duration of a rekey
pub const LOCK_SUFFIX: &str = "-rekey-lock";
/// Suffix of the re-encoded copy
pub const EXPORT_SUFFIX: &str = "-rekey-export";
/// Suffix the original file is moved to while the copy is installed
pub const RENAME_SUFFIX: &str = "-rekey-rename";

// Another process may delete and recreate the lock marker between our open and our lock
const MAX_RECOVERY_ATTEMPTS: usize = 8;

/// How [`recover`] resolved leftover rekey state
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// No artifacts were found
    Clean,
    /// The original file was kept and artifacts discarded
    RolledBack,
    /// The re-encoded copy was installed
    RolledForward,
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

pub(crate) fn lock_path(path: &Path) -> PathBuf {
    with_suffix(path, LOCK_SUFFIX)
}

#[derive(Debug, Clone)]
pub(crate) struct StagedPaths {
    pub(crate) db: PathBuf,
    pub(crate) lock: PathBuf,
    pub(crate) export: PathBuf,
    pub(crate) rename: PathBuf,
}

impl StagedPaths {
    pub(crate) fn new(path: &Path) -> Self {
        Self {
            db: path.to_path_buf(),
            lock: lock_path(path),
            export: with_suffix(path, EXPORT_SUFFIX),
            rename: with_suffix(path, RENAME_SUFFIX),
        }
    }
}

fn remove_if_exists(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => {
            #[cfg(feature = "logging")]
            debug!("Removed {path:?}");
            Ok(true)
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}

fn rename(from: &Path, to: &Path) -> io::Result<()> {
    fs::rename(from, to)?;
    #[cfg(feature = "logging")]
    debug!("Renamed {from:?} to {to:?}");
    sync_parent_dir(to)
}

fn create_marker(path: &Path) -> io::Result<File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .create_new(true)
        .open(path)
}

fn release_marker(marker: FileBackend, path: &Path) -> io::Result<()> {
    remove_if_exists(path)?;
    drop(marker);
    sync_parent_dir(path)
}

/// Whether the export at `path` had its header committed. The header is written after every
/// payload page is durable, so a decodable header at the expected length means the copy is whole
fn is_complete_export(path: &Path) -> io::Result<bool> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(err),
    };
    let len = file.metadata()?.len();
    if len < DB_HEADER_SIZE as u64 {
        return Ok(false);
    }

    let mut raw = [0u8; DB_HEADER_SIZE];
    file.read_exact(&mut raw)?;
    Ok(match DatabaseHeader::from_bytes(&raw) {
        Ok(header) => header.file_len() == Some(len),
        Err(_) => false,
    })
}

/// Brings the staged artifacts to a final state. Caller must hold the lock marker
fn resolve(paths: &StagedPaths) -> Result<RecoveryOutcome, RekeyError> {
    let outcome = if !paths.rename.exists() {
        if remove_if_exists(&paths.export)? {
            RecoveryOutcome::RolledBack
        } else {
            RecoveryOutcome::Clean
        }
    } else if paths.db.exists() {
        remove_if_exists(&paths.rename)?;
        remove_if_exists(&paths.export)?;
        RecoveryOutcome::RolledForward
    } else if is_complete_export(&paths.export)? {
        rename(&paths.export, &paths.db)?;
        remove_if_exists(&paths.rename)?;
        RecoveryOutcome::RolledForward
    } else {
        rename(&paths.rename, &paths.db)?;
        remove_if_exists(&paths.export)?;
        RecoveryOutcome::RolledBack
    };
    sync_parent_dir(&paths.db)?;

    Ok(outcome)
}

/// Resolves the state left by an interrupted rekey of the database at `path`
///
/// Fails with [`RekeyError::Busy`] while a rekey is running. Idempotent, and a no-op when no
/// artifacts exist. Every [`crate::Database`] open runs this first.
pub fn recover(path: impl AsRef<Path>) -> Result<RecoveryOutcome, RekeyError> {
    let paths = StagedPaths::new(path.as_ref());

    for _ in 0..MAX_RECOVERY_ATTEMPTS {
        let opened = OpenOptions::new().read(true).write(true).open(&paths.lock);
        let (marker, had_marker) = match opened {
            Ok(file) => (FileBackend::new(file, LockMode::Exclusive)?, true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                if !paths.export.exists() && !paths.rename.exists() {
                    return Ok(RecoveryOutcome::Clean);
                }
                match create_marker(&paths.lock) {
                    Ok(file) => (FileBackend::new(file, LockMode::Exclusive)?, false),
                    Err(err) if err.kind() == io::ErrorKind::AlreadyExists => continue,
                    Err(err) => return Err(err.into()),
                }
            }
            Err(err) => return Err(err.into()),
        };
        if !same_file(marker.file(), &paths.lock)? {
            continue;
        }

        let outcome = match resolve(&paths)? {
            RecoveryOutcome::Clean if had_marker => RecoveryOutcome::RolledBack,
            outcome => outcome,
        };
        release_marker(marker, &paths.lock)?;

        #[cfg(feature = "logging")]
        info!("Recovered interrupted rekey of {:?}: {:?}", paths.db, outcome);
        return Ok(outcome);
    }

    Err(RekeyError::Busy)
}

/// The on-disk artifacts of one in-flight rekey
#[derive(Debug)]
pub(crate) struct StagedFileSet {
    paths: StagedPaths,
    marker: FileBackend,
}

impl StagedFileSet {
    /// Creates and locks the lock marker. Fails with [`RekeyError::Busy`] if one exists
    pub(crate) fn begin(path: &Path) -> Result<Self, RekeyError> {
        let paths = StagedPaths::new(path);
        let file = match create_marker(&paths.lock) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                return Err(RekeyError::Busy)
            }
            Err(err) => return Err(err.into()),
        };
        let marker = FileBackend::new(file, LockMode::Exclusive)?;
        sync_parent_dir(&paths.lock)?;

        #[cfg(feature = "logging")]
        debug!("Created {:?}", paths.lock);
        Ok(Self { paths, marker })
    }

    /// Re-encodes every payload page of the guarded file from `source` to `target` into the
    /// export. The payload is re-chunked when the page size changes
    pub(crate) fn write_export(
        &self,
        guard: &ExclusivityGuard,
        source: &CodecParams,
        target: &CodecParams,
    ) -> Result<(), RekeyError> {
        let source = Pager::open(Box::new(guard.backend()?), source)?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.paths.export)?;
        let backend = FileBackend::new(file, LockMode::Unlocked)?;
        let mut export = Pager::create_unsealed(Box::new(backend), target)?;

        let mut writer = export.payload_writer();
        let mut remaining = source.payload_length();
        for page_number in 1..source.page_count() {
            if remaining == 0 {
                break;
            }
            let page = source.read_page(page_number)?;
            let len = min(remaining, page.len() as u64) as usize;
            writer.push(&page[..len])?;
            remaining -= len as u64;
        }
        writer.finish(source.row_count())?;
        sync_parent_dir(&self.paths.export)?;

        #[cfg(feature = "logging")]
        debug!(
            "Exported {} bytes from {:?} to {:?}",
            source.payload_length(),
            self.paths.db,
            self.paths.export
        );
        Ok(())
    }

    /// Installs the export in place of the original
    pub(crate) fn swap(&self) -> Result<(), RekeyError> {
        rename(&self.paths.db, &self.paths.rename)?;
        rename(&self.paths.export, &self.paths.db)?;
        remove_if_exists(&self.paths.rename)?;
        sync_parent_dir(&self.paths.db)?;
        Ok(())
    }

    /// Resolves a failed swap while the marker is still held
    pub(crate) fn resolve(&self) -> Result<RecoveryOutcome, RekeyError> {
        resolve(&self.paths)
    }

    /// Deletes residual artifacts, then the lock marker
    pub(crate) fn finish(self) -> Result<(), RekeyError> {
        remove_if_exists(&self.paths.export)?;
        remove_if_exists(&self.paths.rename)?;
        release_marker(self.marker, &self.paths.lock)?;
        Ok(())
    }

    /// Discards the export and the marker, leaving the original untouched
    pub(crate) fn abort(self) {
        let result = remove_if_exists(&self.paths.export)
            .and_then(|_| release_marker(self.marker, &self.paths.lock));
        if let Err(_err) = result {
            #[cfg(feature = "logging")]
            warn!(
                "Failed to clean up aborted rekey of {:?}, the next open will retry: {}",
                self.paths.db, _err
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CodecConfig, CodecRegistry, Database};
    use tempfile::tempdir;

    const KEY: &[u8] = b"01234567890123456789012345678901";

    fn encrypted() -> CodecConfig {
        CodecConfig::encrypted(
            "chacha20-poly1305",
            "SHA512",
            "KDF_SHA512",
            KEY,
            100,
            1024,
        )
    }

    fn params(config: &CodecConfig) -> CodecParams {
        CodecRegistry::default().validate(config).unwrap()
    }

    fn populated(path: &Path) {
        let mut db = Database::create(path).unwrap();
        for i in 0..50u32 {
            db.insert(format!("row {i}").as_bytes()).unwrap();
        }
    }

    fn artifacts(paths: &StagedPaths) -> [bool; 3] {
        [
            paths.lock.exists(),
            paths.export.exists(),
            paths.rename.exists(),
        ]
    }

    #[test]
    fn suffixes() {
        let paths = StagedPaths::new(Path::new("/tmp/data.db"));
        assert_eq!(paths.lock, Path::new("/tmp/data.db-rekey-lock"));
        assert_eq!(paths.export, Path::new("/tmp/data.db-rekey-export"));
        assert_eq!(paths.rename, Path::new("/tmp/data.db-rekey-rename"));
    }

    #[test]
    fn begin_is_exclusive() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db");
        let staged = StagedFileSet::begin(&path).unwrap();
        assert!(matches!(
            StagedFileSet::begin(&path),
            Err(RekeyError::Busy)
        ));
        assert!(matches!(recover(&path), Err(RekeyError::Busy)));

        staged.finish().unwrap();
        assert_eq!(artifacts(&StagedPaths::new(&path)), [false; 3]);
    }

    #[test]
    fn export_swap_finish() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db");
        populated(&path);

        let guard = ExclusivityGuard::acquire(&path).unwrap();
        let staged = StagedFileSet::begin(&path).unwrap();
        staged
            .write_export(&guard, &params(&CodecConfig::default()), &params(&encrypted()))
            .unwrap();
        assert!(is_complete_export(&StagedPaths::new(&path).export).unwrap());
        staged.swap().unwrap();
        staged.finish().unwrap();
        guard.release();

        let db = Database::builder().set_codec(encrypted()).open(&path).unwrap();
        assert_eq!(db.row_count(), 50);
        assert_eq!(db.rows().unwrap()[49], b"row 49".to_vec());
        assert_eq!(artifacts(&StagedPaths::new(&path)), [false; 3]);
    }

    #[test]
    fn export_with_wrong_source_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db");
        populated(&path);

        let guard = ExclusivityGuard::acquire(&path).unwrap();
        let staged = StagedFileSet::begin(&path).unwrap();
        assert!(matches!(
            staged.write_export(&guard, &params(&encrypted()), &params(&encrypted())),
            Err(RekeyError::NotADatabase(_))
        ));
        staged.abort();
        assert_eq!(artifacts(&StagedPaths::new(&path)), [false; 3]);
    }

    #[test]
    fn partial_export_is_incomplete() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("export");
        assert!(!is_complete_export(&path).unwrap());
        fs::write(&path, b"").unwrap();
        assert!(!is_complete_export(&path).unwrap());
        fs::write(&path, vec![0u8; 4096]).unwrap();
        assert!(!is_complete_export(&path).unwrap());
    }

    #[test]
    fn recover_without_artifacts() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db");
        assert_eq!(recover(&path).unwrap(), RecoveryOutcome::Clean);
        populated(&path);
        assert_eq!(recover(&path).unwrap(), RecoveryOutcome::Clean);
    }

    #[test]
    fn recover_lock_only() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db");
        populated(&path);
        let paths = StagedPaths::new(&path);
        fs::write(&paths.lock, b"").unwrap();

        assert_eq!(recover(&path).unwrap(), RecoveryOutcome::RolledBack);
        assert_eq!(artifacts(&paths), [false; 3]);
        assert_eq!(recover(&path).unwrap(), RecoveryOutcome::Clean);
    }

    #[test]
    fn recover_orphaned_export_without_marker() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db");
        populated(&path);
        let paths = StagedPaths::new(&path);
        fs::write(&paths.export, b"partial").unwrap();

        assert_eq!(recover(&path).unwrap(), RecoveryOutcome::RolledBack);
        assert_eq!(artifacts(&paths), [false; 3]);
        assert_eq!(Database::open(&path).unwrap().row_count(), 50);
    }

    #[test]
    fn recover_after_export_installed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db");
        populated(&path);
        let paths = StagedPaths::new(&path);
        fs::write(&paths.lock, b"").unwrap();
        fs::write(&paths.rename, b"old").unwrap();

        assert_eq!(recover(&path).unwrap(), RecoveryOutcome::RolledForward);
        assert_eq!(artifacts(&paths), [false; 3]);
        assert_eq!(Database::open(&path).unwrap().row_count(), 50);
    }
}
