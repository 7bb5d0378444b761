//! Re-encoding a database file under a new codec configuration
//!
//! A rekey writes a fully re-encoded copy next to the database and renames it into place. Three
//! sibling files make the operation recoverable after a crash:
//!
//! * `<path>-rekey-lock` exists, locked, for the whole operation and is removed last
//! * `<path>-rekey-export` is the copy. Its header is committed after every payload page
//! * `<path>-rekey-rename` is the original, moved aside while the copy is installed
//!
//! [`recover`] resolves whatever a crash leaves behind, and every [`crate::Database`] open runs it.

mod guard;
mod staged;

pub use guard::ExclusivityGuard;
pub use staged::{recover, RecoveryOutcome, EXPORT_SUFFIX, LOCK_SUFFIX, RENAME_SUFFIX};

pub(crate) use staged::lock_path;

use crate::codec::{CodecConfig, CodecRegistry};
use crate::RekeyError;
use staged::StagedFileSet;
use std::path::{Path, PathBuf};

#[cfg(feature = "logging")]
use log::{info, warn};

/// A request to re-encode the database at `path` from `source` to `target`
#[derive(Clone, Debug)]
pub struct RekeyRequest {
    path: PathBuf,
    source: CodecConfig,
    target: CodecConfig,
}

impl RekeyRequest {
    pub fn new(path: impl AsRef<Path>, source: CodecConfig, target: CodecConfig) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            source,
            target,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn source(&self) -> &CodecConfig {
        &self.source
    }

    pub fn target(&self) -> &CodecConfig {
        &self.target
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RekeyPhase {
    Validating,
    Acquiring,
    Exporting,
    Swapping,
    CleaningUp,
    Done,
    /// The rekey failed. The database is either untouched or, if the swap failed and could not
    /// be resolved, left for the next open to resolve
    Aborted,
}

/// Drives a rekey through its phases
///
/// ```rust,no_run
/// use rekeydb::*;
///
/// # fn main() -> Result<(), RekeyError> {
/// let target = CodecConfig::encrypted(
///     "aes-256-gcm",
///     "SHA512",
///     "KDF_SHA512",
///     b"0123456789abcdef0123456789abcdef",
///     64000,
///     4096,
/// );
/// let request = RekeyRequest::new("my_db.rkdb", CodecConfig::default(), target);
/// Rekey::new(&CodecRegistry::default()).run(&request)?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Rekey<'a> {
    registry: &'a CodecRegistry,
    phase: RekeyPhase,
}

impl<'a> Rekey<'a> {
    pub fn new(registry: &'a CodecRegistry) -> Self {
        Self {
            registry,
            phase: RekeyPhase::Validating,
        }
    }

    /// The phase the last call to [`Rekey::run`] reached
    pub fn phase(&self) -> RekeyPhase {
        self.phase
    }

    fn enter(&mut self, phase: RekeyPhase) {
        #[cfg(feature = "logging")]
        info!("Rekey phase {:?} -> {:?}", self.phase, phase);
        self.phase = phase;
    }

    /// Re-encodes the database. On success the file decodes only under the target configuration.
    /// On failure it decodes under the source configuration, or under exactly one of the two
    /// once the next open has run recovery
    pub fn run(&mut self, request: &RekeyRequest) -> Result<(), RekeyError> {
        self.phase = RekeyPhase::Validating;
        let result = self.run_phases(request);
        if result.is_err() {
            self.enter(RekeyPhase::Aborted);
        }
        result
    }

    fn run_phases(&mut self, request: &RekeyRequest) -> Result<(), RekeyError> {
        let source = self.registry.validate(request.source())?;
        let target = self.registry.validate(request.target())?;

        self.enter(RekeyPhase::Acquiring);
        let path = request.path();
        recover(path)?;
        let guard = ExclusivityGuard::acquire(path)?;
        if source == target {
            #[cfg(feature = "logging")]
            info!("Source and target configurations of {path:?} are identical");
            self.enter(RekeyPhase::Done);
            return Ok(());
        }
        let staged = StagedFileSet::begin(path)?;

        self.enter(RekeyPhase::Exporting);
        let exported = guard
            .verify()
            .and_then(|_| staged.write_export(&guard, &source, &target))
            .and_then(|_| guard.verify());
        if let Err(err) = exported {
            staged.abort();
            return Err(err);
        }

        self.enter(RekeyPhase::Swapping);
        let staged = match staged.swap() {
            Ok(()) => staged,
            Err(err) => settle_failed_swap(path, staged, err)?,
        };

        self.enter(RekeyPhase::CleaningUp);
        staged.finish()?;
        guard.release();

        self.enter(RekeyPhase::Done);
        Ok(())
    }
}

/// Resolves a failed swap while the lock marker is still held. The staged set is handed back if
/// the export ended up installed. Otherwise `err` is returned once the original is back in place,
/// or once resolution has been left to the next open
fn settle_failed_swap(
    _path: &Path,
    staged: StagedFileSet,
    err: RekeyError,
) -> Result<StagedFileSet, RekeyError> {
    #[cfg(feature = "logging")]
    warn!("Swap of {_path:?} failed, resolving: {err}");
    match staged.resolve() {
        Ok(RecoveryOutcome::RolledForward) => Ok(staged),
        Ok(_) => {
            staged.finish()?;
            Err(err)
        }
        Err(_resolve_err) => {
            #[cfg(feature = "logging")]
            warn!("Deferring recovery of {_path:?} to the next open: {_resolve_err}");
            Err(err)
        }
    }
}

/// Re-encodes a database using the built-in algorithm set
///
/// Fails with [`RekeyError::InvalidConfig`] before touching the file if either configuration is
/// unusable, and with [`RekeyError::Busy`] if any connection has the file open or another rekey
/// is running. Neither failure leaves anything on disk.
pub fn rekey(request: &RekeyRequest) -> Result<(), RekeyError> {
    Rekey::new(&CodecRegistry::default()).run(request)
}
