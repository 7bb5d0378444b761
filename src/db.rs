use crate::codec::{CodecConfig, CodecRegistry};
use crate::page_store::{FileBackend, LockMode, Pager, StorageBackend};
use crate::rekey::{lock_path, recover};
use crate::{DatabaseError, Error, Result, StorageError};
use std::fmt::{Debug, Formatter};
use std::fs::{File, OpenOptions};
use std::io;
use std::mem::size_of;
use std::path::{Path, PathBuf};

#[cfg(feature = "logging")]
use log::{debug, info};

const ROW_LENGTH_SIZE: usize = size_of::<u32>();

fn encode_row(row: &[u8], out: &mut Vec<u8>) -> Result {
    let len = u32::try_from(row.len()).map_err(|_| {
        Error::Io(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("row of {} bytes is too large", row.len()),
        ))
    })?;
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(row);
    Ok(())
}

fn decode_rows(payload: &[u8], expected: u64) -> std::result::Result<Vec<Vec<u8>>, StorageError> {
    let mut rows = vec![];
    let mut offset = 0;
    while offset < payload.len() {
        if payload.len() - offset < ROW_LENGTH_SIZE {
            return Err(StorageError::Corrupted(format!(
                "truncated row length at offset {offset}"
            )));
        }
        let mut len_bytes = [0u8; ROW_LENGTH_SIZE];
        len_bytes.copy_from_slice(&payload[offset..(offset + ROW_LENGTH_SIZE)]);
        let len = u32::from_le_bytes(len_bytes) as usize;
        offset += ROW_LENGTH_SIZE;

        if payload.len() - offset < len {
            return Err(StorageError::Corrupted(format!(
                "row at offset {offset} runs past the payload"
            )));
        }
        rows.push(payload[offset..(offset + len)].to_vec());
        offset += len;
    }

    if rows.len() as u64 != expected {
        return Err(StorageError::Corrupted(format!(
            "found {} rows, header describes {expected}",
            rows.len()
        )));
    }
    Ok(rows)
}

/// An open connection to a database file
///
/// Read-write connections hold an exclusive lock on the file and read-only connections a shared
/// one, so a rekey cannot start while any connection is alive. Rows form an append-only log.
///
/// # Examples
///
/// ```rust,no_run
/// use rekeydb::*;
///
/// # fn main() -> Result<(), Error> {
/// let mut db = Database::create("my_db.rkdb")?;
/// db.insert(b"hello")?;
/// assert_eq!(db.rows()?, vec![b"hello".to_vec()]);
/// # Ok(())
/// # }
/// ```
pub struct Database {
    pager: Pager,
    path: PathBuf,
    read_only: bool,
}

impl Database {
    /// Opens the specified file as an unencrypted database, initializing it if it does not exist
    /// or is empty.
    ///
    /// Use [`Database::builder`] to configure encryption.
    pub fn create(path: impl AsRef<Path>) -> std::result::Result<Database, DatabaseError> {
        Builder::new().create(path)
    }

    /// Opens an existing unencrypted database.
    pub fn open(path: impl AsRef<Path>) -> std::result::Result<Database, DatabaseError> {
        Builder::new().open(path)
    }

    /// Convenience method for [`Builder::new`]
    pub fn builder() -> Builder {
        Builder::new()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn page_size(&self) -> u32 {
        self.pager.page_size()
    }

    /// Number of pages in the file, including the header page
    pub fn page_count(&self) -> u64 {
        self.pager.page_count()
    }

    /// Returns the decoded payload bytes of page `page_number`. Page 0 is the header and cannot be
    /// read through this method
    pub fn read_page(&self, page_number: u64) -> Result<Vec<u8>> {
        Ok(self.pager.read_page(page_number)?)
    }

    /// Appends a row and commits it to disk
    pub fn insert(&mut self, row: &[u8]) -> Result {
        self.insert_all([row])
    }

    /// Appends several rows with a single header commit
    pub fn insert_all<'a>(&mut self, rows: impl IntoIterator<Item = &'a [u8]>) -> Result {
        if self.read_only {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "database was opened read-only",
            )));
        }

        let mut buffer = vec![];
        let mut count = 0;
        for row in rows {
            encode_row(row, &mut buffer)?;
            count += 1;
        }
        if count > 0 {
            self.pager.append_payload(&buffer, count)?;
        }
        Ok(())
    }

    pub fn rows(&self) -> Result<Vec<Vec<u8>>> {
        let payload = self.pager.read_payload()?;
        Ok(decode_rows(&payload, self.pager.row_count())?)
    }

    pub fn row_count(&self) -> u64 {
        self.pager.row_count()
    }

    /// Decodes every page in the file, including those past the end of the payload, and checks
    /// that the row log parses
    pub fn verify_integrity(&self) -> Result {
        for page_number in 1..self.pager.page_count() {
            self.pager.read_page(page_number)?;
        }
        self.rows()?;
        Ok(())
    }

    /// Releases the connection and its file lock
    pub fn close(self) {
        #[cfg(feature = "logging")]
        debug!("Closing database {:?}", self.path);
    }
}

impl Debug for Database {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.path)
            .field("page_size", &self.pager.page_size())
            .field("read_only", &self.read_only)
            .finish()
    }
}

/// Configuration for opening a [`Database`]
#[derive(Clone, Debug)]
pub struct Builder {
    codec: CodecConfig,
    registry: CodecRegistry,
    read_only: bool,
}

impl Builder {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self {
            codec: CodecConfig::default(),
            registry: CodecRegistry::default(),
            read_only: false,
        }
    }

    /// Sets how pages are encoded. Defaults to unencrypted 4KiB pages
    pub fn set_codec(&mut self, codec: CodecConfig) -> &mut Self {
        self.codec = codec;
        self
    }

    /// Set the page size of the database
    ///
    /// Only used when a new database is initialized, or to check an encrypted one. Unencrypted
    /// databases open with the page size recorded in their header
    pub fn set_page_size(&mut self, size: u32) -> &mut Self {
        self.codec.page_size = size;
        self
    }

    /// Open with a shared lock. Other read-only connections may coexist, writers may not
    pub fn set_read_only(&mut self, read_only: bool) -> &mut Self {
        self.read_only = read_only;
        self
    }

    /// Restricts the algorithms the codec configuration may name
    pub fn set_registry(&mut self, registry: CodecRegistry) -> &mut Self {
        self.registry = registry;
        self
    }

    /// Opens the specified file as a database.
    /// * if the file does not exist, or is an empty file, a new database will be initialized in it
    /// * if the file is a valid database under the configured codec, it will be opened
    /// * otherwise this function will return an error
    ///
    /// Always opens read-write.
    pub fn create(&self, path: impl AsRef<Path>) -> std::result::Result<Database, DatabaseError> {
        let path = path.as_ref();
        let params = self.registry.validate(&self.codec)?;
        recover(path)?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        let backend = Self::lock(file, path, LockMode::Exclusive)?;

        let pager = if backend.len()? == 0 {
            #[cfg(feature = "logging")]
            info!("Initializing database {path:?}");
            Pager::create(Box::new(backend), &params)?
        } else {
            Pager::open(Box::new(backend), &params)?
        };

        Ok(Database {
            pager,
            path: path.to_path_buf(),
            read_only: false,
        })
    }

    /// Opens an existing database.
    pub fn open(&self, path: impl AsRef<Path>) -> std::result::Result<Database, DatabaseError> {
        let path = path.as_ref();
        let params = self.registry.validate(&self.codec)?;
        recover(path)?;

        let file = OpenOptions::new()
            .read(true)
            .write(!self.read_only)
            .open(path)?;
        let mode = if self.read_only {
            LockMode::Shared
        } else {
            LockMode::Exclusive
        };
        let backend = Self::lock(file, path, mode)?;
        let pager = Pager::open(Box::new(backend), &params)?;

        Ok(Database {
            pager,
            path: path.to_path_buf(),
            read_only: self.read_only,
        })
    }

    // A rekey that began after the recovery check would replace the file under us
    fn lock(
        file: File,
        path: &Path,
        mode: LockMode,
    ) -> std::result::Result<FileBackend, DatabaseError> {
        let backend = FileBackend::new(file, mode)?;
        if lock_path(path).exists() {
            return Err(DatabaseError::Busy);
        }
        Ok(backend)
    }
}
