use std::fmt::{Display, Formatter};
use std::io;

/// Errors raised while validating a [`crate::CodecConfig`]
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigError {
    /// The cipher name is not in the registry
    UnsupportedCipher(String),
    /// The HMAC algorithm name is not in the registry
    UnsupportedHmac(String),
    /// The KDF algorithm name is not in the registry
    UnsupportedKdf(String),
    /// Encryption was requested but a required field is absent
    MissingField(&'static str),
    /// A crypto field was supplied for an unencrypted configuration
    UnexpectedField(&'static str),
    InvalidKeyLength {
        expected: usize,
        actual: usize,
    },
    /// Encryption was requested with a KDF iteration count of zero
    ZeroIterations,
    /// Page size is not a supported power of two, or leaves no room for the codec reserve
    InvalidPageSize(u32),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::UnsupportedCipher(name) => write!(f, "Unsupported cipher: {name}"),
            ConfigError::UnsupportedHmac(name) => write!(f, "Unsupported HMAC algorithm: {name}"),
            ConfigError::UnsupportedKdf(name) => write!(f, "Unsupported KDF algorithm: {name}"),
            ConfigError::MissingField(field) => {
                write!(f, "Encryption requested but {field} is missing")
            }
            ConfigError::UnexpectedField(field) => {
                write!(f, "{field} given without a cipher")
            }
            ConfigError::InvalidKeyLength { expected, actual } => {
                write!(f, "Key must be {expected} bytes, got {actual}")
            }
            ConfigError::ZeroIterations => write!(f, "KDF iteration count must be positive"),
            ConfigError::InvalidPageSize(size) => write!(f, "Unsupported page size: {size}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// General errors directly from the storage layer
#[derive(Debug)]
#[non_exhaustive]
pub enum StorageError {
    /// A page failed authentication or the payload is malformed
    Corrupted(String),
    Io(io::Error),
}

impl From<io::Error> for StorageError {
    fn from(err: io::Error) -> StorageError {
        StorageError::Io(err)
    }
}

impl Display for StorageError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageError::Corrupted(msg) => {
                write!(f, "DB corrupted: {msg}")
            }
            StorageError::Io(err) => {
                write!(f, "I/O error: {err}")
            }
        }
    }
}

impl std::error::Error for StorageError {}

/// Errors related to opening a database
#[derive(Debug)]
#[non_exhaustive]
pub enum DatabaseError {
    /// The file is locked by another connection, or a rekey is in progress
    Busy,
    /// The file does not decode under the given codec configuration
    NotADatabase(String),
    InvalidConfig(ConfigError),
    /// Error from underlying storage
    Storage(StorageError),
}

impl From<io::Error> for DatabaseError {
    fn from(err: io::Error) -> DatabaseError {
        DatabaseError::Storage(StorageError::Io(err))
    }
}

impl From<StorageError> for DatabaseError {
    fn from(err: StorageError) -> DatabaseError {
        DatabaseError::Storage(err)
    }
}

impl From<ConfigError> for DatabaseError {
    fn from(err: ConfigError) -> DatabaseError {
        DatabaseError::InvalidConfig(err)
    }
}

impl From<RekeyError> for DatabaseError {
    fn from(err: RekeyError) -> DatabaseError {
        match err {
            RekeyError::InvalidConfig(x) => DatabaseError::InvalidConfig(x),
            RekeyError::Busy => DatabaseError::Busy,
            RekeyError::NotADatabase(msg) => DatabaseError::NotADatabase(msg),
            RekeyError::Io(x) => DatabaseError::Storage(StorageError::Io(x)),
        }
    }
}

impl Display for DatabaseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            DatabaseError::Busy => {
                write!(f, "Database is busy. Cannot acquire lock.")
            }
            DatabaseError::NotADatabase(msg) => {
                write!(f, "File is not a database or the key is incorrect: {msg}")
            }
            DatabaseError::InvalidConfig(err) => err.fmt(f),
            DatabaseError::Storage(storage) => storage.fmt(f),
        }
    }
}

impl std::error::Error for DatabaseError {}

/// Errors returned by [`crate::rekey`]
#[derive(Debug)]
#[non_exhaustive]
pub enum RekeyError {
    /// Source or target configuration rejected before any file I/O
    InvalidConfig(ConfigError),
    /// Another connection or process holds the file, or a rekey is already running
    Busy,
    /// The source file does not decode under the source configuration
    NotADatabase(String),
    Io(io::Error),
}

impl From<io::Error> for RekeyError {
    fn from(err: io::Error) -> RekeyError {
        RekeyError::Io(err)
    }
}

impl From<ConfigError> for RekeyError {
    fn from(err: ConfigError) -> RekeyError {
        RekeyError::InvalidConfig(err)
    }
}

impl From<StorageError> for RekeyError {
    fn from(err: StorageError) -> RekeyError {
        match err {
            StorageError::Corrupted(msg) => RekeyError::NotADatabase(msg),
            StorageError::Io(x) => RekeyError::Io(x),
        }
    }
}

impl From<DatabaseError> for RekeyError {
    fn from(err: DatabaseError) -> RekeyError {
        match err {
            DatabaseError::Busy => RekeyError::Busy,
            DatabaseError::NotADatabase(msg) => RekeyError::NotADatabase(msg),
            DatabaseError::InvalidConfig(x) => RekeyError::InvalidConfig(x),
            DatabaseError::Storage(storage) => storage.into(),
        }
    }
}

impl Display for RekeyError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            RekeyError::InvalidConfig(err) => write!(f, "Invalid codec configuration: {err}"),
            RekeyError::Busy => write!(f, "Database is busy. Cannot rekey."),
            RekeyError::NotADatabase(msg) => {
                write!(f, "Source is not a database under the given configuration: {msg}")
            }
            RekeyError::Io(err) => write!(f, "I/O error: {err}"),
        }
    }
}

impl std::error::Error for RekeyError {}

/// Superset of all other errors that can occur. Convenience enum so that users can convert all errors into a single type
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    InvalidConfig(ConfigError),
    /// The file is locked by another connection, or a rekey is in progress
    Busy,
    NotADatabase(String),
    /// The Database is corrupted
    Corrupted(String),
    Io(io::Error),
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Error {
        Error::InvalidConfig(err)
    }
}

impl From<StorageError> for Error {
    fn from(err: StorageError) -> Error {
        match err {
            StorageError::Corrupted(msg) => Error::Corrupted(msg),
            StorageError::Io(x) => Error::Io(x),
        }
    }
}

impl From<DatabaseError> for Error {
    fn from(err: DatabaseError) -> Error {
        match err {
            DatabaseError::Busy => Error::Busy,
            DatabaseError::NotADatabase(msg) => Error::NotADatabase(msg),
            DatabaseError::InvalidConfig(x) => Error::InvalidConfig(x),
            DatabaseError::Storage(storage) => storage.into(),
        }
    }
}

impl From<RekeyError> for Error {
    fn from(err: RekeyError) -> Error {
        match err {
            RekeyError::InvalidConfig(x) => Error::InvalidConfig(x),
            RekeyError::Busy => Error::Busy,
            RekeyError::NotADatabase(msg) => Error::NotADatabase(msg),
            RekeyError::Io(x) => Error::Io(x),
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::Io(err)
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::InvalidConfig(err) => err.fmt(f),
            Error::Busy => write!(f, "Database is busy. Cannot acquire lock."),
            Error::NotADatabase(msg) => {
                write!(f, "File is not a database or the key is incorrect: {msg}")
            }
            Error::Corrupted(msg) => write!(f, "DB corrupted: {msg}"),
            Error::Io(err) => write!(f, "I/O error: {err}"),
        }
    }
}

impl std::error::Error for Error {}
