//! A paged, optionally encrypted database file whose codec configuration can be changed in
//! place with a crash-safe rekey.
//!
//! # Example
//!
//! ```rust,no_run
//! use rekeydb::*;
//!
//! # fn main() -> Result<(), Error> {
//! let key = b"0123456789abcdef0123456789abcdef";
//! let old = CodecConfig::encrypted("aes-256-gcm", "SHA1", "KDF_SHA1", key, 4000, 1024);
//! let new = CodecConfig::encrypted("chacha20-poly1305", "SHA512", "KDF_SHA512", key, 64000, 4096);
//!
//! let mut db = Database::builder().set_codec(old.clone()).create("my_db.rkdb")?;
//! db.insert(b"hello")?;
//! db.close();
//!
//! rekey(&RekeyRequest::new("my_db.rkdb", old, new.clone()))?;
//!
//! let db = Database::builder().set_codec(new).open("my_db.rkdb")?;
//! assert_eq!(db.rows()?, vec![b"hello".to_vec()]);
//! # Ok(())
//! # }
//! ```

pub use codec::{
    CipherKind, CodecConfig, CodecParams, CodecRegistry, HmacAlgorithm, KdfAlgorithm,
    DEFAULT_PAGE_SIZE, KEY_SIZE, MAX_PAGE_SIZE, MIN_PAGE_SIZE, NONCE_SIZE, SALT_SIZE, TAG_SIZE,
};
pub use db::{Builder, Database};
pub use error::{ConfigError, DatabaseError, Error, RekeyError, StorageError};
pub use rekey::{
    recover, rekey, ExclusivityGuard, RecoveryOutcome, Rekey, RekeyPhase, RekeyRequest,
    EXPORT_SUFFIX, LOCK_SUFFIX, RENAME_SUFFIX,
};

type Result<T = (), E = Error> = std::result::Result<T, E>;

mod codec;
mod db;
mod error;
mod page_store;
mod rekey;
