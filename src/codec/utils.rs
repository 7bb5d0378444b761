//! Random material, key derivation and HMAC helpers

use super::{HmacAlgorithm, KdfAlgorithm, NONCE_SIZE, SALT_SIZE};
use crate::StorageError;
use getrandom::getrandom;
use hmac::{Hmac, Mac};
use pbkdf2::pbkdf2;
use sha1::Sha1;
use sha2::{Sha256, Sha512};
use std::io;

pub(crate) fn generate_salt() -> Result<[u8; SALT_SIZE], StorageError> {
    let mut salt = [0u8; SALT_SIZE];
    getrandom(&mut salt).map_err(|e| StorageError::Io(io::Error::other(e.to_string())))?;
    Ok(salt)
}

pub(crate) fn generate_nonce() -> Result<[u8; NONCE_SIZE], StorageError> {
    let mut nonce = [0u8; NONCE_SIZE];
    getrandom(&mut nonce).map_err(|e| StorageError::Io(io::Error::other(e.to_string())))?;
    Ok(nonce)
}

/// Fills `out` with PBKDF2 output for the given digest
pub(crate) fn derive_key(
    kdf: KdfAlgorithm,
    password: &[u8],
    salt: &[u8; SALT_SIZE],
    iterations: u32,
    out: &mut [u8],
) -> Result<(), StorageError> {
    let result = match kdf {
        KdfAlgorithm::Sha1 => pbkdf2::<Hmac<Sha1>>(password, salt, iterations, out),
        KdfAlgorithm::Sha256 => pbkdf2::<Hmac<Sha256>>(password, salt, iterations, out),
        KdfAlgorithm::Sha512 => pbkdf2::<Hmac<Sha512>>(password, salt, iterations, out),
    };

    result.map_err(|_| {
        StorageError::Io(io::Error::new(
            io::ErrorKind::InvalidInput,
            "key derivation failed",
        ))
    })
}

fn keyed<M: Mac + hmac::digest::KeyInit>(key: &[u8], parts: &[&[u8]]) -> Result<M, StorageError> {
    let mut mac = <M as Mac>::new_from_slice(key).map_err(|_| {
        StorageError::Io(io::Error::new(io::ErrorKind::InvalidInput, "invalid MAC key"))
    })?;
    for part in parts {
        mac.update(part);
    }
    Ok(mac)
}

pub(crate) fn compute_hmac(
    algorithm: HmacAlgorithm,
    key: &[u8],
    parts: &[&[u8]],
) -> Result<Vec<u8>, StorageError> {
    let tag = match algorithm {
        HmacAlgorithm::Sha1 => keyed::<Hmac<Sha1>>(key, parts)?.finalize().into_bytes().to_vec(),
        HmacAlgorithm::Sha256 => keyed::<Hmac<Sha256>>(key, parts)?
            .finalize()
            .into_bytes()
            .to_vec(),
        HmacAlgorithm::Sha512 => keyed::<Hmac<Sha512>>(key, parts)?
            .finalize()
            .into_bytes()
            .to_vec(),
    };
    Ok(tag)
}

/// Constant-time comparison of `tag` against the HMAC of `parts`
pub(crate) fn verify_hmac(
    algorithm: HmacAlgorithm,
    key: &[u8],
    parts: &[&[u8]],
    tag: &[u8],
) -> Result<bool, StorageError> {
    let valid = match algorithm {
        HmacAlgorithm::Sha1 => keyed::<Hmac<Sha1>>(key, parts)?.verify_slice(tag).is_ok(),
        HmacAlgorithm::Sha256 => keyed::<Hmac<Sha256>>(key, parts)?.verify_slice(tag).is_ok(),
        HmacAlgorithm::Sha512 => keyed::<Hmac<Sha512>>(key, parts)?.verify_slice(tag).is_ok(),
    };
    Ok(valid)
}
