//! Derived key material for an open database

use super::utils::derive_key;
use super::{EncryptionParams, KEY_SIZE, MAC_KEY_SIZE, SALT_SIZE};
use crate::StorageError;
use zeroize::{Zeroize, Zeroizing};

/// Cipher key and MAC key derived from the user key and the file's salt
pub(crate) struct KeyManager {
    cipher_key: [u8; KEY_SIZE],
    mac_key: [u8; MAC_KEY_SIZE],
}

impl KeyManager {
    pub(crate) fn new(
        params: &EncryptionParams,
        salt: &[u8; SALT_SIZE],
    ) -> Result<Self, StorageError> {
        let mut material = Zeroizing::new([0u8; KEY_SIZE + MAC_KEY_SIZE]);
        derive_key(
            params.kdf,
            &params.key,
            salt,
            params.kdf_iter,
            material.as_mut_slice(),
        )?;

        let mut cipher_key = [0u8; KEY_SIZE];
        let mut mac_key = [0u8; MAC_KEY_SIZE];
        cipher_key.copy_from_slice(&material[..KEY_SIZE]);
        mac_key.copy_from_slice(&material[KEY_SIZE..]);

        Ok(KeyManager {
            cipher_key,
            mac_key,
        })
    }

    pub(crate) fn cipher_key(&self) -> &[u8; KEY_SIZE] {
        &self.cipher_key
    }

    pub(crate) fn mac_key(&self) -> &[u8; MAC_KEY_SIZE] {
        &self.mac_key
    }
}

impl std::fmt::Debug for KeyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyManager").finish_non_exhaustive()
    }
}

impl Drop for KeyManager {
    fn drop(&mut self) {
        self.cipher_key.zeroize();
        self.mac_key.zeroize();
    }
}
