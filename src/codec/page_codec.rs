//! Per-page encode/decode
//!
//! Encrypted page layout:
//!
//! ```text
//! [ciphertext (usable bytes)][AEAD tag (16)][nonce (12)][HMAC]
//! ```
//!
//! The page number is bound into both the AEAD associated data and the HMAC, so a page
//! copied to a different slot fails authentication.

use super::cipher::PageCipher;
use super::key_manager::KeyManager;
use super::utils::{compute_hmac, generate_nonce, verify_hmac};
use super::{page_reserve, CipherKind, EncryptionParams, HmacAlgorithm, NONCE_SIZE, SALT_SIZE};
use crate::StorageError;

#[derive(Debug)]
pub(crate) struct PageCodec {
    kind: CipherKind,
    cipher: PageCipher,
    hmac: HmacAlgorithm,
    keys: KeyManager,
}

impl PageCodec {
    pub(crate) fn new(
        params: &EncryptionParams,
        salt: &[u8; SALT_SIZE],
    ) -> Result<Self, StorageError> {
        let keys = KeyManager::new(params, salt)?;
        let cipher = PageCipher::new(params.cipher, keys.cipher_key());

        Ok(Self {
            kind: params.cipher,
            cipher,
            hmac: params.hmac,
            keys,
        })
    }

    pub(crate) fn reserve(&self) -> usize {
        page_reserve(self.hmac)
    }

    pub(crate) fn mac_size(&self) -> usize {
        self.hmac.output_size()
    }

    /// Encrypts `plaintext` into a full page of `plaintext.len() + reserve()` bytes
    pub(crate) fn encode(&self, page_number: u64, plaintext: &[u8]) -> Result<Vec<u8>, StorageError> {
        let aad = page_number.to_le_bytes();
        let nonce = generate_nonce()?;

        let mut page = self.cipher.encrypt_with_nonce(&nonce, plaintext, &aad)?;
        page.extend_from_slice(&nonce);
        let mac = compute_hmac(
            self.hmac,
            self.keys.mac_key(),
            &[aad.as_slice(), page.as_slice()],
        )?;
        page.extend_from_slice(&mac);

        Ok(page)
    }

    pub(crate) fn decode(&self, page_number: u64, page: &[u8]) -> Result<Vec<u8>, StorageError> {
        if page.len() <= self.reserve() {
            return Err(StorageError::Corrupted(format!(
                "page {page_number} is too short"
            )));
        }

        let aad = page_number.to_le_bytes();
        let (body, mac) = page.split_at(page.len() - self.hmac.output_size());
        if !verify_hmac(self.hmac, self.keys.mac_key(), &[aad.as_slice(), body], mac)? {
            return Err(StorageError::Corrupted(format!(
                "page {page_number} failed authentication"
            )));
        }

        let (ciphertext, nonce) = body.split_at(body.len() - NONCE_SIZE);
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        nonce_bytes.copy_from_slice(nonce);
        self.cipher
            .decrypt_with_nonce(&nonce_bytes, ciphertext, &aad)
            .map_err(|_| StorageError::Corrupted(format!("page {page_number} failed decryption")))
    }

    /// Authenticates the header together with the cipher identity, so that a wrong key,
    /// KDF, iteration count, MAC or cipher all fail at open
    pub(crate) fn header_check(&self, header: &[u8]) -> Result<Vec<u8>, StorageError> {
        compute_hmac(
            self.hmac,
            self.keys.mac_key(),
            &[header, self.kind.name().as_bytes()],
        )
    }

    pub(crate) fn verify_header(&self, header: &[u8], check: &[u8]) -> Result<bool, StorageError> {
        verify_hmac(
            self.hmac,
            self.keys.mac_key(),
            &[header, self.kind.name().as_bytes()],
            check,
        )
    }
}
