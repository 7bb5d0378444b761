//! AEAD encryption/decryption of page bodies

use super::{CipherKind, KEY_SIZE, NONCE_SIZE};
use crate::StorageError;
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::Aes256Gcm;
use chacha20poly1305::ChaCha20Poly1305;
use std::io;

enum Engine {
    Aes256Gcm(Aes256Gcm),
    ChaCha20Poly1305(ChaCha20Poly1305),
}

pub(crate) struct PageCipher {
    engine: Engine,
}

impl std::fmt::Debug for PageCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self.engine {
            Engine::Aes256Gcm(_) => "<Aes256Gcm>",
            Engine::ChaCha20Poly1305(_) => "<ChaCha20Poly1305>",
        };
        f.debug_struct("PageCipher").field("cipher", &name).finish()
    }
}

impl PageCipher {
    pub(crate) fn new(kind: CipherKind, key: &[u8; KEY_SIZE]) -> Self {
        let engine = match kind {
            CipherKind::Aes256Gcm => {
                let key = aes_gcm::Key::<Aes256Gcm>::from_slice(key);
                Engine::Aes256Gcm(Aes256Gcm::new(key))
            }
            CipherKind::ChaCha20Poly1305 => {
                let key = chacha20poly1305::Key::from_slice(key);
                Engine::ChaCha20Poly1305(ChaCha20Poly1305::new(key))
            }
        };

        Self { engine }
    }

    /// Returns ciphertext followed by the authentication tag
    pub(crate) fn encrypt_with_nonce(
        &self,
        nonce: &[u8; NONCE_SIZE],
        data: &[u8],
        aad: &[u8],
    ) -> Result<Vec<u8>, StorageError> {
        let payload = Payload { msg: data, aad };
        let result = match &self.engine {
            Engine::Aes256Gcm(cipher) => cipher.encrypt(aes_gcm::Nonce::from_slice(nonce), payload),
            Engine::ChaCha20Poly1305(cipher) => {
                cipher.encrypt(chacha20poly1305::Nonce::from_slice(nonce), payload)
            }
        };

        result.map_err(|e| {
            StorageError::Io(io::Error::other(format!("page encryption failed: {e}")))
        })
    }

    pub(crate) fn decrypt_with_nonce(
        &self,
        nonce: &[u8; NONCE_SIZE],
        ciphertext: &[u8],
        aad: &[u8],
    ) -> Result<Vec<u8>, StorageError> {
        let payload = Payload {
            msg: ciphertext,
            aad,
        };
        let result = match &self.engine {
            Engine::Aes256Gcm(cipher) => cipher.decrypt(aes_gcm::Nonce::from_slice(nonce), payload),
            Engine::ChaCha20Poly1305(cipher) => {
                cipher.decrypt(chacha20poly1305::Nonce::from_slice(nonce), payload)
            }
        };

        result.map_err(|_| StorageError::Corrupted("page decryption failed".to_string()))
    }
}
