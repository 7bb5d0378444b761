//! Codec configuration and per-page encryption
//!
//! A [`CodecConfig`] is the caller-facing description of how pages are encoded. It is
//! resolved against a [`CodecRegistry`] into [`CodecParams`], which the page store uses to
//! build a [`PageCodec`].

pub(crate) mod cipher;
pub(crate) mod key_manager;
pub(crate) mod page_codec;
pub(crate) mod utils;

pub(crate) use page_codec::PageCodec;

use crate::ConfigError;
use std::fmt::{Debug, Formatter};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

pub const KEY_SIZE: usize = 32; // 256 bits
pub const NONCE_SIZE: usize = 12; // 96 bits
pub const TAG_SIZE: usize = 16; // 128 bits
pub const SALT_SIZE: usize = 16; // 128 bits
pub(crate) const MAC_KEY_SIZE: usize = 32;

pub const DEFAULT_PAGE_SIZE: u32 = 4096;
pub const MIN_PAGE_SIZE: u32 = 512;
pub const MAX_PAGE_SIZE: u32 = 65536;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CipherKind {
    Aes256Gcm,
    ChaCha20Poly1305,
}

impl CipherKind {
    pub const fn name(self) -> &'static str {
        match self {
            CipherKind::Aes256Gcm => "aes-256-gcm",
            CipherKind::ChaCha20Poly1305 => "chacha20-poly1305",
        }
    }

    pub const fn key_size(self) -> usize {
        KEY_SIZE
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum HmacAlgorithm {
    Sha1,
    Sha256,
    Sha512,
}

impl HmacAlgorithm {
    pub const fn name(self) -> &'static str {
        match self {
            HmacAlgorithm::Sha1 => "SHA1",
            HmacAlgorithm::Sha256 => "SHA256",
            HmacAlgorithm::Sha512 => "SHA512",
        }
    }

    pub const fn output_size(self) -> usize {
        match self {
            HmacAlgorithm::Sha1 => 20,
            HmacAlgorithm::Sha256 => 32,
            HmacAlgorithm::Sha512 => 64,
        }
    }
}

/// PBKDF2 with the given HMAC digest
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum KdfAlgorithm {
    Sha1,
    Sha256,
    Sha512,
}

impl KdfAlgorithm {
    pub const fn name(self) -> &'static str {
        match self {
            KdfAlgorithm::Sha1 => "KDF_SHA1",
            KdfAlgorithm::Sha256 => "KDF_SHA256",
            KdfAlgorithm::Sha512 => "KDF_SHA512",
        }
    }
}

/// Bytes at the end of every encrypted page taken by the tag, nonce and MAC
pub(crate) const fn page_reserve(hmac: HmacAlgorithm) -> usize {
    TAG_SIZE + NONCE_SIZE + hmac.output_size()
}

/// Describes how a database file is encoded
///
/// A configuration without a cipher is unencrypted. When a cipher is given, the HMAC
/// algorithm, KDF algorithm, key and a positive iteration count are all required.
/// Key material is zeroized on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct CodecConfig {
    pub cipher: Option<String>,
    pub hmac_algo: Option<String>,
    pub kdf_algo: Option<String>,
    pub key: Option<Vec<u8>>,
    pub kdf_iter: u32,
    pub page_size: u32,
}

impl CodecConfig {
    pub fn plaintext(page_size: u32) -> Self {
        Self {
            cipher: None,
            hmac_algo: None,
            kdf_algo: None,
            key: None,
            kdf_iter: 0,
            page_size,
        }
    }

    pub fn encrypted(
        cipher: &str,
        hmac_algo: &str,
        kdf_algo: &str,
        key: &[u8],
        kdf_iter: u32,
        page_size: u32,
    ) -> Self {
        Self {
            cipher: Some(cipher.to_string()),
            hmac_algo: Some(hmac_algo.to_string()),
            kdf_algo: Some(kdf_algo.to_string()),
            key: Some(key.to_vec()),
            kdf_iter,
            page_size,
        }
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_key(mut self, key: &[u8]) -> Self {
        if let Some(old) = self.key.as_mut() {
            old.zeroize();
        }
        self.key = Some(key.to_vec());
        self
    }

    pub fn with_kdf_iter(mut self, kdf_iter: u32) -> Self {
        self.kdf_iter = kdf_iter;
        self
    }

    pub fn is_encrypted(&self) -> bool {
        self.cipher.is_some()
    }

    /// Checks this configuration against the built-in algorithm set
    pub fn validate(&self) -> Result<(), ConfigError> {
        CodecRegistry::default().validate(self).map(|_| ())
    }
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self::plaintext(DEFAULT_PAGE_SIZE)
    }
}

impl Debug for CodecConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodecConfig")
            .field("cipher", &self.cipher)
            .field("hmac_algo", &self.hmac_algo)
            .field("kdf_algo", &self.kdf_algo)
            .field("key", &self.key.as_ref().map(|_| "<redacted>"))
            .field("kdf_iter", &self.kdf_iter)
            .field("page_size", &self.page_size)
            .finish()
    }
}

/// The set of algorithms a [`CodecConfig`] may name
///
/// Passed explicitly to validation and to [`crate::Rekey`]; there is no process-wide registry.
#[derive(Clone, Debug)]
pub struct CodecRegistry {
    ciphers: Vec<CipherKind>,
    hmac_algorithms: Vec<HmacAlgorithm>,
    kdf_algorithms: Vec<KdfAlgorithm>,
}

impl Default for CodecRegistry {
    fn default() -> Self {
        Self {
            ciphers: vec![CipherKind::Aes256Gcm, CipherKind::ChaCha20Poly1305],
            hmac_algorithms: vec![
                HmacAlgorithm::Sha1,
                HmacAlgorithm::Sha256,
                HmacAlgorithm::Sha512,
            ],
            kdf_algorithms: vec![KdfAlgorithm::Sha1, KdfAlgorithm::Sha256, KdfAlgorithm::Sha512],
        }
    }
}

impl CodecRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ciphers(&self) -> &[CipherKind] {
        &self.ciphers
    }

    pub fn hmac_algorithms(&self) -> &[HmacAlgorithm] {
        &self.hmac_algorithms
    }

    pub fn kdf_algorithms(&self) -> &[KdfAlgorithm] {
        &self.kdf_algorithms
    }

    /// Restricts the accepted ciphers
    pub fn set_ciphers(&mut self, ciphers: &[CipherKind]) -> &mut Self {
        self.ciphers = ciphers.to_vec();
        self
    }

    /// Restricts the accepted HMAC algorithms
    pub fn set_hmac_algorithms(&mut self, algorithms: &[HmacAlgorithm]) -> &mut Self {
        self.hmac_algorithms = algorithms.to_vec();
        self
    }

    /// Restricts the accepted KDF algorithms
    pub fn set_kdf_algorithms(&mut self, algorithms: &[KdfAlgorithm]) -> &mut Self {
        self.kdf_algorithms = algorithms.to_vec();
        self
    }

    fn cipher(&self, name: &str) -> Option<CipherKind> {
        self.ciphers.iter().copied().find(|c| c.name() == name)
    }

    fn hmac_algorithm(&self, name: &str) -> Option<HmacAlgorithm> {
        self.hmac_algorithms.iter().copied().find(|a| a.name() == name)
    }

    fn kdf_algorithm(&self, name: &str) -> Option<KdfAlgorithm> {
        self.kdf_algorithms.iter().copied().find(|a| a.name() == name)
    }

    /// Resolves a configuration, failing before any I/O if it is not usable
    pub fn validate(&self, config: &CodecConfig) -> Result<CodecParams, ConfigError> {
        let page_size = config.page_size;
        if !page_size.is_power_of_two() || !(MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&page_size) {
            return Err(ConfigError::InvalidPageSize(page_size));
        }

        let cipher_name = match config.cipher.as_deref() {
            Some(name) => name,
            None => {
                if config.key.is_some() {
                    return Err(ConfigError::UnexpectedField("key"));
                }
                if config.hmac_algo.is_some() {
                    return Err(ConfigError::UnexpectedField("HMAC algorithm"));
                }
                if config.kdf_algo.is_some() {
                    return Err(ConfigError::UnexpectedField("KDF algorithm"));
                }
                return Ok(CodecParams {
                    page_size,
                    encryption: None,
                });
            }
        };

        let cipher = self
            .cipher(cipher_name)
            .ok_or_else(|| ConfigError::UnsupportedCipher(cipher_name.to_string()))?;
        let hmac_name = config
            .hmac_algo
            .as_deref()
            .ok_or(ConfigError::MissingField("HMAC algorithm"))?;
        let hmac = self
            .hmac_algorithm(hmac_name)
            .ok_or_else(|| ConfigError::UnsupportedHmac(hmac_name.to_string()))?;
        let kdf_name = config
            .kdf_algo
            .as_deref()
            .ok_or(ConfigError::MissingField("KDF algorithm"))?;
        let kdf = self
            .kdf_algorithm(kdf_name)
            .ok_or_else(|| ConfigError::UnsupportedKdf(kdf_name.to_string()))?;
        let key = config.key.as_ref().ok_or(ConfigError::MissingField("key"))?;
        if key.len() != cipher.key_size() {
            return Err(ConfigError::InvalidKeyLength {
                expected: cipher.key_size(),
                actual: key.len(),
            });
        }
        if config.kdf_iter == 0 {
            return Err(ConfigError::ZeroIterations);
        }
        if page_reserve(hmac) >= page_size as usize {
            return Err(ConfigError::InvalidPageSize(page_size));
        }

        Ok(CodecParams {
            page_size,
            encryption: Some(EncryptionParams {
                cipher,
                hmac,
                kdf,
                key: Zeroizing::new(key.clone()),
                kdf_iter: config.kdf_iter,
            }),
        })
    }
}

/// A validated [`CodecConfig`]
#[derive(Clone, PartialEq, Eq)]
pub struct CodecParams {
    pub(crate) page_size: u32,
    pub(crate) encryption: Option<EncryptionParams>,
}

impl CodecParams {
    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn is_encrypted(&self) -> bool {
        self.encryption.is_some()
    }

    pub fn cipher(&self) -> Option<CipherKind> {
        self.encryption.as_ref().map(|e| e.cipher)
    }

    /// Usable payload bytes per page once the codec reserve is taken out
    pub(crate) fn usable_size(&self) -> usize {
        match &self.encryption {
            Some(encryption) => self.page_size as usize - page_reserve(encryption.hmac),
            None => self.page_size as usize,
        }
    }
}

impl Debug for CodecParams {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodecParams")
            .field("page_size", &self.page_size)
            .field("encryption", &self.encryption)
            .finish()
    }
}

#[derive(Clone, PartialEq, Eq)]
pub(crate) struct EncryptionParams {
    pub(crate) cipher: CipherKind,
    pub(crate) hmac: HmacAlgorithm,
    pub(crate) kdf: KdfAlgorithm,
    pub(crate) key: Zeroizing<Vec<u8>>,
    pub(crate) kdf_iter: u32,
}

impl Debug for EncryptionParams {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionParams")
            .field("cipher", &self.cipher)
            .field("hmac", &self.hmac)
            .field("kdf", &self.kdf)
            .field("key", &"<redacted>")
            .field("kdf_iter", &self.kdf_iter)
            .finish()
    }
}
