//! Encryption of stored registry secrets.
//!
//! Ciphertexts are `<enc-v1>` followed by base64 of a 12-byte nonce and the
//! AES-256-GCM output. The key is the SHA-256 of the key file contents.
//! Without a key the encryptor passes values through unchanged.

use std::path::Path;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::RngCore;
use sha2::{Digest, Sha256};
use wharf_core::{Error, Result};

/// Marks an encrypted value.
pub const ENCRYPTED_PREFIX: &str = "<enc-v1>";

const NONCE_LEN: usize = 12;

/// Symmetric encryption with a process-wide key.
#[derive(Clone)]
pub struct Encryptor {
    cipher: Option<Aes256Gcm>,
}

impl std::fmt::Debug for Encryptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Encryptor")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

impl Encryptor {
    /// An encryptor keyed by `key_material`.
    #[must_use]
    pub fn new(key_material: &[u8]) -> Self {
        let key = Sha256::digest(key_material);
        Self {
            cipher: Some(Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key))),
        }
    }

    /// A pass-through encryptor.
    #[must_use]
    pub const fn disabled() -> Self {
        Self { cipher: None }
    }

    /// An encryptor keyed by the contents of `path`. A missing or empty file
    /// leaves encryption disabled.
    pub fn from_file(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match std::fs::read(path) {
            Ok(material) if !material.is_empty() => Self::new(&material),
            Ok(_) => {
                tracing::warn!(path = %path.display(), "secret key file is empty, secrets are stored in clear text");
                Self::disabled()
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "secret key unavailable, secrets are stored in clear text");
                Self::disabled()
            }
        }
    }

    /// True when a key is loaded.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.cipher.is_some()
    }

    /// Encrypts `plain`. Empty values stay empty.
    ///
    /// # Errors
    ///
    /// Returns `UNKNOWN` if the cipher fails.
    pub fn encrypt(&self, plain: &str) -> Result<String> {
        let Some(cipher) = &self.cipher else {
            return Ok(plain.to_string());
        };
        if plain.is_empty() {
            return Ok(String::new());
        }
        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);
        let sealed = cipher
            .encrypt(Nonce::from_slice(&nonce), plain.as_bytes())
            .map_err(|_| Error::unknown("failed to encrypt secret"))?;

        let mut payload = Vec::with_capacity(NONCE_LEN + sealed.len());
        payload.extend_from_slice(&nonce);
        payload.extend_from_slice(&sealed);
        Ok(format!("{ENCRYPTED_PREFIX}{}", STANDARD.encode(payload)))
    }

    /// Decrypts `value`. Values without the prefix are returned as stored.
    ///
    /// # Errors
    ///
    /// Returns `PRECONDITION` for an encrypted value without a key and
    /// `UNKNOWN` for a value that does not decrypt.
    pub fn decrypt(&self, value: &str) -> Result<String> {
        let Some(encoded) = value.strip_prefix(ENCRYPTED_PREFIX) else {
            return Ok(value.to_string());
        };
        let Some(cipher) = &self.cipher else {
            return Err(Error::precondition("secret is encrypted but no key is configured"));
        };
        let payload = STANDARD
            .decode(encoded)
            .map_err(|e| Error::unknown("malformed encrypted secret").with_cause(e))?;
        if payload.len() <= NONCE_LEN {
            return Err(Error::unknown("malformed encrypted secret"));
        }
        let (nonce, sealed) = payload.split_at(NONCE_LEN);
        let plain = cipher
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| Error::unknown("failed to decrypt secret"))?;
        String::from_utf8(plain).map_err(|e| Error::unknown("decrypted secret is not UTF-8").with_cause(e))
    }
}
