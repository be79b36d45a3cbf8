// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! AES-256-GCM encryptor for credentials at rest.
//!
//! ## Security
//!
//! - The 256-bit key is SHA-256 of the operator passphrase, so any passphrase
//!   length is accepted
//! - Every call draws a fresh random nonce; encrypting the same plaintext
//!   twice yields different blobs
//! - Tag verification failure is reported as [`CryptoError::DecryptionFailed`]
//!   and never returns partial plaintext
//! - Neither key material nor plaintext is logged or included in errors

use base64ct::{Base64, Encoding};
use ring::aead::{self, Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM};
use ring::rand::{SecureRandom, SystemRandom};
use sha2::{Digest, Sha256};

/// Nonce length prepended to every blob.
pub const NONCE_LEN: usize = aead::NONCE_LEN;

/// Authentication tag length appended by AES-GCM.
pub const TAG_LEN: usize = 16;

/// Encryption errors. Messages are safe to surface; they carry no secrets.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CryptoError {
    #[error("encryption key material is invalid")]
    InvalidKey,

    #[error("ciphertext is malformed or truncated")]
    InvalidCiphertext,

    #[error("decryption failed: authentication tag mismatch")]
    DecryptionFailed,

    #[error("encryption failed")]
    EncryptionFailed,

    #[error("decrypted payload is not valid UTF-8")]
    InvalidPlaintext,
}

/// Symmetric authenticated encryptor shared by every credential write/read.
pub struct Encryptor {
    key: LessSafeKey,
    rng: SystemRandom,
}

impl std::fmt::Debug for Encryptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Encryptor")
            .field("algorithm", &"AES-256-GCM")
            .field("key", &"<redacted>")
            .finish()
    }
}

impl Encryptor {
    /// Derive the key from an operator-supplied secret of any length.
    pub fn new(secret: impl AsRef<[u8]>) -> Result<Self, CryptoError> {
        let secret = secret.as_ref();
        if secret.is_empty() {
            return Err(CryptoError::InvalidKey);
        }

        let digest = Sha256::digest(secret);
        let unbound =
            UnboundKey::new(&AES_256_GCM, digest.as_slice()).map_err(|_| CryptoError::InvalidKey)?;

        Ok(Self {
            key: LessSafeKey::new(unbound),
            rng: SystemRandom::new(),
        })
    }

    /// Seal `plaintext`, returning `nonce || ciphertext || tag`.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        self.rng
            .fill(&mut nonce_bytes)
            .map_err(|_| CryptoError::EncryptionFailed)?;
        let nonce = Nonce::assume_unique_for_key(nonce_bytes);

        let mut in_out = plaintext.to_vec();
        self.key
            .seal_in_place_append_tag(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| CryptoError::EncryptionFailed)?;

        let mut blob = Vec::with_capacity(NONCE_LEN + in_out.len());
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(&in_out);
        Ok(blob)
    }

    /// Open a blob produced by [`Encryptor::encrypt`].
    pub fn decrypt(&self, blob: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if blob.len() < NONCE_LEN {
            return Err(CryptoError::InvalidCiphertext);
        }

        let (nonce_bytes, sealed) = blob.split_at(NONCE_LEN);
        let nonce =
            Nonce::try_assume_unique_for_key(nonce_bytes).map_err(|_| CryptoError::InvalidCiphertext)?;

        let mut in_out = sealed.to_vec();
        let plaintext = self
            .key
            .open_in_place(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| CryptoError::DecryptionFailed)?;

        Ok(plaintext.to_vec())
    }

    /// Encrypt a string and base64-encode the blob for a text column.
    pub fn encrypt_string(&self, plaintext: &str) -> Result<String, CryptoError> {
        let blob = self.encrypt(plaintext.as_bytes())?;
        Ok(Base64::encode_string(&blob))
    }

    /// Reverse of [`Encryptor::encrypt_string`].
    pub fn decrypt_string(&self, encoded: &str) -> Result<String, CryptoError> {
        let blob = Base64::decode_vec(encoded.trim()).map_err(|_| CryptoError::InvalidCiphertext)?;
        let plaintext = self.decrypt(&blob)?;
        String::from_utf8(plaintext).map_err(|_| CryptoError::InvalidPlaintext)
    }
}
