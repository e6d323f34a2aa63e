// SPDX-License-Identifier: MIT OR Apache-2.0

//! Authenticated encryption with associated data (AEAD).
//!
//! Two constructions are exposed: ChaCha20-Poly1305 with a 12-byte nonce (used with
//! deterministic counter nonces inside handshake and session state) and XChaCha20-Poly1305 with
//! a 24-byte nonce (used with fresh random nonces where no counter is available).
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce, XChaCha20Poly1305, XNonce};
use thiserror::Error;

use crate::crypto::secret::SymmetricKey;

pub const NONCE_SIZE: usize = 12;

pub const XNONCE_SIZE: usize = 24;

/// Size of the Poly1305 authentication tag appended to every ciphertext.
pub const AEAD_TAG_SIZE: usize = 16;

/// Encrypts plaintext with ChaCha20-Poly1305, binding the associated data.
pub fn aead_encrypt(
    key: &SymmetricKey,
    nonce: [u8; NONCE_SIZE],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, AeadError> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
    let ciphertext = cipher
        .encrypt(
            Nonce::from_slice(&nonce),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|_| AeadError::Encrypt)?;
    Ok(ciphertext)
}

/// Decrypts and authenticates a ChaCha20-Poly1305 ciphertext.
pub fn aead_decrypt(
    key: &SymmetricKey,
    nonce: [u8; NONCE_SIZE],
    ciphertext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, AeadError> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
    let plaintext = cipher
        .decrypt(
            Nonce::from_slice(&nonce),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|_| AeadError::Decrypt)?;
    Ok(plaintext)
}

/// Encrypts plaintext with XChaCha20-Poly1305 under a random 24-byte nonce.
pub fn xaead_encrypt(
    key: &SymmetricKey,
    nonce: [u8; XNONCE_SIZE],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, AeadError> {
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
    let ciphertext = cipher
        .encrypt(
            XNonce::from_slice(&nonce),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|_| AeadError::Encrypt)?;
    Ok(ciphertext)
}

/// Decrypts and authenticates an XChaCha20-Poly1305 ciphertext.
pub fn xaead_decrypt(
    key: &SymmetricKey,
    nonce: [u8; XNONCE_SIZE],
    ciphertext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, AeadError> {
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
    let plaintext = cipher
        .decrypt(
            XNonce::from_slice(&nonce),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|_| AeadError::Decrypt)?;
    Ok(plaintext)
}

#[derive(Debug, Error)]
pub enum AeadError {
    #[error("aead encryption failed")]
    Encrypt,

    #[error("aead decryption failed")]
    Decrypt,
}
