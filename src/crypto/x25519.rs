// SPDX-License-Identifier: MIT OR Apache-2.0

//! X25519 Diffie-Hellman key agreement.
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crypto::secret::Secret;

pub const PUBLIC_KEY_SIZE: usize = 32;

pub const SECRET_KEY_SIZE: usize = 32;

/// X25519 public key.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PublicKey(#[serde(with = "serde_bytes")] [u8; PUBLIC_KEY_SIZE]);

impl PublicKey {
    pub fn from_bytes(bytes: [u8; PUBLIC_KEY_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_SIZE] {
        &self.0
    }

    pub fn to_bytes(self) -> [u8; PUBLIC_KEY_SIZE] {
        self.0
    }

    pub fn to_hex(self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.to_hex())
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// X25519 secret key.
///
/// Key material is held in a zeroizing container and never printed in debug output.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretKey(Secret<SECRET_KEY_SIZE>);

impl SecretKey {
    pub fn from_bytes(bytes: [u8; SECRET_KEY_SIZE]) -> Self {
        Self(Secret::from_bytes(bytes))
    }

    /// Derives the public counterpart of this secret key.
    pub fn public_key(&self) -> Result<PublicKey, X25519Error> {
        let secret = x25519_dalek::StaticSecret::from(*self.0.as_bytes());
        let public = x25519_dalek::PublicKey::from(&secret);
        Ok(PublicKey(public.to_bytes()))
    }

    /// Computes the shared secret between our secret key and the public key of the other party.
    pub fn calculate_agreement(
        &self,
        their_public_key: &PublicKey,
    ) -> Result<[u8; 32], X25519Error> {
        let secret = x25519_dalek::StaticSecret::from(*self.0.as_bytes());
        let public = x25519_dalek::PublicKey::from(their_public_key.0);
        let shared_secret = secret.diffie_hellman(&public);
        if !shared_secret.was_contributory() {
            return Err(X25519Error::NonContributoryKey);
        }
        Ok(shared_secret.to_bytes())
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretKey").field("value", &"***").finish()
    }
}

#[derive(Debug, Error)]
pub enum X25519Error {
    #[error("diffie-hellman with low-order public key")]
    NonContributoryKey,
}
