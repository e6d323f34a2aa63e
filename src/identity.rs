// SPDX-License-Identifier: MIT OR Apache-2.0

//! Long-term identity key material.
//!
//! Peers authenticate each other through a static X25519 keypair. The keypair is rotated on a
//! configurable period; the previous keypair is retained during a grace window so traffic
//! encrypted towards the old key can still be decrypted while the new key propagates.
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crypto::x25519::{PublicKey, SecretKey, X25519Error};
use crate::crypto::{Rng, RngError};

/// Long-term X25519 keypair of the local node.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StaticIdentity {
    current: SecretKey,
    current_public: PublicKey,
    rotated_at: u64,
    previous: Option<SecretKey>,
}

impl StaticIdentity {
    /// Generates a fresh identity keypair.
    pub fn generate(rng: &Rng) -> Result<Self, IdentityError> {
        let secret = SecretKey::from_bytes(rng.random_array()?);
        Self::from_secret(secret)
    }

    /// Wraps an externally supplied secret key, for example one loaded from a keystore.
    pub fn from_secret(secret: SecretKey) -> Result<Self, IdentityError> {
        let public = secret.public_key()?;
        Ok(Self {
            current: secret,
            current_public: public,
            rotated_at: unix_now(),
            previous: None,
        })
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.current_public
    }

    pub fn secret_key(&self) -> &SecretKey {
        &self.current
    }

    /// Returns true when the identity is older than the configured rotation period.
    pub fn rotation_due(&self, period: Duration, now: u64) -> bool {
        now.saturating_sub(self.rotated_at) >= period.as_secs()
    }

    /// Replaces the current keypair with a fresh one, keeping the superseded secret for
    /// backward decryption until [`Self::expire_previous`] removes it.
    pub fn rotate(&mut self, rng: &Rng, now: u64) -> Result<(), IdentityError> {
        let next = SecretKey::from_bytes(rng.random_array()?);
        let next_public = next.public_key()?;
        self.previous = Some(std::mem::replace(&mut self.current, next));
        self.current_public = next_public;
        self.rotated_at = now;
        Ok(())
    }

    /// Drops the previous keypair once the grace window has passed.
    pub fn expire_previous(&mut self, grace_window: Duration, now: u64) {
        if self.previous.is_some()
            && now.saturating_sub(self.rotated_at) >= grace_window.as_secs()
        {
            self.previous = None;
        }
    }

    /// All secrets which may still decrypt inbound material: the current key first, then the
    /// previous one while inside the grace window.
    pub fn decryption_secrets(&self) -> impl Iterator<Item = &SecretKey> {
        std::iter::once(&self.current).chain(self.previous.iter())
    }

    /// Computes the Diffie-Hellman shared secret with another peer's static key.
    pub fn shared_secret(&self, their_public: &PublicKey) -> Result<[u8; 32], X25519Error> {
        self.current.calculate_agreement(their_public)
    }
}

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error(transparent)]
    Rng(#[from] RngError),

    #[error(transparent)]
    X25519(#[from] X25519Error),
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time before unix epoch")
        .as_secs()
}
