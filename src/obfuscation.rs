// SPDX-License-Identifier: MIT OR Apache-2.0

//! Pseudonymous tags replacing real identities at the storage boundary.
//!
//! Recipient tags are derived from a shared secret and the current epoch: stable within one
//! epoch so a storage node can bucket undelivered mail, unlinkable across epoch boundaries.
//! Sender tags mix in a fresh random nonce instead and never repeat.
//!
//! Epochs are computed lazily from the wall clock; no rotation task exists.
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crypto::hkdf::{HkdfError, hkdf};
use crate::crypto::{Rng, RngError, SymmetricKey};

pub const TAG_SIZE: usize = 32;

pub const SENDER_NONCE_SIZE: usize = 16;

const RECIPIENT_TAG_INFO: &[u8] = b"deaddrop/tag-recipient/v1";

const SENDER_TAG_INFO: &[u8] = b"deaddrop/tag-sender/v1";

/// Pseudonymous identifier presented to the storage node in place of an identity.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Tag(#[serde(with = "serde_bytes")] [u8; TAG_SIZE]);

impl Tag {
    pub fn from_bytes(bytes: [u8; TAG_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; TAG_SIZE] {
        &self.0
    }

    pub fn to_hex(self) -> String {
        hex::encode(self.0)
    }

    /// Uniformly random tag, indistinguishable from a derived one. Used for cover traffic.
    pub fn random(rng: &Rng) -> Result<Self, ObfuscationError> {
        Ok(Self(rng.random_array()?))
    }
}

impl fmt::Debug for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tag({})", self.to_hex())
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Epoch containing the given unix timestamp.
pub fn epoch_at(now: u64, epoch_duration: Duration) -> u64 {
    now / epoch_duration.as_secs().max(1)
}

/// Derives the recipient tag for one epoch.
///
/// Deterministic for a fixed (secret, epoch) pair; changes at every epoch boundary.
pub fn derive_recipient_tag(
    shared_secret: &SymmetricKey,
    epoch: u64,
) -> Result<Tag, ObfuscationError> {
    let mut info = Vec::with_capacity(RECIPIENT_TAG_INFO.len() + 8);
    info.extend_from_slice(RECIPIENT_TAG_INFO);
    info.extend_from_slice(&epoch.to_be_bytes());
    let tag: [u8; TAG_SIZE] = hkdf(None, shared_secret.as_bytes(), &info)?;
    Ok(Tag(tag))
}

/// Derives a sender tag from a fresh nonce, unlinkable across messages.
pub fn derive_sender_tag(
    shared_secret: &SymmetricKey,
    nonce: &[u8; SENDER_NONCE_SIZE],
) -> Result<Tag, ObfuscationError> {
    let mut info = Vec::with_capacity(SENDER_TAG_INFO.len() + SENDER_NONCE_SIZE);
    info.extend_from_slice(SENDER_TAG_INFO);
    info.extend_from_slice(nonce);
    let tag: [u8; TAG_SIZE] = hkdf(None, shared_secret.as_bytes(), &info)?;
    Ok(Tag(tag))
}

#[derive(Debug, Error)]
pub enum ObfuscationError {
    #[error(transparent)]
    Rng(#[from] RngError),

    #[error(transparent)]
    Hkdf(#[from] HkdfError),
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::time::Duration;

    use crate::crypto::{Rng, SymmetricKey};

    use super::{derive_recipient_tag, derive_sender_tag, epoch_at};

    #[test]
    fn epochs_follow_the_clock() {
        let hour = Duration::from_secs(3600);
        assert_eq!(epoch_at(0, hour), 0);
        assert_eq!(epoch_at(3599, hour), 0);
        assert_eq!(epoch_at(3600, hour), 1);
        assert_eq!(epoch_at(7200, hour), 2);
    }

    #[test]
    fn recipient_tags_are_stable_within_an_epoch_and_rotate_across() {
        let rng = Rng::from_seed([1; 32]);
        let shared = SymmetricKey::from_bytes(rng.random_array().unwrap());

        assert_eq!(
            derive_recipient_tag(&shared, 42).unwrap(),
            derive_recipient_tag(&shared, 42).unwrap()
        );

        // Distinct across many epoch values.
        let tags: HashSet<_> = (0..512)
            .map(|epoch| derive_recipient_tag(&shared, epoch).unwrap())
            .collect();
        assert_eq!(tags.len(), 512);
    }

    #[test]
    fn recipient_tags_differ_between_secrets() {
        let rng = Rng::from_seed([2; 32]);
        let shared_a = SymmetricKey::from_bytes(rng.random_array().unwrap());
        let shared_b = SymmetricKey::from_bytes(rng.random_array().unwrap());

        assert_ne!(
            derive_recipient_tag(&shared_a, 7).unwrap(),
            derive_recipient_tag(&shared_b, 7).unwrap()
        );
    }

    #[test]
    fn sender_tags_never_link_across_nonces() {
        let rng = Rng::from_seed([3; 32]);
        let shared = SymmetricKey::from_bytes(rng.random_array().unwrap());

        let tags: HashSet<_> = (0..512)
            .map(|_| {
                let nonce = rng.random_array().unwrap();
                derive_sender_tag(&shared, &nonce).unwrap()
            })
            .collect();
        assert_eq!(tags.len(), 512);
    }
}
