// SPDX-License-Identifier: MIT OR Apache-2.0

//! One-time pre-keys for forward-secure messaging towards offline peers.
//!
//! The store holds two pools per peer: our own published pre-key pairs (the secret halves stay
//! here, the public halves are handed out for publication) and the stock of the peer's published
//! public pre-keys we may still spend when sending. Every key is used at most once in either
//! direction. When a pool falls below the configured low-water mark a replenishment signal is
//! emitted so the caller can publish or request a fresh batch.
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::Config;
use crate::crypto::hkdf::{HkdfError, hkdf};
use crate::crypto::x25519::{PublicKey, SecretKey, X25519Error};
use crate::crypto::{Rng, RngError, SymmetricKey};

const FORWARD_KEY_INFO: &[u8] = b"deaddrop/prekey-forward/v1";

/// Identifier of a one-time pre-key, unique per peer.
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct PreKeyId(u64);

impl PreKeyId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for PreKeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Public half of a one-time pre-key, as published to (or received from) a peer.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicPreKey {
    pub id: PreKeyId,
    pub key: PublicKey,
}

#[derive(Debug)]
struct LocalPreKey {
    secret: SecretKey,
    used: bool,
}

/// Our published pre-keys for one peer, ordered by identifier.
#[derive(Debug, Default)]
struct LocalBundle {
    keys: BTreeMap<PreKeyId, LocalPreKey>,
    next_id: u64,
}

impl LocalBundle {
    fn remaining(&self) -> usize {
        self.keys.values().filter(|key| !key.used).count()
    }
}

#[derive(Debug, Default)]
struct PeerPools {
    local: LocalBundle,
    /// The peer's published public pre-keys we have not spent yet, in publication order.
    remote: VecDeque<PublicPreKey>,
}

/// Manages one-time pre-key pools per peer.
///
/// All operations lock internally; `consume` in particular is a single check-and-mark so two
/// concurrent decrypt attempts can never both succeed against the same key.
#[derive(Debug)]
pub struct PreKeyStore {
    pools: Mutex<HashMap<PublicKey, PeerPools>>,
    batch_size: usize,
    low_water_mark: usize,
    replenish_tx: mpsc::UnboundedSender<PublicKey>,
}

impl PreKeyStore {
    /// Returns the store together with the receiving end of the replenishment signal. A peer key
    /// arriving on the channel means one of that peer's pools dropped below the low-water mark.
    pub fn new(config: &Config) -> (Self, mpsc::UnboundedReceiver<PublicKey>) {
        let (replenish_tx, replenish_rx) = mpsc::unbounded_channel();
        (
            Self {
                pools: Mutex::new(HashMap::new()),
                batch_size: config.prekey_batch_size,
                low_water_mark: config.prekey_low_water_mark,
                replenish_tx,
            },
            replenish_rx,
        )
    }

    /// Generates a fresh batch of one-time key pairs for the given peer and returns the public
    /// halves for publication. The secret halves stay in the store until consumed.
    pub fn generate_batch(
        &self,
        peer: &PublicKey,
        rng: &Rng,
    ) -> Result<Vec<PublicPreKey>, PreKeyError> {
        let mut batch = Vec::with_capacity(self.batch_size);
        let mut pools = self.pools.lock().map_err(|_| PreKeyError::LockPoisoned)?;
        let bundle = &mut pools.entry(*peer).or_default().local;

        for _ in 0..self.batch_size {
            let secret = SecretKey::from_bytes(rng.random_array()?);
            let id = PreKeyId(bundle.next_id);
            bundle.next_id += 1;
            batch.push(PublicPreKey {
                id,
                key: secret.public_key()?,
            });
            bundle.keys.insert(id, LocalPreKey {
                secret,
                used: false,
            });
        }

        debug!(%peer, count = batch.len(), "generated one-time pre-key batch");

        Ok(batch)
    }

    /// Atomically checks and marks one of our pre-keys as used, returning its secret half.
    ///
    /// A key that was already consumed, or was never issued, is rejected; the caller treats this
    /// as a replayed message.
    pub fn consume(&self, peer: &PublicKey, id: PreKeyId) -> Result<SecretKey, PreKeyError> {
        let mut pools = self.pools.lock().map_err(|_| PreKeyError::LockPoisoned)?;
        let bundle = &mut pools
            .get_mut(peer)
            .ok_or(PreKeyError::UnknownKey(id))?
            .local;
        let prekey = bundle.keys.get_mut(&id).ok_or(PreKeyError::UnknownKey(id))?;

        if prekey.used {
            return Err(PreKeyError::AlreadyConsumed(id));
        }
        prekey.used = true;
        let secret = prekey.secret.clone();

        let remaining = bundle.remaining();
        drop(pools);
        self.signal_if_low(peer, remaining);

        Ok(secret)
    }

    /// Registers a batch of the peer's published pre-keys for later sending.
    pub fn register_remote(
        &self,
        peer: &PublicKey,
        keys: Vec<PublicPreKey>,
    ) -> Result<(), PreKeyError> {
        let mut pools = self.pools.lock().map_err(|_| PreKeyError::LockPoisoned)?;
        pools.entry(*peer).or_default().remote.extend(keys);
        Ok(())
    }

    /// Takes the next unspent published pre-key of the peer for a forward-secure send.
    ///
    /// Fails when the pool is exhausted; the caller must fall back (queue the message or use a
    /// live session).
    pub fn take_remote(&self, peer: &PublicKey) -> Result<PublicPreKey, PreKeyError> {
        let mut pools = self.pools.lock().map_err(|_| PreKeyError::LockPoisoned)?;
        let pool = &mut pools
            .get_mut(peer)
            .ok_or(PreKeyError::NoPreKeysAvailable)?
            .remote;
        let prekey = pool.pop_front().ok_or(PreKeyError::NoPreKeysAvailable)?;

        let remaining = pool.len();
        drop(pools);
        self.signal_if_low(peer, remaining);

        Ok(prekey)
    }

    /// Number of unused keys in our published pool for the peer.
    pub fn remaining(&self, peer: &PublicKey) -> Result<usize, PreKeyError> {
        let pools = self.pools.lock().map_err(|_| PreKeyError::LockPoisoned)?;
        Ok(pools.get(peer).map(|p| p.local.remaining()).unwrap_or(0))
    }

    /// Number of the peer's published keys we can still spend.
    pub fn remote_remaining(&self, peer: &PublicKey) -> Result<usize, PreKeyError> {
        let pools = self.pools.lock().map_err(|_| PreKeyError::LockPoisoned)?;
        Ok(pools.get(peer).map(|p| p.remote.len()).unwrap_or(0))
    }

    fn signal_if_low(&self, peer: &PublicKey, remaining: usize) {
        if remaining < self.low_water_mark {
            warn!(%peer, remaining, "pre-key pool below low-water mark");
            // Receiver may be gone during shutdown.
            let _ = self.replenish_tx.send(*peer);
        }
    }
}

/// Derives the inner-layer encryption key from a pre-key agreement.
///
/// The sender computes the agreement between their static secret and the spent pre-key's public
/// half; the recipient computes it between the consumed pre-key secret and the sender's static
/// public key. Both arrive at the same key, bound to the pre-key identifier.
pub fn forward_secret_key(
    agreement: &[u8; 32],
    id: PreKeyId,
) -> Result<SymmetricKey, PreKeyError> {
    let mut info = Vec::with_capacity(FORWARD_KEY_INFO.len() + 8);
    info.extend_from_slice(FORWARD_KEY_INFO);
    info.extend_from_slice(&id.as_u64().to_be_bytes());
    let key: [u8; 32] = hkdf(None, agreement, &info)?;
    Ok(SymmetricKey::from_bytes(key))
}

#[derive(Debug, Error)]
pub enum PreKeyError {
    #[error(transparent)]
    Rng(#[from] RngError),

    #[error(transparent)]
    X25519(#[from] X25519Error),

    #[error(transparent)]
    Hkdf(#[from] HkdfError),

    #[error("one-time pre-key {0} was already consumed")]
    AlreadyConsumed(PreKeyId),

    #[error("unknown one-time pre-key {0}")]
    UnknownKey(PreKeyId),

    #[error("no unused pre-keys available for peer")]
    NoPreKeysAvailable,

    #[error("pre-key store lock poisoned")]
    LockPoisoned,
}
