// SPDX-License-Identifier: MIT OR Apache-2.0

//! Interfaces towards the external collaborators.
//!
//! The core neither retransmits nor retries through these interfaces; timeouts and retry policy
//! belong to the implementations behind them.
use std::error::Error;
use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::crypto::x25519::PublicKey;
use crate::obfuscation::Tag;

/// Delivers handshake and session-encrypted bytes between two endpoints.
///
/// Lost handshake messages are not retransmitted here; a caller-level retry means starting a
/// fresh handshake.
pub trait Transport {
    type Error: Error + Send + Sync + 'static;

    /// Sends an opaque byte sequence to the given peer.
    fn send(
        &self,
        peer: &PublicKey,
        bytes: Vec<u8>,
    ) -> impl Future<Output = Result<(), Self::Error>>;

    /// Awaits the next byte sequence from the given peer.
    fn recv(&self, peer: &PublicKey) -> impl Future<Output = Result<Vec<u8>, Self::Error>>;
}

/// Ciphertext held by the storage node, with an opaque ordering marker so a client can resume
/// retrieval where the previous fetch left off.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub marker: u64,
    #[serde(with = "serde_bytes")]
    pub ciphertext: Vec<u8>,
}

/// Honest-but-curious storage intermediary holding mail for offline recipients.
///
/// The node receives nothing beyond a pseudonymous tag, a bucketed ciphertext size and a coarse
/// epoch timestamp.
pub trait MessageStore {
    type Error: Error + Send + Sync + 'static;

    /// Deposits a padded ciphertext under a recipient tag.
    fn put(
        &self,
        tag: &Tag,
        ciphertext: Vec<u8>,
        epoch: u64,
    ) -> impl Future<Output = Result<(), Self::Error>>;

    /// Returns all messages under the tag with a marker greater than `since`, in marker order.
    fn get(
        &self,
        tag: &Tag,
        since: u64,
    ) -> impl Future<Output = Result<Vec<StoredMessage>, Self::Error>>;
}
