// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-memory collaborator implementations for tests and examples.
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::sync::mpsc;

use crate::crypto::x25519::PublicKey;
use crate::obfuscation::Tag;
use crate::traits::{MessageStore, StoredMessage, Transport};

#[derive(Debug, Default)]
struct MemoryStoreInner {
    mailboxes: HashMap<Tag, Vec<StoredMessage>>,
    next_marker: u64,
    queries: Vec<(Tag, u64)>,
}

/// [`MessageStore`] backed by a shared in-memory map. Clones observe the same state.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryStoreInner>>,
}

impl MemoryStore {
    /// Deposits a ciphertext directly, bypassing the `put` future.
    pub fn insert(&self, tag: &Tag, ciphertext: Vec<u8>) {
        let mut inner = self.inner.lock().expect("memory store lock");
        inner.next_marker += 1;
        let marker = inner.next_marker;
        inner
            .mailboxes
            .entry(*tag)
            .or_default()
            .push(StoredMessage { marker, ciphertext });
    }

    /// Every tag `get` was called with, in call order.
    pub fn queried_tags(&self) -> Vec<Tag> {
        self.queries().into_iter().map(|(tag, _)| tag).collect()
    }

    /// Every `(tag, since)` pair `get` was called with, in call order: exactly what a curious
    /// storage node observes about the polling client.
    pub fn queries(&self) -> Vec<(Tag, u64)> {
        self.inner.lock().expect("memory store lock").queries.clone()
    }

    /// Sizes of all ciphertexts currently held, regardless of tag.
    pub fn stored_sizes(&self) -> Vec<usize> {
        let inner = self.inner.lock().expect("memory store lock");
        inner
            .mailboxes
            .values()
            .flatten()
            .map(|message| message.ciphertext.len())
            .collect()
    }
}

impl MessageStore for MemoryStore {
    type Error = std::convert::Infallible;

    async fn put(&self, tag: &Tag, ciphertext: Vec<u8>, _epoch: u64) -> Result<(), Self::Error> {
        self.insert(tag, ciphertext);
        Ok(())
    }

    async fn get(&self, tag: &Tag, since: u64) -> Result<Vec<StoredMessage>, Self::Error> {
        let mut inner = self.inner.lock().expect("memory store lock");
        inner.queries.push((*tag, since));
        let messages = inner
            .mailboxes
            .get(tag)
            .map(|mailbox| {
                mailbox
                    .iter()
                    .filter(|message| message.marker > since)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(messages)
    }
}

/// [`Transport`] connecting two endpoints over in-memory channels.
#[derive(Debug)]
pub struct MemoryTransport {
    outgoing: HashMap<PublicKey, mpsc::UnboundedSender<Vec<u8>>>,
    incoming: HashMap<PublicKey, tokio::sync::Mutex<mpsc::UnboundedReceiver<Vec<u8>>>>,
}

impl MemoryTransport {
    /// Two connected endpoints: what the first sends to `b`, the second receives from `a`, and
    /// vice versa.
    pub fn pair(a: PublicKey, b: PublicKey) -> (Self, Self) {
        let (a_to_b_tx, a_to_b_rx) = mpsc::unbounded_channel();
        let (b_to_a_tx, b_to_a_rx) = mpsc::unbounded_channel();

        let endpoint_a = Self {
            outgoing: HashMap::from([(b, a_to_b_tx)]),
            incoming: HashMap::from([(b, tokio::sync::Mutex::new(b_to_a_rx))]),
        };
        let endpoint_b = Self {
            outgoing: HashMap::from([(a, b_to_a_tx)]),
            incoming: HashMap::from([(a, tokio::sync::Mutex::new(a_to_b_rx))]),
        };

        (endpoint_a, endpoint_b)
    }
}

impl Transport for MemoryTransport {
    type Error = MemoryTransportError;

    async fn send(&self, peer: &PublicKey, bytes: Vec<u8>) -> Result<(), Self::Error> {
        self.outgoing
            .get(peer)
            .ok_or(MemoryTransportError::UnknownPeer)?
            .send(bytes)
            .map_err(|_| MemoryTransportError::Closed)
    }

    async fn recv(&self, peer: &PublicKey) -> Result<Vec<u8>, Self::Error> {
        let mut receiver = self
            .incoming
            .get(peer)
            .ok_or(MemoryTransportError::UnknownPeer)?
            .lock()
            .await;
        receiver.recv().await.ok_or(MemoryTransportError::Closed)
    }
}

#[derive(Debug, Error)]
pub enum MemoryTransportError {
    #[error("no channel to this peer")]
    UnknownPeer,

    #[error("peer endpoint was dropped")]
    Closed,
}
