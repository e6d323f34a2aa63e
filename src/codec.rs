// SPDX-License-Identifier: MIT OR Apache-2.0

//! Size normalisation and double encryption for messages deposited at a storage node.
//!
//! Plaintexts are framed with a length prefix and zero-padded up to the smallest configured
//! bucket, so the storage node observes only a handful of fixed sizes. The padded frame is then
//! encrypted twice with independently derived keys: an inner layer under a one-time pre-key
//! derived key and an outer layer under the long-term shared secret. Compromising either key
//! alone reveals nothing.
//!
//! Which one-time pre-key was spent travels inside the outer layer, invisible to the storage
//! node; the recipient decrypts the outer layer, consumes the pre-key and only then can open
//! the inner layer.
//!
//! The outer envelope carries a sender pseudonym: a one-off tag derived from the shared secret
//! and a fresh nonce. The storage node sees an unlinkable random value; the recipient identifies
//! the sender by re-deriving the tag against each known peer's shared secret. Both fields are
//! bound to the outer AEAD as associated data, so they cannot be swapped in transit.
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::Config;
use crate::cbor::{DecodeError, EncodeError, decode_cbor, encode_cbor};
use crate::crypto::aead::{AeadError, XNONCE_SIZE, xaead_decrypt, xaead_encrypt};
use crate::crypto::{Rng, RngError, SymmetricKey};
use crate::obfuscation::{ObfuscationError, SENDER_NONCE_SIZE, Tag, derive_sender_tag};
use crate::prekey::PreKeyId;

/// Every padded frame starts with the plaintext length.
const LENGTH_PREFIX_SIZE: usize = 4;

/// Inner encryption layer as seen after decrypting the outer one. Names the pre-key the sender
/// spent so the recipient can consume it and derive the matching key.
#[derive(Debug, Serialize, Deserialize)]
pub struct InnerEnvelope {
    pub prekey_id: PreKeyId,
    #[serde(with = "serde_bytes")]
    nonce: [u8; XNONCE_SIZE],
    #[serde(with = "serde_bytes")]
    ciphertext: Vec<u8>,
}

/// Outer encryption layer, the only thing the storage node ever holds.
///
/// The sender pseudonym travels in the clear but is covered by the outer AEAD as associated
/// data.
#[derive(Debug, Serialize, Deserialize)]
struct OuterEnvelope {
    sender_tag: Tag,
    #[serde(with = "serde_bytes")]
    sender_nonce: [u8; SENDER_NONCE_SIZE],
    #[serde(with = "serde_bytes")]
    nonce: [u8; XNONCE_SIZE],
    #[serde(with = "serde_bytes")]
    ciphertext: Vec<u8>,
}

fn sender_aad(tag: &Tag, nonce: &[u8; SENDER_NONCE_SIZE]) -> Vec<u8> {
    let mut aad = Vec::with_capacity(tag.as_bytes().len() + SENDER_NONCE_SIZE);
    aad.extend_from_slice(tag.as_bytes());
    aad.extend_from_slice(nonce);
    aad
}

/// Pads plaintexts into fixed buckets and applies the two encryption layers.
#[derive(Debug, Clone)]
pub struct MessageCodec {
    buckets: Vec<usize>,
}

impl MessageCodec {
    pub fn new(config: &Config) -> Result<Self, CodecError> {
        let buckets = config.padding_buckets.clone();
        let ascending = buckets.windows(2).all(|pair| pair[0] < pair[1]);
        if buckets.is_empty() || !ascending || buckets[0] <= LENGTH_PREFIX_SIZE {
            return Err(CodecError::InvalidBuckets);
        }
        Ok(Self { buckets })
    }

    /// Frames the plaintext into the smallest bucket that fits it.
    ///
    /// Oversized plaintexts are rejected before any cryptographic work.
    pub fn pad(&self, plaintext: &[u8]) -> Result<Vec<u8>, CodecError> {
        let framed_len = LENGTH_PREFIX_SIZE + plaintext.len();
        let bucket = *self
            .buckets
            .iter()
            .find(|bucket| **bucket >= framed_len)
            .ok_or(CodecError::MessageTooLarge(plaintext.len()))?;

        let mut padded = Vec::with_capacity(bucket);
        let length = u32::try_from(plaintext.len())
            .map_err(|_| CodecError::MessageTooLarge(plaintext.len()))?;
        padded.extend_from_slice(&length.to_be_bytes());
        padded.extend_from_slice(plaintext);
        padded.resize(bucket, 0);
        Ok(padded)
    }

    /// Strips the padding frame, validating it byte for byte.
    pub fn unpad(&self, padded: &[u8]) -> Result<Vec<u8>, CodecError> {
        if !self.buckets.contains(&padded.len()) {
            return Err(CodecError::CorruptPadding);
        }

        let (length_bytes, rest) = padded.split_at(LENGTH_PREFIX_SIZE);
        let length = u32::from_be_bytes(
            length_bytes
                .try_into()
                .expect("split yields exactly LENGTH_PREFIX_SIZE bytes"),
        ) as usize;
        if length > rest.len() {
            return Err(CodecError::CorruptPadding);
        }

        let (plaintext, filler) = rest.split_at(length);
        if filler.iter().any(|byte| *byte != 0) {
            return Err(CodecError::CorruptPadding);
        }
        Ok(plaintext.to_vec())
    }

    /// Pads and double-encrypts one message for deposit at the storage node.
    ///
    /// `inner_key` is derived from the spent one-time pre-key, `outer_key` from the long-term
    /// shared secret with the recipient. Each layer uses its own fresh random nonce. The outer
    /// envelope is stamped with a sender pseudonym derived from `outer_key` and a fresh nonce.
    pub fn seal(
        &self,
        plaintext: &[u8],
        prekey_id: PreKeyId,
        inner_key: &SymmetricKey,
        outer_key: &SymmetricKey,
        rng: &Rng,
    ) -> Result<Vec<u8>, CodecError> {
        let padded = self.pad(plaintext)?;

        let inner_nonce: [u8; XNONCE_SIZE] = rng.random_array()?;
        let inner_ciphertext = xaead_encrypt(inner_key, inner_nonce, &padded, &[])?;
        let inner = encode_cbor(&InnerEnvelope {
            prekey_id,
            nonce: inner_nonce,
            ciphertext: inner_ciphertext,
        })?;

        let sender_nonce: [u8; SENDER_NONCE_SIZE] = rng.random_array()?;
        let sender_tag = derive_sender_tag(outer_key, &sender_nonce)?;

        let outer_nonce: [u8; XNONCE_SIZE] = rng.random_array()?;
        let aad = sender_aad(&sender_tag, &sender_nonce);
        let outer_ciphertext = xaead_encrypt(outer_key, outer_nonce, &inner, &aad)?;
        let wire = encode_cbor(&OuterEnvelope {
            sender_tag,
            sender_nonce,
            nonce: outer_nonce,
            ciphertext: outer_ciphertext,
        })?;

        Ok(wire)
    }

    /// Reads the sender pseudonym off the envelope without decrypting anything.
    ///
    /// The recipient matches it to a peer by re-deriving [`derive_sender_tag`] with the
    /// returned nonce against each known shared secret. The fields are only authenticated once
    /// [`open_outer`](Self::open_outer) succeeds with the matched key.
    pub fn peek_sender(
        &self,
        wire: &[u8],
    ) -> Result<(Tag, [u8; SENDER_NONCE_SIZE]), CodecError> {
        let outer: OuterEnvelope = decode_cbor(wire)?;
        Ok((outer.sender_tag, outer.sender_nonce))
    }

    /// Removes the outer layer, exposing which pre-key the sender spent.
    pub fn open_outer(
        &self,
        wire: &[u8],
        outer_key: &SymmetricKey,
    ) -> Result<InnerEnvelope, CodecError> {
        let outer: OuterEnvelope = decode_cbor(wire)?;
        let aad = sender_aad(&outer.sender_tag, &outer.sender_nonce);
        let inner = xaead_decrypt(outer_key, outer.nonce, &outer.ciphertext, &aad)
            .map_err(|_| CodecError::AuthenticationFailure)?;
        Ok(decode_cbor(inner.as_slice())?)
    }

    /// Removes the inner layer and the padding, recovering the plaintext.
    pub fn open_inner(
        &self,
        envelope: &InnerEnvelope,
        inner_key: &SymmetricKey,
    ) -> Result<Vec<u8>, CodecError> {
        let padded = xaead_decrypt(inner_key, envelope.nonce, &envelope.ciphertext, &[])
            .map_err(|_| CodecError::AuthenticationFailure)?;
        self.unpad(&padded)
    }
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error(transparent)]
    Rng(#[from] RngError),

    #[error(transparent)]
    Aead(#[from] AeadError),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Obfuscation(#[from] ObfuscationError),

    #[error("padding buckets must be ascending and larger than the length prefix")]
    InvalidBuckets,

    #[error("message of {0} bytes exceeds the largest padding bucket")]
    MessageTooLarge(usize),

    #[error("padded frame is malformed")]
    CorruptPadding,

    #[error("message failed authentication")]
    AuthenticationFailure,
}
