// SPDX-License-Identifier: MIT OR Apache-2.0

//! Two-message authenticated key exchange between an initiator and a responder.
//!
//! The pattern follows the IK shape: the initiator already knows the responder's static public
//! key and authenticates itself in the first message. Authentication is derived from
//! Diffie-Hellman combinations of static and ephemeral keys, which gives resistance against key
//! compromise impersonation: learning one party's long-term secret later does not allow forging
//! a handshake *towards* that party.
//!
//! Both sides maintain a running transcript hash and a chaining key. Every public key and
//! ciphertext is mixed into the transcript, so the final key material is bound to the complete
//! exchange. After the second message the chaining key is split into two independent directional
//! cipher keys.
//!
//! A handshake state is single-use: it is consumed by every transition and dropped on completion
//! or failure. There are no internal retries; a caller needing another attempt initialises a
//! fresh state.
use std::collections::HashMap;
use std::time::Duration;

use thiserror::Error;

use crate::crypto::aead::{AEAD_TAG_SIZE, AeadError, aead_decrypt, aead_encrypt};
use crate::crypto::hkdf::{HkdfError, hkdf};
use crate::crypto::sha2::sha2_256;
use crate::crypto::x25519::{PUBLIC_KEY_SIZE, PublicKey, SecretKey, X25519Error};
use crate::crypto::{Rng, RngError, SymmetricKey};

/// Domain separation for the transcript hash and all derived keys.
const PROTOCOL_NAME: &[u8] = b"deaddrop/x25519-chacha20poly1305-sha256/v1";

const HKDF_CHAIN_INFO: &[u8] = b"deaddrop/handshake-chain/v1";

const HKDF_SPLIT_INFO: &[u8] = b"deaddrop/handshake-split/v1";

/// Minimum size of the first wire message: ephemeral key, encrypted static key and the
/// authentication tag of an (empty) payload.
const MESSAGE_1_MIN_SIZE: usize = PUBLIC_KEY_SIZE + PUBLIC_KEY_SIZE + AEAD_TAG_SIZE * 2;

/// Minimum size of the second wire message: ephemeral key and the authentication tag of an
/// (empty) payload.
const MESSAGE_2_MIN_SIZE: usize = PUBLIC_KEY_SIZE + AEAD_TAG_SIZE;

/// Role of a party in the two-message exchange.
///
/// The allowed transitions are a function of the role; each role carries its own order of
/// `write_message` and `read_message` calls and any deviation fails with
/// [`HandshakeError::IllegalTransition`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Role {
    /// Sends the first message. Must know the responder's static public key in advance.
    Initiator,

    /// Awaits the first message and answers with the second.
    Responder,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Step {
    /// Initiator: may write message 1. Responder: may read message 1.
    Ready,

    /// Initiator only: message 1 sent, awaiting message 2.
    AwaitingResponse,

    /// Responder only: message 1 accepted, may write message 2.
    Responding,
}

/// Handshake methods, exposed as pure functions over a consumed-and-returned state.
#[derive(Debug)]
pub struct Handshake;

/// Transient handshake state. Destroyed on completion or failure, never reused.
#[derive(Debug)]
pub struct HandshakeState {
    role: Role,
    step: Step,
    symmetric: SymmetricState,
    local_static: SecretKey,
    local_static_public: PublicKey,
    local_ephemeral: SecretKey,
    local_ephemeral_public: PublicKey,
    remote_static: Option<PublicKey>,
    remote_ephemeral: Option<PublicKey>,
}

/// Outcome of a handshake transition: either more messages are expected or the exchange is
/// complete and the transport keys are ready.
#[derive(Debug)]
pub enum HandshakeOutput {
    Pending(HandshakeState),
    Complete(CompletedHandshake),
}

/// Final result of a completed handshake.
#[derive(Debug)]
pub struct CompletedHandshake {
    sending: SymmetricKey,
    receiving: SymmetricKey,
    remote_static: PublicKey,
}

impl CompletedHandshake {
    /// Key for encrypting traffic towards the remote peer.
    pub fn sending(&self) -> &SymmetricKey {
        &self.sending
    }

    /// Key for decrypting traffic from the remote peer.
    pub fn receiving(&self) -> &SymmetricKey {
        &self.receiving
    }

    /// Authenticated static public key of the remote peer. On the responder side this is
    /// learned from the first message.
    pub fn remote_static(&self) -> &PublicKey {
        &self.remote_static
    }

    /// Consumes the result into its directional keys and the remote identity.
    pub fn into_parts(self) -> (SymmetricKey, SymmetricKey, PublicKey) {
        (self.sending, self.receiving, self.remote_static)
    }
}

impl Handshake {
    /// Initialises handshake state for the given role.
    ///
    /// The initiator must supply the responder's static public key; the responder learns the
    /// initiator's static key from the first message.
    pub fn init(
        role: Role,
        local_static: &SecretKey,
        remote_static: Option<PublicKey>,
        rng: &Rng,
    ) -> Result<HandshakeState, HandshakeError> {
        let local_static_public = local_static.public_key()?;

        let mut symmetric = SymmetricState::init();
        match role {
            Role::Initiator => {
                let remote_static = remote_static.ok_or(HandshakeError::MissingRemoteStatic)?;
                // Pre-message: the responder's static key is part of the transcript on both
                // sides even though it never travels on the wire.
                symmetric.mix_hash(remote_static.as_bytes());
            }
            Role::Responder => {
                symmetric.mix_hash(local_static_public.as_bytes());
            }
        }

        let local_ephemeral = SecretKey::from_bytes(rng.random_array()?);
        let local_ephemeral_public = local_ephemeral.public_key()?;

        Ok(HandshakeState {
            role,
            step: Step::Ready,
            symmetric,
            local_static: local_static.clone(),
            local_static_public,
            local_ephemeral,
            local_ephemeral_public,
            remote_static: match role {
                Role::Initiator => remote_static,
                Role::Responder => None,
            },
            remote_ephemeral: None,
        })
    }

    /// Produces the next wire message for this role, carrying an optional payload.
    ///
    /// Valid only at the step matching the state's role; any other call fails with
    /// [`HandshakeError::IllegalTransition`] and consumes the state.
    pub fn write_message(
        y: HandshakeState,
        payload: &[u8],
    ) -> Result<(HandshakeOutput, Vec<u8>), HandshakeError> {
        match (y.role, y.step) {
            (Role::Initiator, Step::Ready) => Self::write_message_1(y, payload),
            (Role::Responder, Step::Responding) => Self::write_message_2(y, payload),
            _ => Err(HandshakeError::IllegalTransition),
        }
    }

    /// Consumes the next wire message for this role, returning the embedded payload.
    ///
    /// An authentication failure aborts the handshake; no partial state is retained.
    pub fn read_message(
        y: HandshakeState,
        wire: &[u8],
    ) -> Result<(HandshakeOutput, Vec<u8>), HandshakeError> {
        match (y.role, y.step) {
            (Role::Responder, Step::Ready) => Self::read_message_1(y, wire),
            (Role::Initiator, Step::AwaitingResponse) => Self::read_message_2(y, wire),
            _ => Err(HandshakeError::IllegalTransition),
        }
    }
}

// Per-message transitions.

impl Handshake {
    /// Initiator -> responder: ephemeral key, encrypted initiator static key, encrypted payload.
    fn write_message_1(
        mut y: HandshakeState,
        payload: &[u8],
    ) -> Result<(HandshakeOutput, Vec<u8>), HandshakeError> {
        let remote_static = y
            .remote_static
            .expect("initiator state always holds the remote static key");

        let mut wire = Vec::with_capacity(MESSAGE_1_MIN_SIZE + payload.len());

        y.symmetric.mix_hash(y.local_ephemeral_public.as_bytes());
        wire.extend_from_slice(y.local_ephemeral_public.as_bytes());

        let es = y.local_ephemeral.calculate_agreement(&remote_static)?;
        y.symmetric.mix_key(&es)?;
        let encrypted_static = y
            .symmetric
            .encrypt_and_hash(y.local_static_public.as_bytes())?;
        wire.extend_from_slice(&encrypted_static);

        let ss = y.local_static.calculate_agreement(&remote_static)?;
        y.symmetric.mix_key(&ss)?;
        let encrypted_payload = y.symmetric.encrypt_and_hash(payload)?;
        wire.extend_from_slice(&encrypted_payload);

        y.step = Step::AwaitingResponse;

        Ok((HandshakeOutput::Pending(y), wire))
    }

    fn read_message_1(
        mut y: HandshakeState,
        wire: &[u8],
    ) -> Result<(HandshakeOutput, Vec<u8>), HandshakeError> {
        if wire.len() < MESSAGE_1_MIN_SIZE {
            return Err(HandshakeError::MalformedMessage);
        }

        let (ephemeral_bytes, rest) = wire.split_at(PUBLIC_KEY_SIZE);
        let (encrypted_static, encrypted_payload) =
            rest.split_at(PUBLIC_KEY_SIZE + AEAD_TAG_SIZE);

        let remote_ephemeral = PublicKey::from_bytes(
            ephemeral_bytes
                .try_into()
                .expect("split yields exactly PUBLIC_KEY_SIZE bytes"),
        );
        y.symmetric.mix_hash(remote_ephemeral.as_bytes());

        let es = y.local_static.calculate_agreement(&remote_ephemeral)?;
        y.symmetric.mix_key(&es)?;
        let static_bytes = y.symmetric.decrypt_and_hash(encrypted_static)?;
        let remote_static = PublicKey::from_bytes(
            static_bytes
                .try_into()
                .map_err(|_| HandshakeError::MalformedMessage)?,
        );

        let ss = y.local_static.calculate_agreement(&remote_static)?;
        y.symmetric.mix_key(&ss)?;
        let payload = y.symmetric.decrypt_and_hash(encrypted_payload)?;

        y.remote_ephemeral = Some(remote_ephemeral);
        y.remote_static = Some(remote_static);
        y.step = Step::Responding;

        Ok((HandshakeOutput::Pending(y), payload))
    }

    /// Responder -> initiator: ephemeral key and encrypted payload; completes the handshake.
    fn write_message_2(
        mut y: HandshakeState,
        payload: &[u8],
    ) -> Result<(HandshakeOutput, Vec<u8>), HandshakeError> {
        let remote_ephemeral = y
            .remote_ephemeral
            .expect("responder accepted message 1 before responding");
        let remote_static = y
            .remote_static
            .expect("responder accepted message 1 before responding");

        let mut wire = Vec::with_capacity(MESSAGE_2_MIN_SIZE + payload.len());

        y.symmetric.mix_hash(y.local_ephemeral_public.as_bytes());
        wire.extend_from_slice(y.local_ephemeral_public.as_bytes());

        let ee = y.local_ephemeral.calculate_agreement(&remote_ephemeral)?;
        y.symmetric.mix_key(&ee)?;

        let se = y.local_ephemeral.calculate_agreement(&remote_static)?;
        y.symmetric.mix_key(&se)?;

        let encrypted_payload = y.symmetric.encrypt_and_hash(payload)?;
        wire.extend_from_slice(&encrypted_payload);

        let (initiator_key, responder_key) = y.symmetric.split()?;

        Ok((
            HandshakeOutput::Complete(CompletedHandshake {
                sending: responder_key,
                receiving: initiator_key,
                remote_static,
            }),
            wire,
        ))
    }

    fn read_message_2(
        mut y: HandshakeState,
        wire: &[u8],
    ) -> Result<(HandshakeOutput, Vec<u8>), HandshakeError> {
        if wire.len() < MESSAGE_2_MIN_SIZE {
            return Err(HandshakeError::MalformedMessage);
        }

        let (ephemeral_bytes, encrypted_payload) = wire.split_at(PUBLIC_KEY_SIZE);
        let remote_ephemeral = PublicKey::from_bytes(
            ephemeral_bytes
                .try_into()
                .expect("split yields exactly PUBLIC_KEY_SIZE bytes"),
        );
        y.symmetric.mix_hash(remote_ephemeral.as_bytes());

        let ee = y.local_ephemeral.calculate_agreement(&remote_ephemeral)?;
        y.symmetric.mix_key(&ee)?;

        let se = y.local_static.calculate_agreement(&remote_ephemeral)?;
        y.symmetric.mix_key(&se)?;

        let payload = y.symmetric.decrypt_and_hash(encrypted_payload)?;

        let (initiator_key, responder_key) = y.symmetric.split()?;
        let remote_static = y
            .remote_static
            .expect("initiator state always holds the remote static key");

        Ok((
            HandshakeOutput::Complete(CompletedHandshake {
                sending: initiator_key,
                receiving: responder_key,
                remote_static,
            }),
            payload,
        ))
    }
}

/// Transcript hash and chaining key shared by both parties.
///
/// Every mixed key resets the AEAD nonce counter; every ciphertext and public key is absorbed
/// into the transcript hash which doubles as associated data for the next encryption.
#[derive(Debug)]
struct SymmetricState {
    hash: [u8; 32],
    chaining_key: SymmetricKey,
    key: Option<SymmetricKey>,
    nonce: u64,
}

impl SymmetricState {
    fn init() -> Self {
        let hash = sha2_256(&[PROTOCOL_NAME]);
        Self {
            hash,
            chaining_key: SymmetricKey::from_bytes(hash),
            key: None,
            nonce: 0,
        }
    }

    fn mix_hash(&mut self, data: &[u8]) {
        self.hash = sha2_256(&[&self.hash, data]);
    }

    fn mix_key(&mut self, input_key_material: &[u8]) -> Result<(), HandshakeError> {
        let okm: [u8; 64] = hkdf(
            Some(self.chaining_key.as_bytes()),
            input_key_material,
            HKDF_CHAIN_INFO,
        )?;
        let (chain, key) = okm.split_at(32);
        self.chaining_key =
            SymmetricKey::from_bytes(chain.try_into().expect("split yields 32 bytes"));
        self.key = Some(SymmetricKey::from_bytes(
            key.try_into().expect("split yields 32 bytes"),
        ));
        self.nonce = 0;
        Ok(())
    }

    fn encrypt_and_hash(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, HandshakeError> {
        let nonce = self.next_nonce();
        let key = self
            .key
            .as_ref()
            .expect("all handshake encryptions happen after a key mix");
        let ciphertext = aead_encrypt(key, nonce, plaintext, &self.hash)?;
        self.mix_hash(&ciphertext);
        Ok(ciphertext)
    }

    fn decrypt_and_hash(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, HandshakeError> {
        let nonce = self.next_nonce();
        let key = self
            .key
            .as_ref()
            .expect("all handshake decryptions happen after a key mix");
        let plaintext = aead_decrypt(key, nonce, ciphertext, &self.hash)
            .map_err(|_| HandshakeError::AuthenticationFailure)?;
        self.mix_hash(ciphertext);
        Ok(plaintext)
    }

    fn next_nonce(&mut self) -> [u8; 12] {
        let mut nonce = [0u8; 12];
        nonce[4..].copy_from_slice(&self.nonce.to_be_bytes());
        self.nonce += 1;
        nonce
    }

    /// Splits the final chaining key into the initiator-to-responder and
    /// responder-to-initiator transport keys.
    fn split(self) -> Result<(SymmetricKey, SymmetricKey), HandshakeError> {
        let okm: [u8; 64] = hkdf(Some(self.chaining_key.as_bytes()), &[], HKDF_SPLIT_INFO)?;
        let (initiator, responder) = okm.split_at(32);
        Ok((
            SymmetricKey::from_bytes(initiator.try_into().expect("split yields 32 bytes")),
            SymmetricKey::from_bytes(responder.try_into().expect("split yields 32 bytes")),
        ))
    }
}

/// Bounded cache rejecting replayed handshake first-messages.
///
/// The responder remembers the hash of every accepted first message inside a time horizon. A
/// message seen twice is rejected before any session state is created.
#[derive(Debug)]
pub struct HandshakeReplayCache {
    horizon: Duration,
    seen: HashMap<[u8; 32], u64>,
}

impl HandshakeReplayCache {
    pub fn new(horizon: Duration) -> Self {
        Self {
            horizon,
            seen: HashMap::new(),
        }
    }

    /// Records the message, failing if it was already seen inside the horizon.
    pub fn check_and_insert(&mut self, message: &[u8], now: u64) -> Result<(), HandshakeError> {
        let horizon = self.horizon.as_secs();
        self.seen
            .retain(|_, seen_at| now.saturating_sub(*seen_at) < horizon);

        let digest = sha2_256(&[message]);
        if self.seen.contains_key(&digest) {
            return Err(HandshakeError::ReplayDetected);
        }
        self.seen.insert(digest, now);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error(transparent)]
    Rng(#[from] RngError),

    #[error(transparent)]
    X25519(#[from] X25519Error),

    #[error(transparent)]
    Hkdf(#[from] HkdfError),

    #[error(transparent)]
    Aead(#[from] AeadError),

    #[error("handshake message out of order for this role")]
    IllegalTransition,

    #[error("handshake message failed authentication")]
    AuthenticationFailure,

    #[error("handshake message is truncated or malformed")]
    MalformedMessage,

    #[error("initiator requires the responder's static public key")]
    MissingRemoteStatic,

    #[error("handshake first message was replayed")]
    ReplayDetected,
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use assert_matches::assert_matches;

    use crate::crypto::Rng;
    use crate::crypto::aead::{aead_decrypt, aead_encrypt};
    use crate::crypto::x25519::SecretKey;

    use super::{
        CompletedHandshake, Handshake, HandshakeError, HandshakeOutput, HandshakeReplayCache,
        Role,
    };

    fn complete_handshake(rng: &Rng) -> (CompletedHandshake, CompletedHandshake) {
        let alice_static = SecretKey::from_bytes(rng.random_array().unwrap());
        let bob_static = SecretKey::from_bytes(rng.random_array().unwrap());

        let alice = Handshake::init(
            Role::Initiator,
            &alice_static,
            Some(bob_static.public_key().unwrap()),
            rng,
        )
        .unwrap();
        let bob = Handshake::init(Role::Responder, &bob_static, None, rng).unwrap();

        let (alice, message_1) = match Handshake::write_message(alice, &[]).unwrap() {
            (HandshakeOutput::Pending(y), wire) => (y, wire),
            _ => panic!("initiator is pending after message 1"),
        };
        let (bob, _) = match Handshake::read_message(bob, &message_1).unwrap() {
            (HandshakeOutput::Pending(y), payload) => (y, payload),
            _ => panic!("responder is pending after message 1"),
        };
        let (bob_complete, message_2) = match Handshake::write_message(bob, &[]).unwrap() {
            (HandshakeOutput::Complete(keys), wire) => (keys, wire),
            _ => panic!("responder completes with message 2"),
        };
        let (alice_complete, _) = match Handshake::read_message(alice, &message_2).unwrap() {
            (HandshakeOutput::Complete(keys), payload) => (keys, payload),
            _ => panic!("initiator completes after message 2"),
        };

        (alice_complete, bob_complete)
    }

    #[test]
    fn complete_handshake_derives_matching_directional_keys() {
        let rng = Rng::from_seed([1; 32]);
        let (alice, bob) = complete_handshake(&rng);

        assert_eq!(alice.sending(), bob.receiving());
        assert_eq!(alice.receiving(), bob.sending());
        assert_ne!(alice.sending(), alice.receiving());

        // The derived keys round-trip traffic in both directions.
        let to_bob = aead_encrypt(alice.sending(), [0; 12], b"hi bob", &[]).unwrap();
        assert_eq!(
            aead_decrypt(bob.receiving(), [0; 12], &to_bob, &[]).unwrap(),
            b"hi bob"
        );

        let to_alice = aead_encrypt(bob.sending(), [0; 12], b"hi alice", &[]).unwrap();
        assert_eq!(
            aead_decrypt(alice.receiving(), [0; 12], &to_alice, &[]).unwrap(),
            b"hi alice"
        );
    }

    #[test]
    fn responder_learns_initiator_identity() {
        let rng = Rng::from_seed([2; 32]);

        let alice_static = SecretKey::from_bytes(rng.random_array().unwrap());
        let bob_static = SecretKey::from_bytes(rng.random_array().unwrap());

        let alice = Handshake::init(
            Role::Initiator,
            &alice_static,
            Some(bob_static.public_key().unwrap()),
            &rng,
        )
        .unwrap();
        let bob = Handshake::init(Role::Responder, &bob_static, None, &rng).unwrap();

        let (_, message_1) = Handshake::write_message(alice, b"ahoy").unwrap();
        let (output, payload) = Handshake::read_message(bob, &message_1).unwrap();

        // The payload travels encrypted inside the first message.
        assert_eq!(payload, b"ahoy");

        let HandshakeOutput::Pending(bob) = output else {
            panic!("responder is pending after message 1");
        };
        let (output, _) = Handshake::write_message(bob, &[]).unwrap();
        let HandshakeOutput::Complete(complete) = output else {
            panic!("responder completes with message 2");
        };

        assert_eq!(
            complete.remote_static(),
            &alice_static.public_key().unwrap()
        );
    }

    #[test]
    fn initiator_requires_remote_static() {
        let rng = Rng::from_seed([3; 32]);
        let local = SecretKey::from_bytes(rng.random_array().unwrap());

        assert_matches!(
            Handshake::init(Role::Initiator, &local, None, &rng),
            Err(HandshakeError::MissingRemoteStatic)
        );
    }

    #[test]
    fn out_of_order_calls_are_illegal_transitions() {
        let rng = Rng::from_seed([4; 32]);
        let alice_static = SecretKey::from_bytes(rng.random_array().unwrap());
        let bob_static = SecretKey::from_bytes(rng.random_array().unwrap());

        // Initiator cannot read before writing.
        let alice = Handshake::init(
            Role::Initiator,
            &alice_static,
            Some(bob_static.public_key().unwrap()),
            &rng,
        )
        .unwrap();
        assert_matches!(
            Handshake::read_message(alice, &[0; 128]),
            Err(HandshakeError::IllegalTransition)
        );

        // Responder cannot write before reading message 1.
        let bob = Handshake::init(Role::Responder, &bob_static, None, &rng).unwrap();
        assert_matches!(
            Handshake::write_message(bob, &[]),
            Err(HandshakeError::IllegalTransition)
        );
    }

    #[test]
    fn tampered_messages_fail_authentication() {
        let rng = Rng::from_seed([5; 32]);
        let alice_static = SecretKey::from_bytes(rng.random_array().unwrap());
        let bob_static = SecretKey::from_bytes(rng.random_array().unwrap());

        let alice = Handshake::init(
            Role::Initiator,
            &alice_static,
            Some(bob_static.public_key().unwrap()),
            &rng,
        )
        .unwrap();
        let bob = Handshake::init(Role::Responder, &bob_static, None, &rng).unwrap();

        let (_, mut message_1) = Handshake::write_message(alice, b"payload").unwrap();

        // Flip one bit in the encrypted section.
        let last = message_1.len() - 1;
        message_1[last] ^= 1;

        assert_matches!(
            Handshake::read_message(bob, &message_1),
            Err(HandshakeError::AuthenticationFailure)
        );
    }

    #[test]
    fn wrong_responder_key_fails_authentication() {
        let rng = Rng::from_seed([6; 32]);
        let alice_static = SecretKey::from_bytes(rng.random_array().unwrap());
        let bob_static = SecretKey::from_bytes(rng.random_array().unwrap());
        let eve_static = SecretKey::from_bytes(rng.random_array().unwrap());

        // Alice believes she is talking to Eve.
        let alice = Handshake::init(
            Role::Initiator,
            &alice_static,
            Some(eve_static.public_key().unwrap()),
            &rng,
        )
        .unwrap();
        let bob = Handshake::init(Role::Responder, &bob_static, None, &rng).unwrap();

        let (_, message_1) = Handshake::write_message(alice, &[]).unwrap();

        // Bob cannot decrypt a message keyed towards Eve.
        assert_matches!(
            Handshake::read_message(bob, &message_1),
            Err(HandshakeError::AuthenticationFailure)
        );
    }

    #[test]
    fn truncated_messages_are_malformed() {
        let rng = Rng::from_seed([7; 32]);
        let bob_static = SecretKey::from_bytes(rng.random_array().unwrap());
        let bob = Handshake::init(Role::Responder, &bob_static, None, &rng).unwrap();

        assert_matches!(
            Handshake::read_message(bob, &[0; 16]),
            Err(HandshakeError::MalformedMessage)
        );
    }

    #[test]
    fn replay_cache_rejects_duplicate_first_messages() {
        let mut cache = HandshakeReplayCache::new(Duration::from_secs(60));

        assert!(cache.check_and_insert(b"message-1", 100).is_ok());
        assert_matches!(
            cache.check_and_insert(b"message-1", 110),
            Err(HandshakeError::ReplayDetected)
        );

        // A different message passes.
        assert!(cache.check_and_insert(b"message-2", 110).is_ok());
        assert_eq!(cache.len(), 2);

        // Entries outside the horizon are pruned and no longer rejected.
        assert!(cache.check_and_insert(b"message-1", 200).is_ok());
    }
}
