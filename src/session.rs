// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-peer session lifecycle: establishment, transport encryption, rekeying and eviction.
//!
//! A [`Session`] holds two independent directional cipher states with strictly increasing
//! message counters. The [`SessionManager`] owns all sessions, keyed by the peer's static public
//! key, and drives the handshake to establish or replace them. A superseded session stays
//! available for decrypting late-arriving traffic until its idle TTL expires; the replacement
//! starts its counters at zero independently.
//!
//! Every encrypt-and-increment and decrypt-and-validate sequence runs under the session's own
//! lock, held for the whole sequence. No lock is held across an await point.
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::Config;
use crate::crypto::aead::{AEAD_TAG_SIZE, aead_decrypt, aead_encrypt};
use crate::crypto::x25519::{PublicKey, SecretKey, X25519Error};
use crate::crypto::{Rng, RngError, SymmetricKey};
use crate::handshake::{
    Handshake, HandshakeError, HandshakeOutput, HandshakeReplayCache, HandshakeState, Role,
};
use crate::identity::{IdentityError, StaticIdentity, unix_now};
use crate::traits::Transport;

/// Session messages are framed as an 8-byte big-endian counter followed by the ciphertext. The
/// counter doubles as associated data.
const COUNTER_SIZE: usize = 8;

#[derive(Debug)]
struct SendState {
    key: SymmetricKey,
    next: u64,
}

impl SendState {
    /// Encrypts under the next counter value and increments it, failing closed when the counter
    /// space is exhausted.
    fn seal(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, SessionError> {
        if self.next == u64::MAX {
            return Err(SessionError::CounterExhausted);
        }
        let counter = self.next;
        let counter_bytes = counter.to_be_bytes();

        let ciphertext = aead_encrypt(&self.key, nonce_from(counter), plaintext, &counter_bytes)
            .map_err(|_| SessionError::AuthenticationFailure)?;
        self.next += 1;

        let mut wire = Vec::with_capacity(COUNTER_SIZE + ciphertext.len());
        wire.extend_from_slice(&counter_bytes);
        wire.extend_from_slice(&ciphertext);
        Ok(wire)
    }
}

#[derive(Debug)]
struct RecvState {
    key: SymmetricKey,
    /// Highest counter accepted so far. Counters must strictly increase; anything at or below
    /// is a replay.
    last: Option<u64>,
}

impl RecvState {
    fn open(&mut self, wire: &[u8]) -> Result<Vec<u8>, SessionError> {
        if wire.len() < COUNTER_SIZE + AEAD_TAG_SIZE {
            return Err(SessionError::MalformedMessage);
        }
        let (counter_bytes, ciphertext) = wire.split_at(COUNTER_SIZE);
        let counter = u64::from_be_bytes(
            counter_bytes
                .try_into()
                .expect("split yields exactly COUNTER_SIZE bytes"),
        );

        if let Some(last) = self.last {
            if counter <= last {
                return Err(SessionError::ReplayDetected(counter));
            }
        }

        let plaintext = aead_decrypt(&self.key, nonce_from(counter), ciphertext, counter_bytes)
            .map_err(|_| SessionError::AuthenticationFailure)?;

        // Only advance after authentication succeeded.
        self.last = Some(counter);
        Ok(plaintext)
    }
}

fn nonce_from(counter: u64) -> [u8; 12] {
    let mut nonce = [0u8; 12];
    nonce[4..].copy_from_slice(&counter.to_be_bytes());
    nonce
}

/// Live encrypted channel to one peer.
#[derive(Debug)]
pub struct Session {
    peer: PublicKey,
    send: SendState,
    recv: RecvState,
    established_at: u64,
    last_used_at: u64,
}

impl Session {
    fn new(peer: PublicKey, sending: SymmetricKey, receiving: SymmetricKey, now: u64) -> Self {
        Self {
            peer,
            send: SendState {
                key: sending,
                next: 0,
            },
            recv: RecvState {
                key: receiving,
                last: None,
            },
            established_at: now,
            last_used_at: now,
        }
    }

    pub fn peer(&self) -> &PublicKey {
        &self.peer
    }

    /// Encrypts one message, incrementing the send counter.
    pub fn encrypt(&mut self, plaintext: &[u8], now: u64) -> Result<Vec<u8>, SessionError> {
        let wire = self.send.seal(plaintext)?;
        self.last_used_at = now;
        Ok(wire)
    }

    /// Decrypts one message, validating its counter against replays.
    pub fn decrypt(&mut self, wire: &[u8], now: u64) -> Result<Vec<u8>, SessionError> {
        let plaintext = self.recv.open(wire)?;
        self.last_used_at = now;
        Ok(plaintext)
    }

    pub fn messages_sent(&self) -> u64 {
        self.send.next
    }

    fn rekey_due(&self, config: &Config, now: u64) -> bool {
        now.saturating_sub(self.established_at) >= config.rekey_after.as_secs()
            || self.send.next >= config.rekey_after_messages
    }

    fn idle_expired(&self, ttl: Duration, now: u64) -> bool {
        now.saturating_sub(self.last_used_at) >= ttl.as_secs()
    }
}

/// Handshake state for a session this side initiated, awaiting the responder's answer.
#[derive(Debug)]
pub struct PendingSession {
    peer: PublicKey,
    state: HandshakeState,
}

#[derive(Debug, Default)]
struct PeerSessions {
    active: Option<Arc<Mutex<Session>>>,
    /// Replaced by a rekey but still valid for decrypting late traffic.
    superseded: Vec<Arc<Mutex<Session>>>,
}

/// Owns all per-peer sessions and the policies governing their lifetime.
#[derive(Debug)]
pub struct SessionManager {
    identity: Mutex<StaticIdentity>,
    config: Config,
    rng: Rng,
    sessions: Mutex<HashMap<PublicKey, PeerSessions>>,
    replay_cache: Mutex<HandshakeReplayCache>,
}

impl SessionManager {
    pub fn new(identity: StaticIdentity, config: Config, rng: Rng) -> Self {
        let replay_cache = HandshakeReplayCache::new(config.handshake_replay_horizon);
        Self {
            identity: Mutex::new(identity),
            config,
            rng,
            sessions: Mutex::new(HashMap::new()),
            replay_cache: Mutex::new(replay_cache),
        }
    }

    /// Our static public key.
    pub fn public_key(&self) -> Result<PublicKey, SessionError> {
        let identity = self.identity.lock().map_err(|_| SessionError::LockPoisoned)?;
        Ok(*identity.public_key())
    }

    /// Diffie-Hellman secret between our static identity and the peer's, used for pseudonym
    /// derivation and the outer encryption layer of offline messages.
    pub fn static_shared_secret(&self, peer: &PublicKey) -> Result<SymmetricKey, SessionError> {
        let identity = self.identity.lock().map_err(|_| SessionError::LockPoisoned)?;
        Ok(SymmetricKey::from_bytes(identity.shared_secret(peer)?))
    }

    /// Diffie-Hellman secrets between each retained identity key and the peer's, current first.
    ///
    /// Offline mail addressed before the sender learned about a key rotation is encrypted
    /// towards the previous key; trying these in order opens it during the grace window.
    pub fn decryption_shared_secrets(
        &self,
        peer: &PublicKey,
    ) -> Result<Vec<SymmetricKey>, SessionError> {
        let identity = self.identity.lock().map_err(|_| SessionError::LockPoisoned)?;
        identity
            .decryption_secrets()
            .map(|secret| {
                Ok(SymmetricKey::from_bytes(secret.calculate_agreement(peer)?))
            })
            .collect()
    }

    /// Rotates the identity keypair once its rotation period has passed and drops the previous
    /// keypair once its grace window has. Called periodically by [`run_gc`](Self::run_gc).
    pub fn maintain_identity(&self, now: u64) -> Result<(), SessionError> {
        let mut identity = self.identity.lock().map_err(|_| SessionError::LockPoisoned)?;
        if identity.rotation_due(self.config.identity_rotation_period, now) {
            identity.rotate(&self.rng, now)?;
            debug!(public_key = %identity.public_key(), "rotated identity keypair");
        }
        identity.expire_previous(self.config.identity_grace_window, now);
        Ok(())
    }

    /// Returns once an unexpired session with the peer exists, running a fresh handshake over
    /// the transport when none does or the rekey policy fired.
    ///
    /// During a rekey the previous session keeps serving concurrent traffic until the new one is
    /// installed.
    pub async fn get_or_create<T: Transport>(
        &self,
        peer: &PublicKey,
        transport: &T,
    ) -> Result<(), SessionError> {
        if self.has_fresh_session(peer, unix_now())? {
            return Ok(());
        }

        let (pending, message_1) = self.initiate(peer)?;
        transport
            .send(peer, message_1)
            .await
            .map_err(|err| SessionError::Transport(Box::new(err)))?;
        let message_2 = transport
            .recv(peer)
            .await
            .map_err(|err| SessionError::Transport(Box::new(err)))?;
        self.complete(pending, &message_2)?;

        Ok(())
    }

    /// Accepts one inbound handshake from the transport and installs the resulting session,
    /// returning the authenticated peer key.
    pub async fn accept<T: Transport>(
        &self,
        from: &PublicKey,
        transport: &T,
    ) -> Result<PublicKey, SessionError> {
        let message_1 = transport
            .recv(from)
            .await
            .map_err(|err| SessionError::Transport(Box::new(err)))?;
        let (peer, message_2) = self.respond(&message_1)?;
        transport
            .send(&peer, message_2)
            .await
            .map_err(|err| SessionError::Transport(Box::new(err)))?;
        Ok(peer)
    }

    /// Starts a handshake towards the peer, returning the first wire message. The caller sends
    /// it and feeds the answer to [`complete`](Self::complete).
    pub fn initiate(&self, peer: &PublicKey) -> Result<(PendingSession, Vec<u8>), SessionError> {
        let local_static = {
            let identity = self.identity.lock().map_err(|_| SessionError::LockPoisoned)?;
            identity.secret_key().clone()
        };

        let y = Handshake::init(Role::Initiator, &local_static, Some(*peer), &self.rng)?;
        let (output, message_1) = Handshake::write_message(y, &[])?;
        let HandshakeOutput::Pending(state) = output else {
            return Err(SessionError::Handshake(HandshakeError::IllegalTransition));
        };

        Ok((PendingSession { peer: *peer, state }, message_1))
    }

    /// Completes an initiated handshake with the responder's answer and installs the session.
    pub fn complete(
        &self,
        pending: PendingSession,
        message_2: &[u8],
    ) -> Result<(), SessionError> {
        let (output, _) = Handshake::read_message(pending.state, message_2)?;
        let HandshakeOutput::Complete(done) = output else {
            return Err(SessionError::Handshake(HandshakeError::IllegalTransition));
        };

        debug!(peer = %pending.peer, "session established as initiator");
        self.install(pending.peer, done)
    }

    /// Responds to an inbound first handshake message, installing the session and returning the
    /// answer to send back.
    ///
    /// The message is tried against every retained identity secret, so an initiator who has not
    /// yet picked up a rotated key still gets through during the grace window. Replayed first
    /// messages are rejected; the replay cache only records messages that authenticated, so
    /// unauthenticated noise cannot grow it.
    pub fn respond(&self, message_1: &[u8]) -> Result<(PublicKey, Vec<u8>), SessionError> {
        let secrets: Vec<SecretKey> = {
            let identity = self.identity.lock().map_err(|_| SessionError::LockPoisoned)?;
            identity.decryption_secrets().cloned().collect()
        };

        let mut accepted = None;
        for local_static in &secrets {
            let y = Handshake::init(Role::Responder, local_static, None, &self.rng)?;
            match Handshake::read_message(y, message_1) {
                Ok((HandshakeOutput::Pending(y), _)) => {
                    accepted = Some(y);
                    break;
                }
                Ok(_) => {
                    return Err(SessionError::Handshake(HandshakeError::IllegalTransition));
                }
                // The initiator addressed a different key of ours; try the next one.
                Err(HandshakeError::AuthenticationFailure) => continue,
                Err(err) => return Err(err.into()),
            }
        }
        let Some(y) = accepted else {
            return Err(SessionError::AuthenticationFailure);
        };

        {
            let mut cache = self
                .replay_cache
                .lock()
                .map_err(|_| SessionError::LockPoisoned)?;
            cache.check_and_insert(message_1, unix_now())?;
        }

        let (output, message_2) = Handshake::write_message(y, &[])?;
        let HandshakeOutput::Complete(done) = output else {
            return Err(SessionError::Handshake(HandshakeError::IllegalTransition));
        };

        let peer = *done.remote_static();
        debug!(%peer, "session established as responder");
        self.install(peer, done)?;

        Ok((peer, message_2))
    }

    /// Encrypts one message towards the peer using the active session.
    pub fn encrypt(&self, peer: &PublicKey, plaintext: &[u8]) -> Result<Vec<u8>, SessionError> {
        let session = self.active_session(peer)?;
        let mut session = session.lock().map_err(|_| SessionError::LockPoisoned)?;
        session.encrypt(plaintext, unix_now())
    }

    /// Decrypts one message from the peer, trying the active session first and any superseded
    /// sessions after, so late traffic encrypted before a rekey still gets through.
    pub fn decrypt(&self, peer: &PublicKey, wire: &[u8]) -> Result<Vec<u8>, SessionError> {
        let candidates = {
            let sessions = self.sessions.lock().map_err(|_| SessionError::LockPoisoned)?;
            let peer_sessions = sessions.get(peer).ok_or(SessionError::NoSession)?;
            let mut candidates = Vec::with_capacity(1 + peer_sessions.superseded.len());
            candidates.extend(peer_sessions.active.iter().cloned());
            candidates.extend(peer_sessions.superseded.iter().rev().cloned());
            candidates
        };
        if candidates.is_empty() {
            return Err(SessionError::NoSession);
        }

        let now = unix_now();
        let mut first_error = None;
        for session in candidates {
            let mut session = session.lock().map_err(|_| SessionError::LockPoisoned)?;
            match session.decrypt(wire, now) {
                Ok(plaintext) => return Ok(plaintext),
                // A key mismatch against one session is expected during rekey; anything else
                // is a verdict.
                Err(SessionError::AuthenticationFailure) => continue,
                Err(err) => {
                    first_error.get_or_insert(err);
                }
            }
        }

        Err(first_error.unwrap_or(SessionError::AuthenticationFailure))
    }

    /// Whether the rekey policy fired for the peer's active session.
    pub fn rekey_due(&self, peer: &PublicKey, now: u64) -> Result<bool, SessionError> {
        let session = self.active_session(peer)?;
        let session = session.lock().map_err(|_| SessionError::LockPoisoned)?;
        Ok(session.rekey_due(&self.config, now))
    }

    /// Drops every session idle past the TTL. Superseded sessions age out the same way.
    pub fn evict_idle(&self, now: u64) -> Result<(), SessionError> {
        let ttl = self.config.session_idle_ttl;
        let mut sessions = self.sessions.lock().map_err(|_| SessionError::LockPoisoned)?;

        sessions.retain(|peer, peer_sessions| {
            if let Some(active) = &peer_sessions.active {
                let expired = active
                    .lock()
                    .map(|session| session.idle_expired(ttl, now))
                    .unwrap_or(true);
                if expired {
                    debug!(%peer, "evicting idle session");
                    peer_sessions.active = None;
                }
            }
            peer_sessions.superseded.retain(|session| {
                !session
                    .lock()
                    .map(|session| session.idle_expired(ttl, now))
                    .unwrap_or(true)
            });
            peer_sessions.active.is_some() || !peer_sessions.superseded.is_empty()
        });

        Ok(())
    }

    /// Periodic garbage collection until the token is cancelled.
    pub async fn run_gc(&self, interval: Duration, token: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    let now = unix_now();
                    if let Err(err) = self.evict_idle(now) {
                        warn!(%err, "session eviction failed");
                    }
                    if let Err(err) = self.maintain_identity(now) {
                        warn!(%err, "identity rotation failed");
                    }
                }
            }
        }
    }

    fn has_fresh_session(&self, peer: &PublicKey, now: u64) -> Result<bool, SessionError> {
        let sessions = self.sessions.lock().map_err(|_| SessionError::LockPoisoned)?;
        let Some(active) = sessions.get(peer).and_then(|p| p.active.as_ref()) else {
            return Ok(false);
        };
        let session = active.lock().map_err(|_| SessionError::LockPoisoned)?;
        Ok(!session.rekey_due(&self.config, now)
            && !session.idle_expired(self.config.session_idle_ttl, now))
    }

    fn active_session(&self, peer: &PublicKey) -> Result<Arc<Mutex<Session>>, SessionError> {
        let sessions = self.sessions.lock().map_err(|_| SessionError::LockPoisoned)?;
        sessions
            .get(peer)
            .and_then(|p| p.active.clone())
            .ok_or(SessionError::NoSession)
    }

    fn install(
        &self,
        peer: PublicKey,
        done: crate::handshake::CompletedHandshake,
    ) -> Result<(), SessionError> {
        let now = unix_now();
        let (sending, receiving, _) = done.into_parts();
        let session = Arc::new(Mutex::new(Session::new(peer, sending, receiving, now)));

        let mut sessions = self.sessions.lock().map_err(|_| SessionError::LockPoisoned)?;
        let peer_sessions = sessions.entry(peer).or_default();
        if let Some(previous) = peer_sessions.active.replace(session) {
            peer_sessions.superseded.push(previous);
        }

        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Handshake(#[from] HandshakeError),

    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error(transparent)]
    X25519(#[from] X25519Error),

    #[error(transparent)]
    Rng(#[from] RngError),

    #[error("no established session with peer")]
    NoSession,

    #[error("session send counter exhausted")]
    CounterExhausted,

    #[error("message counter {0} was already used")]
    ReplayDetected(u64),

    #[error("message failed authentication")]
    AuthenticationFailure,

    #[error("message is truncated or malformed")]
    MalformedMessage,

    #[error("session table lock poisoned")]
    LockPoisoned,

    #[error("transport: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::time::Duration;

    use assert_matches::assert_matches;

    use crate::Config;
    use crate::crypto::Rng;
    use crate::identity::{StaticIdentity, unix_now};

    use super::{SessionError, SessionManager};

    fn establish_pair(config: Config) -> (SessionManager, SessionManager) {
        let rng = Rng::from_seed([7; 32]);
        let alice_identity = StaticIdentity::generate(&rng).unwrap();
        let bob_identity = StaticIdentity::generate(&rng).unwrap();
        let bob_public = *bob_identity.public_key();

        let alice =
            SessionManager::new(alice_identity, config.clone(), Rng::from_seed([8; 32]));
        let bob = SessionManager::new(bob_identity, config, Rng::from_seed([9; 32]));

        let (pending, message_1) = alice.initiate(&bob_public).unwrap();
        let (_, message_2) = bob.respond(&message_1).unwrap();
        alice.complete(pending, &message_2).unwrap();

        (alice, bob)
    }

    #[test]
    fn sessions_round_trip_in_both_directions() {
        let (alice, bob) = establish_pair(Config::default());
        let alice_public = alice.public_key().unwrap();
        let bob_public = bob.public_key().unwrap();

        let to_bob = alice.encrypt(&bob_public, b"hello bob").unwrap();
        assert_eq!(bob.decrypt(&alice_public, &to_bob).unwrap(), b"hello bob");

        let to_alice = bob.encrypt(&alice_public, b"hello alice").unwrap();
        assert_eq!(
            alice.decrypt(&bob_public, &to_alice).unwrap(),
            b"hello alice"
        );
    }

    #[test]
    fn replayed_and_stale_counters_are_rejected() {
        let (alice, bob) = establish_pair(Config::default());
        let alice_public = alice.public_key().unwrap();
        let bob_public = bob.public_key().unwrap();

        let first = alice.encrypt(&bob_public, b"one").unwrap();
        let second = alice.encrypt(&bob_public, b"two").unwrap();

        // Deliver out of order: the newer counter wins, the older is then a replay.
        assert_eq!(bob.decrypt(&alice_public, &second).unwrap(), b"two");
        assert_matches!(
            bob.decrypt(&alice_public, &first),
            Err(SessionError::ReplayDetected(0))
        );

        // Exact duplicate of an accepted message.
        assert_matches!(
            bob.decrypt(&alice_public, &second),
            Err(SessionError::ReplayDetected(1))
        );
    }

    #[test]
    fn tampered_ciphertext_fails_authentication() {
        let (alice, bob) = establish_pair(Config::default());
        let alice_public = alice.public_key().unwrap();
        let bob_public = bob.public_key().unwrap();

        let mut wire = alice.encrypt(&bob_public, b"payload").unwrap();
        let last = wire.len() - 1;
        wire[last] ^= 1;

        assert_matches!(
            bob.decrypt(&alice_public, &wire),
            Err(SessionError::AuthenticationFailure)
        );
    }

    #[test]
    fn replayed_handshake_first_message_is_rejected() {
        let (alice, bob) = establish_pair(Config::default());
        let bob_public = bob.public_key().unwrap();

        let (_, message_1) = alice.initiate(&bob_public).unwrap();
        bob.respond(&message_1).unwrap();

        assert_matches!(
            bob.respond(&message_1),
            Err(SessionError::Handshake(
                crate::handshake::HandshakeError::ReplayDetected
            ))
        );
    }

    #[test]
    fn rekey_keeps_old_session_decryptable_and_resets_counters() {
        let config = Config {
            rekey_after_messages: 2,
            ..Default::default()
        };
        let (alice, bob) = establish_pair(config);
        let alice_public = alice.public_key().unwrap();
        let bob_public = bob.public_key().unwrap();

        let old_1 = alice.encrypt(&bob_public, b"old one").unwrap();
        let old_2 = alice.encrypt(&bob_public, b"old two").unwrap();
        assert!(alice.rekey_due(&bob_public, unix_now()).unwrap());

        // New handshake replaces the active session on both sides.
        let (pending, message_1) = alice.initiate(&bob_public).unwrap();
        let (_, message_2) = bob.respond(&message_1).unwrap();
        alice.complete(pending, &message_2).unwrap();

        // New session counters start at zero, independent of the old session's count.
        let fresh = alice.encrypt(&bob_public, b"fresh").unwrap();
        assert_eq!(&fresh[..8], &0u64.to_be_bytes());

        // Late traffic encrypted under the old keys still decrypts.
        assert_eq!(bob.decrypt(&alice_public, &fresh).unwrap(), b"fresh");
        assert_eq!(bob.decrypt(&alice_public, &old_1).unwrap(), b"old one");
        assert_eq!(bob.decrypt(&alice_public, &old_2).unwrap(), b"old two");
    }

    #[test]
    fn idle_sessions_are_evicted() {
        let config = Config {
            session_idle_ttl: Duration::from_secs(60),
            ..Default::default()
        };
        let (alice, bob) = establish_pair(config);
        let bob_public = bob.public_key().unwrap();

        alice.encrypt(&bob_public, b"keepalive").unwrap();

        // Within the TTL nothing happens.
        alice.evict_idle(unix_now()).unwrap();
        assert!(alice.encrypt(&bob_public, b"still there").is_ok());

        // Far in the future the session is gone.
        alice.evict_idle(unix_now() + 3600).unwrap();
        assert_matches!(
            alice.encrypt(&bob_public, b"gone"),
            Err(SessionError::NoSession)
        );
    }

    #[test]
    fn rejected_first_messages_do_not_populate_the_replay_cache() {
        let rng = Rng::from_seed([11; 32]);
        let charlie_identity = StaticIdentity::generate(&rng).unwrap();
        let charlie_public = *charlie_identity.public_key();

        let alice = SessionManager::new(
            StaticIdentity::generate(&rng).unwrap(),
            Config::default(),
            Rng::from_seed([12; 32]),
        );
        let bob = SessionManager::new(
            StaticIdentity::generate(&rng).unwrap(),
            Config::default(),
            Rng::from_seed([13; 32]),
        );

        // A first message addressed to somebody else fails authentication at bob.
        let (_, misdirected) = alice.initiate(&charlie_public).unwrap();
        assert_matches!(
            bob.respond(&misdirected),
            Err(SessionError::AuthenticationFailure)
        );

        // It was not remembered: the retry reports the same verdict, not a replay. Only
        // messages that authenticate enter the replay cache.
        assert_matches!(
            bob.respond(&misdirected),
            Err(SessionError::AuthenticationFailure)
        );
    }

    #[test]
    fn handshake_to_the_previous_key_succeeds_during_the_grace_window() {
        let rng = Rng::from_seed([14; 32]);
        let config = Config::default();

        let alice = SessionManager::new(
            StaticIdentity::generate(&rng).unwrap(),
            config.clone(),
            Rng::from_seed([15; 32]),
        );
        let bob = SessionManager::new(
            StaticIdentity::generate(&rng).unwrap(),
            config.clone(),
            Rng::from_seed([16; 32]),
        );
        let alice_public = alice.public_key().unwrap();
        let old_bob_public = bob.public_key().unwrap();

        // The rotation period passes; bob swaps keypairs but keeps the old secret around.
        let rotation_at = unix_now() + config.identity_rotation_period.as_secs();
        bob.maintain_identity(rotation_at).unwrap();
        assert_ne!(bob.public_key().unwrap(), old_bob_public);

        // Alice has not learned the new key yet and addresses the old one. Bob falls back to
        // the retained secret and the handshake completes.
        let (pending, message_1) = alice.initiate(&old_bob_public).unwrap();
        let (_, message_2) = bob.respond(&message_1).unwrap();
        alice.complete(pending, &message_2).unwrap();

        let wire = alice.encrypt(&old_bob_public, b"still here").unwrap();
        assert_eq!(bob.decrypt(&alice_public, &wire).unwrap(), b"still here");

        // Once the grace window passes the old secret is gone and the old address is dead.
        bob.maintain_identity(rotation_at + config.identity_grace_window.as_secs())
            .unwrap();
        let (_, stale) = alice.initiate(&old_bob_public).unwrap();
        assert_matches!(
            bob.respond(&stale),
            Err(SessionError::AuthenticationFailure)
        );
    }

    #[test]
    fn offline_secrets_include_the_previous_key_during_the_grace_window() {
        let rng = Rng::from_seed([17; 32]);
        let config = Config::default();

        let alice = SessionManager::new(
            StaticIdentity::generate(&rng).unwrap(),
            config.clone(),
            Rng::from_seed([18; 32]),
        );
        let bob = SessionManager::new(
            StaticIdentity::generate(&rng).unwrap(),
            config.clone(),
            Rng::from_seed([19; 32]),
        );
        let alice_public = alice.public_key().unwrap();
        let old_bob_public = bob.public_key().unwrap();

        // The outer-layer secret alice derives towards bob's current key.
        let outer = alice.static_shared_secret(&old_bob_public).unwrap();

        let rotation_at = unix_now() + config.identity_rotation_period.as_secs();
        bob.maintain_identity(rotation_at).unwrap();

        // During the grace window bob still derives it from the retained secret.
        let candidates = bob.decryption_shared_secrets(&alice_public).unwrap();
        assert_eq!(candidates.len(), 2);
        assert!(candidates.iter().any(|key| *key == outer));

        // Afterwards only the current key remains.
        bob.maintain_identity(rotation_at + config.identity_grace_window.as_secs())
            .unwrap();
        let candidates = bob.decryption_shared_secrets(&alice_public).unwrap();
        assert_eq!(candidates.len(), 1);
        assert!(candidates.iter().all(|key| *key != outer));
    }

    #[test]
    fn concurrent_encrypts_never_share_a_counter() {
        let (alice, bob) = establish_pair(Config::default());
        let bob_public = bob.public_key().unwrap();

        let counters = Mutex::new(HashSet::new());
        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    for _ in 0..100 {
                        let wire = alice.encrypt(&bob_public, b"stress").unwrap();
                        let counter =
                            u64::from_be_bytes(wire[..8].try_into().unwrap());
                        assert!(counters.lock().unwrap().insert(counter));
                    }
                });
            }
        });

        assert_eq!(counters.lock().unwrap().len(), 800);
    }
}
