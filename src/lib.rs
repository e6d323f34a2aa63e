// SPDX-License-Identifier: MIT OR Apache-2.0

//! `deaddrop` provides authenticated, forward-secure and privacy-preserving messaging between
//! peers which are not necessarily online at the same time.
//!
//! Messages for an offline recipient are deposited at a semi-trusted storage node which learns
//! nothing beyond a pseudonymous mailbox tag, a bucketed ciphertext size and a coarse timestamp.
//! This implementation is transport- and storage-agnostic: both collaborators are consumed
//! through narrow async interfaces and can be backed by anything from an in-memory map to a
//! remote service.
//!
//! ## Authenticated key exchange
//!
//! Live channels are established with a two-message key exchange in the IK shape: the initiator
//! already knows the responder's static public key and both sides end up with mutually
//! authenticated, independent directional cipher states. Authentication is derived from
//! Diffie-Hellman combinations rather than signatures, which gives resistance against key
//! compromise impersonation. Sessions rekey after a configurable age or message count and are
//! evicted after an idle TTL; a superseded session keeps decrypting late traffic until then.
//!
//! ## Offline messages
//!
//! Sending to an offline peer spends one of their published one-time pre-keys, giving forward
//! secrecy for mail at rest: the storage node may keep ciphertexts forever, but once the
//! recipient has consumed the pre-key the material to decrypt them again is gone. Plaintexts are
//! padded into a small set of fixed size buckets and encrypted twice with independently derived
//! keys before they leave the sender.
//!
//! ## Traffic obfuscation
//!
//! Mailbox tags are rotated every epoch and derived from a shared secret, so only the two peers
//! can link one epoch's tag to the next. Retrieval runs on a jittered, adaptive schedule and
//! mixes in fetches against a dummy mailbox indistinguishable from a genuine one, masking real
//! activity patterns from the storage node.
pub mod cbor;
mod codec;
mod config;
pub mod crypto;
mod handshake;
mod identity;
mod obfuscation;
mod prekey;
mod scheduler;
mod session;
#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;
pub mod traits;


pub use codec::{CodecError, InnerEnvelope, MessageCodec};
pub use config::{Config, DEFAULT_PADDING_BUCKETS};
pub use crypto::x25519::{PublicKey, SecretKey};
pub use crypto::{Rng, RngError, Secret, SymmetricKey};
pub use handshake::{
    CompletedHandshake, Handshake, HandshakeError, HandshakeOutput, HandshakeReplayCache,
    HandshakeState, Role,
};
pub use identity::{IdentityError, StaticIdentity};
pub use obfuscation::{
    ObfuscationError, SENDER_NONCE_SIZE, Tag, derive_recipient_tag, derive_sender_tag, epoch_at,
};
pub use prekey::{PreKeyError, PreKeyId, PreKeyStore, PublicPreKey, forward_secret_key};
pub use scheduler::{RetrievalScheduler, SchedulerError};
pub use session::{PendingSession, Session, SessionError, SessionManager};
