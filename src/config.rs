// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration for the messaging core.
//!
//! All privacy- and lifecycle-relevant parameters are supplied externally through `Config`;
//! components never read configuration from the environment themselves.
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default padding buckets in bytes, ascending.
pub const DEFAULT_PADDING_BUCKETS: [usize; 5] = [256, 1024, 4096, 16_384, 65_536];

/// Configuration parameters for sessions, pre-keys, obfuscation and retrieval.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Duration of one pseudonym epoch. Recipient tags are stable within an epoch and
    /// unlinkable across epochs.
    pub epoch_duration: Duration,

    /// Establish a fresh session after this much time on the current one.
    pub rekey_after: Duration,

    /// Establish a fresh session after this many messages sent on the current one.
    pub rekey_after_messages: u64,

    /// Evict sessions which have not encrypted or decrypted anything for this long.
    pub session_idle_ttl: Duration,

    /// Number of one-time pre-keys generated per batch.
    pub prekey_batch_size: usize,

    /// Emit a replenishment signal when the unused pre-keys for a peer fall below this count.
    pub prekey_low_water_mark: usize,

    /// Ascending plaintext size buckets; every stored message occupies exactly one bucket.
    pub padding_buckets: Vec<usize>,

    /// Probability in `0.0..=1.0` that a retrieval tick polls the dummy mailbox instead of the
    /// real one.
    pub cover_traffic_ratio: f64,

    /// Starting interval between retrieval polls.
    pub retrieval_base_interval: Duration,

    /// Fraction by which each poll interval is randomly stretched or shrunk.
    pub retrieval_jitter_fraction: f64,

    /// Lower bound the poll interval shrinks towards while mail keeps arriving.
    pub retrieval_min_interval: Duration,

    /// Upper bound the poll interval grows towards while polls come back empty.
    pub retrieval_max_interval: Duration,

    /// Rotate the long-term identity keypair after this period.
    pub identity_rotation_period: Duration,

    /// Keep the previous identity keypair around for backward decryption for this long after a
    /// rotation.
    pub identity_grace_window: Duration,

    /// Remember accepted handshake first-messages for this long to reject replays.
    pub handshake_replay_horizon: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            epoch_duration: Duration::from_secs(60 * 60),
            rekey_after: Duration::from_secs(60 * 60 * 24),
            rekey_after_messages: 1_000_000,
            session_idle_ttl: Duration::from_secs(60 * 60),
            prekey_batch_size: 32,
            prekey_low_water_mark: 8,
            padding_buckets: DEFAULT_PADDING_BUCKETS.to_vec(),
            cover_traffic_ratio: 0.3,
            retrieval_base_interval: Duration::from_secs(60),
            retrieval_jitter_fraction: 0.5,
            retrieval_min_interval: Duration::from_secs(5),
            retrieval_max_interval: Duration::from_secs(60 * 15),
            identity_rotation_period: Duration::from_secs(60 * 60 * 24 * 30),
            identity_grace_window: Duration::from_secs(60 * 60 * 24 * 7),
            handshake_replay_horizon: Duration::from_secs(60 * 60),
        }
    }
}
