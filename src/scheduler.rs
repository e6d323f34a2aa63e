// SPDX-License-Identifier: MIT OR Apache-2.0

//! Jittered polling of the storage node, with cover traffic masking real retrieval patterns.
//!
//! Each tick issues exactly one fetch. With the configured probability the fetch targets a
//! dummy mailbox instead of the real one; on the wire both look identical: the dummy tag is
//! random but stable within an epoch (genuine tags repeat within an epoch too) and the dummy
//! poll carries the same resume marker a genuine poll would. Only
//! real fetches adapt the poll interval: non-empty responses shrink it towards a floor, empty
//! ones grow it exponentially towards a ceiling, and every sleep is stretched or shrunk by a
//! random jitter factor so the cadence never becomes a fingerprint.
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::Config;
use crate::crypto::{Rng, RngError, SymmetricKey};
use crate::identity::unix_now;
use crate::obfuscation::{ObfuscationError, Tag, derive_recipient_tag, epoch_at};
use crate::traits::MessageStore;

/// Polls one recipient mailbox and forwards retrieved ciphertexts to the caller.
#[derive(Debug)]
pub struct RetrievalScheduler<S> {
    store: S,
    /// Shared secret with the sending peer, input to the recipient tag derivation.
    shared_secret: SymmetricKey,
    rng: Rng,
    epoch_duration: Duration,
    min_interval: Duration,
    max_interval: Duration,
    jitter_fraction: f64,
    cover_traffic_ratio: f64,
    interval: Duration,
    /// Highest storage marker seen so far; fetches resume from here.
    since: u64,
    /// Dummy mailbox targeted by cover fetches, rotated with the epoch like a genuine tag.
    cover: Option<CoverMailbox>,
    retrieved_tx: mpsc::Sender<Vec<u8>>,
}

#[derive(Debug)]
struct CoverMailbox {
    epoch: u64,
    tag: Tag,
}

impl<S> RetrievalScheduler<S>
where
    S: MessageStore,
{
    /// Returns the scheduler together with the channel on which retrieved ciphertexts arrive,
    /// oldest first. Decryption is the receiver's business.
    pub fn new(
        store: S,
        shared_secret: SymmetricKey,
        config: &Config,
        rng: Rng,
    ) -> (Self, mpsc::Receiver<Vec<u8>>) {
        let (retrieved_tx, retrieved_rx) = mpsc::channel(64);
        (
            Self {
                store,
                shared_secret,
                rng,
                epoch_duration: config.epoch_duration,
                min_interval: config.retrieval_min_interval,
                max_interval: config.retrieval_max_interval,
                jitter_fraction: config.retrieval_jitter_fraction,
                cover_traffic_ratio: config.cover_traffic_ratio,
                interval: config.retrieval_base_interval,
                since: 0,
                cover: None,
                retrieved_tx,
            },
            retrieved_rx,
        )
    }

    /// Polls until the token is cancelled or the receiving side goes away. At most one fetch is
    /// in flight at any time.
    pub async fn run(mut self, token: CancellationToken) -> Result<(), SchedulerError> {
        loop {
            let delay = self.jittered(self.interval)?;
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }

            if self.rng.random_bool(self.cover_traffic_ratio)? {
                self.fetch_cover().await?;
                continue;
            }

            if !self.fetch_real().await? {
                break;
            }
        }

        Ok(())
    }

    /// Polls the dummy mailbox. The request mirrors a genuine poll byte for byte: the tag is
    /// stable within the epoch and the resume marker is the real one, so the storage node can
    /// separate the two mailboxes but not tell which of them is the cover. The response is
    /// discarded and the interval untouched.
    async fn fetch_cover(&mut self) -> Result<(), SchedulerError> {
        let epoch = epoch_at(unix_now(), self.epoch_duration);
        let stale = self.cover.as_ref().is_none_or(|mailbox| mailbox.epoch != epoch);
        if stale {
            self.cover = Some(CoverMailbox {
                epoch,
                tag: Tag::random(&self.rng)?,
            });
        }
        let tag = self
            .cover
            .as_ref()
            .expect("cover mailbox exists for the current epoch")
            .tag;

        if let Err(err) = self.store.get(&tag, self.since).await {
            warn!(%err, "cover fetch failed");
        }
        debug!("issued cover fetch");
        Ok(())
    }

    /// Polls the current recipient tag, forwarding anything new. Returns `false` once the
    /// receiver side of the channel is gone.
    async fn fetch_real(&mut self) -> Result<bool, SchedulerError> {
        let epoch = epoch_at(unix_now(), self.epoch_duration);
        let tag = derive_recipient_tag(&self.shared_secret, epoch)?;

        let messages = match self.store.get(&tag, self.since).await {
            Ok(messages) => messages,
            Err(err) => {
                warn!(%err, "retrieval fetch failed");
                self.record_empty();
                return Ok(true);
            }
        };

        if messages.is_empty() {
            self.record_empty();
            return Ok(true);
        }

        debug!(count = messages.len(), "retrieved pending messages");
        self.record_activity();
        for message in messages {
            self.since = self.since.max(message.marker);
            if self.retrieved_tx.send(message.ciphertext).await.is_err() {
                return Ok(false);
            }
        }

        Ok(true)
    }

    fn record_activity(&mut self) {
        self.interval = (self.interval / 2).max(self.min_interval);
    }

    fn record_empty(&mut self) {
        self.interval = self.interval.saturating_mul(2).min(self.max_interval);
    }

    fn jittered(&self, interval: Duration) -> Result<Duration, SchedulerError> {
        let jitter = self.jitter_fraction.clamp(0.0, 1.0);
        if jitter == 0.0 {
            return Ok(interval);
        }
        let factor = 1.0 + self.rng.random_range(-jitter..jitter)?;
        Ok(interval.mul_f64(factor).max(Duration::from_millis(1)))
    }
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Rng(#[from] RngError),

    #[error(transparent)]
    Obfuscation(#[from] ObfuscationError),
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio_util::sync::CancellationToken;

    use crate::Config;
    use crate::crypto::{Rng, SymmetricKey};
    use crate::identity::unix_now;
    use crate::obfuscation::{derive_recipient_tag, epoch_at};
    use crate::test_utils::MemoryStore;

    use super::RetrievalScheduler;

    fn test_config() -> Config {
        Config {
            // A single epoch covering the whole test run.
            epoch_duration: Duration::from_secs(u32::MAX as u64),
            retrieval_base_interval: Duration::from_millis(100),
            retrieval_min_interval: Duration::from_millis(10),
            retrieval_max_interval: Duration::from_secs(10),
            retrieval_jitter_fraction: 0.5,
            cover_traffic_ratio: 0.0,
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn delivers_pending_messages_in_order() {
        let rng = Rng::from_seed([1; 32]);
        let config = test_config();
        let shared = SymmetricKey::from_bytes(rng.random_array().unwrap());

        let store = MemoryStore::default();
        let epoch = epoch_at(unix_now(), config.epoch_duration);
        let tag = derive_recipient_tag(&shared, epoch).unwrap();
        store.insert(&tag, b"first".to_vec());
        store.insert(&tag, b"second".to_vec());

        let (scheduler, mut retrieved_rx) =
            RetrievalScheduler::new(store.clone(), shared, &config, rng);
        let token = CancellationToken::new();
        let handle = tokio::spawn(scheduler.run(token.clone()));

        assert_eq!(retrieved_rx.recv().await.unwrap(), b"first");
        assert_eq!(retrieved_rx.recv().await.unwrap(), b"second");

        // Messages are not delivered twice on subsequent polls.
        store.insert(&tag, b"third".to_vec());
        assert_eq!(retrieved_rx.recv().await.unwrap(), b"third");

        token.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn cover_traffic_polls_a_dummy_mailbox() {
        let rng = Rng::from_seed([2; 32]);
        let config = Config {
            cover_traffic_ratio: 1.0,
            ..test_config()
        };
        let shared = SymmetricKey::from_bytes(rng.random_array().unwrap());

        let store = MemoryStore::default();
        let epoch = epoch_at(unix_now(), config.epoch_duration);
        let real_tag = derive_recipient_tag(&shared, epoch).unwrap();

        let (scheduler, _retrieved_rx) =
            RetrievalScheduler::new(store.clone(), shared, &config, rng);
        let token = CancellationToken::new();
        let handle = tokio::spawn(scheduler.run(token.clone()));

        // Let a number of ticks fire.
        tokio::time::sleep(Duration::from_secs(5)).await;
        token.cancel();
        handle.await.unwrap().unwrap();

        let queried = store.queried_tags();
        assert!(queried.len() >= 10);
        // Every poll hit the dummy mailbox, never the real one. The dummy tag is stable
        // within the epoch, just like a genuine tag would be.
        assert!(queried.iter().all(|tag| *tag != real_tag));
        assert!(queried.iter().all(|tag| *tag == queried[0]));
    }

    #[tokio::test(start_paused = true)]
    async fn cover_polls_carry_the_same_resume_marker_as_genuine_polls() {
        let rng = Rng::from_seed([5; 32]);
        let config = Config {
            cover_traffic_ratio: 0.5,
            ..test_config()
        };
        let shared = SymmetricKey::from_bytes(rng.random_array().unwrap());

        let store = MemoryStore::default();
        let epoch = epoch_at(unix_now(), config.epoch_duration);
        let real_tag = derive_recipient_tag(&shared, epoch).unwrap();
        store.insert(&real_tag, b"one".to_vec());
        store.insert(&real_tag, b"two".to_vec());

        let (scheduler, mut retrieved_rx) =
            RetrievalScheduler::new(store.clone(), shared, &config, rng);
        let token = CancellationToken::new();
        let handle = tokio::spawn(scheduler.run(token.clone()));

        // Both messages arrive, advancing the resume marker, then plenty of further ticks mix
        // genuine and cover polls.
        assert_eq!(retrieved_rx.recv().await.unwrap(), b"one");
        assert_eq!(retrieved_rx.recv().await.unwrap(), b"two");
        tokio::time::sleep(Duration::from_secs(30)).await;
        token.cancel();
        handle.await.unwrap().unwrap();

        let queries = store.queries();
        let real: Vec<u64> = queries
            .iter()
            .filter(|(tag, _)| *tag == real_tag)
            .map(|(_, since)| *since)
            .collect();
        let cover: Vec<u64> = queries
            .iter()
            .filter(|(tag, _)| *tag != real_tag)
            .map(|(_, since)| *since)
            .collect();
        assert!(!real.is_empty());
        assert!(!cover.is_empty());

        // The storage node cannot classify polls by their marker: once the genuine marker
        // advanced, cover polls advanced with it.
        let real_max = *real.iter().max().unwrap();
        let cover_max = *cover.iter().max().unwrap();
        assert_eq!(real_max, cover_max);
        assert!(real_max > 0);
        // And no rule of the shape "since == 0 means cover" separates them either.
        assert!(cover.iter().filter(|since| **since > 0).count() > 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stopping_fires_no_further_ticks() {
        let rng = Rng::from_seed([3; 32]);
        let config = test_config();
        let shared = SymmetricKey::from_bytes(rng.random_array().unwrap());
        let store = MemoryStore::default();

        let (scheduler, _retrieved_rx) =
            RetrievalScheduler::new(store.clone(), shared, &config, rng);
        let token = CancellationToken::new();
        let handle = tokio::spawn(scheduler.run(token.clone()));

        tokio::time::sleep(Duration::from_secs(1)).await;
        token.cancel();
        handle.await.unwrap().unwrap();

        let fetches = store.queried_tags().len();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(store.queried_tags().len(), fetches);
    }

    #[tokio::test]
    async fn interval_adapts_to_mailbox_activity() {
        let rng = Rng::from_seed([4; 32]);
        let config = test_config();
        let shared = SymmetricKey::from_bytes(rng.random_array().unwrap());

        let (mut scheduler, _retrieved_rx) =
            RetrievalScheduler::new(MemoryStore::default(), shared, &config, rng);

        // Empty fetches grow the interval exponentially up to the ceiling.
        let base = scheduler.interval;
        scheduler.record_empty();
        assert_eq!(scheduler.interval, base * 2);
        for _ in 0..16 {
            scheduler.record_empty();
        }
        assert_eq!(scheduler.interval, config.retrieval_max_interval);

        // Activity shrinks it again down to the floor.
        scheduler.record_activity();
        assert_eq!(scheduler.interval, config.retrieval_max_interval / 2);
        for _ in 0..16 {
            scheduler.record_activity();
        }
        assert_eq!(scheduler.interval, config.retrieval_min_interval);
    }
}
