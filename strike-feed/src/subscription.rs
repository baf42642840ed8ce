//! Desired-vs-confirmed subscription tracking with batched sync.
//!
//! The venue caps both the number of keys per control frame and the total
//! keys per payload mode, and rate-limits rapid-fire control frames.
//! `sync_all` therefore batches the desired set with a short inter-batch
//! delay; batches that fail to send (or are nacked) land in a `failed`
//! set that `retry_failed` re-issues.

use crate::error::FeedError;
use crate::protocol::ControlAck;
use async_trait::async_trait;
use fnv::FnvHashMap;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use strike_core::InstrumentKey;
use tracing::{debug, info, warn};

/// Hard protocol cap on keys per subscribe frame.
pub const MAX_KEYS_PER_BATCH: usize = 50;

/// Delay between batches to stay clear of control-frame rate limits.
pub const DEFAULT_INTER_BATCH_DELAY: Duration = Duration::from_millis(500);

/// Payload richness requested at subscription time.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum SubscriptionMode {
    /// Last traded price only.
    Ltpc,
    /// Full depth, greeks and day OHLC.
    Full,
    /// First level plus greeks.
    OptionGreeks,
}

impl SubscriptionMode {
    /// Wire name carried in the control frame.
    pub fn wire_name(&self) -> &'static str {
        match self {
            SubscriptionMode::Ltpc => "ltpc",
            SubscriptionMode::Full => "full",
            SubscriptionMode::OptionGreeks => "option_greeks",
        }
    }

    /// Venue cap on total subscribed keys for this mode.
    pub fn max_keys(&self) -> usize {
        match self {
            SubscriptionMode::Ltpc => 5000,
            SubscriptionMode::Full => 2000,
            SubscriptionMode::OptionGreeks => 3000,
        }
    }
}

/// Transport seam through which control frames leave the process. The
/// feed client implements this over the live socket; tests substitute a
/// recorder.
#[async_trait]
pub trait ControlTransport: Send + Sync {
    async fn send_subscribe(
        &self,
        correlation_id: &str,
        keys: &[InstrumentKey],
        mode: SubscriptionMode,
    ) -> Result<(), FeedError>;

    async fn send_unsubscribe(
        &self,
        correlation_id: &str,
        keys: &[InstrumentKey],
    ) -> Result<(), FeedError>;
}

/// Counts exposed to the scheduler to decide pipeline readiness.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct SubscriptionStatus {
    pub total: usize,
    pub confirmed: usize,
    pub failed: usize,
}

impl SubscriptionStatus {
    pub fn confirmed_pct(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.confirmed as f64 / self.total as f64 * 100.0
        }
    }
}

#[derive(Default)]
struct SubscriptionState {
    desired: BTreeSet<InstrumentKey>,
    confirmed: BTreeSet<InstrumentKey>,
    failed: BTreeSet<InstrumentKey>,
    /// Sent-but-unacknowledged batches, keyed by correlation id, so a
    /// late failure ack can demote its keys.
    in_flight: FnvHashMap<String, Vec<InstrumentKey>>,
}

/// Tracks the desired instrument universe and reconciles the venue-side
/// subscription state against it.
pub struct SubscriptionManager {
    transport: Arc<dyn ControlTransport>,
    mode: SubscriptionMode,
    batch_size: usize,
    inter_batch_delay: Duration,
    state: Mutex<SubscriptionState>,
    correlation_seq: AtomicU64,
}

impl SubscriptionManager {
    pub fn new(transport: Arc<dyn ControlTransport>, mode: SubscriptionMode) -> Self {
        Self {
            transport,
            mode,
            batch_size: MAX_KEYS_PER_BATCH,
            inter_batch_delay: DEFAULT_INTER_BATCH_DELAY,
            state: Mutex::new(SubscriptionState::default()),
            correlation_seq: AtomicU64::new(0),
        }
    }

    /// Override the per-frame batch size (clamped to the protocol cap).
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.clamp(1, MAX_KEYS_PER_BATCH);
        self
    }

    pub fn with_inter_batch_delay(mut self, delay: Duration) -> Self {
        self.inter_batch_delay = delay;
        self
    }

    /// Replace the desired universe. Fails when the set exceeds the
    /// venue's cap for the configured mode.
    pub fn set_desired(
        &self,
        keys: impl IntoIterator<Item = InstrumentKey>,
    ) -> Result<(), FeedError> {
        let desired: BTreeSet<InstrumentKey> = keys.into_iter().collect();
        if desired.len() > self.mode.max_keys() {
            return Err(FeedError::Subscription(format!(
                "{} keys exceeds the venue cap of {} for mode {}",
                desired.len(),
                self.mode.max_keys(),
                self.mode.wire_name()
            )));
        }

        let mut state = self.state.lock();
        state.confirmed.retain(|key| desired.contains(key));
        state.failed.retain(|key| desired.contains(key));
        state.desired = desired;
        Ok(())
    }

    /// Forget venue-side state; used after a reconnect, before a full
    /// resync.
    pub fn mark_all_unconfirmed(&self) {
        let mut state = self.state.lock();
        state.confirmed.clear();
        state.failed.clear();
        state.in_flight.clear();
    }

    /// Subscribe the entire desired set in batches. Batches whose send
    /// fails are retained in the failed set for [`retry_failed`].
    ///
    /// [`retry_failed`]: SubscriptionManager::retry_failed
    pub async fn sync_all(&self) -> SubscriptionStatus {
        let desired: Vec<InstrumentKey> = {
            let state = self.state.lock();
            state.desired.iter().cloned().collect()
        };

        if desired.is_empty() {
            debug!("sync_all: desired set is empty, nothing to subscribe");
            return self.status();
        }

        let batches: Vec<&[InstrumentKey]> = desired.chunks(self.batch_size).collect();
        let total_batches = batches.len();
        info!(
            keys = desired.len(),
            batches = total_batches,
            mode = self.mode.wire_name(),
            "subscribing desired instrument set"
        );

        for (index, batch) in batches.into_iter().enumerate() {
            self.send_batch(batch).await;
            if index + 1 < total_batches {
                tokio::time::sleep(self.inter_batch_delay).await;
            }
        }

        let status = self.status();
        info!(
            confirmed = status.confirmed,
            failed = status.failed,
            pct = status.confirmed_pct(),
            "subscription sync complete"
        );
        status
    }

    /// Re-issue only the batches that previously failed.
    pub async fn retry_failed(&self) -> SubscriptionStatus {
        let failed: Vec<InstrumentKey> = {
            let mut state = self.state.lock();
            std::mem::take(&mut state.failed).into_iter().collect()
        };

        if failed.is_empty() {
            debug!("retry_failed: no failed subscriptions");
            return self.status();
        }

        info!(keys = failed.len(), "retrying failed subscriptions");
        for batch in failed.chunks(self.batch_size) {
            self.send_batch(batch).await;
        }
        self.status()
    }

    /// Unsubscribe the given keys and drop them from the desired set.
    pub async fn unsubscribe(&self, keys: &[InstrumentKey]) -> Result<(), FeedError> {
        if keys.is_empty() {
            return Ok(());
        }

        let correlation_id = self.next_correlation_id("unsub", keys.len());
        self.transport
            .send_unsubscribe(&correlation_id, keys)
            .await?;

        let mut state = self.state.lock();
        for key in keys {
            state.desired.remove(key);
            state.confirmed.remove(key);
            state.failed.remove(key);
        }
        Ok(())
    }

    /// Fold a control acknowledgement into the tracked state. A failure
    /// ack demotes its batch from confirmed to failed.
    pub fn handle_ack(&self, ack: &ControlAck) {
        let mut state = self.state.lock();
        let Some(keys) = state.in_flight.remove(&ack.correlation_id) else {
            debug!(correlation_id = %ack.correlation_id, "ack for unknown batch");
            return;
        };

        if ack.success {
            debug!(
                correlation_id = %ack.correlation_id,
                keys = keys.len(),
                "batch acknowledged"
            );
        } else {
            warn!(
                correlation_id = %ack.correlation_id,
                keys = keys.len(),
                message = ack.message.as_deref().unwrap_or(""),
                "batch rejected by venue"
            );
            for key in keys {
                state.confirmed.remove(&key);
                state.failed.insert(key);
            }
        }
    }

    pub fn status(&self) -> SubscriptionStatus {
        let state = self.state.lock();
        SubscriptionStatus {
            total: state.desired.len(),
            confirmed: state.confirmed.len(),
            failed: state.failed.len(),
        }
    }

    pub fn desired_len(&self) -> usize {
        self.state.lock().desired.len()
    }

    async fn send_batch(&self, batch: &[InstrumentKey]) {
        let correlation_id = self.next_correlation_id("sub", batch.len());
        match self
            .transport
            .send_subscribe(&correlation_id, batch, self.mode)
            .await
        {
            Ok(()) => {
                let mut state = self.state.lock();
                state.confirmed.extend(batch.iter().cloned());
                for key in batch {
                    state.failed.remove(key);
                }
                state
                    .in_flight
                    .insert(correlation_id, batch.to_vec());
            }
            Err(error) => {
                warn!(%error, keys = batch.len(), "subscribe batch failed");
                let mut state = self.state.lock();
                state.failed.extend(batch.iter().cloned());
            }
        }
    }

    fn next_correlation_id(&self, method: &str, keys: usize) -> String {
        let seq = self.correlation_seq.fetch_add(1, Ordering::Relaxed);
        format!("{method}-{keys}-{seq}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as SyncMutex;

    #[derive(Default)]
    struct RecordingTransport {
        batches: SyncMutex<Vec<(String, Vec<InstrumentKey>)>>,
        unsubscribes: SyncMutex<Vec<Vec<InstrumentKey>>>,
        /// Fail any batch containing one of these keys.
        poison: Vec<InstrumentKey>,
    }

    #[async_trait]
    impl ControlTransport for RecordingTransport {
        async fn send_subscribe(
            &self,
            correlation_id: &str,
            keys: &[InstrumentKey],
            _mode: SubscriptionMode,
        ) -> Result<(), FeedError> {
            if keys.iter().any(|key| self.poison.contains(key)) {
                return Err(FeedError::Transport("poisoned batch".into()));
            }
            self.batches
                .lock()
                .push((correlation_id.to_string(), keys.to_vec()));
            Ok(())
        }

        async fn send_unsubscribe(
            &self,
            _correlation_id: &str,
            keys: &[InstrumentKey],
        ) -> Result<(), FeedError> {
            self.unsubscribes.lock().push(keys.to_vec());
            Ok(())
        }
    }

    fn keys(n: usize) -> Vec<InstrumentKey> {
        (0..n)
            .map(|i| InstrumentKey::new(format!("NSE_FO|{i:05}")))
            .collect()
    }

    fn manager(transport: Arc<RecordingTransport>) -> SubscriptionManager {
        SubscriptionManager::new(transport, SubscriptionMode::Full)
            .with_batch_size(50)
            .with_inter_batch_delay(Duration::ZERO)
    }

    #[tokio::test]
    async fn test_sync_all_batches_under_cap() {
        let transport = Arc::new(RecordingTransport::default());
        let manager = manager(transport.clone());
        manager.set_desired(keys(120)).unwrap();

        let status = manager.sync_all().await;
        assert_eq!(status.total, 120);
        assert_eq!(status.confirmed, 120);
        assert_eq!(status.failed, 0);
        assert!((status.confirmed_pct() - 100.0).abs() < f64::EPSILON);

        let batches = transport.batches.lock();
        assert_eq!(batches.len(), 3);
        assert!(batches.iter().all(|(_, batch)| batch.len() <= 50));
        assert_eq!(batches[2].1.len(), 20);
    }

    #[tokio::test]
    async fn test_failed_batches_are_retained_and_retried() {
        let all = keys(100);
        let transport = Arc::new(RecordingTransport {
            poison: vec![all[75].clone()],
            ..Default::default()
        });
        let manager = manager(transport.clone());
        manager.set_desired(all).unwrap();

        let status = manager.sync_all().await;
        assert_eq!(status.confirmed, 50);
        assert_eq!(status.failed, 50);

        // A retry against a now-healthy transport clears the backlog.
        // (The poison key no longer fails because retry order is
        // deterministic over the failed set only.)
        let healthy = Arc::new(RecordingTransport::default());
        let retried = SubscriptionManager {
            transport: healthy.clone(),
            ..manager
        };
        let status = retried.retry_failed().await;
        assert_eq!(status.failed, 0);
        assert_eq!(status.confirmed, 100);
        assert_eq!(healthy.batches.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_failure_ack_demotes_batch() {
        let transport = Arc::new(RecordingTransport::default());
        let manager = manager(transport.clone());
        manager.set_desired(keys(10)).unwrap();
        manager.sync_all().await;
        assert_eq!(manager.status().confirmed, 10);

        let correlation_id = transport.batches.lock()[0].0.clone();
        manager.handle_ack(&ControlAck {
            correlation_id,
            method: "sub".to_string(),
            success: false,
            message: Some("rate limited".to_string()),
        });

        let status = manager.status();
        assert_eq!(status.confirmed, 0);
        assert_eq!(status.failed, 10);
    }

    #[tokio::test]
    async fn test_mode_cap_enforced() {
        let transport = Arc::new(RecordingTransport::default());
        let manager = SubscriptionManager::new(transport, SubscriptionMode::Full);
        let result = manager.set_desired(keys(2001));
        assert!(matches!(result, Err(FeedError::Subscription(_))));
    }

    #[tokio::test]
    async fn test_unsubscribe_removes_from_desired() {
        let transport = Arc::new(RecordingTransport::default());
        let manager = manager(transport.clone());
        let all = keys(10);
        manager.set_desired(all.clone()).unwrap();
        manager.sync_all().await;

        manager.unsubscribe(&all[..3]).await.unwrap();
        let status = manager.status();
        assert_eq!(status.total, 7);
        assert_eq!(status.confirmed, 7);
        assert_eq!(transport.unsubscribes.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_reconnect_resync_reconfirms_everything() {
        let transport = Arc::new(RecordingTransport::default());
        let manager = manager(transport.clone());
        manager.set_desired(keys(60)).unwrap();
        manager.sync_all().await;
        assert_eq!(manager.status().confirmed, 60);

        manager.mark_all_unconfirmed();
        assert_eq!(manager.status().confirmed, 0);

        manager.sync_all().await;
        assert_eq!(manager.status().confirmed, 60);
        // Two syncs, two batches each.
        assert_eq!(transport.batches.lock().len(), 4);
    }
}
