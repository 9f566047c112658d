//! Cross-tab publish/subscribe built on storage-change events.
//!
//! One channel instance serves one collection (cart or wishlist) in one
//! tab. Publishing rewrites the shared snapshot slot every time and emits
//! a [`SyncEnvelope`] signal at most once per throttle window; receiving
//! filters out own-origin writes and anything not strictly newer than the
//! channel's timestamp watermark.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::Utc;
use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::errors::Result;
use crate::storage::{StoreEvent, StoreHandle};
use crate::sync::envelope::SyncEnvelope;
use crate::sync::scheduler::SyncTuning;

struct ChannelState {
    /// Instant of the last emitted signal, for throttling.
    last_signal: Option<Instant>,
    /// Highest envelope timestamp published or accepted so far.
    watermark_ms: i64,
}

struct ChannelInner {
    durable: StoreHandle,
    snapshot_key: String,
    sync_key: String,
    tuning: SyncTuning,
    state: Mutex<ChannelState>,
}

/// Cross-tab sync channel for one collection.
#[derive(Clone)]
pub struct SyncChannel {
    inner: Arc<ChannelInner>,
}

impl SyncChannel {
    pub fn new(
        durable: StoreHandle,
        snapshot_key: impl Into<String>,
        sync_key: impl Into<String>,
        tuning: SyncTuning,
    ) -> Self {
        Self {
            inner: Arc::new(ChannelInner {
                durable,
                snapshot_key: snapshot_key.into(),
                sync_key: sync_key.into(),
                tuning,
                state: Mutex::new(ChannelState {
                    last_signal: None,
                    watermark_ms: 0,
                }),
            }),
        }
    }

    /// Write `snapshot` to the shared slot and, unless throttled, signal
    /// the other tabs. Returns whether a signal was emitted.
    pub fn publish<T: Serialize + ?Sized>(&self, snapshot: &T) -> Result<bool> {
        let inner = &self.inner;
        inner.durable.write_value(&inner.snapshot_key, snapshot)?;

        let envelope = {
            let mut state = inner.state.lock().unwrap_or_else(|e| e.into_inner());
            let throttled = state
                .last_signal
                .map(|at| at.elapsed() < inner.tuning.publish_throttle)
                .unwrap_or(false);
            if throttled {
                debug!("sync signal for '{}' suppressed by throttle", inner.sync_key);
                return Ok(false);
            }
            // Guard against clock ties across tabs: signals from one
            // channel always carry strictly increasing timestamps.
            let timestamp = Utc::now().timestamp_millis().max(state.watermark_ms + 1);
            state.last_signal = Some(Instant::now());
            state.watermark_ms = timestamp;
            SyncEnvelope::update_at(timestamp)
        };

        inner.durable.write_value(&inner.sync_key, &envelope)?;
        debug!(
            "published sync signal for '{}' at {}",
            inner.sync_key, envelope.timestamp
        );
        Ok(true)
    }

    /// Latest shared snapshot, or `None` when absent or unreadable.
    /// Callers treat `None` as "re-fetch", never as "empty".
    pub fn read_shared_snapshot<T: DeserializeOwned>(&self) -> Option<T> {
        self.inner.durable.read_value(&self.inner.snapshot_key)
    }

    /// Subscribe to foreign, strictly-newer sync signals for this channel.
    pub fn signals(&self) -> SyncSignals {
        SyncSignals {
            receiver: self.inner.durable.subscribe(),
            channel: self.clone(),
        }
    }

    /// Apply the monotonic/origin filter to one storage event.
    fn accept(&self, event: &StoreEvent) -> Option<SyncEnvelope> {
        let inner = &self.inner;
        if event.key != inner.sync_key || event.origin == inner.durable.origin() {
            return None;
        }
        let raw = event.value.as_deref()?;
        let envelope: SyncEnvelope = match serde_json::from_str(raw) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!("ignoring malformed sync envelope on '{}': {err}", inner.sync_key);
                return None;
            }
        };

        let mut state = inner.state.lock().unwrap_or_else(|e| e.into_inner());
        if !envelope.is_newer_than(state.watermark_ms) {
            debug!(
                "dropping stale sync signal for '{}' ({} <= {})",
                inner.sync_key, envelope.timestamp, state.watermark_ms
            );
            return None;
        }
        state.watermark_ms = envelope.timestamp;
        Some(envelope)
    }
}

/// Stream of accepted sync signals for one channel.
pub struct SyncSignals {
    receiver: broadcast::Receiver<StoreEvent>,
    channel: SyncChannel,
}

impl SyncSignals {
    /// Next accepted signal, or `None` once the store is gone. Lagged
    /// receivers skip ahead; the periodic refresh covers missed signals.
    pub async fn recv(&mut self) -> Option<SyncEnvelope> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if let Some(envelope) = self.channel.accept(&event) {
                        return Some(envelope);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("sync listener lagged, skipped {skipped} storage events");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant used by tests and by hosts polling on their
    /// own cadence.
    pub fn try_recv(&mut self) -> Option<SyncEnvelope> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if let Some(envelope) = self.channel.accept(&event) {
                        return Some(envelope);
                    }
                }
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!("sync listener lagged, skipped {skipped} storage events");
                }
                Err(_) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::storage::{KeyValueStore, MemoryStore, StoreHandle, TabId};
    use crate::sync::envelope::SyncAction;

    fn channel_pair() -> (SyncChannel, SyncChannel, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let tuning = SyncTuning {
            publish_throttle: Duration::from_millis(40),
            refresh_interval: Duration::from_secs(30),
        };
        let a = SyncChannel::new(
            StoreHandle::new(store.clone(), TabId::allocate()),
            "shared_cart",
            "cart_sync",
            tuning,
        );
        let b = SyncChannel::new(
            StoreHandle::new(store.clone(), TabId::allocate()),
            "shared_cart",
            "cart_sync",
            tuning,
        );
        (a, b, store)
    }

    #[tokio::test]
    async fn publish_reaches_the_other_tab_once() {
        let (tab_a, tab_b, _store) = channel_pair();
        let mut signals = tab_b.signals();

        assert!(tab_a.publish(&vec!["item"]).unwrap());
        let envelope = signals.recv().await.unwrap();
        assert_eq!(envelope.action, SyncAction::Update);
        assert!(envelope.timestamp > 0);

        let snapshot: Vec<String> = tab_b.read_shared_snapshot().unwrap();
        assert_eq!(snapshot, vec!["item".to_string()]);

        // One publish, one signal.
        assert!(signals.try_recv().is_none());
    }

    #[tokio::test]
    async fn throttle_suppresses_signal_but_not_snapshot() {
        let (tab_a, tab_b, _store) = channel_pair();
        let mut signals = tab_b.signals();

        assert!(tab_a.publish(&vec![1u32]).unwrap());
        assert!(!tab_a.publish(&vec![1u32, 2]).unwrap());

        // Snapshot reflects the suppressed publish anyway.
        let snapshot: Vec<u32> = tab_b.read_shared_snapshot().unwrap();
        assert_eq!(snapshot, vec![1, 2]);

        assert!(signals.recv().await.is_some());
        assert!(signals.try_recv().is_none());

        // Outside the window the signal flows again.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(tab_a.publish(&vec![1u32, 2, 3]).unwrap());
        assert!(signals.recv().await.is_some());
    }

    #[tokio::test]
    async fn own_signals_are_filtered_out() {
        let (tab_a, _tab_b, _store) = channel_pair();
        let mut signals = tab_a.signals();

        assert!(tab_a.publish(&vec![1u32]).unwrap());
        assert!(signals.try_recv().is_none());
    }

    #[tokio::test]
    async fn stale_and_malformed_signals_are_dropped() {
        let (tab_a, tab_b, store) = channel_pair();
        let mut signals = tab_b.signals();

        assert!(tab_a.publish(&vec![1u32]).unwrap());
        let first = signals.recv().await.unwrap();

        // A replayed older envelope, written by some third tab.
        let stale = SyncEnvelope::update_at(first.timestamp - 1);
        store
            .set_item(
                "cart_sync",
                &serde_json::to_string(&stale).unwrap(),
                TabId::allocate(),
            )
            .unwrap();
        assert!(signals.try_recv().is_none());

        store
            .set_item("cart_sync", "{broken", TabId::allocate())
            .unwrap();
        assert!(signals.try_recv().is_none());
    }

    #[tokio::test]
    async fn events_on_other_keys_are_ignored() {
        let (_tab_a, tab_b, store) = channel_pair();
        let mut signals = tab_b.signals();

        store
            .set_item(
                "wishlist_sync",
                &serde_json::to_string(&SyncEnvelope::update_at(i64::MAX)).unwrap(),
                TabId::allocate(),
            )
            .unwrap();
        assert!(signals.try_recv().is_none());
    }

    #[tokio::test]
    async fn own_publish_advances_the_watermark() {
        let (_tab_a, tab_b, store) = channel_pair();

        assert!(tab_b.publish(&vec![1u32]).unwrap());
        let raw = store.get_item("cart_sync").unwrap().unwrap();
        let own_ts = serde_json::from_str::<SyncEnvelope>(&raw).unwrap().timestamp;

        // A foreign signal no newer than our own publish is stale.
        let mut signals = tab_b.signals();
        store
            .set_item(
                "cart_sync",
                &serde_json::to_string(&SyncEnvelope::update_at(own_ts)).unwrap(),
                TabId::allocate(),
            )
            .unwrap();
        assert!(signals.try_recv().is_none());
    }

    #[test]
    fn missing_snapshot_reads_as_none() {
        let (tab_a, _tab_b, _store) = channel_pair();
        assert!(tab_a.read_shared_snapshot::<Vec<u32>>().is_none());
    }
}
