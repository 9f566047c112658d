//! Cross-tab sync signal.
//!
//! The envelope carries no item data. It is a timestamped "something
//! changed" marker written to a dedicated storage key; the full snapshot
//! travels through the shared snapshot slot.

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Signal kind. Only updates exist today; the tag stays explicit so the
/// persisted shape is forward-compatible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncAction {
    Update,
}

/// Payload written to the `cart_sync` / `wishlist_sync` keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncEnvelope {
    pub action: SyncAction,
    /// Milliseconds since the Unix epoch at publish time.
    pub timestamp: i64,
}

impl SyncEnvelope {
    pub fn update_at(timestamp: i64) -> Self {
        Self {
            action: SyncAction::Update,
            timestamp,
        }
    }

    pub fn update_now() -> Self {
        Self::update_at(Utc::now().timestamp_millis())
    }

    /// Monotonic de-duplication check: only strictly newer signals are
    /// acted upon.
    pub fn is_newer_than(&self, last_seen: i64) -> bool {
        self.timestamp > last_seen
    }
}
