//! Sync cadence configuration.
//!
//! The defaults match the deployed storefront. Neither value is
//! load-bearing; hosts override them through [`SyncTuning`].

use std::time::Duration;

/// Minimum gap between cross-tab broadcast signals per channel. Rapid
/// successive mutations inside one window publish their snapshot but emit
/// at most one signal.
pub const PUBLISH_THROTTLE_SECS: u64 = 2;

/// Remote re-fetch interval while authenticated. This is the only path by
/// which server-side changes (admin price adjustments, support edits)
/// reach an open tab; there is no push channel.
pub const REMOTE_REFRESH_INTERVAL_SECS: u64 = 30;

/// Tunable sync cadence, injected into each service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncTuning {
    /// Cross-tab signal throttle window.
    pub publish_throttle: Duration,
    /// Authenticated periodic refresh interval.
    pub refresh_interval: Duration,
}

impl Default for SyncTuning {
    fn default() -> Self {
        Self {
            publish_throttle: Duration::from_secs(PUBLISH_THROTTLE_SECS),
            refresh_interval: Duration::from_secs(REMOTE_REFRESH_INTERVAL_SECS),
        }
    }
}
