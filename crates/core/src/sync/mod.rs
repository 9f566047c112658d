//! Cross-tab synchronization: envelope contract, cadence config, and the
//! publish/subscribe channel over storage events.

pub mod channel;
pub mod envelope;
pub mod scheduler;

pub use channel::{SyncChannel, SyncSignals};
pub use envelope::{SyncAction, SyncEnvelope};
pub use scheduler::{SyncTuning, PUBLISH_THROTTLE_SECS, REMOTE_REFRESH_INTERVAL_SECS};
