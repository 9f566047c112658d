//! Reconciliation lifecycle shared by the cart and wishlist engines.

/// Lifecycle of one tab's reconciled state.
///
/// `LocalOnly`, `RemoteOnly`, and `Merged` are resting states naming the
/// source of the presented list; `Loading` and `Merging` are transient.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncLifecycle {
    Uninitialized,
    Loading,
    /// Guest list, or the local fallback after a remote failure.
    LocalOnly,
    /// Server state adopted verbatim.
    RemoteOnly,
    Merging,
    /// Client-side merge product (guest list crossed with the shared
    /// snapshot).
    Merged,
}

impl SyncLifecycle {
    /// True once a first load has settled, whatever the source.
    pub fn is_loaded(&self) -> bool {
        !matches!(self, Self::Uninitialized | Self::Loading)
    }
}
