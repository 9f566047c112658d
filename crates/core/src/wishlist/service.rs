//! Wishlist reconciliation engine and optimistic mutation layer.
//!
//! Structurally the cart engine's sibling, with the wishlist-specific
//! operations layered on: note upserts, membership toggling with remote
//! verification, and moving a line into the cart. The backend has no bulk
//! wishlist merge endpoint, so the login merge pushes guest lines one by
//! one and relies on the server deduplicating by (product, variant).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use log::{debug, info, warn};

use crate::cart::model::{ProductSnapshot, Variant};
use crate::lifecycle::SyncLifecycle;
use crate::remote::{AddWishlistItemRequest, WishlistApi};
use crate::session::{Session, SessionProvider, MIN_TOKEN_VALIDITY_SECS};
use crate::storage::{keys, KeyValueStore, StoreHandle, TabId};
use crate::sync::{SyncChannel, SyncTuning};
use crate::wishlist::merge::{canonical_fingerprint, merge_keep_local, upsert_item};
use crate::wishlist::model::{Wishlist, WishlistItem};
use crate::wishlist::normalize::{self, items_from_guest, wishlist_from_remote};
use crate::wishlist::payload::{WishlistItemPayload, WishlistPayload};

/// User-facing failure strings, rendered verbatim by the UI.
pub const LOAD_WISHLIST_ERROR: &str = "Failed to load wishlist data";
pub const REFRESH_WISHLIST_ERROR: &str = "Failed to refresh wishlist data";
pub const MERGE_WISHLIST_ERROR: &str = "Failed to merge wishlist data";
pub const ADD_WISHLIST_ERROR: &str = "Failed to add item to wishlist";
pub const REMOVE_WISHLIST_ERROR: &str = "Failed to remove item from wishlist";
pub const MOVE_WISHLIST_ERROR: &str = "Failed to move item to cart";
pub const NOTE_WISHLIST_ERROR: &str = "Failed to update wishlist note";

/// Read model handed to the host UI.
#[derive(Debug, Clone, PartialEq)]
pub struct WishlistSyncStatus {
    pub lifecycle: SyncLifecycle,
    pub authenticated: bool,
    pub item_count: u32,
    pub last_refresh_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

/// Host-supplied input for an add-to-wishlist action.
#[derive(Debug, Clone)]
pub struct AddWishlistInput {
    pub product: ProductSnapshot,
    pub variant: Option<Variant>,
    pub note: Option<String>,
}

struct WishlistState {
    lifecycle: SyncLifecycle,
    wishlist: Wishlist,
    error: Option<String>,
    last_refresh_at: Option<DateTime<Utc>>,
    authenticated: bool,
    user_id: Option<String>,
}

/// Wishlist engine for one tab.
pub struct WishlistService {
    remote: Arc<dyn WishlistApi>,
    sessions: Arc<dyn SessionProvider>,
    durable: StoreHandle,
    volatile: StoreHandle,
    channel: SyncChannel,
    tuning: SyncTuning,
    state: RwLock<WishlistState>,
    epoch: AtomicU64,
}

impl WishlistService {
    pub fn new(
        remote: Arc<dyn WishlistApi>,
        sessions: Arc<dyn SessionProvider>,
        durable: Arc<dyn KeyValueStore>,
        volatile: Arc<dyn KeyValueStore>,
        tab: TabId,
        tuning: SyncTuning,
    ) -> Self {
        let durable = StoreHandle::new(durable, tab);
        let volatile = StoreHandle::new(volatile, tab);
        let channel = SyncChannel::new(
            durable.clone(),
            keys::SHARED_WISHLIST_KEY,
            keys::WISHLIST_SYNC_KEY,
            tuning,
        );
        Self {
            remote,
            sessions,
            durable,
            volatile,
            channel,
            tuning,
            state: RwLock::new(WishlistState {
                lifecycle: SyncLifecycle::Uninitialized,
                wishlist: Wishlist::empty(),
                error: None,
                last_refresh_at: None,
                authenticated: false,
                user_id: None,
            }),
            epoch: AtomicU64::new(0),
        }
    }

    // ─── Read surface ────────────────────────────────────────────────

    pub fn snapshot(&self) -> Wishlist {
        self.read_state(|s| s.wishlist.clone())
    }

    pub fn status(&self) -> WishlistSyncStatus {
        self.read_state(|s| WishlistSyncStatus {
            lifecycle: s.lifecycle,
            authenticated: s.authenticated,
            item_count: s.wishlist.metadata.item_count,
            last_refresh_at: s.last_refresh_at,
            error: s.error.clone(),
        })
    }

    /// Local membership check, the cheap synchronous one the UI renders
    /// wishlist hearts from.
    pub fn is_in_wishlist(&self, product_id: i64, variant_id: Option<i64>) -> bool {
        self.read_state(|s| s.wishlist.contains_pair(product_id, variant_id))
    }

    /// Dismiss the current user-facing error, if any.
    pub fn clear_error(&self) {
        self.write_state(|s| s.error = None);
    }

    // ─── Reconciliation triggers ─────────────────────────────────────

    /// Initial load. Safe to call again; the state is rebuilt from the
    /// current session.
    pub async fn initialize(&self) {
        let session = self.sessions.session();
        let epoch = self.epoch.load(Ordering::SeqCst);
        // Record the identity before the first await so a session change
        // racing this load is classified as a transition, not a no-op.
        self.write_state(|s| {
            s.lifecycle = SyncLifecycle::Loading;
            s.error = None;
            s.authenticated = session.is_authenticated();
            s.user_id = session.user_id.clone();
        });
        info!(
            "initializing wishlist ({} session)",
            if session.is_authenticated() {
                "authenticated"
            } else {
                "guest"
            }
        );

        if session.is_authenticated() {
            self.load_authenticated(&session, true, LOAD_WISHLIST_ERROR, epoch)
                .await;
        } else {
            self.load_anonymous();
        }
    }

    /// Re-fetch the authoritative source; also recomputes the
    /// price-changed flags from the live catalog prices.
    pub async fn refresh(&self) {
        let session = self.sessions.session();
        let epoch = self.epoch.load(Ordering::SeqCst);
        if session.is_authenticated() {
            self.load_authenticated(&session, false, REFRESH_WISHLIST_ERROR, epoch)
                .await;
        } else {
            self.load_anonymous();
        }
    }

    /// React to an identity change, mirroring the cart engine's logout,
    /// login, and account-switch transitions.
    pub async fn handle_session_change(&self) {
        let session = self.sessions.session();
        let (was_auth, prev_user) = self.read_state(|s| (s.authenticated, s.user_id.clone()));
        let now_auth = session.is_authenticated();

        if was_auth == now_auth && prev_user == session.user_id {
            debug!("session unchanged, nothing to reconcile");
            return;
        }

        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.write_state(|s| {
            s.authenticated = now_auth;
            s.user_id = session.user_id.clone();
        });

        match (was_auth, now_auth) {
            (true, false) => self.perform_logout(prev_user.as_deref()),
            (false, true) => {
                info!("login detected, reconciling guest wishlist with the account");
                self.write_state(|s| {
                    s.lifecycle = SyncLifecycle::Loading;
                    s.error = None;
                });
                self.load_authenticated(&session, true, LOAD_WISHLIST_ERROR, epoch)
                    .await;
            }
            (true, true) => {
                info!("account switch detected, adopting the new account's wishlist");
                self.write_state(|s| {
                    s.lifecycle = SyncLifecycle::Loading;
                    s.error = None;
                });
                self.load_authenticated(&session, false, LOAD_WISHLIST_ERROR, epoch)
                    .await;
            }
            (false, false) => {}
        }
    }

    /// React to a cross-tab sync signal.
    pub async fn handle_sync_signal(&self) {
        let session = self.sessions.session();
        let Some(shared) = self.read_shared_wishlist() else {
            if session.is_authenticated() {
                debug!("sync signal without a shared snapshot, re-fetching");
                self.refresh().await;
            }
            return;
        };

        debug!(
            "adopting cross-tab wishlist snapshot ({} items)",
            shared.items.len()
        );
        if session.is_authenticated() {
            self.adopt_wishlist(shared, SyncLifecycle::RemoteOnly, None);
            self.refresh().await;
        } else {
            let guest = normalize::convert_to_guest(&shared.items);
            if let Err(err) = self.persist_guest(&guest) {
                warn!("guest wishlist persist failed: {err}");
            }
            self.adopt_wishlist(Wishlist::from_items(guest), SyncLifecycle::LocalOnly, None);
        }
    }

    /// Run the authenticated periodic refresh until the service is
    /// dropped.
    pub fn spawn_periodic_refresh(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let weak = Arc::downgrade(self);
        let interval = self.tuning.refresh_interval;
        debug!("wishlist refresh loop started ({interval:?})");
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let Some(service) = weak.upgrade() else { break };
                if !service.sessions.session().is_authenticated() {
                    continue;
                }
                service.refresh().await;
            }
        })
    }

    /// Listen for cross-tab signals until the service is dropped.
    pub fn spawn_signal_listener(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let weak = Arc::downgrade(self);
        let mut signals = self.channel.signals();
        tokio::spawn(async move {
            while let Some(envelope) = signals.recv().await {
                let Some(service) = weak.upgrade() else { break };
                debug!("wishlist sync signal at {}", envelope.timestamp);
                service.handle_sync_signal().await;
            }
        })
    }

    // ─── Mutations (optimistic) ──────────────────────────────────────

    /// Add a product, or update the note when the (product, variant)
    /// pair is already listed.
    pub async fn add_item(&self, input: AddWishlistInput) {
        if input.product.id <= 0 {
            warn!("rejected add to wishlist: product id {}", input.product.id);
            self.write_state(|s| s.error = Some(ADD_WISHLIST_ERROR.to_string()));
            return;
        }

        let request = AddWishlistItemRequest {
            product_id: input.product.id,
            variant_id: input.variant.as_ref().map(|v| v.id),
            note: input.note.clone(),
        };
        let item = WishlistItem::new(input.product, input.variant, input.note);

        self.run_optimistic(
            ADD_WISHLIST_ERROR,
            move |items| upsert_item(items, item),
            move |api, session| async move {
                api.add_wishlist_item(&session, &request).await.map(Some)
            },
        )
        .await;
    }

    pub async fn remove_item(&self, item_id: &str) {
        let apply_id = item_id.to_string();
        let call_id = apply_id.clone();
        self.run_optimistic(
            REMOVE_WISHLIST_ERROR,
            move |items| items.retain(|i| i.id != apply_id),
            move |api, session| async move {
                api.remove_wishlist_item(&session, &call_id).await.map(Some)
            },
        )
        .await;
    }

    /// Flip membership for a (product, variant) pair. Membership is
    /// decided from local state for the optimistic branch; when
    /// authenticated, the result is verified against the remote and a
    /// mismatch forces a corrective refresh instead of an error.
    pub async fn toggle(&self, product: ProductSnapshot, variant: Option<Variant>) {
        if product.id <= 0 {
            warn!("rejected wishlist toggle: product id {}", product.id);
            self.write_state(|s| s.error = Some(ADD_WISHLIST_ERROR.to_string()));
            return;
        }

        let product_id = product.id;
        let variant_id = variant.as_ref().map(|v| v.id);
        let existing = self.read_state(|s| {
            s.wishlist
                .find_pair(product_id, variant_id)
                .map(|item| item.id.clone())
        });

        match existing {
            Some(item_id) => self.remove_item(&item_id).await,
            None => {
                self.add_item(AddWishlistInput {
                    product,
                    variant,
                    note: None,
                })
                .await
            }
        }

        let session = self.sessions.session();
        if !session.is_authenticated() {
            return;
        }
        let expected = self.read_state(|s| s.wishlist.contains_pair(product_id, variant_id));
        match self
            .remote
            .check_membership(&session, product_id, variant_id)
            .await
        {
            Ok(verified) if verified != expected => {
                debug!(
                    "wishlist membership mismatch for product {product_id} \
                     (local {expected}, remote {verified}), refreshing"
                );
                self.refresh().await;
            }
            Ok(_) => {}
            Err(err) => warn!("wishlist membership check failed: {err}"),
        }
    }

    /// Update the note on an existing line. Remotely this rides the add
    /// endpoint, which upserts by (product, variant).
    pub async fn set_note(&self, item_id: &str, note: Option<String>) {
        let Some(item) = self.read_state(|s| {
            s.wishlist
                .items
                .iter()
                .find(|i| i.id == item_id)
                .cloned()
        }) else {
            warn!("note update for unknown wishlist line '{item_id}'");
            return;
        };

        let request = AddWishlistItemRequest {
            product_id: item.product.id,
            variant_id: item.variant_id(),
            note: note.clone(),
        };
        let apply_id = item_id.to_string();
        self.run_optimistic(
            NOTE_WISHLIST_ERROR,
            move |items| {
                if let Some(item) = items.iter_mut().find(|i| i.id == apply_id) {
                    item.note = note;
                }
            },
            move |api, session| async move {
                api.add_wishlist_item(&session, &request).await.map(Some)
            },
        )
        .await;
    }

    /// Move a line into the cart. When authenticated the server performs
    /// the cart insertion and `None` is returned (the host refreshes its
    /// cart); for a guest the removed item is returned so the host can
    /// add it to the local cart itself.
    pub async fn move_to_cart(&self, item_id: &str, quantity: u32) -> Option<WishlistItem> {
        let Some(item) = self.read_state(|s| {
            s.wishlist
                .items
                .iter()
                .find(|i| i.id == item_id)
                .cloned()
        }) else {
            warn!("move to cart for unknown wishlist line '{item_id}'");
            return None;
        };

        let session = self.sessions.session();
        let epoch = self.epoch.load(Ordering::SeqCst);
        let quantity = quantity.max(1);

        let optimistic = self.write_state(|state| {
            let metadata = std::mem::take(&mut state.wishlist.metadata);
            let mut items = std::mem::take(&mut state.wishlist.items);
            items.retain(|i| i.id != item_id);
            state.wishlist = Wishlist::with_metadata(metadata, items);
            state.error = None;
            state.wishlist.items.clone()
        });

        if !session.is_authenticated() {
            if let Err(err) = self.persist_guest(&optimistic) {
                warn!("guest wishlist persist failed: {err}");
            }
            self.publish(&optimistic);
            return Some(item);
        }

        self.refresh_token().await;
        match self.remote.move_to_cart(&session, item_id, quantity).await {
            Ok(()) => {
                if !self.epoch_current(epoch) {
                    return None;
                }
                match self.remote.fetch_wishlist(&session).await {
                    Ok(payload) => {
                        self.adopt_authenticated(&session, wishlist_from_remote(payload), None)
                    }
                    Err(err) => {
                        warn!("post-move wishlist fetch failed: {err}");
                        let metadata = self.read_state(|s| s.wishlist.metadata.clone());
                        self.adopt_authenticated(
                            &session,
                            Wishlist::with_metadata(metadata, optimistic),
                            None,
                        );
                    }
                }
                None
            }
            Err(err) => {
                warn!("wishlist move to cart failed, rolling back: {err}");
                if self.epoch_current(epoch) {
                    self.rollback(&session, MOVE_WISHLIST_ERROR, epoch).await;
                }
                None
            }
        }
    }

    // ─── Optimistic combinator ───────────────────────────────────────

    async fn run_optimistic<A, F, Fut>(&self, failure: &'static str, apply: A, remote_call: F)
    where
        A: FnOnce(&mut Vec<WishlistItem>),
        F: FnOnce(Arc<dyn WishlistApi>, Session) -> Fut,
        Fut: std::future::Future<Output = crate::errors::Result<Option<WishlistPayload>>>,
    {
        let session = self.sessions.session();
        let epoch = self.epoch.load(Ordering::SeqCst);

        // The UI sees the effect before any I/O.
        let optimistic = self.write_state(|state| {
            let metadata = std::mem::take(&mut state.wishlist.metadata);
            let mut items = std::mem::take(&mut state.wishlist.items);
            apply(&mut items);
            state.wishlist = Wishlist::with_metadata(metadata, items);
            state.error = None;
            state.wishlist.items.clone()
        });

        if !session.is_authenticated() {
            if let Err(err) = self.persist_guest(&optimistic) {
                warn!("guest wishlist persist failed: {err}");
                self.write_state(|s| s.error = Some(failure.to_string()));
                return;
            }
            self.publish(&optimistic);
            return;
        }

        self.refresh_token().await;
        match remote_call(self.remote.clone(), session.clone()).await {
            Ok(Some(payload)) => {
                if !self.epoch_current(epoch) {
                    debug!("discarding mutation result from a superseded session");
                    return;
                }
                self.adopt_authenticated(&session, wishlist_from_remote(payload), None);
            }
            Ok(None) => {
                if !self.epoch_current(epoch) {
                    return;
                }
                let metadata = self.read_state(|s| s.wishlist.metadata.clone());
                self.adopt_authenticated(
                    &session,
                    Wishlist::with_metadata(metadata, optimistic),
                    None,
                );
            }
            Err(err) => {
                warn!("wishlist mutation failed, rolling back: {err}");
                if !self.epoch_current(epoch) {
                    return;
                }
                self.rollback(&session, failure, epoch).await;
            }
        }
    }

    async fn rollback(&self, session: &Session, failure: &'static str, epoch: u64) {
        match self.remote.fetch_wishlist(session).await {
            Ok(payload) => {
                if self.epoch_current(epoch) {
                    self.adopt_authenticated(session, wishlist_from_remote(payload), Some(failure));
                }
            }
            Err(err) => {
                warn!("rollback fetch failed: {err}");
                if !self.epoch_current(epoch) {
                    return;
                }
                let backup = session
                    .user_id
                    .as_deref()
                    .map(|user_id| self.read_user_backup(user_id))
                    .unwrap_or_default();
                self.adopt_wishlist(backup, SyncLifecycle::LocalOnly, Some(failure));
            }
        }
    }

    // ─── Load paths ──────────────────────────────────────────────────

    fn load_anonymous(&self) {
        let guest = self.read_guest_items();
        let shared_guest = self
            .read_shared_wishlist()
            .map(|wishlist| normalize::convert_to_guest(&wishlist.items))
            .unwrap_or_default();

        let (items, lifecycle) = if shared_guest.is_empty()
            || canonical_fingerprint(&guest) == canonical_fingerprint(&shared_guest)
        {
            (guest, SyncLifecycle::LocalOnly)
        } else {
            let merged = merge_keep_local(&guest, &shared_guest);
            if let Err(err) = self.persist_guest(&merged) {
                warn!("guest wishlist persist failed: {err}");
            }
            self.publish(&merged);
            (merged, SyncLifecycle::Merged)
        };
        self.adopt_wishlist(Wishlist::from_items(items), lifecycle, None);
    }

    async fn load_authenticated(
        &self,
        session: &Session,
        merge_guest: bool,
        failure: &'static str,
        epoch: u64,
    ) {
        self.refresh_token().await;
        match self.remote.fetch_wishlist(session).await {
            Ok(payload) => {
                if !self.epoch_current(epoch) {
                    debug!("discarding wishlist fetch from a superseded session");
                    return;
                }
                let remote = wishlist_from_remote(payload);
                if merge_guest {
                    self.reconcile_guest_into_remote(session, remote, epoch)
                        .await;
                } else {
                    self.adopt_authenticated(session, remote, None);
                }
            }
            Err(err) => {
                warn!("wishlist fetch failed: {err}");
                if self.epoch_current(epoch) {
                    self.fall_back_to_local(session, failure);
                }
            }
        }
    }

    /// Login-time reconciliation. Guest pairs missing from the account
    /// list are pushed one add at a time; existing pairs keep the
    /// server's line untouched.
    async fn reconcile_guest_into_remote(&self, session: &Session, remote: Wishlist, epoch: u64) {
        let volatile_guest = self.read_guest_items();
        let shared_guest = self
            .read_shared_wishlist()
            .map(|wishlist| normalize::convert_to_guest(&wishlist.items))
            .unwrap_or_default();
        let guest = merge_keep_local(&volatile_guest, &shared_guest);

        if guest.is_empty() {
            self.adopt_authenticated(session, remote, None);
            return;
        }

        let missing: Vec<WishlistItem> = guest
            .iter()
            .filter(|item| {
                !remote.contains_pair(item.product.id, item.variant_id())
            })
            .cloned()
            .collect();
        if missing.is_empty() {
            // Everything is already server-side; the guest copy is spent.
            self.clear_guest_storage();
            self.adopt_authenticated(session, remote, None);
            return;
        }

        if remote.is_empty() {
            self.write_state(|s| s.lifecycle = SyncLifecycle::Merging);
            debug!(
                "pushing {} guest wishlist lines into the empty account list",
                missing.len()
            );
            match self.push_items(session, &missing).await {
                Ok(()) => {
                    self.write_state(|s| s.lifecycle = SyncLifecycle::Merged);
                    match self.remote.fetch_wishlist(session).await {
                        Ok(payload) => {
                            if !self.epoch_current(epoch) {
                                return;
                            }
                            self.clear_guest_storage();
                            self.adopt_authenticated(session, wishlist_from_remote(payload), None);
                        }
                        Err(err) => {
                            warn!("post-merge wishlist fetch failed: {err}");
                            if self.epoch_current(epoch) {
                                self.adopt_wishlist(
                                    Wishlist::from_items(guest),
                                    SyncLifecycle::LocalOnly,
                                    Some(REFRESH_WISHLIST_ERROR),
                                );
                            }
                        }
                    }
                }
                Err(err) => {
                    // Never lose the guest list: present it as-is and
                    // keep it persisted for a later retry.
                    warn!("guest wishlist merge failed: {err}");
                    if self.epoch_current(epoch) {
                        self.adopt_wishlist(
                            Wishlist::from_items(guest),
                            SyncLifecycle::LocalOnly,
                            Some(MERGE_WISHLIST_ERROR),
                        );
                    }
                }
            }
        } else {
            self.adopt_authenticated(session, remote, None);
            match self.push_items(session, &missing).await {
                Ok(()) => {
                    self.clear_guest_storage();
                    match self.remote.fetch_wishlist(session).await {
                        Ok(payload) => {
                            if self.epoch_current(epoch) {
                                self.adopt_authenticated(
                                    session,
                                    wishlist_from_remote(payload),
                                    None,
                                );
                            }
                        }
                        Err(err) => {
                            // Remote view is already adopted; the next
                            // tick heals the missing merge result.
                            warn!("post-merge wishlist fetch failed: {err}");
                        }
                    }
                }
                Err(err) => {
                    warn!("guest wishlist merge failed: {err}");
                    if self.epoch_current(epoch) {
                        self.write_state(|s| s.error = Some(MERGE_WISHLIST_ERROR.to_string()));
                    }
                }
            }
        }
    }

    async fn push_items(
        &self,
        session: &Session,
        items: &[WishlistItem],
    ) -> crate::errors::Result<()> {
        for item in items {
            let request = AddWishlistItemRequest {
                product_id: item.product.id,
                variant_id: item.variant_id(),
                note: item.note.clone(),
            };
            self.remote.add_wishlist_item(session, &request).await?;
        }
        Ok(())
    }

    fn perform_logout(&self, prev_user: Option<&str>) {
        info!("logout detected, converting wishlist to guest state");
        let items = self.read_state(|s| s.wishlist.items.clone());
        let guest = normalize::convert_to_guest(&items);

        if let Err(err) = self.persist_guest(&guest) {
            warn!("guest wishlist persist failed: {err}");
        }
        if let Some(user_id) = prev_user {
            if let Err(err) = self.durable.remove(&keys::user_wishlist_key(user_id)) {
                warn!("backup removal for user {user_id} failed: {err}");
            }
        }
        self.publish(&guest);
        self.adopt_wishlist(Wishlist::from_items(guest), SyncLifecycle::LocalOnly, None);
    }

    fn fall_back_to_local(&self, session: &Session, failure: &'static str) {
        let already_loaded = self.read_state(|s| s.lifecycle.is_loaded());
        if already_loaded {
            self.write_state(|s| s.error = Some(failure.to_string()));
            return;
        }

        let guest = self.read_guest_items();
        let wishlist = if !guest.is_empty() {
            Wishlist::from_items(guest)
        } else {
            session
                .user_id
                .as_deref()
                .map(|user_id| self.read_user_backup(user_id))
                .filter(|wishlist| !wishlist.is_empty())
                .or_else(|| self.read_shared_wishlist().filter(|w| !w.is_empty()))
                .unwrap_or_default()
        };
        self.adopt_wishlist(wishlist, SyncLifecycle::LocalOnly, Some(failure));
    }

    // ─── State and storage helpers ───────────────────────────────────

    fn read_state<R>(&self, f: impl FnOnce(&WishlistState) -> R) -> R {
        let guard = self.state.read().unwrap_or_else(|e| e.into_inner());
        f(&guard)
    }

    fn write_state<R>(&self, f: impl FnOnce(&mut WishlistState) -> R) -> R {
        let mut guard = self.state.write().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }

    fn epoch_current(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::SeqCst) == epoch
    }

    fn adopt_wishlist(&self, wishlist: Wishlist, lifecycle: SyncLifecycle, error: Option<&str>) {
        self.write_state(|state| {
            state.wishlist = wishlist;
            state.lifecycle = lifecycle;
            state.error = error.map(str::to_string);
            state.last_refresh_at = Some(Utc::now());
        });
    }

    fn adopt_authenticated(&self, session: &Session, wishlist: Wishlist, error: Option<&str>) {
        if let Some(user_id) = session.user_id.as_deref() {
            if let Err(err) = self
                .durable
                .write_value(&keys::user_wishlist_key(user_id), &wishlist.items)
            {
                warn!("wishlist backup write failed: {err}");
            }
        }
        self.publish(&wishlist.items);
        self.adopt_wishlist(wishlist, SyncLifecycle::RemoteOnly, error);
    }

    fn publish(&self, items: &[WishlistItem]) {
        if let Err(err) = self.channel.publish(items) {
            warn!("wishlist publish failed: {err}");
        }
    }

    fn persist_guest(&self, items: &[WishlistItem]) -> crate::errors::Result<()> {
        if items.is_empty() {
            self.volatile.remove(keys::GUEST_WISHLIST_KEY)
        } else {
            self.volatile.write_value(keys::GUEST_WISHLIST_KEY, items)
        }
    }

    fn clear_guest_storage(&self) {
        if let Err(err) = self.volatile.remove(keys::GUEST_WISHLIST_KEY) {
            warn!("guest wishlist removal failed: {err}");
        }
    }

    fn read_guest_items(&self) -> Vec<WishlistItem> {
        items_from_guest(self.volatile.read_list(keys::GUEST_WISHLIST_KEY))
    }

    fn read_user_backup(&self, user_id: &str) -> Wishlist {
        let payloads: Vec<WishlistItemPayload> =
            self.durable.read_list(&keys::user_wishlist_key(user_id));
        wishlist_from_remote(WishlistPayload {
            metadata: None,
            items: payloads,
        })
    }

    fn read_shared_wishlist(&self) -> Option<Wishlist> {
        let payloads: Vec<WishlistItemPayload> = self.channel.read_shared_snapshot()?;
        Some(wishlist_from_remote(WishlistPayload {
            metadata: None,
            items: payloads,
        }))
    }

    async fn refresh_token(&self) {
        if let Err(err) = self.sessions.update_token(MIN_TOKEN_VALIDITY_SECS).await {
            warn!("token refresh failed: {err}");
        }
    }
}
