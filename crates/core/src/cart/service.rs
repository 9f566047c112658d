//! Cart reconciliation engine and optimistic mutation layer.
//!
//! One `CartService` instance lives in each tab. It owns the cart state
//! for that tab and converges it across the volatile guest store, the
//! per-user durable backup, the shared cross-tab snapshot, and the remote
//! account cart, depending on the session. Reconciliation runs on six
//! triggers: initial load, logout, login, account switch, the periodic
//! refresh, and cross-tab sync signals.
//!
//! Failure policy: no public entry point fails. Remote and storage
//! problems are logged, the state falls back to the best local snapshot,
//! and the host reads a generic user-facing message from
//! [`CartSyncStatus::error`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use log::{debug, info, warn};

use crate::cart::merge::{canonical_fingerprint, merge_keep_local, upsert_item};
use crate::cart::model::{Cart, CartItem, ProductSnapshot, Variant};
use crate::cart::normalize::{self, cart_from_remote, items_from_guest};
use crate::cart::payload::{CartItemPayload, CartPayload};
use crate::lifecycle::SyncLifecycle;
use crate::remote::{AddItemRequest, CartApi, MergeItem};
use crate::session::{Session, SessionProvider, MIN_TOKEN_VALIDITY_SECS};
use crate::storage::{keys, KeyValueStore, StoreHandle, TabId};
use crate::sync::{SyncChannel, SyncTuning};

/// User-facing failure strings. The UI renders these verbatim; raw error
/// detail stays in the logs.
pub const LOAD_CART_ERROR: &str = "Failed to load cart data";
pub const REFRESH_CART_ERROR: &str = "Failed to refresh cart data";
pub const MERGE_CART_ERROR: &str = "Failed to merge cart data";
pub const ADD_CART_ERROR: &str = "Failed to add item to cart";
pub const UPDATE_CART_ERROR: &str = "Failed to update cart item";
pub const REMOVE_CART_ERROR: &str = "Failed to remove item from cart";
pub const CLEAR_CART_ERROR: &str = "Failed to clear cart";

/// Read model handed to the host UI.
#[derive(Debug, Clone, PartialEq)]
pub struct CartSyncStatus {
    pub lifecycle: SyncLifecycle,
    pub authenticated: bool,
    pub item_count: u32,
    pub last_refresh_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

/// Host-supplied input for an add-to-cart action.
#[derive(Debug, Clone)]
pub struct AddItemInput {
    pub product: ProductSnapshot,
    pub variant: Option<Variant>,
    pub quantity: u32,
    /// `true` sets the pair's quantity; `false` adds to it.
    pub replace_quantity: bool,
}

struct CartState {
    lifecycle: SyncLifecycle,
    cart: Cart,
    error: Option<String>,
    last_refresh_at: Option<DateTime<Utc>>,
    /// Identity the current state was reconciled for.
    authenticated: bool,
    user_id: Option<String>,
}

/// Cart engine for one tab.
pub struct CartService {
    remote: Arc<dyn CartApi>,
    sessions: Arc<dyn SessionProvider>,
    durable: StoreHandle,
    volatile: StoreHandle,
    channel: SyncChannel,
    tuning: SyncTuning,
    state: RwLock<CartState>,
    /// Bumped on every session transition; in-flight results from an
    /// older epoch are discarded instead of applied.
    epoch: AtomicU64,
}

impl CartService {
    pub fn new(
        remote: Arc<dyn CartApi>,
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
            keys::SHARED_CART_KEY,
            keys::CART_SYNC_KEY,
            tuning,
        );
        Self {
            remote,
            sessions,
            durable,
            volatile,
            channel,
            tuning,
            state: RwLock::new(CartState {
                lifecycle: SyncLifecycle::Uninitialized,
                cart: Cart::empty(),
                error: None,
                last_refresh_at: None,
                authenticated: false,
                user_id: None,
            }),
            epoch: AtomicU64::new(0),
        }
    }

    // ─── Read surface ────────────────────────────────────────────────

    pub fn snapshot(&self) -> Cart {
        self.read_state(|s| s.cart.clone())
    }

    pub fn status(&self) -> CartSyncStatus {
        self.read_state(|s| CartSyncStatus {
            lifecycle: s.lifecycle,
            authenticated: s.authenticated,
            item_count: s.cart.item_count,
            last_refresh_at: s.last_refresh_at,
            error: s.error.clone(),
        })
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
            "initializing cart ({} session)",
            if session.is_authenticated() {
                "authenticated"
            } else {
                "guest"
            }
        );

        if session.is_authenticated() {
            self.load_authenticated(&session, true, LOAD_CART_ERROR, epoch)
                .await;
        } else {
            self.load_anonymous();
        }
    }

    /// Re-fetch the authoritative source. The periodic tick lands here,
    /// as do host-driven refreshes.
    pub async fn refresh(&self) {
        let session = self.sessions.session();
        let epoch = self.epoch.load(Ordering::SeqCst);
        if session.is_authenticated() {
            self.load_authenticated(&session, false, REFRESH_CART_ERROR, epoch)
                .await;
        } else {
            self.load_anonymous();
        }
    }

    /// React to an identity change. Decides between the logout, login,
    /// and account-switch transitions by comparing the provider session
    /// with the identity the state was last reconciled for.
    pub async fn handle_session_change(&self) {
        let session = self.sessions.session();
        let (was_auth, prev_user) = self.read_state(|s| (s.authenticated, s.user_id.clone()));
        let now_auth = session.is_authenticated();

        if was_auth == now_auth && prev_user == session.user_id {
            debug!("session unchanged, nothing to reconcile");
            return;
        }

        // Results of calls started under the previous identity must not
        // be applied to the new one.
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.write_state(|s| {
            s.authenticated = now_auth;
            s.user_id = session.user_id.clone();
        });

        match (was_auth, now_auth) {
            (true, false) => self.perform_logout(prev_user.as_deref()),
            (false, true) => {
                info!("login detected, reconciling guest cart with the account");
                self.write_state(|s| {
                    s.lifecycle = SyncLifecycle::Loading;
                    s.error = None;
                });
                self.load_authenticated(&session, true, LOAD_CART_ERROR, epoch)
                    .await;
            }
            (true, true) => {
                info!("account switch detected, adopting the new account's cart");
                self.write_state(|s| {
                    s.lifecycle = SyncLifecycle::Loading;
                    s.error = None;
                });
                // The previous user's items are never merged into the
                // new account.
                self.load_authenticated(&session, false, LOAD_CART_ERROR, epoch)
                    .await;
            }
            (false, false) => {}
        }
    }

    /// React to a cross-tab sync signal: adopt the shared snapshot for
    /// immediacy, then re-fetch remote truth when authenticated.
    pub async fn handle_sync_signal(&self) {
        let session = self.sessions.session();
        let Some(shared) = self.read_shared_cart() else {
            // Absent snapshot never means "empty": re-fetch instead.
            if session.is_authenticated() {
                debug!("sync signal without a shared snapshot, re-fetching");
                self.refresh().await;
            }
            return;
        };

        debug!(
            "adopting cross-tab cart snapshot ({} items)",
            shared.items.len()
        );
        if session.is_authenticated() {
            self.adopt_cart(shared, SyncLifecycle::RemoteOnly, None);
            self.refresh().await;
        } else {
            let guest = normalize::convert_to_guest(&shared.items);
            if let Err(err) = self.persist_guest(&guest) {
                warn!("guest cart persist failed: {err}");
            }
            self.adopt_cart(Cart::from_items(guest), SyncLifecycle::LocalOnly, None);
        }
    }

    /// Run the authenticated periodic refresh until the service is
    /// dropped. This is the only path by which server-side changes reach
    /// an open tab.
    pub fn spawn_periodic_refresh(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let weak = Arc::downgrade(self);
        let interval = self.tuning.refresh_interval;
        debug!("cart refresh loop started ({interval:?})");
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
                debug!("cart sync signal at {}", envelope.timestamp);
                service.handle_sync_signal().await;
            }
        })
    }

    // ─── Mutations (optimistic) ──────────────────────────────────────

    pub async fn add_item(&self, input: AddItemInput) {
        if input.product.id <= 0 || input.quantity == 0 {
            warn!(
                "rejected add to cart: product id {}, quantity {}",
                input.product.id, input.quantity
            );
            self.write_state(|s| s.error = Some(ADD_CART_ERROR.to_string()));
            return;
        }

        let request = AddItemRequest {
            product_id: input.product.id,
            variant_id: input.variant.as_ref().map(|v| v.id),
            quantity: input.quantity,
            replace_quantity: input.replace_quantity,
        };
        let item = CartItem::new(input.product, input.variant, input.quantity);
        let replace = input.replace_quantity;

        self.run_optimistic(
            ADD_CART_ERROR,
            move |items| upsert_item(items, item, replace),
            move |api, session| async move { api.add_item(&session, &request).await.map(Some) },
        )
        .await;
    }

    /// Set a line's quantity. Zero or negative removes the line.
    pub async fn update_quantity(&self, item_id: &str, quantity: i64) {
        if quantity <= 0 {
            self.remove_item(item_id).await;
            return;
        }
        if !self.read_state(|s| s.cart.items.iter().any(|i| i.id == item_id)) {
            warn!("quantity update for unknown cart line '{item_id}'");
            return;
        }

        let quantity = quantity.min(u32::MAX as i64) as u32;
        let apply_id = item_id.to_string();
        let call_id = apply_id.clone();
        self.run_optimistic(
            UPDATE_CART_ERROR,
            move |items| {
                if let Some(item) = items.iter_mut().find(|i| i.id == apply_id) {
                    item.quantity = quantity;
                    item.recompute_line_total();
                }
            },
            move |api, session| async move {
                api.update_item(&session, &call_id, quantity).await.map(Some)
            },
        )
        .await;
    }

    pub async fn remove_item(&self, item_id: &str) {
        let apply_id = item_id.to_string();
        let call_id = apply_id.clone();
        self.run_optimistic(
            REMOVE_CART_ERROR,
            move |items| items.retain(|i| i.id != apply_id),
            move |api, session| async move { api.remove_item(&session, &call_id).await.map(Some) },
        )
        .await;
    }

    pub async fn clear(&self) {
        self.run_optimistic(
            CLEAR_CART_ERROR,
            |items| items.clear(),
            move |api, session| async move { api.clear_cart(&session).await.map(|_| None) },
        )
        .await;
    }

    /// Support surface: wipe one user's durable backup and, when they
    /// are the current session, their server cart too.
    pub async fn clear_for_user(&self, user_id: &str) {
        if let Err(err) = self.durable.remove(&keys::user_cart_key(user_id)) {
            warn!("backup removal for user {user_id} failed: {err}");
        }
        let session = self.sessions.session();
        if session.is_authenticated() && session.user_id.as_deref() == Some(user_id) {
            self.refresh_token().await;
            match self.remote.clear_cart_for_user(&session, user_id).await {
                Ok(()) => self.adopt_authenticated(&session, Cart::empty(), None),
                Err(err) => {
                    warn!("remote cart clear for user {user_id} failed: {err}");
                    self.write_state(|s| s.error = Some(CLEAR_CART_ERROR.to_string()));
                }
            }
        }
    }

    // ─── Optimistic combinator ───────────────────────────────────────

    /// Apply a mutation locally, confirm it against the authoritative
    /// backend, and either adopt the authoritative response or roll
    /// back by re-running the fetch path.
    async fn run_optimistic<A, F, Fut>(&self, failure: &'static str, apply: A, remote_call: F)
    where
        A: FnOnce(&mut Vec<CartItem>),
        F: FnOnce(Arc<dyn CartApi>, Session) -> Fut,
        Fut: std::future::Future<Output = crate::errors::Result<Option<CartPayload>>>,
    {
        let session = self.sessions.session();
        let epoch = self.epoch.load(Ordering::SeqCst);

        // The UI sees the effect before any I/O.
        let optimistic = self.write_state(|state| {
            let mut items = std::mem::take(&mut state.cart.items);
            apply(&mut items);
            state.cart = Cart::from_items(items);
            state.error = None;
            state.cart.items.clone()
        });

        if !session.is_authenticated() {
            if let Err(err) = self.persist_guest(&optimistic) {
                warn!("guest cart persist failed: {err}");
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
                // Authoritative response wins over the optimistic guess.
                self.adopt_authenticated(&session, cart_from_remote(payload), None);
            }
            Ok(None) => {
                if !self.epoch_current(epoch) {
                    return;
                }
                self.adopt_authenticated(&session, Cart::from_items(optimistic), None);
            }
            Err(err) => {
                warn!("cart mutation failed, rolling back: {err}");
                if !self.epoch_current(epoch) {
                    return;
                }
                self.rollback(&session, failure, epoch).await;
            }
        }
    }

    /// Discard the optimistic state: re-fetch the server cart, or fall
    /// back to the per-user backup when even the fetch fails.
    async fn rollback(&self, session: &Session, failure: &'static str, epoch: u64) {
        match self.remote.fetch_cart(session).await {
            Ok(payload) => {
                if self.epoch_current(epoch) {
                    self.adopt_authenticated(session, cart_from_remote(payload), Some(failure));
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
                self.adopt_cart(backup, SyncLifecycle::LocalOnly, Some(failure));
            }
        }
    }

    // ─── Load paths ──────────────────────────────────────────────────

    /// Guest state: volatile list cross-checked against the shared
    /// snapshot, merged keep-local when they diverge.
    fn load_anonymous(&self) {
        let guest = self.read_guest_items();
        let shared_guest = self
            .read_shared_cart()
            .map(|cart| normalize::convert_to_guest(&cart.items))
            .unwrap_or_default();

        let (cart, lifecycle) = if shared_guest.is_empty()
            || canonical_fingerprint(&guest) == canonical_fingerprint(&shared_guest)
        {
            (Cart::from_items(guest), SyncLifecycle::LocalOnly)
        } else {
            let merged = merge_keep_local(&guest, &shared_guest);
            if let Err(err) = self.persist_guest(&merged) {
                warn!("guest cart persist failed: {err}");
            }
            self.publish(&merged);
            (Cart::from_items(merged), SyncLifecycle::Merged)
        };
        self.adopt_cart(cart, lifecycle, None);
    }

    async fn load_authenticated(
        &self,
        session: &Session,
        merge_guest: bool,
        failure: &'static str,
        epoch: u64,
    ) {
        self.refresh_token().await;
        match self.remote.fetch_cart(session).await {
            Ok(payload) => {
                if !self.epoch_current(epoch) {
                    debug!("discarding cart fetch from a superseded session");
                    return;
                }
                let remote_cart = cart_from_remote(payload);
                if merge_guest {
                    self.reconcile_guest_into_remote(session, remote_cart, epoch)
                        .await;
                } else {
                    self.adopt_authenticated(session, remote_cart, None);
                }
            }
            Err(err) => {
                warn!("cart fetch failed: {err}");
                if self.epoch_current(epoch) {
                    self.fall_back_to_local(session, failure);
                }
            }
        }
    }

    /// Login-time reconciliation of guest items with the account cart.
    async fn reconcile_guest_into_remote(&self, session: &Session, remote_cart: Cart, epoch: u64) {
        let volatile_guest = self.read_guest_items();
        let shared_guest = self
            .read_shared_cart()
            .map(|cart| normalize::convert_to_guest(&cart.items))
            .unwrap_or_default();
        let guest = merge_keep_local(&volatile_guest, &shared_guest);

        if guest.is_empty() {
            self.adopt_authenticated(session, remote_cart, None);
            return;
        }
        let merge_items: Vec<MergeItem> = guest.iter().map(MergeItem::from).collect();

        if remote_cart.is_empty() {
            // Guest list is the only content; push it server-side, then
            // re-fetch the authoritative result.
            self.write_state(|s| s.lifecycle = SyncLifecycle::Merging);
            debug!("merging {} guest lines into the empty account cart", guest.len());
            match self.remote.merge_guest_cart(session, &merge_items).await {
                Ok(()) => {
                    self.write_state(|s| s.lifecycle = SyncLifecycle::Merged);
                    match self.remote.fetch_cart(session).await {
                        Ok(payload) => {
                            if !self.epoch_current(epoch) {
                                return;
                            }
                            self.clear_guest_storage();
                            self.adopt_authenticated(session, cart_from_remote(payload), None);
                        }
                        Err(err) => {
                            warn!("post-merge cart fetch failed: {err}");
                            if self.epoch_current(epoch) {
                                self.adopt_cart(
                                    Cart::from_items(guest),
                                    SyncLifecycle::LocalOnly,
                                    Some(REFRESH_CART_ERROR),
                                );
                            }
                        }
                    }
                }
                Err(err) => {
                    // Never lose the guest list: present it as-is and
                    // keep it persisted for a later retry.
                    warn!("guest cart merge failed: {err}");
                    if self.epoch_current(epoch) {
                        self.adopt_cart(
                            Cart::from_items(guest),
                            SyncLifecycle::LocalOnly,
                            Some(MERGE_CART_ERROR),
                        );
                    }
                }
            }
        } else {
            // Remote is authoritative; guest lines are still offered to
            // the server, which dedupes by (product, variant).
            self.adopt_authenticated(session, remote_cart, None);
            match self.remote.merge_guest_cart(session, &merge_items).await {
                Ok(()) => {
                    self.clear_guest_storage();
                    match self.remote.fetch_cart(session).await {
                        Ok(payload) => {
                            if self.epoch_current(epoch) {
                                self.adopt_authenticated(session, cart_from_remote(payload), None);
                            }
                        }
                        Err(err) => {
                            // Remote view is already adopted; the next
                            // tick heals the missing merge result.
                            warn!("post-merge cart fetch failed: {err}");
                        }
                    }
                }
                Err(err) => {
                    warn!("guest cart merge failed: {err}");
                    if self.epoch_current(epoch) {
                        self.write_state(|s| s.error = Some(MERGE_CART_ERROR.to_string()));
                    }
                }
            }
        }
    }

    /// Logout: the account cart is carried over as the guest list.
    fn perform_logout(&self, prev_user: Option<&str>) {
        info!("logout detected, converting cart to guest state");
        let items = self.read_state(|s| s.cart.items.clone());
        let guest = normalize::convert_to_guest(&items);

        if let Err(err) = self.persist_guest(&guest) {
            warn!("guest cart persist failed: {err}");
        }
        if let Some(user_id) = prev_user {
            if let Err(err) = self.durable.remove(&keys::user_cart_key(user_id)) {
                warn!("backup removal for user {user_id} failed: {err}");
            }
        }
        self.publish(&guest);
        self.adopt_cart(Cart::from_items(guest), SyncLifecycle::LocalOnly, None);
    }

    /// Remote is unreachable: keep the last-known snapshot, or assemble
    /// the best local one on a cold start.
    fn fall_back_to_local(&self, session: &Session, failure: &'static str) {
        let already_loaded = self.read_state(|s| s.lifecycle.is_loaded());
        if already_loaded {
            self.write_state(|s| s.error = Some(failure.to_string()));
            return;
        }

        let guest = self.read_guest_items();
        let cart = if !guest.is_empty() {
            Cart::from_items(guest)
        } else {
            session
                .user_id
                .as_deref()
                .map(|user_id| self.read_user_backup(user_id))
                .filter(|cart| !cart.is_empty())
                .or_else(|| self.read_shared_cart().filter(|cart| !cart.is_empty()))
                .unwrap_or_default()
        };
        self.adopt_cart(cart, SyncLifecycle::LocalOnly, Some(failure));
    }

    // ─── State and storage helpers ───────────────────────────────────

    fn read_state<R>(&self, f: impl FnOnce(&CartState) -> R) -> R {
        let guard = self.state.read().unwrap_or_else(|e| e.into_inner());
        f(&guard)
    }

    fn write_state<R>(&self, f: impl FnOnce(&mut CartState) -> R) -> R {
        let mut guard = self.state.write().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }

    fn epoch_current(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::SeqCst) == epoch
    }

    fn adopt_cart(&self, cart: Cart, lifecycle: SyncLifecycle, error: Option<&str>) {
        self.write_state(|state| {
            state.cart = cart;
            state.lifecycle = lifecycle;
            state.error = error.map(str::to_string);
            state.last_refresh_at = Some(Utc::now());
        });
    }

    /// Adopt a server-derived cart: back it up under the user's durable
    /// key, broadcast it, and mark the state remote-authoritative.
    fn adopt_authenticated(&self, session: &Session, cart: Cart, error: Option<&str>) {
        if let Some(user_id) = session.user_id.as_deref() {
            if let Err(err) = self
                .durable
                .write_value(&keys::user_cart_key(user_id), &cart.items)
            {
                warn!("cart backup write failed: {err}");
            }
        }
        self.publish(&cart.items);
        self.adopt_cart(cart, SyncLifecycle::RemoteOnly, error);
    }

    fn publish(&self, items: &[CartItem]) {
        if let Err(err) = self.channel.publish(items) {
            warn!("cart publish failed: {err}");
        }
    }

    fn persist_guest(&self, items: &[CartItem]) -> crate::errors::Result<()> {
        if items.is_empty() {
            self.volatile.remove(keys::GUEST_CART_KEY)
        } else {
            self.volatile.write_value(keys::GUEST_CART_KEY, items)
        }
    }

    fn clear_guest_storage(&self) {
        if let Err(err) = self.volatile.remove(keys::GUEST_CART_KEY) {
            warn!("guest cart removal failed: {err}");
        }
    }

    fn read_guest_items(&self) -> Vec<CartItem> {
        items_from_guest(self.volatile.read_list(keys::GUEST_CART_KEY))
    }

    fn read_user_backup(&self, user_id: &str) -> Cart {
        let payloads: Vec<CartItemPayload> = self.durable.read_list(&keys::user_cart_key(user_id));
        cart_from_remote(CartPayload { items: payloads })
    }

    fn read_shared_cart(&self) -> Option<Cart> {
        let payloads: Vec<CartItemPayload> = self.channel.read_shared_snapshot()?;
        Some(cart_from_remote(CartPayload { items: payloads }))
    }

    async fn refresh_token(&self) {
        if let Err(err) = self.sessions.update_token(MIN_TOKEN_VALIDITY_SECS).await {
            warn!("token refresh failed: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use rust_decimal_macros::dec;

    use super::*;
    use crate::errors::Error;
    use crate::session::StaticSessionProvider;
    use crate::storage::MemoryStore;

    #[derive(Debug, Clone)]
    struct ServerLine {
        id: u64,
        product_id: i64,
        variant_id: Option<i64>,
        quantity: u32,
    }

    /// In-memory stand-in for the storefront backend with the real cart
    /// semantics: pair uniqueness, replace-vs-add, and merge keeping the
    /// server quantity for existing pairs.
    struct FakeCartServer {
        catalog: HashMap<i64, rust_decimal::Decimal>,
        carts: Mutex<HashMap<String, Vec<ServerLine>>>,
        next_id: AtomicU64,
        fail_fetch: AtomicBool,
        fail_mutations: AtomicBool,
        fail_merge: AtomicBool,
        delay_next_fetch: Mutex<Option<Duration>>,
        fetch_calls: AtomicUsize,
        merge_calls: AtomicUsize,
    }

    impl FakeCartServer {
        fn new() -> Self {
            let mut catalog = HashMap::new();
            catalog.insert(7, dec!(12.50));
            catalog.insert(8, dec!(5.00));
            catalog.insert(9, dec!(99.90));
            Self {
                catalog,
                carts: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                fail_fetch: AtomicBool::new(false),
                fail_mutations: AtomicBool::new(false),
                fail_merge: AtomicBool::new(false),
                delay_next_fetch: Mutex::new(None),
                fetch_calls: AtomicUsize::new(0),
                merge_calls: AtomicUsize::new(0),
            }
        }

        fn seed(&self, user: &str, product_id: i64, variant_id: Option<i64>, quantity: u32) {
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            self.carts
                .lock()
                .unwrap()
                .entry(user.to_string())
                .or_default()
                .push(ServerLine {
                    id,
                    product_id,
                    variant_id,
                    quantity,
                });
        }

        fn quantity_of(&self, user: &str, product_id: i64) -> Option<u32> {
            self.carts
                .lock()
                .unwrap()
                .get(user)?
                .iter()
                .find(|line| line.product_id == product_id)
                .map(|line| line.quantity)
        }

        fn line_count(&self, user: &str) -> usize {
            self.carts
                .lock()
                .unwrap()
                .get(user)
                .map(Vec::len)
                .unwrap_or(0)
        }

        fn payload_for(&self, user: &str) -> CartPayload {
            let carts = self.carts.lock().unwrap();
            let items = carts
                .get(user)
                .map(|lines| {
                    lines
                        .iter()
                        .map(|line| CartItemPayload {
                            id: Some(line.id.to_string()),
                            product_id: Some(line.product_id),
                            variant_id: line.variant_id,
                            quantity: Some(line.quantity as i64),
                            unit_price: self.catalog.get(&line.product_id).copied(),
                            ..Default::default()
                        })
                        .collect()
                })
                .unwrap_or_default();
            CartPayload { items }
        }

        fn user_of(session: &Session) -> crate::errors::Result<String> {
            session
                .user_id
                .clone()
                .ok_or_else(|| Error::rejected(Some(401), "session utilisateur manquante"))
        }
    }

    #[async_trait]
    impl CartApi for FakeCartServer {
        async fn fetch_cart(&self, session: &Session) -> crate::errors::Result<CartPayload> {
            self.fetch_calls.fetch_add(1, Ordering::SeqCst);
            let delay = self.delay_next_fetch.lock().unwrap().take();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail_fetch.load(Ordering::SeqCst) {
                return Err(Error::remote("connection refused"));
            }
            Ok(self.payload_for(&Self::user_of(session)?))
        }

        async fn add_item(
            &self,
            session: &Session,
            request: &AddItemRequest,
        ) -> crate::errors::Result<CartPayload> {
            if self.fail_mutations.load(Ordering::SeqCst) {
                return Err(Error::rejected(Some(500), "erreur interne"));
            }
            let user = Self::user_of(session)?;
            {
                let mut carts = self.carts.lock().unwrap();
                let lines = carts.entry(user.clone()).or_default();
                match lines.iter_mut().find(|line| {
                    line.product_id == request.product_id && line.variant_id == request.variant_id
                }) {
                    Some(line) if request.replace_quantity => line.quantity = request.quantity,
                    Some(line) => line.quantity += request.quantity,
                    None => {
                        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
                        lines.push(ServerLine {
                            id,
                            product_id: request.product_id,
                            variant_id: request.variant_id,
                            quantity: request.quantity,
                        });
                    }
                }
            }
            Ok(self.payload_for(&user))
        }

        async fn update_item(
            &self,
            session: &Session,
            item_id: &str,
            quantity: u32,
        ) -> crate::errors::Result<CartPayload> {
            if self.fail_mutations.load(Ordering::SeqCst) {
                return Err(Error::rejected(Some(500), "erreur interne"));
            }
            let user = Self::user_of(session)?;
            {
                let mut carts = self.carts.lock().unwrap();
                let line = carts
                    .entry(user.clone())
                    .or_default()
                    .iter_mut()
                    .find(|line| line.id.to_string() == item_id)
                    .ok_or_else(|| Error::rejected(Some(404), "article introuvable"))?;
                line.quantity = quantity;
            }
            Ok(self.payload_for(&user))
        }

        async fn remove_item(
            &self,
            session: &Session,
            item_id: &str,
        ) -> crate::errors::Result<CartPayload> {
            if self.fail_mutations.load(Ordering::SeqCst) {
                return Err(Error::rejected(Some(500), "erreur interne"));
            }
            let user = Self::user_of(session)?;
            self.carts
                .lock()
                .unwrap()
                .entry(user.clone())
                .or_default()
                .retain(|line| line.id.to_string() != item_id);
            Ok(self.payload_for(&user))
        }

        async fn clear_cart(&self, session: &Session) -> crate::errors::Result<()> {
            if self.fail_mutations.load(Ordering::SeqCst) {
                return Err(Error::rejected(Some(500), "erreur interne"));
            }
            self.carts.lock().unwrap().remove(&Self::user_of(session)?);
            Ok(())
        }

        async fn clear_cart_for_user(
            &self,
            _session: &Session,
            user_id: &str,
        ) -> crate::errors::Result<()> {
            self.carts.lock().unwrap().remove(user_id);
            Ok(())
        }

        async fn merge_guest_cart(
            &self,
            session: &Session,
            items: &[MergeItem],
        ) -> crate::errors::Result<()> {
            self.merge_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_merge.load(Ordering::SeqCst) {
                return Err(Error::rejected(Some(500), "fusion impossible"));
            }
            let user = Self::user_of(session)?;
            let mut carts = self.carts.lock().unwrap();
            let lines = carts.entry(user).or_default();
            for item in items {
                let exists = lines.iter().any(|line| {
                    line.product_id == item.product_id && line.variant_id == item.variant_id
                });
                if !exists {
                    let id = self.next_id.fetch_add(1, Ordering::SeqCst);
                    lines.push(ServerLine {
                        id,
                        product_id: item.product_id,
                        variant_id: item.variant_id,
                        quantity: item.quantity,
                    });
                }
            }
            Ok(())
        }
    }

    struct Fixture {
        server: Arc<FakeCartServer>,
        sessions: Arc<StaticSessionProvider>,
        durable: Arc<MemoryStore>,
        volatile: Arc<MemoryStore>,
        service: Arc<CartService>,
    }

    impl Fixture {
        fn anonymous() -> Self {
            Self::with_session(Session::anonymous())
        }

        fn with_session(session: Session) -> Self {
            let server = Arc::new(FakeCartServer::new());
            let sessions = Arc::new(StaticSessionProvider::new(session));
            let durable = Arc::new(MemoryStore::new());
            let volatile = Arc::new(MemoryStore::new());
            let service = Arc::new(CartService::new(
                server.clone(),
                sessions.clone(),
                durable.clone(),
                volatile.clone(),
                TabId::allocate(),
                SyncTuning::default(),
            ));
            Self {
                server,
                sessions,
                durable,
                volatile,
                service,
            }
        }

        /// Same tab after a page reload: both stores survive.
        fn reload(&self) -> Arc<CartService> {
            Arc::new(CartService::new(
                self.server.clone(),
                self.sessions.clone(),
                self.durable.clone(),
                self.volatile.clone(),
                TabId::allocate(),
                SyncTuning::default(),
            ))
        }

        /// Another tab: shared durable store, its own volatile store.
        fn second_tab(&self) -> (Arc<CartService>, Arc<MemoryStore>) {
            let volatile = Arc::new(MemoryStore::new());
            let service = Arc::new(CartService::new(
                self.server.clone(),
                self.sessions.clone(),
                self.durable.clone(),
                volatile.clone(),
                TabId::allocate(),
                SyncTuning::default(),
            ));
            (service, volatile)
        }

        fn login(&self, user_id: &str) {
            self.sessions
                .set_session(Session::authenticated(user_id, "jeton-test"));
        }

        fn logout(&self) {
            self.sessions.set_session(Session::anonymous());
        }
    }

    fn add_input(product_id: i64, price: rust_decimal::Decimal, quantity: u32) -> AddItemInput {
        AddItemInput {
            product: ProductSnapshot {
                id: product_id,
                name: format!("Produit {product_id}"),
                image: None,
                unit_price: price,
            },
            variant: None,
            quantity,
            replace_quantity: false,
        }
    }

    fn foreign_tab() -> TabId {
        TabId::allocate()
    }

    #[tokio::test]
    async fn anonymous_initialize_starts_empty() {
        let fx = Fixture::anonymous();
        fx.service.initialize().await;

        let status = fx.service.status();
        assert_eq!(status.lifecycle, SyncLifecycle::LocalOnly);
        assert_eq!(status.item_count, 0);
        assert!(!status.authenticated);
        assert!(status.error.is_none());
        assert!(status.last_refresh_at.is_some());
    }

    #[tokio::test]
    async fn anonymous_add_persists_and_broadcasts() {
        let fx = Fixture::anonymous();
        fx.service.initialize().await;
        fx.service.add_item(add_input(7, dec!(12.50), 2)).await;

        let cart = fx.service.snapshot();
        assert_eq!(cart.items.len(), 1);
        assert_eq!(cart.items[0].id, "local_7_0");
        assert_eq!(cart.item_count, 2);
        assert_eq!(cart.subtotal, dec!(25.00));

        assert!(fx.volatile.get_item(keys::GUEST_CART_KEY).unwrap().is_some());
        assert!(fx.durable.get_item(keys::SHARED_CART_KEY).unwrap().is_some());
        assert!(fx.durable.get_item(keys::CART_SYNC_KEY).unwrap().is_some());
    }

    #[tokio::test]
    async fn repeated_adds_accumulate_in_place() {
        let fx = Fixture::anonymous();
        fx.service.initialize().await;

        fx.service.add_item(add_input(7, dec!(12.50), 1)).await;
        fx.service.add_item(add_input(7, dec!(12.50), 2)).await;
        let cart = fx.service.snapshot();
        assert_eq!(cart.items.len(), 1);
        assert_eq!(cart.items[0].quantity, 3);

        let mut replace = add_input(7, dec!(12.50), 5);
        replace.replace_quantity = true;
        fx.service.add_item(replace).await;
        let cart = fx.service.snapshot();
        assert_eq!(cart.items.len(), 1);
        assert_eq!(cart.items[0].quantity, 5);
    }

    #[tokio::test]
    async fn invalid_add_input_is_rejected_locally() {
        let fx = Fixture::anonymous();
        fx.service.initialize().await;

        fx.service.add_item(add_input(7, dec!(12.50), 0)).await;
        fx.service.add_item(add_input(0, dec!(12.50), 1)).await;

        assert!(fx.service.snapshot().is_empty());
        assert_eq!(fx.service.status().error.as_deref(), Some(ADD_CART_ERROR));
    }

    #[tokio::test]
    async fn update_to_zero_or_negative_removes_the_line() {
        let fx = Fixture::anonymous();
        fx.service.initialize().await;
        fx.service.add_item(add_input(7, dec!(12.50), 2)).await;

        fx.service.update_quantity("local_7_0", 0).await;
        assert!(fx.service.snapshot().is_empty());
        assert!(fx.volatile.get_item(keys::GUEST_CART_KEY).unwrap().is_none());

        fx.service.add_item(add_input(7, dec!(12.50), 2)).await;
        fx.service.update_quantity("local_7_0", -5).await;
        assert!(fx.service.snapshot().is_empty());
    }

    #[tokio::test]
    async fn unknown_line_update_is_ignored() {
        let fx = Fixture::anonymous();
        fx.service.initialize().await;
        fx.service.add_item(add_input(7, dec!(12.50), 2)).await;

        fx.service.update_quantity("local_99_0", 4).await;

        let cart = fx.service.snapshot();
        assert_eq!(cart.item_count, 2);
        assert!(fx.service.status().error.is_none());
    }

    #[tokio::test]
    async fn guest_cart_survives_a_reload() {
        let fx = Fixture::anonymous();
        fx.service.initialize().await;
        fx.service.add_item(add_input(7, dec!(12.50), 2)).await;
        fx.service.add_item(add_input(8, dec!(5.00), 1)).await;

        let reloaded = fx.reload();
        reloaded.initialize().await;

        let cart = reloaded.snapshot();
        assert_eq!(cart.items.len(), 2);
        assert_eq!(cart.item_count, 3);
        assert_eq!(cart.subtotal, dec!(30.00));
        assert_eq!(reloaded.status().lifecycle, SyncLifecycle::LocalOnly);
    }

    #[tokio::test]
    async fn malformed_guest_storage_loads_empty() {
        let fx = Fixture::anonymous();
        fx.volatile
            .set_item(keys::GUEST_CART_KEY, "{pas du json", foreign_tab())
            .unwrap();

        fx.service.initialize().await;

        let status = fx.service.status();
        assert_eq!(status.lifecycle, SyncLifecycle::LocalOnly);
        assert_eq!(status.item_count, 0);
        assert!(status.error.is_none());
    }

    #[tokio::test]
    async fn diverging_shared_snapshot_merges_with_local_quantities_winning() {
        let fx = Fixture::anonymous();
        let guest = vec![CartItem::new(
            ProductSnapshot {
                id: 7,
                name: "Table basse".into(),
                image: None,
                unit_price: dec!(12.50),
            },
            None,
            2,
        )];
        let shared = vec![
            CartItem::new(
                ProductSnapshot {
                    id: 7,
                    name: "Table basse".into(),
                    image: None,
                    unit_price: dec!(12.50),
                },
                None,
                9,
            ),
            CartItem::new(
                ProductSnapshot {
                    id: 8,
                    name: "Lampe".into(),
                    image: None,
                    unit_price: dec!(5.00),
                },
                None,
                1,
            ),
        ];
        fx.volatile
            .set_item(
                keys::GUEST_CART_KEY,
                &serde_json::to_string(&guest).unwrap(),
                foreign_tab(),
            )
            .unwrap();
        fx.durable
            .set_item(
                keys::SHARED_CART_KEY,
                &serde_json::to_string(&shared).unwrap(),
                foreign_tab(),
            )
            .unwrap();

        fx.service.initialize().await;

        let cart = fx.service.snapshot();
        assert_eq!(fx.service.status().lifecycle, SyncLifecycle::Merged);
        assert_eq!(cart.items.len(), 2);
        assert_eq!(cart.find_pair(7, None).unwrap().quantity, 2);
        assert_eq!(cart.find_pair(8, None).unwrap().quantity, 1);
    }

    #[tokio::test]
    async fn identical_shared_snapshot_is_not_a_merge() {
        let fx = Fixture::anonymous();
        fx.service.initialize().await;
        fx.service.add_item(add_input(7, dec!(12.50), 2)).await;

        let reloaded = fx.reload();
        reloaded.initialize().await;

        assert_eq!(reloaded.status().lifecycle, SyncLifecycle::LocalOnly);
        assert_eq!(reloaded.snapshot().item_count, 2);
    }

    #[tokio::test]
    async fn login_merges_guest_cart_into_an_empty_account() {
        let fx = Fixture::anonymous();
        fx.service.initialize().await;
        fx.service.add_item(add_input(7, dec!(12.50), 2)).await;
        fx.service.add_item(add_input(8, dec!(5.00), 1)).await;

        fx.login("42");
        fx.service.handle_session_change().await;

        let status = fx.service.status();
        assert!(status.authenticated);
        assert_eq!(status.lifecycle, SyncLifecycle::RemoteOnly);
        assert!(status.error.is_none());
        assert_eq!(status.item_count, 3);

        assert_eq!(fx.server.merge_calls.load(Ordering::SeqCst), 1);
        assert_eq!(fx.server.quantity_of("42", 7), Some(2));
        assert_eq!(fx.server.quantity_of("42", 8), Some(1));
        // Guest storage is consumed; the durable backup takes over.
        assert!(fx.volatile.get_item(keys::GUEST_CART_KEY).unwrap().is_none());
        assert!(fx
            .durable
            .get_item(&keys::user_cart_key("42"))
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn login_merge_keeps_server_quantities_for_existing_pairs() {
        let fx = Fixture::anonymous();
        fx.server.seed("42", 7, None, 5);
        fx.service.initialize().await;
        fx.service.add_item(add_input(7, dec!(12.50), 2)).await;
        fx.service.add_item(add_input(8, dec!(5.00), 1)).await;

        fx.login("42");
        fx.service.handle_session_change().await;

        let cart = fx.service.snapshot();
        assert_eq!(cart.items.len(), 2);
        assert_eq!(cart.find_pair(7, None).unwrap().quantity, 5);
        assert_eq!(cart.find_pair(8, None).unwrap().quantity, 1);
        assert_eq!(fx.server.line_count("42"), 2);
    }

    #[tokio::test]
    async fn merge_failure_preserves_the_guest_list() {
        let fx = Fixture::anonymous();
        fx.service.initialize().await;
        fx.service.add_item(add_input(7, dec!(12.50), 2)).await;
        fx.server.fail_merge.store(true, Ordering::SeqCst);

        fx.login("42");
        fx.service.handle_session_change().await;

        let status = fx.service.status();
        assert_eq!(status.lifecycle, SyncLifecycle::LocalOnly);
        assert_eq!(status.error.as_deref(), Some(MERGE_CART_ERROR));
        assert_eq!(fx.service.snapshot().item_count, 2);
        // Kept for a retry on the next load.
        assert!(fx.volatile.get_item(keys::GUEST_CART_KEY).unwrap().is_some());
        assert_eq!(fx.server.line_count("42"), 0);
    }

    #[tokio::test]
    async fn logout_converts_the_account_cart_to_guest_state() {
        let fx = Fixture::with_session(Session::authenticated("42", "jeton-test"));
        fx.server.seed("42", 7, None, 2);
        fx.service.initialize().await;
        assert_eq!(fx.service.status().lifecycle, SyncLifecycle::RemoteOnly);
        assert_ne!(fx.service.snapshot().items[0].id, "local_7_0");

        fx.logout();
        fx.service.handle_session_change().await;

        let status = fx.service.status();
        assert!(!status.authenticated);
        assert_eq!(status.lifecycle, SyncLifecycle::LocalOnly);
        let cart = fx.service.snapshot();
        assert_eq!(cart.items[0].id, "local_7_0");
        assert_eq!(cart.item_count, 2);

        assert!(fx.volatile.get_item(keys::GUEST_CART_KEY).unwrap().is_some());
        assert!(fx
            .durable
            .get_item(&keys::user_cart_key("42"))
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn account_switch_adopts_the_new_cart_without_merging() {
        let fx = Fixture::with_session(Session::authenticated("42", "jeton-test"));
        fx.server.seed("42", 7, None, 1);
        fx.server.seed("43", 9, None, 1);
        fx.service.initialize().await;
        let merges_before = fx.server.merge_calls.load(Ordering::SeqCst);

        fx.sessions
            .set_session(Session::authenticated("43", "autre-jeton"));
        fx.service.handle_session_change().await;

        let cart = fx.service.snapshot();
        assert_eq!(cart.items.len(), 1);
        assert_eq!(cart.items[0].product.id, 9);
        assert_eq!(fx.server.merge_calls.load(Ordering::SeqCst), merges_before);
        assert_eq!(fx.server.quantity_of("43", 9), Some(1));
        // The first account's server cart is untouched.
        assert_eq!(fx.server.quantity_of("42", 7), Some(1));
    }

    #[tokio::test]
    async fn stale_fetch_from_a_previous_account_is_dropped() {
        let fx = Fixture::with_session(Session::authenticated("42", "jeton-test"));
        fx.server.seed("42", 7, None, 1);
        fx.server.seed("43", 9, None, 1);
        fx.service.initialize().await;

        // A refresh for the first account is still in flight when the
        // account switch lands.
        *fx.server.delay_next_fetch.lock().unwrap() = Some(Duration::from_millis(80));
        let slow = {
            let service = fx.service.clone();
            tokio::spawn(async move { service.refresh().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        fx.sessions
            .set_session(Session::authenticated("43", "autre-jeton"));
        fx.service.handle_session_change().await;
        slow.await.unwrap();

        // The late response carries the first account's cart and must
        // not overwrite the second account's.
        let cart = fx.service.snapshot();
        assert_eq!(cart.items.len(), 1);
        assert_eq!(cart.items[0].product.id, 9);
        assert!(fx.service.status().error.is_none());
    }

    #[tokio::test]
    async fn logout_during_initialize_drops_the_stale_fetch() {
        let fx = Fixture::with_session(Session::authenticated("42", "jeton-test"));
        fx.server.seed("42", 7, None, 1);
        *fx.server.delay_next_fetch.lock().unwrap() = Some(Duration::from_millis(80));

        // The logout lands while the first authenticated fetch is still
        // in flight.
        let loading = {
            let service = fx.service.clone();
            tokio::spawn(async move { service.initialize().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        fx.logout();
        fx.service.handle_session_change().await;
        loading.await.unwrap();

        let status = fx.service.status();
        assert!(!status.authenticated);
        assert_eq!(status.lifecycle, SyncLifecycle::LocalOnly);
        // The old account's cart must not leak into the guest view.
        assert!(fx.service.snapshot().is_empty());
    }

    #[tokio::test]
    async fn relogin_after_a_raced_logout_still_merges_the_guest_cart() {
        let fx = Fixture::with_session(Session::authenticated("42", "jeton-test"));
        fx.server.seed("42", 7, None, 1);
        *fx.server.delay_next_fetch.lock().unwrap() = Some(Duration::from_millis(80));
        let loading = {
            let service = fx.service.clone();
            tokio::spawn(async move { service.initialize().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        fx.logout();
        fx.service.handle_session_change().await;
        loading.await.unwrap();

        fx.service.add_item(add_input(8, dec!(5.00), 1)).await;
        fx.login("42");
        fx.service.handle_session_change().await;

        // The login transition must run the guest merge even though the
        // session identity matches the one the raced fetch was for.
        assert_eq!(fx.server.merge_calls.load(Ordering::SeqCst), 1);
        let cart = fx.service.snapshot();
        assert_eq!(cart.items.len(), 2);
        assert!(cart.find_pair(7, None).is_some());
        assert!(cart.find_pair(8, None).is_some());
        assert!(fx.volatile.get_item(keys::GUEST_CART_KEY).unwrap().is_none());
    }

    #[tokio::test]
    async fn unchanged_session_is_a_no_op() {
        let fx = Fixture::with_session(Session::authenticated("42", "jeton-test"));
        fx.server.seed("42", 7, None, 1);
        fx.service.initialize().await;
        let fetches = fx.server.fetch_calls.load(Ordering::SeqCst);

        fx.service.handle_session_change().await;

        assert_eq!(fx.server.fetch_calls.load(Ordering::SeqCst), fetches);
        assert_eq!(fx.service.snapshot().item_count, 1);
    }

    #[tokio::test]
    async fn fetch_failure_on_cold_start_falls_back_to_the_backup() {
        let fx = Fixture::with_session(Session::authenticated("42", "jeton-test"));
        let backup = vec![CartItem {
            id: "91".into(),
            product: ProductSnapshot {
                id: 7,
                name: "Table basse".into(),
                image: None,
                unit_price: dec!(12.50),
            },
            variant: None,
            quantity: 2,
            unit_price: dec!(12.50),
            line_total: dec!(25.00),
        }];
        fx.durable
            .set_item(
                &keys::user_cart_key("42"),
                &serde_json::to_string(&backup).unwrap(),
                foreign_tab(),
            )
            .unwrap();
        fx.server.fail_fetch.store(true, Ordering::SeqCst);

        fx.service.initialize().await;

        let status = fx.service.status();
        assert_eq!(status.lifecycle, SyncLifecycle::LocalOnly);
        assert_eq!(status.error.as_deref(), Some(LOAD_CART_ERROR));
        let cart = fx.service.snapshot();
        assert_eq!(cart.item_count, 2);
        // Backup reads keep the server line id.
        assert_eq!(cart.items[0].id, "91");
    }

    #[tokio::test]
    async fn fetch_failure_after_load_keeps_the_snapshot() {
        let fx = Fixture::with_session(Session::authenticated("42", "jeton-test"));
        fx.server.seed("42", 7, None, 2);
        fx.service.initialize().await;

        fx.server.fail_fetch.store(true, Ordering::SeqCst);
        fx.service.refresh().await;

        let status = fx.service.status();
        assert_eq!(status.lifecycle, SyncLifecycle::RemoteOnly);
        assert_eq!(status.error.as_deref(), Some(REFRESH_CART_ERROR));
        assert_eq!(fx.service.snapshot().item_count, 2);
    }

    #[tokio::test]
    async fn failed_mutation_rolls_back_to_server_truth() {
        let fx = Fixture::with_session(Session::authenticated("42", "jeton-test"));
        fx.server.seed("42", 7, None, 2);
        fx.service.initialize().await;

        fx.server.fail_mutations.store(true, Ordering::SeqCst);
        fx.service.add_item(add_input(8, dec!(5.00), 1)).await;

        let status = fx.service.status();
        assert_eq!(status.error.as_deref(), Some(ADD_CART_ERROR));
        let cart = fx.service.snapshot();
        assert_eq!(cart.items.len(), 1);
        assert_eq!(cart.items[0].product.id, 7);
        assert_eq!(fx.server.line_count("42"), 1);
    }

    #[tokio::test]
    async fn successful_mutation_adopts_the_server_response() {
        let fx = Fixture::with_session(Session::authenticated("42", "jeton-test"));
        fx.service.initialize().await;

        fx.service.add_item(add_input(7, dec!(12.50), 2)).await;

        let cart = fx.service.snapshot();
        assert_eq!(cart.items.len(), 1);
        // The optimistic local id is replaced by the server line id.
        assert_ne!(cart.items[0].id, "local_7_0");
        assert_eq!(cart.item_count, 2);
        assert_eq!(fx.server.quantity_of("42", 7), Some(2));
        assert!(fx.service.status().error.is_none());
    }

    #[tokio::test]
    async fn clear_empties_cart_and_server() {
        let fx = Fixture::with_session(Session::authenticated("42", "jeton-test"));
        fx.server.seed("42", 7, None, 2);
        fx.server.seed("42", 8, None, 1);
        fx.service.initialize().await;

        fx.service.clear().await;

        assert!(fx.service.snapshot().is_empty());
        assert_eq!(fx.server.line_count("42"), 0);
        assert!(fx.service.status().error.is_none());
    }

    #[tokio::test]
    async fn clear_for_user_wipes_backup_and_remote() {
        let fx = Fixture::with_session(Session::authenticated("42", "jeton-test"));
        fx.server.seed("42", 7, None, 2);
        fx.service.initialize().await;

        fx.service.clear_for_user("42").await;

        assert!(fx.service.snapshot().is_empty());
        assert_eq!(fx.server.line_count("42"), 0);

        // A different user only loses the local backup.
        fx.durable
            .set_item(&keys::user_cart_key("99"), "[]", foreign_tab())
            .unwrap();
        fx.service.clear_for_user("99").await;
        assert!(fx
            .durable
            .get_item(&keys::user_cart_key("99"))
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn sync_signal_adopts_the_other_tabs_snapshot() {
        let fx = Fixture::anonymous();
        fx.service.initialize().await;
        fx.service.add_item(add_input(7, dec!(12.50), 2)).await;

        let (other, other_volatile) = fx.second_tab();
        other.initialize().await;
        other.handle_sync_signal().await;

        let cart = other.snapshot();
        assert_eq!(cart.item_count, 2);
        assert_eq!(cart.items[0].id, "local_7_0");
        assert_eq!(other.status().lifecycle, SyncLifecycle::LocalOnly);
        assert!(other_volatile
            .get_item(keys::GUEST_CART_KEY)
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn signal_listener_reacts_to_writes_from_other_tabs() {
        let fx = Fixture::anonymous();
        fx.service.initialize().await;
        let (other, _volatile) = fx.second_tab();
        other.initialize().await;
        let listener = other.spawn_signal_listener();

        fx.service.add_item(add_input(7, dec!(12.50), 2)).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(other.snapshot().item_count, 2);
        listener.abort();
    }

    #[tokio::test]
    async fn periodic_refresh_pulls_server_side_changes() {
        let server = Arc::new(FakeCartServer::new());
        let sessions = Arc::new(StaticSessionProvider::new(Session::authenticated(
            "42",
            "jeton-test",
        )));
        let service = Arc::new(CartService::new(
            server.clone(),
            sessions,
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryStore::new()),
            TabId::allocate(),
            SyncTuning {
                publish_throttle: Duration::from_millis(40),
                refresh_interval: Duration::from_millis(15),
            },
        ));
        server.seed("42", 7, None, 1);
        service.initialize().await;
        assert_eq!(service.snapshot().item_count, 1);

        let refresher = service.spawn_periodic_refresh();
        server.seed("42", 8, None, 2);
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert_eq!(service.snapshot().item_count, 3);
        refresher.abort();
    }

    #[tokio::test]
    async fn full_guest_to_account_flow() {
        let fx = Fixture::anonymous();
        fx.service.initialize().await;

        fx.service.add_item(add_input(7, dec!(12.50), 2)).await;
        let cart = fx.service.snapshot();
        assert_eq!(cart.item_count, 2);
        assert_eq!(cart.subtotal, dec!(25.00));

        fx.login("42");
        fx.service.handle_session_change().await;
        assert_eq!(fx.service.status().lifecycle, SyncLifecycle::RemoteOnly);
        assert_eq!(fx.service.snapshot().item_count, 2);
        assert!(fx.volatile.get_item(keys::GUEST_CART_KEY).unwrap().is_none());

        fx.service.add_item(add_input(7, dec!(12.50), 1)).await;
        let cart = fx.service.snapshot();
        assert_eq!(cart.items.len(), 1);
        assert_eq!(cart.items[0].quantity, 3);
        assert_eq!(cart.subtotal, dec!(37.50));
        assert_eq!(fx.server.quantity_of("42", 7), Some(3));
    }
}
