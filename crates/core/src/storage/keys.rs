//! Persisted key layout.
//!
//! The exact strings matter: they are shared with every tab of the origin
//! and with any previously deployed storefront build, so renaming one
//! orphans user data.

/// Anonymous cart items, volatile store only.
pub const GUEST_CART_KEY: &str = "cart";

/// Cross-tab cart snapshot, durable store.
pub const SHARED_CART_KEY: &str = "shared_cart";

/// Cart sync envelope slot, durable store. The cross-tab channel listens
/// on this key.
pub const CART_SYNC_KEY: &str = "cart_sync";

/// Anonymous wishlist items, volatile store only.
pub const GUEST_WISHLIST_KEY: &str = "favorites";

/// Cross-tab wishlist snapshot, durable store.
pub const SHARED_WISHLIST_KEY: &str = "shared_wishlist";

/// Wishlist sync envelope slot, durable store.
pub const WISHLIST_SYNC_KEY: &str = "wishlist_sync";

/// Per-user durable cart backup.
pub fn user_cart_key(user_id: &str) -> String {
    format!("cart_user_{user_id}")
}

/// Per-user durable wishlist backup.
pub fn user_wishlist_key(user_id: &str) -> String {
    format!("favorites_user_{user_id}")
}
