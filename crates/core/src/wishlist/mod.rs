//! Wishlist domain: canonical model, backend payload parsing, merge
//! policy, and the reconciliation service.

pub mod merge;
pub mod model;
pub mod normalize;
pub mod payload;
pub mod service;

pub use model::{Wishlist, WishlistItem, WishlistMetadata, DEFAULT_WISHLIST_NAME};
pub use service::{AddWishlistInput, WishlistService, WishlistSyncStatus};
