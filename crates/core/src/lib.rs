//! Client-side cart and wishlist state for the storefront.
//!
//! The crate owns the canonical in-memory state for one browser tab and
//! reconciles it across three unreliable sources: per-tab guest storage,
//! the durable cross-tab snapshot slot, and the remote account on the
//! storefront API. Hosts embed [`cart::CartService`] and
//! [`wishlist::WishlistService`], feed them session changes and storage
//! events, and render from the snapshots they expose.
//!
//! The remote API itself lives behind the [`remote::CartApi`] and
//! [`remote::WishlistApi`] traits; `panier-api-client` provides the HTTP
//! implementation.

pub mod cart;
pub mod errors;
pub mod lifecycle;
pub mod remote;
pub mod session;
pub mod storage;
pub mod sync;
pub mod wishlist;

pub(crate) mod wire;

pub use errors::{Error, Result};
pub use lifecycle::SyncLifecycle;
pub use session::{Session, SessionProvider, StaticSessionProvider};
pub use sync::SyncTuning;
