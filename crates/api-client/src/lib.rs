//! HTTP implementation of the storefront cart and wishlist APIs.
//!
//! [`StorefrontClient`] implements `panier_core`'s `CartApi` and
//! `WishlistApi` traits over the backend's enveloped REST endpoints.

pub mod client;
pub mod error;

pub use client::StorefrontClient;
pub use error::{ApiError, Result};
