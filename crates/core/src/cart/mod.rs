//! Cart domain: canonical records, ingestion adapters, merge policy,
//! and the per-tab reconciliation engine.

pub mod merge;
pub mod model;
pub mod normalize;
pub mod payload;
pub mod service;

pub use model::{Cart, CartItem, ProductSnapshot, Variant, VariantAttribute};
pub use service::{AddItemInput, CartService, CartSyncStatus};
