//! Canonical wishlist records.
//!
//! A wishlist line is a cart line without a quantity, carrying instead a
//! free-text note and a price history: the price at add time
//! (`reference_price`) against the live catalog price (`current_price`).
//! `price_changed` and `item_count` are derived and always recomputed.

use chrono::{SecondsFormat, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::cart::model::{ProductSnapshot, Variant};

pub const DEFAULT_WISHLIST_NAME: &str = "Mes favoris";

/// One wishlist line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WishlistItem {
    /// Server-assigned id when authenticated, `local_<p>_<v>` otherwise.
    pub id: String,
    pub product: ProductSnapshot,
    #[serde(default)]
    pub variant: Option<Variant>,
    #[serde(default)]
    pub note: Option<String>,
    /// Price at the time the item was added.
    pub reference_price: Decimal,
    /// Live catalog price, updated on every refresh.
    pub current_price: Decimal,
    /// Derived: `current_price != reference_price`.
    pub price_changed: bool,
    /// RFC3339.
    pub added_at: String,
}

impl WishlistItem {
    pub fn new(product: ProductSnapshot, variant: Option<Variant>, note: Option<String>) -> Self {
        let id = Self::local_id(product.id, variant.as_ref().map(|v| v.id));
        let price = product.unit_price;
        Self {
            id,
            product,
            variant,
            note,
            reference_price: price,
            current_price: price,
            price_changed: false,
            added_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }

    /// Synthesized id for items that have never been seen by the server.
    pub fn local_id(product_id: i64, variant_id: Option<i64>) -> String {
        format!("local_{product_id}_{}", variant_id.unwrap_or(0))
    }

    pub fn variant_id(&self) -> Option<i64> {
        self.variant.as_ref().map(|v| v.id)
    }

    /// Key the uniqueness invariant is enforced on. A missing variant and
    /// variant id 0 occupy the same slot.
    pub fn pair_key(&self) -> (i64, i64) {
        (self.product.id, self.variant_id().unwrap_or(0))
    }

    pub fn recompute_price_changed(&mut self) {
        self.price_changed = self.current_price != self.reference_price;
    }
}

/// Wishlist header as the backend models it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WishlistMetadata {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    pub item_count: u32,
}

impl Default for WishlistMetadata {
    fn default() -> Self {
        Self {
            id: None,
            name: DEFAULT_WISHLIST_NAME.to_string(),
            item_count: 0,
        }
    }
}

/// Wishlist aggregate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Wishlist {
    pub metadata: WishlistMetadata,
    pub items: Vec<WishlistItem>,
}

impl Wishlist {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a wishlist with default metadata, recomputing derived fields.
    pub fn from_items(items: Vec<WishlistItem>) -> Self {
        Self::with_metadata(WishlistMetadata::default(), items)
    }

    pub fn with_metadata(mut metadata: WishlistMetadata, mut items: Vec<WishlistItem>) -> Self {
        for item in &mut items {
            item.recompute_price_changed();
        }
        metadata.item_count = items.len() as u32;
        Self { metadata, items }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn find_pair(&self, product_id: i64, variant_id: Option<i64>) -> Option<&WishlistItem> {
        let key = (product_id, variant_id.unwrap_or(0));
        self.items.iter().find(|item| item.pair_key() == key)
    }

    pub fn contains_pair(&self, product_id: i64, variant_id: Option<i64>) -> bool {
        self.find_pair(product_id, variant_id).is_some()
    }
}
