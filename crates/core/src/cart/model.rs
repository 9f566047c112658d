//! Canonical cart records.
//!
//! Everything downstream of the ingestion adapters works with these
//! shapes. Derived fields (`line_total`, `item_count`, `subtotal`,
//! `total`) are always recomputed here, never trusted from persisted or
//! remote input.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Ordered name/value pair describing one variant axis (colour, size, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantAttribute {
    pub name: String,
    pub value: String,
}

/// Variant snapshot attached to a cart or wishlist line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Variant {
    pub id: i64,
    #[serde(default)]
    pub attributes: Vec<VariantAttribute>,
}

/// Denormalized product copy. The line stays displayable even if the
/// product is later edited or deleted in the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductSnapshot {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub image: Option<String>,
    pub unit_price: Decimal,
}

/// One cart line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItem {
    /// Server-assigned id when authenticated, `local_<p>_<v>` otherwise.
    pub id: String,
    pub product: ProductSnapshot,
    #[serde(default)]
    pub variant: Option<Variant>,
    pub quantity: u32,
    pub unit_price: Decimal,
    pub line_total: Decimal,
}

impl CartItem {
    pub fn new(product: ProductSnapshot, variant: Option<Variant>, quantity: u32) -> Self {
        let id = Self::local_id(product.id, variant.as_ref().map(|v| v.id));
        let unit_price = product.unit_price;
        let mut item = Self {
            id,
            product,
            variant,
            quantity,
            unit_price,
            line_total: Decimal::ZERO,
        };
        item.recompute_line_total();
        item
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

    pub fn recompute_line_total(&mut self) {
        self.line_total = self.unit_price * Decimal::from(self.quantity);
    }
}

/// Cart aggregate with derived totals.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cart {
    pub items: Vec<CartItem>,
    pub item_count: u32,
    pub subtotal: Decimal,
    /// Equal to `subtotal`; tax and shipping live outside this engine.
    pub total: Decimal,
}

impl Cart {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a cart from items, recomputing every derived field.
    pub fn from_items(mut items: Vec<CartItem>) -> Self {
        for item in &mut items {
            item.recompute_line_total();
        }
        let item_count = items.iter().map(|item| item.quantity).sum();
        let subtotal: Decimal = items.iter().map(|item| item.line_total).sum();
        Self {
            items,
            item_count,
            subtotal,
            total: subtotal,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn find_pair(&self, product_id: i64, variant_id: Option<i64>) -> Option<&CartItem> {
        let key = (product_id, variant_id.unwrap_or(0));
        self.items.iter().find(|item| item.pair_key() == key)
    }
}
