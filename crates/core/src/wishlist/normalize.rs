//! Ingestion adapters for wishlist payloads.

use std::collections::HashSet;

use chrono::{SecondsFormat, Utc};
use log::warn;
use rust_decimal::Decimal;

use crate::cart::model::{ProductSnapshot, Variant, VariantAttribute};
use crate::wishlist::model::{Wishlist, WishlistItem, WishlistMetadata};
use crate::wishlist::payload::{WishlistItemPayload, WishlistPayload};

struct ResolvedLine {
    id: Option<String>,
    product: ProductSnapshot,
    variant: Option<Variant>,
    note: Option<String>,
    reference_price: Decimal,
    current_price: Decimal,
    added_at: Option<String>,
}

fn clamp_price(product_id: i64, price: Decimal) -> Decimal {
    if price.is_sign_negative() {
        warn!("negative price for product {product_id}, clamping to zero");
        Decimal::ZERO
    } else {
        price
    }
}

/// Extract the fields common to every spelling. `None` means the line
/// carries no usable product id and is skipped.
fn resolve(payload: WishlistItemPayload) -> Option<ResolvedLine> {
    let nested = payload.product;
    let product_id = payload
        .product_id
        .or_else(|| nested.as_ref().and_then(|p| p.id))?;

    let name = nested
        .as_ref()
        .and_then(|p| p.name.clone())
        .or(payload.nom_produit)
        .unwrap_or_else(|| format!("Produit {product_id}"));
    let image = nested
        .as_ref()
        .and_then(|p| p.image.clone())
        .or(payload.image_produit);

    // The catalog price doubles as the fallback for both price fields.
    let listed = nested
        .as_ref()
        .and_then(|p| p.unit_price)
        .or(payload.prix_produit);
    let reference_price = clamp_price(
        product_id,
        payload.reference_price.or(listed).unwrap_or(Decimal::ZERO),
    );
    let current_price = clamp_price(
        product_id,
        payload.current_price.or(listed).unwrap_or(reference_price),
    );

    let variant = match payload.variant {
        Some(v) => v.id.filter(|id| *id != 0).map(|id| Variant {
            id,
            attributes: v
                .attributes
                .into_iter()
                .filter_map(|a| {
                    Some(VariantAttribute {
                        name: a.name?,
                        value: a.value?,
                    })
                })
                .collect(),
        }),
        // Variant id 0 is the backend's "no variant" sentinel.
        None => payload.variant_id.filter(|id| *id != 0).map(|id| Variant {
            id,
            attributes: Vec::new(),
        }),
    };

    Some(ResolvedLine {
        id: payload.id,
        product: ProductSnapshot {
            id: product_id,
            name,
            image,
            unit_price: current_price,
        },
        variant,
        note: payload.note,
        reference_price,
        current_price,
        added_at: payload.added_at,
    })
}

fn build(line: ResolvedLine, id: String) -> WishlistItem {
    let mut item = WishlistItem {
        id,
        product: line.product,
        variant: line.variant,
        note: line.note,
        reference_price: line.reference_price,
        current_price: line.current_price,
        price_changed: false,
        added_at: line
            .added_at
            .unwrap_or_else(|| Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
    };
    item.recompute_price_changed();
    item
}

/// Normalize one line from a backend response. Lines without a product id
/// are dropped.
pub fn from_remote(payload: WishlistItemPayload) -> Option<WishlistItem> {
    let line = resolve(payload)?;
    let variant_id = line.variant.as_ref().map(|v| v.id);
    let id = line
        .id
        .clone()
        .unwrap_or_else(|| WishlistItem::local_id(line.product.id, variant_id));
    Some(build(line, id))
}

/// Normalize one locally-persisted guest line. Guest lines always get a
/// synthesized local id.
pub fn from_guest_storage(payload: WishlistItemPayload) -> Option<WishlistItem> {
    let line = resolve(payload)?;
    let variant_id = line.variant.as_ref().map(|v| v.id);
    let id = WishlistItem::local_id(line.product.id, variant_id);
    Some(build(line, id))
}

/// Whole backend wishlist response to a canonical wishlist, enforcing pair
/// uniqueness (first occurrence wins, duplicates are logged).
pub fn wishlist_from_remote(payload: WishlistPayload) -> Wishlist {
    let mut metadata = WishlistMetadata::default();
    if let Some(header) = payload.metadata {
        metadata.id = header.id;
        if let Some(name) = header.name {
            metadata.name = name;
        }
    }
    let items = dedupe(payload.items.into_iter().filter_map(from_remote));
    Wishlist::with_metadata(metadata, items)
}

/// Persisted guest payloads to canonical items.
pub fn items_from_guest(payloads: Vec<WishlistItemPayload>) -> Vec<WishlistItem> {
    dedupe(payloads.into_iter().filter_map(from_guest_storage))
}

/// Convert authenticated items to the guest shape kept after logout:
/// server line ids are replaced by synthesized local ids.
pub fn convert_to_guest(items: &[WishlistItem]) -> Vec<WishlistItem> {
    items
        .iter()
        .map(|item| {
            let mut guest = item.clone();
            guest.id = WishlistItem::local_id(item.product.id, item.variant_id());
            guest
        })
        .collect()
}

fn dedupe(items: impl Iterator<Item = WishlistItem>) -> Vec<WishlistItem> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for item in items {
        if seen.insert(item.pair_key()) {
            out.push(item);
        } else {
            warn!(
                "dropping duplicate wishlist line for product {} variant {:?}",
                item.product.id,
                item.variant_id()
            );
        }
    }
    out
}
