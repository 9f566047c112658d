//! Ingestion adapters: every external cart shape becomes the canonical
//! record here, so nothing downstream branches on origin.

use std::collections::HashSet;

use log::warn;
use rust_decimal::Decimal;

use crate::cart::model::{Cart, CartItem, ProductSnapshot, Variant, VariantAttribute};
use crate::cart::payload::{CartItemPayload, CartPayload};

struct ResolvedLine {
    id: Option<String>,
    product: ProductSnapshot,
    variant: Option<Variant>,
    quantity: Option<i64>,
}

/// Extract the fields common to every spelling. `None` means the line
/// carries no usable product id and is skipped.
fn resolve(payload: CartItemPayload) -> Option<ResolvedLine> {
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

    let mut unit_price = payload
        .unit_price
        .or_else(|| nested.as_ref().and_then(|p| p.unit_price))
        .or(payload.prix_produit)
        .unwrap_or(Decimal::ZERO);
    if unit_price.is_sign_negative() {
        warn!("negative price for product {product_id}, clamping to zero");
        unit_price = Decimal::ZERO;
    }

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
            unit_price,
        },
        variant,
        quantity: payload.quantity,
    })
}

/// Normalize one line from a backend response. Lines without a product id
/// or with a non-positive quantity are dropped: the server says they no
/// longer exist.
pub fn from_remote(payload: CartItemPayload) -> Option<CartItem> {
    let line = resolve(payload)?;
    let quantity = line.quantity.unwrap_or(1);
    if quantity <= 0 {
        return None;
    }
    let variant_id = line.variant.as_ref().map(|v| v.id);
    let id = line
        .id
        .unwrap_or_else(|| CartItem::local_id(line.product.id, variant_id));
    let mut item = CartItem {
        id,
        unit_price: line.product.unit_price,
        product: line.product,
        variant: line.variant,
        quantity: quantity.min(u32::MAX as i64) as u32,
        line_total: Decimal::ZERO,
    };
    item.recompute_line_total();
    Some(item)
}

/// Normalize one locally-persisted guest line. Guest lines always get a
/// synthesized local id, and corrupt quantities clamp to 1 rather than
/// silently deleting the line.
pub fn from_guest_storage(payload: CartItemPayload) -> Option<CartItem> {
    let line = resolve(payload)?;
    let quantity = line.quantity.unwrap_or(1).clamp(1, u32::MAX as i64) as u32;
    let variant_id = line.variant.as_ref().map(|v| v.id);
    let mut item = CartItem {
        id: CartItem::local_id(line.product.id, variant_id),
        unit_price: line.product.unit_price,
        product: line.product,
        variant: line.variant,
        quantity,
        line_total: Decimal::ZERO,
    };
    item.recompute_line_total();
    Some(item)
}

/// Whole backend cart response to a canonical cart, enforcing pair
/// uniqueness (first occurrence wins, duplicates are logged).
pub fn cart_from_remote(payload: CartPayload) -> Cart {
    Cart::from_items(dedupe(payload.items.into_iter().filter_map(from_remote)))
}

/// Persisted guest payloads to canonical items.
pub fn items_from_guest(payloads: Vec<CartItemPayload>) -> Vec<CartItem> {
    dedupe(payloads.into_iter().filter_map(from_guest_storage))
}

/// Convert authenticated items to the guest shape kept after logout:
/// server line ids are replaced by synthesized local ids.
pub fn convert_to_guest(items: &[CartItem]) -> Vec<CartItem> {
    items
        .iter()
        .map(|item| {
            let mut guest = item.clone();
            guest.id = CartItem::local_id(item.product.id, item.variant_id());
            guest.recompute_line_total();
            guest
        })
        .collect()
}

fn dedupe(items: impl Iterator<Item = CartItem>) -> Vec<CartItem> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for item in items {
        if seen.insert(item.pair_key()) {
            out.push(item);
        } else {
            warn!(
                "dropping duplicate cart line for product {} variant {:?}",
                item.product.id,
                item.variant_id()
            );
        }
    }
    out
}
