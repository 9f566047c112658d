//! Pure merge and deduplication arithmetic.
//!
//! Policy: when the same (product, variant) pair exists on both sides of
//! a merge, the local quantity wins. Quantities are never summed across
//! sources: the two sides cannot distinguish "the same add was recorded
//! twice" from "the user wants more", and summing inflates carts on every
//! repeated sync.

use sha2::{Digest, Sha256};

use crate::cart::model::CartItem;

/// Merge `incoming` into `local`. Pairs already present locally keep
/// their local line untouched; new pairs are appended in incoming order.
pub fn merge_keep_local(local: &[CartItem], incoming: &[CartItem]) -> Vec<CartItem> {
    let mut merged: Vec<CartItem> = local.to_vec();
    for item in incoming {
        if !merged.iter().any(|m| m.pair_key() == item.pair_key()) {
            merged.push(item.clone());
        }
    }
    merged
}

/// In-place add honouring the replace/accumulate distinction:
/// `replace_quantity` sets the pair's quantity, otherwise it adds to it.
/// New pairs are appended either way.
pub fn upsert_item(items: &mut Vec<CartItem>, item: CartItem, replace_quantity: bool) {
    match items.iter_mut().find(|i| i.pair_key() == item.pair_key()) {
        Some(existing) => {
            existing.quantity = if replace_quantity {
                item.quantity
            } else {
                existing.quantity.saturating_add(item.quantity)
            };
            existing.recompute_line_total();
        }
        None => {
            let mut item = item;
            item.recompute_line_total();
            items.push(item);
        }
    }
}

/// Content fingerprint over sorted `productId_variantId_quantity`
/// triples. Two lists with equal fingerprints are already merged; the
/// engine skips re-merging them.
pub fn canonical_fingerprint(items: &[CartItem]) -> String {
    let mut triples: Vec<String> = items
        .iter()
        .map(|item| {
            format!(
                "{}_{}_{}",
                item.product.id,
                item.variant_id().unwrap_or(0),
                item.quantity
            )
        })
        .collect();
    triples.sort_unstable();
    let digest = Sha256::digest(triples.join("|").as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}
