//! Wishlist merge policy.
//!
//! Same tie-break as the cart: an existing (product, variant) pair keeps
//! its local line (note, reference price, added-at all included); new
//! pairs from the incoming list are appended in their order.

use sha2::{Digest, Sha256};

use crate::wishlist::model::WishlistItem;

pub fn merge_keep_local(local: &[WishlistItem], incoming: &[WishlistItem]) -> Vec<WishlistItem> {
    let mut merged: Vec<WishlistItem> = local.to_vec();
    for item in incoming {
        if !merged.iter().any(|m| m.pair_key() == item.pair_key()) {
            merged.push(item.clone());
        }
    }
    merged
}

/// In-place upsert for an add: an existing (product, variant) pair only
/// takes the incoming note, a new pair is appended.
pub fn upsert_item(items: &mut Vec<WishlistItem>, item: WishlistItem) {
    match items.iter_mut().find(|i| i.pair_key() == item.pair_key()) {
        Some(existing) => existing.note = item.note,
        None => items.push(item),
    }
}

/// SHA-256 over sorted `productId_variantId` pairs. Equal fingerprints
/// mean the same membership; the wishlist has no quantities to compare.
pub fn canonical_fingerprint(items: &[WishlistItem]) -> String {
    let mut pairs: Vec<String> = items
        .iter()
        .map(|item| {
            let (product_id, variant_id) = item.pair_key();
            format!("{product_id}_{variant_id}")
        })
        .collect();
    pairs.sort_unstable();

    let digest = Sha256::digest(pairs.join("|").as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}
