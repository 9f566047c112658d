//! Remote storefront API boundary.
//!
//! The engine consumes these traits; `panier-api-client` provides the
//! HTTP implementation. Anything implementing them must return a settled
//! `Result` for every failure mode: no panic and no escaping transport
//! error ever crosses this boundary.

use async_trait::async_trait;
use serde::Serialize;

use crate::cart::model::CartItem;
use crate::cart::payload::CartPayload;
use crate::errors::Result;
use crate::session::Session;
use crate::wishlist::payload::WishlistPayload;

/// Body of `POST /cart/items`.
#[derive(Debug, Clone, Serialize)]
pub struct AddItemRequest {
    #[serde(rename = "produit_id")]
    pub product_id: i64,
    #[serde(rename = "variante_id", skip_serializing_if = "Option::is_none")]
    pub variant_id: Option<i64>,
    #[serde(rename = "quantite")]
    pub quantity: u32,
    /// `true` sets the pair's quantity to `quantite`; `false` adds to it.
    pub replace_quantity: bool,
}

/// One guest line of `POST /cart/merge`.
#[derive(Debug, Clone, Serialize)]
pub struct MergeItem {
    #[serde(rename = "produit_id")]
    pub product_id: i64,
    #[serde(rename = "variante_id", skip_serializing_if = "Option::is_none")]
    pub variant_id: Option<i64>,
    #[serde(rename = "quantite")]
    pub quantity: u32,
}

impl From<&CartItem> for MergeItem {
    fn from(item: &CartItem) -> Self {
        Self {
            product_id: item.product.id,
            variant_id: item.variant_id(),
            quantity: item.quantity,
        }
    }
}

/// Body of `POST /wishlist/items`.
#[derive(Debug, Clone, Serialize)]
pub struct AddWishlistItemRequest {
    #[serde(rename = "produit_id")]
    pub product_id: i64,
    #[serde(rename = "variante_id", skip_serializing_if = "Option::is_none")]
    pub variant_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Remote cart operations.
#[async_trait]
pub trait CartApi: Send + Sync {
    async fn fetch_cart(&self, session: &Session) -> Result<CartPayload>;

    async fn add_item(&self, session: &Session, request: &AddItemRequest) -> Result<CartPayload>;

    async fn update_item(
        &self,
        session: &Session,
        item_id: &str,
        quantity: u32,
    ) -> Result<CartPayload>;

    async fn remove_item(&self, session: &Session, item_id: &str) -> Result<CartPayload>;

    async fn clear_cart(&self, session: &Session) -> Result<()>;

    async fn clear_cart_for_user(&self, session: &Session, user_id: &str) -> Result<()>;

    /// Merge guest lines into the account cart. The server dedupes by
    /// (product, variant); repeating the call is safe.
    async fn merge_guest_cart(&self, session: &Session, items: &[MergeItem]) -> Result<()>;
}

/// Remote wishlist operations.
#[async_trait]
pub trait WishlistApi: Send + Sync {
    async fn fetch_wishlist(&self, session: &Session) -> Result<WishlistPayload>;

    /// Adds or, for an existing (product, variant) pair, updates the note.
    async fn add_wishlist_item(
        &self,
        session: &Session,
        request: &AddWishlistItemRequest,
    ) -> Result<WishlistPayload>;

    async fn remove_wishlist_item(
        &self,
        session: &Session,
        item_id: &str,
    ) -> Result<WishlistPayload>;

    async fn check_membership(
        &self,
        session: &Session,
        product_id: i64,
        variant_id: Option<i64>,
    ) -> Result<bool>;

    async fn move_to_cart(&self, session: &Session, item_id: &str, quantity: u32) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_item_request_uses_the_backend_field_names() {
        let request = AddItemRequest {
            product_id: 7,
            variant_id: Some(3),
            quantity: 2,
            replace_quantity: true,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "produit_id": 7,
                "variante_id": 3,
                "quantite": 2,
                "replace_quantity": true
            })
        );
    }

    #[test]
    fn absent_variant_is_omitted_from_requests() {
        let request = AddWishlistItemRequest {
            product_id: 7,
            variant_id: None,
            note: None,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json, serde_json::json!({"produit_id": 7}));
    }
}
