//! Wishlist payloads as external sources ship them.

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::cart::payload::{ProductPayload, VariantPayload};
use crate::wire::{de_opt_id, de_opt_int, de_opt_money};

/// `data` object of `GET /wishlist` and of wishlist mutation responses.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WishlistPayload {
    /// Wishlist header; the backend spells it `liste`.
    #[serde(default, alias = "liste")]
    pub metadata: Option<WishlistMetadataPayload>,
    #[serde(default)]
    pub items: Vec<WishlistItemPayload>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WishlistMetadataPayload {
    #[serde(default, deserialize_with = "de_opt_id")]
    pub id: Option<String>,
    #[serde(default, alias = "nom")]
    pub name: Option<String>,
}

/// One wishlist line in any of its wire or persisted spellings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WishlistItemPayload {
    #[serde(default, deserialize_with = "de_opt_id")]
    pub id: Option<String>,

    #[serde(
        default,
        alias = "produit_id",
        alias = "productId",
        deserialize_with = "de_opt_int"
    )]
    pub product_id: Option<i64>,

    #[serde(
        default,
        alias = "variante_id",
        alias = "variantId",
        deserialize_with = "de_opt_int"
    )]
    pub variant_id: Option<i64>,

    #[serde(default)]
    pub note: Option<String>,

    #[serde(
        default,
        alias = "prix_reference",
        alias = "referencePrice",
        deserialize_with = "de_opt_money"
    )]
    pub reference_price: Option<Decimal>,

    #[serde(
        default,
        alias = "prix_actuel",
        alias = "currentPrice",
        deserialize_with = "de_opt_money"
    )]
    pub current_price: Option<Decimal>,

    #[serde(default, alias = "date_ajout", alias = "addedAt")]
    pub added_at: Option<String>,

    #[serde(default, alias = "produit")]
    pub product: Option<ProductPayload>,

    #[serde(default, alias = "variante")]
    pub variant: Option<VariantPayload>,

    // Flattened product fields, sent by the listing endpoints.
    #[serde(default)]
    pub nom_produit: Option<String>,
    #[serde(default, deserialize_with = "de_opt_money")]
    pub prix_produit: Option<Decimal>,
    #[serde(default)]
    pub image_produit: Option<String>,
}

/// `data` of `GET /wishlist/check/:produitId`. The backend has answered
/// both with a bare boolean and with an object over time; accept either.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WishlistCheckPayload {
    pub in_wishlist: bool,
}

impl<'de> Deserialize<'de> for WishlistCheckPayload {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        let in_wishlist = match &value {
            Value::Bool(flag) => *flag,
            Value::Object(map) => map
                .get("in_wishlist")
                .or_else(|| map.get("inWishlist"))
                .and_then(Value::as_bool)
                .unwrap_or(false),
            _ => false,
        };
        Ok(Self { in_wishlist })
    }
}
