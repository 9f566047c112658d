//! Cart payloads as external sources ship them.
//!
//! One permissive shape covers every origin: the backend's nested
//! `produit {...}` form, its flattened `nom_produit`/`prix_produit` form,
//! and both current and legacy locally-persisted guest data. The
//! adapters in [`crate::cart::normalize`] are the only consumers; the
//! engine itself never sees these types.

use rust_decimal::Decimal;
use serde::Deserialize;

use crate::wire::{de_opt_id, de_opt_int, de_opt_money};

/// `data` object of `GET /cart` and of every cart mutation response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CartPayload {
    #[serde(default)]
    pub items: Vec<CartItemPayload>,
}

/// One cart line in any of its wire or persisted spellings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CartItemPayload {
    /// Server line id, or the synthesized `local_*` id from guest data.
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

    #[serde(default, alias = "quantite", deserialize_with = "de_opt_int")]
    pub quantity: Option<i64>,

    #[serde(
        default,
        alias = "prix_unitaire",
        alias = "unitPrice",
        deserialize_with = "de_opt_money"
    )]
    pub unit_price: Option<Decimal>,

    /// Nested product object (`produit` from the API, `product` from
    /// canonical guest data).
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

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProductPayload {
    #[serde(default, deserialize_with = "de_opt_int")]
    pub id: Option<i64>,

    #[serde(default, alias = "nom")]
    pub name: Option<String>,

    #[serde(default)]
    pub image: Option<String>,

    #[serde(
        default,
        alias = "prix",
        alias = "unitPrice",
        alias = "prix_unitaire",
        deserialize_with = "de_opt_money"
    )]
    pub unit_price: Option<Decimal>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VariantPayload {
    #[serde(default, deserialize_with = "de_opt_int")]
    pub id: Option<i64>,

    #[serde(default, alias = "attributs")]
    pub attributes: Vec<VariantAttributePayload>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VariantAttributePayload {
    #[serde(default, alias = "nom")]
    pub name: Option<String>,

    #[serde(default, alias = "valeur")]
    pub value: Option<String>,
}
