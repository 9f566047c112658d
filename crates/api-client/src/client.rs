//! Storefront API client for the cart and wishlist endpoints.
//!
//! Every backend response is wrapped in a `{status, data?, message?}`
//! envelope; `status == "error"` is a failure even under HTTP 200. The
//! endpoint methods return the crate's [`ApiError`]; the `CartApi` /
//! `WishlistApi` trait impls at the bottom convert those into
//! `panier_core::Error` so the engine only ever sees its own taxonomy.

use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;

use panier_core::cart::payload::CartPayload;
use panier_core::remote::{
    AddItemRequest, AddWishlistItemRequest, CartApi, MergeItem, WishlistApi,
};
use panier_core::wishlist::payload::{WishlistCheckPayload, WishlistPayload};
use panier_core::Session;

use crate::error::{ApiError, Result};

/// Default timeout for API requests.
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const MAX_LOG_BODY_CHARS: usize = 512;

/// Response wrapper used by every storefront endpoint.
#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
struct ApiEnvelope<T> {
    status: String,
    #[serde(default)]
    data: Option<T>,
    #[serde(default)]
    message: Option<String>,
}

/// Client for the storefront cart/wishlist REST API.
#[derive(Debug, Clone)]
pub struct StorefrontClient {
    http: reqwest::Client,
    base_url: String,
}

impl StorefrontClient {
    /// Create a new storefront client.
    ///
    /// # Arguments
    ///
    /// * `base_url` - The base URL of the storefront API (e.g., "https://api.boutique.example")
    pub fn new(base_url: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn log_response(status: reqwest::StatusCode, body: &str) {
        if status.is_success() {
            debug!("API response status: {}", status);
            return;
        }

        let mut preview = body.chars().take(MAX_LOG_BODY_CHARS).collect::<String>();
        if body.chars().count() > MAX_LOG_BODY_CHARS {
            preview.push_str("...");
        }
        debug!("API response error ({}): {}", status, preview);
    }

    /// Create headers for an API request. Fails fast when the session
    /// carries no token; callers gate anonymous flows before reaching the
    /// network layer.
    fn headers(&self, session: &Session) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let token = session
            .token
            .as_deref()
            .ok_or_else(|| ApiError::auth("Session has no access token"))?;
        let auth_value = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|_| ApiError::auth("Invalid access token format"))?;
        headers.insert(AUTHORIZATION, auth_value);

        if let Some(user_id) = session.user_id.as_deref() {
            let user_value = HeaderValue::from_str(user_id)
                .map_err(|_| ApiError::auth("Invalid user id format"))?;
            headers.insert("x-user-id", user_value);
        }

        Ok(headers)
    }

    /// Parse an envelope response and unwrap its `data` payload.
    async fn parse_envelope<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T> {
        let status = response.status();
        let body = response.text().await?;
        Self::log_response(status, &body);

        let envelope: ApiEnvelope<T> = match serde_json::from_str(&body) {
            Ok(envelope) => envelope,
            Err(err) => {
                if !status.is_success() {
                    return Err(ApiError::api(
                        status.as_u16(),
                        format!("Request failed: {}", body),
                    ));
                }
                return Err(ApiError::Json(err));
            }
        };

        if !status.is_success() || envelope.status == "error" {
            let message = envelope
                .message
                .unwrap_or_else(|| format!("Request failed: {}", body));
            return Err(ApiError::api(status.as_u16(), message));
        }

        envelope
            .data
            .ok_or_else(|| ApiError::api(status.as_u16(), "Response envelope is missing data"))
    }

    /// Parse an envelope response for endpoints whose success carries no
    /// payload. An empty 2xx body counts as success.
    async fn parse_unit(response: reqwest::Response) -> Result<()> {
        let status = response.status();
        let body = response.text().await?;
        Self::log_response(status, &body);

        if let Ok(envelope) = serde_json::from_str::<ApiEnvelope<serde_json::Value>>(&body) {
            if !status.is_success() || envelope.status == "error" {
                let message = envelope
                    .message
                    .unwrap_or_else(|| format!("Request failed: {}", body));
                return Err(ApiError::api(status.as_u16(), message));
            }
            return Ok(());
        }

        if !status.is_success() {
            return Err(ApiError::api(
                status.as_u16(),
                format!("Request failed: {}", body),
            ));
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Cart
    // ─────────────────────────────────────────────────────────────────────────

    /// Fetch the account cart.
    ///
    /// GET /cart
    pub async fn get_cart(&self, session: &Session) -> Result<CartPayload> {
        let url = format!("{}/cart", self.base_url);

        let response = self
            .http
            .get(&url)
            .headers(self.headers(session)?)
            .send()
            .await?;

        Self::parse_envelope(response).await
    }

    /// Add a line, or grow/replace the quantity of an existing
    /// (product, variant) pair.
    ///
    /// POST /cart/items
    pub async fn post_cart_item(
        &self,
        session: &Session,
        request: &AddItemRequest,
    ) -> Result<CartPayload> {
        let url = format!("{}/cart/items", self.base_url);
        debug!("Adding product {} to the account cart", request.product_id);

        let response = self
            .http
            .post(&url)
            .headers(self.headers(session)?)
            .json(request)
            .send()
            .await?;

        Self::parse_envelope(response).await
    }

    /// Set the quantity of an existing line.
    ///
    /// PUT /cart/items/{itemId}
    pub async fn put_cart_item(
        &self,
        session: &Session,
        item_id: &str,
        quantity: u32,
    ) -> Result<CartPayload> {
        let url = format!("{}/cart/items/{}", self.base_url, item_id);

        let response = self
            .http
            .put(&url)
            .headers(self.headers(session)?)
            .json(&serde_json::json!({ "quantite": quantity }))
            .send()
            .await?;

        Self::parse_envelope(response).await
    }

    /// Remove a line.
    ///
    /// DELETE /cart/items/{itemId}
    pub async fn delete_cart_item(&self, session: &Session, item_id: &str) -> Result<CartPayload> {
        let url = format!("{}/cart/items/{}", self.base_url, item_id);

        let response = self
            .http
            .delete(&url)
            .headers(self.headers(session)?)
            .send()
            .await?;

        Self::parse_envelope(response).await
    }

    /// Empty the account cart.
    ///
    /// DELETE /cart
    pub async fn delete_cart(&self, session: &Session) -> Result<()> {
        let url = format!("{}/cart", self.base_url);

        let response = self
            .http
            .delete(&url)
            .headers(self.headers(session)?)
            .send()
            .await?;

        Self::parse_unit(response).await
    }

    /// Empty a specific user's cart server-side.
    ///
    /// DELETE /cart/user/{userId}
    pub async fn delete_user_cart(&self, session: &Session, user_id: &str) -> Result<()> {
        let url = format!("{}/cart/user/{}", self.base_url, user_id);

        let response = self
            .http
            .delete(&url)
            .headers(self.headers(session)?)
            .send()
            .await?;

        Self::parse_unit(response).await
    }

    /// Merge guest lines into the account cart. The backend dedupes by
    /// (product, variant), so repeating the call is safe.
    ///
    /// POST /cart/merge
    pub async fn post_cart_merge(&self, session: &Session, items: &[MergeItem]) -> Result<()> {
        let url = format!("{}/cart/merge", self.base_url);
        debug!("Merging {} guest cart lines", items.len());

        let response = self
            .http
            .post(&url)
            .headers(self.headers(session)?)
            .json(&serde_json::json!({ "items": items }))
            .send()
            .await?;

        Self::parse_unit(response).await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Wishlist
    // ─────────────────────────────────────────────────────────────────────────

    /// Fetch the account wishlist.
    ///
    /// GET /wishlist
    pub async fn get_wishlist(&self, session: &Session) -> Result<WishlistPayload> {
        let url = format!("{}/wishlist", self.base_url);

        let response = self
            .http
            .get(&url)
            .headers(self.headers(session)?)
            .send()
            .await?;

        Self::parse_envelope(response).await
    }

    /// Add a product, or update the note of an existing
    /// (product, variant) pair.
    ///
    /// POST /wishlist/items
    pub async fn post_wishlist_item(
        &self,
        session: &Session,
        request: &AddWishlistItemRequest,
    ) -> Result<WishlistPayload> {
        let url = format!("{}/wishlist/items", self.base_url);
        debug!(
            "Adding product {} to the account wishlist",
            request.product_id
        );

        let response = self
            .http
            .post(&url)
            .headers(self.headers(session)?)
            .json(request)
            .send()
            .await?;

        Self::parse_envelope(response).await
    }

    /// Remove a line.
    ///
    /// DELETE /wishlist/items/{itemId}
    pub async fn delete_wishlist_item(
        &self,
        session: &Session,
        item_id: &str,
    ) -> Result<WishlistPayload> {
        let url = format!("{}/wishlist/items/{}", self.base_url, item_id);

        let response = self
            .http
            .delete(&url)
            .headers(self.headers(session)?)
            .send()
            .await?;

        Self::parse_envelope(response).await
    }

    /// Server-side membership check for a (product, variant) pair.
    ///
    /// GET /wishlist/check/{produitId}?variante_id={variantId}
    pub async fn get_wishlist_check(
        &self,
        session: &Session,
        product_id: i64,
        variant_id: Option<i64>,
    ) -> Result<bool> {
        let url = format!("{}/wishlist/check/{}", self.base_url, product_id);

        let mut request = self.http.get(&url).headers(self.headers(session)?);
        if let Some(variant_id) = variant_id {
            request = request.query(&[("variante_id", variant_id.to_string())]);
        }
        let response = request.send().await?;

        let check: WishlistCheckPayload = Self::parse_envelope(response).await?;
        Ok(check.in_wishlist)
    }

    /// Move a wishlist line into the account cart.
    ///
    /// POST /wishlist/items/{itemId}/move-to-cart
    pub async fn post_move_to_cart(
        &self,
        session: &Session,
        item_id: &str,
        quantity: u32,
    ) -> Result<()> {
        let url = format!("{}/wishlist/items/{}/move-to-cart", self.base_url, item_id);

        let response = self
            .http
            .post(&url)
            .headers(self.headers(session)?)
            .json(&serde_json::json!({ "quantite": quantity }))
            .send()
            .await?;

        Self::parse_unit(response).await
    }
}

#[async_trait]
impl CartApi for StorefrontClient {
    async fn fetch_cart(&self, session: &Session) -> panier_core::Result<CartPayload> {
        Ok(self.get_cart(session).await?)
    }

    async fn add_item(
        &self,
        session: &Session,
        request: &AddItemRequest,
    ) -> panier_core::Result<CartPayload> {
        Ok(self.post_cart_item(session, request).await?)
    }

    async fn update_item(
        &self,
        session: &Session,
        item_id: &str,
        quantity: u32,
    ) -> panier_core::Result<CartPayload> {
        Ok(self.put_cart_item(session, item_id, quantity).await?)
    }

    async fn remove_item(
        &self,
        session: &Session,
        item_id: &str,
    ) -> panier_core::Result<CartPayload> {
        Ok(self.delete_cart_item(session, item_id).await?)
    }

    async fn clear_cart(&self, session: &Session) -> panier_core::Result<()> {
        Ok(self.delete_cart(session).await?)
    }

    async fn clear_cart_for_user(
        &self,
        session: &Session,
        user_id: &str,
    ) -> panier_core::Result<()> {
        Ok(self.delete_user_cart(session, user_id).await?)
    }

    async fn merge_guest_cart(
        &self,
        session: &Session,
        items: &[MergeItem],
    ) -> panier_core::Result<()> {
        Ok(self.post_cart_merge(session, items).await?)
    }
}

#[async_trait]
impl WishlistApi for StorefrontClient {
    async fn fetch_wishlist(&self, session: &Session) -> panier_core::Result<WishlistPayload> {
        Ok(self.get_wishlist(session).await?)
    }

    async fn add_wishlist_item(
        &self,
        session: &Session,
        request: &AddWishlistItemRequest,
    ) -> panier_core::Result<WishlistPayload> {
        Ok(self.post_wishlist_item(session, request).await?)
    }

    async fn remove_wishlist_item(
        &self,
        session: &Session,
        item_id: &str,
    ) -> panier_core::Result<WishlistPayload> {
        Ok(self.delete_wishlist_item(session, item_id).await?)
    }

    async fn check_membership(
        &self,
        session: &Session,
        product_id: i64,
        variant_id: Option<i64>,
    ) -> panier_core::Result<bool> {
        Ok(self
            .get_wishlist_check(session, product_id, variant_id)
            .await?)
    }

    async fn move_to_cart(
        &self,
        session: &Session,
        item_id: &str,
        quantity: u32,
    ) -> panier_core::Result<()> {
        Ok(self.post_move_to_cart(session, item_id, quantity).await?)
    }
}
