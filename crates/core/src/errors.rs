//! Error types shared across the cart and wishlist engines.

use thiserror::Error;

/// Result type alias for cart/wishlist engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while reconciling cart or wishlist state.
#[derive(Debug, Error)]
pub enum Error {
    /// The remote storefront API could not be reached.
    #[error("Remote error: {0}")]
    Remote(String),

    /// The remote storefront API answered with an error envelope or a
    /// non-success HTTP status.
    #[error("Request rejected{}: {message}", status.map(|s| format!(" ({s})")).unwrap_or_default())]
    Rejected {
        status: Option<u16>,
        message: String,
    },

    /// A persistence adapter read or write failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A remote payload could not be normalized into the canonical shape.
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// The operation was rejected before any network call.
    #[error("Validation error: {0}")]
    Validation(String),
}

impl Error {
    /// Create a remote transport error
    pub fn remote(message: impl Into<String>) -> Self {
        Self::Remote(message.into())
    }

    /// Create a rejected-by-server error from an optional status and message
    pub fn rejected(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Rejected {
            status,
            message: message.into(),
        }
    }

    /// Create a storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    /// Create an invalid data error
    pub fn invalid_data(message: impl Into<String>) -> Self {
        Self::InvalidData(message.into())
    }

    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// HTTP status if the server rejected the request with one.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Rejected { status, .. } => *status,
            _ => None,
        }
    }

    /// True for failures where the last-known local snapshot should be
    /// presented instead of an empty state.
    pub fn is_remote_failure(&self) -> bool {
        matches!(self, Self::Remote(_) | Self::Rejected { .. })
    }
}
