//! Error types for the storefront API client crate.

use thiserror::Error;

/// Result type alias for storefront API operations.
pub type Result<T> = std::result::Result<T, ApiError>;

/// Errors that can occur while talking to the storefront backend.
#[derive(Debug, Error)]
pub enum ApiError {
    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Error envelope or non-success HTTP status from the backend
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Invalid request (missing required data, etc.)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Authentication error (missing or invalid token)
    #[error("Authentication error: {0}")]
    Auth(String),
}

impl ApiError {
    /// Create an API error from status and message
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Create an invalid request error
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    /// Create an auth error
    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth(message.into())
    }

    /// HTTP status if this is an API error.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// True when the failure calls for re-authentication rather than a
    /// retry.
    pub fn is_auth_failure(&self) -> bool {
        match self {
            Self::Auth(_) => true,
            Self::Api { status, .. } => matches!(status, 401 | 403),
            _ => false,
        }
    }
}

/// Collapse transport-level failures into the engine's error taxonomy so
/// the reconciliation layer never sees a reqwest or serde type.
impl From<ApiError> for panier_core::Error {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Http(inner) => panier_core::Error::remote(inner.to_string()),
            ApiError::Json(inner) => panier_core::Error::invalid_data(inner.to_string()),
            ApiError::Api { status, message } => {
                panier_core::Error::rejected(Some(status), message)
            }
            ApiError::Auth(message) => panier_core::Error::rejected(Some(401), message),
            ApiError::InvalidRequest(message) => panier_core::Error::validation(message),
        }
    }
}
