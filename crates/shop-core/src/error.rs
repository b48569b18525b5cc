//! # Storefront Error Types
//!
//! Typed error handling for the storefront.
//! Token-level failures are [`TokenError`]; everything the HTTP layer can
//! surface is a [`ShopError`].

use thiserror::Error;

/// Why a token could not be used.
///
/// These are normal outcomes, not faults: token ids are attacker-guessable
/// and every lookup has to be answered without crashing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TokenError {
    /// No live token with this id
    #[error("token not found")]
    NotFound,

    /// The token outlived its ttl
    #[error("token expired")]
    Expired,

    /// Every permitted use has been spent
    #[error("token usage limit reached")]
    Exhausted,
}

impl TokenError {
    /// HTTP status for a download token failing with this kind
    pub fn status_code(&self) -> u16 {
        match self {
            TokenError::NotFound => 404,
            TokenError::Expired => 410,
            TokenError::Exhausted => 429,
        }
    }

    /// Customer-facing message. Never includes the token itself.
    pub fn public_message(&self) -> &'static str {
        match self {
            TokenError::NotFound => "Download link not found or expired.",
            TokenError::Expired => "Download link has expired.",
            TokenError::Exhausted => "Maximum download limit reached.",
        }
    }
}

/// Core error type for storefront operations
#[derive(Debug, Error)]
pub enum ShopError {
    /// Configuration errors (missing keys, invalid config)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Missing, replayed or expired CSRF token
    #[error("Invalid or missing CSRF token")]
    InvalidCsrf,

    /// Order request failed validation
    #[error("Invalid order: {0}")]
    InvalidOrder(String),

    /// Payment provider API error
    #[error("Provider error [{provider}]: {message}")]
    ProviderError { provider: String, message: String },

    /// Network/HTTP error communicating with provider
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Notifier could not deliver the download link
    #[error("Notifier error: {0}")]
    NotifierError(String),

    /// Webhook signature verification failed
    #[error("Webhook verification failed: {0}")]
    WebhookVerificationFailed(String),

    /// Webhook payload parsing error
    #[error("Webhook parse error: {0}")]
    WebhookParseError(String),

    /// Download token rejected
    #[error(transparent)]
    Token(#[from] TokenError),

    /// Purchased artifact missing or unreadable
    #[error("Artifact unavailable for order {order_id}")]
    ArtifactNotFound { order_id: String },

    /// Internal error (should not happen)
    #[error("Internal error: {0}")]
    Internal(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl ShopError {
    /// Returns the HTTP status code appropriate for this error
    pub fn status_code(&self) -> u16 {
        match self {
            ShopError::Configuration(_) => 500,
            ShopError::InvalidCsrf => 403,
            ShopError::InvalidOrder(_) => 400,
            ShopError::ProviderError { .. } => 502,
            ShopError::NetworkError(_) => 503,
            ShopError::NotifierError(_) => 502,
            ShopError::WebhookVerificationFailed(_) => 400,
            ShopError::WebhookParseError(_) => 400,
            ShopError::Token(kind) => kind.status_code(),
            ShopError::ArtifactNotFound { .. } => 500,
            ShopError::Internal(_) => 500,
            ShopError::Serialization(_) => 500,
        }
    }

    /// Message safe to hand back to a customer.
    ///
    /// Provider, notifier and storage details stay in the logs.
    pub fn public_message(&self) -> String {
        match self {
            ShopError::InvalidCsrf => "Invalid or expired form token. Please refresh and try again.".to_string(),
            ShopError::InvalidOrder(reason) => format!("Invalid order: {}", reason),
            ShopError::ProviderError { .. } | ShopError::NetworkError(_) => {
                "Failed to create checkout session".to_string()
            }
            ShopError::WebhookVerificationFailed(_) | ShopError::WebhookParseError(_) => {
                "Webhook rejected".to_string()
            }
            ShopError::Token(kind) => kind.public_message().to_string(),
            ShopError::ArtifactNotFound { .. } => "Error downloading file.".to_string(),
            ShopError::Configuration(_)
            | ShopError::NotifierError(_)
            | ShopError::Internal(_)
            | ShopError::Serialization(_) => "Internal server error".to_string(),
        }
    }
}

/// Result type alias for storefront operations
pub type ShopResult<T> = Result<T, ShopError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(ShopError::InvalidCsrf.status_code(), 403);
        assert_eq!(ShopError::InvalidOrder("x".into()).status_code(), 400);
        assert_eq!(ShopError::from(TokenError::NotFound).status_code(), 404);
        assert_eq!(ShopError::from(TokenError::Expired).status_code(), 410);
        assert_eq!(ShopError::from(TokenError::Exhausted).status_code(), 429);
    }

    #[test]
    fn test_public_message_hides_provider_details() {
        let err = ShopError::ProviderError {
            provider: "stripe".into(),
            message: "sk_live_secret leaked in message".into(),
        };
        assert!(!err.public_message().contains("sk_live"));
    }
}
