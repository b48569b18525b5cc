//! # Payment Strategy Trait
//!
//! Strategy trait for hosted-checkout payment providers.
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │          PaymentStrategy (trait)            │
//! │  ├── create_checkout()                      │
//! │  ├── verify_webhook()                       │
//! │  └── provider_name()                        │
//! └─────────────────────────────────────────────┘
//!                       ▲
//!           ┌───────────┴───────────┐
//!   ┌───────┴────────┐     ┌────────┴───────┐
//!   │ StripeCheckout │     │  fake provider │
//!   │    Strategy    │     │    (tests)     │
//!   └────────────────┘     └────────────────┘
//! ```

use crate::error::ShopResult;
use crate::order::{CheckoutSession, Order, WebhookEvent};
use async_trait::async_trait;
use std::sync::Arc;

/// Core trait for payment provider implementations.
#[async_trait]
pub trait PaymentStrategy: Send + Sync {
    /// Create a hosted checkout session and return its redirect URL.
    ///
    /// Called exactly once per checkout attempt; implementations must not
    /// retry on their own.
    async fn create_checkout(
        &self,
        order: &Order,
        success_url: &str,
        cancel_url: &str,
    ) -> ShopResult<CheckoutSession>;

    /// Verify a webhook signature and parse the event.
    ///
    /// # Arguments
    /// * `payload` - Raw webhook body bytes
    /// * `signature` - Signature header from the request
    async fn verify_webhook(&self, payload: &[u8], signature: &str) -> ShopResult<WebhookEvent>;

    /// Get the provider name (for logging and routing).
    fn provider_name(&self) -> &'static str;
}

/// Type alias for a shared payment strategy (dynamic dispatch)
pub type BoxedPaymentStrategy = Arc<dyn PaymentStrategy>;

/// Redirect targets handed to the hosted checkout page
#[derive(Debug, Clone)]
pub struct CheckoutUrls {
    /// Base URL of the storefront (e.g., "https://reciperush.example")
    pub base_url: String,
    pub success_path: String,
    pub cancel_path: String,
}

impl CheckoutUrls {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            success_path: "/success".to_string(),
            cancel_path: "/cancel".to_string(),
        }
    }

    /// Success URL with the provider's session id placeholder
    pub fn success_url(&self) -> String {
        format!(
            "{}{}?session_id={{CHECKOUT_SESSION_ID}}",
            self.base_url, self.success_path
        )
    }

    pub fn cancel_url(&self) -> String {
        format!("{}{}", self.base_url, self.cancel_path)
    }

    /// Link mailed to the customer for a download token
    pub fn download_url(&self, token: &str) -> String {
        format!("{}/download/{}", self.base_url, token)
    }
}

impl Default for CheckoutUrls {
    fn default() -> Self {
        Self::new("http://localhost:3000")
    }
}
