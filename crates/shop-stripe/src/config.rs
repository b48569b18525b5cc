//! # Stripe Configuration
//!
//! Configuration management for Stripe integration.
//! All secrets are loaded from environment variables.

use shop_core::{Currency, ShopError, ShopResult};
use std::env;

/// Default allowed clock skew for webhook signatures, in seconds
pub const DEFAULT_WEBHOOK_TOLERANCE_SECS: i64 = 300;

/// Stripe API configuration
#[derive(Debug, Clone)]
pub struct StripeConfig {
    /// Secret API key (sk_test_... or sk_live_...)
    pub secret_key: String,

    /// Publishable key (pk_test_... or pk_live_...), handed to the browser
    pub publishable_key: Option<String>,

    /// Webhook signing secret (whsec_...)
    pub webhook_secret: String,

    /// API base URL (for testing/mocking)
    pub api_base_url: String,

    /// API version
    pub api_version: String,

    /// Currency charged at checkout
    pub currency: Currency,

    /// Max age of a webhook signature timestamp
    pub webhook_tolerance_secs: i64,
}

impl StripeConfig {
    /// Load configuration from environment variables.
    ///
    /// Required env vars:
    /// - `STRIPE_SECRET_KEY`
    /// - `STRIPE_WEBHOOK_SECRET`
    ///
    /// Optional:
    /// - `STRIPE_PUBLISHABLE_KEY`
    /// - `CHECKOUT_CURRENCY` (default `gbp`)
    pub fn from_env() -> ShopResult<Self> {
        dotenvy::dotenv().ok(); // Load .env file if present

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> ShopResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let secret_key = lookup("STRIPE_SECRET_KEY")
            .ok_or_else(|| ShopError::Configuration("STRIPE_SECRET_KEY not set".to_string()))?;

        let webhook_secret = lookup("STRIPE_WEBHOOK_SECRET").ok_or_else(|| {
            ShopError::Configuration("STRIPE_WEBHOOK_SECRET not set".to_string())
        })?;

        let publishable_key = lookup("STRIPE_PUBLISHABLE_KEY").filter(|k| !k.is_empty());

        // Validate key formats
        if !secret_key.starts_with("sk_test_") && !secret_key.starts_with("sk_live_") {
            return Err(ShopError::Configuration(
                "STRIPE_SECRET_KEY must start with sk_test_ or sk_live_".to_string(),
            ));
        }

        if let Some(ref key) = publishable_key {
            if !key.starts_with("pk_test_") && !key.starts_with("pk_live_") {
                return Err(ShopError::Configuration(
                    "STRIPE_PUBLISHABLE_KEY must start with pk_test_ or pk_live_".to_string(),
                ));
            }
        }

        if !webhook_secret.starts_with("whsec_") {
            return Err(ShopError::Configuration(
                "STRIPE_WEBHOOK_SECRET must start with whsec_".to_string(),
            ));
        }

        let currency = match lookup("CHECKOUT_CURRENCY") {
            Some(code) => Currency::parse(&code).ok_or_else(|| {
                ShopError::Configuration(format!("Unsupported CHECKOUT_CURRENCY: {}", code))
            })?,
            None => Currency::default(),
        };

        Ok(Self::new(secret_key, webhook_secret)
            .with_publishable_key(publishable_key)
            .with_currency(currency))
    }

    /// Create config with explicit values (for testing)
    pub fn new(secret_key: impl Into<String>, webhook_secret: impl Into<String>) -> Self {
        Self {
            secret_key: secret_key.into(),
            publishable_key: None,
            webhook_secret: webhook_secret.into(),
            api_base_url: "https://api.stripe.com".to_string(),
            api_version: "2024-12-18.acacia".to_string(),
            currency: Currency::default(),
            webhook_tolerance_secs: DEFAULT_WEBHOOK_TOLERANCE_SECS,
        }
    }

    /// Check if using test keys
    pub fn is_test_mode(&self) -> bool {
        self.secret_key.starts_with("sk_test_")
    }

    /// Check if using live keys
    pub fn is_live_mode(&self) -> bool {
        self.secret_key.starts_with("sk_live_")
    }

    /// Get authorization header value
    pub fn auth_header(&self) -> String {
        format!("Bearer {}", self.secret_key)
    }

    /// Builder: set custom API base URL (for testing)
    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into();
        self
    }

    pub fn with_publishable_key(mut self, key: Option<String>) -> Self {
        self.publishable_key = key;
        self
    }

    pub fn with_currency(mut self, currency: Currency) -> Self {
        self.currency = currency;
        self
    }

    pub fn with_webhook_tolerance(mut self, secs: i64) -> Self {
        self.webhook_tolerance_secs = secs;
        self
    }
}
