//! # shop-stripe
//!
//! Stripe payment strategy for the storefront.
//!
//! **StripeCheckoutStrategy** drives the Checkout Sessions API:
//! - Dynamic line items priced from the cart
//! - Customer email prefill
//! - Order id and customer name carried in session metadata
//! - `Stripe-Signature` verification for webhooks
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use shop_stripe::StripeCheckoutStrategy;
//! use shop_core::PaymentStrategy;
//!
//! // Create strategy from environment
//! let strategy = StripeCheckoutStrategy::from_env()?;
//!
//! // Create checkout session
//! let session = strategy.create_checkout(
//!     &order,
//!     "https://example.com/success?session_id={CHECKOUT_SESSION_ID}",
//!     "https://example.com/cancel",
//! ).await?;
//!
//! // Redirect user to session.checkout_url
//! ```
//!
//! ## Webhook Handling
//!
//! ```rust,ignore
//! // In your webhook endpoint, with the raw body and Stripe-Signature header:
//! let event = strategy.verify_webhook(&body, signature).await?;
//! orchestrator.handle_webhook_event(event).await?;
//! ```

pub mod checkout;
pub mod config;
pub mod webhook;

// Re-exports
pub use checkout::StripeCheckoutStrategy;
pub use config::StripeConfig;
pub use webhook::{
    parse_event, print_webhook_setup_instructions, signature_header, verify_signature,
    REQUIRED_WEBHOOK_EVENTS,
};
