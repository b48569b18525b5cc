//! # shop-core
//!
//! Core types and traits for the storefront checkout engine.
//!
//! This crate provides:
//! - `TokenStore` for single- and multi-use expiring tokens, with the
//!   `CsrfTokenService` and `DownloadTokenService` built on it
//! - `Order`, `LineItem`, and `CheckoutSession` for checkout flow
//! - `PaymentStrategy`, `Notifier` and `ArtifactStore` collaborator traits
//! - `CheckoutOrchestrator` tying the checkout flow together
//! - `ShopError` for typed error handling
//!
//! ## Example
//!
//! ```rust,ignore
//! use shop_core::{CheckoutOrchestrator, CheckoutUrls, CsrfTokenService, DownloadTokenService};
//!
//! let orchestrator = CheckoutOrchestrator::new(
//!     strategy,
//!     notifier,
//!     CsrfTokenService::new(clock.clone()),
//!     DownloadTokenService::new(clock, true),
//!     CheckoutUrls::new("https://shop.example"),
//! );
//!
//! let csrf = orchestrator.csrf().issue();
//! let session = orchestrator.create_session(&request, Some(&csrf)).await?;
//!
//! // Redirect user to session.checkout_url
//! ```

pub mod artifact;
pub mod checkout;
pub mod clock;
pub mod error;
pub mod notifier;
pub mod order;
pub mod price;
pub mod strategy;
pub mod tokens;

// Re-exports for convenience
pub use artifact::{Artifact, ArtifactStore, ArtifactStream, BoxedArtifactStore};
pub use checkout::{CheckoutOrchestrator, WebhookOutcome};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use error::{ShopError, ShopResult, TokenError};
pub use notifier::{BoxedNotifier, DownloadDelivery, Notifier};
pub use order::{
    CartItem, CheckoutSession, LineItem, Order, OrderRequest, OrderState, PaymentConfirmation,
    WebhookEvent, WebhookEventType,
};
pub use price::{Currency, Price};
pub use strategy::{BoxedPaymentStrategy, CheckoutUrls, PaymentStrategy};
pub use tokens::{
    redact, CsrfTokenService, DownloadGrant, DownloadLease, DownloadTokenService, TokenSnapshot,
    TokenStore,
};
