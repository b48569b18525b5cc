//! # shop-api
//!
//! HTTP API layer for the RecipeRush storefront.
//!
//! This crate provides:
//! - Axum-based HTTP server
//! - Checkout endpoints guarded by single-use CSRF tokens
//! - Stripe webhook handling and download-link delivery (SMTP)
//! - Token-gated streaming of the purchased e-book
//!
//! ## Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | GET | `/` | Service index |
//! | GET | `/health` | Health check |
//! | GET | `/api/config` | Public front-end config |
//! | GET | `/csrf-token` | Issue CSRF token |
//! | POST | `/create-checkout-session` | Create checkout session |
//! | POST | `/webhook/stripe` | Stripe webhook |
//! | GET | `/download/{token}` | Download purchased file |
//! | GET | `/success`, `/cancel` | Checkout landing pages |

pub mod artifact;
pub mod handlers;
pub mod notifier;
pub mod rate_limit;
pub mod routes;
pub mod state;

pub use artifact::{ArtifactConfig, FsArtifactStore};
pub use notifier::{LoggingNotifier, SmtpConfig, SmtpNotifier};
pub use routes::create_router;
pub use state::{AppConfig, AppState};
