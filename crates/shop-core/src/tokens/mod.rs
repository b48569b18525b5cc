//! # Tokens
//!
//! Ephemeral, usage-capped tokens kept in process memory.
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │              TokenStore<P>                    │
//! │  issue · consume · reserve/commit/release     │
//! │  sweep_expired · start/stop                   │
//! └───────────────────────────────────────────────┘
//!            ▲                         ▲
//!   ┌────────┴─────────┐     ┌─────────┴───────────┐
//!   │ CsrfTokenService │     │ DownloadTokenService │
//!   │ 15 min, 1 use    │     │ 7/30 days, 5 uses    │
//!   └──────────────────┘     └──────────────────────┘
//! ```

pub mod csrf;
pub mod download;
pub mod store;

pub use csrf::{CsrfTokenService, CSRF_TOKEN_TTL_MINUTES};
pub use download::{
    DownloadGrant, DownloadLease, DownloadTokenService, DEVELOPMENT_TTL_DAYS, MAX_DOWNLOADS,
    PRODUCTION_TTL_DAYS,
};
pub use store::{generate_token_id, redact, TokenSnapshot, TokenStore, TOKEN_BYTES};
