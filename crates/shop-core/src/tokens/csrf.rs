//! # CSRF Tokens
//!
//! Short-lived, strictly single-use tokens that guard the checkout form.

use super::store::{redact, TokenStore};
use crate::clock::SharedClock;
use chrono::Duration;
use tracing::debug;

/// How long an issued form token stays usable
pub const CSRF_TOKEN_TTL_MINUTES: i64 = 15;

/// CSRF token issuance and validation
#[derive(Clone, Debug)]
pub struct CsrfTokenService {
    store: TokenStore<()>,
    ttl: Duration,
}

impl CsrfTokenService {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            store: TokenStore::new("csrf", clock),
            ttl: Duration::minutes(CSRF_TOKEN_TTL_MINUTES),
        }
    }

    /// Issue a fresh form token
    pub fn issue(&self) -> String {
        self.store.issue(self.ttl, 1, ())
    }

    /// True exactly once per issued token, false for anything else.
    ///
    /// The token is deleted on first use, so a replay inside the ttl still
    /// fails.
    pub fn validate_and_consume(&self, token: &str) -> bool {
        match self.store.consume(token) {
            Ok(()) => true,
            Err(kind) => {
                debug!(token = %redact(token), reason = %kind, "CSRF token rejected");
                false
            }
        }
    }

    /// Underlying store (sweep lifecycle, metrics)
    pub fn store(&self) -> &TokenStore<()> {
        &self.store
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}
