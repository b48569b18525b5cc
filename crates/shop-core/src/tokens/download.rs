//! # Download Tokens
//!
//! Capability links mailed to customers after a paid order. Each link is
//! good for a limited time and a limited number of *completed* downloads.
//!
//! Redemption is two-phase. [`DownloadTokenService::redeem`] reserves one use
//! and hands back a [`DownloadLease`]; the use is only spent when the lease is
//! committed after the artifact bytes went out. Dropping the lease (failed or
//! aborted transfer) gives the use back.

use super::store::{redact, TokenStore};
use crate::clock::SharedClock;
use crate::error::{ShopResult, TokenError};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::future::Future;
use tracing::{info, warn};

/// Downloads allowed per purchase
pub const MAX_DOWNLOADS: u32 = 5;
/// Link lifetime in production
pub const PRODUCTION_TTL_DAYS: i64 = 7;
/// Link lifetime everywhere else
pub const DEVELOPMENT_TTL_DAYS: i64 = 30;

/// What a download token grants access to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadGrant {
    pub customer_email: String,
    pub order_id: String,
}

/// Download token issuance and redemption
#[derive(Clone, Debug)]
pub struct DownloadTokenService {
    store: TokenStore<DownloadGrant>,
    ttl: Duration,
    max_downloads: u32,
}

impl DownloadTokenService {
    /// Service with the standard policy for the given environment
    pub fn new(clock: SharedClock, production: bool) -> Self {
        let days = if production {
            PRODUCTION_TTL_DAYS
        } else {
            DEVELOPMENT_TTL_DAYS
        };
        Self::with_policy(clock, Duration::days(days), MAX_DOWNLOADS)
    }

    pub fn with_policy(clock: SharedClock, ttl: Duration, max_downloads: u32) -> Self {
        Self {
            store: TokenStore::new("download", clock),
            ttl,
            max_downloads,
        }
    }

    /// Mint the link token for a completed order
    pub fn issue(&self, customer_email: impl Into<String>, order_id: impl Into<String>) -> String {
        let grant = DownloadGrant {
            customer_email: customer_email.into(),
            order_id: order_id.into(),
        };
        let order_id = grant.order_id.clone();
        let token = self.store.issue(self.ttl, self.max_downloads, grant);

        info!(
            order_id = %order_id,
            token = %redact(&token),
            max_downloads = self.max_downloads,
            ttl_days = self.ttl.num_days(),
            "Issued download token"
        );
        token
    }

    /// Reserve one download. The use is spent only by [`DownloadLease::commit`].
    pub fn redeem(&self, token: &str) -> Result<DownloadLease, TokenError> {
        match self.store.reserve(token) {
            Ok(grant) => Ok(DownloadLease {
                store: self.store.clone(),
                token: token.to_string(),
                grant,
                settled: false,
            }),
            Err(kind) => {
                warn!(token = %redact(token), reason = %kind, "Download token rejected");
                Err(kind)
            }
        }
    }

    /// Reserve, run `deliver`, and spend the use only if it succeeded.
    pub async fn redeem_with<T, F, Fut>(&self, token: &str, deliver: F) -> ShopResult<T>
    where
        F: FnOnce(DownloadGrant) -> Fut,
        Fut: Future<Output = ShopResult<T>>,
    {
        let lease = self.redeem(token)?;
        let delivered = deliver(lease.grant().clone()).await?;
        // A sweep can drop the record mid-transfer; the bytes already went out.
        let _ = lease.commit();
        Ok(delivered)
    }

    /// Downloads left on a live token
    pub fn remaining(&self, token: &str) -> Option<u32> {
        self.store
            .lookup(token)
            .ok()
            .map(|snapshot| snapshot.uses_remaining)
    }

    /// Underlying store (sweep lifecycle, metrics)
    pub fn store(&self) -> &TokenStore<DownloadGrant> {
        &self.store
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn max_downloads(&self) -> u32 {
        self.max_downloads
    }
}

/// One reserved download.
///
/// Commit after the transfer finished; drop to release the reservation.
#[derive(Debug)]
pub struct DownloadLease {
    store: TokenStore<DownloadGrant>,
    token: String,
    grant: DownloadGrant,
    settled: bool,
}

impl DownloadLease {
    pub fn grant(&self) -> &DownloadGrant {
        &self.grant
    }

    pub fn order_id(&self) -> &str {
        &self.grant.order_id
    }

    /// Spend the reserved use. Returns the downloads left.
    pub fn commit(mut self) -> Result<u32, TokenError> {
        self.settled = true;
        let remaining = self.store.commit(&self.token)?;
        info!(
            order_id = %self.grant.order_id,
            token = %redact(&self.token),
            remaining,
            "Download completed"
        );
        Ok(remaining)
    }
}

impl Drop for DownloadLease {
    fn drop(&mut self) {
        if !self.settled {
            self.store.release(&self.token);
            warn!(
                order_id = %self.grant.order_id,
                token = %redact(&self.token),
                "Download not completed, use returned"
            );
        }
    }
}
