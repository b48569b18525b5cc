//! # Notifier
//!
//! Delivery of download links to customers. Email in production, a log line
//! in development.

use crate::error::ShopResult;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;

/// Everything a notifier needs to tell a customer where their purchase is
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadDelivery {
    pub customer_email: String,
    pub customer_name: String,
    pub download_url: String,
    pub order_id: String,
    pub max_downloads: u32,
    pub expires_in_days: i64,
}

/// Sends download instructions. One attempt per call, no retry.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_download_link(&self, delivery: &DownloadDelivery) -> ShopResult<()>;

    /// Name for logs
    fn name(&self) -> &'static str;
}

pub type BoxedNotifier = Arc<dyn Notifier>;
