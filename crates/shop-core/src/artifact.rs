//! # Artifact Store
//!
//! Where the purchased file comes from.

use crate::error::ShopResult;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use std::sync::Arc;

/// Chunks of the artifact body
pub type ArtifactStream = BoxStream<'static, std::io::Result<Bytes>>;

/// An opened artifact, ready to stream
pub struct Artifact {
    /// Name offered to the browser
    pub filename: String,
    pub content_type: String,
    /// Size in bytes when known
    pub size: Option<u64>,
    pub body: ArtifactStream,
}

impl std::fmt::Debug for Artifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Artifact")
            .field("filename", &self.filename)
            .field("content_type", &self.content_type)
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Open the artifact purchased with `order_id`.
    ///
    /// Fails with `ShopError::ArtifactNotFound` when there is nothing to serve.
    async fn open(&self, order_id: &str) -> ShopResult<Artifact>;
}

pub type BoxedArtifactStore = Arc<dyn ArtifactStore>;
