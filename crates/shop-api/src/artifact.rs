//! # Filesystem Artifact Store
//!
//! Serves the purchased e-book from local disk. Every order gets the same
//! file.

use async_trait::async_trait;
use futures::StreamExt;
use shop_core::{Artifact, ArtifactStore, ShopError, ShopResult};
use std::path::PathBuf;
use tokio_util::io::ReaderStream;
use tracing::error;

/// Where the artifact lives and how it is offered to the browser
#[derive(Debug, Clone)]
pub struct ArtifactConfig {
    pub path: PathBuf,
    pub filename: String,
    pub content_type: String,
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("ebooks/complete-recipe-collection.pdf"),
            filename: "RecipeRush-Complete-Recipe-Collection.pdf".to_string(),
            content_type: "application/pdf".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    config: ArtifactConfig,
}

impl FsArtifactStore {
    pub fn new(config: ArtifactConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ArtifactConfig {
        &self.config
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn open(&self, order_id: &str) -> ShopResult<Artifact> {
        let file = tokio::fs::File::open(&self.config.path).await.map_err(|e| {
            error!(path = %self.config.path.display(), "Cannot open artifact: {}", e);
            ShopError::ArtifactNotFound {
                order_id: order_id.to_string(),
            }
        })?;
        let size = file.metadata().await.ok().map(|m| m.len());

        Ok(Artifact {
            filename: self.config.filename.clone(),
            content_type: self.config.content_type.clone(),
            size,
            body: ReaderStream::new(file).boxed(),
        })
    }
}
