use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::fs;
use tracing::debug;

use super::BlobStore;

/// Blob store backed by a local directory.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if path.is_empty() || escapes {
            return Err(anyhow::anyhow!("Invalid blob path: {:?}", path));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn get(&self, path: &str) -> Result<Vec<u8>> {
        let file = self.resolve(path)?;
        fs::read(&file)
            .await
            .with_context(|| format!("Failed to read blob {}", path))
    }

    async fn put(&self, path: &str, data: Vec<u8>, content_type: &str) -> Result<()> {
        let file = self.resolve(path)?;
        if let Some(dir) = file.parent() {
            fs::create_dir_all(dir)
                .await
                .with_context(|| format!("Failed to create directory {}", dir.display()))?;
        }
        debug!("Writing blob {} ({} bytes, {})", path, data.len(), content_type);
        fs::write(&file, data)
            .await
            .with_context(|| format!("Failed to write blob {}", path))
    }
}
