use anyhow::Result;
use async_trait::async_trait;

pub mod fs;

pub use fs::FsBlobStore;

/// Object storage addressed by opaque, caller-chosen paths.
#[async_trait]
pub trait BlobStore: Send + Sync + 'static {
    async fn get(&self, path: &str) -> Result<Vec<u8>>;
    async fn put(&self, path: &str, data: Vec<u8>, content_type: &str) -> Result<()>;
}
