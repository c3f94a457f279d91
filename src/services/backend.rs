use crate::utils::image::ImageData;
use anyhow::Result;
use async_trait::async_trait;
use std::fmt::Debug;

/// Quota failures should come back as `BackendError::RateLimited`.
#[async_trait]
pub trait GenerationBackend: Send + Sync + Debug {
    async fn generate_text(
        &self,
        api_key: &str,
        prompt: &str,
        images: &[ImageData],
        schema: &serde_json::Value,
    ) -> Result<serde_json::Value>;

    async fn generate_image(
        &self,
        api_key: &str,
        prompt: &str,
        references: &[ImageData],
    ) -> Result<ImageData>;

    async fn edit_image(
        &self,
        api_key: &str,
        image: &ImageData,
        instruction: &str,
    ) -> Result<ImageData>;
}
