//! Provider contracts the pipeline is parameterized by.
//!
//! Each family is an async trait with interchangeable adapters: live
//! HTTP-backed implementations in production, deterministic local ones
//! for the dev profile and tests. Adapters own their internal polling and
//! backoff; executors see one suspending call per operation. Every output
//! key comes from the `keys` grammar so re-invocation overwrites the same
//! objects.

pub mod local;
pub mod object_store;

pub use object_store::{FsObjectStore, ObjectStore};

use crate::errors::ErrorCode;
use crate::keys::Aspect;
use crate::store::SharpSettings;
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Provider failure already classified into the taxonomy.
#[derive(Debug, Clone)]
pub struct ProviderError {
    pub code: ErrorCode,
    pub message: String,
}

impl ProviderError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn segment(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::SegmentFailed, message)
    }

    pub fn background(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::BackgroundFailed, message)
    }

    pub fn composite(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::CompositeFailed, message)
    }

    pub fn storefront(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::StorefrontUploadFailed, message)
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::StorageFailed, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Timeout, message)
    }

    pub fn invalid_image(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidImage, message)
    }

    pub fn product_not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ProductNotFound, message)
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ProviderError {}

#[derive(Debug, Clone)]
pub struct SegmentOutput {
    pub cutout_key: String,
    pub mask_key: String,
    pub cost_usd: f64,
    pub metadata: Value,
    pub provider_job_id: Option<String>,
}

/// Removes the background from a source image, producing a transparent
/// cutout and a binary mask.
#[async_trait]
pub trait Segmenter: Send + Sync {
    async fn remove_background(
        &self,
        source_url: &str,
        sku: &str,
        image_hash: &str,
    ) -> Result<SegmentOutput, ProviderError>;
}

#[derive(Debug, Clone)]
pub struct BackgroundRequest {
    pub prompt: String,
    pub theme: String,
    pub sku: String,
    pub image_hash: String,
    /// 1-based variant number; lands at `backgrounds/.../v{variant}.jpg`.
    pub variant: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone)]
pub struct BackgroundOutput {
    pub bg_key: String,
    pub cost_usd: f64,
    pub metadata: Value,
    pub provider_job_id: Option<String>,
}

/// Generates one themed background variant. Invoked multiple times per
/// job to produce the variant set.
#[async_trait]
pub trait BackgroundGenerator: Send + Sync {
    async fn generate(&self, request: &BackgroundRequest) -> Result<BackgroundOutput, ProviderError>;
}

#[derive(Debug, Clone)]
pub struct ComposeOptions {
    pub sku: String,
    pub image_hash: String,
    pub theme: String,
    pub aspect: Aspect,
    pub variant: u32,
}

#[derive(Debug, Clone)]
pub struct CompositeOutput {
    pub composite_key: String,
    pub cost_usd: f64,
}

/// AI-driven compositor placing the cutout onto a background.
#[async_trait]
pub trait AiCompositor: Send + Sync {
    async fn compose(
        &self,
        cutout_key: &str,
        bg_key: &str,
        options: &ComposeOptions,
    ) -> Result<CompositeOutput, ProviderError>;
}

#[derive(Debug, Clone)]
pub struct CompositorOutput {
    pub key: String,
    pub metadata: Value,
}

#[derive(Debug, Clone)]
pub struct DerivativeSpec {
    pub width: u32,
    pub height: u32,
    pub quality: u8,
    /// Output file extension, e.g. `jpg` or `webp`.
    pub ext: String,
}

/// Deterministic raster operations: resize, alpha-blend, shadow, format
/// conversion. Pure image processing; same inputs, same output.
#[async_trait]
pub trait Compositor: Send + Sync {
    async fn compose(
        &self,
        cutout_key: &str,
        bg_key: &str,
        settings: &SharpSettings,
        out_key: &str,
    ) -> Result<CompositorOutput, ProviderError>;

    async fn derivative(
        &self,
        src_key: &str,
        spec: &DerivativeSpec,
        out_key: &str,
    ) -> Result<CompositorOutput, ProviderError>;
}

#[derive(Debug, Clone)]
pub struct StorefrontProduct {
    pub product_id: String,
    pub handle: String,
}

/// Downstream storefront: product lookup and media attachment. Delivery
/// is at-least-once; attach calls are deduplicated by the caller checking
/// existing media ids.
#[async_trait]
pub trait Storefront: Send + Sync {
    async fn find_product(&self, sku: &str) -> Result<Option<StorefrontProduct>, ProviderError>;

    async fn attach_media(
        &self,
        product_id: &str,
        urls: &[String],
        alt_text: &str,
    ) -> Result<Vec<String>, ProviderError>;
}

/// The full adapter set an executor works against.
#[derive(Clone)]
pub struct ProviderSet {
    pub objects: Arc<dyn ObjectStore>,
    pub segmenter: Arc<dyn Segmenter>,
    pub backgrounds: Arc<dyn BackgroundGenerator>,
    pub ai_compositor: Arc<dyn AiCompositor>,
    pub compositor: Arc<dyn Compositor>,
    pub storefront: Arc<dyn Storefront>,
}
