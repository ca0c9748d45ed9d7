//! Deterministic in-process adapters.
//!
//! These back the dev profile and the test suite: no network, no API
//! keys, byte-deterministic outputs at the same keys a live adapter
//! would write. Costs are small fixed numbers so cost accounting is
//! exercised end to end.

use super::{
    AiCompositor, BackgroundGenerator, BackgroundOutput, BackgroundRequest, ComposeOptions,
    CompositeOutput, Compositor, CompositorOutput, DerivativeSpec, ObjectStore, ProviderError,
    SegmentOutput, Segmenter, Storefront, StorefrontProduct,
};
use crate::keys;
use crate::store::SharpSettings;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::sync::Arc;

/// Stable small integer for ids derived from a sku.
fn stable_id(input: &str) -> u64 {
    let digest = Sha256::digest(input.as_bytes());
    u64::from_be_bytes(digest[..8].try_into().unwrap_or_default())
}

pub struct LocalSegmenter {
    objects: Arc<dyn ObjectStore>,
}

impl LocalSegmenter {
    pub fn new(objects: Arc<dyn ObjectStore>) -> Self {
        Self { objects }
    }
}

#[async_trait]
impl Segmenter for LocalSegmenter {
    async fn remove_background(
        &self,
        source_url: &str,
        sku: &str,
        image_hash: &str,
    ) -> Result<SegmentOutput, ProviderError> {
        let cutout_key = keys::cutout(sku, image_hash);
        let mask_key = keys::mask(sku, image_hash);
        let cutout = format!("PNG:cutout:{}:{}", sku, image_hash).into_bytes();
        let mask = format!("PNG:mask:{}:{}", sku, image_hash).into_bytes();
        self.objects.put(&cutout_key, &cutout, "image/png").await?;
        self.objects.put(&mask_key, &mask, "image/png").await?;
        Ok(SegmentOutput {
            cutout_key,
            mask_key,
            cost_usd: 0.02,
            metadata: json!({ "provider": "local", "source": source_url }),
            provider_job_id: Some(format!("local-seg-{}", stable_id(image_hash))),
        })
    }
}

pub struct LocalBackgroundGenerator {
    objects: Arc<dyn ObjectStore>,
}

impl LocalBackgroundGenerator {
    pub fn new(objects: Arc<dyn ObjectStore>) -> Self {
        Self { objects }
    }
}

#[async_trait]
impl BackgroundGenerator for LocalBackgroundGenerator {
    async fn generate(&self, request: &BackgroundRequest) -> Result<BackgroundOutput, ProviderError> {
        let bg_key = keys::background(
            &request.sku,
            &request.image_hash,
            &request.theme,
            request.variant,
        );
        let bytes = format!(
            "JPG:bg:{}:{}:v{}:{}x{}:{}",
            request.theme,
            request.image_hash,
            request.variant,
            request.width,
            request.height,
            stable_id(&request.prompt)
        )
        .into_bytes();
        self.objects.put(&bg_key, &bytes, "image/jpeg").await?;
        Ok(BackgroundOutput {
            bg_key,
            cost_usd: 0.01,
            metadata: json!({
                "provider": "local",
                "prompt": request.prompt,
                "variant": request.variant,
            }),
            provider_job_id: None,
        })
    }
}

pub struct LocalAiCompositor {
    objects: Arc<dyn ObjectStore>,
}

impl LocalAiCompositor {
    pub fn new(objects: Arc<dyn ObjectStore>) -> Self {
        Self { objects }
    }
}

#[async_trait]
impl AiCompositor for LocalAiCompositor {
    async fn compose(
        &self,
        cutout_key: &str,
        bg_key: &str,
        options: &ComposeOptions,
    ) -> Result<CompositeOutput, ProviderError> {
        let composite_key = keys::composite(
            &options.sku,
            &options.image_hash,
            &options.theme,
            options.aspect,
            options.variant,
            keys::CompositeKind::Ai,
        );
        let bytes = format!("JPG:ai-composite:{}:{}", cutout_key, bg_key).into_bytes();
        self.objects
            .put(&composite_key, &bytes, "image/jpeg")
            .await?;
        Ok(CompositeOutput {
            composite_key,
            cost_usd: 0.03,
        })
    }
}

pub struct LocalCompositor {
    objects: Arc<dyn ObjectStore>,
}

impl LocalCompositor {
    pub fn new(objects: Arc<dyn ObjectStore>) -> Self {
        Self { objects }
    }
}

#[async_trait]
impl Compositor for LocalCompositor {
    async fn compose(
        &self,
        cutout_key: &str,
        bg_key: &str,
        settings: &SharpSettings,
        out_key: &str,
    ) -> Result<CompositorOutput, ProviderError> {
        // Read both inputs so a missing artifact fails here, like a real
        // raster pipeline would.
        let cutout = self.objects.get(cutout_key).await?;
        let bg = self.objects.get(bg_key).await?;
        let mut bytes =
            format!("JPG:composite:h{}:q{}:", settings.bottle_height_percent, settings.quality)
                .into_bytes();
        bytes.extend_from_slice(&Sha256::digest(&cutout));
        bytes.extend_from_slice(&Sha256::digest(&bg));
        self.objects.put(out_key, &bytes, "image/jpeg").await?;
        Ok(CompositorOutput {
            key: out_key.to_string(),
            metadata: json!({
                "bottleHeightPercent": settings.bottle_height_percent,
                "quality": settings.quality,
                "gravity": settings.gravity,
            }),
        })
    }

    async fn derivative(
        &self,
        src_key: &str,
        spec: &DerivativeSpec,
        out_key: &str,
    ) -> Result<CompositorOutput, ProviderError> {
        let src = self.objects.get(src_key).await?;
        let mut bytes =
            format!("IMG:derivative:{}x{}:q{}:", spec.width, spec.height, spec.quality).into_bytes();
        bytes.extend_from_slice(&Sha256::digest(&src));
        self.objects
            .put(out_key, &bytes, "application/octet-stream")
            .await?;
        Ok(CompositorOutput {
            key: out_key.to_string(),
            metadata: json!({ "width": spec.width, "height": spec.height }),
        })
    }
}

/// Resolves every sku to a stable product unless told otherwise.
#[derive(Default)]
pub struct LocalStorefront {
    missing: RwLock<HashSet<String>>,
}

impl LocalStorefront {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `find_product` return None for this sku (ProductNotFound
    /// scenarios in tests).
    pub fn deny(&self, sku: &str) {
        self.missing.write().insert(sku.to_string());
    }
}

#[async_trait]
impl Storefront for LocalStorefront {
    async fn find_product(&self, sku: &str) -> Result<Option<StorefrontProduct>, ProviderError> {
        if self.missing.read().contains(sku) {
            return Ok(None);
        }
        Ok(Some(StorefrontProduct {
            product_id: format!("gid://shopify/Product/{}", stable_id(sku) % 1_000_000_000),
            handle: sku.to_ascii_lowercase(),
        }))
    }

    async fn attach_media(
        &self,
        product_id: &str,
        urls: &[String],
        _alt_text: &str,
    ) -> Result<Vec<String>, ProviderError> {
        if urls.is_empty() {
            return Err(ProviderError::storefront("no media urls supplied"));
        }
        Ok(urls
            .iter()
            .enumerate()
            .map(|(i, _)| {
                format!(
                    "gid://shopify/MediaImage/{}-{}",
                    stable_id(product_id) % 1_000_000_000,
                    i + 1
                )
            })
            .collect())
    }
}
