//! Runtime configuration from the environment, with development-friendly
//! defaults. Production refuses to start without a webhook secret.

use anyhow::{bail, Result};
use std::env;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnv {
    Development,
    Production,
}

impl AppEnv {
    fn from_env() -> Self {
        match env::var("APP_ENV").unwrap_or_default().as_str() {
            "production" | "prod" => Self::Production,
            _ => Self::Development,
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub app_env: AppEnv,
    pub db_path: String,
    pub port: u16,
    pub poll_interval_ms: u64,
    pub concurrency: usize,
    pub max_retries: u32,
    pub image_max_per_sku: u32,
    pub default_theme: String,
    pub webhook_secret: Option<String>,
    pub skip_webhook_verification: bool,
    pub ai_compositor: String,
    pub lease_ttl_ms: i64,
    pub migrations_dir: String,
    pub storage_root: String,
    pub presign_secret: String,
    pub public_base_url: String,
    pub shutdown_grace_secs: u64,
    pub rate_limit_max: u32,
    pub rate_limit_window_secs: u64,
    pub freepik_api_key: Option<String>,
    pub nanobanana_api_key: Option<String>,
    pub shopify_access_token: Option<String>,
}

fn var_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let app_env = AppEnv::from_env();
        let webhook_secret = env::var("TJMS_WEBHOOK_SECRET")
            .ok()
            .filter(|s| !s.is_empty());
        let skip_webhook_verification = env::var("SKIP_WEBHOOK_VERIFICATION")
            .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE"))
            .unwrap_or(false);

        let config = Self {
            app_env,
            db_path: env::var("DB_PATH").unwrap_or_else(|_| "./photopipe.db".to_string()),
            port: var_or("PORT", 8080u16),
            poll_interval_ms: var_or("POLL_INTERVAL_MS", 5_000u64),
            concurrency: var_or("CONCURRENCY", 4usize).clamp(1, 64),
            max_retries: var_or("MAX_RETRIES", 3u32),
            image_max_per_sku: var_or("IMAGE_MAX_PER_SKU", 4u32),
            default_theme: env::var("DEFAULT_THEME").unwrap_or_else(|_| "default".to_string()),
            webhook_secret,
            skip_webhook_verification,
            ai_compositor: env::var("AI_COMPOSITOR").unwrap_or_else(|_| "none".to_string()),
            lease_ttl_ms: var_or("LEASE_TTL_MS", 600_000i64),
            migrations_dir: env::var("MIGRATIONS_DIR").unwrap_or_else(|_| "./migrations".to_string()),
            storage_root: env::var("STORAGE_ROOT").unwrap_or_else(|_| "./storage".to_string()),
            presign_secret: env::var("PRESIGN_SECRET")
                .unwrap_or_else(|_| "dev-presign-secret".to_string()),
            public_base_url: env::var("PUBLIC_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:8080".to_string()),
            shutdown_grace_secs: var_or("SHUTDOWN_GRACE_SECS", 30u64),
            rate_limit_max: var_or("RATE_LIMIT_MAX", 120u32),
            rate_limit_window_secs: var_or("RATE_LIMIT_WINDOW_SECS", 60u64),
            freepik_api_key: env::var("FREEPIK_API_KEY").ok(),
            nanobanana_api_key: env::var("NANOBANANA_API_KEY").ok(),
            shopify_access_token: env::var("SHOPIFY_ACCESS_TOKEN").ok(),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.app_env.is_production() && self.webhook_secret.is_none() {
            bail!("TJMS_WEBHOOK_SECRET is required in production");
        }
        Ok(())
    }

    /// Signature verification may be skipped only outside production, and
    /// only when no secret is configured at all.
    pub fn webhook_verification_enabled(&self) -> bool {
        if self.webhook_secret.is_some() {
            return true;
        }
        !(self.skip_webhook_verification && !self.app_env.is_production())
    }
}
