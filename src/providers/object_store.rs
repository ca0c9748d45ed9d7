//! Object storage behind the key grammar.
//!
//! The filesystem adapter keeps objects under a root directory and mints
//! presigned URLs as HMAC tokens over (method, key, expiry), the same
//! signing stack used for webhook verification. Key disjointness makes
//! concurrent writes safe; identical keys carry identical content.

use super::ProviderError;
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::path::{Component, Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

type HmacSha256 = Hmac<Sha256>;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &str, bytes: &[u8], content_type: &str)
        -> Result<(), ProviderError>;

    async fn get(&self, key: &str) -> Result<Vec<u8>, ProviderError>;

    async fn exists(&self, key: &str) -> Result<bool, ProviderError>;

    /// Short-lived GET URL usable without further credentials.
    fn presign_get(&self, key: &str, ttl_secs: u64) -> Result<String, ProviderError>;

    /// Short-lived PUT URL for direct uploads.
    fn presign_put(&self, key: &str, ttl_secs: u64) -> Result<String, ProviderError>;
}

/// Filesystem-backed store for the dev profile and tests.
pub struct FsObjectStore {
    root: PathBuf,
    base_url: String,
    secret: String,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>, base_url: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            base_url: base_url.into(),
            secret: secret.into(),
        }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, ProviderError> {
        let rel = Path::new(key);
        if rel.components().any(|c| {
            matches!(
                c,
                Component::ParentDir | Component::RootDir | Component::Prefix(_)
            )
        }) {
            return Err(ProviderError::storage(format!(
                "refusing key escaping the store root: {:?}",
                key
            )));
        }
        Ok(self.root.join(rel))
    }

    fn presign(&self, method: &str, key: &str, ttl_secs: u64) -> Result<String, ProviderError> {
        let expires = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| ProviderError::storage(e.to_string()))?
            .as_secs()
            + ttl_secs;
        let token = sign(&self.secret, method, key, expires)?;
        Ok(format!(
            "{}/objects/{}?method={}&expires={}&signature={}",
            self.base_url, key, method, expires, token
        ))
    }

    /// Validate a presigned token, for the object-serving route.
    pub fn verify(&self, method: &str, key: &str, expires: u64, signature: &str) -> bool {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(u64::MAX);
        if expires < now {
            return false;
        }
        let Ok(provided) = URL_SAFE_NO_PAD.decode(signature) else {
            return false;
        };
        let Ok(mut mac) = HmacSha256::new_from_slice(self.secret.as_bytes()) else {
            return false;
        };
        mac.update(payload(method, key, expires).as_bytes());
        mac.verify_slice(&provided).is_ok()
    }
}

fn payload(method: &str, key: &str, expires: u64) -> String {
    format!("{}\n{}\n{}", method, key, expires)
}

fn sign(secret: &str, method: &str, key: &str, expires: u64) -> Result<String, ProviderError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| ProviderError::storage(e.to_string()))?;
    mac.update(payload(method, key, expires).as_bytes());
    Ok(URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes()))
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put(&self, key: &str, bytes: &[u8], _content_type: &str) -> Result<(), ProviderError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ProviderError::storage(format!("mkdir {:?}: {}", parent, e)))?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| ProviderError::storage(format!("write {:?}: {}", path, e)))
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, ProviderError> {
        let path = self.path_for(key)?;
        tokio::fs::read(&path)
            .await
            .map_err(|e| ProviderError::storage(format!("read {:?}: {}", path, e)))
    }

    async fn exists(&self, key: &str) -> Result<bool, ProviderError> {
        let path = self.path_for(key)?;
        Ok(tokio::fs::try_exists(&path).await.unwrap_or(false))
    }

    fn presign_get(&self, key: &str, ttl_secs: u64) -> Result<String, ProviderError> {
        self.presign("GET", key, ttl_secs)
    }

    fn presign_put(&self, key: &str, ttl_secs: u64) -> Result<String, ProviderError> {
        self.presign("PUT", key, ttl_secs)
    }
}
