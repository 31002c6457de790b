//! Service configuration
//!
//! Two values matter: the service endpoint and the anonymous access key.
//! Both fall back to local development defaults when unset.

use std::{env, fmt::Display, str::FromStr};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use url::Url;

use crate::error::{Result, SyncError};

pub const DEV_SERVICE_URL: &str = "http://127.0.0.1:54321";
pub const DEV_ANON_KEY: &str = "dev-anon-key";

/// Hosted service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Base URL of the hosted service, e.g. `https://xyz.supabase.co`
    pub url: String,

    /// Anonymous (public) access key
    pub anon_key: String,

    /// Object-storage bucket holding uploaded images
    pub storage_bucket: String,

    /// Uploaded images wider than this are scaled down
    pub image_max_width: u32,

    /// JPEG quality (1-100) used when recompressing uploads
    pub image_quality: u8,

    /// Buffered change notifications per collection
    pub channel_capacity: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            url: DEV_SERVICE_URL.to_string(),
            anon_key: DEV_ANON_KEY.to_string(),
            storage_bucket: "images".to_string(),
            image_max_width: 1200,
            image_quality: 80,
            channel_capacity: 256,
        }
    }
}

impl ServiceConfig {
    /// Load configuration from environment variables (and `.env`, if present)
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();
        let config = Self {
            url: var_or("SUPABASE_URL", &defaults.url),
            anon_key: var_or("SUPABASE_ANON_KEY", &defaults.anon_key),
            storage_bucket: var_or("SUPABASE_STORAGE_BUCKET", &defaults.storage_bucket),
            image_max_width: parse_or("CONTENT_SYNC_IMAGE_MAX_WIDTH", defaults.image_max_width)?,
            image_quality: parse_or("CONTENT_SYNC_IMAGE_QUALITY", defaults.image_quality)?,
            channel_capacity: parse_or("CONTENT_SYNC_CHANNEL_CAPACITY", defaults.channel_capacity)?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        Url::parse(&self.url).map_err(|e| SyncError::Config(format!("invalid url {}: {e}", self.url)))?;
        if !(1..=100).contains(&self.image_quality) {
            return Err(SyncError::Config(format!(
                "image quality must be within 1..=100, got {}",
                self.image_quality
            )));
        }
        if self.image_max_width == 0 || self.channel_capacity == 0 {
            return Err(SyncError::Config(
                "image max width and channel capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Base URL without a trailing slash
    pub fn base_url(&self) -> &str {
        self.url.trim_end_matches('/')
    }
}

fn var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| {
        warn!("{key} not set, using development default");
        default.to_string()
    })
}

fn parse_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr + Display,
    T::Err: Display,
{
    match env::var(key) {
        Ok(raw) => parse_value(key, &raw),
        Err(_) => {
            info!("{key} not set, using default: {default}");
            Ok(default)
        }
    }
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    raw.trim()
        .parse()
        .map_err(|e| SyncError::Config(format!("invalid {key} value {raw:?}: {e}")))
}
