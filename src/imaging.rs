//! Inline image handling
//!
//! Images attached in the editor arrive as base64 `data:` URIs. Before a
//! record is written they are decoded, scaled down to a bounded width,
//! re-encoded as JPEG and given a collision-resistant object name.

use std::io::Cursor;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::Utc;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use uuid::Uuid;

use crate::config::ServiceConfig;
use crate::error::{Result, SyncError};
use crate::models::{CollectionKind, INLINE_PREFIX};

pub const JPEG_CONTENT_TYPE: &str = "image/jpeg";

/// Recompression settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageCodec {
    pub max_width: u32,
    pub quality: u8,
}

impl Default for ImageCodec {
    fn default() -> Self {
        Self {
            max_width: 1200,
            quality: 80,
        }
    }
}

impl From<&ServiceConfig> for ImageCodec {
    fn from(config: &ServiceConfig) -> Self {
        Self {
            max_width: config.image_max_width,
            quality: config.image_quality,
        }
    }
}

impl ImageCodec {
    /// Decode a `data:` URI and return it recompressed as JPEG bytes.
    pub fn recompress(&self, data_uri: &str) -> Result<Vec<u8>> {
        let raw = decode_data_uri(data_uri)?;
        let mut img = image::load_from_memory(&raw)?;

        if img.width() > self.max_width {
            let height = scaled_height(img.width(), img.height(), self.max_width);
            img = img.resize_exact(self.max_width, height, FilterType::Lanczos3);
        }

        let mut out = Vec::new();
        JpegEncoder::new_with_quality(Cursor::new(&mut out), self.quality)
            .encode_image(&img.to_rgb8())?;
        Ok(out)
    }
}

fn scaled_height(width: u32, height: u32, target_width: u32) -> u32 {
    let scaled = (u64::from(height) * u64::from(target_width)) / u64::from(width.max(1));
    scaled.max(1) as u32
}

/// Extract the binary payload of a base64 `data:` URI.
pub fn decode_data_uri(data_uri: &str) -> Result<Vec<u8>> {
    let rest = data_uri
        .strip_prefix(INLINE_PREFIX)
        .ok_or_else(|| SyncError::InlineImage("missing data: prefix".to_string()))?;
    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| SyncError::InlineImage("missing payload separator".to_string()))?;

    if !header.ends_with(";base64") {
        return Err(SyncError::InlineImage(format!(
            "unsupported encoding in header {header:?}"
        )));
    }

    STANDARD
        .decode(payload.trim())
        .map_err(|e| SyncError::InlineImage(e.to_string()))
}

/// Object path for a new upload: `<folder>/<unix-millis>-<random>.jpg`
pub fn upload_path(kind: CollectionKind) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!(
        "{}/{}-{}.jpg",
        kind.storage_folder(),
        Utc::now().timestamp_millis(),
        &suffix[..10]
    )
}
