use std::path::PathBuf;

use serde::Deserialize;

pub const DEFAULT_INGEST_MAX_BYTES: u64 = 5 * 1024 * 1024;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub address: String,
    #[serde(default = "default_storage_root")]
    pub storage_root: PathBuf,
    /// Uploads larger than this are re-encoded before storing.
    #[serde(default = "default_ingest_max_bytes")]
    pub ingest_max_bytes: u64,
    /// Longest side, in pixels, above which uploads are re-encoded.
    #[serde(default = "default_ingest_max_dimension")]
    pub ingest_max_dimension: u32,
    #[serde(default = "default_ingest_max_width")]
    pub ingest_max_width: u32,
    #[serde(default = "default_ingest_quality")]
    pub ingest_quality: u8,
    /// Largest side, in pixels, a download may ask the codec to produce.
    #[serde(default = "default_transform_max_dimension")]
    pub transform_max_dimension: u32,
    #[serde(default = "default_transform_max_pixels")]
    pub transform_max_pixels: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 8000,
            address: "127.0.0.1".to_string(),
            storage_root: default_storage_root(),
            ingest_max_bytes: default_ingest_max_bytes(),
            ingest_max_dimension: default_ingest_max_dimension(),
            ingest_max_width: default_ingest_max_width(),
            ingest_quality: default_ingest_quality(),
            transform_max_dimension: default_transform_max_dimension(),
            transform_max_pixels: default_transform_max_pixels(),
        }
    }
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("images")
}

fn default_ingest_max_bytes() -> u64 {
    DEFAULT_INGEST_MAX_BYTES
}

fn default_ingest_max_dimension() -> u32 {
    10_000
}

fn default_ingest_max_width() -> u32 {
    1200
}

fn default_ingest_quality() -> u8 {
    80
}

fn default_transform_max_dimension() -> u32 {
    10_000
}

fn default_transform_max_pixels() -> u64 {
    50_000_000
}
