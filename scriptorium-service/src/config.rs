//! Service configuration.
//!
//! All settings are read once at startup from an optional `config.{toml,yaml}`
//! file plus `SCRIPTORIUM`-prefixed environment variables. There is no
//! runtime-mutable configuration; changing a value requires a restart.

use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;

use crate::error::{ServiceError, ServiceResult};

/// Top-level service configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StaticConfig {
    #[serde(default = "default_server")]
    pub server: ServerConfig,

    #[serde(default = "default_storage")]
    pub storage: StorageConfig,

    #[serde(default)]
    pub cors: CorsConfig,

    #[serde(default = "default_limits")]
    pub limits: LimitsConfig,

    #[serde(default)]
    pub extraction: ExtractionConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Root directory for the SQLite database and all stored blobs
    /// (`documents/` and `images/<project>/` subdirectories).
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Optional directory holding the built admin front-end bundle.
    /// Served at `/admin` when present.
    #[serde(default)]
    pub admin_assets_dir: Option<PathBuf>,

    /// Optional directory holding the built public front-end bundle.
    /// Served at `/` when present.
    #[serde(default)]
    pub public_assets_dir: Option<PathBuf>,
}

/// CORS configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CorsConfig {
    /// Allowed origins. Empty means allow any origin.
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

/// Size limits
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_max_document_size")]
    pub max_document_size_bytes: u64,

    #[serde(default = "default_max_image_size")]
    pub max_image_size_bytes: u64,
}

/// Extraction pipeline tuning
#[derive(Debug, Clone, Deserialize)]
pub struct ExtractionConfig {
    /// Embedded images smaller than this many bytes are discarded
    /// (filters inline icons and list bullets).
    #[serde(default = "default_min_image_bytes")]
    pub min_image_bytes: usize,

    /// Minimum pixel dimension for an extracted image.
    #[serde(default = "default_min_image_dimension")]
    pub min_image_dimension: u32,

    /// Minimum rows for an accepted table.
    #[serde(default = "default_table_min_rows")]
    pub table_min_rows: usize,

    /// Minimum columns for an accepted table.
    #[serde(default = "default_table_min_cols")]
    pub table_min_cols: usize,

    /// Minimum ratio of non-empty cells for an accepted table.
    #[serde(default = "default_table_min_filled_ratio")]
    pub table_min_filled_ratio: f64,

    /// DPI used when rasterizing PDF pages for table-region detection.
    #[serde(default = "default_detection_dpi")]
    pub detection_dpi: f64,

    /// Optional path to a TTF font used for table renders. Falls back to a
    /// set of common system font locations when unset.
    #[serde(default)]
    pub table_font_path: Option<PathBuf>,

    /// Optional directory holding OCR model files (feature `table-ocr`).
    #[serde(default)]
    pub ocr_model_dir: Option<PathBuf>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            min_image_bytes: default_min_image_bytes(),
            min_image_dimension: default_min_image_dimension(),
            table_min_rows: default_table_min_rows(),
            table_min_cols: default_table_min_cols(),
            table_min_filled_ratio: default_table_min_filled_ratio(),
            detection_dpi: default_detection_dpi(),
            table_font_path: None,
            ocr_model_dir: None,
        }
    }
}

impl StaticConfig {
    /// Load configuration from file and env vars
    pub fn load() -> ServiceResult<Self> {
        Config::builder()
            .add_source(File::with_name("config").required(false))
            .add_source(
                Environment::with_prefix("SCRIPTORIUM")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| ServiceError::Config {
                message: format!("Failed to build config: {}", e),
            })?
            .try_deserialize()
            .map_err(|e| ServiceError::Config {
                message: format!("Failed to deserialize config: {}", e),
            })
    }
}

// ==================== Default Value Functions ====================

fn default_server() -> ServerConfig {
    ServerConfig {
        host: default_host(),
        port: default_port(),
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_storage() -> StorageConfig {
    StorageConfig {
        data_dir: default_data_dir(),
        admin_assets_dir: None,
        public_assets_dir: None,
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_limits() -> LimitsConfig {
    LimitsConfig {
        max_document_size_bytes: default_max_document_size(),
        max_image_size_bytes: default_max_image_size(),
    }
}

fn default_max_document_size() -> u64 {
    52_428_800 // 50MB
}

fn default_max_image_size() -> u64 {
    10_485_760 // 10MB
}

fn default_min_image_bytes() -> usize {
    4096
}

fn default_min_image_dimension() -> u32 {
    32
}

fn default_table_min_rows() -> usize {
    2
}

fn default_table_min_cols() -> usize {
    2
}

fn default_table_min_filled_ratio() -> f64 {
    0.3
}

fn default_detection_dpi() -> f64 {
    150.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extraction_defaults() {
        let cfg = ExtractionConfig::default();
        assert_eq!(cfg.min_image_bytes, 4096);
        assert_eq!(cfg.table_min_rows, 2);
        assert_eq!(cfg.table_min_cols, 2);
        assert!((cfg.table_min_filled_ratio - 0.3).abs() < f64::EPSILON);
    }

    #[test]
    fn test_config_deserializes_with_all_defaults() {
        let cfg: StaticConfig = serde_json::from_str("{}").expect("empty config should apply defaults");
        assert_eq!(cfg.server.port, 8080);
        assert_eq!(cfg.storage.data_dir, PathBuf::from("./data"));
        assert!(cfg.cors.allowed_origins.is_empty());
    }
}
