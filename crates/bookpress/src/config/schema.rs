use serde::{Deserialize, Serialize};

use crate::fulfillment::PriceTable;
use crate::secrets::{has_secret_source, resolve_secret, SecretError};
use secrecy::SecretString;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    /// Defaults to `~/.bookpress/data/bookpress.db`.
    #[serde(default)]
    pub database_path: Option<String>,
    pub storage: StorageConfig,
    pub render: RenderConfig,
    #[serde(default)]
    pub compile: CompileConfig,
    #[serde(default)]
    pub provider: Option<ProviderConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Where a secret comes from: inline, a file, or an environment variable,
/// tried in that order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecretSource {
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub env_var: Option<String>,
}

impl SecretSource {
    pub fn env(name: &str) -> Self {
        Self {
            env_var: Some(name.to_string()),
            ..Default::default()
        }
    }

    pub fn is_configured(&self) -> bool {
        has_secret_source(
            self.value.as_deref(),
            self.file.as_deref(),
            self.env_var.as_deref(),
        )
    }

    pub fn resolve(&self) -> Result<SecretString, SecretError> {
        resolve_secret(
            self.value.as_deref(),
            self.file.as_deref(),
            self.env_var.as_deref(),
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_root")]
    pub root: String,
    /// Base of the signed download URLs.
    pub public_base_url: String,
    #[serde(default = "default_signing_key")]
    pub signing_key: SecretSource,
}

fn default_storage_root() -> String {
    "~/.bookpress/storage".to_string()
}

fn default_signing_key() -> SecretSource {
    SecretSource::env("BOOKPRESS_SIGNING_KEY")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderConfig {
    /// Base URL the snapshot service loads render views from.
    pub base_url: String,
    pub snapshot_endpoint: String,
    /// 64 hex characters.
    #[serde(default = "default_token_key")]
    pub token_key: SecretSource,
    #[serde(default = "default_token_ttl_secs")]
    pub token_ttl_secs: u64,
    #[serde(default = "default_snapshot_timeout_secs")]
    pub snapshot_timeout_secs: u64,
    #[serde(default = "default_output_dpi")]
    pub output_dpi: f64,
}

fn default_token_key() -> SecretSource {
    SecretSource::env("BOOKPRESS_RENDER_KEY")
}

fn default_token_ttl_secs() -> u64 {
    300
}

fn default_snapshot_timeout_secs() -> u64 {
    60
}

fn default_output_dpi() -> f64 {
    crate::geometry::PRINT_DPI
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompileConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_fingerprint_bucket_secs")]
    pub fingerprint_bucket_secs: u64,
    #[serde(default = "default_download_ttl_hours")]
    pub download_ttl_hours: i64,
    #[serde(default = "default_per_page_estimate_secs")]
    pub per_page_estimate_secs: u64,
    #[serde(default = "default_merge_estimate_secs")]
    pub merge_estimate_secs: u64,
}

fn default_concurrency() -> usize {
    4
}

fn default_fingerprint_bucket_secs() -> u64 {
    3_600
}

fn default_download_ttl_hours() -> i64 {
    24
}

fn default_per_page_estimate_secs() -> u64 {
    3
}

fn default_merge_estimate_secs() -> u64 {
    10
}

impl Default for CompileConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            fingerprint_bucket_secs: default_fingerprint_bucket_secs(),
            download_ttl_hours: default_download_ttl_hours(),
            per_page_estimate_secs: default_per_page_estimate_secs(),
            merge_estimate_secs: default_merge_estimate_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub base_url: String,
    #[serde(default = "default_provider_key")]
    pub api_key: SecretSource,
    #[serde(default = "default_quote_timeout_secs")]
    pub quote_timeout_secs: u64,
    #[serde(default = "default_asset_url_ttl_hours")]
    pub asset_url_ttl_hours: i64,
    #[serde(default)]
    pub price_table: PriceTable,
}

fn default_provider_key() -> SecretSource {
    SecretSource::env("BOOKPRESS_PROVIDER_KEY")
}

fn default_quote_timeout_secs() -> u64 {
    10
}

fn default_asset_url_ttl_hours() -> i64 {
    72
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}
