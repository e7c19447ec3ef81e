use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Duration as ChronoDuration;

use crate::compile::CompileSettings;
use crate::config::schema::Config;
use crate::error::ConfigError;
use crate::fulfillment::FulfillmentSettings;
use crate::render::RasterSettings;
use crate::secrets::expand_home;

/// Highest output resolution accepted for page and cover rendering.
const MAX_OUTPUT_DPI: f64 = 1_200.0;

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let config: Config = serde_json::from_str(content)?;

    validate_config(&config)?;

    Ok(config)
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    check_url("storage.public_base_url", &config.storage.public_base_url)?;
    check_url("render.base_url", &config.render.base_url)?;
    check_url("render.snapshot_endpoint", &config.render.snapshot_endpoint)?;

    if config.render.token_ttl_secs == 0 {
        return Err(invalid("render.token_ttl_secs", "must be greater than zero"));
    }
    if config.render.snapshot_timeout_secs == 0 {
        return Err(invalid(
            "render.snapshot_timeout_secs",
            "must be greater than zero",
        ));
    }
    let dpi = config.render.output_dpi;
    if !dpi.is_finite() || dpi <= 0.0 || dpi > MAX_OUTPUT_DPI {
        return Err(invalid(
            "render.output_dpi",
            &format!("must be in (0, {}]", MAX_OUTPUT_DPI),
        ));
    }

    if config.compile.concurrency == 0 {
        return Err(invalid("compile.concurrency", "must be at least 1"));
    }
    if config.compile.fingerprint_bucket_secs == 0 {
        return Err(invalid(
            "compile.fingerprint_bucket_secs",
            "must be greater than zero",
        ));
    }
    if config.compile.download_ttl_hours <= 0 {
        return Err(invalid(
            "compile.download_ttl_hours",
            "must be greater than zero",
        ));
    }

    if let Some(provider) = &config.provider {
        check_url("provider.base_url", &provider.base_url)?;
        if provider.asset_url_ttl_hours <= 0 {
            return Err(invalid(
                "provider.asset_url_ttl_hours",
                "must be greater than zero",
            ));
        }
    }

    if tracing_subscriber::EnvFilter::try_new(&config.logging.level).is_err() {
        return Err(invalid(
            "logging.level",
            &format!("'{}' is not a valid filter", config.logging.level),
        ));
    }

    Ok(())
}

fn check_url(field: &'static str, value: &str) -> Result<(), ConfigError> {
    if value.starts_with("http://") || value.starts_with("https://") {
        Ok(())
    } else {
        Err(invalid(field, &format!("'{}' is not an http(s) URL", value)))
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::InvalidField {
        field,
        reason: reason.to_string(),
    }
}

impl Config {
    pub fn database_path(&self) -> Option<PathBuf> {
        match &self.database_path {
            Some(path) => Some(PathBuf::from(expand_home(path))),
            None => crate::db::default_database_path(),
        }
    }

    pub fn storage_root(&self) -> PathBuf {
        PathBuf::from(expand_home(&self.storage.root))
    }

    pub fn raster_settings(&self) -> RasterSettings {
        RasterSettings {
            render_base_url: self.render.base_url.clone(),
            token_ttl: ChronoDuration::seconds(self.render.token_ttl_secs as i64),
            snapshot_timeout: Duration::from_secs(self.render.snapshot_timeout_secs),
            output_dpi: self.render.output_dpi,
        }
    }

    pub fn compile_settings(&self) -> CompileSettings {
        CompileSettings {
            concurrency: self.compile.concurrency,
            fingerprint_bucket_secs: self.compile.fingerprint_bucket_secs,
            download_ttl: ChronoDuration::hours(self.compile.download_ttl_hours),
            per_page_estimate_secs: self.compile.per_page_estimate_secs,
            merge_estimate_secs: self.compile.merge_estimate_secs,
        }
    }

    /// Provider section settings, or the defaults when no provider is configured.
    pub fn fulfillment_settings(&self) -> FulfillmentSettings {
        match &self.provider {
            Some(provider) => FulfillmentSettings {
                price_table: provider.price_table.clone(),
                quote_timeout: Duration::from_secs(provider.quote_timeout_secs),
                asset_url_ttl: ChronoDuration::hours(provider.asset_url_ttl_hours),
            },
            None => FulfillmentSettings::default(),
        }
    }
}
