use std::path::PathBuf;
use thiserror::Error;

use crate::assembler::{AssemblyError, StorageError};
use crate::compile::CompileError;
use crate::cover::{CoverError, DesignError};
use crate::db::{DatabaseError, RepositoryError};
use crate::fulfillment::{FulfillmentError, ProviderError};
use crate::render::{RenderError, SnapshotError, SourceError, TokenError, ViewError};
use crate::secrets::SecretError;
use crate::telemetry::TelemetryError;

#[derive(Error, Debug)]
pub enum BookpressError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Secret error: {0}")]
    Secret(#[from] SecretError),

    #[error("Render token error: {0}")]
    Token(#[from] TokenError),

    #[error("Render view error: {0}")]
    View(#[from] ViewError),

    #[error("Page source error: {0}")]
    Source(#[from] SourceError),

    #[error("Snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    #[error("Render error: {0}")]
    Render(#[from] RenderError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Assembly error: {0}")]
    Assembly(#[from] AssemblyError),

    #[error("Compile error: {0}")]
    Compile(#[from] CompileError),

    #[error("Cover error: {0}")]
    Cover(#[from] CoverError),

    #[error("Cover design error: {0}")]
    Design(#[from] DesignError),

    #[error("Fulfillment error: {0}")]
    Fulfillment(#[from] FulfillmentError),

    #[error("Print provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("Logging setup failed: {0}")]
    Telemetry(#[from] TelemetryError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Invalid value for '{field}': {reason}")]
    InvalidField { field: &'static str, reason: String },
}

pub type Result<T> = std::result::Result<T, BookpressError>;
