//! Builds the production object graph from a loaded configuration.

use std::sync::Arc;

use bookpress::assembler::{ArtifactAssembler, FileObjectStore, ObjectStore, UrlSigner};
use bookpress::clock::{Clock, SystemClock};
use bookpress::compile::{CompilationController, JobRepository, SqliteJobRepository};
use bookpress::config::Config;
use bookpress::cover::CoverComposer;
use bookpress::db::Database;
use bookpress::fulfillment::{
    FulfillmentBridge, HttpPrintProvider, OrderRepository, PriceTable, SqliteOrderRepository,
};
use bookpress::render::{HttpSnapshotter, PageRasterizer, PageSource, RenderTokenIssuer, Snapshotter};
use bookpress::{BookpressError, ConfigError};

pub struct App {
    pub compiler: CompilationController,
    /// Present only when a print provider is configured.
    pub fulfillment: Option<FulfillmentBridge>,
    pub price_table: PriceTable,
}

impl App {
    pub fn build(config: &Config, pages: Arc<dyn PageSource>) -> Result<Self, BookpressError> {
        let db_path = config.database_path().ok_or_else(|| ConfigError::Validation {
            message: "Could not determine home directory for the database".to_string(),
        })?;
        let db = Database::open(&db_path)?;
        let jobs: Arc<dyn JobRepository> = Arc::new(SqliteJobRepository::new(db.clone()));
        let orders: Arc<dyn OrderRepository> = Arc::new(SqliteOrderRepository::new(db));

        let signer = UrlSigner::new(
            &config.storage.public_base_url,
            config.storage.signing_key.resolve()?,
        )?;
        let store: Arc<dyn ObjectStore> = Arc::new(FileObjectStore::new(config.storage_root(), signer));
        let assembler = Arc::new(ArtifactAssembler::new(store));

        let issuer = Arc::new(RenderTokenIssuer::from_secret(
            &config.render.token_key.resolve()?,
        )?);
        let snapshotter: Arc<dyn Snapshotter> =
            Arc::new(HttpSnapshotter::new(&config.render.snapshot_endpoint)?);
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let rasterizer = Arc::new(PageRasterizer::new(
            issuer,
            snapshotter,
            clock.clone(),
            config.raster_settings(),
        ));

        let compiler = CompilationController::new(
            jobs.clone(),
            pages,
            rasterizer.clone(),
            assembler.clone(),
            clock.clone(),
            config.compile_settings(),
        );

        let fulfillment = match &config.provider {
            Some(provider_config) => {
                let provider = Arc::new(HttpPrintProvider::new(
                    &provider_config.base_url,
                    provider_config.api_key.resolve()?,
                )?);
                let composer = Arc::new(CoverComposer::new(rasterizer, config.render.output_dpi));
                Some(FulfillmentBridge::new(
                    jobs,
                    orders,
                    provider,
                    composer,
                    assembler,
                    clock,
                    config.fulfillment_settings(),
                ))
            }
            None => None,
        };

        Ok(Self {
            compiler,
            fulfillment,
            price_table: config.fulfillment_settings().price_table,
        })
    }
}
