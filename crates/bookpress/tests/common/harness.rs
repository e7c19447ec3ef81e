//! Fully wired compile and fulfillment stack over in-process fakes.
//!
//! Rendering runs at a low output resolution so rasterized pages stay small.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use secrecy::SecretString;

use bookpress::assembler::{ArtifactAssembler, InMemoryObjectStore, ObjectStore, UrlSigner};
use bookpress::clock::{Clock, ManualClock};
use bookpress::compile::{
    CompilationController, CompilationJob, CompileOutcome, CompileRequest, CompileSettings,
    InMemoryJobRepository, JobRepository,
};
use bookpress::cover::CoverComposer;
use bookpress::fulfillment::{
    FulfillmentBridge, FulfillmentSettings, InMemoryOrderRepository, OrderRepository,
};
use bookpress::geometry::BookSize;
use bookpress::page::Page;
use bookpress::render::{
    BookManifest, InMemoryPageSource, PageRasterizer, PageSource, RasterSettings,
    RenderTokenIssuer, RenderView, Snapshotter,
};

use super::fakes::{ControlledPageSource, FakeProvider, FakeSnapshotter};

pub const TEST_DPI: f64 = 24.0;
pub const FAMILY: &str = "fam-okafor";

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 14, 10, 5, 0).unwrap()
}

pub fn raster_settings() -> RasterSettings {
    RasterSettings {
        render_base_url: "http://render.test".to_string(),
        token_ttl: ChronoDuration::minutes(5),
        snapshot_timeout: Duration::from_secs(5),
        output_dpi: TEST_DPI,
    }
}

pub struct TestHarness {
    pub clock: Arc<ManualClock>,
    pub pages: Arc<InMemoryPageSource>,
    /// What the controller loads pages through.
    pub page_source: Arc<ControlledPageSource>,
    pub snapshotter: Arc<FakeSnapshotter>,
    pub store: Arc<InMemoryObjectStore>,
    pub jobs: Arc<dyn JobRepository>,
    pub orders: Arc<dyn OrderRepository>,
    pub provider: Arc<FakeProvider>,
    pub rasterizer: Arc<PageRasterizer>,
    pub assembler: Arc<ArtifactAssembler>,
    pub controller: CompilationController,
    pub bridge: FulfillmentBridge,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_settings(CompileSettings::default())
    }

    pub fn with_settings(settings: CompileSettings) -> Self {
        Self::build(
            Arc::new(InMemoryJobRepository::new()),
            Arc::new(InMemoryOrderRepository::new()),
            settings,
            FulfillmentSettings::default(),
        )
    }

    pub fn with_raster_settings(raster: RasterSettings) -> Self {
        Self::build_with(
            Arc::new(InMemoryJobRepository::new()),
            Arc::new(InMemoryOrderRepository::new()),
            CompileSettings::default(),
            FulfillmentSettings::default(),
            raster,
        )
    }

    pub fn build(
        jobs: Arc<dyn JobRepository>,
        orders: Arc<dyn OrderRepository>,
        settings: CompileSettings,
        fulfillment: FulfillmentSettings,
    ) -> Self {
        Self::build_with(jobs, orders, settings, fulfillment, raster_settings())
    }

    pub fn build_with(
        jobs: Arc<dyn JobRepository>,
        orders: Arc<dyn OrderRepository>,
        settings: CompileSettings,
        fulfillment: FulfillmentSettings,
        raster: RasterSettings,
    ) -> Self {
        let clock = Arc::new(ManualClock::new(start_time()));
        let dyn_clock: Arc<dyn Clock> = clock.clone();
        let pages = Arc::new(InMemoryPageSource::new());
        let issuer = Arc::new(RenderTokenIssuer::new(&[42u8; 32]).unwrap());

        let dyn_pages: Arc<dyn PageSource> = pages.clone();
        let view = RenderView::new(issuer.clone(), dyn_pages);
        let page_source = Arc::new(ControlledPageSource::new(pages.clone()));
        let snapshotter = Arc::new(FakeSnapshotter::new(view, issuer.clone(), dyn_clock.clone()));
        let dyn_snapshotter: Arc<dyn Snapshotter> = snapshotter.clone();

        let store = Arc::new(InMemoryObjectStore::new(UrlSigner::new(
            "https://files.test",
            SecretString::from("url-signing-secret".to_string()),
        )
        .unwrap()));
        let dyn_store: Arc<dyn ObjectStore> = store.clone();
        let assembler = Arc::new(ArtifactAssembler::new(dyn_store));

        let rasterizer = Arc::new(PageRasterizer::new(
            issuer,
            dyn_snapshotter,
            dyn_clock.clone(),
            raster,
        ));

        let controller = CompilationController::new(
            jobs.clone(),
            page_source.clone(),
            rasterizer.clone(),
            assembler.clone(),
            dyn_clock.clone(),
            settings,
        );

        let provider = Arc::new(FakeProvider::new());
        let composer = Arc::new(CoverComposer::new(rasterizer.clone(), TEST_DPI));
        let bridge = FulfillmentBridge::new(
            jobs.clone(),
            orders.clone(),
            provider.clone(),
            composer,
            assembler.clone(),
            dyn_clock,
            fulfillment,
        );

        Self {
            clock,
            pages,
            page_source,
            snapshotter,
            store,
            jobs,
            orders,
            provider,
            rasterizer,
            assembler,
            controller,
            bridge,
        }
    }

    pub async fn add_pages(&self, pages: Vec<Page>) {
        for page in pages {
            self.pages.insert(FAMILY, page).await;
        }
    }

    pub async fn add_manifest(&self, manifest: &BookManifest) {
        for page in &manifest.pages {
            self.pages.insert(&manifest.family_id, page.clone()).await;
        }
    }

    pub fn request(&self, book_size: BookSize, page_ids: Vec<String>) -> CompileRequest {
        self.request_for(FAMILY, book_size, page_ids)
    }

    pub fn request_for(
        &self,
        family_id: &str,
        book_size: BookSize,
        page_ids: Vec<String>,
    ) -> CompileRequest {
        CompileRequest {
            family_id: family_id.to_string(),
            book_size,
            page_ids,
            requested_by: Some("ada".to_string()),
            acknowledged_by: None,
        }
    }

    /// Compiles, waits for the job to settle and returns it.
    pub async fn compile_and_wait(
        &self,
        request: CompileRequest,
    ) -> (CompileOutcome, CompilationJob) {
        let outcome = self
            .controller
            .compile(request)
            .await
            .expect("compile should be accepted");
        let job = tokio::time::timeout(
            Duration::from_secs(30),
            self.controller.wait_for_job(outcome.job_id()),
        )
        .await
        .expect("job did not settle in time")
        .expect("job disappeared");
        (outcome, job)
    }

    /// Runs a small clean book to completion.
    pub async fn complete_book(&self, book_size: BookSize, pages: usize) -> CompilationJob {
        self.add_pages(super::builders::clean_pages(pages)).await;
        let (_, job) = self
            .compile_and_wait(self.request(book_size, super::builders::page_ids(pages)))
            .await;
        assert_eq!(job.status, bookpress::compile::JobStatus::Complete, "{:?}", job.error);
        job
    }
}
