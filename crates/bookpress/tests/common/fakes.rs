//! In-process stand-ins for the snapshot service and the print provider.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use image::{ImageFormat, Rgb, RgbImage};

use bookpress::clock::Clock;
use bookpress::cover::{render_cover, CoverViewParams};
use bookpress::fulfillment::{
    CostBreakdown, PrintProvider, PrintSubmission, ProviderError, ProviderReceipt, QuoteRequest,
};
use bookpress::page::Page;
use bookpress::render::{
    InMemoryPageSource, PageSource, PageViewParams, RenderTokenIssuer, RenderView, SnapshotError,
    SnapshotRequest, Snapshotter, SourceError, ViewError,
};
use tokio::sync::Semaphore;

/// Encodes a solid PNG of the given size.
pub fn png(width: u32, height: u32) -> Vec<u8> {
    let image = RgbImage::from_pixel(width, height, Rgb([250, 248, 240]));
    let mut bytes = Cursor::new(Vec::new());
    image
        .write_to(&mut bytes, ImageFormat::Png)
        .expect("Failed to encode PNG");
    bytes.into_inner()
}

/// Answers capture requests by running the real render views, the way the
/// headless browser would reach them over HTTP.
pub struct FakeSnapshotter {
    view: RenderView,
    issuer: Arc<RenderTokenIssuer>,
    clock: Arc<dyn Clock>,
    delays: Mutex<HashMap<String, Duration>>,
    failures: Mutex<HashSet<String>>,
    wrong_size: Mutex<HashSet<String>>,
    captured: Mutex<Vec<String>>,
    calls: AtomicUsize,
}

impl FakeSnapshotter {
    pub fn new(view: RenderView, issuer: Arc<RenderTokenIssuer>, clock: Arc<dyn Clock>) -> Self {
        Self {
            view,
            issuer,
            clock,
            delays: Mutex::new(HashMap::new()),
            failures: Mutex::new(HashSet::new()),
            wrong_size: Mutex::new(HashSet::new()),
            captured: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Holds the capture of `page_id` for `delay` before answering.
    pub fn delay_page(&self, page_id: &str, delay: Duration) {
        self.delays
            .lock()
            .unwrap()
            .insert(page_id.to_string(), delay);
    }

    pub fn fail_page(&self, page_id: &str) {
        self.failures.lock().unwrap().insert(page_id.to_string());
    }

    /// Makes the capture of `page_id` come back one pixel too narrow.
    pub fn shrink_page(&self, page_id: &str) {
        self.wrong_size.lock().unwrap().insert(page_id.to_string());
    }

    /// Subjects in completion order; covers are recorded as `cover`.
    pub fn captured(&self) -> Vec<String> {
        self.captured.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn capture_page(
        &self,
        params: PageViewParams,
        request: &SnapshotRequest,
    ) -> Result<Vec<u8>, SnapshotError> {
        let delay = self.delays.lock().unwrap().get(&params.page_id).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failures.lock().unwrap().contains(&params.page_id) {
            return Err(SnapshotError::Service(format!(
                "browser crashed on {}",
                params.page_id
            )));
        }

        self.view
            .render_page(&params, self.clock.now())
            .await
            .map_err(view_status)?;

        self.captured.lock().unwrap().push(params.page_id.clone());
        let width = if self.wrong_size.lock().unwrap().contains(&params.page_id) {
            request.viewport.width - 1
        } else {
            request.viewport.width
        };
        Ok(png(width, request.viewport.height))
    }
}

fn view_status(e: ViewError) -> SnapshotError {
    match e.status_code() {
        401 => SnapshotError::Unauthorized,
        404 => SnapshotError::NotFound,
        _ => SnapshotError::Service(e.to_string()),
    }
}

#[async_trait]
impl Snapshotter for FakeSnapshotter {
    async fn capture(&self, request: &SnapshotRequest) -> Result<Vec<u8>, SnapshotError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Ok(params) = PageViewParams::from_url(&request.url) {
            return self.capture_page(params, request).await;
        }

        let cover = CoverViewParams::from_url(&request.url)
            .map_err(|e| SnapshotError::Service(format!("unroutable URL: {}", e)))?;
        let rendered =
            render_cover(&self.issuer, &cover, self.clock.now()).map_err(view_status)?;
        if (rendered.width_px, rendered.height_px)
            != (request.viewport.width, request.viewport.height)
        {
            return Err(SnapshotError::Service(format!(
                "cover view is {}x{}, viewport {}x{}",
                rendered.width_px,
                rendered.height_px,
                request.viewport.width,
                request.viewport.height
            )));
        }
        self.captured.lock().unwrap().push("cover".to_string());
        Ok(png(request.viewport.width, request.viewport.height))
    }
}

/// Page source the controller reads through. It can drop loads or hold a
/// family's loads until released.
pub struct ControlledPageSource {
    inner: Arc<InMemoryPageSource>,
    failures_left: AtomicUsize,
    gates: Mutex<HashMap<String, Arc<Semaphore>>>,
    waiting: AtomicUsize,
}

impl ControlledPageSource {
    pub fn new(inner: Arc<InMemoryPageSource>) -> Self {
        Self {
            inner,
            failures_left: AtomicUsize::new(0),
            gates: Mutex::new(HashMap::new()),
            waiting: AtomicUsize::new(0),
        }
    }

    /// Fails the next `count` loads with `Unavailable`.
    pub fn fail_next_loads(&self, count: usize) {
        self.failures_left.store(count, Ordering::SeqCst);
    }

    /// Parks loads for `family_id` until `release` is called.
    pub fn hold_family(&self, family_id: &str) {
        self.gates
            .lock()
            .unwrap()
            .insert(family_id.to_string(), Arc::new(Semaphore::new(0)));
    }

    pub fn release(&self, family_id: &str) {
        if let Some(gate) = self.gates.lock().unwrap().remove(family_id) {
            gate.close();
        }
    }

    /// Loads currently parked on a held family.
    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PageSource for ControlledPageSource {
    async fn load_page(&self, family_id: &str, page_id: &str) -> Result<Option<Page>, SourceError> {
        let failed = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(SourceError::Unavailable("blip".to_string()));
        }

        let gate = self.gates.lock().unwrap().get(family_id).cloned();
        if let Some(gate) = gate {
            self.waiting.fetch_add(1, Ordering::SeqCst);
            // Never granted; the wait ends when the gate is closed.
            let _ = gate.acquire().await;
            self.waiting.fetch_sub(1, Ordering::SeqCst);
        }
        self.inner.load_page(family_id, page_id).await
    }
}

/// How the fake provider answers quotes.
#[derive(Debug, Clone)]
pub enum QuoteBehavior {
    Fixed(CostBreakdown),
    Fail,
    Hang,
}

/// Print provider that records submissions.
pub struct FakeProvider {
    quote: Mutex<QuoteBehavior>,
    reject_submissions: Mutex<bool>,
    statuses: Mutex<HashMap<String, String>>,
    submissions: Mutex<Vec<PrintSubmission>>,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self {
            quote: Mutex::new(QuoteBehavior::Fixed(CostBreakdown {
                printing_cents: 4_200,
                shipping_cents: 899,
                total_cents: 5_099,
                currency: "USD".to_string(),
                is_estimate: false,
            })),
            reject_submissions: Mutex::new(false),
            statuses: Mutex::new(HashMap::new()),
            submissions: Mutex::new(Vec::new()),
        }
    }

    pub fn set_quote(&self, behavior: QuoteBehavior) {
        *self.quote.lock().unwrap() = behavior;
    }

    pub fn reject_submissions(&self) {
        *self.reject_submissions.lock().unwrap() = true;
    }

    pub fn set_status(&self, provider_order_id: &str, status: &str) {
        self.statuses
            .lock()
            .unwrap()
            .insert(provider_order_id.to_string(), status.to_string());
    }

    pub fn submissions(&self) -> Vec<PrintSubmission> {
        self.submissions.lock().unwrap().clone()
    }
}

#[async_trait]
impl PrintProvider for FakeProvider {
    async fn quote(&self, _request: &QuoteRequest) -> Result<CostBreakdown, ProviderError> {
        let behavior = self.quote.lock().unwrap().clone();
        match behavior {
            QuoteBehavior::Fixed(cost) => Ok(cost),
            QuoteBehavior::Fail => Err(ProviderError::Unavailable("maintenance".to_string())),
            QuoteBehavior::Hang => {
                tokio::time::sleep(Duration::from_secs(3_600)).await;
                Err(ProviderError::Timeout)
            }
        }
    }

    async fn submit(&self, submission: &PrintSubmission) -> Result<ProviderReceipt, ProviderError> {
        if *self.reject_submissions.lock().unwrap() {
            return Err(ProviderError::Rejected {
                status: 422,
                message: "address not deliverable".to_string(),
            });
        }
        let mut submissions = self.submissions.lock().unwrap();
        submissions.push(submission.clone());
        let provider_order_id = format!("pj-{}", submissions.len());
        self.statuses
            .lock()
            .unwrap()
            .insert(provider_order_id.clone(), "CREATED".to_string());
        Ok(ProviderReceipt {
            provider_order_id,
            status: "CREATED".to_string(),
        })
    }

    async fn order_status(&self, provider_order_id: &str) -> Result<String, ProviderError> {
        self.statuses
            .lock()
            .unwrap()
            .get(provider_order_id)
            .cloned()
            .ok_or_else(|| ProviderError::Rejected {
                status: 404,
                message: format!("unknown order {}", provider_order_id),
            })
    }
}
