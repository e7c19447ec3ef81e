use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Duration as ChronoDuration;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use log::{error, info, warn};
use serde::Serialize;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::Instrument;
use uuid::Uuid;

use crate::assembler::{ArtifactAssembler, DownloadRef, IndexedPage, ObjectStore};
use crate::clock::Clock;
use crate::db::RepositoryError;
use crate::geometry::{validate_pages, BleedValidationReport, BookSize};
use crate::render::{PageRasterizer, PageSource, RasterizedPage, RenderError, SourceError};

use super::fanout::RenderFanOut;
use super::fingerprint::fingerprint;
use super::job::{CompilationJob, JobStatus, JobUpdate};
use super::repository::JobRepository;

#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    #[error("A book needs at least one page")]
    EmptyRequest,

    #[error("Page '{0}' appears more than once")]
    DuplicatePage(String),

    #[error("Page '{page_id}' not found (job {job_id})")]
    PageNotFound { job_id: String, page_id: String },

    #[error("Job '{0}' not found")]
    JobNotFound(String),

    #[error("Job '{job_id}' is {status}, not complete")]
    NotComplete { job_id: String, status: JobStatus },

    #[error("Job '{0}' is complete but has no stored artifact")]
    MissingArtifact(String),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Source(#[from] SourceError),
}

/// Controller tuning.
#[derive(Debug, Clone)]
pub struct CompileSettings {
    /// Pages rendered at once.
    pub concurrency: usize,
    pub fingerprint_bucket_secs: u64,
    pub download_ttl: ChronoDuration,
    pub per_page_estimate_secs: u64,
    pub merge_estimate_secs: u64,
}

impl Default for CompileSettings {
    fn default() -> Self {
        Self {
            concurrency: 4,
            fingerprint_bucket_secs: 3_600,
            download_ttl: ChronoDuration::hours(24),
            per_page_estimate_secs: 3,
            merge_estimate_secs: 10,
        }
    }
}

impl CompileSettings {
    pub fn estimated_duration_secs(&self, pages: usize) -> u64 {
        let batches = pages.div_ceil(self.concurrency.max(1)) as u64;
        batches * self.per_page_estimate_secs + self.merge_estimate_secs
    }
}

#[derive(Debug, Clone)]
pub struct CompileRequest {
    pub family_id: String,
    pub book_size: BookSize,
    pub page_ids: Vec<String>,
    pub requested_by: Option<String>,
    /// User accepting critical validation issues, if any.
    pub acknowledged_by: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum CompileOutcome {
    #[serde(rename_all = "camelCase")]
    Started {
        job_id: String,
        estimated_duration_secs: u64,
    },
    #[serde(rename_all = "camelCase")]
    CacheHit {
        job: Box<CompilationJob>,
        download: DownloadRef,
    },
    InProgress { job: Box<CompilationJob> },
    #[serde(rename_all = "camelCase")]
    Blocked {
        job_id: String,
        report: BleedValidationReport,
    },
}

impl CompileOutcome {
    pub fn job_id(&self) -> &str {
        match self {
            CompileOutcome::Started { job_id, .. } | CompileOutcome::Blocked { job_id, .. } => {
                job_id
            }
            CompileOutcome::CacheHit { job, .. } | CompileOutcome::InProgress { job } => &job.id,
        }
    }
}

/// What callers polling a job see.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusView {
    pub job_id: String,
    pub status: JobStatus,
    pub label: &'static str,
    pub percent: u8,
    pub pages_rendered: u32,
    pub total_pages: u32,
    pub current_batch: u32,
    pub validation: BleedValidationReport,
    pub blocked_by_validation: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download: Option<DownloadRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_page_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub superseded_by: Option<String>,
}

impl From<CompilationJob> for JobStatusView {
    fn from(job: CompilationJob) -> Self {
        Self {
            status: job.status,
            label: job.status.label(),
            percent: job.progress_percent(),
            pages_rendered: job.pages_rendered,
            total_pages: job.total_pages,
            current_batch: job.current_batch,
            validation: job.validation,
            blocked_by_validation: job.blocked_by_validation,
            download: job.download,
            error: job.error,
            failed_page_id: job.failed_page_id,
            superseded_by: job.superseded_by,
            job_id: job.id,
        }
    }
}

/// Why a running job stopped.
struct JobFailure {
    page_id: Option<String>,
    message: String,
}

impl JobFailure {
    fn page(page_id: &str, message: impl ToString) -> Self {
        Self {
            page_id: Some(page_id.to_string()),
            message: message.to_string(),
        }
    }

    fn job(message: impl ToString) -> Self {
        Self {
            page_id: None,
            message: message.to_string(),
        }
    }
}

/// Owns every write to compilation jobs.
#[derive(Clone)]
pub struct CompilationController {
    repository: Arc<dyn JobRepository>,
    pages: Arc<dyn PageSource>,
    rasterizer: Arc<PageRasterizer>,
    assembler: Arc<ArtifactAssembler>,
    clock: Arc<dyn Clock>,
    settings: CompileSettings,
    // One lock per fingerprint; lookup and creation of its job happen under it.
    admission: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl CompilationController {
    pub fn new(
        repository: Arc<dyn JobRepository>,
        pages: Arc<dyn PageSource>,
        rasterizer: Arc<PageRasterizer>,
        assembler: Arc<ArtifactAssembler>,
        clock: Arc<dyn Clock>,
        settings: CompileSettings,
    ) -> Self {
        Self {
            repository,
            pages,
            rasterizer,
            assembler,
            clock,
            settings,
            admission: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn settings(&self) -> &CompileSettings {
        &self.settings
    }

    pub fn repository(&self) -> &Arc<dyn JobRepository> {
        &self.repository
    }

    fn store(&self) -> &Arc<dyn ObjectStore> {
        self.assembler.store()
    }

    /// Starts, resumes or short-circuits a compilation.
    pub async fn compile(&self, request: CompileRequest) -> Result<CompileOutcome, CompileError> {
        check_page_ids(&request.page_ids)?;

        let span = tracing::info_span!(
            "compile",
            family_id = %request.family_id,
            book_size = %request.book_size,
            pages = request.page_ids.len()
        );
        async {
            let now = self.clock.now();
            let fp = fingerprint(
                &request.family_id,
                &request.page_ids,
                request.book_size,
                now,
                self.settings.fingerprint_bucket_secs,
            );
            let _admission = self.admit(&fp).await;

            if let Some(existing) = self.repository.find_by_fingerprint(&fp).await? {
                match existing.status {
                    JobStatus::Complete => return self.cache_hit(existing).await,
                    JobStatus::Validating if existing.blocked_by_validation => {
                        info!("Re-validating blocked job {}", existing.id);
                        let job_id = existing.id.clone();
                        let started = self
                            .validate_and_start(existing, request.acknowledged_by.as_deref())
                            .await;
                        if let Err(e) = &started {
                            self.fail_unstarted(&job_id, e).await;
                        }
                        return started;
                    }
                    JobStatus::Failed => {
                        info!("Previous attempt {} failed, starting a new one", existing.id);
                    }
                    // Creation finishes under the admission lock, so a pending
                    // job seen here never reached validation.
                    JobStatus::Pending => {
                        warn!("Job {} was left pending, starting a new one", existing.id);
                    }
                    _ => {
                        return Ok(CompileOutcome::InProgress {
                            job: Box::new(existing),
                        })
                    }
                }
            }

            let job = CompilationJob::new(
                Uuid::new_v4().to_string(),
                &request.family_id,
                fp,
                request.book_size,
                request.page_ids.clone(),
                request.requested_by.clone(),
                now,
            );
            self.repository.insert(&job).await?;
            info!(
                "Created compilation job {} for family {} ({} pages)",
                job.id, job.family_id, job.total_pages
            );

            let job_id = job.id.clone();
            let started = self
                .start_new(job, request.acknowledged_by.as_deref())
                .await;
            if let Err(e) = &started {
                self.fail_unstarted(&job_id, e).await;
            }
            started
        }
        .instrument(span)
        .await
    }

    async fn start_new(
        &self,
        job: CompilationJob,
        acknowledged_by: Option<&str>,
    ) -> Result<CompileOutcome, CompileError> {
        let job = self
            .repository
            .update(&job.id, JobUpdate::status(JobStatus::Validating), self.clock.now())
            .await?;
        self.supersede_previous(&job).await?;
        self.validate_and_start(job, acknowledged_by).await
    }

    /// Serializes compiles that share a fingerprint. Idle locks are pruned.
    async fn admit(&self, fp: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.admission.lock().await;
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks.entry(fp.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Records why a job never reached rendering.
    async fn fail_unstarted(&self, job_id: &str, cause: &CompileError) {
        let failed_page_id = match cause {
            CompileError::PageNotFound { page_id, .. } => Some(page_id.clone()),
            _ => None,
        };
        error!("Compilation job {} failed before rendering: {}", job_id, cause);
        let update = JobUpdate {
            status: Some(JobStatus::Failed),
            error: Some(cause.to_string()),
            failed_page_id,
            blocked_by_validation: Some(false),
            ..Default::default()
        };
        if let Err(e) = self.repository.update(job_id, update, self.clock.now()).await {
            error!("Could not record failure of job {}: {}", job_id, e);
        }
    }

    /// Mints a new download reference for a complete job.
    pub async fn refresh_download(
        &self,
        family_id: &str,
        job_id: &str,
    ) -> Result<DownloadRef, CompileError> {
        let job = self
            .repository
            .get(job_id)
            .await?
            .filter(|job| job.family_id == family_id)
            .ok_or_else(|| CompileError::JobNotFound(job_id.to_string()))?;
        if job.status != JobStatus::Complete {
            return Err(CompileError::NotComplete {
                job_id: job.id,
                status: job.status,
            });
        }
        let job = self.refresh(job).await?;
        job.download
            .ok_or_else(|| CompileError::MissingArtifact(job_id.to_string()))
    }

    pub async fn job_status(&self, job_id: &str) -> Result<JobStatusView, CompileError> {
        self.repository
            .get(job_id)
            .await?
            .map(JobStatusView::from)
            .ok_or_else(|| CompileError::JobNotFound(job_id.to_string()))
    }

    pub async fn list_jobs(&self, family_id: &str) -> Result<Vec<CompilationJob>, CompileError> {
        Ok(self.repository.list_for_family(family_id).await?)
    }

    pub async fn watch(
        &self,
        job_id: &str,
    ) -> Result<BoxStream<'static, CompilationJob>, CompileError> {
        Ok(self.repository.watch(job_id).await?)
    }

    /// Follows a job until it is terminal or parked on validation.
    pub async fn wait_for_job(&self, job_id: &str) -> Result<CompilationJob, CompileError> {
        let mut updates = self.watch(job_id).await?;
        let mut last = None;
        while let Some(job) = updates.next().await {
            let settled = job.status.is_terminal() || job.blocked_by_validation;
            last = Some(job);
            if settled {
                break;
            }
        }
        match last {
            Some(job) => Ok(job),
            None => Err(CompileError::JobNotFound(job_id.to_string())),
        }
    }

    async fn cache_hit(&self, job: CompilationJob) -> Result<CompileOutcome, CompileError> {
        let job = if job.has_valid_download(self.clock.now()) {
            info!("Cache hit for job {}", job.id);
            job
        } else {
            info!("Cache hit for job {} with expired download, refreshing", job.id);
            self.refresh(job).await?
        };
        let download = job
            .download
            .clone()
            .ok_or_else(|| CompileError::MissingArtifact(job.id.clone()))?;
        Ok(CompileOutcome::CacheHit {
            job: Box::new(job),
            download,
        })
    }

    async fn refresh(&self, job: CompilationJob) -> Result<CompilationJob, CompileError> {
        let key = job
            .storage_key
            .clone()
            .ok_or_else(|| CompileError::MissingArtifact(job.id.clone()))?;
        let now = self.clock.now();
        let download = self
            .store()
            .signed_url(&key, now + self.settings.download_ttl);
        let update = JobUpdate {
            download: Some(download),
            ..Default::default()
        };
        Ok(self.repository.update(&job.id, update, now).await?)
    }

    async fn supersede_previous(&self, job: &CompilationJob) -> Result<(), CompileError> {
        let previous = self
            .repository
            .list_for_family(&job.family_id)
            .await?
            .into_iter()
            .find(|j| j.id != job.id && j.book_size == job.book_size && j.superseded_by.is_none());
        if let Some(previous) = previous {
            let update = JobUpdate {
                superseded_by: Some(job.id.clone()),
                ..Default::default()
            };
            self.repository
                .update(&previous.id, update, self.clock.now())
                .await?;
            info!("Job {} superseded by {}", previous.id, job.id);
        }
        Ok(())
    }

    /// Gates a validating job on its report and spawns the render when it passes.
    ///
    /// Errors leave the job untouched; callers record them with `fail_unstarted`.
    async fn validate_and_start(
        &self,
        job: CompilationJob,
        acknowledged_by: Option<&str>,
    ) -> Result<CompileOutcome, CompileError> {
        let span = tracing::info_span!("validate", job_id = %job.id);
        let report = async { self.validate(&job).await }.instrument(span).await?;
        let mut report = match report {
            Ok(report) => report,
            Err(page_id) => {
                warn!("Job {} failed validation: page '{}' not found", job.id, page_id);
                return Err(CompileError::PageNotFound {
                    job_id: job.id,
                    page_id,
                });
            }
        };

        if report.should_block {
            match acknowledged_by {
                Some(user) => {
                    info!(
                        "{} acknowledged {} critical issues on job {}",
                        user, report.summary.total_critical, job.id
                    );
                    report.acknowledge(user, self.clock.now());
                }
                None => {
                    info!(
                        "Job {} blocked: {} critical issues on {} pages",
                        job.id,
                        report.summary.total_critical,
                        report.summary.critical_page_ids.len()
                    );
                    let update = JobUpdate {
                        validation: Some(report.clone()),
                        blocked_by_validation: Some(true),
                        ..Default::default()
                    };
                    self.repository.update(&job.id, update, self.clock.now()).await?;
                    return Ok(CompileOutcome::Blocked {
                        job_id: job.id,
                        report,
                    });
                }
            }
        }

        let update = JobUpdate {
            status: Some(JobStatus::Rendering),
            validation: Some(report),
            blocked_by_validation: Some(false),
            ..Default::default()
        };
        let job = self
            .repository
            .update(&job.id, update, self.clock.now())
            .await?;

        let estimated_duration_secs = self.settings.estimated_duration_secs(job.page_ids.len());
        let job_id = job.id.clone();
        let span = tracing::info_span!("run_job", job_id = %job.id);
        tokio::spawn(self.clone().run_job(job).instrument(span));

        Ok(CompileOutcome::Started {
            job_id,
            estimated_duration_secs,
        })
    }

    /// Loads every page and checks it. `Err` carries the first missing page id.
    async fn validate(
        &self,
        job: &CompilationJob,
    ) -> Result<Result<BleedValidationReport, String>, CompileError> {
        let mut pages = Vec::with_capacity(job.page_ids.len());
        for page_id in &job.page_ids {
            match self.pages.load_page(&job.family_id, page_id).await? {
                Some(page) => pages.push(page),
                None => return Ok(Err(page_id.clone())),
            }
        }
        Ok(Ok(validate_pages(&pages, job.book_size)))
    }

    async fn run_job(self, job: CompilationJob) {
        let job_id = job.id.clone();
        let Err(failure) = self.render_and_assemble(job).await else {
            return;
        };

        error!("Compilation job {} failed: {}", job_id, failure.message);
        let update = JobUpdate {
            status: Some(JobStatus::Failed),
            error: Some(failure.message),
            failed_page_id: failure.page_id,
            ..Default::default()
        };
        if let Err(e) = self.repository.update(&job_id, update, self.clock.now()).await {
            error!("Could not record failure of job {}: {}", job_id, e);
        }
    }

    async fn render_and_assemble(&self, job: CompilationJob) -> Result<(), JobFailure> {
        let concurrency = self.settings.concurrency.max(1);
        let scale = self.rasterizer.settings().scale();
        let mut fanout: RenderFanOut<Result<RasterizedPage, RenderError>> =
            RenderFanOut::new(concurrency);
        for (index, page_id) in job.page_ids.iter().enumerate() {
            let rasterizer = self.rasterizer.clone();
            let family_id = job.family_id.clone();
            let page_id = page_id.clone();
            let book_size = job.book_size;
            fanout.push(index, async move {
                rasterizer
                    .rasterize_page(&family_id, &page_id, book_size, scale, None)
                    .await
            });
        }

        let mut rendered = Vec::with_capacity(job.page_ids.len());
        while let Some((index, result)) = fanout.next_completed().await {
            let page_id = &job.page_ids[index];
            let page = match result {
                Ok(Ok(page)) => page,
                Ok(Err(e)) => {
                    fanout.cancel();
                    return Err(JobFailure::page(page_id, e));
                }
                Err(panicked) => {
                    fanout.cancel();
                    return Err(JobFailure::page(page_id, panicked));
                }
            };
            rendered.push(IndexedPage { index, page });

            let done = rendered.len() as u32;
            let update = JobUpdate {
                pages_rendered: Some(done),
                current_batch: Some(done / concurrency as u32),
                ..Default::default()
            };
            if let Err(e) = self.repository.update(&job.id, update, self.clock.now()).await {
                fanout.cancel();
                return Err(JobFailure::job(e));
            }
        }

        self.repository
            .update(&job.id, JobUpdate::status(JobStatus::Merging), self.clock.now())
            .await
            .map_err(JobFailure::job)?;

        let artifact = self
            .assembler
            .assemble(&job.family_id, &job.id, &job.page_ids, rendered)
            .await
            .map_err(JobFailure::job)?;

        let now = self.clock.now();
        let download = self
            .store()
            .signed_url(&artifact.storage_key, now + self.settings.download_ttl);
        let update = JobUpdate {
            status: Some(JobStatus::Complete),
            storage_key: Some(artifact.storage_key),
            download: Some(download),
            byte_size: Some(artifact.byte_size),
            page_count: Some(artifact.page_count),
            artifact_sha256: Some(artifact.sha256),
            ..Default::default()
        };
        self.repository
            .update(&job.id, update, now)
            .await
            .map_err(JobFailure::job)?;
        info!(
            "Compilation job {} complete ({} pages, {} bytes)",
            job.id, artifact.page_count, artifact.byte_size
        );
        Ok(())
    }
}

/// Rejects empty requests and repeated page ids.
pub fn check_page_ids(page_ids: &[String]) -> Result<(), CompileError> {
    if page_ids.is_empty() {
        return Err(CompileError::EmptyRequest);
    }
    let mut seen = HashSet::with_capacity(page_ids.len());
    for id in page_ids {
        if !seen.insert(id.as_str()) {
            return Err(CompileError::DuplicatePage(id.clone()));
        }
    }
    Ok(())
}
