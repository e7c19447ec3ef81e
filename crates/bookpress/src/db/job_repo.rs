//! Job repository: CRUD operations for the `compilation_jobs` table.

use rusqlite::{params, Connection, Row};

use super::{
    corrupt, format_timestamp, parse_json, parse_timestamp, Database, DatabaseError,
    RepositoryError,
};
use crate::assembler::DownloadRef;
use crate::compile::{CompilationJob, JobStatus};
use crate::geometry::BookSize;

/// A raw job row from the database.
#[derive(Debug, Clone)]
struct JobRow {
    id: String,
    family_id: String,
    fingerprint: String,
    book_size: String,
    bleed_inches: f64,
    page_ids: String,
    status: String,
    pages_rendered: u32,
    total_pages: u32,
    current_batch: u32,
    validation: String,
    blocked_by_validation: bool,
    storage_key: Option<String>,
    download_url: Option<String>,
    download_expires_at: Option<String>,
    byte_size: Option<i64>,
    page_count: Option<u32>,
    artifact_sha256: Option<String>,
    error: Option<String>,
    failed_page_id: Option<String>,
    superseded_by: Option<String>,
    requested_by: Option<String>,
    transitions: String,
    created_at: String,
    updated_at: String,
    completed_at: Option<String>,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            family_id: row.get("family_id")?,
            fingerprint: row.get("fingerprint")?,
            book_size: row.get("book_size")?,
            bleed_inches: row.get("bleed_inches")?,
            page_ids: row.get("page_ids")?,
            status: row.get("status")?,
            pages_rendered: row.get("pages_rendered")?,
            total_pages: row.get("total_pages")?,
            current_batch: row.get("current_batch")?,
            validation: row.get("validation")?,
            blocked_by_validation: row.get("blocked_by_validation")?,
            storage_key: row.get("storage_key")?,
            download_url: row.get("download_url")?,
            download_expires_at: row.get("download_expires_at")?,
            byte_size: row.get("byte_size")?,
            page_count: row.get("page_count")?,
            artifact_sha256: row.get("artifact_sha256")?,
            error: row.get("error")?,
            failed_page_id: row.get("failed_page_id")?,
            superseded_by: row.get("superseded_by")?,
            requested_by: row.get("requested_by")?,
            transitions: row.get("transitions")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
            completed_at: row.get("completed_at")?,
        })
    }

    fn from_job(job: &CompilationJob) -> Result<Self, serde_json::Error> {
        Ok(Self {
            id: job.id.clone(),
            family_id: job.family_id.clone(),
            fingerprint: job.fingerprint.clone(),
            book_size: job.book_size.as_str().to_string(),
            bleed_inches: job.bleed_inches,
            page_ids: serde_json::to_string(&job.page_ids)?,
            status: job.status.as_str().to_string(),
            pages_rendered: job.pages_rendered,
            total_pages: job.total_pages,
            current_batch: job.current_batch,
            validation: serde_json::to_string(&job.validation)?,
            blocked_by_validation: job.blocked_by_validation,
            storage_key: job.storage_key.clone(),
            download_url: job.download.as_ref().map(|d| d.url.clone()),
            download_expires_at: job.download.as_ref().map(|d| format_timestamp(&d.expires_at)),
            byte_size: job.byte_size.map(|b| b as i64),
            page_count: job.page_count,
            artifact_sha256: job.artifact_sha256.clone(),
            error: job.error.clone(),
            failed_page_id: job.failed_page_id.clone(),
            superseded_by: job.superseded_by.clone(),
            requested_by: job.requested_by.clone(),
            transitions: serde_json::to_string(&job.transitions)?,
            created_at: format_timestamp(&job.created_at),
            updated_at: format_timestamp(&job.updated_at),
            completed_at: job.completed_at.as_ref().map(format_timestamp),
        })
    }

    fn into_job(self) -> Result<CompilationJob, DatabaseError> {
        let id = self.id;
        let book_size = BookSize::parse(&self.book_size)
            .ok_or_else(|| corrupt(&id, "book_size", &self.book_size))?;
        let status =
            JobStatus::parse(&self.status).ok_or_else(|| corrupt(&id, "status", &self.status))?;
        let download = match (self.download_url, self.download_expires_at) {
            (Some(url), Some(expires_at)) => Some(DownloadRef {
                url,
                expires_at: parse_timestamp(&id, "download_expires_at", &expires_at)?,
            }),
            _ => None,
        };
        let completed_at = self
            .completed_at
            .map(|c| parse_timestamp(&id, "completed_at", &c))
            .transpose()?;

        Ok(CompilationJob {
            family_id: self.family_id,
            fingerprint: self.fingerprint,
            book_size,
            bleed_inches: self.bleed_inches,
            page_ids: parse_json(&id, "page_ids", &self.page_ids)?,
            status,
            pages_rendered: self.pages_rendered,
            total_pages: self.total_pages,
            current_batch: self.current_batch,
            validation: parse_json(&id, "validation", &self.validation)?,
            blocked_by_validation: self.blocked_by_validation,
            storage_key: self.storage_key,
            download,
            byte_size: self.byte_size.map(|b| b.max(0) as u64),
            page_count: self.page_count,
            artifact_sha256: self.artifact_sha256,
            error: self.error,
            failed_page_id: self.failed_page_id,
            superseded_by: self.superseded_by,
            requested_by: self.requested_by,
            transitions: parse_json(&id, "transitions", &self.transitions)?,
            created_at: parse_timestamp(&id, "created_at", &self.created_at)?,
            updated_at: parse_timestamp(&id, "updated_at", &self.updated_at)?,
            completed_at,
            id,
        })
    }
}

/// Inserts a new job row.
pub fn insert(db: &Database, job: &CompilationJob) -> Result<(), RepositoryError> {
    let row = JobRow::from_job(job)?;
    let inserted = db.with_conn(|conn| {
        let exists: u32 = conn.query_row(
            "SELECT COUNT(*) FROM compilation_jobs WHERE id = ?1",
            params![row.id],
            |r| r.get(0),
        )?;
        if exists > 0 {
            return Ok(false);
        }
        conn.execute(
            "INSERT INTO compilation_jobs (id, family_id, fingerprint, book_size, bleed_inches,
             page_ids, status, pages_rendered, total_pages, current_batch, validation,
             blocked_by_validation, storage_key, download_url, download_expires_at, byte_size,
             page_count, artifact_sha256, error, failed_page_id, superseded_by, requested_by,
             transitions, created_at, updated_at, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
             ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26)",
            params![
                row.id,
                row.family_id,
                row.fingerprint,
                row.book_size,
                row.bleed_inches,
                row.page_ids,
                row.status,
                row.pages_rendered,
                row.total_pages,
                row.current_batch,
                row.validation,
                row.blocked_by_validation,
                row.storage_key,
                row.download_url,
                row.download_expires_at,
                row.byte_size,
                row.page_count,
                row.artifact_sha256,
                row.error,
                row.failed_page_id,
                row.superseded_by,
                row.requested_by,
                row.transitions,
                row.created_at,
                row.updated_at,
                row.completed_at,
            ],
        )?;
        Ok(true)
    })?;

    if inserted {
        Ok(())
    } else {
        Err(RepositoryError::Duplicate {
            kind: "Job",
            id: job.id.clone(),
        })
    }
}

/// Overwrites every mutable column of an existing job.
pub fn update(db: &Database, job: &CompilationJob) -> Result<(), RepositoryError> {
    let row = JobRow::from_job(job)?;
    let changed = db.with_conn(|conn| {
        Ok(conn.execute(
            "UPDATE compilation_jobs SET status=?2, pages_rendered=?3, current_batch=?4,
             validation=?5, blocked_by_validation=?6, storage_key=?7, download_url=?8,
             download_expires_at=?9, byte_size=?10, page_count=?11, artifact_sha256=?12,
             error=?13, failed_page_id=?14, superseded_by=?15, transitions=?16,
             updated_at=?17, completed_at=?18
             WHERE id=?1",
            params![
                row.id,
                row.status,
                row.pages_rendered,
                row.current_batch,
                row.validation,
                row.blocked_by_validation,
                row.storage_key,
                row.download_url,
                row.download_expires_at,
                row.byte_size,
                row.page_count,
                row.artifact_sha256,
                row.error,
                row.failed_page_id,
                row.superseded_by,
                row.transitions,
                row.updated_at,
                row.completed_at,
            ],
        )?)
    })?;

    if changed == 0 {
        return Err(RepositoryError::job_not_found(&job.id));
    }
    Ok(())
}

/// Finds a job by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<CompilationJob>, RepositoryError> {
    let rows = db.with_conn(|conn| {
        query_rows(conn, "SELECT * FROM compilation_jobs WHERE id = ?1", id)
    })?;
    first_job(rows)
}

/// The most recently created job with `fingerprint`.
pub fn find_latest_by_fingerprint(
    db: &Database,
    fingerprint: &str,
) -> Result<Option<CompilationJob>, RepositoryError> {
    let rows = db.with_conn(|conn| {
        query_rows(
            conn,
            "SELECT * FROM compilation_jobs WHERE fingerprint = ?1
             ORDER BY created_at DESC, rowid DESC LIMIT 1",
            fingerprint,
        )
    })?;
    first_job(rows)
}

/// All jobs of a family, newest first.
pub fn list_by_family(
    db: &Database,
    family_id: &str,
) -> Result<Vec<CompilationJob>, RepositoryError> {
    let rows = db.with_conn(|conn| {
        query_rows(
            conn,
            "SELECT * FROM compilation_jobs WHERE family_id = ?1
             ORDER BY created_at DESC, rowid DESC",
            family_id,
        )
    })?;
    rows.into_iter()
        .map(|row| row.into_job().map_err(RepositoryError::from))
        .collect()
}

fn query_rows(conn: &Connection, sql: &str, key: &str) -> Result<Vec<JobRow>, DatabaseError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params![key], JobRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn first_job(rows: Vec<JobRow>) -> Result<Option<CompilationJob>, RepositoryError> {
    match rows.into_iter().next() {
        Some(row) => Ok(Some(row.into_job()?)),
        None => Ok(None),
    }
}
