//! Compilation job record and its state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::assembler::DownloadRef;
use crate::geometry::{BleedValidationReport, BookSize, BLEED_INCHES};

/// Lifecycle of a compilation job.
///
/// `pending -> validating -> rendering -> merging -> complete`, with
/// `failed` reachable from validating, rendering and merging. Complete and
/// failed are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Validating,
    Rendering,
    Merging,
    Complete,
    Failed,
}

impl JobStatus {
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Validating)
                | (Validating, Rendering)
                | (Rendering, Merging)
                | (Merging, Complete)
                | (Validating | Rendering | Merging, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Complete | JobStatus::Failed)
    }

    /// True while the controller is actively working on the job.
    pub fn is_in_flight(self) -> bool {
        matches!(
            self,
            JobStatus::Pending | JobStatus::Validating | JobStatus::Rendering | JobStatus::Merging
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Validating => "validating",
            JobStatus::Rendering => "rendering",
            JobStatus::Merging => "merging",
            JobStatus::Complete => "complete",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        [
            JobStatus::Pending,
            JobStatus::Validating,
            JobStatus::Rendering,
            JobStatus::Merging,
            JobStatus::Complete,
            JobStatus::Failed,
        ]
        .into_iter()
        .find(|status| status.as_str() == s)
    }

    /// Human label shown to users.
    pub fn label(self) -> &'static str {
        match self {
            JobStatus::Pending => "Queued",
            JobStatus::Validating => "Checking pages for print safety",
            JobStatus::Rendering => "Rendering pages",
            JobStatus::Merging => "Assembling your book",
            JobStatus::Complete => "Ready to download",
            JobStatus::Failed => "Compilation failed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Overall progress as a percentage.
///
/// Rendering scales from 0 to 90 with pages rendered; merging is 95 and
/// complete is 100. A failed job keeps the percentage it reached.
pub fn progress_percent(status: JobStatus, pages_rendered: u32, total_pages: u32) -> u8 {
    let rendering = || {
        if total_pages == 0 {
            0
        } else {
            let done = pages_rendered.min(total_pages) as u64;
            (90 * done / total_pages as u64) as u8
        }
    };
    match status {
        JobStatus::Pending | JobStatus::Validating => 0,
        JobStatus::Rendering | JobStatus::Failed => rendering(),
        JobStatus::Merging => 95,
        JobStatus::Complete => 100,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transition {
    pub status: JobStatus,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompilationJob {
    pub id: String,
    pub family_id: String,
    pub fingerprint: String,
    pub book_size: BookSize,
    pub bleed_inches: f64,
    pub page_ids: Vec<String>,
    pub status: JobStatus,
    pub pages_rendered: u32,
    pub total_pages: u32,
    pub current_batch: u32,
    pub validation: BleedValidationReport,
    #[serde(default)]
    pub blocked_by_validation: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download: Option<DownloadRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub byte_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_sha256: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_page_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub superseded_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_by: Option<String>,
    #[serde(default)]
    pub transitions: Vec<Transition>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl CompilationJob {
    /// A fresh `pending` job.
    pub fn new(
        id: String,
        family_id: &str,
        fingerprint: String,
        book_size: BookSize,
        page_ids: Vec<String>,
        requested_by: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        let total_pages = page_ids.len() as u32;
        Self {
            id,
            family_id: family_id.to_string(),
            fingerprint,
            book_size,
            bleed_inches: BLEED_INCHES,
            page_ids,
            status: JobStatus::Pending,
            pages_rendered: 0,
            total_pages,
            current_batch: 0,
            validation: BleedValidationReport::from_pages(book_size, Vec::new()),
            blocked_by_validation: false,
            storage_key: None,
            download: None,
            byte_size: None,
            page_count: None,
            artifact_sha256: None,
            error: None,
            failed_page_id: None,
            superseded_by: None,
            requested_by,
            transitions: vec![Transition {
                status: JobStatus::Pending,
                at: now,
            }],
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn progress_percent(&self) -> u8 {
        progress_percent(self.status, self.pages_rendered, self.total_pages)
    }

    /// Complete with a download reference still valid at `now`.
    pub fn has_valid_download(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Complete
            && self.download.as_ref().is_some_and(|d| d.is_valid_at(now))
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("Job {job_id} cannot move from {from} to {to}")]
pub struct InvalidTransition {
    pub job_id: String,
    pub from: JobStatus,
    pub to: JobStatus,
}

/// Partial update applied by the controller. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub pages_rendered: Option<u32>,
    pub current_batch: Option<u32>,
    pub validation: Option<BleedValidationReport>,
    pub blocked_by_validation: Option<bool>,
    pub storage_key: Option<String>,
    pub download: Option<DownloadRef>,
    pub byte_size: Option<u64>,
    pub page_count: Option<u32>,
    pub artifact_sha256: Option<String>,
    pub error: Option<String>,
    pub failed_page_id: Option<String>,
    pub superseded_by: Option<String>,
}

impl JobUpdate {
    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    /// Applies the update. A status change must be a legal transition;
    /// re-asserting the current status is allowed and records nothing.
    pub fn apply(self, job: &mut CompilationJob, now: DateTime<Utc>) -> Result<(), InvalidTransition> {
        if let Some(next) = self.status {
            if next != job.status {
                if !job.status.can_transition_to(next) {
                    return Err(InvalidTransition {
                        job_id: job.id.clone(),
                        from: job.status,
                        to: next,
                    });
                }
                job.status = next;
                job.transitions.push(Transition {
                    status: next,
                    at: now,
                });
                if next.is_terminal() {
                    job.completed_at = Some(now);
                }
            }
        }

        if let Some(n) = self.pages_rendered {
            job.pages_rendered = job.pages_rendered.max(n.min(job.total_pages));
        }
        if let Some(batch) = self.current_batch {
            job.current_batch = batch;
        }
        if let Some(report) = self.validation {
            job.validation = report;
        }
        if let Some(blocked) = self.blocked_by_validation {
            job.blocked_by_validation = blocked;
        }
        if self.storage_key.is_some() {
            job.storage_key = self.storage_key;
        }
        if self.download.is_some() {
            job.download = self.download;
        }
        if self.byte_size.is_some() {
            job.byte_size = self.byte_size;
        }
        if self.page_count.is_some() {
            job.page_count = self.page_count;
        }
        if self.artifact_sha256.is_some() {
            job.artifact_sha256 = self.artifact_sha256;
        }
        if self.error.is_some() {
            job.error = self.error;
        }
        if self.failed_page_id.is_some() {
            job.failed_page_id = self.failed_page_id;
        }
        if self.superseded_by.is_some() {
            job.superseded_by = self.superseded_by;
        }
        job.updated_at = now;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [JobStatus; 6] = [
        JobStatus::Pending,
        JobStatus::Validating,
        JobStatus::Rendering,
        JobStatus::Merging,
        JobStatus::Complete,
        JobStatus::Failed,
    ];

    fn job() -> CompilationJob {
        CompilationJob::new(
            "job-1".to_string(),
            "fam",
            "fp".to_string(),
            BookSize::SmallSquare,
            vec!["a".to_string(), "b".to_string(), "c".to_string(), "d".to_string()],
            None,
            Utc::now(),
        )
    }

    #[test]
    fn test_failed_only_from_working_states() {
        for from in ALL {
            let allowed = from.can_transition_to(JobStatus::Failed);
            let expected = matches!(
                from,
                JobStatus::Validating | JobStatus::Rendering | JobStatus::Merging
            );
            assert_eq!(allowed, expected, "{} -> failed", from);
        }
    }

    #[test]
    fn test_terminal_states_have_no_exits() {
        for from in [JobStatus::Complete, JobStatus::Failed] {
            assert!(ALL.iter().all(|to| !from.can_transition_to(*to)));
        }
    }

    #[test]
    fn test_percent_is_monotone_along_happy_path() {
        let mut last = 0;
        let mut steps = vec![(JobStatus::Pending, 0), (JobStatus::Validating, 0)];
        steps.extend((0..=7).map(|n| (JobStatus::Rendering, n)));
        steps.push((JobStatus::Merging, 7));
        steps.push((JobStatus::Complete, 7));

        for (status, rendered) in steps {
            let pct = progress_percent(status, rendered, 7);
            assert!(pct >= last, "{} at {} dropped to {}", status, rendered, pct);
            last = pct;
        }
        assert_eq!(last, 100);
        assert_eq!(progress_percent(JobStatus::Rendering, 7, 7), 90);
    }

    #[test]
    fn test_apply_records_transitions() {
        let mut job = job();
        let now = Utc::now();
        JobUpdate::status(JobStatus::Validating)
            .apply(&mut job, now)
            .unwrap();
        JobUpdate::status(JobStatus::Validating)
            .apply(&mut job, now)
            .unwrap();
        let statuses: Vec<JobStatus> = job.transitions.iter().map(|t| t.status).collect();
        assert_eq!(statuses, vec![JobStatus::Pending, JobStatus::Validating]);
    }

    #[test]
    fn test_apply_rejects_illegal_transition() {
        let mut job = job();
        let err = JobUpdate::status(JobStatus::Complete)
            .apply(&mut job, Utc::now())
            .unwrap_err();
        assert_eq!(err.from, JobStatus::Pending);
        assert_eq!(job.status, JobStatus::Pending);
    }

    #[test]
    fn test_pages_rendered_never_decreases() {
        let mut job = job();
        let now = Utc::now();
        for n in [2, 1, 3, 9] {
            JobUpdate {
                pages_rendered: Some(n),
                ..Default::default()
            }
            .apply(&mut job, now)
            .unwrap();
        }
        assert_eq!(job.pages_rendered, 4);
    }

    #[test]
    fn test_status_parse_round_trip() {
        for status in ALL {
            assert_eq!(JobStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(JobStatus::parse("done"), None);
    }
}
