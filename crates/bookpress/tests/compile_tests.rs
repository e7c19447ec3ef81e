//! End-to-end compilation: validation gate, rendering fan-out, assembly,
//! caching and job bookkeeping.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use futures_util::StreamExt;

use bookpress::assembler::artifact_key;
use bookpress::clock::Clock;
use bookpress::compile::{
    CompileError, CompileOutcome, CompileSettings, JobRepository, JobStatus, SqliteJobRepository,
};
use bookpress::db::Database;
use bookpress::fulfillment::{FulfillmentSettings, InMemoryOrderRepository};
use bookpress::geometry::BookSize;
use bookpress::render::RasterSettings;

use common::*;

const OTHER_FAMILY: &str = "fam-lindqvist";

#[tokio::test]
async fn test_clean_small_square_book_compiles() {
    let harness = TestHarness::new();
    harness.add_pages(clean_pages(3)).await;

    let (outcome, job) = harness
        .compile_and_wait(harness.request(BookSize::SmallSquare, page_ids(3)))
        .await;

    match &outcome {
        CompileOutcome::Started {
            estimated_duration_secs,
            ..
        } => assert_eq!(*estimated_duration_secs, 13),
        other => panic!("expected Started, got {:?}", other),
    }
    assert_eq!(job.status, JobStatus::Complete);
    assert_eq!(job.progress_percent(), 100);
    assert_eq!(job.pages_rendered, 3);
    assert_eq!(job.page_count, Some(3));
    assert!(job.validation.can_proceed);
    assert!(job.completed_at.is_some());

    let key = artifact_key(FAMILY, &job.id);
    assert_eq!(job.storage_key.as_deref(), Some(key.as_str()));
    let download = job.download.clone().expect("complete job has a download");
    assert!(download.is_valid_at(harness.clock.now()));
    assert_eq!(
        harness.store.content_type(&key).await.as_deref(),
        Some("application/pdf")
    );
    assert_eq!(harness.snapshotter.calls(), 3);

    let statuses: Vec<JobStatus> = job.transitions.iter().map(|t| t.status).collect();
    assert_eq!(
        statuses,
        vec![
            JobStatus::Pending,
            JobStatus::Validating,
            JobStatus::Rendering,
            JobStatus::Merging,
            JobStatus::Complete
        ]
    );
}

#[tokio::test]
async fn test_cache_hit_never_rerenders() {
    let harness = TestHarness::new();
    let first = harness.complete_book(BookSize::LargeSquare, 4).await;
    let calls = harness.snapshotter.calls();
    let puts = harness.store.put_count();

    let outcome = harness
        .controller
        .compile(harness.request(BookSize::LargeSquare, page_ids(4)))
        .await
        .unwrap();

    match outcome {
        CompileOutcome::CacheHit { job, download } => {
            assert_eq!(job.id, first.id);
            assert_eq!(Some(download), first.download);
        }
        other => panic!("expected CacheHit, got {:?}", other),
    }
    assert_eq!(harness.snapshotter.calls(), calls);
    assert_eq!(harness.store.put_count(), puts);
}

#[tokio::test]
async fn test_cache_hit_refreshes_expired_download() {
    let harness = TestHarness::with_settings(CompileSettings {
        download_ttl: ChronoDuration::minutes(1),
        ..Default::default()
    });
    let first = harness.complete_book(BookSize::SmallSquare, 2).await;
    let old = first.download.clone().unwrap();

    harness.clock.advance(ChronoDuration::minutes(2));
    assert!(!old.is_valid_at(harness.clock.now()));

    let outcome = harness
        .controller
        .compile(harness.request(BookSize::SmallSquare, page_ids(2)))
        .await
        .unwrap();
    let CompileOutcome::CacheHit { job, download } = outcome else {
        panic!("expected CacheHit");
    };
    assert_eq!(job.id, first.id);
    assert!(download.is_valid_at(harness.clock.now()));
    assert!(download.expires_at > old.expires_at);
    assert_eq!(harness.snapshotter.calls(), 2);
}

#[tokio::test]
async fn test_critical_issue_blocks_until_acknowledged() {
    let harness = TestHarness::new();
    harness
        .add_pages(vec![
            clean_page("p1"),
            page_crossing_margin("p2", BookSize::SmallSquare, 40.0),
            clean_page("p3"),
        ])
        .await;

    let outcome = harness
        .controller
        .compile(harness.request(BookSize::SmallSquare, page_ids(3)))
        .await
        .unwrap();
    let CompileOutcome::Blocked { job_id, report } = outcome else {
        panic!("expected Blocked");
    };
    assert!(report.should_block);
    assert_eq!(report.summary.total_critical, 1);
    assert_eq!(report.summary.critical_page_ids, vec!["p2".to_string()]);
    assert_eq!(harness.snapshotter.calls(), 0);

    let status = harness.controller.job_status(&job_id).await.unwrap();
    assert_eq!(status.status, JobStatus::Validating);
    assert!(status.blocked_by_validation);
    assert_eq!(status.percent, 0);

    let mut request = harness.request(BookSize::SmallSquare, page_ids(3));
    request.acknowledged_by = Some("ada".to_string());
    let (outcome, job) = harness.compile_and_wait(request).await;
    assert_eq!(outcome.job_id(), job_id);
    assert_eq!(job.status, JobStatus::Complete);
    assert!(!job.blocked_by_validation);
    let ack = job.validation.acknowledgement.expect("acknowledgement recorded");
    assert_eq!(ack.acknowledged_by, "ada");
    assert_eq!(job.validation.summary.total_critical, 1);
}

#[tokio::test]
async fn test_warning_only_book_proceeds() {
    let harness = TestHarness::new();
    harness
        .add_pages(vec![
            page_crossing_margin("p1", BookSize::SmallSquare, 20.0),
            clean_page("p2"),
        ])
        .await;

    let (outcome, job) = harness
        .compile_and_wait(harness.request(BookSize::SmallSquare, page_ids(2)))
        .await;
    assert!(matches!(outcome, CompileOutcome::Started { .. }));
    assert_eq!(job.status, JobStatus::Complete);
    assert_eq!(job.validation.summary.total_warnings, 1);
    assert_eq!(job.validation.summary.total_critical, 0);
}

#[tokio::test]
async fn test_render_failure_fails_job_with_page_id() {
    let harness = TestHarness::new();
    harness.add_pages(clean_pages(4)).await;
    harness.snapshotter.fail_page("p3");

    let (_, job) = harness
        .compile_and_wait(harness.request(BookSize::Portrait, page_ids(4)))
        .await;

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.failed_page_id.as_deref(), Some("p3"));
    assert!(job.error.as_deref().unwrap_or_default().contains("p3"));
    assert!(job.download.is_none());
    assert!(job.storage_key.is_none());
    assert!(harness.store.keys().await.is_empty());

    let view = harness.controller.job_status(&job.id).await.unwrap();
    assert_eq!(view.label, "Compilation failed");
    assert_eq!(view.failed_page_id.as_deref(), Some("p3"));
}

#[tokio::test]
async fn test_failed_job_is_retried_with_new_job() {
    let harness = TestHarness::new();
    harness.add_pages(clean_pages(2)).await;
    harness.snapshotter.fail_page("p1");
    let (_, failed) = harness
        .compile_and_wait(harness.request(BookSize::SmallSquare, page_ids(2)))
        .await;
    assert_eq!(failed.status, JobStatus::Failed);

    let retry = harness
        .controller
        .compile(harness.request(BookSize::SmallSquare, page_ids(2)))
        .await
        .unwrap();
    assert!(matches!(retry, CompileOutcome::Started { .. }));
    assert_ne!(retry.job_id(), failed.id);
}

#[tokio::test]
async fn test_wrong_sized_capture_fails_job() {
    let harness = TestHarness::new();
    harness.add_pages(clean_pages(2)).await;
    harness.snapshotter.shrink_page("p2");

    let (_, job) = harness
        .compile_and_wait(harness.request(BookSize::SmallSquare, page_ids(2)))
        .await;
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.failed_page_id.as_deref(), Some("p2"));
}

#[tokio::test]
async fn test_out_of_order_completion_keeps_progress_monotonic() {
    let harness = TestHarness::with_settings(CompileSettings {
        concurrency: 3,
        ..Default::default()
    });
    harness.add_pages(clean_pages(3)).await;
    harness
        .snapshotter
        .delay_page("p1", Duration::from_millis(150));
    harness
        .snapshotter
        .delay_page("p2", Duration::from_millis(75));

    let outcome = harness
        .controller
        .compile(harness.request(BookSize::SmallSquare, page_ids(3)))
        .await
        .unwrap();
    let mut updates = harness.controller.watch(outcome.job_id()).await.unwrap();

    let mut seen = Vec::new();
    while let Some(job) = updates.next().await {
        seen.push((job.pages_rendered, job.progress_percent(), job.status));
    }

    assert_eq!(seen.last().map(|s| s.2), Some(JobStatus::Complete));
    for pair in seen.windows(2) {
        assert!(pair[0].0 <= pair[1].0, "pages rendered went backwards: {:?}", seen);
        assert!(pair[0].1 <= pair[1].1, "percent went backwards: {:?}", seen);
    }
    assert_eq!(harness.snapshotter.captured(), vec!["p3", "p2", "p1"]);

    let job = harness.jobs.get(outcome.job_id()).await.unwrap().unwrap();
    assert_eq!(job.page_ids, page_ids(3));
    assert_eq!(job.page_count, Some(3));
}

#[tokio::test]
async fn test_second_request_for_in_flight_job_reports_progress() {
    let harness = TestHarness::new();
    harness.add_pages(clean_pages(2)).await;
    harness
        .snapshotter
        .delay_page("p1", Duration::from_millis(100));

    let first = harness
        .controller
        .compile(harness.request(BookSize::SmallSquare, page_ids(2)))
        .await
        .unwrap();
    let second = harness
        .controller
        .compile(harness.request(BookSize::SmallSquare, page_ids(2)))
        .await
        .unwrap();

    match second {
        CompileOutcome::InProgress { job } => {
            assert_eq!(job.id, first.job_id());
            assert!(job.status.is_in_flight());
        }
        other => panic!("expected InProgress, got {:?}", other),
    }

    let job = harness.controller.wait_for_job(first.job_id()).await.unwrap();
    assert_eq!(job.status, JobStatus::Complete);
    assert_eq!(harness.snapshotter.calls(), 2);
}

#[tokio::test]
async fn test_new_job_supersedes_previous_for_same_size() {
    let harness = TestHarness::new();
    let first = harness.complete_book(BookSize::SmallSquare, 2).await;
    harness.add_pages(vec![clean_page("p3")]).await;
    harness.clock.advance(ChronoDuration::minutes(1));

    let (_, second) = harness
        .compile_and_wait(harness.request(BookSize::SmallSquare, page_ids(3)))
        .await;
    assert_eq!(second.status, JobStatus::Complete);

    let first = harness.jobs.get(&first.id).await.unwrap().unwrap();
    assert_eq!(first.superseded_by.as_deref(), Some(second.id.as_str()));

    let jobs = harness.controller.list_jobs(FAMILY).await.unwrap();
    let ids: Vec<&str> = jobs.iter().map(|j| j.id.as_str()).collect();
    assert_eq!(ids, vec![second.id.as_str(), first.id.as_str()]);
}

#[tokio::test]
async fn test_missing_page_fails_validation() {
    let harness = TestHarness::new();
    harness.add_pages(clean_pages(2)).await;

    let err = harness
        .controller
        .compile(harness.request(BookSize::SmallSquare, page_ids(3)))
        .await
        .unwrap_err();
    let CompileError::PageNotFound { job_id, page_id } = err else {
        panic!("expected PageNotFound, got {:?}", err);
    };
    assert_eq!(page_id, "p3");

    let job = harness.jobs.get(&job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.failed_page_id.as_deref(), Some("p3"));
}

#[tokio::test]
async fn test_page_store_outage_fails_job_and_allows_retry() {
    let harness = TestHarness::new();
    harness.add_pages(clean_pages(2)).await;
    harness.page_source.fail_next_loads(1);

    let err = harness
        .controller
        .compile(harness.request(BookSize::SmallSquare, page_ids(2)))
        .await
        .unwrap_err();
    assert!(matches!(err, CompileError::Source(_)), "{:?}", err);

    let jobs = harness.controller.list_jobs(FAMILY).await.unwrap();
    assert_eq!(jobs.len(), 1);
    let stranded = &jobs[0];
    assert_eq!(stranded.status, JobStatus::Failed);
    assert!(!stranded.blocked_by_validation);
    assert!(stranded.error.as_deref().unwrap_or_default().contains("blip"));

    let (outcome, job) = harness
        .compile_and_wait(harness.request(BookSize::SmallSquare, page_ids(2)))
        .await;
    assert!(matches!(outcome, CompileOutcome::Started { .. }), "{:?}", outcome);
    assert_ne!(job.id, stranded.id);
    assert_eq!(job.status, JobStatus::Complete);
}

#[tokio::test]
async fn test_slow_snapshot_times_out_and_fails_job() {
    let harness = TestHarness::with_raster_settings(RasterSettings {
        snapshot_timeout: Duration::from_millis(300),
        ..raster_settings()
    });
    harness.add_pages(clean_pages(3)).await;
    harness.snapshotter.delay_page("p2", Duration::from_secs(5));

    let (_, job) = harness
        .compile_and_wait(harness.request(BookSize::SmallSquare, page_ids(3)))
        .await;

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.failed_page_id.as_deref(), Some("p2"));
    let error = job.error.unwrap_or_default();
    assert!(error.contains("timed out after 300ms"), "{}", error);
    assert!(job.storage_key.is_none());
}

#[tokio::test]
async fn test_held_compile_does_not_stall_other_families() {
    let harness = TestHarness::new();
    harness.add_pages(clean_pages(2)).await;
    harness.pages.insert(OTHER_FAMILY, clean_page("p1")).await;
    harness.page_source.hold_family(OTHER_FAMILY);

    let held = |controller: bookpress::compile::CompilationController| {
        let request = harness.request_for(OTHER_FAMILY, BookSize::SmallSquare, page_ids(1));
        tokio::spawn(async move { controller.compile(request).await })
    };
    let first = held(harness.controller.clone());
    tokio::time::timeout(Duration::from_secs(5), async {
        while harness.page_source.waiting() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("held compile never reached the page store");
    // Same fingerprint as `first`; waits behind it.
    let second = held(harness.controller.clone());

    let (_, job) = tokio::time::timeout(
        Duration::from_secs(10),
        harness.compile_and_wait(harness.request(BookSize::SmallSquare, page_ids(2))),
    )
    .await
    .expect("compile for one family waited on another family's validation");
    assert_eq!(job.status, JobStatus::Complete);

    harness.page_source.release(OTHER_FAMILY);
    let first = first.await.unwrap().unwrap();
    let second = second.await.unwrap().unwrap();
    assert!(matches!(first, CompileOutcome::Started { .. }), "{:?}", first);
    assert_eq!(second.job_id(), first.job_id());
    assert_eq!(harness.controller.list_jobs(OTHER_FAMILY).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_rejects_empty_and_duplicate_requests() {
    let harness = TestHarness::new();
    assert!(matches!(
        harness
            .controller
            .compile(harness.request(BookSize::SmallSquare, vec![]))
            .await,
        Err(CompileError::EmptyRequest)
    ));
    assert!(matches!(
        harness
            .controller
            .compile(harness.request(
                BookSize::SmallSquare,
                vec!["p1".to_string(), "p1".to_string()]
            ))
            .await,
        Err(CompileError::DuplicatePage(_))
    ));
}

#[tokio::test]
async fn test_refresh_download() {
    let harness = TestHarness::new();
    let job = harness.complete_book(BookSize::SmallSquare, 1).await;

    harness.clock.advance(ChronoDuration::hours(30));
    let fresh = harness
        .controller
        .refresh_download(FAMILY, &job.id)
        .await
        .unwrap();
    assert!(fresh.is_valid_at(harness.clock.now()));
    assert_eq!(
        harness.jobs.get(&job.id).await.unwrap().unwrap().download,
        Some(fresh)
    );

    assert!(matches!(
        harness.controller.refresh_download("other-family", &job.id).await,
        Err(CompileError::JobNotFound(_))
    ));
}

#[tokio::test]
async fn test_refresh_download_rejects_incomplete_job() {
    let harness = TestHarness::new();
    harness
        .add_pages(vec![page_crossing_margin("p1", BookSize::SmallSquare, 45.0)])
        .await;
    let outcome = harness
        .controller
        .compile(harness.request(BookSize::SmallSquare, page_ids(1)))
        .await
        .unwrap();

    assert!(matches!(
        harness
            .controller
            .refresh_download(FAMILY, outcome.job_id())
            .await,
        Err(CompileError::NotComplete {
            status: JobStatus::Validating,
            ..
        })
    ));
}

#[tokio::test]
async fn test_compile_against_sqlite_repository() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("bookpress.db");
    let db = Database::open(&db_path).unwrap();
    let harness = TestHarness::build(
        Arc::new(SqliteJobRepository::new(db)),
        Arc::new(InMemoryOrderRepository::new()),
        CompileSettings::default(),
        FulfillmentSettings::default(),
    );

    let job = harness.complete_book(BookSize::Portrait, 3).await;

    let reopened = SqliteJobRepository::new(Database::open(&db_path).unwrap());
    let stored = reopened.get(&job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Complete);
    assert_eq!(stored.storage_key, job.storage_key);
    assert_eq!(stored.transitions.len(), 5);
}
