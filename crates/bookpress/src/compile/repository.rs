//! Persistence seam for compilation jobs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::stream::BoxStream;
use tokio::sync::Mutex;

use crate::db::{job_repo, Database, RepositoryError};

use super::events::{job_stream, JobEventBroadcaster};
use super::job::{CompilationJob, JobUpdate};

#[async_trait]
pub trait JobRepository: Send + Sync {
    async fn insert(&self, job: &CompilationJob) -> Result<(), RepositoryError>;

    async fn get(&self, id: &str) -> Result<Option<CompilationJob>, RepositoryError>;

    /// Applies `changes` and returns the stored result. Illegal status
    /// transitions are rejected and nothing is written.
    async fn update(
        &self,
        id: &str,
        changes: JobUpdate,
        now: DateTime<Utc>,
    ) -> Result<CompilationJob, RepositoryError>;

    /// Most recently created job with this fingerprint.
    async fn find_by_fingerprint(
        &self,
        fingerprint: &str,
    ) -> Result<Option<CompilationJob>, RepositoryError>;

    /// A family's jobs, newest first.
    async fn list_for_family(&self, family_id: &str)
        -> Result<Vec<CompilationJob>, RepositoryError>;

    /// Current snapshot followed by every later change, ending once the
    /// job reaches a terminal status.
    async fn watch(&self, id: &str)
        -> Result<BoxStream<'static, CompilationJob>, RepositoryError>;
}

/// Job repository kept in process memory.
#[derive(Default)]
pub struct InMemoryJobRepository {
    // Insertion order doubles as creation order.
    jobs: Mutex<Vec<CompilationJob>>,
    events: JobEventBroadcaster,
}

impl InMemoryJobRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobRepository for InMemoryJobRepository {
    async fn insert(&self, job: &CompilationJob) -> Result<(), RepositoryError> {
        let mut jobs = self.jobs.lock().await;
        if jobs.iter().any(|j| j.id == job.id) {
            return Err(RepositoryError::Duplicate {
                kind: "Job",
                id: job.id.clone(),
            });
        }
        jobs.push(job.clone());
        self.events.send(job);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<CompilationJob>, RepositoryError> {
        let jobs = self.jobs.lock().await;
        Ok(jobs.iter().find(|j| j.id == id).cloned())
    }

    async fn update(
        &self,
        id: &str,
        changes: JobUpdate,
        now: DateTime<Utc>,
    ) -> Result<CompilationJob, RepositoryError> {
        let mut jobs = self.jobs.lock().await;
        let stored = jobs
            .iter_mut()
            .find(|j| j.id == id)
            .ok_or_else(|| RepositoryError::job_not_found(id))?;

        let mut next = stored.clone();
        changes
            .apply(&mut next, now)
            .map_err(|e| RepositoryError::InvalidTransition(e.to_string()))?;
        *stored = next.clone();
        self.events.send(&next);
        Ok(next)
    }

    async fn find_by_fingerprint(
        &self,
        fingerprint: &str,
    ) -> Result<Option<CompilationJob>, RepositoryError> {
        let jobs = self.jobs.lock().await;
        Ok(jobs
            .iter()
            .rev()
            .find(|j| j.fingerprint == fingerprint)
            .cloned())
    }

    async fn list_for_family(
        &self,
        family_id: &str,
    ) -> Result<Vec<CompilationJob>, RepositoryError> {
        let jobs = self.jobs.lock().await;
        let mut list: Vec<CompilationJob> = jobs
            .iter()
            .rev()
            .filter(|j| j.family_id == family_id)
            .cloned()
            .collect();
        // Stable, so equal timestamps keep newest-inserted first.
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(list)
    }

    async fn watch(
        &self,
        id: &str,
    ) -> Result<BoxStream<'static, CompilationJob>, RepositoryError> {
        let receiver = self.events.subscribe();
        let job = self
            .get(id)
            .await?
            .ok_or_else(|| RepositoryError::job_not_found(id))?;
        Ok(job_stream(job, receiver))
    }
}

/// Job repository backed by the SQLite `compilation_jobs` table.
pub struct SqliteJobRepository {
    db: Database,
    events: JobEventBroadcaster,
    // Serializes read-modify-write updates.
    write_lock: Mutex<()>,
}

impl SqliteJobRepository {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            events: JobEventBroadcaster::default(),
            write_lock: Mutex::new(()),
        }
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, RepositoryError>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> Result<T, RepositoryError> + Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| RepositoryError::Task(e.to_string()))?
    }
}

#[async_trait]
impl JobRepository for SqliteJobRepository {
    async fn insert(&self, job: &CompilationJob) -> Result<(), RepositoryError> {
        let _guard = self.write_lock.lock().await;
        let record = job.clone();
        self.blocking(move |db| job_repo::insert(db, &record)).await?;
        self.events.send(job);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<CompilationJob>, RepositoryError> {
        let id = id.to_string();
        self.blocking(move |db| job_repo::find_by_id(db, &id)).await
    }

    async fn update(
        &self,
        id: &str,
        changes: JobUpdate,
        now: DateTime<Utc>,
    ) -> Result<CompilationJob, RepositoryError> {
        let _guard = self.write_lock.lock().await;
        let id = id.to_string();
        let updated = self
            .blocking(move |db| {
                let mut job = job_repo::find_by_id(db, &id)?
                    .ok_or_else(|| RepositoryError::job_not_found(&id))?;
                changes
                    .apply(&mut job, now)
                    .map_err(|e| RepositoryError::InvalidTransition(e.to_string()))?;
                job_repo::update(db, &job)?;
                Ok(job)
            })
            .await?;
        self.events.send(&updated);
        Ok(updated)
    }

    async fn find_by_fingerprint(
        &self,
        fingerprint: &str,
    ) -> Result<Option<CompilationJob>, RepositoryError> {
        let fingerprint = fingerprint.to_string();
        self.blocking(move |db| job_repo::find_latest_by_fingerprint(db, &fingerprint))
            .await
    }

    async fn list_for_family(
        &self,
        family_id: &str,
    ) -> Result<Vec<CompilationJob>, RepositoryError> {
        let family_id = family_id.to_string();
        self.blocking(move |db| job_repo::list_by_family(db, &family_id))
            .await
    }

    async fn watch(
        &self,
        id: &str,
    ) -> Result<BoxStream<'static, CompilationJob>, RepositoryError> {
        let receiver = self.events.subscribe();
        let job = self
            .get(id)
            .await?
            .ok_or_else(|| RepositoryError::job_not_found(id))?;
        Ok(job_stream(job, receiver))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::JobStatus;
    use crate::geometry::BookSize;
    use futures_util::StreamExt;
    use std::sync::Arc;

    fn job(id: &str, fingerprint: &str) -> CompilationJob {
        CompilationJob::new(
            id.to_string(),
            "fam",
            fingerprint.to_string(),
            BookSize::SmallSquare,
            vec!["a".to_string(), "b".to_string()],
            None,
            Utc::now(),
        )
    }

    fn repositories() -> Vec<Arc<dyn JobRepository>> {
        vec![
            Arc::new(InMemoryJobRepository::new()),
            Arc::new(SqliteJobRepository::new(Database::open_in_memory().unwrap())),
        ]
    }

    #[tokio::test]
    async fn test_update_rejects_illegal_transition_without_writing() {
        for repo in repositories() {
            repo.insert(&job("j1", "fp")).await.unwrap();
            let err = repo
                .update("j1", JobUpdate::status(JobStatus::Merging), Utc::now())
                .await
                .unwrap_err();
            assert!(matches!(err, RepositoryError::InvalidTransition(_)));

            let stored = repo.get("j1").await.unwrap().unwrap();
            assert_eq!(stored.status, JobStatus::Pending);
        }
    }

    #[tokio::test]
    async fn test_update_unknown_job() {
        for repo in repositories() {
            let err = repo
                .update("missing", JobUpdate::default(), Utc::now())
                .await
                .unwrap_err();
            assert!(matches!(err, RepositoryError::NotFound { .. }));
        }
    }

    #[tokio::test]
    async fn test_find_by_fingerprint_returns_latest() {
        for repo in repositories() {
            repo.insert(&job("first", "fp")).await.unwrap();
            repo.insert(&job("second", "fp")).await.unwrap();
            let found = repo.find_by_fingerprint("fp").await.unwrap().unwrap();
            assert_eq!(found.id, "second");
            assert!(repo.find_by_fingerprint("other").await.unwrap().is_none());
        }
    }

    #[tokio::test]
    async fn test_watch_streams_until_terminal() {
        for repo in repositories() {
            repo.insert(&job("w1", "fp")).await.unwrap();
            let mut stream = repo.watch("w1").await.unwrap();

            let writer = repo.clone();
            let handle = tokio::spawn(async move {
                for status in [
                    JobStatus::Validating,
                    JobStatus::Rendering,
                    JobStatus::Failed,
                ] {
                    writer
                        .update("w1", JobUpdate::status(status), Utc::now())
                        .await
                        .unwrap();
                }
            });

            let mut seen = Vec::new();
            while let Some(snapshot) = stream.next().await {
                seen.push(snapshot.status);
            }
            handle.await.unwrap();

            assert_eq!(seen.first(), Some(&JobStatus::Pending));
            assert_eq!(seen.last(), Some(&JobStatus::Failed));
        }
    }
}
