//! Priority job queue with persisted, resumable state.
//!
//! Jobs live in the `jobs` table of the metadata database, so every
//! transition is durable. Ordering is strict priority (high > normal >
//! low), FIFO within a tier. At most one job per collection runs at a
//! time; distinct collections process concurrently up to the worker pool
//! size. Jobs left `processing` by a crash are requeued at startup.

pub mod worker;

pub use worker::{JobExecutor, WorkerPool};

use dashmap::DashMap;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Notify;

use crate::error::StorageError;
use crate::types::{
    CollectionId, IndexJob, JobId, JobKind, JobPriority, JobStatus, utc_now,
};

/// Parameters for enqueueing a job.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub kind: JobKind,
    pub priority: JobPriority,
    pub collection_id: CollectionId,
    pub target: String,
}

/// Durable, priority-ordered job queue.
pub struct IndexQueue {
    pool: SqlitePool,
    /// Collections with an active worker; reserving here precedes the
    /// database claim so two workers never share a collection.
    active: DashMap<CollectionId, JobId>,
    notify: Notify,
    paused: AtomicBool,
}

/// Placeholder while a claim is in flight.
const RESERVED: i64 = -1;

impl IndexQueue {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            active: DashMap::new(),
            notify: Notify::new(),
            paused: AtomicBool::new(false),
        }
    }

    /// Persist a new job and wake a worker.
    pub async fn enqueue(&self, job: NewJob) -> Result<JobId, StorageError> {
        let result = sqlx::query(
            r#"
            INSERT INTO jobs (priority, kind, collection_id, target, status, progress, created_at)
            VALUES (?, ?, ?, ?, 'queued', 0.0, ?)
            "#,
        )
        .bind(job.priority.rank())
        .bind(job.kind.as_str())
        .bind(job.collection_id.get())
        .bind(&job.target)
        .bind(utc_now())
        .execute(&self.pool)
        .await?;

        let id = JobId::new(result.last_insert_rowid());
        tracing::debug!(
            target: "queue",
            "enqueued {} job {id} for collection {} ({})",
            job.kind,
            job.collection_id,
            job.target
        );
        self.notify.notify_one();
        Ok(id)
    }

    /// Claim the next runnable job: highest priority, oldest id, skipping
    /// collections that already have an active worker.
    pub async fn dequeue_next(&self) -> Result<Option<IndexJob>, StorageError> {
        if self.is_paused() {
            return Ok(None);
        }

        let rows = sqlx::query(
            "SELECT * FROM jobs WHERE status = 'queued' ORDER BY priority DESC, id ASC LIMIT 32",
        )
        .fetch_all(&self.pool)
        .await?;

        for row in rows {
            let mut job = row_to_job(&row);

            // Reserve the collection before claiming the row.
            use dashmap::mapref::entry::Entry;
            let reserved = match self.active.entry(job.collection_id) {
                Entry::Occupied(_) => false,
                Entry::Vacant(slot) => {
                    slot.insert(JobId::new(RESERVED));
                    true
                }
            };
            if !reserved {
                continue;
            }

            let now = utc_now();
            let claimed = sqlx::query(
                "UPDATE jobs SET status = 'processing', started_at = ?
                 WHERE id = ? AND status = 'queued'",
            )
            .bind(now)
            .bind(job.id.get())
            .execute(&self.pool)
            .await;

            match claimed {
                Ok(result) if result.rows_affected() == 1 => {
                    self.active.insert(job.collection_id, job.id);
                    job.status = JobStatus::Processing;
                    job.started_at = Some(now);
                    return Ok(Some(job));
                }
                Ok(_) => {
                    // Another worker won the row; drop the reservation.
                    self.active.remove(&job.collection_id);
                }
                Err(e) => {
                    self.active.remove(&job.collection_id);
                    return Err(e.into());
                }
            }
        }

        Ok(None)
    }

    /// Record job progress in [0, 1].
    pub async fn update_progress(&self, id: JobId, progress: f32) -> Result<(), StorageError> {
        sqlx::query("UPDATE jobs SET progress = ? WHERE id = ?")
            .bind(progress.clamp(0.0, 1.0) as f64)
            .bind(id.get())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn mark_completed(&self, job: &IndexJob) -> Result<(), StorageError> {
        sqlx::query(
            "UPDATE jobs SET status = 'completed', progress = 1.0, finished_at = ? WHERE id = ?",
        )
        .bind(utc_now())
        .bind(job.id.get())
        .execute(&self.pool)
        .await?;
        self.release(job.collection_id);
        Ok(())
    }

    pub async fn mark_failed(&self, job: &IndexJob, error: &str) -> Result<(), StorageError> {
        sqlx::query("UPDATE jobs SET status = 'failed', error = ?, finished_at = ? WHERE id = ?")
            .bind(error)
            .bind(utc_now())
            .bind(job.id.get())
            .execute(&self.pool)
            .await?;
        self.release(job.collection_id);
        Ok(())
    }

    /// Return a claimed job to the queue (storage trouble: the job itself
    /// is not at fault).
    pub async fn requeue(&self, job: &IndexJob) -> Result<(), StorageError> {
        sqlx::query("UPDATE jobs SET status = 'queued', started_at = NULL WHERE id = ?")
            .bind(job.id.get())
            .execute(&self.pool)
            .await?;
        self.release(job.collection_id);
        Ok(())
    }

    fn release(&self, collection: CollectionId) {
        self.active.remove(&collection);
        self.notify.notify_one();
    }

    pub async fn get(&self, id: JobId) -> Result<Option<IndexJob>, StorageError> {
        let row = sqlx::query("SELECT * FROM jobs WHERE id = ?")
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| row_to_job(&r)))
    }

    /// Most recent jobs, newest first.
    pub async fn list_recent(&self, limit: usize) -> Result<Vec<IndexJob>, StorageError> {
        let rows = sqlx::query("SELECT * FROM jobs ORDER BY id DESC LIMIT ?")
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_to_job).collect())
    }

    pub async fn pending_count(&self) -> Result<u64, StorageError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM jobs WHERE status = 'queued'")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get::<i64, _>("n") as u64)
    }

    /// Requeue jobs stuck `processing` after a crash, at normal priority.
    /// Returns the number of requeued jobs. Run once at startup, before
    /// workers start.
    pub async fn resume_from_state(&self) -> Result<usize, StorageError> {
        let result = sqlx::query(
            "UPDATE jobs SET status = 'queued', priority = ?, progress = 0.0, started_at = NULL
             WHERE status = 'processing'",
        )
        .bind(JobPriority::Normal.rank())
        .execute(&self.pool)
        .await?;

        let requeued = result.rows_affected() as usize;
        if requeued > 0 {
            tracing::info!(
                target: "queue",
                "requeued {requeued} jobs left processing by a previous run"
            );
            self.notify.notify_one();
        }
        Ok(requeued)
    }

    /// Flush queue state to the main database file.
    pub async fn persist_state(&self) -> Result<(), StorageError> {
        sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
            .fetch_optional(&self.pool)
            .await?;
        Ok(())
    }

    /// Stop handing out jobs. Claimed jobs finish; nothing new starts.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Block until new work may be available, or the timeout elapses.
    pub async fn wait_for_work(&self, timeout: Duration) {
        tokio::select! {
            _ = self.notify.notified() => {}
            _ = tokio::time::sleep(timeout) => {}
        }
    }
}

fn row_to_job(row: &SqliteRow) -> IndexJob {
    let kind: String = row.get("kind");
    let status: String = row.get("status");
    IndexJob {
        id: JobId::new(row.get("id")),
        priority: JobPriority::from_rank(row.get("priority")),
        kind: JobKind::parse(&kind).unwrap_or(JobKind::IndexFile),
        collection_id: CollectionId::new(row.get("collection_id")),
        target: row.get("target"),
        status: JobStatus::parse(&status).unwrap_or(JobStatus::Failed),
        progress: row.get::<f64, _>("progress") as f32,
        error: row.get("error"),
        created_at: row.get("created_at"),
        started_at: row.get("started_at"),
        finished_at: row.get("finished_at"),
    }
}
