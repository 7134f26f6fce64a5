//! Worker pool draining the index queue.
//!
//! A bounded set of tokio tasks claims jobs and hands them to the
//! service's executor. A failing job is marked failed and the loop
//! continues; a storage failure requeues the job, pauses the queue, and
//! escalates. Each job runs under the configured timeout.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::IndexQueue;
use crate::error::{RagError, RagResult};
use crate::types::IndexJob;

/// Executes claimed jobs. Implemented by the RAG service.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    /// Run one job to completion. Progress updates go through the queue;
    /// batch jobs should check `cancel` between files.
    async fn execute(
        &self,
        job: &IndexJob,
        queue: &IndexQueue,
        cancel: &CancellationToken,
    ) -> RagResult<()>;
}

/// Handle to the running worker tasks.
pub struct WorkerPool {
    handles: Vec<tokio::task::JoinHandle<()>>,
    cancel: CancellationToken,
}

impl WorkerPool {
    /// Start `workers` tasks draining the queue.
    pub fn spawn(
        queue: Arc<IndexQueue>,
        executor: Arc<dyn JobExecutor>,
        workers: usize,
        job_timeout: Duration,
    ) -> Self {
        let cancel = CancellationToken::new();
        let handles = (0..workers.max(1))
            .map(|worker_id| {
                let queue = queue.clone();
                let executor = executor.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    worker_loop(worker_id, queue, executor, cancel, job_timeout).await;
                })
            })
            .collect();

        Self { handles, cancel }
    }

    /// Cooperatively stop the workers and wait for them to exit.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

async fn worker_loop(
    worker_id: usize,
    queue: Arc<IndexQueue>,
    executor: Arc<dyn JobExecutor>,
    cancel: CancellationToken,
    job_timeout: Duration,
) {
    tracing::debug!(target: "queue", "worker {worker_id} started");

    loop {
        if cancel.is_cancelled() {
            break;
        }

        match queue.dequeue_next().await {
            Ok(Some(job)) => {
                run_job(&queue, executor.as_ref(), &cancel, job_timeout, job).await;
            }
            Ok(None) => {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = queue.wait_for_work(Duration::from_millis(250)) => {}
                }
            }
            Err(e) => {
                tracing::error!(target: "queue", "worker {worker_id} dequeue failed: {e}");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }

    tracing::debug!(target: "queue", "worker {worker_id} stopped");
}

async fn run_job(
    queue: &IndexQueue,
    executor: &dyn JobExecutor,
    cancel: &CancellationToken,
    job_timeout: Duration,
    job: IndexJob,
) {
    tracing::info!(
        target: "queue",
        "job {} started: {} {} (collection {})",
        job.id,
        job.kind,
        job.target,
        job.collection_id
    );

    let outcome = tokio::time::timeout(job_timeout, executor.execute(&job, queue, cancel)).await;

    let result = match outcome {
        Ok(Ok(())) => queue.mark_completed(&job).await,
        Ok(Err(RagError::Storage(e))) => {
            // The job is not at fault; park everything until storage is
            // back and the operator resumes the queue.
            tracing::error!(
                target: "queue",
                "job {} hit storage failure, pausing queue: {e}",
                job.id
            );
            queue.pause();
            let requeued = queue.requeue(&job).await;
            let _ = queue.persist_state().await;
            requeued
        }
        Ok(Err(e)) => {
            tracing::warn!(target: "queue", "job {} failed: {e}", job.id);
            queue.mark_failed(&job, &e.to_string()).await
        }
        Err(_) => {
            let message = format!("timed out after {}s", job_timeout.as_secs());
            tracing::warn!(target: "queue", "job {} {message}", job.id);
            queue.mark_failed(&job, &message).await
        }
    };

    // Bookkeeping errors must never kill the worker loop.
    if let Err(e) = result {
        tracing::error!(target: "queue", "job {} bookkeeping failed: {e}", job.id);
    }
}
