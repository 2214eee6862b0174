//! Single-worker FIFO queue for bulk embedding jobs.
//!
//! Jobs run one at a time in submission order. Each job is split into
//! chunks of `batch_size` texts that are embedded sequentially, with the
//! job's progress updated after every chunk.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use mnemo_core::{MnemoError, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, mpsc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::embedding::EmbeddingProvider;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchJob {
    pub id: Uuid,
    pub texts: Vec<String>,
    pub status: JobStatus,
    /// Percentage of texts embedded so far (0-100).
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embeddings: Option<Vec<Vec<f32>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchStats {
    pub total: usize,
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
}

pub struct BatchProcessor {
    jobs: Arc<DashMap<Uuid, BatchJob>>,
    queue: mpsc::UnboundedSender<Uuid>,
    finished: Arc<Notify>,
}

fn progress_percent(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((done as f64 / total as f64) * 100.0).round().min(100.0) as u8
}

impl BatchProcessor {
    /// Start the worker task. Must be called inside a tokio runtime.
    pub fn spawn(embedder: Arc<dyn EmbeddingProvider>, batch_size: usize) -> Self {
        let jobs: Arc<DashMap<Uuid, BatchJob>> = Arc::new(DashMap::new());
        let finished = Arc::new(Notify::new());
        let (tx, mut rx) = mpsc::unbounded_channel::<Uuid>();
        let batch_size = batch_size.max(1);

        let worker_jobs = Arc::clone(&jobs);
        let worker_finished = Arc::clone(&finished);
        tokio::spawn(async move {
            while let Some(job_id) = rx.recv().await {
                run_job(&worker_jobs, embedder.as_ref(), job_id, batch_size).await;
                worker_finished.notify_waiters();
            }
            debug!("batch embedding queue closed");
        });

        Self {
            jobs,
            queue: tx,
            finished,
        }
    }

    /// Queue texts for embedding and return the job id.
    pub fn submit(&self, texts: Vec<String>) -> Result<Uuid> {
        let job = BatchJob {
            id: Uuid::new_v4(),
            texts,
            status: JobStatus::Pending,
            progress: 0,
            embeddings: None,
            error: None,
            created_at: Utc::now(),
            completed_at: None,
        };
        let id = job.id;
        let count = job.texts.len();
        self.jobs.insert(id, job);
        if self.queue.send(id).is_err() {
            self.jobs.remove(&id);
            return Err(MnemoError::Queue("batch embedding worker has stopped".into()));
        }
        info!(job_id = %id, texts = count, "batch embedding job queued");
        Ok(id)
    }

    pub fn job(&self, id: Uuid) -> Option<BatchJob> {
        self.jobs.get(&id).map(|j| j.clone())
    }

    /// All jobs, oldest first.
    pub fn jobs(&self) -> Vec<BatchJob> {
        let mut all: Vec<BatchJob> = self.jobs.iter().map(|j| j.clone()).collect();
        all.sort_by_key(|j| j.created_at);
        all
    }

    /// Drop finished jobs that completed more than `max_age` ago. Returns how many were removed.
    pub fn clear_old_jobs(&self, max_age: Duration) -> usize {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(max_age).unwrap_or_else(|_| chrono::Duration::hours(1));
        let before = self.jobs.len();
        self.jobs.retain(|_, job| match job.completed_at {
            Some(done) if job.status.is_terminal() => done >= cutoff,
            _ => true,
        });
        before - self.jobs.len()
    }

    pub fn stats(&self) -> BatchStats {
        let mut stats = BatchStats::default();
        for job in self.jobs.iter() {
            stats.total += 1;
            match job.status {
                JobStatus::Pending => stats.pending += 1,
                JobStatus::Processing => stats.processing += 1,
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed => stats.failed += 1,
            }
        }
        stats
    }

    /// Wait until the job reaches a terminal state or `timeout` elapses.
    pub async fn wait_for(&self, id: Uuid, timeout: Duration) -> Option<BatchJob> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.finished.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let job = self.job(id)?;
            if job.status.is_terminal() {
                return Some(job);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.job(id);
            }
        }
    }
}

async fn run_job(
    jobs: &DashMap<Uuid, BatchJob>,
    embedder: &dyn EmbeddingProvider,
    job_id: Uuid,
    batch_size: usize,
) {
    let texts = match jobs.get_mut(&job_id) {
        Some(mut job) => {
            job.status = JobStatus::Processing;
            job.texts.clone()
        }
        None => return,
    };

    let total = texts.len();
    let mut embeddings = Vec::with_capacity(total);
    for (chunk_index, chunk) in texts.chunks(batch_size).enumerate() {
        let refs: Vec<&str> = chunk.iter().map(String::as_str).collect();
        match embedder.embed(&refs).await {
            Ok(vectors) => embeddings.extend(vectors),
            Err(e) => {
                warn!(job_id = %job_id, chunk = chunk_index, error = %e, "batch embedding job failed");
                if let Some(mut job) = jobs.get_mut(&job_id) {
                    job.status = JobStatus::Failed;
                    job.error = Some(e.to_string());
                    job.completed_at = Some(Utc::now());
                }
                return;
            }
        }
        let done = (chunk_index * batch_size + chunk.len()).min(total);
        if let Some(mut job) = jobs.get_mut(&job_id) {
            job.progress = progress_percent(done, total);
        }
    }

    if let Some(mut job) = jobs.get_mut(&job_id) {
        job.status = JobStatus::Completed;
        job.progress = 100;
        job.embeddings = Some(embeddings);
        job.completed_at = Some(Utc::now());
    }
    info!(job_id = %job_id, texts = total, "batch embedding job completed");
}
