//! Supervised background execution of reflections.
//!
//! The write path hands an agent id to [`ReflectionWorker::submit`] and
//! returns immediately. A single task drains the bounded queue, retries
//! transient failures with exponential backoff, and records anything that
//! still fails as a dead letter.

use chrono::{DateTime, Utc};
use mnemo_config::schema::ReflectionConfig;
use mnemo_core::{AgentId, MnemoError, Result};
use mnemo_llm::Backoff;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::reflection::{ReflectionContext, ReflectionEngine};

const MAX_DEAD_LETTERS: usize = 100;

#[derive(Debug, Clone)]
struct ReflectionTask {
    agent_id: AgentId,
    context: ReflectionContext,
}

/// A reflection that exhausted its retries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetter {
    pub agent_id: AgentId,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerStats {
    pub completed: u64,
    pub failed: u64,
    pub pending: usize,
}

#[derive(Default)]
struct Shared {
    pending: Mutex<HashSet<AgentId>>,
    dead_letters: Mutex<VecDeque<DeadLetter>>,
    completed: AtomicU64,
    failed: AtomicU64,
}

/// Handle to the background reflection task. Cloning shares the queue.
#[derive(Clone)]
pub struct ReflectionWorker {
    tx: mpsc::Sender<ReflectionTask>,
    shared: Arc<Shared>,
}

impl ReflectionWorker {
    /// Start the worker. It runs until every handle is dropped.
    pub fn spawn(engine: Arc<ReflectionEngine>, config: &ReflectionConfig) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let shared = Arc::new(Shared::default());
        let backoff = Backoff::new(
            config.max_attempts,
            Duration::from_millis(config.base_backoff_ms),
        );
        let handle = tokio::spawn(run(engine, rx, shared.clone(), backoff));
        (Self { tx, shared }, handle)
    }

    /// Queue a reflection for an agent. Returns `false` when one is already
    /// queued or running for that agent.
    pub fn submit(&self, agent_id: AgentId, context: ReflectionContext) -> Result<bool> {
        if !self.shared.pending.lock().insert(agent_id) {
            return Ok(false);
        }
        match self.tx.try_send(ReflectionTask { agent_id, context }) {
            Ok(()) => Ok(true),
            Err(e) => {
                self.shared.pending.lock().remove(&agent_id);
                let reason = match e {
                    mpsc::error::TrySendError::Full(_) => "reflection queue is full",
                    mpsc::error::TrySendError::Closed(_) => "reflection worker has stopped",
                };
                Err(MnemoError::Queue(reason.to_string()))
            }
        }
    }

    pub fn stats(&self) -> WorkerStats {
        WorkerStats {
            completed: self.shared.completed.load(Ordering::Relaxed),
            failed: self.shared.failed.load(Ordering::Relaxed),
            pending: self.shared.pending.lock().len(),
        }
    }

    /// Most recent failures, oldest first.
    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.shared.dead_letters.lock().iter().cloned().collect()
    }

    /// Wait until nothing is queued or running, or the timeout passes.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.shared.pending.lock().is_empty() {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

async fn run(
    engine: Arc<ReflectionEngine>,
    mut rx: mpsc::Receiver<ReflectionTask>,
    shared: Arc<Shared>,
    backoff: Backoff,
) {
    info!("reflection worker started");
    while let Some(task) = rx.recv().await {
        let result = backoff
            .run("reflection", || engine.trigger_reflection(task.agent_id, &task.context))
            .await;

        match result {
            Ok(reflection) => {
                shared.completed.fetch_add(1, Ordering::Relaxed);
                info!(
                    agent_id = %task.agent_id,
                    reflection_id = %reflection.id,
                    "background reflection stored"
                );
            }
            Err(e) => {
                shared.failed.fetch_add(1, Ordering::Relaxed);
                error!(agent_id = %task.agent_id, error = %e, "reflection dead-lettered");
                let mut letters = shared.dead_letters.lock();
                if letters.len() >= MAX_DEAD_LETTERS {
                    letters.pop_front();
                }
                letters.push_back(DeadLetter {
                    agent_id: task.agent_id,
                    error: e.to_string(),
                    failed_at: Utc::now(),
                });
            }
        }
        shared.pending.lock().remove(&task.agent_id);
    }
    warn!("reflection worker stopped: queue closed");
}
