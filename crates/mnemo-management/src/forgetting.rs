//! Policy-driven deletion of memories.

use chrono::{TimeDelta, Utc};
use mnemo_core::*;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::Collections;

/// Selects and deletes memories according to an agent's forgetting policy.
#[derive(Clone)]
pub struct Forgetter {
    index: Arc<dyn MemoryIndex>,
    vectors: Arc<dyn VectorStore>,
    collections: Collections,
}

impl Forgetter {
    pub fn new(index: Arc<dyn MemoryIndex>, vectors: Arc<dyn VectorStore>, collections: Collections) -> Self {
        Self {
            index,
            vectors,
            collections,
        }
    }

    /// Rows the policy would forget right now.
    pub async fn candidates(&self, agent_id: AgentId, policy: &ForgettingPolicy) -> Result<Vec<IndexEntry>> {
        policy.validate()?;
        let mut query = IndexQuery::for_agent(agent_id);
        match policy.strategy {
            ForgettingStrategy::TimeBased => {
                query.created_before = Some(cutoff(policy.threshold)?);
            }
            ForgettingStrategy::AccessBased => {
                query.idle_since = Some(cutoff(policy.threshold)?);
            }
            ForgettingStrategy::ImportanceBased => {
                query.importance_below = Some(policy.threshold);
            }
        }
        self.index.query(&query).await
    }

    /// Forget every candidate for the policy. Returns how many were deleted;
    /// a row that fails to archive or delete is logged and left in place.
    pub async fn forget_memories(&self, agent_id: AgentId, policy: &ForgettingPolicy) -> Result<usize> {
        let candidates = self.candidates(agent_id, policy).await?;
        debug!(agent_id = %agent_id, candidates = candidates.len(), strategy = ?policy.strategy, "forgetting candidates selected");

        let mut forgotten = 0;
        for entry in &candidates {
            if policy.archive_before_delete
                && let Err(e) = self.archive(entry).await
            {
                warn!(id = %entry.id, error = %e, "failed to archive memory, keeping it");
                continue;
            }
            match self.delete(entry).await {
                Ok(()) => forgotten += 1,
                Err(e) => warn!(id = %entry.id, error = %e, "failed to forget memory"),
            }
        }

        info!(agent_id = %agent_id, count = forgotten, candidates = candidates.len(), "memories forgotten");
        Ok(forgotten)
    }

    /// Run every enabled policy, one agent at a time. Returns the total forgotten.
    pub async fn run_sweep(&self) -> Result<usize> {
        let agents = self.index.configured_agents().await?;
        let mut total = 0;
        for agent_id in agents {
            let config = match self.index.agent_config(agent_id).await {
                Ok(c) => c,
                Err(e) => {
                    warn!(agent_id = %agent_id, error = %e, "failed to load agent config for sweep");
                    continue;
                }
            };
            let Some(policy) = config.forgetting_policy.filter(|p| p.enabled) else {
                continue;
            };
            match self.forget_memories(agent_id, &policy).await {
                Ok(n) => total += n,
                Err(e) => warn!(agent_id = %agent_id, error = %e, "forgetting failed for agent"),
            }
        }
        info!(total, "forgetting sweep finished");
        Ok(total)
    }

    /// Remove the stored content, then the index row.
    pub(crate) async fn delete(&self, entry: &IndexEntry) -> Result<()> {
        if let Some((collection, point_id)) = self.collections.locate(entry) {
            self.vectors.delete(&collection, &point_id).await?;
        }
        self.index.delete(entry.id).await?;
        Ok(())
    }

    async fn archive(&self, entry: &IndexEntry) -> Result<()> {
        let content = match self.collections.locate(entry) {
            Some((collection, point_id)) => self
                .vectors
                .retrieve(&collection, &point_id)
                .await?
                .and_then(|p| p.payload.get("content").and_then(Value::as_str).map(str::to_string)),
            None => None,
        };
        self.index.archive(entry, content.as_deref()).await
    }
}

/// `threshold` days before now.
fn cutoff(days: f64) -> Result<chrono::DateTime<Utc>> {
    let out_of_range = || MnemoError::validation("threshold", format!("{days} days is out of range"));
    let delta = TimeDelta::try_seconds((days * 86_400.0) as i64).ok_or_else(out_of_range)?;
    Utc::now().checked_sub_signed(delta).ok_or_else(out_of_range)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cutoff_fractional_days() {
        let half_day = Utc::now() - cutoff(0.5).unwrap();
        assert!((half_day.num_seconds() - 43_200).abs() <= 1);
    }

    #[test]
    fn test_cutoff_out_of_range_is_error() {
        assert!(matches!(cutoff(1.0e8), Err(MnemoError::Validation { .. })));
        assert!(cutoff(1.0e15).is_err());
    }
}
