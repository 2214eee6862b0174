use chrono::{DateTime, Utc};
use mnemo_config::schema::ReflectionConfig;
use mnemo_core::*;
use mnemo_llm::{EmbeddingProvider, LlmProvider, LlmRequest};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Importance assigned to every stored reflection.
pub const REFLECTION_IMPORTANCE: u8 = 8;

/// Used when the model call fails or yields no numbered lines.
pub const FALLBACK_INSIGHT: &str = "Accumulated significant experiences requiring further analysis.";

const SYSTEM_PROMPT: &str =
    "You are an AI assistant that helps analyze memories and generate meaningful insights.";

const INSIGHT_PROMPT: &str = "Based on the following observations and experiences, generate 3-5 high-level insights or patterns. Focus on identifying:
- Recurring themes or patterns
- Important relationships or connections
- Key learnings or conclusions
- Behavioral patterns or preferences

Observations:
{observations}

Please provide insights as a numbered list, with each insight being a concise statement (1-2 sentences).";

const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Optional bounds on the memories a reflection reads.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReflectionContext {
    pub time_range: Option<TimeRange>,
    pub importance_threshold: Option<u8>,
    pub max_memories: Option<usize>,
}

struct SourceMemory {
    id: MemoryId,
    content: String,
}

fn accumulator_key(agent_id: AgentId) -> String {
    format!("reflection:accumulated:{agent_id}")
}

fn guard_key(agent_id: AgentId) -> String {
    format!("reflection:lock:{agent_id}")
}

/// Pull the text of `1. ...` style lines out of a model response.
pub fn parse_insights(text: &str) -> Vec<String> {
    text.lines()
        .filter_map(|line| {
            let line = line.trim();
            let digits = line.chars().take_while(char::is_ascii_digit).count();
            if digits == 0 {
                return None;
            }
            let rest = line[digits..].strip_prefix('.')?;
            let insight = rest.trim();
            (!insight.is_empty()).then(|| insight.to_string())
        })
        .collect()
}

/// Turns accumulated episodic importance into LLM-written insights.
///
/// Per-agent state lives in the cache: an importance counter that every
/// episodic write adds to, and a short-lived guard key held while a
/// reflection runs. A completed reflection subtracts the counter value it
/// started from, so increments that land while the model call is in flight
/// carry over to the next cycle.
pub struct ReflectionEngine {
    cache: Arc<dyn Cache>,
    index: Arc<dyn MemoryIndex>,
    vectors: Arc<dyn VectorStore>,
    llm: Arc<dyn LlmProvider>,
    embedder: Arc<dyn EmbeddingProvider>,
    config: ReflectionConfig,
    episodic_collection: String,
    model: String,
}

impl ReflectionEngine {
    pub fn new(
        cache: Arc<dyn Cache>,
        index: Arc<dyn MemoryIndex>,
        vectors: Arc<dyn VectorStore>,
        llm: Arc<dyn LlmProvider>,
        embedder: Arc<dyn EmbeddingProvider>,
        config: ReflectionConfig,
    ) -> Self {
        let model = config.model.clone().unwrap_or_else(|| DEFAULT_MODEL.to_string());
        Self {
            cache,
            index,
            vectors,
            llm,
            embedder,
            config,
            episodic_collection: "episodic_memories".to_string(),
            model,
        }
    }

    /// Model used when the reflection section does not name one.
    pub fn with_default_model(mut self, model: &str) -> Self {
        if self.config.model.is_none() {
            self.model = model.to_string();
        }
        self
    }

    pub fn with_episodic_collection(mut self, collection: &str) -> Self {
        self.episodic_collection = collection.to_string();
        self
    }

    // ── Accumulator ────────────────────────────────────────────

    pub async fn increment_accumulated(&self, agent_id: AgentId, importance: i64) -> Result<i64> {
        let total = self.cache.incr_by(&accumulator_key(agent_id), importance).await?;
        debug!(agent_id = %agent_id, importance, total, "accumulated importance");
        Ok(total)
    }

    pub async fn accumulated(&self, agent_id: AgentId) -> Result<i64> {
        Ok(self
            .cache
            .get(&accumulator_key(agent_id))
            .await?
            .and_then(|v| v.parse().ok())
            .unwrap_or(0))
    }

    /// Per-agent threshold, falling back to the configured default.
    pub async fn threshold(&self, agent_id: AgentId) -> i64 {
        match self.index.agent_config(agent_id).await {
            Ok(cfg) => cfg
                .reflection_threshold
                .filter(|t| *t > 0)
                .unwrap_or(self.config.threshold),
            Err(e) => {
                warn!(agent_id = %agent_id, error = %e, "failed to load agent config");
                self.config.threshold
            }
        }
    }

    pub async fn set_threshold(&self, agent_id: AgentId, threshold: i64) -> Result<()> {
        if threshold <= 0 {
            return Err(MnemoError::validation("threshold", "must be positive"));
        }
        let mut cfg = self.index.agent_config(agent_id).await?;
        cfg.reflection_threshold = Some(threshold);
        self.index.save_agent_config(agent_id, &cfg).await?;
        info!(agent_id = %agent_id, threshold, "set reflection threshold");
        Ok(())
    }

    pub async fn should_reflect(&self, agent_id: AgentId) -> Result<bool> {
        let accumulated = self.accumulated(agent_id).await?;
        let threshold = self.threshold(agent_id).await;
        let should = accumulated >= threshold;
        debug!(agent_id = %agent_id, accumulated, threshold, should, "reflection check");
        Ok(should)
    }

    // ── Trigger ────────────────────────────────────────────────

    /// Generate and store a reflection over the agent's most important
    /// episodic memories. Fails if another reflection for the same agent
    /// is running or there is nothing to reflect on.
    pub async fn trigger_reflection(
        &self,
        agent_id: AgentId,
        context: &ReflectionContext,
    ) -> Result<Reflection> {
        let guard = guard_key(agent_id);
        let ttl = Duration::from_secs(self.config.trigger_guard_ttl_secs);
        if !self.cache.set_if_absent(&guard, "1", Some(ttl)).await? {
            return Err(MnemoError::Reflection(format!(
                "reflection already in progress for agent {agent_id}"
            )));
        }

        let result = self.reflect(agent_id, context).await;
        if let Err(e) = self.cache.del(&guard).await {
            warn!(agent_id = %agent_id, error = %e, "failed to release reflection guard");
        }
        result
    }

    async fn reflect(&self, agent_id: AgentId, context: &ReflectionContext) -> Result<Reflection> {
        info!(agent_id = %agent_id, "triggering reflection");
        let snapshot = self.accumulated(agent_id).await?;

        let memories = self.source_memories(agent_id, context).await?;
        if memories.is_empty() {
            return Err(MnemoError::Reflection(format!(
                "no memories found for reflection (agent {agent_id})"
            )));
        }

        let insights = self.generate_insights(&memories).await;
        let reflection = self.store_reflection(agent_id, insights, &memories).await?;

        // Only after the reflection is persisted.
        if snapshot != 0 {
            self.cache.incr_by(&accumulator_key(agent_id), -snapshot).await?;
        }

        info!(
            agent_id = %agent_id,
            insights = reflection.insights.len(),
            sources = reflection.source_memories.len(),
            "reflection completed"
        );
        Ok(reflection)
    }

    async fn source_memories(
        &self,
        agent_id: AgentId,
        context: &ReflectionContext,
    ) -> Result<Vec<SourceMemory>> {
        let limit = context.max_memories.unwrap_or(self.config.max_memories);
        let rows = self
            .index
            .query(
                &IndexQuery::for_agent(agent_id)
                    .kind(MemoryKind::Episodic)
                    .within(context.time_range.as_ref())
                    .min_importance(context.importance_threshold)
                    .order(IndexOrder::ImportanceDesc)
                    .limit(limit),
            )
            .await?;

        let mut memories = Vec::with_capacity(rows.len());
        for row in rows {
            let (collection, point_id) = match &row.storage_location {
                Some(loc) => (loc.collection.clone(), loc.point_id.clone()),
                None => (self.episodic_collection.clone(), row.id.to_string()),
            };
            match self.vectors.retrieve(&collection, &point_id).await {
                Ok(Some(point)) => {
                    if let Some(content) = point.payload.get("content").and_then(Value::as_str) {
                        memories.push(SourceMemory {
                            id: row.id,
                            content: content.to_string(),
                        });
                    }
                }
                Ok(None) => warn!(id = %row.id, "episodic point missing for reflection"),
                Err(e) => warn!(id = %row.id, error = %e, "failed to retrieve memory content"),
            }
        }
        Ok(memories)
    }

    async fn generate_insights(&self, memories: &[SourceMemory]) -> Vec<String> {
        let observations = memories
            .iter()
            .enumerate()
            .map(|(i, m)| format!("{}. {}", i + 1, m.content))
            .collect::<Vec<_>>()
            .join("\n");
        let request = LlmRequest::new(&self.model, INSIGHT_PROMPT.replace("{observations}", &observations))
            .with_system(SYSTEM_PROMPT)
            .with_temperature(self.config.temperature)
            .with_max_tokens(self.config.max_tokens);

        match self.llm.complete(&request).await {
            Ok(resp) => {
                let insights = parse_insights(&resp.text);
                if insights.is_empty() {
                    warn!("model response contained no numbered insights");
                    vec![FALLBACK_INSIGHT.to_string()]
                } else {
                    debug!(count = insights.len(), "generated insights");
                    insights
                }
            }
            Err(e) => {
                warn!(error = %e, "insight generation failed, using fallback");
                vec![FALLBACK_INSIGHT.to_string()]
            }
        }
    }

    async fn store_reflection(
        &self,
        agent_id: AgentId,
        insights: Vec<String>,
        sources: &[SourceMemory],
    ) -> Result<Reflection> {
        let id = Uuid::new_v4();
        let timestamp = Utc::now();
        let text = insights.join(" ");
        let vector = self.embedder.embed_one(&text).await?;
        let source_ids: Vec<MemoryId> = sources.iter().map(|m| m.id).collect();

        let mut payload = Metadata::new();
        payload.insert("agent_id".into(), json!(agent_id.to_string()));
        payload.insert("content".into(), json!(text));
        payload.insert("insights".into(), json!(insights));
        payload.insert(
            "source_memory_ids".into(),
            json!(source_ids.iter().map(Uuid::to_string).collect::<Vec<_>>()),
        );
        payload.insert("importance".into(), json!(REFLECTION_IMPORTANCE));
        payload.insert("timestamp".into(), json!(timestamp.to_rfc3339()));
        self.vectors
            .upsert(
                &self.config.collection,
                Point {
                    id: id.to_string(),
                    vector,
                    payload,
                },
            )
            .await?;

        let mut entry = IndexEntry::new(agent_id, MemoryKind::Reflection);
        entry.id = id;
        entry.created_at = timestamp;
        entry.importance = Some(REFLECTION_IMPORTANCE);
        entry.storage_location = Some(StorageLocation::new(&self.config.collection, id));
        entry.metadata.insert("insight_count".into(), json!(insights.len()));
        entry.metadata.insert("source_memory_count".into(), json!(sources.len()));
        self.index.insert(&entry).await?;

        info!(id = %id, agent_id = %agent_id, insights = insights.len(), "stored reflection");
        Ok(Reflection {
            id,
            agent_id,
            insights,
            source_memories: source_ids,
            importance: REFLECTION_IMPORTANCE,
            timestamp,
        })
    }

    /// Most recent reflections first.
    pub async fn get_reflections(&self, agent_id: AgentId, limit: usize) -> Result<Vec<Reflection>> {
        let rows = self
            .index
            .query(&IndexQuery::for_agent(agent_id).kind(MemoryKind::Reflection).limit(limit))
            .await?;

        let mut reflections = Vec::with_capacity(rows.len());
        for row in rows {
            let Some(loc) = &row.storage_location else {
                continue;
            };
            let point = match self.vectors.retrieve(&loc.collection, &loc.point_id).await {
                Ok(Some(p)) => p,
                Ok(None) => continue,
                Err(e) => {
                    warn!(id = %row.id, error = %e, "failed to retrieve reflection");
                    continue;
                }
            };
            reflections.push(reflection_from_payload(&row, &point.payload));
        }
        Ok(reflections)
    }

    /// Delete a reflection's point and index row.
    pub async fn delete_reflection(&self, id: MemoryId) -> Result<()> {
        let entry = self
            .index
            .get(id)
            .await?
            .filter(|e| e.kind == MemoryKind::Reflection)
            .ok_or_else(|| MnemoError::not_found("reflection", id))?;
        crate::episodic::delete_entry(
            self.vectors.as_ref(),
            self.index.as_ref(),
            &entry,
            &self.config.collection,
        )
        .await
    }
}

fn reflection_from_payload(row: &IndexEntry, payload: &Metadata) -> Reflection {
    let strings = |key: &str| -> Vec<String> {
        payload
            .get(key)
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(Value::as_str).map(String::from).collect())
            .unwrap_or_default()
    };
    let timestamp = payload
        .get("timestamp")
        .and_then(Value::as_str)
        .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or(row.created_at);
    Reflection {
        id: row.id,
        agent_id: row.agent_id,
        insights: strings("insights"),
        source_memories: strings("source_memory_ids")
            .iter()
            .filter_map(|s| Uuid::parse_str(s).ok())
            .collect(),
        importance: row.importance.unwrap_or(REFLECTION_IMPORTANCE),
        timestamp,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_insights_numbered_only() {
        let text = "Here are the insights:\n1. The user prefers Rust.\n  2.   Deploys happen on Fridays.\n- not numbered\n3.\n10. Tenth insight";
        assert_eq!(
            parse_insights(text),
            vec!["The user prefers Rust.", "Deploys happen on Fridays.", "Tenth insight"]
        );
    }

    #[test]
    fn test_parse_insights_rejects_non_list_numbers() {
        assert!(parse_insights("2024 was a good year\n3) wrong style").is_empty());
    }
}
