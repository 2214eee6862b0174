use chrono::{DateTime, Utc};
use mnemo_config::schema::EpisodicConfig;
use mnemo_core::*;
use mnemo_llm::EmbeddingProvider;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::scoring::{CompositeWeights, ImportanceScorer, importance_score, recency_score};

/// A timestamped event to record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodicEvent {
    pub agent_id: AgentId,
    pub content: String,
    #[serde(default)]
    pub event_type: EventType,
    #[serde(default)]
    pub context: Metadata,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl EpisodicEvent {
    pub fn new(agent_id: AgentId, content: impl Into<String>, event_type: EventType) -> Self {
        Self {
            agent_id,
            content: content.into(),
            event_type,
            context: Metadata::new(),
            timestamp: None,
        }
    }

    pub fn with_context(mut self, context: Metadata) -> Self {
        self.context = context;
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

/// Result of recording an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordedEvent {
    pub id: MemoryId,
    pub importance: u8,
}

/// Composite-ranked episodic retrieval.
#[derive(Debug, Clone, Default)]
pub struct EpisodicQuery {
    pub agent_id: AgentId,
    pub query_text: Option<String>,
    pub time_range: Option<TimeRange>,
    pub min_importance: Option<u8>,
    pub top_k: Option<usize>,
    pub weights: Option<CompositeWeights>,
}

impl EpisodicQuery {
    pub fn for_agent(agent_id: AgentId) -> Self {
        Self {
            agent_id,
            ..Default::default()
        }
    }

    pub fn text(mut self, query: impl Into<String>) -> Self {
        self.query_text = Some(query.into());
        self
    }

    pub fn top_k(mut self, top_k: usize) -> Self {
        self.top_k = Some(top_k);
        self
    }
}

/// A retrieved episode with its score breakdown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Episode {
    pub id: MemoryId,
    pub content: String,
    pub importance: u8,
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub context: Metadata,
    pub scores: ScoreBreakdown,
}

impl From<Episode> for SearchResult {
    fn from(e: Episode) -> Self {
        let mut metadata = Metadata::new();
        metadata.insert("type".into(), json!(MemoryKind::Episodic.as_str()));
        metadata.insert("event_type".into(), json!(e.event_type.as_str()));
        metadata.insert("importance".into(), json!(e.importance));
        if !e.context.is_empty() {
            metadata.insert("context".into(), Value::Object(e.context));
        }
        SearchResult {
            id: e.id.to_string(),
            content: e.content,
            score: e.scores.composite,
            metadata,
            timestamp: e.timestamp,
            source: ResultSource::Vector,
            scores: Some(e.scores),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EpisodicStats {
    pub total_memories: usize,
    pub by_event_type: BTreeMap<String, usize>,
    pub average_importance: f64,
    pub oldest_memory: Option<DateTime<Utc>>,
    pub newest_memory: Option<DateTime<Utc>>,
}

/// The payload fields of an episodic point.
struct EpisodePayload {
    content: String,
    event_type: EventType,
    importance: u8,
    timestamp: DateTime<Utc>,
    context: Metadata,
}

impl EpisodePayload {
    fn parse(payload: &Metadata) -> Option<Self> {
        let content = payload.get("content")?.as_str()?.to_string();
        let timestamp = payload
            .get("timestamp")
            .and_then(Value::as_str)
            .and_then(|t| DateTime::parse_from_rfc3339(t).ok())?
            .with_timezone(&Utc);
        Some(Self {
            content,
            event_type: payload
                .get("event_type")
                .and_then(Value::as_str)
                .and_then(|t| t.parse().ok())
                .unwrap_or_default(),
            importance: payload
                .get("importance")
                .and_then(Value::as_u64)
                .map(|i| i.min(10) as u8)
                .unwrap_or(5),
            timestamp,
            context: payload
                .get("context")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default(),
        })
    }
}

/// Records timestamped events and retrieves them by a weighted blend of
/// recency, importance and similarity to a query.
pub struct EpisodicEngine {
    vectors: Arc<dyn VectorStore>,
    index: Arc<dyn MemoryIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    scorer: Arc<dyn ImportanceScorer>,
    config: EpisodicConfig,
}

impl EpisodicEngine {
    pub fn new(
        vectors: Arc<dyn VectorStore>,
        index: Arc<dyn MemoryIndex>,
        embedder: Arc<dyn EmbeddingProvider>,
        scorer: Arc<dyn ImportanceScorer>,
        config: EpisodicConfig,
    ) -> Self {
        Self {
            vectors,
            index,
            embedder,
            scorer,
            config,
        }
    }

    pub fn collection(&self) -> &str {
        &self.config.collection
    }

    /// Score, embed and store an event. The vector point is written before
    /// the index row so a row never points at a missing point.
    pub async fn record_event(&self, event: EpisodicEvent) -> Result<RecordedEvent> {
        let id = Uuid::new_v4();
        let timestamp = event.timestamp.unwrap_or_else(Utc::now);
        let importance = self.scorer.score(&event);
        let vector = self.embedder.embed_one(&event.content).await?;

        let mut payload = Metadata::new();
        payload.insert("agent_id".into(), json!(event.agent_id.to_string()));
        payload.insert("content".into(), json!(event.content));
        payload.insert("event_type".into(), json!(event.event_type.as_str()));
        payload.insert("importance".into(), json!(importance));
        payload.insert("timestamp".into(), json!(timestamp.to_rfc3339()));
        payload.insert("timestamp_ms".into(), json!(timestamp.timestamp_millis()));
        payload.insert("context".into(), Value::Object(event.context.clone()));

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

        let mut entry = IndexEntry::new(event.agent_id, MemoryKind::Episodic);
        entry.id = id;
        entry.storage_location = Some(StorageLocation::new(&self.config.collection, id));
        entry.importance = Some(importance);
        entry.created_at = timestamp;
        entry.metadata.insert("event_type".into(), json!(event.event_type.as_str()));
        entry.metadata.insert("context".into(), Value::Object(event.context));
        self.index.insert(&entry).await?;

        info!(
            id = %id,
            agent_id = %event.agent_id,
            event_type = %event.event_type,
            importance,
            "recorded episodic event"
        );
        Ok(RecordedEvent { id, importance })
    }

    /// Top-k episodes by composite score, ties broken newest first.
    pub async fn retrieve_episodes(&self, query: &EpisodicQuery) -> Result<Vec<Episode>> {
        let top_k = query.top_k.unwrap_or(self.config.top_k);
        if top_k == 0 {
            return Ok(vec![]);
        }
        let weights = query
            .weights
            .unwrap_or_else(|| self.config.weights.into())
            .sanitized();
        let candidates = top_k.saturating_mul(self.config.candidate_multiplier.max(1));

        let hits = match query.query_text.as_deref().filter(|t| !t.trim().is_empty()) {
            Some(text) => {
                let vector = self.embedder.embed_one(text).await?;
                self.vectors
                    .search(&self.config.collection, &vector, candidates, &self.filter_for(query), None)
                    .await?
            }
            None => self.recent_points(query, candidates).await?,
        };

        let now = Utc::now();
        let mut episodes: Vec<Episode> = hits
            .into_iter()
            .filter_map(|hit| {
                let Ok(id) = Uuid::parse_str(&hit.id) else {
                    warn!(point_id = %hit.id, "skipping episodic point with non-uuid id");
                    return None;
                };
                let Some(p) = EpisodePayload::parse(&hit.payload) else {
                    warn!(id = %id, "skipping episodic point with malformed payload");
                    return None;
                };
                let age_days = (now - p.timestamp).num_milliseconds() as f64 / 86_400_000.0;
                let scores = weights.score(
                    recency_score(age_days, self.config.recency_half_life_days),
                    importance_score(p.importance),
                    hit.score.clamp(0.0, 1.0),
                );
                Some(Episode {
                    id,
                    content: p.content,
                    importance: p.importance,
                    event_type: p.event_type,
                    timestamp: p.timestamp,
                    context: p.context,
                    scores,
                })
            })
            .collect();

        episodes.sort_by(|a, b| {
            b.scores
                .composite
                .partial_cmp(&a.scores.composite)
                .unwrap_or(Ordering::Equal)
                .then_with(|| b.timestamp.cmp(&a.timestamp))
                .then_with(|| a.id.cmp(&b.id))
        });
        episodes.truncate(top_k);

        debug!(
            agent_id = %query.agent_id,
            with_query = query.query_text.is_some(),
            returned = episodes.len(),
            "retrieved episodes"
        );
        Ok(episodes)
    }

    fn filter_for(&self, query: &EpisodicQuery) -> VectorFilter {
        let mut filter = VectorFilter::new().must_match("agent_id", query.agent_id.to_string());
        if let Some(min) = query.min_importance {
            filter = filter.range("importance", Some(f64::from(min)), None);
        }
        if let Some(range) = query.time_range {
            filter = filter.range(
                "timestamp_ms",
                Some(range.start.timestamp_millis() as f64),
                Some(range.end.timestamp_millis() as f64),
            );
        }
        filter
    }

    /// Without a query, candidates are the newest rows with relevance 1.0.
    async fn recent_points(&self, query: &EpisodicQuery, limit: usize) -> Result<Vec<ScoredPoint>> {
        let rows = self
            .index
            .query(
                &IndexQuery::for_agent(query.agent_id)
                    .kind(MemoryKind::Episodic)
                    .within(query.time_range.as_ref())
                    .min_importance(query.min_importance)
                    .limit(limit),
            )
            .await?;

        let mut points = Vec::with_capacity(rows.len());
        for row in rows {
            match self.load_point(&row).await {
                Ok(Some(point)) => points.push(ScoredPoint {
                    id: point.id,
                    score: 1.0,
                    payload: point.payload,
                }),
                Ok(None) => warn!(id = %row.id, "index row has no vector point"),
                Err(e) => warn!(id = %row.id, error = %e, "failed to load episodic point"),
            }
        }
        Ok(points)
    }

    async fn load_point(&self, row: &IndexEntry) -> Result<Option<Point>> {
        let (collection, point_id) = match &row.storage_location {
            Some(loc) => (loc.collection.clone(), loc.point_id.clone()),
            None => (self.config.collection.clone(), row.id.to_string()),
        };
        self.vectors.retrieve(&collection, &point_id).await
    }

    /// Index row joined with its stored content and vector.
    pub async fn get_memory(&self, id: MemoryId) -> Result<Option<MemoryRecord>> {
        let Some(entry) = self.index.get(id).await? else {
            return Ok(None);
        };
        if entry.kind != MemoryKind::Episodic {
            return Ok(None);
        }
        let point = self.load_point(&entry).await?;
        let (content, embedding) = match point {
            Some(p) => (
                p.payload
                    .get("content")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                Some(p.vector),
            ),
            None => (String::new(), None),
        };
        Ok(Some(MemoryRecord {
            entry,
            content,
            embedding,
        }))
    }

    pub async fn track_access(&self, id: MemoryId) -> Result<()> {
        self.index.track_access(id, Utc::now()).await?;
        debug!(id = %id, "tracked memory access");
        Ok(())
    }

    /// Delete the vector point, then the index row.
    pub async fn delete_memory(&self, id: MemoryId) -> Result<()> {
        let entry = self
            .index
            .get(id)
            .await?
            .filter(|e| e.kind == MemoryKind::Episodic)
            .ok_or_else(|| MnemoError::not_found("episodic memory", id))?;
        delete_entry(self.vectors.as_ref(), self.index.as_ref(), &entry, &self.config.collection).await?;
        info!(id = %id, "deleted episodic memory");
        Ok(())
    }

    pub async fn get_stats(&self, agent_id: AgentId) -> Result<EpisodicStats> {
        let rows = self
            .index
            .query(
                &IndexQuery::for_agent(agent_id)
                    .kind(MemoryKind::Episodic)
                    .order(IndexOrder::CreatedAsc),
            )
            .await?;

        let mut stats = EpisodicStats {
            total_memories: rows.len(),
            oldest_memory: rows.first().map(|r| r.created_at),
            newest_memory: rows.last().map(|r| r.created_at),
            ..Default::default()
        };
        let mut total_importance = 0u64;
        for row in &rows {
            let event_type = row
                .metadata
                .get("event_type")
                .and_then(Value::as_str)
                .unwrap_or("unknown");
            *stats.by_event_type.entry(event_type.to_string()).or_default() += 1;
            total_importance += u64::from(row.importance.unwrap_or(0));
        }
        if !rows.is_empty() {
            stats.average_importance = total_importance as f64 / rows.len() as f64;
        }
        Ok(stats)
    }
}

/// Remove a memory's vector point, then its index row.
pub async fn delete_entry(
    vectors: &dyn VectorStore,
    index: &dyn MemoryIndex,
    entry: &IndexEntry,
    default_collection: &str,
) -> Result<()> {
    match &entry.storage_location {
        Some(loc) => vectors.delete(&loc.collection, &loc.point_id).await?,
        None => vectors.delete(default_collection, &entry.id.to_string()).await?,
    }
    index.delete(entry.id).await?;
    Ok(())
}
