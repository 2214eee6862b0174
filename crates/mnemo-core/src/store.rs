//! Contracts of the storage collaborators the engines are built on.
//!
//! The engines only ever talk to these traits. `mnemo-store` ships local
//! implementations; hosted backends plug in behind the same calls.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::error::Result;
use crate::types::*;

// ── Vector store ───────────────────────────────────────────────

/// A stored vector with its JSON payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Point {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: Metadata,
}

/// A search hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredPoint {
    pub id: String,
    pub score: f32,
    pub payload: Metadata,
}

/// A single payload condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Condition {
    /// Payload field equals `value`.
    Match { key: String, value: Value },
    /// Numeric payload field within the bounds (inclusive).
    Range {
        key: String,
        gte: Option<f64>,
        lte: Option<f64>,
    },
}

impl Condition {
    pub fn matches(&self, payload: &Metadata) -> bool {
        match self {
            Condition::Match { key, value } => payload.get(key) == Some(value),
            Condition::Range { key, gte, lte } => {
                let Some(v) = payload.get(key).and_then(Value::as_f64) else {
                    return false;
                };
                gte.is_none_or(|lo| v >= lo) && lte.is_none_or(|hi| v <= hi)
            }
        }
    }
}

/// Conjunction of payload conditions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VectorFilter {
    pub must: Vec<Condition>,
}

impl VectorFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn must_match(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.must.push(Condition::Match {
            key: key.to_string(),
            value: value.into(),
        });
        self
    }

    pub fn range(mut self, key: &str, gte: Option<f64>, lte: Option<f64>) -> Self {
        self.must.push(Condition::Range {
            key: key.to_string(),
            gte,
            lte,
        });
        self
    }

    /// Append all conditions from `other`.
    pub fn and(mut self, other: VectorFilter) -> Self {
        self.must.extend(other.must);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.must.is_empty()
    }

    pub fn matches(&self, payload: &Metadata) -> bool {
        self.must.iter().all(|c| c.matches(payload))
    }
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert or replace a point.
    async fn upsert(&self, collection: &str, point: Point) -> Result<()>;

    /// Nearest neighbours by cosine similarity, best first.
    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
        filter: &VectorFilter,
        score_threshold: Option<f32>,
    ) -> Result<Vec<ScoredPoint>>;

    /// Fetch a single point by id.
    async fn retrieve(&self, collection: &str, id: &str) -> Result<Option<Point>>;

    /// Delete a point. Deleting a missing point is not an error.
    async fn delete(&self, collection: &str, id: &str) -> Result<()>;

    /// Count points matching the filter.
    async fn count(&self, collection: &str, filter: &VectorFilter) -> Result<usize>;
}

// ── Graph store ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Outgoing,
    Incoming,
    Both,
}

/// Structured entity lookup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntityQuery {
    pub entity_type: Option<String>,
    /// Every listed property must equal the entity's value.
    #[serde(default)]
    pub properties: Metadata,
    /// Only entities touching at least one relation of this type.
    pub relation_type: Option<String>,
    pub limit: Option<usize>,
}

#[async_trait]
pub trait GraphStore: Send + Sync {
    async fn create_entity(&self, entity: &Entity) -> Result<()>;
    async fn get_entity(&self, id: &str) -> Result<Option<Entity>>;
    /// Merge `properties` into the entity's existing properties.
    async fn update_entity(&self, id: &str, properties: &Metadata) -> Result<Entity>;
    /// Removes the node only; relations are left to the store's own rules.
    async fn delete_entity(&self, id: &str) -> Result<bool>;

    async fn create_relation(&self, relation: &Relation) -> Result<()>;
    async fn delete_relation(&self, from: &str, relation_type: &str, to: &str) -> Result<bool>;

    async fn store_fact(&self, fact: &Fact) -> Result<()>;

    async fn find_entities(&self, query: &EntityQuery) -> Result<Vec<Entity>>;

    /// One path per entity reachable from `start` within `depth` hops.
    async fn traverse(&self, start: &str, depth: usize) -> Result<Vec<GraphPath>>;

    /// Paths from `from` to `to` no longer than `max_depth` hops, shortest first.
    async fn find_paths(&self, from: &str, to: &str, max_depth: usize) -> Result<Vec<GraphPath>>;

    /// Direct neighbours with the connecting relation.
    async fn related(
        &self,
        id: &str,
        relation_type: Option<&str>,
        direction: Direction,
    ) -> Result<Vec<(Relation, Entity)>>;

    /// Run a backend-native read query.
    async fn execute(&self, query: &str, params: &Metadata) -> Result<Vec<Metadata>>;
}

// ── Relational index ───────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexOrder {
    #[default]
    CreatedDesc,
    CreatedAsc,
    ImportanceDesc,
}

/// Filter for index row listing. Unset fields do not constrain.
#[derive(Debug, Clone, Default)]
pub struct IndexQuery {
    pub agent_id: Option<AgentId>,
    pub kind: Option<MemoryKind>,
    pub session_id: Option<SessionId>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    pub min_importance: Option<u8>,
    /// Importance strictly below this value.
    pub importance_below: Option<f64>,
    /// Last access before this instant, or never accessed and created before it.
    pub idle_since: Option<DateTime<Utc>>,
    pub order: IndexOrder,
    pub limit: Option<usize>,
}

impl IndexQuery {
    pub fn for_agent(agent_id: AgentId) -> Self {
        Self {
            agent_id: Some(agent_id),
            ..Default::default()
        }
    }

    pub fn kind(mut self, kind: MemoryKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn within(mut self, range: Option<&TimeRange>) -> Self {
        if let Some(r) = range {
            self.created_after = Some(r.start);
            self.created_before = Some(r.end);
        }
        self
    }

    pub fn min_importance(mut self, importance: Option<u8>) -> Self {
        self.min_importance = importance;
        self
    }

    pub fn order(mut self, order: IndexOrder) -> Self {
        self.order = order;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

#[async_trait]
pub trait MemoryIndex: Send + Sync {
    async fn insert(&self, entry: &IndexEntry) -> Result<()>;
    async fn get(&self, id: MemoryId) -> Result<Option<IndexEntry>>;
    async fn query(&self, query: &IndexQuery) -> Result<Vec<IndexEntry>>;
    async fn delete(&self, id: MemoryId) -> Result<bool>;

    /// Increment `access_count` and set `accessed_at`.
    async fn track_access(&self, id: MemoryId, at: DateTime<Utc>) -> Result<()>;

    /// Copy a row (and its content, when known) into the archive before deletion.
    async fn archive(&self, entry: &IndexEntry, content: Option<&str>) -> Result<()>;

    /// Agents that have persisted configuration.
    async fn configured_agents(&self) -> Result<Vec<AgentId>>;
    async fn agent_config(&self, agent_id: AgentId) -> Result<AgentConfig>;
    async fn save_agent_config(&self, agent_id: AgentId, config: &AgentConfig) -> Result<()>;

    async fn create_session(&self, session: &Session) -> Result<()>;
    async fn get_session(&self, id: SessionId) -> Result<Option<Session>>;
    async fn end_session(&self, id: SessionId, at: DateTime<Utc>) -> Result<bool>;
}

// ── Cache ──────────────────────────────────────────────────────

/// Key-value cache with atomic list and counter primitives.
///
/// List indices follow Redis: negative values count from the tail.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;
    /// Set only when the key does not exist. Returns whether it was set.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<bool>;
    async fn del(&self, key: &str) -> Result<bool>;
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Atomically add `delta` (may be negative) and return the new value.
    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64>;

    /// Append to a list and return its new length.
    async fn rpush(&self, key: &str, value: &str) -> Result<usize>;
    /// Keep only the elements in `start..=stop`.
    async fn ltrim(&self, key: &str, start: isize, stop: isize) -> Result<()>;
    async fn lrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>>;
    async fn llen(&self, key: &str) -> Result<usize>;

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool>;
    /// Remaining time to live; `None` for missing keys or keys without expiry.
    async fn ttl(&self, key: &str) -> Result<Option<Duration>>;
    async fn keys(&self, prefix: &str) -> Result<Vec<String>>;
}
