use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::MnemoError;

/// Unique identifier for an agent.
pub type AgentId = Uuid;

/// Unique identifier for a conversation session.
pub type SessionId = Uuid;

/// Unique identifier for a stored memory.
pub type MemoryId = Uuid;

/// Free-form JSON object attached to memories and graph elements.
pub type Metadata = Map<String, Value>;

// ── Memory tiers ───────────────────────────────────────────────

/// The four memory tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryKind {
    Stm,
    Episodic,
    Semantic,
    Reflection,
}

impl MemoryKind {
    pub const ALL: [MemoryKind; 4] = [
        MemoryKind::Stm,
        MemoryKind::Episodic,
        MemoryKind::Semantic,
        MemoryKind::Reflection,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryKind::Stm => "stm",
            MemoryKind::Episodic => "episodic",
            MemoryKind::Semantic => "semantic",
            MemoryKind::Reflection => "reflection",
        }
    }
}

impl fmt::Display for MemoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MemoryKind {
    type Err = MnemoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "stm" => Ok(MemoryKind::Stm),
            "episodic" => Ok(MemoryKind::Episodic),
            "semantic" => Ok(MemoryKind::Semantic),
            "reflection" => Ok(MemoryKind::Reflection),
            other => Err(MnemoError::validation(
                "type",
                format!("unknown memory type '{other}'"),
            )),
        }
    }
}

/// Kind of episodic event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    #[default]
    Observation,
    Action,
    Interaction,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Observation => "observation",
            EventType::Action => "action",
            EventType::Interaction => "interaction",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = MnemoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "observation" => Ok(EventType::Observation),
            "action" => Ok(EventType::Action),
            "interaction" => Ok(EventType::Interaction),
            other => Err(MnemoError::validation(
                "event_type",
                format!("unknown event type '{other}'"),
            )),
        }
    }
}

// ── Index rows & hydrated records ──────────────────────────────

/// Pointer from an index row to its vector-store entry.
///
/// Rendered as `vector:{collection}:{point_id}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageLocation {
    pub collection: String,
    pub point_id: String,
}

impl StorageLocation {
    pub fn new(collection: impl Into<String>, point_id: impl fmt::Display) -> Self {
        Self {
            collection: collection.into(),
            point_id: point_id.to_string(),
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let rest = raw.strip_prefix("vector:")?;
        let (collection, point_id) = rest.split_once(':')?;
        if collection.is_empty() || point_id.is_empty() {
            return None;
        }
        Some(Self::new(collection, point_id))
    }
}

impl fmt::Display for StorageLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "vector:{}:{}", self.collection, self.point_id)
    }
}

/// A row of the relational memory index.
///
/// Content lives in the vector store; `storage_location` is the only link to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    pub id: MemoryId,
    pub agent_id: AgentId,
    pub kind: MemoryKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_location: Option<StorageLocation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub importance: Option<u8>,
    #[serde(default)]
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accessed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub access_count: u32,
}

impl IndexEntry {
    pub fn new(agent_id: AgentId, kind: MemoryKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            agent_id,
            kind,
            session_id: None,
            storage_location: None,
            importance: None,
            metadata: Metadata::new(),
            created_at: Utc::now(),
            accessed_at: None,
            access_count: 0,
        }
    }
}

/// An index row joined with its stored content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    #[serde(flatten)]
    pub entry: IndexEntry,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

/// A conversation session owning an STM window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub agent_id: AgentId,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Session {
    pub fn new(agent_id: AgentId) -> Self {
        Self {
            id: Uuid::new_v4(),
            agent_id,
            created_at: Utc::now(),
            ended_at: None,
            metadata: Metadata::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.ended_at.is_none()
    }
}

/// Inclusive time window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, at: &DateTime<Utc>) -> bool {
        *at >= self.start && *at <= self.end
    }
}

// ── Retrieval results ──────────────────────────────────────────

/// Where a search result came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultSource {
    #[default]
    Vector,
    Graph,
}

/// Per-signal scores behind an episodic composite ranking.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub recency: f32,
    pub importance: f32,
    pub relevance: f32,
    pub composite: f32,
}

/// A ranked memory returned by any retriever.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: String,
    pub content: String,
    pub score: f32,
    #[serde(default)]
    pub metadata: Metadata,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub source: ResultSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scores: Option<ScoreBreakdown>,
}

// ── Knowledge graph ────────────────────────────────────────────

/// A knowledge-graph node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    #[serde(default)]
    pub properties: Metadata,
}

impl Entity {
    pub fn new(id: impl Into<String>, entity_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            entity_type: entity_type.into(),
            properties: Metadata::new(),
        }
    }

    pub fn with_property(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.properties.insert(key.to_string(), value.into());
        self
    }
}

/// A directed, typed knowledge-graph edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    pub from: String,
    pub to: String,
    #[serde(rename = "type")]
    pub relation_type: String,
    #[serde(default)]
    pub properties: Metadata,
}

impl Relation {
    pub fn new(
        from: impl Into<String>,
        relation_type: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            relation_type: relation_type.into(),
            properties: Metadata::new(),
        }
    }

    /// Identity used for deduplication: `from-type-to`.
    pub fn key(&self) -> String {
        format!("{}-{}-{}", self.from, self.relation_type, self.to)
    }
}

/// A subject-predicate-object triple.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fact {
    pub subject: String,
    pub predicate: String,
    pub object: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// An ordered walk through the graph: `nodes[i] -relations[i]- nodes[i+1]`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphPath {
    pub nodes: Vec<Entity>,
    pub relations: Vec<Relation>,
}

/// Flattened, deduplicated node/edge sets.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Subgraph {
    pub nodes: Vec<Entity>,
    pub edges: Vec<Relation>,
}

// ── Reflections ────────────────────────────────────────────────

/// An LLM-synthesised insight set derived from episodic memories.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reflection {
    pub id: MemoryId,
    pub agent_id: AgentId,
    pub insights: Vec<String>,
    pub source_memories: Vec<MemoryId>,
    pub importance: u8,
    pub timestamp: DateTime<Utc>,
}

// ── Per-agent configuration ────────────────────────────────────

/// Configuration persisted per agent in the relational index.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub reflection_threshold: Option<i64>,
    pub filter_rules: Vec<crate::policy::FilterRule>,
    pub forgetting_policy: Option<crate::policy::ForgettingPolicy>,
}
