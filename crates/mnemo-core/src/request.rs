//! Inbound request shapes and their validation.
//!
//! Everything here is checked before any engine is called; a request that
//! passes `validate` is turned into a typed value the engines can trust.

use serde::{Deserialize, Serialize};

use crate::error::{MnemoError, Result};
use crate::types::{AgentId, EventType, MemoryKind, Metadata, SessionId, TimeRange};

pub const MAX_CONTENT_CHARS: usize = 10_000;
pub const MAX_QUERY_LIMIT: usize = 1_000;
pub const DEFAULT_QUERY_LIMIT: usize = 10;
pub const MAX_QUERY_OFFSET: usize = 100_000;
pub const MAX_RAG_TOP_K: usize = 100;

/// A request to store one memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryInput {
    pub agent_id: AgentId,
    #[serde(rename = "type")]
    pub kind: MemoryKind,
    pub content: String,
    #[serde(default)]
    pub session_id: Option<SessionId>,
    #[serde(default)]
    pub event_type: Option<EventType>,
    #[serde(default)]
    pub importance: Option<u8>,
    #[serde(default)]
    pub metadata: Option<Metadata>,
}

/// A validated write, one variant per tier that accepts direct writes.
#[derive(Debug, Clone, PartialEq)]
pub enum MemoryWrite {
    Stm {
        agent_id: AgentId,
        session_id: SessionId,
        content: String,
    },
    Episodic {
        agent_id: AgentId,
        content: String,
        event_type: EventType,
        importance: Option<u8>,
        context: Metadata,
    },
    Semantic {
        agent_id: AgentId,
        content: String,
        source: String,
        category: Option<String>,
        metadata: Metadata,
    },
}

impl MemoryWrite {
    pub fn agent_id(&self) -> AgentId {
        match self {
            MemoryWrite::Stm { agent_id, .. }
            | MemoryWrite::Episodic { agent_id, .. }
            | MemoryWrite::Semantic { agent_id, .. } => *agent_id,
        }
    }

    pub fn kind(&self) -> MemoryKind {
        match self {
            MemoryWrite::Stm { .. } => MemoryKind::Stm,
            MemoryWrite::Episodic { .. } => MemoryKind::Episodic,
            MemoryWrite::Semantic { .. } => MemoryKind::Semantic,
        }
    }

    pub fn content(&self) -> &str {
        match self {
            MemoryWrite::Stm { content, .. }
            | MemoryWrite::Episodic { content, .. }
            | MemoryWrite::Semantic { content, .. } => content,
        }
    }
}

impl MemoryInput {
    pub fn validate(self) -> Result<MemoryWrite> {
        let chars = self.content.chars().count();
        if chars == 0 {
            return Err(MnemoError::validation("content", "must not be empty"));
        }
        if chars > MAX_CONTENT_CHARS {
            return Err(MnemoError::validation(
                "content",
                format!("must be at most {MAX_CONTENT_CHARS} characters, got {chars}"),
            ));
        }
        if let Some(importance) = self.importance {
            if !(1..=10).contains(&importance) {
                return Err(MnemoError::validation(
                    "importance",
                    format!("must be within 1..=10, got {importance}"),
                ));
            }
        }

        let metadata = self.metadata.unwrap_or_default();
        match self.kind {
            MemoryKind::Stm => {
                let session_id = self.session_id.ok_or_else(|| {
                    MnemoError::validation("session_id", "required for stm memories")
                })?;
                Ok(MemoryWrite::Stm {
                    agent_id: self.agent_id,
                    session_id,
                    content: self.content,
                })
            }
            MemoryKind::Episodic => Ok(MemoryWrite::Episodic {
                agent_id: self.agent_id,
                content: self.content,
                event_type: self.event_type.unwrap_or_default(),
                importance: self.importance,
                context: metadata,
            }),
            MemoryKind::Semantic => {
                let source = metadata
                    .get("source")
                    .and_then(|v| v.as_str())
                    .unwrap_or("user")
                    .to_string();
                let category = metadata
                    .get("category")
                    .and_then(|v| v.as_str())
                    .map(str::to_string);
                Ok(MemoryWrite::Semantic {
                    agent_id: self.agent_id,
                    content: self.content,
                    source,
                    category,
                    metadata,
                })
            }
            MemoryKind::Reflection => Err(MnemoError::validation(
                "type",
                "reflections are produced by the reflection engine and cannot be written directly",
            )),
        }
    }
}

/// A request to list memories.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryQuery {
    pub agent_id: AgentId,
    #[serde(default, rename = "type")]
    pub kind: Option<MemoryKind>,
    #[serde(default)]
    pub session_id: Option<SessionId>,
    #[serde(default)]
    pub time_range: Option<TimeRange>,
    #[serde(default)]
    pub min_importance: Option<u8>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: Option<usize>,
}

impl MemoryQuery {
    pub fn for_agent(agent_id: AgentId) -> Self {
        Self {
            agent_id,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(limit) = self.limit {
            if !(1..=MAX_QUERY_LIMIT).contains(&limit) {
                return Err(MnemoError::validation(
                    "limit",
                    format!("must be within 1..={MAX_QUERY_LIMIT}, got {limit}"),
                ));
            }
        }
        if let Some(offset) = self.offset {
            if offset > MAX_QUERY_OFFSET {
                return Err(MnemoError::validation(
                    "offset",
                    format!("must be at most {MAX_QUERY_OFFSET}, got {offset}"),
                ));
            }
        }
        if let Some(importance) = self.min_importance {
            if !(1..=10).contains(&importance) {
                return Err(MnemoError::validation(
                    "min_importance",
                    format!("must be within 1..=10, got {importance}"),
                ));
            }
        }
        if let Some(range) = &self.time_range {
            if range.start > range.end {
                return Err(MnemoError::validation(
                    "time_range",
                    "start must not be after end",
                ));
            }
        }
        Ok(())
    }

    pub fn limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_QUERY_LIMIT)
    }

    pub fn offset(&self) -> usize {
        self.offset.unwrap_or(0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RagMode {
    #[default]
    Standard,
    Agentic,
}

impl RagMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RagMode::Standard => "standard",
            RagMode::Agentic => "agentic",
        }
    }
}

/// A retrieval-augmented generation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagQuery {
    pub query: String,
    pub agent_id: AgentId,
    #[serde(default)]
    pub top_k: Option<usize>,
    #[serde(default)]
    pub mode: RagMode,
}

impl RagQuery {
    pub fn new(agent_id: AgentId, query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            agent_id,
            top_k: None,
            mode: RagMode::Standard,
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = Some(top_k);
        self
    }

    pub fn with_mode(mut self, mode: RagMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn validate(&self) -> Result<()> {
        let chars = self.query.trim().chars().count();
        if chars == 0 {
            return Err(MnemoError::validation("query", "must not be empty"));
        }
        if chars > MAX_CONTENT_CHARS {
            return Err(MnemoError::validation(
                "query",
                format!("must be at most {MAX_CONTENT_CHARS} characters"),
            ));
        }
        if let Some(k) = self.top_k {
            if !(1..=MAX_RAG_TOP_K).contains(&k) {
                return Err(MnemoError::validation(
                    "top_k",
                    format!("must be within 1..={MAX_RAG_TOP_K}, got {k}"),
                ));
            }
        }
        Ok(())
    }
}
