use chrono::Utc;
use mnemo_core::*;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::episodic::{EpisodicEngine, EpisodicEvent, EpisodicQuery};
use crate::reflection::{ReflectionContext, ReflectionEngine};
use crate::semantic::SemanticEngine;
use crate::stm::StmEngine;
use crate::worker::ReflectionWorker;

/// Outcome of a successful write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMemory {
    /// Memory id, or `stm:{session}:{millis}` for short-term writes.
    pub id: String,
    pub kind: MemoryKind,
    #[serde(default)]
    pub flagged: bool,
}

/// Write and read coordinator over the memory engines.
///
/// Every write is validated, checked against the agent's filter rules, and
/// dispatched to the engine for its tier. Episodic writes also feed the
/// reflection accumulator; crossing the threshold queues a reflection on the
/// worker without waiting for it.
pub struct MemoryService {
    stm: Arc<StmEngine>,
    episodic: Arc<EpisodicEngine>,
    semantic: Arc<SemanticEngine>,
    reflection: Arc<ReflectionEngine>,
    index: Arc<dyn MemoryIndex>,
    worker: Option<ReflectionWorker>,
}

impl MemoryService {
    pub fn new(
        stm: Arc<StmEngine>,
        episodic: Arc<EpisodicEngine>,
        semantic: Arc<SemanticEngine>,
        reflection: Arc<ReflectionEngine>,
        index: Arc<dyn MemoryIndex>,
    ) -> Self {
        Self {
            stm,
            episodic,
            semantic,
            reflection,
            index,
            worker: None,
        }
    }

    /// Route threshold crossings to a background worker.
    pub fn with_worker(mut self, worker: ReflectionWorker) -> Self {
        self.worker = Some(worker);
        self
    }

    pub fn stm(&self) -> &StmEngine {
        &self.stm
    }

    pub fn episodic(&self) -> &EpisodicEngine {
        &self.episodic
    }

    pub fn semantic(&self) -> &SemanticEngine {
        &self.semantic
    }

    pub fn reflection(&self) -> &ReflectionEngine {
        &self.reflection
    }

    pub fn worker(&self) -> Option<&ReflectionWorker> {
        self.worker.as_ref()
    }

    // ── Writes ─────────────────────────────────────────────────

    pub async fn store_memory(&self, input: MemoryInput) -> Result<StoredMemory> {
        let requested_importance = input.importance;
        let write = input.validate()?;
        let agent_id = write.agent_id();
        let kind = write.kind();

        let flagged = self.check_filters(&write, requested_importance).await?;
        info!(agent_id = %agent_id, kind = %kind, flagged = !flagged.is_empty(), "storing memory");

        let id = match write {
            MemoryWrite::Stm {
                session_id,
                content,
                ..
            } => {
                self.stm.add(session_id, &content).await?;
                format!("stm:{session_id}:{}", Utc::now().timestamp_millis())
            }
            MemoryWrite::Episodic {
                agent_id,
                content,
                event_type,
                importance,
                mut context,
            } => {
                mark_flagged(&mut context, &flagged);
                let event = EpisodicEvent::new(agent_id, content, event_type).with_context(context);
                let recorded = self.episodic.record_event(event).await?;
                let weight = importance.unwrap_or(recorded.importance);
                self.accumulate(agent_id, i64::from(weight)).await;
                recorded.id.to_string()
            }
            MemoryWrite::Semantic {
                agent_id,
                content,
                source,
                category,
                mut metadata,
            } => {
                mark_flagged(&mut metadata, &flagged);
                self.semantic
                    .store_semantic_memory(agent_id, &content, &source, category.as_deref(), metadata)
                    .await?
                    .to_string()
            }
        };

        info!(id = %id, agent_id = %agent_id, kind = %kind, "memory stored");
        Ok(StoredMemory {
            id,
            kind,
            flagged: !flagged.is_empty(),
        })
    }

    /// Returns the flagging rules, or `Rejected` on the first matching reject rule.
    async fn check_filters(&self, write: &MemoryWrite, importance: Option<u8>) -> Result<Vec<FilterRule>> {
        let config = self.index.agent_config(write.agent_id()).await?;
        if config.filter_rules.is_empty() {
            return Ok(vec![]);
        }
        let empty = Metadata::new();
        let metadata = match write {
            MemoryWrite::Episodic { context, .. } => context,
            MemoryWrite::Semantic { metadata, .. } => metadata,
            MemoryWrite::Stm { .. } => &empty,
        };
        let subject = FilterSubject {
            content: write.content(),
            metadata,
            importance: importance.map(f64::from),
        };
        match evaluate_rules(&config.filter_rules, &subject) {
            FilterVerdict::Reject { rule } => {
                warn!(agent_id = %write.agent_id(), rule = %rule, "write rejected by filter");
                Err(MnemoError::Rejected {
                    rule: rule.to_string(),
                })
            }
            FilterVerdict::Accept { flagged } => Ok(flagged),
        }
    }

    /// Feed the reflection accumulator. Never fails the write.
    async fn accumulate(&self, agent_id: AgentId, importance: i64) {
        if let Err(e) = self.reflection.increment_accumulated(agent_id, importance).await {
            warn!(agent_id = %agent_id, error = %e, "failed to accumulate importance");
            return;
        }
        let should = match self.reflection.should_reflect(agent_id).await {
            Ok(should) => should,
            Err(e) => {
                warn!(agent_id = %agent_id, error = %e, "reflection check failed");
                return;
            }
        };
        if !should {
            return;
        }
        match &self.worker {
            Some(worker) => match worker.submit(agent_id, ReflectionContext::default()) {
                Ok(true) => info!(agent_id = %agent_id, "reflection queued"),
                Ok(false) => debug!(agent_id = %agent_id, "reflection already queued"),
                Err(e) => warn!(agent_id = %agent_id, error = %e, "could not queue reflection"),
            },
            None => debug!(agent_id = %agent_id, "reflection due but no worker attached"),
        }
    }

    // ── Reads ──────────────────────────────────────────────────

    pub async fn retrieve_memories(&self, query: &MemoryQuery) -> Result<Vec<SearchResult>> {
        query.validate()?;
        let offset = query.offset();
        let limit = query.limit();
        let wanted = offset.saturating_add(limit);
        let mut results: Vec<SearchResult> = Vec::new();

        let include = |kind: MemoryKind| query.kind.is_none_or(|k| k == kind);

        if include(MemoryKind::Episodic) {
            let episodes = self
                .episodic
                .retrieve_episodes(&EpisodicQuery {
                    agent_id: query.agent_id,
                    time_range: query.time_range,
                    min_importance: query.min_importance,
                    top_k: Some(wanted),
                    ..Default::default()
                })
                .await?;
            results.extend(episodes.into_iter().map(SearchResult::from));
        }

        if include(MemoryKind::Semantic) {
            results.extend(self.semantic.list_semantic_memories(query.agent_id, wanted).await?);
        }

        if include(MemoryKind::Reflection) {
            let reflections = self.reflection.get_reflections(query.agent_id, wanted).await?;
            results.extend(reflections.into_iter().map(|r| {
                let mut metadata = Metadata::new();
                metadata.insert("type".into(), json!(MemoryKind::Reflection.as_str()));
                metadata.insert("insights".into(), json!(r.insights));
                SearchResult {
                    id: r.id.to_string(),
                    content: r.insights.join(" "),
                    score: f32::from(r.importance) / 10.0,
                    metadata,
                    timestamp: r.timestamp,
                    source: ResultSource::Vector,
                    scores: None,
                }
            }));
        }

        if let Some(session_id) = query.session_id {
            if include(MemoryKind::Stm) {
                let now = Utc::now();
                let window = self.stm.get(session_id).await?;
                results.extend(window.into_iter().enumerate().map(|(i, content)| {
                    let mut metadata = Metadata::new();
                    metadata.insert("type".into(), json!(MemoryKind::Stm.as_str()));
                    metadata.insert("position".into(), Value::from(i));
                    SearchResult {
                        id: format!("stm:{session_id}:{i}"),
                        content,
                        score: 1.0,
                        metadata,
                        timestamp: now,
                        source: ResultSource::Vector,
                        scores: None,
                    }
                }));
            }
        }

        let page: Vec<SearchResult> = results.into_iter().skip(offset).take(limit).collect();
        debug!(agent_id = %query.agent_id, returned = page.len(), "memories retrieved");
        Ok(page)
    }

    pub async fn get_session_memories(&self, session_id: SessionId) -> Result<Vec<String>> {
        self.stm.get(session_id).await
    }

    // ── Lifecycle ──────────────────────────────────────────────

    pub async fn delete_memory(&self, id: MemoryId) -> Result<()> {
        let entry = self
            .index
            .get(id)
            .await?
            .ok_or_else(|| MnemoError::not_found("memory", id))?;
        match entry.kind {
            MemoryKind::Episodic => self.episodic.delete_memory(id).await?,
            MemoryKind::Semantic => self.semantic.delete_memory(id).await?,
            MemoryKind::Reflection => self.reflection.delete_reflection(id).await?,
            MemoryKind::Stm => {
                self.index.delete(id).await?;
            }
        }
        info!(id = %id, kind = %entry.kind, "memory deleted");
        Ok(())
    }

    pub async fn track_access(&self, id: MemoryId) -> Result<()> {
        self.index.track_access(id, Utc::now()).await
    }

    pub async fn create_session(&self, agent_id: AgentId, metadata: Option<Metadata>) -> Result<Session> {
        let mut session = Session::new(agent_id);
        session.metadata = metadata.unwrap_or_default();
        self.index.create_session(&session).await?;
        info!(session_id = %session.id, agent_id = %agent_id, "session created");
        Ok(session)
    }

    /// Mark the session ended and drop its STM window.
    pub async fn end_session(&self, session_id: SessionId) -> Result<()> {
        if self.index.get_session(session_id).await?.is_none() {
            return Err(MnemoError::not_found("session", session_id));
        }
        self.index.end_session(session_id, Utc::now()).await?;
        self.stm.clear(session_id).await?;
        info!(session_id = %session_id, "session ended");
        Ok(())
    }
}

fn mark_flagged(metadata: &mut Metadata, flagged: &[FilterRule]) {
    if flagged.is_empty() {
        return;
    }
    metadata.insert("flagged".into(), json!(true));
    metadata.insert(
        "flagged_by".into(),
        json!(flagged.iter().map(ToString::to_string).collect::<Vec<_>>()),
    );
}
