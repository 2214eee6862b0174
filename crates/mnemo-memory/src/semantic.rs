use chrono::{DateTime, Utc};
use mnemo_config::schema::SemanticConfig;
use mnemo_core::*;
use mnemo_llm::EmbeddingProvider;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::episodic::delete_entry;

/// Structured lookup against the knowledge graph.
pub type KnowledgeQuery = EntityQuery;

/// Entities matching a knowledge query with the relations leaving them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KnowledgeResult {
    pub entities: Vec<Entity>,
    pub relations: Vec<Relation>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SemanticStats {
    pub total_memories: usize,
    pub by_category: BTreeMap<String, usize>,
    pub by_source: BTreeMap<String, usize>,
}

/// Free-text semantic memory plus the knowledge graph it sits beside.
pub struct SemanticEngine {
    graph: Arc<dyn GraphStore>,
    vectors: Arc<dyn VectorStore>,
    index: Arc<dyn MemoryIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    config: SemanticConfig,
}

impl SemanticEngine {
    pub fn new(
        graph: Arc<dyn GraphStore>,
        vectors: Arc<dyn VectorStore>,
        index: Arc<dyn MemoryIndex>,
        embedder: Arc<dyn EmbeddingProvider>,
        config: SemanticConfig,
    ) -> Self {
        Self {
            graph,
            vectors,
            index,
            embedder,
            config,
        }
    }

    pub fn collection(&self) -> &str {
        &self.config.collection
    }

    // ── Knowledge graph ────────────────────────────────────────

    pub async fn create_entity(&self, entity: &Entity) -> Result<String> {
        self.graph.create_entity(entity).await?;
        info!(id = %entity.id, entity_type = %entity.entity_type, "created entity");
        Ok(entity.id.clone())
    }

    pub async fn get_entity(&self, id: &str) -> Result<Option<Entity>> {
        self.graph.get_entity(id).await
    }

    pub async fn update_entity(&self, id: &str, properties: &Metadata) -> Result<Entity> {
        let entity = self.graph.update_entity(id, properties).await?;
        info!(id, "updated entity");
        Ok(entity)
    }

    /// Relations touching the entity are left in place.
    pub async fn delete_entity(&self, id: &str) -> Result<bool> {
        let deleted = self.graph.delete_entity(id).await?;
        info!(id, deleted, "deleted entity");
        Ok(deleted)
    }

    pub async fn create_relation(&self, relation: &Relation) -> Result<()> {
        self.graph.create_relation(relation).await?;
        info!(
            from = %relation.from,
            to = %relation.to,
            relation_type = %relation.relation_type,
            "created relation"
        );
        Ok(())
    }

    pub async fn delete_relation(&self, from: &str, relation_type: &str, to: &str) -> Result<bool> {
        self.graph.delete_relation(from, relation_type, to).await
    }

    pub async fn store_fact(&self, fact: &Fact) -> Result<()> {
        if fact.subject.trim().is_empty() || fact.predicate.trim().is_empty() || fact.object.trim().is_empty() {
            return Err(MnemoError::validation("fact", "subject, predicate and object are required"));
        }
        self.graph.store_fact(fact).await?;
        info!(subject = %fact.subject, predicate = %fact.predicate, object = %fact.object, "stored fact");
        Ok(())
    }

    pub async fn query_knowledge(&self, query: &KnowledgeQuery) -> Result<KnowledgeResult> {
        let entities = self.graph.find_entities(query).await?;
        let mut relations = Vec::new();
        let mut seen = HashSet::new();
        for entity in &entities {
            let edges = self
                .graph
                .related(&entity.id, query.relation_type.as_deref(), Direction::Outgoing)
                .await?;
            for (relation, _) in edges {
                if seen.insert(relation.key()) {
                    relations.push(relation);
                }
            }
        }
        debug!(entities = entities.len(), relations = relations.len(), "queried knowledge");
        Ok(KnowledgeResult { entities, relations })
    }

    pub async fn traverse_graph(&self, start: &str, depth: usize) -> Result<Vec<GraphPath>> {
        let paths = self.graph.traverse(start, depth).await?;
        debug!(start, depth, paths = paths.len(), "traversed graph");
        Ok(paths)
    }

    /// Flatten traversal paths into unique nodes and edges.
    pub async fn export_subgraph(&self, entity_id: &str, depth: usize) -> Result<Subgraph> {
        let paths = self.traverse_graph(entity_id, depth).await?;
        let mut subgraph = Subgraph::default();
        let mut node_ids = HashSet::new();
        let mut edge_keys = HashSet::new();

        if paths.is_empty() {
            if let Some(root) = self.graph.get_entity(entity_id).await? {
                subgraph.nodes.push(root);
            }
            return Ok(subgraph);
        }

        for path in paths {
            for node in path.nodes {
                if node_ids.insert(node.id.clone()) {
                    subgraph.nodes.push(node);
                }
            }
            for edge in path.relations {
                if edge_keys.insert(edge.key()) {
                    subgraph.edges.push(edge);
                }
            }
        }
        info!(entity_id, depth, nodes = subgraph.nodes.len(), edges = subgraph.edges.len(), "exported subgraph");
        Ok(subgraph)
    }

    // ── Free-text semantic memory ──────────────────────────────

    /// Embed and store a fact-like statement. New memories are unverified.
    pub async fn store_semantic_memory(
        &self,
        agent_id: AgentId,
        content: &str,
        source: &str,
        category: Option<&str>,
        extra: Metadata,
    ) -> Result<MemoryId> {
        let id = Uuid::new_v4();
        let category = category.unwrap_or(&self.config.default_category);
        let now = Utc::now();
        let vector = self.embedder.embed_one(content).await?;

        let mut payload = Metadata::new();
        payload.insert("agent_id".into(), json!(agent_id.to_string()));
        payload.insert("content".into(), json!(content));
        payload.insert("source".into(), json!(source));
        payload.insert("category".into(), json!(category));
        payload.insert("verified".into(), json!(false));
        payload.insert("created_at".into(), json!(now.to_rfc3339()));

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

        let mut entry = IndexEntry::new(agent_id, MemoryKind::Semantic);
        entry.id = id;
        entry.created_at = now;
        entry.storage_location = Some(StorageLocation::new(&self.config.collection, id));
        entry.metadata = extra;
        entry.metadata.insert("source".into(), json!(source));
        entry.metadata.insert("category".into(), json!(category));
        entry.metadata.insert("verified".into(), json!(false));
        self.index.insert(&entry).await?;

        info!(id = %id, agent_id = %agent_id, source, category, "stored semantic memory");
        Ok(id)
    }

    pub async fn search_semantic_memories(
        &self,
        agent_id: AgentId,
        query: &str,
        top_k: usize,
        category: Option<&str>,
    ) -> Result<Vec<SearchResult>> {
        let vector = self.embedder.embed_one(query).await?;
        let mut filter = VectorFilter::new().must_match("agent_id", agent_id.to_string());
        if let Some(category) = category {
            filter = filter.must_match("category", category);
        }
        let hits = self
            .vectors
            .search(&self.config.collection, &vector, top_k, &filter, None)
            .await?;
        debug!(agent_id = %agent_id, returned = hits.len(), "searched semantic memories");
        Ok(hits.into_iter().map(point_to_result).collect())
    }

    /// Newest semantic memories for an agent, no query.
    pub async fn list_semantic_memories(&self, agent_id: AgentId, limit: usize) -> Result<Vec<SearchResult>> {
        let rows = self
            .index
            .query(&IndexQuery::for_agent(agent_id).kind(MemoryKind::Semantic).limit(limit))
            .await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let Some(loc) = &row.storage_location else {
                continue;
            };
            if let Some(point) = self.vectors.retrieve(&loc.collection, &loc.point_id).await? {
                out.push(point_to_result(ScoredPoint {
                    id: point.id,
                    score: 1.0,
                    payload: point.payload,
                }));
            }
        }
        Ok(out)
    }

    pub async fn delete_memory(&self, id: MemoryId) -> Result<()> {
        let entry = self
            .index
            .get(id)
            .await?
            .filter(|e| e.kind == MemoryKind::Semantic)
            .ok_or_else(|| MnemoError::not_found("semantic memory", id))?;
        delete_entry(self.vectors.as_ref(), self.index.as_ref(), &entry, &self.config.collection).await?;
        info!(id = %id, "deleted semantic memory");
        Ok(())
    }

    pub async fn get_stats(&self, agent_id: AgentId) -> Result<SemanticStats> {
        let rows = self
            .index
            .query(&IndexQuery::for_agent(agent_id).kind(MemoryKind::Semantic))
            .await?;
        let mut stats = SemanticStats {
            total_memories: rows.len(),
            ..Default::default()
        };
        for row in &rows {
            let field = |k: &str| {
                row.metadata
                    .get(k)
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
                    .to_string()
            };
            *stats.by_category.entry(field("category")).or_default() += 1;
            *stats.by_source.entry(field("source")).or_default() += 1;
        }
        Ok(stats)
    }
}

fn point_to_result(hit: ScoredPoint) -> SearchResult {
    let timestamp = hit
        .payload
        .get("created_at")
        .and_then(Value::as_str)
        .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);
    let content = hit
        .payload
        .get("content")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let mut metadata = Metadata::new();
    metadata.insert("type".into(), json!(MemoryKind::Semantic.as_str()));
    for key in ["source", "category", "verified"] {
        if let Some(v) = hit.payload.get(key) {
            metadata.insert(key.into(), v.clone());
        }
    }
    SearchResult {
        id: hit.id,
        content,
        score: hit.score,
        metadata,
        timestamp,
        source: ResultSource::Vector,
        scores: None,
    }
}
