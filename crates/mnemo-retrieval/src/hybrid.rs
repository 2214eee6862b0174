//! Vector search with optional knowledge-graph expansion.
//!
//! Vector hits from the episodic and semantic collections are ranked first.
//! Entity ids referenced in their metadata seed depth-1 graph lookups; a
//! vector hit whose entity also turns up in the graph is boosted, and graph
//! entities with no vector hit are added as low-confidence results.

use chrono::Utc;
use mnemo_config::schema::RetrievalConfig;
use mnemo_core::*;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::graph::{GraphContext, GraphRetriever};
use crate::query::{has_entity_mentions, is_factual_query};
use crate::vector::{VectorRetriever, sort_by_score};

/// Base score of a graph-only result before weighting.
const GRAPH_ONLY_BASE: f32 = 0.3;
/// Graph contribution to a boosted vector result.
const GRAPH_BOOST_BASE: f32 = 0.5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HybridParams {
    pub agent_id: AgentId,
    pub query_text: String,
    pub top_k: Option<usize>,
    pub vector_weight: Option<f32>,
    pub graph_weight: Option<f32>,
    pub include_graph: bool,
}

impl HybridParams {
    pub fn new(agent_id: AgentId, query_text: impl Into<String>) -> Self {
        Self {
            agent_id,
            query_text: query_text.into(),
            top_k: None,
            vector_weight: None,
            graph_weight: None,
            include_graph: true,
        }
    }

    pub fn top_k(mut self, top_k: usize) -> Self {
        self.top_k = Some(top_k);
        self
    }

    pub fn weights(mut self, vector: f32, graph: f32) -> Self {
        self.vector_weight = Some(vector);
        self.graph_weight = Some(graph);
        self
    }

    pub fn include_graph(mut self, include: bool) -> Self {
        self.include_graph = include;
        self
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HybridResult {
    pub vector_results: Vec<SearchResult>,
    pub graph_results: Option<GraphContext>,
    pub merged_results: Vec<SearchResult>,
}

pub struct HybridRetriever {
    vector: Arc<VectorRetriever>,
    graph: Arc<GraphRetriever>,
    collections: Vec<String>,
    config: RetrievalConfig,
}

impl HybridRetriever {
    pub fn new(vector: Arc<VectorRetriever>, graph: Arc<GraphRetriever>, config: RetrievalConfig) -> Self {
        Self {
            vector,
            graph,
            collections: vec!["episodic_memories".into(), "semantic_memories".into()],
            config,
        }
    }

    /// Collections searched on the vector side.
    pub fn with_collections(mut self, collections: Vec<String>) -> Self {
        self.collections = collections;
        self
    }

    pub fn vector(&self) -> &VectorRetriever {
        &self.vector
    }

    pub fn graph(&self) -> &GraphRetriever {
        &self.graph
    }

    pub async fn retrieve(&self, params: &HybridParams) -> Result<HybridResult> {
        let top_k = params.top_k.unwrap_or(self.config.top_k);
        let vector_weight = params.vector_weight.unwrap_or(self.config.vector_weight);
        let graph_weight = params.graph_weight.unwrap_or(self.config.graph_weight);

        let collections: Vec<&str> = self.collections.iter().map(String::as_str).collect();
        let filter = VectorFilter::new().must_match("agent_id", params.agent_id.to_string());
        let vector_results = self
            .vector
            .retrieve_multi(&collections, &params.query_text, top_k, &filter)
            .await?;

        let mut graph_results = None;
        let mut merged = vector_results.clone();

        if params.include_graph {
            let ids = entity_ids(&vector_results);
            if !ids.is_empty() {
                match self.expand(&ids).await {
                    Ok(ctx) => {
                        merged = merge_results(merged, &ctx, vector_weight, graph_weight);
                        graph_results = Some(ctx);
                    }
                    Err(e) => warn!(error = %e, "graph expansion failed, using vector results only"),
                }
            }
        }
        merged.truncate(top_k);

        info!(
            agent_id = %params.agent_id,
            vector = vector_results.len(),
            graph_entities = graph_results.as_ref().map_or(0, |g| g.entities.len()),
            merged = merged.len(),
            "hybrid retrieval"
        );
        Ok(HybridResult {
            vector_results,
            graph_results,
            merged_results: merged,
        })
    }

    /// Choose weights from the shape of the query.
    pub async fn retrieve_auto(&self, agent_id: AgentId, query_text: &str, top_k: Option<usize>) -> Result<HybridResult> {
        let entities = has_entity_mentions(query_text);
        let factual = is_factual_query(query_text);

        let mut params = HybridParams::new(agent_id, query_text)
            .weights(self.config.vector_weight, self.config.graph_weight);
        if let Some(k) = top_k {
            params = params.top_k(k);
        }
        if entities && factual {
            params = params.weights(0.4, 0.6);
        } else if !entities {
            params = params.include_graph(false);
        }
        debug!(
            entities,
            factual,
            include_graph = params.include_graph,
            "auto retrieval strategy"
        );
        self.retrieve(&params).await
    }

    async fn expand(&self, ids: &[String]) -> Result<GraphContext> {
        let mut ctx = GraphContext::default();
        for id in ids.iter().take(self.config.max_graph_entities) {
            let part = self
                .graph
                .retrieve(id, 1, self.config.graph_results_per_entity)
                .await?;
            ctx.extend(part);
        }
        Ok(ctx)
    }
}

/// Entity id a result refers to, at the top level or inside `context`.
fn entity_ref(result: &SearchResult) -> Option<&str> {
    result
        .metadata
        .get("entity_id")
        .or_else(|| result.metadata.get("context").and_then(|c| c.get("entity_id")))
        .and_then(Value::as_str)
}

/// Entity ids referenced by the results, first-seen order, deduplicated.
fn entity_ids(results: &[SearchResult]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut ids = Vec::new();
    for result in results {
        let listed = [
            result.metadata.get("entities"),
            result.metadata.get("context").and_then(|c| c.get("entities")),
        ];
        let candidates = entity_ref(result).into_iter().chain(
            listed
                .into_iter()
                .flatten()
                .filter_map(Value::as_array)
                .flatten()
                .filter_map(Value::as_str),
        );
        for id in candidates {
            if seen.insert(id.to_string()) {
                ids.push(id.to_string());
            }
        }
    }
    ids
}

/// Boost vector results confirmed by the graph and append graph-only entities.
///
/// A boosted score never drops below the original vector score.
pub fn merge_results(
    mut merged: Vec<SearchResult>,
    graph: &GraphContext,
    vector_weight: f32,
    graph_weight: f32,
) -> Vec<SearchResult> {
    let mut synthesized = Vec::new();
    for entity in &graph.entities {
        let existing = merged
            .iter_mut()
            .find(|r| entity_ref(r) == Some(entity.id.as_str()));
        match existing {
            Some(result) => {
                let boosted = result.score * vector_weight + GRAPH_BOOST_BASE * graph_weight;
                result.score = result.score.max(boosted);
            }
            None => synthesized.push(graph_result(entity, graph_weight)),
        }
    }
    merged.extend(synthesized);
    sort_by_score(&mut merged);
    merged
}

fn graph_result(entity: &Entity, graph_weight: f32) -> SearchResult {
    let mut metadata = Metadata::new();
    metadata.insert("source".into(), json!("graph"));
    metadata.insert("entity_id".into(), json!(entity.id));
    metadata.insert("entity_type".into(), json!(entity.entity_type));
    for (key, value) in &entity.properties {
        metadata.entry(key.clone()).or_insert_with(|| value.clone());
    }
    SearchResult {
        id: entity.id.clone(),
        content: Value::Object(entity.properties.clone()).to_string(),
        score: GRAPH_ONLY_BASE * graph_weight,
        metadata,
        timestamp: Utc::now(),
        source: ResultSource::Graph,
        scores: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(id: &str, score: f32, entity: Option<&str>) -> SearchResult {
        let mut metadata = Metadata::new();
        if let Some(e) = entity {
            metadata.insert("entity_id".into(), json!(e));
        }
        SearchResult {
            id: id.into(),
            content: id.into(),
            score,
            metadata,
            timestamp: Utc::now(),
            source: ResultSource::Vector,
            scores: None,
        }
    }

    #[test]
    fn test_merge_boosts_shared_entity_once() {
        let graph = GraphContext {
            entities: vec![Entity::new("alice", "person"), Entity::new("acme", "company")],
            relations: vec![Relation::new("alice", "works_at", "acme")],
        };
        let merged = merge_results(
            vec![hit("m1", 0.4, Some("alice")), hit("m2", 0.9, None)],
            &graph,
            0.7,
            0.3,
        );
        assert_eq!(merged.len(), 3);
        let m1 = merged.iter().find(|r| r.id == "m1").unwrap();
        assert!((m1.score - (0.4 * 0.7 + 0.15)).abs() < 1e-6);
        let acme = merged.iter().find(|r| r.id == "acme").unwrap();
        assert_eq!(acme.source, ResultSource::Graph);
        assert!((acme.score - 0.09).abs() < 1e-6);
        assert_eq!(merged.iter().filter(|r| r.id == "m2").count(), 1);
        assert_eq!(merged[0].id, "m2");
    }

    #[test]
    fn test_boost_never_lowers_score() {
        let graph = GraphContext {
            entities: vec![Entity::new("alice", "person")],
            relations: vec![],
        };
        let merged = merge_results(vec![hit("m1", 0.95, Some("alice"))], &graph, 0.7, 0.3);
        assert_eq!(merged.len(), 1);
        assert!(merged[0].score >= 0.95);
    }

    #[test]
    fn test_entity_ids_from_metadata_and_context() {
        let mut nested = hit("m2", 0.5, None);
        nested
            .metadata
            .insert("context".into(), json!({"entities": ["bob", "alice"]}));
        let ids = entity_ids(&[hit("m1", 0.5, Some("alice")), nested]);
        assert_eq!(ids, vec!["alice", "bob"]);
    }
}
