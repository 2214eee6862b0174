use mnemo_core::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

/// Cap on related-entity lookups.
const MAX_RELATED: usize = 100;

/// Entities and relations gathered around a starting node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphContext {
    pub entities: Vec<Entity>,
    pub relations: Vec<Relation>,
}

impl GraphContext {
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.relations.is_empty()
    }

    /// Append `other`, keeping the first occurrence of each entity id and relation key.
    pub fn extend(&mut self, other: GraphContext) {
        let mut ids: HashSet<String> = self.entities.iter().map(|e| e.id.clone()).collect();
        let mut keys: HashSet<String> = self.relations.iter().map(Relation::key).collect();
        for entity in other.entities {
            if ids.insert(entity.id.clone()) {
                self.entities.push(entity);
            }
        }
        for relation in other.relations {
            if keys.insert(relation.key()) {
                self.relations.push(relation);
            }
        }
    }

    fn from_paths(paths: impl IntoIterator<Item = GraphPath>) -> Self {
        let mut ctx = GraphContext::default();
        for path in paths {
            ctx.extend(GraphContext {
                entities: path.nodes,
                relations: path.relations,
            });
        }
        ctx
    }
}

/// Read-side access to the knowledge graph.
pub struct GraphRetriever {
    graph: Arc<dyn GraphStore>,
}

impl GraphRetriever {
    pub fn new(graph: Arc<dyn GraphStore>) -> Self {
        Self { graph }
    }

    /// Neighbourhood of `entity_id` up to `depth` hops, from at most `limit` paths.
    pub async fn retrieve(&self, entity_id: &str, depth: usize, limit: usize) -> Result<GraphContext> {
        if entity_id.trim().is_empty() {
            return Err(MnemoError::validation("entity_id", "required for graph retrieval"));
        }
        let paths = self.graph.traverse(entity_id, depth).await?;
        let ctx = GraphContext::from_paths(paths.into_iter().take(limit));
        info!(
            entity_id,
            depth,
            entities = ctx.entities.len(),
            relations = ctx.relations.len(),
            "graph retrieval"
        );
        Ok(ctx)
    }

    pub async fn find_paths(&self, from: &str, to: &str, max_depth: Option<usize>) -> Result<Vec<GraphPath>> {
        let paths = self.graph.find_paths(from, to, max_depth.unwrap_or(3)).await?;
        info!(from, to, found = paths.len(), "paths between entities");
        Ok(paths)
    }

    pub async fn retrieve_by_type(&self, entity_type: &str, limit: Option<usize>) -> Result<Vec<Entity>> {
        let entities = self
            .graph
            .find_entities(&EntityQuery {
                entity_type: Some(entity_type.to_string()),
                limit: Some(limit.unwrap_or(100)),
                ..Default::default()
            })
            .await?;
        debug!(entity_type, found = entities.len(), "entities by type");
        Ok(entities)
    }

    pub async fn retrieve_related(
        &self,
        entity_id: &str,
        relation_type: Option<&str>,
        direction: Direction,
    ) -> Result<Vec<(Relation, Entity)>> {
        let mut related = self.graph.related(entity_id, relation_type, direction).await?;
        related.truncate(MAX_RELATED);
        debug!(entity_id, ?direction, found = related.len(), "related entities");
        Ok(related)
    }

    /// Backend-native read query; write statements are refused by the store.
    pub async fn execute_query(&self, query: &str, params: &Metadata) -> Result<Vec<Metadata>> {
        let rows = self.graph.execute(query, params).await?;
        info!(rows = rows.len(), "custom graph query");
        Ok(rows)
    }
}
