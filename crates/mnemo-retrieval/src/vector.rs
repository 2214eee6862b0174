use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use mnemo_core::*;
use mnemo_llm::EmbeddingProvider;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

/// Default cap for threshold-only retrieval.
pub const THRESHOLD_MAX_RESULTS: usize = 100;

/// What to search with.
#[derive(Debug, Clone, Copy)]
pub enum QueryVector<'a> {
    Text(&'a str),
    Embedding(&'a [f32]),
}

/// A single-collection similarity search.
#[derive(Debug, Clone)]
pub struct VectorSearch<'a> {
    pub collection: &'a str,
    pub query: QueryVector<'a>,
    pub top_k: usize,
    pub filter: VectorFilter,
    pub threshold: Option<f32>,
}

impl<'a> VectorSearch<'a> {
    pub fn text(collection: &'a str, text: &'a str) -> Self {
        Self {
            collection,
            query: QueryVector::Text(text),
            top_k: 10,
            filter: VectorFilter::new(),
            threshold: None,
        }
    }

    pub fn top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn filter(mut self, filter: VectorFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn threshold(mut self, threshold: f32) -> Self {
        self.threshold = Some(threshold);
        self
    }
}

/// Similarity search over the vector store, returning uniform [`SearchResult`]s.
pub struct VectorRetriever {
    vectors: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl VectorRetriever {
    pub fn new(vectors: Arc<dyn VectorStore>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self { vectors, embedder }
    }

    pub async fn retrieve(&self, search: &VectorSearch<'_>) -> Result<Vec<SearchResult>> {
        let owned;
        let vector: &[f32] = match search.query {
            QueryVector::Embedding(v) => v,
            QueryVector::Text(text) => {
                if text.trim().is_empty() {
                    return Err(MnemoError::validation("query", "must not be empty"));
                }
                owned = self.embedder.embed_one(text).await?;
                &owned
            }
        };

        let hits = self
            .vectors
            .search(search.collection, vector, search.top_k, &search.filter, search.threshold)
            .await?;
        let results: Vec<SearchResult> = hits.into_iter().map(point_to_result).collect();
        debug!(
            collection = search.collection,
            returned = results.len(),
            "vector retrieval"
        );
        Ok(results)
    }

    /// Search several collections with one embedding and keep the best `top_k` overall.
    pub async fn retrieve_multi(
        &self,
        collections: &[&str],
        query_text: &str,
        top_k: usize,
        filter: &VectorFilter,
    ) -> Result<Vec<SearchResult>> {
        if query_text.trim().is_empty() {
            return Err(MnemoError::validation("query", "must not be empty"));
        }
        let vector = self.embedder.embed_one(query_text).await?;

        let searches = collections.iter().map(|&collection| {
            let search = VectorSearch {
                collection,
                query: QueryVector::Embedding(&vector),
                top_k,
                filter: filter.clone(),
                threshold: None,
            };
            async move { self.retrieve(&search).await }
        });
        let mut merged: Vec<SearchResult> = try_join_all(searches).await?.into_iter().flatten().collect();
        let total = merged.len();
        sort_by_score(&mut merged);
        merged.truncate(top_k);

        info!(collections = collections.len(), total, top_k, "multi-collection retrieval");
        Ok(merged)
    }

    /// Equality filters on payload fields, all of which must hold.
    pub async fn retrieve_with_filters(
        &self,
        collection: &str,
        query_text: &str,
        filters: &[(String, Value)],
        top_k: usize,
    ) -> Result<Vec<SearchResult>> {
        let filter = filters
            .iter()
            .fold(VectorFilter::new(), |f, (key, value)| f.must_match(key, value.clone()));
        self.retrieve(&VectorSearch::text(collection, query_text).top_k(top_k).filter(filter))
            .await
    }

    pub async fn retrieve_above_threshold(
        &self,
        collection: &str,
        query_text: &str,
        threshold: f32,
        max_results: Option<usize>,
    ) -> Result<Vec<SearchResult>> {
        let results = self
            .retrieve(
                &VectorSearch::text(collection, query_text)
                    .top_k(max_results.unwrap_or(THRESHOLD_MAX_RESULTS))
                    .threshold(threshold),
            )
            .await?;
        info!(collection, threshold, returned = results.len(), "threshold retrieval");
        Ok(results)
    }
}

/// Best first; ties keep their original order.
pub(crate) fn sort_by_score(results: &mut [SearchResult]) {
    results.sort_by(|a, b| b.score.total_cmp(&a.score));
}

fn point_to_result(point: ScoredPoint) -> SearchResult {
    let content = point
        .payload
        .get("content")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let timestamp = ["timestamp", "created_at"]
        .iter()
        .filter_map(|key| point.payload.get(*key).and_then(Value::as_str))
        .find_map(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);
    SearchResult {
        id: point.id,
        content,
        score: point.score,
        metadata: point.payload,
        timestamp,
        source: ResultSource::Vector,
        scores: None,
    }
}
