use mnemo_core::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info};

use super::{RagMetadata, RagResult, numbered_context};
use crate::hybrid::{HybridParams, HybridRetriever};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CitedRagResult {
    #[serde(flatten)]
    pub result: RagResult,
    pub citations: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfidenceRagResult {
    #[serde(flatten)]
    pub result: RagResult,
    pub confidence: f32,
    pub reasoning: String,
}

/// Single-shot RAG: vector retrieval, then a fixed prompt around the sources.
pub struct StandardRag {
    hybrid: Arc<HybridRetriever>,
    default_top_k: usize,
}

impl StandardRag {
    pub fn new(hybrid: Arc<HybridRetriever>, default_top_k: usize) -> Self {
        Self { hybrid, default_top_k }
    }

    pub async fn execute(&self, query: &RagQuery) -> Result<RagResult> {
        let started = Instant::now();
        let sources = self.sources(query).await?;
        let augmented_prompt = augmented_prompt(&query.query, &sources);
        let result = finish(augmented_prompt, sources, started);
        info!(
            agent_id = %query.agent_id,
            sources = result.sources.len(),
            elapsed_ms = result.metadata.retrieval_time_ms,
            "standard RAG completed"
        );
        Ok(result)
    }

    /// Fill `{context}` and `{query}` in a caller-supplied template.
    pub async fn execute_with_template(&self, query: &RagQuery, template: &str) -> Result<RagResult> {
        let started = Instant::now();
        let sources = self.sources(query).await?;
        let prompt = fill_template(template, &numbered_context(&sources), &query.query);
        Ok(finish(prompt, sources, started))
    }

    pub async fn execute_with_citations(&self, query: &RagQuery) -> Result<CitedRagResult> {
        let result = self.execute(query).await?;
        let citations = citations(&result.sources);
        Ok(CitedRagResult { result, citations })
    }

    pub async fn execute_with_confidence(&self, query: &RagQuery) -> Result<ConfidenceRagResult> {
        let result = self.execute(query).await?;
        let (confidence, reasoning) = confidence(&result.sources);
        debug!(confidence, sources = result.sources.len(), "confidence calculated");
        Ok(ConfidenceRagResult {
            result,
            confidence,
            reasoning: reasoning.to_string(),
        })
    }

    async fn sources(&self, query: &RagQuery) -> Result<Vec<SearchResult>> {
        query.validate()?;
        let params = HybridParams::new(query.agent_id, query.query.clone())
            .top_k(query.top_k.unwrap_or(self.default_top_k))
            .include_graph(false);
        match self.hybrid.retrieve(&params).await {
            Ok(r) => Ok(r.vector_results),
            Err(e) => {
                error!(agent_id = %query.agent_id, error = %e, "standard RAG retrieval failed");
                Err(e)
            }
        }
    }
}

fn finish(augmented_prompt: String, sources: Vec<SearchResult>, started: Instant) -> RagResult {
    RagResult {
        augmented_prompt,
        metadata: RagMetadata {
            retrieval_time_ms: started.elapsed().as_millis() as u64,
            total_results: sources.len(),
            mode: RagMode::Standard,
        },
        sources,
    }
}

/// The question alone when nothing was retrieved.
pub fn augmented_prompt(query: &str, sources: &[SearchResult]) -> String {
    if sources.is_empty() {
        return query.to_string();
    }
    format!(
        "Context information is below:\n---\n{}\n---\n\n\
         Given the context information above, please answer the following question:\n{query}\n\n\
         If the context doesn't contain relevant information to answer the question, please say so.",
        numbered_context(sources)
    )
}

/// Replace the first `{context}` and the first `{query}` in the template.
/// Substituted text is never rescanned for placeholders.
pub fn fill_template(template: &str, context: &str, query: &str) -> String {
    let mut pending = vec![("{context}", context), ("{query}", query)];
    let mut out = String::with_capacity(template.len() + context.len() + query.len());
    let mut rest = template;
    loop {
        let next = pending
            .iter()
            .enumerate()
            .filter_map(|(i, (tag, _))| rest.find(tag).map(|pos| (pos, i)))
            .min();
        let Some((pos, i)) = next else {
            out.push_str(rest);
            return out;
        };
        let (tag, value) = pending.remove(i);
        out.push_str(&rest[..pos]);
        out.push_str(value);
        rest = &rest[pos + tag.len()..];
    }
}

pub fn citations(sources: &[SearchResult]) -> Vec<String> {
    sources
        .iter()
        .enumerate()
        .map(|(i, s)| {
            format!(
                "[{}] Memory from {} (relevance: {:.1}%)",
                i + 1,
                s.timestamp.format("%Y-%m-%d"),
                s.score * 100.0
            )
        })
        .collect()
}

/// Confidence bucket from retrieval scores.
pub fn confidence(sources: &[SearchResult]) -> (f32, &'static str) {
    if sources.is_empty() {
        return (0.0, "No relevant context found");
    }
    let max = sources.iter().map(|s| s.score).fold(f32::MIN, f32::max);
    let avg = sources.iter().map(|s| s.score).sum::<f32>() / sources.len() as f32;
    if max > 0.8 && sources.len() >= 3 {
        (0.9, "High-quality matches with multiple sources")
    } else if avg > 0.6 {
        (0.7, "Good average relevance across sources")
    } else if max > 0.5 {
        (0.5, "Moderate relevance, limited context")
    } else {
        (0.3, "Low relevance scores, answer may be uncertain")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn source(score: f32) -> SearchResult {
        SearchResult {
            id: "id".into(),
            content: "content".into(),
            score,
            metadata: Metadata::new(),
            timestamp: Utc.with_ymd_and_hms(2024, 3, 9, 12, 0, 0).unwrap(),
            source: ResultSource::Vector,
            scores: None,
        }
    }

    #[test]
    fn test_fill_template_first_occurrence_only() {
        assert_eq!(
            fill_template("Q: {query}\nC: {context}\n{query}", "ctx {query}", "why?"),
            "Q: why?\nC: ctx {query}\n{query}"
        );
        assert_eq!(fill_template("no placeholders", "c", "q"), "no placeholders");
    }

    #[test]
    fn test_citation_format() {
        assert_eq!(
            citations(&[source(0.875)]),
            vec!["[1] Memory from 2024-03-09 (relevance: 87.5%)"]
        );
    }

    #[test]
    fn test_confidence_buckets() {
        assert_eq!(confidence(&[]).0, 0.0);
        assert_eq!(confidence(&[source(0.85), source(0.2), source(0.2)]).0, 0.9);
        assert_eq!(confidence(&[source(0.85), source(0.5)]).0, 0.7);
        assert_eq!(confidence(&[source(0.55), source(0.1)]).0, 0.5);
        assert_eq!(confidence(&[source(0.3)]).0, 0.3);
    }

    #[test]
    fn test_prompt_without_sources_is_query() {
        assert_eq!(augmented_prompt("hello?", &[]), "hello?");
        let prompt = augmented_prompt("hello?", &[source(0.5)]);
        assert!(prompt.contains("[1] content"));
        assert!(prompt.ends_with("please say so."));
    }
}
