//! Retrieval-augmented prompt construction.

pub mod agentic;
pub mod standard;

pub use agentic::{AgenticRag, AgenticRagResult, RagStep, StepAction};
pub use standard::{CitedRagResult, ConfidenceRagResult, StandardRag};

use mnemo_core::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RagMetadata {
    pub retrieval_time_ms: u64,
    pub total_results: usize,
    pub mode: RagMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagResult {
    pub augmented_prompt: String,
    pub sources: Vec<SearchResult>,
    pub metadata: RagMetadata,
}

/// Answer to a [`RagQuery`] in whichever mode it asked for.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RagAnswer {
    Agentic(AgenticRagResult),
    Standard(RagResult),
}

impl RagAnswer {
    pub fn result(&self) -> &RagResult {
        match self {
            RagAnswer::Standard(r) => r,
            RagAnswer::Agentic(r) => &r.result,
        }
    }
}

/// Route a query to the pipeline named by its mode.
pub async fn answer(standard: &StandardRag, agentic: &AgenticRag, query: &RagQuery) -> Result<RagAnswer> {
    match query.mode {
        RagMode::Standard => standard.execute(query).await.map(RagAnswer::Standard),
        RagMode::Agentic => agentic.execute(query).await.map(RagAnswer::Agentic),
    }
}

/// `[n] content` blocks separated by blank lines.
pub(crate) fn numbered_context(sources: &[SearchResult]) -> String {
    sources
        .iter()
        .enumerate()
        .map(|(i, s)| format!("[{}] {}", i + 1, s.content))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// First occurrence of each id wins.
pub(crate) fn dedupe_by_id(results: impl IntoIterator<Item = SearchResult>) -> Vec<SearchResult> {
    let mut seen = HashSet::new();
    results
        .into_iter()
        .filter(|r| seen.insert(r.id.clone()))
        .collect()
}
