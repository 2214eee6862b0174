use mnemo_core::*;
use mnemo_llm::{LlmProvider, LlmRequest};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

use crate::Collections;

const SUMMARY_FAILED: &str = "Summary generation failed.";
const SYSTEM_PROMPT: &str = "You are an AI assistant that summarizes memories concisely.";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SummarizationLevel {
    Low,
    #[default]
    Medium,
    High,
}

impl SummarizationLevel {
    pub fn max_tokens(self) -> u32 {
        match self {
            SummarizationLevel::Low => 100,
            SummarizationLevel::Medium => 250,
            SummarizationLevel::High => 500,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SummarizationLevel::Low => "low",
            SummarizationLevel::Medium => "medium",
            SummarizationLevel::High => "high",
        }
    }
}

impl FromStr for SummarizationLevel {
    type Err = MnemoError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(MnemoError::validation(
                "summarization_level",
                format!("expected low, medium or high, got '{other}'"),
            )),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConsolidationRequest {
    pub time_range: Option<TimeRange>,
    pub level: SummarizationLevel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsolidationResult {
    pub original_count: usize,
    pub consolidated_count: usize,
    pub summary: String,
}

/// Summarises an agent's episodic history with the LLM.
///
/// The source memories are left in place; deleting them is up to the caller.
pub struct Consolidator {
    index: Arc<dyn MemoryIndex>,
    vectors: Arc<dyn VectorStore>,
    llm: Arc<dyn LlmProvider>,
    collections: Collections,
    model: String,
    temperature: f32,
}

impl Consolidator {
    pub fn new(
        index: Arc<dyn MemoryIndex>,
        vectors: Arc<dyn VectorStore>,
        llm: Arc<dyn LlmProvider>,
        collections: Collections,
        model: impl Into<String>,
        temperature: f32,
    ) -> Self {
        Self {
            index,
            vectors,
            llm,
            collections,
            model: model.into(),
            temperature,
        }
    }

    pub async fn consolidate(&self, agent_id: AgentId, request: &ConsolidationRequest) -> Result<ConsolidationResult> {
        let rows = self
            .index
            .query(
                &IndexQuery::for_agent(agent_id)
                    .kind(MemoryKind::Episodic)
                    .within(request.time_range.as_ref())
                    .order(IndexOrder::CreatedAsc),
            )
            .await?;
        if rows.is_empty() {
            return Ok(ConsolidationResult {
                original_count: 0,
                consolidated_count: 0,
                summary: String::new(),
            });
        }

        let mut contents = Vec::with_capacity(rows.len());
        for row in &rows {
            let Some((collection, point_id)) = self.collections.locate(row) else {
                continue;
            };
            match self.vectors.retrieve(&collection, &point_id).await {
                Ok(Some(point)) => {
                    if let Some(content) = point.payload.get("content").and_then(Value::as_str) {
                        contents.push(content.to_string());
                    }
                }
                Ok(None) => warn!(id = %row.id, "memory content missing for consolidation"),
                Err(e) => warn!(id = %row.id, error = %e, "failed to retrieve memory for consolidation"),
            }
        }

        let summary = self.summarize(&contents, request.level).await;
        info!(
            agent_id = %agent_id,
            original_count = rows.len(),
            summary_len = summary.len(),
            "memories consolidated"
        );
        Ok(ConsolidationResult {
            original_count: rows.len(),
            consolidated_count: 1,
            summary,
        })
    }

    /// Never fails: a model error or empty reply yields a fixed fallback.
    async fn summarize(&self, contents: &[String], level: SummarizationLevel) -> String {
        let request = LlmRequest::new(&self.model, summary_prompt(contents, level))
            .with_system(SYSTEM_PROMPT)
            .with_max_tokens(level.max_tokens())
            .with_temperature(self.temperature);
        match self.llm.complete(&request).await {
            Ok(response) if !response.text.trim().is_empty() => response.text,
            Ok(_) => SUMMARY_FAILED.to_string(),
            Err(e) => {
                warn!(provider = self.llm.name(), error = %e, "summary generation failed");
                SUMMARY_FAILED.to_string()
            }
        }
    }
}

fn summary_prompt(contents: &[String], level: SummarizationLevel) -> String {
    let numbered = contents
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{}. {c}", i + 1))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "Summarize the following memories into a concise overview. Focus on key events, patterns, and important information.\n\n\
         Memories:\n{numbered}\n\n\
         Provide a {}-detail summary:",
        level.as_str()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_token_budgets() {
        assert_eq!(SummarizationLevel::Low.max_tokens(), 100);
        assert_eq!(SummarizationLevel::default().max_tokens(), 250);
        assert_eq!("HIGH".parse::<SummarizationLevel>().unwrap().max_tokens(), 500);
        assert!("verbose".parse::<SummarizationLevel>().is_err());
    }

    #[test]
    fn test_prompt_numbers_memories() {
        let prompt = summary_prompt(&["met Bob".into(), "lunch".into()], SummarizationLevel::Low);
        assert!(prompt.contains("Memories:\n1. met Bob\n2. lunch\n\n"));
        assert!(prompt.ends_with("Provide a low-detail summary:"));
    }
}
