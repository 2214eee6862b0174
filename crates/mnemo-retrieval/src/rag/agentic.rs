//! Multi-step RAG with a recorded reasoning trace.
//!
//! The pipeline always runs analyze, plan, retrieve, evaluate and
//! synthesize. A refine step is inserted between evaluate and synthesize
//! when the evaluation finds the context insufficient, so a run records
//! five or six steps.

use mnemo_core::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info};

use super::{RagMetadata, RagResult, dedupe_by_id, numbered_context};
use crate::hybrid::{HybridParams, HybridRetriever};
use crate::query::{QueryAnalysis, split_parts};
use crate::vector::sort_by_score;

const MAX_STEPS: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepAction {
    Analyze,
    Plan,
    Retrieve,
    Evaluate,
    Refine,
    Synthesize,
}

impl fmt::Display for StepAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StepAction::Analyze => "analyze",
            StepAction::Plan => "plan",
            StepAction::Retrieve => "retrieve",
            StepAction::Evaluate => "evaluate",
            StepAction::Refine => "refine",
            StepAction::Synthesize => "synthesize",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagStep {
    pub step_number: usize,
    pub action: StepAction,
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<Vec<SearchResult>>,
    pub reasoning: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgenticRagResult {
    #[serde(flatten)]
    pub result: RagResult,
    pub steps: Vec<RagStep>,
    pub final_reasoning: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Strategy {
    GraphEnhanced,
    MultiQuery,
    Hybrid,
}

impl Strategy {
    fn choose(analysis: &QueryAnalysis) -> Self {
        if analysis.factual {
            Strategy::GraphEnhanced
        } else if analysis.multi_part {
            Strategy::MultiQuery
        } else {
            Strategy::Hybrid
        }
    }

    fn name(self) -> &'static str {
        match self {
            Strategy::GraphEnhanced => "graph-enhanced",
            Strategy::MultiQuery => "multi-query",
            Strategy::Hybrid => "hybrid",
        }
    }
}

/// Quality label for the first retrieval.
fn evaluate(results: &[SearchResult]) -> &'static str {
    if results.is_empty() {
        return "No results found - insufficient context.";
    }
    if results.len() < 3 {
        return "Limited results - may need refinement.";
    }
    let avg = results.iter().map(|r| r.score).sum::<f32>() / results.len() as f32;
    if avg > 0.7 {
        "High-quality results obtained."
    } else if avg > 0.5 {
        "Moderate quality results."
    } else {
        "Low relevance scores - insufficient context."
    }
}

pub struct AgenticRag {
    hybrid: Arc<HybridRetriever>,
    default_top_k: usize,
}

impl AgenticRag {
    pub fn new(hybrid: Arc<HybridRetriever>, default_top_k: usize) -> Self {
        Self { hybrid, default_top_k }
    }

    pub async fn execute(&self, query: &RagQuery) -> Result<AgenticRagResult> {
        query.validate()?;
        let started = Instant::now();
        match self.run(query).await {
            Ok((steps, sources)) => {
                let augmented_prompt = agentic_prompt(&query.query, &sources, &steps);
                let final_reasoning = final_reasoning(&steps);
                info!(
                    agent_id = %query.agent_id,
                    steps = steps.len(),
                    sources = sources.len(),
                    "agentic RAG completed"
                );
                Ok(AgenticRagResult {
                    result: RagResult {
                        augmented_prompt,
                        metadata: RagMetadata {
                            retrieval_time_ms: started.elapsed().as_millis() as u64,
                            total_results: sources.len(),
                            mode: RagMode::Agentic,
                        },
                        sources,
                    },
                    steps,
                    final_reasoning,
                })
            }
            Err(e) => {
                error!(agent_id = %query.agent_id, error = %e, "agentic RAG failed");
                Err(e)
            }
        }
    }

    async fn run(&self, query: &RagQuery) -> Result<(Vec<RagStep>, Vec<SearchResult>)> {
        let text = query.query.as_str();
        let top_k = query.top_k.unwrap_or(self.default_top_k);
        let mut steps = Vec::with_capacity(MAX_STEPS);

        let analysis = QueryAnalysis::of(text);
        steps.push(step(1, StepAction::Analyze, text, None, analysis.describe()));

        let strategy = Strategy::choose(&analysis);
        let method = if strategy == Strategy::GraphEnhanced {
            "knowledge graph + vector search"
        } else {
            "vector search"
        };
        steps.push(step(
            2,
            StepAction::Plan,
            text,
            None,
            format!("Retrieval strategy: {}. Will use {method}.", strategy.name()),
        ));

        let retrieved = self.retrieve(query.agent_id, text, top_k, strategy).await?;
        let label = match strategy {
            Strategy::GraphEnhanced => "hybrid",
            Strategy::MultiQuery => "multi-query",
            Strategy::Hybrid => "vector",
        };
        let reasoning = format!("Retrieved {} results using {label} search.", retrieved.len());
        let evaluation = evaluate(&retrieved);
        steps.push(step(3, StepAction::Retrieve, text, Some(retrieved), reasoning));
        steps.push(step(4, StepAction::Evaluate, text, None, evaluation.to_string()));

        if evaluation.contains("insufficient") && steps.len() < MAX_STEPS {
            let refined = self
                .hybrid
                .retrieve(
                    &HybridParams::new(query.agent_id, text)
                        .top_k(top_k * 2)
                        .include_graph(true),
                )
                .await?
                .merged_results;
            let reasoning = format!(
                "Refined search with expanded parameters. Retrieved {} additional results.",
                refined.len()
            );
            steps.push(step(5, StepAction::Refine, text, Some(refined), reasoning));
            debug!(agent_id = %query.agent_id, "agentic RAG refined retrieval");
        }

        let sources = dedupe_by_id(
            steps
                .iter()
                .filter_map(|s| s.results.clone())
                .flatten(),
        );
        let reasoning = format!(
            "Synthesized {} unique results from {} retrieval steps.",
            sources.len(),
            steps.len()
        );
        let number = steps.len() + 1;
        steps.push(step(number, StepAction::Synthesize, text, Some(sources.clone()), reasoning));
        Ok((steps, sources))
    }

    async fn retrieve(
        &self,
        agent_id: AgentId,
        text: &str,
        top_k: usize,
        strategy: Strategy,
    ) -> Result<Vec<SearchResult>> {
        if strategy != Strategy::MultiQuery {
            let params = HybridParams::new(agent_id, text)
                .top_k(top_k)
                .include_graph(strategy == Strategy::GraphEnhanced);
            return Ok(self.hybrid.retrieve(&params).await?.merged_results);
        }

        // One retrieval per sub-question; a result seen twice keeps its best score.
        let mut merged: Vec<SearchResult> = Vec::new();
        for part in split_parts(text) {
            let params = HybridParams::new(agent_id, part).top_k(top_k).include_graph(false);
            for hit in self.hybrid.retrieve(&params).await?.merged_results {
                match merged.iter_mut().find(|r| r.id == hit.id) {
                    Some(existing) if existing.score < hit.score => *existing = hit,
                    Some(_) => {}
                    None => merged.push(hit),
                }
            }
        }
        sort_by_score(&mut merged);
        merged.truncate(top_k);
        Ok(merged)
    }
}

fn step(
    step_number: usize,
    action: StepAction,
    query: &str,
    results: Option<Vec<SearchResult>>,
    reasoning: String,
) -> RagStep {
    RagStep {
        step_number,
        action,
        query: query.to_string(),
        results,
        reasoning,
    }
}

fn agentic_prompt(query: &str, sources: &[SearchResult], steps: &[RagStep]) -> String {
    let trace = steps
        .iter()
        .map(|s| format!("Step {} ({}): {}", s.step_number, s.action, s.reasoning))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "I performed a multi-step analysis to gather relevant context for your question.\n\n\
         Reasoning Process:\n{trace}\n\n\
         Context Information:\n---\n{}\n---\n\n\
         Original Question: {query}\n\n\
         Based on the systematic retrieval and analysis above, please provide a comprehensive answer.",
        numbered_context(sources)
    )
}

fn final_reasoning(steps: &[RagStep]) -> String {
    let summary = steps
        .iter()
        .map(|s| format!("{}: {}", s.action, s.reasoning))
        .collect::<Vec<_>>()
        .join(" → ");
    format!("Agentic RAG completed {} steps: {summary}", steps.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_precedence() {
        assert_eq!(
            Strategy::choose(&QueryAnalysis::of("what is X and Y")),
            Strategy::GraphEnhanced
        );
        assert_eq!(
            Strategy::choose(&QueryAnalysis::of("tell me X and Y")),
            Strategy::MultiQuery
        );
        assert_eq!(Strategy::choose(&QueryAnalysis::of("tell me X")), Strategy::Hybrid);
    }

    fn scored(scores: &[f32]) -> Vec<SearchResult> {
        scores
            .iter()
            .enumerate()
            .map(|(i, &score)| SearchResult {
                id: i.to_string(),
                content: String::new(),
                score,
                metadata: Metadata::new(),
                timestamp: chrono::Utc::now(),
                source: ResultSource::Vector,
                scores: None,
            })
            .collect()
    }

    #[test]
    fn test_evaluate_labels() {
        assert!(evaluate(&[]).contains("insufficient"));
        assert!(evaluate(&scored(&[0.9, 0.9])).contains("refinement"));
        assert!(evaluate(&scored(&[0.9, 0.8, 0.75])).starts_with("High-quality"));
        assert!(evaluate(&scored(&[0.6, 0.6, 0.6])).starts_with("Moderate"));
        assert!(evaluate(&scored(&[0.2, 0.3, 0.1])).contains("insufficient"));
    }
}
