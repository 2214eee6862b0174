//! # mnemo-memory
//!
//! Four-tier memory for an agent:
//!
//! - **STM**: a bounded window of recent turns per session, held in the cache.
//! - **Episodic**: timestamped, importance-scored events ranked by recency,
//!   importance and relevance.
//! - **Semantic**: the knowledge graph plus free-text facts in a vector collection.
//! - **Reflection**: LLM-synthesised insights over accumulated episodic memory,
//!   run on a supervised background worker.
//!
//! [`MemoryService`] coordinates writes and reads across the tiers.

pub mod episodic;
pub mod reflection;
pub mod scoring;
pub mod semantic;
pub mod service;
pub mod stm;
pub mod worker;

pub use episodic::{
    Episode, EpisodicEngine, EpisodicEvent, EpisodicQuery, EpisodicStats, RecordedEvent,
};
pub use reflection::{ReflectionContext, ReflectionEngine};
pub use scoring::{CompositeWeights, HeuristicScorer, ImportanceScorer};
pub use semantic::{KnowledgeQuery, KnowledgeResult, SemanticEngine, SemanticStats};
pub use service::{MemoryService, StoredMemory};
pub use stm::{StmEngine, StmStats};
pub use worker::{DeadLetter, ReflectionWorker, WorkerStats};
