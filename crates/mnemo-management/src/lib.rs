//! # mnemo-management
//!
//! Lifecycle operations over stored memory: per-agent write filters,
//! policy-driven forgetting with a scheduled daily sweep, LLM consolidation
//! of episodic history, and the stats, export and purge surface.

pub mod consolidation;
pub mod forgetting;
pub mod report;
pub mod scheduler;
pub mod service;

pub use consolidation::{ConsolidationRequest, ConsolidationResult, Consolidator, SummarizationLevel};
pub use forgetting::Forgetter;
pub use report::{ExportFormat, MemoryStats, Reporter};
pub use scheduler::ForgettingScheduler;
pub use service::ManagementService;

use mnemo_config::MnemoConfig;
use mnemo_core::{IndexEntry, MemoryKind};

/// Vector collection names for each memory tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collections {
    pub episodic: String,
    pub semantic: String,
    pub reflection: String,
}

impl Default for Collections {
    fn default() -> Self {
        Self {
            episodic: "episodic_memories".into(),
            semantic: "semantic_memories".into(),
            reflection: "reflections".into(),
        }
    }
}

impl Collections {
    pub fn from_config(config: &MnemoConfig) -> Self {
        Self {
            episodic: config.episodic.collection.clone(),
            semantic: config.semantic.collection.clone(),
            reflection: config.reflection.collection.clone(),
        }
    }

    /// Short-term memory lives in the cache and has no collection.
    pub fn for_kind(&self, kind: MemoryKind) -> Option<&str> {
        match kind {
            MemoryKind::Stm => None,
            MemoryKind::Episodic => Some(&self.episodic),
            MemoryKind::Semantic => Some(&self.semantic),
            MemoryKind::Reflection => Some(&self.reflection),
        }
    }

    /// Where a row's content lives: its recorded location, else its id in the tier's collection.
    pub fn locate(&self, entry: &IndexEntry) -> Option<(String, String)> {
        match &entry.storage_location {
            Some(loc) => Some((loc.collection.clone(), loc.point_id.clone())),
            None => self
                .for_kind(entry.kind)
                .map(|c| (c.to_string(), entry.id.to_string())),
        }
    }
}
