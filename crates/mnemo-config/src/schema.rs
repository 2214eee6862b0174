use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

/// Root configuration, mapped from `mnemo.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MnemoConfig {
    pub stm: StmConfig,
    pub episodic: EpisodicConfig,
    pub semantic: SemanticConfig,
    pub reflection: ReflectionConfig,
    pub retrieval: RetrievalConfig,
    pub management: ManagementConfig,
    pub llm: LlmConfig,
    pub embedding: EmbeddingConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

// ── Short-term memory ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StmConfig {
    /// Items kept per session unless overridden per session.
    pub window_size: usize,
    /// Sliding expiry, reset on every write.
    pub ttl_secs: u64,
    /// Upper bound accepted by `set_window_size`.
    pub max_window_size: usize,
}

impl Default for StmConfig {
    fn default() -> Self {
        Self {
            window_size: 10,
            ttl_secs: 3600,
            max_window_size: 100,
        }
    }
}

// ── Episodic memory ────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeightsConfig {
    pub recency: f32,
    pub importance: f32,
    pub relevance: f32,
}

impl Default for WeightsConfig {
    fn default() -> Self {
        Self {
            recency: 0.33,
            importance: 0.33,
            relevance: 0.34,
        }
    }
}

impl WeightsConfig {
    pub fn sum(&self) -> f32 {
        self.recency + self.importance + self.relevance
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EpisodicConfig {
    pub collection: String,
    pub top_k: usize,
    /// Vector candidates fetched per requested result before re-ranking.
    pub candidate_multiplier: usize,
    pub weights: WeightsConfig,
    pub recency_half_life_days: f64,
}

impl Default for EpisodicConfig {
    fn default() -> Self {
        Self {
            collection: "episodic_memories".into(),
            top_k: 10,
            candidate_multiplier: 2,
            weights: WeightsConfig::default(),
            recency_half_life_days: 30.0,
        }
    }
}

// ── Semantic memory ────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SemanticConfig {
    pub collection: String,
    pub default_category: String,
}

impl Default for SemanticConfig {
    fn default() -> Self {
        Self {
            collection: "semantic_memories".into(),
            default_category: "general".into(),
        }
    }
}

// ── Reflection ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReflectionConfig {
    /// Accumulated importance that makes an agent due for reflection.
    pub threshold: i64,
    /// Episodic memories fed to one reflection.
    pub max_memories: usize,
    pub collection: String,
    /// Model used for insight generation (falls back to `llm.model`).
    pub model: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Pending reflection jobs before submissions are refused.
    pub queue_capacity: usize,
    /// Attempts per job before it is dead-lettered.
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
    /// Lifetime of the per-agent guard held while a reflection runs.
    pub trigger_guard_ttl_secs: u64,
}

impl Default for ReflectionConfig {
    fn default() -> Self {
        Self {
            threshold: 50,
            max_memories: 20,
            collection: "reflections".into(),
            model: None,
            temperature: 0.7,
            max_tokens: 500,
            queue_capacity: 64,
            max_attempts: 3,
            base_backoff_ms: 500,
            trigger_guard_ttl_secs: 300,
        }
    }
}

// ── Retrieval ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub top_k: usize,
    pub vector_weight: f32,
    pub graph_weight: f32,
    /// Entities taken from vector metadata for graph expansion.
    pub max_graph_entities: usize,
    /// Paths kept per expanded entity.
    pub graph_results_per_entity: usize,
    /// Default source count for RAG prompts.
    pub rag_top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 10,
            vector_weight: 0.7,
            graph_weight: 0.3,
            max_graph_entities: 3,
            graph_results_per_entity: 20,
            rag_top_k: 5,
        }
    }
}

// ── Management ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagementConfig {
    /// Six-field cron expression (with seconds) for the forgetting sweep.
    pub forgetting_cron: String,
    pub consolidation_temperature: f32,
    /// Model used for summaries (falls back to `llm.model`).
    pub consolidation_model: Option<String>,
}

impl Default for ManagementConfig {
    fn default() -> Self {
        Self {
            forgetting_cron: "0 0 2 * * *".into(),
            consolidation_temperature: 0.5,
            consolidation_model: None,
        }
    }
}

// ── Providers ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// "openai" (any OpenAI-compatible endpoint).
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    /// Falls back to `OPENAI_API_KEY`.
    pub api_key: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openai".into(),
            model: "gpt-4o-mini".into(),
            base_url: None,
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// "openai" or "ollama".
    pub provider: String,
    pub model: String,
    pub dimensions: usize,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    /// Texts per request in the batch processor.
    pub batch_size: usize,
    /// Lifetime of cached embeddings.
    pub cache_ttl_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "openai".into(),
            model: "text-embedding-3-small".into(),
            dimensions: 1536,
            base_url: None,
            api_key: None,
            batch_size: 100,
            cache_ttl_secs: 86_400,
        }
    }
}

// ── Storage ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database backing the index, vector and graph stores.
    pub database: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database: dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".mnemo")
                .join("mnemo.db"),
        }
    }
}

// ── Logging ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
    /// Output format: "pretty", "json", "compact".
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "pretty".into(),
        }
    }
}

// ── Validation ─────────────────────────────────────────────────

/// A single config validation issue.
#[derive(Debug)]
pub struct ConfigWarning {
    pub field: String,
    pub message: String,
    pub severity: WarningSeverity,
    pub hint: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningSeverity {
    Error,
    Warning,
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self.severity {
            WarningSeverity::Error => "error",
            WarningSeverity::Warning => "warning",
        };
        write!(f, "{} {}: {}", label, self.field, self.message)?;
        if let Some(ref h) = self.hint {
            write!(f, "\n   ↳ {}", h)?;
        }
        Ok(())
    }
}

fn unit_interval(value: f32) -> bool {
    (0.0..=1.0).contains(&value)
}

impl MnemoConfig {
    /// Validate the config and return a list of warnings.
    /// Returns `Err` with all messages joined if any severity is Error.
    pub fn validate(&self) -> Result<Vec<ConfigWarning>, String> {
        let mut warnings = Vec::new();
        let mut error = |field: &str, message: String, hint: Option<&str>| {
            warnings.push(ConfigWarning {
                field: field.into(),
                message,
                severity: WarningSeverity::Error,
                hint: hint.map(str::to_string),
            });
        };

        // ── STM ───
        if self.stm.max_window_size == 0 || self.stm.max_window_size > 100 {
            error(
                "stm.max_window_size",
                format!("{} is outside 1..=100", self.stm.max_window_size),
                None,
            );
        }
        if self.stm.window_size == 0 || self.stm.window_size > self.stm.max_window_size {
            error(
                "stm.window_size",
                format!(
                    "{} is outside 1..={}",
                    self.stm.window_size, self.stm.max_window_size
                ),
                Some("The default window keeps the 10 most recent turns"),
            );
        }
        if self.stm.ttl_secs == 0 {
            error("stm.ttl_secs", "ttl of 0 expires every window immediately".into(), None);
        }

        // ── Episodic scoring ───
        let w = &self.episodic.weights;
        if !unit_interval(w.recency) || !unit_interval(w.importance) || !unit_interval(w.relevance) {
            error(
                "episodic.weights",
                "each weight must be within 0.0..=1.0".into(),
                None,
            );
        }
        if self.episodic.top_k == 0 {
            error("episodic.top_k", "top_k must be at least 1".into(), None);
        }
        if self.episodic.candidate_multiplier == 0 {
            error(
                "episodic.candidate_multiplier",
                "multiplier must be at least 1".into(),
                None,
            );
        }
        if self.episodic.recency_half_life_days <= 0.0 {
            error(
                "episodic.recency_half_life_days",
                "half-life must be positive".into(),
                None,
            );
        }

        // ── Reflection ───
        if self.reflection.threshold <= 0 {
            error(
                "reflection.threshold",
                format!("threshold {} must be positive", self.reflection.threshold),
                None,
            );
        }
        if self.reflection.max_memories == 0 {
            error("reflection.max_memories", "must be at least 1".into(), None);
        }
        if self.reflection.queue_capacity == 0 {
            error("reflection.queue_capacity", "must be at least 1".into(), None);
        }
        if self.reflection.max_attempts == 0 {
            error("reflection.max_attempts", "must be at least 1".into(), None);
        }

        // ── Retrieval ───
        if !unit_interval(self.retrieval.vector_weight) || !unit_interval(self.retrieval.graph_weight) {
            error(
                "retrieval",
                "vector_weight and graph_weight must be within 0.0..=1.0".into(),
                None,
            );
        }

        // ── Scheduler ───
        if let Err(e) = cron::Schedule::from_str(&self.management.forgetting_cron) {
            error(
                "management.forgetting_cron",
                format!("invalid cron expression: {e}"),
                Some("Use six fields with seconds, e.g. '0 0 2 * * *'"),
            );
        }

        // ── Providers ───
        if self.llm.provider != "openai" {
            error(
                "llm.provider",
                format!("unknown provider '{}'", self.llm.provider),
                Some("Supported: openai (any OpenAI-compatible endpoint via base_url)"),
            );
        }
        if !["openai", "ollama"].contains(&self.embedding.provider.as_str()) {
            error(
                "embedding.provider",
                format!("unknown provider '{}'", self.embedding.provider),
                Some("Supported: openai, ollama"),
            );
        }
        if self.embedding.batch_size == 0 {
            error("embedding.batch_size", "must be at least 1".into(), None);
        }

        // ── Soft checks ───
        if (w.sum() - 1.0).abs() > 0.01 {
            warnings.push(ConfigWarning {
                field: "episodic.weights".into(),
                message: format!("weights sum to {:.2}, not 1.0", w.sum()),
                severity: WarningSeverity::Warning,
                hint: Some("Composite scores are only comparable across queries when weights sum to 1".into()),
            });
        }
        if self.llm.api_key.is_none() && self.llm.base_url.is_none() {
            warnings.push(ConfigWarning {
                field: "llm.api_key".into(),
                message: "no API key configured; reflection and consolidation will use fallbacks".into(),
                severity: WarningSeverity::Warning,
                hint: Some("Set OPENAI_API_KEY or llm.api_key".into()),
            });
        }
        let valid_formats = ["pretty", "json", "compact"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            warnings.push(ConfigWarning {
                field: "logging.format".into(),
                message: format!("unknown format '{}', using pretty", self.logging.format),
                severity: WarningSeverity::Warning,
                hint: Some(format!("Valid: {}", valid_formats.join(", "))),
            });
        }

        // Check for hard errors
        let errors: Vec<String> = warnings
            .iter()
            .filter(|w| w.severity == WarningSeverity::Error)
            .map(|w| format!("{}: {}", w.field, w.message))
            .collect();

        if !errors.is_empty() {
            return Err(format!("Configuration errors:\n  • {}", errors.join("\n  • ")));
        }

        Ok(warnings)
    }
}
