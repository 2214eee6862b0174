//! Wiring from configuration to collaborators to engines.

use mnemo_config::MnemoConfig;
use mnemo_core::{MnemoError, Result};
use mnemo_llm::{
    Backoff, BatchProcessor, CachedEmbedding, EmbeddingProvider, LlmProvider, OllamaEmbedding, OpenAiEmbedding,
    RetryingProvider, openai::OpenAiProvider,
};
use mnemo_management::ManagementService;
use mnemo_memory::{
    EpisodicEngine, HeuristicScorer, MemoryService, ReflectionEngine, ReflectionWorker, SemanticEngine,
    StmEngine,
};
use mnemo_retrieval::{AgenticRag, GraphRetriever, HybridRetriever, StandardRag, VectorRetriever};
use mnemo_store::LocalStore;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Every engine, constructed once and shared by the commands.
pub struct App {
    pub config: MnemoConfig,
    pub store: LocalStore,
    pub memory: MemoryService,
    pub worker: ReflectionWorker,
    pub hybrid: Arc<HybridRetriever>,
    pub standard_rag: StandardRag,
    pub agentic_rag: AgenticRag,
    pub management: ManagementService,
    pub batch: BatchProcessor,
    worker_task: JoinHandle<()>,
}

impl App {
    /// Open the configured database and connect the configured providers.
    pub fn build(config: MnemoConfig) -> Result<Self> {
        let database = expand_home(&config.storage.database);
        if let Some(parent) = database.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let store = LocalStore::open(&database)?;
        info!(database = %database.display(), "opened local store");

        let llm = llm_provider(&config)?;
        let embedder = embedding_provider(&config)?;
        Self::assemble(config, store, llm, embedder)
    }

    /// Build the engines over explicit collaborators. Must run inside a Tokio runtime.
    pub fn assemble(
        config: MnemoConfig,
        store: LocalStore,
        llm: Arc<dyn LlmProvider>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self> {
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(
            CachedEmbedding::new(embedder, store.cache.clone())
                .with_ttl(Duration::from_secs(config.embedding.cache_ttl_secs)),
        );

        let stm = Arc::new(StmEngine::new(store.cache.clone(), config.stm.clone()));
        let episodic = Arc::new(EpisodicEngine::new(
            store.vectors.clone(),
            store.index.clone(),
            embedder.clone(),
            Arc::new(HeuristicScorer),
            config.episodic.clone(),
        ));
        let semantic = Arc::new(SemanticEngine::new(
            store.graph.clone(),
            store.vectors.clone(),
            store.index.clone(),
            embedder.clone(),
            config.semantic.clone(),
        ));
        let reflection = Arc::new(
            ReflectionEngine::new(
                store.cache.clone(),
                store.index.clone(),
                store.vectors.clone(),
                llm.clone(),
                embedder.clone(),
                config.reflection.clone(),
            )
            .with_default_model(&config.llm.model)
            .with_episodic_collection(&config.episodic.collection),
        );

        let (worker, worker_task) = ReflectionWorker::spawn(reflection.clone(), &config.reflection);
        let memory = MemoryService::new(stm, episodic, semantic, reflection, store.index.clone())
            .with_worker(worker.clone());

        let batch = BatchProcessor::spawn(embedder.clone(), config.embedding.batch_size);
        let vector = Arc::new(VectorRetriever::new(store.vectors.clone(), embedder));
        let graph = Arc::new(GraphRetriever::new(store.graph.clone()));
        let hybrid = Arc::new(
            HybridRetriever::new(vector, graph, config.retrieval.clone()).with_collections(vec![
                config.episodic.collection.clone(),
                config.semantic.collection.clone(),
            ]),
        );
        let standard_rag = StandardRag::new(hybrid.clone(), config.retrieval.rag_top_k);
        let agentic_rag = AgenticRag::new(hybrid.clone(), config.retrieval.rag_top_k);

        let management = ManagementService::new(store.index.clone(), store.vectors.clone(), llm, &config)?;

        Ok(Self {
            config,
            store,
            memory,
            worker,
            hybrid,
            standard_rag,
            agentic_rag,
            management,
            batch,
            worker_task,
        })
    }

    /// Wait up to `timeout` for queued reflections to finish.
    pub async fn shutdown(self, timeout: Duration) {
        self.management.stop_scheduler();
        if !self.worker.drain(timeout).await {
            warn!("reflection worker still busy at shutdown");
        }
        self.worker_task.abort();
    }
}

fn llm_provider(config: &MnemoConfig) -> Result<Arc<dyn LlmProvider>> {
    let llm = &config.llm;
    if llm.provider != "openai" {
        return Err(MnemoError::Config(format!("unsupported llm provider '{}'", llm.provider)));
    }
    if llm.api_key.is_none() && llm.base_url.is_none() {
        warn!("no LLM API key configured; reflection and consolidation will fall back");
    }
    let mut provider = OpenAiProvider::new(llm.api_key.clone());
    if let Some(ref url) = llm.base_url {
        provider = provider.with_base_url(url.clone(), llm.provider.clone());
    }
    let backoff = Backoff::new(
        config.reflection.max_attempts,
        Duration::from_millis(config.reflection.base_backoff_ms),
    );
    Ok(Arc::new(RetryingProvider::new(Arc::new(provider), backoff)))
}

fn embedding_provider(config: &MnemoConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    let emb = &config.embedding;
    match emb.provider.as_str() {
        "openai" => {
            let key = emb.api_key.clone().unwrap_or_else(|| {
                warn!("no embedding API key configured; writes and searches will fail");
                String::new()
            });
            let mut provider = OpenAiEmbedding::new(key).with_model(emb.model.clone(), emb.dimensions);
            if let Some(ref url) = emb.base_url {
                provider = provider.with_base_url(url.clone());
            }
            Ok(Arc::new(provider))
        }
        "ollama" => {
            let mut provider = OllamaEmbedding::new(&emb.model).with_dimensions(emb.dimensions);
            if let Some(ref url) = emb.base_url {
                provider = provider.with_base_url(url.clone());
            }
            Ok(Arc::new(provider))
        }
        other => Err(MnemoError::Config(format!("unsupported embedding provider '{other}'"))),
    }
}

/// Expand a leading `~` to the home directory.
pub fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")).join(rest),
        Err(_) => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_home() {
        let expanded = expand_home(Path::new("~/.mnemo/mnemo.db"));
        assert!(expanded.ends_with(".mnemo/mnemo.db"));
        assert!(!expanded.starts_with("~"));
        assert_eq!(expand_home(Path::new("/tmp/x.db")), PathBuf::from("/tmp/x.db"));
    }

    #[test]
    fn test_unknown_providers_rejected() {
        let mut config = MnemoConfig::default();
        config.llm.provider = "carrier-pigeon".into();
        assert!(matches!(llm_provider(&config), Err(MnemoError::Config(_))));

        let mut config = MnemoConfig::default();
        config.embedding.provider = "bag-of-words".into();
        assert!(matches!(embedding_provider(&config), Err(MnemoError::Config(_))));
    }
}
