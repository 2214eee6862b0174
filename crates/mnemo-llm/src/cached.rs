use async_trait::async_trait;
use mnemo_core::{Cache, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::embedding::EmbeddingProvider;

/// Embedding provider that memoises vectors in the shared cache.
///
/// Keys are `embedding:{model}:{blake3(text)}`. Cache failures never fail
/// an embedding call; they only cost a provider round-trip.
pub struct CachedEmbedding {
    inner: Arc<dyn EmbeddingProvider>,
    cache: Arc<dyn Cache>,
    ttl: Duration,
}

impl CachedEmbedding {
    pub fn new(inner: Arc<dyn EmbeddingProvider>, cache: Arc<dyn Cache>) -> Self {
        Self {
            inner,
            cache,
            ttl: Duration::from_secs(24 * 60 * 60),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn cache_key(&self, text: &str) -> String {
        format!(
            "embedding:{}:{}",
            self.inner.model(),
            blake3::hash(text.as_bytes()).to_hex()
        )
    }

    async fn lookup(&self, key: &str) -> Option<Vec<f32>> {
        match self.cache.get(key).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(v) => Some(v),
                Err(e) => {
                    warn!(key, error = %e, "discarding unreadable cached embedding");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(key, error = %e, "embedding cache read failed");
                None
            }
        }
    }
}

#[async_trait]
impl EmbeddingProvider for CachedEmbedding {
    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let keys: Vec<String> = texts.iter().map(|t| self.cache_key(t)).collect();
        let mut out: Vec<Option<Vec<f32>>> = Vec::with_capacity(texts.len());
        let mut misses = Vec::new();
        for (i, key) in keys.iter().enumerate() {
            let hit = self.lookup(key).await;
            if hit.is_none() {
                misses.push(i);
            }
            out.push(hit);
        }

        if !misses.is_empty() {
            debug!(
                model = self.inner.model(),
                hits = texts.len() - misses.len(),
                misses = misses.len(),
                "embedding cache lookup"
            );
            let miss_texts: Vec<&str> = misses.iter().map(|&i| texts[i]).collect();
            let fresh = self.inner.embed(&miss_texts).await?;
            for (&i, vector) in misses.iter().zip(fresh) {
                match serde_json::to_string(&vector) {
                    Ok(raw) => {
                        if let Err(e) = self.cache.set(&keys[i], &raw, Some(self.ttl)).await {
                            warn!(error = %e, "embedding cache write failed");
                        }
                    }
                    Err(e) => warn!(error = %e, "failed to serialise embedding for cache"),
                }
                out[i] = Some(vector);
            }
        }

        out.into_iter()
            .map(|v| {
                v.ok_or_else(|| {
                    mnemo_core::MnemoError::Embedding("provider returned fewer embeddings than inputs".into())
                })
            })
            .collect()
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    fn name(&self) -> &str {
        self.inner.name()
    }

    fn model(&self) -> &str {
        self.inner.model()
    }
}
