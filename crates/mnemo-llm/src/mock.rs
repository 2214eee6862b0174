//! Mock providers for deterministic testing.
//!
//! Return pre-configured responses without making any HTTP calls.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::embedding::EmbeddingProvider;
use crate::provider::*;
use mnemo_core::{MnemoError, Result};

/// A mock LLM provider that returns pre-configured responses.
///
/// # Example
/// ```
/// use mnemo_llm::mock::MockProvider;
/// let provider = MockProvider::new("test")
///     .with_response("1. First insight");
/// ```
pub struct MockProvider {
    responses: Arc<Mutex<Vec<MockResponse>>>,
    /// Track all requests received (for assertions in tests).
    pub requests: Arc<Mutex<Vec<LlmRequest>>>,
    name: String,
}

/// A pre-configured response from the mock provider.
#[derive(Debug, Clone, Default)]
pub struct MockResponse {
    pub text: String,
    /// If set, the provider will return this error instead.
    pub error: Option<String>,
}

impl MockProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(vec![])),
            requests: Arc::new(Mutex::new(vec![])),
            name: name.into(),
        }
    }

    /// Queue a simple text response.
    pub fn with_response(self, text: &str) -> Self {
        self.responses.lock().push(MockResponse {
            text: text.to_string(),
            error: None,
        });
        self
    }

    /// Queue an error response.
    pub fn with_error(self, error: &str) -> Self {
        self.responses.lock().push(MockResponse {
            text: String::new(),
            error: Some(error.to_string()),
        });
        self
    }

    /// Get all requests that were made to this provider.
    pub fn recorded_requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    /// Pop the next queued response, or a default "no response queued" message.
    fn next_response(&self) -> MockResponse {
        let mut responses = self.responses.lock();
        if responses.is_empty() {
            MockResponse {
                text: "(mock: no more queued responses)".to_string(),
                error: None,
            }
        } else {
            responses.remove(0)
        }
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse> {
        self.requests.lock().push(request.clone());
        let mock = self.next_response();

        if let Some(error) = mock.error {
            return Err(MnemoError::LlmProvider(error));
        }

        Ok(LlmResponse {
            usage: Usage {
                input_tokens: request.prompt.split_whitespace().count() as u32,
                output_tokens: mock.text.split_whitespace().count() as u32,
            },
            text: mock.text,
            stop_reason: StopReason::EndTurn,
        })
    }
}

/// Deterministic bag-of-words embedder.
///
/// Each lowercase alphanumeric token is hashed into one of `dims` buckets
/// and the counts are L2-normalised, so identical texts have cosine
/// similarity 1.0 and texts sharing words score higher than unrelated ones.
pub struct MockEmbedding {
    dims: usize,
    calls: AtomicUsize,
    failing: Mutex<HashSet<String>>,
}

impl MockEmbedding {
    pub fn new(dims: usize) -> Self {
        Self {
            dims: dims.max(1),
            calls: AtomicUsize::new(0),
            failing: Mutex::new(HashSet::new()),
        }
    }

    /// Make any batch containing `text` fail.
    pub fn fail_on(self, text: &str) -> Self {
        self.failing.lock().insert(text.to_string());
        self
    }

    /// Number of `embed` calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn vector_for(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let token = token.to_lowercase();
            let hash = blake3::hash(token.as_bytes());
            let bytes = hash.as_bytes();
            let bucket = u64::from_le_bytes([
                bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
            ]) as usize
                % self.dims;
            v[bucket] += 1.0;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut v {
                *x /= norm;
            }
        }
        v
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbedding {
    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        {
            let failing = self.failing.lock();
            if let Some(bad) = texts.iter().find(|t| failing.contains(**t)) {
                return Err(MnemoError::Embedding(format!("mock failure for '{bad}'")));
            }
        }
        Ok(texts.iter().map(|t| self.vector_for(t)).collect())
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn name(&self) -> &str {
        "mock"
    }

    fn model(&self) -> &str {
        "mock-embedding"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_text_response() {
        let provider = MockProvider::new("mock").with_response("Hello!");
        let req = LlmRequest::new("test", "hi there");
        let resp = provider.complete(&req).await.unwrap();
        assert_eq!(resp.text, "Hello!");
        assert_eq!(resp.stop_reason, StopReason::EndTurn);
        assert_eq!(provider.request_count(), 1);
    }

    #[tokio::test]
    async fn test_mock_error_response() {
        let provider = MockProvider::new("mock").with_error("HTTP 500: boom");
        let err = provider
            .complete(&LlmRequest::new("test", "hi"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("HTTP 500"));
    }

    #[tokio::test]
    async fn test_mock_responses_in_order() {
        let provider = MockProvider::new("mock").with_response("one").with_response("two");
        let req = LlmRequest::new("test", "x");
        assert_eq!(provider.complete(&req).await.unwrap().text, "one");
        assert_eq!(provider.complete(&req).await.unwrap().text, "two");
        assert!(provider.complete(&req).await.unwrap().text.contains("no more queued"));
    }

    #[tokio::test]
    async fn test_mock_embedding_identical_texts() {
        let embedder = MockEmbedding::new(64);
        let a = embedder.embed_one("The cat sat").await.unwrap();
        let b = embedder.embed_one("the CAT sat").await.unwrap();
        assert_eq!(a, b);
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_mock_embedding_failure_injection() {
        let embedder = MockEmbedding::new(16).fail_on("poison");
        assert!(embedder.embed(&["fine", "poison"]).await.is_err());
        assert!(embedder.embed(&["fine"]).await.is_ok());
        assert_eq!(embedder.calls(), 2);
    }
}
