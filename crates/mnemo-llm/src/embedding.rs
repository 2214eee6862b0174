use async_trait::async_trait;
use mnemo_core::{MnemoError, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Turns text into fixed-width vectors.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// One vector per input, in input order.
    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>>;

    fn dimensions(&self) -> usize;

    fn name(&self) -> &str;

    /// Model identifier, part of the embedding cache key.
    fn model(&self) -> &str;

    async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        self.embed(&[text])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| MnemoError::Embedding("provider returned no embedding".into()))
    }
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
}

#[derive(Deserialize)]
struct OpenAiEmbedResponse {
    data: Vec<OpenAiEmbedItem>,
}

#[derive(Deserialize)]
struct OpenAiEmbedItem {
    index: usize,
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct OllamaEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Send `body` as JSON and decode the reply. Every failure maps to `Embedding`.
async fn post_json<B: Serialize, R: for<'de> Deserialize<'de>>(
    request: reqwest::RequestBuilder,
    provider: &str,
    body: &B,
) -> Result<R> {
    let resp = request
        .json(body)
        .send()
        .await
        .map_err(|e| MnemoError::Embedding(format!("{provider} request failed: {e}")))?;

    let status = resp.status();
    if !status.is_success() {
        let text = resp.text().await.unwrap_or_default();
        return Err(MnemoError::Embedding(format!("{provider} HTTP {status}: {text}")));
    }

    resp.json()
        .await
        .map_err(|e| MnemoError::Embedding(format!("{provider} response parse error: {e}")))
}

fn check_count(provider: &str, expected: usize, got: usize) -> Result<()> {
    if expected != got {
        return Err(MnemoError::Embedding(format!(
            "{provider} returned {got} embeddings for {expected} inputs"
        )));
    }
    Ok(())
}

/// OpenAI-compatible `/embeddings` endpoint.
pub struct OpenAiEmbedding {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    dims: usize,
}

impl OpenAiEmbedding {
    /// Defaults to text-embedding-3-small (1536 dims).
    pub fn new(api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: "https://api.openai.com/v1".into(),
            model: "text-embedding-3-small".into(),
            dims: 1536,
        }
    }

    pub fn with_model(mut self, model: String, dims: usize) -> Self {
        self.model = model;
        self.dims = dims;
        self
    }

    pub fn with_base_url(mut self, url: String) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedding {
    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        debug!(model = %self.model, count = texts.len(), "embedding via openai");

        let request = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(&self.api_key);
        let mut resp: OpenAiEmbedResponse = post_json(
            request,
            "openai",
            &EmbedRequest {
                model: &self.model,
                input: texts,
            },
        )
        .await?;

        // The API may answer out of order.
        resp.data.sort_by_key(|item| item.index);
        check_count("openai", texts.len(), resp.data.len())?;
        Ok(resp.data.into_iter().map(|item| item.embedding).collect())
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn name(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Local Ollama server, batched through `/api/embed`.
pub struct OllamaEmbedding {
    client: reqwest::Client,
    base_url: String,
    model: String,
    dims: usize,
}

impl OllamaEmbedding {
    pub fn new(model: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: "http://127.0.0.1:11434".into(),
            model: model.to_string(),
            dims: 768,
        }
    }

    pub fn with_base_url(mut self, url: String) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_dimensions(mut self, dims: usize) -> Self {
        self.dims = dims;
        self
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbedding {
    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        debug!(model = %self.model, count = texts.len(), "embedding via ollama");

        let request = self.client.post(format!("{}/api/embed", self.base_url));
        let resp: OllamaEmbedResponse = post_json(
            request,
            "ollama",
            &EmbedRequest {
                model: &self.model,
                input: texts,
            },
        )
        .await?;

        check_count("ollama", texts.len(), resp.embeddings.len())?;
        if resp.embeddings.iter().any(Vec::is_empty) {
            return Err(MnemoError::Embedding(format!(
                "ollama returned an empty embedding for model {}",
                self.model
            )));
        }
        Ok(resp.embeddings)
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn name(&self) -> &str {
        "ollama"
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openai_response_decodes_out_of_order() {
        let raw = r#"{"data":[{"index":1,"embedding":[0.5]},{"index":0,"embedding":[0.25]}],"model":"m"}"#;
        let mut resp: OpenAiEmbedResponse = serde_json::from_str(raw).unwrap();
        resp.data.sort_by_key(|item| item.index);
        assert_eq!(resp.data[0].embedding, vec![0.25]);
    }

    #[test]
    fn test_count_mismatch_is_error() {
        assert!(check_count("openai", 2, 1).is_err());
        assert!(check_count("openai", 2, 2).is_ok());
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let p = OllamaEmbedding::new("nomic-embed-text").with_base_url("http://host:11434/".into());
        assert_eq!(p.base_url, "http://host:11434");
    }
}
