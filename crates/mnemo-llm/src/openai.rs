use async_trait::async_trait;
use mnemo_core::{MnemoError, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::provider::*;

/// Chat completions against any OpenAI-compatible endpoint.
pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
    provider_name: String,
}

impl OpenAiProvider {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: "https://api.openai.com/v1".into(),
            provider_name: "openai".into(),
        }
    }

    /// Point at another compatible server, reported under `name`.
    pub fn with_base_url(mut self, url: String, name: String) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self.provider_name = name;
        self
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_completion_tokens: Option<u32>,
}

impl<'a> ChatRequest<'a> {
    fn from_request(request: &'a LlmRequest) -> Self {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &request.system {
            messages.push(ChatMessage {
                role: "system",
                content: system,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: &request.prompt,
        });

        let completion_style = uses_max_completion_tokens(&request.model);
        Self {
            model: &request.model,
            temperature: request.temperature,
            messages,
            max_tokens: (!completion_style).then_some(request.max_tokens),
            max_completion_tokens: completion_style.then_some(request.max_tokens),
        }
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

impl ChatResponse {
    fn into_response(self) -> LlmResponse {
        let usage = self
            .usage
            .map(|u| Usage {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
            })
            .unwrap_or_default();
        let (text, finish) = match self.choices.into_iter().next() {
            Some(choice) => (choice.message.content.unwrap_or_default(), choice.finish_reason),
            None => (String::new(), None),
        };
        LlmResponse {
            text,
            usage,
            stop_reason: match finish.as_deref() {
                Some("length") => StopReason::MaxTokens,
                Some("content_filter") => StopReason::ContentFilter,
                _ => StopReason::EndTurn,
            },
        }
    }
}

/// Reasoning models reject `max_tokens` and take `max_completion_tokens`.
fn uses_max_completion_tokens(model: &str) -> bool {
    let m = model.to_lowercase();
    ["o1", "o3", "o4", "gpt-5"].iter().any(|p| m.starts_with(p))
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        &self.provider_name
    }

    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse> {
        debug!(model = %request.model, prompt_chars = request.prompt.len(), "sending completion request");

        let resp = self
            .authorized(self.client.post(format!("{}/chat/completions", self.base_url)))
            .json(&ChatRequest::from_request(request))
            .send()
            .await
            .map_err(|e| MnemoError::LlmProvider(e.to_string()))?;

        let status = resp.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = resp
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(1);
            return Err(MnemoError::RateLimited { retry_after_secs });
        }
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(MnemoError::LlmProvider(format!("HTTP {status}: {text}")));
        }

        let body: ChatResponse = resp
            .json()
            .await
            .map_err(|e| MnemoError::LlmProvider(format!("response parse error: {e}")))?;
        Ok(body.into_response())
    }

    async fn health_check(&self) -> Result<()> {
        let resp = self
            .authorized(self.client.get(format!("{}/models", self.base_url)))
            .send()
            .await
            .map_err(|e| MnemoError::LlmProvider(e.to_string()))?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(MnemoError::LlmProvider(format!("HTTP {}", resp.status())))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_completion_tokens_models() {
        assert!(uses_max_completion_tokens("o3-mini"));
        assert!(uses_max_completion_tokens("gpt-5"));
        assert!(!uses_max_completion_tokens("gpt-4o-mini"));
    }

    #[test]
    fn test_request_body_shape() {
        let req = LlmRequest::new("gpt-4o-mini", "hello").with_system("be brief").with_max_tokens(42);
        let body = serde_json::to_value(ChatRequest::from_request(&req)).unwrap();
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "hello");
        assert_eq!(body["max_tokens"], 42);
        assert!(body.get("max_completion_tokens").is_none());
    }

    #[test]
    fn test_response_decoding() {
        let raw = r#"{"choices":[{"message":{"content":"hi"},"finish_reason":"length"}],"usage":{"prompt_tokens":3,"completion_tokens":1}}"#;
        let resp = serde_json::from_str::<ChatResponse>(raw).unwrap().into_response();
        assert_eq!(resp.text, "hi");
        assert_eq!(resp.stop_reason, StopReason::MaxTokens);
        assert_eq!(resp.usage.total_tokens(), 4);

        let empty = serde_json::from_str::<ChatResponse>("{}").unwrap().into_response();
        assert_eq!(empty.text, "");
        assert_eq!(empty.stop_reason, StopReason::EndTurn);
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let p = OpenAiProvider::new(None)
            .with_base_url("http://localhost:11434/v1/".into(), "ollama".into());
        assert_eq!(p.base_url, "http://localhost:11434/v1");
        assert_eq!(p.name(), "ollama");
    }
}
