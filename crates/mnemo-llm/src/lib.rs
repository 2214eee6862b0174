//! # mnemo-llm
//!
//! Abstraction layer over the two model collaborators the memory engines
//! consume: single-turn chat completion (insights, summaries) and text
//! embedding. Also hosts the embedding cache and the FIFO batch processor.

pub mod batch;
pub mod cached;
pub mod embedding;
pub mod mock;
pub mod openai;
pub mod provider;
pub mod retry;

pub use batch::{BatchJob, BatchProcessor, BatchStats, JobStatus};
pub use cached::CachedEmbedding;
pub use embedding::{EmbeddingProvider, OllamaEmbedding, OpenAiEmbedding};
pub use mock::{MockEmbedding, MockProvider};
pub use provider::{LlmProvider, LlmRequest, LlmResponse, StopReason, Usage};
pub use retry::{Backoff, RetryingProvider};
