//! # mnemo-retrieval
//!
//! Read paths over stored memory: similarity search across vector
//! collections, neighbourhood lookups in the knowledge graph, a hybrid of
//! the two, and the standard and agentic RAG pipelines built on top.

pub mod graph;
pub mod hybrid;
pub mod query;
pub mod rag;
pub mod vector;

pub use graph::{GraphContext, GraphRetriever};
pub use hybrid::{HybridParams, HybridResult, HybridRetriever};
pub use query::QueryAnalysis;
pub use rag::{
    AgenticRag, AgenticRagResult, CitedRagResult, ConfidenceRagResult, RagAnswer, RagMetadata,
    RagResult, RagStep, StandardRag, StepAction,
};
pub use vector::{QueryVector, VectorRetriever, VectorSearch};
