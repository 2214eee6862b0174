//! # mnemo-core
//!
//! Core types, traits, and primitives for the Mnemo agent memory subsystem.
//! This crate defines the shared vocabulary used by every other crate in the
//! workspace: the memory data model, inbound request shapes, per-agent
//! policies, and the contracts of the storage collaborators (vector store,
//! graph store, relational index, cache).

pub mod error;
pub mod policy;
pub mod request;
pub mod store;
pub mod types;

pub use error::{MnemoError, Result};
pub use policy::{
    FilterAction, FilterRule, FilterSubject, FilterType, FilterVerdict, ForgettingPolicy,
    ForgettingStrategy, MAX_FORGET_DAYS, evaluate_rules,
};
pub use request::{
    MAX_QUERY_LIMIT, MAX_QUERY_OFFSET, MemoryInput, MemoryQuery, MemoryWrite, RagMode, RagQuery,
};
pub use store::{
    Cache, Condition, Direction, EntityQuery, GraphStore, IndexOrder, IndexQuery, MemoryIndex,
    Point, ScoredPoint, VectorFilter, VectorStore,
};
pub use types::*;
