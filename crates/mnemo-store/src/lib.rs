//! # mnemo-store
//!
//! Local implementations of the storage collaborators the memory engines
//! depend on. One SQLite database holds the relational index, the vector
//! collections and the knowledge graph; the cache lives in process.

pub mod cache;
pub mod db;
pub mod graph;
pub mod index;
pub mod store;
pub mod vector;

pub use cache::MemoryCache;
pub use db::Database;
pub use graph::SqliteGraphStore;
pub use index::SqliteIndex;
pub use store::LocalStore;
pub use vector::{SqliteVectorStore, cosine_similarity};
