use mnemo_core::Result;
use std::path::Path;
use std::sync::Arc;

use crate::{Database, MemoryCache, SqliteGraphStore, SqliteIndex, SqliteVectorStore};

/// The full set of local storage collaborators over one database.
#[derive(Clone)]
pub struct LocalStore {
    pub index: Arc<SqliteIndex>,
    pub vectors: Arc<SqliteVectorStore>,
    pub graph: Arc<SqliteGraphStore>,
    pub cache: Arc<MemoryCache>,
}

impl LocalStore {
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self::from_database(Database::open(path)?))
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::from_database(Database::open_in_memory()?))
    }

    fn from_database(db: Database) -> Self {
        Self {
            index: Arc::new(SqliteIndex::new(db.clone())),
            vectors: Arc::new(SqliteVectorStore::new(db.clone())),
            graph: Arc::new(SqliteGraphStore::new(db)),
            cache: Arc::new(MemoryCache::new()),
        }
    }
}
