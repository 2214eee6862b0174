use async_trait::async_trait;
use mnemo_core::*;
use rusqlite::{OptionalExtension, params};
use std::cmp::Ordering;
use tracing::{debug, warn};

use crate::db::{Database, blob_to_vector, parse_json_map, sql_err, vector_to_blob};

/// Exact-search vector store on SQLite. Vectors are LE f32 blobs and
/// search is a full scan of the collection with cosine similarity.
#[derive(Clone)]
pub struct SqliteVectorStore {
    db: Database,
}

/// Compute cosine similarity between two vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

impl SqliteVectorStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    fn load_collection(&self, collection: &str) -> Result<Vec<(String, Vec<u8>, String)>> {
        let db = self.db.conn();
        let mut stmt = db
            .prepare("SELECT id, vector, payload FROM vectors WHERE collection = ?1")
            .map_err(sql_err)?;
        stmt.query_map(params![collection], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?))
        })
        .map_err(sql_err)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(sql_err)
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn upsert(&self, collection: &str, point: Point) -> Result<()> {
        let payload = serde_json::to_string(&point.payload)?;
        let db = self.db.conn();
        db.execute(
            "INSERT INTO vectors (collection, id, vector, payload) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(collection, id) DO UPDATE SET vector = excluded.vector, payload = excluded.payload",
            params![collection, point.id, vector_to_blob(&point.vector), payload],
        )
        .map_err(sql_err)?;
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
        filter: &VectorFilter,
        score_threshold: Option<f32>,
    ) -> Result<Vec<ScoredPoint>> {
        let rows = self.load_collection(collection)?;
        let scanned = rows.len();

        let mut hits: Vec<ScoredPoint> = Vec::new();
        for (id, blob, payload_raw) in rows {
            let payload = parse_json_map(&payload_raw)?;
            if !filter.matches(&payload) {
                continue;
            }
            let Some(stored) = blob_to_vector(&blob) else {
                warn!(collection, id = %id, "skipping point with corrupt vector");
                continue;
            };
            let score = cosine_similarity(vector, &stored);
            if score_threshold.is_some_and(|t| score < t) {
                continue;
            }
            hits.push(ScoredPoint { id, score, payload });
        }

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        hits.truncate(limit);
        debug!(collection, scanned, returned = hits.len(), "vector search");
        Ok(hits)
    }

    async fn retrieve(&self, collection: &str, id: &str) -> Result<Option<Point>> {
        let row: Option<(Vec<u8>, String)> = {
            let db = self.db.conn();
            db.query_row(
                "SELECT vector, payload FROM vectors WHERE collection = ?1 AND id = ?2",
                params![collection, id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(sql_err)?
        };
        let Some((blob, payload)) = row else {
            return Ok(None);
        };
        let vector = blob_to_vector(&blob)
            .ok_or_else(|| MnemoError::storage("sqlite", format!("corrupt vector for {id}")))?;
        Ok(Some(Point {
            id: id.to_string(),
            vector,
            payload: parse_json_map(&payload)?,
        }))
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<()> {
        let db = self.db.conn();
        db.execute(
            "DELETE FROM vectors WHERE collection = ?1 AND id = ?2",
            params![collection, id],
        )
        .map_err(sql_err)?;
        Ok(())
    }

    async fn count(&self, collection: &str, filter: &VectorFilter) -> Result<usize> {
        if filter.is_empty() {
            let db = self.db.conn();
            let n: i64 = db
                .query_row(
                    "SELECT COUNT(*) FROM vectors WHERE collection = ?1",
                    params![collection],
                    |row| row.get(0),
                )
                .map_err(sql_err)?;
            return Ok(n as usize);
        }
        let mut n = 0;
        for (_, _, payload) in self.load_collection(collection)? {
            if filter.matches(&parse_json_map(&payload)?) {
                n += 1;
            }
        }
        Ok(n)
    }
}
