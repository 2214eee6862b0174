use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mnemo_core::*;
use rusqlite::types::Value as SqlValue;
use rusqlite::{OptionalExtension, params, params_from_iter};
use std::str::FromStr;
use tracing::debug;
use uuid::Uuid;

use crate::db::{Database, fmt_ts, parse_json_map, parse_ts, sql_err};

/// Relational memory index on SQLite.
#[derive(Clone)]
pub struct SqliteIndex {
    db: Database,
}

const ENTRY_COLUMNS: &str = "id, agent_id, memory_type, session_id, storage_location, importance, metadata, created_at, accessed_at, access_count";

struct RawEntry {
    id: String,
    agent_id: String,
    memory_type: String,
    session_id: Option<String>,
    storage_location: Option<String>,
    importance: Option<i64>,
    metadata: String,
    created_at: String,
    accessed_at: Option<String>,
    access_count: i64,
}

impl RawEntry {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            agent_id: row.get(1)?,
            memory_type: row.get(2)?,
            session_id: row.get(3)?,
            storage_location: row.get(4)?,
            importance: row.get(5)?,
            metadata: row.get(6)?,
            created_at: row.get(7)?,
            accessed_at: row.get(8)?,
            access_count: row.get(9)?,
        })
    }

    fn into_entry(self) -> Result<IndexEntry> {
        Ok(IndexEntry {
            id: parse_uuid(&self.id)?,
            agent_id: parse_uuid(&self.agent_id)?,
            kind: MemoryKind::from_str(&self.memory_type)?,
            session_id: self.session_id.as_deref().map(parse_uuid).transpose()?,
            storage_location: self.storage_location.as_deref().and_then(StorageLocation::parse),
            importance: self.importance.map(|i| i.clamp(0, u8::MAX as i64) as u8),
            metadata: parse_json_map(&self.metadata)?,
            created_at: parse_ts(&self.created_at)?,
            accessed_at: self.accessed_at.as_deref().map(parse_ts).transpose()?,
            access_count: self.access_count.max(0) as u32,
        })
    }
}

fn parse_uuid(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|e| MnemoError::storage("sqlite", format!("bad id '{raw}': {e}")))
}

impl SqliteIndex {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Build the WHERE clause and bound values for an index query.
    fn where_clause(query: &IndexQuery) -> (String, Vec<SqlValue>) {
        let mut clauses = Vec::new();
        let mut values = Vec::new();

        if let Some(agent) = query.agent_id {
            clauses.push("agent_id = ?".to_string());
            values.push(SqlValue::Text(agent.to_string()));
        }
        if let Some(kind) = query.kind {
            clauses.push("memory_type = ?".to_string());
            values.push(SqlValue::Text(kind.as_str().to_string()));
        }
        if let Some(session) = query.session_id {
            clauses.push("session_id = ?".to_string());
            values.push(SqlValue::Text(session.to_string()));
        }
        if let Some(after) = query.created_after {
            clauses.push("created_at >= ?".to_string());
            values.push(SqlValue::Text(fmt_ts(&after)));
        }
        if let Some(before) = query.created_before {
            clauses.push("created_at <= ?".to_string());
            values.push(SqlValue::Text(fmt_ts(&before)));
        }
        if let Some(min) = query.min_importance {
            clauses.push("importance >= ?".to_string());
            values.push(SqlValue::Integer(min as i64));
        }
        if let Some(below) = query.importance_below {
            clauses.push("importance IS NOT NULL AND importance < ?".to_string());
            values.push(SqlValue::Real(below));
        }
        if let Some(idle) = query.idle_since {
            let ts = fmt_ts(&idle);
            clauses.push("(accessed_at < ? OR (accessed_at IS NULL AND created_at < ?))".to_string());
            values.push(SqlValue::Text(ts.clone()));
            values.push(SqlValue::Text(ts));
        }

        let sql = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };
        (sql, values)
    }
}

#[async_trait]
impl MemoryIndex for SqliteIndex {
    async fn insert(&self, entry: &IndexEntry) -> Result<()> {
        let metadata = serde_json::to_string(&entry.metadata)?;
        let db = self.db.conn();
        db.execute(
            "INSERT INTO memories (id, agent_id, memory_type, session_id, storage_location, importance, metadata, created_at, accessed_at, access_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                entry.id.to_string(),
                entry.agent_id.to_string(),
                entry.kind.as_str(),
                entry.session_id.map(|s| s.to_string()),
                entry.storage_location.as_ref().map(|l| l.to_string()),
                entry.importance.map(|i| i as i64),
                metadata,
                fmt_ts(&entry.created_at),
                entry.accessed_at.as_ref().map(fmt_ts),
                entry.access_count as i64,
            ],
        )
        .map_err(sql_err)?;
        debug!(id = %entry.id, kind = %entry.kind, "index row inserted");
        Ok(())
    }

    async fn get(&self, id: MemoryId) -> Result<Option<IndexEntry>> {
        let raw = {
            let db = self.db.conn();
            db.query_row(
                &format!("SELECT {ENTRY_COLUMNS} FROM memories WHERE id = ?1"),
                params![id.to_string()],
                RawEntry::from_row,
            )
            .optional()
            .map_err(sql_err)?
        };
        raw.map(RawEntry::into_entry).transpose()
    }

    async fn query(&self, query: &IndexQuery) -> Result<Vec<IndexEntry>> {
        let (where_sql, mut values) = Self::where_clause(query);
        let order = match query.order {
            IndexOrder::CreatedDesc => "created_at DESC, id ASC",
            IndexOrder::CreatedAsc => "created_at ASC, id ASC",
            IndexOrder::ImportanceDesc => "importance DESC, created_at DESC, id ASC",
        };
        let mut sql = format!("SELECT {ENTRY_COLUMNS} FROM memories{where_sql} ORDER BY {order}");
        if let Some(limit) = query.limit {
            sql.push_str(" LIMIT ?");
            values.push(SqlValue::Integer(limit as i64));
        }

        let raws: Vec<RawEntry> = {
            let db = self.db.conn();
            let mut stmt = db.prepare(&sql).map_err(sql_err)?;
            stmt.query_map(params_from_iter(values), RawEntry::from_row)
                .map_err(sql_err)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(sql_err)?
        };
        raws.into_iter().map(RawEntry::into_entry).collect()
    }

    async fn delete(&self, id: MemoryId) -> Result<bool> {
        let db = self.db.conn();
        let rows = db
            .execute("DELETE FROM memories WHERE id = ?1", params![id.to_string()])
            .map_err(sql_err)?;
        Ok(rows > 0)
    }

    async fn track_access(&self, id: MemoryId, at: DateTime<Utc>) -> Result<()> {
        let db = self.db.conn();
        let rows = db
            .execute(
                "UPDATE memories SET access_count = access_count + 1, accessed_at = ?2 WHERE id = ?1",
                params![id.to_string(), fmt_ts(&at)],
            )
            .map_err(sql_err)?;
        if rows == 0 {
            return Err(MnemoError::not_found("memory", id));
        }
        Ok(())
    }

    async fn archive(&self, entry: &IndexEntry, content: Option<&str>) -> Result<()> {
        let record = serde_json::to_string(entry)?;
        let db = self.db.conn();
        db.execute(
            "INSERT INTO memory_archive (id, agent_id, memory_type, content, record, archived_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET content = excluded.content, record = excluded.record, archived_at = excluded.archived_at",
            params![
                entry.id.to_string(),
                entry.agent_id.to_string(),
                entry.kind.as_str(),
                content,
                record,
                fmt_ts(&Utc::now()),
            ],
        )
        .map_err(sql_err)?;
        Ok(())
    }

    async fn configured_agents(&self) -> Result<Vec<AgentId>> {
        let ids: Vec<String> = {
            let db = self.db.conn();
            let mut stmt = db
                .prepare("SELECT agent_id FROM agent_configs ORDER BY agent_id")
                .map_err(sql_err)?;
            stmt.query_map([], |row| row.get::<_, String>(0))
                .map_err(sql_err)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(sql_err)?
        };
        ids.iter().map(|s| parse_uuid(s)).collect()
    }

    async fn agent_config(&self, agent_id: AgentId) -> Result<AgentConfig> {
        let raw: Option<String> = {
            let db = self.db.conn();
            db.query_row(
                "SELECT config FROM agent_configs WHERE agent_id = ?1",
                params![agent_id.to_string()],
                |row| row.get(0),
            )
            .optional()
            .map_err(sql_err)?
        };
        match raw {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(AgentConfig::default()),
        }
    }

    async fn save_agent_config(&self, agent_id: AgentId, config: &AgentConfig) -> Result<()> {
        let json = serde_json::to_string(config)?;
        let db = self.db.conn();
        db.execute(
            "INSERT INTO agent_configs (agent_id, config, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(agent_id) DO UPDATE SET config = excluded.config, updated_at = excluded.updated_at",
            params![agent_id.to_string(), json, fmt_ts(&Utc::now())],
        )
        .map_err(sql_err)?;
        Ok(())
    }

    async fn create_session(&self, session: &Session) -> Result<()> {
        let metadata = serde_json::to_string(&session.metadata)?;
        let db = self.db.conn();
        db.execute(
            "INSERT INTO sessions (id, agent_id, metadata, created_at, ended_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                session.id.to_string(),
                session.agent_id.to_string(),
                metadata,
                fmt_ts(&session.created_at),
                session.ended_at.as_ref().map(fmt_ts),
            ],
        )
        .map_err(sql_err)?;
        Ok(())
    }

    async fn get_session(&self, id: SessionId) -> Result<Option<Session>> {
        type Row = (String, String, String, String, Option<String>);
        let raw: Option<Row> = {
            let db = self.db.conn();
            db.query_row(
                "SELECT id, agent_id, metadata, created_at, ended_at FROM sessions WHERE id = ?1",
                params![id.to_string()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
            )
            .optional()
            .map_err(sql_err)?
        };
        raw.map(|(id, agent_id, metadata, created_at, ended_at)| {
            Ok(Session {
                id: parse_uuid(&id)?,
                agent_id: parse_uuid(&agent_id)?,
                metadata: parse_json_map(&metadata)?,
                created_at: parse_ts(&created_at)?,
                ended_at: ended_at.as_deref().map(parse_ts).transpose()?,
            })
        })
        .transpose()
    }

    async fn end_session(&self, id: SessionId, at: DateTime<Utc>) -> Result<bool> {
        let db = self.db.conn();
        let rows = db
            .execute(
                "UPDATE sessions SET ended_at = ?2 WHERE id = ?1 AND ended_at IS NULL",
                params![id.to_string(), fmt_ts(&at)],
            )
            .map_err(sql_err)?;
        Ok(rows > 0)
    }
}
