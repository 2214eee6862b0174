use async_trait::async_trait;
use mnemo_core::*;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{Connection, OptionalExtension, params};
use serde_json::Value;
use std::collections::{HashSet, VecDeque};
use tracing::debug;

use crate::db::{Database, parse_json_map, sql_err};

/// Property graph on two SQLite tables. Edges are directed but traversal
/// and path finding walk them in both directions.
#[derive(Clone)]
pub struct SqliteGraphStore {
    db: Database,
}

/// Upper bound on partial paths explored by `find_paths`.
const MAX_PATH_EXPANSIONS: usize = 10_000;
const MAX_PATHS: usize = 10;

impl SqliteGraphStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

fn load_entity(conn: &Connection, id: &str) -> Result<Option<Entity>> {
    let row: Option<(String, String)> = conn
        .query_row(
            "SELECT entity_type, properties FROM entities WHERE id = ?1",
            params![id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()
        .map_err(sql_err)?;
    row.map(|(entity_type, properties)| {
        Ok(Entity {
            id: id.to_string(),
            entity_type,
            properties: parse_json_map(&properties)?,
        })
    })
    .transpose()
}

fn save_entity(conn: &Connection, entity: &Entity) -> Result<()> {
    let properties = serde_json::to_string(&entity.properties)?;
    conn.execute(
        "INSERT INTO entities (id, entity_type, properties) VALUES (?1, ?2, ?3)
         ON CONFLICT(id) DO UPDATE SET entity_type = excluded.entity_type, properties = excluded.properties",
        params![entity.id, entity.entity_type, properties],
    )
    .map_err(sql_err)?;
    Ok(())
}

fn save_relation(conn: &Connection, relation: &Relation) -> Result<()> {
    let properties = serde_json::to_string(&relation.properties)?;
    conn.execute(
        "INSERT INTO relations (from_id, relation_type, to_id, properties) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(from_id, relation_type, to_id) DO UPDATE SET properties = excluded.properties",
        params![relation.from, relation.relation_type, relation.to, properties],
    )
    .map_err(sql_err)?;
    Ok(())
}

/// Relations touching `id` in the given direction, paired with the id at the other end.
/// Sorted by relation type then neighbour id.
fn edges(conn: &Connection, id: &str, direction: Direction) -> Result<Vec<(Relation, String)>> {
    let sql = match direction {
        Direction::Outgoing => {
            "SELECT from_id, relation_type, to_id, properties FROM relations WHERE from_id = ?1"
        }
        Direction::Incoming => {
            "SELECT from_id, relation_type, to_id, properties FROM relations WHERE to_id = ?1"
        }
        Direction::Both => {
            "SELECT from_id, relation_type, to_id, properties FROM relations WHERE from_id = ?1 OR to_id = ?1"
        }
    };
    let rows: Vec<(String, String, String, String)> = {
        let mut stmt = conn.prepare(sql).map_err(sql_err)?;
        stmt.query_map(params![id], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
        })
        .map_err(sql_err)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(sql_err)?
    };

    let mut out = Vec::with_capacity(rows.len());
    for (from, relation_type, to, properties) in rows {
        let other = if from == id { to.clone() } else { from.clone() };
        out.push((
            Relation {
                from,
                to,
                relation_type,
                properties: parse_json_map(&properties)?,
            },
            other,
        ));
    }
    out.sort_by(|a, b| {
        a.0.relation_type
            .cmp(&b.0.relation_type)
            .then_with(|| a.1.cmp(&b.1))
    });
    Ok(out)
}

fn json_to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(*b as i64),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn sql_to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Value::from(f),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::String(format!("<{} bytes>", b.len())),
    }
}

#[async_trait]
impl GraphStore for SqliteGraphStore {
    async fn create_entity(&self, entity: &Entity) -> Result<()> {
        if entity.id.trim().is_empty() {
            return Err(MnemoError::validation("id", "entity id must not be empty"));
        }
        let db = self.db.conn();
        save_entity(&db, entity)?;
        debug!(id = %entity.id, entity_type = %entity.entity_type, "entity saved");
        Ok(())
    }

    async fn get_entity(&self, id: &str) -> Result<Option<Entity>> {
        let db = self.db.conn();
        load_entity(&db, id)
    }

    async fn update_entity(&self, id: &str, properties: &Metadata) -> Result<Entity> {
        let db = self.db.conn();
        let mut entity = load_entity(&db, id)?.ok_or_else(|| MnemoError::not_found("entity", id))?;
        for (k, v) in properties {
            entity.properties.insert(k.clone(), v.clone());
        }
        save_entity(&db, &entity)?;
        Ok(entity)
    }

    async fn delete_entity(&self, id: &str) -> Result<bool> {
        let db = self.db.conn();
        let rows = db
            .execute("DELETE FROM entities WHERE id = ?1", params![id])
            .map_err(sql_err)?;
        Ok(rows > 0)
    }

    async fn create_relation(&self, relation: &Relation) -> Result<()> {
        let db = self.db.conn();
        for end in [&relation.from, &relation.to] {
            if load_entity(&db, end)?.is_none() {
                return Err(MnemoError::not_found("entity", end));
            }
        }
        save_relation(&db, relation)
    }

    async fn delete_relation(&self, from: &str, relation_type: &str, to: &str) -> Result<bool> {
        let db = self.db.conn();
        let rows = db
            .execute(
                "DELETE FROM relations WHERE from_id = ?1 AND relation_type = ?2 AND to_id = ?3",
                params![from, relation_type, to],
            )
            .map_err(sql_err)?;
        Ok(rows > 0)
    }

    async fn store_fact(&self, fact: &Fact) -> Result<()> {
        let db = self.db.conn();
        for name in [&fact.subject, &fact.object] {
            if load_entity(&db, name)?.is_none() {
                save_entity(&db, &Entity::new(name.as_str(), "concept").with_property("name", name.as_str()))?;
            }
        }
        let mut relation = Relation::new(fact.subject.as_str(), fact.predicate.as_str(), fact.object.as_str());
        if let Some(confidence) = fact.confidence {
            relation.properties.insert("confidence".into(), Value::from(confidence as f64));
        }
        if let Some(ref source) = fact.source {
            relation.properties.insert("source".into(), Value::from(source.as_str()));
        }
        save_relation(&db, &relation)
    }

    async fn find_entities(&self, query: &EntityQuery) -> Result<Vec<Entity>> {
        let mut sql = String::from("SELECT id, entity_type, properties FROM entities WHERE 1 = 1");
        let mut values = Vec::new();
        if let Some(ref t) = query.entity_type {
            sql.push_str(" AND entity_type = ?");
            values.push(SqlValue::Text(t.clone()));
        }
        if let Some(ref r) = query.relation_type {
            sql.push_str(
                " AND id IN (SELECT from_id FROM relations WHERE relation_type = ? \
                 UNION SELECT to_id FROM relations WHERE relation_type = ?)",
            );
            values.push(SqlValue::Text(r.clone()));
            values.push(SqlValue::Text(r.clone()));
        }
        sql.push_str(" ORDER BY id");

        let rows: Vec<(String, String, String)> = {
            let db = self.db.conn();
            let mut stmt = db.prepare(&sql).map_err(sql_err)?;
            stmt.query_map(rusqlite::params_from_iter(values), |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })
            .map_err(sql_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(sql_err)?
        };

        let limit = query.limit.unwrap_or(usize::MAX);
        let mut out = Vec::new();
        for (id, entity_type, properties) in rows {
            let properties = parse_json_map(&properties)?;
            let matches = query
                .properties
                .iter()
                .all(|(k, v)| properties.get(k) == Some(v));
            if matches {
                out.push(Entity { id, entity_type, properties });
                if out.len() >= limit {
                    break;
                }
            }
        }
        Ok(out)
    }

    async fn traverse(&self, start: &str, depth: usize) -> Result<Vec<GraphPath>> {
        let db = self.db.conn();
        let Some(root) = load_entity(&db, start)? else {
            return Ok(vec![]);
        };

        let mut visited: HashSet<String> = HashSet::from([root.id.clone()]);
        let mut frontier: VecDeque<(String, GraphPath)> = VecDeque::new();
        frontier.push_back((
            root.id.clone(),
            GraphPath {
                nodes: vec![root],
                relations: vec![],
            },
        ));

        let mut paths = Vec::new();
        while let Some((node_id, path)) = frontier.pop_front() {
            if path.relations.len() >= depth {
                continue;
            }
            for (relation, other) in edges(&db, &node_id, Direction::Both)? {
                if visited.contains(&other) {
                    continue;
                }
                // Dangling edge after an entity delete.
                let Some(entity) = load_entity(&db, &other)? else {
                    continue;
                };
                visited.insert(other.clone());
                let mut next = path.clone();
                next.relations.push(relation);
                next.nodes.push(entity);
                paths.push(next.clone());
                frontier.push_back((other, next));
            }
        }
        debug!(start, depth, reached = paths.len(), "graph traversal");
        Ok(paths)
    }

    async fn find_paths(&self, from: &str, to: &str, max_depth: usize) -> Result<Vec<GraphPath>> {
        let db = self.db.conn();
        let Some(root) = load_entity(&db, from)? else {
            return Ok(vec![]);
        };
        if load_entity(&db, to)?.is_none() {
            return Ok(vec![]);
        }

        let mut found = Vec::new();
        let mut expansions = 0usize;
        let mut queue: VecDeque<GraphPath> = VecDeque::from([GraphPath {
            nodes: vec![root],
            relations: vec![],
        }]);

        // Breadth-first over simple paths, so results come out shortest first.
        while let Some(path) = queue.pop_front() {
            if found.len() >= MAX_PATHS || expansions >= MAX_PATH_EXPANSIONS {
                break;
            }
            expansions += 1;
            let Some(tail) = path.nodes.last() else {
                continue;
            };
            if tail.id == to && !path.relations.is_empty() {
                found.push(path);
                continue;
            }
            if path.relations.len() >= max_depth {
                continue;
            }
            for (relation, other) in edges(&db, &tail.id, Direction::Both)? {
                if path.nodes.iter().any(|n| n.id == other) {
                    continue;
                }
                let Some(entity) = load_entity(&db, &other)? else {
                    continue;
                };
                let mut next = path.clone();
                next.relations.push(relation);
                next.nodes.push(entity);
                queue.push_back(next);
            }
        }
        Ok(found)
    }

    async fn related(
        &self,
        id: &str,
        relation_type: Option<&str>,
        direction: Direction,
    ) -> Result<Vec<(Relation, Entity)>> {
        let db = self.db.conn();
        let mut out = Vec::new();
        for (relation, other) in edges(&db, id, direction)? {
            if relation_type.is_some_and(|t| t != relation.relation_type) {
                continue;
            }
            if let Some(entity) = load_entity(&db, &other)? {
                out.push((relation, entity));
            }
        }
        Ok(out)
    }

    async fn execute(&self, query: &str, params: &Metadata) -> Result<Vec<Metadata>> {
        let head = query.trim_start().to_ascii_lowercase();
        if !(head.starts_with("select") || head.starts_with("with")) {
            return Err(MnemoError::validation(
                "query",
                "only read-only SELECT queries may be executed against the graph",
            ));
        }

        let db = self.db.conn();
        let mut stmt = db.prepare(query).map_err(sql_err)?;
        if !stmt.readonly() {
            return Err(MnemoError::validation("query", "statement is not read-only"));
        }
        for (name, value) in params {
            let index = stmt
                .parameter_index(&format!(":{name}"))
                .map_err(sql_err)?
                .ok_or_else(|| MnemoError::validation("params", format!("unknown parameter '{name}'")))?;
            stmt.raw_bind_parameter(index, json_to_sql(value))
                .map_err(sql_err)?;
        }

        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
        let mut rows = stmt.raw_query();
        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(sql_err)? {
            let mut record = Metadata::new();
            for (i, name) in columns.iter().enumerate() {
                let value = row.get_ref(i).map_err(sql_err)?;
                record.insert(name.clone(), sql_to_json(value));
            }
            out.push(record);
        }
        Ok(out)
    }
}
