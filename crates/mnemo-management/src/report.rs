//! Stats, export and purge over an agent's index rows.

use chrono::{DateTime, SecondsFormat, Utc};
use mnemo_core::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

use crate::forgetting::Forgetter;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryStats {
    pub total_memories: usize,
    pub by_type: BTreeMap<String, usize>,
    /// Not tracked by the local store; always 0.
    pub storage_size: u64,
    pub oldest_memory: Option<DateTime<Utc>>,
    pub newest_memory: Option<DateTime<Utc>>,
    pub average_importance: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Json,
    Csv,
}

impl FromStr for ExportFormat {
    type Err = MnemoError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "csv" => Ok(Self::Csv),
            other => Err(MnemoError::validation("format", format!("unsupported export format '{other}'"))),
        }
    }
}

pub struct Reporter {
    index: Arc<dyn MemoryIndex>,
    forgetter: Forgetter,
}

impl Reporter {
    pub fn new(index: Arc<dyn MemoryIndex>, forgetter: Forgetter) -> Self {
        Self { index, forgetter }
    }

    async fn rows(&self, agent_id: AgentId) -> Result<Vec<IndexEntry>> {
        self.index
            .query(&IndexQuery::for_agent(agent_id).order(IndexOrder::CreatedDesc))
            .await
    }

    pub async fn stats(&self, agent_id: AgentId) -> Result<MemoryStats> {
        Ok(summarize(&self.rows(agent_id).await?))
    }

    /// Index rows, newest first.
    pub async fn export(&self, agent_id: AgentId, format: ExportFormat) -> Result<String> {
        let rows = self.rows(agent_id).await?;
        info!(agent_id = %agent_id, rows = rows.len(), format = ?format, "exporting memories");
        match format {
            ExportFormat::Json => Ok(serde_json::to_string_pretty(&rows)?),
            ExportFormat::Csv => Ok(to_csv(&rows)),
        }
    }

    /// Delete every memory of the agent. Returns the number actually deleted.
    pub async fn purge(&self, agent_id: AgentId) -> Result<usize> {
        let rows = self.rows(agent_id).await?;
        let mut deleted = 0;
        for row in &rows {
            match self.forgetter.delete(row).await {
                Ok(()) => deleted += 1,
                Err(e) => warn!(id = %row.id, error = %e, "failed to purge memory"),
            }
        }
        info!(agent_id = %agent_id, deleted, total = rows.len(), "memories purged");
        Ok(deleted)
    }
}

fn summarize(rows: &[IndexEntry]) -> MemoryStats {
    let mut by_type = BTreeMap::new();
    for row in rows {
        *by_type.entry(row.kind.as_str().to_string()).or_insert(0) += 1;
    }
    let importances: Vec<f64> = rows.iter().filter_map(|r| r.importance).map(f64::from).collect();
    let average_importance = if importances.is_empty() {
        0.0
    } else {
        importances.iter().sum::<f64>() / importances.len() as f64
    };
    MemoryStats {
        total_memories: rows.len(),
        by_type,
        storage_size: 0,
        oldest_memory: rows.iter().map(|r| r.created_at).min(),
        newest_memory: rows.iter().map(|r| r.created_at).max(),
        average_importance,
    }
}

fn to_csv(rows: &[IndexEntry]) -> String {
    let mut out = String::from("id,type,importance,created_at\n");
    for row in rows {
        let importance = row.importance.map(|i| i.to_string()).unwrap_or_default();
        let _ = writeln!(
            out,
            "{},{},{importance},{}",
            row.id,
            row.kind,
            row.created_at.to_rfc3339_opts(SecondsFormat::Millis, true)
        );
    }
    out
}
