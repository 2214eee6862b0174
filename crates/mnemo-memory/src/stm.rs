use mnemo_config::schema::StmConfig;
use mnemo_core::{Cache, MnemoError, Result, SessionId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const KEY_PREFIX: &str = "stm:";
const WINDOW_SUFFIX: &str = ":window_size";

/// Aggregate over every live STM window.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StmStats {
    pub total_sessions: usize,
    pub total_items: usize,
    pub average_window_fill: f64,
}

/// Sliding window of recent turns per session, held in the cache.
///
/// Each window is a cache list trimmed from the head on every append.
/// Writes refresh the expiry of the window and its size key together, so an
/// idle session's window disappears `ttl_secs` after its last append.
pub struct StmEngine {
    cache: Arc<dyn Cache>,
    config: StmConfig,
}

fn window_key(session_id: SessionId) -> String {
    format!("{KEY_PREFIX}{session_id}")
}

fn window_size_key(session_id: SessionId) -> String {
    format!("{KEY_PREFIX}{session_id}{WINDOW_SUFFIX}")
}

impl StmEngine {
    pub fn new(cache: Arc<dyn Cache>, config: StmConfig) -> Self {
        Self { cache, config }
    }

    fn ttl(&self) -> Duration {
        Duration::from_secs(self.config.ttl_secs)
    }

    /// Append a turn, trim the window, and restart the expiry clock.
    /// Returns the window length after trimming.
    pub async fn add(&self, session_id: SessionId, content: &str) -> Result<usize> {
        let key = window_key(session_id);
        let window = self.window_size(session_id).await;

        let len = self.cache.rpush(&key, content).await?;
        if len > window {
            self.cache.ltrim(&key, -(window as isize), -1).await?;
        }
        self.cache.expire(&key, self.ttl()).await?;
        self.cache.expire(&window_size_key(session_id), self.ttl()).await?;

        debug!(session_id = %session_id, content_len = content.len(), window, "appended to STM");
        Ok(len.min(window))
    }

    /// The window, oldest first.
    pub async fn get(&self, session_id: SessionId) -> Result<Vec<String>> {
        self.cache.lrange(&window_key(session_id), 0, -1).await
    }

    pub async fn get_as_string(&self, session_id: SessionId, separator: &str) -> Result<String> {
        Ok(self.get(session_id).await?.join(separator))
    }

    pub async fn clear(&self, session_id: SessionId) -> Result<()> {
        self.cache.del(&window_key(session_id)).await?;
        self.cache.del(&window_size_key(session_id)).await?;
        info!(session_id = %session_id, "cleared STM");
        Ok(())
    }

    pub async fn has(&self, session_id: SessionId) -> Result<bool> {
        self.cache.exists(&window_key(session_id)).await
    }

    pub async fn len(&self, session_id: SessionId) -> Result<usize> {
        self.cache.llen(&window_key(session_id)).await
    }

    /// Remaining lifetime of the window, if it exists.
    pub async fn ttl_remaining(&self, session_id: SessionId) -> Result<Option<Duration>> {
        self.cache.ttl(&window_key(session_id)).await
    }

    /// Extend the expiry without touching content. A custom window size lives as long as the window.
    pub async fn refresh(&self, session_id: SessionId) -> Result<bool> {
        let live = self.cache.expire(&window_key(session_id), self.ttl()).await?;
        if live {
            self.cache.expire(&window_size_key(session_id), self.ttl()).await?;
        }
        Ok(live)
    }

    /// Change a session's capacity and trim the existing window to it.
    pub async fn set_window_size(&self, session_id: SessionId, size: usize) -> Result<()> {
        if size == 0 || size > self.config.max_window_size {
            return Err(MnemoError::validation(
                "window_size",
                format!("must be between 1 and {}", self.config.max_window_size),
            ));
        }
        self.cache
            .set(&window_size_key(session_id), &size.to_string(), Some(self.ttl()))
            .await?;

        let key = window_key(session_id);
        if self.cache.llen(&key).await? > size {
            self.cache.ltrim(&key, -(size as isize), -1).await?;
        }
        info!(session_id = %session_id, size, "set STM window size");
        Ok(())
    }

    /// Capacity for a session; the configured default when unset or unreadable.
    pub async fn window_size(&self, session_id: SessionId) -> usize {
        match self.cache.get(&window_size_key(session_id)).await {
            Ok(Some(raw)) => raw.parse().unwrap_or(self.config.window_size),
            Ok(None) => self.config.window_size,
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "failed to read STM window size");
                self.config.window_size
            }
        }
    }

    pub async fn stats(&self) -> Result<StmStats> {
        let keys = self.cache.keys(KEY_PREFIX).await?;
        let mut stats = StmStats::default();
        for key in keys.iter().filter(|k| !k.ends_with(WINDOW_SUFFIX)) {
            stats.total_sessions += 1;
            stats.total_items += self.cache.llen(key).await?;
        }
        if stats.total_sessions > 0 {
            stats.average_window_fill = stats.total_items as f64 / stats.total_sessions as f64;
        }
        Ok(stats)
    }
}
