use thiserror::Error;

/// Unified error type for the entire Mnemo workspace.
#[derive(Error, Debug)]
pub enum MnemoError {
    // ── Validation errors ──────────────────────────────────────
    #[error("validation failed: {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("{kind} not found: {id}")]
    NotFound { kind: String, id: String },

    #[error("write rejected by filter rule: {rule}")]
    Rejected { rule: String },

    // ── Storage errors ─────────────────────────────────────────
    #[error("storage error: {backend}: {reason}")]
    Storage { backend: String, reason: String },

    // ── Model errors ───────────────────────────────────────────
    #[error("embedding error: {0}")]
    Embedding(String),

    #[error("llm provider error: {0}")]
    LlmProvider(String),

    #[error("llm rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    // ── Background work ────────────────────────────────────────
    #[error("reflection failed: {0}")]
    Reflection(String),

    #[error("queue error: {0}")]
    Queue(String),

    // ── Config errors ──────────────────────────────────────────
    #[error("config error: {0}")]
    Config(String),

    #[error("config validation failed: {field}: {reason}")]
    ConfigValidation { field: String, reason: String },

    // ── Generic wrappers ───────────────────────────────────────
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl MnemoError {
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn not_found(kind: impl Into<String>, id: impl std::fmt::Display) -> Self {
        Self::NotFound {
            kind: kind.into(),
            id: id.to_string(),
        }
    }

    /// Wrap a collaborator failure as a typed storage error.
    pub fn storage(backend: &str, err: impl std::fmt::Display) -> Self {
        Self::Storage {
            backend: backend.to_string(),
            reason: err.to_string(),
        }
    }

    /// Whether the failure is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited { .. } => true,
            Self::LlmProvider(msg) | Self::Embedding(msg) => {
                msg.contains("HTTP 429")
                    || msg.contains("HTTP 500")
                    || msg.contains("HTTP 502")
                    || msg.contains("HTTP 503")
                    || msg.contains("timed out")
                    || msg.contains("connection reset")
                    || msg.contains("connection closed")
            }
            Self::Storage { reason, .. } => {
                reason.contains("database is locked") || reason.contains("busy")
            }
            _ => false,
        }
    }

    /// Hint from a rate-limit response, in seconds.
    pub fn retry_after(&self) -> Option<u64> {
        if let Self::RateLimited { retry_after_secs } = self {
            Some(*retry_after_secs)
        } else {
            None
        }
    }
}

pub type Result<T> = std::result::Result<T, MnemoError>;
