use std::{path::PathBuf, time::Duration};

pub type Result<T> = std::result::Result<T, Error>;

/// Whether a failed external call is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Network blips, rate limits, server errors.
    Transient,
    /// Bad credentials, exhausted quota, malformed requests or responses.
    Terminal,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transient => f.write_str("transient"),
            Self::Terminal => f.write_str("terminal"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Redb(#[from] redb::Error),

    #[error("database error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("database storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("database transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("database table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("database commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("cannot write index at {path}: {reason}")]
    StorageWrite { path: PathBuf, reason: String },

    #[error("no index found at {0}")]
    IndexNotFound(PathBuf),

    #[error("dimension mismatch: index expects {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("corrupt index: {0}")]
    CorruptIndex(String),

    #[error("failed to load embedding model {model}: {reason}")]
    ModelLoad { model: String, reason: String },

    #[error("embedding service error ({kind}): {message}")]
    EmbeddingService { kind: FailureKind, message: String },

    #[error("generation service error ({kind}): {message}")]
    GenerationService { kind: FailureKind, message: String },

    #[error("prompt is {length} characters, limit is {limit}")]
    PromptTooLarge { length: usize, limit: usize },

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error("data directory does not exist and could not be created: {0}")]
    DataDir(PathBuf),

    #[error("MCP server error: {0}")]
    Mcp(String),
}

impl Error {
    /// Returns `true` when a caller-side retry may succeed.
    ///
    /// Only transient service failures and timeouts qualify; configuration,
    /// input and storage problems never heal on their own.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::EmbeddingService { kind, .. }
            | Self::GenerationService { kind, .. } => {
                *kind == FailureKind::Transient
            }
            Self::Timeout(_) => true,
            _ => false,
        }
    }

    pub(crate) fn storage_write(
        path: impl Into<PathBuf>,
        reason: impl std::fmt::Display,
    ) -> Self {
        Self::StorageWrite {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        let transient = Error::EmbeddingService {
            kind: FailureKind::Transient,
            message: "503".into(),
        };
        let terminal = Error::GenerationService {
            kind: FailureKind::Terminal,
            message: "401".into(),
        };

        assert!(transient.is_transient());
        assert!(!terminal.is_transient());
        assert!(Error::Timeout(Duration::from_secs(1)).is_transient());
        assert!(!Error::InvalidInput("empty".into()).is_transient());
    }

    #[test]
    fn display_includes_kind() {
        let err = Error::EmbeddingService {
            kind: FailureKind::Transient,
            message: "rate limited".into(),
        };
        assert_eq!(
            err.to_string(),
            "embedding service error (transient): rate limited"
        );
    }
}
