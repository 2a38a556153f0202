use crate::index::IndexState;
use crate::transport::{Operation, TransportError};
use std::time::Duration;
use thiserror::Error;

pub type IndexResult<T> = Result<T, IndexError>;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("invalid index spec: {0}")]
    InvalidSpec(String),
    #[error("invalid document: {0}")]
    InvalidDocument(String),
    #[error("invalid query: {0}")]
    InvalidQuery(String),
    #[error("index `{index}` already exists with different settings")]
    IndexConflict { index: String },
    #[error("index `{index}` is not ready (state: {state})")]
    IndexNotReady { index: String, state: IndexState },
    #[error("index `{index}` has a state transition in progress")]
    IndexBusy { index: String },
    #[error("index `{index}` is being deleted")]
    IndexDeleting { index: String },
    #[error("document `{id}` rejected by index `{index}`: {reason}")]
    Rejected {
        index: String,
        id: String,
        reason: String,
    },
    #[error("version conflict on document `{id}` in index `{index}` (stored version {current})")]
    VersionConflict {
        index: String,
        id: String,
        current: u64,
    },
    #[error("{operation} on index `{index}` failed: {source}")]
    Transport {
        operation: Operation,
        index: String,
        ids: Vec<String>,
        #[source]
        source: TransportError,
    },
    #[error("{operation} on index `{index}` timed out after {after:?}")]
    Timeout {
        operation: Operation,
        index: String,
        ids: Vec<String>,
        after: Duration,
    },
    #[error("{operation} on index `{index}` was cancelled")]
    Cancelled { operation: Operation, index: String },
    #[error("malformed bulk input at line {line}: {reason}")]
    BulkInput { line: usize, reason: String },
    #[error("configuration error: {0}")]
    Config(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl IndexError {
    /// Stable snake_case name of the variant, for logs and metrics labels.
    pub fn kind(&self) -> &'static str {
        match self {
            IndexError::InvalidSpec(_) => "invalid_spec",
            IndexError::InvalidDocument(_) => "invalid_document",
            IndexError::InvalidQuery(_) => "invalid_query",
            IndexError::IndexConflict { .. } => "index_conflict",
            IndexError::IndexNotReady { .. } => "index_not_ready",
            IndexError::IndexBusy { .. } => "index_busy",
            IndexError::IndexDeleting { .. } => "index_deleting",
            IndexError::Rejected { .. } => "rejected",
            IndexError::VersionConflict { .. } => "version_conflict",
            IndexError::Transport { .. } => "transport",
            IndexError::Timeout { .. } => "timeout",
            IndexError::Cancelled { .. } => "cancelled",
            IndexError::BulkInput { .. } => "bulk_input",
            IndexError::Config(_) => "config",
            IndexError::Io(_) => "io",
        }
    }

    /// Whether repeating the same call may succeed. The core never retries
    /// on its own.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            IndexError::Transport { .. } | IndexError::Timeout { .. } | IndexError::VersionConflict { .. }
        )
    }

    /// Document ids the failed request was carrying, if any.
    pub fn attempted_ids(&self) -> &[String] {
        match self {
            IndexError::Transport { ids, .. } | IndexError::Timeout { ids, .. } => ids,
            _ => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_context() {
        let err = IndexError::Transport {
            operation: Operation::Bulk,
            index: "movies".into(),
            ids: vec!["1".into(), "2".into()],
            source: TransportError::Connection("refused".into()),
        };
        assert_eq!(
            err.to_string(),
            "bulk on index `movies` failed: connection failed: refused"
        );
        assert_eq!(err.attempted_ids(), ["1".to_string(), "2".to_string()]);
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn not_ready_names_state() {
        let err = IndexError::IndexNotReady {
            index: "movies".into(),
            state: IndexState::Absent,
        };
        assert_eq!(err.to_string(), "index `movies` is not ready (state: absent)");
        assert_eq!(err.kind(), "index_not_ready");
    }

    #[test]
    fn retryable_errors() {
        let timeout = IndexError::Timeout {
            operation: Operation::CreateIndex,
            index: "movies".into(),
            ids: Vec::new(),
            after: Duration::from_millis(20),
        };
        assert!(timeout.is_retryable());
        assert!(!IndexError::IndexBusy {
            index: "movies".into()
        }
        .is_retryable());
        assert!(!IndexError::InvalidSpec("x".into()).is_retryable());
    }

    #[test]
    fn io_errors_convert() {
        fn read() -> IndexResult<()> {
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "missing"))?;
            Ok(())
        }
        let err = read().unwrap_err();
        assert_eq!(err.kind(), "io");
    }
}
