//! The request/response seam between the synchronizer and a search engine.
//!
//! The synchronizer needs exactly one capability from the outside world:
//! send a request about an index and get a response back. Anything that can
//! do that (an HTTP client, a test double, the in-memory [`crate::engine`])
//! implements [`Transport`].
//!
//! Any response the engine produces, including `404` or `409`, comes back as
//! `Ok(TransportResponse)`. `Err(TransportError)` means no usable response
//! was obtained.

pub mod wire;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// The kind of request being sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    CreateIndex,
    GetIndex,
    DeleteIndex,
    IndexDocument,
    GetDocument,
    DeleteDocument,
    Bulk,
    Search,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::CreateIndex => "create_index",
            Operation::GetIndex => "get_index",
            Operation::DeleteIndex => "delete_index",
            Operation::IndexDocument => "index_document",
            Operation::GetDocument => "get_document",
            Operation::DeleteDocument => "delete_document",
            Operation::Bulk => "bulk",
            Operation::Search => "search",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single request about one index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportRequest {
    pub request_id: Uuid,
    pub operation: Operation,
    pub index: String,
    pub body: serde_json::Value,
}

impl TransportRequest {
    pub fn new(operation: Operation, index: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            request_id: Uuid::now_v7(),
            operation,
            index: index.into(),
            body,
        }
    }
}

/// The engine's answer: an HTTP-style status and a JSON body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportResponse {
    pub status: u16,
    pub body: serde_json::Value,
}

impl TransportResponse {
    pub fn new(status: u16, body: serde_json::Value) -> Self {
        Self { status, body }
    }

    pub fn ok(body: serde_json::Value) -> Self {
        Self::new(200, body)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Failure to obtain a usable response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("unexpected status {status}: {reason}")]
    Status { status: u16, reason: String },
    #[error("malformed response: {0}")]
    Malformed(String),
}

/// The single capability the synchronizer needs from a search engine.
///
/// `timeout` is the caller's deadline for this request. Implementations may
/// use it to configure their own client; the synchronizer enforces it
/// regardless.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(
        &self,
        request: TransportRequest,
        timeout: Duration,
    ) -> Result<TransportResponse, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_names() {
        assert_eq!(Operation::CreateIndex.to_string(), "create_index");
        assert_eq!(Operation::Bulk.as_str(), "bulk");
        assert_eq!(
            serde_json::to_string(&Operation::DeleteDocument).unwrap(),
            "\"delete_document\""
        );
    }

    #[test]
    fn request_ids_are_unique() {
        let a = TransportRequest::new(Operation::Search, "movies", serde_json::Value::Null);
        let b = TransportRequest::new(Operation::Search, "movies", serde_json::Value::Null);
        assert_ne!(a.request_id, b.request_id);
        assert_eq!(a.index, "movies");
    }

    #[test]
    fn success_range() {
        assert!(TransportResponse::new(200, serde_json::Value::Null).is_success());
        assert!(TransportResponse::new(201, serde_json::Value::Null).is_success());
        assert!(!TransportResponse::new(404, serde_json::Value::Null).is_success());
        assert!(!TransportResponse::new(409, serde_json::Value::Null).is_success());
    }

    #[test]
    fn error_display() {
        let err = TransportError::Status {
            status: 503,
            reason: "cluster unavailable".into(),
        };
        assert_eq!(err.to_string(), "unexpected status 503: cluster unavailable");
    }
}
