use crate::document::Document;
use crate::error::{IndexError, IndexResult};
use crate::values::{FieldValue, Fields};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;

/// Why one document of a bulk call was not written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "reason")]
pub enum FailureReason {
    /// The batch carrying the document got no usable response.
    Transport(String),
    /// The batch carrying the document exceeded its deadline.
    Timeout,
    /// The call was cancelled before the batch was sent.
    Cancelled,
    /// The engine refused this document; carries the engine's reason.
    Rejected(String),
    IndexDeleting,
    IndexNotReady,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::Transport(_) => "transport",
            FailureReason::Timeout => "timeout",
            FailureReason::Cancelled => "cancelled",
            FailureReason::Rejected(_) => "rejected",
            FailureReason::IndexDeleting => "index_deleting",
            FailureReason::IndexNotReady => "index_not_ready",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Transport(reason) => write!(f, "transport error: {reason}"),
            FailureReason::Rejected(reason) => write!(f, "rejected: {reason}"),
            other => f.write_str(other.as_str()),
        }
    }
}

impl From<&IndexError> for FailureReason {
    fn from(err: &IndexError) -> Self {
        match err {
            IndexError::Transport { source, .. } => FailureReason::Transport(source.to_string()),
            IndexError::Timeout { .. } => FailureReason::Timeout,
            IndexError::Cancelled { .. } => FailureReason::Cancelled,
            IndexError::IndexDeleting { .. } => FailureReason::IndexDeleting,
            IndexError::IndexNotReady { .. } => FailureReason::IndexNotReady,
            other => FailureReason::Rejected(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkFailure {
    pub id: String,
    pub reason: FailureReason,
}

impl BulkFailure {
    pub fn new(id: impl Into<String>, reason: FailureReason) -> Self {
        Self {
            id: id.into(),
            reason,
        }
    }
}

/// Result of one `bulk_upsert` call.
///
/// `succeeded + failed.len() == attempted`, and `failed` lists documents in
/// the order they were given.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BulkOutcome {
    attempted: usize,
    succeeded: usize,
    failed: Vec<BulkFailure>,
}

impl BulkOutcome {
    pub(crate) fn from_reports(attempted: usize, reports: impl IntoIterator<Item = BatchReport>) -> Self {
        let mut succeeded = 0;
        let mut failed = Vec::new();
        for report in reports {
            succeeded += report.succeeded;
            failed.extend(report.failed);
        }
        debug_assert_eq!(succeeded + failed.len(), attempted);
        Self {
            attempted,
            succeeded,
            failed,
        }
    }

    pub fn attempted(&self) -> usize {
        self.attempted
    }

    pub fn succeeded(&self) -> usize {
        self.succeeded
    }

    pub fn failed(&self) -> &[BulkFailure] {
        &self.failed
    }

    pub fn failed_ids(&self) -> impl Iterator<Item = &str> {
        self.failed.iter().map(|f| f.id.as_str())
    }

    pub fn is_complete_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Per-batch tally, in the batch's input order.
#[derive(Debug, Default)]
pub(crate) struct BatchReport {
    pub succeeded: usize,
    pub failed: Vec<BulkFailure>,
}

impl BatchReport {
    /// Every document of the batch failed for the same reason.
    pub fn all_failed<'a>(ids: impl IntoIterator<Item = &'a str>, reason: &FailureReason) -> Self {
        Self {
            succeeded: 0,
            failed: ids
                .into_iter()
                .map(|id| BulkFailure::new(id, reason.clone()))
                .collect(),
        }
    }
}

/// Split `docs` into batches of at most `batch_size`, keeping input order.
///
/// A batch never holds the same id twice: a repeated id starts a new batch,
/// so successive writes to one id land in successive requests.
pub fn partition(docs: Vec<Document>, batch_size: usize) -> Vec<Vec<Document>> {
    let batch_size = batch_size.max(1);
    let mut batches = Vec::new();
    let mut current: Vec<Document> = Vec::new();
    let mut ids: HashSet<String> = HashSet::new();
    for doc in docs {
        if current.len() == batch_size || ids.contains(doc.id()) {
            batches.push(std::mem::take(&mut current));
            ids.clear();
        }
        ids.insert(doc.id().to_owned());
        current.push(doc);
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}

/// Parse the action/source bulk format.
///
/// Each document is an action line such as `{"index":{"_index":"movies","_id":"1"}}`
/// followed by its source object on the next non-blank line. `create` is
/// accepted as an action too; the `_index` key is ignored.
pub fn parse_bulk_ndjson(text: &str) -> IndexResult<Vec<Document>> {
    let mut docs = Vec::new();
    let mut lines = text
        .lines()
        .enumerate()
        .map(|(n, line)| (n + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty());

    while let Some((line_no, action)) = lines.next() {
        let id = parse_action(line_no, action)?;
        let Some((source_no, source)) = lines.next() else {
            return Err(IndexError::BulkInput {
                line: line_no,
                reason: format!("action for `{id}` has no source line"),
            });
        };
        docs.push(Document::new(id, parse_source(source_no, source)?));
    }
    Ok(docs)
}

/// Read and parse a bulk file from disk.
pub fn load_bulk_file(path: impl AsRef<Path>) -> IndexResult<Vec<Document>> {
    let text = std::fs::read_to_string(path.as_ref())?;
    let docs = parse_bulk_ndjson(&text)?;
    tracing::debug!(path = %path.as_ref().display(), count = docs.len(), "loaded bulk file");
    Ok(docs)
}

fn parse_json(line: usize, text: &str) -> IndexResult<serde_json::Map<String, serde_json::Value>> {
    match serde_json::from_str(text) {
        Ok(serde_json::Value::Object(map)) => Ok(map),
        Ok(_) => Err(IndexError::BulkInput {
            line,
            reason: "expected a JSON object".into(),
        }),
        Err(e) => Err(IndexError::BulkInput {
            line,
            reason: e.to_string(),
        }),
    }
}

fn parse_action(line: usize, text: &str) -> IndexResult<String> {
    let action = parse_json(line, text)?;
    let meta = ["index", "create"]
        .iter()
        .find_map(|key| action.get(*key))
        .ok_or_else(|| IndexError::BulkInput {
            line,
            reason: "expected an `index` or `create` action".into(),
        })?;
    match meta.get("_id") {
        Some(serde_json::Value::String(id)) if !id.is_empty() => Ok(id.clone()),
        Some(serde_json::Value::Number(n)) => Ok(n.to_string()),
        _ => Err(IndexError::BulkInput {
            line,
            reason: "action is missing `_id`".into(),
        }),
    }
}

fn parse_source(line: usize, text: &str) -> IndexResult<Fields> {
    parse_json(line, text)?
        .into_iter()
        .map(|(field, value)| {
            FieldValue::try_from(value)
                .map(|value| (field.clone(), value))
                .map_err(|reason| IndexError::BulkInput {
                    line,
                    reason: format!("field `{field}`: {reason}"),
                })
        })
        .collect()
}
