//! JSON bodies exchanged over a [`Transport`](super::Transport).
//!
//! Shapes follow the cluster API the ingestion scripts were written against
//! (index settings, `mappings.properties`, bulk items, `multi_match`), trimmed
//! to what the synchronizer needs. Document ids travel in the body.

use super::{TransportError, TransportResponse};
use crate::query::Query;
use crate::schema::{FieldType, IndexSpec};
use crate::values::Fields;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const ALREADY_EXISTS: &str = "resource_already_exists_exception";
pub const INDEX_NOT_FOUND: &str = "index_not_found_exception";
pub const VERSION_CONFLICT: &str = "version_conflict_engine_exception";
pub const MAPPER_PARSING: &str = "mapper_parsing_exception";
pub const PARSE_ERROR: &str = "parse_exception";

/// Result string of a delete that found nothing.
pub const NOT_FOUND: &str = "not_found";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexBody {
    pub settings: SettingsBody,
    #[serde(default)]
    pub mappings: MappingsBody,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingsBody {
    pub index: IndexSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexSettings {
    pub number_of_shards: u32,
    pub number_of_replicas: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MappingsBody {
    #[serde(default)]
    pub properties: BTreeMap<String, PropertyMapping>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PropertyMapping {
    #[serde(rename = "type")]
    pub field_type: FieldType,
}

impl IndexBody {
    pub fn from_spec(spec: &IndexSpec) -> Self {
        Self {
            settings: SettingsBody {
                index: IndexSettings {
                    number_of_shards: spec.shard_count,
                    number_of_replicas: spec.replica_count,
                },
            },
            mappings: MappingsBody {
                properties: spec
                    .schema
                    .iter()
                    .map(|(field, field_type)| {
                        (
                            field.clone(),
                            PropertyMapping {
                                field_type: *field_type,
                            },
                        )
                    })
                    .collect(),
            },
        }
    }

    pub fn into_spec(self, name: impl Into<String>) -> IndexSpec {
        IndexSpec {
            name: name.into(),
            shard_count: self.settings.index.number_of_shards,
            replica_count: self.settings.index.number_of_replicas,
            schema: self
                .mappings
                .properties
                .into_iter()
                .map(|(field, mapping)| (field, mapping.field_type))
                .collect(),
        }
    }
}

/// A versioned document write, alone or as a bulk item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentBody {
    pub id: String,
    pub version: u64,
    #[serde(default)]
    pub source: Fields,
}

/// Body of get and delete requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRef {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkBody {
    pub items: Vec<DocumentBody>,
}

/// Per-item results, in request order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkResponse {
    pub errors: bool,
    pub items: Vec<BulkItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkItem {
    pub id: String,
    pub status: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_version: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
}

impl BulkItem {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    #[serde(rename = "type")]
    pub kind: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_version: Option<u64>,
}

impl ErrorResponse {
    pub fn new(kind: &str, reason: impl Into<String>) -> Self {
        Self {
            error: ErrorDetail {
                kind: kind.to_owned(),
                reason: reason.into(),
            },
            current_version: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckResponse {
    pub acknowledged: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteResponse {
    pub id: String,
    pub version: u64,
    pub result: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub id: String,
    pub result: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetResponse {
    pub id: String,
    pub found: bool,
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub source: Fields,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchBody {
    pub query: QueryBody,
    pub size: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryBody {
    pub multi_match: MultiMatch,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiMatch {
    pub query: String,
    #[serde(default)]
    pub fields: Vec<String>,
}

impl SearchBody {
    pub fn from_query(query: &Query) -> Self {
        Self {
            query: QueryBody {
                multi_match: MultiMatch {
                    query: query.text().to_owned(),
                    fields: query.targets().iter().map(ToString::to_string).collect(),
                },
            },
            size: query.limit(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub hits: HitsBody,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HitsBody {
    pub total: usize,
    pub hits: Vec<Hit>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hit {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_score")]
    pub score: f64,
}

pub fn encode<T: Serialize>(body: &T) -> Result<serde_json::Value, TransportError> {
    serde_json::to_value(body).map_err(|e| TransportError::Malformed(format!("encode: {e}")))
}

pub fn decode<T: DeserializeOwned>(response: &TransportResponse) -> Result<T, TransportError> {
    serde_json::from_value(response.body.clone())
        .map_err(|e| TransportError::Malformed(format!("status {}: {e}", response.status)))
}

/// The structured error carried by a non-success response, if any.
pub fn error_of(response: &TransportResponse) -> Option<ErrorResponse> {
    serde_json::from_value(response.body.clone()).ok()
}

pub fn error_kind(response: &TransportResponse) -> Option<String> {
    error_of(response).map(|e| e.error.kind)
}

/// Human-readable reason for a non-success response.
pub fn error_reason(response: &TransportResponse) -> String {
    match error_of(response) {
        Some(e) => format!("{}: {}", e.error.kind, e.error.reason),
        None => response.body.to_string(),
    }
}

/// Error for a response the caller did not expect.
pub fn unexpected(response: &TransportResponse) -> TransportError {
    TransportError::Status {
        status: response.status,
        reason: error_reason(response),
    }
}
