//! A complete search engine behind the [`Transport`] trait, held in memory.
//!
//! Speaks the bodies in [`crate::transport::wire`] and answers with the same
//! statuses a cluster would (`400` already-exists and mapping errors, `404`
//! missing index or document, `409` stale version). Faults and latency can be
//! injected to exercise failure paths.

use crate::query::FieldBoost;
use crate::table::{Table, WriteRejection};
use crate::transport::wire::{
    self, AckResponse, BulkBody, BulkItem, BulkResponse, DeleteResponse, DocumentBody, DocumentRef,
    ErrorResponse, GetResponse, Hit, HitsBody, IndexBody, SearchBody, SearchResponse, WriteResponse,
};
use crate::transport::{Operation, Transport, TransportError, TransportRequest, TransportResponse};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Which requests an injected fault applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// Every request of this operation.
    Operation(Operation),
    /// Any request carrying this document id (single or bulk).
    Document(String),
    /// Every request against this index.
    Index(String),
}

impl Fault {
    fn matches(&self, request: &TransportRequest) -> bool {
        match self {
            Fault::Operation(op) => request.operation == *op,
            Fault::Index(name) => request.index == *name,
            Fault::Document(id) => mentions_document(&request.body, id),
        }
    }
}

fn mentions_document(body: &serde_json::Value, id: &str) -> bool {
    if body.get("id").and_then(|v| v.as_str()) == Some(id) {
        return true;
    }
    body.get("items")
        .and_then(|items| items.as_array())
        .is_some_and(|items| {
            items
                .iter()
                .any(|item| item.get("id").and_then(|v| v.as_str()) == Some(id))
        })
}

#[derive(Debug)]
struct FaultRule {
    fault: Fault,
    error: TransportError,
    remaining: Option<usize>,
}

#[derive(Debug, Default)]
struct EngineState {
    tables: HashMap<String, Table>,
    faults: Vec<FaultRule>,
    latency: Duration,
    log: Vec<TransportRequest>,
}

impl EngineState {
    fn take_fault(&mut self, request: &TransportRequest) -> Option<TransportError> {
        let position = self
            .faults
            .iter()
            .position(|rule| rule.fault.matches(request))?;
        let rule = &mut self.faults[position];
        let error = rule.error.clone();
        if let Some(remaining) = rule.remaining.as_mut() {
            *remaining -= 1;
            if *remaining == 0 {
                self.faults.remove(position);
            }
        }
        Some(error)
    }
}

/// In-memory search engine.
#[derive(Debug, Default)]
pub struct InMemoryEngine {
    state: Mutex<EngineState>,
}

impl InMemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Delay every request by `latency` before it takes effect.
    pub fn set_latency(&self, latency: Duration) {
        self.state().latency = latency;
    }

    /// Fail matching requests with `error` until [`clear_faults`](Self::clear_faults).
    pub fn inject_fault(&self, fault: Fault, error: TransportError) {
        self.state().faults.push(FaultRule {
            fault,
            error,
            remaining: None,
        });
    }

    /// Fail the next `times` matching requests with `error`.
    pub fn inject_fault_times(&self, fault: Fault, error: TransportError, times: usize) {
        if times == 0 {
            return;
        }
        self.state().faults.push(FaultRule {
            fault,
            error,
            remaining: Some(times),
        });
    }

    pub fn clear_faults(&self) {
        self.state().faults.clear();
    }

    /// Every request received so far, in arrival order.
    pub fn requests(&self) -> Vec<TransportRequest> {
        self.state().log.clone()
    }

    pub fn operations(&self) -> Vec<Operation> {
        self.state().log.iter().map(|r| r.operation).collect()
    }

    pub fn request_count(&self) -> usize {
        self.state().log.len()
    }

    pub fn clear_log(&self) {
        self.state().log.clear();
    }

    pub fn index_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state().tables.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn document_count(&self, index: &str) -> Option<usize> {
        self.state().tables.get(index).map(Table::len)
    }

    pub fn stored_version(&self, index: &str, id: &str) -> Option<u64> {
        self.state()
            .tables
            .get(index)
            .and_then(|table| table.get(id))
            .map(|doc| doc.version)
    }

    fn apply(&self, request: &TransportRequest) -> TransportResponse {
        let mut state = self.state();
        let index = request.index.as_str();
        match request.operation {
            Operation::CreateIndex => {
                if state.tables.contains_key(index) {
                    return error(
                        400,
                        wire::ALREADY_EXISTS,
                        format!("index [{index}] already exists"),
                    );
                }
                let body: IndexBody = match parse(request) {
                    Ok(body) => body,
                    Err(response) => return response,
                };
                let spec = body.into_spec(index);
                if let Err(e) = spec.validate() {
                    return error(400, wire::PARSE_ERROR, e.to_string());
                }
                state.tables.insert(index.to_owned(), Table::new(spec));
                json(200, &AckResponse { acknowledged: true })
            }
            Operation::GetIndex => match state.tables.get(index) {
                Some(table) => json(200, &IndexBody::from_spec(table.spec())),
                None => index_not_found(index),
            },
            Operation::DeleteIndex => match state.tables.remove(index) {
                Some(_) => json(200, &AckResponse { acknowledged: true }),
                None => index_not_found(index),
            },
            Operation::IndexDocument => {
                let Some(table) = state.tables.get_mut(index) else {
                    return index_not_found(index);
                };
                let body: DocumentBody = match parse(request) {
                    Ok(body) => body,
                    Err(response) => return response,
                };
                match table.put(&body.id, body.version, body.source) {
                    Ok(created) => json(
                        if created { 201 } else { 200 },
                        &WriteResponse {
                            id: body.id,
                            version: body.version,
                            result: if created { "created" } else { "updated" }.to_owned(),
                        },
                    ),
                    Err(WriteRejection::VersionConflict { current }) => {
                        let mut conflict = ErrorResponse::new(
                            wire::VERSION_CONFLICT,
                            format!(
                                "[{}]: version {} is not newer than current version {current}",
                                body.id, body.version
                            ),
                        );
                        conflict.current_version = Some(current);
                        json(409, &conflict)
                    }
                    Err(WriteRejection::Mapping(reason)) => error(400, wire::MAPPER_PARSING, reason),
                }
            }
            Operation::GetDocument => {
                let Some(table) = state.tables.get(index) else {
                    return index_not_found(index);
                };
                let body: DocumentRef = match parse(request) {
                    Ok(body) => body,
                    Err(response) => return response,
                };
                match table.get(&body.id) {
                    Some(doc) => json(
                        200,
                        &GetResponse {
                            id: body.id,
                            found: true,
                            version: doc.version,
                            source: doc.fields.clone(),
                        },
                    ),
                    None => json(
                        404,
                        &GetResponse {
                            id: body.id,
                            found: false,
                            version: 0,
                            source: Default::default(),
                        },
                    ),
                }
            }
            Operation::DeleteDocument => {
                let Some(table) = state.tables.get_mut(index) else {
                    return index_not_found(index);
                };
                let body: DocumentRef = match parse(request) {
                    Ok(body) => body,
                    Err(response) => return response,
                };
                match table.delete(&body.id) {
                    Some(_) => json(
                        200,
                        &DeleteResponse {
                            id: body.id,
                            result: "deleted".to_owned(),
                        },
                    ),
                    None => json(
                        404,
                        &DeleteResponse {
                            id: body.id,
                            result: wire::NOT_FOUND.to_owned(),
                        },
                    ),
                }
            }
            Operation::Bulk => {
                let Some(table) = state.tables.get_mut(index) else {
                    return index_not_found(index);
                };
                let body: BulkBody = match parse(request) {
                    Ok(body) => body,
                    Err(response) => return response,
                };
                let items: Vec<BulkItem> = body
                    .items
                    .into_iter()
                    .map(|item| bulk_item(table, item))
                    .collect();
                let errors = items.iter().any(|item| !item.is_success());
                json(200, &BulkResponse { errors, items })
            }
            Operation::Search => {
                let Some(table) = state.tables.get(index) else {
                    return index_not_found(index);
                };
                let body: SearchBody = match parse(request) {
                    Ok(body) => body,
                    Err(response) => return response,
                };
                let mut targets = Vec::with_capacity(body.query.multi_match.fields.len());
                for field in &body.query.multi_match.fields {
                    match field.parse::<FieldBoost>() {
                        Ok(boost) => targets.push((boost.field, boost.boost)),
                        Err(reason) => return error(400, wire::PARSE_ERROR, reason),
                    }
                }
                let (total, hits) = table.search(&body.query.multi_match.query, &targets, body.size);
                json(
                    200,
                    &SearchResponse {
                        hits: HitsBody {
                            total,
                            hits: hits
                                .into_iter()
                                .map(|hit| Hit {
                                    id: hit.id,
                                    score: hit.score,
                                })
                                .collect(),
                        },
                    },
                )
            }
        }
    }
}

fn bulk_item(table: &mut Table, item: DocumentBody) -> BulkItem {
    let DocumentBody {
        id,
        version,
        source,
    } = item;
    match table.put(&id, version, source) {
        Ok(created) => BulkItem {
            id,
            status: if created { 201 } else { 200 },
            version: Some(version),
            current_version: None,
            error: None,
        },
        Err(WriteRejection::VersionConflict { current }) => BulkItem {
            error: Some(wire::ErrorDetail {
                kind: wire::VERSION_CONFLICT.to_owned(),
                reason: format!("[{id}]: version {version} is not newer than current version {current}"),
            }),
            id,
            status: 409,
            version: None,
            current_version: Some(current),
        },
        Err(WriteRejection::Mapping(reason)) => BulkItem {
            id,
            status: 400,
            version: None,
            current_version: None,
            error: Some(wire::ErrorDetail {
                kind: wire::MAPPER_PARSING.to_owned(),
                reason,
            }),
        },
    }
}

fn json<T: Serialize>(status: u16, body: &T) -> TransportResponse {
    TransportResponse::new(status, serde_json::to_value(body).unwrap_or_default())
}

fn error(status: u16, kind: &str, reason: impl Into<String>) -> TransportResponse {
    json(status, &ErrorResponse::new(kind, reason))
}

fn index_not_found(index: &str) -> TransportResponse {
    error(404, wire::INDEX_NOT_FOUND, format!("no such index [{index}]"))
}

fn parse<T: DeserializeOwned>(request: &TransportRequest) -> Result<T, TransportResponse> {
    serde_json::from_value(request.body.clone())
        .map_err(|e| error(400, wire::PARSE_ERROR, format!("{}: {e}", request.operation)))
}

#[async_trait]
impl Transport for InMemoryEngine {
    async fn execute(
        &self,
        request: TransportRequest,
        _timeout: Duration,
    ) -> Result<TransportResponse, TransportError> {
        let latency = {
            let mut state = self.state();
            state.log.push(request.clone());
            state.latency
        };
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if let Some(error) = self.state().take_fault(&request) {
            tracing::debug!(
                operation = %request.operation,
                index = %request.index,
                %error,
                "injected transport fault"
            );
            return Err(error);
        }
        Ok(self.apply(&request))
    }
}
