use crate::bulk::{partition, BatchReport, BulkFailure, BulkOutcome, FailureReason};
use crate::config::{SyncConfig, TransitionPolicy};
use crate::document::{Document, Version};
use crate::error::{IndexError, IndexResult};
use crate::index::{Generation, IndexRegistry, IndexState};
use crate::locks::{KeyGuard, KeyedLocks};
use crate::query::{rank, Query, SearchHit};
use crate::schema::{validate_index_name, IndexSpec};
use crate::transport::wire::{
    self, BulkBody, BulkResponse, DeleteResponse, DocumentBody, DocumentRef, GetResponse, IndexBody,
    SearchBody, SearchResponse,
};
use crate::transport::{Operation, Transport, TransportError, TransportRequest, TransportResponse};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Keeps a search engine's indices and documents in step with the caller.
///
/// Cloning is cheap and clones share all state: the index state machine,
/// version counters and locks. [`with_timeout`](Self::with_timeout) and
/// [`with_cancellation`](Self::with_cancellation) return such clones with a
/// different deadline or cancellation token.
#[derive(Clone)]
pub struct IndexSynchronizer {
    transport: Arc<dyn Transport>,
    registry: Arc<IndexRegistry>,
    transitions: Arc<KeyedLocks<String>>,
    writes: Arc<KeyedLocks<(String, String)>>,
    config: SyncConfig,
    timeout: Duration,
    cancel: CancellationToken,
}

impl fmt::Debug for IndexSynchronizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexSynchronizer")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .field("timeout", &self.timeout)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl IndexSynchronizer {
    pub fn new(transport: Arc<dyn Transport>, config: SyncConfig) -> IndexResult<Self> {
        config.validate()?;
        Ok(Self {
            transport,
            registry: Arc::new(IndexRegistry::new()),
            transitions: Arc::new(KeyedLocks::new()),
            writes: Arc::new(KeyedLocks::new()),
            timeout: config.timeout(),
            config,
            cancel: CancellationToken::new(),
        })
    }

    /// A handle whose transport calls use `timeout` as their deadline.
    ///
    /// A zero deadline is rejected like a zero `request_timeout_ms`.
    pub fn with_timeout(&self, timeout: Duration) -> IndexResult<Self> {
        if timeout.is_zero() {
            return Err(IndexError::Config("request timeout must be positive".into()));
        }
        Ok(Self {
            timeout,
            ..self.clone()
        })
    }

    /// A handle whose operations stop when `token` is cancelled.
    pub fn with_cancellation(&self, token: CancellationToken) -> Self {
        Self {
            cancel: token,
            ..self.clone()
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn index_state(&self, name: &str) -> IndexState {
        self.registry.state(name)
    }

    /// Settings of a Ready index.
    pub fn index_spec(&self, name: &str) -> Option<IndexSpec> {
        self.registry.spec(name)
    }

    /// Last version successfully written for a document, zero if none.
    pub fn current_version(&self, index: &str, id: &str) -> Version {
        self.registry.current_version(index, id)
    }

    pub fn ready_indices(&self) -> Vec<String> {
        self.registry.ready_names()
    }

    /// Create an index, or confirm an existing one has the same settings.
    ///
    /// Fails with `IndexConflict` when the name is taken with different
    /// settings. On any failure the name goes back to `Absent`.
    pub async fn create_index(&self, spec: IndexSpec) -> IndexResult<()> {
        spec.validate()?;
        let name = spec.name.clone();
        let _transition_lock = self.acquire_transition(&name, Operation::CreateIndex).await?;

        match self.registry.state(&name) {
            IndexState::Absent => {}
            IndexState::Ready => {
                return if self.registry.spec(&name).as_ref() == Some(&spec) {
                    tracing::debug!(index = %name, "index already exists with identical settings");
                    Ok(())
                } else {
                    Err(IndexError::IndexConflict { index: name })
                };
            }
            IndexState::Creating | IndexState::Deleting => {
                return Err(IndexError::IndexBusy { index: name });
            }
        }

        let transition = self.registry.begin(&name, IndexState::Creating);
        tracing::info!(index = %name, shards = spec.shard_count, replicas = spec.replica_count, "creating index");
        let body = encode(Operation::CreateIndex, &name, &IndexBody::from_spec(&spec))?;
        let response = self.send(Operation::CreateIndex, &name, body, &[]).await?;

        if response.is_success() {
            transition.finish_ready(spec);
            tracing::info!(index = %name, "index ready");
            return Ok(());
        }
        if wire::error_kind(&response).as_deref() == Some(wire::ALREADY_EXISTS) {
            let remote = self.fetch_spec(&name).await?;
            if remote != spec {
                return Err(IndexError::IndexConflict { index: name });
            }
            transition.finish_ready(spec);
            tracing::info!(index = %name, "adopted existing index with identical settings");
            return Ok(());
        }
        Err(unexpected(Operation::CreateIndex, &name, Vec::new(), &response))
    }

    /// Delete an index and everything in it.
    ///
    /// Operations admitted before the deletion started finish on their own;
    /// new ones fail with `IndexDeleting` until the index is gone. On failure
    /// the index stays `Ready`.
    pub async fn delete_index(&self, name: &str) -> IndexResult<()> {
        let _transition_lock = self.acquire_transition(name, Operation::DeleteIndex).await?;

        match self.registry.state(name) {
            IndexState::Ready => {}
            IndexState::Absent => {
                return Err(IndexError::IndexNotReady {
                    index: name.to_owned(),
                    state: IndexState::Absent,
                })
            }
            IndexState::Creating | IndexState::Deleting => {
                return Err(IndexError::IndexBusy {
                    index: name.to_owned(),
                })
            }
        }

        let transition = self.registry.begin(name, IndexState::Deleting);
        tracing::info!(index = %name, "deleting index");
        let response = self
            .send(Operation::DeleteIndex, name, serde_json::json!({}), &[])
            .await?;

        let already_gone = wire::error_kind(&response).as_deref() == Some(wire::INDEX_NOT_FOUND);
        if response.is_success() || already_gone {
            transition.finish_absent();
            self.writes.prune_idle();
            tracing::info!(index = %name, already_gone, "index deleted");
            return Ok(());
        }
        Err(unexpected(Operation::DeleteIndex, name, Vec::new(), &response))
    }

    /// Write a document and return the version it was stored under.
    ///
    /// Writes to the same id are serialized; the version is one more than the
    /// last successful write. A failed write leaves the version unchanged.
    pub async fn upsert_document(&self, index: &str, doc: Document) -> IndexResult<Version> {
        doc.validate()?;
        self.registry.admit(index)?;
        let id = doc.id().to_owned();
        let _write_lock = self.lock_document(index, &id, Operation::IndexDocument).await?;
        let generation = self.registry.admit(index)?;

        let version = self.registry.current_version(index, &id).next();
        let body = DocumentBody {
            id: id.clone(),
            version: version.get(),
            source: doc.into_fields(),
        };
        let ids = vec![id.clone()];
        let body = encode(Operation::IndexDocument, index, &body)?;
        let response = self.send(Operation::IndexDocument, index, body, &ids).await?;

        match response.status {
            status if (200..300).contains(&status) => {
                self.registry.record_version(index, generation, &id, version);
                tracing::debug!(%index, %id, %version, "document written");
                Ok(version)
            }
            409 => {
                let current = wire::error_of(&response)
                    .and_then(|e| e.current_version)
                    .unwrap_or(0);
                self.registry.record_version(index, generation, &id, Version(current));
                tracing::warn!(%index, %id, attempted = %version, current, "version conflict");
                Err(IndexError::VersionConflict {
                    index: index.to_owned(),
                    id,
                    current,
                })
            }
            400 => Err(IndexError::Rejected {
                index: index.to_owned(),
                id,
                reason: wire::error_reason(&response),
            }),
            _ => Err(unexpected(Operation::IndexDocument, index, ids, &response)),
        }
    }

    /// Read a document back with the version it is stored under.
    pub async fn get_document(&self, index: &str, id: &str) -> IndexResult<Option<Document>> {
        let generation = self.registry.admit(index)?;
        let ids = vec![id.to_owned()];
        let body = encode(Operation::GetDocument, index, &DocumentRef { id: id.to_owned() })?;
        let response = self.send(Operation::GetDocument, index, body, &ids).await?;

        if response.is_success() {
            let found: GetResponse = decode(Operation::GetDocument, index, &ids, &response)?;
            let version = Version(found.version);
            self.registry.record_version(index, generation, id, version);
            return Ok(Some(Document::with_version(found.id, found.source, version)));
        }
        if response.status == 404 && wire::error_kind(&response).is_none() {
            return Ok(None);
        }
        Err(unexpected(Operation::GetDocument, index, ids, &response))
    }

    /// Delete a document. Deleting an id that does not exist succeeds.
    pub async fn delete_document(&self, index: &str, id: &str) -> IndexResult<()> {
        if id.is_empty() {
            return Err(IndexError::InvalidDocument("document id cannot be empty".into()));
        }
        self.registry.admit(index)?;
        let _write_lock = self.lock_document(index, id, Operation::DeleteDocument).await?;
        self.registry.admit(index)?;

        let ids = vec![id.to_owned()];
        let body = encode(Operation::DeleteDocument, index, &DocumentRef { id: id.to_owned() })?;
        let response = self.send(Operation::DeleteDocument, index, body, &ids).await?;

        if response.is_success() {
            tracing::debug!(%index, %id, "document deleted");
            return Ok(());
        }
        let missing = response.status == 404
            && wire::decode::<DeleteResponse>(&response).is_ok_and(|r| r.result == wire::NOT_FOUND);
        if missing {
            tracing::debug!(%index, %id, "document already absent");
            return Ok(());
        }
        Err(unexpected(Operation::DeleteDocument, index, ids, &response))
    }

    /// Ranked matches for `query`: descending score, ascending id on ties.
    pub async fn search(&self, index: &str, query: &Query) -> IndexResult<Vec<SearchHit>> {
        query.validate()?;
        self.registry.admit(index)?;
        let body = encode(Operation::Search, index, &SearchBody::from_query(query))?;
        let response = self.send(Operation::Search, index, body, &[]).await?;
        if !response.is_success() {
            return Err(unexpected(Operation::Search, index, Vec::new(), &response));
        }

        let found: SearchResponse = decode(Operation::Search, index, &[], &response)?;
        let mut hits: Vec<SearchHit> = found
            .hits
            .hits
            .into_iter()
            .map(|hit| SearchHit::new(hit.id, hit.score))
            .collect();
        hits.sort_by(rank);
        tracing::debug!(%index, total = found.hits.total, returned = hits.len(), "search complete");
        Ok(hits)
    }

    /// Write many documents in batches.
    ///
    /// Batches of at most `batch_size` run up to `max_concurrent_batches` at a
    /// time. A failed batch fails only its own documents. `Err` is returned
    /// only when the index is not admitting writes at all; everything after
    /// that is reported in the outcome. On cancellation, batches already sent
    /// finish and unsent documents fail with [`FailureReason::Cancelled`].
    pub async fn bulk_upsert(&self, index: &str, docs: Vec<Document>) -> IndexResult<BulkOutcome> {
        self.registry.admit(index)?;
        let attempted = docs.len();
        let batches = partition(docs, self.config.batch_size);
        let batch_ids: Vec<Vec<String>> = batches
            .iter()
            .map(|batch| batch.iter().map(|doc| doc.id().to_owned()).collect())
            .collect();
        tracing::info!(%index, documents = attempted, batches = batches.len(), "bulk upsert started");

        let limit = Arc::new(Semaphore::new(self.config.max_concurrent_batches));
        let mut tasks = JoinSet::new();
        let mut sent = 0;
        let mut stopped: Option<FailureReason> = None;

        for (seq, batch) in batches.into_iter().enumerate() {
            let permit = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                permit = Arc::clone(&limit).acquire_owned() => permit.ok(),
            };
            let Some(permit) = permit else {
                stopped = Some(FailureReason::Cancelled);
                break;
            };
            let keys: Vec<(String, String)> = batch_ids[seq]
                .iter()
                .map(|id| (index.to_owned(), id.clone()))
                .collect();
            let guards = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                guards = self.writes.lock_all(&keys) => Some(guards),
            };
            let Some(guards) = guards else {
                stopped = Some(FailureReason::Cancelled);
                break;
            };
            let generation = match self.registry.admit(index) {
                Ok(generation) => generation,
                Err(err) => {
                    tracing::warn!(%index, batch = seq, error = %err, "bulk upsert stopped");
                    stopped = Some(FailureReason::from(&err));
                    break;
                }
            };

            let this = self.clone();
            let index = index.to_owned();
            tasks.spawn(async move {
                let report = this.run_batch(&index, generation, seq, batch).await;
                drop(guards);
                drop(permit);
                (seq, report)
            });
            sent += 1;
        }

        let mut reports: Vec<Option<BatchReport>> = batch_ids.iter().map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((seq, report)) => reports[seq] = Some(report),
                Err(e) => tracing::warn!(%index, error = %e, "bulk batch task failed"),
            }
        }

        let reports = reports
            .into_iter()
            .zip(&batch_ids)
            .enumerate()
            .map(|(seq, (report, ids))| {
                report.unwrap_or_else(|| {
                    let reason = if seq >= sent {
                        stopped.clone().unwrap_or(FailureReason::Cancelled)
                    } else {
                        FailureReason::Transport("batch did not complete".into())
                    };
                    BatchReport::all_failed(ids.iter().map(String::as_str), &reason)
                })
            });
        let outcome = BulkOutcome::from_reports(attempted, reports);
        self.writes.prune_idle();
        tracing::info!(
            %index,
            attempted = outcome.attempted(),
            succeeded = outcome.succeeded(),
            failed = outcome.failed().len(),
            "bulk upsert finished"
        );
        Ok(outcome)
    }

    /// Send one batch and tally its per-document results in input order.
    ///
    /// Runs to completion once started: batches already sent are never
    /// recalled by cancellation.
    async fn run_batch(&self, index: &str, generation: Generation, seq: usize, batch: Vec<Document>) -> BatchReport {
        let mut results: Vec<(String, Option<FailureReason>)> = Vec::with_capacity(batch.len());
        let mut items = Vec::with_capacity(batch.len());
        let mut positions = Vec::with_capacity(batch.len());

        for doc in batch {
            let id = doc.id().to_owned();
            if let Err(err) = doc.validate() {
                results.push((id, Some(FailureReason::Rejected(err.to_string()))));
                continue;
            }
            let version = self.registry.current_version(index, &id).next();
            positions.push(results.len());
            results.push((id.clone(), None));
            items.push(DocumentBody {
                id,
                version: version.get(),
                source: doc.into_fields(),
            });
        }

        if !items.is_empty() {
            let ids: Vec<String> = items.iter().map(|item| item.id.clone()).collect();
            let versions: Vec<u64> = items.iter().map(|item| item.version).collect();
            match self.send_batch(index, items, &ids).await {
                Ok(response) => {
                    let mut returned = response.items.into_iter();
                    for (pos, sent_version) in positions.iter().zip(versions) {
                        let (id, slot) = &mut results[*pos];
                        *slot = match returned.next() {
                            Some(item) if item.is_success() => {
                                let version = Version(item.version.unwrap_or(sent_version));
                                self.registry.record_version(index, generation, id, version);
                                None
                            }
                            Some(item) => {
                                if let Some(current) = item.current_version {
                                    self.registry.record_version(index, generation, id, Version(current));
                                }
                                let reason = item.error.map_or_else(
                                    || format!("status {}", item.status),
                                    |e| format!("{}: {}", e.kind, e.reason),
                                );
                                Some(FailureReason::Rejected(reason))
                            }
                            None => Some(FailureReason::Transport(
                                "bulk response has no result for this document".into(),
                            )),
                        };
                    }
                }
                Err(err) => {
                    tracing::warn!(%index, batch = seq, documents = ids.len(), error = %err, "bulk batch failed");
                    let reason = FailureReason::from(&err);
                    for pos in &positions {
                        results[*pos].1 = Some(reason.clone());
                    }
                }
            }
        }

        let mut report = BatchReport::default();
        for (id, failure) in results {
            match failure {
                Some(reason) => report.failed.push(BulkFailure::new(id, reason)),
                None => report.succeeded += 1,
            }
        }
        tracing::debug!(%index, batch = seq, succeeded = report.succeeded, failed = report.failed.len(), "bulk batch done");
        report
    }

    async fn send_batch(&self, index: &str, items: Vec<DocumentBody>, ids: &[String]) -> IndexResult<BulkResponse> {
        let body = encode(Operation::Bulk, index, &BulkBody { items })?;
        let request = TransportRequest::new(Operation::Bulk, index, body);
        let response = self.dispatch(request, ids).await?;
        if !response.is_success() {
            return Err(unexpected(Operation::Bulk, index, ids.to_vec(), &response));
        }
        decode(Operation::Bulk, index, ids, &response)
    }

    async fn fetch_spec(&self, name: &str) -> IndexResult<IndexSpec> {
        let response = self
            .send(Operation::GetIndex, name, serde_json::json!({}), &[])
            .await?;
        if !response.is_success() {
            return Err(unexpected(Operation::GetIndex, name, Vec::new(), &response));
        }
        let body: IndexBody = decode(Operation::GetIndex, name, &[], &response)?;
        Ok(body.into_spec(name))
    }

    async fn acquire_transition(&self, name: &str, operation: Operation) -> IndexResult<KeyGuard<String>> {
        validate_index_name(name)?;
        let key = name.to_owned();
        match self.config.transition_policy {
            TransitionPolicy::FailFast => self
                .transitions
                .try_lock(&key)
                .ok_or_else(|| IndexError::IndexBusy { index: key.clone() }),
            TransitionPolicy::Block => tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Err(IndexError::Cancelled {
                    operation,
                    index: key.clone(),
                }),
                guard = self.transitions.lock(&key) => Ok(guard),
            },
        }
    }

    async fn lock_document(
        &self,
        index: &str,
        id: &str,
        operation: Operation,
    ) -> IndexResult<KeyGuard<(String, String)>> {
        let key = (index.to_owned(), id.to_owned());
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(IndexError::Cancelled {
                operation,
                index: index.to_owned(),
            }),
            guard = self.writes.lock(&key) => Ok(guard),
        }
    }

    /// Send a request, giving up early if this handle is cancelled.
    async fn send(
        &self,
        operation: Operation,
        index: &str,
        body: serde_json::Value,
        ids: &[String],
    ) -> IndexResult<TransportResponse> {
        let request = TransportRequest::new(operation, index, body);
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                tracing::debug!(%index, %operation, "request cancelled");
                Err(IndexError::Cancelled {
                    operation,
                    index: index.to_owned(),
                })
            }
            result = self.dispatch(request, ids) => result,
        }
    }

    /// Send a request under this handle's deadline.
    async fn dispatch(&self, request: TransportRequest, ids: &[String]) -> IndexResult<TransportResponse> {
        let operation = request.operation;
        let index = request.index.clone();
        let request_id = request.request_id;
        tracing::debug!(%index, %operation, %request_id, documents = ids.len(), "sending request");

        match tokio::time::timeout(self.timeout, self.transport.execute(request, self.timeout)).await {
            Ok(Ok(response)) => {
                tracing::debug!(%index, %operation, %request_id, status = response.status, "response received");
                Ok(response)
            }
            Ok(Err(source)) => {
                tracing::warn!(%index, %operation, %request_id, error = %source, "transport failed");
                Err(IndexError::Transport {
                    operation,
                    index,
                    ids: ids.to_vec(),
                    source,
                })
            }
            Err(_) => {
                tracing::warn!(%index, %operation, %request_id, after = ?self.timeout, "request timed out");
                Err(IndexError::Timeout {
                    operation,
                    index,
                    ids: ids.to_vec(),
                    after: self.timeout,
                })
            }
        }
    }
}

fn encode<T: Serialize>(operation: Operation, index: &str, body: &T) -> IndexResult<serde_json::Value> {
    wire::encode(body).map_err(|source| IndexError::Transport {
        operation,
        index: index.to_owned(),
        ids: Vec::new(),
        source,
    })
}

fn decode<T: serde::de::DeserializeOwned>(
    operation: Operation,
    index: &str,
    ids: &[String],
    response: &TransportResponse,
) -> IndexResult<T> {
    wire::decode(response).map_err(|source| IndexError::Transport {
        operation,
        index: index.to_owned(),
        ids: ids.to_vec(),
        source,
    })
}

fn unexpected(operation: Operation, index: &str, ids: Vec<String>, response: &TransportResponse) -> IndexError {
    let source: TransportError = wire::unexpected(response);
    tracing::warn!(%index, %operation, status = response.status, error = %source, "unexpected response");
    IndexError::Transport {
        operation,
        index: index.to_owned(),
        ids,
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Fault, InMemoryEngine};
    use crate::fields;
    use crate::schema::FieldType;
    use crate::values::FieldValue;

    fn movies() -> IndexSpec {
        IndexSpec::new("movies")
            .replicas(0)
            .field("title", FieldType::Text)
            .field("year", FieldType::Integer)
    }

    fn setup(config: SyncConfig) -> (Arc<InMemoryEngine>, IndexSynchronizer) {
        let engine = Arc::new(InMemoryEngine::new());
        let sync = IndexSynchronizer::new(engine.clone(), config).unwrap();
        (engine, sync)
    }

    #[tokio::test]
    async fn rejects_invalid_config() {
        let engine = Arc::new(InMemoryEngine::new());
        let err = IndexSynchronizer::new(engine, SyncConfig::new().batch_size(0)).unwrap_err();
        assert_eq!(err.kind(), "config");
    }

    #[tokio::test]
    async fn create_then_conflict() {
        let (engine, sync) = setup(SyncConfig::default());
        sync.create_index(movies()).await.unwrap();
        sync.create_index(movies()).await.unwrap();
        assert_eq!(engine.operations(), vec![Operation::CreateIndex]);

        let err = sync.create_index(movies().shards(2)).await.unwrap_err();
        assert!(matches!(err, IndexError::IndexConflict { .. }));
        assert_eq!(sync.index_spec("movies"), Some(movies()));
    }

    #[tokio::test]
    async fn adopts_remote_index_with_same_settings() {
        let engine = Arc::new(InMemoryEngine::new());
        let first = IndexSynchronizer::new(engine.clone(), SyncConfig::default()).unwrap();
        first.create_index(movies()).await.unwrap();

        let second = IndexSynchronizer::new(engine.clone(), SyncConfig::default()).unwrap();
        second.create_index(movies()).await.unwrap();
        assert_eq!(second.index_state("movies"), IndexState::Ready);

        let third = IndexSynchronizer::new(engine, SyncConfig::default()).unwrap();
        let err = third.create_index(movies().shards(3)).await.unwrap_err();
        assert!(matches!(err, IndexError::IndexConflict { .. }));
        assert_eq!(third.index_state("movies"), IndexState::Absent);
    }

    #[tokio::test]
    async fn versions_increment_per_write() {
        let (_engine, sync) = setup(SyncConfig::default());
        sync.create_index(movies()).await.unwrap();
        for expected in 1..=3 {
            let doc = Document::new("1", fields! { "title" => "Moneyball" });
            assert_eq!(sync.upsert_document("movies", doc).await.unwrap(), Version(expected));
        }
        let stored = sync.get_document("movies", "1").await.unwrap().unwrap();
        assert_eq!(stored.version(), Version(3));
    }

    #[tokio::test]
    async fn engine_conflict_is_adopted() {
        let engine = Arc::new(InMemoryEngine::new());
        let a = IndexSynchronizer::new(engine.clone(), SyncConfig::default()).unwrap();
        let b = IndexSynchronizer::new(engine.clone(), SyncConfig::default()).unwrap();
        a.create_index(movies()).await.unwrap();
        b.create_index(movies()).await.unwrap();

        a.upsert_document("movies", Document::new("1", fields! {})).await.unwrap();
        a.upsert_document("movies", Document::new("1", fields! {})).await.unwrap();

        let err = b
            .upsert_document("movies", Document::new("1", fields! {}))
            .await
            .unwrap_err();
        assert!(matches!(err, IndexError::VersionConflict { current: 2, .. }));
        assert!(err.is_retryable());
        assert_eq!(
            b.upsert_document("movies", Document::new("1", fields! {})).await.unwrap(),
            Version(3)
        );
    }

    #[tokio::test]
    async fn mapping_violation_is_rejected() {
        let (_engine, sync) = setup(SyncConfig::default());
        sync.create_index(movies()).await.unwrap();
        let err = sync
            .upsert_document("movies", Document::new("1", fields! { "year" => "soon" }))
            .await
            .unwrap_err();
        assert!(matches!(&err, IndexError::Rejected { reason, .. } if reason.contains(wire::MAPPER_PARSING)));
        assert_eq!(sync.current_version("movies", "1"), Version::ZERO);
    }

    #[tokio::test]
    async fn get_missing_document_is_none() {
        let (_engine, sync) = setup(SyncConfig::default());
        sync.create_index(movies()).await.unwrap();
        assert!(sync.get_document("movies", "404").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_ids_in_bulk_apply_in_order() {
        let (engine, sync) = setup(SyncConfig::default());
        sync.create_index(movies()).await.unwrap();
        let docs = vec![
            Document::new("1", fields! { "title" => "first" }),
            Document::new("2", fields! { "title" => "other" }),
            Document::new("1", fields! { "title" => "second" }),
        ];
        let outcome = sync.bulk_upsert("movies", docs).await.unwrap();
        assert!(outcome.is_complete_success());
        assert_eq!(sync.current_version("movies", "1"), Version(2));
        assert_eq!(engine.stored_version("movies", "1"), Some(2));

        let doc = sync.get_document("movies", "1").await.unwrap().unwrap();
        assert_eq!(doc.get("title"), Some(&FieldValue::from("second")));
    }

    #[tokio::test]
    async fn bulk_item_failures_keep_input_order() {
        let (_engine, sync) = setup(SyncConfig::new().batch_size(2));
        sync.create_index(movies()).await.unwrap();
        let docs = vec![
            Document::new("a", fields! { "year" => "bad" }),
            Document::new("b", fields! { "year" => 1i64 }),
            Document::new("", fields! {}),
            Document::new("d", fields! { "year" => "bad" }),
        ];
        let outcome = sync.bulk_upsert("movies", docs).await.unwrap();
        assert_eq!(outcome.attempted(), 4);
        assert_eq!(outcome.succeeded(), 1);
        assert_eq!(outcome.failed_ids().collect::<Vec<_>>(), vec!["a", "", "d"]);
        assert!(outcome
            .failed()
            .iter()
            .all(|f| matches!(f.reason, FailureReason::Rejected(_))));
    }

    #[tokio::test]
    async fn bulk_on_missing_index_fails_before_sending() {
        let (engine, sync) = setup(SyncConfig::default());
        let err = sync
            .bulk_upsert("movies", vec![Document::new("1", fields! {})])
            .await
            .unwrap_err();
        assert!(matches!(err, IndexError::IndexNotReady { .. }));
        assert_eq!(engine.request_count(), 0);
    }

    #[tokio::test]
    async fn empty_bulk_is_a_no_op() {
        let (engine, sync) = setup(SyncConfig::default());
        sync.create_index(movies()).await.unwrap();
        engine.clear_log();
        let outcome = sync.bulk_upsert("movies", Vec::new()).await.unwrap();
        assert_eq!(outcome.attempted(), 0);
        assert_eq!(engine.request_count(), 0);
    }

    #[tokio::test]
    async fn delete_index_not_found_remotely_still_completes() {
        let (engine, sync) = setup(SyncConfig::default());
        sync.create_index(movies()).await.unwrap();

        let other = IndexSynchronizer::new(engine.clone(), SyncConfig::default()).unwrap();
        other.create_index(movies()).await.unwrap();
        other.delete_index("movies").await.unwrap();

        sync.delete_index("movies").await.unwrap();
        assert_eq!(sync.index_state("movies"), IndexState::Absent);
    }

    #[tokio::test]
    async fn transport_errors_carry_ids() {
        let (engine, sync) = setup(SyncConfig::default());
        sync.create_index(movies()).await.unwrap();
        engine.inject_fault(
            Fault::Operation(Operation::IndexDocument),
            TransportError::Connection("reset".into()),
        );
        let err = sync
            .upsert_document("movies", Document::new("7", fields! {}))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "transport");
        assert_eq!(err.attempted_ids(), ["7".to_string()]);
        assert_eq!(sync.current_version("movies", "7"), Version::ZERO);
    }

    #[tokio::test]
    async fn with_timeout_overrides_deadline() {
        let (_engine, sync) = setup(SyncConfig::default());
        let short = sync.with_timeout(Duration::from_millis(5)).unwrap();
        assert_eq!(short.timeout(), Duration::from_millis(5));
        assert_eq!(sync.timeout(), Duration::from_secs(30));

        let err = sync.with_timeout(Duration::ZERO).unwrap_err();
        assert_eq!(err.kind(), "config");
    }

    #[tokio::test]
    async fn single_document_locks_are_released() {
        let (_engine, sync) = setup(SyncConfig::default());
        sync.create_index(movies()).await.unwrap();
        for i in 0..200 {
            let id = i.to_string();
            sync.upsert_document("movies", Document::new(id.as_str(), fields! {}))
                .await
                .unwrap();
            sync.delete_document("movies", &id).await.unwrap();
        }
        assert!(sync.writes.is_empty());

        sync.delete_index("movies").await.unwrap();
        sync.create_index(IndexSpec::new("other")).await.unwrap();
        assert!(sync.transitions.is_empty());
    }

    #[tokio::test]
    async fn malformed_query_sends_nothing() {
        let (engine, sync) = setup(SyncConfig::default());
        sync.create_index(movies()).await.unwrap();
        engine.clear_log();

        let query = Query::new("moneyball").fields(["title^x", "director"]);
        let err = sync.search("movies", &query).await.unwrap_err();
        assert!(matches!(err, IndexError::InvalidQuery(_)));
        assert_eq!(engine.request_count(), 0);
    }
}
