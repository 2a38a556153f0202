use super::IndexState;
use crate::document::Version;
use crate::error::{IndexError, IndexResult};
use crate::schema::IndexSpec;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Identifies one incarnation of an index name. Deleting and creating the
/// same name again yields a new generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Generation(u64);

#[derive(Debug)]
struct IndexEntry {
    generation: Generation,
    state: IndexState,
    spec: Option<IndexSpec>,
    versions: HashMap<String, Version>,
}

/// Lifecycle state and document version counters for every known index.
///
/// A name with no entry is `Absent`. This is the only shared mutable state
/// of the synchronizer; the lock is never held across an await point.
#[derive(Debug, Default)]
pub struct IndexRegistry {
    entries: Mutex<HashMap<String, IndexEntry>>,
    generations: AtomicU64,
}

impl IndexRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, IndexEntry>> {
        // Entries stay consistent under panic: every mutation is a single assignment.
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self, name: &str) -> IndexState {
        self.entries()
            .get(name)
            .map_or(IndexState::Absent, |entry| entry.state)
    }

    /// Settings of a Ready index.
    pub fn spec(&self, name: &str) -> Option<IndexSpec> {
        self.entries().get(name).and_then(|entry| entry.spec.clone())
    }

    /// Names of all Ready indices, sorted.
    pub fn ready_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .entries()
            .iter()
            .filter(|(_, entry)| entry.state == IndexState::Ready)
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Admit a document operation: Ok only in `Ready`, with the generation
    /// its writes must be recorded under.
    pub fn admit(&self, name: &str) -> IndexResult<Generation> {
        let entries = self.entries();
        let (state, generation) = entries
            .get(name)
            .map_or((IndexState::Absent, None), |entry| (entry.state, Some(entry.generation)));
        match (state, generation) {
            (IndexState::Ready, Some(generation)) => Ok(generation),
            (IndexState::Deleting, _) => Err(IndexError::IndexDeleting {
                index: name.to_owned(),
            }),
            (state, _) => Err(IndexError::IndexNotReady {
                index: name.to_owned(),
                state,
            }),
        }
    }

    /// Last successfully written version of a document (zero if never written).
    pub fn current_version(&self, name: &str, id: &str) -> Version {
        self.entries()
            .get(name)
            .and_then(|entry| entry.versions.get(id).copied())
            .unwrap_or_default()
    }

    /// Record a successful write admitted under `generation`. Counters never
    /// move backwards, and writes landing after their index was deleted are
    /// dropped, even when the name has been created again since.
    pub fn record_version(&self, name: &str, generation: Generation, id: &str, version: Version) {
        let mut entries = self.entries();
        let Some(entry) = entries.get_mut(name) else {
            return;
        };
        if entry.generation != generation {
            tracing::debug!(index = %name, %id, %version, "dropping version from a deleted incarnation");
            return;
        }
        let current = entry.versions.entry(id.to_owned()).or_default();
        if version > *current {
            *current = version;
        }
    }

    /// Move `name` into a transitional state. The returned guard restores
    /// the prior state when dropped without [`Transition::finish`].
    pub fn begin(self: &Arc<Self>, name: &str, to: IndexState) -> Transition {
        let mut entries = self.entries();
        let entry = entries.entry(name.to_owned()).or_insert_with(|| IndexEntry {
            generation: Generation(self.generations.fetch_add(1, Ordering::Relaxed)),
            state: IndexState::Absent,
            spec: None,
            versions: HashMap::new(),
        });
        let prior = entry.state;
        entry.state = to;
        Transition {
            registry: Arc::clone(self),
            name: name.to_owned(),
            prior,
            finished: false,
        }
    }

    fn settle(&self, name: &str, state: IndexState, spec: Option<IndexSpec>) {
        let mut entries = self.entries();
        match state {
            IndexState::Absent => {
                entries.remove(name);
            }
            _ => {
                if let Some(entry) = entries.get_mut(name) {
                    entry.state = state;
                    if spec.is_some() {
                        entry.spec = spec;
                    }
                }
            }
        }
    }
}

/// An in-flight create or delete of one index name.
///
/// Dropping the guard (early return, `?`, timeout, or the caller dropping
/// the future) rolls the name back to its prior stable state.
#[derive(Debug)]
pub struct Transition {
    registry: Arc<IndexRegistry>,
    name: String,
    prior: IndexState,
    finished: bool,
}

impl Transition {
    pub fn prior(&self) -> IndexState {
        self.prior
    }

    /// Commit to `Ready` with the given settings.
    pub fn finish_ready(mut self, spec: IndexSpec) {
        self.finished = true;
        self.registry.settle(&self.name, IndexState::Ready, Some(spec));
    }

    /// Commit to `Absent`, discarding settings and version counters.
    pub fn finish_absent(mut self) {
        self.finished = true;
        self.registry.settle(&self.name, IndexState::Absent, None);
    }
}

impl Drop for Transition {
    fn drop(&mut self) {
        if !self.finished {
            tracing::warn!(
                index = %self.name,
                restored = %self.prior,
                "index transition rolled back"
            );
            self.registry.settle(&self.name, self.prior, None);
        }
    }
}
